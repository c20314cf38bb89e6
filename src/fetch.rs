use crate::constants::QUARTER_TOKENS;
use crate::error::{EtlError, Result};
use scraper::{Html, Selector};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// A hyperlink discovered on a listing page: anchor text plus target.
#[derive(Debug, Clone)]
pub struct Link {
    pub text: String,
    pub href: String,
}

/// The two annex documents located on the procedures page.
#[derive(Debug, Clone)]
pub struct AnnexLinks {
    pub anexo_i: String,
    pub anexo_ii: String,
}

pub struct Fetcher {
    client: reqwest::Client,
    max_attempts: u32,
    base_delay: Duration,
}

/// Runs `op` up to `max_attempts` times with a linearly increasing delay
/// between attempts. Returns the value and the attempt number that
/// succeeded, or the last error message once attempts are exhausted.
pub(crate) async fn with_retry<T, F, Fut>(
    max_attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> std::result::Result<(T, u32), String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = String::from("no attempts made");
    for attempt in 1..=max_attempts {
        match op().await {
            Ok(value) => return Ok((value, attempt)),
            Err(e) => {
                last_error = e.to_string();
                if attempt < max_attempts {
                    let delay = base_delay * attempt;
                    warn!(
                        attempt,
                        max_attempts,
                        "attempt failed: {}; retrying in {:?}",
                        last_error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(last_error)
}

impl Fetcher {
    pub fn new(max_attempts: u32, base_delay: Duration, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            max_attempts,
            base_delay,
        })
    }

    /// Downloads `url` into `destination`, retrying transient failures.
    /// The file is written to a `.part` sibling first and renamed into
    /// place once complete. Returns the attempt number that succeeded.
    pub async fn download(&self, url: &str, destination: &Path) -> Result<u32> {
        info!("Downloading {} -> {}", url, destination.display());
        match with_retry(self.max_attempts, self.base_delay, || {
            self.fetch_to_disk(url, destination)
        })
        .await
        {
            Ok(((), attempts)) => {
                info!("Downloaded {} on attempt {}", url, attempts);
                Ok(attempts)
            }
            Err(last_error) => Err(EtlError::Transfer {
                url: url.to_string(),
                attempts: self.max_attempts,
                last_error,
            }),
        }
    }

    async fn fetch_to_disk(&self, url: &str, destination: &Path) -> Result<()> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file_name = destination
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "download".to_string());
        let tmp = destination.with_file_name(format!("{}.part", file_name));
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, destination)?;
        Ok(())
    }

    /// Fetches an HTML page and returns the hrefs of the links satisfying
    /// `predicate`.
    pub async fn discover_links<P>(&self, page_url: &str, predicate: P) -> Result<Vec<String>>
    where
        P: Fn(&Link) -> bool,
    {
        let links = self.page_links(page_url).await?;
        Ok(links
            .into_iter()
            .filter(|l| predicate(l))
            .map(|l| l.href)
            .collect())
    }

    /// Fetches an HTML page and returns every anchor on it.
    pub async fn page_links(&self, page_url: &str) -> Result<Vec<Link>> {
        let body = self
            .client
            .get(page_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(collect_links(&body))
    }
}

/// Collects every `<a href>` element of an HTML document.
pub fn collect_links(html: &str) -> Vec<Link> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").unwrap();
    document
        .select(&selector)
        .filter_map(|element| {
            let href = element.value().attr("href")?;
            let text = element.text().collect::<String>().trim().to_string();
            Some(Link {
                text,
                href: href.to_string(),
            })
        })
        .collect()
}

/// Locates Anexo I and Anexo II PDFs on the procedures page. Matching is
/// deliberately fuzzy (anchor text or URL fragments, case-insensitive) and
/// keeps the first hit per annex. Both annexes are required.
pub fn find_annex_links(links: &[Link]) -> Result<AnnexLinks> {
    let mut anexo_i: Option<String> = None;
    let mut anexo_ii: Option<String> = None;

    for link in links {
        let text = link.text.to_lowercase();
        let href = link.href.to_lowercase();
        if !href.ends_with(".pdf") {
            continue;
        }
        if anexo_i.is_none()
            && (text.contains("anexo i") || href.contains("anexoi") || href.contains("rol"))
        {
            anexo_i = Some(link.href.clone());
        }
        if anexo_ii.is_none()
            && (text.contains("anexo ii") || href.contains("anexoii") || href.contains("anexo2"))
        {
            anexo_ii = Some(link.href.clone());
        }
    }

    match (anexo_i, anexo_ii) {
        (Some(anexo_i), Some(anexo_ii)) => Ok(AnnexLinks { anexo_i, anexo_ii }),
        (anexo_i, anexo_ii) => {
            let mut missing = Vec::new();
            if anexo_i.is_none() {
                missing.push("Anexo_I.pdf");
            }
            if anexo_ii.is_none() {
                missing.push("Anexo_II.pdf");
            }
            Err(EtlError::LinkNotFound(missing.join(", ")))
        }
    }
}

/// Predicate for quarterly statement archives in a year-directory listing:
/// zip links whose name carries a quarter token (1T..4T).
pub fn is_quarter_archive(link: &Link) -> bool {
    link.href.ends_with(".zip") && QUARTER_TOKENS.iter().any(|q| link.href.contains(q))
}

/// Joins a directory-listing href against its base URL. Listing pages use
/// relative file names; absolute links pass through untouched.
pub fn resolve_href(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        format!("{}{}", base_url, href)
    }
}

/// Last path segment of a URL, used as the local file name.
pub fn file_name_from_url(url: &str) -> String {
    url.rsplit('/')
        .next()
        .unwrap_or(url)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io;

    fn transient() -> EtlError {
        EtlError::Io(io::Error::new(io::ErrorKind::TimedOut, "timed out"))
    }

    #[tokio::test]
    async fn retry_succeeds_on_nth_attempt_with_n_attempts_recorded() {
        let calls = Cell::new(0u32);
        let result = with_retry(5, Duration::from_millis(0), || {
            let n = calls.get() + 1;
            calls.set(n);
            async move {
                if n < 3 {
                    Err(transient())
                } else {
                    Ok("payload")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), ("payload", 3));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn retry_first_attempt_success_does_not_retry() {
        let calls = Cell::new(0u32);
        let result = with_retry(3, Duration::from_millis(0), || {
            calls.set(calls.get() + 1);
            async { Ok(()) }
        })
        .await;
        assert_eq!(result.unwrap().1, 1);
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn retry_exhaustion_reports_last_error() {
        let calls = Cell::new(0u32);
        let result: std::result::Result<((), u32), String> =
            with_retry(3, Duration::from_millis(0), || {
                calls.set(calls.get() + 1);
                async { Err(transient()) }
            })
            .await;
        let message = result.unwrap_err();
        assert!(message.contains("timed out"));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn exhausted_download_yields_transfer_failure() {
        let dir = tempfile::tempdir().unwrap();
        // Nothing listens on the discard port; every attempt fails fast
        let fetcher = Fetcher::new(2, Duration::from_millis(0), Duration::from_secs(2)).unwrap();
        let dest = dir.path().join("out.csv");
        let err = fetcher
            .download("http://127.0.0.1:9/file.csv", &dest)
            .await
            .unwrap_err();
        match err {
            EtlError::Transfer { url, attempts, .. } => {
                assert_eq!(attempts, 2);
                assert!(url.ends_with("file.csv"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dest.exists());
    }

    const PROCEDURES_PAGE: &str = r##"
        <html><body>
          <a href="/docs/outros/nota.pdf">Nota explicativa</a>
          <a href="https://example.gov/docs/Anexo_I_Rol_2021.pdf">Anexo I - Rol de Procedimentos</a>
          <a href="https://example.gov/docs/anexo2_dut.pdf">Anexo II - DUT</a>
          <a href="https://example.gov/docs/planilha.xlsx">Anexo I em planilha</a>
        </body></html>
    "##;

    #[test]
    fn collect_links_extracts_text_and_href() {
        let links = collect_links(PROCEDURES_PAGE);
        assert_eq!(links.len(), 4);
        assert_eq!(links[1].text, "Anexo I - Rol de Procedimentos");
        assert!(links[1].href.ends_with("Anexo_I_Rol_2021.pdf"));
    }

    #[test]
    fn find_annex_links_locates_both_annexes() {
        let links = collect_links(PROCEDURES_PAGE);
        let annexes = find_annex_links(&links).unwrap();
        assert!(annexes.anexo_i.ends_with("Anexo_I_Rol_2021.pdf"));
        assert!(annexes.anexo_ii.ends_with("anexo2_dut.pdf"));
    }

    #[test]
    fn find_annex_links_ignores_non_pdf_targets() {
        let links = vec![Link {
            text: "Anexo I".to_string(),
            href: "https://example.gov/anexoi.xlsx".to_string(),
        }];
        let err = find_annex_links(&links).unwrap_err();
        match err {
            EtlError::LinkNotFound(missing) => {
                assert!(missing.contains("Anexo_I.pdf"));
                assert!(missing.contains("Anexo_II.pdf"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn find_annex_links_reports_missing_anexo_ii() {
        let html = r#"<a href="rol_procedimentos.pdf">Anexo I</a>"#;
        let err = find_annex_links(&collect_links(html)).unwrap_err();
        match err {
            EtlError::LinkNotFound(missing) => assert_eq!(missing, "Anexo_II.pdf"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn quarter_archive_predicate_filters_listing() {
        let html = r#"
            <a href="1T2023.zip">1T2023.zip</a>
            <a href="2T2023.zip">2T2023.zip</a>
            <a href="leia_me.txt">leia_me.txt</a>
            <a href="historico.zip">historico.zip</a>
        "#;
        let quarters: Vec<String> = collect_links(html)
            .into_iter()
            .filter(is_quarter_archive)
            .map(|l| l.href)
            .collect();
        assert_eq!(quarters, vec!["1T2023.zip", "2T2023.zip"]);
    }

    #[test]
    fn resolve_href_joins_relative_names() {
        assert_eq!(
            resolve_href("https://example.gov/FTP/2023/", "1T2023.zip"),
            "https://example.gov/FTP/2023/1T2023.zip"
        );
        assert_eq!(
            resolve_href("https://example.gov/FTP/2023/", "https://cdn.example.gov/1T2023.zip"),
            "https://cdn.example.gov/1T2023.zip"
        );
    }

    #[test]
    fn file_name_from_url_takes_last_segment() {
        assert_eq!(
            file_name_from_url("https://example.gov/FTP/2023/1T2023.zip"),
            "1T2023.zip"
        );
    }
}
