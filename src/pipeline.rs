use crate::archive::{bundle_zip, extract_zip, extraction_dir};
use crate::config::Config;
use crate::constants::{
    ANEXO_II_FILE, ANEXO_I_FILE, ANNEX_BACKUP_DIR, ANNEX_BUNDLE_FILE, OPERATORS_FILE,
    OPERATORS_PLACEHOLDER_HEADER, PROCEDURES_BUNDLE_FILE, PROCEDURES_CSV_FILE, STATEMENTS_DIR,
    STORE_FILE,
};
use crate::db::Store;
use crate::error::Result;
use crate::extract::{CommandExtractor, TableExtractor};
use crate::fetch::{
    file_name_from_url, find_annex_links, is_quarter_archive, resolve_href, Fetcher,
};
use crate::normalize::{
    discover_statement_files, merge_fragments, normalize_operators, normalize_statement_file,
    write_canonical_csv,
};
use std::fs;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// The five ordered pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FetchOperators,
    FetchAnnexes,
    ExtractTables,
    FetchStatements,
    Load,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::FetchOperators => "fetch_operators",
            Stage::FetchAnnexes => "fetch_annexes",
            Stage::ExtractTables => "extract_tables",
            Stage::FetchStatements => "fetch_statements",
            Stage::Load => "load",
        }
    }
}

pub const FULL_PIPELINE: [Stage; 5] = [
    Stage::FetchOperators,
    Stage::FetchAnnexes,
    Stage::ExtractTables,
    Stage::FetchStatements,
    Stage::Load,
];
pub const DOWNLOAD_STAGES: [Stage; 3] = [
    Stage::FetchOperators,
    Stage::FetchAnnexes,
    Stage::FetchStatements,
];
pub const IMPORT_STAGES: [Stage; 2] = [Stage::ExtractTables, Stage::Load];

/// What each failure means for the run. The two load operations have their
/// own rows: they degrade independently, while the store itself being
/// unreachable aborts the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageFailure {
    FetchOperators,
    FetchAnnexes,
    ExtractTables,
    FetchStatements,
    LoadOperators,
    LoadStatements,
    StoreUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Fall back and keep going; the run can still end partially useful.
    Degrade,
    /// Downstream stages have no usable input; stop the run.
    Abort,
}

/// The degrade-vs-abort policy, as data rather than control flow.
pub fn failure_policy(failure: StageFailure) -> FailureAction {
    match failure {
        StageFailure::FetchOperators => FailureAction::Degrade,
        StageFailure::FetchAnnexes => FailureAction::Abort,
        StageFailure::ExtractTables => FailureAction::Abort,
        StageFailure::FetchStatements => FailureAction::Degrade,
        StageFailure::LoadOperators => FailureAction::Degrade,
        StageFailure::LoadStatements => FailureAction::Degrade,
        StageFailure::StoreUnavailable => FailureAction::Abort,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Success,
    Degraded,
    Fatal,
}

#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: Stage,
    pub status: StageStatus,
    pub detail: String,
}

impl StageReport {
    fn new(stage: Stage, status: StageStatus, detail: impl Into<String>) -> Self {
        Self {
            stage,
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Partial,
    Fatal,
}

impl Verdict {
    /// Process exit contract: partial success is indistinguishable from
    /// full success by exit code; only the logs tell them apart.
    pub fn exit_code(&self) -> i32 {
        match self {
            Verdict::Success | Verdict::Partial => 0,
            Verdict::Fatal => 1,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Success => "full success",
            Verdict::Partial => "partial success",
            Verdict::Fatal => "failure",
        }
    }
}

pub fn verdict_from_reports(reports: &[StageReport]) -> Verdict {
    if reports.iter().any(|r| r.status == StageStatus::Fatal) {
        Verdict::Fatal
    } else if reports.iter().any(|r| r.status == StageStatus::Degraded) {
        Verdict::Partial
    } else {
        Verdict::Success
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub verdict: Verdict,
    pub reports: Vec<StageReport>,
    pub elapsed: Duration,
}

/// Sequences the stages and owns every cross-stage resource, including the
/// store connection during the load stage.
pub struct Pipeline {
    config: Config,
    fetcher: Fetcher,
    extractor: Box<dyn TableExtractor>,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        let extractor = Box::new(CommandExtractor::new(
            config.extract.command.clone(),
            config.extract.args.clone(),
        ));
        Self::with_extractor(config, extractor)
    }

    /// Builds a pipeline around a custom table extractor.
    pub fn with_extractor(config: Config, extractor: Box<dyn TableExtractor>) -> Result<Self> {
        let fetcher = Fetcher::new(
            config.fetch.max_attempts,
            Duration::from_secs(config.fetch.base_delay_secs),
            Duration::from_secs(config.fetch.timeout_secs),
        )?;
        Ok(Self {
            config,
            fetcher,
            extractor,
        })
    }

    pub async fn run(&self) -> RunSummary {
        self.execute(&FULL_PIPELINE).await
    }

    pub async fn download(&self) -> RunSummary {
        self.execute(&DOWNLOAD_STAGES).await
    }

    pub async fn import(&self) -> RunSummary {
        self.execute(&IMPORT_STAGES).await
    }

    /// Runs the given stages in order. A fatal stage short-circuits the
    /// remainder; everything else accumulates into the final verdict.
    pub async fn execute(&self, stages: &[Stage]) -> RunSummary {
        let started = Instant::now();
        let _ = fs::create_dir_all(self.config.raw_dir());
        let _ = fs::create_dir_all(self.config.processed_dir());

        let mut reports = Vec::new();
        for &stage in stages {
            info!("=== stage {} ===", stage.name());
            let report = match stage {
                Stage::FetchOperators => self.fetch_operators_stage().await,
                Stage::FetchAnnexes => self.fetch_annexes_stage().await,
                Stage::ExtractTables => self.extract_tables_stage(),
                Stage::FetchStatements => self.fetch_statements_stage().await,
                Stage::Load => self.load_stage(),
            };
            match report.status {
                StageStatus::Success => info!("{}: {}", stage.name(), report.detail),
                StageStatus::Degraded => warn!("{} degraded: {}", stage.name(), report.detail),
                StageStatus::Fatal => error!("{} fatal: {}", stage.name(), report.detail),
            }
            let fatal = report.status == StageStatus::Fatal;
            reports.push(report);
            if fatal {
                break;
            }
        }

        RunSummary {
            verdict: verdict_from_reports(&reports),
            reports,
            elapsed: started.elapsed(),
        }
    }

    async fn fetch_operators_stage(&self) -> StageReport {
        let stage = Stage::FetchOperators;
        let dest = self.config.raw_dir().join(OPERATORS_FILE);
        match self
            .fetcher
            .download(&self.config.source.operators_url, &dest)
            .await
        {
            Ok(attempts) => StageReport::new(
                stage,
                StageStatus::Success,
                format!("operator registry downloaded (attempt {attempts})"),
            ),
            Err(e) => match failure_policy(StageFailure::FetchOperators) {
                FailureAction::Degrade => {
                    // Keep a previous download when one exists; otherwise a
                    // header-only placeholder lets downstream stages run.
                    if dest.exists() {
                        StageReport::new(
                            stage,
                            StageStatus::Degraded,
                            format!("fetch failed ({e}); reusing existing local file"),
                        )
                    } else {
                        match fs::write(&dest, format!("{OPERATORS_PLACEHOLDER_HEADER}\n")) {
                            Ok(()) => StageReport::new(
                                stage,
                                StageStatus::Degraded,
                                format!("fetch failed ({e}); placeholder file synthesized"),
                            ),
                            Err(io) => StageReport::new(
                                stage,
                                StageStatus::Fatal,
                                format!(
                                    "fetch failed ({e}) and placeholder could not be written: {io}"
                                ),
                            ),
                        }
                    }
                }
                FailureAction::Abort => StageReport::new(stage, StageStatus::Fatal, e.to_string()),
            },
        }
    }

    async fn fetch_annexes_stage(&self) -> StageReport {
        let stage = Stage::FetchAnnexes;
        match self.fetch_annexes().await {
            Ok(()) => StageReport::new(
                stage,
                StageStatus::Success,
                "Anexo I and Anexo II downloaded and bundled",
            ),
            Err(e) => match failure_policy(StageFailure::FetchAnnexes) {
                FailureAction::Abort => StageReport::new(stage, StageStatus::Fatal, e.to_string()),
                FailureAction::Degrade => {
                    StageReport::new(stage, StageStatus::Degraded, e.to_string())
                }
            },
        }
    }

    async fn fetch_annexes(&self) -> Result<()> {
        let page_url = &self.config.source.annexes_page_url;
        let links = self.fetcher.page_links(page_url).await?;
        let annexes = find_annex_links(&links)?;

        let raw = self.config.raw_dir();
        let backup = self.config.paths.data_root.join(ANNEX_BACKUP_DIR);
        fs::create_dir_all(&backup)?;

        let mut bundled = Vec::new();
        for (file_name, href) in [
            (ANEXO_I_FILE, &annexes.anexo_i),
            (ANEXO_II_FILE, &annexes.anexo_ii),
        ] {
            let url = resolve_href(page_url, href);
            let dest = raw.join(file_name);
            self.fetcher.download(&url, &dest).await?;
            fs::copy(&dest, backup.join(file_name))?;
            bundled.push(dest);
        }
        bundle_zip(&bundled, &raw.join(ANNEX_BUNDLE_FILE))?;
        Ok(())
    }

    fn extract_tables_stage(&self) -> StageReport {
        let stage = Stage::ExtractTables;
        match self.extract_tables() {
            Ok(rows) => StageReport::new(
                stage,
                StageStatus::Success,
                format!("procedures table extracted ({rows} rows)"),
            ),
            Err(e) => match failure_policy(StageFailure::ExtractTables) {
                FailureAction::Abort => StageReport::new(stage, StageStatus::Fatal, e.to_string()),
                FailureAction::Degrade => {
                    StageReport::new(stage, StageStatus::Degraded, e.to_string())
                }
            },
        }
    }

    fn extract_tables(&self) -> Result<usize> {
        let pdf_path = self.config.raw_dir().join(ANEXO_I_FILE);
        let fragments = self.extractor.extract_tables(&pdf_path)?;
        let table = merge_fragments(ANEXO_I_FILE, fragments)?;

        let csv_path = self.config.processed_dir().join(PROCEDURES_CSV_FILE);
        write_canonical_csv(&table, &csv_path)?;
        bundle_zip(
            &[csv_path],
            &self.config.processed_dir().join(PROCEDURES_BUNDLE_FILE),
        )?;
        Ok(table.rows.len())
    }

    async fn fetch_statements_stage(&self) -> StageReport {
        let stage = Stage::FetchStatements;
        let base_url = &self.config.source.statements_base_url;
        let statements_dir = self.config.raw_dir().join(STATEMENTS_DIR);

        let mut archives = 0usize;
        let mut failures = 0usize;
        for year in self.config.statement_years() {
            let listing_url = format!("{base_url}{year}/");
            let quarter_links = match self
                .fetcher
                .discover_links(&listing_url, is_quarter_archive)
                .await
            {
                Ok(links) => links,
                Err(e) => {
                    warn!("Year listing {} failed: {}", listing_url, e);
                    failures += 1;
                    continue;
                }
            };
            if quarter_links.is_empty() {
                warn!("No quarterly archives found for {}", year);
                continue;
            }
            for href in quarter_links {
                let url = resolve_href(&listing_url, &href);
                let dest = statements_dir
                    .join(year.to_string())
                    .join(file_name_from_url(&href));
                // One bad archive never takes down its siblings
                match self.fetcher.download(&url, &dest).await {
                    Ok(_) => match extract_zip(&dest, &extraction_dir(&dest)) {
                        Ok(()) => archives += 1,
                        Err(e) => {
                            warn!("Extraction of {} failed: {}", dest.display(), e);
                            failures += 1;
                        }
                    },
                    Err(e) => {
                        warn!("Download of {} failed: {}", url, e);
                        failures += 1;
                    }
                }
            }
        }

        let detail = format!("{archives} quarterly archives ready, {failures} failures");
        if failures == 0 {
            StageReport::new(stage, StageStatus::Success, detail)
        } else {
            match failure_policy(StageFailure::FetchStatements) {
                FailureAction::Degrade => StageReport::new(stage, StageStatus::Degraded, detail),
                FailureAction::Abort => StageReport::new(stage, StageStatus::Fatal, detail),
            }
        }
    }

    fn load_stage(&self) -> StageReport {
        let stage = Stage::Load;

        let store_path = self.config.processed_dir().join(STORE_FILE);
        let mut store = match Store::open(&store_path).and_then(|store| {
            store.ensure_schema()?;
            Ok(store)
        }) {
            Ok(store) => store,
            Err(e) => {
                return match failure_policy(StageFailure::StoreUnavailable) {
                    FailureAction::Abort => {
                        StageReport::new(stage, StageStatus::Fatal, e.to_string())
                    }
                    FailureAction::Degrade => {
                        StageReport::new(stage, StageStatus::Degraded, e.to_string())
                    }
                };
            }
        };

        let mut degraded: Vec<String> = Vec::new();

        // Operators: full replace, falling back to an empty relation
        let operators_path = self.config.raw_dir().join(OPERATORS_FILE);
        let operator_load = fs::read(&operators_path)
            .map_err(Into::into)
            .and_then(|bytes| normalize_operators(&bytes))
            .and_then(|records| store.load_operators(&records));
        match operator_load {
            Ok(count) => info!("Operators loaded: {}", count),
            Err(e) => match failure_policy(StageFailure::LoadOperators) {
                FailureAction::Degrade => {
                    warn!("Operator load failed ({}); loading empty relation", e);
                    if let Err(fallback) = store.clear_operators() {
                        return StageReport::new(
                            stage,
                            StageStatus::Fatal,
                            format!("operator fallback failed: {fallback}"),
                        );
                    }
                    degraded.push(format!("operators fell back to empty relation ({e})"));
                }
                FailureAction::Abort => {
                    return StageReport::new(stage, StageStatus::Fatal, e.to_string());
                }
            },
        }

        // Statements: append per file, isolating per-file failures
        let files = discover_statement_files(&self.config.raw_dir().join(STATEMENTS_DIR));
        let mut total_rows = 0usize;
        let mut contributing = 0usize;
        for file in &files {
            let appended = normalize_statement_file(file)
                .and_then(|records| store.append_statements(&records, self.config.load.batch_size));
            match appended {
                Ok(0) => {}
                Ok(count) => {
                    info!("{}: {} rows", file.path.display(), count);
                    total_rows += count;
                    contributing += 1;
                }
                Err(e) => {
                    warn!("Skipping {}: {}", file.path.display(), e);
                }
            }
        }
        info!(
            "Statements loaded: {} rows from {} of {} files",
            total_rows,
            contributing,
            files.len()
        );
        if total_rows == 0 {
            match failure_policy(StageFailure::LoadStatements) {
                FailureAction::Degrade => {
                    degraded.push("no statement rows loaded".to_string());
                }
                FailureAction::Abort => {
                    return StageReport::new(
                        stage,
                        StageStatus::Fatal,
                        "no statement rows loaded".to_string(),
                    );
                }
            }
        }

        if let Err(e) = store.close() {
            warn!("Store close reported: {}", e);
            degraded.push(format!("store close reported: {e}"));
        }

        if degraded.is_empty() {
            StageReport::new(
                stage,
                StageStatus::Success,
                format!("{total_rows} statement rows loaded from {contributing} files"),
            )
        } else {
            StageReport::new(stage, StageStatus::Degraded, degraded.join("; "))
        }
    }
}
