use ans_etl::config::Config;
use ans_etl::logging;
use ans_etl::pipeline::{Pipeline, RunSummary, StageStatus, Verdict};
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "ans_etl")]
#[command(about = "ANS open-data ETL pipeline: download, normalize and load regulatory filings")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the operator registry, annex PDFs and quarterly archives
    Download,
    /// Convert the annex PDF and load everything on disk into the store
    Import,
    /// Run the full pipeline (download + import)
    Run,
}

fn print_summary(summary: &RunSummary) {
    println!("\n📊 Pipeline results:");
    for report in &summary.reports {
        let marker = match report.status {
            StageStatus::Success => "✅",
            StageStatus::Degraded => "⚠️ ",
            StageStatus::Fatal => "❌",
        };
        println!("   {} {}: {}", marker, report.stage.name(), report.detail);
    }
    println!(
        "\n   Elapsed: {:.1}s ({})",
        summary.elapsed.as_secs_f64(),
        summary.verdict.label()
    );
    if summary.verdict == Verdict::Partial {
        println!("   ⚠️  Some stages degraded; check the logs above.");
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config);

    let pipeline = match Pipeline::new(config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("❌ Failed to initialize pipeline: {e}");
            std::process::exit(1);
        }
    };

    let summary = match cli.command {
        Commands::Download => {
            println!("📥 Downloading ANS source data...");
            pipeline.download().await
        }
        Commands::Import => {
            println!("🔨 Importing downloaded data into the store...");
            pipeline.import().await
        }
        Commands::Run => {
            println!("🚀 Running full ETL pipeline...");
            pipeline.run().await
        }
    };

    info!(
        "Run finished in {:.1}s with verdict: {}",
        summary.elapsed.as_secs_f64(),
        summary.verdict.label()
    );
    print_summary(&summary);

    std::process::exit(summary.verdict.exit_code());
}
