use anyhow::Result;
use catalog_sync::DownloadConfig;
use clap::{ArgAction, Parser, Subcommand};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "catalog")]
#[command(about = "Harvest course catalog data into per-year JSON datasets")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Hide the download progress bar.
    #[arg(long, global = true)]
    no_progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download one academic year into data/courses-<year>.json.
    Download {
        #[arg(long, env = "CATALOG_YEAR", default_value_t = 0)]
        year: u32,
    },
    /// Concatenate every data/courses-<year>.json into data/courses.json.
    Combine,
    /// Split data/courses.json back into per-year files.
    Split,
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match verbose {
        0 => "catalog=info",
        1 => "catalog=debug",
        _ => "catalog=trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    fmt().with_env_filter(env_filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = DownloadConfig::from_env();
    if cli.no_progress {
        config.show_progress = false;
    }

    match cli.command {
        Commands::Download { year } => {
            let report = catalog_sync::run_download(year, &config).await?;
            println!(
                "download complete: run_id={} source={} records={} duplicates={} file={}",
                report.run_id,
                report.summary.source,
                report.dataset.records,
                report.summary.duplicates(),
                report.dataset.path.display()
            );
        }
        Commands::Combine => {
            info!(dir = %config.data_dir.display(), "searching for course data");
            let stored = config.store().combine().await?;
            println!(
                "combine complete: records={} file={}",
                stored.records,
                stored.path.display()
            );
        }
        Commands::Split => {
            let written = config.store().split().await?;
            println!("split complete: files={}", written.len());
        }
    }

    Ok(())
}
