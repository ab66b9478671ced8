use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pieces_core::DatasetKind;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "pieces-cli")]
#[command(about = "Extract composer, title, catalog number, key and form from piano piece titles")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run every enabled dataset in registry order (the default).
    Run {
        /// Only run this dataset: fs, pstreet, cipi or audio.
        #[arg(long)]
        dataset: Option<DatasetKind>,
    },
    /// Extract metadata from a single title and print the record.
    Extract { title: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,reqwest=warn,hyper=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run { dataset: None }) {
        Commands::Run { dataset } => {
            let summary = pieces_sync::run_pipeline_from_env(dataset).await?;
            for ds in &summary.datasets {
                println!(
                    "{}: items={} parse_failures={} output={}",
                    ds.dataset,
                    ds.items,
                    ds.parse_failures,
                    ds.output_path.display()
                );
            }
            println!(
                "run complete: run_id={} datasets={} items={} parse_failures={}",
                summary.run_id,
                summary.datasets.len(),
                summary.total_items(),
                summary.total_parse_failures()
            );
        }
        Commands::Extract { title } => {
            let record = pieces_sync::extract_title_from_env(&title).await?;
            let bytes = pieces_storage::to_indented_json(&record).context("rendering record")?;
            println!("{}", String::from_utf8_lossy(&bytes));
        }
    }

    Ok(())
}
