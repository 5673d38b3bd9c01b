use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use poptrend_core::RankingType;
use poptrend_pipeline::{Pipeline, PipelineConfig};
use tracing::error;

#[derive(Debug, Parser)]
#[command(name = "poptrend")]
#[command(about = "Pop-culture dataset trend tracker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RankingArg {
    Hottest,
    Upvoted,
}

impl From<RankingArg> for RankingType {
    fn from(arg: RankingArg) -> Self {
        match arg {
            RankingArg::Hottest => RankingType::Hottest,
            RankingArg::Upvoted => RankingType::Upvoted,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch, classify, and export one ranking (or both).
    Fetch {
        #[arg(value_enum)]
        ranking: Option<RankingArg>,
    },
    /// Merge the export files and append today's trend row.
    Aggregate,
    /// Fetch both rankings, then aggregate.
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    if let Err(err) = run().await {
        error!("run failed: {err:#}");
        return Err(err);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let pipeline = Pipeline::from_config(PipelineConfig::from_env())?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Fetch { ranking } => {
            let rankings: Vec<RankingType> = match ranking {
                Some(arg) => vec![arg.into()],
                None => vec![RankingType::Upvoted, RankingType::Hottest],
            };
            for ranking in rankings {
                let summary = pipeline.fetch_ranking(ranking).await?;
                println!(
                    "saved {} {} datasets to {}",
                    summary.records, summary.ranking, summary.export_path
                );
            }
        }
        Commands::Aggregate => {
            let summary = pipeline.aggregate()?;
            println!(
                "merged {} datasets across {} categories ({}) -> {}",
                summary.merged_records,
                summary.categories,
                summary.outcome.as_str(),
                summary.trend_log
            );
        }
        Commands::Run => {
            let summary = pipeline.run_once().await?;
            println!(
                "run complete: run_id={} records={} categories={} trend_log={} ({})",
                summary.run_id,
                summary.total_records(),
                summary.aggregate.categories,
                summary.aggregate.trend_log,
                summary.aggregate.outcome.as_str()
            );
        }
    }

    Ok(())
}
