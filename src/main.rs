use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use evidence::pipeline::report::{self, ContentStats};
use evidence::{Pipeline, PipelineConfig};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about = "Gather news articles as evidence for a claim")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search, fetch and extract articles for a query
    Run(RunArgs),

    /// Only run the search stage and print the merged results
    Search(SearchArgs),

    /// Fetch and extract a single page
    Extract {
        /// Page URL
        url: String,
    },

    /// List the search providers with usable credentials
    Providers,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Claim or search query
    query: String,

    /// Maximum number of search results to process
    #[arg(short = 'n', long)]
    max_results: Option<usize>,

    /// Abandon the run after this many seconds, keeping finished records
    #[arg(long)]
    timeout: Option<u64>,

    /// Number of pages fetched concurrently
    #[arg(long)]
    concurrency: Option<usize>,

    /// Also write every record as JSON lines to this file
    #[arg(long)]
    jsonl: Option<PathBuf>,

    /// Print records as a JSON array instead of a summary
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct SearchArgs {
    /// Search query
    query: String,

    #[arg(short = 'n', long)]
    max_results: Option<usize>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("evidence=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let mut config = PipelineConfig::from_env()?;

    match cli.command {
        Commands::Run(args) => {
            if let Some(n) = args.max_results {
                config = config.with_max_results(n);
            }
            if let Some(n) = args.concurrency {
                config = config.with_concurrency(n);
            }
            if let Some(secs) = args.timeout {
                config = config.with_run_timeout(Some(Duration::from_secs(secs)));
            }
            let max_results = config.max_results;
            let pipeline = Pipeline::new(config)?;
            let run = pipeline.run(&args.query, max_results).await;

            if let Some(path) = &args.jsonl {
                report::write_jsonl(&run.records, BufWriter::new(File::create(path)?))?;
                info!(path = %path.display(), records = run.records.len(), "records written");
            }

            if args.json {
                report::write_json(&run.records, io::stdout().lock())?;
            } else {
                print!("{}", report::format_summary(&run));
                let stats = ContentStats::from_records(&run.records);
                println!(
                    "\n{} words total, {:.0} per article, {} domains",
                    stats.total_words, stats.average_words, stats.unique_domains
                );
            }
        }
        Commands::Search(args) => {
            let max_results = args.max_results.unwrap_or(config.max_results);
            let pipeline = Pipeline::new(config)?;
            let results = pipeline.aggregator().aggregate(&args.query, max_results).await;

            if args.json {
                serde_json::to_writer_pretty(io::stdout().lock(), &results)?;
                println!();
            } else {
                for (i, result) in results.iter().enumerate() {
                    println!("{}. {} [{}]", i + 1, result.title, result.source);
                    println!("   {}", result.url);
                }
                if results.is_empty() {
                    println!("No results.");
                }
            }
        }
        Commands::Extract { url } => {
            let pipeline = Pipeline::new(config)?;
            let record = pipeline.extract_url(&url).await?;
            serde_json::to_writer_pretty(io::stdout().lock(), &record)?;
            println!();
        }
        Commands::Providers => {
            let pipeline = Pipeline::new(config)?;
            let providers = pipeline.aggregator().available_providers();
            if providers.is_empty() {
                println!("No search providers configured.");
            }
            for name in providers {
                println!("{name}");
            }
        }
    }

    Ok(())
}
