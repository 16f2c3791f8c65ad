use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use argh::FromArgs;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use landscape::cohort::top_local_units;
use landscape::fetch::Fetcher;
use landscape::graph::{build_graph, GraphOptions, DEFAULT_THRESHOLD};
use landscape::openalex::OpenAlex;
use landscape::pipeline::{crawl, run_uniqueness, CrawlOptions};
use landscape::store::SnapshotStore;
use landscape::{export, Dimension, Period};

#[derive(FromArgs)]
/// Follow what countries publish on, and how it sets them apart.
struct Cli {
    /// where the per-country snapshots live
    #[argh(option, default = "\"data\".into()")]
    data_dir: PathBuf,
    /// what works are grouped by: subfield, topic, field or funder
    #[argh(option, default = "Dimension::Subfield")]
    dimension: Dimension,
    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Crawl(CrawlArgs),
    Uniqueness(UniquenessArgs),
    Graph(GraphArgs),
    Export(ExportArgs),
}

#[derive(FromArgs)]
/// Lock each country's cohort and fetch its yearly volumes.
#[argh(subcommand, name = "crawl")]
struct CrawlArgs {
    /// what URL will be serving the API
    #[argh(option, default = "endpoints::OPENALEX_BASE_URI.into()")]
    base_uri: String,
    /// a country code to crawl; repeat for more.  Without any, the most
    /// active countries are crawled.
    #[argh(option)]
    country: Vec<String>,
    /// how many of the most active countries to crawl
    #[argh(option, default = "100")]
    countries: usize,
    /// how many entities make up a cohort
    #[argh(option, default = "10")]
    top_n: usize,
    /// how many years before the current one to follow
    #[argh(option, default = "20")]
    years_back: u32,
    /// only count works of this domain, e.g. 3 for Physical Sciences
    #[argh(option)]
    domain: Option<String>,
    /// also store the top funder of every cohort entity
    #[argh(switch)]
    funders: bool,
}

#[derive(FromArgs)]
/// Score every stored country against the global baseline.
#[argh(subcommand, name = "uniqueness")]
struct UniquenessArgs {
    /// how many scores to keep per country
    #[argh(option, default = "5")]
    top: usize,
}

#[derive(FromArgs)]
/// Print the similarity graph of a country's cohort.
#[argh(subcommand, name = "graph")]
struct GraphArgs {
    /// the country code
    #[argh(option)]
    country: String,
    /// use this year's volumes instead of the all-time ones
    #[argh(option)]
    year: Option<Period>,
    /// how similar two names must be to get an edge
    #[argh(option, default = "DEFAULT_THRESHOLD")]
    threshold: f64,
    /// print JSON instead of DOT
    #[argh(switch)]
    json: bool,
}

#[derive(FromArgs)]
/// Write every country's cohort and trends as one JSON document.
#[argh(subcommand, name = "export")]
struct ExportArgs {
    /// the file to write
    #[argh(option, default = "\"generated-data.json\".into()")]
    out: PathBuf,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Stop after the country being crawled when Ctrl-C comes in.
fn stop_on_ctrl_c() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; finishing the current country");
            flag.store(true, Ordering::SeqCst);
        }
    });
    stop
}

async fn run_crawl(
    store: &SnapshotStore,
    args: CrawlArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let fetcher = Fetcher::new(OpenAlex::from_env(args.base_uri));
    let countries = if args.country.is_empty() {
        top_local_units(&fetcher, args.countries)
            .await
            .into_iter()
            .map(|unit| unit.id)
            .collect()
    } else {
        args.country
    };
    info!(countries = countries.len(), dimension = %store.dimension(), "crawling");

    let options = CrawlOptions {
        domain: args.domain,
        funders: args.funders,
        ..CrawlOptions::years_back(args.top_n, args.years_back)
    };
    let report = crawl(&fetcher, store, &countries, &options, &stop_on_ctrl_c()).await;
    info!(
        crawled = report.crawled.len(),
        no_data = report.no_data.len(),
        failed = report.failed.len(),
        interrupted = report.interrupted,
        "crawl complete"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli: Cli = argh::from_env();
    let store = SnapshotStore::new(cli.data_dir, cli.dimension);

    match cli.command {
        Command::Crawl(args) => run_crawl(&store, args).await?,
        Command::Uniqueness(args) => {
            for (country, scores) in run_uniqueness(&store, args.top)? {
                let names: Vec<_> = scores
                    .iter()
                    .map(|score| format!("{} ({})", score.name, score.score))
                    .collect();
                info!(country = %country, "{}", names.join(", "));
            }
        }
        Command::Graph(args) => {
            let entities = store.load_entities(&args.country, args.year)?;
            let options = GraphOptions::default().with_threshold(args.threshold);
            let graph = build_graph(&entities, &options);
            if args.json {
                println!("{}", serde_json::to_string_pretty(&graph)?);
            } else {
                println!("{}", graph.to_dot());
            }
        }
        Command::Export(args) => {
            export::write_export(&store, &args.out)?;
        }
    }
    Ok(())
}
