use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use webseek::{
    create_router, AppState, Config, Crawler, Frontier, HttpFetcher, Indexer, MemoryIndexStore,
    MemoryPageStore, MemoryQueueStore, QueryEngine,
};

#[derive(Parser)]
#[command(name = "webseek")]
#[command(about = "Small-scale web search engine: crawler, indexer and query API", long_about = None)]
struct Args {
    /// Mode: crawl, seed, indexer or search
    #[arg(long, default_value = "crawl")]
    mode: String,

    /// Number of worker tasks (overrides the config file)
    #[arg(long, default_value_t = 3)]
    workers: usize,

    /// Path to the YAML configuration file
    #[arg(long, default_value = "crawler.yaml")]
    config: String,

    /// Path to the CSV seed file (header row with a Domain column)
    #[arg(long, default_value = "seed_urls.csv")]
    seedfile: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let mut cfg = match Config::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(config = %args.config, error = %e, "cannot load configuration, using defaults");
            Config::default()
        }
    };
    if args.workers == 0 {
        bail!("number of workers must be a natural number");
    }
    cfg.workers = args.workers;

    info!(version = webseek::VERSION, mode = %args.mode, "starting webseek");

    // the store contracts; these in-memory backends are swapped for the
    // external services in a deployed setup
    let queue = Arc::new(MemoryQueueStore::new());
    let pages = Arc::new(MemoryPageStore::new());
    let index = Arc::new(MemoryIndexStore::new());
    let frontier = Arc::new(Frontier::new(queue));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received shutdown signal, cancelling");
                cancel.cancel();
            }
        });
    }

    match args.mode.as_str() {
        "crawl" => {
            let fetcher = Arc::new(HttpFetcher::new(&cfg).context("cannot build fetcher")?);
            let crawler = Crawler::new(&cfg, frontier, fetcher, pages);
            crawler.run(cancel).await;
        }
        "seed" => {
            let fetcher = Arc::new(HttpFetcher::new(&cfg).context("cannot build fetcher")?);
            let crawler = Crawler::new(&cfg, frontier, fetcher, pages);
            let enqueued = crawler
                .seed_from_file(&args.seedfile)
                .await
                .context("seeding failed")?;
            info!(enqueued, "seeding complete");
        }
        "indexer" => {
            let indexer = Indexer::new(&cfg.index, pages, frontier, index);
            indexer.run(cancel).await.context("indexer failed")?;
        }
        "search" => {
            let engine = Arc::new(
                QueryEngine::new(&cfg.query, index)
                    .await
                    .context("cannot initialize query engine")?,
            );
            engine.start_background_tasks(cancel.clone());

            if cfg.search.warm_cache {
                info!("warming up query cache");
                if let Err(e) = engine.warm_cache(1000).await {
                    warn!(error = %e, "cache warm-up failed");
                }
            }

            let app = create_router(AppState {
                engine: engine.clone(),
            });
            let listener = tokio::net::TcpListener::bind(&cfg.search.http_addr)
                .await
                .with_context(|| format!("cannot bind {}", cfg.search.http_addr))?;
            info!(addr = %cfg.search.http_addr, "search API listening");

            axum::serve(listener, app)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await
                .context("http server failed")?;
            info!("server exited");
        }
        other => bail!("unknown mode: {}. Use crawl, seed, indexer or search", other),
    }

    Ok(())
}
