use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use quill_agent::DefaultAgentFactory;
use quill_memory::{BrandStore, FileBrandStore};
use quill_observability::{ActivityLog, LogBuffer};
use quill_scheduler::runtime::build_providers;
use quill_scheduler::{BrandBackend, InMemoryJobQueue, JobPlanner, JobQueue, QueueBackend, QuillConfig, Worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    quill_observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = QuillConfig::load(config_path.as_deref()).context("invalid configuration")?;
    tracing::info!(?config, "configuration loaded");

    let activity: Arc<dyn ActivityLog> = Arc::new(LogBuffer::default());
    let providers = build_providers(&config.providers, Arc::clone(&activity)).context("failed to build providers")?;

    let data_dir = config.storage.data_dir.clone();
    tokio::fs::create_dir_all(&data_dir)
        .await
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;
    let store = open_store(&config).await?;

    let queue = open_queue(&config).await?;
    let factory = DefaultAgentFactory::new(Arc::clone(&store), providers, Arc::clone(&activity), Some(data_dir));

    let worker = Worker::new(Arc::clone(&queue), Arc::new(factory), activity, config.worker_config()).spawn();
    let planner = config
        .planner
        .enabled
        .then(|| JobPlanner::new(store, Arc::clone(&queue), config.planner_config()).spawn());

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown requested");

    if let Some(planner) = planner {
        planner.shutdown().await;
    }
    let stats = worker.stats();
    worker.shutdown().await;
    tracing::info!(?stats, "worker stopped");

    Ok(())
}

async fn open_store(config: &QuillConfig) -> anyhow::Result<Arc<dyn BrandStore>> {
    match config.storage.brands {
        BrandBackend::File => {
            let store: Arc<dyn BrandStore> = Arc::new(FileBrandStore::new(&config.storage.data_dir));
            Ok(store)
        }
        #[cfg(feature = "postgres")]
        BrandBackend::Postgres => {
            let url = config
                .storage
                .database_url
                .as_deref()
                .context("storage.database_url is not set")?;
            let store = quill_memory::PostgresBrandStore::connect(url)
                .await
                .context("failed to connect to the brand database")?;
            let store: Arc<dyn BrandStore> = Arc::new(store);
            Ok(store)
        }
        #[cfg(not(feature = "postgres"))]
        BrandBackend::Postgres => anyhow::bail!("built without the `postgres` feature"),
    }
}

async fn open_queue(config: &QuillConfig) -> anyhow::Result<Arc<dyn JobQueue>> {
    match config.storage.queue {
        QueueBackend::Memory => {
            tracing::warn!("using the in-memory queue; jobs are lost on restart");
            let queue: Arc<dyn JobQueue> = InMemoryJobQueue::arc(config.queue_settings());
            Ok(queue)
        }
        #[cfg(feature = "postgres")]
        QueueBackend::Postgres => {
            let url = config
                .storage
                .database_url
                .as_deref()
                .context("storage.database_url is not set")?;
            let queue = quill_scheduler::PostgresJobQueue::connect(url, config.queue_settings())
                .await
                .context("failed to connect to the job database")?;
            let queue: Arc<dyn JobQueue> = Arc::new(queue);
            Ok(queue)
        }
        #[cfg(not(feature = "postgres"))]
        QueueBackend::Postgres => anyhow::bail!("built without the `postgres` feature"),
    }
}
