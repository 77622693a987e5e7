use scorekeeper_sync::prelude::*;
use scorekeeper_sync::version::version;

#[cfg(target_arch = "wasm32")]
fn main() -> ScorekeeperResult<()> {
    Err(ScorekeeperError::from("no main for wasm builds"))
}

#[cfg(not(target_arch = "wasm32"))]
#[tokio::main(flavor = "current_thread")]
async fn main() -> ScorekeeperResult<()> {
    use tracing::Level;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, Layer};

    let (non_blocking_writer, _guard) = tracing_appender::non_blocking(std::io::stderr());
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::DEBUG.into())
        .from_env_lossy();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry().with(stderr_layer).init();
    tracing::debug!("running scorekeeper-sync {}", version());

    // Everything in the library is single threaded and spawns onto the current thread
    let local = tokio::task::LocalSet::new();
    local.run_until(run()).await
}

#[cfg(not(target_arch = "wasm32"))]
async fn run() -> ScorekeeperResult<()> {
    let queue = OfflineQueue::new(LazyQueueStore::new(default_openers()));
    let backend = queue.store().active_backend().await;

    let pending = queue.list_offline_queue().await?;
    tracing::info!(%backend, pending = pending.len(), "offline queue loaded");

    for item in &pending {
        tracing::info!(
            item_id = item.id(),
            kind = item.kind().name(),
            match_id = item.match_id(),
            attempts = item.attempts(),
            "pending write"
        );
    }

    #[cfg(feature = "remote-api")]
    {
        let (Ok(base_url), Ok(api_key)) = (
            std::env::var("SCOREKEEPER_API_URL"),
            std::env::var("SCOREKEEPER_API_KEY"),
        ) else {
            tracing::info!("SCOREKEEPER_API_URL or SCOREKEEPER_API_KEY not set, not draining");
            return Ok(());
        };

        let client = ApiClient::new(&base_url, &api_key)?;
        let drainer = QueueDrainer::new(queue, client, AlwaysOnline);

        let report = drainer.drain().await;
        tracing::info!(
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            "drain complete"
        );
    }

    Ok(())
}
