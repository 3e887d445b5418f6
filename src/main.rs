use anyhow::Result;
use chronos::*;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;

    let repo = Arc::new(
        metric_repo::SqliteMetricRepo::connect(
            &app_config.database.path,
            app_config.database.max_pool_size,
        )
        .await?,
    );
    repo.init().await?;

    let docker = Arc::new(docker_repo::DockerRepo::connect()?);
    let pipeline = Arc::new(compaction::DataCompactManager::standard(
        app_config.scheduler.prune_exited_after_days,
    ));
    tracing::info!(strategies = ?pipeline.strategies(), "compaction pipeline");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let collector = Arc::new(collector::Collector::new(docker.clone(), repo.clone()));
    let (trigger, poll_rx) = collector::PollTrigger::channel();
    let poll_worker = collector::spawn_poll_worker(collector.clone(), poll_rx, shutdown_rx.clone());

    let mut scheduler = scheduler::Scheduler::new();
    jobs::register_jobs(
        &mut scheduler,
        &app_config.scheduler,
        collector,
        repo.clone(),
        pipeline.clone(),
    )?;
    let scheduler = Arc::new(scheduler);
    let job_handles = scheduler.spawn(shutdown_rx.clone());

    let watcher = event_watcher::EventWatcher::new(
        docker.clone(),
        repo.clone(),
        trigger.clone(),
        app_config.events.backoff(),
    );
    let watcher_handle = tokio::spawn(watcher.run(shutdown_rx));

    let app = routes::app(routes::AppDeps {
        scheduler,
        repo,
        pipeline,
        docker: Some(docker),
        trigger,
        config: app_config.clone(),
    });
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Received shutdown signal");
    let _ = shutdown_tx.send(true);
    let _ = poll_worker.await;
    let _ = watcher_handle.await;
    for handle in job_handles {
        let _ = handle.await;
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
