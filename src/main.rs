use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use agent_orchestrator::cache::{Cache, RedisCache};
use agent_orchestrator::capability::CapabilityRegistry;
use agent_orchestrator::config::OrchestratorConfig;
use agent_orchestrator::notify::{StaticDirectory, TelegramNotifier};
use agent_orchestrator::ops::ops_routes;
use agent_orchestrator::queue::{JobQueue, NullQueue, QueueName, RedisQueue};
use agent_orchestrator::worker::{
    AlertHandler, HttpAgentController, LifecycleHandler, WebhookHandler, WorkerPool,
};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Stdout logging, plus daily-rotated files when a log directory is set.
/// The returned guard must live until exit so buffered lines are flushed.
fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "agent-orchestrator.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(env_filter())
                .with(tracing_subscriber::fmt::layer())
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(env_filter()).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OrchestratorConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });
    let _log_guard = init_logging(config.log_dir.as_deref());

    eprintln!("Agent Orchestrator v{}", env!("CARGO_PKG_VERSION"));

    // ── Capabilities ─────────────────────────────────────────────────────
    let registry = Arc::new(
        CapabilityRegistry::builtin().context("built-in capability table is invalid")?,
    );
    eprintln!("   Tools: {} registered", registry.count());

    // ── Backing store ────────────────────────────────────────────────────
    let (queue, cache): (Arc<dyn JobQueue>, Cache) = match &config.redis_url {
        Some(url) => match RedisQueue::new(url, &config.key_prefix, config.policies()) {
            Ok(redis_queue) => {
                let redis_queue = Arc::new(redis_queue);
                if !redis_queue.probe().await {
                    tracing::warn!(
                        "Redis unreachable at startup, retrying every {:?}; jobs are dropped until it connects",
                        config.probe_interval
                    );
                }
                let _probe = Arc::clone(&redis_queue).spawn_health_probe(config.probe_interval);
                let cache = if config.cache_enabled {
                    match RedisCache::connect(url).await {
                        Ok(backend) => Cache::new(Arc::new(backend)),
                        Err(e) => {
                            tracing::warn!(error = %e, "Cache unavailable, continuing without it");
                            Cache::disabled()
                        }
                    }
                } else {
                    Cache::disabled()
                };
                eprintln!("   Queue: redis (prefix {})", config.key_prefix);
                (redis_queue as Arc<dyn JobQueue>, cache)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Invalid Redis URL, jobs will be dropped");
                eprintln!("   Queue: none (invalid AGENT_ORCH_REDIS_URL)");
                (Arc::new(NullQueue) as Arc<dyn JobQueue>, Cache::disabled())
            }
        },
        None => {
            tracing::warn!("AGENT_ORCH_REDIS_URL not set, jobs will be dropped");
            eprintln!("   Queue: none (AGENT_ORCH_REDIS_URL not set)");
            (Arc::new(NullQueue) as Arc<dyn JobQueue>, Cache::disabled())
        }
    };

    // ── Workers ──────────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = Vec::new();

    match &config.runtime_url {
        Some(runtime_url) => {
            let controller = Arc::new(
                HttpAgentController::new(runtime_url.as_str(), config.handler_timeout)
                    .context("failed to build agent runtime client")?,
            );
            let pool = WorkerPool::new(
                Arc::clone(&queue),
                QueueName::Lifecycle,
                Arc::new(LifecycleHandler::new(controller, cache.clone())),
                config.worker_config(QueueName::Lifecycle),
            );
            workers.extend(pool.spawn(shutdown_rx.clone()));
            eprintln!("   Lifecycle: {} workers -> {}", config.lifecycle_concurrency, runtime_url);
        }
        None => eprintln!("   Lifecycle: disabled (AGENT_ORCH_RUNTIME_URL not set)"),
    }

    let webhook_handler =
        WebhookHandler::new(config.webhook_timeout).context("failed to build webhook client")?;
    let pool = WorkerPool::new(
        Arc::clone(&queue),
        QueueName::Webhook,
        Arc::new(webhook_handler),
        config.worker_config(QueueName::Webhook),
    );
    workers.extend(pool.spawn(shutdown_rx.clone()));
    eprintln!("   Webhook: {} workers", config.webhook_concurrency);

    let mut directory = StaticDirectory::new();
    if let Some(telegram) = &config.telegram {
        let bot = TelegramNotifier::new(telegram.bot_token.clone(), String::new());
        for (user_id, chat_id) in &telegram.chats {
            directory = directory
                .with_channel(user_id.as_str(), Arc::new(bot.for_chat(chat_id.as_str())));
        }
    }
    eprintln!(
        "   Alert: {} workers ({} users with channels)",
        config.alert_concurrency,
        directory.user_count()
    );
    let pool = WorkerPool::new(
        Arc::clone(&queue),
        QueueName::Alert,
        Arc::new(AlertHandler::new(Arc::new(directory))),
        config.worker_config(QueueName::Alert),
    );
    workers.extend(pool.spawn(shutdown_rx.clone()));

    // ── Ops API ──────────────────────────────────────────────────────────
    let app = ops_routes(Arc::clone(&queue), Arc::clone(&registry));
    let listener = tokio::net::TcpListener::bind(config.ops_addr())
        .await
        .with_context(|| format!("failed to bind ops API on {}", config.ops_addr()))?;
    eprintln!("   Ops API: http://{}/api/queues\n", config.ops_addr());

    let mut ops_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = ops_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    tracing::info!("Ctrl+C received, shutting down...");
    let _ = shutdown_tx.send(true);

    for worker in workers {
        if let Err(e) = worker.await {
            tracing::warn!(error = %e, "Worker task ended abnormally");
        }
    }
    match server.await {
        Ok(Err(e)) => tracing::warn!(error = %e, "Ops API server error"),
        Err(e) => tracing::warn!(error = %e, "Ops API task ended abnormally"),
        Ok(Ok(())) => {}
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
