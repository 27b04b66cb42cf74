mod config;
mod db;
mod error;
mod jobs;
mod provider;
mod reconciler;
mod types;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, CHANNEL_CAPACITY};
use crate::db::MatchRepository;
use crate::error::Result;
use crate::jobs::{DiarySync, LiveRefresher, PostMatchFinalizer, Scheduler, WatchdogScanner};
use crate::provider::{CircuitBreaker, ProviderClient, RateLimiter};
use crate::reconciler::MatchReconciler;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);
    let repo = MatchRepository::new(pool);

    // --- Provider: one breaker and one limiter for the whole process ---
    let breaker = Arc::new(CircuitBreaker::new(&cfg.provider.breaker));
    let limiter = Arc::new(RateLimiter::new(cfg.provider.rate_limit.clone()));
    let provider = Arc::new(ProviderClient::new(&cfg.provider, breaker, limiter)?);
    info!(
        base_url = %cfg.provider.base_url,
        failure_threshold = cfg.provider.breaker.failure_threshold,
        cooldown_secs = cfg.provider.breaker.cooldown.as_secs(),
        "Provider client ready"
    );

    // --- Reconciler → finalizer channel ---
    let (ended_tx, ended_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
    let reconciler = MatchReconciler::new(Arc::clone(&provider), repo.clone(), cfg.dedupe_window_secs)
        .with_ended_notifier(ended_tx);

    let finalizer = Arc::new(PostMatchFinalizer::new(
        Arc::clone(&provider),
        repo.clone(),
        cfg.finalizer.clone(),
    ));
    let consumer = Arc::clone(&finalizer);
    tokio::spawn(async move { consumer.consume_ended(ended_rx).await });

    // --- Periodic jobs ---
    let mut scheduler = Scheduler::new();

    let diary = Arc::new(DiarySync::new(Arc::clone(&provider), repo.clone()));
    scheduler.register("diary", cfg.diary_interval, move || {
        let diary = Arc::clone(&diary);
        async move {
            if let Err(e) = diary.sync_once().await {
                error!("[DIARY] {e}");
            }
        }
        .boxed()
    });

    let watchdog = Arc::new(WatchdogScanner::new(
        reconciler.clone(),
        repo.clone(),
        cfg.watchdog.clone(),
    ));
    scheduler.register("watchdog", cfg.watchdog.interval, move || {
        let watchdog = Arc::clone(&watchdog);
        async move {
            if let Err(e) = watchdog.scan_once().await {
                error!("[WATCHDOG] scan failed: {e}");
            }
        }
        .boxed()
    });

    let live = Arc::new(LiveRefresher::new(reconciler, repo.clone(), cfg.watchdog.call_delay));
    scheduler.register("live", cfg.watchdog.live_interval, move || {
        let live = Arc::clone(&live);
        async move {
            if let Err(e) = live.refresh_once().await {
                error!("[LIVE] refresh failed: {e}");
            }
        }
        .boxed()
    });

    scheduler.register("finalizer", cfg.finalizer.interval, move || {
        let finalizer = Arc::clone(&finalizer);
        async move {
            if let Err(e) = finalizer.finalize_recent().await {
                error!("[FINALIZER] batch failed: {e}");
            }
        }
        .boxed()
    });

    info!("match-sync running, Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
    }

    info!("Shutting down, waiting for running jobs");
    scheduler.shutdown().await;
    Ok(())
}
