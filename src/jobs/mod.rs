pub mod diary;
pub mod finalizer;
pub mod live;
pub mod scheduler;
pub mod watchdog;

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::reconciler::MatchReconciler;
use crate::types::{MatchStatus, ScanReport};

pub use diary::DiarySync;
pub use finalizer::PostMatchFinalizer;
pub use live::LiveRefresher;
pub use scheduler::Scheduler;
pub use watchdog::WatchdogScanner;

/// Reconcile `ids` one after another, pausing `delay` between calls.
/// A failed match is counted and logged; the batch always runs to the end.
pub(crate) async fn reconcile_each(
    reconciler: &MatchReconciler,
    ids: &[String],
    delay: Duration,
    tag: &str,
) -> ScanReport {
    let mut report = ScanReport { candidates: ids.len(), ..Default::default() };

    for (i, id) in ids.iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match reconciler.reconcile_match(id).await {
            Ok(o) if o.applied && o.status != Some(MatchStatus::NotStarted) => report.fixed += 1,
            Ok(o) => {
                debug!(match_id = %id, verdict = %o.verdict, "{tag} no change");
                report.skipped += 1;
            }
            Err(e) => {
                warn!(match_id = %id, "{tag} reconcile failed: {e}");
                report.errors += 1;
            }
        }
    }
    report
}

/// Provider health line appended to every scan summary.
pub(crate) fn log_provider_health(reconciler: &MatchReconciler, tag: &str) {
    let provider = reconciler.provider();
    let breaker = provider.breaker();
    match provider.latency().summary() {
        Some(s) => info!(
            breaker = %breaker.state(),
            failures = breaker.consecutive_failures(),
            "{tag} provider latency: n={} p50={}ms p95={}ms p99={}ms max={}ms",
            s.samples, s.p50_ms, s.p95_ms, s.p99_ms, s.max_ms
        ),
        None => info!(breaker = %breaker.state(), "{tag} provider latency: no samples"),
    }
}
