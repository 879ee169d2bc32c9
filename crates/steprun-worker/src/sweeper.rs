// Periodic cleanup of expired agent operations

use std::time::Duration;

use steprun_core::AgentRuntimeCoordinator;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Shortest interval the sweeper ticks at
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Run one cleanup pass; failures are logged and reported as zero removals
pub async fn sweep_once(coordinator: &AgentRuntimeCoordinator) -> usize {
    match coordinator.cleanup_expired_operations().await {
        Ok(removed) => {
            if !removed.is_empty() {
                info!(count = removed.len(), "Swept expired operations");
            }
            removed.len()
        }
        Err(e) => {
            warn!(error = %e, "Expiry sweep failed");
            0
        }
    }
}

/// Sweep every `interval` until `shutdown_rx` flips to true or its sender drops.
/// Intervals below [`MIN_SWEEP_INTERVAL`] are raised to it. Returns the number
/// of operations removed.
pub async fn run_sweeper(
    coordinator: &AgentRuntimeCoordinator,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> usize {
    let interval = interval.max(MIN_SWEEP_INTERVAL);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut total = 0;

    debug!(interval_secs = interval.as_secs(), "Expiry sweeper started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {
                total += sweep_once(coordinator).await;
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    debug!(total, "Expiry sweeper stopped");
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use steprun_core::{
        AgentState, CreateOperationParams, EventBus, InMemoryEventBus, InMemoryStateStore,
        StateStoreLimits,
    };

    fn coordinator(threshold: Duration) -> (AgentRuntimeCoordinator, Arc<InMemoryEventBus>) {
        let store = Arc::new(InMemoryStateStore::with_limits(StateStoreLimits {
            inactivity_threshold: threshold,
            ..StateStoreLimits::in_process()
        }));
        let bus = Arc::new(InMemoryEventBus::new());
        (AgentRuntimeCoordinator::new(store, bus.clone()), bus)
    }

    async fn create(coordinator: &AgentRuntimeCoordinator, operation_id: &str) {
        coordinator
            .create_agent_operation(
                &AgentState::new(operation_id, "agent-1"),
                CreateOperationParams::default(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweep_once_removes_inactive_operations() {
        let (coordinator, bus) = coordinator(Duration::ZERO);
        create(&coordinator, "op-1").await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(sweep_once(&coordinator).await, 1);
        assert!(coordinator.load_agent_state("op-1").await.unwrap().is_none());
        assert!(bus.get_stream_history("op-1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_once_keeps_active_operations() {
        let (coordinator, _bus) = coordinator(Duration::from_secs(3600));
        create(&coordinator, "op-1").await;

        assert_eq!(sweep_once(&coordinator).await, 0);
        assert!(coordinator.load_agent_state("op-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let (coordinator, _bus) = coordinator(Duration::ZERO);
        create(&coordinator, "op-1").await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stopper = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown_tx.send(true).unwrap();
        };
        let (removed, ()) = tokio::join!(
            run_sweeper(&coordinator, Duration::from_millis(10), shutdown_rx),
            stopper
        );
        assert_eq!(removed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_ticks_at_minimum() {
        let (coordinator, _bus) = coordinator(Duration::from_secs(3600));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stopper = async {
            tokio::time::sleep(MIN_SWEEP_INTERVAL * 3).await;
            shutdown_tx.send(true).unwrap();
        };
        let (removed, ()) = tokio::join!(
            run_sweeper(&coordinator, Duration::ZERO, shutdown_rx),
            stopper
        );
        assert_eq!(removed, 0);
    }
}
