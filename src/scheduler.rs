//! Interval-driven background triggers.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::AppState;

/// Spawn the periodic similarity pass and cache eviction tasks. A zero
/// interval disables that task.
pub fn spawn(state: &Arc<AppState>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    let similarity_secs = state.config.similarity.interval_secs;
    if similarity_secs > 0 {
        handles.push(spawn_similarity_task(
            Arc::clone(state),
            Duration::from_secs(similarity_secs),
        ));
    } else {
        info!("Scheduled similarity passes disabled");
    }

    let evict_secs = state.config.cache.evict_interval_secs;
    if evict_secs > 0 {
        handles.push(spawn_eviction_task(
            Arc::clone(state),
            Duration::from_secs(evict_secs),
        ));
    } else {
        info!("Scheduled cache eviction disabled");
    }

    handles
}

fn spawn_similarity_task(state: Arc<AppState>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = period.as_secs(), "Starting similarity scheduler");
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if !state.service.run_if_free() {
                info!("Similarity pass still running, skipping scheduled trigger");
            }
        }
    })
}

fn spawn_eviction_task(state: Arc<AppState>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = period.as_secs(), "Starting cache eviction scheduler");
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if let Err(e) = state.cache.evict_expired().await {
                error!(error = %e, "Cache eviction failed");
            }
        }
    })
}
