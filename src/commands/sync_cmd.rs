//! Commands that drive replay and the live push channel.

use clap::Args;
use std::sync::Arc;

use super::Coordinator;
use nutrisync::config::Config;
use nutrisync::sync::{
    monitor, LiveUpdateChannel, Liveness, MealState, PendingChangeTracker,
};

/// Send changes queued while offline
#[derive(Debug, Args)]
pub struct SyncCommand {}

impl SyncCommand {
    pub async fn run(&self, coordinator: &Coordinator) -> Result<(), Box<dyn std::error::Error>> {
        let liveness = Liveness::new();
        let tracker = PendingChangeTracker::new(coordinator.clone());

        println!("Syncing with server...");
        println!();

        let summary = tracker.replay(&liveness).await?;
        println!("  ✓ {} created", summary.created);
        println!("  ✓ {} updated", summary.updated);
        println!("  ✓ {} deleted", summary.deleted);
        if summary.skipped > 0 {
            println!("  ! {} conflicted (see `nutrisync meal conflicts`)", summary.skipped);
        }
        if summary.failed > 0 {
            println!("  ✗ {} failed", summary.failed);
        }
        if summary.deferred > 0 {
            println!("  … {} still queued (server unreachable)", summary.deferred);
        }

        println!();
        if summary.total() == 0 && summary.deferred == 0 && summary.failed == 0 {
            println!("Already up to date.");
        } else {
            println!("Sync complete.");
        }

        coordinator.refresh(&liveness).await?;
        Ok(())
    }
}

/// Stay connected: apply pushed changes and replay after outages
#[derive(Debug, Args)]
pub struct WatchCommand {}

impl WatchCommand {
    pub async fn run(
        &self,
        coordinator: &Coordinator,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let liveness = Liveness::new();

        // Queued writes go out first; later outages are handled by the tracker.
        let tracker = PendingChangeTracker::new(coordinator.clone());
        tracker.replay(&liveness).await?;

        let health = tokio::spawn(monitor(
            Arc::clone(coordinator.api()),
            coordinator.connectivity().clone(),
            config.health_interval(),
        ));
        let replay = tokio::spawn(tracker.run(liveness.clone()));
        let channel = LiveUpdateChannel::new(
            coordinator.clone(),
            &config.server_url.value,
            config.reconnect_delay(),
        );
        let live = tokio::spawn(channel.run(liveness.clone()));

        println!("Watching {} (Ctrl-C to stop)", config.server_url.value);
        print_state(&coordinator.state());

        let mut state = coordinator.subscribe();
        let mut online = coordinator.connectivity().subscribe();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = state.borrow_and_update().clone();
                    if !snapshot.executing {
                        print_state(&snapshot);
                    }
                }
                changed = online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let is_online = *online.borrow_and_update();
                    println!("{}", if is_online { "Online" } else { "Offline" });
                }
            }
        }

        liveness.cancel();
        health.abort();
        replay.abort();
        live.abort();
        Ok(())
    }
}

fn print_state(state: &MealState) {
    if let Some(error) = &state.action_error {
        println!("Error: {}", error);
        return;
    }
    let action = state
        .action
        .map(|kind| kind.to_string())
        .unwrap_or_else(|| "IDLE".to_string());
    println!("[{}] {} meal(s) loaded", action, state.data.len());
}
