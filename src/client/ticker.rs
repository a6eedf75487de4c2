//! Periodic phase re-evaluation.
//!
//! The ticker is the only place that samples the wall clock. It reads the
//! locally mirrored start timestamp, never the network, and publishes a fresh
//! [`PhaseView`] once per second and whenever the mirror changes.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    clock::Clock,
    cycle::{derive, CycleConfig, PhaseView},
};

const ENABLE_LOGS: bool = false;

use crate::log_debug;

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Cancellation handle for a running ticker. Dropping it also stops the task.
pub struct TickerHandle {
    cancel_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl TickerHandle {
    pub async fn stop(mut self) -> Result<()> {
        self.cancel_token.cancel();
        match self.handle.take() {
            Some(handle) => handle.await.context("ticker task failed to join"),
            None => Ok(()),
        }
    }
}

impl Drop for TickerHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

pub fn spawn_ticker(
    config: Arc<CycleConfig>,
    clock: Arc<dyn Clock>,
    start_rx: watch::Receiver<Option<i64>>,
    views: watch::Sender<PhaseView>,
) -> TickerHandle {
    let cancel_token = CancellationToken::new();
    let handle = tokio::spawn(tick_loop(
        config,
        clock,
        start_rx,
        views,
        cancel_token.clone(),
    ));

    TickerHandle {
        cancel_token,
        handle: Some(handle),
    }
}

async fn tick_loop(
    config: Arc<CycleConfig>,
    clock: Arc<dyn Clock>,
    mut start_rx: watch::Receiver<Option<i64>>,
    views: watch::Sender<PhaseView>,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = start_rx.changed() => {
                if changed.is_err() {
                    log_debug!("start timestamp source closed; ticker exiting");
                    break;
                }
            }
            _ = cancel_token.cancelled() => {
                log_debug!("ticker cancelled");
                break;
            }
        }

        // A newer push simply replaces the timestamp; each tick starts from scratch.
        let start = *start_rx.borrow_and_update();
        views.send_replace(derive(start, clock.now_ms(), &config));
    }
}
