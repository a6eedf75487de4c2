use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{watch, Mutex};

use crate::{
    client::{spawn_ticker, TickerHandle},
    clock::{Clock, SystemClock},
    cycle::{CycleConfig, PhaseView},
};

use super::LocalStorage;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub const START_KEY: &str = "pomodoroStartTime";

/// Single-user timer used when no Sync Server is reachable.
///
/// The start timestamp is self-issued and kept in [`LocalStorage`], so a
/// restart resumes the same cycle. Phase derivation goes through the same
/// ticker and calculator as the networked agent.
pub struct LocalTimer {
    storage: Arc<LocalStorage>,
    config: Arc<CycleConfig>,
    clock: Arc<dyn Clock>,
    start_tx: watch::Sender<Option<i64>>,
    views_tx: watch::Sender<PhaseView>,
    ticker: Mutex<Option<TickerHandle>>,
}

impl LocalTimer {
    pub fn open(storage: Arc<LocalStorage>, config: Arc<CycleConfig>) -> Self {
        Self::with_clock(storage, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        storage: Arc<LocalStorage>,
        config: Arc<CycleConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let restored = restore_start(&storage);
        if let Some(start) = restored {
            log_info!("resuming local cycle started at {}", start);
        }

        let (start_tx, _) = watch::channel(restored);
        let (views_tx, _) = watch::channel(PhaseView::not_started(&config));

        Self {
            storage,
            config,
            clock,
            start_tx,
            views_tx,
            ticker: Mutex::new(None),
        }
    }

    pub fn start_timestamp(&self) -> Option<i64> {
        *self.start_tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.start_timestamp().is_some()
    }

    /// Starts (or restarts) the local cycle now and persists it.
    pub fn start(&self) -> Result<i64> {
        let now = self.clock.now_ms();
        self.storage.set(START_KEY, now.to_string())?;
        self.start_tx.send_replace(Some(now));
        Ok(now)
    }

    pub fn stop(&self) -> Result<()> {
        self.storage.remove(START_KEY)?;
        self.start_tx.send_replace(None);
        Ok(())
    }

    pub fn views(&self) -> watch::Receiver<PhaseView> {
        self.views_tx.subscribe()
    }

    pub fn current_view(&self) -> PhaseView {
        self.views_tx.borrow().clone()
    }

    /// Starts the 1 Hz ticker. Idempotent.
    pub async fn start_ticking(&self) {
        let mut ticker = self.ticker.lock().await;
        if ticker.is_none() {
            *ticker = Some(spawn_ticker(
                self.config.clone(),
                self.clock.clone(),
                self.start_tx.subscribe(),
                self.views_tx.clone(),
            ));
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        if let Some(ticker) = self.ticker.lock().await.take() {
            ticker.stop().await?;
        }
        Ok(())
    }
}

// No staleness check: however old the timestamp, the calculator reduces it
// modulo the block.
fn restore_start(storage: &LocalStorage) -> Option<i64> {
    let raw = storage.get(START_KEY)?;
    match raw.trim().parse::<i64>() {
        Ok(start) => Some(start),
        Err(_) => {
            log_warn!("ignoring unreadable stored start time {:?}", raw);
            None
        }
    }
}
