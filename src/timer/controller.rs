use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use crate::{
    clock::{Clock, SystemClock},
    protocol::ServerEvent,
};

use super::TimerRecord;

const ENABLE_LOGS: bool = true;

use crate::log_info;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Owner of the authoritative [`TimerRecord`].
///
/// Start and stop mutate the record and publish the resulting event while
/// holding the same lock, so no observer can see the new record without the
/// matching broadcast having been sent, and [`TimerController::subscribe`]
/// never misses or duplicates a change relative to its hello snapshot.
#[derive(Clone)]
pub struct TimerController {
    record: Arc<Mutex<TimerRecord>>,
    events: broadcast::Sender<ServerEvent>,
    clock: Arc<dyn Clock>,
}

impl TimerController {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            record: Arc::new(Mutex::new(TimerRecord::new())),
            events,
            clock,
        }
    }

    pub fn with_system_clock() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    pub async fn current(&self) -> TimerRecord {
        self.record.lock().await.clone()
    }

    /// Starts a cycle now. Restarting a running cycle discards its progress.
    pub async fn start(&self, actor: String) -> TimerRecord {
        let mut guard = self.record.lock().await;
        let started_at = self.clock.now_ms();
        log_info!("timer started at {} by {}", started_at, actor);
        guard.begin(started_at, actor);
        let snapshot = guard.clone();
        self.emit(ServerEvent::Started(snapshot.clone()));
        snapshot
    }

    pub async fn stop(&self) -> TimerRecord {
        let mut guard = self.record.lock().await;
        if let Some(started_at) = guard.start_timestamp() {
            log_info!("timer stopped (was started at {})", started_at);
        }
        guard.clear();
        let snapshot = guard.clone();
        self.emit(ServerEvent::Stopped(snapshot.clone()));
        snapshot
    }

    /// Snapshot for a hello message plus a receiver for every change after it.
    pub async fn subscribe(&self) -> (TimerRecord, broadcast::Receiver<ServerEvent>) {
        let guard = self.record.lock().await;
        let receiver = self.events.subscribe();
        (guard.clone(), receiver)
    }

    pub fn observer_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn emit(&self, event: ServerEvent) {
        // An error only means nobody is listening; the cycle runs regardless.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn controller_at(now: i64) -> (TimerController, ManualClock) {
        let clock = ManualClock::new(now);
        (TimerController::new(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn starts_idle() {
        let (controller, _) = controller_at(0);
        let record = controller.current().await;
        assert!(!record.is_running());
        assert_eq!(record.start_timestamp(), None);
    }

    #[tokio::test]
    async fn start_records_clock_and_actor() {
        let (controller, _) = controller_at(1_000);
        let record = controller.start("ada".into()).await;
        assert_eq!(record.start_timestamp(), Some(1_000));
        assert_eq!(record.started_by(), Some("ada"));
        assert_eq!(controller.current().await, record);
    }

    #[tokio::test]
    async fn restart_discards_previous_elapsed_time() {
        let (controller, clock) = controller_at(1_000);
        controller.start("ada".into()).await;
        clock.advance(600_000);
        let record = controller.start("bob".into()).await;
        assert_eq!(record.start_timestamp(), Some(601_000));
        assert_eq!(record.started_by(), Some("bob"));
    }

    #[tokio::test]
    async fn stop_clears_everything() {
        let (controller, _) = controller_at(5);
        controller.start("ada".into()).await;
        let record = controller.stop().await;
        assert_eq!(record, TimerRecord::new());
        // Stopping an idle timer is still a state change broadcast.
        assert_eq!(controller.stop().await, TimerRecord::new());
    }

    #[tokio::test]
    async fn every_subscriber_gets_every_change() {
        let (controller, _) = controller_at(7);
        let (hello_a, mut a) = controller.subscribe().await;
        let (hello_b, mut b) = controller.subscribe().await;
        assert_eq!(hello_a, TimerRecord::new());
        assert_eq!(hello_b, TimerRecord::new());
        assert_eq!(controller.observer_count(), 2);

        let started = controller.start("ada".into()).await;
        controller.stop().await;

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await.unwrap(), ServerEvent::Started(started.clone()));
            assert_eq!(rx.recv().await.unwrap(), ServerEvent::Stopped(TimerRecord::new()));
        }
    }

    #[tokio::test]
    async fn late_subscriber_hello_reflects_running_cycle() {
        let (controller, clock) = controller_at(100);
        let started = controller.start("ada".into()).await;
        clock.advance(10_000);
        let (hello, mut rx) = controller.subscribe().await;
        assert_eq!(hello, started);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn record_stays_consistent_under_concurrent_commands() {
        let (controller, clock) = controller_at(0);
        let (_, mut rx) = controller.subscribe().await;

        let mut tasks = Vec::new();
        for i in 0..20 {
            let controller = controller.clone();
            let clock = clock.clone();
            tasks.push(tokio::spawn(async move {
                clock.advance(1);
                if i % 3 == 0 {
                    controller.stop().await;
                } else {
                    controller.start(format!("actor-{i}")).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            let record = event.record();
            assert_eq!(record.is_running(), record.start_timestamp().is_some());
            match &event {
                ServerEvent::Started(r) => assert!(r.is_running()),
                ServerEvent::Stopped(r) => assert!(!r.is_running()),
                ServerEvent::State(_) => unreachable!("hello is never broadcast"),
            }
            last = Some(record.clone());
        }
        assert_eq!(last, Some(controller.current().await));
    }

    #[tokio::test]
    async fn runs_without_observers() {
        let (controller, _) = controller_at(3);
        assert_eq!(controller.observer_count(), 0);
        let record = controller.start("ada".into()).await;
        assert!(record.is_running());
    }
}
