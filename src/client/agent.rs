use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::{
    clock::{Clock, SystemClock},
    cycle::{CycleConfig, PhaseView},
    protocol::{ClientCommand, ServerEvent},
};

use super::ticker::{spawn_ticker, TickerHandle};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Per-process client of the Sync Server.
///
/// Holds one persistent connection (opened by the first [`SyncAgent::connect`]
/// call, later calls are no-ops), mirrors the server's start timestamp and
/// drives the 1 Hz ticker that turns it into a [`PhaseView`]. Commands are
/// only dispatched; the visible phase changes when the resulting broadcast
/// comes back.
pub struct SyncAgent {
    url: String,
    config: Arc<CycleConfig>,
    clock: Arc<dyn Clock>,
    reconnect_delay: Duration,
    start_tx: watch::Sender<Option<i64>>,
    connected_tx: watch::Sender<bool>,
    views_tx: watch::Sender<PhaseView>,
    commands_tx: mpsc::UnboundedSender<ClientCommand>,
    commands_rx: Mutex<Option<mpsc::UnboundedReceiver<ClientCommand>>>,
    connection: Mutex<Option<JoinHandle<()>>>,
    ticker: Mutex<Option<TickerHandle>>,
    cancel_token: CancellationToken,
}

impl SyncAgent {
    pub fn new(url: impl Into<String>, config: Arc<CycleConfig>) -> Self {
        Self::with_clock(url, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        url: impl Into<String>,
        config: Arc<CycleConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (start_tx, _) = watch::channel(None);
        let (connected_tx, _) = watch::channel(false);
        let (views_tx, _) = watch::channel(PhaseView::not_started(&config));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        Self {
            url: url.into(),
            config,
            clock,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            start_tx,
            connected_tx,
            views_tx,
            commands_tx,
            commands_rx: Mutex::new(Some(commands_rx)),
            connection: Mutex::new(None),
            ticker: Mutex::new(None),
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Opens the persistent connection and starts the ticker. Idempotent.
    pub async fn connect(&self) -> Result<()> {
        let mut connection = self.connection.lock().await;
        if connection.is_some() {
            return Ok(());
        }
        if self.cancel_token.is_cancelled() {
            bail!("sync agent has been shut down");
        }

        let commands_rx = self
            .commands_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("sync agent command channel already consumed"))?;

        let session = SessionLinks {
            start_tx: self.start_tx.clone(),
            connected_tx: self.connected_tx.clone(),
        };

        *connection = Some(tokio::spawn(connection_loop(
            self.url.clone(),
            session,
            commands_rx,
            self.reconnect_delay,
            self.cancel_token.clone(),
        )));

        *self.ticker.lock().await = Some(spawn_ticker(
            self.config.clone(),
            self.clock.clone(),
            self.start_tx.subscribe(),
            self.views_tx.clone(),
        ));

        Ok(())
    }

    /// True once a hello has been received on the current connection.
    pub fn is_connected(&self) -> bool {
        *self.connected_tx.borrow()
    }

    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected_tx.subscribe()
    }

    pub async fn wait_until_connected(&self, timeout: Duration) -> Result<()> {
        let mut connected = self.connected_tx.subscribe();
        tokio::time::timeout(timeout, connected.wait_for(|is_connected| *is_connected))
            .await
            .with_context(|| format!("no hello from {} within {:?}", self.url, timeout))?
            .map_err(|_| anyhow!("sync agent stopped before connecting"))?;
        Ok(())
    }

    pub fn start_timestamp(&self) -> Option<i64> {
        *self.start_tx.borrow()
    }

    /// Receiver that fires on every hello or broadcast applied to the mirror.
    pub fn mirror(&self) -> watch::Receiver<Option<i64>> {
        self.start_tx.subscribe()
    }

    pub fn views(&self) -> watch::Receiver<PhaseView> {
        self.views_tx.subscribe()
    }

    pub fn current_view(&self) -> PhaseView {
        self.views_tx.borrow().clone()
    }

    pub fn start_timer(&self, admin_id: Option<String>) -> Result<()> {
        self.dispatch(ClientCommand::Start { admin_id })
    }

    pub fn stop_timer(&self) -> Result<()> {
        self.dispatch(ClientCommand::Stop)
    }

    fn dispatch(&self, command: ClientCommand) -> Result<()> {
        if !self.is_connected() {
            bail!("not connected to the sync server at {}", self.url);
        }
        self.commands_tx
            .send(command)
            .map_err(|_| anyhow!("sync connection task is not running"))
    }

    /// Closes the connection and stops the ticker, waiting for both.
    pub async fn shutdown(&self) -> Result<()> {
        self.cancel_token.cancel();

        if let Some(handle) = self.connection.lock().await.take() {
            handle
                .await
                .context("sync connection task failed to join")?;
        }
        if let Some(ticker) = self.ticker.lock().await.take() {
            ticker.stop().await?;
        }

        Ok(())
    }
}

impl Drop for SyncAgent {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

struct SessionLinks {
    start_tx: watch::Sender<Option<i64>>,
    connected_tx: watch::Sender<bool>,
}

impl SessionLinks {
    fn apply(&self, event: ServerEvent) {
        // The latest message always wins over whatever was mirrored before.
        self.start_tx.send_replace(event.record().start_timestamp());
        if matches!(event, ServerEvent::State(_)) {
            self.connected_tx.send_replace(true);
        }
    }

    fn mark_disconnected(&self) {
        self.connected_tx.send_if_modified(|connected| {
            let was_connected = *connected;
            *connected = false;
            was_connected
        });
    }
}

async fn connection_loop(
    url: String,
    links: SessionLinks,
    mut commands_rx: mpsc::UnboundedReceiver<ClientCommand>,
    reconnect_delay: Duration,
    cancel_token: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        let connected = tokio::select! {
            result = connect_async(url.as_str()) => result,
            _ = cancel_token.cancelled() => break,
        };

        match connected {
            Ok((socket, _response)) => {
                attempt = 0;
                log_info!("connected to sync server {}", url);
                run_session(socket, &links, &mut commands_rx, &cancel_token).await;
                links.mark_disconnected();
                log_info!("disconnected from sync server {}", url);
            }
            Err(err) => {
                attempt = attempt.saturating_add(1);
                log_warn!("connect to {} failed (attempt {}): {}", url, attempt, err);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {}
            _ = cancel_token.cancelled() => break,
        }
    }

    links.mark_disconnected();
    log_debug!("sync connection loop for {} finished", url);
}

async fn run_session(
    socket: Socket,
    links: &SessionLinks,
    commands_rx: &mut mpsc::UnboundedReceiver<ClientCommand>,
    cancel_token: &CancellationToken,
) {
    // Anything queued against a previous connection is stale by now.
    while let Ok(stale) = commands_rx.try_recv() {
        log_debug!("dropping command queued before reconnect: {:?}", stale);
    }

    let (mut outbound, mut inbound) = socket.split();

    loop {
        tokio::select! {
            message = inbound.next() => match message {
                Some(Ok(Message::Text(text))) => match ServerEvent::from_json(&text) {
                    Ok(event) => {
                        log_debug!("received {}", event.name());
                        links.apply(event);
                    }
                    Err(err) => log_debug!("ignoring unreadable frame: {err:#}"),
                },
                Some(Ok(Message::Close(_))) | None => return,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    log_warn!("sync connection error: {}", err);
                    return;
                }
            },
            command = commands_rx.recv() => {
                let Some(command) = command else { return };
                if let Err(err) = outbound.send(Message::Text(command.to_json())).await {
                    log_warn!("failed to send {:?}: {}", command, err);
                    return;
                }
            }
            _ = cancel_token.cancelled() => {
                let _ = outbound.send(Message::Close(None)).await;
                return;
            }
        }
    }
}
