//! What each CLI subcommand does.

use std::{io::Write, sync::Arc};

use anyhow::{bail, Context, Result};
use serde_json::json;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    auth::AdminSession,
    cli::{Args, Command, HistoryCommand, TaskCommand},
    client::SyncAgent,
    clock::{Clock, SystemClock},
    config::{ClientConfig, ServerConfig},
    cycle::{derive, format_clock, CycleConfig, PhaseView},
    db::Database,
    local::{LocalStorage, LocalTimer},
    server::{self, AppState},
    tasks::{PersonalTasks, PhaseTracker},
    timer::TimerController,
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub async fn dispatch(args: Args) -> Result<()> {
    if let Command::Serve { port } = args.command {
        return serve(port).await;
    }

    let mut client = ClientConfig::from_env()?;
    if let Some(url) = args.server {
        client.server_url = url;
    }
    if let Some(dir) = args.data_dir {
        client.data_dir = dir;
    }
    let ctx = ClientContext::new(client)?;

    match args.command {
        Command::Serve { .. } => Ok(()),
        Command::Watch { local } => ctx.watch(local).await,
        Command::Status { json, local } => ctx.status(json, local).await,
        Command::Start { admin_id, local } => ctx.start(admin_id, local).await,
        Command::Stop { local } => ctx.stop(local).await,
        Command::Login { password } => {
            if ctx.admin().login(&password)? {
                println!("Admin controls unlocked.");
                Ok(())
            } else {
                bail!("incorrect password")
            }
        }
        Command::Logout => {
            ctx.admin().logout()?;
            println!("Admin controls locked.");
            Ok(())
        }
        Command::Task(command) => ctx.task(command).await,
        Command::History(command) => ctx.history(command).await,
    }
}

async fn serve(port: Option<u16>) -> Result<()> {
    let mut config = ServerConfig::from_env()?;
    if let Some(port) = port {
        config.port = port;
    }

    let shutdown = CancellationToken::new();
    let state = AppState::new(config, TimerController::with_system_clock())
        .with_shutdown(shutdown.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log_info!("shutdown requested");
        }
        shutdown.cancel();
    });

    server::serve(state).await
}

struct ClientContext {
    config: ClientConfig,
    cycle: Arc<CycleConfig>,
    storage: Arc<LocalStorage>,
}

impl ClientContext {
    fn new(config: ClientConfig) -> Result<Self> {
        let storage = Arc::new(LocalStorage::open(config.storage_path())?);
        Ok(Self {
            config,
            cycle: Arc::new(CycleConfig::default()),
            storage,
        })
    }

    fn admin(&self) -> AdminSession {
        AdminSession::new(self.storage.clone(), self.config.admin_password.clone())
    }

    fn require_admin(&self) -> Result<()> {
        if !self.admin().is_admin() {
            bail!("admin controls are locked; run `theloop login <password>` first");
        }
        Ok(())
    }

    fn tasks(&self) -> Result<PersonalTasks> {
        Ok(PersonalTasks::new(Database::new(self.config.database_path())?))
    }

    fn local_timer(&self) -> LocalTimer {
        LocalTimer::open(self.storage.clone(), self.cycle.clone())
    }

    /// A connected agent, or the reason none could be had in time.
    async fn agent(&self) -> Result<SyncAgent> {
        let agent = SyncAgent::new(self.config.server_url.clone(), self.cycle.clone())
            .with_reconnect_delay(self.config.reconnect_delay);
        agent.connect().await?;
        if let Err(err) = agent.wait_until_connected(self.config.connect_timeout).await {
            agent.shutdown().await?;
            return Err(err);
        }
        Ok(agent)
    }

    async fn watch(&self, local: bool) -> Result<()> {
        let tasks = self.tasks()?;

        if !local {
            match self.agent().await {
                Ok(agent) => {
                    println!("Following {}", agent.url());
                    let result = follow(agent.views(), || agent.start_timestamp(), &tasks).await;
                    agent.shutdown().await?;
                    return result;
                }
                Err(err) => {
                    log_warn!("{:#}", err);
                    println!("Sync server unreachable, running a local timer instead.");
                }
            }
        }

        let timer = self.local_timer();
        timer.start_ticking().await;
        let result = follow(timer.views(), || timer.start_timestamp(), &tasks).await;
        timer.shutdown().await?;
        result
    }

    async fn status(&self, as_json: bool, local: bool) -> Result<()> {
        let (start, source) = if local {
            (self.local_timer().start_timestamp(), "local")
        } else {
            let agent = self.agent().await?;
            let start = agent.start_timestamp();
            agent.shutdown().await?;
            (start, "server")
        };

        let view = derive(start, SystemClock.now_ms(), &self.cycle);
        if as_json {
            let report = json!({
                "source": source,
                "startTimestamp": start,
                "isRunning": start.is_some(),
                "view": view,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!("{}", describe(&view));
        }
        Ok(())
    }

    async fn start(&self, admin_id: Option<String>, local: bool) -> Result<()> {
        self.require_admin()?;

        if local {
            let started = self.local_timer().start()?;
            println!("Local cycle started at {started}.");
            return Ok(());
        }

        let agent = self.agent().await?;
        let outcome = self
            .dispatch_and_wait(&agent, |agent| agent.start_timer(admin_id))
            .await;
        agent.shutdown().await?;

        match outcome? {
            Some(started) => println!("Cycle started at {started}."),
            None => println!("Server reports the cycle as stopped."),
        }
        Ok(())
    }

    async fn stop(&self, local: bool) -> Result<()> {
        self.require_admin()?;

        if local {
            self.local_timer().stop()?;
            println!("Local cycle stopped.");
            return Ok(());
        }

        let agent = self.agent().await?;
        let outcome = self
            .dispatch_and_wait(&agent, |agent| agent.stop_timer())
            .await;
        agent.shutdown().await?;

        outcome?;
        println!("Cycle stopped.");
        Ok(())
    }

    /// Sends one command and waits for the broadcast it causes.
    async fn dispatch_and_wait(
        &self,
        agent: &SyncAgent,
        send: impl FnOnce(&SyncAgent) -> Result<()>,
    ) -> Result<Option<i64>> {
        let mut mirror = agent.mirror();
        let _ = mirror.borrow_and_update();
        send(agent)?;

        tokio::time::timeout(self.config.connect_timeout, mirror.changed())
            .await
            .context("no broadcast from the sync server after the command")?
            .context("sync connection closed before the broadcast arrived")?;

        let latest = *mirror.borrow_and_update();
        Ok(latest)
    }

    async fn task(&self, command: TaskCommand) -> Result<()> {
        let tasks = self.tasks()?;
        match command {
            TaskCommand::Show => {
                let task = tasks.current_task().await?;
                if task.is_empty() {
                    println!("No current task.");
                } else {
                    println!("{task}");
                }
            }
            TaskCommand::Set { text } => {
                let task = text.join(" ");
                if task.trim().is_empty() {
                    bail!("task text is empty");
                }
                tasks.set_current_task(&task).await?;
            }
            TaskCommand::Clear => tasks.clear_current_task().await?,
        }
        Ok(())
    }

    async fn history(&self, command: HistoryCommand) -> Result<()> {
        let tasks = self.tasks()?;
        match command {
            HistoryCommand::List { json } => {
                let entries = tasks.history().await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&entries)?);
                } else if entries.is_empty() {
                    println!("No completed sessions.");
                } else {
                    for entry in entries {
                        println!(
                            "{}  {}  {:<11}  {}  {}",
                            entry.id,
                            entry.date.format("%Y-%m-%d %H:%M"),
                            entry.phase.as_str(),
                            format_clock(entry.duration),
                            entry.task
                        );
                    }
                }
            }
            HistoryCommand::Delete { id } => {
                if !tasks.delete_session(&id).await? {
                    bail!("no session with id {id}");
                }
            }
            HistoryCommand::Clear => tasks.clear_history().await?,
        }
        Ok(())
    }
}

/// Renders views until Ctrl-C, filing the current task whenever a phase ends.
async fn follow(
    mut views: watch::Receiver<PhaseView>,
    start: impl Fn() -> Option<i64>,
    tasks: &PersonalTasks,
) -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let initial = views.borrow_and_update().clone();
    render(&initial)?;
    let mut tracker = PhaseTracker::new(start(), initial);

    loop {
        tokio::select! {
            changed = views.changed() => {
                changed.context("timer stopped producing updates")?;
                let view = views.borrow_and_update().clone();

                render(&view)?;
                if let Some((phase, duration_secs)) = tracker.observe(start(), view) {
                    if let Some(entry) = tasks.complete_session(phase, duration_secs).await? {
                        println!("\nFinished \"{}\" ({})", entry.task, phase.as_str());
                    }
                }
            }
            result = &mut ctrl_c => {
                result.context("failed to listen for Ctrl-C")?;
                println!();
                return Ok(());
            }
        }
    }
}

fn describe(view: &PhaseView) -> String {
    if !view.is_running {
        return view.phase_label.clone();
    }
    format!(
        "{}  {}  {:>3.0}%",
        view.phase_label,
        format_clock(view.remaining_seconds),
        view.progress_percent
    )
}

fn render(view: &PhaseView) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    write!(stdout, "\r{:<40}", describe(view))?;
    stdout.flush()?;
    Ok(())
}
