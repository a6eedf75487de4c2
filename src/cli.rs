use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "theloop",
    version = env!("CARGO_PKG_VERSION"),
    about = "Shared focus-cycle timer"
)]
pub struct Args {
    /// Sync Server websocket URL (overrides THE_LOOP_SERVER_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub server: Option<String>,

    /// Directory for local storage and task history (overrides THE_LOOP_DATA_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    #[arg(short, long, global = true, action)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    #[command(about = "Run the Sync Server")]
    Serve {
        /// Listen port (overrides PORT)
        #[arg(long)]
        port: Option<u16>,
    },

    #[command(about = "Follow the shared cycle, falling back to a local timer when offline")]
    Watch {
        #[arg(long, action)]
        local: bool,
    },

    #[command(about = "Print the current phase once")]
    Status {
        #[arg(long, action)]
        json: bool,

        #[arg(long, action)]
        local: bool,
    },

    #[command(about = "Start or restart the cycle (admin only)")]
    Start {
        #[arg(long, value_name = "ID")]
        admin_id: Option<String>,

        #[arg(long, action)]
        local: bool,
    },

    #[command(about = "Stop the cycle (admin only)")]
    Stop {
        #[arg(long, action)]
        local: bool,
    },

    #[command(about = "Unlock admin controls on this machine")]
    Login { password: String },

    #[command(about = "Lock admin controls again")]
    Logout,

    #[command(subcommand, about = "Show or change the current personal task")]
    Task(TaskCommand),

    #[command(subcommand, about = "Inspect completed sessions")]
    History(HistoryCommand),
}

#[derive(Subcommand, Debug, Clone)]
pub enum TaskCommand {
    Show,
    Set {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    Clear,
}

#[derive(Subcommand, Debug, Clone)]
pub enum HistoryCommand {
    List {
        #[arg(long, action)]
        json: bool,
    },
    Delete { id: String },
    Clear,
}
