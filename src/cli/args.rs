use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Overrides;

#[derive(Parser, Debug)]
#[command(name = "meetrec")]
#[command(about = "Records a meeting room only while participants are present", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (default: <config dir>/meetrec/config.toml)
    #[arg(short, long, global = true, env = "MEETREC_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Join a meeting and record it (default)
    Run(RunCliArgs),
    /// Validate the configuration and the external tools
    Check(RunCliArgs),
    /// List recorded sessions from the ledger
    Sessions(SessionsCliArgs),
    /// Print version information
    Version,
}

#[derive(ClapArgs, Debug, Default, Clone)]
pub struct RunCliArgs {
    /// Meeting URL (falls back to the URL environment variable)
    #[arg(long, env = "MEETING_URL")]
    pub url: Option<String>,
    /// Display name of the bot in the meeting
    #[arg(long, env = "BOT_NAME")]
    pub bot_name: Option<String>,
    /// Print the final session report as JSON
    #[arg(long)]
    pub json: bool,
}

impl RunCliArgs {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            url: self
                .url
                .clone()
                .or_else(|| env_value("MEETING_URL"))
                .or_else(|| env_value("URL")),
            bot_name: self.bot_name.clone().or_else(|| env_value("BOT_NAME")),
        }
    }
}

/// Bare `meetrec` has no parsed run arguments, so the variables clap would
/// have read are consulted here too.
fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[derive(ClapArgs, Debug)]
pub struct SessionsCliArgs {
    /// Show one session with its segments
    #[arg(long)]
    pub id: Option<String>,
    /// Maximum number of sessions to show
    #[arg(short, long, default_value = "20")]
    pub limit: usize,
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
