pub mod args;
pub mod check;
pub mod run;
pub mod sessions;

pub use args::{Cli, CliCommand, RunCliArgs, SessionsCliArgs};
pub use check::handle_check_command;
pub use run::handle_run_command;
pub use sessions::handle_sessions_command;
