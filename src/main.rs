use anyhow::Result;
use clap::Parser;
use meetrec::{
    cli::{handle_check_command, handle_run_command, handle_sessions_command, Cli, CliCommand, RunCliArgs},
    config::Config,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config_path = cli.config.as_deref();

    let run_args = match cli.command {
        Some(CliCommand::Version) => {
            println!("meetrec {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(CliCommand::Check(args)) => {
            let mut config = Config::load(config_path)?;
            config.apply_overrides(args.overrides());
            return handle_check_command(&config).await;
        }
        Some(CliCommand::Sessions(args)) => {
            let config = Config::load(config_path)?;
            return handle_sessions_command(args, &config);
        }
        Some(CliCommand::Run(args)) => args,
        None => RunCliArgs::default(),
    };

    let config = Config::load(config_path)?;
    if !handle_run_command(run_args, config).await? {
        std::process::exit(1);
    }

    Ok(())
}
