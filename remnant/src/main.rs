// remnant/src/main.rs
use std::process;

use clap::Parser;
use colored::Colorize;
use directories::ProjectDirs;
use remnant_common::error::Result as RemnantResult;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::CliArgs;

#[tokio::main]
async fn main() -> RemnantResult<()> {
    let cli_args = CliArgs::parse();

    let level_filter = match cli_args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let max_log_level = level_filter.into_level().unwrap_or(tracing::Level::INFO);

    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .with_env_var("REMNANT_LOG")
        .from_env_lossy();

    let log_dir = ProjectDirs::from("", "", "remnant")
        .map(|dirs| dirs.data_local_dir().join("logs"))
        .filter(|dir| std::fs::create_dir_all(dir).is_ok());

    match (cli_args.verbose > 0, log_dir) {
        (true, Some(dir)) => {
            let file_appender = tracing_appender::rolling::daily(&dir, "remnant.log");
            let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);
            let stderr_writer = std::io::stderr.with_max_level(max_log_level);
            let file_writer = non_blocking_appender.with_max_level(max_log_level);
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(stderr_writer.and(file_writer))
                .with_ansi(true)
                .without_time()
                .try_init();
            Box::leak(Box::new(guard)); // keep the appender flushing
            debug!(
                "Verbose logging enabled. Writing logs to: {}/remnant.log",
                dir.display()
            );
        }
        _ => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .without_time()
                .try_init();
        }
    }

    if let Err(e) = cli_args.command.run().await {
        error!("Command failed: {:#}", e);
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        process::exit(1);
    }

    debug!("Command completed successfully.");
    Ok(())
}
