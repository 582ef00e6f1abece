use std::process::ExitCode;

use clap::Parser;
use log::error;

use reposync::{
    cli::{
        args::{CliArgs, Command},
        command_handlers::{do_init, do_plan, do_sync},
    },
    Reposync,
};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<bool> {
    let cli_args: CliArgs = CliArgs::parse();

    let mut builder = Reposync::builder();
    if let Some(config) = cli_args.config {
        builder = builder.config_path(config);
    }
    if let Some(lock_file) = cli_args.lock_file {
        builder = builder.lock_file(lock_file);
    }

    match cli_args.cmd {
        Command::Sync {
            jobs,
            timeout,
            recovery,
        } => {
            if let Some(jobs) = jobs {
                builder = builder.jobs(jobs);
            }
            if let Some(timeout) = timeout {
                builder = builder.timeout_secs(timeout);
            }
            if let Some(recovery) = recovery {
                builder = builder.recovery(recovery);
            }
            do_sync(&builder.try_build()?)
        }
        Command::Plan => do_plan(&builder.try_build()?),
        Command::Init { directory } => do_init(&directory),
    }
}
