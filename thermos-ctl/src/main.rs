//! Thermos controller CLI - launch, inspect and kill task runners

mod cli;
mod commands;
mod logging;
mod runner;

use clap::Parser;
use cli::{Cli, Commands};
use commands::{check_environment, force_kill, show_state};
use console::style;
use runner::{RunConfig, run_task};

fn fail(e: Box<dyn std::error::Error>) -> ! {
    eprintln!("{} {}", style("error:").red().bold(), e);
    std::process::exit(1);
}

fn main() {
    let cli = Cli::parse();

    logging::init_logger(cli.verbose);

    match cli.command {
        Commands::Run {
            task,
            task_id,
            role,
            ports,
            deployment,
            workdir,
            runner,
            checkpoint_root,
            log_dir,
            privilege,
            kill_after,
            grace,
        } => {
            let config = RunConfig {
                task,
                task_id,
                role,
                ports,
                deployment,
                workdir,
                runner,
                checkpoint_root,
                log_dir,
                privilege: privilege.into(),
                kill_after,
                grace,
            };
            if let Err(e) = run_task(config) {
                fail(e);
            }
        }
        Commands::State {
            task_id,
            checkpoint_root,
        } => {
            if let Err(e) = show_state(&task_id, &checkpoint_root) {
                fail(e);
            }
        }
        Commands::Quitquitquit {
            task_id,
            checkpoint_root,
        } => force_kill(&task_id, &checkpoint_root),
        Commands::Check => check_environment(),
    }
}
