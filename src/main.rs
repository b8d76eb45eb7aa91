//! Metronome daemon - standalone scheduler harness.
//!
//! Runs a scheduler built from a properties file (or defaults). With the
//! `console` argument, commands are read from standard input and `exit`
//! shuts the scheduler down cleanly.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use clap::Parser;

use metronome::config::SchedulerConfig;
use metronome::scheduler::{Scheduler, SchedulerFactory};
use metronome::telemetry::{self, LoggingConfig};

#[derive(Debug, Parser)]
#[command(name = "metronomed", version, about = "In-process job scheduler daemon")]
struct Args {
    /// Properties file with `metronome.*` options
    #[arg(short, long, env = "METRONOME_CONFIG")]
    config: Option<PathBuf>,

    /// Optional mode; `console` reads commands from standard input
    command: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init_logging(&LoggingConfig::default())?;

    let config = match &args.config {
        Some(path) => SchedulerConfig::from_properties_file(path)?,
        None => SchedulerConfig::default(),
    };

    let scheduler = SchedulerFactory::new(config).build()?;
    scheduler.start()?;
    tracing::info!(
        scheduler = scheduler.instance_name(),
        version = env!("CARGO_PKG_VERSION"),
        "metronomed running"
    );

    match args.command.as_deref() {
        Some("console") => {
            console_loop(&scheduler)?;
            scheduler.shutdown(true);
            Ok(())
        }
        Some(other) => {
            scheduler.shutdown(false);
            anyhow::bail!("unknown command '{}'", other)
        }
        None => {
            // Run until killed
            loop {
                std::thread::park();
            }
        }
    }
}

fn console_loop(scheduler: &Scheduler) -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    println!("metronome console - 'help' lists commands");
    loop {
        print!("> ");
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // stdin closed
        }
        match line.trim() {
            "" => {}
            "exit" => break,
            "status" => {
                let meta = scheduler.metadata();
                println!(
                    "{} [{}]: started={} standby={} executed={} workers={}",
                    meta.instance_name,
                    meta.instance_id,
                    meta.started,
                    meta.in_standby,
                    meta.jobs_executed,
                    meta.thread_pool_size
                );
            }
            "standby" => {
                scheduler.standby()?;
                println!("scheduler in standby");
            }
            "start" => {
                scheduler.start()?;
                println!("scheduler started");
            }
            "jobs" => {
                for group in scheduler.get_job_group_names() {
                    for key in scheduler.get_job_keys(&group) {
                        println!("{}", key);
                    }
                }
            }
            "help" => {
                println!("commands: status, standby, start, jobs, help, exit");
            }
            other => {
                println!("unknown command '{}' - try 'help'", other);
            }
        }
    }
    Ok(())
}
