use std::env;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::exit;
use std::thread;

use log::{info, warn};
use simplelog::{CombinedLogger, Config, SharedLogger, WriteLogger};

use popen2::{load_config, LogConfig, Outcome, Popen2Config, SubprocessManager};

/***
Pipe our stdin through a shell command and its stdout back to ours.
Usage: popen2 <command line...>
 ***/
fn run() -> anyhow::Result<Outcome> {
    let config = match env::var_os("POPEN2_CONFIG") {
        Some(path) => load_config(&PathBuf::from(path))?,
        None => Popen2Config::default(),
    };
    init_logging(&config.log)?;

    let command = env::args().skip(1).collect::<Vec<_>>().join(" ");
    if command.trim().is_empty() {
        anyhow::bail!("usage: popen2 <command line...>");
    }

    let manager: SubprocessManager = SubprocessManager::with_config(config.shell.clone());
    let mut child = manager.spawn_bidirectional(&command)?;

    // Feed the child from a separate thread; its stdin handle is dropped
    // (and so closed) once our own stdin hits EOF.
    let pump = child.stdin.take().map(|mut child_stdin| {
        thread::spawn(move || -> io::Result<u64> {
            let copied = io::copy(&mut io::stdin().lock(), &mut child_stdin)?;
            child_stdin.flush()?;
            Ok(copied)
        })
    });

    if let Some(child_stdout) = child.stdout.as_mut() {
        let mut stdout = io::stdout().lock();
        io::copy(child_stdout, &mut stdout)?;
        stdout.flush()?;
    }

    if let Some(pump) = pump {
        match pump.join() {
            Ok(Ok(copied)) => info!("{}: forwarded {} bytes of input", child.pid(), copied),
            Ok(Err(e)) => warn!("{}: input forwarding stopped: {}", child.pid(), e),
            Err(_) => warn!("{}: input thread panicked", child.pid()),
        }
    }

    manager.close_bidirectional(&mut child)?;
    info!("{}", serde_json::to_string(&child.outcome())?);

    Ok(child.outcome())
}

fn init_logging(log_config: &LogConfig) -> anyhow::Result<()> {
    let level = log_config.level_filter()?;
    let logger: Box<dyn SharedLogger> = match &log_config.file {
        Some(path) => WriteLogger::new(level, Config::default(), File::create(path)?),
        None => WriteLogger::new(level, Config::default(), io::stderr()),
    };
    CombinedLogger::init(vec![logger])?;

    Ok(())
}

fn exit_code(outcome: Outcome) -> i32 {
    match outcome {
        Outcome::Exited(code) => code,
        Outcome::Killed(signo) => 128 + signo,
        Outcome::Unknown => 1,
    }
}

fn main() {
    match run() {
        Ok(outcome) => exit(exit_code(outcome)),
        Err(err) => {
            eprintln!("{:?}", err);
            exit(1)
        }
    }
}
