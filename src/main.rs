mod app;
mod config;
mod consumer;
mod error;
mod mailbox;
mod message;
mod producer;
mod pthread;
mod queue;
mod receiver;
mod shm;
mod shutdown;
mod signal;
mod timer;

#[cfg(test)]
mod testing;

use app::App;
use config::Config;
use error::{Error, Result};
use log::{debug, error, info};
use nix::unistd::getuid;
use std::process::ExitCode;

fn run() -> Result<()> {
    if !getuid().is_root() {
        println!("Run as root.");
        return Err(Error::NotPrivileged);
    }

    // Every thread spawned from here on inherits the mask, leaving the
    // listener as the only place these signals are ever taken.
    let signals = shutdown::block_signals()?;

    println!("Start...");
    let app = App::start(Config::default())?;
    debug!("threads started, {:?}", app.state());

    if let Err(err) = shutdown::spawn_listener(signals, app.shutdown_handle()) {
        app.shutdown_handle().trigger();
        app.wait()?;
        return Err(err);
    }

    let report = app.wait()?;
    info!("{} messages received, {} printed", report.received, report.handled);
    println!("Done...");
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
