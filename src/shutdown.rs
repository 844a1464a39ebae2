use crate::error::{Error, Result};
use crate::signal::SharedSignal;
use log::{error, info};
use nix::sys::signal::{SigSet, Signal};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum State {
    Running,
    /// Flags cleared, final raise issued, threads on their way out.
    Draining,
    /// Both threads joined and shared resources released.
    Stopped,
}

impl State {
    fn from_u8(raw: u8) -> State {
        match raw {
            0 => State::Running,
            1 => State::Draining,
            _ => State::Stopped,
        }
    }
}

/// Running flags shared by the worker threads and the shutdown coordinator.
#[derive(Debug)]
pub struct Context {
    receiver_running: AtomicBool,
    consumer_running: AtomicBool,
    state: AtomicU8,
}

impl Context {
    pub fn new() -> Context {
        Context {
            receiver_running: AtomicBool::new(true),
            consumer_running: AtomicBool::new(true),
            state: AtomicU8::new(State::Running as u8),
        }
    }

    pub fn receiver_running(&self) -> bool {
        self.receiver_running.load(Ordering::SeqCst)
    }

    pub fn consumer_running(&self) -> bool {
        self.consumer_running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::SeqCst))
    }
}

impl Default for Context {
    fn default() -> Context {
        Context::new()
    }
}

/// Drives `Running -> Draining -> Stopped`.
///
/// Cheap to clone and safe to trigger from any thread, any number of times.
/// Holds the shared signal weakly so it never keeps it alive past the
/// threads that actually use it.
#[derive(Clone, Debug)]
pub struct Shutdown {
    context: Arc<Context>,
    signal: Weak<SharedSignal>,
}

impl Shutdown {
    pub fn new(context: Arc<Context>, signal: &Arc<SharedSignal>) -> Shutdown {
        Shutdown {
            context,
            signal: Arc::downgrade(signal),
        }
    }

    /// Clears both running flags, then force-raises the shared signal so a
    /// consumer blocked on it returns without waiting for another message.
    ///
    /// Returns `true` for the call that started draining.
    pub fn trigger(&self) -> bool {
        let first = self.context.state
            .compare_exchange(State::Running as u8, State::Draining as u8,
                              Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();

        self.context.receiver_running.store(false, Ordering::SeqCst);
        self.context.consumer_running.store(false, Ordering::SeqCst);

        if let Some(signal) = self.signal.upgrade() {
            if let Err(err) = signal.raise() {
                error!("failed to wake the printer for shutdown: {}", err);
            }
        }

        first
    }

    /// Records that both threads are joined and resources released.
    pub fn complete(&self) {
        self.context.state.store(State::Stopped as u8, Ordering::SeqCst);
    }

    pub fn state(&self) -> State {
        self.context.state()
    }
}

/// Blocks SIGINT and SIGTERM for the calling thread and every thread it
/// spawns afterwards. Call before starting any worker.
pub fn block_signals() -> Result<SigSet> {
    let mut set = SigSet::empty();
    set.add(Signal::SIGINT);
    set.add(Signal::SIGTERM);
    set.thread_block()?;
    Ok(set)
}

/// Spawns the thread that waits for one of `signals` and then triggers
/// `shutdown`. The signals must already be blocked in the calling thread.
pub fn spawn_listener(signals: SigSet, shutdown: Shutdown) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("signals".to_owned())
        .spawn(move || match signals.wait() {
            Ok(signal) => {
                info!("Received signal: {:?}. Stopping threads...", signal);
                shutdown.trigger();
            }
            Err(err) => error!("waiting for signals failed: {}", err),
        })
        .map_err(|source| Error::Spawn { name: "signals", source })
}
