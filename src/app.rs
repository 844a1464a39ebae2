use crate::config::Config;
use crate::consumer::{self, Consumer};
use crate::error::{Error, Result};
use crate::producer::Producer;
use crate::receiver::Receiver;
use crate::shutdown::{Context, Shutdown, State};
use crate::signal::SharedSignal;
use crate::timer::Timer;
use log::{debug, warn};
use std::sync::Arc;
use std::thread::JoinHandle;

/// What the worker threads did before they exited.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Report {
    pub received: usize,
    pub handled: usize,
}

/// The running system: server and printer threads plus the producing timer.
pub struct App {
    context: Arc<Context>,
    signal: Arc<SharedSignal>,
    shutdown: Shutdown,
    receiver: JoinHandle<usize>,
    consumer: JoinHandle<usize>,
    timer: Timer,
}

impl App {
    pub fn start(config: Config) -> Result<App> {
        App::start_with(config, consumer::print_hello)
    }

    /// Like `start`, with `work` run by the printer for every wakeup.
    pub fn start_with<F>(config: Config, work: F) -> Result<App>
        where F: FnMut() + Send + 'static
    {
        config.validate()?;

        let context = Arc::new(Context::new());
        let signal = Arc::new(SharedSignal::new());
        let shutdown = Shutdown::new(context.clone(), &signal);

        let receiver = Receiver::create(&config)?
            .spawn(context.clone(), signal.clone(), shutdown.clone())?;

        let consumer = match Consumer::new(work)
            .spawn(context.clone(), signal.clone(), shutdown.clone())
        {
            Ok(consumer) => consumer,
            Err(err) => {
                shutdown.trigger();
                let _ = receiver.join();
                return Err(err);
            }
        };

        let producer = Producer::new(&config);
        let timer = match Timer::start(config.timer_delay, config.timer_interval, move || {
            producer.tick();
        }) {
            Ok(timer) => timer,
            Err(err) => {
                shutdown.trigger();
                let _ = consumer.join();
                let _ = receiver.join();
                return Err(err);
            }
        };

        Ok(App { context, signal, shutdown, receiver, consumer, timer })
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn state(&self) -> State {
        self.context.state()
    }

    /// Blocks until shutdown has been triggered and both threads are gone,
    /// then stops the timer and releases the shared signal.
    ///
    /// The signal is torn down only once no thread can reach it anymore.
    pub fn wait(self) -> Result<Report> {
        let App { context: _, signal, shutdown, receiver, consumer, timer } = self;

        let handled = consumer.join().map_err(|_| Error::Panicked("printer"));
        if handled.is_err() {
            // Nobody else is going to stop the server.
            shutdown.trigger();
        }
        let received = receiver.join().map_err(|_| Error::Panicked("server"));

        if let Err(err) = timer.cancel() {
            warn!("failed to stop timer: {}", err);
        }

        match Arc::try_unwrap(signal) {
            Ok(signal) => {
                if let Err(err) = signal.destroy() {
                    warn!("failed to destroy shared signal: {}", err);
                }
            }
            Err(_) => warn!("shared signal still referenced, leaving it to process exit"),
        }

        shutdown.complete();
        debug!("all threads stopped, shutdown {:?}", shutdown.state());

        Ok(Report {
            received: received?,
            handled: handled?,
        })
    }
}
