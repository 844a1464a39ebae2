use crate::error::{Error, Result};
use crate::shutdown::{Context, Shutdown};
use crate::signal::SharedSignal;
use log::{error, info};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub fn print_hello() {
    println!("[PRINTER]: Hello");
}

/// Waits on the shared signal and runs `work` once per consumed raise.
pub struct Consumer<F> {
    work: F,
}

impl<F> Consumer<F>
    where F: FnMut() + Send + 'static
{
    pub fn new(work: F) -> Consumer<F> {
        Consumer { work }
    }

    /// The thread yields how many times `work` ran.
    pub fn spawn(self,
                 context: Arc<Context>,
                 signal: Arc<SharedSignal>,
                 shutdown: Shutdown) -> Result<JoinHandle<usize>>
    {
        thread::Builder::new()
            .name("printer".to_owned())
            .spawn(move || self.run(&context, &signal, &shutdown))
            .map_err(|source| Error::Spawn { name: "printer", source })
    }

    fn run(mut self, context: &Context, signal: &SharedSignal, shutdown: &Shutdown) -> usize {
        let mut handled = 0;

        while context.consumer_running() {
            match signal.wait_and_consume(|| context.consumer_running()) {
                // The raise that releases us during shutdown is not work.
                Ok(true) if context.consumer_running() => {
                    (self.work)();
                    handled += 1;
                }
                Ok(_) => (),
                Err(err) => {
                    error!("[PRINTER]: waiting for the server failed: {}", err);
                    shutdown.trigger();
                }
            }
        }

        info!("[PRINTER]: Cleanup...");
        handled
    }
}
