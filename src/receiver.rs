use crate::config::Config;
use crate::error::{Error, Result};
use crate::mailbox::Mailbox;
use crate::shutdown::{Context, Shutdown};
use crate::signal::SharedSignal;
use log::{error, info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Owner and sole reader of the mailbox. Turns every arrival into a raise of
/// the shared signal; payloads are not passed on.
pub struct Receiver {
    mailbox: Mailbox,
    poll_timeout: Duration,
}

impl Receiver {
    /// Creates the mailbox. Failing here is a setup failure.
    pub fn create(config: &Config) -> Result<Receiver> {
        let mailbox = Mailbox::create(&config.mailbox_name, config.max_depth, config.max_msg_size)?;
        let attrs = mailbox.attributes()?;
        info!("[SERVER]: Queue opened: {} (depth {}, message size {}).",
              mailbox.name(), attrs.max_depth, attrs.max_msg_size);

        Ok(Receiver {
            mailbox,
            poll_timeout: config.poll_timeout,
        })
    }

    /// Runs the receive loop on its own thread. The thread yields the number
    /// of messages it took out of the mailbox.
    pub fn spawn(self,
                 context: Arc<Context>,
                 signal: Arc<SharedSignal>,
                 shutdown: Shutdown) -> Result<JoinHandle<usize>>
    {
        thread::Builder::new()
            .name("server".to_owned())
            .spawn(move || self.run(&context, &signal, &shutdown))
            .map_err(|source| Error::Spawn { name: "server", source })
    }

    fn run(self, context: &Context, signal: &SharedSignal, shutdown: &Shutdown) -> usize {
        let mut received = 0;

        while context.receiver_running() {
            let mut next = self.mailbox.receive_timeout(self.poll_timeout);

            // Whatever queued up behind the first arrival is taken without
            // waiting again.
            while let Ok(Some(message)) = next {
                received += 1;
                info!("[SERVER]: Receive Message ({} bytes, priority {}).",
                      message.len(), message.priority());
                if let Err(err) = signal.raise() {
                    error!("[SERVER]: failed to wake the printer: {}", err);
                    shutdown.trigger();
                }

                next = if context.receiver_running() {
                    self.mailbox.try_receive()
                } else {
                    Ok(None)
                };
            }

            if let Err(err) = next {
                error!("[SERVER]: receive failed: {}", err);
                shutdown.trigger();
            }
        }

        info!("[SERVER]: Cleanup...");

        // The printer may be parked on the signal with nothing left to
        // arrive.
        if let Err(err) = signal.raise() {
            warn!("[SERVER]: final wakeup failed: {}", err);
        }

        let name = self.mailbox.name().to_owned();
        if let Err(err) = self.mailbox.close() {
            warn!("[SERVER]: failed to close {}: {}", name, err);
        }
        if let Err(err) = Mailbox::destroy(&name) {
            warn!("[SERVER]: failed to remove {}: {}", name, err);
        }

        received
    }
}
