use crate::config::Config;
use crate::error::{Error, Result};
use crate::mailbox::{Mailbox, Mode};
use log::{error, info, warn};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Tick {
    Sent,
    /// Mailbox not created yet (or already gone); retried next tick.
    NotReady,
    /// Mailbox reachable but the message was not accepted.
    Dropped,
}

/// The timer callback: opens the mailbox by name, posts one message and
/// closes it again. Never blocks and never fails loudly.
#[derive(Clone, Debug)]
pub struct Producer {
    mailbox_name: String,
    payload: Vec<u8>,
    priority: u8,
}

impl Producer {
    pub fn new(config: &Config) -> Producer {
        Producer {
            mailbox_name: config.mailbox_name.clone(),
            payload: config.tick_payload.clone(),
            priority: config.tick_priority,
        }
    }

    pub fn tick(&self) -> Tick {
        match self.post() {
            Ok(()) => {
                info!("[TIMER]: send message.");
                Tick::Sent
            }
            Err(Error::MailboxNotFound(_)) | Err(Error::MailboxNotReady(_)) => {
                info!("[TIMER]: The queue is not ready yet. Waiting...");
                Tick::NotReady
            }
            Err(err) if err.is_transient() => {
                warn!("[TIMER]: message dropped: {}", err);
                Tick::Dropped
            }
            Err(err) => {
                error!("[TIMER]: failed to send message: {}", err);
                Tick::Dropped
            }
        }
    }

    fn post(&self) -> Result<()> {
        let mailbox = Mailbox::open(&self.mailbox_name, Mode::Send)?;
        mailbox.try_send(&self.payload, self.priority)?;
        mailbox.close()
    }
}
