use nix::errno::Errno;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("system call failed: {0}")]
    Sys(#[from] Errno),

    #[error("mailbox {0} already exists and is in use")]
    MailboxExists(String),

    #[error("mailbox {0} does not exist")]
    MailboxNotFound(String),

    #[error("mailbox {0} is not ready")]
    MailboxNotReady(String),

    #[error("mailbox is full")]
    Full,

    #[error("mailbox is closed")]
    Closed,

    #[error("message of {len} bytes exceeds the {max} byte limit")]
    MessageTooLarge { len: usize, max: usize },

    #[error("priority {priority} exceeds the ceiling of {max}")]
    InvalidPriority { priority: u8, max: u8 },

    #[error("operation not permitted in this mailbox mode")]
    WrongMode,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{0} thread panicked")]
    Panicked(&'static str),

    #[error("must be run as root")]
    NotPrivileged,
}

impl Error {
    /// Failures a producer is expected to hit while the receiver is still
    /// starting up or already gone; the next timer tick simply retries.
    pub fn is_transient(&self) -> bool {
        matches!(self,
                 Error::MailboxNotFound(_) | Error::MailboxNotReady(_) | Error::Full | Error::Closed)
    }
}
