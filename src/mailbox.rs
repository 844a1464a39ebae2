use crate::config::{MAILBOX_CAPACITY, MESSAGE_CAPACITY};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::queue::Queue;
use crate::shm::Shm;
use log::{debug, warn};
use nix::errno::Errno;
use nix::libc::pid_t;
use nix::sys::signal::kill;
use nix::unistd::{getpid, Pid};
use std::fmt;
use std::time::Duration;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Mode {
    Send,
    Receive,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Attributes {
    pub max_depth: usize,
    pub max_msg_size: usize,
    /// Messages currently queued.
    pub len: usize,
}

// Layout of the shared segment. Written once by the creator, then only
// touched through `queue`.
struct Shared {
    owner: pid_t,
    max_msg_size: usize,
    queue: Queue<Message>,
}

/// A handle to a named, bounded, priority ordered mailbox.
///
/// The creator owns the mailbox and is its only reader. Any number of
/// senders may open it by name, from this process or another one.
pub struct Mailbox {
    name: String,
    mode: Mode,
    owner: bool,
    shm: Shm<Shared>,
}

impl Mailbox {
    /// Creates `name` and returns the owner's receive handle.
    ///
    /// A segment left behind by an owner process that no longer exists, or
    /// one every handle has already detached from, is reclaimed; one whose
    /// owner is alive makes this fail with `MailboxExists`.
    pub fn create(name: &str, max_depth: usize, max_msg_size: usize) -> Result<Mailbox> {
        if max_depth == 0 || max_depth > MAILBOX_CAPACITY {
            return Err(Error::Config(format!("mailbox depth {} outside 1..={}",
                                             max_depth, MAILBOX_CAPACITY)));
        }
        if max_msg_size == 0 || max_msg_size > MESSAGE_CAPACITY {
            return Err(Error::Config(format!("message size {} outside 1..={}",
                                             max_msg_size, MESSAGE_CAPACITY)));
        }

        let shared = || Shared {
            owner: getpid().as_raw(),
            max_msg_size,
            queue: Queue::pshared(max_depth),
        };

        let shm = match Shm::create(name, shared()) {
            Err(Errno::EEXIST) if !Self::in_use(name) => {
                warn!("reclaiming stale mailbox {}", name);
                match Shm::<Shared>::unlink(name) {
                    Ok(()) | Err(Errno::ENOENT) => (),
                    Err(err) => return Err(err.into()),
                }
                Shm::create(name, shared())
            }
            other => other,
        };

        let shm = shm.map_err(|err| match err {
            Errno::EEXIST => Error::MailboxExists(name.to_owned()),
            err => Error::Sys(err),
        })?;

        debug!("created mailbox {} (depth {}, message size {})", name, max_depth, max_msg_size);

        Ok(Mailbox {
            name: name.to_owned(),
            mode: Mode::Receive,
            owner: true,
            shm,
        })
    }

    pub fn open(name: &str, mode: Mode) -> Result<Mailbox> {
        let shm = Shm::open(name).map_err(|err| match err {
            Errno::ENOENT => Error::MailboxNotFound(name.to_owned()),
            Errno::EAGAIN => Error::MailboxNotReady(name.to_owned()),
            err => Error::Sys(err),
        })?;

        Ok(Mailbox {
            name: name.to_owned(),
            mode,
            owner: false,
            shm,
        })
    }

    /// Removes the name. Handles already open keep working until closed.
    pub fn destroy(name: &str) -> Result<()> {
        Shm::<Shared>::unlink(name).map_err(|err| match err {
            Errno::ENOENT => Error::MailboxNotFound(name.to_owned()),
            err => Error::Sys(err),
        })
    }

    pub fn try_send(&self, payload: &[u8], priority: u8) -> Result<()> {
        if self.mode != Mode::Send {
            return Err(Error::WrongMode);
        }
        if payload.len() > self.shm.max_msg_size {
            return Err(Error::MessageTooLarge { len: payload.len(), max: self.shm.max_msg_size });
        }

        let message = Message::new(payload, priority)?;
        self.shm.queue.try_push(message, priority).map_err(|err| match err {
            Errno::EAGAIN => Error::Full,
            Errno::EPIPE => Error::Closed,
            err => Error::Sys(err),
        })
    }

    pub fn try_receive(&self) -> Result<Option<Message>> {
        if self.mode != Mode::Receive {
            return Err(Error::WrongMode);
        }
        Ok(self.shm.queue.try_pop()?)
    }

    /// Waits up to `timeout` for a message. `None` on expiry, or at once if
    /// the mailbox is closed and drained.
    pub fn receive_timeout(&self, timeout: Duration) -> Result<Option<Message>> {
        if self.mode != Mode::Receive {
            return Err(Error::WrongMode);
        }
        Ok(self.shm.queue.timed_pop(timeout)?)
    }

    pub fn attributes(&self) -> Result<Attributes> {
        Ok(Attributes {
            max_depth: self.shm.queue.depth()?,
            max_msg_size: self.shm.max_msg_size,
            len: self.shm.queue.len()?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.shm.queue.is_closed()
    }

    /// Detaches this handle. Closing the owner's handle also closes the
    /// mailbox for every sender still holding one.
    pub fn close(self) -> Result<()> {
        if self.owner {
            self.shm.queue.close()?;
        }
        debug!("closed {:?} handle to mailbox {}", self.mode, self.name);
        Ok(())
    }

    fn in_use(name: &str) -> bool {
        match Shm::<Shared>::open(name) {
            Ok(shm) => !matches!(kill(Pid::from_raw(shm.owner), None), Err(Errno::ESRCH)),
            Err(Errno::EAGAIN) => {
                !matches!(Shm::<Shared>::is_released(name), Ok(true) | Err(Errno::ENOENT))
            }
            Err(Errno::ENOENT) => false,
            // Half initialized or unreadable: can't tell, so leave it alone.
            Err(_) => true,
        }
    }
}

// An owner handle dropped without `close` takes the name down with it.
impl Drop for Mailbox {
    fn drop(&mut self) {
        if self.owner && !self.is_closed() {
            if let Err(err) = self.shm.queue.close() {
                warn!("failed to close mailbox {}: {}", self.name, err);
            }
            match Shm::<Shared>::unlink(&self.name) {
                Ok(()) | Err(Errno::ENOENT) => debug!("removed abandoned mailbox {}", self.name),
                Err(err) => warn!("failed to remove mailbox {}: {}", self.name, err),
            }
        }
    }
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("owner", &self.owner)
            .finish()
    }
}
