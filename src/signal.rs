use crate::pthread::{Condvar, Mutex, PthreadPrimitiveConstructor,
                     PthreadWrappingPrimitiveConstructor};
use nix::Result;

/// One-slot "something arrived" hand-off between the receiver and the
/// consumer.
///
/// Raises are not counted: any number of them before a consume collapse
/// into a single wakeup. `pending` is only read and written under the lock,
/// so a raise that lands before the consumer starts waiting is never lost.
pub struct SharedSignal {
    pending: Mutex<bool>,
    wakeup: Condvar,
}

impl SharedSignal {
    pub fn new() -> SharedSignal {
        SharedSignal {
            pending: Mutex::new(false),
            wakeup: Condvar::new(),
        }
    }

    pub fn raise(&self) -> Result<()> {
        let mut pending = self.pending.lock()?;
        if !*pending {
            *pending = true;
            self.wakeup.signal()?;
        }
        Ok(())
    }

    /// Blocks until the signal is raised or `is_running` turns false.
    ///
    /// Returns `true` after consuming a raise, `false` if it gave up
    /// because the caller is shutting down. `is_running` is re-checked on
    /// every wakeup, so whoever clears it must raise afterwards.
    pub fn wait_and_consume<F>(&self, is_running: F) -> Result<bool>
        where F: Fn() -> bool
    {
        let mut pending = self.pending.lock()?;
        while !*pending && is_running() {
            pending = self.wakeup.wait(pending)?;
        }

        if *pending {
            *pending = false;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    #[allow(dead_code)]
    pub fn is_pending(&self) -> Result<bool> {
        Ok(*self.pending.lock()?)
    }

    /// Tears down the lock and condition variable. Taking `self` by value
    /// means every thread that could touch them has already let go.
    pub fn destroy(self) -> Result<()> {
        let SharedSignal { pending, wakeup } = self;
        let cond_result = wakeup.destroy();
        pending.destroy()?;
        cond_result
    }
}

impl Default for SharedSignal {
    fn default() -> SharedSignal {
        SharedSignal::new()
    }
}
