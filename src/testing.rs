use nix::sys::mman;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::ops::Deref;

/// A shared memory name unique to one test, unlinked when dropped.
pub struct TempName(String);

impl TempName {
    pub fn new() -> TempName {
        let suffix = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(char::from)
            .collect::<String>();

        TempName(format!("/prio_mailbox_test_{}", suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for TempName {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl Drop for TempName {
    fn drop(&mut self) {
        let _ = mman::shm_unlink(self.0.as_str());
    }
}
