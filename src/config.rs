use crate::error::{Error, Result};
use std::time::Duration;

pub const MAILBOX_NAME: &str = "/message_queue";
/// Hard upper bound on mailbox depth; the slot array is sized by it.
pub const MAILBOX_CAPACITY: usize = 16;
/// Hard upper bound on payload size; every message reserves this much.
pub const MESSAGE_CAPACITY: usize = 1024;
pub const MAX_PRIORITY: u8 = 9;

pub const TIMER_DELAY: Duration = Duration::from_secs(2);
pub const TIMER_INTERVAL: Duration = Duration::from_secs(2);
pub const POLL_TIMEOUT: Duration = Duration::from_millis(100);
/// Longest delay, interval or poll timeout a configuration may ask for.
pub const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

pub const TICK_PAYLOAD: &[u8] = b"send";
pub const TICK_PRIORITY: u8 = 1;

#[derive(Clone, Debug)]
pub struct Config {
    pub mailbox_name: String,
    pub max_depth: usize,
    pub max_msg_size: usize,
    pub timer_delay: Duration,
    pub timer_interval: Duration,
    pub poll_timeout: Duration,
    pub tick_payload: Vec<u8>,
    pub tick_priority: u8,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            mailbox_name: MAILBOX_NAME.to_owned(),
            max_depth: MAILBOX_CAPACITY,
            max_msg_size: MESSAGE_CAPACITY,
            timer_delay: TIMER_DELAY,
            timer_interval: TIMER_INTERVAL,
            poll_timeout: POLL_TIMEOUT,
            tick_payload: TICK_PAYLOAD.to_vec(),
            tick_priority: TICK_PRIORITY,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        let invalid = |what: String| Err(Error::Config(what));

        if !self.mailbox_name.starts_with('/') || self.mailbox_name[1..].contains('/') {
            return invalid(format!("mailbox name {:?} must be a single leading-slash component",
                                   self.mailbox_name));
        }
        if self.max_depth == 0 || self.max_depth > MAILBOX_CAPACITY {
            return invalid(format!("depth {} outside 1..={}", self.max_depth, MAILBOX_CAPACITY));
        }
        if self.max_msg_size == 0 || self.max_msg_size > MESSAGE_CAPACITY {
            return invalid(format!("message size {} outside 1..={}",
                                   self.max_msg_size, MESSAGE_CAPACITY));
        }
        if self.tick_priority > MAX_PRIORITY {
            return invalid(format!("priority {} above {}", self.tick_priority, MAX_PRIORITY));
        }
        if self.tick_payload.len() > self.max_msg_size {
            return invalid(format!("tick payload of {} bytes exceeds message size {}",
                                   self.tick_payload.len(), self.max_msg_size));
        }
        if self.timer_interval.is_zero() || self.poll_timeout.is_zero() {
            return invalid("timer interval and poll timeout must be non-zero".to_owned());
        }
        if self.timer_delay > MAX_WAIT || self.timer_interval > MAX_WAIT
            || self.poll_timeout > MAX_WAIT
        {
            return invalid(format!("timer delay, interval and poll timeout are capped at {:?}",
                                   MAX_WAIT));
        }
        Ok(())
    }
}
