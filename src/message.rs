use crate::config::{MAX_PRIORITY, MESSAGE_CAPACITY};
use crate::error::{Error, Result};
use std::fmt;

/// A fixed-size, priority tagged message.
///
/// Lives by value inside the shared mailbox segment, so it must stay `Copy`
/// and free of pointers.
#[derive(Copy, Clone)]
#[repr(C)]
pub struct Message {
    priority: u8,
    len: u16,
    bytes: [u8; MESSAGE_CAPACITY],
}

impl Message {
    pub fn new(payload: &[u8], priority: u8) -> Result<Message> {
        if payload.len() > MESSAGE_CAPACITY {
            return Err(Error::MessageTooLarge { len: payload.len(), max: MESSAGE_CAPACITY });
        }
        if priority > MAX_PRIORITY {
            return Err(Error::InvalidPriority { priority, max: MAX_PRIORITY });
        }

        let mut bytes = [0; MESSAGE_CAPACITY];
        bytes[..payload.len()].copy_from_slice(payload);

        Ok(Message {
            priority,
            len: payload.len() as u16,
            bytes,
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Message) -> bool {
        self.priority == other.priority && self.payload() == other.payload()
    }
}

impl Eq for Message {}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Message")
            .field("priority", &self.priority)
            .field("payload", &String::from_utf8_lossy(self.payload()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_and_priority() {
        let msg = Message::new(b"send", 1).unwrap();
        assert_eq!(b"send", msg.payload());
        assert_eq!(1, msg.priority());
        assert_eq!(4, msg.len());
    }

    #[test]
    fn full_capacity_payload() {
        let payload = [0xab; MESSAGE_CAPACITY];
        let msg = Message::new(&payload, MAX_PRIORITY).unwrap();
        assert_eq!(&payload[..], msg.payload());
    }

    #[test]
    fn too_large() {
        match Message::new(&[0; MESSAGE_CAPACITY + 1], 0) {
            Err(Error::MessageTooLarge { len, max }) => {
                assert_eq!(MESSAGE_CAPACITY + 1, len);
                assert_eq!(MESSAGE_CAPACITY, max);
            }
            other => panic!("expected MessageTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn priority_ceiling() {
        match Message::new(b"x", MAX_PRIORITY + 1) {
            Err(Error::InvalidPriority { priority, .. }) => assert_eq!(MAX_PRIORITY + 1, priority),
            other => panic!("expected InvalidPriority, got {:?}", other),
        }
    }
}
