use crate::config::MAILBOX_CAPACITY;
use crate::pthread::{Condvar, Mutex, PthreadPrimitiveConstructor,
                     PthreadWrappingPrimitiveConstructor};
use nix::errno::Errno;
use nix::Result;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Bounded, non-blocking-on-write priority queue.
///
/// Full and closed are reported the way a non-blocking POSIX message queue
/// reports them: `EAGAIN` and `EPIPE`.
pub struct Queue<T>
    where T: Copy
{
    buffer: Mutex<PriorityBuffer<T>>,
    in_cond: Condvar,
    closed: AtomicBool,
}

impl<T> Queue<T>
    where T: Copy + Send
{
    #[allow(dead_code)]
    pub fn new(depth: usize) -> Self {
        Queue {
            buffer: Mutex::new(PriorityBuffer::new(depth)),
            in_cond: Condvar::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn pshared(depth: usize) -> Self {
        Queue {
            buffer: Mutex::pshared(PriorityBuffer::new(depth)),
            in_cond: Condvar::pshared(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn try_push(&self, value: T, priority: u8) -> Result<()> {
        if self.is_closed() {
            return Err(Errno::EPIPE);
        }

        self.buffer.lock()?
            .write(value, priority)
            .map_err(|BufferError::Overflow| Errno::EAGAIN)?;

        self.in_cond.signal()
    }

    pub fn try_pop(&self) -> Result<Option<T>> {
        Ok(self.buffer.lock()?.try_read())
    }

    /// Pops the most urgent value, waiting up to `time` for one to arrive.
    /// `EINVAL` if `time` reaches past what an `Instant` can hold.
    pub fn timed_pop(&self, time: Duration) -> Result<Option<T>> {
        let deadline = Instant::now().checked_add(time).ok_or(Errno::EINVAL)?;
        let mut guard = self.buffer.lock()?;

        loop {
            if let Some(t) = guard.try_read() {
                return Ok(Some(t));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || self.is_closed() {
                return Ok(None);
            }

            let (reacquired, result) = self.in_cond.timed_wait(guard, remaining);
            guard = reacquired;
            match result {
                Ok(()) | Err(Errno::ETIMEDOUT) => (),
                Err(err) => return Err(err),
            }
        }
    }

    /// Refuses further pushes and wakes any waiting reader.
    pub fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let _guard = self.buffer.lock()?;
        self.in_cond.broadcast()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.buffer.lock()?.len)
    }

    pub fn depth(&self) -> Result<usize> {
        Ok(self.buffer.lock()?.depth)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum BufferError {
    Overflow
}

#[derive(Copy, Clone, Debug)]
struct Slot<T> {
    seq: u64,
    priority: u8,
    value: T,
}

/// Fixed slot array ordered on read: highest priority first, oldest first
/// among equal priorities.
#[derive(Debug)]
struct PriorityBuffer<T>
    where T: Copy
{
    depth: usize,
    len: usize,
    next_seq: u64,
    slots: [Option<Slot<T>>; MAILBOX_CAPACITY]
}

impl<T> PriorityBuffer<T>
    where T: Copy
{
    pub fn new(depth: usize) -> PriorityBuffer<T> {
        PriorityBuffer {
            depth: depth.min(MAILBOX_CAPACITY),
            len: 0,
            next_seq: 0,
            slots: [None; MAILBOX_CAPACITY]
        }
    }

    pub fn try_read(&mut self) -> Option<T> {
        let idx = self.slots.iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.map(|slot| (idx, slot)))
            .max_by_key(|&(_, slot)| (slot.priority, Reverse(slot.seq)))
            .map(|(idx, _)| idx)?;

        self.len -= 1;
        self.slots[idx].take().map(|slot| slot.value)
    }

    pub fn write(&mut self, value: T, priority: u8) -> std::result::Result<(), BufferError> {
        if self.len >= self.depth {
            return Err(BufferError::Overflow);
        }

        let free = self.slots.iter_mut()
            .find(|slot| slot.is_none())
            .ok_or(BufferError::Overflow)?;

        *free = Some(Slot { seq: self.next_seq, priority, value });
        self.next_seq += 1;
        self.len += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    mod priority_buffer {
        use crate::config::MAILBOX_CAPACITY;
        use super::super::PriorityBuffer;
        use super::super::BufferError;

        #[test]
        fn rw() {
            let mut rb = PriorityBuffer::new(MAILBOX_CAPACITY);
            assert_eq!(None,    rb.try_read());
            assert_eq!(Ok(()),  rb.write(1, 0));
            assert_eq!(Some(1), rb.try_read());
            assert_eq!(None,    rb.try_read());
            assert_eq!(Ok(()),  rb.write(2, 0));
            assert_eq!(Ok(()),  rb.write(3, 0));
            assert_eq!(Ok(()),  rb.write(4, 0));
            assert_eq!(Some(2), rb.try_read());
            assert_eq!(Some(3), rb.try_read());
            assert_eq!(Some(4), rb.try_read());
            assert_eq!(None,    rb.try_read());
        }

        #[test]
        fn priority_order() {
            let mut rb = PriorityBuffer::new(MAILBOX_CAPACITY);
            rb.write("low", 1).unwrap();
            rb.write("high", 9).unwrap();
            rb.write("mid-a", 5).unwrap();
            rb.write("mid-b", 5).unwrap();

            assert_eq!(Some("high"),  rb.try_read());
            assert_eq!(Some("mid-a"), rb.try_read());
            assert_eq!(Some("mid-b"), rb.try_read());
            assert_eq!(Some("low"),   rb.try_read());
            assert_eq!(None,          rb.try_read());
        }

        #[test]
        fn overflow() {
            let mut rb = PriorityBuffer::new(MAILBOX_CAPACITY);
            for i in 0..MAILBOX_CAPACITY {
                rb.write(i, 0).unwrap();
            }
            assert_eq!(Err(BufferError::Overflow), rb.write(MAILBOX_CAPACITY, 0));
        }

        #[test]
        fn overflow_escape() {
            let mut rb = PriorityBuffer::new(MAILBOX_CAPACITY);
            for i in 0..MAILBOX_CAPACITY {
                rb.write(i, 0).unwrap();
            }
            assert_eq!(Err(BufferError::Overflow), rb.write(MAILBOX_CAPACITY, 0));

            assert_eq!(Some(0), rb.try_read());
            assert_eq!(Ok(()), rb.write(MAILBOX_CAPACITY, 0));
            assert_eq!(Some(MAILBOX_CAPACITY), rb.slots[0].map(|slot| slot.value));
        }

        #[test]
        fn shallow_depth() {
            let mut rb = PriorityBuffer::new(2);
            rb.write('a', 0).unwrap();
            rb.write('b', 0).unwrap();
            assert_eq!(Err(BufferError::Overflow), rb.write('c', 9));
        }
    }

    mod queue {
        use crate::config::MAILBOX_CAPACITY;
        use super::super::Queue;
        use nix::errno::Errno;
        use std::sync::Arc;
        use std::thread;
        use std::time::{Duration, Instant};

        #[test]
        fn spsc() {
            let queue = Arc::new(Queue::new(MAILBOX_CAPACITY));

            let producer = {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..10000 {
                        loop {
                            match queue.try_push(i, 0) {
                                Ok(()) => break,
                                Err(Errno::EAGAIN) => thread::yield_now(),
                                Err(err) => panic!("push failed: {}", err),
                            }
                        }
                    }
                })
            };

            // consumer
            for i in 0..10000 {
                let v = queue.timed_pop(Duration::from_secs(5));
                assert_eq!(Ok(Some(i)), v);
            }

            producer.join().unwrap();
        }

        #[test]
        fn try_pop() {
            let queue = Queue::new(4);
            assert_eq!(Ok(None), queue.try_pop());
            queue.try_push(1, 0).unwrap();
            assert_eq!(Ok(1), queue.len());
            assert_eq!(Ok(Some(1)), queue.try_pop());
            assert_eq!(Ok(0), queue.len());
        }

        #[test]
        fn full() {
            let queue = Queue::pshared(1);
            queue.try_push(1u8, 0).unwrap();
            assert_eq!(Err(Errno::EAGAIN), queue.try_push(2, 0));
        }

        #[test]
        fn timed_pop_times_out() {
            let queue = Queue::<u32>::new(4);
            let started = Instant::now();
            assert_eq!(Ok(None), queue.timed_pop(Duration::from_millis(30)));
            assert!(started.elapsed() >= Duration::from_millis(30));
        }

        #[test]
        fn timed_pop_rejects_endless_wait() {
            let queue = Queue::<u32>::new(4);
            assert_eq!(Err(Errno::EINVAL), queue.timed_pop(Duration::MAX));
        }

        #[test]
        fn closed() {
            let queue = Queue::new(4);
            queue.try_push(1, 0).unwrap();
            queue.close().unwrap();

            assert_eq!(Err(Errno::EPIPE), queue.try_push(2, 0));
            assert_eq!(Ok(Some(1)), queue.timed_pop(Duration::from_secs(1)));

            let started = Instant::now();
            assert_eq!(Ok(None), queue.timed_pop(Duration::from_secs(5)));
            assert!(started.elapsed() < Duration::from_secs(1));
        }
    }
}
