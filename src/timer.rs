use crate::error::{Error, Result};
use crate::pthread::{Condvar, Mutex, PthreadPrimitiveConstructor,
                     PthreadWrappingPrimitiveConstructor};
use log::{error, warn};
use nix::errno::Errno;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Periodic timer running its callback on a dedicated thread.
///
/// The first firing happens after `delay`, then every `interval` on a fixed
/// schedule. Ticks missed because the callback overran are skipped, not
/// replayed in a burst.
pub struct Timer {
    state: Arc<TimerState>,
    handle: Option<JoinHandle<()>>,
}

struct TimerState {
    stopped: Mutex<bool>,
    wakeup: Condvar,
}

impl Timer {
    pub fn start<F>(delay: Duration, interval: Duration, callback: F) -> Result<Timer>
        where F: FnMut() + Send + 'static
    {
        if interval.is_zero() {
            return Err(Error::Config("timer interval must be non-zero".to_owned()));
        }
        let first = Instant::now().checked_add(delay)
            .and_then(|first| first.checked_add(interval).map(|_| first))
            .ok_or_else(|| Error::Config(format!("timer delay {:?} or interval {:?} too large",
                                                 delay, interval)))?;

        let state = Arc::new(TimerState {
            stopped: Mutex::new(false),
            wakeup: Condvar::new(),
        });

        let handle = {
            let state = state.clone();
            thread::Builder::new()
                .name("timer".to_owned())
                .spawn(move || run(&state, first, interval, callback))
                .map_err(|source| Error::Spawn { name: "timer", source })?
        };

        Ok(Timer { state, handle: Some(handle) })
    }

    /// Stops the timer and waits for an in-flight callback to finish.
    pub fn cancel(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => return Ok(()),
        };

        {
            let mut stopped = self.state.stopped.lock()?;
            *stopped = true;
            self.state.wakeup.signal()?;
        }

        handle.join().map_err(|_| Error::Panicked("timer"))
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!("failed to stop timer: {}", err);
        }
    }
}

impl TimerState {
    /// `Ok(true)` if stopped before `deadline`.
    fn sleep_until(&self, deadline: Instant) -> nix::Result<bool> {
        let mut stopped = self.stopped.lock()?;
        loop {
            if *stopped {
                return Ok(true);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }

            let (reacquired, result) = self.wakeup.timed_wait(stopped, remaining);
            stopped = reacquired;
            match result {
                Ok(()) | Err(Errno::ETIMEDOUT) => (),
                Err(err) => return Err(err),
            }
        }
    }
}

fn run<F>(state: &TimerState, first: Instant, interval: Duration, mut callback: F)
    where F: FnMut()
{
    let mut next = first;

    loop {
        match state.sleep_until(next) {
            Ok(false) => (),
            Ok(true) => return,
            Err(err) => {
                error!("[TIMER]: wait failed, timer stopped: {}", err);
                return;
            }
        }

        callback();

        next = match next_after(next, interval, Instant::now()) {
            Some(next) => next,
            None => {
                warn!("[TIMER]: schedule ran out of representable time, timer stopped");
                return;
            }
        };
    }
}

/// First point on the schedule through `last` that lies after `now`.
fn next_after(last: Instant, interval: Duration, now: Instant) -> Option<Instant> {
    let mut next = last.checked_add(interval)?;
    while next <= now {
        next = next.checked_add(interval)?;
    }
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_timer(delay: Duration, interval: Duration) -> (Timer, Arc<AtomicUsize>) {
        let ticks = Arc::new(AtomicUsize::new(0));
        let timer = {
            let ticks = ticks.clone();
            Timer::start(delay, interval, move || {
                ticks.fetch_add(1, Ordering::SeqCst);
            }).unwrap()
        };
        (timer, ticks)
    }

    #[test]
    fn fires_repeatedly() {
        let (timer, ticks) = counting_timer(Duration::from_millis(5), Duration::from_millis(5));

        let started = Instant::now();
        while ticks.load(Ordering::SeqCst) < 3 {
            assert!(started.elapsed() < Duration::from_secs(5), "timer did not fire");
            thread::sleep(Duration::from_millis(5));
        }

        timer.cancel().unwrap();
    }

    #[test]
    fn cancel_stops_firing() {
        let (timer, ticks) = counting_timer(Duration::from_millis(1), Duration::from_millis(1));
        thread::sleep(Duration::from_millis(20));
        timer.cancel().unwrap();

        let after_cancel = ticks.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(after_cancel, ticks.load(Ordering::SeqCst));
    }

    #[test]
    fn cancel_during_initial_delay() {
        let (timer, ticks) = counting_timer(Duration::from_secs(60), Duration::from_secs(60));

        let started = Instant::now();
        timer.cancel().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(0, ticks.load(Ordering::SeqCst));
    }

    #[test]
    fn rejects_unusable_schedule() {
        match Timer::start(Duration::ZERO, Duration::ZERO, || ()) {
            Err(Error::Config(_)) => (),
            other => panic!("expected config error, got {:?}", other.map(|_| ())),
        }
        match Timer::start(Duration::MAX, Duration::from_millis(1), || ()) {
            Err(Error::Config(_)) => (),
            other => panic!("expected config error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn next_after_skips_missed_points() {
        let start = Instant::now();
        let ms = Duration::from_millis;

        assert_eq!(Some(start + ms(10)), next_after(start, ms(10), start));
        assert_eq!(Some(start + ms(40)), next_after(start, ms(10), start + ms(35)));
        assert_eq!(Some(start + ms(40)), next_after(start, ms(10), start + ms(30)));
    }

    #[test]
    fn slow_callback_skips_ticks() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let timer = {
            let ticks = ticks.clone();
            Timer::start(Duration::ZERO, Duration::from_millis(5), move || {
                ticks.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(30));
            }).unwrap()
        };

        thread::sleep(Duration::from_millis(100));
        drop(timer);

        // Catching up would have produced about twenty.
        assert!(ticks.load(Ordering::SeqCst) <= 5);
    }
}
