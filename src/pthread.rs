use nix::errno::Errno;
use nix::Result;
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::{self, ManuallyDrop, MaybeUninit};
use std::ops::{Deref, DerefMut};
use std::ptr;
use std::time::Duration;

use nix::libc::{
    c_int,
    pthread_cond_t,
    pthread_cond_init,
    pthread_cond_destroy,
    pthread_cond_wait,
    pthread_cond_timedwait,
    pthread_cond_signal,
    pthread_cond_broadcast,
    pthread_condattr_t,
    pthread_condattr_init,
    pthread_condattr_destroy,
    pthread_condattr_setclock,
    pthread_condattr_setpshared,

    PTHREAD_MUTEX_INITIALIZER,
    pthread_mutex_t,
    pthread_mutex_init,
    pthread_mutex_destroy,
    pthread_mutex_lock,
    pthread_mutex_unlock,
    pthread_mutexattr_t,
    pthread_mutexattr_init,
    pthread_mutexattr_destroy,
    pthread_mutexattr_setpshared,

    PTHREAD_PROCESS_SHARED,
    CLOCK_MONOTONIC,
    clock_gettime,
    timespec,
};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Constructors for primitives that carry no data of their own.
///
/// `pshared` variants may be placed in memory mapped by several processes.
pub trait PthreadPrimitiveConstructor {
    fn new() -> Self;
    fn pshared() -> Self;
}

pub trait PthreadWrappingPrimitiveConstructor<T> {
    fn new(data: T) -> Self;
    fn pshared(data: T) -> Self;
}

fn check(status: c_int) -> Result<()> {
    if status != 0 {
        Err(Errno::from_raw(status))
    } else {
        Ok(())
    }
}

impl PthreadPrimitiveConstructor for pthread_mutex_t {
    fn new() -> Self {
        PTHREAD_MUTEX_INITIALIZER
    }

    fn pshared() -> Self {
        unsafe {
            let mut mutexattr = MaybeUninit::<pthread_mutexattr_t>::uninit();
            pthread_mutexattr_init(mutexattr.as_mut_ptr());
            pthread_mutexattr_setpshared(mutexattr.as_mut_ptr(), PTHREAD_PROCESS_SHARED);
            let mut mutex = MaybeUninit::<pthread_mutex_t>::uninit();
            pthread_mutex_init(mutex.as_mut_ptr(), mutexattr.as_ptr());
            pthread_mutexattr_destroy(mutexattr.as_mut_ptr());
            mutex.assume_init()
        }
    }
}

// Condition variables always measure timeouts on the monotonic clock so a
// wall clock jump can neither stretch nor cut short a timed wait.
fn cond_with_attrs(pshared: bool) -> pthread_cond_t {
    unsafe {
        let mut condattr = MaybeUninit::<pthread_condattr_t>::uninit();
        pthread_condattr_init(condattr.as_mut_ptr());
        if pshared {
            pthread_condattr_setpshared(condattr.as_mut_ptr(), PTHREAD_PROCESS_SHARED);
        }
        pthread_condattr_setclock(condattr.as_mut_ptr(), CLOCK_MONOTONIC);
        let mut cond = MaybeUninit::<pthread_cond_t>::uninit();
        pthread_cond_init(cond.as_mut_ptr(), condattr.as_ptr());
        pthread_condattr_destroy(condattr.as_mut_ptr());
        cond.assume_init()
    }
}

impl PthreadPrimitiveConstructor for pthread_cond_t {
    fn new() -> Self {
        cond_with_attrs(false)
    }

    fn pshared() -> Self {
        cond_with_attrs(true)
    }
}

fn deadline_after(duration: Duration) -> timespec {
    let mut now: timespec = unsafe { mem::zeroed() };
    unsafe {
        clock_gettime(CLOCK_MONOTONIC, &mut now);
    }

    // Saturates instead of wrapping; a far enough deadline is "never".
    let wait_secs = i64::try_from(duration.as_secs()).unwrap_or(i64::MAX);
    let mut secs = (now.tv_sec as i64).saturating_add(wait_secs);
    let mut nanos = now.tv_nsec as i64 + duration.subsec_nanos() as i64;
    if nanos >= NANOS_PER_SEC {
        secs = secs.saturating_add(1);
        nanos -= NANOS_PER_SEC;
    }

    let mut abstime: timespec = unsafe { mem::zeroed() };
    abstime.tv_sec = secs as _;
    abstime.tv_nsec = nanos as _;
    abstime
}

pub struct Condvar(UnsafeCell<pthread_cond_t>);

unsafe impl Send for Condvar {}
unsafe impl Sync for Condvar {}

impl PthreadPrimitiveConstructor for Condvar {
    fn new() -> Condvar {
        Condvar(UnsafeCell::new(pthread_cond_t::new()))
    }

    fn pshared() -> Condvar {
        Condvar(UnsafeCell::new(pthread_cond_t::pshared()))
    }
}

impl Condvar {
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> Result<MutexGuard<'a, T>> {
        let status = unsafe {
            pthread_cond_wait(
                self.0.get(),
                guard.0.lock.get()
            )
        };

        check(status).map(|_| guard)
    }

    /// Waits at most `duration`. Expiry is reported as `Errno::ETIMEDOUT`,
    /// the reacquired guard is handed back either way.
    pub fn timed_wait<'a, T>(&self, guard: MutexGuard<'a, T>, duration: Duration)
        -> (MutexGuard<'a, T>, Result<()>)
    {
        let abstime = deadline_after(duration);

        let status = unsafe {
            pthread_cond_timedwait(
                self.0.get(),
                guard.0.lock.get(),
                &abstime as *const _
            )
        };

        (guard, check(status))
    }

    pub fn signal(&self) -> Result<()> {
        check(unsafe { pthread_cond_signal(self.0.get()) })
    }

    pub fn broadcast(&self) -> Result<()> {
        check(unsafe { pthread_cond_broadcast(self.0.get()) })
    }

    /// Releases the underlying condition variable, reporting failure instead
    /// of swallowing it the way `Drop` has to.
    pub fn destroy(self) -> Result<()> {
        let this = ManuallyDrop::new(self);
        check(unsafe { pthread_cond_destroy(this.0.get()) })
    }
}

impl Drop for Condvar {
    fn drop(&mut self) {
        unsafe {
            pthread_cond_destroy(self.0.get());
        }
    }
}

impl fmt::Debug for Condvar {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Condvar {{ .. }}")
    }
}

pub struct Mutex<T> {
    lock: UnsafeCell<pthread_mutex_t>,
    data: UnsafeCell<T>
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> PthreadWrappingPrimitiveConstructor<T> for Mutex<T> {
    fn new(data: T) -> Self {
        Mutex {
            lock: UnsafeCell::new(pthread_mutex_t::new()),
            data: UnsafeCell::new(data)
        }
    }

    fn pshared(data: T) -> Self {
        Mutex {
            lock: UnsafeCell::new(pthread_mutex_t::pshared()),
            data: UnsafeCell::new(data)
        }
    }
}

impl<T> Mutex<T> {
    pub fn lock(&self) -> Result<MutexGuard<T>> {
        MutexGuard::new(self)
    }

    /// Destroys the lock and hands back the protected value.
    pub fn destroy(self) -> Result<T> {
        let this = ManuallyDrop::new(self);
        let status = unsafe { pthread_mutex_destroy(this.lock.get()) };
        let data = unsafe { ptr::read(this.data.get()) };
        check(status).map(|_| data)
    }
}

impl<T> Drop for Mutex<T> {
    fn drop(&mut self) {
        unsafe {
            pthread_mutex_destroy(self.lock.get());
        }
    }
}

impl<T> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Mutex {{ .. }}")
    }
}

pub struct MutexGuard<'a, T: 'a>(&'a Mutex<T>);

impl<'a, T> MutexGuard<'a, T> {
    pub fn new(mutex: &'a Mutex<T>) -> Result<Self> {
        let status = unsafe {
            pthread_mutex_lock(
                mutex.lock.get()
            )
        };

        check(status).map(|_| MutexGuard(mutex))
    }
}

impl<'a, T> fmt::Debug for MutexGuard<'a, T>
    where T: fmt::Debug
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MutexGuard {{ data: {:?} }}", **self)
    }
}

impl<'a, T> Deref for MutexGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe {
            &*self.0.data.get()
        }
    }
}

impl<'a, T> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe {
            &mut *self.0.data.get()
        }
    }
}

impl<'a, T> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        unsafe {
            pthread_mutex_unlock(
                self.0.lock.get()
            );
        }
    }
}
