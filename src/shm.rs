use log::warn;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::libc;
use nix::sys::mman::{self, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;
use nix::Result;
use std::fmt;
use std::fs::File;
use std::mem;
use std::num::NonZeroUsize;
use std::ops::Deref;
use std::os::fd::AsFd;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

// Written last by the creator; a segment without it is still being set up
// or has already been torn down.
const READY: u32 = 0x5348_4d31;
// Written by the last handle to detach, just before the value is dropped.
const RELEASED: u32 = 0x5348_4d30;

/// A value living in a named POSIX shared memory segment.
///
/// Every handle is a separate mapping, possibly in another process. The
/// value is dropped in place when the last handle detaches, which makes the
/// unlinked name and the memory behind it independent: unlinking only stops
/// new handles from attaching.
pub struct Shm<T> {
    inner_ptr: NonNull<ShmInner<T>>,
}

unsafe impl<T: Send + Sync> Send for Shm<T> {}
unsafe impl<T: Send + Sync> Sync for Shm<T> {}

impl<T> Shm<T> {
    /// Creates the segment `name` and moves `obj` into it. Fails with
    /// `EEXIST` if the name is taken.
    pub fn create(name: &str, obj: T) -> Result<Self> {
        let fd = mman::shm_open(name,
                                OFlag::O_RDWR | OFlag::O_CREAT | OFlag::O_EXCL,
                                Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IRGRP | Mode::S_IROTH)?;

        let raw_ptr = match ftruncate(&fd, Self::size() as libc::off_t)
            .and_then(|_| Self::mmap_shm(&fd))
        {
            Ok(raw_ptr) => raw_ptr,
            Err(err) => {
                let _ = mman::shm_unlink(name);
                return Err(err);
            }
        };

        // The fresh segment is zero filled, so `ready` already reads as
        // "not ready" to anyone racing to open it.
        unsafe {
            let inner = raw_ptr.as_ptr();
            ptr::write(ptr::addr_of_mut!((*inner).data), obj);
            (*inner).attached.store(1, Ordering::Relaxed);
            (*inner).ready.store(READY, Ordering::Release);
        }

        Ok(Shm { inner_ptr: raw_ptr })
    }

    /// Attaches to an existing segment. `ENOENT` if there is no such name,
    /// `EAGAIN` if the segment is not (or no longer) initialized.
    pub fn open(name: &str) -> Result<Self> {
        let file = Self::open_file(name)?;
        if Self::file_len(&file)? < Self::size() as u64 {
            return Err(Errno::EAGAIN);
        }

        let raw_ptr = Self::mmap_shm(&file)?;
        let inner = unsafe { raw_ptr.as_ref() };

        let attached = inner.ready.load(Ordering::Acquire) == READY
            && inner.attached
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    if n == 0 { None } else { Some(n + 1) }
                })
                .is_ok();

        if !attached {
            unsafe {
                let _ = mman::munmap(raw_ptr.cast(), Self::size());
            }
            return Err(Errno::EAGAIN);
        }

        Ok(Shm { inner_ptr: raw_ptr })
    }

    /// Looks at `name` without attaching: `true` once every handle has
    /// detached and the value is gone. A segment still being set up is not
    /// released.
    pub fn is_released(name: &str) -> Result<bool> {
        let file = Self::open_file(name)?;
        if Self::file_len(&file)? < Self::size() as u64 {
            return Ok(false);
        }

        let raw_ptr = Self::mmap_shm(&file)?;
        let released = unsafe { raw_ptr.as_ref() }.ready.load(Ordering::Acquire) == RELEASED;
        unsafe {
            let _ = mman::munmap(raw_ptr.cast(), Self::size());
        }
        Ok(released)
    }

    pub fn unlink(name: &str) -> Result<()> {
        mman::shm_unlink(name)
    }

    /// Number of live handles across all processes.
    pub fn attached(&self) -> usize {
        unsafe { self.inner_ptr.as_ref() }.attached.load(Ordering::Acquire)
    }

    fn size() -> usize {
        mem::size_of::<ShmInner<T>>()
    }

    fn open_file(name: &str) -> Result<File> {
        Ok(File::from(mman::shm_open(name, OFlag::O_RDWR, Mode::empty())?))
    }

    fn file_len(file: &File) -> Result<u64> {
        file.metadata()
            .map(|meta| meta.len())
            .map_err(|err| Errno::from_raw(err.raw_os_error().unwrap_or(libc::EIO)))
    }

    fn mmap_shm<F: AsFd>(fd: F) -> Result<NonNull<ShmInner<T>>> {
        let len = NonZeroUsize::new(Self::size()).ok_or(Errno::EINVAL)?;
        let void_ptr = unsafe {
            mman::mmap(None,
                       len,
                       ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                       MapFlags::MAP_SHARED,
                       fd,
                       0)?
        };
        Ok(void_ptr.cast())
    }
}

impl<T> fmt::Debug for Shm<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Shm {{ attached: {} }}", self.attached())
    }
}

impl<T> Deref for Shm<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        unsafe {
            &self.inner_ptr.as_ref().data
        }
    }
}

impl<T> Drop for Shm<T> {
    fn drop(&mut self) {
        let inner = self.inner_ptr.as_ptr();

        unsafe {
            if (*inner).attached.fetch_sub(1, Ordering::AcqRel) == 1 {
                (*inner).ready.store(RELEASED, Ordering::Release);
                ptr::drop_in_place(ptr::addr_of_mut!((*inner).data));
            }

            if let Err(err) = mman::munmap(self.inner_ptr.cast(), Self::size()) {
                warn!("failed to unmap shared memory: {}", err);
            }
        }
    }
}

#[repr(C)]
struct ShmInner<T> {
    ready: AtomicU32,
    attached: AtomicUsize,
    data: T
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TempName;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn simple() {
        let name = TempName::new();

        let one = Shm::create(&name, 1).unwrap();
        assert_eq!(1, *one);
        assert_eq!(1, one.attached());
    }

    #[test]
    fn open_shares_value() {
        let name = TempName::new();

        let created = Shm::create(&name, AtomicU32::new(0)).unwrap();

        let writer = {
            let name = name.to_string();
            thread::spawn(move || {
                let opened = Shm::<AtomicU32>::open(&name).unwrap();
                opened.store(42, Ordering::SeqCst);
                assert_eq!(2, opened.attached());
            })
        };
        writer.join().unwrap();

        assert_eq!(42, created.load(Ordering::SeqCst));
        assert_eq!(1, created.attached());
    }

    #[test]
    fn create_is_exclusive() {
        let name = TempName::new();

        let _first = Shm::create(&name, 1u64).unwrap();
        assert_eq!(Errno::EEXIST, Shm::create(&name, 2u64).unwrap_err());
    }

    #[test]
    fn open_missing() {
        assert_eq!(Errno::ENOENT, Shm::<u64>::open(&TempName::new()).unwrap_err());
    }

    #[test]
    fn unlink_stops_new_handles() {
        let name = TempName::new();

        let created = Shm::create(&name, 5u64).unwrap();
        Shm::<u64>::unlink(&name).unwrap();

        assert_eq!(Errno::ENOENT, Shm::<u64>::open(&name).unwrap_err());
        assert_eq!(5, *created);
    }

    #[test]
    fn last_detach_drops_value() {
        let name = TempName::new();
        let token = Arc::new(());

        let created = Shm::create(&name, token.clone()).unwrap();
        let opened = Shm::<Arc<()>>::open(&name).unwrap();
        assert_eq!(2, Arc::strong_count(&token));

        drop(created);
        assert_eq!(2, Arc::strong_count(&token));

        drop(opened);
        assert_eq!(1, Arc::strong_count(&token));

        // Name still linked, but nothing left to attach to.
        assert_eq!(Errno::EAGAIN, Shm::<Arc<()>>::open(&name).unwrap_err());
    }

    #[test]
    fn released_only_after_last_detach() {
        let name = TempName::new();
        assert_eq!(Errno::ENOENT, Shm::<u64>::is_released(&name).unwrap_err());

        let created = Shm::create(&name, 3u64).unwrap();
        let opened = Shm::<u64>::open(&name).unwrap();
        assert_eq!(Ok(false), Shm::<u64>::is_released(&name));

        drop(created);
        assert_eq!(Ok(false), Shm::<u64>::is_released(&name));

        drop(opened);
        assert_eq!(Ok(true), Shm::<u64>::is_released(&name));
    }

    #[test]
    fn half_initialized_is_not_released() {
        let name = TempName::new();

        // Linked and sized, but the creator never got as far as marking it.
        let fd = mman::shm_open(name.as_str(),
                                OFlag::O_RDWR | OFlag::O_CREAT | OFlag::O_EXCL,
                                Mode::S_IRUSR | Mode::S_IWUSR).unwrap();
        ftruncate(&fd, Shm::<u64>::size() as libc::off_t).unwrap();

        assert_eq!(Ok(false), Shm::<u64>::is_released(&name));
        assert_eq!(Errno::EAGAIN, Shm::<u64>::open(&name).unwrap_err());
    }
}
