//! One-word reader/writer lock.
//!
//! The entire lock state is a single `AtomicU32`:
//!
//! ```text
//!   bit 31        bit 30        bits 29..0
//!   waiters       writer-owned  owner count
//! ```
//!
//! Readers take the fast path with one `fetch_add`; writers with one
//! compare-exchange. A thread that observes either flag undoes its attempt,
//! publishes the waiters flag, and parks on the word with the kernel
//! wait/wake primitive. Unlock wakes everyone whenever the pre-unlock word
//! carried a flag; woken threads re-contend, so ordering is approximate
//! rather than FIFO. The critical sections this lock guards are microseconds
//! long, which is the regime where one uncontended atomic beats a
//! general-purpose shared mutex.
//!
//! Contracts:
//! - a thread holding the write lock must not request any lock;
//! - guards are released by drop; dropping a guard twice is impossible by
//!   construction, which is how "unlocking an unlocked lock" is excluded.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};

use super::futex;

const WRITER: u32 = 1 << 30;
const WAITERS: u32 = 1 << 31;
const FLAGS: u32 = WRITER | WAITERS;

/// Reader/writer lock over `T`. One writer or any number of readers.
pub struct RwLock<T> {
    word: AtomicU32,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for RwLock<T> {}
unsafe impl<T: Send + Sync> Sync for RwLock<T> {}

impl<T> RwLock<T> {
    pub fn new(data: T) -> Self {
        RwLock {
            word: AtomicU32::new(0),
            data: UnsafeCell::new(data),
        }
    }

    /// Shared access. Parks if a writer owns or waiters are pending.
    pub fn read(&self) -> ReadGuard<'_, T> {
        loop {
            let prev = self.word.fetch_add(1, Ordering::Acquire);
            if prev & FLAGS == 0 {
                return ReadGuard { lock: self };
            }
            // A writer owns the lock or waiters are queued ahead of us.
            self.word.fetch_sub(1, Ordering::Relaxed);
            self.park(|w| w & FLAGS != 0);
        }
    }

    /// Exclusive access. Parks until the word is completely free.
    pub fn write(&self) -> WriteGuard<'_, T> {
        loop {
            if self
                .word
                .compare_exchange(0, WRITER | 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return WriteGuard { lock: self };
            }
            self.park(|w| w != 0);
        }
    }

    /// Publishes the waiters flag and parks while `busy` holds for the
    /// observed word. Readers wait only on the flags (they can share with
    /// other readers); writers wait on any nonzero word.
    ///
    /// Returns as soon as the word looks acquirable; the caller retries its
    /// fast path, which is what makes spurious wakeups harmless.
    fn park(&self, busy: impl Fn(u32) -> bool) {
        let mut observed = self.word.load(Ordering::Relaxed);
        loop {
            if !busy(observed) {
                return;
            }
            if observed & WAITERS == 0 {
                match self.word.compare_exchange_weak(
                    observed,
                    observed | WAITERS,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => observed |= WAITERS,
                    Err(cur) => {
                        observed = cur;
                        std::hint::spin_loop();
                        continue;
                    }
                }
            }
            futex::wait(&self.word, observed);
            observed = self.word.load(Ordering::Relaxed);
        }
    }

    /// Shared unlock path for both guard types: drop one owner, and if the
    /// pre-value carried any flag, clear the flags and wake everyone.
    fn unlock(&self) {
        let prev = self.word.fetch_sub(1, Ordering::Release);
        if prev & FLAGS != 0 {
            self.word.fetch_and(!FLAGS, Ordering::AcqRel);
            futex::wake_all(&self.word);
        }
    }
}

pub struct ReadGuard<'a, T> {
    lock: &'a RwLock<T>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

pub struct WriteGuard<'a, T> {
    lock: &'a RwLock<T>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn uncontended_read_and_write() {
        let lock = RwLock::new(41);
        {
            let mut g = lock.write();
            *g += 1;
        }
        assert_eq!(*lock.read(), 42);
    }

    #[test]
    fn readers_run_in_parallel() {
        let lock = Arc::new(RwLock::new(0u32));
        let g1 = lock.read();
        // A second reader must not block while the first is held.
        let lock2 = lock.clone();
        let h = thread::spawn(move || *lock2.read());
        assert_eq!(h.join().unwrap(), 0);
        drop(g1);
    }

    #[test]
    fn writer_excludes_writers() {
        let lock = Arc::new(RwLock::new(0u64));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..10_000 {
                    *lock.write() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        // Lost increments would mean two writers overlapped.
        assert_eq!(*lock.read(), 80_000);
    }

    #[test]
    fn writer_excludes_readers() {
        let lock = Arc::new(RwLock::new((0u64, 0u64)));
        let writer = {
            let lock = lock.clone();
            thread::spawn(move || {
                for i in 1..=5_000u64 {
                    let mut g = lock.write();
                    g.0 = i;
                    g.1 = i;
                }
            })
        };
        let reader = {
            let lock = lock.clone();
            thread::spawn(move || {
                for _ in 0..5_000 {
                    let g = lock.read();
                    // Readers must never see a half-applied write.
                    assert_eq!(g.0, g.1);
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();
    }

    #[test]
    fn writer_makes_progress_under_reader_churn() {
        let lock = Arc::new(RwLock::new(false));
        let stop = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let lock = lock.clone();
                let stop = stop.clone();
                thread::spawn(move || {
                    while stop.load(Ordering::Relaxed) == 0 {
                        let _ = *lock.read();
                    }
                })
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        *lock.write() = true;
        stop.store(1, Ordering::Relaxed);
        for r in readers {
            r.join().unwrap();
        }
        assert!(*lock.read());
    }
}
