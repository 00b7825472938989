//! Park/wake on the address of an `AtomicU32`.
//!
//! On Linux this is the futex syscall with `FUTEX_PRIVATE_FLAG` (the words
//! are never shared across processes). Elsewhere [`wait`] degrades to a
//! yield, which keeps the lock correct at the cost of busier waiting; both
//! callers re-check their word in a loop and tolerate spurious returns.

use std::sync::atomic::AtomicU32;

/// Blocks until `word` changes away from `expected`, the word is woken, or
/// spuriously. Returns immediately if `word != expected` at call time.
#[cfg(target_os = "linux")]
pub fn wait(word: &AtomicU32, expected: u32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
            expected,
            std::ptr::null::<libc::timespec>(),
        );
    }
}

/// Wakes every thread parked on `word`.
#[cfg(target_os = "linux")]
pub fn wake_all(word: &AtomicU32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
            i32::MAX,
        );
    }
}

#[cfg(not(target_os = "linux"))]
pub fn wait(word: &AtomicU32, expected: u32) {
    use std::sync::atomic::Ordering;
    if word.load(Ordering::Relaxed) == expected {
        std::thread::yield_now();
    }
}

#[cfg(not(target_os = "linux"))]
pub fn wake_all(_word: &AtomicU32) {}
