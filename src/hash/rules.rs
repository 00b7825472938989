//! IPv4 direct-lookup rule table and its generator worker.
//!
//! The rule table maps the high 24 bits of an IPv4 destination straight to
//! a route index: the LPM answer restricted to prefix lengths of 24 or
//! less, or 0 when no such prefix covers the /24. While `rules_ready`
//! holds, the IPv4 lookup path answers every length-24-or-shorter question
//! with one array read instead of a per-length chain walk.
//!
//! The generator rebuilds all 2^24 entries in the background, taking the
//! reader lock per entry so control-plane mutations interleave freely with
//! the tens-of-seconds sweep at high route counts. Any mutation that
//! touches a short route re-flags the table and restarts the sweep.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{RULE_MAX_PREFIX_LEN, RULE_TABLE_ENTRIES, WORKER_TICK_SECS};
use crate::key::LpmKey;
use crate::worker::StopSignal;

use super::HashCore;

/// Rule table plus its publication flags.
pub(crate) struct RuleAccel {
    /// One route index per /24 prefix, written under the reader lock by
    /// the generator and published through `ready`.
    table: Box<[AtomicU32]>,
    /// Readers may trust `table` only while this holds.
    ready: AtomicBool,
    /// A rebuild is pending; the generator clears it when it claims one.
    dirty: AtomicBool,
}

impl RuleAccel {
    pub fn new() -> Self {
        let mut v = Vec::with_capacity(RULE_TABLE_ENTRIES);
        v.resize_with(RULE_TABLE_ENTRIES, || AtomicU32::new(0));
        RuleAccel {
            table: v.into_boxed_slice(),
            ready: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Route index for the /24 containing `rule_index`, or 0. Only valid
    /// while [`ready`](Self::ready) holds under the same reader lock.
    #[inline]
    pub fn entry(&self, rule_index: usize) -> u32 {
        self.table[rule_index].load(Ordering::Relaxed)
    }

    /// Called under the writer lock whenever the short-route set (or the
    /// index of a short route) changes.
    pub fn invalidate(&self) {
        self.ready.store(false, Ordering::Release);
        self.dirty.store(true, Ordering::Release);
    }

    pub fn bytes(&self) -> usize {
        self.table.len() * std::mem::size_of::<AtomicU32>()
    }
}

/// Generator worker body. Runs until cancelled.
pub(crate) fn generator_loop<K: LpmKey>(core: Arc<HashCore<K>>, stop: StopSignal) {
    let Some(rules) = core.rules.as_ref() else {
        return;
    };
    let tick = Duration::from_secs(WORKER_TICK_SECS);

    'idle: loop {
        if !stop.sleep(tick) {
            return;
        }
        let dirty = {
            let _st = core.state.read();
            rules.dirty.load(Ordering::Acquire)
        };
        if !dirty {
            continue;
        }

        // Claim the rebuild. Mutations that land after this point re-set
        // the flag and we restart.
        {
            let _st = core.state.write();
            rules.dirty.store(false, Ordering::Release);
        }
        log::debug!("rule table rebuild started");

        for slot in 0..RULE_TABLE_ENTRIES {
            let st = core.state.read();
            let probe = K::from_rule_slot(slot as u32);
            let idx = st
                .lookup_uncached(probe, RULE_MAX_PREFIX_LEN)
                .map_or(0, |(r, _)| r);
            rules.table[slot].store(idx, Ordering::Relaxed);
            let renewed = rules.dirty.load(Ordering::Acquire);
            drop(st);
            if renewed {
                log::debug!("rule table rebuild restarted at slot {slot}");
                continue 'idle;
            }
            if slot & 0xfff == 0 && stop.cancelled() {
                return;
            }
        }

        // Publish only if the table stayed clean for the whole sweep.
        {
            let _st = core.state.write();
            if !rules.dirty.load(Ordering::Acquire) {
                rules.ready.store(true, Ordering::Release);
                log::debug!("rule table published");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalidate_clears_ready_and_sets_dirty() {
        let accel = RuleAccel::new();
        accel.ready.store(true, Ordering::Release);
        accel.dirty.store(false, Ordering::Release);
        accel.invalidate();
        assert!(!accel.ready());
        assert!(accel.dirty.load(Ordering::Acquire));
    }

    #[test]
    fn fresh_table_reads_zero_and_is_not_ready() {
        let accel = RuleAccel::new();
        assert!(!accel.ready());
        assert_eq!(accel.entry(0), 0);
        assert_eq!(accel.entry(RULE_TABLE_ENTRIES - 1), 0);
    }
}
