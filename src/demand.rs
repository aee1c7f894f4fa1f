//! Demand arithmetic.
//!
//! # Why
//! Every coordinator in this crate accumulates outstanding downstream
//! demand, subtracts what it has produced, and must never overflow or
//! underflow while doing so under concurrent CAS retries. The shape is an
//! optimistic `load` → compute → `compare_exchange` retry loop, with
//! `u64::MAX` standing in for "unbounded" demand.
use core::sync::atomic::Ordering;

#[cfg(not(any(loom, rxcore_loom)))]
use core::sync::atomic::AtomicU64;
#[cfg(any(loom, rxcore_loom))]
use loom::sync::atomic::AtomicU64;

/// The absorbing "unbounded" demand value.
pub const UNBOUNDED: u64 = u64::MAX;

/// Saturating add: `addCap(a, b) <= MAX`, and `addCap(MAX, b) == MAX`.
#[inline]
pub fn add_cap(a: u64, b: u64) -> u64 {
    a.saturating_add(b)
}

/// Saturating, clamping subtraction: `subCap(a, b) >= 0`.
///
/// If `b > a` ("more produced than requested"), this is a protocol
/// violation: the bookkeeping error is reported to the unsignalled sink and
/// the result is clamped to zero rather than underflowing or panicking.
#[inline]
pub fn sub_cap(a: u64, b: u64) -> u64 {
    if b > a {
        crate::error::unsignalled::report(crate::error::FlowError::new(
            crate::error::codes::PROTOCOL_OVER_PRODUCTION,
            "more items produced than were ever requested",
        ));
        return 0;
    }
    a - b
}

/// A 64-bit saturating demand counter, shared via `Arc` by coordinators.
///
/// Specializes the CAS-retry shape above to the two operations coordinators
/// actually need: accumulating a `Request(n)` call, and reconciling
/// `requested - produced` after a drain pass.
#[derive(Debug, Default)]
pub struct Demand {
    value: AtomicU64,
}

impl Demand {
    /// A fresh counter with no outstanding demand.
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Current outstanding demand (racy snapshot).
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// `n == UNBOUNDED` after this call iff the counter has ever reached
    /// the unbounded state.
    pub fn is_unbounded(&self) -> bool {
        self.get() == UNBOUNDED
    }

    /// Accumulate `n` into the outstanding demand, saturating at
    /// [`UNBOUNDED`]. Returns the *previous* value, matching
    /// `AtomicLong::getAndAdd` callers that need to know whether the
    /// counter was previously zero (the classic "was this the first
    /// request" check used by drain-loop entry points).
    pub fn add(&self, n: u64) -> u64 {
        let mut current = self.value.load(Ordering::Acquire);
        loop {
            let next = add_cap(current, n);
            match self.value.compare_exchange(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(prev) => return prev,
                Err(actual) => current = actual,
            }
        }
    }

    /// Subtract `n` (typically "emitted this pass") from the outstanding
    /// demand, clamping at zero and reporting over-production. Returns the
    /// new value.
    pub fn sub(&self, n: u64) -> u64 {
        let mut current = self.value.load(Ordering::Acquire);
        loop {
            if current == UNBOUNDED {
                return UNBOUNDED;
            }
            let next = sub_cap(current, n);
            match self.value.compare_exchange(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Force the counter to the unbounded state (used when a `Request(MAX)`
    /// arrives, or a source is known to be a scalar/finite fast path).
    pub fn set_unbounded(&self) {
        self.value.store(UNBOUNDED, Ordering::Release);
    }
}
