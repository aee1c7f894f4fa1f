//! Concurrency core for a reactive-streams operator library.
//!
//! This crate implements the protocol machinery the operator layer is built
//! on: the [`subscriber`] Signal contract, [`demand`] arithmetic, the
//! [`fusion`] queue-bypass negotiation, a family of [`deferred`] arbiters,
//! and the multi-source drain coordinators ([`observe_on`], [`zip`],
//! [`join`], [`reduce_full`]) that stitch several rails into one downstream
//! subscriber. [`scheduler`] supplies the thread-pool machinery `observe_on`
//! schedules work onto.
//!
//! `no_std + alloc` by default; the `std` feature (on by default) brings in
//! the real-thread [`scheduler::cached::CachedScheduler`], which genuinely
//! needs OS threads and cannot be expressed over bare `alloc`.
#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

pub mod deferred;
pub mod demand;
pub mod error;
pub mod fusion;
pub mod join;
pub mod observe_on;
pub mod reduce_full;
pub mod scheduler;
pub mod subscriber;
pub mod testing;
pub mod zip;

pub use demand::Demand;
pub use error::FlowError;
pub use fusion::{FusionMode, QueueSubscription};
pub use subscriber::{ConditionalSubscriber, Subscriber, Subscription};
