//! Deferred emission primitives.
//!
//! These three types share a family resemblance — each reconciles demand
//! and production under CAS-only state transitions — but they are kept as
//! independent structs rather than an inheritance hierarchy; the shared
//! shape is bookkeeping convention, not a type relationship worth modelling.
pub mod multi;
pub mod scalar;
pub mod subscription;

pub use multi::MultiSubscription;
pub use scalar::DeferredScalar;
pub use subscription::DeferredSubscription;
