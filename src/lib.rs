//! Group-linked smart pointers.
//!
//! Where `Rc` clones share an immutable view of one allocation, the handles
//! in this crate share a mutable binding: every clone belongs to a group,
//! and rebinding, destroying or releasing the referent through one member is
//! observed by all of them at once. The idea comes from object-broker style
//! designs where many parties hold a ticket to one resource and any party
//! may revoke or replace it for everyone.
//!
//! The crate provides the strong/weak pair [`Owner`] and [`Weak`] with
//! guarded access, the self-referencing [`Anchored`] base that hands out
//! proxies to itself, and the head-migrating [`Linked`] variant where group
//! membership itself is explicit. Concurrency is a type parameter: the
//! [`policy`] module supplies a single-threaded baseline, an atomic
//! count-only drop-in, and a fully locked policy behind the `shared`
//! feature.
//!
//! Handles keep comparing and hashing by the referent's last-known address
//! after it dies, so they stay findable in hash-keyed collections; liveness
//! is a separate question answered by `alive`/`upgrade`/guard acquisition.

mod anchor;
mod deleter;
mod linked;
mod pointers;
pub mod policy;
mod state;
pub mod stats;

#[cfg(test)]
mod tests;

pub use anchor::Anchored;
pub use deleter::Deleter;
pub use linked::Linked;
pub use pointers::{Owner, ReadGuard, Weak, WriteGuard};
pub use policy::{Counted, Local, Policy};

#[cfg(feature = "shared")]
pub use policy::Shared;
