//! Stage coordination for the PageWatch snapshot pipeline.
//!
//! The pipeline is three asynchronous consumers connected by queues:
//! Fetch → Parse → Change-Detection. This crate provides:
//! - [`message`] — the typed message contracts and delivery envelope
//! - [`broker`] — the [`Broker`] trait plus the in-process [`MemoryBroker`]
//! - [`stages`] — the three handlers and the [`Stages::drive`] loop
//! - [`run`] — deadline and failure-reason helpers
//!
//! Delivery is at-least-once; every handler is idempotent by construction
//! (run-status gate, write-once snapshot and change rows, guarded
//! finalization).

pub mod broker;
pub mod message;
pub mod run;
pub mod stages;

pub use broker::{Broker, Disposition, MemoryBroker};
pub use message::{Envelope, Message, Topic};
pub use stages::Stages;
