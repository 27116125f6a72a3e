//! Reconciles free-text reservation notifications into the current set of
//! booked time slots and replays that state idempotently into a calendar
//! and a webhook receiver.
//!
//! The pipeline: raw messages are extracted into events, classified to an
//! owning store, grouped into slots, resolved last-write-wins by arrival
//! time, admission-checked against per-store capacity, and synchronized to
//! the sinks. Every stage except the sinks is a pure function, so a pass
//! can be re-run from scratch after any interruption.

pub mod admission;
pub mod classify;
pub mod config;
pub mod error;
pub mod event;
pub mod extract;
pub mod resolve;
pub mod runner;
pub mod sinks;
pub mod source;
pub mod store;
