//! Session-oriented client for Dialogflow voice-intent recognition.
//!
//! Built for telephony hosts: push µ-law audio from a call into a
//! [`Session`], or trigger an intent with a named event, and read the
//! outcome back as a flat, ordered list of `(slot, value, score)` records.

pub mod config;
pub mod core;

// Re-export commonly used items for convenience
pub use config::ClientConfig;
pub use crate::core::*;
