//! Core domain + application logic for the Snapshot proposal notifier bot.
//!
//! This crate is framework-agnostic. Telegram and the Snapshot hub live behind
//! ports (traits) implemented in adapter crates.

pub mod commands;
pub mod config;
pub mod dialogue;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod notifier;
pub mod ports;
pub mod scheduler;
pub mod store;

#[cfg(test)]
mod testing;

pub use errors::{Error, FetchError, Result};
