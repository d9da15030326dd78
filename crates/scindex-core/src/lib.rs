//! Core types and trait definitions for the scindex contract-state index.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! All other crates depend on it.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod chain;
pub mod contract;
pub mod error;
pub mod filter;
pub mod layout;
pub mod ranges;
pub mod settings;
pub mod store;
pub mod variable;

pub use error::{Error, Result};
