//! Core types and trait definitions for the registry sync pipeline.
//!
//! This crate is deliberately free of database and runtime dependencies.
//! It holds the domain model, the pure resolution functions the pipeline is
//! built from, and the [`store::RegistryStore`] abstraction that storage
//! backends implement.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod audit;
pub mod classify;
pub mod entity;
pub mod error;
pub mod hierarchy;
pub mod identity;
pub mod normalize;
pub mod snapshot;
pub mod source;
pub mod store;

pub use error::{Error, Result};
