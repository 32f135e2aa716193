//! Embedded broker integration tests.
//!
//! Several modules connected to one broker, exercised through the public API
//! only. Run with: cargo test --test embedded_integration

mod commands;
mod common;
mod queries;
mod replication;
mod streams;
