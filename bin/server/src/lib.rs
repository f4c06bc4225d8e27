//! The flowbot daemon.
//!
//! Wires the flow engine, durable queue, poller and dispatcher over an
//! in-process store, registers the built-in `dev` integration and loads
//! flows from an optional seed file.

pub mod app;
pub mod config;
pub mod dev;
pub mod error;
pub mod seed;
