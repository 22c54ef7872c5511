//! # relayq
//!
//! Postgres-backed work-queue engine: persist units of work, let one or
//! more worker processes atomically claim, execute, retry, and recover
//! them. One generic engine, instantiated twice — the notification
//! delivery queue and the AI-workflow command queue.
//!
//! The engine never interprets payloads and never performs side effects
//! itself; transports and agents plug in through the [`engine::Executor`]
//! and [`engine::CredentialResolver`] seams.

pub mod clock;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod kind;
pub mod kinds;
pub mod model;
pub mod policy;
pub mod store;
pub mod telemetry;
