//! Caliban - first-party, cross-domain session attribution collector
//!
//! A browser tracker reports page views to `/collect`; the attribution engine
//! merges each request into a durable session record held in a key-value store.
//!
//! # Architecture
//! - `tracking`: parameter classification, session records and the attribution engine
//! - `storage`: session store backends (memory, Redis)
//! - `api`: HTTP collector and health endpoints
//! - `config`: Configuration management
//! - `runtime`: Application lifecycle and execution modes
//! - `system`: Logging initialization

pub mod api;
pub mod cli;
pub mod config;
pub mod errors;
pub mod runtime;
pub mod storage;
pub mod system;
pub mod tracking;
pub mod utils;
