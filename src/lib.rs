//! wikisync - incremental synchronization engine for a local wiki mirror.
//!
//! Detects what changed on the origin since the last successful run, fetches
//! only the delta, applies it per page and resumes after interruption.

// Model types use `from_str` methods that return Option<Self>,
// not Result<Self, Error> as std::str::FromStr requires.
#![allow(clippy::should_implement_trait)]

pub mod cli;
pub mod config;
pub mod migrations;
pub mod models;
pub mod origin;
pub mod repository;
pub mod schema;
pub mod storage;
pub mod sync;
