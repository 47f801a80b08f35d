//! Offline-first meal tracking with ETag-based optimistic concurrency.
//!
//! - [`db`]: SQLite-backed key/value cache of meals, conflict shadows and pages
//! - [`sync`]: coordinator, offline replay, push channel and pagination
//! - [`server`]: reference HTTP/WebSocket service
//! - [`photo`]: photo attachments keyed by user and meal

pub mod config;
pub mod db;
pub mod models;
pub mod photo;
pub mod server;
pub mod sync;
