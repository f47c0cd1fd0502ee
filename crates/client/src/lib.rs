//! `procura-client`
//!
//! **Responsibility:** keep one tab's authenticated session and active
//! business unit consistent with the shared session store and with every
//! other tab that reads it.
//!
//! This crate provides:
//! - The session synchronizer (hydrate, login, logout, tenant switch)
//! - A background listener for other tabs' storage writes
//! - The HTTP client for the session endpoints
//! - A tenant-scoped query cache

pub mod api;
pub mod config;
pub mod cross_tab;
pub mod navigator;
pub mod query_cache;
pub mod synchronizer;

pub use api::{ApiError, AuthApi, HttpAuthApi};
pub use config::{ClientConfig, ConfigError, StorageConfig, SyncSettings};
pub use cross_tab::{CrossTabListener, ListenerHandle};
pub use navigator::{Navigation, Navigator, RecordingNavigator, TracingNavigator};
pub use query_cache::QueryCache;
pub use synchronizer::SessionSynchronizer;
