//! Library exports for the `docsite` CLI and integration tests.
/// Application directory resolution.
pub mod app_dirs;
pub(crate) mod atomic_write;
/// `config.toml` loading and saving.
pub mod config;
pub(crate) mod http_client;
/// Logging setup.
pub mod logging;
/// Notifications inbox client.
pub mod notifications;
/// Offline content updates.
pub mod offline;
/// Locale negotiation and redirects.
pub mod server;
