pub mod auth_client;
pub mod config;
pub mod credential_store;
pub mod error;
pub mod event_stream;
pub mod logging;
pub mod realtime_client;
pub mod remote_store;
pub mod snapshot_tree;
