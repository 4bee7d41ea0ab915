pub mod api;
pub mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod estimation;
pub mod monitor;
pub mod serial;
pub mod state;
pub mod sync;
pub mod telemetry;
pub mod ups;
