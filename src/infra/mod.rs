//! Infrastructure adapters and runtime bootstrap.

pub mod app;
pub mod content;
pub mod error;
pub mod files;
pub mod http;
pub mod modules;
pub mod render;
pub mod store;
pub mod telemetry;
