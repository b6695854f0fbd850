//! Pattern-routed page resolution with a shared page directory, a
//! descriptor-keyed render cache and cross-worker invalidation.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
