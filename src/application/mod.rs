//! Application services: the page pipeline and module lifecycle.

pub mod error;
pub mod modules;
pub mod render;
pub mod repos;
pub mod wcm;
