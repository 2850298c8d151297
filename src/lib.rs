//! Category-filtered product queries served through interchangeable caching strategies.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
