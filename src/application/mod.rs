//! Application services between the HTTP surface and the cache and persistence adapters.

pub mod catalog;
pub mod error;
pub mod repos;
