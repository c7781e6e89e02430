//! Domain types: readings, cached state, settings and the storage contract.

pub mod cache;
pub mod models;
pub mod settings;
pub mod storage;
