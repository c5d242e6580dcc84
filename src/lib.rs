// ===============================
// src/lib.rs
// ===============================
pub mod domain;
pub mod config;
pub mod metrics;
pub mod codec;
pub mod store;
pub mod strategy;
pub mod execution;
pub mod risk;
pub mod analytics;
pub mod engine;
pub mod feed;
pub mod recorder;
