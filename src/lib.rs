//! CvdFlow Library
//!
//! Cumulative volume delta tracking for a single futures symbol

pub mod analysis;
pub mod config;
pub mod engine;
pub mod feed;
pub mod persistence;
pub mod server;
pub mod types;
