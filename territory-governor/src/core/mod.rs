/*!
Core architecture modules for the per-world reconciliation pipeline
*/

pub mod adapter;
pub mod census;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod governor;
pub mod outbound;
pub mod output_plugins;
pub mod poll;
pub mod signal;
pub mod stats;
pub mod store;
pub mod zone_lock;
