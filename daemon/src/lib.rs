pub mod broadcaster;
pub mod columns;
pub mod config;
pub mod enricher;
pub mod error;
pub mod handler;
pub mod monitor;
pub mod protocol;
pub mod reader;
pub mod snapshot;
pub mod socket;
