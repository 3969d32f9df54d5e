#![recursion_limit = "256"]

pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod embedding;
pub mod error;
pub mod inference;
pub mod metrics;
pub mod model;
pub mod projection;
pub mod recurrent;
pub mod sampling;
pub mod training;
pub mod vocabulary;

pub use error::{LmError, Result};
