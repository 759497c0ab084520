pub mod acquisition;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod repository;
pub mod segmenter;
pub mod service;

pub use config::Config;
pub use error::{Error, Result};
