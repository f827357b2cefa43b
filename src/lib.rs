pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod output;
pub mod provider;
pub mod replicator;
pub mod state;
pub mod sync;

pub use config::Config;
pub use error::{Error, Result};
pub use replicator::Replicator;
