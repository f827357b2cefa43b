//! Error types and result handling for sql-tap.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! Only structural problems and provider failures are represented here.
//! Recoverable inconsistencies (a selected table that no longer exists, an
//! unsupported column) are logged as warnings and never become an `Error`.
//!
//! # Example
//!
//! ```rust
//! use sql_tap::{Error, Result};
//!
//! fn load_catalog() -> Result<()> {
//!     Err(Error::CorruptCatalog {
//!         message: "Unknown inclusion bogus".to_string(),
//!     })
//! }
//!
//! match load_catalog() {
//!     Ok(()) => println!("Loaded"),
//!     Err(Error::CorruptCatalog { message }) => eprintln!("Corrupt catalog: {}", message),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for sql-tap operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error, typically from an invalid file or environment variable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// PostgreSQL client or protocol error.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// JSON (de)serialization error for catalogs, state or messages.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error, from catalog/state files or the output stream.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection could not be established.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The input catalog is structurally invalid. Always fatal.
    #[error("Corrupt catalog: {message}")]
    CorruptCatalog {
        /// Description of what was invalid
        message: String,
    },

    /// Persisted state could not be interpreted.
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Description of what was invalid
        message: String,
    },

    /// A metadata or row provider failed while serving a request.
    #[error("Provider error: {message}")]
    Provider {
        /// Description of the failure, including the statement when known
        message: String,
    },

    /// A value could not be converted between the database and the
    /// output representation.
    #[error("Conversion error: {message}")]
    Conversion {
        /// Description of the value that failed to convert
        message: String,
    },
}

/// A convenient Result type alias for sql-tap operations.
///
/// This is equivalent to `std::result::Result<T, sql_tap::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
