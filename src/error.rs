// src/error.rs

//! Unified error type for the fabrik crate.
//!
//! The search loop interprets these by policy: decode and grid errors are
//! bugs and abort the run, oracle failures skip the offending neighbor, and
//! operator failures trigger a backtrack to long-term memory.

use thiserror::Error;

/// Top-level error type for the fabrik crate.
#[derive(Error, Debug)]
pub enum Error {
    /// A malformed layout string was handed to the decoder.
    #[error("Layout decode error: {0}")]
    DecodeError(String),

    /// The link structure does not admit a consistent grid embedding.
    #[error("Grid embedding error: {0}")]
    GridError(String),

    /// A cascade in `push_underneath` exceeded the eviction depth cap.
    #[error("Eviction cascade exceeded depth {0}")]
    CascadeError(usize),

    /// A neighbor function needed an active-work entry that the oracle
    /// never reported for this module.
    #[error("No active-work entry for module '{0}'")]
    MissingActiveWork(String),

    /// The verifier reported that the reachability property does not hold.
    #[error("Verifier could not satisfy the reachability property")]
    Unsatisfied,

    /// The verifier trace could not be parsed.
    #[error("Trace parse error: {0}")]
    TraceError(String),

    /// The verifier binary could not be run to completion.
    #[error("Verifier error: {0}")]
    VerifierError(String),

    /// The seed generator produced no usable initial layout.
    #[error("Seed generation error: {0}")]
    SeedError(String),

    /// Invalid plant description.
    #[error("Config error: {0}")]
    ConfigError(String),

    /// An I/O error (template missing, temp dir not writable, etc.).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// True for error kinds the controller answers with a backtrack rather
    /// than a skip or an abort.
    pub fn is_backtrack(&self) -> bool {
        matches!(self, Error::CascadeError(_) | Error::MissingActiveWork(_))
    }

    /// True for error kinds that only disqualify a single neighbor.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            Error::Unsatisfied | Error::TraceError(_) | Error::VerifierError(_)
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
