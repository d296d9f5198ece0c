// Copyright 2024 PaxLight Project Authors. Licensed under Apache-2.0.

use thiserror::Error;

/// Errors raised by the row-group format engine.
///
/// Every variant is fatal for the current file or split. The engine fails
/// fast and precisely; re-opening a split belongs to the orchestration layer
/// above this crate.
#[derive(Error, Debug)]
pub enum FormatError {
    /// On-disk bytes do not match the format: sync-marker or magic-number
    /// mismatch, value-type mismatch against the configuration, decompressed
    /// length mismatch, malformed header section.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// Invalid configuration, detected before any I/O.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Write-side data error, e.g. a missing field without lenient mode.
    #[error("data error: {0}")]
    Data(String),

    /// Codec-level failure, possibly recorded on a compression worker and
    /// surfaced on the writer thread.
    #[error("compression failed: {0}")]
    Compression(String),

    /// The stream ended in the middle of a row-group header. End of stream
    /// exactly at a row-group boundary is not an error and never surfaces
    /// through this variant.
    #[error("unexpected end of stream: {0}")]
    UnexpectedEof(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FormatError {
    pub fn corrupt(message: impl ToString) -> Self {
        FormatError::Corrupt(message.to_string())
    }

    pub fn config(message: impl ToString) -> Self {
        FormatError::Config(message.to_string())
    }

    pub fn data(message: impl ToString) -> Self {
        FormatError::Data(message.to_string())
    }

    pub fn compression(message: impl ToString) -> Self {
        FormatError::Compression(message.to_string())
    }

    pub fn unexpected_eof(message: impl ToString) -> Self {
        FormatError::UnexpectedEof(message.to_string())
    }
}

pub type FormatResult<T> = std::result::Result<T, FormatError>;
