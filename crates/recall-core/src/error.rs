//! Core error types for recall-core.
//!
//! These cover decoding failures at the sync boundary, where loosely-typed
//! JSON becomes the tagged row and operation types.

use thiserror::Error;

/// Errors produced while decoding or validating data model values.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A wire operation named a table this client does not know.
    #[error("unknown table: '{name}'")]
    UnknownTable { name: String },

    /// A table that cannot carry the requested kind of operation.
    #[error("table '{table}' cannot be used for {context}")]
    WrongTable { table: String, context: &'static str },

    #[error("unknown range field: '{name}'")]
    UnknownField { name: String },

    /// A row payload did not match the shape of its table.
    #[error("malformed {table} row: {reason}")]
    MalformedRow { table: String, reason: String },

    /// A review response outside the ordinal grading scale.
    #[error("invalid review response: {value}")]
    InvalidResponse { value: u8 },

    /// A range deletion over a field its table does not carry.
    #[error("table '{table}' has no field '{field}' to range over")]
    InvalidRangeField { table: String, field: String },
}
