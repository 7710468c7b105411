//! Error types for the commerce store.
//!
//! # Design
//! Every non-2xx response from PostgREST lands in `Http` with the raw status
//! code and body text. A single-row lookup that matches nothing is not an
//! error at all: it surfaces as `Ok(None)` from the store.
//!
//! A shape failure on a read is `Deserialization`; on an accepted write it is
//! `UnreadableRepresentation`, because the write has already taken effect.

use thiserror::Error;

/// Errors returned by `PostgrestClient` parse methods and `CommerceStore`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store answered with a status outside 2xx.
    #[error("PostgREST API error: {status} {body}")]
    Http { status: u16, body: String },

    /// The request never produced a response (DNS, connect, TLS, I/O).
    #[error("network error: {0}")]
    Network(String),

    /// A parent write came back without a generated identifier.
    #[error("failed to create {resource}: response carried no generated id")]
    MissingId { resource: &'static str },

    /// The input was rejected before anything was sent.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A write was accepted (2xx) but its representation could not be read.
    /// The row may already exist; `body` is kept for reconciliation.
    #[error("{resource} was written but its representation is unreadable: {reason}")]
    UnreadableRepresentation {
        resource: &'static str,
        body: String,
        reason: String,
    },

    /// The response body did not match the expected row shape.
    #[error("deserialization failed: {0}")]
    Deserialization(String),
}

impl StoreError {
    /// HTTP status of a transport error, if this is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            StoreError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
