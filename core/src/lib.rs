//! Review and return persistence over a PostgREST endpoint.
//!
//! # Overview
//! Product reviews and order return requests are stored as parent rows with
//! child rows (images, return items) behind a PostgREST HTTP interface.
//! `PostgrestClient` builds `HttpRequest` values and parses `HttpResponse`
//! values without touching the network; a `Transport` executes them;
//! `CommerceStore` sequences the calls of each logical operation.
//!
//! # Design
//! - `PostgrestClient` is stateless: it holds the normalized base URL and an
//!   optional bearer credential.
//! - Each operation is split into `build_*` (produces a request) and
//!   `parse_*` (consumes a response), so the I/O boundary is explicit and
//!   every response is narrowed to a typed row at that boundary.
//! - Composite writes report `WriteOutcome`, which keeps "parent committed,
//!   children failed" distinct from full success and from outright failure.
//! - Row types are defined independently from the mock-postgrest crate;
//!   integration tests catch schema drift.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod store;
pub mod transport;
pub mod types;

pub use client::PostgrestClient;
pub use config::StoreConfig;
pub use error::StoreError;
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use store::{ChildBatch, CommerceStore, WriteOutcome};
pub use transport::{Transport, UreqTransport};
pub use types::{
    ImageRow, Page, Rating, ReturnDetail, ReturnInput, ReturnItemInput, ReturnItemRow, ReturnRow,
    ReturnStatus, ReviewInput, ReviewRow, ReviewStats, ReviewWithImages, RowId,
};
