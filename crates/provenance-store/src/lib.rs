#![forbid(unsafe_code)]

//! Storage for operation logs shipped out of an execution.
//!
//! A [`LogStore`] receives drained logs (see
//! [`TrackingContext::take_logs`](provenance_engine::TrackingContext::take_logs)), persists
//! them as JSON and answers [`TraverseRequest`]s by log id, running the same traversal as the
//! in-memory arena.

mod error;
mod store;

pub use crate::error::StoreError;
pub use crate::store::{
    LogStore, StoreOptions, TraversalStepRecord, TraverseRequest, TraverseResponse,
};
