//! Shared domain types for the tagmon fleet.
//!
//! Everything that crosses a crate boundary lives here: deviation kinds,
//! quality classification, alert records, cycle documents, and the status
//! snapshot shapes served by the HTTP API.

pub mod id;
pub mod types;
