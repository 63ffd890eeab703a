//! Network plumbing shared by the controller and the host.
//!
//! - `types`: request/response values as seen by an intercepting controller
//! - `form`: url-encoded form bodies with repeated fields
//! - `client`: the `Network` seam and its reqwest implementation

mod client;
mod form;
mod types;

pub use client::{HttpNetwork, Network, NetworkError};
pub use form::{FieldMap, FieldValue};
pub use types::{Request, RequestMode, Response, FORM_CONTENT_TYPE};
