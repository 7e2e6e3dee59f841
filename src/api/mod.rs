//! HTTP surface of the EMR backend.
//!
//! `routes` maps the versioned URL table onto `handlers`; `middleware`
//! provides the request extractors shared by every handler.

pub mod handlers;
pub mod middleware;
pub mod routes;

pub use routes::configure;
