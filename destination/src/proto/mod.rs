//! Wire types for the proxy-facing destination API
//!
//! Hand-maintained prost message and tonic service definitions for the
//! `io.trellis.proxy.destination` package. The module mirrors the shape
//! generated tonic code takes so the server glue composes with
//! `tonic::transport::Server` like any generated service.

mod destination;

pub use destination::*;
