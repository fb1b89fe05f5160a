//! fleetctl-http: axum transport hosting the fleetctl control plane.

pub mod routes;
pub mod server;

pub use server::{serve, ServerConfig};
