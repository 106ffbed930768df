//! `VaultMesh` node agent.
//!
//! Wires the core library and storage backend into a running Axum server.
//! Local administration lives under `/v1/vaults` and `/v1/gestalts`; remote
//! nodes call `/v1/peer` to check permissions, scan and fetch vaults.

pub mod client;
pub mod config;
pub mod error;
pub mod keys;
pub mod middleware;
pub mod routes;
pub mod state;
