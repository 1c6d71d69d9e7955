//! A content-addressed store for versioned binary packages: objects are
//! deduplicated by hash, manifests describe which objects make up which
//! version of a package, and a client-side pipeline moves folders to and
//! from either an in-process store or a remote one.
//!
//! See the [`store`] module for the on-disk layout and [`publish`] for the
//! upload/download pipeline built on top of it.

pub mod auth;
pub mod batch;
pub mod compression;
pub mod concurrently;
pub mod config;
pub mod counters;
pub mod error;
pub mod framing;
pub mod hashing;
pub mod limits;
pub mod manifest;
pub mod manifest_store;
pub mod object_store;
pub mod publish;
pub mod store;
pub mod transport;
pub mod validate;

// CLI stuff:
pub mod ui;
