//! Routing registry: a control-plane service for advertising, listing, and
//! observing HTTP and TCP route-to-backend mappings for a reverse-proxy fleet.
//!
//! The HTTP surface (module [api]) is built on a small macro-free router with
//! Axum-like extractor ergonomics ([router], [extractors], [responder]). The
//! domain layer ([model], [validate], [store], [hub]) is transport-agnostic
//! and backed by a pluggable key/value substrate ([kv]) so the same store
//! logic runs against an embedded in-memory backend or a real etcd cluster.
//! [sync] is the client-side library fleet members use to mirror the
//! registry into a local lookup table.
//!
//! # Compatibility
//! - Runtime: `tokio`
//! - HTTP: `hyper` 1.x

/// HTTP request and response body handling utilities.
pub mod body;

/// Byte buffer wrapper used by request/response bodies and SSE frames.
pub mod bytes;

/// Request data extraction utilities for parsing query params, JSON, and more.
pub mod extractors;

/// Request handler traits and implementations.
mod handler;

/// Middleware for processing requests and responses in a pipeline.
pub mod middleware;

/// Response generation utilities and traits.
pub mod responder;

/// Route definition and matching logic.
mod route;

/// Request routing and dispatch functionality.
pub mod router;

/// HTTP server implementation and configuration.
mod server;

/// Server-Sent Events (SSE) support for real-time communication.
pub mod sse;

/// Per-router application state injection.
pub mod state;

/// Core type definitions used throughout the framework.
pub mod types;

/// Structured logging setup.
pub mod tracing_setup;

/// Bearer-token scope authentication: the pluggable `TokenValidator` contract
/// and the middleware that gates the HTTP surface with it.
pub mod auth;

/// Wire/domain data model: routes, TCP route mappings, router groups.
pub mod model;

/// Typed error taxonomy shared by the store, validator, and HTTP surface.
pub mod error;

/// Key/value substrate abstraction (etcd-backed and in-memory implementations).
pub mod kv;

/// Pure validation rules for routes, TCP route mappings, and router groups.
pub mod validate;

/// CAS-based stores for routes and router groups, layered over [kv].
pub mod store;

/// Change-feed fan-out: one upstream watch per route family, many subscribers.
pub mod hub;

/// The `/routing/v1` HTTP surface: route/TCP-route/router-group CRUD and SSE feeds.
pub mod api;

/// Self-registration of the registry's own API route with the registry itself.
pub mod registration;

/// CLI flags and config file loading.
pub mod config;

/// Client-side library: snapshot + SSE reconciliation into a local routing trie.
pub mod sync;

pub use bytes::TakoBytes;
pub use http::{Method, StatusCode, header};

/// Starts the HTTP server with the given listener and router.
pub use server::serve;

/// Starts the HTTP server, stopping the accept loop once a shutdown future resolves.
pub use server::serve_with_shutdown;
