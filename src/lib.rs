//! preforkd - minimal pre-forking HTTP application server
//!
//! Core library: request parsing, the application bridge, the readiness
//! reactor and the worker pool.

pub mod app;
pub mod config;
pub mod http;
pub mod server;
pub mod signal;
