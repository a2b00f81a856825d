//! ongkir library
//!
//! Cached geography lookup and shipping rate resolution for Indonesian
//! addresses. The modules are exposed for the binary and integration tests.

pub mod cache;
pub mod cli;
pub mod config;
pub mod data;
