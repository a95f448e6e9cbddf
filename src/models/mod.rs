//! Core data models of the gateway.
//!
//! Keys, object snapshots and byte ranges flow through every controller;
//! archive and upload models describe requests and their products.

pub mod archive;
pub mod key;
pub mod object;
pub mod range;
pub mod upload;
