//! `TaskFlow` sync server library.
//!
//! Exposes the server for use in tests and embedding. The server holds
//! the authoritative ordered task state per owner, applies mutations
//! under a per-owner writer lock, and fans committed changes out to
//! that owner's connected clients.

pub mod auth;
pub mod config;
pub mod hub;
pub mod ordering;
pub mod server;
pub mod store;
