//! `TaskFlow` client library.
//!
//! Keeps a local replica of one owner's board in sync with the
//! authoritative server: mutations apply optimistically through the
//! [`reconciler::Reconciler`], travel over a [`connection::Connection`],
//! and converge when replies and pushed events come back.

pub mod board;
pub mod connection;
pub mod reconciler;

pub use board::LocalBoard;
pub use connection::{ClientError, Connection};
pub use reconciler::{BoardError, Reconcile, Reconciler};
