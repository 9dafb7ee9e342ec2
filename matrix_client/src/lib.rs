//! `matrix_client`
//!
//! Minimal player client:
//! - TCP connect plus name handshake against the display host
//! - Forwards raw stdin bytes (arrow escapes, zsqd boosts) to the server

pub mod client;

pub use client::GameClient;
