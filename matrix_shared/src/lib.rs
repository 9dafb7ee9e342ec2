//! `matrix_shared`
//!
//! Shared libraries used by the display host and the player client.
//!
//! Design goals:
//! - Deterministic and modular where practical.
//! - Clear separation of concerns (config, render abstraction, wire protocol).
//! - No `unsafe`.

pub mod config;
pub mod net;
pub mod render;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::net::*;
    pub use crate::render::*;
}
