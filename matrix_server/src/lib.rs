//! `matrix_server`
//!
//! Display-host systems:
//! - Player rendezvous over TCP (name handshake, quorum)
//! - Fixed-tick frame scheduler with deadline-bounded input reads
//! - Game programs (pong, slither, 2048) drawing on a shared surface
//! - Program supervision and console-driven switching

pub mod games;
pub mod rendezvous;
pub mod scheduler;
pub mod supervisor;

pub use rendezvous::RendezvousServer;
pub use scheduler::FrameScheduler;
pub use supervisor::ProgramHost;
