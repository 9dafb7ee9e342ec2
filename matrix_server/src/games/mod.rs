pub mod game2048;
pub mod pong;
pub mod slither;
