pub use chess_core;

pub mod config;
pub mod error;
pub mod pom;
pub mod session;
pub mod smoother;
pub mod stockfish;
pub mod uci;
pub mod variations;
