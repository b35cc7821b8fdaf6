#![recursion_limit = "384"]
// Used for the select! macros

pub mod api;
pub mod config;
pub mod ctl;
pub mod handler;
pub mod rib;
pub mod session;
pub mod utils;
pub mod wire;

pub use handler::{serve, EXIT_CONFIG, EXIT_OK, EXIT_RUNTIME};
