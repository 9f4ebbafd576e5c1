// Library root: exposes the modules for integration tests.
// The binary entry point is src/main.rs.

pub mod app;
pub mod bbr;
pub mod config;
pub mod error;
pub mod guard;
pub mod identity;
pub mod logger;
pub mod menu;
pub mod node;
pub mod openrc;
pub mod paths;
pub mod release;
pub mod system;
