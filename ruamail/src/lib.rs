//! The `ruamail` command: configuration discovery, command line handling
//! and the wiring of the delivery pipeline.

pub mod cli;
pub mod config;
pub mod controller;

pub use cli::{Cli, Command};
pub use config::Config;
pub use controller::Controller;
