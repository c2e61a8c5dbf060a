//! Side-effecting adapters: filesystem, processes, network, config.

pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod files;
pub mod planner;
pub mod sandbox;
pub mod trace;
