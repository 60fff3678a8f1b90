//! Tavla - forum node: message manager and task engine over redb.

pub mod config;
pub mod node;

pub use config::{Config, ConfigError};
pub use node::{Node, NodeError, NodeManager, NodeTaskEngine};
