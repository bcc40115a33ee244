//! Configuration for reel workers.
//!
//! Holds the serde-backed configuration structures shared by every stage of the pipeline and
//! the hierarchical loader used by the worker binary.

mod environment;
pub mod load;
pub mod shared;

pub use environment::{Environment, UnknownEnvironment};
pub use load::{Config, LoadConfigError, load_config};
