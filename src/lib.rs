pub mod bloom;
pub mod bundle;
pub mod cli;
pub mod config;
pub mod context;
pub mod cursor;
pub mod db;
pub mod error;
pub mod git_commits;
pub mod memory;
pub mod model;
pub mod observe;
pub mod resolver;
pub mod rpc;
pub mod store;
pub mod util;

pub use context::QueryContext;
pub use error::{Error, Result};
