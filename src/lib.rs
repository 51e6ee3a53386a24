pub mod changelog;
pub mod cli;
pub mod config;
pub mod contract;
pub mod diagnostics;
pub mod document;
pub mod error;
pub mod fetch;
pub mod generate;
pub mod github;
pub mod line;
pub mod link;
pub mod load_config;
pub mod manifest;
pub mod paths;
pub mod registry;
pub mod render;

pub use cli::{run, Cli, Commands};
pub use generate::{generate, GenerateReport};
pub use load_config::load_config;
