pub mod cli;
pub mod command;
pub mod config;
pub mod error;
pub mod exec;
pub mod forge;
pub mod juju;
pub mod microceph;
pub mod state;
pub mod store;
pub mod terraform;
pub mod testflinger;
pub mod vmaas;

pub use cli::{Args, Command};
pub use config::CephtoolsConfig;
pub use error::{CephtoolsError, Result};

#[cfg(test)]
pub mod test_helpers;
