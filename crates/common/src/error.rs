//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid device spec '{0}', expected 'vvvv:pppp' or 'vvvv:' in lowercase hex")]
    InvalidDeviceSpec(String),

    #[error("Invalid VM binding '{0}', expected 'vmid:bus-port' (e.g. '100:5-2.1.1')")]
    InvalidBinding(String),

    #[error("Invalid VM id '{0}'")]
    InvalidVmId(String),

    #[error("Invalid bus position '{0}', expected 'bus-port' (e.g. '5-2.1.1')")]
    InvalidPosition(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
