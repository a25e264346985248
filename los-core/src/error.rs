use thiserror::Error;

use crate::{
    broker::BrokerError, compute::ComputeError, package::PackageError, remote::RemoteError,
    status::StatusError,
};

/// Top-level failure of a pipeline run. Each component raises its own typed
/// error; the orchestrator only converges them.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("computation error: {0}")]
    Compute(#[from] ComputeError),

    #[error("packaging error: {0}")]
    Package(#[from] PackageError),

    #[error("remote sync error: {0}")]
    Remote(#[from] RemoteError),

    #[error("status store error: {0}")]
    Status(#[from] StatusError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
