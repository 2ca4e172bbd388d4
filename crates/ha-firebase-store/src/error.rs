use ha_config::ConfigError;
use ha_document_store::StoreError;
use ha_entity_filter::FilterError;
use ha_remote::RemoteError;
use std::path::PathBuf;
use thiserror::Error;

/// Why the integration could not be set up
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("credentials file {0} does not exist")]
    CredentialsNotFound(PathBuf),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// A command batch stopped at its first failure
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("service call for {entity_id} failed: {source}")]
    Call {
        entity_id: String,
        #[source]
        source: RemoteError,
    },

    #[error("clearing trigger on {entity_id} failed: {source}")]
    Clear {
        entity_id: String,
        #[source]
        source: StoreError,
    },
}
