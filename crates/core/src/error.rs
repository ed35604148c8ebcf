use thiserror::Error;
use uuid::Uuid;

pub type OutreachResult<T> = Result<T, OutreachError>;

#[derive(Error, Debug)]
pub enum OutreachError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Transient dispatch failure: {0}")]
    TransientDispatch(String),

    #[error("Cycle detected: link {link_id} in sequence {sequence_id} routes back into campaign {campaign_id}")]
    CycleDetected {
        sequence_id: Uuid,
        link_id: Uuid,
        campaign_id: Uuid,
    },

    #[error("Campaign {0} is stuck and requires recovery")]
    StuckCampaign(Uuid),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
