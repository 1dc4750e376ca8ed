use std::time::Duration;

use nifitest_core::canvas::NodeKind;
use nifitest_core::error::CoreError;
use nifitest_nifi::CanvasError;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// A public call was made with arguments that can never succeed.
    /// Raised before anything on the canvas is touched.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{kind} {name} not found in {group}")]
    NotFound {
        kind: NodeKind,
        name: String,
        group: String,
    },

    #[error("Found {count} {kind} components named {name} in {group}")]
    Ambiguous {
        kind: NodeKind,
        name: String,
        group: String,
        count: usize,
    },

    /// A canvas create/read/update/delete call failed.
    #[error("Canvas call failed: {0}")]
    ExternalCallFailed(#[from] CanvasError),

    #[error("Test request timed out after {0:?}")]
    RequestTimeout(Duration),

    #[error("Test request returned HTTP {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// Transport failure other than a timeout.
    #[error("Test request failed: {0}")]
    Probe(#[source] reqwest::Error),

    #[error("Malformed test response: {0}")]
    MalformedResponse(String),
}

impl From<CoreError> for HarnessError {
    fn from(err: CoreError) -> Self {
        HarnessError::ExternalCallFailed(CanvasError::Model(err))
    }
}
