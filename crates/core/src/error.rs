use crate::canvas::NodeKind;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{kind} {name} is not connectable")]
    NotConnectable { kind: NodeKind, name: String },

    #[error("{0} has no parent process group")]
    Orphan(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Missing attribute: {0}")]
    MissingAttribute(&'static str),
}
