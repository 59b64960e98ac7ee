use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid {kind} transition: {from} -> {to}")]
    InvalidTransition {
        kind: &'static str,
        from: String,
        to: String,
    },

    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}
