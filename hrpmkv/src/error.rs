use std::io;

#[derive(Debug, thiserror::Error)]
pub enum MkvError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed container: {0}")]
    Malformed(String),
    #[error("unsupported stream: {0}")]
    Unsupported(String),
    #[error("codec error: {0}")]
    Decode(String),
}

impl From<opus::Error> for MkvError {
    fn from(err: opus::Error) -> Self {
        MkvError::Decode(err.to_string())
    }
}
