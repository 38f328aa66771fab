use std::io;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("unsupported stream: {0}")]
    Unsupported(String),
    #[error("decoder cannot seek backwards")]
    SeekUnsupported,
}

impl From<claxon::Error> for CodecError {
    fn from(err: claxon::Error) -> Self {
        CodecError::Decode(err.to_string())
    }
}
