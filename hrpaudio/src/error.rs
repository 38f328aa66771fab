use std::io;

use crate::sink::SinkError;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("could not open sink: {0}")]
    SinkOpenFailed(String),
    #[error("unrecoverable sink failure: {0}")]
    SinkFatal(String),
    #[error("short read from source")]
    IoShortRead,
    #[error("malformed container: {0}")]
    DemuxMalformed(String),
    #[error("invalid ring buffer bounds")]
    InvalidSize,
    #[error("ring buffer limit exceeded")]
    WouldExceedMax,
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<SinkError> for AudioError {
    fn from(err: SinkError) -> Self {
        AudioError::SinkFatal(err.to_string())
    }
}

impl From<hrpcodec::CodecError> for AudioError {
    fn from(err: hrpcodec::CodecError) -> Self {
        match err {
            hrpcodec::CodecError::Io(e) => AudioError::Io(e),
            hrpcodec::CodecError::Unsupported(s) => AudioError::UnsupportedFormat(s),
            other => AudioError::Decode(other.to_string()),
        }
    }
}

impl From<hrpmkv::MkvError> for AudioError {
    fn from(err: hrpmkv::MkvError) -> Self {
        match err {
            hrpmkv::MkvError::Io(e) => AudioError::Io(e),
            hrpmkv::MkvError::Malformed(s) => AudioError::DemuxMalformed(s),
            hrpmkv::MkvError::Unsupported(s) => AudioError::UnsupportedFormat(s),
            hrpmkv::MkvError::Decode(s) => AudioError::Decode(s),
        }
    }
}
