use std::io;

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("unsupported channel count {channels} for '{path}'")]
    UnsupportedChannels { path: String, channels: u32 },
    #[error("unsupported bit depth {bits} for '{path}'")]
    UnsupportedBitDepth { path: String, bits: u32 },
    #[error("DST-compressed DFF is not supported")]
    DstNotSupported,
    #[error("malformed file: {0}")]
    Malformed(String),
}

impl From<hrpcodec::CodecError> for MetadataError {
    fn from(err: hrpcodec::CodecError) -> Self {
        match err {
            hrpcodec::CodecError::Io(e) => MetadataError::Io(e),
            hrpcodec::CodecError::Unsupported(s) => MetadataError::UnsupportedFormat(s),
            other => MetadataError::Malformed(other.to_string()),
        }
    }
}

impl From<hrpmkv::MkvError> for MetadataError {
    fn from(err: hrpmkv::MkvError) -> Self {
        match err {
            hrpmkv::MkvError::Io(e) => MetadataError::Io(e),
            hrpmkv::MkvError::Unsupported(s) => MetadataError::UnsupportedFormat(s),
            other => MetadataError::Malformed(other.to_string()),
        }
    }
}

impl From<claxon::Error> for MetadataError {
    fn from(err: claxon::Error) -> Self {
        MetadataError::Malformed(err.to_string())
    }
}
