//! Error types for xlsxstream

use thiserror::Error;

/// Result type alias for xlsxstream operations
pub type Result<T> = std::result::Result<T, XlsxError>;

/// Main error type for all decoding operations
#[derive(Error, Debug)]
pub enum XlsxError {
    /// The container does not start a member where one was expected
    #[error("invalid signature: 0x{0:08x}")]
    InvalidSignature(u32),

    /// Member compressed with something other than stored/deflate
    #[error("unsupported compression method {method} for entry '{path}'")]
    UnsupportedCompression { path: String, method: u16 },

    /// Encrypted members cannot be streamed
    #[error("encrypted entry not supported: {0}")]
    Encrypted(String),

    /// Member layout that a forward-only reader cannot handle
    #[error("unsupported entry '{path}': {reason}")]
    UnsupportedEntry { path: String, reason: String },

    /// Decompressed bytes do not match the recorded checksum
    #[error("CRC mismatch for entry '{path}': expected 0x{expected:08x}, got 0x{actual:08x}")]
    CrcMismatch {
        path: String,
        expected: u32,
        actual: u32,
    },

    /// XML well-formedness failure inside one package part
    #[error("XML error in '{part}': {source}")]
    Xml {
        part: String,
        #[source]
        source: quick_xml::Error,
    },

    /// IO error wrapper
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Number format could not be rendered
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

impl XlsxError {
    pub(crate) fn xml(part: &str, source: quick_xml::Error) -> Self {
        XlsxError::Xml {
            part: part.to_string(),
            source,
        }
    }

    /// Whether this error came from the container layer rather than one part's XML
    pub fn is_container_error(&self) -> bool {
        matches!(
            self,
            XlsxError::InvalidSignature(_)
                | XlsxError::UnsupportedCompression { .. }
                | XlsxError::Encrypted(_)
                | XlsxError::UnsupportedEntry { .. }
                | XlsxError::CrcMismatch { .. }
        )
    }
}
