use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::io;

/// Errors produced while decoding a JPEG stream.
///
/// Every failure is fatal for the current decode; no partial image is ever
/// returned. `CorruptJpeg` covers structural, semantic and bitstream problems,
/// `UnsupportedFormat` covers valid JPEG features this decoder does not
/// implement (12-bit samples, SOF1, arithmetic coding, CMYK, ...).
#[derive(Debug)]
pub enum JexelError {
    IoError(io::Error),
    CorruptJpeg(String),
    UnsupportedFormat(String),
    InvalidDimensions { width: u32, height: u32 },
}

impl Error for JexelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            JexelError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for JexelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            JexelError::IoError(err) => write!(f, "I/O error: {}", err),
            JexelError::CorruptJpeg(reason) => write!(f, "Corrupt JPEG: {}", reason),
            JexelError::UnsupportedFormat(feature) => write!(f, "Unsupported JPEG feature: {}", feature),
            JexelError::InvalidDimensions { width, height } => {
                write!(f, "Invalid image dimensions: {}x{}", width, height)
            }
        }
    }
}

impl From<io::Error> for JexelError {
    fn from(error: io::Error) -> Self {
        JexelError::IoError(error)
    }
}

// Result type alias for all decoder operations
pub type JexelResult<T> = Result<T, JexelError>;
