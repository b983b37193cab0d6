use shared_crypto::CryptoError;
use shared_pdf::PdfError;
use thiserror::Error;

/// Failure kinds surfaced by the signing pipeline.
///
/// Lower layers report [`CryptoError`]/[`PdfError`]; the conversions below
/// collapse them into these kinds while keeping `InsufficientCerts`
/// distinguishable: the AIA fallback depends on matching it.
#[derive(Error, Debug)]
pub enum SignError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("decoding error: {0}")]
    Decoding(String),

    #[error("invalid timestamp response: {0}")]
    InvalidTsr(String),

    #[error("timestamp response contains {0} certificate(s), at least 2 required")]
    InsufficientCerts(usize),

    #[error("signature contents of {actual} bytes exceed the reserved {reserved} byte placeholder")]
    PlaceholderOverflow { actual: usize, reserved: usize },

    #[error("invalid session state: {0}")]
    State(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SignError>;

impl From<CryptoError> for SignError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::TsrStatus(status) => {
                SignError::InvalidTsr(format!("status {status} is not granted"))
            }
            CryptoError::MissingToken => {
                SignError::InvalidTsr("response carries no timeStampToken".into())
            }
            CryptoError::NoSignerCert => {
                SignError::InvalidTsr("token carries no signer certificate".into())
            }
            CryptoError::InsufficientCerts(count) => SignError::InsufficientCerts(count),
            other => SignError::Decoding(other.to_string()),
        }
    }
}

impl From<PdfError> for SignError {
    fn from(err: PdfError) -> Self {
        match err {
            PdfError::Io(io) => SignError::Io(io),
            other => SignError::Decoding(other.to_string()),
        }
    }
}
