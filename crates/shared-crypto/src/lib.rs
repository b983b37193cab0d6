//! Shared cryptographic plumbing for remote PDF signing
//!
//! This crate carries the ASN.1/DER codec used across the signing pipeline:
//! X.509 certificate walking, RFC 3161 timestamp request/response handling,
//! OCSP request construction and PAdES CMS SignedData assembly.
//!
//! Everything here is pure: no I/O, no global state. Callers hand in DER (or
//! base64 of DER) and get DER back.

pub mod cms;
pub mod der;
pub mod hash;
pub mod ocsp;
pub mod tsa;
pub mod x509;

pub use hash::{HashAlgorithm, StreamingHash};

use thiserror::Error;

/// Errors surfaced by the codec layer.
///
/// `InsufficientCerts` is deliberately its own variant: the session facade
/// matches on it to trigger the AIA `caIssuers` fallback.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("malformed DER: {0}")]
    Der(String),

    #[error("input too short to be a certificate or timestamp response ({0} bytes)")]
    TooShort(usize),

    #[error("timestamp response rejected with status {0}")]
    TsrStatus(u64),

    #[error("timestamp response carries no timeStampToken")]
    MissingToken,

    #[error("timestamp token contains no signer certificate")]
    NoSignerCert,

    #[error("timestamp token contains {0} certificate(s), at least 2 required")]
    InsufficientCerts(usize),

    #[error("unsupported algorithm: {0}")]
    Unsupported(String),
}

/// Decode no-newline base64 into DER bytes.
pub fn der_of_base64(input: &str) -> Result<Vec<u8>, CryptoError> {
    use base64::{engine::general_purpose::STANDARD, Engine};
    Ok(STANDARD.decode(input.trim())?)
}

/// Encode raw bytes as no-newline base64.
pub fn base64_of_der(der: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine};
    STANDARD.encode(der)
}
