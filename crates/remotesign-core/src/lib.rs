//! Remote PAdES signing core
//!
//! This crate drives a two-phase remote signing flow over PDF documents:
//! `begin_signing` prepares the document and hands out the digest to sign on
//! an external device, `finish_signing` splices the produced signature (and
//! RFC 3161 timestamp) back in. The same machinery applies a document-level
//! DocTimeStamp and embeds LTV material into the `/DSS` catalog entry for the
//! B-LT and B-LTA baseline profiles.

pub mod context;
pub mod dss;
pub mod error;
pub mod session;
pub mod signer;

pub use context::{SignerId, SigningContext, SigningResults};
pub use error::{Result, SignError};
pub use session::RemoteSignSession;
pub use shared_crypto::HashAlgorithm;
pub use signer::{CmsSigner, DocTimeStampSigner, Signer};

/// PAdES baseline conformance level for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConformanceLevel {
    /// PAdES-B-B: signature only.
    BaselineB,
    /// PAdES-B-T: signature plus signature timestamp.
    BaselineT,
    /// PAdES-B-LT: B-T plus embedded validation material (DSS).
    BaselineLt,
    /// PAdES-B-LTA: B-LT plus a document timestamp over the whole file.
    BaselineLta,
}

impl ConformanceLevel {
    /// Parse the wire identifiers used by signing requests.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ADES_B_B" => Some(Self::BaselineB),
            "ADES_B_T" => Some(Self::BaselineT),
            "ADES_B_LT" => Some(Self::BaselineLt),
            "ADES_B_LTA" => Some(Self::BaselineLta),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BaselineB => "ADES_B_B",
            Self::BaselineT => "ADES_B_T",
            Self::BaselineLt => "ADES_B_LT",
            Self::BaselineLta => "ADES_B_LTA",
        }
    }

    /// Whether the CMS signature must carry a timestamp token.
    pub fn requires_timestamp(&self) -> bool {
        !matches!(self, Self::BaselineB)
    }

    /// Whether validation material gets embedded into `/DSS`.
    pub fn writes_dss(&self) -> bool {
        matches!(self, Self::BaselineLt | Self::BaselineLta)
    }

    /// Whether a second, document-level timestamp pass applies.
    pub fn has_document_timestamp(&self) -> bool {
        matches!(self, Self::BaselineLta)
    }
}

/// Validation artifacts to embed into the document security store.
///
/// All entries are base64 of DER. An empty record skips DSS writing.
#[derive(Debug, Clone, Default)]
pub struct ValidationData {
    pub certificates_base64: Vec<String>,
    pub crls_base64: Vec<String>,
    pub ocsps_base64: Vec<String>,
}

impl ValidationData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_certificate(&mut self, cert_base64: impl Into<String>) {
        self.certificates_base64.push(cert_base64.into());
    }

    pub fn add_crl(&mut self, crl_base64: impl Into<String>) {
        self.crls_base64.push(crl_base64.into());
    }

    pub fn add_ocsp(&mut self, ocsp_base64: impl Into<String>) {
        self.ocsps_base64.push(ocsp_base64.into());
    }

    pub fn add_certificates(&mut self, certs: impl IntoIterator<Item = String>) {
        self.certificates_base64.extend(certs);
    }

    pub fn add_crls(&mut self, crls: impl IntoIterator<Item = String>) {
        self.crls_base64.extend(crls);
    }

    pub fn add_ocsps(&mut self, ocsps: impl IntoIterator<Item = String>) {
        self.ocsps_base64.extend(ocsps);
    }

    pub fn clear(&mut self) {
        self.certificates_base64.clear();
        self.crls_base64.clear();
        self.ocsps_base64.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.certificates_base64.is_empty()
            && self.crls_base64.is_empty()
            && self.ocsps_base64.is_empty()
    }

    pub fn certificate_count(&self) -> usize {
        self.certificates_base64.len()
    }

    pub fn crl_count(&self) -> usize {
        self.crls_base64.len()
    }

    pub fn ocsp_count(&self) -> usize {
        self.ocsps_base64.len()
    }
}
