//! Remote signing session facade.
//!
//! A session walks one document through the two-phase flow: `begin_signing`
//! prepares the output file and hands out the digest for the remote QSCD,
//! `finish_signing` splices the produced signature and timestamp back and
//! embeds validation material for LT/LTA. `begin_signing_lta` /
//! `finish_signing_lta` run the second, document-timestamp pass.
//!
//! The stateless certificate/TSR helpers at the bottom serve the callers
//! that gather LTV material between the two phases.

use std::path::PathBuf;

use tracing::{info, warn};

use shared_crypto::{base64_of_der, der_of_base64, tsa, x509, HashAlgorithm};
use shared_pdf::{FileDevice, PdfDocument};

use crate::context::{SignerId, SigningContext, SigningResults};
use crate::error::{Result, SignError};
use crate::signer::{CmsSigner, DocTimeStampSigner};
use crate::{dss, ConformanceLevel, ValidationData};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    Begun,
    Finished,
    LtaBegun,
    LtaFinished,
}

/// One remote signing session over a single input/output document pair.
///
/// External I/O (signing, TSA, HTTP) happens between `begin*` and `finish*`;
/// the session holds the output device exclusively for that whole window and
/// releases it on drop.
pub struct RemoteSignSession {
    level: ConformanceLevel,
    hash: HashAlgorithm,
    input_path: PathBuf,
    output_path: PathBuf,
    end_certificate_der: Vec<u8>,
    chain_der: Vec<Vec<u8>>,
    root_certificate_der: Option<Vec<u8>>,
    label: Option<String>,
    response_tsr_base64: Option<String>,

    state: SessionState,
    device: Option<FileDevice>,
    ctx: Option<SigningContext>,
    results: SigningResults,
    signer_id: Option<SignerId>,
    lta_ctx: Option<SigningContext>,
    lta_results: SigningResults,
    lta_signer_id: Option<SignerId>,
}

impl std::fmt::Debug for RemoteSignSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSignSession")
            .field("level", &self.level)
            .field("hash", &self.hash)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl RemoteSignSession {
    /// Validate parameters and decode the certificate bundle.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conformance_level: &str,
        hash_algorithm_oid: &str,
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        end_certificate_base64: &str,
        certificate_chain_base64: &[String],
        root_certificate_base64: Option<&str>,
        label: Option<String>,
    ) -> Result<Self> {
        let level = ConformanceLevel::parse(conformance_level).ok_or_else(|| {
            SignError::InvalidParameter(format!(
                "unknown conformance level `{conformance_level}`"
            ))
        })?;
        let hash = HashAlgorithm::from_oid(hash_algorithm_oid).ok_or_else(|| {
            SignError::InvalidParameter(format!(
                "unsupported hash algorithm OID `{hash_algorithm_oid}`"
            ))
        })?;

        let end_certificate_der = der_of_base64(end_certificate_base64)?;
        let chain_der = certificate_chain_base64
            .iter()
            .map(|c| der_of_base64(c))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let root_certificate_der = root_certificate_base64
            .map(der_of_base64)
            .transpose()?;

        Ok(Self {
            level,
            hash,
            input_path: input_path.into(),
            output_path: output_path.into(),
            end_certificate_der,
            chain_der,
            root_certificate_der,
            label,
            response_tsr_base64: None,
            state: SessionState::Idle,
            device: None,
            ctx: None,
            results: SigningResults::default(),
            signer_id: None,
            lta_ctx: None,
            lta_results: SigningResults::default(),
            lta_signer_id: None,
        })
    }

    pub fn conformance_level(&self) -> ConformanceLevel {
        self.level
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Decoded root certificate, when one was supplied.
    pub fn root_certificate_der(&self) -> Option<&[u8]> {
        self.root_certificate_der.as_deref()
    }

    /// Pre-load the timestamp response so `finish_signing` may omit it.
    /// The response must parse and carry a granted token.
    pub fn set_timestamp_token(&mut self, response_tsr_base64: &str) -> Result<()> {
        let der = der_of_base64(response_tsr_base64)?;
        tsa::timestamp_token(&der)?;
        self.response_tsr_base64 = Some(response_tsr_base64.to_string());
        Ok(())
    }

    /// Prepare the output document and return the URL-encoded base64 digest
    /// to be signed remotely.
    pub fn begin_signing(&mut self) -> Result<String> {
        if self.state != SessionState::Idle {
            return Err(SignError::State(
                "begin_signing called on an active session".into(),
            ));
        }

        info!(
            level = self.level.as_str(),
            hash = self.hash.as_str(),
            label = self.label.as_deref().unwrap_or_default(),
            "begin signing"
        );

        std::fs::copy(&self.input_path, &self.output_path)?;
        let mut device = FileDevice::open(&self.output_path)?;
        let bytes = device.read_all()?;
        let doc = PdfDocument::from_bytes(bytes)?;

        let mut signer = CmsSigner::new(
            &self.end_certificate_der,
            self.chain_der.clone(),
            self.hash,
            self.level.requires_timestamp(),
        )?;
        signer.reserve_attribute_size(crate::signer::TIMESTAMP_ATTRIBUTE_RESERVE);

        let mut ctx = SigningContext::new();
        let signer_id = ctx.add_signer("Signature", Box::new(signer));
        let mut results = SigningResults::default();

        // On error the device drops here, releasing the output file; the
        // partially written file stays on disk for inspection.
        if let Err(err) = ctx.start_signing(&doc, &mut device, &mut results) {
            warn!(error = %err, "begin signing failed");
            return Err(err);
        }

        let digest = results
            .intermediate
            .get(&signer_id)
            .cloned()
            .ok_or_else(|| SignError::State("no intermediate digest produced".into()))?;

        self.device = Some(device);
        self.ctx = Some(ctx);
        self.results = results;
        self.signer_id = Some(signer_id);
        self.state = SessionState::Begun;

        Ok(urlencoding::encode(&base64_of_der(&digest)).into_owned())
    }

    /// Inject the externally produced signature, attach the timestamp token
    /// for levels above B-B, and embed validation material for LT/LTA.
    pub fn finish_signing(
        &mut self,
        signed_hash_base64: &str,
        tsr_base64: Option<&str>,
        validation_data: Option<&ValidationData>,
    ) -> Result<()> {
        if self.state != SessionState::Begun {
            return Err(SignError::State(
                "finish_signing requires a matching begin_signing".into(),
            ));
        }
        let signer_id = self
            .signer_id
            .ok_or_else(|| SignError::State("session has no registered signer".into()))?;

        let signature = der_of_base64(signed_hash_base64)?;

        if self.level.requires_timestamp() {
            let tsr_b64 = tsr_base64
                .map(str::to_string)
                .or_else(|| self.response_tsr_base64.clone())
                .ok_or_else(|| {
                    SignError::InvalidParameter(format!(
                        "a timestamp response is required for {}",
                        self.level.as_str()
                    ))
                })?;
            let tsr_der = der_of_base64(&tsr_b64)?;
            let token = tsa::timestamp_token(&tsr_der)?;

            let ctx = self
                .ctx
                .as_mut()
                .ok_or_else(|| SignError::State("signing context missing".into()))?;
            ctx.signer_mut(signer_id)
                .ok_or_else(|| SignError::State("signer missing from context".into()))?
                .set_timestamp_token(token)?;
        }

        self.results.intermediate.insert(signer_id, signature);

        let ctx = self
            .ctx
            .as_mut()
            .ok_or_else(|| SignError::State("signing context missing".into()))?;
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| SignError::State("output device missing".into()))?;
        ctx.finish_signing(device, &self.results)?;

        // For LTA the DSS must land before the DocTimeStamp pass so the
        // timestamp covers it.
        if self.level.writes_dss() {
            if let Some(validation) = validation_data {
                dss::write_dss(device, validation)?;
            }
        }

        info!(level = self.level.as_str(), "finish signing complete");
        self.state = SessionState::Finished;
        Ok(())
    }

    /// Open the LTA pass: register a DocTimeStamp signer on a fresh view of
    /// the signed document and return the base64 ByteRange digest for the
    /// TSA.
    pub fn begin_signing_lta(&mut self) -> Result<String> {
        if self.state != SessionState::Finished {
            return Err(SignError::State(
                "begin_signing_lta requires a finished signing pass".into(),
            ));
        }
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| SignError::State("output device missing".into()))?;

        let bytes = device.read_all()?;
        let doc = PdfDocument::from_bytes(bytes)?;

        let mut ctx = SigningContext::new();
        let signer_id = ctx.add_signer("Signature2", Box::new(DocTimeStampSigner::new()));
        let mut results = SigningResults::default();

        if let Err(err) = ctx.start_signing(&doc, device, &mut results) {
            warn!(error = %err, "begin LTA pass failed");
            self.lta_ctx = None;
            return Err(err);
        }

        let digest = results
            .intermediate
            .get(&signer_id)
            .cloned()
            .ok_or_else(|| SignError::State("no ByteRange digest produced".into()))?;

        self.lta_ctx = Some(ctx);
        self.lta_results = results;
        self.lta_signer_id = Some(signer_id);
        self.state = SessionState::LtaBegun;

        info!("LTA pass begun");
        Ok(base64_of_der(&digest))
    }

    /// Embed the TSA token as the DocTimeStamp contents and optionally write
    /// a final DSS from fresh validation material.
    pub fn finish_signing_lta(
        &mut self,
        tsr_base64: &str,
        validation_data: Option<&ValidationData>,
    ) -> Result<()> {
        if self.state != SessionState::LtaBegun {
            return Err(SignError::State(
                "finish_signing_lta requires a matching begin_signing_lta".into(),
            ));
        }
        let signer_id = self
            .lta_signer_id
            .ok_or_else(|| SignError::State("LTA pass has no registered signer".into()))?;

        let tsr_der = der_of_base64(tsr_base64)?;
        let token = tsa::timestamp_token(&tsr_der)?;
        self.lta_results.intermediate.insert(signer_id, token);

        let ctx = self
            .lta_ctx
            .as_mut()
            .ok_or_else(|| SignError::State("LTA signing context missing".into()))?;
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| SignError::State("output device missing".into()))?;
        ctx.finish_signing(device, &self.lta_results)?;

        if let Some(validation) = validation_data {
            dss::write_dss(device, validation)?;
        }

        self.lta_ctx = None;
        self.lta_signer_id = None;
        self.lta_results = SigningResults::default();
        self.state = SessionState::LtaFinished;

        info!("LTA pass complete");
        Ok(())
    }
}

/// Extract the first CRL distribution point URL from a base64 DER
/// certificate. A TimeStampResp is accepted as well: its first token
/// certificate is used instead.
pub fn crl_url_from_certificate(base64_input: &str) -> Result<String> {
    let der = der_of_base64(base64_input)?;
    let cert = match x509::parse_certificate(&der) {
        Ok(cert) => cert,
        Err(_) => {
            let signer_der = tsa::signer_certificate(&der)?;
            x509::parse_certificate(&signer_der)?
        }
    };
    cert.crl_distribution_url().ok_or_else(|| {
        SignError::Decoding("no CRL distribution point URL found in certificate".into())
    })
}

/// The TSA signer certificate (base64 DER) embedded in a TimeStampResp.
pub fn signer_cert_from_tsr(tsr_base64: &str) -> Result<String> {
    let der = der_of_base64(tsr_base64)?;
    Ok(base64_of_der(&tsa::signer_certificate(&der)?))
}

/// The TSA issuer certificate (base64 DER) embedded in a TimeStampResp.
/// Fails with [`SignError::InsufficientCerts`] when the token holds fewer
/// than two certificates.
pub fn issuer_cert_from_tsr(tsr_base64: &str) -> Result<String> {
    let der = der_of_base64(tsr_base64)?;
    Ok(base64_of_der(&tsa::issuer_certificate(&der)?))
}

/// Like [`issuer_cert_from_tsr`], but on `InsufficientCerts` resolves the
/// signer certificate's AIA `caIssuers` URL and delegates to `http_fetch`,
/// which must return the base64 DER certificate behind the URL.
pub fn issuer_cert_from_tsr_with_fallback(
    tsr_base64: &str,
    http_fetch: impl Fn(&str) -> Result<String>,
) -> Result<String> {
    match issuer_cert_from_tsr(tsr_base64) {
        Ok(issuer) => Ok(issuer),
        Err(SignError::InsufficientCerts(count)) => {
            let signer_b64 = signer_cert_from_tsr(tsr_base64)?;
            let url = ca_issuers_url_from_certificate(&signer_b64)?;
            info!(url = %url, "falling back to AIA caIssuers fetch");
            let issuer = http_fetch(&url).map_err(|err| {
                SignError::Decoding(format!("AIA fallback failed for `{url}`: {err}"))
            })?;
            if issuer.is_empty() {
                return Err(SignError::Decoding(format!(
                    "AIA fetch for `{url}` returned an empty certificate \
                     (token had {count} certificate(s))"
                )));
            }
            Ok(issuer)
        }
        Err(err) => Err(err),
    }
}

/// OCSP responder URL from a certificate's AIA extension. The issuer
/// certificate is decoded too so malformed input fails loudly here rather
/// than at request-building time.
pub fn ocsp_url_from_certificate(cert_base64: &str, issuer_base64: &str) -> Result<String> {
    let cert = x509::parse_certificate(&der_of_base64(cert_base64)?)?;
    x509::parse_certificate(&der_of_base64(issuer_base64)?)?;
    cert.ocsp_url()
        .ok_or_else(|| SignError::Decoding("no OCSP responder URL found in certificate".into()))
}

/// `caIssuers` URL from a certificate's AIA extension.
pub fn ca_issuers_url_from_certificate(cert_base64: &str) -> Result<String> {
    let cert = x509::parse_certificate(&der_of_base64(cert_base64)?)?;
    cert.ca_issuers_url()
        .ok_or_else(|| SignError::Decoding("no CA issuers URL found in certificate AIA".into()))
}

/// Build a base64 DER OCSPRequest for `cert` issued by `issuer`.
pub fn build_ocsp_request(cert_base64: &str, issuer_base64: &str) -> Result<String> {
    let cert = x509::parse_certificate(&der_of_base64(cert_base64)?)?;
    let issuer = x509::parse_certificate(&der_of_base64(issuer_base64)?)?;
    Ok(base64_of_der(&shared_crypto::ocsp::build_ocsp_request(
        &cert, &issuer,
    )?))
}

/// Resolve `(ocsp_url, base64_ocsp_request)` for the TSA certificates
/// embedded in a TimeStampResp.
pub fn ocsp_request_from_certificates(tsr_base64: &str) -> Result<(String, String)> {
    let signer = signer_cert_from_tsr(tsr_base64)?;
    let issuer = issuer_cert_from_tsr(tsr_base64)?;
    let url = ocsp_url_from_certificate(&signer, &issuer)?;
    let request = build_ocsp_request(&signer, &issuer)?;
    Ok((url, request))
}

/// Like [`ocsp_request_from_certificates`], resolving a missing issuer via
/// the AIA fallback.
pub fn ocsp_request_from_certificates_with_fallback(
    tsr_base64: &str,
    http_fetch: impl Fn(&str) -> Result<String>,
) -> Result<(String, String)> {
    let signer = signer_cert_from_tsr(tsr_base64)?;
    let issuer = issuer_cert_from_tsr_with_fallback(tsr_base64, http_fetch)?;
    let url = ocsp_url_from_certificate(&signer, &issuer)?;
    let request = build_ocsp_request(&signer, &issuer)?;
    Ok((url, request))
}
