//! Signature producers driven by the signing context.
//!
//! Two signers share one capability set: the CMS signer assembles a PAdES
//! SignedData around an externally produced signature, the DocTimeStamp
//! signer embeds a raw RFC 3161 token. Neither ever touches a private key.

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::debug;

use shared_crypto::cms::SignedDataBuilder;
use shared_crypto::x509;
use shared_crypto::{HashAlgorithm, StreamingHash};
use shared_pdf::{find_last, FileDevice};

use crate::error::{Result, SignError};

/// Default extra Contents reservation for the timestamp unsigned attribute.
pub const TIMESTAMP_ATTRIBUTE_RESERVE: usize = 20_000;

/// Contents reservation for a DocTimeStamp token.
const DOC_TIMESTAMP_RESERVE: usize = 20_000;

/// Dummy signature width used to size the CMS dry run; covers RSA-4096.
const DRY_RUN_SIGNATURE_LEN: usize = 512;

/// Capability set shared by all signature producers.
///
/// The context calls `append_data` with the ByteRange content in order,
/// exports `fetch_intermediate_result` to the caller, and finalizes with
/// `compute_signature_deferred` once the external bytes come back.
pub trait Signer {
    fn reset(&mut self);

    fn append_data(&mut self, data: &[u8]);

    /// The value handed out for external processing. The device carries the
    /// serialized document for signers that hash the file rather than the
    /// streamed ranges.
    fn fetch_intermediate_result(&mut self, device: &mut FileDevice) -> Result<Vec<u8>>;

    /// Produce the signature dictionary Contents. With `dry_run` the result
    /// only sizes the placeholder; otherwise `processed` holds the bytes the
    /// external party returned.
    fn compute_signature_deferred(&mut self, processed: &[u8], dry_run: bool) -> Result<Vec<u8>>;

    /// Attach an RFC 3161 token ContentInfo. Only meaningful for signers
    /// that embed one as an unsigned attribute.
    fn set_timestamp_token(&mut self, _token: Vec<u8>) -> Result<()> {
        Err(SignError::State(
            "this signer does not accept timestamp tokens".into(),
        ))
    }

    fn signature_filter(&self) -> &'static str {
        "Adobe.PPKLite"
    }

    fn signature_sub_filter(&self) -> &'static str;

    fn signature_type(&self) -> &'static str;

    /// `/M` entry for the signature dictionary, if the signer carries one.
    fn signature_date(&self) -> Option<String> {
        None
    }

    fn skip_buffer_clear(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmsState {
    Fresh,
    AppendingData,
    ProducedDigest,
    AwaitingSignature,
    Finalized,
}

/// PAdES CMS signer over a ByteRange digest.
pub struct CmsSigner {
    builder: SignedDataBuilder,
    requires_timestamp: bool,
    attribute_reserve: usize,
    hasher: Option<StreamingHash>,
    signed_attributes: Option<Vec<u8>>,
    timestamp_token: Option<Vec<u8>>,
    state: CmsState,
}

impl CmsSigner {
    /// Build a signer from the end-entity certificate DER and its chain.
    pub fn new(
        end_certificate_der: &[u8],
        chain_der: Vec<Vec<u8>>,
        hash: HashAlgorithm,
        requires_timestamp: bool,
    ) -> Result<Self> {
        let end_cert = x509::parse_certificate(end_certificate_der)?;
        Ok(Self {
            builder: SignedDataBuilder::new(end_cert, chain_der, hash),
            requires_timestamp,
            attribute_reserve: TIMESTAMP_ATTRIBUTE_RESERVE,
            hasher: Some(hash.hasher()),
            signed_attributes: None,
            timestamp_token: None,
            state: CmsState::Fresh,
        })
    }

    /// Extra Contents bytes reserved for the timestamp unsigned attribute.
    pub fn reserve_attribute_size(&mut self, bytes: usize) {
        self.attribute_reserve = bytes;
    }

    fn dry_run_len(&self) -> Result<usize> {
        // Assemble a representative CMS: attribute lengths are fixed for a
        // given certificate and hash, only the signature width varies.
        let hash = self.builder.hash_algorithm();
        let attrs = self
            .builder
            .signed_attributes(&vec![0u8; hash.digest_len()], Utc::now());
        let cms = self
            .builder
            .assemble(&attrs, &[0u8; DRY_RUN_SIGNATURE_LEN], None)?;
        Ok(cms.len() + self.attribute_reserve)
    }
}

impl Signer for CmsSigner {
    fn reset(&mut self) {
        self.hasher = Some(self.builder.hash_algorithm().hasher());
        self.signed_attributes = None;
        self.state = CmsState::Fresh;
    }

    fn append_data(&mut self, data: &[u8]) {
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(data);
            self.state = CmsState::AppendingData;
        }
    }

    fn fetch_intermediate_result(&mut self, _device: &mut FileDevice) -> Result<Vec<u8>> {
        if !matches!(self.state, CmsState::Fresh | CmsState::AppendingData) {
            return Err(SignError::State(
                "intermediate result already produced".into(),
            ));
        }
        let hasher = self
            .hasher
            .take()
            .ok_or_else(|| SignError::State("signer digest already consumed".into()))?;

        let message_digest = hasher.finalize();
        let attrs = self.builder.signed_attributes(&message_digest, Utc::now());
        let digest = self.builder.attributes_digest(&attrs);
        self.signed_attributes = Some(attrs);
        self.state = CmsState::ProducedDigest;

        debug!(digest_len = digest.len(), "produced SignedAttributes digest");
        Ok(digest)
    }

    fn compute_signature_deferred(&mut self, processed: &[u8], dry_run: bool) -> Result<Vec<u8>> {
        if dry_run {
            return Ok(vec![0u8; self.dry_run_len()?]);
        }

        if !matches!(self.state, CmsState::ProducedDigest | CmsState::AwaitingSignature) {
            return Err(SignError::State(
                "finalization requires a produced digest".into(),
            ));
        }
        self.state = CmsState::AwaitingSignature;

        if processed.is_empty() {
            return Err(SignError::InvalidParameter(
                "external signature bytes are empty".into(),
            ));
        }
        if self.requires_timestamp && self.timestamp_token.is_none() {
            return Err(SignError::State(
                "timestamp token required before finalization at this conformance level".into(),
            ));
        }
        let attrs = self
            .signed_attributes
            .as_deref()
            .ok_or_else(|| SignError::State("signed attributes missing".into()))?;

        let cms = self
            .builder
            .assemble(attrs, processed, self.timestamp_token.as_deref())?;
        self.state = CmsState::Finalized;
        Ok(cms)
    }

    fn set_timestamp_token(&mut self, token: Vec<u8>) -> Result<()> {
        if matches!(self.state, CmsState::Finalized) {
            return Err(SignError::State("signer already finalized".into()));
        }
        self.timestamp_token = Some(token);
        Ok(())
    }

    fn signature_sub_filter(&self) -> &'static str {
        "ETSI.CAdES.detached"
    }

    fn signature_type(&self) -> &'static str {
        "Sig"
    }

    fn signature_date(&self) -> Option<String> {
        Some(Utc::now().format("D:%Y%m%d%H%M%S+00'00'").to_string())
    }
}

/// RFC 3161 DocTimeStamp signer.
///
/// The streamed ranges are only a hint: the authoritative digest comes from
/// re-reading the serialized file and parsing its final `/ByteRange`, since
/// the ranged append path may not observe the values the context settled on.
#[derive(Default)]
pub struct DocTimeStampSigner {
    buffer: Vec<u8>,
}

impl DocTimeStampSigner {
    pub fn new() -> Self {
        Self::default()
    }

    fn byte_range_digest(file: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(pos) = find_last(file, b"/ByteRange") else {
            return Ok(None);
        };
        let open = file[pos..]
            .iter()
            .position(|&b| b == b'[')
            .map(|i| pos + i)
            .ok_or_else(|| SignError::Decoding("unterminated /ByteRange array".into()))?;
        let close = file[open..]
            .iter()
            .position(|&b| b == b']')
            .map(|i| open + i)
            .ok_or_else(|| SignError::Decoding("unterminated /ByteRange array".into()))?;

        let text = String::from_utf8_lossy(&file[open + 1..close]);
        let mut values = [0i64; 4];
        let mut count = 0;
        for part in text.split_whitespace() {
            if count == 4 {
                return Err(SignError::Decoding("/ByteRange has too many entries".into()));
            }
            values[count] = part
                .parse::<i64>()
                .map_err(|_| SignError::Decoding(format!("bad /ByteRange entry `{part}`")))?;
            count += 1;
        }
        if count != 4 {
            return Err(SignError::Decoding("/ByteRange needs four entries".into()));
        }

        let mut hasher = Sha256::new();
        for pair in values.chunks(2) {
            let (start, len) = (pair[0], pair[1]);
            if start < 0 || len < 0 {
                return Err(SignError::Decoding("/ByteRange entry is negative".into()));
            }
            let (start, len) = (start as usize, len as usize);
            if start + len > file.len() {
                return Err(SignError::Decoding(
                    "/ByteRange extends past end of file".into(),
                ));
            }
            hasher.update(&file[start..start + len]);
        }
        Ok(Some(hasher.finalize().to_vec()))
    }
}

impl Signer for DocTimeStampSigner {
    fn reset(&mut self) {
        self.buffer.clear();
    }

    fn append_data(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    fn fetch_intermediate_result(&mut self, device: &mut FileDevice) -> Result<Vec<u8>> {
        let file = device.read_all()?;
        match Self::byte_range_digest(&file)? {
            Some(digest) => {
                debug!(file_len = file.len(), "hashed ByteRange from serialized file");
                Ok(digest)
            }
            // No ByteRange in the file: fall back to the streamed bytes.
            None => Ok(Sha256::digest(&self.buffer).to_vec()),
        }
    }

    fn compute_signature_deferred(&mut self, processed: &[u8], dry_run: bool) -> Result<Vec<u8>> {
        if dry_run {
            return Ok(vec![0u8; DOC_TIMESTAMP_RESERVE]);
        }
        if processed.is_empty() {
            return Err(SignError::InvalidParameter(
                "timestamp token bytes are empty".into(),
            ));
        }
        Ok(processed.to_vec())
    }

    fn signature_sub_filter(&self) -> &'static str {
        "ETSI.RFC3161"
    }

    fn signature_type(&self) -> &'static str {
        "DocTimeStamp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_crypto::der::*;

    fn fixture_cert_der() -> Vec<u8> {
        let rsa_oid: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x01];
        let name = encode_sequence(&[&encode_set(&encode_sequence(&[
            &encode_oid(&[0x55, 0x04, 0x03]),
            &encode_utf8_string("Signer Fixture"),
        ]))]);
        let spki = encode_sequence(&[
            &encode_sequence(&[&encode_oid(rsa_oid), &encode_null()]),
            &encode_bit_string(&[0x66; 64]),
        ]);
        let tbs = encode_sequence(&[
            &encode_integer(&[0x42]),
            &encode_sequence(&[&encode_oid(rsa_oid), &encode_null()]),
            &name,
            &encode_sequence(&[
                &encode_utc_time("240101000000Z"),
                &encode_utc_time("300101000000Z"),
            ]),
            &name,
            &spki,
        ]);
        encode_sequence(&[
            &tbs,
            &encode_sequence(&[&encode_oid(rsa_oid), &encode_null()]),
            &encode_bit_string(&[0u8; 32]),
        ])
    }

    fn scratch_device() -> (tempfile::TempDir, FileDevice) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch.bin");
        std::fs::write(&path, b"scratch").unwrap();
        (dir, FileDevice::open(&path).unwrap())
    }

    #[test]
    fn cms_signer_walks_its_state_machine() {
        let (_dir, mut device) = scratch_device();
        let mut signer =
            CmsSigner::new(&fixture_cert_der(), Vec::new(), HashAlgorithm::Sha256, false).unwrap();

        let reserved = signer.compute_signature_deferred(&[], true).unwrap();
        assert!(reserved.len() > TIMESTAMP_ATTRIBUTE_RESERVE);

        signer.append_data(b"ranged pdf bytes, first span");
        signer.append_data(b"and the second span");
        let digest = signer.fetch_intermediate_result(&mut device).unwrap();
        assert_eq!(digest.len(), 32);

        // Digest can only be produced once per pass.
        assert!(matches!(
            signer.fetch_intermediate_result(&mut device),
            Err(SignError::State(_))
        ));

        // Empty external signature is fatal.
        assert!(matches!(
            signer.compute_signature_deferred(&[], false),
            Err(SignError::InvalidParameter(_))
        ));

        let cms = signer
            .compute_signature_deferred(&[0xCD; 256], false)
            .unwrap();
        assert_eq!(cms[0], 0x30);
        assert!(cms.len() <= reserved.len());

        // Finalized signers refuse further work.
        assert!(matches!(
            signer.compute_signature_deferred(&[0xCD; 256], false),
            Err(SignError::State(_))
        ));
    }

    #[test]
    fn cms_signer_demands_token_when_required() {
        let (_dir, mut device) = scratch_device();
        let mut signer =
            CmsSigner::new(&fixture_cert_der(), Vec::new(), HashAlgorithm::Sha256, true).unwrap();

        signer.append_data(b"data");
        signer.fetch_intermediate_result(&mut device).unwrap();

        assert!(matches!(
            signer.compute_signature_deferred(&[0xCD; 64], false),
            Err(SignError::State(_))
        ));

        let token = encode_sequence(&[&encode_octet_string(&[0xEE; 32])]);
        signer.set_timestamp_token(token.clone()).unwrap();
        let cms = signer
            .compute_signature_deferred(&[0xCD; 64], false)
            .unwrap();
        assert!(cms.windows(token.len()).any(|w| w == token.as_slice()));
    }

    #[test]
    fn cms_signer_reset_allows_a_fresh_pass() {
        let (_dir, mut device) = scratch_device();
        let mut signer =
            CmsSigner::new(&fixture_cert_der(), Vec::new(), HashAlgorithm::Sha256, false).unwrap();

        signer.append_data(b"first pass");
        signer.fetch_intermediate_result(&mut device).unwrap();

        signer.reset();
        signer.append_data(b"second pass");
        let digest = signer.fetch_intermediate_result(&mut device).unwrap();
        assert_eq!(digest.len(), 32);
    }

    #[test]
    fn byte_range_digest_concatenates_ranges() {
        let file = b"AAAA<0000>BBBB /ByteRange[0 4 10 4]   ".to_vec();
        let digest = DocTimeStampSigner::byte_range_digest(&file)
            .unwrap()
            .unwrap();
        let mut expected = Sha256::new();
        expected.update(b"AAAA");
        expected.update(b"BBBB");
        assert_eq!(digest, expected.finalize().to_vec());
    }

    #[test]
    fn byte_range_digest_uses_last_occurrence() {
        let file = b"/ByteRange[0 1 2 1] xx /ByteRange[0 2 3 2]x".to_vec();
        let digest = DocTimeStampSigner::byte_range_digest(&file)
            .unwrap()
            .unwrap();
        let mut expected = Sha256::new();
        expected.update(&file[0..2]);
        expected.update(&file[3..5]);
        assert_eq!(digest, expected.finalize().to_vec());
    }

    #[test]
    fn byte_range_out_of_bounds_rejected() {
        let file = b"/ByteRange[0 4 10 400]".to_vec();
        assert!(DocTimeStampSigner::byte_range_digest(&file).is_err());
    }

    #[test]
    fn missing_byte_range_falls_back_to_stream() {
        assert!(DocTimeStampSigner::byte_range_digest(b"no marker here")
            .unwrap()
            .is_none());
    }

    #[test]
    fn doc_timestamp_dry_run_reserves_fixed_size() {
        let mut signer = DocTimeStampSigner::new();
        let contents = signer.compute_signature_deferred(&[], true).unwrap();
        assert_eq!(contents.len(), DOC_TIMESTAMP_RESERVE);
        assert!(signer.compute_signature_deferred(&[], false).is_err());
        let token = vec![0x30, 0x03, 0x02, 0x01, 0x00];
        assert_eq!(
            signer.compute_signature_deferred(&token, false).unwrap(),
            token
        );
    }
}
