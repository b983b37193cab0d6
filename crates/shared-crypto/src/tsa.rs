//! RFC 3161 Time-Stamp Authority support
//!
//! Builds `TimeStampReq` structures and parses `TimeStampResp` blobs coming
//! back from a TSA: status validation, `timeStampToken` extraction, and
//! access to the certificates embedded in the token's SignedData.

use crate::der;
use crate::hash::HashAlgorithm;
use crate::CryptoError;

/// OID for id-smime-aa-timeStampToken: 1.2.840.113549.1.9.16.2.14
pub const OID_TIMESTAMP_TOKEN: &[u8] = &[
    0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x10, 0x02, 0x0E,
];

/// OID for id-signedData: 1.2.840.113549.1.7.2
const OID_SIGNED_DATA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x02];

/// Build an RFC 3161 TimeStampReq over `message`.
///
/// The message is digested with `hash`; the request carries a nonce and asks
/// the TSA to include its certificate chain (`certReq = true`).
pub fn build_timestamp_request(message: &[u8], hash: HashAlgorithm) -> Vec<u8> {
    let digest = hash.digest(message);

    // MessageImprint ::= SEQUENCE { hashAlgorithm, hashedMessage }
    let message_imprint = der::encode_sequence(&[
        &hash.algorithm_identifier(),
        &der::encode_octet_string(&digest),
    ]);

    let mut req = Vec::new();
    req.extend(der::encode_integer(&[1]));
    req.extend(message_imprint);
    req.extend(der::encode_integer(&nonce()));
    req.extend(der::encode_boolean(true));

    der::encode_sequence(&[&req])
}

fn nonce() -> Vec<u8> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    timestamp.to_be_bytes()[8..].to_vec()
}

/// Parsed TimeStampResp: PKI status plus the token ContentInfo, if granted.
#[derive(Debug, Clone)]
pub struct TimestampResponse {
    pub status: u64,
    /// Complete DER of the PKCS#7 `timeStampToken` ContentInfo.
    pub token: Option<Vec<u8>>,
}

/// Parse a DER TimeStampResp.
///
/// Inputs shorter than 50 bytes are rejected up front, mirroring the
/// certificate plausibility check.
pub fn parse_timestamp_response(input: &[u8]) -> Result<TimestampResponse, CryptoError> {
    if input.len() < 50 {
        return Err(CryptoError::TooShort(input.len()));
    }

    // TimeStampResp ::= SEQUENCE { status PKIStatusInfo, timeStampToken OPTIONAL }
    let (content, _) = der::parse_tlv_expect(0x30, input)?;
    let (status_info, rest) = der::parse_tlv_expect(0x30, content)?;
    let (status_bytes, _) = der::parse_tlv_expect(0x02, status_info)?;

    let mut status: u64 = 0;
    for &b in status_bytes {
        status = (status << 8) | b as u64;
    }

    let token = if rest.is_empty() {
        None
    } else {
        let (token_tlv, _) = der::split_tlv(rest)?;
        Some(token_tlv.to_vec())
    };

    Ok(TimestampResponse { status, token })
}

/// Extract the PKCS#7 token from a TimeStampResp, validating the status.
pub fn timestamp_token(input: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let resp = parse_timestamp_response(input)?;
    if resp.status != 0 {
        return Err(CryptoError::TsrStatus(resp.status));
    }
    resp.token.ok_or(CryptoError::MissingToken)
}

/// Certificates embedded in a token's SignedData, in encoding order.
///
/// Each element is the complete DER of one certificate.
pub fn token_certificates(token: &[u8]) -> Result<Vec<Vec<u8>>, CryptoError> {
    // ContentInfo ::= SEQUENCE { contentType, [0] EXPLICIT SignedData }
    let (content, _) = der::parse_tlv_expect(0x30, token)?;
    let (oid, rest) = der::parse_tlv_expect(0x06, content)?;
    if oid != OID_SIGNED_DATA {
        return Err(CryptoError::Der(
            "timestamp token is not a SignedData ContentInfo".into(),
        ));
    }
    let (wrapped, _) = der::parse_tlv_expect(0xA0, rest)?;
    let (signed_data, _) = der::parse_tlv_expect(0x30, wrapped)?;

    // SignedData: version, digestAlgorithms, encapContentInfo,
    //             [0] certificates?, [1] crls?, signerInfos
    let (_, pos) = der::parse_tlv_expect(0x02, signed_data)?;
    let (_, pos) = der::parse_tlv_expect(0x31, pos)?;
    let (_, pos) = der::parse_tlv_expect(0x30, pos)?;

    let mut certs = Vec::new();
    if pos.first() == Some(&0xA0) {
        let (mut cert_set, _) = der::parse_tlv(pos)?;
        while !cert_set.is_empty() {
            let (cert, rest) = der::split_tlv(cert_set)?;
            certs.push(cert.to_vec());
            cert_set = rest;
        }
    }

    Ok(certs)
}

/// The TSA signer certificate: index 0 of the token's certificate set.
pub fn signer_certificate(tsr: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let token = timestamp_token(tsr)?;
    let mut certs = token_certificates(&token)?;
    if certs.is_empty() {
        return Err(CryptoError::NoSignerCert);
    }
    Ok(certs.swap_remove(0))
}

/// The TSA issuer certificate: index 1 of the token's certificate set.
///
/// Fails with [`CryptoError::InsufficientCerts`] when the token carries
/// fewer than two certificates; the facade uses that to fall back to AIA.
pub fn issuer_certificate(tsr: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let token = timestamp_token(tsr)?;
    let mut certs = token_certificates(&token)?;
    if certs.len() < 2 {
        return Err(CryptoError::InsufficientCerts(certs.len()));
    }
    Ok(certs.swap_remove(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::der::*;

    /// A minimal SignedData token wrapping the given certificate DERs.
    pub(crate) fn fake_token(certs: &[&[u8]]) -> Vec<u8> {
        let mut parts: Vec<Vec<u8>> = vec![
            encode_integer(&[3]),
            encode_set(&[]),
            encode_sequence(&[&encode_oid(&[
                0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x01,
            ])]),
        ];
        if !certs.is_empty() {
            let concat: Vec<u8> = certs.iter().flat_map(|c| c.iter().copied()).collect();
            parts.push(encode_context(0, &concat));
        }
        parts.push(encode_set(&[]));
        let refs: Vec<&[u8]> = parts.iter().map(|p| p.as_slice()).collect();
        let signed_data = encode_sequence(&refs);

        encode_sequence(&[
            &encode_oid(super::OID_SIGNED_DATA),
            &encode_context(0, &signed_data),
        ])
    }

    /// TimeStampResp with the given status; a token is attached for status 0.
    /// A statusString keeps even token-less responses above the size floor.
    pub(crate) fn fake_tsr(status: u8, certs: &[&[u8]]) -> Vec<u8> {
        let status_info = encode_sequence(&[
            &encode_integer(&[status]),
            &encode_sequence(&[&encode_utf8_string(
                "status generated by the in-process timestamp fixture",
            )]),
        ]);
        let mut content = status_info;
        if status == 0 && !certs.is_empty() {
            content.extend(fake_token(certs));
        }
        encode_sequence(&[&content])
    }

    fn big_cert(tag_byte: u8) -> Vec<u8> {
        encode_sequence(&[&encode_octet_string(&[tag_byte; 64])])
    }

    #[test]
    fn status_zero_yields_token() {
        let cert = big_cert(0x11);
        let tsr = fake_tsr(0, &[&cert]);
        let token = timestamp_token(&tsr).unwrap();
        assert_eq!(token[0], 0x30);
        // The token re-parses identically.
        let reparsed = parse_timestamp_response(&tsr).unwrap();
        assert_eq!(reparsed.token.unwrap(), token);
    }

    #[test]
    fn nonzero_status_is_rejected() {
        let tsr = fake_tsr(2, &[]);
        assert!(matches!(
            timestamp_token(&tsr),
            Err(CryptoError::TsrStatus(2))
        ));
    }

    #[test]
    fn missing_token_is_detected() {
        let tsr = fake_tsr(0, &[]);
        assert!(matches!(
            timestamp_token(&tsr),
            Err(CryptoError::MissingToken)
        ));
    }

    #[test]
    fn signer_and_issuer_extraction() {
        let signer = big_cert(0x21);
        let issuer = big_cert(0x22);
        let tsr = fake_tsr(0, &[&signer, &issuer]);
        assert_eq!(signer_certificate(&tsr).unwrap(), signer);
        assert_eq!(issuer_certificate(&tsr).unwrap(), issuer);
    }

    #[test]
    fn single_cert_trips_insufficient() {
        let signer = big_cert(0x21);
        let tsr = fake_tsr(0, &[&signer]);
        assert_eq!(signer_certificate(&tsr).unwrap(), signer);
        assert!(matches!(
            issuer_certificate(&tsr),
            Err(CryptoError::InsufficientCerts(1))
        ));
    }

    #[test]
    fn request_has_imprint_and_cert_req() {
        let req = build_timestamp_request(b"signature bytes", HashAlgorithm::Sha256);
        assert_eq!(req[0], 0x30);
        let digest = HashAlgorithm::Sha256.digest(b"signature bytes");
        assert!(req.windows(digest.len()).any(|w| w == digest.as_slice()));
        // certReq TRUE
        assert!(req.windows(3).any(|w| w == [0x01, 0x01, 0xFF]));
    }

    #[test]
    fn short_input_rejected() {
        assert!(matches!(
            parse_timestamp_response(&[0x30, 0x00]),
            Err(CryptoError::TooShort(_))
        ));
    }
}
