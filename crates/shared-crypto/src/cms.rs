//! CMS SignedData assembly for PAdES
//!
//! Builds the detached PKCS#7 structure embedded in a PDF signature:
//! signed attributes (content-type, signing-time, message-digest,
//! signing-certificate-v2), a SignerInfo carrying an *externally produced*
//! signature, and optionally the RFC 3161 token as the
//! `signatureTimeStampToken` unsigned attribute.
//!
//! The signature itself never happens here: the builder exposes the
//! signed-attributes digest and accepts whatever bytes the remote signer
//! returns.

use chrono::{DateTime, Utc};

use crate::der;
use crate::hash::HashAlgorithm;
use crate::tsa::OID_TIMESTAMP_TOKEN;
use crate::x509::{Certificate, PublicKeyAlgorithm};
use crate::CryptoError;

/// OID for id-data: 1.2.840.113549.1.7.1
const OID_DATA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x01];
/// OID for id-signedData: 1.2.840.113549.1.7.2
const OID_SIGNED_DATA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x02];
/// OID for content-type attribute: 1.2.840.113549.1.9.3
const OID_CONTENT_TYPE: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x03];
/// OID for message-digest attribute: 1.2.840.113549.1.9.4
const OID_MESSAGE_DIGEST: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x04];
/// OID for signing-time attribute: 1.2.840.113549.1.9.5
const OID_SIGNING_TIME: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x05];
/// OID for id-aa-signingCertificateV2: 1.2.840.113549.1.9.16.2.47
const OID_SIGNING_CERTIFICATE_V2: &[u8] = &[
    0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x10, 0x02, 0x2F,
];
/// OID for rsaEncryption: 1.2.840.113549.1.1.1
const OID_RSA_ENCRYPTION: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x01];
/// OIDs for ecdsa-with-SHA256/384/512
const OID_ECDSA_SHA256: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x04, 0x03, 0x02];
const OID_ECDSA_SHA384: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x04, 0x03, 0x03];
const OID_ECDSA_SHA512: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x04, 0x03, 0x04];

/// Assembles PAdES-B SignedData around an end-entity certificate and its
/// chain. One builder per signing session; it holds no mutable state.
pub struct SignedDataBuilder {
    end_cert: Certificate,
    chain: Vec<Vec<u8>>,
    hash: HashAlgorithm,
}

impl SignedDataBuilder {
    pub fn new(end_cert: Certificate, chain: Vec<Vec<u8>>, hash: HashAlgorithm) -> Self {
        Self {
            end_cert,
            chain,
            hash,
        }
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash
    }

    /// DER `SET OF Attribute` over the signed attributes.
    ///
    /// This is the encoding that gets digested for the remote signer; inside
    /// the SignerInfo the same content is re-tagged `IMPLICIT [0]`.
    pub fn signed_attributes(
        &self,
        message_digest: &[u8],
        signing_time: DateTime<Utc>,
    ) -> Vec<u8> {
        let mut attrs = Vec::new();

        attrs.extend(attribute(OID_CONTENT_TYPE, &der::encode_oid(OID_DATA)));

        let utc = signing_time.format("%y%m%d%H%M%SZ").to_string();
        attrs.extend(attribute(OID_SIGNING_TIME, &der::encode_utc_time(&utc)));

        attrs.extend(attribute(
            OID_MESSAGE_DIGEST,
            &der::encode_octet_string(message_digest),
        ));

        attrs.extend(attribute(
            OID_SIGNING_CERTIFICATE_V2,
            &self.signing_certificate_v2(),
        ));

        der::encode_set(&attrs)
    }

    /// Digest of the signed-attributes SET, the value handed out for
    /// external signing.
    pub fn attributes_digest(&self, signed_attributes: &[u8]) -> Vec<u8> {
        self.hash.digest(signed_attributes)
    }

    /// ESS SigningCertificateV2 with IssuerSerial, required by PAdES-B.
    /// The hash algorithm is omitted for SHA-256 (the DER DEFAULT).
    fn signing_certificate_v2(&self) -> Vec<u8> {
        let cert_hash = self.hash.digest(&self.end_cert.der);

        let issuer_serial = der::encode_sequence(&[
            &der::encode_sequence(&[&der::encode_context(4, &self.end_cert.issuer)]),
            &der::encode_integer(&self.end_cert.serial),
        ]);

        let mut ess_parts: Vec<Vec<u8>> = Vec::new();
        if self.hash != HashAlgorithm::Sha256 {
            ess_parts.push(self.hash.algorithm_identifier());
        }
        ess_parts.push(der::encode_octet_string(&cert_hash));
        ess_parts.push(issuer_serial);

        let refs: Vec<&[u8]> = ess_parts.iter().map(|p| p.as_slice()).collect();
        let ess_cert_id = der::encode_sequence(&refs);

        der::encode_sequence(&[&der::encode_sequence(&[&ess_cert_id])])
    }

    /// Assemble the full ContentInfo around the external signature.
    ///
    /// `signed_attributes` must be the exact SET returned by
    /// [`Self::signed_attributes`]; `timestamp_token` is the complete token
    /// ContentInfo to attach as `signatureTimeStampToken`.
    pub fn assemble(
        &self,
        signed_attributes: &[u8],
        signature: &[u8],
        timestamp_token: Option<&[u8]>,
    ) -> Result<Vec<u8>, CryptoError> {
        let (set_content, _) = der::parse_tlv_expect(0x31, signed_attributes)?;

        let mut signer_info = Vec::new();
        signer_info.extend(der::encode_integer(&[1]));
        signer_info.extend(der::encode_sequence(&[
            &self.end_cert.issuer,
            &der::encode_integer(&self.end_cert.serial),
        ]));
        signer_info.extend(self.hash.algorithm_identifier());
        signer_info.extend(der::encode_context(0, set_content));
        signer_info.extend(self.signature_algorithm()?);
        signer_info.extend(der::encode_octet_string(signature));
        if let Some(token) = timestamp_token {
            let attr = der::encode_sequence(&[
                &der::encode_oid(OID_TIMESTAMP_TOKEN),
                &der::encode_set(token),
            ]);
            signer_info.extend(der::encode_context(1, &attr));
        }
        let signer_info = der::encode_sequence(&[&signer_info]);

        let mut certificates = self.end_cert.der.clone();
        for cert in &self.chain {
            certificates.extend_from_slice(cert);
        }

        let mut signed_data = Vec::new();
        signed_data.extend(der::encode_integer(&[1]));
        signed_data.extend(der::encode_set(&self.hash.algorithm_identifier()));
        signed_data.extend(der::encode_sequence(&[&der::encode_oid(OID_DATA)]));
        signed_data.extend(der::encode_context(0, &certificates));
        signed_data.extend(der::encode_set(&signer_info));
        let signed_data = der::encode_sequence(&[&signed_data]);

        Ok(der::encode_sequence(&[
            &der::encode_oid(OID_SIGNED_DATA),
            &der::encode_context(0, &signed_data),
        ]))
    }

    fn signature_algorithm(&self) -> Result<Vec<u8>, CryptoError> {
        match self.end_cert.public_key_algorithm {
            PublicKeyAlgorithm::Rsa => Ok(der::encode_sequence(&[
                &der::encode_oid(OID_RSA_ENCRYPTION),
                &der::encode_null(),
            ])),
            PublicKeyAlgorithm::Ec => {
                let oid = match self.hash {
                    HashAlgorithm::Sha256 => OID_ECDSA_SHA256,
                    HashAlgorithm::Sha384 => OID_ECDSA_SHA384,
                    HashAlgorithm::Sha512 => OID_ECDSA_SHA512,
                };
                Ok(der::encode_sequence(&[&der::encode_oid(oid)]))
            }
            PublicKeyAlgorithm::Other => Err(CryptoError::Unsupported(
                "signer certificate key is neither RSA nor EC".into(),
            )),
        }
    }
}

fn attribute(oid: &[u8], value: &[u8]) -> Vec<u8> {
    der::encode_sequence(&[&der::encode_oid(oid), &der::encode_set(value)])
}
