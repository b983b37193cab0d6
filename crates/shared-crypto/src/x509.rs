//! X.509 certificate walking.
//!
//! Parses just enough of a certificate to drive CMS assembly and LTV
//! material discovery: serial number, raw issuer/subject names, the
//! SubjectPublicKeyInfo and the extension list (CRL distribution points,
//! Authority Information Access).

use crate::der;
use crate::CryptoError;

/// OID for CRL distribution points: 2.5.29.31
pub const OID_CRL_DISTRIBUTION_POINTS: &[u8] = &[0x55, 0x1D, 0x1F];
/// OID for Authority Information Access: 1.3.6.1.5.5.7.1.1
pub const OID_AUTHORITY_INFO_ACCESS: &[u8] = &[0x2B, 0x06, 0x01, 0x05, 0x05, 0x07, 0x01, 0x01];
/// OID for id-ad-ocsp: 1.3.6.1.5.5.7.48.1
const OID_AD_OCSP: &[u8] = &[0x2B, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x01];
/// OID for id-ad-caIssuers: 1.3.6.1.5.5.7.48.2
const OID_AD_CA_ISSUERS: &[u8] = &[0x2B, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x02];
/// OID for rsaEncryption: 1.2.840.113549.1.1.1
const OID_RSA_ENCRYPTION: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x01];
/// OID for id-ecPublicKey: 1.2.840.10045.2.1
const OID_EC_PUBLIC_KEY: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x02, 0x01];

/// GeneralName `uniformResourceIdentifier`, context-specific primitive [6].
const TAG_GENERAL_NAME_URI: u8 = 0x86;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicKeyAlgorithm {
    Rsa,
    Ec,
    Other,
}

#[derive(Debug, Clone)]
pub struct Extension {
    pub oid: Vec<u8>,
    pub critical: bool,
    /// Content of the extension's OCTET STRING wrapper.
    pub value: Vec<u8>,
}

/// A parsed certificate. `der` always holds the complete original encoding;
/// name fields keep their full TLVs so they can be re-embedded byte-exact
/// (issuerAndSerialNumber, OCSP issuerNameHash).
#[derive(Debug, Clone)]
pub struct Certificate {
    pub der: Vec<u8>,
    pub serial: Vec<u8>,
    pub issuer: Vec<u8>,
    pub subject: Vec<u8>,
    pub spki: Vec<u8>,
    pub public_key_algorithm: PublicKeyAlgorithm,
    pub extensions: Vec<Extension>,
}

/// Walk a DER certificate.
///
/// Inputs shorter than 50 bytes are rejected up front as not plausibly a
/// certificate.
pub fn parse_certificate(input: &[u8]) -> Result<Certificate, CryptoError> {
    if input.len() < 50 {
        return Err(CryptoError::TooShort(input.len()));
    }

    let (cert_content, _) = der::parse_tlv_expect(0x30, input)?;
    let (tbs, _) = der::parse_tlv_expect(0x30, cert_content)?;

    let mut pos = tbs;

    // [0] EXPLICIT version
    if pos.first() == Some(&0xA0) {
        let (_, rest) = der::parse_tlv(pos)?;
        pos = rest;
    }

    let (serial, rest) = der::parse_tlv_expect(0x02, pos)?;
    pos = rest;

    // signature AlgorithmIdentifier
    let (_, rest) = der::parse_tlv_expect(0x30, pos)?;
    pos = rest;

    let (issuer, rest) = der::split_tlv(pos)?;
    pos = rest;

    // validity
    let (_, rest) = der::parse_tlv_expect(0x30, pos)?;
    pos = rest;

    let (subject, rest) = der::split_tlv(pos)?;
    pos = rest;

    let (spki, rest) = der::split_tlv(pos)?;
    pos = rest;

    let public_key_algorithm = spki_algorithm(spki)?;

    let mut extensions = Vec::new();
    while let Some(&tag) = pos.first() {
        match tag {
            // issuerUniqueID / subjectUniqueID
            0x81 | 0x82 => {
                let (_, rest) = der::parse_tlv(pos)?;
                pos = rest;
            }
            // [3] EXPLICIT Extensions
            0xA3 => {
                let (ext_wrap, rest) = der::parse_tlv(pos)?;
                extensions = parse_extensions(ext_wrap)?;
                pos = rest;
            }
            _ => break,
        }
    }

    Ok(Certificate {
        der: input.to_vec(),
        serial: serial.to_vec(),
        issuer: issuer.to_vec(),
        subject: subject.to_vec(),
        spki: spki.to_vec(),
        public_key_algorithm,
        extensions,
    })
}

fn spki_algorithm(spki: &[u8]) -> Result<PublicKeyAlgorithm, CryptoError> {
    let (content, _) = der::parse_tlv_expect(0x30, spki)?;
    let (alg_seq, _) = der::parse_tlv_expect(0x30, content)?;
    let (oid, _) = der::parse_tlv_expect(0x06, alg_seq)?;
    Ok(match oid {
        o if o == OID_RSA_ENCRYPTION => PublicKeyAlgorithm::Rsa,
        o if o == OID_EC_PUBLIC_KEY => PublicKeyAlgorithm::Ec,
        _ => PublicKeyAlgorithm::Other,
    })
}

fn parse_extensions(data: &[u8]) -> Result<Vec<Extension>, CryptoError> {
    let (mut pos, _) = der::parse_tlv_expect(0x30, data)?;
    let mut out = Vec::new();

    while !pos.is_empty() {
        let (ext, rest) = der::parse_tlv_expect(0x30, pos)?;
        pos = rest;

        let (oid, ext_rest) = der::parse_tlv_expect(0x06, ext)?;
        let (critical, ext_rest) = if ext_rest.first() == Some(&0x01) {
            let (flag, r) = der::parse_tlv(ext_rest)?;
            (flag.first() == Some(&0xFF), r)
        } else {
            (false, ext_rest)
        };
        let (value, _) = der::parse_tlv_expect(0x04, ext_rest)?;

        out.push(Extension {
            oid: oid.to_vec(),
            critical,
            value: value.to_vec(),
        });
    }

    Ok(out)
}

impl Certificate {
    /// Extension content by OID, if present.
    pub fn extension(&self, oid: &[u8]) -> Option<&[u8]> {
        self.extensions
            .iter()
            .find(|e| e.oid == oid)
            .map(|e| e.value.as_slice())
    }

    /// First `GEN_URI` fullName in the CRL Distribution Points extension.
    pub fn crl_distribution_url(&self) -> Option<String> {
        let value = self.extension(OID_CRL_DISTRIBUTION_POINTS)?;
        // CRLDistPoints ::= SEQUENCE OF DistributionPoint
        let (mut pos, _) = der::parse_tlv_expect(0x30, value).ok()?;
        while !pos.is_empty() {
            let (dp, rest) = der::parse_tlv_expect(0x30, pos).ok()?;
            pos = rest;

            // [0] distributionPoint / [0] fullName GeneralNames
            if dp.first() != Some(&0xA0) {
                continue;
            }
            let (dp_name, _) = der::parse_tlv(dp).ok()?;
            if dp_name.first() != Some(&0xA0) {
                continue;
            }
            let (mut names, _) = der::parse_tlv(dp_name).ok()?;
            while !names.is_empty() {
                let (name, rest) = der::parse_tlv(names).ok()?;
                let tag = names[0];
                names = rest;
                if tag == TAG_GENERAL_NAME_URI && !name.is_empty() {
                    return Some(String::from_utf8_lossy(name).into_owned());
                }
            }
        }
        None
    }

    /// OCSP responder URL from the AIA extension.
    pub fn ocsp_url(&self) -> Option<String> {
        self.aia_url(OID_AD_OCSP)
    }

    /// `caIssuers` URL from the AIA extension.
    pub fn ca_issuers_url(&self) -> Option<String> {
        self.aia_url(OID_AD_CA_ISSUERS)
    }

    fn aia_url(&self, method: &[u8]) -> Option<String> {
        let value = self.extension(OID_AUTHORITY_INFO_ACCESS)?;
        // AuthorityInfoAccess ::= SEQUENCE OF AccessDescription
        let (mut pos, _) = der::parse_tlv_expect(0x30, value).ok()?;
        while !pos.is_empty() {
            let (ad, rest) = der::parse_tlv_expect(0x30, pos).ok()?;
            pos = rest;

            let (oid, location) = der::parse_tlv_expect(0x06, ad).ok()?;
            if oid != method {
                continue;
            }
            if location.first() == Some(&TAG_GENERAL_NAME_URI) {
                let (uri, _) = der::parse_tlv(location).ok()?;
                if !uri.is_empty() {
                    return Some(String::from_utf8_lossy(uri).into_owned());
                }
            }
        }
        None
    }

    /// Content bytes of the subjectPublicKey BIT STRING (unused-bits byte
    /// stripped), as hashed into an OCSP `issuerKeyHash`.
    pub fn public_key_bits(&self) -> Result<&[u8], CryptoError> {
        let (content, _) = der::parse_tlv_expect(0x30, &self.spki)?;
        let (_, rest) = der::parse_tlv_expect(0x30, content)?;
        let (bits, _) = der::parse_tlv_expect(0x03, rest)?;
        if bits.is_empty() {
            return Err(CryptoError::Der("empty subjectPublicKey".into()));
        }
        Ok(&bits[1..])
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// The walker never panics on arbitrary bytes.
        #[test]
        fn parser_is_total(data in prop::collection::vec(any::<u8>(), 0..300)) {
            let _ = parse_certificate(&data);
        }
    }
}
