//! OCSP request construction (RFC 6960).
//!
//! Builds an unsigned `OCSPRequest` with a single `CertID`. The request is
//! handed back as DER; transporting it to the responder is the caller's
//! problem.

use sha1::{Digest, Sha1};

use crate::der;
use crate::x509::Certificate;
use crate::CryptoError;

/// OID for SHA-1, the CertID hash algorithm responders expect: 1.3.14.3.2.26
const OID_SHA1: &[u8] = &[0x2B, 0x0E, 0x03, 0x02, 0x1A];

/// Build a DER `OCSPRequest` asking about `cert`, issued by `issuer`.
///
/// `issuerNameHash` is SHA-1 over the full DER issuer Name of `cert`;
/// `issuerKeyHash` is SHA-1 over the issuer's subjectPublicKey bits.
pub fn build_ocsp_request(
    cert: &Certificate,
    issuer: &Certificate,
) -> Result<Vec<u8>, CryptoError> {
    let issuer_name_hash = Sha1::digest(&cert.issuer);
    let issuer_key_hash = Sha1::digest(issuer.public_key_bits()?);

    let cert_id = der::encode_sequence(&[
        &der::encode_sequence(&[&der::encode_oid(OID_SHA1), &der::encode_null()]),
        &der::encode_octet_string(&issuer_name_hash),
        &der::encode_octet_string(&issuer_key_hash),
        &der::encode_integer(&cert.serial),
    ]);

    // Request ::= SEQUENCE { reqCert CertID }
    let request = der::encode_sequence(&[&cert_id]);
    // TBSRequest ::= SEQUENCE { requestList SEQUENCE OF Request }
    let tbs_request = der::encode_sequence(&[&der::encode_sequence(&[&request])]);
    // OCSPRequest ::= SEQUENCE { tbsRequest TBSRequest }
    Ok(der::encode_sequence(&[&tbs_request]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::der::parse_tlv_expect;
    use crate::x509::parse_certificate;

    fn fixture_pair() -> (Certificate, Certificate) {
        // Reuse the x509 test shape: self-issued cert doubles as its issuer.
        let name = der::encode_sequence(&[&der::encode_set(&der::encode_sequence(&[
            &der::encode_oid(&[0x55, 0x04, 0x03]),
            &der::encode_utf8_string("OCSP Fixture"),
        ]))]);
        let spki = der::encode_sequence(&[
            &der::encode_sequence(&[
                &der::encode_oid(&[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x01]),
                &der::encode_null(),
            ]),
            &der::encode_bit_string(&[0x42; 32]),
        ]);
        let tbs = der::encode_sequence(&[
            &der::encode_integer(&[0x77]),
            &der::encode_sequence(&[
                &der::encode_oid(&[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x01]),
                &der::encode_null(),
            ]),
            &name,
            &der::encode_sequence(&[
                &der::encode_utc_time("240101000000Z"),
                &der::encode_utc_time("300101000000Z"),
            ]),
            &name,
            &spki,
        ]);
        let cert_der = der::encode_sequence(&[
            &tbs,
            &der::encode_sequence(&[
                &der::encode_oid(&[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x01]),
                &der::encode_null(),
            ]),
            &der::encode_bit_string(&[0u8; 16]),
        ]);
        let cert = parse_certificate(&cert_der).unwrap();
        (cert.clone(), cert)
    }

    #[test]
    fn request_structure_and_hashes() {
        let (cert, issuer) = fixture_pair();
        let req = build_ocsp_request(&cert, &issuer).unwrap();

        // OCSPRequest > TBSRequest > requestList > Request > CertID
        let (tbs, _) = parse_tlv_expect(0x30, &req).unwrap();
        let (request_list, _) = parse_tlv_expect(0x30, tbs).unwrap();
        let (request, _) = parse_tlv_expect(0x30, request_list).unwrap();
        let (cert_id, _) = parse_tlv_expect(0x30, request).unwrap();

        let (_alg, rest) = parse_tlv_expect(0x30, cert_id).unwrap();
        let (name_hash, rest) = parse_tlv_expect(0x04, rest).unwrap();
        let (key_hash, rest) = parse_tlv_expect(0x04, rest).unwrap();
        let (serial, _) = parse_tlv_expect(0x02, rest).unwrap();

        assert_eq!(name_hash, Sha1::digest(&cert.issuer).as_slice());
        assert_eq!(
            key_hash,
            Sha1::digest(issuer.public_key_bits().unwrap()).as_slice()
        );
        assert_eq!(serial, cert.serial.as_slice());
    }
}
