//! Shared fixtures: synthesized certificates, canned timestamp responses
//! and a minimal input document. Everything is built with the public DER
//! helpers so the fixtures stay byte-exact and self-describing.

use lopdf::{dictionary, Object};
use shared_crypto::der::*;

/// OID for rsaEncryption: 1.2.840.113549.1.1.1
pub const OID_RSA_ENCRYPTION: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x01];
/// OID for id-ad-ocsp: 1.3.6.1.5.5.7.48.1
pub const OID_AD_OCSP: &[u8] = &[0x2B, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x01];
/// OID for id-ad-caIssuers: 1.3.6.1.5.5.7.48.2
pub const OID_AD_CA_ISSUERS: &[u8] = &[0x2B, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x02];
/// OID for CRL distribution points: 2.5.29.31
pub const OID_CRL_DP: &[u8] = &[0x55, 0x1D, 0x1F];
/// OID for Authority Information Access: 1.3.6.1.5.5.7.1.1
pub const OID_AIA: &[u8] = &[0x2B, 0x06, 0x01, 0x05, 0x05, 0x07, 0x01, 0x01];
/// OID for id-signedData: 1.2.840.113549.1.7.2
pub const OID_SIGNED_DATA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x02];

/// Options for [`test_certificate`].
#[derive(Default)]
pub struct CertOptions<'a> {
    pub serial: &'a [u8],
    pub common_name: &'a str,
    pub crl_url: Option<&'a str>,
    pub ocsp_url: Option<&'a str>,
    pub ca_issuers_url: Option<&'a str>,
}

/// A structurally valid RSA certificate with the requested extensions.
/// The outer signature is garbage; nothing in the pipeline verifies it.
pub fn test_certificate(opts: &CertOptions) -> Vec<u8> {
    let cn = if opts.common_name.is_empty() {
        "Fixture Signer"
    } else {
        opts.common_name
    };
    let name = encode_sequence(&[&encode_set(&encode_sequence(&[
        &encode_oid(&[0x55, 0x04, 0x03]),
        &encode_utf8_string(cn),
    ]))]);
    let validity = encode_sequence(&[
        &encode_utc_time("240101000000Z"),
        &encode_utc_time("300101000000Z"),
    ]);
    let spki = encode_sequence(&[
        &encode_sequence(&[&encode_oid(OID_RSA_ENCRYPTION), &encode_null()]),
        &encode_bit_string(&[0x5A; 64]),
    ]);

    let mut ext_list: Vec<Vec<u8>> = Vec::new();
    if let Some(url) = opts.crl_url {
        let uri = encode_tlv(0x86, url.as_bytes());
        let full_name = encode_context(0, &uri);
        let dp_name = encode_context(0, &full_name);
        let dist_point = encode_sequence(&[&dp_name]);
        let crl_dp = encode_sequence(&[&dist_point]);
        ext_list.push(encode_sequence(&[
            &encode_oid(OID_CRL_DP),
            &encode_octet_string(&crl_dp),
        ]));
    }
    let mut access: Vec<Vec<u8>> = Vec::new();
    if let Some(url) = opts.ocsp_url {
        access.push(encode_sequence(&[
            &encode_oid(OID_AD_OCSP),
            &encode_tlv(0x86, url.as_bytes()),
        ]));
    }
    if let Some(url) = opts.ca_issuers_url {
        access.push(encode_sequence(&[
            &encode_oid(OID_AD_CA_ISSUERS),
            &encode_tlv(0x86, url.as_bytes()),
        ]));
    }
    if !access.is_empty() {
        let refs: Vec<&[u8]> = access.iter().map(|a| a.as_slice()).collect();
        let aia = encode_sequence(&refs);
        ext_list.push(encode_sequence(&[
            &encode_oid(OID_AIA),
            &encode_octet_string(&aia),
        ]));
    }

    let serial = if opts.serial.is_empty() {
        &[0x10, 0x01][..]
    } else {
        opts.serial
    };

    let mut tbs_parts: Vec<Vec<u8>> = vec![
        encode_context(0, &encode_integer(&[2])),
        encode_integer(serial),
        encode_sequence(&[&encode_oid(OID_RSA_ENCRYPTION), &encode_null()]),
        name.clone(),
        validity,
        name,
        spki,
    ];
    if !ext_list.is_empty() {
        let refs: Vec<&[u8]> = ext_list.iter().map(|e| e.as_slice()).collect();
        tbs_parts.push(encode_context(3, &encode_sequence(&refs)));
    }
    let refs: Vec<&[u8]> = tbs_parts.iter().map(|p| p.as_slice()).collect();
    let tbs = encode_sequence(&refs);

    encode_sequence(&[
        &tbs,
        &encode_sequence(&[&encode_oid(OID_RSA_ENCRYPTION), &encode_null()]),
        &encode_bit_string(&[0u8; 64]),
    ])
}

/// A minimal SignedData token ContentInfo embedding the given certificates.
pub fn fake_token(certs: &[&[u8]]) -> Vec<u8> {
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
        &encode_oid(OID_SIGNED_DATA),
        &encode_context(0, &signed_data),
    ])
}

/// A TimeStampResp with the given PKI status; granted responses carry a
/// token over `certs`.
pub fn fake_tsr(status: u8, certs: &[&[u8]]) -> Vec<u8> {
    let status_info = encode_sequence(&[
        &encode_integer(&[status]),
        &encode_sequence(&[&encode_utf8_string(
            "status generated by the integration fixture authority",
        )]),
    ]);
    let mut content = status_info;
    if status == 0 && !certs.is_empty() {
        content.extend(fake_token(certs));
    }
    encode_sequence(&[&content])
}

/// Single empty page, classic xref table.
pub fn minimal_pdf_bytes() -> Vec<u8> {
    let mut doc = lopdf::Document::with_version("1.4");
    let pages_id = doc.new_object_id();
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

/// Parse the last `/ByteRange [a b c d]` in a serialized document.
pub fn last_byte_range(bytes: &[u8]) -> [i64; 4] {
    let pos = bytes
        .windows(b"/ByteRange".len())
        .enumerate()
        .filter(|(_, w)| *w == b"/ByteRange")
        .map(|(i, _)| i)
        .next_back()
        .expect("no /ByteRange in file");
    let open = bytes[pos..].iter().position(|&b| b == b'[').unwrap() + pos;
    let close = bytes[open..].iter().position(|&b| b == b']').unwrap() + open;
    let text = String::from_utf8_lossy(&bytes[open + 1..close]);
    let values: Vec<i64> = text
        .split_whitespace()
        .map(|v| v.parse().unwrap())
        .collect();
    assert_eq!(values.len(), 4, "malformed ByteRange `{text}`");
    [values[0], values[1], values[2], values[3]]
}

/// Decode the Contents hex region excluded by `byte_range` and trim the
/// zero padding off the embedded DER structure.
pub fn contents_der(bytes: &[u8], byte_range: &[i64; 4]) -> Vec<u8> {
    let start = byte_range[1] as usize;
    let end = byte_range[2] as usize;
    assert_eq!(bytes[start], b'<');
    assert_eq!(bytes[end - 1], b'>');
    let hex_region = &bytes[start + 1..end - 1];
    let raw = hex::decode(hex_region).expect("Contents region is not hex");
    let (der, _) = split_tlv(&raw).expect("Contents does not start with a DER TLV");
    der.to_vec()
}
