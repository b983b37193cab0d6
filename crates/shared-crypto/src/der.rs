//! Minimal DER encode/decode helpers.
//!
//! This is deliberately not a general ASN.1 library: the signing pipeline
//! only needs definite-length TLV handling, and every structure we touch
//! (X.509, CMS, TS_RESP, OCSPRequest) is definite-length DER.

use crate::CryptoError;

/// Wrap `content` in a tag-length-value triple.
pub fn encode_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = content.len();

    if len < 128 {
        out.push(len as u8);
    } else if len < 256 {
        out.push(0x81);
        out.push(len as u8);
    } else if len < 65_536 {
        out.push(0x82);
        out.push((len >> 8) as u8);
        out.push(len as u8);
    } else {
        out.push(0x83);
        out.push((len >> 16) as u8);
        out.push((len >> 8) as u8);
        out.push(len as u8);
    }

    out.extend_from_slice(content);
    out
}

pub fn encode_sequence(items: &[&[u8]]) -> Vec<u8> {
    let content: Vec<u8> = items.iter().flat_map(|i| i.iter().copied()).collect();
    encode_tlv(0x30, &content)
}

pub fn encode_set(content: &[u8]) -> Vec<u8> {
    encode_tlv(0x31, content)
}

pub fn encode_oid(body: &[u8]) -> Vec<u8> {
    encode_tlv(0x06, body)
}

/// INTEGER with a leading zero added when the high bit is set.
pub fn encode_integer(value: &[u8]) -> Vec<u8> {
    if !value.is_empty() && value[0] & 0x80 != 0 {
        let mut padded = vec![0];
        padded.extend_from_slice(value);
        encode_tlv(0x02, &padded)
    } else {
        encode_tlv(0x02, value)
    }
}

pub fn encode_octet_string(content: &[u8]) -> Vec<u8> {
    encode_tlv(0x04, content)
}

pub fn encode_boolean(value: bool) -> Vec<u8> {
    encode_tlv(0x01, &[if value { 0xFF } else { 0x00 }])
}

/// BIT STRING with zero unused bits.
pub fn encode_bit_string(content: &[u8]) -> Vec<u8> {
    let mut bs = vec![0];
    bs.extend_from_slice(content);
    encode_tlv(0x03, &bs)
}

pub fn encode_utf8_string(s: &str) -> Vec<u8> {
    encode_tlv(0x0C, s.as_bytes())
}

/// UTCTime, caller supplies `YYMMDDHHMMSSZ`.
pub fn encode_utc_time(s: &str) -> Vec<u8> {
    encode_tlv(0x17, s.as_bytes())
}

pub fn encode_null() -> Vec<u8> {
    vec![0x05, 0x00]
}

/// Constructed context-specific tag `[n]`.
pub fn encode_context(tag: u8, content: &[u8]) -> Vec<u8> {
    encode_tlv(0xA0 | tag, content)
}

/// Split one TLV off the front of `data`, returning `(content, rest)`.
pub fn parse_tlv(data: &[u8]) -> Result<(&[u8], &[u8]), CryptoError> {
    if data.is_empty() {
        return Err(CryptoError::Der("empty TLV input".into()));
    }

    let (len, header_len) = parse_length(&data[1..])?;
    let total_header = 1 + header_len;

    if data.len() < total_header + len {
        return Err(CryptoError::Der(format!(
            "TLV truncated: header claims {} bytes, {} available",
            len,
            data.len() - total_header
        )));
    }

    Ok((
        &data[total_header..total_header + len],
        &data[total_header + len..],
    ))
}

/// Like [`parse_tlv`] but checks the leading tag first.
pub fn parse_tlv_expect(tag: u8, data: &[u8]) -> Result<(&[u8], &[u8]), CryptoError> {
    if data.is_empty() {
        return Err(CryptoError::Der("empty TLV input".into()));
    }
    if data[0] != tag {
        return Err(CryptoError::Der(format!(
            "expected tag 0x{:02X}, found 0x{:02X}",
            tag, data[0]
        )));
    }
    parse_tlv(data)
}

/// Split one TLV off the front of `data`, returning the *whole* encoding
/// (header included) and the rest. Used to lift nested structures such as
/// certificates out of a SignedData set without re-encoding them.
pub fn split_tlv(data: &[u8]) -> Result<(&[u8], &[u8]), CryptoError> {
    if data.is_empty() {
        return Err(CryptoError::Der("empty TLV input".into()));
    }

    let (len, header_len) = parse_length(&data[1..])?;
    let total = 1 + header_len + len;

    if data.len() < total {
        return Err(CryptoError::Der("TLV truncated".into()));
    }

    Ok((&data[..total], &data[total..]))
}

/// Parse a definite length, returning `(length, bytes consumed)`.
pub fn parse_length(data: &[u8]) -> Result<(usize, usize), CryptoError> {
    let first = *data
        .first()
        .ok_or_else(|| CryptoError::Der("missing length byte".into()))?;

    match first {
        n if n < 128 => Ok((n as usize, 1)),
        0x81 => {
            if data.len() < 2 {
                return Err(CryptoError::Der("truncated length".into()));
            }
            Ok((data[1] as usize, 2))
        }
        0x82 => {
            if data.len() < 3 {
                return Err(CryptoError::Der("truncated length".into()));
            }
            Ok((((data[1] as usize) << 8) | data[2] as usize, 3))
        }
        0x83 => {
            if data.len() < 4 {
                return Err(CryptoError::Der("truncated length".into()));
            }
            Ok((
                ((data[1] as usize) << 16) | ((data[2] as usize) << 8) | data[3] as usize,
                4,
            ))
        }
        other => Err(CryptoError::Der(format!(
            "unsupported length encoding 0x{other:02X}"
        ))),
    }
}
