//! PDF parsing and inspection using lopdf.

use lopdf::{Document, ObjectId};

use crate::PdfError;

/// Wrapper around `lopdf::Document` that keeps the exact bytes it was
/// loaded from. Signing needs both views: the object graph for layout and
/// the raw bytes for offset arithmetic.
pub struct PdfDocument {
    doc: Document,
    bytes: Vec<u8>,
}

impl PdfDocument {
    /// Load a PDF from raw bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, PdfError> {
        let doc =
            Document::load_mem(&bytes).map_err(|e| PdfError::Parse(e.to_string()))?;
        Ok(Self { doc, bytes })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn doc(&self) -> &Document {
        &self.doc
    }

    pub fn page_count(&self) -> usize {
        self.doc.get_pages().len()
    }

    /// Page object ID for a 1-indexed page number.
    pub fn page_id(&self, page_num: u32) -> Option<ObjectId> {
        self.doc.get_pages().get(&page_num).copied()
    }

    /// The catalog object referenced by the trailer `/Root`.
    pub fn catalog_id(&self) -> Result<ObjectId, PdfError> {
        self.doc
            .trailer
            .get(b"Root")
            .and_then(|r| r.as_reference())
            .map_err(|_| PdfError::Malformed("trailer has no /Root reference".into()))
    }

    /// Highest object number currently in use.
    pub fn max_id(&self) -> u32 {
        self.doc.max_id
    }

    /// Offset of the most recent cross-reference section, taken from the
    /// trailing `startxref` of the loaded bytes. This becomes `/Prev` in the
    /// next incremental update.
    pub fn last_startxref(&self) -> Result<u64, PdfError> {
        let pos = find_last(&self.bytes, b"startxref")
            .ok_or_else(|| PdfError::Malformed("no startxref marker".into()))?;
        let tail = &self.bytes[pos + b"startxref".len()..];
        let digits: Vec<u8> = tail
            .iter()
            .copied()
            .skip_while(|b| b.is_ascii_whitespace())
            .take_while(|b| b.is_ascii_digit())
            .collect();
        if digits.is_empty() {
            return Err(PdfError::Malformed("startxref has no offset".into()));
        }
        String::from_utf8_lossy(&digits)
            .parse::<u64>()
            .map_err(|_| PdfError::Malformed("startxref offset out of range".into()))
    }
}

/// Find the last occurrence of `needle` in `haystack`.
pub fn find_last(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    let len = needle.len();
    if len == 0 || len > haystack.len() {
        return None;
    }
    (0..=(haystack.len() - len))
        .rev()
        .find(|&i| &haystack[i..i + len] == needle)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// `find_last` reports the final occurrence, never an earlier one.
        #[test]
        fn find_last_is_really_last(
            prefix in prop::collection::vec(any::<u8>(), 0..60),
            gap in prop::collection::vec(any::<u8>(), 0..60),
        ) {
            let needle = b"%%EOF";
            let mut haystack = prefix.clone();
            haystack.extend_from_slice(needle);
            haystack.extend(gap.iter().filter(|&&b| b != b'%'));
            let expected = haystack.len();
            haystack.extend_from_slice(needle);

            prop_assert_eq!(find_last(&haystack, needle), Some(expected));
        }

        /// `find_last` never panics and never reports an out-of-range index.
        #[test]
        fn find_last_in_bounds(
            haystack in prop::collection::vec(any::<u8>(), 0..200),
            needle in prop::collection::vec(any::<u8>(), 0..10),
        ) {
            if let Some(pos) = find_last(&haystack, &needle) {
                prop_assert!(pos + needle.len() <= haystack.len());
                prop_assert_eq!(&haystack[pos..pos + needle.len()], &needle[..]);
            }
        }
    }
}
