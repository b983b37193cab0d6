//! Signing context: placeholder layout, ByteRange computation and the
//! two-phase start/finish state machine.
//!
//! The context owns its signers. `start_signing` lays out one incremental
//! update holding every signature dictionary with a zeroed Contents
//! placeholder, fixes the byte offsets, hands each signer its ranged bytes
//! and exports the intermediate digests. `finish_signing` splices the
//! externally produced values back into the reserved placeholders without
//! moving a single byte of the layout.

use std::collections::HashMap;

use lopdf::{Dictionary, Object, ObjectId, StringFormat};
use tracing::{debug, info};

use shared_pdf::{FileDevice, IncrementalUpdate, ObjectSpan, PdfDocument};

use crate::error::{Result, SignError};
use crate::signer::Signer;

/// Widget flags Invisible | Hidden.
const SIG_FIELD_FLAGS: i64 = 3;

/// Ten-digit stand-in keeping the ByteRange array wide enough for any
/// offset the final layout can produce.
const PROVISIONAL_RANGE: i64 = 9_999_999_999;

/// Stable handle for a signer registered with a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignerId(pub(crate) usize);

/// Per-signer intermediate buffers.
///
/// After `start_signing` each entry holds the digest to be signed; the
/// caller overwrites it with the externally produced bytes before
/// `finish_signing`.
#[derive(Default)]
pub struct SigningResults {
    pub intermediate: HashMap<SignerId, Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextState {
    Idle,
    Started,
    Finished,
}

struct SignerSlot {
    field_name: String,
    signer: Box<dyn Signer>,
    /// Reserved Contents size in bytes (hex width is twice this).
    reserved: usize,
    /// Absolute offset of the `<` opening the Contents hex string.
    contents_offset: usize,
    byte_range: [i64; 4],
}

/// Single-use signing context; one `start_signing`/`finish_signing` pair.
pub struct SigningContext {
    slots: Vec<SignerSlot>,
    state: ContextState,
}

impl Default for SigningContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SigningContext {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            state: ContextState::Idle,
        }
    }

    /// Register a signer against a signature field name.
    pub fn add_signer(&mut self, field_name: impl Into<String>, signer: Box<dyn Signer>) -> SignerId {
        self.slots.push(SignerSlot {
            field_name: field_name.into(),
            signer,
            reserved: 0,
            contents_offset: 0,
            byte_range: [0; 4],
        });
        SignerId(self.slots.len() - 1)
    }

    pub fn signer_mut(&mut self, id: SignerId) -> Option<&mut (dyn Signer + '_)> {
        match self.slots.get_mut(id.0) {
            Some(slot) => Some(slot.signer.as_mut()),
            None => None,
        }
    }

    /// Lay out the signature objects, fix the ByteRanges and export the
    /// intermediate digests into `results`.
    pub fn start_signing(
        &mut self,
        doc: &PdfDocument,
        device: &mut FileDevice,
        results: &mut SigningResults,
    ) -> Result<()> {
        if self.state != ContextState::Idle {
            return Err(SignError::State(
                "signing context already started".into(),
            ));
        }
        if self.slots.is_empty() {
            return Err(SignError::InvalidParameter(
                "no signers registered with the context".into(),
            ));
        }

        let page_id = doc
            .page_id(1)
            .ok_or_else(|| SignError::Decoding("document has no pages".into()))?;

        let mut update = IncrementalUpdate::new(doc)?;
        let mut field_refs = Vec::new();
        let mut sig_ids = Vec::new();

        for slot in &mut self.slots {
            let reserved = slot.signer.compute_signature_deferred(&[], true)?.len();
            slot.reserved = reserved;

            let sig_id = update.reserve_object_id();
            let field_id = update.reserve_object_id();

            let mut sig_dict = Dictionary::new();
            sig_dict.set(
                "Type",
                Object::Name(slot.signer.signature_type().as_bytes().to_vec()),
            );
            sig_dict.set(
                "Filter",
                Object::Name(slot.signer.signature_filter().as_bytes().to_vec()),
            );
            sig_dict.set(
                "SubFilter",
                Object::Name(slot.signer.signature_sub_filter().as_bytes().to_vec()),
            );
            if let Some(date) = slot.signer.signature_date() {
                sig_dict.set("M", Object::String(date.into_bytes(), StringFormat::Literal));
            }
            sig_dict.set(
                "Contents",
                Object::String(vec![0u8; reserved], StringFormat::Hexadecimal),
            );
            sig_dict.set(
                "ByteRange",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(PROVISIONAL_RANGE),
                    Object::Integer(PROVISIONAL_RANGE),
                    Object::Integer(PROVISIONAL_RANGE),
                ]),
            );
            update.add_object(sig_id, Object::Dictionary(sig_dict));

            let mut field = Dictionary::new();
            field.set("Type", Object::Name(b"Annot".to_vec()));
            field.set("Subtype", Object::Name(b"Widget".to_vec()));
            field.set("FT", Object::Name(b"Sig".to_vec()));
            field.set(
                "T",
                Object::String(slot.field_name.clone().into_bytes(), StringFormat::Literal),
            );
            field.set("V", Object::Reference(sig_id));
            field.set(
                "Rect",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(0),
                ]),
            );
            field.set("F", Object::Integer(SIG_FIELD_FLAGS));
            field.set("P", Object::Reference(page_id));
            update.add_object(field_id, Object::Dictionary(field));

            field_refs.push(Object::Reference(field_id));
            sig_ids.push(sig_id);

            debug!(field = %slot.field_name, reserved, "reserved signature placeholder");
        }

        attach_to_page(doc, &mut update, page_id, &field_refs)?;
        attach_to_acroform(doc, &mut update, &field_refs)?;

        let base = doc.bytes();
        let (section, spans) = update.render(base.len());
        let mut bytes = Vec::with_capacity(base.len() + section.len());
        bytes.extend_from_slice(base);
        bytes.extend_from_slice(&section);

        for (slot, sig_id) in self.slots.iter_mut().zip(&sig_ids) {
            let span = spans
                .iter()
                .find(|s| s.id == *sig_id)
                .ok_or_else(|| SignError::State("signature object missing from layout".into()))?;

            let contents_offset = locate_contents(&bytes, span)?;
            let gap_end = contents_offset + slot.reserved * 2 + 2;
            if gap_end > bytes.len() {
                return Err(SignError::Decoding(
                    "Contents placeholder extends past end of file".into(),
                ));
            }
            let byte_range = [
                0,
                contents_offset as i64,
                gap_end as i64,
                (bytes.len() - gap_end) as i64,
            ];
            rewrite_byte_range(&mut bytes, span, byte_range)?;

            slot.contents_offset = contents_offset;
            slot.byte_range = byte_range;
            debug!(field = %slot.field_name, ?byte_range, "fixed ByteRange");
        }

        device.overwrite(&bytes)?;

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if !slot.signer.skip_buffer_clear() {
                slot.signer.reset();
            }
            let [_, l0, a1, l1] = slot.byte_range;
            slot.signer.append_data(&bytes[0..l0 as usize]);
            slot.signer
                .append_data(&bytes[a1 as usize..(a1 + l1) as usize]);
            let digest = slot.signer.fetch_intermediate_result(device)?;
            results.intermediate.insert(SignerId(index), digest);
        }

        info!(signers = self.slots.len(), file_len = bytes.len(), "signing started");
        self.state = ContextState::Started;
        Ok(())
    }

    /// Inject the externally produced values into the reserved placeholders.
    pub fn finish_signing(
        &mut self,
        device: &mut FileDevice,
        results: &SigningResults,
    ) -> Result<()> {
        if self.state != ContextState::Started {
            return Err(SignError::State(
                "finish_signing requires a matching start_signing".into(),
            ));
        }

        let mut bytes = device.read_all()?;

        for (index, slot) in self.slots.iter_mut().enumerate() {
            let processed = results
                .intermediate
                .get(&SignerId(index))
                .ok_or_else(|| {
                    SignError::State(format!(
                        "no external result for signer field `{}`",
                        slot.field_name
                    ))
                })?;

            let contents = slot.signer.compute_signature_deferred(processed, false)?;
            if contents.len() > slot.reserved {
                return Err(SignError::PlaceholderOverflow {
                    actual: contents.len(),
                    reserved: slot.reserved,
                });
            }

            let hex = hex::encode(&contents);
            let start = slot.contents_offset + 1;
            let end = start + slot.reserved * 2;
            if end > bytes.len() {
                return Err(SignError::Decoding(
                    "Contents placeholder extends past end of file".into(),
                ));
            }
            let region = &mut bytes[start..end];
            region[..hex.len()].copy_from_slice(hex.as_bytes());
            for b in &mut region[hex.len()..] {
                *b = b'0';
            }

            debug!(
                field = %slot.field_name,
                contents_len = contents.len(),
                reserved = slot.reserved,
                "injected signature contents"
            );
        }

        device.overwrite(&bytes)?;
        info!(signers = self.slots.len(), "signing finished");
        self.state = ContextState::Finished;
        Ok(())
    }
}

fn obj_err(err: lopdf::Error) -> SignError {
    SignError::Decoding(err.to_string())
}

enum Container {
    Referenced(ObjectId, Vec<Object>),
    Direct(Vec<Object>),
    Missing,
}

fn resolve_array(doc: &PdfDocument, value: Option<&Object>) -> Result<Container> {
    match value {
        Some(Object::Reference(id)) => {
            let array = doc
                .doc()
                .get_object(*id)
                .map_err(obj_err)?
                .as_array()
                .map_err(obj_err)?
                .clone();
            Ok(Container::Referenced(*id, array))
        }
        Some(Object::Array(array)) => Ok(Container::Direct(array.clone())),
        Some(_) => Err(SignError::Decoding(
            "expected an array or reference to one".into(),
        )),
        None => Ok(Container::Missing),
    }
}

fn attach_to_page(
    doc: &PdfDocument,
    update: &mut IncrementalUpdate,
    page_id: ObjectId,
    field_refs: &[Object],
) -> Result<()> {
    let mut page = doc
        .doc()
        .get_object(page_id)
        .map_err(obj_err)?
        .as_dict()
        .map_err(obj_err)?
        .clone();

    match resolve_array(doc, page.get(b"Annots").ok())? {
        Container::Referenced(annots_id, mut annots) => {
            annots.extend(field_refs.iter().cloned());
            update.add_object(annots_id, Object::Array(annots));
        }
        Container::Direct(mut annots) => {
            annots.extend(field_refs.iter().cloned());
            page.set("Annots", Object::Array(annots));
            update.add_object(page_id, Object::Dictionary(page));
        }
        Container::Missing => {
            page.set("Annots", Object::Array(field_refs.to_vec()));
            update.add_object(page_id, Object::Dictionary(page));
        }
    }
    Ok(())
}

fn attach_to_acroform(
    doc: &PdfDocument,
    update: &mut IncrementalUpdate,
    field_refs: &[Object],
) -> Result<()> {
    let catalog_id = doc.catalog_id()?;
    let mut catalog = doc
        .doc()
        .get_object(catalog_id)
        .map_err(obj_err)?
        .as_dict()
        .map_err(obj_err)?
        .clone();

    enum FormSource {
        Referenced(ObjectId),
        Inline(Dictionary),
        Absent,
    }
    let source = match catalog.get(b"AcroForm") {
        Ok(Object::Reference(id)) => FormSource::Referenced(*id),
        Ok(Object::Dictionary(form)) => FormSource::Inline(form.clone()),
        _ => FormSource::Absent,
    };

    let (form_id, mut form, catalog_touched) = match source {
        FormSource::Referenced(id) => {
            let form = doc
                .doc()
                .get_object(id)
                .map_err(obj_err)?
                .as_dict()
                .map_err(obj_err)?
                .clone();
            (id, form, false)
        }
        // A direct AcroForm dictionary gets lifted to an indirect object so
        // the catalog only changes once.
        FormSource::Inline(form) => {
            let id = update.reserve_object_id();
            catalog.set("AcroForm", Object::Reference(id));
            (id, form, true)
        }
        FormSource::Absent => {
            let id = update.reserve_object_id();
            catalog.set("AcroForm", Object::Reference(id));
            (id, Dictionary::new(), true)
        }
    };

    match resolve_array(doc, form.get(b"Fields").ok())? {
        Container::Referenced(fields_id, mut fields) => {
            fields.extend(field_refs.iter().cloned());
            update.add_object(fields_id, Object::Array(fields));
        }
        Container::Direct(mut fields) => {
            fields.extend(field_refs.iter().cloned());
            form.set("Fields", Object::Array(fields));
        }
        Container::Missing => {
            form.set("Fields", Object::Array(field_refs.to_vec()));
        }
    }
    form.set("SigFlags", Object::Integer(3));
    update.add_object(form_id, Object::Dictionary(form));

    if catalog_touched {
        update.add_object(catalog_id, Object::Dictionary(catalog));
    }
    Ok(())
}

/// Absolute offset of the `<` opening the Contents hex string, searched
/// only inside the serialized signature object.
fn locate_contents(bytes: &[u8], span: &ObjectSpan) -> Result<usize> {
    let window = &bytes[span.start..span.end.min(bytes.len())];
    let marker = b"/Contents";
    let rel = window
        .windows(marker.len())
        .position(|w| w == marker)
        .ok_or_else(|| SignError::Decoding("signature object lacks /Contents".into()))?;
    let after = rel + marker.len();
    let lt = window[after..]
        .iter()
        .position(|&b| b == b'<')
        .ok_or_else(|| SignError::Decoding("Contents hex string not found".into()))?;
    Ok(span.start + after + lt)
}

/// Overwrite the provisional ByteRange with the real values, padding with
/// spaces so the file layout does not move.
fn rewrite_byte_range(bytes: &mut [u8], span: &ObjectSpan, byte_range: [i64; 4]) -> Result<()> {
    let window = &bytes[span.start..span.end.min(bytes.len())];
    let marker = b"/ByteRange";
    let rel = window
        .windows(marker.len())
        .position(|w| w == marker)
        .ok_or_else(|| SignError::Decoding("signature object lacks /ByteRange".into()))?;

    let abs = span.start + rel;
    let open = bytes[abs..span.end]
        .iter()
        .position(|&b| b == b'[')
        .map(|i| abs + i)
        .ok_or_else(|| SignError::Decoding("ByteRange array not found".into()))?;
    let close = bytes[open..span.end]
        .iter()
        .position(|&b| b == b']')
        .map(|i| open + i)
        .ok_or_else(|| SignError::Decoding("ByteRange array not terminated".into()))?;

    let text = format!(
        "[{} {} {} {}]",
        byte_range[0], byte_range[1], byte_range[2], byte_range[3]
    );
    let width = close + 1 - open;
    if text.len() > width {
        return Err(SignError::State(
            "ByteRange values wider than the reserved array".into(),
        ));
    }

    bytes[open..open + text.len()].copy_from_slice(text.as_bytes());
    for b in &mut bytes[open + text.len()..close + 1] {
        *b = b' ';
    }
    Ok(())
}
