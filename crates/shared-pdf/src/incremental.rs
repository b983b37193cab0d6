//! Append-only incremental update serialization.
//!
//! A signed PDF must never have its existing bytes rewritten: every change
//! after the first signature goes into a new section past the previous
//! `%%EOF` (objects, a classic xref section, a trailer chaining to the prior
//! one via `/Prev`). lopdf's own saver rewrites whole documents, so the
//! update section is serialized here by hand.

use lopdf::{Dictionary, Object, ObjectId};
use tracing::debug;

use crate::parser::PdfDocument;
use crate::PdfError;

/// Absolute byte span of one serialized object inside the output file.
#[derive(Debug, Clone, Copy)]
pub struct ObjectSpan {
    pub id: ObjectId,
    pub start: usize,
    pub end: usize,
}

/// One incremental update in the making: a set of new or replacement
/// objects plus the trailer bookkeeping derived from the loaded document.
pub struct IncrementalUpdate {
    objects: Vec<(ObjectId, Object)>,
    root: ObjectId,
    next_id: u32,
    prev: u64,
}

impl IncrementalUpdate {
    pub fn new(doc: &PdfDocument) -> Result<Self, PdfError> {
        Ok(Self {
            objects: Vec::new(),
            root: doc.catalog_id()?,
            next_id: doc.max_id() + 1,
            prev: doc.last_startxref()?,
        })
    }

    /// Allocate a fresh object number past everything in the document.
    pub fn reserve_object_id(&mut self) -> ObjectId {
        let id = (self.next_id, 0);
        self.next_id += 1;
        id
    }

    /// Add a new object or a replacement for an existing one. Adding the
    /// same ID twice keeps the latest version.
    pub fn add_object(&mut self, id: ObjectId, object: Object) {
        if let Some(slot) = self.objects.iter_mut().find(|(existing, _)| *existing == id) {
            slot.1 = object;
        } else {
            self.objects.push((id, object));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Serialize the update section. `base_len` is the length of the file
    /// the section will be appended to; all offsets (xref entries, object
    /// spans) are absolute in the resulting file.
    pub fn render(&self, base_len: usize) -> (Vec<u8>, Vec<ObjectSpan>) {
        let mut sorted: Vec<&(ObjectId, Object)> = self.objects.iter().collect();
        sorted.sort_by_key(|(id, _)| *id);

        let mut body = vec![b'\n'];
        let mut spans = Vec::new();

        for (id, object) in &sorted {
            let start = base_len + body.len();
            body.extend(format!("{} {} obj\n", id.0, id.1).as_bytes());
            write_object(&mut body, object);
            body.extend(b"\nendobj\n");
            spans.push(ObjectSpan {
                id: *id,
                start,
                end: base_len + body.len(),
            });
        }

        let xref_offset = base_len + body.len();
        body.extend(b"xref\n");

        let mut i = 0;
        while i < sorted.len() {
            let mut j = i + 1;
            while j < sorted.len() && sorted[j].0 .0 == sorted[j - 1].0 .0 + 1 {
                j += 1;
            }
            body.extend(format!("{} {}\n", sorted[i].0 .0, j - i).as_bytes());
            for k in i..j {
                let offset = spans[k].start;
                body.extend(format!("{:010} {:05} n \n", offset, sorted[k].0 .1).as_bytes());
            }
            i = j;
        }

        let mut trailer = Dictionary::new();
        trailer.set("Size", self.next_id as i64);
        trailer.set("Root", Object::Reference(self.root));
        trailer.set("Prev", self.prev as i64);

        body.extend(b"trailer\n");
        write_object(&mut body, &Object::Dictionary(trailer));
        body.extend(format!("\nstartxref\n{}\n%%EOF\n", xref_offset).as_bytes());

        debug!(
            objects = sorted.len(),
            xref_offset, "rendered incremental update"
        );

        (body, spans)
    }
}

/// Serialize a single object body (without the `obj`/`endobj` wrapper).
pub fn write_object(buf: &mut Vec<u8>, object: &Object) {
    match object {
        Object::Null => buf.extend(b"null"),
        Object::Boolean(b) => buf.extend(if *b { &b"true"[..] } else { &b"false"[..] }),
        Object::Integer(i) => buf.extend(i.to_string().as_bytes()),
        Object::Real(r) => buf.extend(format!("{r}").as_bytes()),
        Object::Name(name) => write_name(buf, name),
        Object::String(bytes, lopdf::StringFormat::Literal) => {
            buf.push(b'(');
            for &b in bytes {
                match b {
                    b'(' => buf.extend(b"\\("),
                    b')' => buf.extend(b"\\)"),
                    b'\\' => buf.extend(b"\\\\"),
                    b'\r' => buf.extend(b"\\r"),
                    b'\n' => buf.extend(b"\\n"),
                    _ => buf.push(b),
                }
            }
            buf.push(b')');
        }
        Object::String(bytes, lopdf::StringFormat::Hexadecimal) => {
            buf.push(b'<');
            buf.extend(hex_lower(bytes));
            buf.push(b'>');
        }
        Object::Array(items) => {
            buf.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(b' ');
                }
                write_object(buf, item);
            }
            buf.push(b']');
        }
        Object::Dictionary(dict) => write_dictionary(buf, dict),
        Object::Stream(stream) => {
            let mut dict = stream.dict.clone();
            dict.set("Length", stream.content.len() as i64);
            write_dictionary(buf, &dict);
            buf.extend(b"\nstream\n");
            buf.extend_from_slice(&stream.content);
            buf.extend(b"\nendstream");
        }
        Object::Reference((num, gen)) => {
            buf.extend(format!("{num} {gen} R").as_bytes());
        }
    }
}

fn write_dictionary(buf: &mut Vec<u8>, dict: &Dictionary) {
    buf.extend(b"<< ");
    for (key, value) in dict.iter() {
        write_name(buf, key);
        buf.push(b' ');
        write_object(buf, value);
        buf.push(b' ');
    }
    buf.extend(b">>");
}

fn write_name(buf: &mut Vec<u8>, name: &[u8]) {
    buf.push(b'/');
    for &b in name {
        let delimiter = matches!(
            b,
            b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%' | b'#'
        );
        if (0x21..=0x7E).contains(&b) && !delimiter {
            buf.push(b);
        } else {
            buf.extend(format!("#{b:02X}").as_bytes());
        }
    }
}

fn hex_lower(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.extend(format!("{b:02x}").as_bytes());
    }
    out
}
