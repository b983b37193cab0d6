//! Document Security Store writer.
//!
//! Creates or merges the `/DSS` catalog entry carrying the validation
//! material for LT/LTA signatures: `/Certs`, `/CRLs` and `/OCSPs` arrays of
//! streams whose raw bytes are the DER artifacts. The whole change is one
//! append-only incremental update, so previously signed bytes stay intact.

use lopdf::{Dictionary, Object, Stream};
use tracing::{debug, info};

use shared_crypto::der_of_base64;
use shared_pdf::{FileDevice, IncrementalUpdate, PdfDocument};

use crate::error::{Result, SignError};
use crate::ValidationData;

/// Embed `validation` into the document on `device`. Empty validation data
/// is a no-op; the file is not touched.
pub fn write_dss(device: &mut FileDevice, validation: &ValidationData) -> Result<()> {
    if validation.is_empty() {
        debug!("validation data empty, skipping DSS update");
        return Ok(());
    }

    let bytes = device.read_all()?;
    let doc = PdfDocument::from_bytes(bytes)?;
    let mut update = IncrementalUpdate::new(&doc)?;

    let catalog_id = doc.catalog_id()?;
    let mut catalog = doc
        .doc()
        .get_object(catalog_id)
        .map_err(|e| SignError::Decoding(e.to_string()))?
        .as_dict()
        .map_err(|e| SignError::Decoding(e.to_string()))?
        .clone();

    // Reuse an existing DSS dictionary; anything else under /DSS is an error.
    enum DssSource {
        Referenced(lopdf::ObjectId),
        Inline(Dictionary),
        Invalid,
        Absent,
    }
    let source = match catalog.get(b"DSS") {
        Ok(Object::Reference(id)) => DssSource::Referenced(*id),
        Ok(Object::Dictionary(dss)) => DssSource::Inline(dss.clone()),
        Ok(_) => DssSource::Invalid,
        Err(_) => DssSource::Absent,
    };

    let (dss_id, mut dss, catalog_touched) = match source {
        DssSource::Referenced(id) => {
            let dss = doc
                .doc()
                .get_object(id)
                .map_err(|e| SignError::Decoding(e.to_string()))?
                .as_dict()
                .map_err(|_| SignError::Decoding("existing /DSS is not a dictionary".into()))?
                .clone();
            (id, dss, false)
        }
        // Lift a direct dictionary to an indirect object.
        DssSource::Inline(dss) => {
            let id = update.reserve_object_id();
            catalog.set("DSS", Object::Reference(id));
            (id, dss, true)
        }
        DssSource::Invalid => {
            return Err(SignError::Decoding(
                "existing /DSS catalog entry is not a dictionary".into(),
            ))
        }
        DssSource::Absent => {
            let id = update.reserve_object_id();
            catalog.set("DSS", Object::Reference(id));
            (id, Dictionary::new(), true)
        }
    };

    append_dss_array(&doc, &mut update, &mut dss, "Certs", &validation.certificates_base64)?;
    append_dss_array(&doc, &mut update, &mut dss, "CRLs", &validation.crls_base64)?;
    append_dss_array(&doc, &mut update, &mut dss, "OCSPs", &validation.ocsps_base64)?;

    update.add_object(dss_id, Object::Dictionary(dss));
    if catalog_touched {
        update.add_object(catalog_id, Object::Dictionary(catalog));
    }

    let base_len = doc.bytes().len();
    let (section, _) = update.render(base_len);
    device.append(&section)?;

    info!(
        certs = validation.certificate_count(),
        crls = validation.crl_count(),
        ocsps = validation.ocsp_count(),
        "DSS updated"
    );
    Ok(())
}

/// Append one stream object per base64 DER element to the named DSS array,
/// preserving whatever references are already there.
fn append_dss_array(
    doc: &PdfDocument,
    update: &mut IncrementalUpdate,
    dss: &mut Dictionary,
    key: &str,
    items: &[String],
) -> Result<()> {
    if items.is_empty() {
        return Ok(());
    }

    let (array_id, mut array) = match dss.get(key.as_bytes()) {
        Ok(Object::Reference(id)) => {
            let array = doc
                .doc()
                .get_object(*id)
                .map_err(|e| SignError::Decoding(e.to_string()))?
                .as_array()
                .map_err(|_| {
                    SignError::Decoding(format!("existing DSS entry /{key} is not an array"))
                })?
                .clone();
            (Some(*id), array)
        }
        Ok(Object::Array(array)) => (None, array.clone()),
        Ok(_) => {
            return Err(SignError::Decoding(format!(
                "existing DSS entry /{key} is not an array"
            )))
        }
        Err(_) => (None, Vec::new()),
    };

    for item in items {
        let der = der_of_base64(item)?;
        let stream_id = update.reserve_object_id();
        // Raw DER, no filter: readers consume the bytes directly.
        update.add_object(stream_id, Object::Stream(Stream::new(Dictionary::new(), der)));
        array.push(Object::Reference(stream_id));
    }

    match array_id {
        Some(id) => {
            update.add_object(id, Object::Array(array));
        }
        None => {
            let id = update.reserve_object_id();
            update.add_object(id, Object::Array(array));
            dss.set(key, Object::Reference(id));
        }
    }
    Ok(())
}
