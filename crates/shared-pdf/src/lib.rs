//! Shared PDF handling for signing flows
//!
//! Wraps lopdf for parsing and supplies the pieces the signing pipeline
//! needs that a whole-document saver cannot provide: an exclusive file
//! device and an append-only incremental-update serializer that leaves
//! every previously written byte untouched.

pub mod device;
pub mod incremental;
pub mod parser;

pub use device::FileDevice;
pub use incremental::{IncrementalUpdate, ObjectSpan};
pub use parser::{find_last, PdfDocument};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PdfError {
    #[error("failed to parse PDF: {0}")]
    Parse(String),

    #[error("malformed PDF structure: {0}")]
    Malformed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
