//! Exclusive read/write handle on the output document.
//!
//! The signing context owns the device for the whole begin/finish window;
//! the DocTimeStamp signer re-reads the serialized file through it to hash
//! the authoritative ByteRange.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::PdfError;

pub struct FileDevice {
    file: File,
    path: PathBuf,
}

impl FileDevice {
    /// Open an existing file for reading and writing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PdfError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole file from the beginning.
    pub fn read_all(&mut self) -> Result<Vec<u8>, PdfError> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        self.file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Replace the entire file content.
    pub fn overwrite(&mut self, bytes: &[u8]) -> Result<(), PdfError> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.set_len(0)?;
        self.file.write_all(bytes)?;
        self.file.flush()?;
        Ok(())
    }

    /// Append past the current end of file.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), PdfError> {
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(bytes)?;
        self.file.flush()?;
        Ok(())
    }

    pub fn len(&self) -> Result<u64, PdfError> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, PdfError> {
        Ok(self.len()? == 0)
    }
}
