//! File-backed nonce slot.
//!
//! One `u32`, little-endian, at a fixed path. Writes go through a temp file
//! and rename so a power cut mid-write leaves either the old or the new
//! value, never a torn slot. A missing file reads as zero (factory-fresh);
//! a wrong-sized file is reported as corruption rather than guessed at.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bolt_traits::NonceStore;

use crate::error::HwError;

pub struct FileNonceStore {
    path: PathBuf,
}

impl FileNonceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Reset the slot to zero (boot-time wipe flag).
    pub fn wipe(&mut self) -> std::io::Result<()> {
        write_atomic(&self.path, &0u32.to_le_bytes())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("new");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(tmp, path)
}

impl NonceStore for FileNonceStore {
    fn load(&mut self) -> Result<u32, Box<dyn std::error::Error + Send + Sync>> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                let arr: [u8; 4] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| HwError::CorruptSlot(bytes.len()))?;
                Ok(u32::from_le_bytes(arr))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(Box::new(HwError::Io(e))),
        }
    }

    fn store(&mut self, nonce: u32) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        write_atomic(&self.path, &nonce.to_le_bytes()).map_err(|e| Box::new(HwError::Io(e)).into())
    }
}
