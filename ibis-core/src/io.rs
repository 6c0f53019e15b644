//! Memory-mapped file access
//!
//! Every data and query file is mapped read-only and handed to the
//! tokenizer as a byte slice. The OS manages paging; nothing is copied.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::{Error, Result};

/// A read-only memory-mapped file.
#[derive(Debug)]
pub struct MappedFile {
    path: PathBuf,
    mmap: Mmap,
}

impl MappedFile {
    /// Map the file at `path`. Fails with the offending path in the error.
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<MappedFile>> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| Error::OpenFile {
            path: path.clone(),
            source,
        })?;
        // Safety: the dataset is immutable for the lifetime of the run.
        let mmap = unsafe {
            Mmap::map(&file).map_err(|source| Error::OpenFile {
                path: path.clone(),
                source,
            })?
        };
        Ok(Arc::new(MappedFile { path, mmap }))
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.mmap
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// File name for diagnostics.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_map_and_read() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"id|name\n1|a\n").unwrap();
        let file = MappedFile::open(tmp.path()).unwrap();
        assert_eq!(file.bytes(), b"id|name\n1|a\n");
        assert_eq!(file.len(), 12);
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = MappedFile::open("/definitely/not/here.csv").unwrap_err();
        assert!(err.to_string().contains("not/here.csv"));
    }
}
