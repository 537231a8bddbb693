//! Local-file backend: `open` + `lseek` to `block_id * blocksize`, stream up
//! to `blocksize` bytes, per spec §4.G.2.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use super::{Backend, BlockReadCtx};
use crate::block_index::BlockIndex;
use crate::error::BackendError;

pub struct LocalFileBackend {
    path: PathBuf,
}

impl LocalFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LocalFileBackend { path: path.into() }
    }
}

impl Backend for LocalFileBackend {
    fn size(&self) -> Result<u64, BackendError> {
        Ok(fs::metadata(&self.path)?.len())
    }

    fn read_block(&self, ctx: &BlockReadCtx<'_>) -> Result<Vec<u8>, BackendError> {
        let offset = ctx.block_id.checked_mul(ctx.blocksize).ok_or(BackendError::Unknown)?;
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; ctx.blocksize as usize];
        let n = file.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn read_full(&self, _fs_path: &str, _blocksize: u64, _block_index: &BlockIndex) -> Result<Vec<u8>, BackendError> {
        Ok(fs::read(&self.path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_index::BlockIndex;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn reads_exact_bytes_for_a_small_file() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"hello world\n").unwrap();
        let backend = LocalFileBackend::new(f.path());
        let index = BlockIndex::new();
        let ctx = BlockReadCtx { fs_path: "/foo/bar", block_id: 0, blocksize: 4096, block_index: &index };
        let data = backend.read_block(&ctx).unwrap();
        assert_eq!(data, b"hello world\n");
        assert_eq!(backend.size().unwrap(), 12);
    }

    #[test]
    fn read_past_end_of_file_returns_empty() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"short").unwrap();
        let backend = LocalFileBackend::new(f.path());
        let index = BlockIndex::new();
        let ctx = BlockReadCtx { fs_path: "/foo/bar", block_id: 10, blocksize: 4096, block_index: &index };
        let data = backend.read_block(&ctx).unwrap();
        assert!(data.is_empty());
    }
}
