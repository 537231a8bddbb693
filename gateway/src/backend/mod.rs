//! Backend dispatch for the request engine (spec §4.G.2): "Dispatch on the
//! entry's backend: local-file..., process..., SQL...".

mod local_file;
mod process;
#[cfg(feature = "sql-backend")]
mod sql;

pub use local_file::LocalFileBackend;
pub use process::ProcessBackend;
#[cfg(feature = "sql-backend")]
pub use sql::SqlBackend;

use crate::block_index::BlockIndex;
use crate::error::BackendError;
use crate::map_parser::BackendDescriptor;

/// Everything a backend needs to serve one block request. Only the SQL
/// backend uses `block_index`/`fs_path` (to record the row range consumed
/// by each block, per spec §4.G.2); the other backends ignore them.
#[derive(Clone, Copy)]
pub struct BlockReadCtx<'a> {
    pub fs_path: &'a str,
    pub block_id: u64,
    pub blocksize: u64,
    pub block_index: &'a BlockIndex,
}

/// A source back-end for a published path, per spec §2 row H / §4.G.
pub trait Backend: Send + Sync {
    /// Total size in bytes, used for manifest block-count computation.
    fn size(&self) -> Result<u64, BackendError>;

    /// Reads up to `ctx.blocksize` bytes for `ctx.block_id`. An empty
    /// result signals "beyond end of source" (`size=0` response, spec
    /// §4.G.2), not an error.
    fn read_block(&self, ctx: &BlockReadCtx<'_>) -> Result<Vec<u8>, BackendError>;

    /// Reads the entire source in one shot, for manifest generation (spec
    /// §4.G), which needs every block's bytes to hash but not to serve any
    /// one of them individually. The default walks `read_block` block by
    /// block until a short or empty read signals end-of-source; backends
    /// whose `read_block` redoes an expensive whole-source fetch per call
    /// (a process re-exec, a SQL re-query) override this to do that fetch
    /// exactly once instead of once per block.
    fn read_full(&self, fs_path: &str, blocksize: u64, block_index: &BlockIndex) -> Result<Vec<u8>, BackendError> {
        let mut buf = Vec::new();
        let mut block_id = 0u64;
        loop {
            let ctx = BlockReadCtx { fs_path, block_id, blocksize, block_index };
            let chunk = self.read_block(&ctx)?;
            let short = chunk.len() < blocksize as usize;
            buf.extend_from_slice(&chunk);
            if short {
                break;
            }
            block_id += 1;
        }
        Ok(buf)
    }
}

/// Builds the concrete backend for a parsed [`BackendDescriptor`].
pub fn build(descriptor: &BackendDescriptor) -> Result<Box<dyn Backend>, BackendError> {
    match descriptor {
        BackendDescriptor::LocalFile(path) => Ok(Box::new(LocalFileBackend::new(path.clone()))),
        BackendDescriptor::Shell(command) => Ok(Box::new(ProcessBackend::new(command.clone()))),
        BackendDescriptor::Sql(query) => {
            #[cfg(feature = "sql-backend")]
            {
                Ok(Box::new(SqlBackend::open_in_memory(query.clone())?))
            }
            #[cfg(not(feature = "sql-backend"))]
            {
                let _ = query;
                Err(BackendError::Unknown)
            }
        }
    }
}
