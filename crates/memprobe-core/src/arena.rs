//! Resident memory allocation.

use tracing::debug;

use crate::error::Error;
use crate::Result;

/// An owned block of memory whose pages have all been touched
pub struct AllocationRecord {
    block: Box<[u8]>,
}

impl AllocationRecord {
    pub fn len(&self) -> usize {
        self.block.len()
    }

    pub fn is_empty(&self) -> bool {
        self.block.is_empty()
    }

    /// Byte stored at `offset`, if within the block
    pub fn sample(&self, offset: usize) -> Option<u8> {
        self.block.get(offset).copied()
    }
}

impl std::fmt::Debug for AllocationRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationRecord")
            .field("len", &self.block.len())
            .finish()
    }
}

/// Allocates blocks and forces them to be physically resident
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryArena;

impl MemoryArena {
    pub fn new() -> Self {
        Self
    }

    /// Allocate `bytes` and write `i % 256` at every offset `i`.
    ///
    /// The fill is what makes the pages resident; a reserved but untouched
    /// block would not put any pressure on the cgroup.
    pub fn allocate(&self, bytes: u64) -> Result<AllocationRecord> {
        let len = usize::try_from(bytes).map_err(|_| Error::AllocationFailure {
            bytes,
            reason: "size exceeds the address space".to_string(),
        })?;

        let mut block = Vec::new();
        block
            .try_reserve_exact(len)
            .map_err(|e| Error::AllocationFailure {
                bytes,
                reason: e.to_string(),
            })?;
        block.extend((0..len).map(|i| i as u8));
        debug!(bytes, "filled allocation block");

        Ok(AllocationRecord {
            block: block.into_boxed_slice(),
        })
    }
}
