use std::hint::black_box;

/// Page granularity used when reporting how much a block spans.
pub const PAGE_SIZE: usize = 4096;

/// A committed block of memory. Dropping it releases the memory.
#[derive(Debug, Default)]
pub struct Allocation {
    block: Vec<u8>,
}

impl Allocation {
    pub fn len(&self) -> usize {
        self.block.len()
    }

    pub fn is_empty(&self) -> bool {
        self.block.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.block
    }

    /// Number of pages the block spans.
    pub fn pages(&self) -> usize {
        self.block.len().div_ceil(PAGE_SIZE)
    }
}

/// Allocates exactly `size` zero-filled bytes and writes every one of them.
///
/// The fill value goes through `black_box`, so the allocator cannot hand back
/// untouched zero pages and the optimizer cannot turn the fill into a lazy
/// `calloc`. The memory therefore shows up in resident set metrics as soon as
/// this returns.
pub fn allocate(size: usize) -> Allocation {
    let mut block = Vec::with_capacity(size);
    block.resize(size, black_box(0u8));
    Allocation { block }
}
