use anyhow::{Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;
use std::fs::File;

/// Sequential reader over a memory-mapped checkpoint.
#[derive(Debug)]
pub(crate) struct MemoryMapper {
    mmap: Mmap,
    offset: usize,
}

impl MemoryMapper {
    pub fn new(file: File) -> Result<Self> {
        let mmap = unsafe { memmap2::MmapOptions::new().map(&file).context("Failed to create memory mapping")? };
        Ok(Self { mmap, offset: 0 })
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn remaining(&self) -> usize {
        self.mmap.len() - self.offset
    }

    pub fn get_bytes(&mut self, count: usize) -> Result<&[u8]> {
        if count > self.remaining() {
            anyhow::bail!("Insufficient data: need {} bytes, have {} remaining", count, self.remaining());
        }

        let result = &self.mmap[self.offset..self.offset + count];
        self.offset += count;
        Ok(result)
    }

    /// Fills `dst` with little-endian f32 values; no alignment requirement on the mapping.
    pub fn read_f32_into(&mut self, dst: &mut [f32]) -> Result<()> {
        let bytes = self.get_bytes(dst.len() * std::mem::size_of::<f32>())?;
        LittleEndian::read_f32_into(bytes, dst);
        Ok(())
    }
}
