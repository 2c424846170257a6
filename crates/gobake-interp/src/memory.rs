//! Linear memory.
//!
//! Every access is bounds-checked and little-endian. The typed helpers are
//! also what the host side uses to read and write call frames.

use gobake_types::PAGE_SIZE;

use crate::error::{ExecResult, Trap};

/// A single linear memory, growable up to `maximum_pages`.
#[derive(Debug, Clone)]
pub struct Memory {
    bytes: Vec<u8>,
    maximum_pages: u32,
}

impl Memory {
    pub fn new(initial_pages: u32, maximum_pages: u32) -> Self {
        Self {
            bytes: vec![0; initial_pages as usize * PAGE_SIZE],
            maximum_pages,
        }
    }

    /// Current size in pages.
    pub fn size_pages(&self) -> u32 {
        (self.bytes.len() / PAGE_SIZE) as u32
    }

    pub fn maximum_pages(&self) -> u32 {
        self.maximum_pages
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The full contents.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Grow by `delta` pages. Returns the previous size, or `None` when the
    /// maximum would be exceeded.
    pub fn grow(&mut self, delta: u32) -> Option<u32> {
        let old = self.size_pages();
        let new = old.checked_add(delta)?;
        if new > self.maximum_pages {
            return None;
        }
        self.bytes.resize(new as usize * PAGE_SIZE, 0);
        Some(old)
    }

    fn range(&self, addr: u64, len: usize) -> ExecResult<std::ops::Range<usize>> {
        let start = usize::try_from(addr).map_err(|_| Trap::MemoryOutOfBounds)?;
        let end = start.checked_add(len).ok_or(Trap::MemoryOutOfBounds)?;
        if end > self.bytes.len() {
            return Err(Trap::MemoryOutOfBounds.into());
        }
        Ok(start..end)
    }

    pub fn read(&self, addr: u64, len: usize) -> ExecResult<&[u8]> {
        let range = self.range(addr, len)?;
        Ok(&self.bytes[range])
    }

    /// Bounds-checked mutable view of `len` bytes at `addr`.
    pub fn read_mut(&mut self, addr: u64, len: usize) -> ExecResult<&mut [u8]> {
        let range = self.range(addr, len)?;
        Ok(&mut self.bytes[range])
    }

    pub fn write(&mut self, addr: u64, data: &[u8]) -> ExecResult<()> {
        let range = self.range(addr, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// `memory.copy`: overlapping ranges behave like `memmove`.
    pub fn copy_within(&mut self, dst: u64, src: u64, len: usize) -> ExecResult<()> {
        let from = self.range(src, len)?;
        let to = self.range(dst, len)?;
        self.bytes.copy_within(from, to.start);
        Ok(())
    }

    pub fn fill(&mut self, dst: u64, byte: u8, len: usize) -> ExecResult<()> {
        let range = self.range(dst, len)?;
        self.bytes[range].fill(byte);
        Ok(())
    }

    pub fn load<const N: usize>(&self, addr: u64) -> ExecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read(addr, N)?);
        Ok(out)
    }

    // ── Typed little-endian helpers ─────────────────────────────────────────

    pub fn read_u8(&self, addr: u64) -> ExecResult<u8> {
        Ok(self.load::<1>(addr)?[0])
    }

    pub fn read_i32(&self, addr: u64) -> ExecResult<i32> {
        Ok(i32::from_le_bytes(self.load(addr)?))
    }

    pub fn read_u32(&self, addr: u64) -> ExecResult<u32> {
        Ok(u32::from_le_bytes(self.load(addr)?))
    }

    pub fn read_i64(&self, addr: u64) -> ExecResult<i64> {
        Ok(i64::from_le_bytes(self.load(addr)?))
    }

    pub fn read_f64(&self, addr: u64) -> ExecResult<f64> {
        Ok(f64::from_le_bytes(self.load(addr)?))
    }

    pub fn write_u8(&mut self, addr: u64, value: u8) -> ExecResult<()> {
        self.write(addr, &[value])
    }

    pub fn write_i32(&mut self, addr: u64, value: i32) -> ExecResult<()> {
        self.write(addr, &value.to_le_bytes())
    }

    pub fn write_u32(&mut self, addr: u64, value: u32) -> ExecResult<()> {
        self.write(addr, &value.to_le_bytes())
    }

    pub fn write_i64(&mut self, addr: u64, value: i64) -> ExecResult<()> {
        self.write(addr, &value.to_le_bytes())
    }

    pub fn write_f64(&mut self, addr: u64, value: f64) -> ExecResult<()> {
        self.write(addr, &value.to_le_bytes())
    }
}
