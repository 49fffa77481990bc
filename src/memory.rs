use crate::trap::Trap;
use crate::types::MemoryType;
use crate::WASM_PAGE_SIZE;

/// A linear memory instance backed by a plain byte vector, sized in 64 KiB
/// pages and bounded by both its declared maximum and the configured
/// absolute page cap.
#[derive(Debug, Clone)]
pub struct MemoryInstance {
    ty: MemoryType,
    cap_pages: u32,
    data: Vec<u8>,
}

impl MemoryInstance {
    pub fn new(ty: MemoryType, cap_pages: u32) -> Self {
        let pages = ty.limits.min.min(cap_pages);
        Self {
            ty,
            cap_pages,
            data: vec![0; pages as usize * WASM_PAGE_SIZE as usize],
        }
    }

    pub fn ty(&self) -> &MemoryType {
        &self.ty
    }

    /// Current size in pages.
    pub fn page_count(&self) -> u32 {
        (self.data.len() / WASM_PAGE_SIZE as usize) as u32
    }

    /// Current size in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Grow by `delta` pages zero-filled, returning the previous page
    /// count, or `None` when the declared maximum or the configured cap
    /// would be exceeded. State is untouched on failure.
    pub fn grow(&mut self, delta: u32) -> Option<u32> {
        let old = self.page_count();
        let new = old.checked_add(delta)?;
        let max = self.ty.limits.max.unwrap_or(u32::MAX).min(self.cap_pages);
        if new > max {
            return None;
        }
        self.data
            .resize(new as usize * WASM_PAGE_SIZE as usize, 0);
        Some(old)
    }

    /// Bounds-checked read of `N` bytes at the 64-bit effective address.
    pub fn load<const N: usize>(&self, addr: u64) -> Result<[u8; N], Trap> {
        let end = addr.checked_add(N as u64).ok_or(Trap::MemoryOutOfBounds)?;
        if end > self.data.len() as u64 {
            return Err(Trap::MemoryOutOfBounds);
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[addr as usize..end as usize]);
        Ok(out)
    }

    /// Bounds-checked write of `bytes` at the 64-bit effective address.
    pub fn store(&mut self, addr: u64, bytes: &[u8]) -> Result<(), Trap> {
        let end = addr
            .checked_add(bytes.len() as u64)
            .ok_or(Trap::MemoryOutOfBounds)?;
        if end > self.data.len() as u64 {
            return Err(Trap::MemoryOutOfBounds);
        }
        self.data[addr as usize..end as usize].copy_from_slice(bytes);
        Ok(())
    }

    /// Borrow `[offset, offset+len)` for the embedder; fails instead of
    /// trapping since no invocation is in flight.
    pub fn slice(&self, offset: u32, len: u32) -> Result<&[u8], Trap> {
        let end = (offset as u64) + (len as u64);
        if end > self.data.len() as u64 {
            return Err(Trap::MemoryOutOfBounds);
        }
        Ok(&self.data[offset as usize..end as usize])
    }

    pub fn slice_mut(&mut self, offset: u32, len: u32) -> Result<&mut [u8], Trap> {
        let end = (offset as u64) + (len as u64);
        if end > self.data.len() as u64 {
            return Err(Trap::MemoryOutOfBounds);
        }
        Ok(&mut self.data[offset as usize..end as usize])
    }

    /// Copy `bytes` into memory at `offset` (embedder-side write).
    pub fn set_data(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Trap> {
        self.store(offset as u64, bytes)
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Limits;

    fn memory(min: u32, max: Option<u32>) -> MemoryInstance {
        MemoryInstance::new(
            MemoryType {
                limits: Limits::new(min, max),
            },
            65536,
        )
    }

    #[test]
    fn loads_and_stores_are_bounds_checked() {
        let mut m = memory(1, None);
        m.store(0, &42u32.to_le_bytes()).unwrap();
        assert_eq!(u32::from_le_bytes(m.load::<4>(0).unwrap()), 42);
        // One byte past the end of the single page.
        assert_eq!(m.load::<4>(65533).unwrap_err(), Trap::MemoryOutOfBounds);
        assert_eq!(
            m.store(65536, &[1]).unwrap_err(),
            Trap::MemoryOutOfBounds
        );
        // Effective addresses are computed in u64 and cannot wrap.
        assert_eq!(m.load::<8>(u64::MAX - 2).unwrap_err(), Trap::MemoryOutOfBounds);
    }

    #[test]
    fn grow_at_declared_max_fails_without_side_effects() {
        let mut m = memory(1, Some(2));
        assert_eq!(m.grow(1), Some(1));
        assert_eq!(m.page_count(), 2);
        assert_eq!(m.grow(1), None);
        assert_eq!(m.page_count(), 2);
    }

    #[test]
    fn grow_respects_the_configured_cap() {
        let mut m = MemoryInstance::new(
            MemoryType {
                limits: Limits::new(1, None),
            },
            2,
        );
        assert_eq!(m.grow(1), Some(1));
        assert_eq!(m.grow(1), None);
        assert_eq!(m.page_count(), 2);
    }
}
