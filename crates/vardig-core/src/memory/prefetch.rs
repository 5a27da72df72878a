//! One-shot prefetch windows.
//!
//! Loading a struct or array issues one read per field or element. When the
//! whole object is small, it is cheaper to read it once and serve the
//! per-field reads from the snapshot. The snapshot is taken on first use; if
//! that read fails every request goes to the inner accessor, so a partially
//! unmapped object still loads field by field.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use super::{MemoryReadWriter, SharedMemory};
use crate::error::Result;
use crate::types::Address;

/// Largest range [`cache_memory`] will snapshot.
pub const MAX_CACHE_SIZE: usize = 1 << 20;

enum Snapshot
{
    Pending,
    Loaded(Vec<u8>),
    Failed,
}

/// Snapshot of `[base, base + size)` over an inner accessor.
pub struct PrefetchedMemory
{
    base: Address,
    size: usize,
    inner: SharedMemory,
    snapshot: Mutex<Snapshot>,
}

impl PrefetchedMemory
{
    fn contains(&self, addr: Address, len: usize) -> bool
    {
        let start = self.base.value();
        let end = start.saturating_add(self.size as u64);
        addr.value() >= start && addr.value().saturating_add(len as u64) <= end
    }
}

/// Wrap `mem` in a prefetch window over `[addr, addr + size)`.
///
/// Returns `mem` unchanged for empty or oversize ranges, for accessors that
/// refuse caching (composite memory), and for ranges `mem` already holds.
pub fn cache_memory(mem: &SharedMemory, addr: Address, size: i64) -> SharedMemory
{
    if size <= 0 || size as usize > MAX_CACHE_SIZE {
        return mem.clone();
    }
    let size = size as usize;
    if !mem.cacheable() || mem.holds_range(addr, size) {
        return mem.clone();
    }
    Arc::new(PrefetchedMemory {
        base: addr,
        size,
        inner: mem.clone(),
        snapshot: Mutex::new(Snapshot::Pending),
    })
}

impl MemoryReadWriter for PrefetchedMemory
{
    fn read_memory(&self, buf: &mut [u8], addr: Address) -> Result<usize>
    {
        if !self.contains(addr, buf.len()) {
            return self.inner.read_memory(buf, addr);
        }
        let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Snapshot::Pending = *snapshot {
            let mut data = vec![0u8; self.size];
            *snapshot = match self.inner.read_memory(&mut data, self.base) {
                Ok(n) if n == self.size => Snapshot::Loaded(data),
                _ => {
                    debug!(base = %self.base, size = self.size, "prefetch failed, reading directly");
                    Snapshot::Failed
                }
            };
        }
        match &*snapshot {
            Snapshot::Loaded(data) => {
                let offset = (addr.value() - self.base.value()) as usize;
                buf.copy_from_slice(&data[offset..offset + buf.len()]);
                Ok(buf.len())
            }
            _ => {
                drop(snapshot);
                self.inner.read_memory(buf, addr)
            }
        }
    }

    fn write_memory(&self, addr: Address, data: &[u8]) -> Result<usize>
    {
        let written = self.inner.write_memory(addr, data)?;
        if self.contains(addr, written) {
            let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
            if let Snapshot::Loaded(bytes) = &mut *snapshot {
                let offset = (addr.value() - self.base.value()) as usize;
                bytes[offset..offset + written].copy_from_slice(&data[..written]);
            }
        }
        Ok(written)
    }

    fn real_memory(&self) -> Option<SharedMemory>
    {
        self.inner.real_memory()
    }

    fn holds_range(&self, addr: Address, size: usize) -> bool
    {
        self.contains(addr, size)
    }
}
