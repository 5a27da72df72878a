//! Read-through page cache over another accessor.
//!
//! Pages are fetched whole from the inner accessor and kept until the target
//! resumes. Writes go straight through and drop the pages they touch.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::Lazy;
use tracing::trace;

use super::{MemoryReadWriter, SharedMemory};
use crate::error::Result;
use crate::types::Address;

static SYSTEM_PAGE_SIZE: Lazy<usize> = Lazy::new(|| unsafe {
    let size = libc::sysconf(libc::_SC_PAGESIZE);
    if size <= 0 { 4096 } else { size as usize }
});

fn page_align_down(value: u64, page_size: usize) -> u64
{
    let mask = !(page_size as u64 - 1);
    value & mask
}

/// Page cache in front of a [`MemoryReadWriter`].
pub struct CachedMemory
{
    inner: SharedMemory,
    page_size: usize,
    pages: RwLock<HashMap<u64, Arc<Vec<u8>>>>,
}

impl CachedMemory
{
    /// Cache `inner` using the system page size.
    pub fn new(inner: SharedMemory) -> Self
    {
        Self::with_page_size(inner, *SYSTEM_PAGE_SIZE)
    }

    /// Cache `inner` with a custom page size (rounded up to a power of two, at least 1 KiB).
    pub fn with_page_size(inner: SharedMemory, page_size: usize) -> Self
    {
        Self {
            inner,
            page_size: page_size.max(1024).next_power_of_two(),
            pages: RwLock::new(HashMap::new()),
        }
    }

    /// Page size in use.
    pub fn page_size(&self) -> usize
    {
        self.page_size
    }

    /// Number of pages currently cached.
    pub fn cached_pages(&self) -> usize
    {
        self.pages.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drops every cached page. Call when the target resumes.
    pub fn clear(&self)
    {
        self.pages.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Drops cached pages overlapping `[addr, addr + len)`.
    pub fn invalidate_range(&self, addr: Address, len: usize)
    {
        if len == 0 {
            return;
        }
        let start = addr.value();
        let end = start.saturating_add(len as u64);
        let mut pages = self.pages.write().unwrap_or_else(PoisonError::into_inner);
        let page_size = self.page_size as u64;
        let mut base = page_align_down(start, self.page_size);
        while base < end {
            pages.remove(&base);
            match base.checked_add(page_size) {
                Some(next) => base = next,
                None => break,
            }
        }
    }

    fn fetch_page(&self, base: u64) -> Option<Arc<Vec<u8>>>
    {
        if let Some(existing) = self.pages.read().unwrap_or_else(PoisonError::into_inner).get(&base) {
            return Some(existing.clone());
        }

        let mut pages = self.pages.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = pages.get(&base) {
            return Some(existing.clone());
        }

        let mut data = vec![0u8; self.page_size];
        match self.inner.read_memory(&mut data, Address::new(base)) {
            Ok(n) if n == self.page_size => {
                let arc = Arc::new(data);
                pages.insert(base, arc.clone());
                Some(arc)
            }
            // Partially mapped page: let the caller read the range directly.
            _ => {
                trace!(page = format_args!("{base:#x}"), "page not cacheable");
                None
            }
        }
    }
}

impl MemoryReadWriter for CachedMemory
{
    fn read_memory(&self, buf: &mut [u8], addr: Address) -> Result<usize>
    {
        let len = buf.len();
        let mut copied = 0usize;
        while copied < len {
            let absolute = addr.value().saturating_add(copied as u64);
            let page_base = page_align_down(absolute, self.page_size);
            let page_offset = (absolute - page_base) as usize;
            let chunk = (len - copied).min(self.page_size - page_offset);

            match self.fetch_page(page_base) {
                Some(page) => {
                    buf[copied..copied + chunk].copy_from_slice(&page[page_offset..page_offset + chunk]);
                    copied += chunk;
                }
                None => {
                    let n = self
                        .inner
                        .read_memory(&mut buf[copied..copied + chunk], Address::new(absolute))?;
                    copied += n;
                    if n < chunk {
                        break;
                    }
                }
            }
        }
        Ok(copied)
    }

    fn write_memory(&self, addr: Address, data: &[u8]) -> Result<usize>
    {
        self.invalidate_range(addr, data.len());
        self.inner.write_memory(addr, data)
    }

    fn real_memory(&self) -> Option<SharedMemory>
    {
        self.inner.real_memory()
    }
}
