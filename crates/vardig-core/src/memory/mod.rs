//! # Memory access
//!
//! The raw-memory channel is an external collaborator: a live process, a core
//! file, or a synthetic overlay of registers and stack. This module defines the
//! accessor trait the value layer consumes, the fixed-width little-endian
//! codecs every loader is built on, and the in-crate accessor wrappers:
//!
//! - [`CachedMemory`]: read-through page cache, invalidated on resume
//! - [`cache_memory`]: one-shot prefetch window over a struct or array
//! - [`CompositeMemory`]: value assembled from register and memory pieces
//!
//! ## Dereferencing view
//!
//! A value stored in registers has a fake address, but pointers read out of it
//! point into real memory. [`dereference_memory`] returns the accessor children
//! of such values must use.

pub mod cache;
pub mod composite;
pub mod prefetch;

use std::sync::Arc;

pub use cache::CachedMemory;
pub use composite::{CompositeMemory, Piece, PieceKind, FAKE_ADDRESS_UNRESOLVED};
pub use prefetch::cache_memory;

use crate::error::{Result, VardigError};
use crate::types::Address;

/// Byte-range access to target memory.
///
/// Implementations must be shareable across requests; the value layer itself
/// only ever calls them from the requesting thread.
pub trait MemoryReadWriter: Send + Sync
{
    /// Fill `buf` with the bytes at `addr`, returning how many were read.
    fn read_memory(&self, buf: &mut [u8], addr: Address) -> Result<usize>;

    /// Write `data` at `addr`, returning how many bytes were written.
    fn write_memory(&self, addr: Address, data: &[u8]) -> Result<usize>;

    /// The accessor pointers read out of this memory refer to, if it differs
    /// from `self` (register overlays return the process memory).
    fn real_memory(&self) -> Option<SharedMemory>
    {
        None
    }

    /// `false` for accessors that must never be wrapped in a prefetch window.
    fn cacheable(&self) -> bool
    {
        true
    }

    /// `true` if reads of `[addr, addr + size)` are already served from a local snapshot.
    fn holds_range(&self, _addr: Address, _size: usize) -> bool
    {
        false
    }
}

/// Shared handle to a memory accessor.
pub type SharedMemory = Arc<dyn MemoryReadWriter>;

/// The accessor to use for values reached by following a pointer stored in `mem`.
pub fn dereference_memory(mem: &SharedMemory) -> SharedMemory
{
    mem.real_memory().unwrap_or_else(|| mem.clone())
}

/// Read exactly `buf.len()` bytes.
pub fn read_exact(mem: &dyn MemoryReadWriter, buf: &mut [u8], addr: Address) -> Result<()>
{
    let got = mem.read_memory(buf, addr)?;
    if got < buf.len() {
        return Err(VardigError::ShortRead {
            addr,
            wanted: buf.len(),
            got,
        });
    }
    Ok(())
}

/// Write exactly `data.len()` bytes.
pub fn write_exact(mem: &dyn MemoryReadWriter, addr: Address, data: &[u8]) -> Result<()>
{
    let written = mem.write_memory(addr, data)?;
    if written < data.len() {
        return Err(VardigError::MemoryWrite {
            addr,
            len: data.len(),
            details: format!("only {written} bytes written"),
        });
    }
    Ok(())
}

fn check_width(size: i64) -> Result<usize>
{
    match size {
        1 | 2 | 4 | 8 => Ok(size as usize),
        _ => Err(VardigError::InvalidArgument(format!("unsupported integer width {size}"))),
    }
}

/// Read a little-endian unsigned integer of `size` bytes (1, 2, 4 or 8).
pub fn read_uint_raw(mem: &dyn MemoryReadWriter, addr: Address, size: i64) -> Result<u64>
{
    let width = check_width(size)?;
    let mut buf = [0u8; 8];
    read_exact(mem, &mut buf[..width], addr)?;
    Ok(decode_uint(&buf[..width]))
}

/// Read a little-endian signed integer of `size` bytes, sign-extended.
pub fn read_int_raw(mem: &dyn MemoryReadWriter, addr: Address, size: i64) -> Result<i64>
{
    let width = check_width(size)?;
    let mut buf = [0u8; 8];
    read_exact(mem, &mut buf[..width], addr)?;
    Ok(decode_int(&buf[..width]))
}

/// Read a 4- or 8-byte IEEE float, widened to `f64`.
pub fn read_float_raw(mem: &dyn MemoryReadWriter, addr: Address, size: i64) -> Result<f64>
{
    match size {
        4 => {
            let mut buf = [0u8; 4];
            read_exact(mem, &mut buf, addr)?;
            Ok(f64::from(f32::from_le_bytes(buf)))
        }
        8 => {
            let mut buf = [0u8; 8];
            read_exact(mem, &mut buf, addr)?;
            Ok(f64::from_le_bytes(buf))
        }
        _ => Err(VardigError::InvalidArgument(format!("could not read float of size {size}"))),
    }
}

/// Decode up to 8 little-endian bytes as an unsigned integer.
pub fn decode_uint(bytes: &[u8]) -> u64
{
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    u64::from_le_bytes(buf)
}

/// Decode 1, 2, 4 or 8 little-endian bytes as a sign-extended integer.
pub fn decode_int(bytes: &[u8]) -> i64
{
    match bytes.len() {
        1 => i64::from(bytes[0] as i8),
        2 => i64::from(i16::from_le_bytes([bytes[0], bytes[1]])),
        4 => i64::from(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        _ => decode_uint(bytes) as i64,
    }
}

/// Encode the low `size` bytes of `value` little-endian.
pub fn encode_uint(value: u64, size: i64) -> Result<Vec<u8>>
{
    let width = check_width(size)?;
    Ok(value.to_le_bytes()[..width].to_vec())
}

/// Encode a float as 4 or 8 little-endian bytes.
pub fn encode_float(value: f64, size: i64) -> Result<Vec<u8>>
{
    match size {
        4 => Ok((value as f32).to_le_bytes().to_vec()),
        8 => Ok(value.to_le_bytes().to_vec()),
        _ => Err(VardigError::InvalidArgument(format!("could not write float of size {size}"))),
    }
}
