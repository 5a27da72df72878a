//! Register contents as seen through DWARF register numbers.
//!
//! Values that live (partially or completely) in CPU registers are described by
//! DWARF location pieces naming a register number. The debug-metadata layer
//! resolves those numbers to the bytes captured at the current stop; this
//! module only models the result.

use std::collections::HashMap;

use gimli::Register;

/// Contents of a single CPU register.
///
/// Registers wider than 64 bits (vector registers) keep their full byte image
/// in `bytes`; `uint64_val` holds the low 64 bits.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DwarfRegister
{
    /// Low 64 bits of the register.
    pub uint64_val: u64,
    /// Full little-endian image of the register.
    pub bytes: Vec<u8>,
}

impl DwarfRegister
{
    /// Build an 8-byte register from an integer.
    #[must_use]
    pub fn from_u64(value: u64) -> Self
    {
        Self {
            uint64_val: value,
            bytes: value.to_le_bytes().to_vec(),
        }
    }

    /// Build a register from its byte image (any width).
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self
    {
        let mut low = [0u8; 8];
        let n = bytes.len().min(8);
        low[..n].copy_from_slice(&bytes[..n]);
        Self {
            uint64_val: u64::from_le_bytes(low),
            bytes: bytes.to_vec(),
        }
    }

    /// Width of the register in bytes.
    #[must_use]
    pub fn size(&self) -> usize
    {
        self.bytes.len()
    }

    /// Overwrite `data.len()` bytes starting at `offset`, growing the image if needed.
    pub fn overwrite(&mut self, offset: usize, data: &[u8])
    {
        if self.bytes.len() < offset + data.len() {
            self.bytes.resize(offset + data.len(), 0);
        }
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
        *self = Self::from_bytes(&self.bytes);
    }
}

/// Register file captured for one frame, keyed by DWARF register number.
#[derive(Debug, Clone, Default)]
pub struct DwarfRegisters
{
    regs: HashMap<Register, DwarfRegister>,
}

impl DwarfRegisters
{
    /// Create an empty register file.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Look up a register.
    pub fn get(&self, register: Register) -> Option<&DwarfRegister>
    {
        self.regs.get(&register)
    }

    /// Insert or replace a register.
    pub fn set(&mut self, register: Register, value: DwarfRegister)
    {
        self.regs.insert(register, value);
    }

    /// Mutable access to a register, if it was captured.
    pub fn get_mut(&mut self, register: Register) -> Option<&mut DwarfRegister>
    {
        self.regs.get_mut(&register)
    }
}
