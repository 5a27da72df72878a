//! Thread and architecture types.

use std::fmt;

/// Thread identifier
///
/// A thread identifier uniquely identifies a thread within a process. The exact
/// representation is platform-specific (Mach thread port, Linux TID, Windows
/// thread id); it is stored as a `u64` to stay target-agnostic.
///
/// ## Example
///
/// ```rust
/// use vardig_core::types::ThreadId;
///
/// let thread = ThreadId::from(12345);
/// assert_eq!(thread.raw(), 12345);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ThreadId(pub u64);

impl ThreadId
{
    /// Get the raw `u64` representation of the thread identifier
    pub fn raw(&self) -> u64
    {
        self.0
    }
}

impl From<u64> for ThreadId
{
    fn from(value: u64) -> Self
    {
        Self(value)
    }
}

impl fmt::Display for ThreadId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// CPU architecture of the target
///
/// The value layer only needs two facts from the architecture: the width of a
/// pointer (every header word is pointer sized) and how DWARF register numbers
/// are named when a register-backed value is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture
{
    /// 64-bit ARM
    Arm64,
    /// 64-bit x86 (Intel/AMD)
    X86_64,
    /// 32-bit x86
    X86,
    /// Any other architecture (or unknown)
    Unknown(&'static str),
}

impl Architecture
{
    /// Get the architecture of the currently running binary
    pub const fn current() -> Self
    {
        #[cfg(target_arch = "aarch64")]
        {
            Architecture::Arm64
        }

        #[cfg(target_arch = "x86_64")]
        {
            Architecture::X86_64
        }

        #[cfg(target_arch = "x86")]
        {
            Architecture::X86
        }

        #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64", target_arch = "x86")))]
        {
            Architecture::Unknown(std::env::consts::ARCH)
        }
    }

    /// Size of a pointer in bytes for this architecture.
    #[must_use]
    pub const fn pointer_size_bytes(self) -> u8
    {
        match self {
            Architecture::Arm64 | Architecture::X86_64 => 8,
            Architecture::X86 => 4,
            Architecture::Unknown(_) => 8,
        }
    }

    /// DWARF name of a register number, if the architecture defines one.
    #[must_use]
    pub fn register_name(self, register: gimli::Register) -> Option<&'static str>
    {
        match self {
            Architecture::Arm64 => gimli::AArch64::register_name(register),
            Architecture::X86_64 => gimli::X86_64::register_name(register),
            Architecture::X86 => gimli::X86::register_name(register),
            Architecture::Unknown(_) => None,
        }
    }
}

impl fmt::Display for Architecture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Architecture::Arm64 => write!(f, "arm64"),
            Architecture::X86_64 => write!(f, "x86_64"),
            Architecture::X86 => write!(f, "x86"),
            Architecture::Unknown(name) => write!(f, "{name}"),
        }
    }
}
