//! Target address type.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed address in the target's address space
///
/// This wrapper around `u64` keeps target addresses apart from sizes, lengths
/// and strides, which are all plain integers in the value layer.
///
/// Address `0` doubles as "nil / unknown" for values: a [`Value`] whose
/// address and base are both zero is never read.
///
/// ## Example
///
/// ```rust
/// use vardig_core::types::Address;
///
/// let addr = Address::from(0x1000);
/// assert_eq!((addr + 0x100).value(), 0x1100);
/// assert_eq!(addr.offset(-0x10), Some(Address::new(0xff0)));
/// ```
///
/// [`Value`]: crate::value::Value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Returns `true` for the null address.
    pub const fn is_null(self) -> bool
    {
        self.0 == 0
    }

    /// Add an unsigned offset, returning `None` on overflow.
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Subtract an unsigned offset, returning `None` on underflow.
    pub fn checked_sub(self, offset: u64) -> Option<Self>
    {
        self.0.checked_sub(offset).map(Address)
    }

    /// Apply a signed offset (struct field offsets are signed in DWARF).
    pub fn offset(self, delta: i64) -> Option<Self>
    {
        self.0.checked_add_signed(delta).map(Address)
    }

    /// Round up to the next multiple of `align` (a power of two or zero).
    #[must_use]
    pub fn align_up(self, align: u64) -> Self
    {
        if align <= 1 {
            return self;
        }
        Address(self.0.wrapping_add(align - 1) & !(align - 1))
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<Address> for Address
{
    type Output = u64;

    fn sub(self, rhs: Address) -> Self::Output
    {
        self.0.wrapping_sub(rhs.0)
    }
}
