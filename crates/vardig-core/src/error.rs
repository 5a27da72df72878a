//! # Error Types
//!
//! General error handling for value reconstruction.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.
//!
//! The enum is `Clone` because a failed read is stored on the [`Value`] it
//! belongs to (its sticky `unreadable` field) and values are copied into the
//! child lists of their parents.
//!
//! [`Value`]: crate::value::Value

use thiserror::Error;

use crate::types::{Address, ThreadId};

/// Main error type for value operations
///
/// ## Error Categories
///
/// 1. **Structural errors**: NegativeLength, NilBase, BadArrayBase, InvalidLength, InvalidStride
/// 2. **Memory errors**: MemoryRead, MemoryWrite, ShortRead, ParentUnreadable
/// 3. **Type errors**: NoMember, NotAStruct, TypeConversion, UnknownType, UnsupportedKind,
///    InvalidInterface, TypeNotFound, RegisterConversion, CannotAssign, IndexOutOfBounds
/// 4. **Nil errors**: IsNil
/// 5. **Goroutine errors**: UnreadableG, NoGoroutine, UnknownGoroutine
/// 6. **Collaborator errors**: Runtime, InvalidArgument
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VardigError
{
    /// Reading target memory failed
    ///
    /// Memory accessors report this when the range is unmapped, the process has
    /// exited, or the captured image has no bytes for the address.
    #[error("could not read {len} bytes at {addr}: {details}")]
    MemoryRead
    {
        /// Start of the requested range
        addr: Address,
        /// Requested number of bytes
        len: usize,
        /// Accessor-specific details
        details: String,
    },

    /// Writing target memory failed
    #[error("could not write {len} bytes at {addr}: {details}")]
    MemoryWrite
    {
        /// Start of the destination range
        addr: Address,
        /// Number of bytes that should have been written
        len: usize,
        /// Accessor-specific details
        details: String,
    },

    /// The accessor returned fewer bytes than requested
    #[error("short read at {addr}: wanted {wanted} bytes, got {got}")]
    ShortRead
    {
        /// Start of the requested range
        addr: Address,
        /// Requested number of bytes
        wanted: usize,
        /// Bytes actually read
        got: usize,
    },

    /// The pointer owning this value could not be read
    ///
    /// Attached to the child of an unreadable pointer so that "the pointer is
    /// unreadable" and "the pointer is fine but its target is not" stay
    /// distinguishable.
    #[error("parent pointer unreadable: {0}")]
    ParentUnreadable(Box<VardigError>),

    /// An array or slice header declared a negative length
    #[error("Negative array length")]
    NegativeLength,

    /// A slice or string header declared a length but no backing storage
    #[error("non-zero length array with nil base")]
    NilBase,

    /// `base + stride * count` overflows the address space
    #[error("bad array base address {0}")]
    BadArrayBase(Address),

    /// A length field held an impossible value
    #[error("invalid length: {0}")]
    InvalidLength(i64),

    /// An element type has no usable size
    #[error("invalid element stride for {0}")]
    InvalidStride(String),

    /// A container (struct pointer, map, interface...) is nil
    ///
    /// This is a semantic condition, not an I/O failure.
    #[error("{0} is nil")]
    IsNil(String),

    /// Member lookup failed
    #[error("{name} has no member {member}")]
    NoMember
    {
        /// Name (or type) of the value that was searched
        name: String,
        /// The member that was requested
        member: String,
    },

    /// Member lookup on something that is not a struct
    #[error("{name} (type {type_name}) is not a struct")]
    NotAStruct
    {
        /// Name of the value
        name: String,
        /// Rendered type of the value
        type_name: String,
    },

    /// A value cannot be converted to (or stored in) the destination type
    #[error("mismatched types {src} and {dst}")]
    TypeConversion
    {
        /// Source type
        src: String,
        /// Destination type
        dst: String,
    },

    /// The type descriptor has a shape the value layer does not understand
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// The value has a kind with no loader
    #[error("unknown or unsupported kind: {0:?}")]
    UnsupportedKind(String),

    /// An interface representation is malformed
    #[error("invalid interface type: {0}")]
    InvalidInterface(String),

    /// A named type is missing from the debug metadata
    #[error("could not find type {0}")]
    TypeNotFound(String),

    /// A CPU register cannot be reinterpreted as the requested type
    #[error("unknown CPU register type conversion to {0:?}")]
    RegisterConversion(String),

    /// The destination of an assignment is not assignable
    #[error("can not assign to {0}")]
    CannotAssign(String),

    /// Element access outside the declared length
    #[error("index out of bounds: {index} (length {len})")]
    IndexOutOfBounds
    {
        /// Requested index
        index: i64,
        /// Declared length
        len: i64,
    },

    /// The map skip cursor runs past the end of the map
    #[error("map index out of bounds")]
    MapIndexOutOfBounds,

    /// A PC did not map to any function
    #[error("could not find function for {0}")]
    UnknownFunction(Address),

    /// The goroutine structure could not be parsed
    #[error("could not read G struct")]
    UnreadableG,

    /// The thread is not running any goroutine
    #[error("no G executing on thread {0}")]
    NoGoroutine(ThreadId),

    /// No goroutine with the requested id exists
    #[error("unknown goroutine {0}")]
    UnknownGoroutine(i64),

    /// Error reported by an external collaborator (runtime type resolution,
    /// map iteration, stack walking)
    #[error("{0}")]
    Runtime(String),

    /// Invalid argument passed to a value operation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl VardigError
{
    /// Wrap this error as the failure of a parent pointer.
    #[must_use]
    pub fn parent_unreadable(self) -> Self
    {
        VardigError::ParentUnreadable(Box::new(self))
    }

    /// Returns `true` for the nil-reference category.
    #[must_use]
    pub const fn is_nil(&self) -> bool
    {
        matches!(self, VardigError::IsNil(_))
    }
}

/// Convenience type alias for `Result<T, VardigError>`
///
/// ```rust
/// use vardig_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, VardigError>;
