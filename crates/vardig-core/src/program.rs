//! # Program collaborators
//!
//! The value layer interprets memory but does not decode debug metadata, walk
//! stacks or resolve addresses itself. Those services are supplied by the host
//! through the traits in this module:
//!
//! - [`DebugInfo`]: types, functions, lines, runtime type descriptors, globals
//! - [`MapIterator`]: runtime hash-table traversal (layout varies by toolchain)
//! - [`ThreadContext`]: one stopped thread
//! - [`StackWalker`]: call frames of a goroutine
//!
//! [`AbiProfile`] is the per-process strategy table for runtime layouts that
//! changed across toolchain releases. It is computed once from the producer
//! string and consulted by the loaders, never re-derived.

use std::sync::Arc;

use crate::constants::ConstantTable;
use crate::error::Result;
use crate::goroutine::Goroutine;
use crate::memory::SharedMemory;
use crate::typeinfo::TypeRef;
use crate::types::{Address, Architecture, Function, Location, ThreadId};
use crate::value::Value;

/// Set in a runtime type descriptor's kind byte when values of the type are
/// stored directly in the data word of an interface.
pub const KIND_DIRECT_IFACE: u64 = 1 << 5;

/// Runtime hash-table encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapLayout
{
    /// Bucket array with overflow chains (before go1.24).
    Buckets,
    /// Swiss table groups (go1.24 and later).
    Swiss,
}

/// Encoding of the goroutine status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEncoding
{
    /// A bare `uint32`.
    Plain,
    /// An atomic wrapper struct with a `value` field (go1.20 and later).
    AtomicWrapper,
}

/// Runtime layout choices of one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbiProfile
{
    /// Toolchain major version.
    pub major: u32,
    /// Toolchain minor version.
    pub minor: u32,
    /// Map encoding.
    pub map_layout: MapLayout,
    /// Goroutine status encoding.
    pub status: StatusEncoding,
    /// The goroutine record has a `waitreason` field.
    pub wait_reason: bool,
}

impl AbiProfile
{
    /// Profile of a given toolchain release.
    pub fn for_version(major: u32, minor: u32) -> Self
    {
        let at_least = |min: u32| major > 1 || (major == 1 && minor >= min);
        Self {
            major,
            minor,
            map_layout: if at_least(24) { MapLayout::Swiss } else { MapLayout::Buckets },
            status: if at_least(20) {
                StatusEncoding::AtomicWrapper
            } else {
                StatusEncoding::Plain
            },
            wait_reason: at_least(11),
        }
    }

    /// Parse a DWARF producer string such as `Go cmd/compile go1.21.3; regabi`.
    ///
    /// Unparsable producers yield the newest known profile.
    pub fn from_producer(producer: &str) -> Self
    {
        Self::parse_version(producer)
            .map(|(major, minor)| Self::for_version(major, minor))
            .unwrap_or_default()
    }

    fn parse_version(producer: &str) -> Option<(u32, u32)>
    {
        let start = producer.find("go")? + 2;
        let rest = &producer[start..];
        let mut parts = rest.split(|c: char| !c.is_ascii_digit());
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().and_then(|m| m.parse().ok()).unwrap_or(0);
        Some((major, minor))
    }

    /// `true` if the producing toolchain is at least `major.minor`.
    pub fn at_least(&self, major: u32, minor: u32) -> bool
    {
        (self.major, self.minor) >= (major, minor)
    }
}

impl Default for AbiProfile
{
    fn default() -> Self
    {
        Self::for_version(1, 24)
    }
}

/// A debug type resolved from a runtime type descriptor.
#[derive(Debug, Clone)]
pub struct RuntimeType
{
    /// The matching debug type.
    pub ty: TypeRef,
    /// Values of this type are stored directly in an interface data word.
    pub direct_iface: bool,
}

/// Address and kind byte of a runtime type descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeTypeAddr
{
    /// Address of the descriptor.
    pub addr: Address,
    /// Kind byte, including the [`KIND_DIRECT_IFACE`] flag.
    pub kind: u64,
}

/// Debug metadata of the target program.
pub trait DebugInfo: Send + Sync
{
    /// Target architecture.
    fn architecture(&self) -> Architecture;

    /// Pointer size of the target in bytes.
    fn ptr_size(&self) -> i64
    {
        self.architecture().pointer_size_bytes() as i64
    }

    /// Runtime layout profile.
    fn abi(&self) -> AbiProfile;

    /// Look up a type by its qualified name.
    fn find_type(&self, name: &str) -> Result<TypeRef>;

    /// Function containing `pc`.
    fn pc_to_func(&self, pc: Address) -> Option<Arc<Function>>;

    /// Source location of `pc`.
    fn pc_to_line(&self, pc: Address) -> Location;

    /// File and line of the first statement of `func`.
    fn entry_line(&self, func: &Function) -> (String, u32);

    /// Layout of the captured-variables record of a closure, `None` if `func`
    /// captures nothing.
    fn closure_struct_type(&self, func: &Function) -> Option<TypeRef>;

    /// Resolve the runtime type descriptor at `type_addr`. `data_addr` is the
    /// data word of the interface being decoded.
    fn runtime_type_to_type(&self, mem: &SharedMemory, type_addr: Address, data_addr: Address) -> Result<RuntimeType>;

    /// Find the runtime type descriptor of `ty`, if the program has one.
    fn type_to_runtime_type(&self, mem: &SharedMemory, ty: &TypeRef) -> Result<Option<RuntimeTypeAddr>>;

    /// Address of a package-level variable.
    fn global_address(&self, name: &str) -> Option<Address>;

    /// Named constants declared with type `ty`.
    fn constants(&self, _ty: &TypeRef) -> Option<Arc<ConstantTable>>
    {
        None
    }

    /// Start iterating the map referenced by `map`, whose header is at
    /// `map.base`. At most `max_buckets` buckets are scanned (0: no limit).
    fn map_iterator(&self, map: &Value, max_buckets: usize) -> Result<Box<dyn MapIterator>>;
}

/// Traversal of a runtime hash table.
pub trait MapIterator
{
    /// Entry count recorded in the map header.
    fn len(&self) -> i64;

    /// `true` if the header records no entries.
    fn is_empty(&self) -> bool
    {
        self.len() == 0
    }

    /// Next key/value pair as unloaded values. `Ok(None)` once the table or the
    /// bucket budget is exhausted.
    fn next(&mut self) -> Result<Option<(Value, Value)>>;
}

/// Where the current goroutine pointer of a thread lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GAddress
{
    /// Address of the goroutine record.
    Direct(Address),
    /// Address of a word holding the goroutine pointer.
    Slot(Address),
}

/// One stopped thread.
pub trait ThreadContext: Send + Sync
{
    /// OS thread id.
    fn thread_id(&self) -> ThreadId;

    /// Current location of the thread.
    fn location(&self) -> Result<Location>;

    /// Memory as seen by this thread.
    fn memory(&self) -> SharedMemory;

    /// Where the current goroutine pointer is stored.
    fn g_address(&self) -> Result<GAddress>;
}

/// Stack unwinding for goroutines.
pub trait StackWalker
{
    /// Call locations of `g`, innermost first, at most `max` of them.
    fn frames(&self, g: &Goroutine, max: usize) -> Result<Vec<Location>>;
}
