//! # Values
//!
//! A [`Value`] is one typed datum of the target: an address, a type descriptor
//! and, once loaded, its content. Values are produced unloaded (by
//! [`Value::new`], member and element access, or dereference) and materialized
//! by [`Value::load`] under a [`LoadConfig`] budget.
//!
//! ## Partial failure
//!
//! Reading can fail anywhere in a tree. Failures are recorded on the narrowest
//! value in its sticky `unreadable` field; siblings keep loading. A value with
//! `unreadable` set is never read again, and neither are its descendants.
//!
//! ## Shape of children
//!
//! | Kind | Children |
//! |------|----------|
//! | Pointer | exactly one: the pointee |
//! | Array, Slice | elements |
//! | Struct | fields in declaration order |
//! | Map | keys and values interleaved |
//! | Interface | one: the concrete value |
//! | Chan | the fields of the runtime channel record |
//! | Func | captured variables of a closure |
//!
//! [`LoadConfig`]: crate::config::LoadConfig

mod access;
mod chan;
mod func;
mod interface;
mod load;
mod map;
mod new;
mod register;
mod time;
mod write;

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

pub use interface::InterfaceParts;

use crate::error::{Result, VardigError};
use crate::memory::SharedMemory;
use crate::program::DebugInfo;
use crate::typeinfo::TypeRef;
use crate::types::{Address, DwarfRegister};

/// Read errors tolerated while loading the elements of one array, slice, map
/// or struct before the rest is left unloaded.
pub const MAX_ERR_COUNT: usize = 3;

/// Largest element stride for which array contents are prefetched in one read.
pub const MAX_ARRAY_STRIDE_PREFETCH: i64 = 1024;

/// Closed classification of a value's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Kind
{
    /// No usable shape (void, unspecified, or an unmapped descriptor).
    #[default]
    Invalid,
    /// Boolean.
    Bool,
    /// Signed integer, including foreign `char` and `unsigned char`.
    Int,
    /// Unsigned integer.
    Uint,
    /// IEEE float.
    Float,
    /// Complex number.
    Complex,
    /// Native string or foreign character pointer.
    String,
    /// Pointer.
    Pointer,
    /// Slice.
    Slice,
    /// Fixed-size array.
    Array,
    /// Struct.
    Struct,
    /// Map.
    Map,
    /// Interface.
    Interface,
    /// Channel.
    Chan,
    /// Function value or closure.
    Func,
}

impl fmt::Display for Kind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let name = match self {
            Kind::Invalid => "invalid",
            Kind::Bool => "bool",
            Kind::Int => "int",
            Kind::Uint => "uint",
            Kind::Float => "float64",
            Kind::Complex => "complex128",
            Kind::String => "string",
            Kind::Pointer => "ptr",
            Kind::Slice => "slice",
            Kind::Array => "array",
            Kind::Struct => "struct",
            Kind::Map => "map",
            Kind::Interface => "interface",
            Kind::Chan => "chan",
            Kind::Func => "func",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Properties of a value that are not part of its type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ValueFlags: u16 {
        /// Local variable that escaped to the heap; only its address lives on the stack.
        const ESCAPED = 1 << 0;
        /// Shadowed by a variable with the same name in an inner scope.
        const SHADOWED = 1 << 1;
        /// Constant, not backed by memory.
        const CONSTANT = 1 << 2;
        /// Function argument.
        const ARGUMENT = 1 << 3;
        /// Function return value.
        const RETURN_ARGUMENT = 1 << 4;
        /// The address is fake (register-backed) or may no longer be valid.
        const FAKE_ADDRESS = 1 << 5;
        /// Foreign (C) pointer.
        const C_PTR = 1 << 6;
        /// A CPU register.
        const CPU_REGISTER = 1 << 7;
        /// Load every element, ignoring `max_array_values`.
        const TRUST_LEN = 1 << 8;
    }
}

/// Special float values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FloatSpecial
{
    /// A finite number.
    #[default]
    Normal,
    /// NaN.
    NaN,
    /// +Inf.
    PosInf,
    /// -Inf.
    NegInf,
}

impl FloatSpecial
{
    /// Classify `f`.
    pub fn classify(f: f64) -> Self
    {
        if f.is_nan() {
            FloatSpecial::NaN
        } else if f == f64::INFINITY {
            FloatSpecial::PosInf
        } else if f == f64::NEG_INFINITY {
            FloatSpecial::NegInf
        } else {
            FloatSpecial::Normal
        }
    }
}

/// Scalar content of a loaded value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar
{
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer (pointers hold their target address here).
    Uint(u64),
    /// Float.
    Float(f64),
    /// Complex number.
    Complex
    {
        /// Real part.
        re: f64,
        /// Imaginary part.
        im: f64,
    },
    /// String bytes, possibly truncated by the load budget.
    Str(Vec<u8>),
}

impl Scalar
{
    /// String scalar from text.
    pub fn string(s: impl Into<String>) -> Self
    {
        Scalar::Str(s.into().into_bytes())
    }

    /// Integer view (floats truncate, booleans and strings have none).
    pub fn as_i64(&self) -> Option<i64>
    {
        match *self {
            Scalar::Int(n) => Some(n),
            Scalar::Uint(n) => Some(n as i64),
            Scalar::Float(f) => Some(f as i64),
            _ => None,
        }
    }

    /// Unsigned integer view.
    pub fn as_u64(&self) -> Option<u64>
    {
        match *self {
            Scalar::Int(n) => Some(n as u64),
            Scalar::Uint(n) => Some(n),
            Scalar::Float(f) => Some(f as u64),
            _ => None,
        }
    }

    /// Float view.
    pub fn as_f64(&self) -> Option<f64>
    {
        match *self {
            Scalar::Int(n) => Some(n as f64),
            Scalar::Uint(n) => Some(n as f64),
            Scalar::Float(f) => Some(f),
            _ => None,
        }
    }

    /// Complex view; real scalars have a zero imaginary part.
    pub fn as_complex(&self) -> Option<(f64, f64)>
    {
        match *self {
            Scalar::Complex { re, im } => Some((re, im)),
            _ => self.as_f64().map(|re| (re, 0.0)),
        }
    }

    /// Boolean view.
    pub fn as_bool(&self) -> Option<bool>
    {
        match *self {
            Scalar::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// String view, lossily decoded.
    pub fn as_str(&self) -> Option<Cow<'_, str>>
    {
        match self {
            Scalar::Str(bytes) => Some(String::from_utf8_lossy(bytes)),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(n) => write!(f, "{n}"),
            Scalar::Uint(n) => write!(f, "{n}"),
            Scalar::Float(x) => write!(f, "{x}"),
            Scalar::Complex { re, im } => write!(f, "({re} + {im}i)"),
            Scalar::Str(bytes) => write!(f, "{:?}", String::from_utf8_lossy(bytes)),
        }
    }
}

/// One occurrence of a typed datum in target memory.
#[derive(Clone, Default)]
pub struct Value
{
    /// Name (variable, field or synthetic name; may be empty).
    pub name: String,
    /// Address of the datum; zero for nil or unknown.
    pub addr: Address,
    /// Only the address is meaningful; the content was not requested.
    pub only_addr: bool,
    /// Declared type.
    pub dwarf_type: Option<TypeRef>,
    /// Declared type with typedef layers stripped (possibly retyped, e.g. for channels).
    pub real_type: Option<TypeRef>,
    /// Shape.
    pub kind: Kind,
    /// Scalar content once loaded.
    pub value: Option<Scalar>,
    /// NaN/Inf classification of float values.
    pub float_special: FloatSpecial,
    /// Length: elements of arrays, slices, strings, maps and channels, fields
    /// of structs and captured variables of closures.
    pub len: i64,
    /// Capacity of slices.
    pub cap: i64,
    /// Non-type properties.
    pub flags: ValueFlags,
    /// Base address of arrays, slice backing arrays and string bytes; address
    /// of the runtime record of maps and channels; entry point of functions.
    pub base: Address,
    /// Sub-values.
    pub children: Vec<Value>,
    /// Sticky read failure.
    pub unreadable: Option<VardigError>,
    /// Number of map entries to skip when loading (paging cursor).
    pub map_skip: usize,

    pub(crate) stride: i64,
    pub(crate) field_type: Option<TypeRef>,
    pub(crate) closure_addr: Address,
    pub(crate) reg: Option<DwarfRegister>,
    pub(crate) loaded: bool,
    pub(crate) mem: Option<SharedMemory>,
    pub(crate) info: Option<Arc<dyn DebugInfo>>,
}

impl fmt::Debug for Value
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Value")
            .field("name", &self.name)
            .field("addr", &self.addr)
            .field("type", &self.type_string())
            .field("kind", &self.kind)
            .field("value", &self.value)
            .field("len", &self.len)
            .field("cap", &self.cap)
            .field("base", &self.base)
            .field("flags", &self.flags)
            .field("only_addr", &self.only_addr)
            .field("loaded", &self.loaded)
            .field("unreadable", &self.unreadable)
            .field("children", &self.children)
            .finish()
    }
}

impl Value
{
    /// `true` once the loader has run on this value.
    pub fn is_loaded(&self) -> bool
    {
        self.loaded
    }

    /// The memory accessor this value reads from.
    pub fn memory(&self) -> Result<SharedMemory>
    {
        self.mem
            .clone()
            .ok_or_else(|| VardigError::Runtime(format!("{} has no backing memory", self.display_name())))
    }

    /// Debug metadata this value was built from.
    pub fn debug_info(&self) -> Result<Arc<dyn DebugInfo>>
    {
        self.info
            .clone()
            .ok_or_else(|| VardigError::Runtime(format!("{} has no debug information", self.display_name())))
    }

    pub(crate) fn ptr_size(&self) -> i64
    {
        self.info.as_ref().map_or(8, |info| info.ptr_size())
    }

    /// Element stride of arrays, slices and foreign pointers.
    pub fn stride(&self) -> i64
    {
        self.stride
    }

    /// Element type of arrays, slices, strings and foreign pointers.
    pub fn field_type(&self) -> Option<&TypeRef>
    {
        self.field_type.as_ref()
    }

    /// Address of the function-value record of a closure (0 for plain functions).
    pub fn closure_addr(&self) -> Address
    {
        self.closure_addr
    }

    /// `true` for the untyped `nil` literal.
    pub fn is_nil_literal(&self) -> bool
    {
        self.dwarf_type.is_none() && self.kind == Kind::Pointer && self.name == "nil"
    }

    fn display_name(&self) -> Cow<'_, str>
    {
        if !self.name.is_empty() {
            return Cow::Borrowed(&self.name);
        }
        Cow::Owned(self.type_string())
    }

    /// Rendering of the value's type.
    pub fn type_string(&self) -> String
    {
        if self.is_nil_literal() {
            return "nil".into();
        }
        let Some(ty) = &self.dwarf_type else {
            return self.kind.to_string();
        };
        if !ty.name.is_empty() {
            return ty.name.clone();
        }
        let rendered = ty.to_string();
        if rendered == "*void" && !ty.foreign {
            return "unsafe.Pointer".into();
        }
        rendered
    }

    /// Loaded string content, if this is a loaded string.
    pub fn string_value(&self) -> Option<Cow<'_, str>>
    {
        self.value.as_ref().and_then(Scalar::as_str)
    }

    /// `true` if a string was cut short by the load budget.
    pub fn is_truncated(&self) -> bool
    {
        match &self.value {
            Some(Scalar::Str(bytes)) => (bytes.len() as i64) < self.len,
            _ => false,
        }
    }

    /// Describe an integer value by the named constants of its type.
    pub fn const_descr(&self) -> Option<String>
    {
        if self.flags.contains(ValueFlags::CONSTANT) {
            return None;
        }
        let info = self.info.as_ref()?;
        let ty = self.dwarf_type.as_ref()?;
        let table = info.constants(ty)?;
        // Only user defined types: a plain int equal to 1 is not io.SeekCurrent.
        if !ty.name.contains('.') || ty.name.starts_with("C.") {
            return None;
        }
        match self.kind {
            Kind::Int | Kind::Uint => table.describe(self.value.as_ref()?.as_i64()?),
            _ => None,
        }
    }
}
