//! Value construction.
//!
//! Construction classifies the type into a [`Kind`] and precomputes the shape
//! data that lives in memory (slice headers, string headers, channel buffers,
//! foreign pointer bases). It touches memory only for those headers.

use std::sync::Arc;

use tracing::warn;

use super::{Kind, Scalar, Value, ValueFlags};
use crate::error::{Result, VardigError};
use crate::memory::{
    cache_memory, read_int_raw, read_uint_raw, MemoryReadWriter, SharedMemory, FAKE_ADDRESS_UNRESOLVED,
};
use crate::program::DebugInfo;
use crate::typeinfo::{align_size, resolve_typedef, StructType, Type, TypeRef, TypeShape};
use crate::types::{Address, DwarfRegister};

/// `true` for structs that get a synthetic alias layer: named, native, and not
/// generated by the compiler (`hash<K,V>`) or anonymous (`struct { ... }`).
fn wants_alias(ty: &TypeRef) -> bool
{
    matches!(ty.shape, TypeShape::Struct(_))
        && !ty.foreign
        && !ty.name.is_empty()
        && !ty.name.contains('<')
        && !ty.name.contains('{')
}

/// `true` if `ty` is (a qualified or aliased) foreign character type.
fn is_char(ty: &TypeRef) -> bool
{
    matches!(resolve_typedef(ty).shape, TypeShape::Char | TypeShape::Uchar)
}

/// Read the `{str, len}` header of a native string.
pub(crate) fn read_string_info(
    mem: &SharedMemory,
    ptr_size: i64,
    addr: Address,
    header: &StructType,
) -> Result<(Address, i64)>
{
    let mem = cache_memory(mem, addr, ptr_size * 2);
    let mut base = Address::ZERO;
    let mut len = 0;
    for field in &header.fields {
        let field_addr = Address::new(addr.value().wrapping_add_signed(field.byte_offset));
        match field.name.as_str() {
            "len" => {
                len = read_int_raw(mem.as_ref(), field_addr, ptr_size)?;
                if len < 0 {
                    return Err(VardigError::InvalidLength(len));
                }
            }
            "str" => base = Address::new(read_uint_raw(mem.as_ref(), field_addr, ptr_size)?),
            _ => {}
        }
    }
    Ok((base, len))
}

impl Value
{
    /// Create an unloaded value of type `ty` at `addr`.
    pub fn new(
        name: impl Into<String>,
        addr: Address,
        ty: &TypeRef,
        info: Arc<dyn DebugInfo>,
        mem: SharedMemory,
    ) -> Value
    {
        Value::build(name.into(), addr, ty, Some(info), mem)
    }

    /// Create a value sharing this value's debug information.
    pub(crate) fn child(&self, name: impl Into<String>, addr: Address, ty: &TypeRef, mem: SharedMemory) -> Value
    {
        Value::build(name.into(), addr, ty, self.info.clone(), mem)
    }

    fn build(name: String, addr: Address, ty: &TypeRef, info: Option<Arc<dyn DebugInfo>>, mem: SharedMemory) -> Value
    {
        let dwarf_type = if wants_alias(ty) { Type::alias_of(ty) } else { ty.clone() };
        let real = resolve_typedef(&dwarf_type);

        let mut v = Value {
            name,
            addr,
            dwarf_type: Some(dwarf_type),
            real_type: Some(real.clone()),
            mem: Some(mem),
            info,
            ..Value::default()
        };

        match &real.shape {
            TypeShape::Pointer(target) => {
                v.kind = Kind::Pointer;
                match target.get() {
                    Some(pointee) if real.foreign && !matches!(resolve_typedef(pointee).shape, TypeShape::Void) => {
                        v.flags |= ValueFlags::C_PTR;
                        v.field_type = Some(pointee.clone());
                        v.stride = align_size(pointee.byte_size, pointee.align);
                        if is_char(pointee) {
                            v.kind = Kind::String;
                        }
                        if !addr.is_null() {
                            match v.read_word(addr) {
                                Ok(base) => v.base = base,
                                Err(err) => v.unreadable = Some(err),
                            }
                        }
                    }
                    _ => {}
                }
            }
            TypeShape::Chan(_) => {
                v.kind = Kind::Chan;
                if !addr.is_null() {
                    v.load_chan_info();
                }
            }
            TypeShape::Map(_) => v.kind = Kind::Map,
            TypeShape::String(header) => {
                v.kind = Kind::String;
                v.stride = 1;
                v.field_type = Some(Type::uint("byte", 1));
                if !addr.is_null() {
                    let ptr_size = v.ptr_size();
                    let result = v
                        .memory()
                        .and_then(|mem| read_string_info(&mem, ptr_size, addr, header));
                    match result {
                        Ok((base, len)) => {
                            v.base = base;
                            v.len = len;
                        }
                        Err(err) => v.unreadable = Some(err),
                    }
                }
            }
            TypeShape::Slice(slice) => {
                v.kind = Kind::Slice;
                if !addr.is_null() {
                    v.load_slice_info(&slice.header);
                }
            }
            TypeShape::Interface(_) => v.kind = Kind::Interface,
            TypeShape::Struct(_) => v.kind = Kind::Struct,
            TypeShape::Array(arr) => {
                v.kind = Kind::Array;
                v.base = addr;
                v.len = arr.count;
                v.cap = arr.count;
                v.field_type = Some(arr.elem.clone());
                if arr.count > 0 {
                    v.stride = real.byte_size / arr.count;
                }
            }
            TypeShape::Complex => v.kind = Kind::Complex,
            TypeShape::Int | TypeShape::Char | TypeShape::Uchar => v.kind = Kind::Int,
            TypeShape::Uint => v.kind = Kind::Uint,
            TypeShape::Float => v.kind = Kind::Float,
            TypeShape::Bool => v.kind = Kind::Bool,
            TypeShape::Func(_) => v.kind = Kind::Func,
            TypeShape::Void | TypeShape::Unspecified => v.kind = Kind::Invalid,
            TypeShape::Typedef(_) | TypeShape::Qualified(_) => {
                v.unreadable = Some(VardigError::UnknownType(real.to_string()));
            }
            TypeShape::Unsupported(tag) => {
                v.unreadable = Some(VardigError::UnknownType(tag.clone()));
            }
        }

        v
    }

    /// Read one pointer-sized word at `addr`.
    pub(crate) fn read_word(&self, addr: Address) -> Result<Address>
    {
        let mem = self.memory()?;
        Ok(Address::new(read_uint_raw(mem.as_ref(), addr, self.ptr_size())?))
    }

    /// Decode a slice header into base, length, capacity and element stride.
    fn load_slice_info(&mut self, header: &StructType)
    {
        let mem = match self.memory() {
            Ok(mem) => cache_memory(&mem, self.addr, self.real_type.as_ref().map_or(0, |t| t.byte_size)),
            Err(err) => {
                self.unreadable = Some(err);
                return;
            }
        };

        for field in &header.fields {
            let field_addr = Address::new(self.addr.value().wrapping_add_signed(field.byte_offset));
            let result = match field.name.as_str() {
                "array" => read_uint_raw(mem.as_ref(), field_addr, field.ty.byte_size).and_then(|base| {
                    self.base = Address::new(base);
                    match resolve_typedef(&field.ty).pointee() {
                        Some(elem) => {
                            self.field_type = Some(elem.clone());
                            Ok(())
                        }
                        None => Err(VardigError::InvalidStride(format!("Invalid type {} in slice array", field.ty))),
                    }
                }),
                "len" => read_int_raw(mem.as_ref(), field_addr, field.ty.byte_size).map(|n| self.len = n),
                "cap" => read_int_raw(mem.as_ref(), field_addr, field.ty.byte_size).map(|n| self.cap = n),
                _ => Ok(()),
            };
            if let Err(err) = result {
                self.unreadable = Some(err);
                return;
            }
        }

        match &self.field_type {
            Some(elem) => self.stride = elem.byte_size,
            None if self.addr == FAKE_ADDRESS_UNRESOLVED => {}
            None => {
                warn!(addr = %self.addr, "slice header without element type");
                self.unreadable = Some(VardigError::InvalidStride(self.type_string()));
            }
        }
    }

    /// A loaded constant.
    pub fn constant(value: Scalar) -> Value
    {
        let kind = match &value {
            Scalar::Bool(_) => Kind::Bool,
            Scalar::Int(_) => Kind::Int,
            Scalar::Uint(_) => Kind::Uint,
            Scalar::Float(_) => Kind::Float,
            Scalar::Complex { .. } => Kind::Complex,
            Scalar::Str(_) => Kind::String,
        };
        let len = match &value {
            Scalar::Str(bytes) => bytes.len() as i64,
            _ => 0,
        };
        Value {
            kind,
            len,
            value: Some(value),
            flags: ValueFlags::CONSTANT,
            loaded: true,
            ..Value::default()
        }
    }

    /// The untyped `nil` literal: a pointer with one nil, address-only child.
    pub fn nil() -> Value
    {
        Value {
            name: "nil".into(),
            kind: Kind::Pointer,
            loaded: true,
            children: vec![Value {
                only_addr: true,
                ..Value::default()
            }],
            ..Value::default()
        }
    }

    /// A CPU register as a value. Registers up to 8 bytes read as `uint64`;
    /// wider registers read as a hex string of their bytes.
    pub fn from_register(
        name: impl Into<String>,
        reg: DwarfRegister,
        info: Arc<dyn DebugInfo>,
        mem: SharedMemory,
    ) -> Value
    {
        let wide = reg.size() > 8;
        let ty = if wide {
            Type::string(info.ptr_size())
        } else {
            Type::uint("uint64", 8)
        };
        let mut v = Value::build(name.into(), Address::ZERO, &ty, Some(info), mem);
        v.flags |= ValueFlags::CPU_REGISTER | ValueFlags::FAKE_ADDRESS;
        if wide {
            v.base = FAKE_ADDRESS_UNRESOLVED;
            v.len = -1;
        } else {
            v.addr = FAKE_ADDRESS_UNRESOLVED;
        }
        v.reg = Some(reg);
        v
    }

    /// Add flags.
    #[must_use]
    pub fn with_flags(mut self, flags: ValueFlags) -> Value
    {
        self.flags |= flags;
        self
    }

    /// Replace the memory accessor (e.g. with a [`crate::memory::CachedMemory`]).
    #[must_use]
    pub fn with_memory(mut self, mem: Arc<dyn MemoryReadWriter>) -> Value
    {
        self.mem = Some(mem);
        self
    }
}
