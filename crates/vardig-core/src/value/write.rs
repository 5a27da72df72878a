//! Assignment.
//!
//! [`Value::set_value`] stores a source value (a typed value of the same type,
//! an untyped constant, or `nil`) into a destination value. Writes go through
//! the destination's memory accessor, so register-backed destinations update
//! the captured registers.

use tracing::debug;

use super::{Kind, Scalar, Value};
use crate::config::LoadConfig;
use crate::error::{Result, VardigError};
use crate::memory::{encode_float, encode_uint, read_exact, write_exact};
use crate::program::KIND_DIRECT_IFACE;
use crate::typeinfo::{resolve_typedef, TypeShape};
use crate::types::Address;

impl Value
{
    fn write_bytes(&self, addr: Address, data: &[u8]) -> Result<()>
    {
        let mem = self.memory()?;
        write_exact(mem.as_ref(), addr, data)
    }

    /// Store the low `size` bytes of `value`.
    pub fn write_uint(&self, value: u64, size: i64) -> Result<()>
    {
        self.write_bytes(self.addr, &encode_uint(value, size)?)
    }

    /// Store a 4 or 8 byte float.
    pub fn write_float_raw(&self, value: f64, size: i64) -> Result<()>
    {
        self.write_bytes(self.addr, &encode_float(value, size)?)
    }

    /// Store a complex number as two half-width floats.
    pub fn write_complex(&self, re: f64, im: f64, size: i64) -> Result<()>
    {
        let half = match size {
            8 | 16 => size / 2,
            _ => return Err(VardigError::InvalidArgument(format!("invalid size ({size}) for complex type"))),
        };
        let mut bytes = encode_float(re, half)?;
        bytes.extend(encode_float(im, half)?);
        self.write_bytes(self.addr, &bytes)
    }

    /// Store a boolean byte.
    pub fn write_bool(&self, value: bool) -> Result<()>
    {
        self.write_bytes(self.addr, &[u8::from(value)])
    }

    /// Zero the whole value.
    pub fn write_zero(&self) -> Result<()>
    {
        let size = usize::try_from(self.byte_size()).unwrap_or(0);
        self.write_bytes(self.addr, &vec![0u8; size])
    }

    /// Store a string header pointing at `len` bytes at `base`.
    pub fn write_string(&self, len: u64, base: Address) -> Result<()>
    {
        let ptr_size = self.ptr_size();
        self.write_bytes(self.addr, &encode_uint(base.value(), ptr_size)?)?;
        let len_addr = Address::new(self.addr.value().wrapping_add(ptr_size as u64));
        self.write_bytes(len_addr, &encode_uint(len, ptr_size)?)
    }

    /// Store a slice header. Inconsistent headers are rejected before
    /// anything is written.
    pub fn write_slice(&self, len: i64, cap: i64, base: Address) -> Result<()>
    {
        if len < 0 || cap < 0 || len > cap {
            return Err(VardigError::InvalidArgument(format!("invalid slice header: len {len}, cap {cap}")));
        }
        let header = match self.real_type.as_ref().map(|t| &t.shape) {
            Some(TypeShape::Slice(slice)) => slice.header.clone(),
            _ => return Err(VardigError::CannotAssign(self.type_string())),
        };
        for field in &header.fields {
            let value = match field.name.as_str() {
                "array" => base.value(),
                "len" => len as u64,
                "cap" => cap as u64,
                _ => continue,
            };
            let addr = Address::new(self.addr.value().wrapping_add_signed(field.byte_offset));
            self.write_bytes(addr, &encode_uint(value, field.ty.byte_size)?)?;
        }
        Ok(())
    }

    /// Copy the bytes of `src` over this value.
    pub fn write_copy(&self, src: &Value) -> Result<()>
    {
        let size = usize::try_from(src.byte_size()).unwrap_or(0);
        let mut buf = vec![0u8; size];
        let src_mem = src.memory()?;
        read_exact(src_mem.as_ref(), &mut buf, src.addr)?;
        self.write_bytes(self.addr, &buf)
    }

    /// Store `(type_addr, data)` into an empty interface.
    pub fn write_empty_interface(&self, type_addr: Address, data: &Value) -> Result<()>
    {
        let mut dst = self.clone();
        let parts = dst.read_interface();
        if let Some(err) = dst.unreadable {
            return Err(err);
        }
        let (Some(type_word), Some(data_word)) = (parts.type_, parts.data) else {
            return Err(VardigError::InvalidInterface(self.type_string()));
        };
        type_word.write_uint(type_addr.value(), type_word.byte_size())?;
        data_word.write_copy(data)
    }

    /// Store `src` into this empty interface, boxing it with its runtime type.
    pub fn convert_to_eface(&self, src: &Value) -> Result<()>
    {
        let mismatch = || VardigError::TypeConversion {
            src: src.type_string(),
            dst: self.type_string(),
        };
        if !self.real_type.as_ref().is_some_and(|t| t.is_empty_interface()) {
            return Err(mismatch());
        }

        if src.kind == Kind::Interface {
            let mut src_iface = src.clone();
            let parts = src_iface.read_interface();
            if let Some(err) = src_iface.unreadable {
                return Err(err);
            }
            let type_addr = parts.type_.map_or(Address::ZERO, |t| t.maybe_dereference().addr);
            let data = parts.data.ok_or_else(|| VardigError::InvalidInterface(src.type_string()))?;
            return self.write_empty_interface(type_addr, &data);
        }

        let (info, mem) = (src.debug_info()?, src.memory()?);
        let Some(src_type) = &src.real_type else {
            return Err(mismatch());
        };
        match info.type_to_runtime_type(&mem, src_type)? {
            Some(rt) if rt.kind & KIND_DIRECT_IFACE != 0 => self.write_empty_interface(rt.addr, src),
            _ => Err(mismatch()),
        }
    }

    /// Check that `src` may be stored into this value.
    ///
    /// Typed sources need the same type; `nil` fits nillable kinds; untyped
    /// constants fit destinations of a compatible scalar kind.
    pub fn check_assignable(&self, src: &Value) -> Result<()>
    {
        let dst_type = self.real_type.as_ref().map(|t| t.to_string()).unwrap_or_default();
        if src.dwarf_type.is_some() {
            let src_type = src.real_type.as_ref().map(|t| t.to_string()).unwrap_or_default();
            if self.real_type.is_none() || src_type != dst_type {
                return Err(VardigError::TypeConversion {
                    src: src.type_string(),
                    dst: self.type_string(),
                });
            }
            return Ok(());
        }
        let Some(dst_real) = &self.real_type else {
            return Ok(());
        };
        if src.is_nil_literal() {
            return match self.kind {
                Kind::Slice | Kind::Map | Kind::Func | Kind::Pointer | Kind::Chan | Kind::Interface => Ok(()),
                _ => Err(VardigError::TypeConversion {
                    src: "nil".into(),
                    dst: self.type_string(),
                }),
            };
        }

        let Some(value) = &src.value else {
            return Err(VardigError::InvalidArgument(format!("can not convert constant to {dst_type}")));
        };
        let fits = match &resolve_typedef(dst_real).shape {
            TypeShape::Int | TypeShape::Uint | TypeShape::Char | TypeShape::Uchar => {
                matches!(value, Scalar::Int(_) | Scalar::Uint(_))
            }
            TypeShape::Float => matches!(value, Scalar::Int(_) | Scalar::Uint(_) | Scalar::Float(_)),
            TypeShape::Complex => {
                matches!(value, Scalar::Int(_) | Scalar::Uint(_) | Scalar::Float(_) | Scalar::Complex { .. })
            }
            TypeShape::Bool => matches!(value, Scalar::Bool(_)),
            TypeShape::String(_) => matches!(value, Scalar::Str(_)),
            _ => false,
        };
        if fits {
            Ok(())
        } else {
            Err(VardigError::InvalidArgument(format!("can not convert {value} constant to {dst_type}")))
        }
    }

    /// Assign `src` to this value.
    pub fn set_value(&self, src: &Value) -> Result<()>
    {
        if let Some(err) = &self.unreadable {
            return Err(err.clone());
        }
        let mut src = src.clone();
        src.load(&LoadConfig::SINGLE_VALUE);

        match self.check_assignable(&src) {
            Err(VardigError::TypeConversion { .. }) if !src.is_nil_literal() => {
                debug!(src = %src.type_string(), dst = %self.type_string(), "trying interface conversion");
                return self.convert_to_eface(&src);
            }
            Err(err) => return Err(err),
            Ok(()) => {}
        }
        if let Some(err) = src.unreadable {
            return Err(err);
        }

        let size = self.byte_size();
        let scalar = src.value.as_ref();
        match self.kind {
            Kind::Float => {
                let f = scalar.and_then(Scalar::as_f64).unwrap_or_default();
                return self.write_float_raw(f, size);
            }
            Kind::Int => {
                let n = scalar.and_then(Scalar::as_i64).unwrap_or_default();
                return self.write_uint(n as u64, size);
            }
            Kind::Uint => {
                let n = scalar.and_then(Scalar::as_u64).unwrap_or_default();
                return self.write_uint(n, size);
            }
            Kind::Bool => {
                let b = scalar.and_then(Scalar::as_bool).unwrap_or_default();
                return self.write_bool(b);
            }
            Kind::Complex => {
                let (re, im) = scalar.and_then(Scalar::as_complex).unwrap_or_default();
                return self.write_complex(re, im, size);
            }
            Kind::Func if size == 0 => {
                let target = if self.name.is_empty() {
                    "function expression".to_string()
                } else {
                    self.name.clone()
                };
                return Err(VardigError::CannotAssign(target));
            }
            _ => {}
        }

        if src.is_nil_literal() {
            return self.write_zero();
        }

        if src.kind == Kind::String {
            if src.base.is_null() && src.len > 0 && src.dwarf_type.is_none() {
                return Err(VardigError::InvalidArgument(
                    "string literal would have to be allocated in the target".into(),
                ));
            }
            return self.write_string(src.len as u64, src.base);
        }

        if src.kind == Kind::Slice {
            return self.write_slice(src.len, src.cap, src.base);
        }

        if self.kind == Kind::Pointer {
            let target = match (src.children.first(), &src.value) {
                (Some(child), _) => child.addr.value(),
                (None, Some(v)) => v.as_u64().unwrap_or_default(),
                (None, None) => 0,
            };
            return self.write_uint(target, size);
        }

        if !src.addr.is_null() {
            return self.write_copy(&src);
        }

        Err(VardigError::CannotAssign(format!(
            "variables of type {} (not implemented)",
            self.kind
        )))
    }
}
