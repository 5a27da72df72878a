//! The loader.
//!
//! `load_internal` materializes one value and, within the budget, its
//! descendants. It runs at most once per value: `loaded` is set before any
//! memory is touched, so a failure leaves a loaded value with `unreadable`
//! set rather than one that would be retried.
//!
//! Depth is counted in compound levels. Struct fields, array and slice
//! elements and map entries are one level below their container; following a
//! pointer does not add a level unless the pointee is itself a pointer or an
//! interface, which keeps `**T` chains and self-referencing interfaces finite.

use tracing::{debug, trace, warn};

use super::{FloatSpecial, Kind, Scalar, Value, ValueFlags, MAX_ARRAY_STRIDE_PREFETCH, MAX_ERR_COUNT};
use crate::config::LoadConfig;
use crate::error::{Result, VardigError};
use crate::memory::{
    cache_memory, dereference_memory, read_exact, read_float_raw, read_int_raw, read_uint_raw, MemoryReadWriter,
    FAKE_ADDRESS_UNRESOLVED,
};
use crate::typeinfo::{resolve_typedef, Type};
use crate::types::Address;

/// Reads of foreign strings never cross a boundary of this alignment, so a
/// string ending just before an unmapped page still loads.
const C_STRING_CHUNK: u64 = 1024;

/// Name of the struct whose values are rendered as timestamps.
const TIME_TYPE: &str = "time.Time";

/// Read a NUL-terminated string of at most `max_len` bytes. Returns the bytes
/// and whether the terminator was found.
fn read_c_string(mem: &dyn MemoryReadWriter, addr: Address, max_len: usize) -> Result<(Vec<u8>, bool)>
{
    let mut out = Vec::new();
    let mut cursor = addr.value();
    if cursor == 0 {
        return Ok((out, true));
    }
    let wrapped = |len: usize| VardigError::MemoryRead {
        addr,
        len,
        details: "string wraps the address space".into(),
    };
    while out.len() < max_len {
        let chunk_end = (cursor / C_STRING_CHUNK)
            .checked_add(1)
            .and_then(|n| n.checked_mul(C_STRING_CHUNK))
            .unwrap_or(u64::MAX);
        let want = ((chunk_end - cursor) as usize).min(max_len - out.len());
        if want == 0 {
            return Err(wrapped(out.len()));
        }
        let mut buf = vec![0u8; want];
        read_exact(mem, &mut buf, Address::new(cursor))?;
        if let Some(nul) = buf.iter().position(|&b| b == 0) {
            out.extend_from_slice(&buf[..nul]);
            return Ok((out, true));
        }
        out.extend_from_slice(&buf);
        cursor = cursor.checked_add(want as u64).ok_or_else(|| wrapped(out.len()))?;
    }
    Ok((out, false))
}

/// Read `min(len, max_len)` bytes of a native string.
fn read_string_bytes(mem: &dyn MemoryReadWriter, addr: Address, len: i64, max_len: usize) -> Result<Vec<u8>>
{
    if len <= 0 {
        return Ok(Vec::new());
    }
    let count = (len as usize).min(max_len);
    let mut buf = vec![0u8; count];
    read_exact(mem, &mut buf, addr)?;
    Ok(buf)
}

impl Value
{
    /// Load this value and, within `cfg`, its descendants.
    ///
    /// Never fails: read errors are recorded in `unreadable` on the narrowest
    /// value they concern.
    pub fn load(&mut self, cfg: &LoadConfig)
    {
        self.load_internal(0, cfg);
    }

    pub(crate) fn load_internal(&mut self, recurse: i32, cfg: &LoadConfig)
    {
        if self.unreadable.is_some() || self.loaded || (self.addr.is_null() && self.base.is_null()) {
            return;
        }
        self.loaded = true;
        trace!(name = %self.name, kind = %self.kind, addr = %self.addr, recurse, "load");

        match self.kind {
            Kind::Pointer => self.load_pointer(recurse, cfg),
            Kind::Chan => self.load_chan(),
            Kind::Map => {
                if recurse <= cfg.max_variable_recurse {
                    self.load_map(recurse, cfg);
                } else {
                    // Length only, so the map shows as non-empty.
                    let _ = self.map_iterator(0);
                }
            }
            Kind::String => self.load_string(cfg),
            Kind::Slice | Kind::Array => self.load_array_values(recurse, cfg),
            Kind::Struct => self.load_struct(recurse, cfg),
            Kind::Interface => self.load_interface(recurse, true, cfg),
            Kind::Complex => self.load_complex(),
            Kind::Int => {
                let result = self.read_scalar_int();
                self.set_scalar(result.map(Scalar::Int));
            }
            Kind::Uint => {
                if self.flags.contains(ValueFlags::CPU_REGISTER) {
                    self.value = self.reg.as_ref().map(|reg| Scalar::Uint(reg.uint64_val));
                } else {
                    let result = self.read_scalar_uint();
                    self.set_scalar(result.map(Scalar::Uint));
                }
            }
            Kind::Bool => {
                let result = self.memory().and_then(|mem| {
                    let mut byte = [0u8; 1];
                    read_exact(mem.as_ref(), &mut byte, self.addr)?;
                    Ok(byte[0] != 0)
                });
                self.set_scalar(result.map(Scalar::Bool));
            }
            Kind::Float => {
                let size = self.byte_size();
                let result = self.memory().and_then(|mem| read_float_raw(mem.as_ref(), self.addr, size));
                if let Ok(f) = result {
                    self.float_special = FloatSpecial::classify(f);
                }
                self.set_scalar(result.map(Scalar::Float));
            }
            Kind::Func => self.load_function_ptr(recurse, cfg),
            Kind::Invalid => {
                self.unreadable = Some(VardigError::UnsupportedKind(self.kind.to_string()));
            }
        }
    }

    fn set_scalar(&mut self, result: Result<Scalar>)
    {
        match result {
            Ok(v) => self.value = Some(v),
            Err(err) => self.unreadable = Some(err),
        }
    }

    pub(super) fn byte_size(&self) -> i64
    {
        self.real_type.as_ref().map_or(0, |t| t.byte_size)
    }

    fn read_scalar_int(&self) -> Result<i64>
    {
        let mem = self.memory()?;
        read_int_raw(mem.as_ref(), self.addr, self.byte_size())
    }

    fn read_scalar_uint(&self) -> Result<u64>
    {
        let mem = self.memory()?;
        read_uint_raw(mem.as_ref(), self.addr, self.byte_size())
    }

    /// Dereference into a single child and load it if pointers are followed.
    fn load_pointer(&mut self, recurse: i32, cfg: &LoadConfig)
    {
        self.len = 1;
        let mem = match self.memory() {
            Ok(mem) => mem,
            Err(err) => {
                self.unreadable = Some(err);
                return;
            }
        };
        let pointee = self
            .real_type
            .as_ref()
            .and_then(|t| t.pointee().cloned())
            .unwrap_or_else(Type::void);

        let mut child = match self.read_word(self.addr) {
            Ok(target) => {
                self.value = Some(Scalar::Uint(target.value()));
                self.child("", target, &pointee, dereference_memory(&mem))
            }
            Err(err) => {
                let mut child = self.child("", Address::ZERO, &pointee, dereference_memory(&mem));
                child.unreadable = Some(err.clone().parent_unreadable());
                self.unreadable = Some(err);
                child
            }
        };

        if !cfg.follow_pointers || child.kind == Kind::Invalid {
            child.only_addr = true;
        } else {
            let mut next = recurse;
            let mut check = false;
            if child.kind == Kind::Interface {
                next += 1;
            } else if resolve_typedef(&pointee).is_pointer() {
                next += 1;
                check = true;
            }
            if check && recurse > cfg.max_variable_recurse {
                child.only_addr = true;
            } else {
                child.load_internal(next, cfg);
            }
        }
        self.children = vec![child];
    }

    fn load_string(&mut self, cfg: &LoadConfig)
    {
        let mem = match self.memory() {
            Ok(mem) => mem,
            Err(err) => {
                self.unreadable = Some(err);
                return;
            }
        };

        if self.flags.contains(ValueFlags::C_PTR) {
            let mem = dereference_memory(&mem);
            match read_c_string(mem.as_ref(), self.base, cfg.max_string_len) {
                Ok((bytes, done)) => {
                    self.len = bytes.len() as i64 + i64::from(!done);
                    self.value = Some(Scalar::Str(bytes));
                }
                Err(err) => self.unreadable = Some(err),
            }
            return;
        }

        if self.flags.contains(ValueFlags::CPU_REGISTER) {
            let Some(reg) = &self.reg else {
                self.unreadable = Some(VardigError::RegisterConversion(self.type_string()));
                return;
            };
            let mut hex: String = reg.bytes.iter().map(|b| format!("{b:02x}")).collect();
            let start = self.base.value().wrapping_sub(FAKE_ADDRESS_UNRESOLVED.value()) as usize;
            if start < hex.len() {
                hex.drain(..start);
                if self.len >= 0 && (self.len as usize) < hex.len() {
                    hex.truncate(self.len as usize);
                }
            }
            if self.len < 0 {
                self.len = hex.len() as i64;
            }
            self.value = Some(Scalar::string(hex));
            return;
        }

        let mem = dereference_memory(&mem);
        let result = read_string_bytes(mem.as_ref(), self.base, self.len, cfg.max_string_len);
        self.set_scalar(result.map(Scalar::Str));
    }

    fn load_array_values(&mut self, recurse: i32, cfg: &LoadConfig)
    {
        if self.len < 0 {
            self.unreadable = Some(VardigError::NegativeLength);
            return;
        }
        if self.base.is_null() && self.len > 0 {
            warn!(name = %self.name, len = self.len, "non-empty array with nil base");
            self.unreadable = Some(VardigError::NilBase);
            return;
        }
        let Some(elem) = self.field_type.clone() else {
            self.unreadable = Some(VardigError::InvalidStride(self.type_string()));
            return;
        };

        let mut count = self.len;
        if !self.flags.contains(ValueFlags::TRUST_LEN) {
            count = count.min(cfg.max_array_values as i64);
        }

        let span = self.stride.checked_mul(count);
        let end = span.and_then(|span| u64::try_from(span).ok()).and_then(|span| self.base.checked_add(span));
        if end.is_none() {
            self.unreadable = Some(VardigError::BadArrayBase(self.base));
            return;
        }

        let mut mem = match self.memory() {
            Ok(mem) => mem,
            Err(err) => {
                self.unreadable = Some(err);
                return;
            }
        };
        if self.stride < MAX_ARRAY_STRIDE_PREFETCH {
            mem = cache_memory(&mem, self.base, self.stride * count);
        }
        if self.kind != Kind::Array {
            mem = dereference_memory(&mem);
        }

        let mut errcount = 0;
        self.children.reserve(count as usize);
        for i in 0..count {
            let addr = Address::new(self.base.value().wrapping_add((i * self.stride) as u64));
            let mut elem_value = self.child("", addr, &elem, mem.clone());
            elem_value.load_internal(recurse + 1, cfg);
            if elem_value.unreadable.is_some() {
                errcount += 1;
            }
            self.children.push(elem_value);
            if errcount > MAX_ERR_COUNT {
                debug!(name = %self.name, loaded = self.children.len(), "too many unreadable elements, stopping");
                break;
            }
        }
    }

    fn load_struct(&mut self, recurse: i32, cfg: &LoadConfig)
    {
        let Some(real) = self.real_type.clone() else {
            return;
        };
        let Some(layout) = real.as_struct() else {
            self.unreadable = Some(VardigError::UnknownType(real.to_string()));
            return;
        };
        if let Ok(mem) = self.memory() {
            self.mem = Some(cache_memory(&mem, self.addr, real.byte_size));
        }
        self.len = layout.fields.len() as i64;

        if recurse <= cfg.max_variable_recurse {
            // Closure capture records have no name; `&x` members hold the
            // address of a variable captured by reference.
            let closure = real.name.is_empty();
            self.children.reserve(layout.fields.len());
            for field in &layout.fields {
                if !cfg.allows_field(self.children.len()) {
                    break;
                }
                let mut member = match self.to_field(field) {
                    Ok(member) => member,
                    Err(err) => {
                        self.unreadable = Some(err);
                        return;
                    }
                };
                member.name = field.name.clone();
                if closure && member.kind == Kind::Pointer {
                    if let Some(captured) = field.name.strip_prefix('&') {
                        member = member.maybe_dereference();
                        member.flags |= ValueFlags::ESCAPED;
                        member.name = captured.to_string();
                    }
                }
                member.load_internal(recurse + 1, cfg);
                self.children.push(member);
            }
        }

        if real.name == TIME_TYPE {
            self.format_time();
        }
    }

    fn load_complex(&mut self)
    {
        let size = self.byte_size();
        let half = match size {
            8 | 16 => size / 2,
            _ => {
                self.unreadable = Some(VardigError::InvalidArgument(format!("invalid size ({size}) for complex type")));
                return;
            }
        };
        let result = self.memory().and_then(|mem| {
            let re = read_float_raw(mem.as_ref(), self.addr, half)?;
            let im_addr = Address::new(self.addr.value().wrapping_add(half as u64));
            let im = read_float_raw(mem.as_ref(), im_addr, half)?;
            Ok(Scalar::Complex { re, im })
        });
        self.set_scalar(result);
    }
}
