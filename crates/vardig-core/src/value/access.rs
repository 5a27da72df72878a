//! Navigation: dereference, member lookup and element access.

use std::collections::{HashSet, VecDeque};

use super::{Kind, Scalar, Value, ValueFlags};
use crate::config::LoadConfig;
use crate::error::{Result, VardigError};
use crate::memory::dereference_memory;
use crate::typeinfo::{resolve_typedef, StructField, Type, TypeShape};
use crate::types::Address;

/// `true` if `field` contributes promoted members to its parent.
fn is_embedded(field: &StructField) -> bool
{
    if field.embedded || field.ty.name == field.name {
        return true;
    }
    match (field.name.strip_prefix('*'), field.ty.name.get(1..)) {
        (Some(name), Some(ty_name)) => !name.is_empty() && name == ty_name,
        _ => false,
    }
}

impl Value
{
    /// The value this one points to, or a copy of `self` for non-pointers.
    ///
    /// A loaded pointer with a fake or nil address that already holds its
    /// single child (a pointer built by conversion from an integer) returns
    /// that child without reading memory.
    pub fn maybe_dereference(&self) -> Value
    {
        if self.unreadable.is_some() {
            return self.clone();
        }
        let Some(real) = &self.real_type else {
            if self.kind == Kind::Pointer && self.loaded && self.children.len() == 1 {
                return self.children[0].clone();
            }
            return self.clone();
        };
        let TypeShape::Pointer(target) = &real.shape else {
            return self.clone();
        };

        let fake = self.addr.is_null() || self.flags.contains(ValueFlags::FAKE_ADDRESS);
        if fake && self.loaded && self.children.len() == 1 {
            return self.children[0].clone();
        }

        let pointee = target.get().cloned().unwrap_or_else(Type::void);
        let mem = match self.memory() {
            Ok(mem) => mem,
            Err(err) => {
                let mut v = self.clone();
                v.unreadable = Some(err);
                return v;
            }
        };
        match self.read_word(self.addr) {
            Ok(ptr) => self.child("", ptr, &pointee, dereference_memory(&mem)),
            Err(err) => {
                let mut v = self.child("", Address::ZERO, &pointee, dereference_memory(&mem));
                v.unreadable = Some(err);
                v
            }
        }
    }

    /// The struct member `field` of this value, unloaded.
    ///
    /// The member is named `parent.field` (or `parent.Name` for a qualified
    /// embedded member `pkg.Name`). Fails with [`VardigError::IsNil`] if this
    /// value has no address.
    pub fn to_field(&self, field: &StructField) -> Result<Value>
    {
        if self.unreadable.is_some() {
            return Ok(self.clone());
        }
        if self.addr.is_null() {
            return Err(VardigError::IsNil(self.name.clone()));
        }
        let name = if self.name.is_empty() {
            String::new()
        } else {
            let short = field.name.split('.').nth(1).unwrap_or(&field.name);
            format!("{}.{}", self.name, short)
        };
        let mem = self.memory()?;
        Ok(self.child(
            name,
            Address::new(self.addr.value().wrapping_add_signed(field.byte_offset)),
            &field.ty,
            mem,
        ))
    }

    /// Find `member`, looking through pointers, channels, interfaces, closures
    /// and embedded structs (breadth first).
    pub fn struct_member(&self, member: &str) -> Result<Value>
    {
        if self.unreadable.is_some() {
            return Ok(self.clone());
        }
        let vname = self.name.clone();
        if self.loaded && self.flags.contains(ValueFlags::FAKE_ADDRESS) {
            return self
                .children
                .iter()
                .find(|c| c.name == member)
                .cloned()
                .ok_or_else(|| VardigError::NoMember {
                    name: vname,
                    member: member.to_string(),
                });
        }

        let start = match self.kind {
            Kind::Chan => {
                let mut header = self.clone();
                if let Some(TypeShape::Chan(chan)) = self.real_type.as_ref().map(|t| &t.shape) {
                    header.real_type = Some(resolve_typedef(&chan.header));
                }
                header
            }
            Kind::Interface => {
                let mut iface = self.clone();
                iface.load_interface(0, false, &LoadConfig::default());
                match iface.children.first() {
                    Some(concrete) => concrete.clone(),
                    None => iface,
                }
            }
            Kind::Func => {
                let mut func = self.clone();
                match func.resolve_function() {
                    Some(f) => match self.info.as_ref().and_then(|info| info.closure_struct_type(&f)) {
                        Some(cst) => {
                            let mem = self.memory()?;
                            self.child(self.name.clone(), func.closure_addr, &cst, dereference_memory(&mem))
                        }
                        None => func,
                    },
                    None => func,
                }
            }
            _ => self.clone(),
        };

        let mut queue = VecDeque::from([start]);
        let mut seen = HashSet::new();
        let mut first = true;

        while let Some(v) = queue.pop_front() {
            let key = v.real_type.as_ref().map(|t| t.to_string()).unwrap_or_default();
            if !seen.insert(key) {
                continue;
            }

            let mut container = v.maybe_dereference();
            container.name = v.name.clone();
            if container.unreadable.is_some() {
                return Ok(container);
            }

            let layout = container.real_type.as_ref().and_then(|t| t.as_struct()).cloned();
            match layout {
                Some(layout) => {
                    if let Some(field) = layout.fields.iter().find(|f| f.name == member) {
                        return container.to_field(field);
                    }
                    for field in layout.fields.iter().filter(|f| is_embedded(f)) {
                        let embedded = container.to_field(field)?;
                        if field.name.split('.').nth(1) == Some(member) {
                            return Ok(embedded);
                        }
                        queue.push_back(embedded);
                    }
                }
                None if first => {
                    return Err(VardigError::NotAStruct {
                        name: vname,
                        type_name: container.type_string(),
                    });
                }
                None => {}
            }
            first = false;
        }

        Err(VardigError::NoMember {
            name: vname,
            member: member.to_string(),
        })
    }

    /// Element `idx` of an array, slice, string or foreign pointer.
    ///
    /// Foreign pointers have no known length; only negative indexes are
    /// rejected for them.
    pub fn slice_access(&self, idx: i64) -> Result<Value>
    {
        let out_of_bounds = if self.flags.contains(ValueFlags::C_PTR) {
            idx < 0
        } else {
            idx < 0 || idx >= self.len
        };
        if out_of_bounds {
            return Err(VardigError::IndexOutOfBounds { index: idx, len: self.len });
        }

        if self.loaded {
            if self.kind == Kind::String {
                if let Some(Scalar::Str(bytes)) = &self.value {
                    let byte = *bytes.get(idx as usize).ok_or(VardigError::IndexOutOfBounds {
                        index: idx,
                        len: bytes.len() as i64,
                    })?;
                    let elem = self
                        .field_type
                        .clone()
                        .ok_or_else(|| VardigError::InvalidStride(self.type_string()))?;
                    let addr = Address::new(self.base.value().wrapping_add_signed(idx.wrapping_mul(self.stride)));
                    let mut v = self.child("", addr, &elem, dereference_memory(&self.memory()?));
                    v.value = Some(Scalar::Uint(u64::from(byte)));
                    v.loaded = true;
                    return Ok(v);
                }
            }
            return self
                .children
                .get(idx as usize)
                .cloned()
                .ok_or(VardigError::IndexOutOfBounds {
                    index: idx,
                    len: self.children.len() as i64,
                });
        }

        let elem = self
            .field_type
            .clone()
            .ok_or_else(|| VardigError::InvalidStride(self.type_string()))?;
        let mut mem = self.memory()?;
        if self.kind != Kind::Array {
            mem = dereference_memory(&mem);
        }
        let addr = Address::new(self.base.value().wrapping_add_signed(idx.wrapping_mul(self.stride)));
        Ok(self.child("", addr, &elem, mem))
    }

    /// A loaded child by name. Returns `None` if this value is not loaded or has
    /// no such child.
    pub fn field_variable(&self, name: &str) -> Option<&Value>
    {
        debug_assert!(self.loaded, "field_variable on unloaded value {}", self.name);
        if !self.loaded {
            return None;
        }
        self.children.iter().find(|c| c.name == name)
    }

    /// Find `name` with [`Value::struct_member`] and load it in full.
    /// Returns `None` if it cannot be found or read.
    pub fn load_field_named(&self, name: &str) -> Option<Value>
    {
        let mut field = self.struct_member(name).ok()?;
        field.load(&LoadConfig::FULL_VALUE);
        field.unreadable.is_none().then_some(field)
    }
}
