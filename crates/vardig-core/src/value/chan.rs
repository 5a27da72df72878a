//! Channels.
//!
//! A channel value is a pointer to the runtime's `hchan` record. When the
//! value is built, the record's `buf` field is retyped from an untyped pointer
//! to a pointer to an array of `qcount` elements so the buffered elements load
//! like any other array.

use std::sync::Arc;

use super::{Kind, Value};
use crate::config::LoadConfig;
use crate::error::VardigError;
use crate::memory::read_uint_raw;
use crate::typeinfo::{resolve_typedef, ChanType, StructField, StructType, Type, TypeRef, TypeShape};

impl Value
{
    /// The `hchan` record type and channel descriptor of this value.
    fn chan_layout(&self) -> Option<(TypeRef, ChanType)>
    {
        let real = self.real_type.as_ref()?;
        match &real.shape {
            TypeShape::Chan(chan) => Some((real.clone(), chan.clone())),
            _ => None,
        }
    }

    /// Locate the runtime record and retype its buffer.
    pub(super) fn load_chan_info(&mut self)
    {
        let Some((real, chan)) = self.chan_layout() else {
            return;
        };

        let mut header = self.clone();
        header.real_type = Some(resolve_typedef(&chan.header));
        header.kind = Kind::Pointer;
        let record = header.maybe_dereference();
        if let Some(err) = record.unreadable {
            self.unreadable = Some(err);
            return;
        }
        if record.addr.is_null() {
            return;
        }
        self.base = record.addr;

        let Some(record_type) = record.real_type.clone() else {
            return;
        };
        let Some(layout) = record_type.as_struct() else {
            self.unreadable = Some(VardigError::UnknownType(format!("{record_type} is not a channel record")));
            return;
        };
        let Some(qcount_field) = layout.fields.get(1) else {
            self.unreadable = Some(VardigError::UnknownType(format!("{record_type} has no element count")));
            return;
        };

        let qcount_addr = record.addr.value().wrapping_add_signed(qcount_field.byte_offset);
        let qcount = match record
            .memory()
            .and_then(|mem| read_uint_raw(mem.as_ref(), qcount_addr.into(), qcount_field.ty.byte_size))
        {
            Ok(n) => n as i64,
            Err(err) => {
                self.unreadable = Some(err);
                return;
            }
        };

        let ptr_size = self.ptr_size();
        let fields = layout
            .fields
            .iter()
            .map(|field| {
                if field.name == "buf" {
                    let buf = Type::pointer_to(&Type::array(&chan.elem, qcount), ptr_size);
                    StructField {
                        ty: buf,
                        ..field.clone()
                    }
                } else {
                    field.clone()
                }
            })
            .collect();

        let retyped_record = Arc::new(Type {
            id: record_type.id,
            name: record_type.name.clone(),
            byte_size: record_type.byte_size,
            align: record_type.align,
            foreign: record_type.foreign,
            shape: TypeShape::Struct(StructType {
                struct_name: layout.struct_name.clone(),
                fields,
            }),
        });

        self.real_type = Some(Arc::new(Type {
            id: real.id,
            name: real.name.clone(),
            byte_size: real.byte_size,
            align: real.align,
            foreign: real.foreign,
            shape: TypeShape::Chan(ChanType {
                elem: chan.elem.clone(),
                header: Type::pointer_to(&retyped_record, ptr_size),
            }),
        }));
    }

    /// Load the runtime record; its fields become the children.
    pub(super) fn load_chan(&mut self)
    {
        let Some((_, chan)) = self.chan_layout() else {
            self.unreadable = Some(VardigError::UnsupportedKind(self.kind.to_string()));
            return;
        };
        let mut header = self.clone();
        header.real_type = Some(resolve_typedef(&chan.header));
        header.kind = Kind::Pointer;
        header.loaded = false;
        let mut record = header.maybe_dereference();
        record.load_internal(0, &LoadConfig::FULL_VALUE);

        self.children = record.children;
        self.len = record.len;
        self.base = record.addr;
        if let Some(err) = record.unreadable {
            self.unreadable = Some(err);
        }
    }
}
