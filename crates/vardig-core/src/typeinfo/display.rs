//! Rendering of type descriptors.
//!
//! Named types render as their name. Anonymous types render structurally in
//! the source language's syntax. Cycles can only pass through named types, so
//! structural rendering always terminates.

use std::fmt;

use super::{Type, TypeShape};

impl fmt::Display for Type
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        if !self.name.is_empty() {
            return f.write_str(&self.name);
        }
        match &self.shape {
            TypeShape::Void => f.write_str("void"),
            TypeShape::Unspecified => f.write_str("unspecified"),
            TypeShape::Bool => f.write_str("bool"),
            TypeShape::Int => write!(f, "int{}", self.byte_size * 8),
            TypeShape::Uint => write!(f, "uint{}", self.byte_size * 8),
            TypeShape::Char => f.write_str("char"),
            TypeShape::Uchar => f.write_str("unsigned char"),
            TypeShape::Float => write!(f, "float{}", self.byte_size * 8),
            TypeShape::Complex => write!(f, "complex{}", self.byte_size * 8),
            TypeShape::Pointer(target) => match target.get() {
                Some(pointee) => write!(f, "*{pointee}"),
                None => f.write_str("*<unbound>"),
            },
            TypeShape::Struct(st) => {
                f.write_str("struct {")?;
                for (i, field) in st.fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(";")?;
                    }
                    write!(f, " {} {}", field.name, field.ty)?;
                }
                f.write_str(" }")
            }
            TypeShape::Array(arr) => write!(f, "[{}]{}", arr.count, arr.elem),
            TypeShape::Slice(slice) => write!(f, "[]{}", slice.elem),
            TypeShape::String(_) => f.write_str("string"),
            TypeShape::Map(map) => write!(f, "map[{}]{}", map.key, map.elem),
            TypeShape::Chan(chan) => write!(f, "chan {}", chan.elem),
            TypeShape::Interface(_) => {
                if self.is_empty_interface() {
                    f.write_str("interface {}")
                } else {
                    f.write_str("interface { ... }")
                }
            }
            TypeShape::Func(func) => {
                f.write_str("func(")?;
                for (i, param) in func.params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{param}")?;
                }
                f.write_str(")")?;
                match func.results.len() {
                    0 => Ok(()),
                    1 => write!(f, " {}", func.results[0]),
                    _ => {
                        f.write_str(" (")?;
                        for (i, result) in func.results.iter().enumerate() {
                            if i > 0 {
                                f.write_str(", ")?;
                            }
                            write!(f, "{result}")?;
                        }
                        f.write_str(")")
                    }
                }
            }
            TypeShape::Typedef(target) | TypeShape::Qualified(target) => write!(f, "{target}"),
            TypeShape::Unsupported(tag) => f.write_str(tag),
        }
    }
}
