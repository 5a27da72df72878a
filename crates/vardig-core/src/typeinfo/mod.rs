//! # Type descriptors
//!
//! The value layer's view of debug metadata. Decoding DWARF into these
//! descriptors is the job of the debug-metadata collaborator; everything here
//! is a passive, shareable description of shapes, sizes and field offsets.
//!
//! Types form a graph with cycles (`type Node struct { next *Node }`). Every
//! cycle in a Go program goes through a pointer, so pointer targets are the only
//! late-bound edge: a [`PointerTarget`] can be created empty and bound once the
//! pointee exists. All other edges are plain [`TypeRef`]s.
//!
//! ## Example
//!
//! ```rust
//! use vardig_core::typeinfo::{StructField, Type};
//!
//! let int = Type::int("int", 8);
//! let next = Type::forward_pointer("", 8);
//! let node = Type::structure("main.Node", 16, vec![
//!     StructField::new("val", 0, int),
//!     StructField::new("next", 8, next.clone()),
//! ]);
//! next.pointer_target().unwrap().bind(node.clone());
//! assert_eq!(next.to_string(), "*main.Node");
//! ```

mod display;

use std::fmt;
use std::sync::{Arc, OnceLock};

/// Shared handle to a type descriptor.
pub type TypeRef = Arc<Type>;

/// Stable identity of a descriptor inside its debug image (the DWARF offset for
/// DWARF-backed metadata). Used to key per-type side tables such as named
/// constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TypeId(pub u64);

/// A type descriptor.
#[derive(Debug)]
pub struct Type
{
    /// Identity inside the debug image.
    pub id: TypeId,
    /// Declared name (`main.Node`, `int`, `[]string`); empty for anonymous types.
    pub name: String,
    /// Size in bytes.
    pub byte_size: i64,
    /// Alignment in bytes (falls back to the size for scalars).
    pub align: i64,
    /// Declared by a non-native (C) compile unit.
    pub foreign: bool,
    /// Shape of the type.
    pub shape: TypeShape,
}

/// The closed set of shapes a descriptor can have.
#[derive(Debug)]
pub enum TypeShape
{
    /// `void`, the pointee of untyped pointers.
    Void,
    /// A DWARF unspecified type.
    Unspecified,
    /// Boolean.
    Bool,
    /// Signed integer.
    Int,
    /// Unsigned integer.
    Uint,
    /// Foreign `char`.
    Char,
    /// Foreign `unsigned char`.
    Uchar,
    /// IEEE float (4 or 8 bytes).
    Float,
    /// Complex number (8 or 16 bytes, two half-width floats).
    Complex,
    /// Pointer.
    Pointer(PointerTarget),
    /// Struct with fields in declaration order.
    Struct(StructType),
    /// Fixed-size array.
    Array(ArrayType),
    /// Slice header (`array`, `len`, `cap`).
    Slice(SliceType),
    /// String header (`str`, `len`).
    String(StructType),
    /// Map; the value is a pointer to the runtime's map header.
    Map(MapType),
    /// Channel; the value is a pointer to the runtime's channel record.
    Chan(ChanType),
    /// Interface; `repr` is the two-word runtime representation.
    Interface(InterfaceType),
    /// Function value; a pointer to a function-value record.
    Func(FuncType),
    /// Named alias of another type.
    Typedef(TypeRef),
    /// `const`/`volatile` qualified foreign type.
    Qualified(TypeRef),
    /// A descriptor kind the metadata reader could not map (the tag name is kept
    /// for error messages).
    Unsupported(String),
}

/// Late-bindable pointer target.
#[derive(Clone, Default)]
pub struct PointerTarget(Arc<OnceLock<TypeRef>>);

impl PointerTarget
{
    /// A target that is already known.
    #[must_use]
    pub fn resolved(target: TypeRef) -> Self
    {
        let cell = OnceLock::new();
        let _ = cell.set(target);
        Self(Arc::new(cell))
    }

    /// Bind the target of a forward-declared pointer. Binding twice keeps the
    /// first target.
    pub fn bind(&self, target: TypeRef)
    {
        let _ = self.0.set(target);
    }

    /// The pointee, if bound.
    pub fn get(&self) -> Option<&TypeRef>
    {
        self.0.get()
    }
}

impl fmt::Debug for PointerTarget
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self.get() {
            Some(target) => write!(f, "PointerTarget({})", target),
            None => write!(f, "PointerTarget(<unbound>)"),
        }
    }
}

/// One struct member.
#[derive(Debug, Clone)]
pub struct StructField
{
    /// Member name. Captured-by-reference closure variables are named `&x`.
    pub name: String,
    /// Offset from the start of the struct.
    pub byte_offset: i64,
    /// Member type.
    pub ty: TypeRef,
    /// Declared as an embedded member.
    pub embedded: bool,
}

impl StructField
{
    /// Create an ordinary member.
    pub fn new(name: impl Into<String>, byte_offset: i64, ty: TypeRef) -> Self
    {
        Self {
            name: name.into(),
            byte_offset,
            ty,
            embedded: false,
        }
    }

    /// Create an embedded member.
    pub fn embedded(name: impl Into<String>, byte_offset: i64, ty: TypeRef) -> Self
    {
        Self {
            embedded: true,
            ..Self::new(name, byte_offset, ty)
        }
    }
}

/// Struct layout.
#[derive(Debug, Clone, Default)]
pub struct StructType
{
    /// Tag name as written in the source (empty for closure capture records).
    pub struct_name: String,
    /// Members in declaration order.
    pub fields: Vec<StructField>,
}

impl StructType
{
    /// Find a member by name.
    pub fn field(&self, name: &str) -> Option<&StructField>
    {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Fixed-size array.
#[derive(Debug, Clone)]
pub struct ArrayType
{
    /// Element type.
    pub elem: TypeRef,
    /// Number of elements.
    pub count: i64,
}

/// Slice header layout.
#[derive(Debug, Clone)]
pub struct SliceType
{
    /// Header fields (`array`, `len`, `cap`).
    pub header: StructType,
    /// Element type.
    pub elem: TypeRef,
}

/// Map descriptor.
#[derive(Debug, Clone)]
pub struct MapType
{
    /// Key type.
    pub key: TypeRef,
    /// Element type.
    pub elem: TypeRef,
    /// Pointer to the runtime map header struct.
    pub header: TypeRef,
}

/// Channel descriptor.
#[derive(Debug, Clone)]
pub struct ChanType
{
    /// Element type.
    pub elem: TypeRef,
    /// Pointer to the runtime channel record (`hchan`).
    pub header: TypeRef,
}

/// Interface descriptor.
#[derive(Debug, Clone)]
pub struct InterfaceType
{
    /// Two-word runtime representation: `{tab, data}` for interfaces with
    /// methods, `{_type, data}` for the empty interface.
    pub repr: TypeRef,
}

/// Function descriptor.
#[derive(Debug, Clone, Default)]
pub struct FuncType
{
    /// Parameter types.
    pub params: Vec<TypeRef>,
    /// Result types.
    pub results: Vec<TypeRef>,
}

impl Type
{
    /// Create a descriptor. Alignment defaults to the size, capped at 8.
    pub fn new(name: impl Into<String>, byte_size: i64, shape: TypeShape) -> Self
    {
        Self {
            id: TypeId::default(),
            name: name.into(),
            byte_size,
            align: byte_size.clamp(1, 8),
            foreign: false,
            shape,
        }
    }

    /// Set the identity.
    #[must_use]
    pub fn with_id(mut self, id: TypeId) -> Self
    {
        self.id = id;
        self
    }

    /// Mark as declared by a foreign (C) compile unit.
    #[must_use]
    pub fn foreign(mut self) -> Self
    {
        self.foreign = true;
        self
    }

    /// Override the alignment.
    #[must_use]
    pub fn with_align(mut self, align: i64) -> Self
    {
        self.align = align;
        self
    }

    /// Finish building.
    #[must_use]
    pub fn into_ref(self) -> TypeRef
    {
        Arc::new(self)
    }

    /// Signed integer type.
    pub fn int(name: &str, size: i64) -> TypeRef
    {
        Type::new(name, size, TypeShape::Int).into_ref()
    }

    /// Unsigned integer type.
    pub fn uint(name: &str, size: i64) -> TypeRef
    {
        Type::new(name, size, TypeShape::Uint).into_ref()
    }

    /// Float type.
    pub fn float(name: &str, size: i64) -> TypeRef
    {
        Type::new(name, size, TypeShape::Float).into_ref()
    }

    /// Unnamed float of `bits` bits.
    pub fn fake_float(bits: i64) -> TypeRef
    {
        Type::float(&format!("float{bits}"), bits / 8)
    }

    /// Complex type.
    pub fn complex(name: &str, size: i64) -> TypeRef
    {
        Type::new(name, size, TypeShape::Complex).into_ref()
    }

    /// Boolean type.
    pub fn boolean() -> TypeRef
    {
        Type::new("bool", 1, TypeShape::Bool).into_ref()
    }

    /// `void`.
    pub fn void() -> TypeRef
    {
        Type::new("void", 0, TypeShape::Void).into_ref()
    }

    /// Pointer to an existing type.
    pub fn pointer_to(target: &TypeRef, ptr_size: i64) -> TypeRef
    {
        Type::new("", ptr_size, TypeShape::Pointer(PointerTarget::resolved(target.clone()))).into_ref()
    }

    /// Pointer whose target is bound later through [`Type::pointer_target`].
    pub fn forward_pointer(name: &str, ptr_size: i64) -> TypeRef
    {
        Type::new(name, ptr_size, TypeShape::Pointer(PointerTarget::default())).into_ref()
    }

    /// Struct type.
    pub fn structure(name: &str, byte_size: i64, fields: Vec<StructField>) -> TypeRef
    {
        Type::new(
            name,
            byte_size,
            TypeShape::Struct(StructType {
                struct_name: name.rsplit('.').next().unwrap_or_default().to_string(),
                fields,
            }),
        )
        .with_align(8)
        .into_ref()
    }

    /// Fixed array of `count` elements, named after its shape (`[4]int`).
    pub fn array(elem: &TypeRef, count: i64) -> TypeRef
    {
        let size = elem.byte_size.saturating_mul(count.max(0));
        Type::new(
            format!("[{count}]{elem}"),
            size,
            TypeShape::Array(ArrayType {
                elem: elem.clone(),
                count,
            }),
        )
        .with_align(elem.align)
        .into_ref()
    }

    /// Native string header: `{str *uint8; len int}`.
    pub fn string(ptr_size: i64) -> TypeRef
    {
        let byte = Type::uint("uint8", 1);
        Type::new(
            "string",
            ptr_size * 2,
            TypeShape::String(StructType {
                struct_name: "string".into(),
                fields: vec![
                    StructField::new("str", 0, Type::pointer_to(&byte, ptr_size)),
                    StructField::new("len", ptr_size, Type::int("int", ptr_size)),
                ],
            }),
        )
        .into_ref()
    }

    /// Native slice header: `{array *elem; len int; cap int}`.
    pub fn slice(elem: &TypeRef, ptr_size: i64) -> TypeRef
    {
        let int = Type::int("int", ptr_size);
        Type::new(
            format!("[]{elem}"),
            ptr_size * 3,
            TypeShape::Slice(SliceType {
                header: StructType {
                    struct_name: String::new(),
                    fields: vec![
                        StructField::new("array", 0, Type::pointer_to(elem, ptr_size)),
                        StructField::new("len", ptr_size, int.clone()),
                        StructField::new("cap", ptr_size * 2, int),
                    ],
                },
                elem: elem.clone(),
            }),
        )
        .into_ref()
    }

    /// Map type; `header` is the pointer-to-runtime-header type.
    pub fn map(key: &TypeRef, elem: &TypeRef, header: TypeRef) -> TypeRef
    {
        let size = header.byte_size;
        Type::new(
            format!("map[{key}]{elem}"),
            size,
            TypeShape::Map(MapType {
                key: key.clone(),
                elem: elem.clone(),
                header,
            }),
        )
        .into_ref()
    }

    /// Channel type; `header` is the pointer-to-`hchan` type.
    pub fn chan(elem: &TypeRef, header: TypeRef) -> TypeRef
    {
        let size = header.byte_size;
        Type::new(
            format!("chan {elem}"),
            size,
            TypeShape::Chan(ChanType {
                elem: elem.clone(),
                header,
            }),
        )
        .into_ref()
    }

    /// Interface type over its runtime representation struct.
    pub fn interface(name: &str, repr: TypeRef) -> TypeRef
    {
        let size = repr.byte_size;
        Type::new(name, size, TypeShape::Interface(InterfaceType { repr })).into_ref()
    }

    /// Function value type (one pointer wide).
    pub fn func(name: &str, ptr_size: i64) -> TypeRef
    {
        Type::new(name, ptr_size, TypeShape::Func(FuncType::default())).into_ref()
    }

    /// Named alias of `target`.
    pub fn typedef(name: &str, target: &TypeRef) -> TypeRef
    {
        Type::new(name, target.byte_size, TypeShape::Typedef(target.clone()))
            .with_align(target.align)
            .with_id(target.id)
            .into_ref()
    }

    /// Synthetic alias layer over a named struct, keeping its identity and
    /// name so that both entry points of a named struct render the same.
    pub fn alias_of(target: &TypeRef) -> TypeRef
    {
        Type {
            id: target.id,
            name: target.name.clone(),
            byte_size: target.byte_size,
            align: target.align,
            foreign: target.foreign,
            shape: TypeShape::Typedef(target.clone()),
        }
        .into_ref()
    }

    /// Size in bytes.
    pub fn size(&self) -> i64
    {
        self.byte_size
    }

    /// Target of a pointer type.
    pub fn pointer_target(&self) -> Option<&PointerTarget>
    {
        match &self.shape {
            TypeShape::Pointer(target) => Some(target),
            _ => None,
        }
    }

    /// Bound pointee of a pointer type.
    pub fn pointee(&self) -> Option<&TypeRef>
    {
        self.pointer_target().and_then(PointerTarget::get)
    }

    /// `true` for pointer types.
    pub fn is_pointer(&self) -> bool
    {
        matches!(self.shape, TypeShape::Pointer(_))
    }

    /// Struct layout of struct types.
    pub fn as_struct(&self) -> Option<&StructType>
    {
        match &self.shape {
            TypeShape::Struct(st) => Some(st),
            _ => None,
        }
    }

    /// `true` for the empty interface (`{_type, data}` representation).
    pub fn is_empty_interface(&self) -> bool
    {
        match &self.shape {
            TypeShape::Interface(iface) => resolve_typedef(&iface.repr)
                .as_struct()
                .is_some_and(|st| st.field("_type").is_some()),
            _ => false,
        }
    }
}

/// Strip typedef and qualifier layers.
pub fn resolve_typedef(ty: &TypeRef) -> TypeRef
{
    let mut current = ty.clone();
    loop {
        let next = match &current.shape {
            TypeShape::Typedef(target) | TypeShape::Qualified(target) => target.clone(),
            _ => return current,
        };
        current = next;
    }
}

/// Round `size` up to a multiple of `align`.
pub fn align_size(size: i64, align: i64) -> i64
{
    if align <= 1 {
        return size;
    }
    (size + align - 1) / align * align
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_resolve_typedef_strips_layers()
    {
        let int = Type::int("int", 8);
        let named = Type::typedef("main.Count", &int);
        let again = Type::typedef("main.Alias", &named);
        assert!(Arc::ptr_eq(&resolve_typedef(&again), &int));
    }

    #[test]
    fn test_forward_pointer_binding()
    {
        let ptr = Type::forward_pointer("", 8);
        assert!(ptr.pointee().is_none());
        let int = Type::int("int", 8);
        ptr.pointer_target().unwrap().bind(int.clone());
        assert!(Arc::ptr_eq(ptr.pointee().unwrap(), &int));
    }

    #[test]
    fn test_align_size()
    {
        assert_eq!(align_size(5, 4), 8);
        assert_eq!(align_size(8, 8), 8);
        assert_eq!(align_size(3, 1), 3);
    }

    #[test]
    fn test_empty_interface_detection()
    {
        let ptr = Type::pointer_to(&Type::void(), 8);
        let eface_repr = Type::structure("runtime.eface", 16, vec![
            StructField::new("_type", 0, ptr.clone()),
            StructField::new("data", 8, ptr.clone()),
        ]);
        let iface_repr = Type::structure("runtime.iface", 16, vec![
            StructField::new("tab", 0, ptr.clone()),
            StructField::new("data", 8, ptr),
        ]);
        assert!(Type::interface("interface {}", eface_repr).is_empty_interface());
        assert!(!Type::interface("error", iface_repr).is_empty_interface());
    }
}
