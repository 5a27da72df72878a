//! Interfaces.
//!
//! An interface is two words: a type word and a data word. Interfaces with
//! methods (`runtime.iface`) keep the type behind an itab (`tab`), the empty
//! interface (`runtime.eface`) keeps it directly (`_type`). The concrete type
//! is resolved by the debug-metadata collaborator from the runtime type
//! descriptor.

use tracing::trace;

use super::Value;
use crate::config::LoadConfig;
use crate::error::VardigError;
use crate::memory::cache_memory;
use crate::typeinfo::{resolve_typedef, Type, TypeShape};

/// The two words of an interface.
#[derive(Debug, Clone, Default)]
pub struct InterfaceParts
{
    /// Pointer to the runtime type descriptor (`None` for nil interfaces).
    pub type_: Option<Value>,
    /// The data word.
    pub data: Option<Value>,
    /// The interface is nil.
    pub is_nil: bool,
}

impl Value
{
    /// Split an interface into its type and data words.
    ///
    /// Malformed representations set `unreadable` on `self`.
    pub fn read_interface(&mut self) -> InterfaceParts
    {
        let mut parts = InterfaceParts::default();
        let repr = match self.real_type.as_ref().map(|t| &t.shape) {
            Some(TypeShape::Interface(iface)) => resolve_typedef(&iface.repr),
            _ => {
                self.unreadable = Some(VardigError::InvalidInterface(self.type_string()));
                return parts;
            }
        };
        let Some(layout) = repr.as_struct() else {
            self.unreadable = Some(VardigError::InvalidInterface(repr.to_string()));
            return parts;
        };

        if let Ok(mem) = self.memory() {
            self.mem = Some(cache_memory(&mem, self.addr, repr.byte_size));
        }

        for field in &layout.fields {
            let word = match self.to_field(field) {
                Ok(word) => word,
                Err(err) => {
                    self.unreadable = Some(err);
                    return parts;
                }
            };
            match field.name.as_str() {
                "tab" => {
                    let tab = word.maybe_dereference();
                    parts.is_nil = tab.addr.is_null();
                    if !parts.is_nil {
                        let found = tab.struct_member("Type").or_else(|_| tab.struct_member("_type"));
                        match found {
                            Ok(ty) => parts.type_ = Some(ty),
                            Err(err) => {
                                self.unreadable = Some(VardigError::InvalidInterface(err.to_string()));
                                return parts;
                            }
                        }
                    }
                }
                "_type" => {
                    parts.is_nil = word.maybe_dereference().addr.is_null();
                    parts.type_ = Some(word);
                }
                "data" => parts.data = Some(word),
                _ => {}
            }
        }
        parts
    }

    /// Resolve the concrete value of an interface into a single child named
    /// `data`. The child is loaded when `load_data` is set and the depth
    /// budget allows; otherwise it only carries its address. The child of a
    /// nil interface is never loaded.
    pub(super) fn load_interface(&mut self, recurse: i32, load_data: bool, cfg: &LoadConfig)
    {
        let parts = self.read_interface();
        if self.unreadable.is_some() {
            return;
        }
        self.children.clear();

        let Some(data) = parts.data else {
            self.unreadable = Some(VardigError::InvalidInterface(self.type_string()));
            return;
        };

        if parts.is_nil {
            let mut data = data.maybe_dereference();
            data.only_addr = true;
            self.children.push(data);
            return;
        }

        let Some(type_word) = parts.type_ else {
            self.unreadable = Some(VardigError::InvalidInterface(self.type_string()));
            return;
        };
        let type_addr = type_word.maybe_dereference().addr;

        let (info, mem) = match (self.debug_info(), data.memory()) {
            (Ok(info), Ok(mem)) => (info, mem),
            (Err(err), _) | (_, Err(err)) => {
                self.unreadable = Some(err);
                return;
            }
        };
        let resolved = match info.runtime_type_to_type(&mem, type_addr, data.addr) {
            Ok(resolved) => resolved,
            Err(err) => {
                self.unreadable = Some(err);
                return;
            }
        };
        trace!(ty = %resolved.ty, direct = resolved.direct_iface, "interface concrete type");

        let mut ty = resolved.ty;
        let mut indirect = false;
        if !resolved.direct_iface && !resolve_typedef(&ty).is_pointer() {
            ty = Type::pointer_to(&ty, self.ptr_size());
            indirect = true;
        }

        let mut concrete = data.child("data", data.addr, &ty, mem);
        if indirect {
            concrete = concrete.maybe_dereference();
            concrete.name = "data".into();
        }

        if load_data && recurse <= cfg.max_variable_recurse {
            concrete.load_internal(recurse, cfg);
        } else {
            concrete.only_addr = true;
        }
        self.children.push(concrete);
    }
}
