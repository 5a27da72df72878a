//! Function values and closures.
//!
//! A function value points to a function-value record whose first word is
//! the entry PC. Closures store their captured variables right after it.

use std::sync::Arc;

use super::{Scalar, Value};
use crate::config::LoadConfig;
use crate::error::VardigError;
use crate::memory::{dereference_memory, read_uint_raw};
use crate::types::{Address, Function};

impl Value
{
    /// Read the record address and entry PC. Sets `closure_addr` and `base`;
    /// returns the function, or `None` for nil function values and failures
    /// (the latter also set `unreadable`).
    pub(super) fn resolve_function(&mut self) -> Option<Arc<Function>>
    {
        self.closure_addr = match self.read_word(self.addr) {
            Ok(addr) => addr,
            Err(err) => {
                self.unreadable = Some(err);
                return None;
            }
        };
        if self.closure_addr.is_null() {
            self.base = Address::ZERO;
            return None;
        }

        let entry = self.memory().and_then(|mem| {
            let mem = dereference_memory(&mem);
            read_uint_raw(mem.as_ref(), self.closure_addr, self.ptr_size())
        });
        self.base = match entry {
            Ok(pc) => Address::new(pc),
            Err(err) => {
                self.unreadable = Some(err);
                return None;
            }
        };

        let func = self.info.as_ref().and_then(|info| info.pc_to_func(self.base));
        if func.is_none() {
            self.unreadable = Some(VardigError::UnknownFunction(self.base));
        }
        func
    }

    /// Load a function value: its name, and for closures the captured
    /// variables as children.
    pub(super) fn load_function_ptr(&mut self, recurse: i32, cfg: &LoadConfig)
    {
        let Some(func) = self.resolve_function() else {
            if self.unreadable.is_none() {
                self.value = Some(Scalar::string(""));
            }
            return;
        };
        self.value = Some(Scalar::string(func.name.clone()));

        let Some(captured) = self.info.as_ref().and_then(|info| info.closure_struct_type(&func)) else {
            return;
        };
        self.len = captured.as_struct().map_or(0, |st| st.fields.len() as i64);

        if recurse <= cfg.max_variable_recurse {
            let mem = match self.memory() {
                Ok(mem) => dereference_memory(&mem),
                Err(err) => {
                    self.unreadable = Some(err);
                    return;
                }
            };
            let mut record = self.child("", self.closure_addr, &captured, mem);
            record.load_internal(recurse, cfg);
            self.children = record.children;
        }
    }
}
