//! Maps.
//!
//! Table traversal is delegated to the debug-metadata collaborator, which
//! knows the runtime's hash-table layout for the producing toolchain.

use tracing::{debug, trace};

use super::{Value, MAX_ERR_COUNT};
use crate::config::LoadConfig;
use crate::error::VardigError;
use crate::program::MapIterator;
use crate::typeinfo::{resolve_typedef, TypeShape};

impl Value
{
    /// Start iterating this map, scanning at most `max_buckets` buckets
    /// (0: no limit). Sets `base` to the runtime header address and `len` to
    /// the recorded entry count. Returns `None` for nil maps and on failure
    /// (which sets `unreadable`).
    pub fn map_iterator(&mut self, max_buckets: usize) -> Option<Box<dyn MapIterator>>
    {
        let header = match self.real_type.as_ref().map(|t| &t.shape) {
            Some(TypeShape::Map(map)) => resolve_typedef(&map.header),
            _ => {
                self.unreadable = Some(VardigError::UnsupportedKind(format!("{} is not a map", self.type_string())));
                return None;
            }
        };

        let mut ptr = self.clone();
        ptr.real_type = Some(header);
        ptr.loaded = false;
        let record = ptr.maybe_dereference();
        if let Some(err) = record.unreadable {
            self.unreadable = Some(err);
            return None;
        }
        self.base = record.addr;
        if self.base.is_null() {
            self.len = 0;
            return None;
        }

        let info = match self.debug_info() {
            Ok(info) => info,
            Err(err) => {
                self.unreadable = Some(err);
                return None;
            }
        };
        match info.map_iterator(self, max_buckets) {
            Ok(it) => {
                self.len = it.len();
                Some(it)
            }
            Err(err) => {
                self.unreadable = Some(err);
                None
            }
        }
    }

    /// Load up to `max_array_values` entries, starting after `map_skip`
    /// entries. Keys and values alternate in `children`.
    pub(super) fn load_map(&mut self, recurse: i32, cfg: &LoadConfig)
    {
        let Some(mut it) = self.map_iterator(cfg.max_map_buckets) else {
            return;
        };
        if self.len == 0 || self.map_skip as i64 >= self.len || cfg.max_array_values == 0 {
            return;
        }

        for _ in 0..self.map_skip {
            match it.next() {
                Ok(Some(_)) => {}
                Ok(None) => {
                    self.unreadable = Some(VardigError::MapIndexOutOfBounds);
                    return;
                }
                Err(err) => {
                    self.unreadable = Some(err);
                    return;
                }
            }
        }

        let mut count = 0;
        let mut errcount = 0;
        loop {
            let (mut key, mut val) = match it.next() {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    self.unreadable = Some(err);
                    break;
                }
            };
            key.load_internal(recurse + 1, cfg);
            val.load_internal(recurse + 1, cfg);
            if key.unreadable.is_some() || val.unreadable.is_some() {
                errcount += 1;
            }
            self.children.push(key);
            self.children.push(val);
            count += 1;

            if errcount > MAX_ERR_COUNT {
                debug!(map = %self.name, errcount, "too many unreadable entries, stopping");
                break;
            }
            if count >= cfg.max_array_values || count as i64 >= self.len {
                break;
            }
        }
        trace!(map = %self.name, entries = count, len = self.len, "map loaded");
    }
}
