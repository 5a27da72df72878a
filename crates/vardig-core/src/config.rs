//! # Load budgets
//!
//! A [`LoadConfig`] bounds how much of a value tree the loader materializes.
//! The budgets are the only cancellation mechanism of the value layer: cyclic
//! or adversarial data is cut off by depth, width and size, never by time.
//!
//! ## Environment overrides
//!
//! Hosts can adjust a preset through environment variables:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `VARDIG_FOLLOW_POINTERS` | `follow_pointers` (`true`/`false`/`1`/`0`) |
//! | `VARDIG_MAX_RECURSE` | `max_variable_recurse` |
//! | `VARDIG_MAX_STRING_LEN` | `max_string_len` |
//! | `VARDIG_MAX_ARRAY_VALUES` | `max_array_values` |
//! | `VARDIG_MAX_STRUCT_FIELDS` | `max_struct_fields` (`-1` for unlimited) |
//! | `VARDIG_MAX_MAP_BUCKETS` | `max_map_buckets` |

use std::env;
use std::str::FromStr;

use tracing::debug;

use crate::error::{Result, VardigError};

/// Maximum number of map buckets scanned per requested entry when listing
/// every local or argument of a frame.
pub const MAX_MAP_BUCKETS_FACTOR: usize = 100;

/// Budget for one load request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadConfig
{
    /// Load the targets of pointers.
    pub follow_pointers: bool,
    /// How deep to recurse into nested compound values. `-1` loads no
    /// compound content at all.
    pub max_variable_recurse: i32,
    /// Maximum number of bytes read from a string.
    pub max_string_len: usize,
    /// Maximum number of elements read from an array, slice or map.
    pub max_array_values: usize,
    /// Maximum number of struct fields read; `None` reads all of them.
    pub max_struct_fields: Option<usize>,
    /// Maximum number of map buckets scanned; `0` scans until the map is
    /// exhausted or `max_array_values` entries were found.
    pub max_map_buckets: usize,
}

impl LoadConfig
{
    /// Load just the value itself.
    pub const SINGLE_VALUE: LoadConfig = LoadConfig {
        follow_pointers: false,
        max_variable_recurse: 0,
        max_string_len: 64,
        max_array_values: 0,
        max_struct_fields: Some(0),
        max_map_buckets: 0,
    };

    /// Load one level of nesting, following pointers.
    pub const FULL_VALUE: LoadConfig = LoadConfig {
        follow_pointers: true,
        max_variable_recurse: 1,
        max_string_len: 64,
        max_array_values: 64,
        max_struct_fields: None,
        max_map_buckets: 0,
    };

    /// [`LoadConfig::FULL_VALUE`] with strings up to 1 MiB.
    pub const FULL_VALUE_LONGER_STRINGS: LoadConfig = LoadConfig {
        max_string_len: 1024 * 1024,
        ..LoadConfig::FULL_VALUE
    };

    /// Variant used when listing all locals or arguments of a frame: sparse
    /// maps stop after `max_array_values * 100` buckets.
    #[must_use]
    pub fn for_scope_listing(base: LoadConfig) -> LoadConfig
    {
        LoadConfig {
            max_map_buckets: base.max_array_values.saturating_mul(MAX_MAP_BUCKETS_FACTOR),
            ..base
        }
    }

    /// `base` adjusted by the `VARDIG_*` environment variables.
    pub fn from_env(base: LoadConfig) -> Result<LoadConfig>
    {
        base.with_overrides(env::vars().filter(|(k, _)| k.starts_with("VARDIG_")))
    }

    /// Apply `(variable, value)` overrides. Unknown variables are ignored.
    pub fn with_overrides<I, K, V>(mut self, overrides: I) -> Result<LoadConfig>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in overrides {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            match key {
                "VARDIG_FOLLOW_POINTERS" => self.follow_pointers = parse_bool(key, value)?,
                "VARDIG_MAX_RECURSE" => self.max_variable_recurse = parse_num(key, value)?,
                "VARDIG_MAX_STRING_LEN" => self.max_string_len = parse_num(key, value)?,
                "VARDIG_MAX_ARRAY_VALUES" => self.max_array_values = parse_num(key, value)?,
                "VARDIG_MAX_STRUCT_FIELDS" => {
                    let n: i64 = parse_num(key, value)?;
                    self.max_struct_fields = if n < 0 { None } else { Some(n as usize) };
                }
                "VARDIG_MAX_MAP_BUCKETS" => self.max_map_buckets = parse_num(key, value)?,
                _ => continue,
            }
            debug!(key, value, "load budget override");
        }
        Ok(self)
    }

    /// `true` if struct loading may add another field after `loaded` fields.
    pub(crate) fn allows_field(&self, loaded: usize) -> bool
    {
        self.max_struct_fields.map_or(true, |max| loaded < max)
    }
}

impl Default for LoadConfig
{
    fn default() -> Self
    {
        LoadConfig::FULL_VALUE
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool>
{
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(VardigError::InvalidArgument(format!("{key}: expected a boolean, got {value:?}"))),
    }
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T>
{
    value
        .parse()
        .map_err(|_| VardigError::InvalidArgument(format!("{key}: expected a number, got {value:?}")))
}
