//! Functions and source locations, as reported by the address-resolution
//! collaborator.

use std::sync::Arc;

use super::Address;

/// A function known to the debug metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function
{
    /// Fully qualified name (`main.main`, `runtime.gopark`, `net/http.(*Server).Serve`).
    pub name: String,
    /// Entry PC.
    pub entry: Address,
    /// First PC past the end of the function.
    pub end: Address,
}

impl Function
{
    /// Create a function record.
    pub fn new(name: impl Into<String>, entry: Address, end: Address) -> Self
    {
        Self {
            name: name.into(),
            entry,
            end,
        }
    }

    /// `true` for exported functions of the `runtime` package (`runtime.Goexit`),
    /// which count as user code when looking for the user-visible frame of a
    /// goroutine.
    #[must_use]
    pub fn exported_runtime(&self) -> bool
    {
        const PREFIX: &str = "runtime.";
        self.name
            .strip_prefix(PREFIX)
            .and_then(|rest| rest.chars().next())
            .is_some_and(|c| c.is_ascii_uppercase())
    }

    /// `true` if `pc` falls inside this function.
    #[must_use]
    pub fn contains(&self, pc: Address) -> bool
    {
        pc >= self.entry && pc < self.end
    }
}

/// A resolved program location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location
{
    /// Program counter.
    pub pc: Address,
    /// Source file, empty if unknown.
    pub file: String,
    /// Source line, 0 if unknown.
    pub line: u32,
    /// Enclosing function, if any.
    pub function: Option<Arc<Function>>,
}

impl Location
{
    /// A location that only knows its PC.
    #[must_use]
    pub fn from_pc(pc: Address) -> Self
    {
        Self {
            pc,
            ..Self::default()
        }
    }

    /// Name of the enclosing function, if resolved.
    pub fn function_name(&self) -> Option<&str>
    {
        self.function.as_deref().map(|f| f.name.as_str())
    }
}
