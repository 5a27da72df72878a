//! # vardig-core
//!
//! Runtime value reconstruction for Vardig.
//!
//! Given raw memory of a stopped (or dumped) program, a type graph from its
//! debug information and a location, this crate rebuilds typed values:
//! scalars, strings, arrays and slices, structs, maps, channels, interfaces,
//! function values and closures. It also decodes the runtime's goroutine
//! records and assigns new values into target memory.
//!
//! The crate never talks to an OS directly. Memory, debug information and
//! threads are provided through the traits in [`memory`] and [`program`]:
//!
//! - [`memory::MemoryReadWriter`]: byte-range access to target memory
//! - [`program::DebugInfo`]: type lookup, symbols and runtime type decoding
//! - [`program::ThreadContext`]: one stopped thread
//!
//! ## Loading
//!
//! A [`Value`] starts out as an address and a type. [`Value::load`] reads it
//! bounded by a [`LoadConfig`]; failures are recorded on the value
//! (`unreadable`) instead of aborting the whole tree.
//!
//! ## Unsafe code
//!
//! The only `unsafe` call is `sysconf` for the host page size in
//! [`memory::cache`].

#![allow(unsafe_code)]

pub mod config;
pub mod constants;
pub mod error;
pub mod goroutine;
pub mod memory;
pub mod prelude;
pub mod program;
pub mod typeinfo;
pub mod types;
pub mod value;

pub use config::LoadConfig;
pub use error::{Result, VardigError};
pub use goroutine::{Goroutine, GoroutineStatus, StopContext};
pub use typeinfo::{Type, TypeRef, TypeShape};
pub use types::{Address, ThreadId};
pub use value::{Kind, Scalar, Value, ValueFlags};
