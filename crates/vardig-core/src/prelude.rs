//! Common imports for users of the value layer

pub use crate::config::LoadConfig;
pub use crate::error::{Result, VardigError};
pub use crate::goroutine::{parse_g, Goroutine, GoroutineStatus, StopContext};
pub use crate::memory::{MemoryReadWriter, SharedMemory};
pub use crate::program::{DebugInfo, GAddress, MapIterator, StackWalker, ThreadContext};
pub use crate::typeinfo::{StructField, Type, TypeRef, TypeShape};
pub use crate::types::{Address, Architecture, DwarfRegister, Function, Location, ThreadId};
pub use crate::value::{Kind, Scalar, Value, ValueFlags};
