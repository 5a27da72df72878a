//! # Types
//!
//! Target-agnostic types shared by the value layer.
//!
//! These types abstract away where the bytes come from, allowing the rest of
//! the crate to work with concepts like "address", "thread" and "register"
//! without knowing whether the target is a live process or a captured image.

pub mod address;
pub mod location;
pub mod process;
pub mod registers;

// Re-export all public types
pub use address::Address;
pub use location::{Function, Location};
pub use process::{Architecture, ThreadId};
pub use registers::{DwarfRegister, DwarfRegisters};
