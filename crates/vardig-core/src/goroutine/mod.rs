//! # Goroutines
//!
//! A [`Goroutine`] is a snapshot of one runtime scheduling record
//! (`runtime.g`): saved registers, identity, creation and start PCs, wait
//! state and stack bounds. Records are parsed from [`Value`]s; enumeration and
//! lookup across a stopped process live in [`StopContext`].

mod context;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, trace};

pub use context::StopContext;

use crate::config::LoadConfig;
use crate::error::{Result, VardigError};
use crate::memory::cache_memory;
use crate::program::{StackWalker, StatusEncoding, ThreadContext};
use crate::types::{Address, Location, ThreadId};
use crate::value::{Kind, Value};

/// Frames inspected when looking for the first user frame of a goroutine.
pub const MAX_USER_CURRENT_DEPTH: usize = 30;

/// Upper bound on the number of pprof labels read from one goroutine.
pub const MAX_LABELS: i64 = 1000;

/// Type of the pprof label set.
const LABEL_MAP_TYPE: &str = "runtime/pprof.labelMap";

/// Scheduling state of a goroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GoroutineStatus
{
    /// Just allocated, not yet initialized.
    Idle,
    /// On a run queue.
    Runnable,
    /// Executing user code on an M.
    Running,
    /// Executing a system call.
    Syscall,
    /// Blocked in the runtime.
    Waiting,
    /// Unused: exited or not yet started.
    Dead,
    /// Stack is being moved.
    CopyStack,
    /// Stopped itself for a suspend.
    Preempted,
    /// A value this crate does not know.
    Other(u64),
}

impl GoroutineStatus
{
    /// Decode a raw status word.
    pub fn from_raw(raw: u64) -> Self
    {
        match raw {
            0 => GoroutineStatus::Idle,
            1 => GoroutineStatus::Runnable,
            2 => GoroutineStatus::Running,
            3 => GoroutineStatus::Syscall,
            4 => GoroutineStatus::Waiting,
            6 => GoroutineStatus::Dead,
            8 => GoroutineStatus::CopyStack,
            9 => GoroutineStatus::Preempted,
            other => GoroutineStatus::Other(other),
        }
    }
}

impl fmt::Display for GoroutineStatus
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            GoroutineStatus::Idle => f.write_str("idle"),
            GoroutineStatus::Runnable => f.write_str("runnable"),
            GoroutineStatus::Running => f.write_str("running"),
            GoroutineStatus::Syscall => f.write_str("syscall"),
            GoroutineStatus::Waiting => f.write_str("waiting"),
            GoroutineStatus::Dead => f.write_str("dead"),
            GoroutineStatus::CopyStack => f.write_str("copystack"),
            GoroutineStatus::Preempted => f.write_str("preempted"),
            GoroutineStatus::Other(n) => write!(f, "status({n})"),
        }
    }
}

/// Stack bounds `[lo, hi)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StackBounds
{
    /// Highest address (exclusive).
    pub hi: Address,
    /// Lowest address.
    pub lo: Address,
}

/// Snapshot of one goroutine.
#[derive(Clone)]
pub struct Goroutine
{
    /// Goroutine id.
    pub id: i64,
    /// Saved PC.
    pub pc: Address,
    /// Saved SP.
    pub sp: Address,
    /// Saved frame pointer (0 if the record has none).
    pub bp: Address,
    /// Saved link register (0 if the record has none).
    pub lr: Address,
    /// PC of the `go` statement that created this goroutine.
    pub gopc: Address,
    /// Entry PC of the goroutine's function.
    pub startpc: Address,
    /// Raw status word.
    pub status: u64,
    /// Approximate time the goroutine became blocked.
    pub wait_since: i64,
    /// Raw wait reason (0 if unavailable).
    pub wait_reason: i64,
    /// Stack bounds.
    pub stack: StackBounds,
    /// Currently running on the system stack of its thread.
    pub system_stack: bool,
    /// Location of the saved PC, or of the thread for running goroutines.
    pub current_loc: Location,
    /// Thread executing this goroutine, if any.
    pub thread: Option<Arc<dyn ThreadContext>>,
    /// The record itself.
    pub variable: Value,
    labels: OnceCell<HashMap<String, String>>,
}

impl fmt::Debug for Goroutine
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Goroutine")
            .field("id", &self.id)
            .field("pc", &self.pc)
            .field("sp", &self.sp)
            .field("gopc", &self.gopc)
            .field("startpc", &self.startpc)
            .field("status", &self.status())
            .field("system_stack", &self.system_stack)
            .field("thread", &self.thread.as_ref().map(|t| t.thread_id()))
            .field("current_loc", &self.current_loc)
            .finish_non_exhaustive()
    }
}

/// Integer content of a loaded value.
fn int_of(v: &Value) -> Option<i64>
{
    v.value.as_ref().and_then(|s| s.as_i64())
}

fn addr_of(v: Option<&Value>) -> Option<Address>
{
    v.and_then(|v| v.value.as_ref()).and_then(|s| s.as_u64()).map(Address::new)
}

/// Parse a goroutine record. `v` is a `runtime.g` or a pointer (chain) to one.
///
/// `thread` names the thread the record was read for; it is reported in
/// [`VardigError::NoGoroutine`] when the pointer is nil.
pub fn parse_g(v: &Value, thread: Option<ThreadId>) -> Result<Goroutine>
{
    let mut v = v.clone();
    let is_ptr = |v: &Value| v.real_type.as_ref().is_some_and(|t| t.is_pointer());

    if is_ptr(&v) {
        let target = v
            .read_word(v.addr)
            .map_err(|err| VardigError::Runtime(format!("error derefing *G {err}")))?;
        if target.is_null() {
            return Err(VardigError::NoGoroutine(thread.unwrap_or_default()));
        }
    } else if v.addr.is_null() {
        return Err(VardigError::NoGoroutine(thread.unwrap_or_default()));
    }
    while is_ptr(&v) {
        v = v.maybe_dereference();
        if let Some(err) = v.unreadable.take() {
            debug!(%err, "goroutine record unreadable");
            return Err(VardigError::UnreadableG);
        }
    }
    let mem = v.memory()?;
    let size = v.real_type.as_ref().map_or(0, |t| t.byte_size);
    let gaddr = v.addr;
    v = v.with_memory(cache_memory(&mem, gaddr, size));

    let sched = v.load_field_named("sched").ok_or(VardigError::UnreadableG)?;
    let pc = addr_of(sched.field_variable("pc")).ok_or(VardigError::UnreadableG)?;
    let sp = addr_of(sched.field_variable("sp")).ok_or(VardigError::UnreadableG)?;
    let bp = addr_of(sched.field_variable("bp")).unwrap_or_default();
    let lr = addr_of(sched.field_variable("lr")).unwrap_or_default();

    let mut unreadable = false;
    let mut load_int = |name: &str| -> i64 {
        match v.load_field_named(name).as_ref().and_then(int_of) {
            Some(n) => n,
            None => {
                unreadable = true;
                0
            }
        }
    };
    let id = load_int("goid");
    let gopc = load_int("gopc");
    let startpc = load_int("startpc");
    let wait_since = load_int("waitsince");

    let info = v.debug_info()?;
    let abi = info.abi();
    let wait_reason = if abi.wait_reason { load_int("waitreason") } else { 0 };

    let mut stack = StackBounds::default();
    match v.load_field_named("stack") {
        Some(bounds) => {
            match addr_of(bounds.field_variable("hi")) {
                Some(hi) => stack.hi = hi,
                None => unreadable = true,
            }
            match addr_of(bounds.field_variable("lo")) {
                Some(lo) => stack.lo = lo,
                None => unreadable = true,
            }
        }
        None => unreadable = true,
    }

    let status = match v.load_field_named("atomicstatus") {
        Some(word) => {
            let plain = word.value.as_ref().and_then(|s| s.as_u64());
            let wrapped = || {
                word.field_variable("value")
                    .and_then(|inner| inner.value.as_ref())
                    .and_then(|s| s.as_u64())
            };
            let decoded = match abi.status {
                StatusEncoding::Plain => plain.or_else(wrapped),
                StatusEncoding::AtomicWrapper => wrapped().or(plain),
            };
            decoded.unwrap_or_else(|| {
                unreadable = true;
                0
            })
        }
        None => {
            unreadable = true;
            0
        }
    };

    if unreadable {
        return Err(VardigError::UnreadableG);
    }

    v.name = "runtime.curg".into();
    let g = Goroutine {
        id,
        pc,
        sp,
        bp,
        lr,
        gopc: Address::new(gopc as u64),
        startpc: Address::new(startpc as u64),
        status,
        wait_since,
        wait_reason,
        stack,
        system_stack: false,
        current_loc: info.pc_to_line(pc),
        thread: None,
        variable: v,
        labels: OnceCell::new(),
    };
    trace!(id = g.id, status = %g.status(), pc = %g.pc, "parsed goroutine");
    Ok(g)
}

impl Goroutine
{
    /// Decoded status.
    pub fn status(&self) -> GoroutineStatus
    {
        GoroutineStatus::from_raw(self.status)
    }

    /// Location of the first frame that belongs to user code, looking at most
    /// [`MAX_USER_CURRENT_DEPTH`] frames deep. Falls back to the current
    /// location.
    pub fn user_current(&self, walker: &dyn StackWalker) -> Location
    {
        let Ok(frames) = walker.frames(self, MAX_USER_CURRENT_DEPTH) else {
            return self.current_loc.clone();
        };
        frames
            .into_iter()
            .take(MAX_USER_CURRENT_DEPTH)
            .find(|frame| {
                let Some(func) = frame.function.as_deref() else {
                    return false;
                };
                let name = func.name.as_str();
                name.contains('.')
                    && (!name.starts_with("runtime.") || func.exported_runtime())
                    && !name.starts_with("internal/")
                    && !name.starts_with("runtime/internal")
                    && frame.file != "<autogenerated>"
            })
            .unwrap_or_else(|| self.current_loc.clone())
    }

    /// Location of the `go` statement that created this goroutine.
    pub fn go_location(&self) -> Location
    {
        let Some(info) = self.variable.info.as_ref() else {
            return Location::from_pc(self.gopc);
        };
        let mut pc = self.gopc;
        if let Some(func) = info.pc_to_func(pc) {
            // Back up to the call instruction.
            if self.gopc > func.entry {
                pc = Address::new(pc.value() - 1);
            }
        }
        Location {
            pc: self.gopc,
            ..info.pc_to_line(pc)
        }
    }

    /// Entry location of the goroutine's function.
    pub fn start_location(&self) -> Location
    {
        let Some(info) = self.variable.info.as_ref() else {
            return Location::from_pc(self.startpc);
        };
        let Some(func) = info.pc_to_func(self.startpc) else {
            return Location::from_pc(self.startpc);
        };
        let (file, line) = info.entry_line(&func);
        Location {
            pc: func.entry,
            file,
            line,
            function: Some(func),
        }
    }

    /// `true` for goroutines started by the runtime for its own purposes.
    pub fn is_system(&self) -> bool
    {
        let loc = self.start_location();
        match loc.function_name() {
            Some("runtime.main" | "runtime.handleAsyncEvent") | None => false,
            Some(name) => name.starts_with("runtime."),
        }
    }

    /// pprof labels, read once and cached.
    pub fn labels(&self) -> &HashMap<String, String>
    {
        self.labels.get_or_init(|| self.read_labels())
    }

    fn read_labels(&self) -> HashMap<String, String>
    {
        let mut labels = HashMap::new();
        let Some(field) = self.variable.load_field_named("labels") else {
            return labels;
        };
        let [target] = field.children.as_slice() else {
            return labels;
        };
        if target.addr.is_null() {
            return labels;
        }
        let (Ok(info), Ok(mem)) = (self.variable.debug_info(), self.variable.memory()) else {
            return labels;
        };
        let Ok(label_type) = info.find_type(LABEL_MAP_TYPE) else {
            return labels;
        };

        let mut map = Value::new("", target.addr, &label_type, info, mem);
        if map.kind == Kind::Map {
            map.load(&LoadConfig::FULL_VALUE);
            for pair in map.children.chunks_exact(2) {
                if let (Some(k), Some(v)) = (pair[0].string_value(), pair[1].string_value()) {
                    labels.insert(k.into_owned(), v.into_owned());
                }
            }
            return labels;
        }

        let Ok(list) = map.struct_member("list") else {
            return labels;
        };
        for i in 0..list.len.clamp(0, MAX_LABELS) {
            let Ok(mut entry) = list.slice_access(i) else {
                continue;
            };
            entry.load(&LoadConfig::FULL_VALUE);
            let [k, v, ..] = entry.children.as_slice() else {
                continue;
            };
            if let (Some(k), Some(v)) = (k.string_value(), v.string_value()) {
                labels.insert(k.into_owned(), v.into_owned());
            }
        }
        labels
    }
}
