//! Per-stop goroutine state.
//!
//! Everything read from a stopped process is only valid until it resumes.
//! [`StopContext`] owns every cache derived from target memory (the page
//! cache, the goroutine of each thread, goroutines found by id, the full
//! goroutine list) so that a single [`StopContext::invalidate`] drops all of
//! them together.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info};

use super::{parse_g, Goroutine, GoroutineStatus};
use crate::error::{Result, VardigError};
use crate::memory::{read_uint_raw, CachedMemory, SharedMemory};
use crate::program::{DebugInfo, GAddress, ThreadContext};
use crate::typeinfo::Type;
use crate::types::{Address, ThreadId};
use crate::value::Value;

/// Page size of [`StopContext::find_goroutine`]'s scan of all goroutines.
const FIND_PAGE: usize = 10;

/// Function whose threads have an unreliable goroutine pointer.
const CLONE_FN: &str = "runtime.clone";

#[derive(Default)]
struct Caches
{
    thread_g: HashMap<ThreadId, Goroutine>,
    partial: HashMap<i64, Goroutine>,
    all: Option<Vec<Result<Goroutine>>>,
    /// Addresses of `runtime.allglen` and of the word holding the `allgs` base.
    allg_addrs: Option<(Address, Address)>,
}

/// State of one process stop.
pub struct StopContext
{
    info: Arc<dyn DebugInfo>,
    cache: Arc<CachedMemory>,
    memory: SharedMemory,
    threads: RwLock<Vec<Arc<dyn ThreadContext>>>,
    caches: Mutex<Caches>,
}

impl StopContext
{
    /// Create the context for a stop. Process memory is read through a page
    /// cache owned by the context.
    pub fn new(info: Arc<dyn DebugInfo>, process_memory: SharedMemory, threads: Vec<Arc<dyn ThreadContext>>) -> Self
    {
        let cache = Arc::new(CachedMemory::new(process_memory));
        let memory: SharedMemory = cache.clone();
        Self {
            info,
            cache,
            memory,
            threads: RwLock::new(threads),
            caches: Mutex::new(Caches::default()),
        }
    }

    /// Debug metadata of the process.
    pub fn debug_info(&self) -> &Arc<dyn DebugInfo>
    {
        &self.info
    }

    /// Cached process memory.
    pub fn memory(&self) -> SharedMemory
    {
        self.memory.clone()
    }

    /// Threads of the stop.
    pub fn threads(&self) -> Vec<Arc<dyn ThreadContext>>
    {
        self.threads.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Drop everything read during this stop. Call on resume.
    pub fn invalidate(&self)
    {
        let mut caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);
        *caches = Caches {
            allg_addrs: caches.allg_addrs,
            ..Caches::default()
        };
        self.cache.clear();
        debug!("stop context invalidated");
    }

    /// Invalidate and replace the thread list (threads come and go while running).
    pub fn resume_with_threads(&self, threads: Vec<Arc<dyn ThreadContext>>)
    {
        self.invalidate();
        *self.threads.write().unwrap_or_else(PoisonError::into_inner) = threads;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Caches>
    {
        self.caches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Value for the goroutine record at `addr`; `deref` if `addr` holds a
    /// pointer to the record.
    fn g_variable(&self, addr: Address, deref: bool, mem: SharedMemory) -> Result<Value>
    {
        let g_type = self.info.find_type("runtime.g")?;
        let ty = if deref {
            Type::pointer_to(&g_type, self.info.ptr_size())
        } else {
            g_type
        };
        Ok(Value::new("", addr, &ty, self.info.clone(), mem))
    }

    /// Goroutine running on `thread`. `Ok(None)` if the thread's goroutine
    /// pointer cannot be trusted (the thread is being created).
    pub fn get_g(&self, thread: &Arc<dyn ThreadContext>) -> Result<Option<Goroutine>>
    {
        let tid = thread.thread_id();
        if let Some(g) = self.lock().thread_g.get(&tid) {
            return Ok(Some(g.clone()));
        }
        if let Ok(loc) = thread.location() {
            if loc.function_name() == Some(CLONE_FN) {
                return Ok(None);
            }
        }

        let mem = thread.memory();
        let var = match thread.g_address()? {
            GAddress::Direct(addr) => self.g_variable(addr, false, mem)?,
            GAddress::Slot(addr) => self.g_variable(addr, true, mem)?,
        };
        let mut g = parse_g(&var, Some(tid))?;

        if g.id == 0 {
            // g0: the goroutine actually running is m.curg.
            let curg = g.variable.struct_member("m")?.struct_member("curg")?;
            g = parse_g(&curg, Some(tid)).map_err(|err| match err {
                VardigError::NoGoroutine(_) => VardigError::NoGoroutine(tid),
                other => other,
            })?;
            g.system_stack = true;
        }

        g.thread = Some(thread.clone());
        if let Ok(loc) = thread.location() {
            g.current_loc = loc;
        }
        self.lock().thread_g.insert(tid, g.clone());
        Ok(Some(g))
    }

    /// Addresses of `runtime.allglen` and of the word holding the base of
    /// the goroutine array.
    fn allg_addrs(&self) -> Result<(Address, Address)>
    {
        if let Some(addrs) = self.lock().allg_addrs {
            return Ok(addrs);
        }
        let len_addr = self
            .info
            .global_address("runtime.allglen")
            .ok_or_else(|| VardigError::TypeNotFound("runtime.allglen".into()))?;
        // allgs is a slice; its first word is the array base.
        let base_addr = self
            .info
            .global_address("runtime.allgs")
            .or_else(|| self.info.global_address("runtime.allg"))
            .ok_or_else(|| VardigError::TypeNotFound("runtime.allgs".into()))?;
        self.lock().allg_addrs = Some((len_addr, base_addr));
        Ok((len_addr, base_addr))
    }

    /// Goroutines `start..`, at most `count` of them (0: all). Returns one
    /// entry per record (an error for records that could not be parsed,
    /// dead goroutines omitted) and the index to resume from, `None` when
    /// the list is exhausted.
    pub fn goroutines_info(&self, start: usize, count: usize) -> Result<(Vec<Result<Goroutine>>, Option<usize>)>
    {
        if let Some(all) = &self.lock().all {
            if start == 0 && (count == 0 || count >= all.len()) {
                return Ok((all.clone(), None));
            }
        }

        let mut thread_g: HashMap<i64, Goroutine> = HashMap::new();
        for thread in self.threads() {
            if let Ok(Some(g)) = self.get_g(&thread) {
                thread_g.insert(g.id, g);
            }
        }

        let ptr_size = self.info.ptr_size();
        let (len_addr, base_addr) = self.allg_addrs()?;
        let allglen = read_uint_raw(self.memory.as_ref(), len_addr, ptr_size)? as usize;
        let allgptr = read_uint_raw(self.memory.as_ref(), base_addr, ptr_size)?;

        let mut out = Vec::new();
        for i in start..allglen {
            if count != 0 && out.len() >= count {
                return Ok((out, Some(i)));
            }
            let slot = Address::new(allgptr.wrapping_add(i as u64 * ptr_size as u64));
            let parsed = self
                .g_variable(slot, true, self.memory.clone())
                .and_then(|var| parse_g(&var, None));
            let mut g = match parsed {
                Ok(g) => g,
                Err(err) => {
                    debug!(index = i, %err, "unreadable goroutine");
                    out.push(Err(err));
                    continue;
                }
            };
            if let Some(running) = thread_g.get(&g.id) {
                if let Some(thread) = &running.thread {
                    match thread.location() {
                        Ok(loc) => g.current_loc = loc,
                        Err(err) => debug!(id = g.id, %err, "thread location unavailable"),
                    }
                    g.thread = Some(thread.clone());
                }
                g.system_stack = running.system_stack;
            }
            if g.status() != GoroutineStatus::Dead {
                out.push(Ok(g.clone()));
            }
            self.lock().partial.insert(g.id, g);
        }

        if start == 0 {
            info!(count = out.len(), "goroutine list cached");
            self.lock().all = Some(out.clone());
        }
        Ok((out, None))
    }

    /// Find goroutine `gid`. `-1` (and `0` when nothing is selected) means
    /// the selected goroutine.
    pub fn find_goroutine(&self, gid: i64, selected: Option<&Goroutine>) -> Result<Option<Goroutine>>
    {
        let selected_id = selected.map(|g| g.id);
        if gid == -1 || selected_id == Some(gid) || (selected.is_none() && gid == 0) {
            return Ok(selected.cloned());
        }
        if gid == 0 {
            return Err(VardigError::UnknownGoroutine(gid));
        }

        if let Some(g) = self.lock().partial.get(&gid) {
            return Ok(Some(g.clone()));
        }

        for thread in self.threads() {
            if let Ok(Some(g)) = self.get_g(&thread) {
                if g.id == gid {
                    return Ok(Some(g));
                }
            }
        }

        let mut next = Some(0);
        while let Some(start) = next {
            let (page, resume) = self.goroutines_info(start, FIND_PAGE)?;
            for g in page.into_iter().flatten() {
                if g.id == gid {
                    return Ok(Some(g));
                }
            }
            next = resume;
        }
        Err(VardigError::UnknownGoroutine(gid))
    }
}
