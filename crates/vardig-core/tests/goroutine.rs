//! Goroutine records, thread lookup and enumeration

mod common;

use std::sync::Arc;

use common::{g_off, g_types, put_g, string, FakeInfo, FakeThread, GSpec, SparseMemory, PTR};
use vardig_core::error::{Result, VardigError};
use vardig_core::goroutine::{parse_g, Goroutine, GoroutineStatus, StopContext};
use vardig_core::memory::SharedMemory;
use vardig_core::program::{AbiProfile, DebugInfo, GAddress, StackWalker, ThreadContext};
use vardig_core::typeinfo::{StructField, Type, TypeRef};
use vardig_core::types::{Address, Function, Location, ThreadId};
use vardig_core::value::Value;

const G1: u64 = 0x10_000;
const G2: u64 = 0x11_000;
const G3: u64 = 0x12_000;
const G4: u64 = 0x13_000;
const G0: u64 = 0x14_000;
const ALLGS: u64 = 0x20_000;
const ALLGLEN_VAR: u64 = 0x30_000;
const ALLGS_VAR: u64 = 0x30_008;
const TLS_SLOT: u64 = 0x40_000;
const M0: u64 = 0x50_000;
const LABELS: u64 = 0x60_000;

const MAIN_MAIN: (u64, u64) = (0x4004, 0x4100);
const BGSWEEP: (u64, u64) = (0x5008, 0x5100);
const WORKER: (u64, u64) = (0x6010, 0x6100);
const RUNTIME_MAIN: (u64, u64) = (0x7020, 0x7100);

struct World
{
    mem: Arc<SparseMemory>,
    shared: SharedMemory,
    info: Arc<dyn DebugInfo>,
}

fn label_map_type() -> TypeRef
{
    let label = Type::structure(
        "runtime/pprof.label",
        32,
        vec![StructField::new("key", 0, string()), StructField::new("value", 16, string())],
    );
    Type::structure(
        "runtime/pprof.labelMap",
        24,
        vec![StructField::new("list", 0, Type::slice(&label, PTR))],
    )
}

/// Four goroutines (the third one dead), a g0 whose M runs the fourth, and
/// the runtime globals that list them. `atomic_status` selects the record
/// layout, `abi` the decoding preference.
fn world(abi: AbiProfile, atomic_status: bool) -> World
{
    let mem = SparseMemory::new();
    let spec = |goid: i64, status: u32, startpc: (u64, u64)| GSpec {
        goid,
        status,
        pc: startpc.0 + 0x10,
        sp: 0x7f00_0000 + goid as u64 * 0x1000 + 0x800,
        gopc: MAIN_MAIN.0 + 0x1c,
        startpc: startpc.0,
        ..GSpec::default()
    };
    put_g(&mem, G1, GSpec {
        labels: LABELS,
        ..spec(1, 2, MAIN_MAIN)
    });
    put_g(&mem, G2, spec(2, 4, BGSWEEP));
    put_g(&mem, G3, spec(3, 6, WORKER));
    put_g(&mem, G4, spec(4, 1, WORKER));
    put_g(&mem, G0, GSpec { m: M0, ..spec(0, 2, RUNTIME_MAIN) });

    mem.put_u64(M0, G0);
    mem.put_u64(M0 + 8, G4);
    for (i, g) in [G1, G2, G3, G4].iter().enumerate() {
        mem.put_u64(ALLGS + i as u64 * 8, *g);
    }
    mem.put_u64(ALLGLEN_VAR, 4);
    mem.put_u64(ALLGS_VAR, ALLGS);
    mem.put_u64(TLS_SLOT, G1);

    mem.put_slice_header(LABELS, LABELS + 0x100, 2, 2);
    for (i, (k, v)) in [("service", "api"), ("shard", "7")].iter().enumerate() {
        let entry = LABELS + 0x100 + i as u64 * 32;
        let data = LABELS + 0x400 + i as u64 * 0x40;
        mem.put_string(entry, data, k);
        mem.put_string(entry + 16, data + 0x20, v);
    }

    let types = g_types(atomic_status);
    let mut info = FakeInfo {
        abi,
        ..FakeInfo::default()
    };
    info.add_type(&types.g);
    info.add_type(&types.m);
    info.add_type(&label_map_type());
    info.add_func("main.main", MAIN_MAIN.0, MAIN_MAIN.1);
    info.add_func("runtime.bgsweep", BGSWEEP.0, BGSWEEP.1);
    info.add_func("main.worker", WORKER.0, WORKER.1);
    info.add_func("runtime.main", RUNTIME_MAIN.0, RUNTIME_MAIN.1);
    info.globals.insert("runtime.allglen".into(), Address::new(ALLGLEN_VAR));
    info.globals.insert("runtime.allgs".into(), Address::new(ALLGS_VAR));

    let shared: SharedMemory = mem.clone();
    World {
        mem,
        shared,
        info: info.shared(),
    }
}

impl World
{
    fn g_value(&self, addr: u64) -> Value
    {
        let ty = self.info.find_type("runtime.g").unwrap();
        Value::new("g", Address::new(addr), &ty, self.info.clone(), self.shared.clone())
    }

    fn thread(&self, id: u64, g: GAddress, function: &str) -> Arc<dyn ThreadContext>
    {
        let pc = Address::new(0x4050);
        Arc::new(FakeThread {
            id: ThreadId(id),
            location: Location {
                pc,
                file: "main.go".into(),
                line: 0x50,
                function: Some(Arc::new(Function::new(function, pc, Address::new(0x4100)))),
            },
            mem: self.shared.clone(),
            g,
        })
    }

    fn context(&self, threads: Vec<Arc<dyn ThreadContext>>) -> StopContext
    {
        StopContext::new(self.info.clone(), self.shared.clone(), threads)
    }
}

fn ids(list: &[Result<Goroutine>]) -> Vec<i64>
{
    list.iter().map(|g| g.as_ref().map(|g| g.id).unwrap_or(-1)).collect()
}

#[test]
fn test_parse_g_plain_status()
{
    let w = world(AbiProfile::for_version(1, 19), false);
    let g = parse_g(&w.g_value(G2), None).unwrap();

    assert_eq!(g.id, 2);
    assert_eq!(g.status(), GoroutineStatus::Waiting);
    assert_eq!(g.pc, Address::new(BGSWEEP.0 + 0x10));
    assert_eq!(g.sp, Address::new(0x7f00_2800));
    assert_eq!(g.stack.lo, Address::new(0x7f00_2000));
    assert_eq!(g.stack.hi, Address::new(0x7f00_3000));
    assert_eq!(g.lr, Address::ZERO);
    assert_eq!(g.variable.name, "runtime.curg");
    assert!(g.thread.is_none());
}

#[test]
fn test_parse_g_atomic_status()
{
    let w = world(AbiProfile::default(), true);
    let g = parse_g(&w.g_value(G4), None).unwrap();
    assert_eq!(g.id, 4);
    assert_eq!(g.status(), GoroutineStatus::Runnable);
}

#[test]
fn test_parse_g_status_falls_back_to_other_encoding()
{
    let w = world(AbiProfile::default(), false);
    let g = parse_g(&w.g_value(G3), None).unwrap();
    assert_eq!(g.status(), GoroutineStatus::Dead);
}

#[test]
fn test_parse_g_through_pointer()
{
    let w = world(AbiProfile::default(), true);
    let ty = Type::pointer_to(&w.info.find_type("runtime.g").unwrap(), PTR);
    let v = Value::new("gp", Address::new(TLS_SLOT), &ty, w.info.clone(), w.shared.clone());
    assert_eq!(parse_g(&v, None).unwrap().id, 1);
}

#[test]
fn test_parse_g_nil_and_unreadable()
{
    let w = world(AbiProfile::default(), true);
    let ty = Type::pointer_to(&w.info.find_type("runtime.g").unwrap(), PTR);
    w.mem.put_u64(0x1000, 0);
    w.mem.put_u64(0x1008, 0x9_0000);

    let nil = Value::new("gp", Address::new(0x1000), &ty, w.info.clone(), w.shared.clone());
    assert_eq!(parse_g(&nil, Some(ThreadId(7))).unwrap_err(), VardigError::NoGoroutine(ThreadId(7)));

    let dangling = Value::new("gp", Address::new(0x1008), &ty, w.info.clone(), w.shared.clone());
    assert_eq!(parse_g(&dangling, None).unwrap_err(), VardigError::UnreadableG);
}

#[test]
fn test_get_g_from_tls_slot_and_direct()
{
    let w = world(AbiProfile::default(), true);
    let slot = w.thread(100, GAddress::Slot(Address::new(TLS_SLOT)), "main.main");
    let direct = w.thread(101, GAddress::Direct(Address::new(G2)), "main.main");
    let ctx = w.context(vec![slot.clone(), direct.clone()]);

    let g = ctx.get_g(&slot).unwrap().unwrap();
    assert_eq!(g.id, 1);
    assert!(!g.system_stack);
    assert_eq!(g.thread.as_ref().map(|t| t.thread_id()), Some(ThreadId(100)));
    assert_eq!(g.current_loc.pc, Address::new(0x4050));

    assert_eq!(ctx.get_g(&direct).unwrap().unwrap().id, 2);
}

#[test]
fn test_get_g_on_system_stack_reports_curg()
{
    let w = world(AbiProfile::default(), true);
    let thread = w.thread(102, GAddress::Direct(Address::new(G0)), "runtime.mcall");
    let ctx = w.context(vec![thread.clone()]);

    let g = ctx.get_g(&thread).unwrap().unwrap();
    assert_eq!(g.id, 4);
    assert!(g.system_stack);

    w.mem.put_u64(M0 + 8, 0);
    ctx.invalidate();
    assert_eq!(ctx.get_g(&thread).unwrap_err(), VardigError::NoGoroutine(ThreadId(102)));
}

#[test]
fn test_get_g_ignores_thread_in_clone()
{
    let w = world(AbiProfile::default(), true);
    let thread = w.thread(103, GAddress::Slot(Address::new(TLS_SLOT)), "runtime.clone");
    let ctx = w.context(vec![thread.clone()]);
    assert!(ctx.get_g(&thread).unwrap().is_none());
}

#[test]
fn test_goroutines_info_skips_dead()
{
    let w = world(AbiProfile::default(), true);
    let thread = w.thread(100, GAddress::Slot(Address::new(TLS_SLOT)), "main.main");
    let ctx = w.context(vec![thread]);

    let (all, next) = ctx.goroutines_info(0, 0).unwrap();
    assert_eq!(ids(&all), vec![1, 2, 4]);
    assert!(next.is_none());

    let running = all[0].as_ref().unwrap();
    assert_eq!(running.thread.as_ref().map(|t| t.thread_id()), Some(ThreadId(100)));
    assert!(all[1].as_ref().unwrap().thread.is_none());
}

/// A thread whose location cannot be resolved.
struct Unwound(Arc<dyn ThreadContext>);

impl ThreadContext for Unwound
{
    fn thread_id(&self) -> ThreadId
    {
        self.0.thread_id()
    }

    fn location(&self) -> Result<Location>
    {
        Err(VardigError::Runtime("no frame".into()))
    }

    fn memory(&self) -> SharedMemory
    {
        self.0.memory()
    }

    fn g_address(&self) -> Result<GAddress>
    {
        self.0.g_address()
    }
}

#[test]
fn test_goroutines_info_survives_thread_without_location()
{
    let w = world(AbiProfile::default(), true);
    let thread: Arc<dyn ThreadContext> =
        Arc::new(Unwound(w.thread(100, GAddress::Slot(Address::new(TLS_SLOT)), "main.main")));
    let ctx = w.context(vec![thread]);

    let (all, _) = ctx.goroutines_info(0, 0).unwrap();
    assert_eq!(ids(&all), vec![1, 2, 4]);

    let running = all[0].as_ref().unwrap();
    assert_eq!(running.thread.as_ref().map(|t| t.thread_id()), Some(ThreadId(100)));
    let parsed = parse_g(&w.g_value(G1), None).unwrap();
    assert_eq!(running.current_loc.pc, parsed.current_loc.pc);
}

#[test]
fn test_goroutines_info_paging()
{
    let w = world(AbiProfile::default(), true);
    let ctx = w.context(Vec::new());

    let (first, next) = ctx.goroutines_info(0, 2).unwrap();
    assert_eq!(ids(&first), vec![1, 2]);
    assert_eq!(next, Some(2));

    let (second, next) = ctx.goroutines_info(2, 2).unwrap();
    assert_eq!(ids(&second), vec![4]);
    assert!(next.is_none());
}

#[test]
fn test_goroutines_info_reports_unreadable_records()
{
    let w = world(AbiProfile::default(), true);
    w.mem.put_u64(ALLGS + 8, 0x9_0000);
    let ctx = w.context(Vec::new());

    let (all, _) = ctx.goroutines_info(0, 0).unwrap();
    assert_eq!(ids(&all), vec![1, -1, 4]);
    assert_eq!(all[1].as_ref().unwrap_err(), &VardigError::UnreadableG);
}

#[test]
fn test_goroutine_list_is_cached_until_invalidated()
{
    let w = world(AbiProfile::default(), true);
    let ctx = w.context(Vec::new());
    assert_eq!(ctx.goroutines_info(0, 0).unwrap().0.len(), 3);

    w.mem.put_u32(G4 + g_off::STATUS, 6);
    assert_eq!(ctx.goroutines_info(0, 0).unwrap().0.len(), 3);

    ctx.invalidate();
    assert_eq!(ids(&ctx.goroutines_info(0, 0).unwrap().0), vec![1, 2]);
}

#[test]
fn test_missing_runtime_globals()
{
    let w = world(AbiProfile::default(), true);
    let ctx = StopContext::new(FakeInfo::default().shared(), w.shared.clone(), Vec::new());
    assert!(matches!(ctx.goroutines_info(0, 0), Err(VardigError::TypeNotFound(_))));
}

#[test]
fn test_find_goroutine()
{
    let w = world(AbiProfile::default(), true);
    let thread = w.thread(100, GAddress::Slot(Address::new(TLS_SLOT)), "main.main");
    let ctx = w.context(vec![thread.clone()]);
    let selected = ctx.get_g(&thread).unwrap().unwrap();

    assert_eq!(ctx.find_goroutine(4, None).unwrap().map(|g| g.id), Some(4));
    assert_eq!(ctx.find_goroutine(1, None).unwrap().map(|g| g.id), Some(1));
    assert_eq!(ctx.find_goroutine(-1, Some(&selected)).unwrap().map(|g| g.id), Some(1));
    assert!(ctx.find_goroutine(0, None).unwrap().is_none());
    assert_eq!(ctx.find_goroutine(0, Some(&selected)).unwrap_err(), VardigError::UnknownGoroutine(0));

    // Dead goroutines are not listed but can still be found by id.
    let dead = ctx.find_goroutine(3, None).unwrap().unwrap();
    assert_eq!(dead.status(), GoroutineStatus::Dead);
    assert_eq!(ctx.find_goroutine(99, None).unwrap_err(), VardigError::UnknownGoroutine(99));
}

#[test]
fn test_creation_and_start_locations()
{
    let w = world(AbiProfile::default(), true);
    let g = parse_g(&w.g_value(G1), None).unwrap();

    let go = g.go_location();
    assert_eq!(go.pc, Address::new(MAIN_MAIN.0 + 0x1c));
    assert_eq!(go.line, 0x1f);
    assert_eq!(go.function_name(), Some("main.main"));

    let start = g.start_location();
    assert_eq!(start.pc, Address::new(MAIN_MAIN.0));
    assert_eq!(start.line, 0x04);
    assert_eq!(start.function_name(), Some("main.main"));
}

#[test]
fn test_system_goroutines()
{
    let w = world(AbiProfile::default(), true);
    assert!(!parse_g(&w.g_value(G1), None).unwrap().is_system());
    assert!(parse_g(&w.g_value(G2), None).unwrap().is_system());
    assert!(!parse_g(&w.g_value(G0), None).unwrap().is_system());
}

#[test]
fn test_labels_from_list_encoding()
{
    let w = world(AbiProfile::default(), true);
    let g1 = parse_g(&w.g_value(G1), None).unwrap();
    let labels = g1.labels();
    assert_eq!(labels.len(), 2);
    assert_eq!(labels.get("service").map(String::as_str), Some("api"));
    assert_eq!(labels.get("shard").map(String::as_str), Some("7"));

    let g2 = parse_g(&w.g_value(G2), None).unwrap();
    assert!(g2.labels().is_empty());
}

struct Frames(Vec<(&'static str, &'static str)>);

impl StackWalker for Frames
{
    fn frames(&self, _g: &Goroutine, max: usize) -> Result<Vec<Location>>
    {
        Ok(self
            .0
            .iter()
            .take(max)
            .enumerate()
            .map(|(i, (name, file))| Location {
                pc: Address::new(0x8000 + i as u64),
                file: (*file).into(),
                line: i as u32,
                function: Some(Arc::new(Function::new(*name, Address::new(0x8000), Address::new(0x9000)))),
            })
            .collect())
    }
}

#[test]
fn test_user_current_skips_runtime_frames()
{
    let w = world(AbiProfile::default(), true);
    let g = parse_g(&w.g_value(G4), None).unwrap();

    let walker = Frames(vec![
        ("runtime.gopark", "proc.go"),
        ("runtime/internal/syscall.Syscall6", "asm.s"),
        ("main.(*T).Run-fm", "<autogenerated>"),
        ("main.worker", "worker.go"),
    ]);
    assert_eq!(g.user_current(&walker).function_name(), Some("main.worker"));

    let exported = Frames(vec![("runtime.gopark", "proc.go"), ("runtime.Goexit", "panic.go")]);
    assert_eq!(g.user_current(&exported).function_name(), Some("runtime.Goexit"));

    let runtime_only = Frames(vec![("runtime.gopark", "proc.go")]);
    assert_eq!(g.user_current(&runtime_only), g.current_loc);
}
