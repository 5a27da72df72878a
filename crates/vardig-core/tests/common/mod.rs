//! Shared fixtures: a sparse memory image, a configurable debug-info fake, a
//! bucketed map iterator and a stopped-thread fake.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use vardig_core::error::{Result, VardigError};
use vardig_core::memory::{MemoryReadWriter, SharedMemory};
use vardig_core::program::{
    AbiProfile, DebugInfo, GAddress, MapIterator, RuntimeType, RuntimeTypeAddr, ThreadContext, KIND_DIRECT_IFACE,
};
use vardig_core::typeinfo::{StructField, Type, TypeRef, TypeShape};
use vardig_core::types::{Address, Architecture, Function, Location, ThreadId};
use vardig_core::value::Value;

pub const PTR: i64 = 8;

/// Byte-addressed memory image. Bytes never written are unmapped.
#[derive(Default)]
pub struct SparseMemory
{
    bytes: Mutex<BTreeMap<u64, u8>>,
    writes: AtomicUsize,
}

impl SparseMemory
{
    pub fn new() -> Arc<Self>
    {
        Arc::new(Self::default())
    }

    pub fn put(&self, addr: u64, data: &[u8])
    {
        let mut bytes = self.bytes.lock().unwrap();
        for (i, b) in data.iter().enumerate() {
            bytes.insert(addr + i as u64, *b);
        }
    }

    pub fn put_u64(&self, addr: u64, value: u64)
    {
        self.put(addr, &value.to_le_bytes());
    }

    pub fn put_i64(&self, addr: u64, value: i64)
    {
        self.put(addr, &value.to_le_bytes());
    }

    pub fn put_u32(&self, addr: u64, value: u32)
    {
        self.put(addr, &value.to_le_bytes());
    }

    pub fn put_f64(&self, addr: u64, value: f64)
    {
        self.put(addr, &value.to_le_bytes());
    }

    /// String header at `header` pointing at the bytes of `s` stored at `data`.
    pub fn put_string(&self, header: u64, data: u64, s: &str)
    {
        self.put(data, s.as_bytes());
        self.put_u64(header, if s.is_empty() { 0 } else { data });
        self.put_i64(header + 8, s.len() as i64);
    }

    pub fn put_slice_header(&self, addr: u64, base: u64, len: i64, cap: i64)
    {
        self.put_u64(addr, base);
        self.put_i64(addr + 8, len);
        self.put_i64(addr + 16, cap);
    }

    pub fn unmap(&self, addr: u64, len: u64)
    {
        let mut bytes = self.bytes.lock().unwrap();
        for a in addr..addr + len {
            bytes.remove(&a);
        }
    }

    pub fn bytes_at(&self, addr: u64, len: usize) -> Vec<u8>
    {
        let bytes = self.bytes.lock().unwrap();
        (0..len as u64).map(|i| bytes.get(&(addr + i)).copied().unwrap_or(0)).collect()
    }

    pub fn u64_at(&self, addr: u64) -> u64
    {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.bytes_at(addr, 8));
        u64::from_le_bytes(buf)
    }

    /// Number of `write_memory` calls so far.
    pub fn writes(&self) -> usize
    {
        self.writes.load(Ordering::SeqCst)
    }
}

impl MemoryReadWriter for SparseMemory
{
    fn read_memory(&self, buf: &mut [u8], addr: Address) -> Result<usize>
    {
        let bytes = self.bytes.lock().unwrap();
        for (i, slot) in buf.iter_mut().enumerate() {
            match bytes.get(&(addr.value() + i as u64)) {
                Some(b) => *slot = *b,
                None => {
                    return Err(VardigError::MemoryRead {
                        addr,
                        len: buf.len(),
                        details: "unmapped".into(),
                    });
                }
            }
        }
        Ok(buf.len())
    }

    fn write_memory(&self, addr: Address, data: &[u8]) -> Result<usize>
    {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.put(addr.value(), data);
        Ok(data.len())
    }
}

/// Keys and values of one fake hash table, grouped in buckets.
#[derive(Debug, Clone, Default)]
pub struct FakeMap
{
    pub buckets: Vec<Vec<(Address, Address)>>,
}

/// Debug metadata assembled by hand.
#[derive(Default)]
pub struct FakeInfo
{
    pub abi: AbiProfile,
    pub types: HashMap<String, TypeRef>,
    pub funcs: Vec<Arc<Function>>,
    pub closures: HashMap<String, TypeRef>,
    /// Runtime type descriptor address to debug type.
    pub runtime_types: HashMap<u64, RuntimeType>,
    pub globals: HashMap<String, Address>,
    /// Map header address to contents.
    pub maps: HashMap<u64, FakeMap>,
}

impl FakeInfo
{
    pub fn add_type(&mut self, ty: &TypeRef)
    {
        self.types.insert(ty.name.clone(), ty.clone());
    }

    pub fn add_func(&mut self, name: &str, entry: u64, end: u64) -> Arc<Function>
    {
        let func = Arc::new(Function::new(name, Address::new(entry), Address::new(end)));
        self.funcs.push(func.clone());
        func
    }

    pub fn add_runtime_type(&mut self, descriptor: u64, ty: &TypeRef, direct_iface: bool)
    {
        self.runtime_types.insert(
            descriptor,
            RuntimeType {
                ty: ty.clone(),
                direct_iface,
            },
        );
    }

    pub fn shared(self) -> Arc<dyn DebugInfo>
    {
        Arc::new(self)
    }
}

impl DebugInfo for FakeInfo
{
    fn architecture(&self) -> Architecture
    {
        Architecture::X86_64
    }

    fn abi(&self) -> AbiProfile
    {
        self.abi
    }

    fn find_type(&self, name: &str) -> Result<TypeRef>
    {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| VardigError::TypeNotFound(name.to_string()))
    }

    fn pc_to_func(&self, pc: Address) -> Option<Arc<Function>>
    {
        self.funcs.iter().find(|f| f.contains(pc)).cloned()
    }

    fn pc_to_line(&self, pc: Address) -> Location
    {
        Location {
            pc,
            file: "main.go".into(),
            line: (pc.value() & 0xff) as u32,
            function: self.pc_to_func(pc),
        }
    }

    fn entry_line(&self, func: &Function) -> (String, u32)
    {
        ("main.go".into(), (func.entry.value() & 0xff) as u32)
    }

    fn closure_struct_type(&self, func: &Function) -> Option<TypeRef>
    {
        self.closures.get(&func.name).cloned()
    }

    fn runtime_type_to_type(&self, _mem: &SharedMemory, type_addr: Address, _data_addr: Address) -> Result<RuntimeType>
    {
        self.runtime_types
            .get(&type_addr.value())
            .cloned()
            .ok_or_else(|| VardigError::Runtime(format!("unknown runtime type at {type_addr}")))
    }

    fn type_to_runtime_type(&self, _mem: &SharedMemory, ty: &TypeRef) -> Result<Option<RuntimeTypeAddr>>
    {
        let name = ty.to_string();
        Ok(self
            .runtime_types
            .iter()
            .find(|(_, rt)| rt.ty.to_string() == name)
            .map(|(addr, rt)| RuntimeTypeAddr {
                addr: Address::new(*addr),
                kind: if rt.direct_iface { KIND_DIRECT_IFACE } else { 0 },
            }))
    }

    fn global_address(&self, name: &str) -> Option<Address>
    {
        self.globals.get(name).copied()
    }

    fn map_iterator(&self, map: &Value, max_buckets: usize) -> Result<Box<dyn MapIterator>>
    {
        let contents = self
            .maps
            .get(&map.base.value())
            .ok_or_else(|| VardigError::Runtime(format!("no map at {}", map.base)))?;
        let (key, elem) = match map.real_type.as_ref().map(|t| &t.shape) {
            Some(TypeShape::Map(m)) => (m.key.clone(), m.elem.clone()),
            _ => return Err(VardigError::InvalidArgument("not a map".into())),
        };
        let (info, mem) = (map.debug_info()?, map.memory()?);
        let buckets = contents
            .buckets
            .iter()
            .map(|bucket| {
                bucket
                    .iter()
                    .map(|(k, v)| {
                        (
                            Value::new("", *k, &key, info.clone(), mem.clone()),
                            Value::new("", *v, &elem, info.clone(), mem.clone()),
                        )
                    })
                    .collect()
            })
            .collect();
        Ok(Box::new(FakeMapIterator::new(buckets, max_buckets)))
    }
}

/// Walks buckets in order, giving up after `max_buckets` of them.
pub struct FakeMapIterator
{
    buckets: Vec<Vec<(Value, Value)>>,
    len: i64,
    bucket: usize,
    pos: usize,
    max_buckets: usize,
}

impl FakeMapIterator
{
    pub fn new(buckets: Vec<Vec<(Value, Value)>>, max_buckets: usize) -> Self
    {
        let len = buckets.iter().map(Vec::len).sum::<usize>() as i64;
        Self {
            buckets,
            len,
            bucket: 0,
            pos: 0,
            max_buckets,
        }
    }
}

impl MapIterator for FakeMapIterator
{
    fn len(&self) -> i64
    {
        self.len
    }

    fn next(&mut self) -> Result<Option<(Value, Value)>>
    {
        loop {
            if self.max_buckets > 0 && self.bucket >= self.max_buckets {
                return Ok(None);
            }
            let Some(bucket) = self.buckets.get(self.bucket) else {
                return Ok(None);
            };
            if let Some(entry) = bucket.get(self.pos) {
                self.pos += 1;
                return Ok(Some(entry.clone()));
            }
            self.bucket += 1;
            self.pos = 0;
        }
    }
}

/// A stopped thread.
pub struct FakeThread
{
    pub id: ThreadId,
    pub location: Location,
    pub mem: SharedMemory,
    pub g: GAddress,
}

impl ThreadContext for FakeThread
{
    fn thread_id(&self) -> ThreadId
    {
        self.id
    }

    fn location(&self) -> Result<Location>
    {
        Ok(self.location.clone())
    }

    fn memory(&self) -> SharedMemory
    {
        self.mem.clone()
    }

    fn g_address(&self) -> Result<GAddress>
    {
        Ok(self.g)
    }
}

pub fn int() -> TypeRef
{
    Type::int("int", PTR)
}

pub fn uintptr() -> TypeRef
{
    Type::uint("uintptr", PTR)
}

pub fn string() -> TypeRef
{
    Type::string(PTR)
}

/// `runtime.eface`: `{_type *runtime._type; data unsafe.Pointer}`.
pub fn eface() -> TypeRef
{
    let rtype = Type::structure("runtime._type", 48, vec![StructField::new("size", 0, uintptr())]);
    let repr = Type::structure(
        "runtime.eface",
        16,
        vec![
            StructField::new("_type", 0, Type::pointer_to(&rtype, PTR)),
            StructField::new("data", 8, Type::pointer_to(&Type::void(), PTR)),
        ],
    );
    Type::interface("interface {}", repr)
}

/// `runtime.iface` for a method-set interface: `{tab *runtime.itab; data unsafe.Pointer}`.
pub fn iface(name: &str) -> TypeRef
{
    let rtype = Type::structure("runtime._type", 48, vec![StructField::new("size", 0, uintptr())]);
    let itab = Type::structure(
        "runtime.itab",
        32,
        vec![
            StructField::new("inter", 0, Type::pointer_to(&Type::void(), PTR)),
            StructField::new("_type", 8, Type::pointer_to(&rtype, PTR)),
        ],
    );
    let repr = Type::structure(
        "runtime.iface",
        16,
        vec![
            StructField::new("tab", 0, Type::pointer_to(&itab, PTR)),
            StructField::new("data", 8, Type::pointer_to(&Type::void(), PTR)),
        ],
    );
    Type::interface(name, repr)
}

/// Map type whose header pointer targets an opaque `runtime.hmap`.
pub fn map_of(key: &TypeRef, elem: &TypeRef) -> TypeRef
{
    let hmap = Type::structure("runtime.hmap", 48, vec![StructField::new("count", 0, int())]);
    Type::map(key, elem, Type::pointer_to(&hmap, PTR))
}

/// Layout of the goroutine record used by the goroutine tests.
pub struct GTypes
{
    pub g: TypeRef,
    pub m: TypeRef,
}

/// Field offsets of the fake `runtime.g`.
pub mod g_off
{
    pub const STACK_LO: u64 = 0;
    pub const STACK_HI: u64 = 8;
    pub const SCHED_SP: u64 = 16;
    pub const SCHED_PC: u64 = 24;
    pub const SCHED_BP: u64 = 32;
    pub const STATUS: u64 = 40;
    pub const GOID: u64 = 48;
    pub const WAITSINCE: u64 = 56;
    pub const WAITREASON: u64 = 64;
    pub const GOPC: u64 = 72;
    pub const STARTPC: u64 = 80;
    pub const M: u64 = 88;
    pub const LABELS: u64 = 96;
    pub const SIZE: i64 = 104;
}

/// `runtime.g` and `runtime.m` for a toolchain with the given status encoding.
pub fn g_types(atomic_status: bool) -> GTypes
{
    let stack = Type::structure(
        "runtime.stack",
        16,
        vec![StructField::new("lo", 0, uintptr()), StructField::new("hi", 8, uintptr())],
    );
    let gobuf = Type::structure(
        "runtime.gobuf",
        24,
        vec![
            StructField::new("sp", 0, uintptr()),
            StructField::new("pc", 8, uintptr()),
            StructField::new("bp", 16, uintptr()),
        ],
    );
    let status = if atomic_status {
        Type::structure(
            "runtime/internal/atomic.Uint32",
            4,
            vec![StructField::new("value", 0, Type::uint("uint32", 4))],
        )
    } else {
        Type::uint("uint32", 4)
    };

    let g_ptr = Type::forward_pointer("*runtime.g", PTR);
    let m = Type::structure(
        "runtime.m",
        16,
        vec![StructField::new("g0", 0, g_ptr.clone()), StructField::new("curg", 8, g_ptr.clone())],
    );
    let g = Type::structure(
        "runtime.g",
        g_off::SIZE,
        vec![
            StructField::new("stack", g_off::STACK_LO as i64, stack),
            StructField::new("sched", g_off::SCHED_SP as i64, gobuf),
            StructField::new("atomicstatus", g_off::STATUS as i64, status),
            StructField::new("goid", g_off::GOID as i64, Type::int("int64", 8)),
            StructField::new("waitsince", g_off::WAITSINCE as i64, Type::int("int64", 8)),
            StructField::new("waitreason", g_off::WAITREASON as i64, Type::uint("runtime.waitReason", 1)),
            StructField::new("gopc", g_off::GOPC as i64, uintptr()),
            StructField::new("startpc", g_off::STARTPC as i64, uintptr()),
            StructField::new("m", g_off::M as i64, Type::pointer_to(&m, PTR)),
            StructField::new("labels", g_off::LABELS as i64, Type::pointer_to(&Type::void(), PTR)),
        ],
    );
    if let Some(target) = g_ptr.pointer_target() {
        target.bind(g.clone());
    }
    GTypes { g, m }
}

/// Contents of one fake goroutine record.
#[derive(Debug, Clone, Copy, Default)]
pub struct GSpec
{
    pub goid: i64,
    pub status: u32,
    pub pc: u64,
    pub sp: u64,
    pub gopc: u64,
    pub startpc: u64,
    pub m: u64,
    pub labels: u64,
}

pub fn put_g(mem: &SparseMemory, addr: u64, spec: GSpec)
{
    use g_off::*;
    mem.put(addr, &vec![0u8; SIZE as usize]);
    mem.put_u64(addr + STACK_LO, spec.sp & !0xfff);
    mem.put_u64(addr + STACK_HI, (spec.sp & !0xfff) + 0x1000);
    mem.put_u64(addr + SCHED_SP, spec.sp);
    mem.put_u64(addr + SCHED_PC, spec.pc);
    mem.put_u32(addr + STATUS, spec.status);
    mem.put_i64(addr + GOID, spec.goid);
    mem.put_u64(addr + GOPC, spec.gopc);
    mem.put_u64(addr + STARTPC, spec.startpc);
    mem.put_u64(addr + M, spec.m);
    mem.put_u64(addr + LABELS, spec.labels);
}
