//! Map loading: paging, bucket budgets and nil maps

mod common;

use common::{int, map_of, FakeInfo, FakeMap, SparseMemory};
use vardig_core::config::LoadConfig;
use vardig_core::error::VardigError;
use vardig_core::memory::SharedMemory;
use vardig_core::types::Address;
use vardig_core::value::{Scalar, Value};

const MAP_ADDR: u64 = 0x1000;
const HEADER: u64 = 0x2000;
const KEYS: u64 = 0x10_000;
const VALUES: u64 = 0x20_000;

/// Map of `len` int entries `i -> i * 10`, spread over `layout` buckets
/// (each bucket holds the given number of entries).
fn fixture(layout: &[usize]) -> (Value, std::sync::Arc<SparseMemory>)
{
    let mem = SparseMemory::new();
    mem.put_u64(MAP_ADDR, HEADER);

    let mut next = 0u64;
    let mut buckets = Vec::new();
    for &size in layout {
        let mut bucket = Vec::new();
        for _ in 0..size {
            let (k, v) = (KEYS + next * 8, VALUES + next * 8);
            mem.put_i64(k, next as i64);
            mem.put_i64(v, next as i64 * 10);
            bucket.push((Address::new(k), Address::new(v)));
            next += 1;
        }
        buckets.push(bucket);
    }

    let mut info = FakeInfo::default();
    info.maps.insert(HEADER, FakeMap { buckets });
    let shared: SharedMemory = mem.clone();
    let v = Value::new("m", Address::new(MAP_ADDR), &map_of(&int(), &int()), info.shared(), shared);
    (v, mem)
}

fn keys(v: &Value) -> Vec<i64>
{
    v.children
        .chunks_exact(2)
        .map(|pair| pair[0].value.as_ref().and_then(Scalar::as_i64).unwrap_or(-1))
        .collect()
}

/// Load consecutive pages of `page` entries until a page comes back short.
fn page_through(template: &Value, page: usize) -> Vec<i64>
{
    let cfg = LoadConfig {
        max_array_values: page,
        ..LoadConfig::FULL_VALUE
    };
    let mut all = Vec::new();
    loop {
        let mut v = template.clone();
        v.map_skip = all.len();
        v.load(&cfg);
        assert!(v.unreadable.is_none(), "page at {} failed: {:?}", all.len(), v.unreadable);
        let got = keys(&v);
        let done = got.len() < page;
        all.extend(got);
        if done || all.len() as i64 >= v.len {
            break;
        }
    }
    all
}

#[test]
fn test_map_entries_alternate_keys_and_values()
{
    let (mut v, _mem) = fixture(&[2, 1]);
    v.load(&LoadConfig::FULL_VALUE);

    assert_eq!(v.len, 3);
    assert_eq!(v.base, Address::new(HEADER));
    assert_eq!(v.children.len(), 6);
    assert_eq!(v.children[2].value, Some(Scalar::Int(1)));
    assert_eq!(v.children[3].value, Some(Scalar::Int(10)));
}

#[test]
fn test_dense_map_paging_has_no_gaps_or_overlap()
{
    let (v, _mem) = fixture(&[5, 5]);
    assert_eq!(page_through(&v, 4), (0..10).collect::<Vec<_>>());
}

#[test]
fn test_sparse_map_paging_has_no_gaps_or_overlap()
{
    let (v, _mem) = fixture(&[0, 1, 0, 0, 3, 0, 2, 0]);
    assert_eq!(page_through(&v, 2), (0..6).collect::<Vec<_>>());
}

#[test]
fn test_bucket_budget_limits_entries()
{
    let (mut v, _mem) = fixture(&[2, 2, 2]);
    let cfg = LoadConfig {
        max_map_buckets: 2,
        ..LoadConfig::FULL_VALUE
    };
    v.load(&cfg);

    assert!(v.unreadable.is_none());
    assert_eq!(v.len, 6);
    assert_eq!(keys(&v), vec![0, 1, 2, 3]);
}

#[test]
fn test_skip_past_bucket_budget()
{
    let (mut v, _mem) = fixture(&[1, 2]);
    v.map_skip = 2;
    let cfg = LoadConfig {
        max_map_buckets: 1,
        ..LoadConfig::FULL_VALUE
    };
    v.load(&cfg);
    assert_eq!(v.unreadable, Some(VardigError::MapIndexOutOfBounds));
}

#[test]
fn test_skip_past_length_loads_nothing()
{
    let (mut v, _mem) = fixture(&[3]);
    v.map_skip = 3;
    v.load(&LoadConfig::FULL_VALUE);
    assert!(v.unreadable.is_none());
    assert!(v.children.is_empty());
}

#[test]
fn test_nil_map()
{
    let (mut v, mem) = fixture(&[1]);
    mem.put_u64(MAP_ADDR, 0);
    v.load(&LoadConfig::FULL_VALUE);

    assert!(v.unreadable.is_none());
    assert_eq!(v.len, 0);
    assert!(v.base.is_null());
    assert!(v.children.is_empty());
}

#[test]
fn test_map_beyond_depth_only_records_length()
{
    let (mut v, _mem) = fixture(&[2, 2]);
    let cfg = LoadConfig {
        max_variable_recurse: -1,
        ..LoadConfig::FULL_VALUE
    };
    v.load(&cfg);
    assert_eq!(v.len, 4);
    assert!(v.children.is_empty());
}
