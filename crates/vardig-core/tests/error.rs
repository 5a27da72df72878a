//! Tests for error handling

use vardig_core::error::{Result, VardigError};
use vardig_core::types::{Address, ThreadId};

#[test]
fn test_memory_read_display()
{
    let error = VardigError::MemoryRead {
        addr: Address::new(0x1000),
        len: 8,
        details: "unmapped".to_string(),
    };
    let message = format!("{}", error);
    assert!(message.contains("0x1000"));
    assert!(message.contains("8 bytes"));
    assert!(message.contains("unmapped"));
}

#[test]
fn test_structural_error_messages()
{
    assert_eq!(VardigError::NegativeLength.to_string(), "Negative array length");
    assert_eq!(VardigError::NilBase.to_string(), "non-zero length array with nil base");
    assert!(VardigError::BadArrayBase(Address::new(0xfff0)).to_string().contains("0xfff0"));
}

#[test]
fn test_parent_unreadable_wraps_cause()
{
    let cause = VardigError::ShortRead {
        addr: Address::new(0x20),
        wanted: 8,
        got: 3,
    };
    let wrapped = cause.clone().parent_unreadable();

    match &wrapped {
        VardigError::ParentUnreadable(inner) => assert_eq!(**inner, cause),
        other => panic!("Expected ParentUnreadable, got {other:?}"),
    }
    assert!(wrapped.to_string().starts_with("parent pointer unreadable"));
}

#[test]
fn test_is_nil_category()
{
    assert!(VardigError::IsNil("m".to_string()).is_nil());
    assert!(!VardigError::UnreadableG.is_nil());
    assert!(!VardigError::NilBase.is_nil());
}

#[test]
fn test_member_lookup_messages()
{
    let error = VardigError::NoMember {
        name: "s".to_string(),
        member: "Missing".to_string(),
    };
    assert_eq!(error.to_string(), "s has no member Missing");

    let error = VardigError::NotAStruct {
        name: "n".to_string(),
        type_name: "int".to_string(),
    };
    assert_eq!(error.to_string(), "n (type int) is not a struct");
}

#[test]
fn test_goroutine_error_messages()
{
    assert_eq!(VardigError::NoGoroutine(ThreadId(7)).to_string(), "no G executing on thread 7");
    assert_eq!(VardigError::UnknownGoroutine(42).to_string(), "unknown goroutine 42");
}

#[test]
fn test_result_type()
{
    fn returns_ok() -> Result<i32>
    {
        Ok(42)
    }

    fn returns_err() -> Result<i32>
    {
        Err(VardigError::InvalidArgument("test".to_string()))
    }

    assert_eq!(returns_ok().unwrap(), 42);
    assert!(returns_err().is_err());
}
