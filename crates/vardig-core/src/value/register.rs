//! Reinterpreting vector registers as arrays of lanes.

use super::{Scalar, Value, ValueFlags};
use crate::error::{Result, VardigError};
use crate::memory::{decode_int, decode_uint, FAKE_ADDRESS_UNRESOLVED};
use crate::typeinfo::{Type, TypeShape};
use crate::types::Address;

/// How one lane of a register is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane
{
    Int(usize),
    Uint(usize),
    Float(usize),
    /// Wide integer lanes (`int128`, `uint256`...) rendered as hex.
    Hex(usize),
}

impl Lane
{
    fn parse(name: &str) -> Option<Lane>
    {
        match name {
            "int8" => Some(Lane::Int(1)),
            "int16" => Some(Lane::Int(2)),
            "int32" => Some(Lane::Int(4)),
            "int64" => Some(Lane::Int(8)),
            "uint8" => Some(Lane::Uint(1)),
            "uint16" => Some(Lane::Uint(2)),
            "uint32" => Some(Lane::Uint(4)),
            "uint64" => Some(Lane::Uint(8)),
            "float32" => Some(Lane::Float(4)),
            "float64" => Some(Lane::Float(8)),
            _ => {
                let bits = name.strip_prefix("uint").or_else(|| name.strip_prefix("int"))?;
                let bits: usize = bits.parse().ok()?;
                (bits >= 8 && bits.is_power_of_two()).then_some(Lane::Hex(bits / 8))
            }
        }
    }

    fn width(self) -> usize
    {
        match self {
            Lane::Int(n) | Lane::Uint(n) | Lane::Float(n) | Lane::Hex(n) => n,
        }
    }

    fn decode(self, bytes: &[u8]) -> Scalar
    {
        match self {
            Lane::Int(_) => Scalar::Int(decode_int(bytes)),
            Lane::Uint(_) => Scalar::Uint(decode_uint(bytes)),
            Lane::Float(4) => {
                let bits = decode_uint(bytes) as u32;
                Scalar::Float(f64::from(f32::from_bits(bits)))
            }
            Lane::Float(_) => Scalar::Float(f64::from_bits(decode_uint(bytes))),
            Lane::Hex(_) => {
                let digits: String = bytes.iter().rev().map(|b| format!("{b:02x}")).collect();
                Scalar::string(format!("0x{digits}"))
            }
        }
    }
}

impl Value
{
    /// View a CPU register as an array of `lane_type` elements (`int8`,
    /// `float32`, `uint128`...). Lanes that do not fit the remaining bytes are
    /// dropped.
    pub fn register_type_conv(&self, lane_type: &str) -> Result<Value>
    {
        let reg = self
            .reg
            .as_ref()
            .ok_or_else(|| VardigError::RegisterConversion(lane_type.to_string()))?;
        let lane = Lane::parse(lane_type).ok_or_else(|| VardigError::RegisterConversion(lane_type.to_string()))?;
        let width = lane.width();

        let children: Vec<Value> = reg
            .bytes
            .chunks_exact(width)
            .map(|chunk| Value::constant(lane.decode(chunk)))
            .collect();

        let elem = Type::new(lane_type, width as i64, TypeShape::Void).into_ref();
        let ty = Type::array(&elem, children.len() as i64);
        let mem = self.memory()?;
        let mut array = self.child(self.name.clone(), Address::ZERO, &ty, mem);
        array.base = FAKE_ADDRESS_UNRESOLVED;
        array.flags |= ValueFlags::FAKE_ADDRESS;
        array.len = children.len() as i64;
        array.cap = array.len;
        array.children = children;
        array.loaded = true;
        Ok(array)
    }
}
