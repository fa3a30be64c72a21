//! Native value marshaling
//!
//! Converts between reflected native slots and script values in two steps:
//! native memory ⇄ [`NativeValue`] (thread-safe, used for deferred calls) and
//! [`NativeValue`] ⇄ script [`Value`] (event-loop thread only).
//!
//! Host strings are transcoded one UTF-16 code unit at a time. Characters
//! outside the Basic Multilingual Plane therefore come through as U+FFFD in
//! both directions.

use rquickjs::{Ctx, Value};
use tether_host::{Address, ObjectHandle, ObjectModel, PropertyDescriptor, PropertyKind};
use thiserror::Error;

use crate::ffi::ScriptHandle;

/// Own property holding the native address on script-side object wrappers.
pub const ADDRESS_KEY: &str = "__address";

/// Script-independent snapshot of one native value.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Object(Option<ObjectHandle>),
    /// Kinds the bridge does not interpret, carried as their raw address.
    Opaque(Address),
}

#[derive(Debug, Error, PartialEq)]
pub enum MarshalError {
    #[error("expected {expected} for {kind:?} '{name}', got {found}")]
    TypeMismatch {
        name: String,
        kind: PropertyKind,
        expected: &'static str,
        found: String,
    },

    #[error("{value} does not fit in {kind:?} '{name}'")]
    OutOfRange {
        name: String,
        kind: PropertyKind,
        value: String,
    },

    #[error("{kind:?} '{name}' cannot be written by scripts")]
    Unsupported { name: String, kind: PropertyKind },

    #[error("host rejected string for '{name}': {reason}")]
    Host { name: String, reason: String },
}

fn mismatch(desc: &PropertyDescriptor, expected: &'static str, found: impl Into<String>) -> MarshalError {
    MarshalError::TypeMismatch {
        name: desc.name.clone(),
        kind: desc.kind,
        expected,
        found: found.into(),
    }
}

fn out_of_range(desc: &PropertyDescriptor, value: impl ToString) -> MarshalError {
    MarshalError::OutOfRange {
        name: desc.name.clone(),
        kind: desc.kind,
        value: value.to_string(),
    }
}

/// Inclusive integer bounds of a numeric kind, `None` for non-integers.
fn integer_bounds(desc: &PropertyDescriptor) -> Option<(i128, i128)> {
    let bounds = match desc.kind {
        PropertyKind::Int8 => (i8::MIN as i128, i8::MAX as i128),
        PropertyKind::Int16 => (i16::MIN as i128, i16::MAX as i128),
        PropertyKind::Int => (i32::MIN as i128, i32::MAX as i128),
        PropertyKind::Int64 => (i64::MIN as i128, i64::MAX as i128),
        PropertyKind::Byte => (0, u8::MAX as i128),
        PropertyKind::UInt16 => (0, u16::MAX as i128),
        PropertyKind::UInt32 => (0, u32::MAX as i128),
        PropertyKind::UInt64 => (0, u64::MAX as i128),
        PropertyKind::Enum => match desc.size {
            1 => (0, u8::MAX as i128),
            2 => (0, u16::MAX as i128),
            4 => (0, u32::MAX as i128),
            8 => (0, u64::MAX as i128),
            _ => return None,
        },
        _ => return None,
    };
    Some(bounds)
}

fn is_signed(kind: PropertyKind) -> bool {
    matches!(
        kind,
        PropertyKind::Int8 | PropertyKind::Int16 | PropertyKind::Int | PropertyKind::Int64
    )
}

#[inline]
unsafe fn read<T: Copy>(address: Address) -> T {
    std::ptr::read_unaligned(address.as_ptr::<T>())
}

#[inline]
unsafe fn write<T: Copy>(address: Address, value: T) {
    std::ptr::write_unaligned(address.as_mut_ptr::<T>(), value)
}

/// Read the slot at `address` as `desc` describes it.
///
/// # Safety
///
/// `address` must point to readable memory of at least `desc.size` bytes
/// holding a value of `desc.kind`.
pub unsafe fn read_native(model: &dyn ObjectModel, desc: &PropertyDescriptor, address: Address) -> NativeValue {
    if address.is_null() {
        return NativeValue::Opaque(address);
    }
    match desc.kind {
        PropertyKind::Bool => NativeValue::Bool(read::<u8>(address) != 0),
        PropertyKind::Int8 => NativeValue::Int(read::<i8>(address) as i64),
        PropertyKind::Int16 => NativeValue::Int(read::<i16>(address) as i64),
        PropertyKind::Int => NativeValue::Int(read::<i32>(address) as i64),
        PropertyKind::Int64 => NativeValue::Int(read::<i64>(address)),
        PropertyKind::Byte => NativeValue::UInt(read::<u8>(address) as u64),
        PropertyKind::UInt16 => NativeValue::UInt(read::<u16>(address) as u64),
        PropertyKind::UInt32 => NativeValue::UInt(read::<u32>(address) as u64),
        PropertyKind::UInt64 => NativeValue::UInt(read::<u64>(address)),
        PropertyKind::Enum => match desc.size {
            1 => NativeValue::UInt(read::<u8>(address) as u64),
            2 => NativeValue::UInt(read::<u16>(address) as u64),
            4 => NativeValue::UInt(read::<u32>(address) as u64),
            8 => NativeValue::UInt(read::<u64>(address)),
            _ => NativeValue::Opaque(address),
        },
        PropertyKind::Float => NativeValue::Float(read::<f32>(address) as f64),
        PropertyKind::Double => NativeValue::Float(read::<f64>(address)),
        kind if kind.is_object_reference() => {
            NativeValue::Object(ObjectHandle::from_address(read::<usize>(address)))
        }
        PropertyKind::Str | PropertyKind::Name | PropertyKind::Text => {
            match model.read_string(desc.kind, address) {
                Some(units) => NativeValue::Str(decode_wide(&units)),
                None => NativeValue::Opaque(address),
            }
        }
        _ => NativeValue::Opaque(address),
    }
}

/// Store `value` into the slot at `address`.
///
/// # Safety
///
/// `address` must point to writable memory of at least `desc.size` bytes
/// laid out for `desc.kind`.
pub unsafe fn write_native(
    model: &dyn ObjectModel,
    desc: &PropertyDescriptor,
    address: Address,
    value: &NativeValue,
) -> Result<(), MarshalError> {
    if address.is_null() {
        return Err(MarshalError::Unsupported {
            name: desc.name.clone(),
            kind: desc.kind,
        });
    }

    if let Some((min, max)) = integer_bounds(desc) {
        let wide: i128 = match value {
            NativeValue::Int(i) => *i as i128,
            NativeValue::UInt(u) => *u as i128,
            NativeValue::Bool(b) => *b as i128,
            NativeValue::Float(f) if f.is_finite() && f.fract() == 0.0 => *f as i128,
            other => return Err(mismatch(desc, "integer", format!("{other:?}"))),
        };
        if wide < min || wide > max {
            return Err(out_of_range(desc, wide));
        }
        match (desc.kind, desc.size) {
            (PropertyKind::Int8, _) => write(address, wide as i8),
            (PropertyKind::Int16, _) => write(address, wide as i16),
            (PropertyKind::Int, _) => write(address, wide as i32),
            (PropertyKind::Int64, _) => write(address, wide as i64),
            (PropertyKind::Byte, _) | (PropertyKind::Enum, 1) => write(address, wide as u8),
            (PropertyKind::UInt16, _) | (PropertyKind::Enum, 2) => write(address, wide as u16),
            (PropertyKind::UInt32, _) | (PropertyKind::Enum, 4) => write(address, wide as u32),
            _ => write(address, wide as u64),
        }
        return Ok(());
    }

    match desc.kind {
        PropertyKind::Bool => {
            let flag = match value {
                NativeValue::Bool(b) => *b,
                NativeValue::Int(i) => *i != 0,
                NativeValue::UInt(u) => *u != 0,
                NativeValue::Float(f) => *f != 0.0,
                other => return Err(mismatch(desc, "boolean", format!("{other:?}"))),
            };
            write(address, flag as u8);
        }
        PropertyKind::Float | PropertyKind::Double => {
            let number = match value {
                NativeValue::Float(f) => *f,
                NativeValue::Int(i) => *i as f64,
                NativeValue::UInt(u) => *u as f64,
                other => return Err(mismatch(desc, "number", format!("{other:?}"))),
            };
            if desc.kind == PropertyKind::Float {
                write(address, number as f32);
            } else {
                write(address, number);
            }
        }
        kind if kind.is_object_reference() => {
            let raw = match value {
                NativeValue::Object(object) => object.map(|o| o.address().0).unwrap_or(0),
                NativeValue::Opaque(address) => address.0,
                other => return Err(mismatch(desc, "object", format!("{other:?}"))),
            };
            write(address, raw);
        }
        PropertyKind::Str | PropertyKind::Name | PropertyKind::Text => {
            let NativeValue::Str(text) = value else {
                return Err(mismatch(desc, "string", format!("{value:?}")));
            };
            model
                .write_string(desc.kind, address, &encode_wide(text))
                .map_err(|err| MarshalError::Host {
                    name: desc.name.clone(),
                    reason: err.to_string(),
                })?;
        }
        _ => {
            return Err(MarshalError::Unsupported {
                name: desc.name.clone(),
                kind: desc.kind,
            })
        }
    }
    Ok(())
}

/// Convert a snapshot into a script value. Object references go through
/// `wrap_object` so callers decide what a wrapper looks like.
pub fn to_script<'js>(
    ctx: &Ctx<'js>,
    value: &NativeValue,
    wrap_object: impl FnOnce(ObjectHandle) -> rquickjs::Result<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    let value = match value {
        NativeValue::Bool(b) => Value::new_bool(ctx.clone(), *b),
        NativeValue::Int(i) => match i32::try_from(*i) {
            Ok(small) => Value::new_int(ctx.clone(), small),
            Err(_) => Value::new_float(ctx.clone(), *i as f64),
        },
        NativeValue::UInt(u) => match i32::try_from(*u) {
            Ok(small) => Value::new_int(ctx.clone(), small),
            Err(_) => Value::new_float(ctx.clone(), *u as f64),
        },
        NativeValue::Float(f) => Value::new_float(ctx.clone(), *f),
        NativeValue::Str(s) => rquickjs::String::from_str(ctx.clone(), s)?.into_value(),
        NativeValue::Object(None) => Value::new_null(ctx.clone()),
        NativeValue::Object(Some(object)) => return wrap_object(*object),
        NativeValue::Opaque(address) => address_to_script(ctx, *address),
    };
    Ok(value)
}

/// Raw addresses travel as plain numbers.
pub fn address_to_script<'js>(ctx: &Ctx<'js>, address: Address) -> Value<'js> {
    handle_to_script(ctx, ScriptHandle::from(address))
}

pub fn handle_to_script<'js>(ctx: &Ctx<'js>, handle: ScriptHandle) -> Value<'js> {
    match i32::try_from(handle.0) {
        Ok(small) => Value::new_int(ctx.clone(), small),
        Err(_) => Value::new_float(ctx.clone(), handle.to_number()),
    }
}

/// Native address carried by an object wrapper, a raw number, or null.
pub fn address_of(value: &Value<'_>) -> Option<Option<Address>> {
    if value.is_null() || value.is_undefined() {
        return Some(None);
    }
    if let Some(number) = value.as_number() {
        return number_to_address(number).map(Some);
    }
    let object = value.as_object()?;
    let raw: Option<f64> = object.get(ADDRESS_KEY).ok()?;
    number_to_address(raw?).map(Some)
}

fn number_to_address(number: f64) -> Option<Address> {
    ScriptHandle::from_number(number).map(Address::from)
}

/// Interpret a script value as the kind `desc` describes.
pub fn from_script(value: &Value<'_>, desc: &PropertyDescriptor) -> Result<NativeValue, MarshalError> {
    let found = || value.type_name().to_string();

    if let Some((min, max)) = integer_bounds(desc) {
        let number = value
            .as_number()
            .ok_or_else(|| mismatch(desc, "integer", found()))?;
        if !number.is_finite() || number.fract() != 0.0 {
            return Err(mismatch(desc, "integer", number.to_string()));
        }
        let wide = number as i128;
        if wide < min || wide > max {
            return Err(out_of_range(desc, number));
        }
        return Ok(if is_signed(desc.kind) {
            NativeValue::Int(wide as i64)
        } else {
            NativeValue::UInt(wide as u64)
        });
    }

    match desc.kind {
        PropertyKind::Bool => value
            .as_bool()
            .or_else(|| value.as_number().map(|n| n != 0.0))
            .map(NativeValue::Bool)
            .ok_or_else(|| mismatch(desc, "boolean", found())),
        PropertyKind::Float | PropertyKind::Double => value
            .as_number()
            .map(NativeValue::Float)
            .ok_or_else(|| mismatch(desc, "number", found())),
        PropertyKind::Str | PropertyKind::Name | PropertyKind::Text => value
            .as_string()
            .and_then(|s| s.to_string().ok())
            .map(NativeValue::Str)
            .ok_or_else(|| mismatch(desc, "string", found())),
        kind if kind.is_object_reference() => address_of(value)
            .map(|address| NativeValue::Object(address.and_then(|a| ObjectHandle::from_address(a.0))))
            .ok_or_else(|| mismatch(desc, "object, address or null", found())),
        _ => match value.as_number().and_then(number_to_address) {
            Some(address) => Ok(NativeValue::Opaque(address)),
            None => Err(MarshalError::Unsupported {
                name: desc.name.clone(),
                kind: desc.kind,
            }),
        },
    }
}

/// Host wide string to script string, one code unit at a time.
pub fn decode_wide(units: &[u16]) -> String {
    units
        .iter()
        .map(|&unit| char::from_u32(unit as u32).unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Script string to host wide string, one code unit per character.
pub fn encode_wide(text: &str) -> Vec<u16> {
    text.chars()
        .map(|c| u16::try_from(c as u32).unwrap_or(0xFFFD))
        .collect()
}

/// Zeroed, 8-byte aligned scratch memory for a reflected call.
pub struct ParamBuffer {
    words: Vec<u64>,
}

impl ParamBuffer {
    pub fn zeroed(size: usize) -> Self {
        Self {
            words: vec![0; size.div_ceil(8).max(1)],
        }
    }

    pub fn address(&self) -> Address {
        Address(self.words.as_ptr() as usize)
    }

    pub fn len(&self) -> usize {
        self.words.len() * 8
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rquickjs::{Context, Runtime};
    use tether_host::memory::MemoryHost;

    fn desc(kind: PropertyKind, size: usize) -> PropertyDescriptor {
        PropertyDescriptor::new("Value", kind, 0, size)
    }

    fn with_ctx(f: impl for<'js> FnOnce(&Ctx<'js>)) {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| f(&ctx));
    }

    #[test]
    fn test_numeric_round_trip_through_script() {
        let host = MemoryHost::new();
        let cases = [
            (desc(PropertyKind::Int8, 1), NativeValue::Int(-128)),
            (desc(PropertyKind::Int16, 2), NativeValue::Int(31_000)),
            (desc(PropertyKind::Int, 4), NativeValue::Int(-2_000_000_000)),
            (desc(PropertyKind::Int64, 8), NativeValue::Int(1 << 52)),
            (desc(PropertyKind::Byte, 1), NativeValue::UInt(255)),
            (desc(PropertyKind::UInt16, 2), NativeValue::UInt(65_535)),
            (desc(PropertyKind::UInt32, 4), NativeValue::UInt(4_000_000_000)),
            (desc(PropertyKind::UInt64, 8), NativeValue::UInt(1 << 40)),
            (desc(PropertyKind::Enum, 1), NativeValue::UInt(3)),
            (desc(PropertyKind::Float, 4), NativeValue::Float(1.5)),
            (desc(PropertyKind::Double, 8), NativeValue::Float(-0.125)),
            (desc(PropertyKind::Bool, 1), NativeValue::Bool(true)),
        ];

        with_ctx(|ctx| {
            for (desc, value) in &cases {
                let buffer = ParamBuffer::zeroed(8);
                unsafe { write_native(&host, desc, buffer.address(), value) }.unwrap();
                let read = unsafe { read_native(&host, desc, buffer.address()) };
                assert_eq!(&read, value, "{:?}", desc.kind);

                let script = to_script(ctx, &read, |_| unreachable!()).unwrap();
                let back = from_script(&script, desc).unwrap();
                assert_eq!(&back, value, "{:?}", desc.kind);
            }
        });
    }

    #[test]
    fn test_unknown_kind_is_opaque_address() {
        let host = MemoryHost::new();
        let buffer = ParamBuffer::zeroed(32);
        let desc = desc(PropertyKind::Struct, 16);

        let value = unsafe { read_native(&host, &desc, buffer.address()) };
        assert_eq!(value, NativeValue::Opaque(buffer.address()));

        with_ctx(|ctx| {
            let script = to_script(ctx, &value, |_| unreachable!()).unwrap();
            assert_eq!(script.as_number(), Some(buffer.address().0 as f64));
            assert_eq!(from_script(&script, &desc).unwrap(), value);
        });
    }

    #[test]
    fn test_out_of_range_and_mismatch() {
        with_ctx(|ctx| {
            let big = Value::new_int(ctx.clone(), 300);
            assert!(matches!(
                from_script(&big, &desc(PropertyKind::Byte, 1)),
                Err(MarshalError::OutOfRange { .. })
            ));

            let fraction = Value::new_float(ctx.clone(), 1.5);
            assert!(matches!(
                from_script(&fraction, &desc(PropertyKind::Int, 4)),
                Err(MarshalError::TypeMismatch { .. })
            ));

            let text = rquickjs::String::from_str(ctx.clone(), "x").unwrap().into_value();
            assert!(matches!(
                from_script(&text, &desc(PropertyKind::Float, 4)),
                Err(MarshalError::TypeMismatch { .. })
            ));
        });
    }

    #[test]
    fn test_object_references() {
        with_ctx(|ctx| {
            let object_desc = desc(PropertyKind::Object, 8);
            let null = Value::new_null(ctx.clone());
            assert_eq!(from_script(&null, &object_desc).unwrap(), NativeValue::Object(None));

            let wrapper = rquickjs::Object::new(ctx.clone()).unwrap();
            wrapper.set(ADDRESS_KEY, 4096).unwrap();
            assert_eq!(
                from_script(&wrapper.into_value(), &object_desc).unwrap(),
                NativeValue::Object(ObjectHandle::from_address(4096))
            );

            let as_null = to_script(ctx, &NativeValue::Object(None), |_| unreachable!()).unwrap();
            assert!(as_null.is_null());
        });
    }

    #[test]
    fn test_strings_through_host() {
        let host = MemoryHost::new();
        let buffer = ParamBuffer::zeroed(8);
        let desc = desc(PropertyKind::Str, 8);
        let value = NativeValue::Str("héllo".to_string());

        unsafe { write_native(&host, &desc, buffer.address(), &value) }.unwrap();
        assert_eq!(unsafe { read_native(&host, &desc, buffer.address()) }, value);
    }

    #[test]
    fn test_wide_strings_are_per_code_unit() {
        assert_eq!(decode_wide(&[0x48, 0x69]), "Hi");
        // A surrogate pair decodes as two replacement characters.
        assert_eq!(decode_wide(&[0xD83D, 0xDE00]), "\u{FFFD}\u{FFFD}");
        assert_eq!(encode_wide("a😀"), vec![0x61, 0xFFFD]);
    }
}
