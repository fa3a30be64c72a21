//! FFI layer between Rust and scripts
//!
//! Handle-based access to native objects: scripts only ever see plain
//! numbers, which must survive the trip through a double.

use tether_host::{Address, ObjectHandle};

/// Largest integer a script number holds exactly (2^53 - 1).
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Opaque handle for script access
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ScriptHandle(pub u64);

impl ScriptHandle {
    /// Accept only non-negative integral numbers a double represents exactly.
    pub fn from_number(number: f64) -> Option<Self> {
        let exact = number.is_finite() && number >= 0.0 && number.fract() == 0.0;
        (exact && number <= MAX_SAFE_INTEGER as f64).then_some(ScriptHandle(number as u64))
    }

    pub fn to_number(self) -> f64 {
        self.0 as f64
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<Address> for ScriptHandle {
    fn from(address: Address) -> Self {
        ScriptHandle(address.0 as u64)
    }
}

impl From<ScriptHandle> for Address {
    fn from(handle: ScriptHandle) -> Self {
        Address(handle.0 as usize)
    }
}

impl From<ObjectHandle> for ScriptHandle {
    fn from(object: ObjectHandle) -> Self {
        ScriptHandle::from(object.address())
    }
}

impl From<ScriptHandle> for Option<ObjectHandle> {
    fn from(handle: ScriptHandle) -> Self {
        ObjectHandle::from_address(handle.0 as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_round_trip() {
        let object = ObjectHandle::from_address(0x7fff_1234_5678).unwrap();
        let handle = ScriptHandle::from(object);
        let back = ScriptHandle::from_number(handle.to_number()).unwrap();
        assert_eq!(Option::<ObjectHandle>::from(back), Some(object));
    }

    #[test]
    fn test_rejects_inexact_numbers() {
        assert_eq!(ScriptHandle::from_number(-1.0), None);
        assert_eq!(ScriptHandle::from_number(1.5), None);
        assert_eq!(ScriptHandle::from_number(f64::NAN), None);
        assert_eq!(ScriptHandle::from_number(2f64.powi(60)), None);
        assert!(ScriptHandle::from_number(0.0).unwrap().is_null());
    }
}
