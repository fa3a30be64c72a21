//! Handles into the host's native memory
//!
//! Host objects are identified by their native address, the same way the
//! reflected object model identifies them. Hook, key-bind and listener
//! registrations get opaque non-zero ids so `0` can mean "not registered".

use std::fmt;
use std::num::NonZeroU64;

/// Raw native address.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub usize);

impl Address {
    pub const NULL: Address = Address(0);

    #[inline]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn offset(&self, bytes: usize) -> Address {
        Address(self.0 + bytes)
    }

    #[inline]
    pub fn as_ptr<T>(&self) -> *const T {
        self.0 as *const T
    }

    #[inline]
    pub fn as_mut_ptr<T>(&self) -> *mut T {
        self.0 as *mut T
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Reflected object, identified by its native address.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(pub Address);

impl ObjectHandle {
    pub fn from_address(address: usize) -> Option<Self> {
        (address != 0).then_some(ObjectHandle(Address(address)))
    }

    #[inline]
    pub fn address(&self) -> Address {
        self.0
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object@{}", self.0)
    }
}

/// Reflected function. Functions are objects too, so every function handle
/// also names an object.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionHandle(pub ObjectHandle);

impl FunctionHandle {
    #[inline]
    pub fn object(&self) -> ObjectHandle {
        self.0
    }

    #[inline]
    pub fn address(&self) -> Address {
        self.0.address()
    }
}

impl fmt::Display for FunctionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function@{}", self.0.address())
    }
}

macro_rules! registration_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub NonZeroU64);

        impl $name {
            pub fn new(raw: u64) -> Option<Self> {
                NonZeroU64::new(raw).map(Self)
            }

            #[inline]
            pub fn get(&self) -> u64 {
                self.0.get()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

registration_id!(
    /// Host-issued interception slot.
    HookId
);
registration_id!(
    /// Host-issued key-down subscription.
    KeyBindId
);
registration_id!(
    /// Host-issued object-creation subscription.
    ListenerId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_address_is_not_an_object() {
        assert_eq!(ObjectHandle::from_address(0), None);
        let object = ObjectHandle::from_address(0x1000).unwrap();
        assert_eq!(object.address().offset(8), Address(0x1008));
    }

    #[test]
    fn test_registration_ids_are_non_zero() {
        assert!(HookId::new(0).is_none());
        assert_eq!(HookId::new(3).map(|id| id.get()), Some(3));
    }
}
