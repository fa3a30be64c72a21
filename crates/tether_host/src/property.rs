//! Reflected property layout

use bitflags::bitflags;

/// Kind of a reflected property slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Object,
    Class,
    Int8,
    Int16,
    Int,
    Int64,
    Byte,
    UInt16,
    UInt32,
    UInt64,
    Struct,
    Array,
    Float,
    Double,
    Bool,
    Enum,
    WeakObject,
    Name,
    Text,
    Str,
    SoftClass,
    Interface,
    Invalid,
}

impl PropertyKind {
    /// Natural slot size in bytes, when the kind has a fixed one.
    pub fn natural_size(&self) -> Option<usize> {
        match self {
            PropertyKind::Bool | PropertyKind::Int8 | PropertyKind::Byte => Some(1),
            PropertyKind::Int16 | PropertyKind::UInt16 => Some(2),
            PropertyKind::Int | PropertyKind::UInt32 | PropertyKind::Float => Some(4),
            PropertyKind::Int64 | PropertyKind::UInt64 | PropertyKind::Double => Some(8),
            PropertyKind::Object
            | PropertyKind::Class
            | PropertyKind::Interface
            | PropertyKind::Name
            | PropertyKind::Text
            | PropertyKind::Str => Some(std::mem::size_of::<usize>()),
            _ => None,
        }
    }

    pub fn is_object_reference(&self) -> bool {
        matches!(
            self,
            PropertyKind::Object | PropertyKind::Class | PropertyKind::Interface
        )
    }

    pub fn is_string(&self) -> bool {
        matches!(self, PropertyKind::Str | PropertyKind::Name | PropertyKind::Text)
    }
}

bitflags! {
    /// Parameter role flags carried by function parameter descriptors.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct PropertyFlags: u32 {
        const PARM = 1 << 0;
        const OUT_PARM = 1 << 1;
        const RETURN_PARM = 1 << 2;
        const REFERENCE_PARM = 1 << 3;
        const CONST_PARM = 1 << 4;
    }
}

/// One reflected property: where it lives inside its container and how to
/// interpret the bytes there.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDescriptor {
    pub name: String,
    pub kind: PropertyKind,
    pub offset: usize,
    pub size: usize,
    pub flags: PropertyFlags,
}

impl PropertyDescriptor {
    pub fn new(name: impl Into<String>, kind: PropertyKind, offset: usize, size: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            offset,
            size,
            flags: PropertyFlags::empty(),
        }
    }

    pub fn with_flags(mut self, flags: PropertyFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn is_return(&self) -> bool {
        self.flags.contains(PropertyFlags::RETURN_PARM)
    }

    /// Written by the callee. `const &` parameters are inputs.
    pub fn is_out(&self) -> bool {
        self.flags.contains(PropertyFlags::OUT_PARM) && !self.flags.contains(PropertyFlags::CONST_PARM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_const_reference_is_not_out() {
        let desc = PropertyDescriptor::new("Target", PropertyKind::Object, 0, 8)
            .with_flags(PropertyFlags::PARM | PropertyFlags::OUT_PARM | PropertyFlags::CONST_PARM);
        assert!(!desc.is_out());

        let desc = desc.with_flags(PropertyFlags::PARM | PropertyFlags::OUT_PARM);
        assert!(desc.is_out());
    }

    #[test]
    fn test_natural_sizes() {
        assert_eq!(PropertyKind::Int16.natural_size(), Some(2));
        assert_eq!(PropertyKind::Double.natural_size(), Some(8));
        assert_eq!(PropertyKind::Struct.natural_size(), None);
    }
}
