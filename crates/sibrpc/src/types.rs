//! Identifiers and payloads shared by both ends of a call.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

/// Correlates every primitive of one call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(pub u64);

impl CallId {
    /// A fresh id, uniformly drawn from the non-negative 63-bit range.
    pub fn random() -> Self {
        Self(rand::random::<u64>() & (i64::MAX as u64))
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{:016x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(pub u32);

/// Names one method on one interface of the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub interface: InterfaceId,
    pub method: MethodId,
}

impl MethodRef {
    pub const fn new(interface: u64, method: u32) -> Self {
        Self { interface: InterfaceId(interface), method: MethodId(method) }
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}#{}", self.interface.0, self.method.0)
    }
}

/// A value handed across by reference instead of as bytes.
#[derive(Clone)]
pub struct StructuredValue(Arc<dyn Any + Send + Sync>);

impl StructuredValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for StructuredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StructuredValue(..)")
    }
}

/// Arguments or result of a call.
#[derive(Debug, Clone)]
pub enum Payload {
    Flat(Bytes),
    Structured(StructuredValue),
}

impl Payload {
    pub fn flat(bytes: impl Into<Bytes>) -> Self {
        Self::Flat(bytes.into())
    }

    pub fn structured<T: Any + Send + Sync>(value: T) -> Self {
        Self::Structured(StructuredValue::new(value))
    }

    pub fn as_flat(&self) -> Option<&Bytes> {
        match self {
            Self::Flat(bytes) => Some(bytes),
            Self::Structured(_) => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Flat(_) => None,
            Self::Structured(value) => value.downcast_ref(),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Flat(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Payload {
    fn from(bytes: &'static [u8]) -> Self {
        Self::Flat(Bytes::from_static(bytes))
    }
}
