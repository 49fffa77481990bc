use crate::enum_accessors;
use crate::indices::FuncAddr;
use crate::types::{RefType, ValType};
use core::fmt;

/// An opaque host pointer stored by the embedder.
///
/// The runtime never dereferences it; [`ExternRef::as_ptr`] returns exactly
/// the value the embedder stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExternRef(usize);

impl ExternRef {
    pub fn from_ptr<T>(ptr: *mut T) -> Self {
        Self(ptr as usize)
    }

    pub fn as_ptr<T>(&self) -> *mut T {
        self.0 as *mut T
    }
}

/// A value that a WebAssembly module can consume or produce.
///
/// Floats are stored as their raw bit patterns so that NaN payloads survive
/// every move through the runtime; use `f32::from_bits`/`f64::from_bits` at
/// the boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// A 32-bit integer.
    I32(i32),
    /// A 64-bit integer.
    I64(i64),
    /// The raw bits of a 32-bit float.
    F32(u32),
    /// The raw bits of a 64-bit float.
    F64(u64),
    /// A 128-bit vector.
    V128(u128),
    /// A function reference; `None` is the null funcref.
    FuncRef(Option<FuncAddr>),
    /// An external reference; `None` is the null externref.
    ExternRef(Option<ExternRef>),
}

impl Value {
    /// The zero/null value of the given type, used for locals and fresh
    /// table slots.
    pub fn default_for(ty: ValType) -> Self {
        match ty {
            ValType::I32 => Self::I32(0),
            ValType::I64 => Self::I64(0),
            ValType::F32 => Self::F32(0),
            ValType::F64 => Self::F64(0),
            ValType::V128 => Self::V128(0),
            ValType::FuncRef => Self::FuncRef(None),
            ValType::ExternRef => Self::ExternRef(None),
        }
    }

    /// The null reference of the given reference type.
    pub fn null_ref(ty: RefType) -> Self {
        match ty {
            RefType::FuncRef => Self::FuncRef(None),
            RefType::ExternRef => Self::ExternRef(None),
        }
    }

    pub fn ty(&self) -> ValType {
        match self {
            Self::I32(_) => ValType::I32,
            Self::I64(_) => ValType::I64,
            Self::F32(_) => ValType::F32,
            Self::F64(_) => ValType::F64,
            Self::V128(_) => ValType::V128,
            Self::FuncRef(_) => ValType::FuncRef,
            Self::ExternRef(_) => ValType::ExternRef,
        }
    }

    pub fn is_null_ref(&self) -> bool {
        matches!(self, Self::FuncRef(None) | Self::ExternRef(None))
    }

    enum_accessors! {
        e
        (I32(i32) i32 unwrap_i32 *e)
        (I64(i64) i64 unwrap_i64 *e)
        (F32(f32) f32 unwrap_f32 f32::from_bits(*e))
        (F64(f64) f64 unwrap_f64 f64::from_bits(*e))
        (V128(u128) v128 unwrap_v128 *e)
        (FuncRef(Option<FuncAddr>) funcref unwrap_funcref *e)
        (ExternRef(Option<ExternRef>) externref unwrap_externref *e)
    }

    /// Raw bit accessors for the float variants, used where NaN payloads
    /// must not be disturbed.
    pub fn f32_bits(&self) -> Option<u32> {
        match self {
            Self::F32(bits) => Some(*bits),
            _ => None,
        }
    }

    pub fn f64_bits(&self) -> Option<u64> {
        match self {
            Self::F64(bits) => Some(*bits),
            _ => None,
        }
    }
}

impl From<i32> for Value {
    #[inline]
    fn from(val: i32) -> Value {
        Value::I32(val)
    }
}

impl From<i64> for Value {
    #[inline]
    fn from(val: i64) -> Value {
        Value::I64(val)
    }
}

impl From<f32> for Value {
    #[inline]
    fn from(val: f32) -> Value {
        Value::F32(val.to_bits())
    }
}

impl From<f64> for Value {
    #[inline]
    fn from(val: f64) -> Value {
        Value::F64(val.to_bits())
    }
}

impl From<u128> for Value {
    #[inline]
    fn from(val: u128) -> Value {
        Value::V128(val)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F32(bits) => write!(f, "{}", f32::from_bits(*bits)),
            Value::F64(bits) => write!(f, "{}", f64::from_bits(*bits)),
            Value::V128(v) => write!(f, "{v:#034x}"),
            Value::FuncRef(None) | Value::ExternRef(None) => write!(f, "null"),
            Value::FuncRef(Some(addr)) => write!(f, "funcref({})", addr.as_u32()),
            Value::ExternRef(Some(r)) => write!(f, "externref({:p})", r.as_ptr::<u8>()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_bits_survive_the_round_trip() {
        let payload = 0x7FC0_1234_u32;
        let val = Value::F32(payload);
        assert_eq!(val.f32_bits(), Some(payload));
        assert!(val.unwrap_f32().is_nan());

        let payload = 0x7FF8_0000_DEAD_BEEF_u64;
        let val = Value::F64(payload);
        assert_eq!(val.f64_bits(), Some(payload));
    }

    #[test]
    fn extern_ref_returns_the_stored_pointer() {
        let mut slot = 7_u32;
        let ptr: *mut u32 = &mut slot;
        let val = Value::ExternRef(Some(ExternRef::from_ptr(ptr)));
        let got = val.unwrap_externref().unwrap();
        assert_eq!(got.as_ptr::<u32>(), ptr);
    }

    #[test]
    fn defaults_match_their_types() {
        for ty in [
            ValType::I32,
            ValType::I64,
            ValType::F32,
            ValType::F64,
            ValType::V128,
            ValType::FuncRef,
            ValType::ExternRef,
        ] {
            assert_eq!(Value::default_for(ty).ty(), ty);
        }
        assert!(Value::null_ref(RefType::FuncRef).is_null_ref());
    }
}
