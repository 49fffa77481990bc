use crate::indices::TypeIndex;
use core::fmt;

/// The types of values a WebAssembly module can consume or produce,
/// carrying their binary encoding tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValType {
    I32 = 0x7F,
    I64 = 0x7E,
    F32 = 0x7D,
    F64 = 0x7C,
    V128 = 0x7B,
    FuncRef = 0x70,
    ExternRef = 0x6F,
}

impl ValType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x7F => Some(Self::I32),
            0x7E => Some(Self::I64),
            0x7D => Some(Self::F32),
            0x7C => Some(Self::F64),
            0x7B => Some(Self::V128),
            0x70 => Some(Self::FuncRef),
            0x6F => Some(Self::ExternRef),
            _ => None,
        }
    }

    pub fn byte(self) -> u8 {
        self as u8
    }

    pub fn is_num(self) -> bool {
        matches!(
            self,
            Self::I32 | Self::I64 | Self::F32 | Self::F64 | Self::V128
        )
    }

    pub fn is_ref(self) -> bool {
        matches!(self, Self::FuncRef | Self::ExternRef)
    }
}

impl From<RefType> for ValType {
    fn from(ty: RefType) -> Self {
        match ty {
            RefType::FuncRef => Self::FuncRef,
            RefType::ExternRef => Self::ExternRef,
        }
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ValType::I32 => write!(f, "i32"),
            ValType::I64 => write!(f, "i64"),
            ValType::F32 => write!(f, "f32"),
            ValType::F64 => write!(f, "f64"),
            ValType::V128 => write!(f, "v128"),
            ValType::FuncRef => write!(f, "funcref"),
            ValType::ExternRef => write!(f, "externref"),
        }
    }
}

/// The subset of [`ValType`] that can live in tables and reference-typed
/// slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RefType {
    FuncRef = 0x70,
    ExternRef = 0x6F,
}

impl RefType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x70 => Some(Self::FuncRef),
            0x6F => Some(Self::ExternRef),
            _ => None,
        }
    }
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        ValType::from(*self).fmt(f)
    }
}

/// Whether a global may be written after initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Mutability {
    Const = 0x00,
    Var = 0x01,
}

/// Size bounds of a table or memory, in elements or pages respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
}

impl Limits {
    pub fn new(min: u32, max: Option<u32>) -> Self {
        Self { min, max }
    }

    /// `min <= max` whenever a maximum is declared.
    pub fn is_well_formed(&self) -> bool {
        match self.max {
            Some(max) => self.min <= max,
            None => true,
        }
    }

    /// Checks that `self` (the provided limits) satisfies `declared`
    /// (the required limits) for import matching.
    pub fn satisfies(&self, declared: &Limits) -> bool {
        if self.min < declared.min {
            return false;
        }
        match declared.max {
            Some(declared_max) => match self.max {
                Some(max) => max <= declared_max,
                None => false,
            },
            None => true,
        }
    }
}

/// The signature of a function: parameter types followed by result types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FuncType {
    params: Box<[ValType]>,
    results: Box<[ValType]>,
}

impl FuncType {
    pub fn new(
        params: impl IntoIterator<Item = ValType>,
        results: impl IntoIterator<Item = ValType>,
    ) -> Self {
        Self {
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
        }
    }

    pub fn params(&self) -> &[ValType] {
        &self.params
    }

    pub fn results(&self) -> &[ValType] {
        &self.results
    }
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(func")?;
        for p in self.params.iter() {
            write!(f, " (param {p})")?;
        }
        for r in self.results.iter() {
            write!(f, " (result {r})")?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableType {
    pub elem: RefType,
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    pub content: ValType,
    pub mutability: Mutability,
}

/// The external type of an importable or exportable entity.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternType {
    Func(FuncType),
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType),
}

/// The label type of a structured-control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    /// `[] -> []`
    Empty,
    /// `[] -> [t]`
    Value(ValType),
    /// An arbitrary function type from the module's type section.
    Func(TypeIndex),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_type_tags_round_trip() {
        for ty in [
            ValType::I32,
            ValType::I64,
            ValType::F32,
            ValType::F64,
            ValType::V128,
            ValType::FuncRef,
            ValType::ExternRef,
        ] {
            assert_eq!(ValType::from_byte(ty.byte()), Some(ty));
        }
        assert_eq!(ValType::from_byte(0x6E), None);
    }

    #[test]
    fn func_type_params_and_results_do_not_alias() {
        let ty = FuncType::new([ValType::I32, ValType::I64], [ValType::F64]);
        assert_eq!(ty.params(), &[ValType::I32, ValType::I64]);
        assert_eq!(ty.results(), &[ValType::F64]);

        let no_params = FuncType::new([], [ValType::I32]);
        assert!(no_params.params().is_empty());
        assert_eq!(no_params.results(), &[ValType::I32]);
    }

    #[test]
    fn limits_satisfaction() {
        let declared = Limits::new(1, Some(4));
        assert!(Limits::new(1, Some(4)).satisfies(&declared));
        assert!(Limits::new(2, Some(3)).satisfies(&declared));
        assert!(!Limits::new(0, Some(4)).satisfies(&declared));
        assert!(!Limits::new(1, Some(5)).satisfies(&declared));
        assert!(!Limits::new(1, None).satisfies(&declared));
        assert!(Limits::new(1, None).satisfies(&Limits::new(1, None)));
    }
}
