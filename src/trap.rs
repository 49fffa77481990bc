/// The reasons a single invocation can abort at runtime.
///
/// A trap unwinds the whole invocation; the store stays valid and keeps
/// every mutation committed before the trapping instruction.
#[derive(onlyerror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    /// Code that was supposed to be unreachable was reached.
    #[error("unreachable executed")]
    Unreachable,
    /// An integer arithmetic operation overflowed.
    #[error("integer overflow")]
    IntegerOverflow,
    /// An integer division by zero.
    #[error("integer divide by zero")]
    IntegerDivideByZero,
    /// Failed float-to-int conversion.
    #[error("invalid conversion to integer")]
    InvalidConversionToInteger,
    /// An out-of-bounds linear-memory access.
    #[error("out of bounds memory access")]
    MemoryOutOfBounds,
    /// An out-of-bounds table access.
    #[error("out of bounds table access")]
    TableOutOfBounds,
    /// Signature mismatch on an indirect call.
    #[error("indirect call type mismatch")]
    IndirectCallTypeMismatch,
    /// Indirect call through a null or out-of-range table slot.
    #[error("undefined element")]
    UndefinedElement,
    /// The activation stack hit its depth limit.
    #[error("call stack exhausted")]
    CallStackExhausted,
    /// The metered cost reached the configured limit.
    #[error("cost limit exceeded")]
    CostLimitExceeded,
    /// A host function reported failure.
    #[error("host function failed")]
    HostFunctionFailed,
    /// Cooperative termination (WASI `proc_exit`); treated as success by
    /// the result predicate.
    #[error("terminated")]
    Terminated,
}

impl From<Trap> for u8 {
    fn from(value: Trap) -> Self {
        match value {
            Trap::Unreachable => 0,
            Trap::IntegerOverflow => 1,
            Trap::IntegerDivideByZero => 2,
            Trap::InvalidConversionToInteger => 3,
            Trap::MemoryOutOfBounds => 4,
            Trap::TableOutOfBounds => 5,
            Trap::IndirectCallTypeMismatch => 6,
            Trap::UndefinedElement => 7,
            Trap::CallStackExhausted => 8,
            Trap::CostLimitExceeded => 9,
            Trap::HostFunctionFailed => 10,
            Trap::Terminated => 11,
        }
    }
}

impl TryFrom<u8> for Trap {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unreachable),
            1 => Ok(Self::IntegerOverflow),
            2 => Ok(Self::IntegerDivideByZero),
            3 => Ok(Self::InvalidConversionToInteger),
            4 => Ok(Self::MemoryOutOfBounds),
            5 => Ok(Self::TableOutOfBounds),
            6 => Ok(Self::IndirectCallTypeMismatch),
            7 => Ok(Self::UndefinedElement),
            8 => Ok(Self::CallStackExhausted),
            9 => Ok(Self::CostLimitExceeded),
            10 => Ok(Self::HostFunctionFailed),
            11 => Ok(Self::Terminated),
            _ => Err(()),
        }
    }
}
