use thiserror::Error;

/// Domain failures raised while building or applying transformers.
///
/// These travel inside `anyhow::Error`; callers that need to branch on a specific
/// condition use `error.downcast_ref::<WeaveError>()`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WeaveError {
    #[error("unsupported constant kind for constant modification: {0}")]
    UnsupportedConstant(String),
    #[error("invalid argument ordinal {ordinal:?} for method {method}")]
    InvalidArgumentOrdinal { ordinal: Option<usize>, method: String },
    #[error("capture_self requires an instance method: {0}")]
    CaptureSelfOnStatic(String),
    #[error("HEAD variable modification requires args_only=true: {0}")]
    HeadRequiresArgsOnly(String),
    #[error("capture_self only supports category 1 values, got {descriptor} in {method}")]
    CaptureSelfWideValue { descriptor: String, method: String },
    #[error("method {0} exceeds 65535 bytes of code after rewriting")]
    CodeTooLarge(String),
    #[error("rewritten method needs more than 65535 local variable slots")]
    TooManyLocals,
    #[error("constant pool exceeds 65535 entries")]
    ConstantPoolOverflow,
    #[error("jsr/ret subroutines are not supported in rewritten method {0}")]
    UnsupportedSubroutine(String),
}
