use thiserror::Error;
use types::{HostError, ObjectId, VariantType};
use vm::MachineError;

/// The seven failure categories a host sees, plus `Other` for problems that
/// happen outside a guest call (configuration, loading).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidReference,
    TypeMismatch,
    PermissionDenied,
    RecursionLimitExceeded,
    Timeout,
    GuestFault,
    GuestThrow,
    Other,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SandboxError {
    #[error("invalid variant index {0}")]
    InvalidReference(i32),
    #[error("object is null")]
    NullObject,
    #[error("object {0} is not scoped")]
    UnscopedObject(ObjectId),
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
    #[error("unknown variant type {0}")]
    UnknownType(u32),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("too many references in one call (max {0})")]
    TooManyReferences(usize),
    #[error("call depth limit of {0} exceeded")]
    RecursionLimitExceeded(usize),
    #[error("instruction limit of {0} reached")]
    Timeout(u64),
    #[error("guest fault: {0}")]
    GuestFault(String),
    #[error("guest exception {kind}: {message}")]
    GuestThrow { kind: String, message: String, value: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("host error: {0}")]
    Host(#[from] HostError),
    #[error("function not found: {0}")]
    FunctionNotFound(String),
    #[error("no program loaded")]
    NoProgram,
    #[error("not allowed while a call is in progress: {0}")]
    CallInProgress(&'static str),
    #[error("unknown shared range at 0x{0:08x}")]
    UnknownRange(u32),
    #[error("load error: {0}")]
    Load(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<MachineError> for SandboxError {
    fn from(err: MachineError) -> Self {
        match err {
            MachineError::Timeout(limit) => SandboxError::Timeout(limit),
            other => SandboxError::GuestFault(other.to_string()),
        }
    }
}

impl From<loader::LoadError> for SandboxError {
    fn from(err: loader::LoadError) -> Self {
        SandboxError::Load(err.to_string())
    }
}

impl SandboxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SandboxError::InvalidReference(_) | SandboxError::NullObject | SandboxError::UnscopedObject(_) => {
                ErrorKind::InvalidReference
            }
            SandboxError::TypeMismatch { .. } | SandboxError::UnknownType(_) => ErrorKind::TypeMismatch,
            SandboxError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            SandboxError::RecursionLimitExceeded(_) => ErrorKind::RecursionLimitExceeded,
            SandboxError::Timeout(_) => ErrorKind::Timeout,
            SandboxError::GuestThrow { .. } => ErrorKind::GuestThrow,
            SandboxError::GuestFault(_)
            | SandboxError::TooManyReferences(_)
            | SandboxError::InvalidArgument(_)
            | SandboxError::Host(_) => ErrorKind::GuestFault,
            SandboxError::FunctionNotFound(_)
            | SandboxError::NoProgram
            | SandboxError::CallInProgress(_)
            | SandboxError::UnknownRange(_)
            | SandboxError::Load(_)
            | SandboxError::Config(_) => ErrorKind::Other,
        }
    }

    pub(crate) fn mismatch(expected: VariantType, actual: VariantType) -> Self {
        SandboxError::TypeMismatch { expected: expected.name().to_string(), actual: actual.name().to_string() }
    }

    pub(crate) fn denied(what: impl Into<String>) -> Self {
        SandboxError::PermissionDenied(what.into())
    }
}
