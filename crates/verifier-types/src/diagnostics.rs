//! Verification findings.
//!
//! A [`Diagnostic`] locates one finding: module, function, instruction offset
//! (or function/module level), the [`ErrorKind`], and a human-readable
//! detail. A module's overall result is a list of diagnostics in stable
//! (function index, offset) order; empty or advisory-only means accepted.

use crate::{CodeOffset, FunctionIx};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The category of a verification finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Error, Serialize, Deserialize)]
pub enum ErrorKind {
    #[error("malformed control flow")]
    MalformedControlFlow,
    #[error("unreachable code")]
    UnreachableCode,
    #[error("stack height or type mismatch")]
    StackHeightOrTypeMismatch,
    #[error("use of moved or unassigned value")]
    UseOfMovedOrUnassignedValue,
    #[error("missing copy ability")]
    MissingCopyAbility,
    #[error("missing key ability")]
    MissingKeyAbility,
    #[error("type argument constraint not satisfied")]
    ConstraintNotSatisfied,
    #[error("unused value without drop ability")]
    UnusedValueWithoutDrop,
    #[error("dereference of non-copyable type")]
    DereferenceOfNonCopyableType,
    #[error("borrow conflict")]
    BorrowConflict,
    #[error("invalid structural reference")]
    InvalidStructuralReference,
    #[error("verification timed out")]
    VerificationTimedOut,
}

impl ErrorKind {
    /// The severity this kind carries unless the verifier is configured
    /// otherwise. Only unreachable code is advisory by default.
    pub fn default_severity(self) -> Severity {
        match self {
            ErrorKind::UnreachableCode => Severity::Advisory,
            _ => Severity::Rejection,
        }
    }
}

/// Whether a finding blocks acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Reported, but does not block acceptance.
    Advisory,
    /// The module must not be accepted for execution.
    Rejection,
}

/// The function a diagnostic points into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRef {
    pub index: FunctionIx,
    pub name: String,
}

/// One located verification finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub module: String,
    /// `None` for module-level findings (e.g. a timeout).
    pub function: Option<FunctionRef>,
    /// `None` for function-level findings (e.g. malformed control flow).
    pub offset: Option<CodeOffset>,
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    /// A finding at a specific instruction.
    pub fn at(
        module: impl Into<String>,
        function: FunctionRef,
        offset: CodeOffset,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Diagnostic {
            module: module.into(),
            function: Some(function),
            offset: Some(offset),
            kind,
            severity: kind.default_severity(),
            message: message.into(),
        }
    }

    /// A finding attached to a whole function.
    pub fn function_level(
        module: impl Into<String>,
        function: FunctionRef,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Diagnostic {
            module: module.into(),
            function: Some(function),
            offset: None,
            kind,
            severity: kind.default_severity(),
            message: message.into(),
        }
    }

    /// A finding attached to the whole module.
    pub fn module_level(module: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Diagnostic {
            module: module.into(),
            function: None,
            offset: None,
            kind,
            severity: kind.default_severity(),
            message: message.into(),
        }
    }

    /// Override the default severity for this kind.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Whether this finding blocks acceptance.
    pub fn is_rejection(&self) -> bool {
        self.severity == Severity::Rejection
    }

    /// Stable ordering key: module-level first, then function-level findings
    /// before per-instruction ones within each function.
    fn sort_key(&self) -> (Option<FunctionIx>, Option<CodeOffset>) {
        (self.function.as_ref().map(|f| f.index), self.offset)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.module)?;
        if let Some(func) = &self.function {
            write!(f, "::{}", func.name)?;
        }
        if let Some(offset) = self.offset {
            write!(f, " @{}", offset)?;
        }
        write!(f, ": {}: {}", self.kind, self.message)
    }
}

/// Restore deterministic output order after parallel verification.
pub fn sort_diagnostics(diagnostics: &mut [Diagnostic]) {
    diagnostics.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}
