//! Shared types for the bytecode-verifier workspace.
//!
//! This crate provides the data model consumed by `verifier-core` and by
//! external harnesses that construct modules for verification:
//!
//! - [`ability`] - capability flags ([`Ability`], [`AbilitySet`]) carried by
//!   every declared datatype and derived for compound types
//! - [`ty`] - the structural [`Type`] representation
//! - [`module`] - module records: datatype declarations and function bodies
//! - [`instruction`] - the bytecode instruction set with pre-resolved branch
//!   targets
//! - [`diagnostics`] - verification findings and their stable ordering
//!
//! Everything here is plain data with serde derives so test harnesses can
//! feed JSON fixtures through the CLI or construct modules in code.

pub mod ability;
pub mod diagnostics;
pub mod instruction;
pub mod module;
pub mod ty;

pub use ability::{Ability, AbilitySet};
pub use diagnostics::{sort_diagnostics, Diagnostic, ErrorKind, FunctionRef, Severity};
pub use instruction::Instruction;
pub use module::{
    DatatypeDecl, DatatypeTypeParam, FieldDecl, FunctionDef, Module, VariantDecl,
};
pub use ty::Type;

/// Index of a datatype declaration within its module.
pub type DatatypeIx = u16;
/// Index of a function definition within its module.
pub type FunctionIx = u16;
/// Index of a local slot within a function frame (parameters first).
pub type LocalIx = u16;
/// Index of a field within a variant's declared field list.
pub type FieldIx = u16;
/// Index of a variant within a datatype declaration.
pub type VariantIx = u16;
/// Absolute instruction offset within a function body.
pub type CodeOffset = u16;
