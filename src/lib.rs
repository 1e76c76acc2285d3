//! Static bytecode verifier.
//!
//! Checks modules of a resource-linear, reference-safe stack bytecode before
//! they are accepted for execution:
//!
//! - **Ability discipline**: values are only copied, dropped, stored, or used
//!   as global keys when their type carries the corresponding ability.
//! - **Reference safety**: borrows are tracked as alias sets; exclusive and
//!   shared access never overlap on the same storage.
//! - **Stack and local shape**: every path through a function leaves the
//!   operand stack and locals in a consistent, typed state.
//!
//! The analysis is a whole-function abstract interpretation; see
//! [`verifier_core`] for the passes and [`verifier_types`] for the module
//! format and diagnostics.

pub use verifier_core::{
    verify_module, ModuleEnv, VerificationOutcome, Verifier, VerifierConfig,
};
pub use verifier_types::{
    Ability, AbilitySet, Diagnostic, ErrorKind, FunctionDef, Instruction, Module, Severity, Type,
};
