//! Static analysis passes over bytecode modules.
//!
//! Verification runs in two stages:
//!
//! 1. **Structural bounds**: every index an instruction or declaration
//!    carries must resolve inside the module, and every generic
//!    instantiation must match its declared arity. Nothing later in the
//!    pipeline re-checks indices.
//! 2. **Abstract interpretation**: each function
//!    body is executed symbolically over its control-flow graph, tracking
//!    operand types, local availability, and reference aliasing, merging
//!    states at join points until a fixed point.
//!
//! The public surface is [`Verifier`] (configurable, batch and timeout
//! variants) and the [`verify_module`] convenience function.

mod bounds;
mod cfg;
mod context;
mod driver;
mod state;
mod transfer;
mod verifier;

pub use context::ModuleEnv;
pub use verifier::{verify_module, VerificationOutcome, Verifier, VerifierConfig};
