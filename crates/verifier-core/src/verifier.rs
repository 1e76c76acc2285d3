//! Module-level verification entry points.
//!
//! A [`Verifier`] runs the structural bounds pass first and, only if the
//! module's indices are sound, analyzes every function body in parallel.
//! Diagnostics are sorted into the canonical (function, offset) order so the
//! output is identical across runs regardless of scheduling.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use rayon::prelude::*;
use tracing::debug;

use crate::bounds;
use crate::context::ModuleEnv;
use crate::driver;
use verifier_types::{
    sort_diagnostics, Diagnostic, ErrorKind, FunctionIx, Module, Severity,
};

/// Tunable verification behavior.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Severity assigned to unreachable-code findings.
    pub unreachable_severity: Severity,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        VerifierConfig {
            unreachable_severity: Severity::Advisory,
        }
    }
}

/// The result of verifying one module.
#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    pub module: String,
    /// Sorted by (function index, offset); module-level findings first.
    pub diagnostics: Vec<Diagnostic>,
}

impl VerificationOutcome {
    /// A module is accepted when no rejection-severity finding exists.
    /// Advisory findings do not block acceptance.
    pub fn accepted(&self) -> bool {
        !self.diagnostics.iter().any(|d| d.is_rejection())
    }

    pub fn rejections(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_rejection())
    }

    pub fn advisories(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| !d.is_rejection())
    }
}

pub struct Verifier {
    config: VerifierConfig,
}

impl Verifier {
    pub fn new(config: VerifierConfig) -> Self {
        Verifier { config }
    }

    /// Verify a single module.
    ///
    /// Functions are independent (cross-function effects flow only through
    /// declared signatures), so their bodies are analyzed in parallel.
    pub fn verify_module(&self, module: &Module) -> VerificationOutcome {
        debug!(
            module = %module.name,
            datatypes = module.datatypes.len(),
            functions = module.functions.len(),
            "verifying module"
        );

        // every later pass indexes into the module unchecked, so a module
        // with out-of-range indices stops here
        let structural = bounds::check_module(module);
        if !structural.is_empty() {
            let mut diagnostics = structural;
            sort_diagnostics(&mut diagnostics);
            return VerificationOutcome {
                module: module.name.clone(),
                diagnostics,
            };
        }

        let env = ModuleEnv::new(module);
        let mut diagnostics: Vec<Diagnostic> = module
            .functions
            .par_iter()
            .enumerate()
            .flat_map_iter(|(i, f)| driver::verify_function(&env, &self.config, i as FunctionIx, f))
            .collect();
        sort_diagnostics(&mut diagnostics);

        debug!(
            module = %module.name,
            findings = diagnostics.len(),
            "module verification finished"
        );
        VerificationOutcome {
            module: module.name.clone(),
            diagnostics,
        }
    }

    /// Verify several modules, preserving input order in the results.
    pub fn verify_batch(&self, modules: &[Module]) -> Vec<VerificationOutcome> {
        modules
            .par_iter()
            .map(|module| self.verify_module(module))
            .collect()
    }

    /// Verify a module with a wall-clock budget.
    ///
    /// When the budget elapses the module is rejected with a single
    /// [`ErrorKind::VerificationTimedOut`] finding instead of blocking the
    /// caller. The analysis thread is detached and finishes on its own.
    pub fn verify_module_with_timeout(
        &self,
        module: &Module,
        timeout: Duration,
    ) -> VerificationOutcome {
        let (tx, rx) = mpsc::channel();
        let owned = module.clone();
        let config = self.config.clone();
        thread::spawn(move || {
            let outcome = Verifier::new(config).verify_module(&owned);
            // the receiver may have given up already
            let _ = tx.send(outcome);
        });
        match rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(_) => VerificationOutcome {
                module: module.name.clone(),
                diagnostics: vec![Diagnostic::module_level(
                    &module.name,
                    ErrorKind::VerificationTimedOut,
                    format!("verification did not finish within {:?}", timeout),
                )],
            },
        }
    }
}

/// Verify a module with default settings.
///
/// Convenience for callers that only care about accept/reject.
pub fn verify_module(module: &Module) -> Result<(), Vec<Diagnostic>> {
    let outcome = Verifier::new(VerifierConfig::default()).verify_module(module);
    if outcome.accepted() {
        Ok(())
    } else {
        Err(outcome.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verifier_types::Instruction::*;
    use verifier_types::{FunctionDef, Type};

    fn leaf(name: &str, code: Vec<verifier_types::Instruction>) -> FunctionDef {
        FunctionDef {
            name: name.to_string(),
            type_params: vec![],
            params: vec![],
            returns: vec![],
            locals: vec![],
            code,
        }
    }

    fn module(functions: Vec<FunctionDef>) -> Module {
        Module {
            name: "m".to_string(),
            datatypes: vec![],
            functions,
        }
    }

    #[test]
    fn test_accepts_well_formed_module() {
        let m = module(vec![
            leaf("a", vec![Ret]),
            leaf("b", vec![LdU64(1), Pop, Ret]),
        ]);
        assert!(verify_module(&m).is_ok());
    }

    #[test]
    fn test_diagnostics_are_sorted_and_deterministic() {
        let mut later = leaf("later", vec![LdU64(1), Pop, MoveLoc(0), Ret]);
        later.locals = vec![Type::U64];
        let m = module(vec![
            later,
            leaf("earlier", vec![Nop, Ret]),
            leaf("bad", vec![LdU64(1), Pop]),
        ]);
        let verifier = Verifier::new(VerifierConfig::default());
        let first = verifier.verify_module(&m);
        let second = verifier.verify_module(&m);
        assert_eq!(first.diagnostics, second.diagnostics);

        // sorted by function index, module/function-level findings before
        // offset-level ones within a function
        let indices: Vec<_> = first
            .diagnostics
            .iter()
            .map(|d| d.function.as_ref().map(|f| f.index))
            .collect();
        let mut sorted = indices.clone();
        sorted.sort();
        assert_eq!(indices, sorted);
    }

    #[test]
    fn test_bounds_failure_preempts_body_analysis() {
        // MoveLoc(5) names a local that does not exist; the body pass would
        // also fall off the end, but only the structural finding surfaces
        let m = module(vec![leaf("f", vec![MoveLoc(5), Pop])]);
        let outcome = Verifier::new(VerifierConfig::default()).verify_module(&m);
        assert!(!outcome.accepted());
        assert!(outcome
            .diagnostics
            .iter()
            .all(|d| d.kind == ErrorKind::InvalidStructuralReference));
    }

    #[test]
    fn test_advisories_do_not_block_acceptance() {
        let m = module(vec![leaf("f", vec![Ret, Nop, Ret])]);
        let outcome = Verifier::new(VerifierConfig::default()).verify_module(&m);
        assert!(outcome.accepted());
        assert_eq!(outcome.advisories().count(), 1);
        assert_eq!(outcome.rejections().count(), 0);

        let strict = Verifier::new(VerifierConfig {
            unreachable_severity: Severity::Rejection,
        });
        assert!(!strict.verify_module(&m).accepted());
    }

    #[test]
    fn test_batch_preserves_input_order() {
        let modules = vec![
            Module {
                name: "zeta".to_string(),
                datatypes: vec![],
                functions: vec![leaf("f", vec![Ret])],
            },
            Module {
                name: "alpha".to_string(),
                datatypes: vec![],
                functions: vec![leaf("g", vec![LdU64(1), Ret])],
            },
        ];
        let outcomes = Verifier::new(VerifierConfig::default()).verify_batch(&modules);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].module, "zeta");
        assert!(outcomes[0].accepted());
        assert_eq!(outcomes[1].module, "alpha");
        assert!(!outcomes[1].accepted());
    }

    #[test]
    fn test_timeout_path_returns_outcome() {
        let m = module(vec![leaf("f", vec![Ret])]);
        let outcome = Verifier::new(VerifierConfig::default())
            .verify_module_with_timeout(&m, Duration::from_secs(5));
        assert!(outcome.accepted());
    }

    #[test]
    fn test_rejection_carries_all_findings() {
        let mut f = leaf("f", vec![LdU64(1), StLoc(0), MoveLoc(0), Pop, MoveLoc(0), Ret]);
        f.locals = vec![Type::U64];
        let err = verify_module(&module(vec![f])).unwrap_err();
        assert!(err
            .iter()
            .any(|d| d.kind == ErrorKind::UseOfMovedOrUnassignedValue));
    }
}
