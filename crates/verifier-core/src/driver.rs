//! Per-function fixed-point driver.
//!
//! Worklist traversal of the control-flow graph: each block's instructions
//! are interpreted abstractly against its current entry state, the exit
//! state is propagated to every successor, and a successor re-enters the
//! worklist only when the merge changed its entry state. Local statuses and
//! alias sets move monotonically through a finite lattice, so the fixed
//! point arrives within a number of merges bounded by blocks × instructions.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::cfg::ControlFlowGraph;
use crate::context::ModuleEnv;
use crate::state::{AbstractState, MergeOutcome};
use crate::transfer::step;
use crate::verifier::VerifierConfig;
use verifier_types::{CodeOffset, Diagnostic, ErrorKind, FunctionDef, FunctionIx, FunctionRef};

pub(crate) fn verify_function(
    env: &ModuleEnv,
    config: &VerifierConfig,
    index: FunctionIx,
    function: &FunctionDef,
) -> Vec<Diagnostic> {
    let module_name = &env.module().name;
    let fref = FunctionRef {
        index,
        name: function.name.clone(),
    };
    let mut diags = Vec::new();

    let cfg = match ControlFlowGraph::build(&function.code) {
        Ok(cfg) => cfg,
        Err(message) => {
            diags.push(Diagnostic::function_level(
                module_name,
                fref,
                ErrorKind::MalformedControlFlow,
                message,
            ));
            return diags;
        }
    };
    debug!(
        function = %function.name,
        blocks = cfg.num_blocks(),
        instructions = function.code.len(),
        "verifying function"
    );

    let mut entry_states: Vec<Option<AbstractState>> = vec![None; cfg.num_blocks()];
    let mut visited = vec![false; cfg.num_blocks()];
    let mut conflict_reported = vec![false; cfg.num_blocks()];
    // blocks are re-interpreted every time their entry state changes; a
    // violation is reported only the first time its (offset, kind) surfaces
    let mut reported: BTreeSet<(CodeOffset, ErrorKind)> = BTreeSet::new();
    let mut initial = AbstractState::entry(function);
    initial.canonicalize();
    entry_states[ControlFlowGraph::ENTRY] = Some(initial);

    let mut worklist: BTreeSet<usize> = BTreeSet::from([ControlFlowGraph::ENTRY]);
    // the lattice guarantees convergence; the budget only guards against a
    // bug in the merge turning into an infinite loop
    let merge_budget = (cfg.num_blocks() + 1) * (function.code.len() + 1) * 4;
    let mut merge_steps = 0usize;

    while let Some(block) = worklist.pop_first() {
        visited[block] = true;
        let Some(mut state) = entry_states[block].clone() else {
            continue;
        };

        for (offset, instr) in cfg.instructions(&function.code, block) {
            let snapshot = state.clone();
            if let Err(violation) = step(env, function, &mut state, instr) {
                if reported.insert((offset, violation.kind)) {
                    diags.push(Diagnostic::at(
                        module_name,
                        fref.clone(),
                        offset,
                        violation.kind,
                        violation.message,
                    ));
                }
                if violation.fatal {
                    debug!(
                        function = %function.name,
                        offset,
                        "stack shape damaged, abandoning function analysis"
                    );
                    return diags;
                }
                // recover by treating the faulted instruction as a no-op so
                // one pass can surface further independent findings
                state = snapshot;
            }
        }

        state.canonicalize();
        for &succ in &cfg.block(block).successors {
            merge_steps += 1;
            if merge_steps > merge_budget {
                warn!(
                    function = %function.name,
                    merge_steps,
                    "merge budget exhausted without convergence"
                );
                return diags;
            }
            match &mut entry_states[succ] {
                slot @ None => {
                    *slot = Some(state.clone());
                    worklist.insert(succ);
                }
                Some(existing) => match existing.merge_from(&state) {
                    MergeOutcome::Unchanged => {}
                    MergeOutcome::Changed => {
                        if existing.conflicting_pair().is_some() && !conflict_reported[succ] {
                            conflict_reported[succ] = true;
                            diags.push(Diagnostic::at(
                                module_name,
                                fref.clone(),
                                cfg.block(succ).start,
                                ErrorKind::BorrowConflict,
                                "incompatible exclusive and outstanding borrows of the same \
                                 storage reach this point along different paths",
                            ));
                        }
                        worklist.insert(succ);
                    }
                    MergeOutcome::Mismatch(message) => {
                        diags.push(Diagnostic::at(
                            module_name,
                            fref.clone(),
                            cfg.block(succ).start,
                            ErrorKind::StackHeightOrTypeMismatch,
                            message,
                        ));
                        return diags;
                    }
                },
            }
        }
    }

    for (id, reached) in visited.iter().enumerate() {
        if !reached {
            diags.push(
                Diagnostic::at(
                    module_name,
                    fref.clone(),
                    cfg.block(id).start,
                    ErrorKind::UnreachableCode,
                    "no execution path reaches this block",
                )
                .with_severity(config.unreachable_severity),
            );
        }
    }

    debug!(
        function = %function.name,
        merge_steps,
        findings = diags.len(),
        "function analysis reached a fixed point"
    );
    diags
}
