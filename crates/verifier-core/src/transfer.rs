//! Transfer functions: the per-instruction safety rules.
//!
//! [`step`] consumes a fixed arity from the abstract stack, checks the
//! instruction's preconditions, and produces its result. A violation reports
//! exactly one finding; the driver rolls the state back to the
//! pre-instruction snapshot and continues scanning, except for `fatal`
//! violations (stack shape damage) which end the function's analysis.

use std::collections::BTreeSet;

use smallvec::SmallVec;

use crate::context::ModuleEnv;
use crate::state::{AbstractState, AliasTarget, LocalValue, PathElem, RefId, Root, StackValue};
use verifier_types::{
    Ability, AbilitySet, DatatypeIx, ErrorKind, FieldIx, FunctionDef, Instruction, LocalIx, Type,
    VariantIx,
};

/// One precondition failure.
#[derive(Debug, Clone)]
pub(crate) struct Violation {
    pub kind: ErrorKind,
    pub message: String,
    /// Fatal violations make further analysis of the function meaningless.
    pub fatal: bool,
}

impl Violation {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Violation {
            kind,
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(kind: ErrorKind, message: impl Into<String>) -> Self {
        Violation {
            kind,
            message: message.into(),
            fatal: true,
        }
    }
}

type StepResult = Result<(), Violation>;

/// Apply one instruction to the abstract state.
pub(crate) fn step(
    env: &ModuleEnv,
    function: &FunctionDef,
    state: &mut AbstractState,
    instr: &Instruction,
) -> StepResult {
    match instr {
        Instruction::Nop => Ok(()),
        Instruction::Pop => pop_and_discard(env, function, state),

        Instruction::LdTrue | Instruction::LdFalse => {
            state.push_value(Type::Bool);
            Ok(())
        }
        Instruction::LdU8(_) => {
            state.push_value(Type::U8);
            Ok(())
        }
        Instruction::LdU64(_) => {
            state.push_value(Type::U64);
            Ok(())
        }
        Instruction::LdU128(_) => {
            state.push_value(Type::U128);
            Ok(())
        }
        Instruction::LdAddr => {
            state.push_value(Type::Address);
            Ok(())
        }

        Instruction::CopyLoc(local) => copy_local(env, function, state, *local),
        Instruction::MoveLoc(local) => move_local(env, function, state, *local),
        Instruction::StLoc(local) => store_local(env, function, state, *local),
        Instruction::BorrowLoc { local, mutable } => {
            borrow_local(env, function, state, *local, *mutable)
        }
        Instruction::BorrowField { field, mutable } => {
            borrow_field(env, state, None, *field, *mutable)
        }
        Instruction::BorrowVariantField {
            variant,
            field,
            mutable,
        } => borrow_field(env, state, Some(*variant), *field, *mutable),
        Instruction::FreezeRef => freeze_ref(state),
        Instruction::ReadRef => read_ref(env, function, state),
        Instruction::WriteRef => write_ref(env, function, state),

        Instruction::Pack {
            datatype,
            type_args,
        } => pack(env, function, state, *datatype, None, type_args),
        Instruction::PackVariant {
            datatype,
            variant,
            type_args,
        } => pack(env, function, state, *datatype, Some(*variant), type_args),
        Instruction::Unpack {
            datatype,
            type_args,
        } => unpack(env, function, state, *datatype, None, type_args),
        Instruction::UnpackVariant {
            datatype,
            variant,
            type_args,
        } => unpack(env, function, state, *datatype, Some(*variant), type_args),

        Instruction::MoveTo {
            datatype,
            type_args,
        } => move_to(env, function, state, *datatype, type_args),
        Instruction::MoveFrom {
            datatype,
            type_args,
        } => move_from(env, function, state, *datatype, type_args),
        Instruction::BorrowGlobal {
            datatype,
            type_args,
            mutable,
        } => borrow_global(env, function, state, *datatype, type_args, *mutable),
        Instruction::ExistsGlobal {
            datatype,
            type_args,
        } => exists_global(env, function, state, *datatype, type_args),

        Instruction::Call {
            function: callee,
            type_args,
        } => call(env, function, state, *callee, type_args),

        Instruction::Add | Instruction::Sub => integer_binop(state, true),
        Instruction::Lt => integer_binop(state, false),
        Instruction::And | Instruction::Or => {
            pop_expecting(state, &Type::Bool)?;
            pop_expecting(state, &Type::Bool)?;
            state.push_value(Type::Bool);
            Ok(())
        }
        Instruction::Not => {
            pop_expecting(state, &Type::Bool)?;
            state.push_value(Type::Bool);
            Ok(())
        }
        Instruction::Eq | Instruction::Neq => equality(env, function, state),

        Instruction::Branch(_) => Ok(()),
        Instruction::BrTrue(_) | Instruction::BrFalse(_) => {
            pop_expecting(state, &Type::Bool)?;
            Ok(())
        }
        Instruction::Abort => {
            pop_expecting(state, &Type::U64)?;
            Ok(())
        }
        Instruction::Ret => ret(env, function, state),
    }
}

// =============================================================================
// Stack helpers
// =============================================================================

fn pop(state: &mut AbstractState) -> Result<StackValue, Violation> {
    state.pop().ok_or_else(|| {
        Violation::fatal(
            ErrorKind::StackHeightOrTypeMismatch,
            "operand stack underflow",
        )
    })
}

fn pop_expecting(state: &mut AbstractState, expected: &Type) -> Result<StackValue, Violation> {
    let value = pop(state)?;
    let actual = state.type_of(&value);
    if actual != *expected {
        return Err(Violation::fatal(
            ErrorKind::StackHeightOrTypeMismatch,
            format!("expected operand of type {}, found {}", expected, actual),
        ));
    }
    Ok(value)
}

fn pop_ref(state: &mut AbstractState) -> Result<RefId, Violation> {
    match pop(state)? {
        StackValue::Ref(id) => Ok(id),
        StackValue::Value(ty) => Err(Violation::fatal(
            ErrorKind::StackHeightOrTypeMismatch,
            format!("expected a reference operand, found {}", ty),
        )),
    }
}

fn local_type<'f>(function: &'f FunctionDef, local: LocalIx) -> Result<&'f Type, Violation> {
    function.local_type(local as usize).ok_or_else(|| {
        Violation::fatal(
            ErrorKind::InvalidStructuralReference,
            format!("local index {} out of range", local),
        )
    })
}

fn check_constraints(
    env: &ModuleEnv,
    function: &FunctionDef,
    constraints: &[AbilitySet],
    type_args: &[Type],
    target: &str,
) -> StepResult {
    for (k, (constraint, arg)) in constraints.iter().zip(type_args).enumerate() {
        let have = env.abilities_of(arg, &function.type_params);
        if !constraint.is_subset_of(have) {
            return Err(Violation::new(
                ErrorKind::ConstraintNotSatisfied,
                format!(
                    "type argument {} of {} is {} with abilities {}, but the declaration requires {}",
                    k, target, arg, have, constraint
                ),
            ));
        }
    }
    Ok(())
}

fn datatype_constraints(env: &ModuleEnv, datatype: DatatypeIx) -> SmallVec<[AbilitySet; 4]> {
    env.datatype(datatype)
        .type_params
        .iter()
        .map(|tp| tp.constraints)
        .collect()
}

// =============================================================================
// Locals
// =============================================================================

fn pop_and_discard(env: &ModuleEnv, function: &FunctionDef, state: &mut AbstractState) -> StepResult {
    match pop(state)? {
        StackValue::Ref(id) => {
            state.release_ref(id);
            Ok(())
        }
        StackValue::Value(ty) => {
            if !env.has_ability(&ty, Ability::Drop, &function.type_params) {
                return Err(Violation::new(
                    ErrorKind::UnusedValueWithoutDrop,
                    format!(
                        "cannot discard a value of type {} without the drop ability",
                        ty
                    ),
                ));
            }
            Ok(())
        }
    }
}

fn copy_local(
    env: &ModuleEnv,
    function: &FunctionDef,
    state: &mut AbstractState,
    local: LocalIx,
) -> StepResult {
    let declared = local_type(function, local)?.clone();
    match state.local(local) {
        LocalValue::Unavailable => Err(Violation::new(
            ErrorKind::UseOfMovedOrUnassignedValue,
            format!("copy of local {} which is moved or unassigned", local),
        )),
        LocalValue::Ref(id) => {
            let info = state.ref_info(id);
            if info.mutable {
                return Err(Violation::new(
                    ErrorKind::BorrowConflict,
                    format!(
                        "copying local {} would duplicate an exclusive reference",
                        local
                    ),
                ));
            }
            let (to, targets) = (info.to.clone(), info.targets.clone());
            state.push_new_ref(false, to, targets);
            Ok(())
        }
        LocalValue::Value => {
            if state.is_borrowed(Root::Local(local), true) {
                return Err(Violation::new(
                    ErrorKind::BorrowConflict,
                    format!("copy of local {} while it is exclusively borrowed", local),
                ));
            }
            if !env.has_ability(&declared, Ability::Copy, &function.type_params) {
                return Err(Violation::new(
                    ErrorKind::MissingCopyAbility,
                    format!(
                        "local {} of type {} lacks the copy ability",
                        local, declared
                    ),
                ));
            }
            state.push_value(declared);
            Ok(())
        }
    }
}

fn move_local(
    _env: &ModuleEnv,
    function: &FunctionDef,
    state: &mut AbstractState,
    local: LocalIx,
) -> StepResult {
    local_type(function, local)?;
    match state.local(local) {
        LocalValue::Unavailable => Err(Violation::new(
            ErrorKind::UseOfMovedOrUnassignedValue,
            format!("move of local {} which is moved or unassigned", local),
        )),
        LocalValue::Ref(id) => {
            state.push_existing_ref(id);
            state.set_local(local, LocalValue::Unavailable);
            Ok(())
        }
        LocalValue::Value => {
            if state.is_borrowed(Root::Local(local), false) {
                return Err(Violation::new(
                    ErrorKind::BorrowConflict,
                    format!(
                        "move of local {} would leave its outstanding borrows dangling",
                        local
                    ),
                ));
            }
            let declared = local_type(function, local)?.clone();
            state.push_value(declared);
            state.set_local(local, LocalValue::Unavailable);
            Ok(())
        }
    }
}

fn store_local(
    env: &ModuleEnv,
    function: &FunctionDef,
    state: &mut AbstractState,
    local: LocalIx,
) -> StepResult {
    let declared = local_type(function, local)?.clone();
    let value = pop(state)?;
    let actual = state.type_of(&value);
    if actual != declared {
        return Err(Violation::fatal(
            ErrorKind::StackHeightOrTypeMismatch,
            format!(
                "store of {} into local {} declared as {}",
                actual, local, declared
            ),
        ));
    }
    if state.is_borrowed(Root::Local(local), false) {
        return Err(Violation::new(
            ErrorKind::BorrowConflict,
            format!(
                "store into local {} would invalidate its outstanding borrows",
                local
            ),
        ));
    }
    match state.local(local) {
        LocalValue::Value
            if !env.has_ability(&declared, Ability::Drop, &function.type_params) =>
        {
            return Err(Violation::new(
                ErrorKind::UnusedValueWithoutDrop,
                format!(
                    "store would silently overwrite local {} of type {} which lacks the drop ability",
                    local, declared
                ),
            ));
        }
        LocalValue::Ref(old) => state.release_ref(old),
        _ => {}
    }
    let slot = match value {
        StackValue::Value(_) => LocalValue::Value,
        StackValue::Ref(id) => LocalValue::Ref(id),
    };
    state.set_local(local, slot);
    Ok(())
}

fn borrow_local(
    _env: &ModuleEnv,
    function: &FunctionDef,
    state: &mut AbstractState,
    local: LocalIx,
    mutable: bool,
) -> StepResult {
    let declared = local_type(function, local)?.clone();
    if declared.is_reference() {
        return Err(Violation::fatal(
            ErrorKind::StackHeightOrTypeMismatch,
            format!(
                "cannot borrow local {} which already holds a reference",
                local
            ),
        ));
    }
    if state.local(local) == LocalValue::Unavailable {
        return Err(Violation::new(
            ErrorKind::UseOfMovedOrUnassignedValue,
            format!("borrow of local {} which is moved or unassigned", local),
        ));
    }
    if mutable && state.is_borrowed(Root::Local(local), false) {
        return Err(Violation::new(
            ErrorKind::BorrowConflict,
            format!(
                "exclusive borrow of local {} which already has outstanding borrows",
                local
            ),
        ));
    }
    if !mutable && state.is_borrowed(Root::Local(local), true) {
        return Err(Violation::new(
            ErrorKind::BorrowConflict,
            format!(
                "shared borrow of local {} which is exclusively borrowed",
                local
            ),
        ));
    }
    state.push_new_ref(
        mutable,
        declared,
        BTreeSet::from([AliasTarget::root(Root::Local(local))]),
    );
    Ok(())
}

// =============================================================================
// References
// =============================================================================

fn borrow_field(
    env: &ModuleEnv,
    state: &mut AbstractState,
    variant: Option<VariantIx>,
    field: FieldIx,
    mutable: bool,
) -> StepResult {
    let id = pop_ref(state)?;
    let info = state.ref_info(id).clone();
    if mutable && !info.mutable {
        return Err(Violation::new(
            ErrorKind::BorrowConflict,
            "exclusive field borrow through a shared reference".to_string(),
        ));
    }
    let Type::Datatype {
        datatype,
        type_args,
    } = &info.to
    else {
        return Err(Violation::fatal(
            ErrorKind::StackHeightOrTypeMismatch,
            format!("field borrow on a reference to {}", info.to),
        ));
    };
    let decl = env.datatype(*datatype);

    let variant_ix = match variant {
        Some(v) => {
            if v as usize >= decl.variants.len() {
                return Err(Violation::new(
                    ErrorKind::InvalidStructuralReference,
                    format!("{} has no variant {}", decl.name, v),
                ));
            }
            v
        }
        None => {
            // without a variant check the field must exist identically on
            // every concrete layout
            if !decl.is_struct() && !env.field_common_to_all_variants(*datatype, field) {
                return Err(Violation::new(
                    ErrorKind::InvalidStructuralReference,
                    format!(
                        "field {} is not declared with one type in every variant of {}",
                        field, decl.name
                    ),
                ));
            }
            0
        }
    };
    let Some(field_ty) = env.field_type(*datatype, variant_ix, field, type_args) else {
        return Err(Violation::new(
            ErrorKind::InvalidStructuralReference,
            format!(
                "{} has no field {} in variant {}",
                decl.name, field, variant_ix
            ),
        ));
    };

    let elem = PathElem { variant, field };
    let targets = info.targets.iter().map(|t| t.extended(elem)).collect();
    state.release_ref(id);
    state.push_new_ref(mutable, field_ty, targets);
    Ok(())
}

fn freeze_ref(state: &mut AbstractState) -> StepResult {
    let id = pop_ref(state)?;
    if !state.ref_info(id).mutable {
        return Err(Violation::fatal(
            ErrorKind::StackHeightOrTypeMismatch,
            "freeze of a reference that is already shared",
        ));
    }
    state.ref_info_mut(id).mutable = false;
    state.push_existing_ref(id);
    Ok(())
}

fn read_ref(env: &ModuleEnv, function: &FunctionDef, state: &mut AbstractState) -> StepResult {
    let id = pop_ref(state)?;
    let to = state.ref_info(id).to.clone();
    if !env.has_ability(&to, Ability::Copy, &function.type_params) {
        return Err(Violation::new(
            ErrorKind::DereferenceOfNonCopyableType,
            format!(
                "dereference would duplicate a value of type {} which lacks the copy ability",
                to
            ),
        ));
    }
    state.release_ref(id);
    state.push_value(to);
    Ok(())
}

fn write_ref(env: &ModuleEnv, function: &FunctionDef, state: &mut AbstractState) -> StepResult {
    let id = pop_ref(state)?;
    let info = state.ref_info(id).clone();
    let value = pop(state)?;
    if !info.mutable {
        return Err(Violation::new(
            ErrorKind::BorrowConflict,
            "write through a shared reference".to_string(),
        ));
    }
    let actual = state.type_of(&value);
    if actual != info.to {
        return Err(Violation::fatal(
            ErrorKind::StackHeightOrTypeMismatch,
            format!("write of {} through a reference to {}", actual, info.to),
        ));
    }
    if !env.has_ability(&info.to, Ability::Drop, &function.type_params) {
        return Err(Violation::new(
            ErrorKind::UnusedValueWithoutDrop,
            format!(
                "write would silently overwrite a referent of type {} which lacks the drop ability",
                info.to
            ),
        ));
    }
    state.release_ref(id);
    Ok(())
}

// =============================================================================
// Datatypes
// =============================================================================

fn pack(
    env: &ModuleEnv,
    function: &FunctionDef,
    state: &mut AbstractState,
    datatype: DatatypeIx,
    variant: Option<VariantIx>,
    type_args: &[Type],
) -> StepResult {
    check_constraints(
        env,
        function,
        &datatype_constraints(env, datatype),
        type_args,
        &env.datatype(datatype).name,
    )?;
    let decl = env.datatype(datatype);
    let variant_decl = match variant {
        Some(v) => decl.variants.get(v as usize).ok_or_else(|| {
            Violation::new(
                ErrorKind::InvalidStructuralReference,
                format!("{} has no variant {}", decl.name, v),
            )
        })?,
        None => decl.as_struct().ok_or_else(|| {
            Violation::new(
                ErrorKind::InvalidStructuralReference,
                format!(
                    "{} is an enum; packing it requires a variant-specific instruction",
                    decl.name
                ),
            )
        })?,
    };
    // field values were pushed in declaration order, so the last one is on top
    for field in variant_decl.fields.iter().rev() {
        pop_expecting(state, &field.ty.subst(type_args))?;
    }
    state.push_value(Type::Datatype {
        datatype,
        type_args: type_args.to_vec(),
    });
    Ok(())
}

fn unpack(
    env: &ModuleEnv,
    function: &FunctionDef,
    state: &mut AbstractState,
    datatype: DatatypeIx,
    variant: Option<VariantIx>,
    type_args: &[Type],
) -> StepResult {
    check_constraints(
        env,
        function,
        &datatype_constraints(env, datatype),
        type_args,
        &env.datatype(datatype).name,
    )?;
    let decl = env.datatype(datatype);
    let variant_decl = match variant {
        Some(v) => decl.variants.get(v as usize).ok_or_else(|| {
            Violation::new(
                ErrorKind::InvalidStructuralReference,
                format!("{} has no variant {}", decl.name, v),
            )
        })?,
        None => decl.as_struct().ok_or_else(|| {
            Violation::new(
                ErrorKind::InvalidStructuralReference,
                format!(
                    "{} is an enum; unpacking it requires a variant-specific instruction",
                    decl.name
                ),
            )
        })?,
    };
    pop_expecting(
        state,
        &Type::Datatype {
            datatype,
            type_args: type_args.to_vec(),
        },
    )?;
    for field in &variant_decl.fields {
        state.push_value(field.ty.subst(type_args));
    }
    Ok(())
}

// =============================================================================
// Global storage
// =============================================================================

fn global_type(datatype: DatatypeIx, type_args: &[Type]) -> Type {
    Type::Datatype {
        datatype,
        type_args: type_args.to_vec(),
    }
}

fn require_key(
    env: &ModuleEnv,
    function: &FunctionDef,
    ty: &Type,
    operation: &str,
) -> StepResult {
    if !env.has_ability(ty, Ability::Key, &function.type_params) {
        return Err(Violation::new(
            ErrorKind::MissingKeyAbility,
            format!("{} on type {} which lacks the key ability", operation, ty),
        ));
    }
    Ok(())
}

fn move_to(
    env: &ModuleEnv,
    function: &FunctionDef,
    state: &mut AbstractState,
    datatype: DatatypeIx,
    type_args: &[Type],
) -> StepResult {
    let ty = global_type(datatype, type_args);
    require_key(env, function, &ty, "publish to global storage")?;
    check_constraints(
        env,
        function,
        &datatype_constraints(env, datatype),
        type_args,
        &env.datatype(datatype).name,
    )?;
    pop_expecting(state, &ty)?;
    pop_expecting(state, &Type::Address)?;
    if state.is_borrowed(Root::Global(datatype), false) {
        return Err(Violation::new(
            ErrorKind::BorrowConflict,
            format!(
                "publish into global storage of {} while it is borrowed",
                ty
            ),
        ));
    }
    Ok(())
}

fn move_from(
    env: &ModuleEnv,
    function: &FunctionDef,
    state: &mut AbstractState,
    datatype: DatatypeIx,
    type_args: &[Type],
) -> StepResult {
    let ty = global_type(datatype, type_args);
    require_key(env, function, &ty, "move from global storage")?;
    check_constraints(
        env,
        function,
        &datatype_constraints(env, datatype),
        type_args,
        &env.datatype(datatype).name,
    )?;
    pop_expecting(state, &Type::Address)?;
    if state.is_borrowed(Root::Global(datatype), false) {
        return Err(Violation::new(
            ErrorKind::BorrowConflict,
            format!(
                "move from global storage of {} while it is borrowed",
                ty
            ),
        ));
    }
    state.push_value(ty);
    Ok(())
}

fn borrow_global(
    env: &ModuleEnv,
    function: &FunctionDef,
    state: &mut AbstractState,
    datatype: DatatypeIx,
    type_args: &[Type],
    mutable: bool,
) -> StepResult {
    let ty = global_type(datatype, type_args);
    require_key(env, function, &ty, "borrow from global storage")?;
    check_constraints(
        env,
        function,
        &datatype_constraints(env, datatype),
        type_args,
        &env.datatype(datatype).name,
    )?;
    pop_expecting(state, &Type::Address)?;
    if state.is_borrowed(Root::Global(datatype), !mutable) {
        return Err(Violation::new(
            ErrorKind::BorrowConflict,
            format!(
                "{} borrow of global storage of {} which is already {} borrowed",
                if mutable { "exclusive" } else { "shared" },
                ty,
                if mutable { "" } else { "exclusively " }
            ),
        ));
    }
    state.push_new_ref(
        mutable,
        ty,
        BTreeSet::from([AliasTarget::root(Root::Global(datatype))]),
    );
    Ok(())
}

fn exists_global(
    env: &ModuleEnv,
    function: &FunctionDef,
    state: &mut AbstractState,
    datatype: DatatypeIx,
    type_args: &[Type],
) -> StepResult {
    let ty = global_type(datatype, type_args);
    require_key(env, function, &ty, "existence check in global storage")?;
    pop_expecting(state, &Type::Address)?;
    state.push_value(Type::Bool);
    Ok(())
}

// =============================================================================
// Calls
// =============================================================================

fn call(
    env: &ModuleEnv,
    function: &FunctionDef,
    state: &mut AbstractState,
    callee_ix: u16,
    type_args: &[Type],
) -> StepResult {
    let callee = env.function(callee_ix);
    check_constraints(env, function, &callee.type_params, type_args, &callee.name)?;

    // arguments were pushed left to right; pop right to left, remembering
    // what the reference arguments could alias
    let mut all_targets: BTreeSet<AliasTarget> = BTreeSet::new();
    let mut mutable_targets: BTreeSet<AliasTarget> = BTreeSet::new();
    for param in callee.params.iter().rev() {
        let expected = param.subst(type_args);
        let value = pop_expecting(state, &expected)?;
        if let StackValue::Ref(id) = value {
            let info = state.ref_info(id).clone();
            all_targets.extend(info.targets.iter().cloned());
            if info.mutable {
                mutable_targets.extend(info.targets.iter().cloned());
            }
            state.release_ref(id);
        }
    }

    let mut pushed_refs = false;
    for ret in &callee.returns {
        match ret.subst(type_args) {
            Type::Reference { mutable, to } => {
                // a returned reference can only point into what the caller
                // lent out; with no reference arguments its provenance is
                // unknown
                let pool = if mutable {
                    &mutable_targets
                } else {
                    &all_targets
                };
                let targets = if pool.is_empty() {
                    BTreeSet::from([AliasTarget::root(Root::Unknown)])
                } else {
                    pool.clone()
                };
                state.push_new_ref(mutable, *to, targets);
                pushed_refs = true;
            }
            ty => state.push_value(ty),
        }
    }

    if pushed_refs && state.conflicting_pair().is_some() {
        return Err(Violation::new(
            ErrorKind::BorrowConflict,
            format!(
                "references returned by {} overlap exclusively with outstanding borrows",
                callee.name
            ),
        ));
    }
    Ok(())
}

// =============================================================================
// Arithmetic and control
// =============================================================================

fn integer_binop(state: &mut AbstractState, preserves_type: bool) -> StepResult {
    let rhs = pop(state)?;
    let lhs = pop(state)?;
    let (lt, rt) = (state.type_of(&lhs), state.type_of(&rhs));
    if lt != rt || !lt.is_integer() {
        return Err(Violation::fatal(
            ErrorKind::StackHeightOrTypeMismatch,
            format!("arithmetic on operands of type {} and {}", lt, rt),
        ));
    }
    state.push_value(if preserves_type { lt } else { Type::Bool });
    Ok(())
}

fn equality(env: &ModuleEnv, function: &FunctionDef, state: &mut AbstractState) -> StepResult {
    let rhs = pop(state)?;
    let lhs = pop(state)?;
    let (lt, rt) = (state.type_of(&lhs), state.type_of(&rhs));
    if lt != rt {
        return Err(Violation::fatal(
            ErrorKind::StackHeightOrTypeMismatch,
            format!("equality between operands of type {} and {}", lt, rt),
        ));
    }
    match (lhs, rhs) {
        (StackValue::Ref(a), StackValue::Ref(b)) => {
            // compares the referents; the references themselves are released
            state.release_ref(a);
            state.release_ref(b);
        }
        (StackValue::Value(ty), _) => {
            if !env.has_ability(&ty, Ability::Drop, &function.type_params) {
                return Err(Violation::new(
                    ErrorKind::UnusedValueWithoutDrop,
                    format!(
                        "equality consumes operands of type {} which lacks the drop ability",
                        ty
                    ),
                ));
            }
        }
        _ => {}
    }
    state.push_value(Type::Bool);
    Ok(())
}

fn ret(env: &ModuleEnv, function: &FunctionDef, state: &mut AbstractState) -> StepResult {
    for expected in function.returns.iter().rev() {
        let value = pop_expecting(state, expected)?;
        if let StackValue::Ref(id) = value {
            let escapes_frame = state
                .ref_info(id)
                .targets
                .iter()
                .any(|t| matches!(t.root, Root::Local(_)));
            if escapes_frame {
                return Err(Violation::new(
                    ErrorKind::BorrowConflict,
                    "returning a reference rooted in a local of the exiting frame".to_string(),
                ));
            }
            state.release_ref(id);
        }
    }
    if !state.stack.is_empty() {
        return Err(Violation::fatal(
            ErrorKind::StackHeightOrTypeMismatch,
            format!(
                "operand stack holds {} extra values at return",
                state.stack.len()
            ),
        ));
    }
    for (i, slot) in state.locals.clone().into_iter().enumerate() {
        if slot != LocalValue::Value {
            continue;
        }
        let declared = local_type(function, i as LocalIx)?;
        if !env.has_ability(declared, Ability::Drop, &function.type_params) {
            return Err(Violation::new(
                ErrorKind::UnusedValueWithoutDrop,
                format!(
                    "local {} of type {} is still available at return and lacks the drop ability",
                    i, declared
                ),
            ));
        }
    }
    Ok(())
}
