//! Structural-reference bounds pass.
//!
//! Runs before any dataflow analysis and rejects every out-of-range datatype,
//! function, variant, local, or type-parameter index, along with malformed
//! type shapes (references nested inside other types, wrong type-argument
//! arity). The deserializer upstream is expected to have rejected these
//! already; verifying them again means the rest of the verifier can index
//! declaration tables infallibly.

use verifier_types::{
    Diagnostic, ErrorKind, FunctionDef, FunctionIx, FunctionRef, Instruction, Module, Type,
};

/// Validate every structural reference in the module. An empty result means
/// later passes can index freely.
pub fn check_module(module: &Module) -> Vec<Diagnostic> {
    let mut diags = Vec::new();

    for decl in &module.datatypes {
        let n_params = decl.type_params.len();
        for variant in &decl.variants {
            for field in &variant.fields {
                if let Err(msg) = check_type(&field.ty, n_params, module, false) {
                    diags.push(Diagnostic::module_level(
                        &module.name,
                        ErrorKind::InvalidStructuralReference,
                        format!(
                            "field {}::{}.{}: {}",
                            decl.name, variant.name, field.name, msg
                        ),
                    ));
                }
            }
        }
    }

    for (index, function) in module.functions.iter().enumerate() {
        check_function(module, index as FunctionIx, function, &mut diags);
    }

    diags
}

fn check_function(
    module: &Module,
    index: FunctionIx,
    function: &FunctionDef,
    diags: &mut Vec<Diagnostic>,
) {
    let fref = FunctionRef {
        index,
        name: function.name.clone(),
    };
    let n_params = function.type_params.len();

    let signature_types = function
        .params
        .iter()
        .chain(&function.returns)
        .chain(&function.locals);
    for ty in signature_types {
        if let Err(msg) = check_type(ty, n_params, module, true) {
            diags.push(Diagnostic::function_level(
                &module.name,
                fref.clone(),
                ErrorKind::InvalidStructuralReference,
                format!("signature type {}: {}", ty, msg),
            ));
        }
    }

    for (offset, instr) in function.code.iter().enumerate() {
        if let Err(msg) = check_instruction(module, function, instr) {
            diags.push(Diagnostic::at(
                &module.name,
                fref.clone(),
                offset as u16,
                ErrorKind::InvalidStructuralReference,
                msg,
            ));
        }
    }
}

fn check_instruction(
    module: &Module,
    function: &FunctionDef,
    instr: &Instruction,
) -> Result<(), String> {
    match instr {
        Instruction::CopyLoc(local)
        | Instruction::MoveLoc(local)
        | Instruction::StLoc(local)
        | Instruction::BorrowLoc { local, .. } => {
            if *local as usize >= function.local_count() {
                return Err(format!(
                    "local index {} out of range (frame has {} slots)",
                    local,
                    function.local_count()
                ));
            }
            Ok(())
        }
        Instruction::Pack {
            datatype,
            type_args,
        }
        | Instruction::Unpack {
            datatype,
            type_args,
        }
        | Instruction::MoveTo {
            datatype,
            type_args,
        }
        | Instruction::MoveFrom {
            datatype,
            type_args,
        }
        | Instruction::BorrowGlobal {
            datatype,
            type_args,
            ..
        }
        | Instruction::ExistsGlobal {
            datatype,
            type_args,
        } => check_instantiation(module, function, *datatype, None, type_args),
        Instruction::PackVariant {
            datatype,
            variant,
            type_args,
        }
        | Instruction::UnpackVariant {
            datatype,
            variant,
            type_args,
        } => check_instantiation(module, function, *datatype, Some(*variant), type_args),
        Instruction::Call {
            function: callee,
            type_args,
        } => {
            let Some(callee_def) = module.functions.get(*callee as usize) else {
                return Err(format!("function index {} out of range", callee));
            };
            if type_args.len() != callee_def.type_params.len() {
                return Err(format!(
                    "call to {} expects {} type arguments, got {}",
                    callee_def.name,
                    callee_def.type_params.len(),
                    type_args.len()
                ));
            }
            for ty in type_args {
                check_type(ty, function.type_params.len(), module, false)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn check_instantiation(
    module: &Module,
    function: &FunctionDef,
    datatype: u16,
    variant: Option<u16>,
    type_args: &[Type],
) -> Result<(), String> {
    let Some(decl) = module.datatypes.get(datatype as usize) else {
        return Err(format!("datatype index {} out of range", datatype));
    };
    if let Some(variant) = variant {
        if variant as usize >= decl.variants.len() {
            return Err(format!(
                "variant index {} out of range for {} ({} variants)",
                variant,
                decl.name,
                decl.variants.len()
            ));
        }
    }
    if type_args.len() != decl.type_params.len() {
        return Err(format!(
            "{} expects {} type arguments, got {}",
            decl.name,
            decl.type_params.len(),
            type_args.len()
        ));
    }
    for ty in type_args {
        check_type(ty, function.type_params.len(), module, false)?;
    }
    Ok(())
}

/// Validate a type's structure. References are only legal at the top level
/// of function signatures (`allow_reference`), never nested inside vectors,
/// fields, or type arguments.
fn check_type(
    ty: &Type,
    n_type_params: usize,
    module: &Module,
    allow_reference: bool,
) -> Result<(), String> {
    match ty {
        Type::Bool | Type::U8 | Type::U64 | Type::U128 | Type::Address => Ok(()),
        Type::Vector(elem) => check_type(elem, n_type_params, module, false),
        Type::Reference { to, .. } => {
            if !allow_reference {
                return Err("reference type nested inside another type".to_string());
            }
            check_type(to, n_type_params, module, false)
        }
        Type::TypeParameter(i) => {
            if *i as usize >= n_type_params {
                Err(format!(
                    "type parameter T{} out of range ({} declared)",
                    i, n_type_params
                ))
            } else {
                Ok(())
            }
        }
        Type::Datatype {
            datatype,
            type_args,
        } => {
            let Some(decl) = module.datatypes.get(*datatype as usize) else {
                return Err(format!("datatype index {} out of range", datatype));
            };
            if type_args.len() != decl.type_params.len() {
                return Err(format!(
                    "{} expects {} type arguments, got {}",
                    decl.name,
                    decl.type_params.len(),
                    type_args.len()
                ));
            }
            for arg in type_args {
                check_type(arg, n_type_params, module, false)?;
            }
            Ok(())
        }
    }
}
