//! Shared fixture builders for integration tests.

use verifier_types::{
    Ability, AbilitySet, DatatypeDecl, FieldDecl, FunctionDef, Instruction, Module, Type,
    VariantDecl,
};

pub fn module(
    name: &str,
    datatypes: Vec<DatatypeDecl>,
    functions: Vec<FunctionDef>,
) -> Module {
    Module {
        name: name.to_string(),
        datatypes,
        functions,
    }
}

/// A single-variant datatype with the given abilities and field types.
pub fn strukt(
    name: &str,
    abilities: impl IntoIterator<Item = Ability>,
    fields: Vec<(&str, Type)>,
) -> DatatypeDecl {
    DatatypeDecl {
        name: name.to_string(),
        abilities: AbilitySet::from_abilities(abilities),
        type_params: vec![],
        variants: vec![VariantDecl {
            name: name.to_string(),
            fields: fields
                .into_iter()
                .map(|(name, ty)| FieldDecl {
                    name: name.to_string(),
                    ty,
                })
                .collect(),
        }],
    }
}

pub fn function(
    name: &str,
    params: Vec<Type>,
    returns: Vec<Type>,
    locals: Vec<Type>,
    code: Vec<Instruction>,
) -> FunctionDef {
    FunctionDef {
        name: name.to_string(),
        type_params: vec![],
        params,
        returns,
        locals,
        code,
    }
}
