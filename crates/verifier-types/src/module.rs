//! Module records: the verifier's input.
//!
//! A [`Module`] bundles datatype declarations (with their declared ability
//! sets, established by the upstream ability checker) and function
//! definitions whose bodies are instruction streams with branch targets
//! already resolved to absolute offsets. Deserialization-format validation is
//! an upstream concern; this is the already-parsed shape.

use crate::ability::AbilitySet;
use crate::instruction::Instruction;
use crate::ty::Type;
use serde::{Deserialize, Serialize};

/// A complete module: the unit of verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    #[serde(default)]
    pub datatypes: Vec<DatatypeDecl>,
    #[serde(default)]
    pub functions: Vec<FunctionDef>,
}

/// A declared struct or enum.
///
/// A struct is the single-variant case; enums declare two or more variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatatypeDecl {
    pub name: String,
    /// Declared ability set, as established by the upstream ability checker.
    #[serde(default)]
    pub abilities: AbilitySet,
    #[serde(default)]
    pub type_params: Vec<DatatypeTypeParam>,
    pub variants: Vec<VariantDecl>,
}

impl DatatypeDecl {
    pub fn is_struct(&self) -> bool {
        self.variants.len() == 1
    }

    /// The sole variant of a struct, `None` for enums.
    pub fn as_struct(&self) -> Option<&VariantDecl> {
        if self.is_struct() {
            self.variants.first()
        } else {
            None
        }
    }
}

/// A formal type parameter of a datatype declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatatypeTypeParam {
    /// Abilities every instantiation argument must carry.
    #[serde(default)]
    pub constraints: AbilitySet,
    /// Phantom parameters do not participate in derived-ability computation.
    #[serde(default)]
    pub is_phantom: bool,
}

/// One variant of a datatype (the only variant, for structs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantDecl {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
}

/// A declared field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: Type,
}

/// A function definition.
///
/// The frame's local slots are the parameters followed by the extra declared
/// locals; parameters start Available, everything else Unavailable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    /// Ability constraints, one per formal type parameter.
    #[serde(default)]
    pub type_params: Vec<AbilitySet>,
    #[serde(default)]
    pub params: Vec<Type>,
    #[serde(default)]
    pub returns: Vec<Type>,
    /// Extra local slots beyond the parameters.
    #[serde(default)]
    pub locals: Vec<Type>,
    pub code: Vec<Instruction>,
}

impl FunctionDef {
    /// Total number of local slots (parameters + extra locals).
    pub fn local_count(&self) -> usize {
        self.params.len() + self.locals.len()
    }

    /// Declared type of a local slot, parameters first.
    pub fn local_type(&self, index: usize) -> Option<&Type> {
        if index < self.params.len() {
            self.params.get(index)
        } else {
            self.locals.get(index - self.params.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ability::Ability;

    fn point_decl() -> DatatypeDecl {
        DatatypeDecl {
            name: "Point".to_string(),
            abilities: AbilitySet::from_abilities([Ability::Copy, Ability::Drop]),
            type_params: vec![],
            variants: vec![VariantDecl {
                name: "Point".to_string(),
                fields: vec![
                    FieldDecl {
                        name: "x".to_string(),
                        ty: Type::U64,
                    },
                    FieldDecl {
                        name: "y".to_string(),
                        ty: Type::U64,
                    },
                ],
            }],
        }
    }

    #[test]
    fn test_struct_vs_enum() {
        let s = point_decl();
        assert!(s.is_struct());
        assert_eq!(s.as_struct().unwrap().fields.len(), 2);

        let e = DatatypeDecl {
            name: "Option".to_string(),
            abilities: AbilitySet::EMPTY,
            type_params: vec![],
            variants: vec![
                VariantDecl {
                    name: "None".to_string(),
                    fields: vec![],
                },
                VariantDecl {
                    name: "Some".to_string(),
                    fields: vec![FieldDecl {
                        name: "value".to_string(),
                        ty: Type::U64,
                    }],
                },
            ],
        };
        assert!(!e.is_struct());
        assert!(e.as_struct().is_none());
    }

    #[test]
    fn test_local_slot_layout() {
        let f = FunctionDef {
            name: "f".to_string(),
            type_params: vec![],
            params: vec![Type::U64, Type::Bool],
            returns: vec![],
            locals: vec![Type::Address],
            code: vec![Instruction::Ret],
        };
        assert_eq!(f.local_count(), 3);
        assert_eq!(f.local_type(0), Some(&Type::U64));
        assert_eq!(f.local_type(1), Some(&Type::Bool));
        assert_eq!(f.local_type(2), Some(&Type::Address));
        assert_eq!(f.local_type(3), None);
    }

    #[test]
    fn test_json_fixture_roundtrip() {
        let module = Module {
            name: "fixtures".to_string(),
            datatypes: vec![point_decl()],
            functions: vec![FunctionDef {
                name: "noop".to_string(),
                type_params: vec![],
                params: vec![],
                returns: vec![],
                locals: vec![],
                code: vec![Instruction::Ret],
            }],
        };
        let json = serde_json::to_string_pretty(&module).unwrap();
        let back: Module = serde_json::from_str(&json).unwrap();
        assert_eq!(back, module);
    }
}
