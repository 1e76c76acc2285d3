//! The bytecode instruction set.
//!
//! Branch targets are absolute instruction offsets, already resolved by the
//! upstream deserializer. Type-carrying instructions embed their concrete
//! type arguments; the verifier checks instantiation constraints at each
//! occurrence.

use crate::ty::Type;
use crate::{CodeOffset, DatatypeIx, FieldIx, FunctionIx, LocalIx, VariantIx};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    Nop,
    /// Discard the top of the stack. Values need `drop`; references are
    /// released instead.
    Pop,

    LdTrue,
    LdFalse,
    LdU8(u8),
    LdU64(u64),
    LdU128(u128),
    /// Push an address constant. The concrete address payload lives in the
    /// module's constant pool upstream; only the type matters here.
    LdAddr,

    /// Duplicate a local's value onto the stack (requires `copy`).
    CopyLoc(LocalIx),
    /// Move a local's value onto the stack, leaving the slot unavailable.
    MoveLoc(LocalIx),
    /// Pop a value into a local slot.
    StLoc(LocalIx),

    /// Push a reference rooted at a local slot.
    BorrowLoc { local: LocalIx, mutable: bool },
    /// Replace a datatype reference with a reference to one of its fields.
    /// On enums the field must exist with the same type in every variant.
    BorrowField { field: FieldIx, mutable: bool },
    /// Variant-checked field borrow on an enum reference.
    BorrowVariantField {
        variant: VariantIx,
        field: FieldIx,
        mutable: bool,
    },
    /// Convert an exclusive reference into a shared one.
    FreezeRef,
    /// Load the referent (requires `copy` on the referent type).
    ReadRef,
    /// Store through an exclusive reference (requires `drop` on the referent
    /// type, since the previous value is discarded).
    WriteRef,

    /// Construct a struct from its fields (no ability required).
    Pack {
        datatype: DatatypeIx,
        #[serde(default)]
        type_args: Vec<Type>,
    },
    /// Destructure a struct into its fields (no ability required).
    Unpack {
        datatype: DatatypeIx,
        #[serde(default)]
        type_args: Vec<Type>,
    },
    /// Construct a specific enum variant.
    PackVariant {
        datatype: DatatypeIx,
        variant: VariantIx,
        #[serde(default)]
        type_args: Vec<Type>,
    },
    /// Destructure a specific enum variant.
    UnpackVariant {
        datatype: DatatypeIx,
        variant: VariantIx,
        #[serde(default)]
        type_args: Vec<Type>,
    },

    /// Publish a value into global storage at a popped address (requires
    /// `key`). Stack: `.., address, value -> ..`
    MoveTo {
        datatype: DatatypeIx,
        #[serde(default)]
        type_args: Vec<Type>,
    },
    /// Remove a value from global storage at a popped address (requires
    /// `key`).
    MoveFrom {
        datatype: DatatypeIx,
        #[serde(default)]
        type_args: Vec<Type>,
    },
    /// Push a reference into global storage at a popped address (requires
    /// `key`).
    BorrowGlobal {
        datatype: DatatypeIx,
        #[serde(default)]
        type_args: Vec<Type>,
        mutable: bool,
    },
    /// Pop an address, push whether storage holds a value of the type
    /// (requires `key`).
    ExistsGlobal {
        datatype: DatatypeIx,
        #[serde(default)]
        type_args: Vec<Type>,
    },

    /// Call another function in this module by index.
    Call {
        function: FunctionIx,
        #[serde(default)]
        type_args: Vec<Type>,
    },

    Add,
    Sub,
    Lt,
    And,
    Or,
    Not,
    /// Structural equality; consumes both operands, so they need `drop`.
    Eq,
    Neq,

    Branch(CodeOffset),
    BrTrue(CodeOffset),
    BrFalse(CodeOffset),
    /// Pop a `u64` abort code and terminate the path.
    Abort,
    Ret,
}

impl Instruction {
    /// Whether control never falls through to the next instruction.
    pub fn is_unconditional_exit(&self) -> bool {
        matches!(
            self,
            Instruction::Branch(_) | Instruction::Abort | Instruction::Ret
        )
    }

    /// Explicit branch target, if any.
    pub fn branch_target(&self) -> Option<CodeOffset> {
        match self {
            Instruction::Branch(t) | Instruction::BrTrue(t) | Instruction::BrFalse(t) => Some(*t),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_classification() {
        assert!(Instruction::Ret.is_unconditional_exit());
        assert!(Instruction::Abort.is_unconditional_exit());
        assert!(Instruction::Branch(0).is_unconditional_exit());
        assert!(!Instruction::BrTrue(0).is_unconditional_exit());
        assert!(!Instruction::Pop.is_unconditional_exit());
    }

    #[test]
    fn test_branch_targets() {
        assert_eq!(Instruction::Branch(7).branch_target(), Some(7));
        assert_eq!(Instruction::BrFalse(2).branch_target(), Some(2));
        assert_eq!(Instruction::Ret.branch_target(), None);
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_string(&Instruction::CopyLoc(3)).unwrap();
        assert_eq!(json, r#"{"CopyLoc":3}"#);
        let json = serde_json::to_string(&Instruction::Nop).unwrap();
        assert_eq!(json, r#""Nop""#);
        let borrow: Instruction =
            serde_json::from_str(r#"{"BorrowLoc":{"local":1,"mutable":true}}"#).unwrap();
        assert_eq!(
            borrow,
            Instruction::BorrowLoc {
                local: 1,
                mutable: true
            }
        );
    }
}
