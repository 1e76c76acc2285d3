//! The structural type representation.
//!
//! Types are compared structurally (tag + payload), never by name. Datatype
//! payloads carry the declaration index and the concrete type arguments of
//! the instantiation; `TypeParameter` refers into the enclosing declaration's
//! type-parameter list and is eliminated by [`Type::subst`] when a generic
//! declaration is instantiated.

use crate::DatatypeIx;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A bytecode-level type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Type {
    Bool,
    U8,
    U64,
    U128,
    Address,
    /// Homogeneous growable sequence.
    Vector(Box<Type>),
    /// An instantiation of a declared struct or enum.
    Datatype {
        datatype: DatatypeIx,
        #[serde(default)]
        type_args: Vec<Type>,
    },
    /// A reference into a local, a field, or global storage.
    Reference {
        mutable: bool,
        to: Box<Type>,
    },
    /// A formal type parameter of the enclosing declaration.
    TypeParameter(u16),
}

impl Type {
    /// Shorthand for a non-generic datatype instantiation.
    pub fn datatype(datatype: DatatypeIx) -> Type {
        Type::Datatype {
            datatype,
            type_args: Vec::new(),
        }
    }

    /// Shorthand for a reference type.
    pub fn reference(mutable: bool, to: Type) -> Type {
        Type::Reference {
            mutable,
            to: Box::new(to),
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Type::Reference { .. })
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::U8 | Type::U64 | Type::U128)
    }

    /// Substitute type parameters with the given arguments.
    ///
    /// Out-of-range parameter indices are left in place; the verifier's
    /// bounds pass rejects them before any substitution happens.
    pub fn subst(&self, type_args: &[Type]) -> Type {
        match self {
            Type::Bool | Type::U8 | Type::U64 | Type::U128 | Type::Address => self.clone(),
            Type::Vector(elem) => Type::Vector(Box::new(elem.subst(type_args))),
            Type::Datatype {
                datatype,
                type_args: inner,
            } => Type::Datatype {
                datatype: *datatype,
                type_args: inner.iter().map(|t| t.subst(type_args)).collect(),
            },
            Type::Reference { mutable, to } => Type::Reference {
                mutable: *mutable,
                to: Box::new(to.subst(type_args)),
            },
            Type::TypeParameter(i) => type_args
                .get(*i as usize)
                .cloned()
                .unwrap_or_else(|| self.clone()),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::U8 => write!(f, "u8"),
            Type::U64 => write!(f, "u64"),
            Type::U128 => write!(f, "u128"),
            Type::Address => write!(f, "address"),
            Type::Vector(elem) => write!(f, "vector<{}>", elem),
            Type::Datatype {
                datatype,
                type_args,
            } => {
                write!(f, "datatype#{}", datatype)?;
                if !type_args.is_empty() {
                    write!(f, "<")?;
                    for (i, t) in type_args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", t)?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            Type::Reference { mutable, to } => {
                write!(f, "&{}{}", if *mutable { "mut " } else { "" }, to)
            }
            Type::TypeParameter(i) => write!(f, "T{}", i),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_equality() {
        let a = Type::Vector(Box::new(Type::U64));
        let b = Type::Vector(Box::new(Type::U64));
        let c = Type::Vector(Box::new(Type::U8));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(
            Type::reference(true, Type::U64),
            Type::reference(false, Type::U64)
        );
    }

    #[test]
    fn test_subst() {
        let generic = Type::Datatype {
            datatype: 3,
            type_args: vec![Type::TypeParameter(0), Type::Vector(Box::new(Type::TypeParameter(1)))],
        };
        let concrete = generic.subst(&[Type::U64, Type::Bool]);
        assert_eq!(
            concrete,
            Type::Datatype {
                datatype: 3,
                type_args: vec![Type::U64, Type::Vector(Box::new(Type::Bool))],
            }
        );
    }

    #[test]
    fn test_subst_through_reference() {
        let ty = Type::reference(true, Type::TypeParameter(0));
        assert_eq!(ty.subst(&[Type::Address]), Type::reference(true, Type::Address));
    }

    #[test]
    fn test_display() {
        assert_eq!(Type::Vector(Box::new(Type::U8)).to_string(), "vector<u8>");
        assert_eq!(
            Type::reference(true, Type::datatype(2)).to_string(),
            "&mut datatype#2"
        );
        let generic = Type::Datatype {
            datatype: 0,
            type_args: vec![Type::U64],
        };
        assert_eq!(generic.to_string(), "datatype#0<u64>");
    }
}
