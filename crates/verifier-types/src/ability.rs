//! Ability flags and ability sets.
//!
//! An [`Ability`] is a capability carried by a type: whether values may be
//! implicitly duplicated (`copy`), implicitly discarded (`drop`), nested
//! inside stored structures (`store`), or published as a top-level
//! global-storage entry (`key`). Declared datatypes carry an explicit
//! [`AbilitySet`]; compound types derive theirs structurally (see
//! `verifier-core`'s `ModuleEnv::abilities_of`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single capability flag on a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ability {
    /// Values may be implicitly duplicated.
    Copy,
    /// Values may be implicitly discarded.
    Drop,
    /// Values may be nested inside stored structures.
    Store,
    /// Values may live as top-level global-storage entries.
    Key,
}

impl Ability {
    /// All abilities, in canonical display order.
    pub const ALL: [Ability; 4] = [Ability::Copy, Ability::Drop, Ability::Store, Ability::Key];

    /// The ability a type argument must have for an instantiated datatype to
    /// keep `self`. `key` is special: a value can only be stored at the top
    /// level if its contents can be stored inside it.
    pub fn requires(self) -> Ability {
        match self {
            Ability::Copy => Ability::Copy,
            Ability::Drop => Ability::Drop,
            Ability::Store => Ability::Store,
            Ability::Key => Ability::Store,
        }
    }

    fn bit(self) -> u8 {
        match self {
            Ability::Copy => 0x1,
            Ability::Drop => 0x2,
            Ability::Store => 0x4,
            Ability::Key => 0x8,
        }
    }
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Ability::Copy => "copy",
            Ability::Drop => "drop",
            Ability::Store => "store",
            Ability::Key => "key",
        };
        write!(f, "{}", name)
    }
}

/// A set of [`Ability`] flags, stored as a small bit-set.
///
/// Serialized as a list of ability names so JSON fixtures stay readable:
/// `["copy", "drop"]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Ability>", into = "Vec<Ability>")]
pub struct AbilitySet(u8);

impl AbilitySet {
    /// The empty set. References always have this, unconditionally.
    pub const EMPTY: AbilitySet = AbilitySet(0);
    /// Abilities of every primitive type: `copy + drop + store`.
    pub const PRIMITIVES: AbilitySet = AbilitySet(0x1 | 0x2 | 0x4);
    /// All four abilities.
    pub const ALL: AbilitySet = AbilitySet(0x1 | 0x2 | 0x4 | 0x8);

    /// Build a set from individual abilities.
    pub fn from_abilities(abilities: impl IntoIterator<Item = Ability>) -> Self {
        let mut set = AbilitySet::EMPTY;
        for a in abilities {
            set = set.with(a);
        }
        set
    }

    /// Whether `ability` is in the set.
    pub fn has(self, ability: Ability) -> bool {
        self.0 & ability.bit() != 0
    }

    /// The set plus `ability`.
    pub fn with(self, ability: Ability) -> Self {
        AbilitySet(self.0 | ability.bit())
    }

    /// The set minus `ability`.
    pub fn without(self, ability: Ability) -> Self {
        AbilitySet(self.0 & !ability.bit())
    }

    /// Set union.
    pub fn union(self, other: AbilitySet) -> Self {
        AbilitySet(self.0 | other.0)
    }

    /// Set intersection.
    pub fn intersect(self, other: AbilitySet) -> Self {
        AbilitySet(self.0 & other.0)
    }

    /// Whether every ability in `self` is also in `other`.
    pub fn is_subset_of(self, other: AbilitySet) -> bool {
        self.0 & !other.0 == 0
    }

    /// Whether the set is empty.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate the abilities in the set, in canonical order.
    pub fn iter(self) -> impl Iterator<Item = Ability> {
        Ability::ALL.into_iter().filter(move |a| self.has(*a))
    }
}

impl From<Vec<Ability>> for AbilitySet {
    fn from(abilities: Vec<Ability>) -> Self {
        AbilitySet::from_abilities(abilities)
    }
}

impl From<AbilitySet> for Vec<Ability> {
    fn from(set: AbilitySet) -> Self {
        set.iter().collect()
    }
}

impl fmt::Display for AbilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for a in self.iter() {
            if !first {
                write!(f, " + ")?;
            }
            write!(f, "{}", a)?;
            first = false;
        }
        if first {
            write!(f, "(none)")?;
        }
        Ok(())
    }
}
