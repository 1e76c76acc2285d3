//! Module environment: declaration lookups and the ability lattice.
//!
//! [`ModuleEnv::abilities_of`] is the single ability oracle every other
//! component queries. It is pure and total over well-formed types (the
//! bounds pass guarantees every index it dereferences is in range).

use verifier_types::{
    Ability, AbilitySet, DatatypeDecl, DatatypeIx, FieldIx, FunctionDef, Module, Type, VariantIx,
};

/// Read-only view of a module's declaration tables.
pub struct ModuleEnv<'a> {
    module: &'a Module,
}

impl<'a> ModuleEnv<'a> {
    pub fn new(module: &'a Module) -> Self {
        ModuleEnv { module }
    }

    pub fn module(&self) -> &'a Module {
        self.module
    }

    pub fn datatype(&self, ix: DatatypeIx) -> &'a DatatypeDecl {
        &self.module.datatypes[ix as usize]
    }

    pub fn function(&self, ix: u16) -> &'a FunctionDef {
        &self.module.functions[ix as usize]
    }

    /// The ability set of a type, derived structurally.
    ///
    /// `type_param_abilities` supplies the constraint sets of the enclosing
    /// function's formal type parameters, which is all that is statically
    /// known about them.
    pub fn abilities_of(&self, ty: &Type, type_param_abilities: &[AbilitySet]) -> AbilitySet {
        match ty {
            Type::Bool | Type::U8 | Type::U64 | Type::U128 | Type::Address => {
                AbilitySet::PRIMITIVES
            }
            // A vector is duplicable/discardable/storable exactly when its
            // elements are; it is never a global-storage key.
            Type::Vector(elem) => {
                AbilitySet::PRIMITIVES.intersect(self.abilities_of(elem, type_param_abilities))
            }
            // References are governed by borrow rules, never ability rules.
            Type::Reference { .. } => AbilitySet::EMPTY,
            Type::TypeParameter(i) => type_param_abilities
                .get(*i as usize)
                .copied()
                .unwrap_or(AbilitySet::EMPTY),
            Type::Datatype {
                datatype,
                type_args,
            } => {
                let decl = self.datatype(*datatype);
                let mut result = decl.abilities;
                for ability in decl.abilities.iter() {
                    let required = ability.requires();
                    let satisfied = decl
                        .type_params
                        .iter()
                        .zip(type_args)
                        .filter(|(tp, _)| !tp.is_phantom)
                        .all(|(_, arg)| {
                            self.abilities_of(arg, type_param_abilities).has(required)
                        });
                    if !satisfied {
                        result = result.without(ability);
                    }
                }
                result
            }
        }
    }

    /// Convenience query for a single ability.
    pub fn has_ability(
        &self,
        ty: &Type,
        ability: Ability,
        type_param_abilities: &[AbilitySet],
    ) -> bool {
        self.abilities_of(ty, type_param_abilities).has(ability)
    }

    /// Declared type of a field, with the instantiation's type arguments
    /// substituted in.
    pub fn field_type(
        &self,
        datatype: DatatypeIx,
        variant: VariantIx,
        field: FieldIx,
        type_args: &[Type],
    ) -> Option<Type> {
        let decl = self.datatype(datatype);
        let field = decl
            .variants
            .get(variant as usize)?
            .fields
            .get(field as usize)?;
        Some(field.ty.subst(type_args))
    }

    /// Whether a field index exists with an identical declared type in every
    /// variant, making a variant-unchecked borrow safe on any concrete
    /// layout.
    pub fn field_common_to_all_variants(&self, datatype: DatatypeIx, field: FieldIx) -> bool {
        let decl = self.datatype(datatype);
        let mut field_types = decl
            .variants
            .iter()
            .map(|v| v.fields.get(field as usize).map(|f| &f.ty));
        match field_types.next() {
            Some(Some(first)) => field_types.all(|t| t == Some(first)),
            _ => false,
        }
    }
}
