//! Abstract verifier state: the per-program-point view of the operand stack,
//! the local slots, and every outstanding reference.
//!
//! References are never raw pointers here. Each live reference is a
//! descriptor: mutability, referent type, and an *alias set* of
//! (root, field path) pairs naming the storage it may point into. Roots are
//! local slots, caller storage behind reference parameters, or the
//! global-storage namespace of a datatype. Alias sets only ever grow across
//! merges, which keeps the state lattice monotone and the fixed point
//! reachable.

use std::collections::{BTreeMap, BTreeSet};
use verifier_types::{DatatypeIx, FieldIx, FunctionDef, LocalIx, Type, VariantIx};

pub(crate) type RefId = u32;

/// Field paths are truncated to this many elements; a truncated path is a
/// prefix of the real one, so overlap checks stay conservative and the
/// alias-set lattice stays finite under loops.
pub(crate) const MAX_FIELD_PATH: usize = 8;

/// What a reference ultimately borrows from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Root {
    /// A local slot of the current frame.
    Local(LocalIx),
    /// Caller-owned storage behind the reference parameter in slot `0`.
    External(LocalIx),
    /// The global-storage namespace of a datatype.
    Global(DatatypeIx),
    /// A reference produced by a call with no reference arguments; nothing
    /// is known about its provenance.
    Unknown,
}

/// One step of a field path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct PathElem {
    /// `Some` when the selection went through a variant-checked borrow.
    pub variant: Option<VariantIx>,
    pub field: FieldIx,
}

/// One storage location a reference may alias.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct AliasTarget {
    pub root: Root,
    pub path: Vec<PathElem>,
}

impl AliasTarget {
    pub fn root(root: Root) -> AliasTarget {
        AliasTarget {
            root,
            path: Vec::new(),
        }
    }

    /// Whether two targets can denote overlapping storage: same root and one
    /// path a prefix of the other.
    pub fn overlaps(&self, other: &AliasTarget) -> bool {
        if self.root != other.root {
            return false;
        }
        let n = self.path.len().min(other.path.len());
        self.path[..n] == other.path[..n]
    }

    /// The target one field deeper, capped at [`MAX_FIELD_PATH`].
    pub fn extended(&self, elem: PathElem) -> AliasTarget {
        let mut path = self.path.clone();
        if path.len() < MAX_FIELD_PATH {
            path.push(elem);
        }
        AliasTarget {
            root: self.root,
            path,
        }
    }
}

/// Descriptor of one live reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct RefInfo {
    pub mutable: bool,
    /// The referent type.
    pub to: Type,
    pub targets: BTreeSet<AliasTarget>,
}

/// One operand-stack slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StackValue {
    /// An owned value. Never of reference type; references always live as
    /// [`StackValue::Ref`].
    Value(Type),
    Ref(RefId),
}

/// Contents of one local slot at a program point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LocalValue {
    /// Never assigned, or moved out.
    Unavailable,
    /// Holds an owned value of the declared type.
    Value,
    /// Declared as a reference type and currently holding this reference.
    Ref(RefId),
}

/// Outcome of merging an incoming state into a block's entry state.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum MergeOutcome {
    Unchanged,
    Changed,
    /// Stack height or per-slot types disagree; the function is
    /// ill-structured and further analysis is meaningless.
    Mismatch(String),
}

/// The full abstract state at one program point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AbstractState {
    pub stack: Vec<StackValue>,
    pub locals: Vec<LocalValue>,
    /// Every live reference, including "phantom" references that survived a
    /// merge even though no stack slot or local holds them anymore; their
    /// borrows still constrain the other path's history.
    pub refs: BTreeMap<RefId, RefInfo>,
    next_ref: RefId,
}

impl AbstractState {
    /// State at function entry: parameters available (reference parameters
    /// rooted in caller storage), extra locals unassigned.
    pub fn entry(function: &FunctionDef) -> AbstractState {
        let mut state = AbstractState {
            stack: Vec::new(),
            locals: vec![LocalValue::Unavailable; function.local_count()],
            refs: BTreeMap::new(),
            next_ref: 0,
        };
        for (i, param) in function.params.iter().enumerate() {
            state.locals[i] = match param {
                Type::Reference { mutable, to } => {
                    let id = state.alloc_ref(
                        *mutable,
                        (**to).clone(),
                        BTreeSet::from([AliasTarget::root(Root::External(i as LocalIx))]),
                    );
                    LocalValue::Ref(id)
                }
                _ => LocalValue::Value,
            };
        }
        state
    }

    fn alloc_ref(&mut self, mutable: bool, to: Type, targets: BTreeSet<AliasTarget>) -> RefId {
        let id = self.next_ref;
        self.next_ref += 1;
        self.refs.insert(
            id,
            RefInfo {
                mutable,
                to,
                targets,
            },
        );
        id
    }

    /// Allocate a fresh reference and push it.
    pub fn push_new_ref(
        &mut self,
        mutable: bool,
        to: Type,
        targets: BTreeSet<AliasTarget>,
    ) -> RefId {
        let id = self.alloc_ref(mutable, to, targets);
        self.stack.push(StackValue::Ref(id));
        id
    }

    pub fn push_existing_ref(&mut self, id: RefId) {
        debug_assert!(self.refs.contains_key(&id));
        self.stack.push(StackValue::Ref(id));
    }

    pub fn push_value(&mut self, ty: Type) {
        debug_assert!(!ty.is_reference());
        self.stack.push(StackValue::Value(ty));
    }

    pub fn pop(&mut self) -> Option<StackValue> {
        self.stack.pop()
    }

    pub fn ref_info(&self, id: RefId) -> &RefInfo {
        &self.refs[&id]
    }

    pub fn ref_info_mut(&mut self, id: RefId) -> &mut RefInfo {
        self.refs.get_mut(&id).expect("live reference")
    }

    /// Drop a reference; any local it was keeping borrowed is released.
    pub fn release_ref(&mut self, id: RefId) {
        self.refs.remove(&id);
    }

    /// The declared type of a stack slot.
    pub fn type_of(&self, value: &StackValue) -> Type {
        match value {
            StackValue::Value(ty) => ty.clone(),
            StackValue::Ref(id) => {
                let info = self.ref_info(*id);
                Type::reference(info.mutable, info.to.clone())
            }
        }
    }

    pub fn local(&self, index: LocalIx) -> LocalValue {
        self.locals[index as usize]
    }

    pub fn set_local(&mut self, index: LocalIx, value: LocalValue) {
        self.locals[index as usize] = value;
    }

    /// Whether any live reference (mutable ones only, if `mutable_only`) can
    /// reach storage under `root`.
    pub fn is_borrowed(&self, root: Root, mutable_only: bool) -> bool {
        self.refs.values().any(|info| {
            (info.mutable || !mutable_only) && info.targets.iter().any(|t| t.root == root)
        })
    }

    /// First pair of live references that could alias the same storage with
    /// at least one of them exclusive.
    pub fn conflicting_pair(&self) -> Option<(RefId, RefId)> {
        let ids: Vec<RefId> = self.refs.keys().copied().collect();
        for (i, &a) in ids.iter().enumerate() {
            for &b in &ids[i + 1..] {
                let (ra, rb) = (&self.refs[&a], &self.refs[&b]);
                if !(ra.mutable || rb.mutable) {
                    continue;
                }
                let overlap = ra
                    .targets
                    .iter()
                    .any(|ta| rb.targets.iter().any(|tb| ta.overlaps(tb)));
                if overlap {
                    return Some((a, b));
                }
            }
        }
        None
    }

    /// Renumber references deterministically: stack order, then local order,
    /// then unheld (phantom) references by content, duplicates collapsed.
    /// Two states describing the same abstraction compare equal afterwards.
    pub fn canonicalize(&mut self) {
        let mut order: Vec<RefId> = Vec::with_capacity(self.refs.len());
        let mut seen: BTreeSet<RefId> = BTreeSet::new();
        for value in &self.stack {
            if let StackValue::Ref(id) = value {
                if seen.insert(*id) {
                    order.push(*id);
                }
            }
        }
        for local in &self.locals {
            if let LocalValue::Ref(id) = local {
                if seen.insert(*id) {
                    order.push(*id);
                }
            }
        }
        let mut phantoms: Vec<(RefInfo, RefId)> = self
            .refs
            .iter()
            .filter(|(id, _)| !seen.contains(id))
            .map(|(id, info)| (info.clone(), *id))
            .collect();
        phantoms.sort();
        // identical phantoms constrain identically; keep one
        phantoms.dedup_by(|a, b| a.0 == b.0);

        let mut remap: BTreeMap<RefId, RefId> = BTreeMap::new();
        let mut new_refs: BTreeMap<RefId, RefInfo> = BTreeMap::new();
        for (new_id, old_id) in order
            .iter()
            .chain(phantoms.iter().map(|(_, id)| id))
            .enumerate()
        {
            remap.insert(*old_id, new_id as RefId);
            new_refs.insert(new_id as RefId, self.refs[old_id].clone());
        }

        for value in &mut self.stack {
            if let StackValue::Ref(id) = value {
                *id = remap[id];
            }
        }
        for local in &mut self.locals {
            if let LocalValue::Ref(id) = local {
                *id = remap[id];
            }
        }
        self.next_ref = new_refs.len() as RefId;
        self.refs = new_refs;
    }

    /// Merge an incoming exit state into this (canonical) entry state.
    ///
    /// Stacks must agree in height and per-slot type. A local is available
    /// after the merge only if it is available on every edge; reference
    /// alias sets union positionally; references held on only one side
    /// survive as phantoms so their borrows keep constraining the result.
    pub fn merge_from(&mut self, incoming: &AbstractState) -> MergeOutcome {
        if self.stack.len() != incoming.stack.len() {
            return MergeOutcome::Mismatch(format!(
                "stack height differs across edges: {} vs {}",
                self.stack.len(),
                incoming.stack.len()
            ));
        }
        for (position, (a, b)) in self.stack.iter().zip(&incoming.stack).enumerate() {
            let (ta, tb) = (self.type_of(a), incoming.type_of(b));
            if ta != tb {
                return MergeOutcome::Mismatch(format!(
                    "stack slot {} differs across edges: {} vs {}",
                    position, ta, tb
                ));
            }
        }

        let mut merged = AbstractState {
            stack: Vec::with_capacity(self.stack.len()),
            locals: Vec::with_capacity(self.locals.len()),
            refs: BTreeMap::new(),
            next_ref: 0,
        };
        let mut paired_self: BTreeSet<RefId> = BTreeSet::new();
        let mut paired_incoming: BTreeSet<RefId> = BTreeSet::new();

        for (a, b) in self.stack.iter().zip(&incoming.stack) {
            match (a, b) {
                (StackValue::Value(ty), StackValue::Value(_)) => {
                    merged.stack.push(StackValue::Value(ty.clone()));
                }
                (StackValue::Ref(ia), StackValue::Ref(ib)) => {
                    paired_self.insert(*ia);
                    paired_incoming.insert(*ib);
                    let (ra, rb) = (&self.refs[ia], &incoming.refs[ib]);
                    let targets = ra.targets.union(&rb.targets).cloned().collect();
                    let id = merged.alloc_ref(ra.mutable, ra.to.clone(), targets);
                    merged.stack.push(StackValue::Ref(id));
                }
                // type equality above rules out mixed pairs
                _ => {
                    return MergeOutcome::Mismatch(
                        "stack slot holds a value on one edge and a reference on another"
                            .to_string(),
                    )
                }
            }
        }

        for (a, b) in self.locals.iter().zip(&incoming.locals) {
            let slot = match (a, b) {
                (LocalValue::Value, LocalValue::Value) => LocalValue::Value,
                (LocalValue::Ref(ia), LocalValue::Ref(ib)) => {
                    paired_self.insert(*ia);
                    paired_incoming.insert(*ib);
                    let (ra, rb) = (&self.refs[ia], &incoming.refs[ib]);
                    let targets = ra.targets.union(&rb.targets).cloned().collect();
                    let id = merged.alloc_ref(ra.mutable, ra.to.clone(), targets);
                    LocalValue::Ref(id)
                }
                // available on only some edges: unusable
                _ => LocalValue::Unavailable,
            };
            merged.locals.push(slot);
        }

        let leftovers = self
            .refs
            .iter()
            .filter(|(id, _)| !paired_self.contains(id))
            .chain(
                incoming
                    .refs
                    .iter()
                    .filter(|(id, _)| !paired_incoming.contains(id)),
            );
        for (_, info) in leftovers {
            merged.alloc_ref(info.mutable, info.to.clone(), info.targets.clone());
        }

        merged.canonicalize();
        if merged == *self {
            MergeOutcome::Unchanged
        } else {
            *self = merged;
            MergeOutcome::Changed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verifier_types::Instruction;

    fn function(params: Vec<Type>, locals: Vec<Type>) -> FunctionDef {
        FunctionDef {
            name: "f".to_string(),
            type_params: vec![],
            params,
            returns: vec![],
            locals,
            code: vec![Instruction::Ret],
        }
    }

    #[test]
    fn test_entry_state() {
        let f = function(
            vec![Type::U64, Type::reference(true, Type::Bool)],
            vec![Type::Address],
        );
        let state = AbstractState::entry(&f);
        assert_eq!(state.local(0), LocalValue::Value);
        assert!(matches!(state.local(1), LocalValue::Ref(_)));
        assert_eq!(state.local(2), LocalValue::Unavailable);
        let LocalValue::Ref(id) = state.local(1) else {
            unreachable!()
        };
        let info = state.ref_info(id);
        assert!(info.mutable);
        assert_eq!(info.to, Type::Bool);
        assert_eq!(
            info.targets,
            BTreeSet::from([AliasTarget::root(Root::External(1))])
        );
    }

    #[test]
    fn test_overlap_is_prefix_based() {
        let root = AliasTarget::root(Root::Local(0));
        let f0 = root.extended(PathElem {
            variant: None,
            field: 0,
        });
        let f1 = root.extended(PathElem {
            variant: None,
            field: 1,
        });
        let f0f2 = f0.extended(PathElem {
            variant: None,
            field: 2,
        });
        assert!(root.overlaps(&f0));
        assert!(f0.overlaps(&f0f2));
        assert!(!f0.overlaps(&f1));
        assert!(!f1.overlaps(&f0f2));
        assert!(!f0.overlaps(&AliasTarget::root(Root::Local(1))));
    }

    #[test]
    fn test_path_truncation_bounds_growth() {
        let mut t = AliasTarget::root(Root::Local(0));
        for field in 0..20 {
            t = t.extended(PathElem {
                variant: None,
                field,
            });
        }
        assert_eq!(t.path.len(), MAX_FIELD_PATH);
    }

    #[test]
    fn test_conflicting_pair() {
        let f = function(vec![Type::U64], vec![]);
        let mut state = AbstractState::entry(&f);
        state.push_new_ref(
            false,
            Type::U64,
            BTreeSet::from([AliasTarget::root(Root::Local(0))]),
        );
        // second shared borrow: fine
        state.push_new_ref(
            false,
            Type::U64,
            BTreeSet::from([AliasTarget::root(Root::Local(0))]),
        );
        assert!(state.conflicting_pair().is_none());
        // an exclusive one on the same root conflicts
        state.push_new_ref(
            true,
            Type::U64,
            BTreeSet::from([AliasTarget::root(Root::Local(0))]),
        );
        assert!(state.conflicting_pair().is_some());
    }

    #[test]
    fn test_merge_requires_equal_stack_shape() {
        let f = function(vec![], vec![]);
        let mut a = AbstractState::entry(&f);
        let mut b = AbstractState::entry(&f);
        a.push_value(Type::U64);
        assert!(matches!(
            a.merge_from(&b),
            MergeOutcome::Mismatch(_)
        ));

        b.push_value(Type::Bool);
        assert!(matches!(a.merge_from(&b), MergeOutcome::Mismatch(_)));
    }

    #[test]
    fn test_merge_availability_is_conservative() {
        let f = function(vec![Type::U64], vec![]);
        let mut a = AbstractState::entry(&f);
        let b = {
            let mut s = AbstractState::entry(&f);
            s.set_local(0, LocalValue::Unavailable);
            s
        };
        assert_eq!(a.merge_from(&b), MergeOutcome::Changed);
        assert_eq!(a.local(0), LocalValue::Unavailable);
        // re-merging the same incoming state is a fixed point
        assert_eq!(a.merge_from(&b), MergeOutcome::Unchanged);
    }

    #[test]
    fn test_merge_unions_alias_sets() {
        let f = function(vec![Type::U64, Type::U64], vec![]);
        let mut a = AbstractState::entry(&f);
        a.push_new_ref(
            false,
            Type::U64,
            BTreeSet::from([AliasTarget::root(Root::Local(0))]),
        );
        a.canonicalize();
        let mut b = AbstractState::entry(&f);
        b.push_new_ref(
            false,
            Type::U64,
            BTreeSet::from([AliasTarget::root(Root::Local(1))]),
        );
        assert_eq!(a.merge_from(&b), MergeOutcome::Changed);
        let StackValue::Ref(id) = a.stack[0] else {
            unreachable!()
        };
        assert_eq!(a.ref_info(id).targets.len(), 2);
        assert!(a.is_borrowed(Root::Local(0), false));
        assert!(a.is_borrowed(Root::Local(1), false));
    }

    #[test]
    fn test_merge_keeps_unheld_borrows_as_phantoms() {
        // one edge stored a reference in a local, the other never assigned
        // the local; the borrow must survive the merge
        let ref_local = Type::reference(false, Type::U64);
        let f = function(vec![Type::U64], vec![ref_local]);
        let mut a = AbstractState::entry(&f);
        let id = {
            let id = a.push_new_ref(
                false,
                Type::U64,
                BTreeSet::from([AliasTarget::root(Root::Local(0))]),
            );
            a.pop();
            a.set_local(1, LocalValue::Ref(id));
            a.canonicalize();
            id
        };
        let _ = id;
        let b = AbstractState::entry(&f);
        assert_eq!(a.merge_from(&b), MergeOutcome::Changed);
        assert_eq!(a.local(1), LocalValue::Unavailable);
        assert!(a.is_borrowed(Root::Local(0), false));
    }

    #[test]
    fn test_canonicalize_makes_states_comparable() {
        let f = function(vec![Type::U64], vec![]);
        let mut a = AbstractState::entry(&f);
        let mut b = AbstractState::entry(&f);
        // allocate a throwaway reference in `b` so its counter diverges
        let id = b.push_new_ref(
            false,
            Type::U64,
            BTreeSet::from([AliasTarget::root(Root::Local(0))]),
        );
        b.pop();
        b.release_ref(id);

        let targets = BTreeSet::from([AliasTarget::root(Root::Local(0))]);
        a.push_new_ref(false, Type::U64, targets.clone());
        b.push_new_ref(false, Type::U64, targets);
        a.canonicalize();
        b.canonicalize();
        assert_eq!(a, b);
    }
}
