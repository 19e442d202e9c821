use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::domain::{GoTermId, RelationshipKind};
use crate::ontology::{Term, TermGraph, TermIdx};

/// One transitive ancestor with its composed relationship kind and the
/// minimum number of edges on any path reaching it with that kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedAncestor {
    pub term: GoTermId,
    pub kind: RelationshipKind,
    pub distance: u32,
}

/// Row shape of [`AncestorResolver::transitive_closure`], as handed to the
/// persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureRow {
    pub child: GoTermId,
    pub ancestor: GoTermId,
    pub relationship: RelationshipKind,
    pub min_distance: u32,
}

/// Computes ancestor sets over one [`TermGraph`], memoizing per term for the
/// lifetime of the graph. The cache doubles as a cut-off for shared
/// sub-ancestries near the root, which is what makes full-edition
/// propagation affordable.
///
/// Cache entries are inserted only once fully computed, so a concurrent
/// reader can never observe a partial set as a hit.
pub struct AncestorResolver<'g> {
    graph: &'g TermGraph,
    cache: RwLock<HashMap<TermIdx, Arc<HashSet<TermIdx>>>>,
}

impl<'g> AncestorResolver<'g> {
    pub fn new(graph: &'g TermGraph) -> Self {
        Self {
            graph,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn graph(&self) -> &'g TermGraph {
        self.graph
    }

    /// The set of all terms reachable from `id` by following parent edges,
    /// optionally including the term itself. `None` for ids not present in
    /// the graph.
    pub fn ancestors(&self, id: &GoTermId, include_self: bool) -> Option<HashSet<&'g Term>> {
        let idx = self.graph.idx_of(id)?;
        let indices = self.ancestor_indices(idx);
        let mut terms: HashSet<&'g Term> =
            indices.iter().map(|&i| self.graph.term_at(i)).collect();
        if include_self {
            terms.insert(self.graph.term_at(idx));
        }
        Some(terms)
    }

    /// Strict ancestors of the term at `idx`, breadth-first and iterative.
    /// When an expansion reaches a term whose set is already cached, the
    /// cached set is unioned in and the term is not expanded again.
    pub(crate) fn ancestor_indices(&self, idx: TermIdx) -> Arc<HashSet<TermIdx>> {
        if let Some(hit) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&idx)
        {
            return Arc::clone(hit);
        }

        let mut result: HashSet<TermIdx> = HashSet::new();
        let mut queue: VecDeque<TermIdx> = VecDeque::new();
        queue.push_back(idx);

        while let Some(current) = queue.pop_front() {
            for edge in self.graph.term_at(current).edges() {
                if result.insert(edge.parent) {
                    let cached = self
                        .cache
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .get(&edge.parent)
                        .cloned();
                    match cached {
                        Some(set) => result.extend(set.iter().copied()),
                        None => queue.push_back(edge.parent),
                    }
                }
            }
        }

        let set = Arc::new(result);
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(idx, Arc::clone(&set));
        set
    }

    /// Ancestors labeled with composed relationship kinds and minimum
    /// distances. A transitive relationship is `PART_OF` as soon as any
    /// edge on the path to it was `PART_OF`; the two kinds are tracked as
    /// distinct entries per ancestor, and for each the shortest distance
    /// wins. With `reflexive`, the term itself appears as an `IS_A` entry
    /// at distance zero.
    pub fn typed_ancestors(&self, id: &GoTermId, reflexive: bool) -> Option<Vec<TypedAncestor>> {
        let start = self.graph.idx_of(id)?;
        Some(self.typed_ancestors_at(start, reflexive))
    }

    fn typed_ancestors_at(&self, start: TermIdx, reflexive: bool) -> Vec<TypedAncestor> {
        let mut best: HashMap<(TermIdx, RelationshipKind), u32> = HashMap::new();
        if reflexive {
            best.insert((start, RelationshipKind::IsA), 0);
        }

        let mut queue: VecDeque<(TermIdx, bool, u32)> = VecDeque::new();
        queue.push_back((start, false, 0));

        while let Some((current, part_of_transitive, distance)) = queue.pop_front() {
            for edge in self.graph.term_at(current).edges() {
                let kind = if part_of_transitive {
                    RelationshipKind::PartOf
                } else {
                    edge.kind
                };
                let next = distance + 1;
                let entry = best.entry((edge.parent, kind)).or_insert(u32::MAX);
                if next < *entry {
                    *entry = next;
                    queue.push_back((edge.parent, kind == RelationshipKind::PartOf, next));
                }
            }
        }

        let mut ancestors: Vec<TypedAncestor> = best
            .into_iter()
            .map(|((idx, kind), distance)| TypedAncestor {
                term: self.graph.term_at(idx).id().clone(),
                kind,
                distance,
            })
            .collect();
        ancestors.sort_by(|a, b| (&a.term, a.kind).cmp(&(&b.term, b.kind)));
        ancestors
    }

    /// Lazy (optionally reflexive) transitive closure of the whole graph
    /// with minimum distances, one row per (child, ancestor, kind).
    pub fn transitive_closure(&self, reflexive: bool) -> impl Iterator<Item = ClosureRow> + '_ {
        self.graph.term_indices().flat_map(move |idx| {
            let child = self.graph.term_at(idx).id().clone();
            self.typed_ancestors_at(idx, reflexive)
                .into_iter()
                .map(move |ancestor| ClosureRow {
                    child: child.clone(),
                    ancestor: ancestor.term,
                    relationship: ancestor.kind,
                    min_distance: ancestor.distance,
                })
        })
    }
}
