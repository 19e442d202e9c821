use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{Aspect, GoTermId, RelationshipKind};
use crate::error::AnnotrackError;

/// Index of a term inside one graph's arena. Only meaningful within the
/// graph that produced it.
pub(crate) type TermIdx = u32;

/// A parsed term definition handed in by the ontology source.
#[derive(Debug, Clone)]
pub struct TermDefinition {
    pub id: GoTermId,
    pub name: String,
    pub aspect: Option<Aspect>,
    pub obsolete: bool,
    pub definition: Option<String>,
    pub parents: Vec<(GoTermId, RelationshipKind)>,
    pub alt_ids: Vec<GoTermId>,
}

/// A directed child-to-parent edge, held by the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Edge {
    pub(crate) parent: TermIdx,
    pub(crate) kind: RelationshipKind,
}

/// One node of an ontology snapshot. Terms are created during graph
/// construction and never mutated afterwards; identity is the GO id alone.
#[derive(Debug)]
pub struct Term {
    id: GoTermId,
    name: Option<String>,
    aspect: Option<Aspect>,
    obsolete: bool,
    definition: Option<String>,
    parents: Vec<Edge>,
}

impl Term {
    fn new(id: GoTermId) -> Self {
        Self {
            id,
            name: None,
            aspect: None,
            obsolete: false,
            definition: None,
            parents: Vec::new(),
        }
    }

    pub fn id(&self) -> &GoTermId {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn aspect(&self) -> Option<Aspect> {
        self.aspect
    }

    pub fn obsolete(&self) -> bool {
        self.obsolete
    }

    pub fn definition(&self) -> Option<&str> {
        self.definition.as_deref()
    }

    /// True for terms created on demand from an adjacency stream, which
    /// carry relationships but no metadata.
    pub fn is_placeholder(&self) -> bool {
        self.name.is_none()
    }

    pub(crate) fn edges(&self) -> &[Edge] {
        &self.parents
    }
}

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Term {}

impl std::hash::Hash for Term {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Row shape of [`TermGraph::list_terms`], as handed to the persistence
/// collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRow {
    pub go_id: GoTermId,
    pub name: Option<String>,
    pub aspect: Option<Aspect>,
    pub obsolete: bool,
}

/// Row shape of [`TermGraph::adjacency_list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjacencyRow {
    pub child: GoTermId,
    pub parent: GoTermId,
    pub relationship: RelationshipKind,
}

/// Row shape of [`TermGraph::alternate_id_list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternateIdRow {
    pub alt: GoTermId,
    pub primary: GoTermId,
}

/// An immutable snapshot of the term hierarchy for one dated ontology
/// edition. Owns every [`Term`] and edge in it; shared read-only across all
/// aggregation runs that reference this edition.
#[derive(Debug)]
pub struct TermGraph {
    date: NaiveDate,
    terms: Vec<Term>,
    index: HashMap<GoTermId, TermIdx>,
    alt_index: HashMap<GoTermId, TermIdx>,
}

impl TermGraph {
    /// Builds a graph from full term definitions in two passes: all nodes
    /// first, then edges, since a parent reference may point at a term
    /// defined later in the stream. A parent id that is never defined at
    /// all is a structural violation.
    pub fn build_from_definitions(
        date: NaiveDate,
        definitions: impl IntoIterator<Item = TermDefinition>,
    ) -> Result<Self, AnnotrackError> {
        let mut graph = Self::empty(date);
        let mut pending: Vec<(TermIdx, Vec<(GoTermId, RelationshipKind)>)> = Vec::new();
        let mut alt_pairs: Vec<(GoTermId, TermIdx)> = Vec::new();

        for def in definitions {
            if graph.index.contains_key(&def.id) {
                return Err(AnnotrackError::DuplicateTerm {
                    term: def.id.to_string(),
                });
            }
            let idx = graph.terms.len() as TermIdx;
            graph.index.insert(def.id.clone(), idx);
            graph.terms.push(Term {
                id: def.id,
                name: Some(def.name),
                aspect: def.aspect,
                obsolete: def.obsolete,
                definition: def.definition,
                parents: Vec::new(),
            });
            pending.push((idx, def.parents));
            for alt in def.alt_ids {
                alt_pairs.push((alt, idx));
            }
        }

        for (idx, parents) in pending {
            for (parent_id, kind) in parents {
                let parent = *graph.index.get(&parent_id).ok_or_else(|| {
                    AnnotrackError::UnresolvedReference {
                        child: graph.terms[idx as usize].id.to_string(),
                        parent: parent_id.to_string(),
                    }
                })?;
                graph.terms[idx as usize].parents.push(Edge { parent, kind });
            }
        }

        for (alt, idx) in alt_pairs {
            if graph.index.contains_key(&alt) {
                warn!(alt = %alt, "alternate id collides with a primary term id, ignoring");
                continue;
            }
            graph.alt_index.insert(alt, idx);
        }

        Ok(graph)
    }

    /// Builds a graph from (child, parent, kind) triples only, creating a
    /// placeholder term the first time any identifier appears. This path
    /// cannot encounter unresolved references.
    pub fn build_from_adjacency(
        date: NaiveDate,
        triples: impl IntoIterator<Item = (GoTermId, GoTermId, RelationshipKind)>,
    ) -> Self {
        let mut graph = Self::empty(date);
        for (child, parent, kind) in triples {
            let child_idx = graph.intern(child);
            let parent_idx = graph.intern(parent);
            graph.terms[child_idx as usize].parents.push(Edge {
                parent: parent_idx,
                kind,
            });
        }
        graph
    }

    fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            terms: Vec::new(),
            index: HashMap::new(),
            alt_index: HashMap::new(),
        }
    }

    fn intern(&mut self, id: GoTermId) -> TermIdx {
        if let Some(idx) = self.index.get(&id) {
            return *idx;
        }
        let idx = self.terms.len() as TermIdx;
        self.index.insert(id.clone(), idx);
        self.terms.push(Term::new(id));
        idx
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Looks a term up by id, falling back through the alternate-id index.
    /// Unknown ids are `None`, never an error: an annotation referencing a
    /// term absent from this snapshot is skipped by callers.
    pub fn get_term(&self, id: &GoTermId) -> Option<&Term> {
        self.idx_of(id).map(|idx| &self.terms[idx as usize])
    }

    pub(crate) fn idx_of(&self, id: &GoTermId) -> Option<TermIdx> {
        self.index
            .get(id)
            .or_else(|| self.alt_index.get(id))
            .copied()
    }

    pub(crate) fn term_at(&self, idx: TermIdx) -> &Term {
        &self.terms[idx as usize]
    }

    pub(crate) fn term_indices(&self) -> impl Iterator<Item = TermIdx> + '_ {
        0..self.terms.len() as TermIdx
    }

    pub fn terms(&self) -> impl Iterator<Item = &Term> {
        self.terms.iter()
    }

    /// Parents of a term together with the edge kind, in definition order.
    pub fn parents<'g>(
        &'g self,
        term: &'g Term,
    ) -> impl Iterator<Item = (&'g Term, RelationshipKind)> + 'g {
        term.edges()
            .iter()
            .map(|edge| (&self.terms[edge.parent as usize], edge.kind))
    }

    /// Lazy sequence of stored term facts. Restartable: the graph never
    /// changes after construction.
    pub fn list_terms(&self) -> impl Iterator<Item = TermRow> + '_ {
        self.terms.iter().map(|term| TermRow {
            go_id: term.id.clone(),
            name: term.name.clone(),
            aspect: term.aspect,
            obsolete: term.obsolete,
        })
    }

    /// Lazy sequence of every stored edge.
    pub fn adjacency_list(&self) -> impl Iterator<Item = AdjacencyRow> + '_ {
        self.terms.iter().flat_map(move |term| {
            term.edges().iter().map(move |edge| AdjacencyRow {
                child: term.id.clone(),
                parent: self.terms[edge.parent as usize].id.clone(),
                relationship: edge.kind,
            })
        })
    }

    /// Lazy sequence of (alternate id, primary id) pairs.
    pub fn alternate_id_list(&self) -> impl Iterator<Item = AlternateIdRow> + '_ {
        self.alt_index.iter().map(|(alt, idx)| AlternateIdRow {
            alt: alt.clone(),
            primary: self.terms[*idx as usize].id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn tid(value: &str) -> GoTermId {
        value.parse().unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2016, 3, 1).unwrap()
    }

    fn def(id: &str, parents: Vec<(&str, RelationshipKind)>) -> TermDefinition {
        TermDefinition {
            id: tid(id),
            name: format!("term {id}"),
            aspect: Some(Aspect::BiologicalProcess),
            obsolete: false,
            definition: None,
            parents: parents
                .into_iter()
                .map(|(p, kind)| (tid(p), kind))
                .collect(),
            alt_ids: Vec::new(),
        }
    }

    #[test]
    fn build_resolves_forward_references() {
        // Child defined before its parent appears in the stream.
        let graph = TermGraph::build_from_definitions(
            date(),
            vec![
                def("GO:0000002", vec![("GO:0000001", RelationshipKind::IsA)]),
                def("GO:0000001", vec![]),
            ],
        )
        .unwrap();

        let child = graph.get_term(&tid("GO:0000002")).unwrap();
        let parents: Vec<_> = graph.parents(child).collect();
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].0.id(), &tid("GO:0000001"));
        assert_eq!(parents[0].1, RelationshipKind::IsA);
    }

    #[test]
    fn build_rejects_undefined_parent() {
        let err = TermGraph::build_from_definitions(
            date(),
            vec![def(
                "GO:0000001",
                vec![("GO:0009999", RelationshipKind::PartOf)],
            )],
        )
        .unwrap_err();
        assert_matches!(err, AnnotrackError::UnresolvedReference { .. });
    }

    #[test]
    fn build_rejects_duplicate_definitions() {
        let err = TermGraph::build_from_definitions(
            date(),
            vec![def("GO:0000001", vec![]), def("GO:0000001", vec![])],
        )
        .unwrap_err();
        assert_matches!(err, AnnotrackError::DuplicateTerm { .. });
    }

    #[test]
    fn adjacency_build_creates_placeholders() {
        let graph = TermGraph::build_from_adjacency(
            date(),
            vec![
                (tid("GO:0000002"), tid("GO:0000001"), RelationshipKind::IsA),
                (
                    tid("GO:0000003"),
                    tid("GO:0000001"),
                    RelationshipKind::PartOf,
                ),
            ],
        );

        assert_eq!(graph.len(), 3);
        let root = graph.get_term(&tid("GO:0000001")).unwrap();
        assert!(root.is_placeholder());
        assert_eq!(graph.adjacency_list().count(), 2);
    }

    #[test]
    fn alternate_ids_resolve_to_primary() {
        let mut primary = def("GO:0000001", vec![]);
        primary.alt_ids = vec![tid("GO:0000099")];
        let graph = TermGraph::build_from_definitions(date(), vec![primary]).unwrap();

        let via_alt = graph.get_term(&tid("GO:0000099")).unwrap();
        assert_eq!(via_alt.id(), &tid("GO:0000001"));

        let alts: Vec<_> = graph.alternate_id_list().collect();
        assert_eq!(alts.len(), 1);
        assert_eq!(alts[0].alt, tid("GO:0000099"));
        assert_eq!(alts[0].primary, tid("GO:0000001"));
    }

    #[test]
    fn row_iterators_are_restartable() {
        let graph = TermGraph::build_from_definitions(
            date(),
            vec![
                def("GO:0000001", vec![]),
                def("GO:0000002", vec![("GO:0000001", RelationshipKind::IsA)]),
            ],
        )
        .unwrap();

        assert_eq!(graph.list_terms().count(), graph.list_terms().count());
        assert_eq!(
            graph.adjacency_list().count(),
            graph.adjacency_list().count()
        );
    }
}
