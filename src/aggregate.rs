use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ancestors::AncestorResolver;
use crate::domain::{EditionKey, EditionNumber, GeneId, GoTermId, SpeciesId};
use crate::ontology::TermIdx;
use crate::reference::ReferenceEntry;

/// One published row of per-edition summary statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditionAggregate {
    pub species_id: SpeciesId,
    pub edition: EditionNumber,
    pub gene_count: u32,
    pub avg_direct_terms_for_gene: f64,
    pub avg_inferred_terms_for_gene: f64,
    pub avg_inferred_genes_for_term: f64,
    pub avg_multifunctionality: f64,
    pub avg_direct_jaccard: Option<f64>,
    pub avg_inferred_jaccard: Option<f64>,
}

/// Direct and propagated annotation counts for one term. Either side may be
/// absent; a term with neither is not recorded at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermCounts {
    pub direct: Option<u32>,
    pub inferred: Option<u32>,
}

/// Per-gene term sets in id space, comparable across graphs from different
/// ontology snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneTermSets {
    pub direct: BTreeMap<GeneId, BTreeSet<GoTermId>>,
    pub inferred: BTreeMap<GeneId, BTreeSet<GoTermId>>,
}

/// Everything one aggregation pass produces for a (species, edition) pair.
#[derive(Debug)]
pub struct AggregationOutcome {
    pub key: EditionKey,
    pub aggregate: Option<EditionAggregate>,
    pub term_counts: BTreeMap<GoTermId, TermCounts>,
    pub gene_sets: GeneTermSets,
}

/// Jaccard similarity of two sets. Both empty compare as identical; exactly
/// one empty compares as disjoint.
pub fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = (a.len() + b.len()) as f64 - intersection;
    intersection / union
}

/// Consumes one edition's direct-annotation stream in a single pass,
/// propagates each annotation through the resolver, and derives the edition
/// aggregate plus per-term counts.
///
/// A pair whose term id does not resolve in the linked ontology snapshot is
/// skipped with a warning; that is tolerated data quality, not an error. An
/// edition with zero resolvable genes produces no aggregate record.
pub fn aggregate_edition(
    resolver: &AncestorResolver<'_>,
    key: EditionKey,
    annotations: impl IntoIterator<Item = (GoTermId, GeneId)>,
    reference: Option<&ReferenceEntry>,
) -> AggregationOutcome {
    let graph = resolver.graph();

    let mut gene_index: HashMap<GeneId, usize> = HashMap::new();
    let mut genes: Vec<GeneId> = Vec::new();
    let mut direct_term_sets: Vec<HashSet<TermIdx>> = Vec::new();
    let mut inferred_term_sets: Vec<HashSet<TermIdx>> = Vec::new();

    let mut direct_counts: HashMap<TermIdx, u32> = HashMap::new();
    let mut inferred_genes: HashMap<TermIdx, HashSet<usize>> = HashMap::new();

    let mut annotation_count: u64 = 0;
    let mut skipped: u64 = 0;

    for (go_id, gene_id) in annotations {
        let Some(idx) = graph.idx_of(&go_id) else {
            skipped += 1;
            warn!(edition = %key, term = %go_id, "annotation references unknown term, skipping");
            continue;
        };

        let gene = match gene_index.get(&gene_id) {
            Some(&g) => g,
            None => {
                let g = genes.len();
                gene_index.insert(gene_id.clone(), g);
                genes.push(gene_id);
                direct_term_sets.push(HashSet::new());
                inferred_term_sets.push(HashSet::new());
                g
            }
        };

        annotation_count += 1;
        *direct_counts.entry(idx).or_insert(0) += 1;
        direct_term_sets[gene].insert(idx);

        let ancestors = resolver.ancestor_indices(idx);
        inferred_term_sets[gene].insert(idx);
        inferred_genes.entry(idx).or_default().insert(gene);
        for &ancestor in ancestors.iter() {
            inferred_term_sets[gene].insert(ancestor);
            inferred_genes.entry(ancestor).or_default().insert(gene);
        }
    }

    if skipped > 0 {
        warn!(edition = %key, skipped, "unresolvable annotations skipped");
    }

    let mut term_counts: BTreeMap<GoTermId, TermCounts> = BTreeMap::new();
    for (&idx, gene_set) in &inferred_genes {
        term_counts.insert(
            graph.term_at(idx).id().clone(),
            TermCounts {
                direct: direct_counts.get(&idx).copied(),
                inferred: Some(gene_set.len() as u32),
            },
        );
    }

    let gene_sets = materialize_gene_sets(graph, &genes, &direct_term_sets, &inferred_term_sets);

    let gene_count = genes.len() as u32;
    if gene_count == 0 {
        warn!(edition = %key, "no resolvable annotations, edition produces no aggregate");
        return AggregationOutcome {
            key,
            aggregate: None,
            term_counts,
            gene_sets,
        };
    }

    let avg_direct_terms_for_gene = annotation_count as f64 / gene_count as f64;

    let inferred_total: usize = inferred_term_sets.iter().map(HashSet::len).sum();
    let avg_inferred_terms_for_gene = inferred_total as f64 / gene_count as f64;

    let inferred_gene_total: usize = inferred_genes.values().map(HashSet::len).sum();
    let avg_inferred_genes_for_term = inferred_gene_total as f64 / inferred_genes.len() as f64;

    // A term propagated to every gene carries no discriminating signal; its
    // multifunctionality is undefined and it is left out of the sum.
    let mut multifunctionality = 0.0;
    for gene_set in inferred_genes.values() {
        let in_group = gene_set.len() as u32;
        if in_group < gene_count {
            multifunctionality += 1.0 / (gene_count - in_group) as f64;
        }
    }
    let avg_multifunctionality = multifunctionality / gene_count as f64;

    let (avg_direct_jaccard, avg_inferred_jaccard) = match reference {
        Some(reference) => similarity_to_reference(&gene_sets, reference),
        None => (None, None),
    };

    let aggregate = EditionAggregate {
        species_id: key.species,
        edition: key.edition,
        gene_count,
        avg_direct_terms_for_gene,
        avg_inferred_terms_for_gene,
        avg_inferred_genes_for_term,
        avg_multifunctionality,
        avg_direct_jaccard,
        avg_inferred_jaccard,
    };

    AggregationOutcome {
        key,
        aggregate: Some(aggregate),
        term_counts,
        gene_sets,
    }
}

fn materialize_gene_sets(
    graph: &crate::ontology::TermGraph,
    genes: &[GeneId],
    direct: &[HashSet<TermIdx>],
    inferred: &[HashSet<TermIdx>],
) -> GeneTermSets {
    let to_ids = |indices: &HashSet<TermIdx>| -> BTreeSet<GoTermId> {
        indices
            .iter()
            .map(|&idx| graph.term_at(idx).id().clone())
            .collect()
    };

    let mut sets = GeneTermSets::default();
    for (gene_pos, gene) in genes.iter().enumerate() {
        sets.direct.insert(gene.clone(), to_ids(&direct[gene_pos]));
        sets.inferred
            .insert(gene.clone(), to_ids(&inferred[gene_pos]));
    }
    sets
}

/// Averages per-gene Jaccard similarity against the reference edition.
/// Genes present in only one of the two editions are excluded from the
/// average, not counted as zero.
fn similarity_to_reference(
    sets: &GeneTermSets,
    reference: &ReferenceEntry,
) -> (Option<f64>, Option<f64>) {
    let mut direct_sum = 0.0;
    let mut inferred_sum = 0.0;
    let mut shared = 0u32;

    for (gene, direct_set) in &sets.direct {
        let Some(reference_direct) = reference.direct.get(gene) else {
            continue;
        };
        let Some(reference_inferred) = reference.inferred.get(gene) else {
            continue;
        };
        // Every gene in this edition has entries in both maps.
        let inferred_set = &sets.inferred[gene];
        direct_sum += jaccard(direct_set, reference_direct);
        inferred_sum += jaccard(inferred_set, reference_inferred);
        shared += 1;
    }

    if shared == 0 {
        return (None, None);
    }
    (
        Some(direct_sum / shared as f64),
        Some(inferred_sum / shared as f64),
    )
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::domain::{Aspect, RelationshipKind, SpeciesId};
    use crate::ontology::{TermDefinition, TermGraph};

    fn tid(value: &str) -> GoTermId {
        value.parse().unwrap()
    }

    fn gene(value: &str) -> GeneId {
        value.parse().unwrap()
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

    // A --is_a--> B --part_of--> C
    fn small_graph() -> TermGraph {
        TermGraph::build_from_definitions(
            NaiveDate::from_ymd_opt(2016, 3, 1).unwrap(),
            vec![
                def("GO:0000003", vec![]),
                def("GO:0000002", vec![("GO:0000003", RelationshipKind::PartOf)]),
                def("GO:0000001", vec![("GO:0000002", RelationshipKind::IsA)]),
            ],
        )
        .unwrap()
    }

    fn key() -> EditionKey {
        EditionKey::new(SpeciesId(7), EditionNumber(42))
    }

    #[test]
    fn jaccard_conventions() {
        let empty: BTreeSet<u32> = BTreeSet::new();
        let single: BTreeSet<u32> = [1].into();
        let ab: BTreeSet<u32> = [1, 2].into();
        let bc: BTreeSet<u32> = [2, 3].into();

        assert_eq!(jaccard(&empty, &empty), 1.0);
        assert_eq!(jaccard(&empty, &single), 0.0);
        assert_eq!(jaccard(&single, &empty), 0.0);
        assert!((jaccard(&ab, &bc) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn single_annotation_propagates_to_root() {
        let graph = small_graph();
        let resolver = AncestorResolver::new(&graph);

        let outcome = aggregate_edition(
            &resolver,
            key(),
            vec![(tid("GO:0000001"), gene("g1"))],
            None,
        );

        let aggregate = outcome.aggregate.unwrap();
        assert_eq!(aggregate.gene_count, 1);
        assert_eq!(aggregate.avg_direct_terms_for_gene, 1.0);
        assert_eq!(aggregate.avg_inferred_terms_for_gene, 3.0);

        let a = &outcome.term_counts[&tid("GO:0000001")];
        assert_eq!(a.direct, Some(1));
        assert_eq!(a.inferred, Some(1));

        for inherited in ["GO:0000002", "GO:0000003"] {
            let counts = &outcome.term_counts[&tid(inherited)];
            assert_eq!(counts.direct, None);
            assert_eq!(counts.inferred, Some(1));
        }

        assert_eq!(
            outcome.gene_sets.inferred[&gene("g1")],
            [tid("GO:0000001"), tid("GO:0000002"), tid("GO:0000003")].into()
        );
        assert_eq!(
            outcome.gene_sets.direct[&gene("g1")],
            [tid("GO:0000001")].into()
        );
    }

    #[test]
    fn unresolvable_pairs_are_skipped() {
        let graph = small_graph();
        let resolver = AncestorResolver::new(&graph);

        let outcome = aggregate_edition(
            &resolver,
            key(),
            vec![
                (tid("GO:0000001"), gene("g1")),
                (tid("GO:0008888"), gene("g1")),
            ],
            None,
        );

        let aggregate = outcome.aggregate.unwrap();
        assert_eq!(aggregate.gene_count, 1);
        assert_eq!(aggregate.avg_direct_terms_for_gene, 1.0);
    }

    #[test]
    fn empty_stream_produces_no_aggregate() {
        let graph = small_graph();
        let resolver = AncestorResolver::new(&graph);

        let outcome = aggregate_edition(&resolver, key(), vec![], None);
        assert!(outcome.aggregate.is_none());
        assert!(outcome.term_counts.is_empty());
    }

    #[test]
    fn saturated_term_is_excluded_from_multifunctionality() {
        let graph = small_graph();
        let resolver = AncestorResolver::new(&graph);

        // g1 on A, g2 on B: B and C reach both genes and are saturated; A
        // reaches only g1 and contributes 1/(2-1).
        let outcome = aggregate_edition(
            &resolver,
            key(),
            vec![
                (tid("GO:0000001"), gene("g1")),
                (tid("GO:0000002"), gene("g2")),
            ],
            None,
        );

        let aggregate = outcome.aggregate.unwrap();
        assert_eq!(aggregate.gene_count, 2);
        assert!((aggregate.avg_multifunctionality - 0.5).abs() < 1e-12);
    }

    #[test]
    fn similarity_excludes_one_sided_genes() {
        let graph = small_graph();
        let resolver = AncestorResolver::new(&graph);

        let reference_outcome = aggregate_edition(
            &resolver,
            EditionKey::new(SpeciesId(7), EditionNumber(43)),
            vec![
                (tid("GO:0000001"), gene("g1")),
                (tid("GO:0000003"), gene("g3")),
            ],
            None,
        );
        let reference = ReferenceEntry {
            species: SpeciesId(7),
            edition: EditionNumber(43),
            direct: reference_outcome.gene_sets.direct,
            inferred: reference_outcome.gene_sets.inferred,
        };

        // g2 exists only in the older edition and g3 only in the reference;
        // neither may drag the average down.
        let outcome = aggregate_edition(
            &resolver,
            key(),
            vec![
                (tid("GO:0000001"), gene("g1")),
                (tid("GO:0000002"), gene("g2")),
            ],
            Some(&reference),
        );

        let aggregate = outcome.aggregate.unwrap();
        assert_eq!(aggregate.avg_direct_jaccard, Some(1.0));
        assert_eq!(aggregate.avg_inferred_jaccard, Some(1.0));
    }

    #[test]
    fn disjoint_gene_sets_yield_no_similarity() {
        let graph = small_graph();
        let resolver = AncestorResolver::new(&graph);

        let reference = ReferenceEntry {
            species: SpeciesId(7),
            edition: EditionNumber(43),
            direct: BTreeMap::from([(gene("other"), BTreeSet::from([tid("GO:0000001")]))]),
            inferred: BTreeMap::from([(gene("other"), BTreeSet::from([tid("GO:0000001")]))]),
        };

        let outcome = aggregate_edition(
            &resolver,
            key(),
            vec![(tid("GO:0000001"), gene("g1"))],
            Some(&reference),
        );

        let aggregate = outcome.aggregate.unwrap();
        assert_eq!(aggregate.avg_direct_jaccard, None);
        assert_eq!(aggregate.avg_inferred_jaccard, None);
    }
}
