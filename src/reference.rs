use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::aggregate::AggregationOutcome;
use crate::domain::{EditionNumber, GeneId, GoTermId, SpeciesId};

/// The similarity baseline for one species: the per-gene direct and
/// inferred term sets of its most current edition.
#[derive(Debug, Clone)]
pub struct ReferenceEntry {
    pub species: SpeciesId,
    pub edition: EditionNumber,
    pub direct: BTreeMap<GeneId, BTreeSet<GoTermId>>,
    pub inferred: BTreeMap<GeneId, BTreeSet<GoTermId>>,
}

/// Per-species reference entries, built once per run and read-only while
/// aggregation workers compare older editions against it.
#[derive(Debug, Default)]
pub struct ReferenceCache {
    entries: HashMap<SpeciesId, ReferenceEntry>,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retains only the gene term-set maps of a current-edition aggregation
    /// pass; the scalar aggregate is discarded since the current edition is
    /// aggregated again in the normal sweep.
    pub fn retain_outcome(&mut self, outcome: AggregationOutcome) {
        self.insert(ReferenceEntry {
            species: outcome.key.species,
            edition: outcome.key.edition,
            direct: outcome.gene_sets.direct,
            inferred: outcome.gene_sets.inferred,
        });
    }

    pub fn insert(&mut self, entry: ReferenceEntry) {
        self.entries.insert(entry.species, entry);
    }

    pub fn get(&self, species: SpeciesId) -> Option<&ReferenceEntry> {
        self.entries.get(&species)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
