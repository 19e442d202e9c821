use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::aggregate::EditionAggregate;
use crate::domain::{EditionNumber, SpeciesId};
use crate::error::AnnotrackError;
use crate::publisher::Area;
use crate::store::{DataStore, Generation};

/// Sources of the two per-species max-edition views the oracle compares.
pub trait StalenessProbe {
    fn raw_max_editions(&self) -> Result<BTreeMap<SpeciesId, EditionNumber>, AnnotrackError>;

    fn aggregate_max_editions(&self)
    -> Result<BTreeMap<SpeciesId, EditionNumber>, AnnotrackError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeciesStaleness {
    pub species: SpeciesId,
    pub raw_max: Option<EditionNumber>,
    pub aggregate_max: Option<EditionNumber>,
    pub stale: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StaleReport {
    pub species: Vec<SpeciesStaleness>,
    pub stale: bool,
}

/// Decides whether the aggregate output is stale relative to the raw
/// annotation source. Any mismatch anywhere marks the whole dataset stale:
/// adding one edition moves the reference baseline for every older edition
/// of every species, so there is no incremental path.
pub struct ConsistencyOracle;

impl ConsistencyOracle {
    pub fn check(probe: &dyn StalenessProbe) -> Result<StaleReport, AnnotrackError> {
        let raw = probe.raw_max_editions()?;
        let aggregate = probe.aggregate_max_editions()?;
        Ok(Self::compare(&raw, &aggregate))
    }

    pub fn compare(
        raw: &BTreeMap<SpeciesId, EditionNumber>,
        aggregate: &BTreeMap<SpeciesId, EditionNumber>,
    ) -> StaleReport {
        let mut species: Vec<SpeciesStaleness> = Vec::new();
        let mut keys: Vec<SpeciesId> = raw.keys().chain(aggregate.keys()).copied().collect();
        keys.sort();
        keys.dedup();

        let mut stale = false;
        for key in keys {
            let raw_max = raw.get(&key).copied();
            let aggregate_max = aggregate.get(&key).copied();
            let mismatch = raw_max != aggregate_max;
            if mismatch {
                warn!(
                    species = %key,
                    raw = ?raw_max,
                    aggregate = ?aggregate_max,
                    "aggregate output out of date with raw annotation source"
                );
            }
            stale |= mismatch;
            species.push(SpeciesStaleness {
                species: key,
                raw_max,
                aggregate_max,
                stale: mismatch,
            });
        }

        StaleReport { species, stale }
    }
}

/// Max edition per species as reflected by the published
/// `edition_aggregates` area. Staged-but-unpublished rows do not count.
pub fn aggregate_state(
    store: &DataStore,
) -> Result<BTreeMap<SpeciesId, EditionNumber>, AnnotrackError> {
    let rows: Vec<EditionAggregate> = DataStore::read_rows(
        &store.rows_path(Generation::Current, Area::EditionAggregates.name()),
    )?;
    let mut state: BTreeMap<SpeciesId, EditionNumber> = BTreeMap::new();
    for row in rows {
        state
            .entry(row.species_id)
            .and_modify(|max| *max = (*max).max(row.edition))
            .or_insert(row.edition);
    }
    Ok(state)
}

/// Probe combining an externally supplied raw-side view with the aggregate
/// view read from the store.
pub struct StoreProbe<'a> {
    raw: BTreeMap<SpeciesId, EditionNumber>,
    store: &'a DataStore,
}

impl<'a> StoreProbe<'a> {
    pub fn new(raw: BTreeMap<SpeciesId, EditionNumber>, store: &'a DataStore) -> Self {
        Self { raw, store }
    }
}

impl StalenessProbe for StoreProbe<'_> {
    fn raw_max_editions(&self) -> Result<BTreeMap<SpeciesId, EditionNumber>, AnnotrackError> {
        Ok(self.raw.clone())
    }

    fn aggregate_max_editions(
        &self,
    ) -> Result<BTreeMap<SpeciesId, EditionNumber>, AnnotrackError> {
        aggregate_state(self.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn editions(entries: &[(u32, u32)]) -> BTreeMap<SpeciesId, EditionNumber> {
        entries
            .iter()
            .map(|&(sp, ed)| (SpeciesId(sp), EditionNumber(ed)))
            .collect()
    }

    #[test]
    fn matching_state_is_fresh() {
        let report =
            ConsistencyOracle::compare(&editions(&[(1, 5), (2, 9)]), &editions(&[(1, 5), (2, 9)]));
        assert!(!report.stale);
        assert!(report.species.iter().all(|s| !s.stale));
    }

    #[test]
    fn one_species_behind_marks_everything_stale() {
        let report = ConsistencyOracle::compare(
            &editions(&[(1, 12), (2, 9)]),
            &editions(&[(1, 11), (2, 9)]),
        );
        assert!(report.stale);
        let s1 = report
            .species
            .iter()
            .find(|s| s.species == SpeciesId(1))
            .unwrap();
        assert!(s1.stale);
        assert_eq!(s1.raw_max, Some(EditionNumber(12)));
        assert_eq!(s1.aggregate_max, Some(EditionNumber(11)));
        let s2 = report
            .species
            .iter()
            .find(|s| s.species == SpeciesId(2))
            .unwrap();
        assert!(!s2.stale);
    }

    #[test]
    fn species_missing_from_aggregates_is_stale() {
        let report = ConsistencyOracle::compare(&editions(&[(1, 3)]), &editions(&[]));
        assert!(report.stale);
        assert_eq!(report.species[0].aggregate_max, None);
    }
}
