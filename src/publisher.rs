use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregate::{EditionAggregate, TermCounts};
use crate::domain::{EditionKey, EditionNumber, GoEditionId, GoTermId, SpeciesId};
use crate::error::AnnotrackError;
use crate::ontology::{AdjacencyRow, TermRow};
use crate::store::{DataStore, Generation, atomic_rename_dir};

/// The four published data areas. A publish swaps all of them or none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Area {
    EditionAggregates,
    AnnotationCounts,
    GoTerms,
    GoAdjacency,
}

impl Area {
    pub const ALL: [Area; 4] = [
        Area::EditionAggregates,
        Area::AnnotationCounts,
        Area::GoTerms,
        Area::GoAdjacency,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Area::EditionAggregates => "edition_aggregates",
            Area::AnnotationCounts => "annotation_counts",
            Area::GoTerms => "go_terms",
            Area::GoAdjacency => "go_adjacency",
        }
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Lifecycle of one staged run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    Empty,
    Staging,
    ReadyToPublish,
    Published,
    Aborted,
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PublishState::Empty => "empty",
            PublishState::Staging => "staging",
            PublishState::ReadyToPublish => "ready-to-publish",
            PublishState::Published => "published",
            PublishState::Aborted => "aborted",
        };
        write!(f, "{label}")
    }
}

/// Published row of per-term annotation counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermCountRow {
    pub species_id: SpeciesId,
    pub edition: EditionNumber,
    pub go_id: GoTermId,
    pub direct_annotation_count: Option<u32>,
    pub inferred_annotation_count: Option<u32>,
}

/// Published row of one ontology snapshot's term facts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoTermRow {
    pub go_edition: GoEditionId,
    #[serde(flatten)]
    pub term: TermRow,
}

/// Published row of one ontology snapshot's edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoAdjacencyRow {
    pub go_edition: GoEditionId,
    #[serde(flatten)]
    pub edge: AdjacencyRow,
}

/// Publish side of the pipeline, as seen by the orchestration: stage many
/// writes, then make them visible in one fail-closed swap.
///
/// Writers may run concurrently (append semantics, duplicate keys are a
/// caller error); `publish` is serialized and all-or-nothing.
pub trait PublishTarget: Send + Sync {
    fn begin(&self) -> Result<(), AnnotrackError>;

    fn write_aggregate(&self, row: EditionAggregate) -> Result<(), AnnotrackError>;

    fn write_term_counts(
        &self,
        key: EditionKey,
        counts: &BTreeMap<GoTermId, TermCounts>,
    ) -> Result<(), AnnotrackError>;

    fn write_ontology(
        &self,
        go_edition: GoEditionId,
        terms: Vec<TermRow>,
        adjacency: Vec<AdjacencyRow>,
    ) -> Result<(), AnnotrackError>;

    fn publish(&self) -> Result<(), AnnotrackError>;

    fn abort(&self) -> Result<(), AnnotrackError>;
}

#[derive(Debug, Default)]
struct WriteLedger {
    aggregate_keys: HashSet<EditionKey>,
    count_keys: HashSet<EditionKey>,
    ontology_keys: HashSet<GoEditionId>,
}

/// Filesystem-backed publish target over a [`DataStore`]: staging areas are
/// directories swapped into `current/` by rename, with the displaced
/// generation retained under `previous/` until an operator confirms
/// cleanup.
pub struct FsPublisher {
    store: DataStore,
    inner: Mutex<(PublishState, WriteLedger)>,
}

impl FsPublisher {
    pub fn new(store: DataStore) -> Self {
        Self {
            store,
            inner: Mutex::new((PublishState::Empty, WriteLedger::default())),
        }
    }

    pub fn store(&self) -> &DataStore {
        &self.store
    }

    pub fn state(&self) -> PublishState {
        self.lock().0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, (PublishState, WriteLedger)> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn require_staging(
        state: PublishState,
        operation: &str,
    ) -> Result<(), AnnotrackError> {
        if state != PublishState::Staging {
            return Err(AnnotrackError::InvalidPublishState {
                operation: operation.to_string(),
                state: state.to_string(),
            });
        }
        Ok(())
    }

    /// Drops the staging tree of an interrupted run. Required before
    /// `begin` when the staging directories were left behind by a
    /// terminated process.
    pub fn discard_staging(&self) -> Result<(), AnnotrackError> {
        let mut guard = self.lock();
        DataStore::remove_dir_if_exists(&self.store.generation_root(Generation::Staging))?;
        guard.0 = PublishState::Empty;
        guard.1 = WriteLedger::default();
        Ok(())
    }

    /// Removes the retained previous generation. Only ever invoked on an
    /// operator's explicit confirmation.
    pub fn cleanup_previous(&self) -> Result<(), AnnotrackError> {
        DataStore::remove_dir_if_exists(&self.store.generation_root(Generation::Previous))
    }
}

impl PublishTarget for FsPublisher {
    /// Allocates fresh staging areas. A prior in-process aborted run is
    /// discarded first; staging left on disk by a terminated process must
    /// be discarded explicitly before a new run may begin.
    fn begin(&self) -> Result<(), AnnotrackError> {
        let mut guard = self.lock();
        match guard.0 {
            PublishState::Staging | PublishState::ReadyToPublish => {
                return Err(AnnotrackError::InvalidPublishState {
                    operation: "begin".to_string(),
                    state: guard.0.to_string(),
                });
            }
            PublishState::Aborted => {
                DataStore::remove_dir_if_exists(
                    &self.store.generation_root(Generation::Staging),
                )?;
            }
            PublishState::Empty | PublishState::Published => {
                let staging = self.store.generation_root(Generation::Staging);
                if staging.as_std_path().exists() {
                    warn!(path = %staging, "staging tree left over from an earlier run");
                    return Err(AnnotrackError::StaleStaging);
                }
            }
        }

        self.store.ensure_root()?;
        for area in Area::ALL {
            DataStore::ensure_dir(&self.store.area_dir(Generation::Staging, area.name()))?;
        }
        guard.0 = PublishState::Staging;
        guard.1 = WriteLedger::default();
        info!(root = %self.store.root(), "staging begun");
        Ok(())
    }

    fn write_aggregate(&self, row: EditionAggregate) -> Result<(), AnnotrackError> {
        let mut guard = self.lock();
        Self::require_staging(guard.0, "write_aggregate")?;
        let key = EditionKey::new(row.species_id, row.edition);
        if !guard.1.aggregate_keys.insert(key) {
            return Err(AnnotrackError::DuplicateEditionKey {
                area: Area::EditionAggregates.name().to_string(),
                key: key.to_string(),
            });
        }
        DataStore::append_rows(
            &self
                .store
                .rows_path(Generation::Staging, Area::EditionAggregates.name()),
            &[row],
        )
    }

    fn write_term_counts(
        &self,
        key: EditionKey,
        counts: &BTreeMap<GoTermId, TermCounts>,
    ) -> Result<(), AnnotrackError> {
        let mut guard = self.lock();
        Self::require_staging(guard.0, "write_term_counts")?;
        if !guard.1.count_keys.insert(key) {
            return Err(AnnotrackError::DuplicateEditionKey {
                area: Area::AnnotationCounts.name().to_string(),
                key: key.to_string(),
            });
        }
        let rows: Vec<TermCountRow> = counts
            .iter()
            .map(|(go_id, counts)| TermCountRow {
                species_id: key.species,
                edition: key.edition,
                go_id: go_id.clone(),
                direct_annotation_count: counts.direct,
                inferred_annotation_count: counts.inferred,
            })
            .collect();
        DataStore::append_rows(
            &self
                .store
                .rows_path(Generation::Staging, Area::AnnotationCounts.name()),
            &rows,
        )
    }

    fn write_ontology(
        &self,
        go_edition: GoEditionId,
        terms: Vec<TermRow>,
        adjacency: Vec<AdjacencyRow>,
    ) -> Result<(), AnnotrackError> {
        let mut guard = self.lock();
        Self::require_staging(guard.0, "write_ontology")?;
        if !guard.1.ontology_keys.insert(go_edition) {
            return Err(AnnotrackError::DuplicateEditionKey {
                area: Area::GoTerms.name().to_string(),
                key: go_edition.to_string(),
            });
        }
        let term_rows: Vec<GoTermRow> = terms
            .into_iter()
            .map(|term| GoTermRow { go_edition, term })
            .collect();
        DataStore::append_rows(
            &self
                .store
                .rows_path(Generation::Staging, Area::GoTerms.name()),
            &term_rows,
        )?;
        let edge_rows: Vec<GoAdjacencyRow> = adjacency
            .into_iter()
            .map(|edge| GoAdjacencyRow { go_edition, edge })
            .collect();
        DataStore::append_rows(
            &self
                .store
                .rows_path(Generation::Staging, Area::GoAdjacency.name()),
            &edge_rows,
        )
    }

    /// Swaps every staging area into production. Refuses the whole publish
    /// while any staging area is missing or empty, leaving production
    /// untouched; on success the displaced generation is kept under
    /// `previous/`.
    fn publish(&self) -> Result<(), AnnotrackError> {
        let mut guard = self.lock();
        Self::require_staging(guard.0, "publish")?;

        for area in Area::ALL {
            let rows = self.store.rows_path(Generation::Staging, area.name());
            if !rows.as_std_path().exists() {
                return Err(AnnotrackError::MissingStagingArea(area.name().to_string()));
            }
            if !DataStore::has_rows(&rows) {
                return Err(AnnotrackError::EmptyStagingArea(area.name().to_string()));
            }
        }
        guard.0 = PublishState::ReadyToPublish;

        for area in Area::ALL {
            let current = self.store.area_dir(Generation::Current, area.name());
            let staging = self.store.area_dir(Generation::Staging, area.name());
            if current.as_std_path().exists() {
                let previous = self.store.area_dir(Generation::Previous, area.name());
                atomic_rename_dir(current.as_std_path(), previous.as_std_path())
                    .map_err(|err| AnnotrackError::Filesystem(err.to_string()))?;
            }
            atomic_rename_dir(staging.as_std_path(), current.as_std_path())
                .map_err(|err| AnnotrackError::Filesystem(err.to_string()))?;
        }
        DataStore::remove_dir_if_exists(&self.store.generation_root(Generation::Staging))?;

        guard.0 = PublishState::Published;
        info!(root = %self.store.root(), "publish complete");
        Ok(())
    }

    /// Drops the whole staging tree; nothing of a failed run is kept.
    fn abort(&self) -> Result<(), AnnotrackError> {
        let mut guard = self.lock();
        DataStore::remove_dir_if_exists(&self.store.generation_root(Generation::Staging))?;
        guard.0 = PublishState::Aborted;
        warn!(root = %self.store.root(), "staging aborted and dropped");
        Ok(())
    }
}

/// Per-area row counts across the three generations, for the status
/// command.
#[derive(Debug, Clone, Serialize)]
pub struct AreaStatus {
    pub area: String,
    pub current_rows: Option<usize>,
    pub previous_rows: Option<usize>,
    pub staging_rows: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub root: String,
    pub areas: Vec<AreaStatus>,
}

/// Counts rows per area and generation. Counting is line-based and does not
/// deserialize row payloads.
pub fn store_status(store: &DataStore) -> Result<StoreStatus, AnnotrackError> {
    let mut areas = Vec::new();
    for area in Area::ALL {
        let count = |generation: Generation| -> Result<Option<usize>, AnnotrackError> {
            let path = store.rows_path(generation, area.name());
            if !path.as_std_path().exists() {
                return Ok(None);
            }
            let content = std::fs::read_to_string(path.as_std_path())
                .map_err(|err| AnnotrackError::Filesystem(err.to_string()))?;
            Ok(Some(content.lines().filter(|l| !l.trim().is_empty()).count()))
        };
        areas.push(AreaStatus {
            area: area.name().to_string(),
            current_rows: count(Generation::Current)?,
            previous_rows: count(Generation::Previous)?,
            staging_rows: count(Generation::Staging)?,
        });
    }
    Ok(StoreStatus {
        root: store.root().to_string(),
        areas,
    })
}
