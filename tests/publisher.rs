use std::collections::BTreeMap;
use std::fs;
use std::thread;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use annotrack::aggregate::{EditionAggregate, TermCounts};
use annotrack::domain::{EditionKey, EditionNumber, GoEditionId, GoTermId, SpeciesId};
use annotrack::error::AnnotrackError;
use annotrack::ontology::{AdjacencyRow, TermRow};
use annotrack::publisher::{
    Area, FsPublisher, PublishState, PublishTarget, TermCountRow, store_status,
};
use annotrack::store::{DataStore, Generation};

fn tid(value: &str) -> GoTermId {
    value.parse().unwrap()
}

fn publisher(temp: &tempfile::TempDir) -> FsPublisher {
    let root = Utf8PathBuf::from_path_buf(temp.path().join("store")).unwrap();
    FsPublisher::new(DataStore::new_with_root(root))
}

fn aggregate(species: u32, edition: u32) -> EditionAggregate {
    EditionAggregate {
        species_id: SpeciesId(species),
        edition: EditionNumber(edition),
        gene_count: 3,
        avg_direct_terms_for_gene: 1.5,
        avg_inferred_terms_for_gene: 4.0,
        avg_inferred_genes_for_term: 2.0,
        avg_multifunctionality: 0.2,
        avg_direct_jaccard: None,
        avg_inferred_jaccard: None,
    }
}

fn counts() -> BTreeMap<GoTermId, TermCounts> {
    BTreeMap::from([(
        tid("GO:0000001"),
        TermCounts {
            direct: Some(1),
            inferred: Some(2),
        },
    )])
}

fn term_rows() -> Vec<TermRow> {
    vec![TermRow {
        go_id: tid("GO:0000001"),
        name: Some("root".to_string()),
        aspect: None,
        obsolete: false,
    }]
}

fn adjacency_rows() -> Vec<AdjacencyRow> {
    vec![AdjacencyRow {
        child: tid("GO:0000002"),
        parent: tid("GO:0000001"),
        relationship: "is_a".parse().unwrap(),
    }]
}

fn stage_full_run(publisher: &FsPublisher, species: u32, edition: u32) {
    publisher.begin().unwrap();
    publisher.write_aggregate(aggregate(species, edition)).unwrap();
    publisher
        .write_term_counts(
            EditionKey::new(SpeciesId(species), EditionNumber(edition)),
            &counts(),
        )
        .unwrap();
    publisher
        .write_ontology(GoEditionId(edition), term_rows(), adjacency_rows())
        .unwrap();
}

fn production_bytes(store: &DataStore) -> BTreeMap<&'static str, Vec<u8>> {
    Area::ALL
        .iter()
        .map(|area| {
            let path = store.rows_path(Generation::Current, area.name());
            (
                area.name(),
                fs::read(path.as_std_path()).unwrap_or_default(),
            )
        })
        .collect()
}

#[test]
fn publish_swaps_and_retains_the_previous_generation() {
    let temp = tempfile::tempdir().unwrap();
    let publisher = publisher(&temp);

    stage_full_run(&publisher, 1, 1);
    publisher.publish().unwrap();
    assert_eq!(publisher.state(), PublishState::Published);

    let store = publisher.store();
    let first_generation = production_bytes(store);
    assert!(first_generation.values().all(|bytes| !bytes.is_empty()));
    // First publish had nothing to displace.
    assert!(!store.generation_root(Generation::Previous).as_std_path().exists());

    stage_full_run(&publisher, 1, 2);
    publisher.publish().unwrap();

    // Previous generation is byte-identical to what production held before.
    for area in Area::ALL {
        let previous = store.rows_path(Generation::Previous, area.name());
        assert_eq!(
            fs::read(previous.as_std_path()).unwrap(),
            first_generation[area.name()],
        );
    }

    let rows: Vec<EditionAggregate> = DataStore::read_rows(
        &store.rows_path(Generation::Current, Area::EditionAggregates.name()),
    )
    .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].edition, EditionNumber(2));

    // Staging is gone after a successful swap.
    assert!(!store.generation_root(Generation::Staging).as_std_path().exists());

    publisher.cleanup_previous().unwrap();
    assert!(!store.generation_root(Generation::Previous).as_std_path().exists());
}

#[test]
fn empty_staging_area_refuses_the_whole_publish() {
    let temp = tempfile::tempdir().unwrap();
    let publisher = publisher(&temp);

    stage_full_run(&publisher, 1, 1);
    publisher.publish().unwrap();
    let before = production_bytes(publisher.store());

    // Second run stages three areas with rows but leaves go_adjacency
    // empty.
    publisher.begin().unwrap();
    publisher.write_aggregate(aggregate(1, 2)).unwrap();
    publisher
        .write_term_counts(EditionKey::new(SpeciesId(1), EditionNumber(2)), &counts())
        .unwrap();
    publisher
        .write_ontology(GoEditionId(2), term_rows(), Vec::new())
        .unwrap();

    let err = publisher.publish().unwrap_err();
    assert_matches!(err, AnnotrackError::EmptyStagingArea(_));

    // All four production areas are byte-identical to their pre-publish
    // state.
    assert_eq!(production_bytes(publisher.store()), before);
}

#[test]
fn missing_staging_area_refuses_the_whole_publish() {
    let temp = tempfile::tempdir().unwrap();
    let publisher = publisher(&temp);

    publisher.begin().unwrap();
    publisher.write_aggregate(aggregate(1, 1)).unwrap();

    let err = publisher.publish().unwrap_err();
    assert_matches!(err, AnnotrackError::MissingStagingArea(_));
    assert!(
        !publisher
            .store()
            .generation_root(Generation::Current)
            .as_std_path()
            .exists()
    );
}

#[test]
fn concurrent_writers_append_without_loss() {
    let temp = tempfile::tempdir().unwrap();
    let publisher = publisher(&temp);
    publisher.begin().unwrap();

    thread::scope(|scope| {
        for worker in 0..8u32 {
            let publisher = &publisher;
            scope.spawn(move || {
                publisher.write_aggregate(aggregate(1, worker)).unwrap();
                publisher
                    .write_term_counts(
                        EditionKey::new(SpeciesId(1), EditionNumber(worker)),
                        &counts(),
                    )
                    .unwrap();
            });
        }
    });

    let store = publisher.store();
    let rows: Vec<EditionAggregate> = DataStore::read_rows(
        &store.rows_path(Generation::Staging, Area::EditionAggregates.name()),
    )
    .unwrap();
    assert_eq!(rows.len(), 8);
    let count_rows: Vec<TermCountRow> = DataStore::read_rows(
        &store.rows_path(Generation::Staging, Area::AnnotationCounts.name()),
    )
    .unwrap();
    assert_eq!(count_rows.len(), 8);
}

#[test]
fn duplicate_keys_are_rejected_per_area() {
    let temp = tempfile::tempdir().unwrap();
    let publisher = publisher(&temp);
    publisher.begin().unwrap();

    let key = EditionKey::new(SpeciesId(1), EditionNumber(1));
    publisher.write_term_counts(key, &counts()).unwrap();
    let err = publisher.write_term_counts(key, &counts()).unwrap_err();
    assert_matches!(err, AnnotrackError::DuplicateEditionKey { .. });

    publisher
        .write_ontology(GoEditionId(9), term_rows(), adjacency_rows())
        .unwrap();
    let err = publisher
        .write_ontology(GoEditionId(9), term_rows(), adjacency_rows())
        .unwrap_err();
    assert_matches!(err, AnnotrackError::DuplicateEditionKey { .. });
}

#[test]
fn abort_drops_staging_entirely() {
    let temp = tempfile::tempdir().unwrap();
    let publisher = publisher(&temp);

    stage_full_run(&publisher, 1, 1);
    publisher.abort().unwrap();
    assert_eq!(publisher.state(), PublishState::Aborted);
    assert!(
        !publisher
            .store()
            .generation_root(Generation::Staging)
            .as_std_path()
            .exists()
    );

    let status = store_status(publisher.store()).unwrap();
    assert!(status.areas.iter().all(|area| area.staging_rows.is_none()));
}
