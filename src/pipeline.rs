use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{error, info, warn};

use rayon::prelude::*;

use crate::aggregate::aggregate_edition;
use crate::ancestors::AncestorResolver;
use crate::catalog::{AnnotationSource, EditionCatalog, OntologyFeed, OntologySource};
use crate::domain::{EditionDescriptor, EditionNumber, GoEditionId, SpeciesId};
use crate::error::AnnotrackError;
use crate::ontology::TermGraph;
use crate::oracle::{ConsistencyOracle, StalenessProbe};
use crate::publisher::PublishTarget;
use crate::reference::ReferenceCache;

/// Knobs of one recomputation run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Recompute even when the oracle reports the output current.
    pub force: bool,
    /// Restrict the run to these species; `None` means all.
    pub species: Option<BTreeSet<SpeciesId>>,
    /// Skip editions older than this. The reference is still the true
    /// maximum edition per species, regardless of the cut.
    pub min_edition: Option<EditionNumber>,
    /// Worker threads for the per-(species, edition) fan-out; `None` uses
    /// the default pool size.
    pub workers: Option<usize>,
}

/// What one run did, for logging and callers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub stale: bool,
    pub ran: bool,
    pub editions_processed: usize,
    pub editions_skipped: usize,
    pub editions_without_genes: usize,
    pub published: bool,
}

enum EditionOutcome {
    Aggregated,
    NoGenes,
    Failed,
}

/// Drives a full recomputation: reference cache first, then one GO-edition
/// group at a time with the group's graph shared read-only across a worker
/// pool, all output staged and swapped in one publish at the end.
pub struct Pipeline<C, A, O, P> {
    catalog: C,
    annotations: A,
    ontologies: O,
    publisher: P,
}

impl<C, A, O, P> Pipeline<C, A, O, P>
where
    C: EditionCatalog,
    A: AnnotationSource,
    O: OntologySource,
    P: PublishTarget,
{
    pub fn new(catalog: C, annotations: A, ontologies: O, publisher: P) -> Self {
        Self {
            catalog,
            annotations,
            ontologies,
            publisher,
        }
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Consults the oracle and recomputes only when the output is stale
    /// (or `force` is set).
    pub fn run_if_stale(
        &self,
        probe: &dyn StalenessProbe,
        options: &RunOptions,
    ) -> Result<RunSummary, AnnotrackError> {
        let report = ConsistencyOracle::check(probe)?;
        if !report.stale && !options.force {
            info!("aggregate output is current, nothing to recompute");
            return Ok(RunSummary {
                stale: false,
                ..RunSummary::default()
            });
        }
        let mut summary = self.run_full(options)?;
        summary.stale = report.stale;
        Ok(summary)
    }

    /// Unconditional full recomputation of every edition in the catalog.
    pub fn run_full(&self, options: &RunOptions) -> Result<RunSummary, AnnotrackError> {
        let mut editions = self.catalog.editions()?;
        if let Some(allowed) = &options.species {
            editions.retain(|edition| allowed.contains(&edition.species));
        }

        // The reference baseline is the true maximum edition per species,
        // determined before any min-edition cut.
        let currents = current_editions(&editions);
        if let Some(min) = options.min_edition {
            editions.retain(|edition| edition.edition >= min);
        }

        let groups = group_by_go_edition(&editions);
        info!(
            editions = editions.len(),
            go_editions = groups.len(),
            species = currents.len(),
            "starting recomputation"
        );

        let reference = self.build_reference_cache(&currents)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.workers.unwrap_or(0))
            .build()
            .map_err(|err| AnnotrackError::Source(err.to_string()))?;

        self.publisher.begin()?;

        let mut summary = RunSummary {
            ran: true,
            ..RunSummary::default()
        };

        for (go_edition, group) in &groups {
            let graph = match self.build_graph(*go_edition, group) {
                Ok(graph) => graph,
                Err(err) => {
                    error!(go_edition = %go_edition, %err, "ontology build failed, skipping its editions");
                    summary.editions_skipped += group.len();
                    continue;
                }
            };
            info!(go_edition = %go_edition, terms = graph.len(), editions = group.len(), "ontology ready");

            self.publisher.write_ontology(
                *go_edition,
                graph.list_terms().collect(),
                graph.adjacency_list().collect(),
            )?;

            let resolver = AncestorResolver::new(&graph);
            let outcomes: Vec<EditionOutcome> = pool.install(|| {
                group
                    .par_iter()
                    .map(|edition| self.process_edition(edition, &resolver, &reference))
                    .collect()
            });

            for outcome in outcomes {
                match outcome {
                    EditionOutcome::Aggregated => summary.editions_processed += 1,
                    EditionOutcome::NoGenes => {
                        summary.editions_processed += 1;
                        summary.editions_without_genes += 1;
                    }
                    EditionOutcome::Failed => summary.editions_skipped += 1,
                }
            }
        }

        if summary.editions_processed == 0 {
            warn!("no edition produced output, dropping the staging areas");
            self.publisher.abort()?;
            return Ok(summary);
        }

        self.publisher.publish()?;
        summary.published = true;
        info!(
            processed = summary.editions_processed,
            skipped = summary.editions_skipped,
            zero_gene = summary.editions_without_genes,
            "recomputation published"
        );
        Ok(summary)
    }

    /// Aggregates one edition against the shared graph and stages its rows.
    /// Failures are contained: the edition is logged and skipped without
    /// touching the rest of the group.
    fn process_edition(
        &self,
        edition: &EditionDescriptor,
        resolver: &AncestorResolver<'_>,
        reference: &ReferenceCache,
    ) -> EditionOutcome {
        let key = edition.key();
        let stream = match self.annotations.annotations(edition.species, edition.edition) {
            Ok(stream) => stream,
            Err(err) => {
                error!(edition = %key, %err, "annotation stream unavailable");
                return EditionOutcome::Failed;
            }
        };

        let outcome =
            aggregate_edition(resolver, key, stream, reference.get(edition.species));

        let Some(aggregate) = outcome.aggregate else {
            return EditionOutcome::NoGenes;
        };

        if let Err(err) = self.publisher.write_aggregate(aggregate) {
            error!(edition = %key, %err, "staging aggregate row failed");
            return EditionOutcome::Failed;
        }
        if let Err(err) = self.publisher.write_term_counts(key, &outcome.term_counts) {
            error!(edition = %key, %err, "staging term counts failed");
            return EditionOutcome::Failed;
        }
        EditionOutcome::Aggregated
    }

    /// Aggregates each species' current edition and retains only the gene
    /// term-set maps. Graphs are built once per GO edition and shared by
    /// every species current on it.
    fn build_reference_cache(
        &self,
        currents: &BTreeMap<SpeciesId, EditionDescriptor>,
    ) -> Result<ReferenceCache, AnnotrackError> {
        let mut cache = ReferenceCache::new();
        let groups = group_by_go_edition(currents.values().cloned().collect::<Vec<_>>().as_slice());

        for (go_edition, group) in &groups {
            let graph = match self.build_graph(*go_edition, group) {
                Ok(graph) => graph,
                Err(err) => {
                    error!(go_edition = %go_edition, %err, "reference ontology build failed; affected species get no similarity baseline");
                    continue;
                }
            };
            let resolver = AncestorResolver::new(&graph);
            for edition in group {
                let key = edition.key();
                let stream = self.annotations.annotations(edition.species, edition.edition)?;
                let outcome = aggregate_edition(&resolver, key, stream, None);
                if outcome.gene_sets.direct.is_empty() {
                    warn!(edition = %key, "current edition has no genes, species gets no similarity baseline");
                    continue;
                }
                cache.retain_outcome(outcome);
            }
        }

        info!(species = cache.len(), "reference cache built");
        Ok(cache)
    }

    fn build_graph(
        &self,
        go_edition: GoEditionId,
        group: &[EditionDescriptor],
    ) -> Result<TermGraph, AnnotrackError> {
        // Every descriptor in a group carries the same snapshot date.
        let date = group
            .first()
            .map(|edition| edition.go_date)
            .ok_or_else(|| AnnotrackError::MissingOntology(go_edition.to_string()))?;
        match self.ontologies.ontology(go_edition)? {
            Some(OntologyFeed::Definitions(definitions)) => {
                TermGraph::build_from_definitions(date, definitions)
            }
            Some(OntologyFeed::Adjacency(triples)) => {
                Ok(TermGraph::build_from_adjacency(date, triples))
            }
            None => Err(AnnotrackError::MissingOntology(go_edition.to_string())),
        }
    }
}

/// Maximum edition per species.
fn current_editions(
    editions: &[EditionDescriptor],
) -> BTreeMap<SpeciesId, EditionDescriptor> {
    let mut currents: BTreeMap<SpeciesId, EditionDescriptor> = BTreeMap::new();
    for edition in editions {
        match currents.get(&edition.species) {
            Some(best) if best.edition >= edition.edition => {}
            _ => {
                currents.insert(edition.species, edition.clone());
            }
        }
    }
    currents
}

fn group_by_go_edition(
    editions: &[EditionDescriptor],
) -> BTreeMap<GoEditionId, Vec<EditionDescriptor>> {
    let mut groups: BTreeMap<GoEditionId, Vec<EditionDescriptor>> = BTreeMap::new();
    for edition in editions {
        groups
            .entry(edition.go_edition)
            .or_default()
            .push(edition.clone());
    }
    groups
}
