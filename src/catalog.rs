use std::collections::HashMap;

use crate::domain::{
    EditionDescriptor, EditionKey, EditionNumber, GeneId, GoEditionId, GoTermId, RelationshipKind,
    SpeciesId,
};
use crate::error::AnnotrackError;
use crate::ontology::TermDefinition;

/// Lists which (species, edition) snapshots exist and which ontology
/// snapshot each is linked to. Concrete implementations own whatever format
/// or schema the listing comes from.
pub trait EditionCatalog: Send + Sync {
    fn editions(&self) -> Result<Vec<EditionDescriptor>, AnnotrackError>;
}

/// Streams the direct (term, gene) annotation pairs recorded for one
/// (species, edition). Single pass, already materialized locally.
pub trait AnnotationSource: Send + Sync {
    fn annotations(
        &self,
        species: SpeciesId,
        edition: EditionNumber,
    ) -> Result<Box<dyn Iterator<Item = (GoTermId, GeneId)> + Send + '_>, AnnotrackError>;
}

/// What an ontology source can hand over for one snapshot: full term
/// definitions, or only the adjacency projection of an earlier build.
pub enum OntologyFeed<'a> {
    Definitions(Box<dyn Iterator<Item = TermDefinition> + 'a>),
    Adjacency(Box<dyn Iterator<Item = (GoTermId, GoTermId, RelationshipKind)> + 'a>),
}

pub trait OntologySource: Send + Sync {
    /// `None` when the snapshot is unknown to this source.
    fn ontology(&self, go_edition: GoEditionId)
    -> Result<Option<OntologyFeed<'_>>, AnnotrackError>;
}

/// In-memory catalog, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    rows: Vec<EditionDescriptor>,
}

impl MemoryCatalog {
    pub fn new(rows: Vec<EditionDescriptor>) -> Self {
        Self { rows }
    }
}

impl EditionCatalog for MemoryCatalog {
    fn editions(&self) -> Result<Vec<EditionDescriptor>, AnnotrackError> {
        Ok(self.rows.clone())
    }
}

/// In-memory annotation streams keyed by (species, edition). Editions with
/// no recorded stream read as empty, which the aggregator tolerates.
#[derive(Debug, Clone, Default)]
pub struct MemoryAnnotations {
    streams: HashMap<EditionKey, Vec<(GoTermId, GeneId)>>,
}

impl MemoryAnnotations {
    pub fn insert(
        &mut self,
        species: SpeciesId,
        edition: EditionNumber,
        pairs: Vec<(GoTermId, GeneId)>,
    ) {
        self.streams.insert(EditionKey::new(species, edition), pairs);
    }
}

impl AnnotationSource for MemoryAnnotations {
    fn annotations(
        &self,
        species: SpeciesId,
        edition: EditionNumber,
    ) -> Result<Box<dyn Iterator<Item = (GoTermId, GeneId)> + Send + '_>, AnnotrackError> {
        let pairs = self
            .streams
            .get(&EditionKey::new(species, edition))
            .cloned()
            .unwrap_or_default();
        Ok(Box::new(pairs.into_iter()))
    }
}

/// In-memory ontology snapshots, definitional or adjacency-only.
#[derive(Debug, Clone, Default)]
pub struct MemoryOntologies {
    definitions: HashMap<GoEditionId, Vec<TermDefinition>>,
    adjacency: HashMap<GoEditionId, Vec<(GoTermId, GoTermId, RelationshipKind)>>,
}

impl MemoryOntologies {
    pub fn insert_definitions(&mut self, go_edition: GoEditionId, terms: Vec<TermDefinition>) {
        self.definitions.insert(go_edition, terms);
    }

    pub fn insert_adjacency(
        &mut self,
        go_edition: GoEditionId,
        triples: Vec<(GoTermId, GoTermId, RelationshipKind)>,
    ) {
        self.adjacency.insert(go_edition, triples);
    }
}

impl OntologySource for MemoryOntologies {
    fn ontology(
        &self,
        go_edition: GoEditionId,
    ) -> Result<Option<OntologyFeed<'_>>, AnnotrackError> {
        if let Some(terms) = self.definitions.get(&go_edition) {
            return Ok(Some(OntologyFeed::Definitions(Box::new(
                terms.iter().cloned(),
            ))));
        }
        if let Some(triples) = self.adjacency.get(&go_edition) {
            return Ok(Some(OntologyFeed::Adjacency(Box::new(
                triples.iter().cloned(),
            ))));
        }
        Ok(None)
    }
}
