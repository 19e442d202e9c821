use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::AnnotrackError;

fn go_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^GO:\d{7}$").unwrap())
}

/// Stable identifier of a Gene Ontology term, e.g. `GO:0003677`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GoTermId(String);

impl GoTermId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GoTermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GoTermId {
    type Err = AnnotrackError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if !go_id_regex().is_match(&normalized) {
            return Err(AnnotrackError::InvalidTermId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// Identifier of a gene within one species, as recorded by the annotation
/// source (a symbol or primary accession).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GeneId(String);

impl GeneId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GeneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GeneId {
    type Err = AnnotrackError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(AnnotrackError::InvalidGeneId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpeciesId(pub u32);

impl fmt::Display for SpeciesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sequence number of one dated annotation snapshot for one species.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EditionNumber(pub u32);

impl fmt::Display for EditionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one dated snapshot of the ontology itself, shared across
/// species.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GoEditionId(pub u32);

impl fmt::Display for GoEditionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One of the three top-level GO namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aspect {
    #[serde(rename = "BP")]
    BiologicalProcess,
    #[serde(rename = "CC")]
    CellularComponent,
    #[serde(rename = "MF")]
    MolecularFunction,
}

impl Aspect {
    /// Maps the namespace spellings seen in the wild (`biological_process`,
    /// `BP`, ...) onto an aspect, or `None` for anything unrecognized.
    pub fn parse_lenient(value: &str) -> Option<Aspect> {
        let normalized = value.trim().to_uppercase();
        if normalized == "BP" || normalized.contains("PROC") {
            Some(Aspect::BiologicalProcess)
        } else if normalized == "CC" || normalized.contains("COMP") {
            Some(Aspect::CellularComponent)
        } else if normalized == "MF" || normalized.contains("FUNC") {
            Some(Aspect::MolecularFunction)
        } else {
            None
        }
    }
}

impl fmt::Display for Aspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aspect::BiologicalProcess => write!(f, "BP"),
            Aspect::CellularComponent => write!(f, "CC"),
            Aspect::MolecularFunction => write!(f, "MF"),
        }
    }
}

impl FromStr for Aspect {
    type Err = AnnotrackError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Aspect::parse_lenient(value).ok_or_else(|| AnnotrackError::InvalidAspect(value.to_string()))
    }
}

/// Kind of a directed child-to-parent edge between two terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RelationshipKind {
    #[serde(rename = "IS_A")]
    IsA,
    #[serde(rename = "PART_OF")]
    PartOf,
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationshipKind::IsA => write!(f, "IS_A"),
            RelationshipKind::PartOf => write!(f, "PART_OF"),
        }
    }
}

impl FromStr for RelationshipKind {
    type Err = AnnotrackError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "IS_A" => Ok(RelationshipKind::IsA),
            "PART_OF" => Ok(RelationshipKind::PartOf),
            _ => Err(AnnotrackError::InvalidRelationship(value.to_string())),
        }
    }
}

/// Key of one (species, edition) annotation snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EditionKey {
    pub species: SpeciesId,
    pub edition: EditionNumber,
}

impl EditionKey {
    pub fn new(species: SpeciesId, edition: EditionNumber) -> Self {
        Self { species, edition }
    }
}

impl fmt::Display for EditionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.species, self.edition)
    }
}

/// One row of the edition catalog: which annotation snapshots exist and
/// which ontology snapshot each is linked to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditionDescriptor {
    pub species: SpeciesId,
    pub edition: EditionNumber,
    pub goa_date: NaiveDate,
    pub go_edition: GoEditionId,
    pub go_date: NaiveDate,
}

impl EditionDescriptor {
    pub fn key(&self) -> EditionKey {
        EditionKey::new(self.species, self.edition)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_term_id_valid() {
        let id: GoTermId = "go:0003677".parse().unwrap();
        assert_eq!(id.as_str(), "GO:0003677");
    }

    #[test]
    fn parse_term_id_invalid() {
        let err = "GO:12".parse::<GoTermId>().unwrap_err();
        assert_matches!(err, AnnotrackError::InvalidTermId(_));

        let err = "0003677".parse::<GoTermId>().unwrap_err();
        assert_matches!(err, AnnotrackError::InvalidTermId(_));
    }

    #[test]
    fn parse_gene_id() {
        let gene: GeneId = " BRCA1 ".parse().unwrap();
        assert_eq!(gene.as_str(), "BRCA1");

        let err = "   ".parse::<GeneId>().unwrap_err();
        assert_matches!(err, AnnotrackError::InvalidGeneId(_));
    }

    #[test]
    fn aspect_normalization() {
        assert_eq!(
            Aspect::parse_lenient("biological_process"),
            Some(Aspect::BiologicalProcess)
        );
        assert_eq!(Aspect::parse_lenient("BP"), Some(Aspect::BiologicalProcess));
        assert_eq!(
            Aspect::parse_lenient("cellular_component"),
            Some(Aspect::CellularComponent)
        );
        assert_eq!(
            Aspect::parse_lenient("molecular_function"),
            Some(Aspect::MolecularFunction)
        );
        assert_eq!(Aspect::parse_lenient("unknown_namespace"), None);
    }

    #[test]
    fn parse_relationship_kind() {
        assert_eq!(
            "part_of".parse::<RelationshipKind>().unwrap(),
            RelationshipKind::PartOf
        );
        assert_eq!(
            "IS_A".parse::<RelationshipKind>().unwrap(),
            RelationshipKind::IsA
        );
        let err = "regulates".parse::<RelationshipKind>().unwrap_err();
        assert_matches!(err, AnnotrackError::InvalidRelationship(_));
    }
}
