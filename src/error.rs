use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AnnotrackError {
    #[error("invalid GO term id: {0}")]
    InvalidTermId(String),

    #[error("invalid gene id: {0}")]
    InvalidGeneId(String),

    #[error("invalid aspect: {0}")]
    InvalidAspect(String),

    #[error("invalid relationship kind: {0}")]
    InvalidRelationship(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("term {term} defined more than once in ontology snapshot")]
    DuplicateTerm { term: String },

    #[error("term {child} references parent {parent} which is never defined")]
    UnresolvedReference { child: String, parent: String },

    #[error("ontology snapshot {0} is not available from the ontology source")]
    MissingOntology(String),

    #[error("duplicate write for key {key} in area {area}")]
    DuplicateEditionKey { area: String, key: String },

    #[error("cannot {operation} while publisher is {state}")]
    InvalidPublishState { operation: String, state: String },

    #[error("staging area missing at publish time: {0}")]
    MissingStagingArea(String),

    #[error("staging area empty at publish time: {0}")]
    EmptyStagingArea(String),

    #[error("staging left over from a previous run must be discarded before a new one begins")]
    StaleStaging,

    #[error("missing config file annotrack.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("annotation source failed: {0}")]
    Source(String),

    #[error("malformed row in result store: {0}")]
    StoreParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
