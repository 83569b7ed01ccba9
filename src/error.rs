use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SpeciesError {
    #[error("catalog token not configured (set IUCN_TOKEN or catalog.token)")]
    #[diagnostic(code(species::missing_token))]
    MissingToken,

    #[error("invalid category code: {0}")]
    InvalidCategory(String),

    #[error("invalid taxon id: {0}")]
    InvalidTaxonId(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("catalog request failed: {0}")]
    CatalogHttp(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("could not retrieve category codes for a full fetch: {0}")]
    CategoriesUnavailable(String),

    #[error("species not found: {0}")]
    SpeciesNotFound(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl SpeciesError {
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            SpeciesError::CatalogHttp(_)
                | SpeciesError::CatalogStatus { .. }
                | SpeciesError::CategoriesUnavailable(_)
        )
    }
}
