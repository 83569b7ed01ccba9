use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SpeciesError;

pub const NOT_EVALUATED: &str = "NOT_EVALUATED";
pub const PLACEHOLDER_IMAGE: &str = "https://via.placeholder.com/300";
pub const PLACEHOLDER_DESCRIPTION: &str = "No description available";
pub const UNKNOWN_SCIENTIFIC_NAME: &str = "Unknown";

/// Red List style category code, e.g. `VU`, `CR` or the legacy `LR/cd`.
///
/// Codes typed by a user are uppercased; codes enumerated by the catalog keep
/// the catalog's spelling so they can be requested back verbatim. Matching
/// against stored records ignores ASCII case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CategoryCode(String);

impl CategoryCode {
    /// Code exactly as the catalog's enumeration spells it.
    pub fn from_catalog(value: &str) -> Result<Self, SpeciesError> {
        let trimmed = value.trim();
        if !is_valid_code(trimmed) {
            return Err(SpeciesError::InvalidCategory(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_valid_code(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '/'))
}

impl fmt::Display for CategoryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CategoryCode {
    type Err = SpeciesError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if !is_valid_code(&normalized) {
            return Err(SpeciesError::InvalidCategory(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// Taxon identifier assigned by the external catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaxonId(u64);

impl TaxonId {
    pub fn new(value: u64) -> Result<Self, SpeciesError> {
        if value == 0 {
            return Err(SpeciesError::InvalidTaxonId(value.to_string()));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaxonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaxonId {
    type Err = SpeciesError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parsed = value
            .trim()
            .parse::<u64>()
            .map_err(|_| SpeciesError::InvalidTaxonId(value.to_string()))?;
        Self::new(parsed).map_err(|_| SpeciesError::InvalidTaxonId(value.to_string()))
    }
}

/// Normalized species entity as persisted in the document store.
///
/// `status` always mirrors `category`, whichever path produced the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeciesRecord {
    pub scientific_name: String,
    #[serde(default)]
    pub common_name: String,
    pub category: String,
    pub status: String,
    #[serde(default)]
    pub external_id: Option<u64>,
    pub description: String,
    pub image: String,
}

impl SpeciesRecord {
    pub fn new(
        scientific_name: impl Into<String>,
        common_name: Option<String>,
        category: Option<String>,
        external_id: Option<u64>,
    ) -> Self {
        let category = normalize_category(category);
        Self {
            scientific_name: scientific_name.into(),
            common_name: common_name.unwrap_or_default(),
            status: category.clone(),
            category,
            external_id,
            description: PLACEHOLDER_DESCRIPTION.to_string(),
            image: PLACEHOLDER_IMAGE.to_string(),
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        if let Some(description) = non_empty(description) {
            self.description = description;
        }
        self
    }

    pub fn with_image(mut self, image: Option<String>) -> Self {
        if let Some(image) = non_empty(image) {
            self.image = image;
        }
        self
    }

    pub fn matches_category(&self, category: &CategoryCode) -> bool {
        self.category.eq_ignore_ascii_case(category.as_str())
    }
}

fn normalize_category(category: Option<String>) -> String {
    non_empty(category)
        .map(|value| value.trim().to_uppercase())
        .unwrap_or_else(|| NOT_EVALUATED.to_string())
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_category_uppercases() {
        let code: CategoryCode = " vu ".parse().unwrap();
        assert_eq!(code.as_str(), "VU");
    }

    #[test]
    fn parse_category_invalid() {
        let err = "en/../x".parse::<CategoryCode>().unwrap_err();
        assert_matches!(err, SpeciesError::InvalidCategory(_));
        assert!("".parse::<CategoryCode>().is_err());
    }

    #[test]
    fn legacy_codes_keep_catalog_spelling() {
        let code = CategoryCode::from_catalog(" LR/cd ").unwrap();
        assert_eq!(code.as_str(), "LR/cd");
        assert_eq!("lr/cd".parse::<CategoryCode>().unwrap().as_str(), "LR/CD");
        assert_matches!(
            CategoryCode::from_catalog("LR cd"),
            Err(SpeciesError::InvalidCategory(_))
        );
    }

    #[test]
    fn category_match_ignores_case() {
        let record = SpeciesRecord::new("Cebus kaapori", None, Some("LR/cd".to_string()), None);
        assert_eq!(record.category, "LR/CD");
        assert!(record.matches_category(&CategoryCode::from_catalog("LR/cd").unwrap()));
        assert!(!record.matches_category(&"LR/NT".parse().unwrap()));
    }

    #[test]
    fn parse_taxon_id() {
        let id: TaxonId = "42".parse().unwrap();
        assert_eq!(id.get(), 42);
        assert_matches!("0".parse::<TaxonId>(), Err(SpeciesError::InvalidTaxonId(_)));
        assert_matches!("abc".parse::<TaxonId>(), Err(SpeciesError::InvalidTaxonId(_)));
    }

    #[test]
    fn record_defaults() {
        let record = SpeciesRecord::new("Panthera leo", None, None, Some(15951));
        assert_eq!(record.common_name, "");
        assert_eq!(record.category, NOT_EVALUATED);
        assert_eq!(record.status, record.category);
        assert_eq!(record.description, PLACEHOLDER_DESCRIPTION);
        assert_eq!(record.image, PLACEHOLDER_IMAGE);
    }

    #[test]
    fn status_mirrors_normalized_category() {
        let record = SpeciesRecord::new("Panthera leo", None, Some("vu".to_string()), None)
            .with_description(Some("  ".to_string()))
            .with_image(Some("https://img.example/leo.jpg".to_string()));
        assert_eq!(record.category, "VU");
        assert_eq!(record.status, "VU");
        assert_eq!(record.description, PLACEHOLDER_DESCRIPTION);
        assert_eq!(record.image, "https://img.example/leo.jpg");
    }
}
