use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::Url;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::warn;

use crate::config::CatalogSettings;
use crate::domain::{
    CategoryCode, SpeciesRecord, TaxonId, UNKNOWN_SCIENTIFIC_NAME, non_empty,
};
use crate::error::SpeciesError;

/// One row of a category page.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TaxonSummary {
    #[serde(default)]
    pub scientific_name: Option<String>,
    #[serde(default)]
    pub main_common_name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub taxonid: Option<u64>,
}

/// Full taxon document returned by the name search and id endpoints.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TaxonDetail {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub common_names: Vec<CommonName>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub taxonid: Option<u64>,
    #[serde(default)]
    pub picture_url: Option<String>,
    #[serde(default)]
    pub taxonomy: Option<Taxonomy>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CommonName {
    #[serde(default)]
    pub common_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Taxonomy {
    #[serde(default)]
    pub habitats: Vec<Habitat>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Habitat {
    #[serde(default)]
    pub habitat_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CategoryEntry {
    #[serde(default)]
    code: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default = "Vec::new")]
    result: Vec<T>,
}

impl TaxonSummary {
    pub fn into_record(self) -> SpeciesRecord {
        SpeciesRecord::new(
            non_empty(self.scientific_name)
                .unwrap_or_else(|| UNKNOWN_SCIENTIFIC_NAME.to_string()),
            non_empty(self.main_common_name),
            self.category,
            self.taxonid,
        )
    }
}

impl TaxonDetail {
    /// Maps the detail document, using `fallback_name` when the catalog
    /// omits the scientific name.
    pub fn into_record(self, fallback_name: &str) -> SpeciesRecord {
        let common_name = self
            .common_names
            .into_iter()
            .next()
            .and_then(|entry| non_empty(entry.common_name));
        let description = self
            .taxonomy
            .and_then(|taxonomy| taxonomy.habitats.into_iter().next())
            .and_then(|habitat| habitat.habitat_description);
        SpeciesRecord::new(
            non_empty(self.name).unwrap_or_else(|| fallback_name.to_string()),
            common_name,
            self.category,
            self.taxonid,
        )
        .with_description(description)
        .with_image(self.picture_url)
    }
}

pub trait CatalogClient: Send + Sync {
    /// Fails when the client cannot talk to the catalog at all, e.g. no
    /// credential. Checked once before an ingest starts.
    fn ensure_configured(&self) -> Result<(), SpeciesError> {
        Ok(())
    }

    fn categories(&self) -> Result<Vec<CategoryCode>, SpeciesError>;

    fn category_page(
        &self,
        code: &CategoryCode,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<TaxonSummary>, SpeciesError>;

    fn search_by_name(&self, name: &str) -> Result<Vec<TaxonDetail>, SpeciesError>;

    fn taxon(&self, id: TaxonId) -> Result<Option<TaxonDetail>, SpeciesError>;
}

/// Codes are kept as the catalog spells them. An entry that cannot be used as
/// a code is skipped, never fatal to the enumeration.
pub fn parse_categories(body: &str) -> Result<Vec<CategoryCode>, SpeciesError> {
    let envelope: Envelope<CategoryEntry> = decode(body)?;
    let codes = envelope
        .result
        .into_iter()
        .filter_map(|entry| match CategoryCode::from_catalog(&entry.code) {
            Ok(code) => Some(code),
            Err(err) => {
                warn!(code = %entry.code, error = %err, "skipping unusable category code");
                None
            }
        })
        .collect();
    Ok(codes)
}

pub fn parse_taxon_page(body: &str) -> Result<Vec<TaxonSummary>, SpeciesError> {
    let envelope: Envelope<TaxonSummary> = decode(body)?;
    Ok(envelope.result)
}

pub fn parse_taxon_details(body: &str) -> Result<Vec<TaxonDetail>, SpeciesError> {
    let envelope: Envelope<TaxonDetail> = decode(body)?;
    Ok(envelope.result)
}

fn decode<T: for<'de> Deserialize<'de>>(body: &str) -> Result<Envelope<T>, SpeciesError> {
    if body.trim().is_empty() {
        return Ok(Envelope { result: Vec::new() });
    }
    serde_json::from_str(body).map_err(|err| SpeciesError::CatalogHttp(err.to_string()))
}

#[derive(Clone)]
pub struct CatalogHttpClient {
    client: Client,
    base_url: String,
    max_retries: usize,
}

impl CatalogHttpClient {
    /// Builds the client; refuses to start without a bearer credential.
    pub fn new(settings: &CatalogSettings) -> Result<Self, SpeciesError> {
        let token = settings.require_token()?;
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("species-cache/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SpeciesError::CatalogHttp(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| SpeciesError::MissingToken)?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|err| SpeciesError::CatalogHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            max_retries: settings.max_retries,
        })
    }

    pub fn categories_url(&self) -> String {
        format!("{}/categories", self.base_url)
    }

    /// The code is a single path segment, so `LR/cd` is sent as `LR%2Fcd`.
    pub fn category_url(&self, code: &CategoryCode) -> Result<String, SpeciesError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|err| SpeciesError::ConfigParse(format!("catalog base url: {err}")))?;
        url.path_segments_mut()
            .map_err(|_| {
                SpeciesError::ConfigParse(format!(
                    "catalog base url cannot carry a path: {}",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(["category", code.as_str()]);
        Ok(url.into())
    }

    pub fn search_url(&self) -> String {
        format!("{}/search", self.base_url)
    }

    pub fn taxon_url(&self, id: TaxonId) -> String {
        format!("{}/taxon/{}", self.base_url, id.get())
    }

    fn get_text<F>(&self, make_req: F) -> Result<String, SpeciesError>
    where
        F: FnMut() -> RequestBuilder,
    {
        let response = self.send_with_retries(make_req)?;
        let response = Self::handle_status(response)?;
        response
            .text()
            .map_err(|err| SpeciesError::CatalogHttp(err.to_string()))
    }

    fn handle_status(response: Response) -> Result<Response, SpeciesError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "catalog request failed".to_string());
        Err(SpeciesError::CatalogStatus { status, message })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, SpeciesError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < self.max_retries && is_retryable_status(status) {
                        tracing::debug!(status, attempt, "retrying catalog request");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < self.max_retries && is_retryable_error(&err) {
                        tracing::debug!(error = %err, attempt, "retrying catalog request");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(SpeciesError::CatalogHttp(err.to_string()));
                }
            }
        }
    }
}

impl CatalogClient for CatalogHttpClient {
    fn categories(&self) -> Result<Vec<CategoryCode>, SpeciesError> {
        let url = self.categories_url();
        let body = self.get_text(|| self.client.get(&url))?;
        parse_categories(&body)
    }

    fn category_page(
        &self,
        code: &CategoryCode,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<TaxonSummary>, SpeciesError> {
        let url = self.category_url(code)?;
        let body = self.get_text(|| {
            self.client.get(&url).query(&[
                ("page", page.to_string()),
                ("per_page", per_page.to_string()),
                ("latest", "true".to_string()),
            ])
        })?;
        parse_taxon_page(&body)
    }

    fn search_by_name(&self, name: &str) -> Result<Vec<TaxonDetail>, SpeciesError> {
        let url = self.search_url();
        let body = self.get_text(|| self.client.get(&url).query(&[("name", name)]))?;
        parse_taxon_details(&body)
    }

    fn taxon(&self, id: TaxonId) -> Result<Option<TaxonDetail>, SpeciesError> {
        let url = self.taxon_url(id);
        let body = self.get_text(|| self.client.get(&url))?;
        Ok(parse_taxon_details(&body)?.into_iter().next())
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
