use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogClient, TaxonSummary};
use crate::config::CachePolicy;
use crate::domain::{CategoryCode, SpeciesRecord, TaxonId, UNKNOWN_SCIENTIFIC_NAME};
use crate::error::SpeciesError;
use crate::inflight::InflightGuard;
use crate::store::{DocumentStore, InsertSummary, NaturalKey, SpeciesFilter, StoredSpecies};

/// Page size requested from the catalog for every category page.
pub const PAGE_SIZE: u32 = 100;

const FULL_SCOPE: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListSource {
    Cache,
    Catalog,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum PageStop {
    /// An empty page ended the category.
    Exhausted,
    /// A request failed; records from earlier pages were kept.
    Failed { page: u32, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryReport {
    pub code: CategoryCode,
    pub pages: u32,
    pub requests: u32,
    pub records: usize,
    pub stop: PageStop,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeciesList {
    pub source: ListSource,
    pub count: usize,
    pub species: Vec<SpeciesRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<CategoryReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persisted: Option<InsertSummary>,
}

impl SpeciesList {
    fn from_cache(docs: Vec<StoredSpecies>) -> Self {
        let species = docs.into_iter().map(|doc| doc.record).collect::<Vec<_>>();
        Self {
            source: ListSource::Cache,
            count: species.len(),
            species,
            categories: Vec::new(),
            persisted: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub found: Vec<StoredSpecies>,
    pub missed: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResult {
    pub category: Option<CategoryCode>,
    pub removed: usize,
}

#[derive(Debug, Clone, Copy)]
pub enum ProgressSinkKind {
    List,
    Lookup,
    Search,
    Invalidate,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            elapsed: None,
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// The species cache service: serves the document store, falling back to
/// the external catalog on a miss.
pub struct App<C: CatalogClient, S: DocumentStore> {
    catalog: C,
    store: S,
    policy: CachePolicy,
    inflight: InflightGuard,
}

impl<C: CatalogClient, S: DocumentStore> App<C, S> {
    pub fn new(catalog: C, store: S, policy: CachePolicy) -> Self {
        Self {
            catalog,
            store,
            policy,
            inflight: InflightGuard::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Lists cached species for `category` (or all), populating the cache
    /// from the catalog when nothing is stored yet. A blank category means
    /// no filter.
    pub fn list_species(
        &self,
        category: Option<&str>,
        sink: &dyn ProgressSink,
    ) -> Result<SpeciesList, SpeciesError> {
        let code = parse_filter(category)?;
        let filter = SpeciesFilter {
            category: code.clone(),
        };

        sink.event(ProgressEvent::new(format!(
            "phase=Resolve; querying store for {}",
            scope_label(code.as_ref())
        )));
        let cached = self.store.find(&filter)?;
        if !cached.is_empty() && !self.is_stale(&cached) {
            info!(count = cached.len(), scope = %scope_label(code.as_ref()), "cache hit");
            return Ok(SpeciesList::from_cache(cached));
        }

        if !self.policy.single_flight {
            return self.ingest(code, cached, sink);
        }

        let scope = code
            .as_ref()
            .map(|code| code.as_str().to_string())
            .unwrap_or_else(|| FULL_SCOPE.to_string());
        self.inflight.run(&scope, || {
            // Another caller may have populated the scope while we waited.
            let cached = self.store.find(&filter)?;
            if !cached.is_empty() && !self.is_stale(&cached) {
                info!(count = cached.len(), scope = %scope, "cache hit after wait");
                return Ok(SpeciesList::from_cache(cached));
            }
            self.ingest(code, cached, sink)
        })?
    }

    /// Searches the catalog by name and upserts the first match keyed on its
    /// scientific name.
    pub fn lookup_species_by_name(
        &self,
        name: &str,
        sink: &dyn ProgressSink,
    ) -> Result<StoredSpecies, SpeciesError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SpeciesError::SpeciesNotFound(String::new()));
        }
        self.catalog.ensure_configured()?;

        sink.event(ProgressEvent::new(format!("phase=Fetch; searching {name}")));
        let start = Instant::now();
        let matches = self.catalog.search_by_name(name)?;
        sink.event(ProgressEvent::new(format!(
            "catalog.response latency_ms={}",
            start.elapsed().as_millis()
        )));

        let Some(first) = matches.into_iter().next() else {
            return Err(SpeciesError::SpeciesNotFound(name.to_string()));
        };
        let record = first.into_record(name);
        let key = NaturalKey::ScientificName(record.scientific_name.clone());

        sink.event(ProgressEvent::new("phase=Store; upserting by scientific name"));
        let stored = self.store.upsert(&key, record)?;
        info!(name = %stored.record.scientific_name, id = stored.id, "species upserted");
        Ok(stored)
    }

    /// Fetches a taxon by catalog id and upserts it keyed on that id.
    pub fn lookup_species_by_id(
        &self,
        id: TaxonId,
        sink: &dyn ProgressSink,
    ) -> Result<StoredSpecies, SpeciesError> {
        self.catalog.ensure_configured()?;

        sink.event(ProgressEvent::new(format!("phase=Fetch; taxon {id}")));
        let detail = self
            .catalog
            .taxon(id)?
            .ok_or_else(|| SpeciesError::SpeciesNotFound(format!("taxon {id}")))?;
        let mut record = detail.into_record(UNKNOWN_SCIENTIFIC_NAME);
        record.external_id = Some(id.get());

        sink.event(ProgressEvent::new("phase=Store; upserting by taxon id"));
        let stored = self.store.upsert(&NaturalKey::ExternalId(id.get()), record)?;
        info!(taxon = id.get(), id = stored.id, "species upserted");
        Ok(stored)
    }

    /// Looks up each name in turn; names that fail are reported as missed.
    pub fn search_multiple_species(
        &self,
        names: &[String],
        sink: &dyn ProgressSink,
    ) -> Result<SearchResult, SpeciesError> {
        self.catalog.ensure_configured()?;
        let mut found = Vec::new();
        let mut missed = Vec::new();
        for name in names {
            match self.lookup_species_by_name(name, sink) {
                Ok(stored) => found.push(stored),
                Err(err) => {
                    warn!(name = %name, error = %err, "could not fetch species");
                    missed.push(name.clone());
                }
            }
        }
        Ok(SearchResult { found, missed })
    }

    /// Drops cached records for `category` (or everything) so the next list
    /// goes back to the catalog.
    pub fn invalidate(
        &self,
        category: Option<&str>,
        sink: &dyn ProgressSink,
    ) -> Result<InvalidateResult, SpeciesError> {
        let code = parse_filter(category)?;
        sink.event(ProgressEvent::new(format!(
            "phase=Store; invalidating {}",
            scope_label(code.as_ref())
        )));
        let removed = self.store.delete(&SpeciesFilter {
            category: code.clone(),
        })?;
        info!(removed, scope = %scope_label(code.as_ref()), "cache invalidated");
        Ok(InvalidateResult {
            category: code,
            removed,
        })
    }

    fn ingest(
        &self,
        code: Option<CategoryCode>,
        stale: Vec<StoredSpecies>,
        sink: &dyn ProgressSink,
    ) -> Result<SpeciesList, SpeciesError> {
        self.catalog.ensure_configured()?;
        let refreshing = !stale.is_empty();
        info!(
            scope = %scope_label(code.as_ref()),
            refreshing, "cache miss; fetching from catalog"
        );

        let codes = self.resolve_codes(code, sink)?;
        let mut species = Vec::new();
        let mut categories = Vec::with_capacity(codes.len());
        for code in &codes {
            categories.push(self.paginate_category(code, &mut species, sink));
        }

        if species.is_empty() {
            if refreshing {
                warn!("catalog returned nothing; serving stale cache");
                return Ok(SpeciesList {
                    categories,
                    ..SpeciesList::from_cache(stale)
                });
            }
            return Ok(SpeciesList {
                source: ListSource::Catalog,
                count: 0,
                species,
                categories,
                persisted: None,
            });
        }

        sink.event(ProgressEvent::new(format!(
            "phase=Store; caching {} species",
            species.len()
        )));
        let persisted = self.persist(refreshing, &categories, &species);

        Ok(SpeciesList {
            source: ListSource::Catalog,
            count: species.len(),
            species,
            categories,
            persisted,
        })
    }

    fn resolve_codes(
        &self,
        code: Option<CategoryCode>,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<CategoryCode>, SpeciesError> {
        if let Some(code) = code {
            return Ok(vec![code]);
        }

        sink.event(ProgressEvent::new("phase=Resolve; enumerating categories"));
        let codes = self.catalog.categories().map_err(|err| {
            warn!(error = %err, "category enumeration failed");
            SpeciesError::CategoriesUnavailable(err.to_string())
        })?;

        let mut unique: Vec<CategoryCode> = Vec::with_capacity(codes.len());
        for code in codes {
            if !unique.contains(&code) {
                unique.push(code);
            }
        }
        if unique.is_empty() {
            return Err(SpeciesError::CategoriesUnavailable(
                "catalog returned no category codes".to_string(),
            ));
        }
        Ok(unique)
    }

    fn paginate_category(
        &self,
        code: &CategoryCode,
        species: &mut Vec<SpeciesRecord>,
        sink: &dyn ProgressSink,
    ) -> CategoryReport {
        let mut page = 1u32;
        let mut records = 0usize;
        let stop = loop {
            sink.event(ProgressEvent::new(format!(
                "phase=Fetch; {code} page {page}"
            )));
            match self.catalog.category_page(code, page, PAGE_SIZE) {
                Ok(batch) if batch.is_empty() => {
                    debug!(category = %code, pages = page - 1, records, "category exhausted");
                    break PageStop::Exhausted;
                }
                Ok(batch) => {
                    records += batch.len();
                    species.extend(batch.into_iter().map(TaxonSummary::into_record));
                    debug!(category = %code, page, total = species.len(), "page fetched");
                    page += 1;
                }
                Err(err) => {
                    warn!(category = %code, page, error = %err, "page fetch failed; keeping partial results");
                    break PageStop::Failed {
                        page,
                        message: err.to_string(),
                    };
                }
            }
        };

        CategoryReport {
            code: code.clone(),
            pages: page - 1,
            requests: page,
            records,
            stop,
        }
    }

    fn persist(
        &self,
        refreshing: bool,
        categories: &[CategoryReport],
        species: &[SpeciesRecord],
    ) -> Option<InsertSummary> {
        let outcome = if refreshing {
            // Only categories read to the end are replaced; a category that
            // failed part way keeps its stale documents.
            let scopes = categories
                .iter()
                .filter(|report| matches!(report.stop, PageStop::Exhausted))
                .map(|report| SpeciesFilter::category(report.code.clone()))
                .collect::<Vec<_>>();
            self.store
                .replace(&scopes, species.to_vec())
                .map(|(removed, summary)| {
                    debug!(removed, scopes = scopes.len(), "replaced stale records");
                    summary
                })
        } else {
            self.store.insert_many_skip_duplicates(species.to_vec())
        };
        match outcome {
            Ok(summary) => {
                info!(
                    inserted = summary.inserted,
                    skipped = summary.skipped,
                    "cached species from catalog"
                );
                Some(summary)
            }
            Err(err) => {
                warn!(error = %err, "failed to cache species; returning fetched records");
                None
            }
        }
    }

    fn is_stale(&self, docs: &[StoredSpecies]) -> bool {
        let Some(ttl) = self.policy.ttl else {
            return false;
        };
        let now = Utc::now();
        docs.iter().any(|doc| match doc.updated_at_utc() {
            Some(updated_at) => (now - updated_at)
                .to_std()
                .map(|age| age >= ttl)
                .unwrap_or(false),
            None => true,
        })
    }
}

fn parse_filter(category: Option<&str>) -> Result<Option<CategoryCode>, SpeciesError> {
    category
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::parse::<CategoryCode>)
        .transpose()
}

fn scope_label(code: Option<&CategoryCode>) -> String {
    code.map(|code| code.as_str().to_string())
        .unwrap_or_else(|| "all categories".to_string())
}
