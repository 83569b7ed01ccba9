use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tempfile::Builder;

use crate::domain::{CategoryCode, SpeciesRecord};
use crate::error::SpeciesError;

/// A persisted species document: store-assigned id and timestamps around
/// the normalized record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSpecies {
    pub id: u64,
    #[serde(flatten)]
    pub record: SpeciesRecord,
    pub created_at: String,
    pub updated_at: String,
}

impl StoredSpecies {
    pub fn updated_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.updated_at)
            .ok()
            .map(|value| value.with_timezone(&Utc))
    }
}

/// Find/delete filter. Results are always ordered by scientific name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeciesFilter {
    pub category: Option<CategoryCode>,
}

impl SpeciesFilter {
    pub fn all() -> Self {
        Self { category: None }
    }

    pub fn category(code: CategoryCode) -> Self {
        Self {
            category: Some(code),
        }
    }

    pub fn matches(&self, record: &SpeciesRecord) -> bool {
        match &self.category {
            Some(code) => record.matches_category(code),
            None => true,
        }
    }
}

/// Natural key used by the single-record upsert path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NaturalKey {
    ScientificName(String),
    ExternalId(u64),
}

impl NaturalKey {
    fn matches(&self, record: &SpeciesRecord) -> bool {
        match self {
            NaturalKey::ScientificName(name) => &record.scientific_name == name,
            NaturalKey::ExternalId(id) => record.external_id == Some(*id),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InsertSummary {
    pub inserted: usize,
    pub skipped: usize,
}

pub trait DocumentStore: Send + Sync {
    fn find(&self, filter: &SpeciesFilter) -> Result<Vec<StoredSpecies>, SpeciesError>;

    /// Unordered bulk insert. A record whose (external id, scientific name)
    /// pair already exists, in the store or earlier in the batch, is skipped
    /// without aborting the rest of the batch.
    fn insert_many_skip_duplicates(
        &self,
        records: Vec<SpeciesRecord>,
    ) -> Result<InsertSummary, SpeciesError>;

    /// Overwrites every field of the first document matching `key`, or
    /// creates one. Returns the stored document.
    fn upsert(&self, key: &NaturalKey, record: SpeciesRecord)
    -> Result<StoredSpecies, SpeciesError>;

    fn delete(&self, filter: &SpeciesFilter) -> Result<usize, SpeciesError>;

    /// Drops every document matching any of `scopes`, then bulk inserts
    /// `records` with the same duplicate rule as `insert_many_skip_duplicates`.
    /// Both happen in one write; on error the store is left as it was.
    /// Returns the number of documents removed alongside the insert summary.
    fn replace(
        &self,
        scopes: &[SpeciesFilter],
        records: Vec<SpeciesRecord>,
    ) -> Result<(usize, InsertSummary), SpeciesError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Collection {
    next_id: u64,
    species: Vec<StoredSpecies>,
}

type UniqueKey = (Option<u64>, String);

fn unique_key(record: &SpeciesRecord) -> UniqueKey {
    (record.external_id, record.scientific_name.clone())
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

impl Collection {
    fn find(&self, filter: &SpeciesFilter) -> Vec<StoredSpecies> {
        let mut found = self
            .species
            .iter()
            .filter(|doc| filter.matches(&doc.record))
            .cloned()
            .collect::<Vec<_>>();
        found.sort_by(|a, b| {
            a.record
                .scientific_name
                .cmp(&b.record.scientific_name)
                .then(a.id.cmp(&b.id))
        });
        found
    }

    fn insert_many_skip_duplicates(&mut self, records: Vec<SpeciesRecord>) -> InsertSummary {
        let mut seen = self
            .species
            .iter()
            .map(|doc| unique_key(&doc.record))
            .collect::<HashSet<_>>();
        let mut summary = InsertSummary::default();
        let timestamp = now();
        for record in records {
            if !seen.insert(unique_key(&record)) {
                summary.skipped += 1;
                continue;
            }
            let id = self.allocate_id();
            self.species.push(StoredSpecies {
                id,
                record,
                created_at: timestamp.clone(),
                updated_at: timestamp.clone(),
            });
            summary.inserted += 1;
        }
        summary
    }

    fn upsert(&mut self, key: &NaturalKey, record: SpeciesRecord) -> StoredSpecies {
        let timestamp = now();
        if let Some(doc) = self
            .species
            .iter_mut()
            .filter(|doc| key.matches(&doc.record))
            .min_by_key(|doc| doc.id)
        {
            doc.record = record;
            doc.updated_at = timestamp;
            return doc.clone();
        }
        let id = self.allocate_id();
        let doc = StoredSpecies {
            id,
            record,
            created_at: timestamp.clone(),
            updated_at: timestamp,
        };
        self.species.push(doc.clone());
        doc
    }

    fn delete(&mut self, filter: &SpeciesFilter) -> usize {
        let before = self.species.len();
        self.species.retain(|doc| !filter.matches(&doc.record));
        before - self.species.len()
    }

    fn replace(
        &mut self,
        scopes: &[SpeciesFilter],
        records: Vec<SpeciesRecord>,
    ) -> (usize, InsertSummary) {
        let removed = scopes.iter().map(|scope| self.delete(scope)).sum();
        (removed, self.insert_many_skip_duplicates(records))
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Process-local store, used by tests and as a throwaway cache.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Collection>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Collection>, SpeciesError> {
        self.inner
            .lock()
            .map_err(|_| SpeciesError::Store("memory store lock poisoned".to_string()))
    }
}

impl DocumentStore for MemoryStore {
    fn find(&self, filter: &SpeciesFilter) -> Result<Vec<StoredSpecies>, SpeciesError> {
        Ok(self.lock()?.find(filter))
    }

    fn insert_many_skip_duplicates(
        &self,
        records: Vec<SpeciesRecord>,
    ) -> Result<InsertSummary, SpeciesError> {
        Ok(self.lock()?.insert_many_skip_duplicates(records))
    }

    fn upsert(
        &self,
        key: &NaturalKey,
        record: SpeciesRecord,
    ) -> Result<StoredSpecies, SpeciesError> {
        Ok(self.lock()?.upsert(key, record))
    }

    fn delete(&self, filter: &SpeciesFilter) -> Result<usize, SpeciesError> {
        Ok(self.lock()?.delete(filter))
    }

    fn replace(
        &self,
        scopes: &[SpeciesFilter],
        records: Vec<SpeciesRecord>,
    ) -> Result<(usize, InsertSummary), SpeciesError> {
        Ok(self.lock()?.replace(scopes, records))
    }
}

/// Single JSON document file, rewritten atomically on every mutation.
#[derive(Debug)]
pub struct FileStore {
    path: Utf8PathBuf,
    guard: Mutex<()>,
}

impl FileStore {
    pub fn new() -> Result<Self, SpeciesError> {
        let path = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.home_dir()
                        .join(".cache")
                        .join("species-cache")
                        .join("species.json"),
                )
                .ok()
            })
            .ok_or_else(|| {
                SpeciesError::Filesystem("unable to resolve cache directory".to_string())
            })?;
        Ok(Self::new_with_path(path))
    }

    pub fn new_with_path(path: Utf8PathBuf) -> Self {
        Self {
            path,
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn with_collection<T>(
        &self,
        mutate: bool,
        f: impl FnOnce(&mut Collection) -> T,
    ) -> Result<T, SpeciesError> {
        let _guard = self
            .guard
            .lock()
            .map_err(|_| SpeciesError::Store("file store lock poisoned".to_string()))?;
        let mut collection = self.load()?;
        let value = f(&mut collection);
        if mutate {
            self.save(&collection)?;
        }
        Ok(value)
    }

    fn load(&self) -> Result<Collection, SpeciesError> {
        if !self.path.as_std_path().exists() {
            return Ok(Collection::default());
        }
        let content = fs::read_to_string(self.path.as_std_path())
            .map_err(|err| SpeciesError::Filesystem(err.to_string()))?;
        serde_json::from_str(&content)
            .map_err(|err| SpeciesError::Store(format!("corrupt store {}: {err}", self.path)))
    }

    fn save(&self, collection: &Collection) -> Result<(), SpeciesError> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| SpeciesError::Filesystem("invalid store path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| SpeciesError::Filesystem(err.to_string()))?;
        let content = serde_json::to_vec_pretty(collection)
            .map_err(|err| SpeciesError::Store(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix("species-cache")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| SpeciesError::Filesystem(err.to_string()))?;
        temp.write_all(&content)
            .map_err(|err| SpeciesError::Filesystem(err.to_string()))?;
        temp.persist(self.path.as_std_path())
            .map_err(|err| SpeciesError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

impl DocumentStore for FileStore {
    fn find(&self, filter: &SpeciesFilter) -> Result<Vec<StoredSpecies>, SpeciesError> {
        self.with_collection(false, |collection| collection.find(filter))
    }

    fn insert_many_skip_duplicates(
        &self,
        records: Vec<SpeciesRecord>,
    ) -> Result<InsertSummary, SpeciesError> {
        self.with_collection(true, |collection| {
            collection.insert_many_skip_duplicates(records)
        })
    }

    fn upsert(
        &self,
        key: &NaturalKey,
        record: SpeciesRecord,
    ) -> Result<StoredSpecies, SpeciesError> {
        self.with_collection(true, |collection| collection.upsert(key, record))
    }

    fn delete(&self, filter: &SpeciesFilter) -> Result<usize, SpeciesError> {
        self.with_collection(true, |collection| collection.delete(filter))
    }

    fn replace(
        &self,
        scopes: &[SpeciesFilter],
        records: Vec<SpeciesRecord>,
    ) -> Result<(usize, InsertSummary), SpeciesError> {
        self.with_collection(true, |collection| collection.replace(scopes, records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, category: &str, id: u64) -> SpeciesRecord {
        SpeciesRecord::new(name, None, Some(category.to_string()), Some(id))
    }

    #[test]
    fn find_sorts_by_scientific_name() {
        let store = MemoryStore::new();
        store
            .insert_many_skip_duplicates(vec![
                record("Vulpes vulpes", "LC", 3),
                record("Ailurus fulgens", "EN", 1),
                record("Panthera tigris", "EN", 2),
            ])
            .unwrap();

        let names = store
            .find(&SpeciesFilter::all())
            .unwrap()
            .into_iter()
            .map(|doc| doc.record.scientific_name)
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec!["Ailurus fulgens", "Panthera tigris", "Vulpes vulpes"]
        );

        let endangered = store
            .find(&SpeciesFilter::category("en".parse().unwrap()))
            .unwrap();
        assert_eq!(endangered.len(), 2);
    }

    #[test]
    fn duplicates_inside_one_batch_are_skipped() {
        let store = MemoryStore::new();
        let summary = store
            .insert_many_skip_duplicates(vec![
                record("Panthera tigris", "EN", 2),
                record("Panthera tigris", "EN", 2),
                record("Panthera tigris", "EN", 99),
            ])
            .unwrap();
        assert_eq!(
            summary,
            InsertSummary {
                inserted: 2,
                skipped: 1
            }
        );
    }

    #[test]
    fn upsert_keeps_identity() {
        let store = MemoryStore::new();
        let first = store
            .upsert(&NaturalKey::ExternalId(7), record("Old name", "VU", 7))
            .unwrap();
        let second = store
            .upsert(&NaturalKey::ExternalId(7), record("New name", "EN", 7))
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.record.scientific_name, "New name");
        assert_eq!(store.find(&SpeciesFilter::all()).unwrap().len(), 1);
        assert!(second.updated_at_utc().is_some());
    }

    #[test]
    fn replace_only_touches_listed_scopes() {
        let store = MemoryStore::new();
        store
            .insert_many_skip_duplicates(vec![
                record("Gorilla gorilla", "CR", 1),
                record("Diceros bicornis", "CR", 2),
                record("Ursus maritimus", "VU", 3),
            ])
            .unwrap();

        let (removed, summary) = store
            .replace(
                &[SpeciesFilter::category("VU".parse().unwrap())],
                vec![record("Acinonyx jubatus", "VU", 4)],
            )
            .unwrap();

        assert_eq!(removed, 1);
        assert_eq!(summary.inserted, 1);
        let names = store
            .find(&SpeciesFilter::all())
            .unwrap()
            .into_iter()
            .map(|doc| doc.record.scientific_name)
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec!["Acinonyx jubatus", "Diceros bicornis", "Gorilla gorilla"]
        );
    }
}
