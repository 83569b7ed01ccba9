use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use species_cache::domain::SpeciesRecord;
use species_cache::error::SpeciesError;
use species_cache::store::{DocumentStore, FileStore, InsertSummary, NaturalKey, SpeciesFilter};

fn record(name: &str, category: &str, id: u64) -> SpeciesRecord {
    SpeciesRecord::new(name, None, Some(category.to_string()), Some(id))
}

fn temp_store(temp: &tempfile::TempDir) -> FileStore {
    let path = Utf8PathBuf::from_path_buf(temp.path().join("cache").join("species.json")).unwrap();
    FileStore::new_with_path(path)
}

#[test]
fn file_store_survives_reopen() {
    let temp = tempfile::tempdir().unwrap();
    let store = temp_store(&temp);
    let summary = store
        .insert_many_skip_duplicates(vec![
            record("Ursus maritimus", "VU", 22823),
            record("Acinonyx jubatus", "VU", 219),
        ])
        .unwrap();
    assert_eq!(
        summary,
        InsertSummary {
            inserted: 2,
            skipped: 0
        }
    );

    let reopened = temp_store(&temp);
    let found = reopened
        .find(&SpeciesFilter::category("vu".parse().unwrap()))
        .unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].record.scientific_name, "Acinonyx jubatus");
}

#[test]
fn file_store_skips_existing_pairs_and_keeps_the_rest() {
    let temp = tempfile::tempdir().unwrap();
    let store = temp_store(&temp);
    store
        .insert_many_skip_duplicates(vec![record("Ursus maritimus", "VU", 22823)])
        .unwrap();

    let summary = store
        .insert_many_skip_duplicates(vec![
            record("Ursus maritimus", "VU", 22823),
            record("Ailuropoda melanoleuca", "VU", 712),
        ])
        .unwrap();

    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(store.find(&SpeciesFilter::all()).unwrap().len(), 2);
}

#[test]
fn file_store_upsert_and_delete() {
    let temp = tempfile::tempdir().unwrap();
    let store = temp_store(&temp);

    let key = NaturalKey::ScientificName("Gorilla gorilla".to_string());
    let created = store
        .upsert(&key, record("Gorilla gorilla", "CR", 9404))
        .unwrap();
    let updated = store
        .upsert(
            &key,
            record("Gorilla gorilla", "CR", 9404).with_image(Some("https://img/g.jpg".into())),
        )
        .unwrap();
    assert_eq!(created.id, updated.id);
    assert_eq!(updated.record.image, "https://img/g.jpg");

    store
        .insert_many_skip_duplicates(vec![record("Vulpes vulpes", "LC", 23062)])
        .unwrap();
    let removed = store
        .delete(&SpeciesFilter::category("CR".parse().unwrap()))
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(store.find(&SpeciesFilter::all()).unwrap().len(), 1);
}

#[test]
fn corrupt_store_file_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let store = temp_store(&temp);
    std::fs::create_dir_all(store.path().parent().unwrap().as_std_path()).unwrap();
    std::fs::write(store.path().as_std_path(), b"not json").unwrap();

    let err = store.find(&SpeciesFilter::all()).unwrap_err();
    assert_matches!(err, SpeciesError::Store(_));
}

#[test]
fn failed_replace_leaves_the_file_untouched() {
    let temp = tempfile::tempdir().unwrap();
    let store = temp_store(&temp);
    std::fs::create_dir_all(store.path().parent().unwrap().as_std_path()).unwrap();
    std::fs::write(store.path().as_std_path(), b"not json").unwrap();

    let err = store
        .replace(
            &[SpeciesFilter::all()],
            vec![record("Ursus maritimus", "VU", 22823)],
        )
        .unwrap_err();

    assert_matches!(err, SpeciesError::Store(_));
    let content = std::fs::read_to_string(store.path().as_std_path()).unwrap();
    assert_eq!(content, "not json");
}

#[test]
fn file_store_replace_keeps_other_categories() {
    let temp = tempfile::tempdir().unwrap();
    let store = temp_store(&temp);
    store
        .insert_many_skip_duplicates(vec![
            record("Gorilla gorilla", "CR", 9404),
            record("Ursus maritimus", "VU", 22823),
        ])
        .unwrap();

    let (removed, summary) = store
        .replace(
            &[SpeciesFilter::category("VU".parse().unwrap())],
            vec![record("Acinonyx jubatus", "VU", 219)],
        )
        .unwrap();

    assert_eq!(removed, 1);
    assert_eq!(summary.inserted, 1);
    let reopened = temp_store(&temp);
    let cr = reopened
        .find(&SpeciesFilter::category("CR".parse().unwrap()))
        .unwrap();
    assert_eq!(cr.len(), 1);
    assert_eq!(reopened.find(&SpeciesFilter::all()).unwrap().len(), 2);
}
