use std::fs;

use species_cache::catalog::{parse_categories, parse_taxon_details, parse_taxon_page};
use species_cache::domain::{NOT_EVALUATED, PLACEHOLDER_DESCRIPTION, PLACEHOLDER_IMAGE};

#[test]
fn parse_category_enumeration() {
    let raw = fs::read_to_string("tests/fixtures/categories.json").unwrap();
    let codes = parse_categories(&raw).unwrap();
    let codes = codes.iter().map(|code| code.as_str()).collect::<Vec<_>>();
    assert_eq!(codes, vec!["EX", "CR", "VU", "LR/cd", "LR/nt"]);
}

#[test]
fn unusable_category_code_does_not_fail_enumeration() {
    let codes =
        parse_categories(r#"{"result":[{"code":"VU"},{"code":"EN"},{"code":"LR/cd"},{"code":"??"}]}"#)
            .unwrap();
    let codes = codes.iter().map(|code| code.as_str()).collect::<Vec<_>>();
    assert_eq!(codes, vec!["VU", "EN", "LR/cd"]);
}

#[test]
fn map_category_page() {
    let raw = fs::read_to_string("tests/fixtures/category_page_vu.json").unwrap();
    let records = parse_taxon_page(&raw)
        .unwrap()
        .into_iter()
        .map(|taxon| taxon.into_record())
        .collect::<Vec<_>>();

    assert_eq!(records.len(), 3);
    assert_eq!(records[0].scientific_name, "Ursus maritimus");
    assert_eq!(records[0].common_name, "Polar Bear");
    assert_eq!(records[0].external_id, Some(22823));
    assert_eq!(records[0].image, PLACEHOLDER_IMAGE);
    assert_eq!(records[0].description, PLACEHOLDER_DESCRIPTION);
    assert_eq!(records[1].common_name, "");
    assert_eq!(records[2].scientific_name, "Unknown");
    assert_eq!(records[2].category, NOT_EVALUATED);
    assert_eq!(records[2].status, NOT_EVALUATED);
}

#[test]
fn map_search_detail() {
    let raw = fs::read_to_string("tests/fixtures/search_panthera_leo.json").unwrap();
    let first = parse_taxon_details(&raw).unwrap().into_iter().next().unwrap();
    let record = first.into_record("panthera leo");

    assert_eq!(record.scientific_name, "Panthera leo");
    assert_eq!(record.common_name, "Lion");
    assert_eq!(record.category, "VU");
    assert_eq!(record.status, "VU");
    assert_eq!(record.external_id, Some(15951));
    assert_eq!(record.description, "Savanna and open woodland");
    assert_eq!(record.image, "https://images.example.org/panthera-leo.jpg");
}

#[test]
fn malformed_body_is_an_upstream_error() {
    let err = parse_taxon_page("{\"result\": 5}").unwrap_err();
    assert!(err.is_upstream());
}
