use std::fmt::Write as _;
use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    CategoryReport, InvalidateResult, ListSource, PageStop, SearchResult, SpeciesList,
};
use crate::domain::SpeciesRecord;
use crate::store::{InsertSummary, StoredSpecies};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

/// JSON shape of a listing. Cache hits carry only the records; an ingest
/// also reports per-category pagination and flags a listing where some
/// category stopped early.
#[derive(Serialize)]
struct ListView<'a> {
    source: ListSource,
    count: usize,
    species: &'a [SpeciesRecord],
    #[serde(skip_serializing_if = "no_reports")]
    categories: &'a [CategoryReport],
    #[serde(skip_serializing_if = "Option::is_none")]
    persisted: Option<InsertSummary>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    partial: bool,
}

impl<'a> From<&'a SpeciesList> for ListView<'a> {
    fn from(result: &'a SpeciesList) -> Self {
        Self {
            source: result.source,
            count: result.count,
            species: &result.species,
            categories: &result.categories,
            persisted: result.persisted,
            partial: is_partial(result),
        }
    }
}

fn no_reports(reports: &&[CategoryReport]) -> bool {
    reports.is_empty()
}

fn is_partial(result: &SpeciesList) -> bool {
    result
        .categories
        .iter()
        .any(|report| matches!(report.stop, PageStop::Failed { .. }))
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_list(result: &SpeciesList) -> io::Result<()> {
        Self::print_json(&ListView::from(result))
    }

    pub fn print_species(result: &StoredSpecies) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_search(result: &SearchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_invalidate(result: &InvalidateResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl crate::app::ProgressSink for JsonOutput {
    fn event(&self, _event: crate::app::ProgressEvent) {}
}

struct Palette {
    green: &'static str,
    yellow: &'static str,
    cyan: &'static str,
    reset: &'static str,
}

impl Palette {
    fn new(color: bool) -> Self {
        if color {
            Self {
                green: "\x1b[32m",
                yellow: "\x1b[33m",
                cyan: "\x1b[36m",
                reset: "\x1b[0m",
            }
        } else {
            Self {
                green: "",
                yellow: "",
                cyan: "",
                reset: "",
            }
        }
    }
}

/// Human summary printed after the interactive list screen closes.
pub fn render_list_summary(result: &SpeciesList, color: bool) -> String {
    let Palette {
        green,
        yellow,
        cyan,
        reset,
    } = Palette::new(color);
    let mut out = String::new();

    let _ = writeln!(out, "{cyan}SPECIES-CACHE summary{reset}");
    let source = match result.source {
        ListSource::Cache => "from cache",
        ListSource::Catalog => "from catalog",
    };
    let _ = writeln!(out, "{green}{} species ({source}){reset}", result.count);
    if let Some(persisted) = result.persisted {
        let _ = writeln!(
            out,
            "{green}cached {} new, skipped {} duplicates{reset}",
            persisted.inserted, persisted.skipped
        );
    }
    for report in &result.categories {
        match &report.stop {
            PageStop::Exhausted => {
                let _ = writeln!(
                    out,
                    "{green}  {} pages={} records={}{reset}",
                    report.code, report.pages, report.records
                );
            }
            PageStop::Failed { page, message } => {
                let _ = writeln!(
                    out,
                    "{yellow}  {} pages={} records={} stopped at page {page}: {message}{reset}",
                    report.code, report.pages, report.records
                );
            }
        }
    }
    for species in &result.species {
        let _ = writeln!(
            out,
            "  {} [{}] {}",
            species.scientific_name, species.category, species.common_name
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_list(stop: PageStop) -> SpeciesList {
        SpeciesList {
            source: ListSource::Catalog,
            count: 1,
            species: vec![SpeciesRecord::new(
                "Ursus maritimus",
                Some("Polar Bear".to_string()),
                Some("VU".to_string()),
                Some(22823),
            )],
            categories: vec![CategoryReport {
                code: "VU".parse().unwrap(),
                pages: 1,
                requests: 2,
                records: 1,
                stop,
            }],
            persisted: Some(InsertSummary {
                inserted: 1,
                skipped: 0,
            }),
        }
    }

    #[test]
    fn list_view_flags_partial_ingest() {
        let list = catalog_list(PageStop::Failed {
            page: 2,
            message: "connection reset".to_string(),
        });
        let value = serde_json::to_value(ListView::from(&list)).unwrap();
        assert_eq!(value["partial"], true);
        assert_eq!(value["categories"][0]["stop"]["reason"], "failed");

        let complete = catalog_list(PageStop::Exhausted);
        let value = serde_json::to_value(ListView::from(&complete)).unwrap();
        assert!(value.get("partial").is_none());
        assert_eq!(value["species"][0]["scientificName"], "Ursus maritimus");
    }

    #[test]
    fn cache_hit_view_has_only_records() {
        let list = SpeciesList {
            source: ListSource::Cache,
            categories: Vec::new(),
            persisted: None,
            ..catalog_list(PageStop::Exhausted)
        };
        let value = serde_json::to_value(ListView::from(&list)).unwrap();
        assert_eq!(value["source"], "cache");
        assert!(value.get("categories").is_none());
        assert!(value.get("persisted").is_none());
        assert!(value.get("partial").is_none());
    }

    #[test]
    fn summary_names_the_failed_page() {
        let list = catalog_list(PageStop::Failed {
            page: 2,
            message: "connection reset".to_string(),
        });
        let text = render_list_summary(&list, false);
        assert!(text.contains("1 species (from catalog)"));
        assert!(text.contains("VU pages=1 records=1 stopped at page 2: connection reset"));
        assert!(text.contains("Ursus maritimus [VU] Polar Bear"));
        assert!(!text.contains('\x1b'));
    }
}
