use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use species_cache::app::{App, ProgressSinkKind};
use species_cache::catalog::{CatalogClient, CatalogHttpClient, TaxonDetail, TaxonSummary};
use species_cache::config::{CachePolicy, ConfigLoader, ResolvedConfig};
use species_cache::domain::{CategoryCode, TaxonId};
use species_cache::error::SpeciesError;
use species_cache::output::{JsonOutput, OutputMode, render_list_summary};
use species_cache::store::FileStore;
use species_cache::tui::Tui;

#[derive(Parser)]
#[command(name = "species-cache")]
#[command(about = "Local species cache over a paginated conservation catalog")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List cached species, fetching from the catalog on a miss")]
    List(ListArgs),
    #[command(about = "Look up a species by scientific name and cache it")]
    Name(NameArgs),
    #[command(about = "Look up a species by catalog taxon id and cache it")]
    Id(IdArgs),
    #[command(about = "Look up several species by name, skipping failures")]
    Search(SearchArgs),
    #[command(about = "Drop cached species so the next list refetches them")]
    Invalidate(InvalidateArgs),
}

#[derive(Args)]
struct ListArgs {
    #[arg(long)]
    category: Option<String>,
}

#[derive(Args)]
struct NameArgs {
    name: String,
}

#[derive(Args)]
struct IdArgs {
    id: String,
}

#[derive(Args)]
struct SearchArgs {
    #[arg(required = true)]
    names: Vec<String>,
}

#[derive(Args)]
struct InvalidateArgs {
    #[arg(long)]
    category: Option<String>,

    #[arg(long)]
    yes: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<SpeciesError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SpeciesError) -> u8 {
    match error {
        SpeciesError::SpeciesNotFound(_) => 2,
        err if err.is_upstream() => 3,
        SpeciesError::MissingToken
        | SpeciesError::ConfigRead(_)
        | SpeciesError::ConfigParse(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let store = match &config.store_path {
        Some(path) => FileStore::new_with_path(path.clone()),
        None => FileStore::new()?,
    };

    if config.catalog.token.is_some() {
        let catalog = CatalogHttpClient::new(&config.catalog)?;
        run_command(cli.command, App::new(catalog, store, config.cache), output_mode)
    } else {
        tracing::debug!("no catalog token; only cached data is available");
        run_command(
            cli.command,
            App::new(NopCatalog, store, offline_policy(&config)),
            output_mode,
        )
    }
}

fn offline_policy(config: &ResolvedConfig) -> CachePolicy {
    // Without a token nothing can be refetched, so stale data is still served.
    CachePolicy {
        ttl: None,
        ..config.cache
    }
}

struct NopCatalog;

impl CatalogClient for NopCatalog {
    fn ensure_configured(&self) -> Result<(), SpeciesError> {
        Err(SpeciesError::MissingToken)
    }

    fn categories(&self) -> Result<Vec<CategoryCode>, SpeciesError> {
        Err(SpeciesError::MissingToken)
    }

    fn category_page(
        &self,
        _code: &CategoryCode,
        _page: u32,
        _per_page: u32,
    ) -> Result<Vec<TaxonSummary>, SpeciesError> {
        Err(SpeciesError::MissingToken)
    }

    fn search_by_name(&self, _name: &str) -> Result<Vec<TaxonDetail>, SpeciesError> {
        Err(SpeciesError::MissingToken)
    }

    fn taxon(&self, _id: TaxonId) -> Result<Option<TaxonDetail>, SpeciesError> {
        Err(SpeciesError::MissingToken)
    }
}

fn run_command<C: CatalogClient + 'static>(
    command: Commands,
    app: App<C, FileStore>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match command {
        Commands::List(args) => run_list(args, app, output_mode),
        Commands::Name(args) => match output_mode {
            OutputMode::NonInteractive => {
                let result = app.lookup_species_by_name(&args.name, &JsonOutput)?;
                JsonOutput::print_species(&result).into_diagnostic()
            }
            OutputMode::Interactive => {
                let mut tui = Tui::new(ProgressSinkKind::Lookup);
                let result = tui.run(move |sink| app.lookup_species_by_name(&args.name, sink))?;
                JsonOutput::print_species(&result).into_diagnostic()
            }
        },
        Commands::Id(args) => {
            let id = args.id.parse::<TaxonId>()?;
            match output_mode {
                OutputMode::NonInteractive => {
                    let result = app.lookup_species_by_id(id, &JsonOutput)?;
                    JsonOutput::print_species(&result).into_diagnostic()
                }
                OutputMode::Interactive => {
                    let mut tui = Tui::new(ProgressSinkKind::Lookup);
                    let result = tui.run(move |sink| app.lookup_species_by_id(id, sink))?;
                    JsonOutput::print_species(&result).into_diagnostic()
                }
            }
        }
        Commands::Search(args) => match output_mode {
            OutputMode::NonInteractive => {
                let result = app.search_multiple_species(&args.names, &JsonOutput)?;
                JsonOutput::print_search(&result).into_diagnostic()
            }
            OutputMode::Interactive => {
                let mut tui = Tui::new(ProgressSinkKind::Search);
                let result = tui.run(move |sink| app.search_multiple_species(&args.names, sink))?;
                JsonOutput::print_search(&result).into_diagnostic()
            }
        },
        Commands::Invalidate(args) => run_invalidate(args, app, output_mode),
    }
}

fn run_list<C: CatalogClient + 'static>(
    args: ListArgs,
    app: App<C, FileStore>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.list_species(args.category.as_deref(), &JsonOutput)?;
            JsonOutput::print_list(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::List);
            let result = tui.run(move |sink| app.list_species(args.category.as_deref(), sink))?;
            print!("{}", render_list_summary(&result, true));
            Ok(())
        }
    }
}

fn run_invalidate<C: CatalogClient + 'static>(
    args: InvalidateArgs,
    app: App<C, FileStore>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.invalidate(args.category.as_deref(), &JsonOutput)?;
            JsonOutput::print_invalidate(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            if !args.yes {
                let scope = args
                    .category
                    .as_deref()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .unwrap_or("all categories");
                let mut tui = Tui::new(ProgressSinkKind::Invalidate);
                if !tui.confirm(&format!("Drop cached species for {scope}?"))? {
                    return Ok(());
                }
            }
            let result = app.invalidate(args.category.as_deref(), &JsonOutput)?;
            JsonOutput::print_invalidate(&result).into_diagnostic()
        }
    }
}
