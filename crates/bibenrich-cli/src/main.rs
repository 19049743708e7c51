use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use bibenrich_bbl::{BibliographyScan, extract_citations_from_path, extract_fields};
use bibenrich_core::config_file::{self, ConfigFile, CrossrefConfig, SearchConfig};
use bibenrich_core::inject::{self, InjectionSummary};
use bibenrich_core::{BibFile, Config, IdentifierKind, Orchestrator, SearchOrder};
use bibenrich_reporting::{
    BatchHead, aggregate, deposit_document, load_rpi, write_bibliography,
};

mod output;

use output::ColorMode;

/// Look up bibliographic identifiers for LaTeX bibliographies and build
/// deposit documents
#[derive(Parser, Debug)]
#[command(name = "bibenrich", version, about, long_about = None)]
struct Cli {
    /// Increase log output (-v info, -vv debug). RUST_LOG overrides this.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file to use instead of the default locations
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

/// Database access options shared by the lookup commands.
#[derive(Args, Debug, Clone, Default)]
struct LookupArgs {
    /// Email for Crossref free-tier queries
    #[arg(long)]
    crossref_email: Option<String>,

    /// Crossref member account name (paid-tier query servlet)
    #[arg(long)]
    crossref_user: Option<String>,

    /// Crossref member account password
    #[arg(long)]
    crossref_password: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Turn the bibliography of .bbl/.tex files into BibTeX entries
    Bbl2bib {
        /// .bbl or .tex files to read
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Databases to try, in order: letters (a arXiv, m MathSciNet,
        /// z zbMATH, c Crossref) or comma separated names
        #[arg(short = 's', long)]
        search_order: Option<String>,

        #[command(flatten)]
        lookup: LookupArgs,

        /// Print the extracted citations without querying any database
        #[arg(long)]
        dry_run: bool,
    },

    /// Build a deposit XML document from .tex files and their .rpi side-files
    Deposit {
        /// .tex files; each needs a .rpi next to it
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Batch id (default: <registrant>-<timestamp>)
        #[arg(long)]
        batch_id: Option<String>,

        /// Batch timestamp (default: now, as YYYYMMDDhhmmss)
        #[arg(long)]
        timestamp: Option<String>,
    },

    /// Add a missing identifier to the entries of .bib files
    AddIds {
        /// .bib files to update
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Which identifier to add
        #[arg(long, value_enum)]
        id: IdArg,

        #[command(flatten)]
        lookup: LookupArgs,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum IdArg {
    Doi,
    Mr,
    Zbl,
}

impl From<IdArg> for IdentifierKind {
    fn from(id: IdArg) -> Self {
        match id {
            IdArg::Doi => IdentifierKind::Doi,
            IdArg::Mr => IdentifierKind::Mr,
            IdArg::Zbl => IdentifierKind::Zbl,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let color = ColorMode(!cli.no_color && std::io::stderr().is_terminal());
    let file = load_config_file(cli.config.as_deref())?;

    match cli.command {
        Command::Bbl2bib {
            files,
            output,
            search_order,
            lookup,
            dry_run,
        } => bbl2bib(file, &files, output, search_order, &lookup, dry_run, color).await,
        Command::Deposit {
            files,
            output,
            batch_id,
            timestamp,
        } => deposit(file, &files, output, batch_id, timestamp, color),
        Command::AddIds {
            files,
            output,
            id,
            lookup,
        } => add_ids(file, &files, output, id.into(), &lookup, color).await,
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// An explicit `--config` must exist and parse; otherwise the default
/// locations are cascaded and missing files are fine.
fn load_config_file(explicit: Option<&Path>) -> anyhow::Result<ConfigFile> {
    match explicit {
        Some(path) => Ok(config_file::load_required(path)?),
        None => Ok(config_file::load_config()),
    }
}

/// Command-line values, falling back to environment variables. Laid over
/// the config file, so flags > env > file.
fn lookup_overlay(lookup: &LookupArgs, search_order: Option<String>) -> ConfigFile {
    let env = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
    let timeout = lookup.timeout.or_else(|| {
        let raw = env("BIBENRICH_TIMEOUT")?;
        match raw.parse() {
            Ok(secs) => Some(secs),
            Err(_) => {
                tracing::warn!(value = %raw, "ignoring BIBENRICH_TIMEOUT, not a number of seconds");
                None
            }
        }
    });

    ConfigFile {
        crossref: Some(CrossrefConfig {
            email: lookup.crossref_email.clone().or_else(|| env("CROSSREF_EMAIL")),
            username: lookup.crossref_user.clone().or_else(|| env("CROSSREF_USER")),
            password: lookup
                .crossref_password
                .clone()
                .or_else(|| env("CROSSREF_PASSWORD")),
        }),
        search: Some(SearchConfig {
            order: search_order,
            timeout_secs: timeout,
            max_rate_limit_retries: None,
        }),
        ..ConfigFile::default()
    }
}

fn open_output(path: Option<&Path>) -> anyhow::Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("cannot create output file {}", path.display()))?;
            Box::new(std::io::BufWriter::new(file))
        }
        None => Box::new(std::io::stdout()),
    })
}

/// Read a bibliography listing, applying the missing-bibliography policy.
fn read_bibliography(path: &Path, config: &Config) -> anyhow::Result<BibliographyScan> {
    let scan = extract_citations_from_path(path)?;
    if !scan.has_bibliography() {
        if config.require_bibliography {
            anyhow::bail!(
                "{}: no \\begin{{thebibliography}} ... \\end{{thebibliography}} block found",
                path.display()
            );
        }
        tracing::warn!(file = %path.display(), "no bibliography found");
    }
    Ok(scan)
}

async fn bbl2bib(
    file: ConfigFile,
    files: &[PathBuf],
    out_path: Option<PathBuf>,
    search_order: Option<String>,
    lookup: &LookupArgs,
    dry_run: bool,
    color: ColorMode,
) -> anyhow::Result<()> {
    let config = config_file::merge(file, lookup_overlay(lookup, search_order)).to_config()?;
    // credentials are checked before anything is read or written
    let orchestrator = if dry_run {
        None
    } else {
        Some(Orchestrator::new(&config)?)
    };

    let mut citations = Vec::new();
    for path in files {
        let scan = read_bibliography(path, &config)?;
        citations.extend(scan.citations.into_iter().map(extract_fields));
    }

    let mut writer = open_output(out_path.as_deref())?;

    let Some(orchestrator) = orchestrator else {
        let dry_color = ColorMode(color.enabled() && out_path.is_none() && std::io::stdout().is_terminal());
        output::print_dry_run(&mut writer, &citations, dry_color)?;
        writer.flush()?;
        return Ok(());
    };

    tracing::info!(
        citations = citations.len(),
        order = %config.search_order,
        "resolving citations"
    );
    let bar = output::progress_bar(citations.len() as u64);
    let (resolved, summary) = orchestrator
        .resolve_all(citations, |record| {
            bar.set_message(record.key.clone());
            bar.inc(1);
        })
        .await;
    bar.finish_and_clear();

    write_bibliography(&mut writer, &resolved)?;
    writer.flush()?;

    output::print_resolution_summary(&mut std::io::stderr(), &summary, color)?;
    Ok(())
}

fn deposit(
    file: ConfigFile,
    files: &[PathBuf],
    out_path: Option<PathBuf>,
    batch_id: Option<String>,
    timestamp: Option<String>,
    color: ColorMode,
) -> anyhow::Result<()> {
    let config = file.to_config()?;

    let mut papers = Vec::with_capacity(files.len());
    for tex in files {
        let rpi = tex.with_extension("rpi");
        if !rpi.exists() {
            anyhow::bail!(
                "metadata side-file {} not found for {}",
                rpi.display(),
                tex.display()
            );
        }
        let parsed = {
            let _span = tracing::warn_span!("rpi", file = %rpi.display()).entered();
            load_rpi(&rpi).with_context(|| format!("in {}", rpi.display()))?
        };
        let mut paper = parsed.paper;

        let bbl = tex.with_extension("bbl");
        let listing = if bbl.exists() { bbl } else { tex.clone() };
        let scan = if listing.exists() {
            read_bibliography(&listing, &config)?
        } else if config.require_bibliography {
            anyhow::bail!("no bibliography listing found for {}", tex.display());
        } else {
            BibliographyScan::default()
        };
        paper.bibliography = scan.citations.into_iter().map(extract_fields).collect();
        papers.push(paper);
    }

    let paper_count = papers.len();
    let citation_count: usize = papers.iter().map(|p| p.bibliography.len()).sum();
    let groups = aggregate(papers);
    let head = BatchHead::new(&config.depositor, batch_id, timestamp);
    let xml = deposit_document(&config, &head, &groups)?;

    let mut writer = open_output(out_path.as_deref())?;
    writer.write_all(xml.as_bytes())?;
    writer.flush()?;

    output::print_deposit_summary(
        &mut std::io::stderr(),
        &head.batch_id,
        paper_count,
        groups.len(),
        citation_count,
        color,
    )?;
    Ok(())
}

async fn add_ids(
    file: ConfigFile,
    files: &[PathBuf],
    out_path: Option<PathBuf>,
    kind: IdentifierKind,
    lookup: &LookupArgs,
    color: ColorMode,
) -> anyhow::Result<()> {
    let source = inject::source_for(kind)
        .with_context(|| format!("no database assigns {} identifiers", kind.annotation()))?;
    let mut config = config_file::merge(file, lookup_overlay(lookup, None)).to_config()?;
    config.search_order = SearchOrder::new([source]);
    let orchestrator = Orchestrator::new(&config)?;

    let mut documents = Vec::with_capacity(files.len());
    for path in files {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        documents.push(BibFile::parse(&text));
    }

    let mut writer = open_output(out_path.as_deref())?;
    let mut total = InjectionSummary::default();

    for (path, mut bib) in files.iter().zip(documents) {
        tracing::info!(file = %path.display(), db = %source, "adding {}", kind.bib_field());
        let bar = output::progress_bar(bib.entries().count() as u64);
        let summary = inject::inject_identifiers(&orchestrator, &mut bib, kind, |entry| {
            bar.set_message(entry.key.clone());
            bar.inc(1);
        })
        .await;
        bar.finish_and_clear();

        write!(writer, "{}", bib)?;
        total.entries += summary.entries;
        total.already_present += summary.already_present;
        total.added += summary.added;
        total.not_found += summary.not_found;
    }
    writer.flush()?;

    output::print_injection_summary(&mut std::io::stderr(), kind, &total, color)?;
    Ok(())
}
