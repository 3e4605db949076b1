//! Command surface for sightline.
//!
//! Two entrypoints are supported: [`run_cli`] for parsed CLI execution and
//! [`run_update`] for driving a reconciliation with a caller-supplied
//! [`DecisionPort`] (tests use a scripted port instead of the console).

pub mod logging;
pub mod prompt;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::debug;

use sightline_core::health::check_technique_admin;
use sightline_core::reconcile::{reconcile, DecisionPort, MatchStrategy};
use sightline_core::taxonomy::{collect_data_sources, ObjectKind, TaxonomyLookup};
use sightline_core::{display_date, report, scorer, today_utc, SightlineError};
use sightline_store::{documents, BundleTaxonomy, HealthStateCache, TtlCache};

use logging::LogFormat;
use prompt::ConsolePort;

/// Parsed taxonomy kinds are reused from disk for ten hours before the
/// bundle is read again.
const TAXONOMY_CACHE_TTL: Duration = Duration::from_secs(36_000);

#[derive(Debug, Parser)]
#[command(name = "sightline")]
#[command(about = "Detection coverage scoring and score-logbook reconciliation")]
pub struct Cli {
    /// Taxonomy bundle (STIX-flavored JSON) to resolve techniques against.
    #[arg(long, default_value = "./taxonomy-bundle.json")]
    pub bundle: PathBuf,

    #[arg(long, default_value = "./cache")]
    pub cache_dir: PathBuf,

    #[arg(long, default_value = "./output")]
    pub output_dir: PathBuf,

    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Reports over the data-source administration.
    Datasource {
        #[command(subcommand)]
        command: DatasourceCommand,
    },
    /// Technique administration generation and reconciliation.
    Techniques {
        #[command(subcommand)]
        command: TechniquesCommand,
    },
    /// Advisory validation of a technique administration file.
    Health(HealthArgs),
    /// Listings straight from the taxonomy.
    Taxonomy {
        #[command(subcommand)]
        command: TaxonomyCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum DatasourceCommand {
    /// Colorized technique overlay from data-source coverage.
    Layer(AdminArgs),
    /// Scored data-source matrix over the full taxonomy vocabulary.
    Matrix(AdminArgs),
    /// Cumulative connected-data-source trend series.
    Graph(AdminArgs),
    /// Technique count per taxonomy data source.
    Stats,
}

#[derive(Debug, Subcommand)]
pub enum TechniquesCommand {
    /// Derive a fresh technique administration from the data sources.
    Generate(AdminArgs),
    /// Merge freshly derived scores into an existing administration.
    Update(UpdateArgs),
}

#[derive(Debug, Subcommand)]
pub enum TaxonomyCommand {
    /// List techniques, groups or software by creation/modification date.
    Updates(UpdatesArgs),
    /// Technique count per mitigation.
    MitigationStats(MitigationStatsArgs),
}

#[derive(Debug, Args)]
pub struct AdminArgs {
    /// Data-source administration YAML file.
    #[arg(long)]
    pub admin: PathBuf,
}

#[derive(Debug, Args)]
pub struct UpdateArgs {
    /// Data-source administration YAML file.
    #[arg(long)]
    pub admin: PathBuf,

    /// Technique administration YAML file to update in place.
    #[arg(long)]
    pub tech_admin: PathBuf,

    /// How persisted scopes are paired with the derived score.
    #[arg(long, value_enum, default_value_t = MatchModeArg::Positional)]
    pub match_mode: MatchModeArg,
}

#[derive(Debug, Args)]
pub struct HealthArgs {
    /// Technique administration YAML file.
    #[arg(long)]
    pub tech_admin: PathBuf,
}

#[derive(Debug, Args)]
pub struct UpdatesArgs {
    #[arg(long, value_enum)]
    pub kind: UpdateKindArg,

    #[arg(long, value_enum, default_value_t = SortArg::Modified)]
    pub sort: SortArg,
}

#[derive(Debug, Args)]
pub struct MitigationStatsArgs {
    #[arg(long, value_enum, default_value_t = MatrixArg::Enterprise)]
    pub matrix: MatrixArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum MatchModeArg {
    Positional,
    ByLabel,
}

impl From<MatchModeArg> for MatchStrategy {
    fn from(value: MatchModeArg) -> Self {
        match value {
            MatchModeArg::Positional => Self::Positional,
            MatchModeArg::ByLabel => Self::ByLabel,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum UpdateKindArg {
    Technique,
    Group,
    Software,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SortArg {
    Modified,
    Created,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum MatrixArg {
    Enterprise,
    Mobile,
}

/// Shared run configuration resolved from the top-level flags.
pub struct RunContext {
    pub bundle: PathBuf,
    pub cache_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl RunContext {
    fn taxonomy(&self) -> BundleTaxonomy {
        BundleTaxonomy::with_cache(
            self.bundle.clone(),
            TtlCache::new(self.cache_dir.clone(), TAXONOMY_CACHE_TTL),
        )
    }
}

/// Executes the parsed top-level command graph.
///
/// # Errors
/// Returns an error when loading inputs or executing the command fails.
/// Report-write failures are reported on stdout instead and do not fail
/// the run.
pub fn run_cli(cli: Cli) -> Result<()> {
    // A global subscriber may already be installed when run_cli is invoked
    // more than once in the same process.
    let _ = logging::init(&cli.log_level, cli.log_format);

    let paths = RunContext {
        bundle: cli.bundle,
        cache_dir: cli.cache_dir,
        output_dir: cli.output_dir,
    };

    match cli.command {
        Command::Datasource { command } => match command {
            DatasourceCommand::Layer(args) => run_datasource_layer(&paths, &args),
            DatasourceCommand::Matrix(args) => run_datasource_matrix(&paths, &args),
            DatasourceCommand::Graph(args) => run_datasource_graph(&paths, &args),
            DatasourceCommand::Stats => run_datasource_stats(&paths),
        },
        Command::Techniques { command } => match command {
            TechniquesCommand::Generate(args) => run_techniques_generate(&paths, &args),
            TechniquesCommand::Update(args) => {
                let mut port = ConsolePort;
                run_update(&paths, &args, &mut port)
            }
        },
        Command::Health(args) => run_health(&paths, &args),
        Command::Taxonomy { command } => match command {
            TaxonomyCommand::Updates(args) => run_taxonomy_updates(&paths, &args),
            TaxonomyCommand::MitigationStats(args) => run_mitigation_stats(&paths, &args),
        },
    }
}

fn report_written(result: Result<PathBuf>, what: &str) {
    match result {
        Ok(path) => println!("File written:   {}", path.display()),
        Err(err) => println!("[!] Error while writing {what}: {err:#}"),
    }
}

fn run_datasource_layer(paths: &RunContext, args: &AdminArgs) -> Result<()> {
    let admin = documents::load_data_source_admin(&args.admin)?;
    let techniques = paths.taxonomy().techniques()?;
    let results = scorer::score(
        &techniques,
        &admin.owned_sources(true),
        &admin.exception_ids(),
    );
    debug!(scored = results.len(), "coverage computed");

    let layer = report::coverage_layer(&admin.name, &admin.platform, &results);
    let json = serde_json::to_string_pretty(&layer).context("failed to serialize layer")?;
    let stem = format!("data_sources_{}", documents::normalize_name(&admin.name));
    report_written(
        documents::write_output(&paths.output_dir, &stem, "json", &json),
        "the overlay layer",
    );
    Ok(())
}

fn run_datasource_matrix(paths: &RunContext, args: &AdminArgs) -> Result<()> {
    let admin = documents::load_data_source_admin(&args.admin)?;
    let vocabulary = collect_data_sources(&paths.taxonomy().techniques()?);
    let rows = report::matrix_rows(&vocabulary, &admin.owned_sources(false));
    let rendered = render_matrix_csv(&rows)?;
    report_written(
        documents::write_output(&paths.output_dir, "data_sources", "csv", &rendered),
        "the data source matrix",
    );
    Ok(())
}

fn render_matrix_csv(rows: &[report::MatrixRow]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "Data source name",
            "Date registered",
            "Date connected",
            "Products",
            "Comment",
            "Available for data analytics",
            "DQ: device completeness",
            "DQ: data field completeness",
            "DQ: timeliness",
            "DQ: consistency",
            "DQ: retention",
            "DQ: score",
            "Color",
        ])
        .context("failed to write matrix header")?;
    for row in rows {
        writer
            .write_record([
                row.data_source.as_str(),
                row.date_registered.as_str(),
                row.date_connected.as_str(),
                row.products.as_str(),
                row.comment.as_str(),
                row.available_for_data_analytics.as_str(),
                row.device_completeness.as_str(),
                row.data_field_completeness.as_str(),
                row.timeliness.as_str(),
                row.consistency.as_str(),
                row.retention.as_str(),
                row.score.as_str(),
                row.color.as_str(),
            ])
            .context("failed to write matrix row")?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| anyhow::anyhow!("failed to flush matrix rows: {err}"))?;
    String::from_utf8(bytes).context("matrix output was not valid UTF-8")
}

fn run_datasource_graph(paths: &RunContext, args: &AdminArgs) -> Result<()> {
    let admin = documents::load_data_source_admin(&args.admin)?;
    let owned = admin.owned_sources(true);
    let series = report::trend_series(owned.values());
    let json = serde_json::to_string_pretty(&series).context("failed to serialize series")?;
    report_written(
        documents::write_output(&paths.output_dir, "graph_data_sources", "json", &json),
        "the trend series",
    );
    Ok(())
}

fn run_datasource_stats(paths: &RunContext) -> Result<()> {
    let stats = report::data_source_statistics(&paths.taxonomy().techniques()?);
    println!("{:<6} {}", "Count", "Data Source");
    println!("{}", "-".repeat(50));
    for stat in &stats {
        println!("{:<6} {}", stat.technique_count, stat.data_source);
    }
    Ok(())
}

fn run_techniques_generate(paths: &RunContext, args: &AdminArgs) -> Result<()> {
    let admin = documents::load_data_source_admin(&args.admin)?;
    let derived = derive_for(paths, &admin)?;
    let rendered = documents::render_technique_admin(&derived, today_utc())?;

    let stem = format!(
        "techniques-administration-{}",
        documents::normalize_name(&format!("{}-{}", admin.name, admin.platform))
    );
    report_written(
        documents::write_output(&paths.output_dir, &stem, "yaml", &rendered),
        "the technique administration",
    );
    Ok(())
}

fn derive_for(
    paths: &RunContext,
    admin: &sightline_core::admin::DataSourceAdminDoc,
) -> Result<sightline_core::admin::TechniqueAdminDoc> {
    let techniques: Vec<_> = paths
        .taxonomy()
        .techniques()?
        .into_iter()
        .filter(|technique| technique.applies_to_platform(&admin.platform))
        .collect();
    let results = scorer::score(
        &techniques,
        &admin.owned_sources(true),
        &admin.exception_ids(),
    );
    Ok(scorer::derive_admin_doc(
        &results,
        &admin.name,
        &admin.platform,
        today_utc(),
    ))
}

/// Runs a reconciliation with the given decision port, then persists the
/// result behind a backup when anything changed.
///
/// # Errors
/// Returns an error when inputs cannot be loaded, decisions cannot be
/// obtained, or the backup/write fails. A platform mismatch is reported
/// on stdout and is not an error of the run itself.
#[allow(clippy::too_many_lines)]
pub fn run_update(
    paths: &RunContext,
    args: &UpdateArgs,
    port: &mut dyn DecisionPort,
) -> Result<()> {
    let admin = documents::load_data_source_admin(&args.admin)?;
    let derived = derive_for(paths, &admin)?;

    advisory_health(&paths.cache_dir, &args.tech_admin);

    let persisted = documents::load_technique_admin(&args.tech_admin)?;

    let outcome = match reconcile(&derived, persisted, args.match_mode.into(), port) {
        Ok(outcome) => outcome,
        Err(err @ SightlineError::PlatformMismatch { .. }) => {
            println!("[!] {err}");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    if outcome.cancelled {
        println!("Visibility update canceled.");
        return Ok(());
    }

    if outcome.added.is_empty() {
        println!(
            " - No new techniques, for which we now have visibility, have been added to \
             the technique administration file."
        );
    } else {
        println!(
            "The following new technique IDs are added to the technique administration \
             file with a visibility score derived from the number of data sources:"
        );
        for technique_id in &outcome.added {
            println!(" - {technique_id}");
        }
    }

    if outcome.eligible == 0 {
        println!(
            " - None of the already present techniques has a visibility score that is \
             eligible for an update."
        );
    }
    for update in &outcome.updated {
        println!(
            " - Updated a score in technique ID: {}   (applicable to: {})",
            update.technique_id,
            update.applicable_to.join(", ")
        );
    }

    if outcome.changed() {
        println!();
        let today = today_utc();
        let backup = documents::backup_file(&args.tech_admin, today)?;
        println!("Written backup file:   {}\n", backup.display());
        documents::save_technique_admin(&args.tech_admin, &outcome.document, today)?;
        println!("File written:   {}", args.tech_admin.display());
    } else {
        println!("No visibility scores have been updated.");
    }
    Ok(())
}

/// Advisory pre-check of the technique administration, cached by file
/// modification time. Findings never block the update.
fn advisory_health(cache_dir: &Path, tech_admin: &Path) {
    let cache = HealthStateCache::new(cache_dir.to_path_buf());
    let issue_line = |path: &Path| {
        println!(
            "[!] The technique administration file has issues: {} \
             (run 'sightline health' for details)",
            path.display()
        );
    };

    let modified = match cache.is_modified(tech_admin) {
        Ok(modified) => modified,
        Err(err) => {
            debug!(error = %err, "health cache unavailable");
            true
        }
    };

    if !modified {
        if cache.last_state(tech_admin) == Some(true) {
            issue_line(tech_admin);
        }
        return;
    }

    match documents::load_yaml_value(tech_admin) {
        Ok(value) => {
            let issues = check_technique_admin(&value);
            if !issues.is_empty() {
                issue_line(tech_admin);
            }
            if let Err(err) = cache.record(tech_admin, !issues.is_empty()) {
                debug!(error = %err, "failed to record health state");
            }
        }
        Err(err) => debug!(error = %err, "skipping advisory health check"),
    }
}

fn run_health(paths: &RunContext, args: &HealthArgs) -> Result<()> {
    let value = documents::load_yaml_value(&args.tech_admin)?;
    let issues = check_technique_admin(&value);

    if issues.is_empty() {
        println!("No issues found in:   {}", args.tech_admin.display());
    } else {
        for issue in &issues {
            println!("[!] {issue}");
        }
        println!();
        println!(
            "{} issue(s) found in:   {}",
            issues.len(),
            args.tech_admin.display()
        );
    }

    let cache = HealthStateCache::new(paths.cache_dir.clone());
    if let Err(err) = cache.record(&args.tech_admin, !issues.is_empty()) {
        debug!(error = %err, "failed to record health state");
    }
    Ok(())
}

fn run_taxonomy_updates(paths: &RunContext, args: &UpdatesArgs) -> Result<()> {
    let kind = match args.kind {
        UpdateKindArg::Technique => ObjectKind::Technique,
        UpdateKindArg::Group => ObjectKind::Group,
        UpdateKindArg::Software => ObjectKind::Software,
    };
    let mut objects = paths.taxonomy().objects(kind)?;
    objects.sort_by_key(|object| match args.sort {
        SortArg::Modified => object.modified,
        SortArg::Created => object.created,
    });

    for object in &objects {
        println!("{} {}", object.external_id, object.name);
        println!("      created:  {}", display_date(object.created));
        println!("      modified: {}", display_date(object.modified));
        match kind {
            ObjectKind::Technique => {
                println!("      matrix:   {}", short_matrix(&object.matrix));
                if object.tactics.is_empty() {
                    println!("      tactic:   none");
                } else {
                    println!("      tactic:   {}", object.tactics.join(", "));
                }
            }
            ObjectKind::Software => {
                println!("      matrix:   {}", short_matrix(&object.matrix));
                println!("      type:     {}", object.object_type);
                if object.platforms.is_empty() {
                    println!("      platform: none");
                } else {
                    println!("      platform: {}", object.platforms.join(", "));
                }
            }
            _ => {}
        }
        println!();
    }
    Ok(())
}

fn short_matrix(matrix: &str) -> &str {
    matrix.strip_prefix("mitre-").unwrap_or(matrix)
}

fn run_mitigation_stats(paths: &RunContext, args: &MitigationStatsArgs) -> Result<()> {
    let kind = match args.matrix {
        MatrixArg::Enterprise => ObjectKind::MitigationEnterprise,
        MatrixArg::Mobile => ObjectKind::MitigationMobile,
    };
    let taxonomy = paths.taxonomy();
    let mitigations = taxonomy.objects(kind)?;
    let relationships = taxonomy.objects(ObjectKind::Relationship)?;
    let stats = report::mitigation_statistics(&mitigations, &relationships);

    println!("{:<6} {:<14} {}", "Count", "Mitigation ID", "Name");
    println!("{}", "-".repeat(60));
    for stat in &stats {
        println!(
            "{:<6} {:<14} {}",
            stat.technique_count, stat.mitigation_id, stat.name
        );
    }
    Ok(())
}
