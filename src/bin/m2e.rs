use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use m2e::app::App;
use m2e::config::ConfigLoader;
use m2e::domain::{CpgId, GeneId, ProjectName};
use m2e::error::M2eError;
use m2e::fetch::HttpFetchClient;
use m2e::genomics::GffAnnotator;
use m2e::model::MeanRegressor;
use m2e::output::{JsonOutput, OutputMode};
use m2e::selection::{random_genes, top_cpgs};

#[derive(Parser)]
#[command(name = "m2e")]
#[command(about = "Paired methylation/expression dataset builder for TCGA projects")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Path to m2e.json (defaults are used when ./m2e.json is absent)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download the reference genome, annotation and CpG table; derive promoters")]
    Genomics,
    #[command(about = "List reconciled cases and their data files")]
    Cases(ProjectsArgs),
    #[command(about = "Build the (case, gene) x [expression, cpgs...] dataset")]
    Build(BuildArgs),
    #[command(about = "Split cases into train/test by holding out the smallest projects")]
    Split(SplitArgs),
    #[command(about = "Build, split and score the mean-expression baseline")]
    Baseline(SelectionArgs),
}

#[derive(Args, Clone)]
struct ProjectsArgs {
    /// Project names; all projects in the projects directory when omitted
    projects: Vec<String>,
}

#[derive(Args, Clone)]
struct SelectionArgs {
    #[command(flatten)]
    projects: ProjectsArgs,

    /// File with one gene id per line
    #[arg(long, conflicts_with = "random_genes")]
    genes: Option<PathBuf>,

    /// Draw this many genes from the gene lookup table
    #[arg(long, requires = "lookup")]
    random_genes: Option<usize>,

    /// Gene lookup CSV with a "Gene stable ID" column
    #[arg(long)]
    lookup: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,

    /// File with one CpG probe id per line
    #[arg(long, conflicts_with = "top_cpgs")]
    cpgs: Option<PathBuf>,

    /// Take this many most correlated probes from the correlation table
    #[arg(long, requires = "correlations")]
    top_cpgs: Option<usize>,

    /// Methylation vs mRNA correlation table (Meth_Probe, Corr_Coeff)
    #[arg(long)]
    correlations: Option<PathBuf>,
}

#[derive(Args, Clone)]
struct BuildArgs {
    #[command(flatten)]
    selection: SelectionArgs,

    /// Output TSV; defaults to <output dir>/dataset.tsv
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args, Clone)]
struct SplitArgs {
    #[command(flatten)]
    projects: ProjectsArgs,

    /// Number of smallest projects to hold out
    #[arg(long)]
    test_projects: Option<usize>,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            eprintln!("{report:?}");
            ExitCode::from(exit_code(&report))
        }
    }
}

fn exit_code(report: &miette::Report) -> u8 {
    report.downcast_ref::<M2eError>().map_or(1, map_exit_code)
}

fn map_exit_code(error: &M2eError) -> u8 {
    if error.is_lookup() || matches!(error, M2eError::MissingConfig) {
        2
    } else if error.is_transient() {
        3
    } else {
        1
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
    let config = ConfigLoader::resolve_or_default(cli.config.as_deref())?;
    let default_output = config.output_dir.join("dataset.tsv").into_std_path_buf();
    let app = App::new(config, HttpFetchClient::new()?, GffAnnotator);

    match cli.command {
        Commands::Genomics => {
            let result = app.prepare_genomics(output_mode.sink())?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_genomics(&result).into_diagnostic()?,
                OutputMode::Interactive => {
                    for item in &result.items {
                        println!("{:<20} {:<9} {}", item.artifact, item.action, item.path);
                    }
                }
            }
            Ok(())
        }
        Commands::Cases(args) => {
            let names = parse_projects(&args)?;
            let result = app.cases(&names, output_mode.sink())?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_cases(&result).into_diagnostic()?,
                OutputMode::Interactive => {
                    for project in &result.projects {
                        println!("{}: {} cases", project.project, project.cases.len());
                        for warning in &project.warnings {
                            println!("  warning: {warning}");
                        }
                    }
                }
            }
            Ok(())
        }
        Commands::Build(args) => {
            let out = args.out.clone().unwrap_or(default_output);
            let (names, genes, cpgs) = resolve_selection(&args.selection)?;
            let (_, summary) = app
                .build(&names, &genes, &cpgs, Some(out.as_path()), output_mode.sink())?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_build(&summary).into_diagnostic()?,
                OutputMode::Interactive => {
                    println!(
                        "{} rows ({} cases x {} genes, {} CpGs) written to {}",
                        summary.report.rows,
                        summary.report.cases,
                        summary.genes,
                        summary.cpgs,
                        out.display()
                    );
                    for warning in &summary.report.warnings {
                        println!("warning: {warning}");
                    }
                }
            }
            Ok(())
        }
        Commands::Split(args) => {
            let names = parse_projects(&args.projects)?;
            let split = app.split(&names, args.test_projects, output_mode.sink())?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_split(&split).into_diagnostic()?,
                OutputMode::Interactive => {
                    println!("train cases: {}", split.train.len());
                    println!("test cases:  {}", split.test.len());
                    let held: Vec<&str> = split.test_projects.iter().map(|p| p.as_str()).collect();
                    println!("test projects: {}", held.join(", "));
                }
            }
            Ok(())
        }
        Commands::Baseline(args) => {
            let (names, genes, cpgs) = resolve_selection(&args)?;
            let result = app
                .baseline(&names, &genes, &cpgs, &MeanRegressor, output_mode.sink())?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_baseline(&result).into_diagnostic()?,
                OutputMode::Interactive => {
                    let metrics = result.evaluation.metrics;
                    println!(
                        "train rows {} / test rows {}: MAE {:.4}  MSE {:.4}  R2 {:.4}",
                        result.evaluation.train_rows,
                        result.evaluation.test_rows,
                        metrics.mae,
                        metrics.mse,
                        metrics.r2
                    );
                }
            }
            Ok(())
        }
    }
}

fn parse_projects(args: &ProjectsArgs) -> miette::Result<Vec<ProjectName>> {
    args.projects
        .iter()
        .map(|name| name.parse::<ProjectName>())
        .collect::<Result<Vec<_>, M2eError>>()
        .map_err(miette::Report::new)
}

fn read_id_list(path: &Path) -> miette::Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .map_err(|err| M2eError::Filesystem(format!("read {}: {err}", path.display())))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn resolve_selection(
    args: &SelectionArgs,
) -> miette::Result<(Vec<ProjectName>, Vec<GeneId>, Vec<CpgId>)> {
    let names = parse_projects(&args.projects)?;

    let genes = match (&args.genes, args.random_genes, &args.lookup) {
        (Some(path), _, _) => read_id_list(path)?
            .iter()
            .map(|id| GeneId::new(id))
            .collect(),
        (None, Some(n), Some(lookup)) => random_genes(lookup, n, args.seed)?,
        _ => {
            return Err(miette::Report::msg(
                "genes required: pass --genes <file> or --random-genes N --lookup <csv>",
            ));
        }
    };

    let cpgs = match (&args.cpgs, args.top_cpgs, &args.correlations) {
        (Some(path), _, _) => read_id_list(path)?
            .iter()
            .map(|id| CpgId::new(id))
            .collect(),
        (None, Some(n), Some(correlations)) => top_cpgs(correlations, n)?,
        _ => {
            return Err(miette::Report::msg(
                "CpGs required: pass --cpgs <file> or --top-cpgs N --correlations <tsv>",
            ));
        }
    };

    Ok((names, genes, cpgs))
}
