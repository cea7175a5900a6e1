//! Jake CLI - Make-style recipes, Just-style ergonomics
//!
//! Commands:
//! - jake run [targets] [name=value]  - Run recipes (default recipe if none)
//! - jake plan [targets]              - Show what a run would do
//! - jake list                        - List public recipes
//! - jake graph [targets]             - Show build order
//! - jake watch [targets]             - Re-run on relevant file changes
//! - jake clear-cache                 - Forget every fingerprint

mod report;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::theme::ColorfulTheme;
use dialoguer::Confirm;
use jake_core::{
    Engine, ExecutionContext, FailurePolicy, Jakefile, JakeConfig, Prompter, RecipeGraph,
};
use jake_watch::{FileWatcher, WatchSession};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Jake - recipe runner
#[derive(Parser)]
#[command(name = "jake", version, about = "Make-style recipes, Just-style ergonomics")]
struct Cli {
    /// Manifest to load (default: Jakefile.json in the current directory)
    #[arg(short = 'f', long, global = true)]
    jakefile: Option<PathBuf>,
    /// Worker threads
    #[arg(short, long, global = true)]
    jobs: Option<usize>,
    /// Print the plan instead of running commands
    #[arg(short = 'n', long, global = true)]
    dry_run: bool,
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Answer yes to every @confirm
    #[arg(short, long, global = true)]
    yes: bool,
    /// Stop starting new recipes after the first failure
    #[arg(long, global = true)]
    fail_fast: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run recipes; `name=value` arguments set parameters
    Run { args: Vec<String> },
    /// Show build order and whether each recipe would run
    Plan { targets: Vec<String> },
    /// List public recipes
    List,
    /// Show dependency graph and build order
    Graph { targets: Vec<String> },
    /// Run, then re-run whenever a relevant file changes
    Watch { args: Vec<String> },
    /// Clear the fingerprint cache
    ClearCache,
}

/// `@confirm` on the terminal. One prompt at a time across workers.
struct TerminalPrompter {
    lock: Mutex<()>,
}

impl Prompter for TerminalPrompter {
    fn confirm(&self, message: &str) -> bool {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(message)
            .default(false)
            .interact()
            .unwrap_or(false)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cwd = std::env::current_dir()?;
    let config = JakeConfig::load(&cwd)?;
    let jakefile_path = cli
        .jakefile
        .clone()
        .unwrap_or_else(|| cwd.join(&config.jakefile));
    let root = project_root(&jakefile_path, &cwd);

    let code = match &cli.command {
        Commands::ClearCache => {
            let ctx = context(&cli, &config, &root);
            let jakefile = Jakefile::default();
            let engine = Engine::new(&jakefile, ctx);
            engine.clear_cache()?;
            println!("🗑️  Cache cleared! ({})", engine.cache().store_path().display());
            0
        }
        command => {
            let jakefile = Jakefile::load(&jakefile_path)?;
            let args: &[String] = match command {
                Commands::Run { args } | Commands::Watch { args } => args,
                Commands::Plan { targets } | Commands::Graph { targets } => targets,
                _ => &[],
            };
            let (targets, params) = report::split_args(args);
            let mut ctx = context(&cli, &config, &root);
            ctx.params.extend(params);
            ctx.watching = matches!(command, Commands::Watch { .. });

            let engine = Engine::new(&jakefile, ctx).with_prompter(Box::new(TerminalPrompter {
                lock: Mutex::new(()),
            }));
            let targets = if targets.is_empty() {
                engine.default_targets()
            } else {
                targets
            };

            match command {
                Commands::Run { .. } => run(&engine, &targets)?,
                Commands::Plan { .. } => plan(&engine, &targets)?,
                Commands::List => {
                    print!("{}", report::render_list(&jakefile));
                    0
                }
                Commands::Graph { .. } => graph(&jakefile, &targets)?,
                Commands::Watch { .. } => watch(&engine, targets)?,
                Commands::ClearCache => 0,
            }
        }
    };

    std::process::exit(code);
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("JAKE_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn project_root(jakefile: &Path, cwd: &Path) -> PathBuf {
    match jakefile.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => cwd.join(parent),
        _ => cwd.to_path_buf(),
    }
}

/// Config values, overridden by flags
fn context(cli: &Cli, config: &JakeConfig, root: &Path) -> ExecutionContext {
    let mut ctx = ExecutionContext::from_config(root, config)
        .dry_run(cli.dry_run)
        .verbose(cli.verbose)
        .yes(cli.yes);
    if let Some(jobs) = cli.jobs {
        ctx = ctx.jobs(jobs);
    }
    if cli.fail_fast {
        ctx = ctx.failure_policy(FailurePolicy::Halt);
    }
    ctx
}

/// Run recipes and print a summary
fn run(engine: &Engine<'_>, targets: &[String]) -> Result<i32> {
    if targets.is_empty() {
        bail!("no recipes in the jakefile");
    }
    println!("🔨 jake {}", targets.join(" "));
    println!();

    let report = engine.run(targets).context("cannot run")?;
    println!();
    print!("{}", report::render_report(&report));
    Ok(report.exit_code())
}

fn plan(engine: &Engine<'_>, targets: &[String]) -> Result<i32> {
    let steps = engine.plan(targets)?;
    println!("📋 Plan for {}:", targets.join(" "));
    print!("{}", report::render_plan(&steps));
    Ok(0)
}

/// Show dependency graph
fn graph(jakefile: &Jakefile, targets: &[String]) -> Result<i32> {
    println!("🕸️  Building Dependency Graph...");
    let start = Instant::now();

    let graph = RecipeGraph::resolve(jakefile, targets)?;
    let elapsed = start.elapsed();

    let requested: Vec<&str> = graph
        .targets()
        .iter()
        .map(|&idx| graph.recipe(idx).name.as_str())
        .collect();

    println!();
    println!("🎯 Targets: {}", requested.join(", "));
    println!("📦 Recipes: {}", graph.len());
    println!("🔗 Dependencies: {}", graph.edge_count());
    println!();

    println!("🔨 Build Order (dependencies first):");
    for (i, recipe) in graph.build_order().iter().enumerate() {
        if recipe.dependencies.is_empty() {
            println!("   {}. {}", i + 1, recipe.name);
        } else {
            println!("   {}. {} ← {}", i + 1, recipe.name, recipe.dependencies.join(", "));
        }
    }

    println!();
    println!("✅ Graph built in {:?}", elapsed);
    Ok(0)
}

fn watch(engine: &Engine<'_>, targets: Vec<String>) -> Result<i32> {
    let session = WatchSession::new(engine, targets)?;
    let mut watcher = FileWatcher::new(&engine.context().root);
    if let Some(name) = engine.context().cache_dir.file_name() {
        watcher = watcher.ignore(name.to_string_lossy());
    }
    watcher.start()?;

    println!("👀 Watching {} (Ctrl-C to stop)", engine.context().root.display());
    let stop = AtomicBool::new(false);
    session.watch(&watcher, &stop, |report| {
        println!();
        print!("{}", report::render_report(report));
        println!("👀 Waiting for changes...");
    })?;
    Ok(0)
}
