use std::path::{Path, PathBuf};

use logloom::agent::{LmClient, LmConfig};
use logloom::config::{self, FileConfig};
use logloom::observer::{ConsoleObserver, NullObserver, Observer};
use logloom::paths;
use logloom::runner::{self, RunOptions};
use logloom::store::Store;

pub fn or_exit(r: anyhow::Result<i32>) -> i32 {
    r.unwrap_or_else(|e| {
        eprintln!("[logloom] error: {e:#}");
        1
    })
}

/// Print a Serialize value as pretty JSON, logging errors to stderr.
fn print_json(value: &(impl serde::Serialize + ?Sized)) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("[logloom] JSON serialization error: {e}"),
    }
}

/// Flags of the `run` subcommand, bundled to keep call sites readable.
pub struct RunArgs {
    pub input: PathBuf,
    pub output: PathBuf,
    pub batch_size: Option<usize>,
    pub source_hint: Option<String>,
    pub library: Option<String>,
    pub match_only: bool,
    pub skip_threshold: Option<usize>,
    pub limit: Option<usize>,
    pub workers: Option<usize>,
    pub verbose: bool,
}

pub fn cmd_run(args: &RunArgs) -> anyhow::Result<i32> {
    if args.match_only && args.library.is_none() {
        anyhow::bail!("--match-only requires --library");
    }

    let file_cfg = FileConfig::discover()?;
    let mut opts = RunOptions::new(&args.input, &args.output);
    opts.batch_size = args
        .batch_size
        .or(file_cfg.batch_size)
        .unwrap_or(config::DEFAULT_BATCH_SIZE);
    opts.skip_threshold = args
        .skip_threshold
        .or(file_cfg.skip_threshold)
        .unwrap_or(config::DEFAULT_SKIP_THRESHOLD);
    opts.max_samples = file_cfg.max_samples.unwrap_or(config::DEFAULT_MAX_SAMPLES);
    opts.workers = args.workers.or(file_cfg.workers).unwrap_or(0);
    opts.limit = args.limit;
    opts.match_only = args.match_only;
    opts.library.clone_from(&args.library);
    opts.source_hint.clone_from(&args.source_hint);

    // The facade is instantiated whenever a credential is present; match-only
    // runs bypass it entirely so credentials are optional there.
    let agents = if args.match_only {
        None
    } else {
        match LmConfig::from_env() {
            Some(mut cfg) => {
                if std::env::var("LOGLOOM_MODEL").is_err()
                    && let Some(model) = &file_cfg.model
                {
                    cfg.model.clone_from(model);
                }
                if std::env::var("LOGLOOM_BASE_URL").is_err()
                    && let Some(base_url) = &file_cfg.base_url
                {
                    cfg.base_url.clone_from(base_url);
                }
                Some(LmClient::new(cfg)?)
            }
            None => None,
        }
    };

    let observer: Box<dyn Observer> = if args.verbose {
        Box::new(ConsoleObserver)
    } else {
        Box::new(NullObserver)
    };

    let summary = runner::run(&opts, agents.as_ref(), observer.as_ref(), None)?;

    println!(
        "run {}: library {}, {}/{} lines matched, {} new templates, {} failures",
        summary.run_id,
        summary.library,
        summary.matched,
        summary.total_lines,
        summary.new_templates,
        summary.failures,
    );
    println!("report: {}", summary.matches_csv.display());
    Ok(0)
}

pub fn cmd_ls(output: Option<&Path>) -> anyhow::Result<i32> {
    let store = Store::open(paths::library_root(output)?, config::DEFAULT_MAX_SAMPLES)?;
    let ids = store.list_libraries()?;
    if ids.is_empty() {
        println!("no libraries");
        return Ok(0);
    }
    for id in ids {
        let view = store.load_library(&id)?;
        println!(
            "{id}  ({} templates, {} samples)",
            view.templates.len(),
            view.samples.len()
        );
    }
    Ok(0)
}

pub fn cmd_show(library: &str, output: Option<&Path>, json: bool) -> anyhow::Result<i32> {
    let store = Store::open(paths::library_root(output)?, config::DEFAULT_MAX_SAMPLES)?;
    let view = store.load_library(library)?;
    if view.templates.is_empty() && view.head_pattern.is_none() {
        anyhow::bail!("library {library:?} not found or empty");
    }

    if json {
        let value = serde_json::json!({
            "id": view.id,
            "head_pattern": view.head_pattern,
            "templates": view.templates,
        });
        print_json(&value);
        return Ok(0);
    }

    if let Some(head) = &view.head_pattern {
        println!("head: {head}");
    }
    for template in &view.templates {
        println!("{}  {}", template.id, template.placeholder_template);
    }
    Ok(0)
}
