use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;

static TRACE_INIT: Once = Once::new();
const DEFAULT_TRACE_FILTER: &str = "procrt::runtime=debug,procrt::store=info,procrt::analyze=info,procrt::interp=info";

use anyhow::Context;
use clap::{Parser, Subcommand};
use procrt_core::{
    ProcConfig, ProcRuntime, ProcStore, Slot,
    analyze::{AnalysisSession, Analyzer, CallGraphAnalyzer},
    config::env_toggle_enabled,
    interp::MemoryParams,
    rt::ExecOutcome,
    store::{Lookup, ReservedTable},
};
use serde::Serialize;

mod manifest;

use manifest::Manifest;

#[derive(Debug, Parser)]
#[command(name = "procrt", author, version, about = "Operator shell for procrt procedure manifests", long_about = None)]
struct CliArgs {
    /// Runtime configuration (TOML); PROCRT_* variables override it
    #[arg(long, global = true, value_name = "FILE", value_parser = parse_sanitized_path)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List occupied slots after loading a manifest.
    Slots {
        #[arg(value_name = "MANIFEST", value_parser = parse_sanitized_path)]
        manifest: PathBuf,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Run call-graph analysis on one slot without executing it.
    Check {
        #[arg(value_name = "MANIFEST", value_parser = parse_sanitized_path)]
        manifest: PathBuf,
        slot: Slot,
    },
    /// Execute one slot and print the resulting parameters.
    Run {
        #[arg(value_name = "MANIFEST", value_parser = parse_sanitized_path)]
        manifest: PathBuf,
        slot: Slot,
        /// Give up (and cancel) after this many milliseconds
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,
        /// Initial parameter on the local node, may repeat
        #[arg(long = "param", value_name = "NAME=VALUE", value_parser = parse_param_assignment)]
        params: Vec<(String, i64)>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Serialize)]
struct SlotInfo {
    slot: Slot,
    kind: &'static str,
    instructions: usize,
}

#[derive(Debug, Serialize)]
struct ParamInfo {
    node: u16,
    name: String,
    value: i64,
}

fn read_file_content(path: &str) -> anyhow::Result<String> {
    std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("Failed to read file '{}': {}", path, e))
}

fn sanitize_path(raw: &str) -> anyhow::Result<PathBuf> {
    let p = Path::new(raw);

    for comp in p.components() {
        if matches!(comp, Component::ParentDir) {
            return Err(anyhow::anyhow!(
                "Parent directory components ('..') are not allowed in file paths."
            ));
        }
    }

    Ok(p.to_path_buf())
}

fn parse_sanitized_path(raw: &str) -> Result<PathBuf, String> {
    sanitize_path(raw).map_err(|e| e.to_string())
}

fn parse_param_assignment(raw: &str) -> Result<(String, i64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing parameter name in '{}'", raw));
    }
    let value = value
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("invalid value for '{}': {}", name, e))?;
    Ok((name.to_string(), value))
}

fn filter_expr_from(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("1")
        || trimmed.eq_ignore_ascii_case("true")
        || trimmed.eq_ignore_ascii_case("on")
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn maybe_init_tracing() {
    let raw = match std::env::var("PROCRT_TRACE") {
        Ok(value) => value,
        Err(_) => return,
    };

    if !env_toggle_enabled(&raw) {
        return;
    }

    TRACE_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        use tracing_subscriber::fmt;

        let filter_expr = filter_expr_from(&raw).or_else(|| std::env::var("RUST_LOG").ok());

        let builder = fmt().with_writer(std::io::stderr);

        let builder = match filter_expr.and_then(|expr| EnvFilter::try_new(expr).ok()) {
            Some(filter) => builder.with_env_filter(filter),
            None => builder.with_env_filter(DEFAULT_TRACE_FILTER),
        };

        let _ = builder.try_init();
    });
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ProcConfig> {
    let mut config = match path {
        Some(path) => ProcConfig::load(path)?,
        None => ProcConfig::default(),
    };
    config.apply_env()?;
    Ok(config)
}

fn open_store(config: &ProcConfig, manifest: &Manifest) -> anyhow::Result<Arc<ProcStore>> {
    let reserved = ReservedTable::new(config.store.reserved_slots as usize);
    let store = ProcStore::from_config(&config.store, reserved).context("Failed to initialize procedure store")?;
    let loaded = manifest.install(&store)?;
    tracing::debug!(loaded, backend = %config.store.backend, "manifest installed");
    Ok(Arc::new(store))
}

fn main() -> anyhow::Result<()> {
    maybe_init_tracing();

    let CliArgs { config, command } = CliArgs::parse();
    let config = load_config(config.as_deref())?;

    match command {
        Commands::Slots { manifest, json } => {
            let manifest = Manifest::load(&manifest)?;
            let store = open_store(&config, &manifest)?;
            list_slots(&store, json)
        }
        Commands::Check { manifest, slot } => {
            let manifest = Manifest::load(&manifest)?;
            let store = open_store(&config, &manifest)?;
            check_slot(store, slot)
        }
        Commands::Run {
            manifest,
            slot,
            timeout_ms,
            params,
            json,
        } => {
            let manifest = Manifest::load(&manifest)?;
            let store = open_store(&config, &manifest)?;
            let seeded = manifest
                .params
                .iter()
                .map(|(name, value)| (name.clone(), *value))
                .chain(params);
            let table = seeded.fold(MemoryParams::new(), |table, (name, value)| {
                table.with(config.interp.local_node, &name, value)
            });
            run_slot(&config, store, Arc::new(table), slot, Duration::from_millis(timeout_ms), json)
        }
    }
}

fn list_slots(store: &ProcStore, json: bool) -> anyhow::Result<()> {
    let mut infos = Vec::new();
    for slot in store.get_slots()? {
        let info = match store.get(slot)? {
            Lookup::Compiled(_) => SlotInfo {
                slot,
                kind: "compiled",
                instructions: 0,
            },
            Lookup::Dsl(proc) => SlotInfo {
                slot,
                kind: "dsl",
                instructions: proc.len(),
            },
            Lookup::Empty => continue,
        };
        infos.push(info);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
    } else {
        for info in &infos {
            println!("{:>3}  {:<8} {} instructions", info.slot, info.kind, info.instructions);
        }
    }
    Ok(())
}

fn check_slot(store: Arc<ProcStore>, slot: Slot) -> anyhow::Result<()> {
    let proc = match store.get(slot)? {
        Lookup::Dsl(proc) => Arc::new(proc),
        Lookup::Compiled(proc) => {
            println!("slot {}: compiled procedure '{}'", slot, proc.name());
            return Ok(());
        }
        Lookup::Empty => anyhow::bail!("slot {} is empty", slot),
    };

    let analyzer = CallGraphAnalyzer::new(store);
    let analysis = analyzer
        .analyze(slot, proc, &mut AnalysisSession::new())
        .with_context(|| format!("slot {} failed analysis", slot))?;

    println!("slot {}: ok", slot);
    for site in &analysis.root().calls {
        let position = if site.tail { "tail" } else { "nested" };
        println!("  [{}] call {} ({})", site.index, site.slot, position);
    }
    let reachable: Vec<String> = analysis.callee_slots().iter().map(|s| s.to_string()).collect();
    println!("  reachable: {}", reachable.join(", "));
    Ok(())
}

fn run_slot(
    config: &ProcConfig,
    store: Arc<ProcStore>,
    params: Arc<MemoryParams>,
    slot: Slot,
    timeout: Duration,
    json: bool,
) -> anyhow::Result<()> {
    let runtime = ProcRuntime::with_local(config, store, params.clone())?;
    let id = runtime.run(slot)?;

    if !runtime.wait_idle(timeout)? {
        runtime.stop_all()?;
        anyhow::bail!("slot {} did not finish within {} ms", slot, timeout.as_millis());
    }

    let outcome = runtime
        .history()
        .into_iter()
        .find(|record| record.id == id)
        .map(|record| record.outcome)
        .ok_or_else(|| anyhow::anyhow!("no record for execution {}", id))?;

    let snapshot: Vec<ParamInfo> = params
        .snapshot()
        .into_iter()
        .map(|(node, name, value)| ParamInfo { node, name, value })
        .collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        for param in &snapshot {
            println!("{}@{} = {}", param.name, param.node, param.value);
        }
    }

    match outcome {
        ExecOutcome::Completed(status) if status.is_ok() => Ok(()),
        ExecOutcome::Completed(status) => anyhow::bail!("slot {} {}", slot, status),
        ExecOutcome::AnalysisFailed(reason) => anyhow::bail!("slot {} failed analysis: {}", slot, reason),
        ExecOutcome::Cancelled => anyhow::bail!("slot {} was cancelled", slot),
    }
}
