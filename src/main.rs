//!
//! datafuse command-line runner
//! ----------------------------
//! Scans a data directory and runs saved query parameter files against it.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use datafuse::config::FusionConfig;
use datafuse::export::QueryExport;
use datafuse::query::QuerySpec;
use datafuse::Engine;

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--config <file>] [--data-dir <dir>] <command> [args]\n\nCommands:\n  scan                         print the catalog and merge keys as JSON\n  sessions                     list session labels of the base table\n  sql <query.toml>             print the generated count and data queries\n  count <query.toml>           print the number of matching participants\n  export <query.toml> [--out <dir>]   write the merged result as CSV\n  save <query.toml> [--notes <text>] [--out <dir>]   validate and save the query with provenance\n\nFlags:\n  --config <file>      TOML config file (defaults + DATAFUSE_* env vars when omitted)\n  --data-dir <dir>     Override the configured data directory\n  -h, --help           Show this help\n\nQuery files are either saved query parameter exports or a bare query spec."
    );
}

/// Accept a full export (metadata + query) or a bare spec.
fn load_spec(path: &Path) -> Result<QuerySpec> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    match QueryExport::from_toml(&text) {
        Ok(exp) => Ok(exp.query),
        Err(export_err) => toml::from_str::<QuerySpec>(&text)
            .with_context(|| format!("{} is neither a query export ({}) nor a query spec", path.display(), export_err)),
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let mut args = env::args();
    let program = args.next().unwrap_or_else(|| "datafuse".to_string());
    let mut config_path: Option<PathBuf> = None;
    let mut data_dir: Option<PathBuf> = None;
    let mut out_dir: PathBuf = PathBuf::from(".");
    let mut notes = String::new();
    let mut positional: Vec<String> = Vec::new();
    while let Some(a) = args.next() {
        match a.as_str() {
            "--config" => config_path = Some(args.next().map(PathBuf::from).ok_or_else(|| anyhow!("--config needs a path"))?),
            "--data-dir" => data_dir = Some(args.next().map(PathBuf::from).ok_or_else(|| anyhow!("--data-dir needs a path"))?),
            "--notes" => notes = args.next().ok_or_else(|| anyhow!("--notes needs a text"))?,
            "--out" => out_dir = args.next().map(PathBuf::from).ok_or_else(|| anyhow!("--out needs a directory"))?,
            "-h" | "--help" => {
                print_usage(&program);
                return Ok(());
            }
            _ => positional.push(a),
        }
    }

    let mut config = match &config_path {
        Some(p) => FusionConfig::load(p)?,
        None => FusionConfig::from_env()?,
    };
    if let Some(d) = data_dir { config.data.data_dir = d; }
    info!(target: "datafuse", "datafuse {} starting: data_dir='{}'", env!("CARGO_PKG_VERSION"), config.data.data_dir.display());
    let engine = Engine::new(config)?;

    let query_arg = || -> Result<QuerySpec> {
        let p = positional.get(1).ok_or_else(|| anyhow!("missing <query.toml> argument"))?;
        load_spec(Path::new(p))
    };
    match positional.first().map(|s| s.as_str()) {
        Some("scan") => {
            let snap = engine.snapshot()?;
            let out = serde_json::json!({ "catalog": &*snap.catalog, "merge_keys": &snap.merge_keys });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Some("sessions") => {
            for s in engine.session_values()? { println!("{}", s); }
        }
        Some("sql") => {
            let q = engine.build(&query_arg()?)?;
            println!("-- count ({} params)\n{};\n", q.count.bound_parameters.len(), q.count.sql_text);
            println!("-- data ({} params)\n{};", q.data.bound_parameters.len(), q.data.sql_text);
            println!("-- params: {}", serde_json::to_string(&q.data.bound_parameters)?);
        }
        Some("count") => println!("{}", engine.count(&query_arg()?)?),
        Some("export") => {
            std::fs::create_dir_all(&out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
            let summary = engine.export_csv(&query_arg()?, &out_dir)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Some("save") => {
            std::fs::create_dir_all(&out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
            let path = engine.save_query(&query_arg()?, &notes, &out_dir)?;
            println!("{}", path.display());
        }
        Some(other) => {
            print_usage(&program);
            bail!("unknown command '{}'", other);
        }
        None => {
            print_usage(&program);
            bail!("no command given");
        }
    }
    Ok(())
}
