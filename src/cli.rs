//! CLI: schema documents → (rendered mapping methods | mapped JSON instances)
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use crate::registry::{Extra, Registry};
use crate::schema::{self, Catalog};
use crate::types::FieldType;
use crate::value::Value;
use crate::value::json;

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// generate object-to-object mappings from schema documents and run them over JSON instances
#[derive(Parser, Debug)]
pub struct CommandLineInterface {
    #[command(subcommand)]
    cmd: Command,

    /// more logging (-v info, -vv debug, -vvv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// print the generated methods of one mapping, or of every mapping
    Plan(PlanOut),
    /// map a JSON instance of the source class to the target class
    Map(MapOut),
}

#[derive(Args, Debug, Clone)]
struct SchemaSettings {
    /// One or more schema documents. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    schema: Vec<String>,
}

#[derive(clap::Parser, Debug)]
struct PlanOut {
    #[command(flatten)]
    schema_settings: SchemaSettings,

    /// source class name (all mappings if omitted)
    #[arg(long, requires = "target")]
    source: Option<String>,

    /// target class name
    #[arg(long, requires = "source")]
    target: Option<String>,

    /// output file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(clap::Parser, Debug)]
struct MapOut {
    #[command(flatten)]
    schema_settings: SchemaSettings,

    /// source class name
    #[arg(long)]
    source: String,

    /// target class name
    #[arg(long)]
    target: String,

    /// JSON document holding the source instance
    #[arg(long, short)]
    input: PathBuf,

    /// JSON Pointer to select the instance inside the input (e.g. /data/items/0)
    #[arg(long)]
    json_pointer: Option<String>,

    /// JSON object with the side-channel values for `from_extra` fields
    #[arg(long)]
    extra: Option<PathBuf>,

    /// update this target instance instead of constructing a new one
    #[arg(long)]
    update_target: Option<PathBuf>,

    /// output .json file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl SchemaSettings {
    fn load(&self, registry: &Registry) -> anyhow::Result<Catalog> {
        let paths = resolve_file_path_patterns(&self.schema)?;
        tracing::info!(documents = paths.len(), "loading schema");
        let doc = schema::load_paths(&paths)?;
        Ok(Catalog::load(&doc, registry)?)
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }

    pub fn run(&self) -> anyhow::Result<()> {
        init_logging(self.verbose);
        match &self.cmd {
            Command::Plan(target) => target.run(),
            Command::Map(target) => target.run(),
        }
    }
}

impl PlanOut {
    fn run(&self) -> anyhow::Result<()> {
        let registry = Registry::new();
        let catalog = self.schema_settings.load(&registry)?;
        let pairs = match (&self.source, &self.target) {
            (Some(source), Some(target)) => vec![(source.clone(), target.clone())],
            _ => catalog.mappings().to_vec(),
        };
        let mut rendered = String::new();
        for (source, target) in pairs {
            let code = catalog.render(&registry, &source, &target)?;
            if !rendered.is_empty() {
                rendered.push('\n');
            }
            rendered.push_str(&format!("# {source} -> {target}\n{code}"));
        }
        emit(self.out.as_deref(), &rendered)
    }
}

impl MapOut {
    fn run(&self) -> anyhow::Result<()> {
        let registry = Registry::new();
        let catalog = self.schema_settings.load(&registry)?;

        let document = read_json(&self.input)?;
        let document = match self.json_pointer.as_deref() {
            None => &document,
            Some(pointer) => document
                .pointer(pointer)
                .ok_or_else(|| anyhow!("JSON pointer {pointer} selects nothing in {}", self.input.display()))?,
        };
        let source = catalog
            .decode(&self.source, document)
            .with_context(|| format!("decoding the input as '{}'", self.source))?;
        let extra = match &self.extra {
            Some(path) => load_extra(path, &catalog)?,
            None => Extra::new(),
        };

        let result = match &self.update_target {
            Some(path) => {
                let mut target = catalog
                    .decode(&self.target, &read_json(path)?)
                    .with_context(|| format!("decoding the update target as '{}'", self.target))?;
                registry.update(&source, &mut target, &extra)?;
                target
            }
            None => registry.convert(&source, catalog.class(&self.target)?.class(), &extra)?,
        };
        eprintln!(
            "{} {} → {}",
            "mapped".green().bold(),
            self.source.cyan(),
            self.target.cyan()
        );
        emit(self.out.as_deref(), &serde_json::to_string_pretty(&json::encode(&result))?)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // a subscriber may already be installed by an embedding program
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn read_json(path: &Path) -> anyhow::Result<serde_json::Value> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&source).with_context(|| format!("failed to parse JSON file {}", path.display()))
}

fn load_extra(path: &Path, catalog: &Catalog) -> anyhow::Result<Extra> {
    let Value::Dict(entries) = json::decode(&read_json(path)?, &FieldType::Any, catalog)? else {
        bail!("{} must hold a JSON object", path.display());
    };
    entries
        .into_iter()
        .map(|(key, value)| match key {
            Value::Str(key) => Ok((key, value)),
            other => Err(anyhow!("extra key {} is not a string", other.repr())),
        })
        .collect()
}

fn emit(out: Option<&Path>, text: &str) -> anyhow::Result<()> {
    match out {
        Some(out) => {
            if let Some(parent) = out.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(out, text).with_context(|| format!("failed to write {}", out.display()))
        }
        None => {
            println!("{text}");
            Ok(())
        }
    }
}

fn resolve_file_path_patterns<I>(patterns: I) -> anyhow::Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'{'))
    }

    let mut out = Vec::<PathBuf>::new();
    for raw in patterns {
        let pattern = raw.as_ref();
        if !has_glob_chars(pattern) {
            out.push(PathBuf::from(pattern));
            continue;
        }
        let before = out.len();
        for entry in glob::glob(pattern)? {
            out.push(entry?);
        }
        if out.len() == before {
            bail!("glob pattern matched no files: {pattern}");
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn arguments_are_consistent() {
        CommandLineInterface::command().debug_assert();
    }

    #[test]
    fn plan_pair_flags_go_together() {
        let parsed = CommandLineInterface::try_parse_from([
            "dataclass-mapper",
            "plan",
            "--schema",
            "a.json",
            "--source",
            "A",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn literal_paths_pass_through() {
        let paths = resolve_file_path_patterns(["does/not/exist.json"]).unwrap();
        assert_eq!(paths, vec![PathBuf::from("does/not/exist.json")]);
        assert!(resolve_file_path_patterns(["no-such-dir/*.json"]).is_err());
    }
}
