//! Runs the JSON scenario fixtures under `fixtures/` against the library.
//!
//! Each fixture declares a schema document and a list of cases. A case maps
//! an input instance (constructing, or updating `update_target` when given)
//! and compares the encoded result with `expected`, or checks that the
//! failure message contains `expected_error`.
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow, bail};
use colored::Colorize;
use dataclass_mapper::schema::{Catalog, SchemaDoc};
use dataclass_mapper::value::json;
use dataclass_mapper::{Extra, FieldType, Registry, Value};
use rayon::prelude::*;
use serde::Deserialize;

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Fixture {
    schema: SchemaDoc,
    /// Loading the schema itself must fail with this message
    schema_error: Option<String>,
    #[serde(default)]
    cases: Vec<Case>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Case {
    name: String,
    source: String,
    target: String,
    input: serde_json::Value,
    #[serde(default)]
    extra: serde_json::Map<String, serde_json::Value>,
    update_target: Option<serde_json::Value>,
    expected: Option<serde_json::Value>,
    expected_error: Option<String>,
}

struct Outcome {
    label: String,
    result: anyhow::Result<()>,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

fn run_fixture(path: &Path) -> Vec<Outcome> {
    let file = path.file_name().map_or_else(|| path.display().to_string(), |f| f.to_string_lossy().into_owned());
    let fixture = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))
        .and_then(|src| {
            dataclass_mapper::path_de::from_str_with_path::<Fixture>(&src).map_err(anyhow::Error::from)
        });
    let fixture = match fixture {
        Ok(fixture) => fixture,
        Err(error) => return vec![Outcome { label: file, result: Err(error) }],
    };

    let registry = Registry::new();
    let loaded = Catalog::load(&fixture.schema, &registry);
    let catalog = match (loaded, &fixture.schema_error) {
        (Ok(catalog), None) => catalog,
        (Err(error), Some(expected)) => {
            let result = expect_message(&error.to_string(), expected);
            return vec![Outcome { label: format!("{file} (schema)"), result }];
        }
        (Ok(_), Some(expected)) => {
            let result = Err(anyhow!("schema loaded, expected an error containing {expected:?}"));
            return vec![Outcome { label: format!("{file} (schema)"), result }];
        }
        (Err(error), None) => {
            return vec![Outcome { label: format!("{file} (schema)"), result: Err(error.into()) }];
        }
    };

    fixture
        .cases
        .par_iter()
        .map(|case| Outcome {
            label: format!("{file} :: {}", case.name),
            result: run_case(case, &catalog, &registry),
        })
        .collect()
}

fn run_case(case: &Case, catalog: &Catalog, registry: &Registry) -> anyhow::Result<()> {
    let mapped = map_case(case, catalog, registry);
    match (mapped, &case.expected, &case.expected_error) {
        (Ok(actual), Some(expected), None) => {
            if &actual != expected {
                bail!(
                    "mismatch\n  expected: {}\n  actual:   {}",
                    serde_json::to_string(expected)?,
                    serde_json::to_string(&actual)?
                );
            }
            Ok(())
        }
        (Err(error), None, Some(expected)) => expect_message(&format!("{error:#}"), expected),
        (Ok(actual), None, Some(expected)) => Err(anyhow!(
            "mapped to {}, expected an error containing {expected:?}",
            serde_json::to_string(&actual)?
        )),
        (Err(error), Some(_), None) => Err(error),
        _ => bail!("a case needs exactly one of `expected` and `expected_error`"),
    }
}

fn map_case(case: &Case, catalog: &Catalog, registry: &Registry) -> anyhow::Result<serde_json::Value> {
    let source = catalog.decode(&case.source, &case.input)?;
    let extra = case
        .extra
        .iter()
        .map(|(key, value)| Ok((key.clone(), json::decode(value, &FieldType::Any, catalog)?)))
        .collect::<anyhow::Result<Extra>>()?;
    let result: Value = match &case.update_target {
        Some(target) => {
            let mut target = catalog.decode(&case.target, target)?;
            registry.update(&source, &mut target, &extra)?;
            target
        }
        None => registry.convert(&source, catalog.class(&case.target)?.class(), &extra)?,
    };
    Ok(json::encode(&result))
}

fn expect_message(actual: &str, expected: &str) -> anyhow::Result<()> {
    if actual.contains(expected) {
        Ok(())
    } else {
        Err(anyhow!("error {actual:?} does not contain {expected:?}"))
    }
}

fn fixture_paths() -> anyhow::Result<Vec<PathBuf>> {
    let pattern = format!("{}/fixtures/*.json", env!("CARGO_MANIFEST_DIR"));
    let mut paths = glob::glob(&pattern)?.collect::<Result<Vec<_>, _>>()?;
    paths.sort();
    Ok(paths)
}

fn main() -> anyhow::Result<()> {
    let outcomes = fixture_paths()?
        .par_iter()
        .flat_map(|path| run_fixture(path))
        .collect::<Vec<_>>();

    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(()) => eprintln!("{} {}", "✅".green(), outcome.label),
            Err(error) => {
                failed += 1;
                eprintln!("{} {}\n   {}", "❌".red(), outcome.label.bold(), format!("{error:#}").red());
            }
        }
    }
    let summary = format!("{} passed, {failed} failed", outcomes.len() - failed);
    if failed > 0 {
        eprintln!("{}", summary.red().bold());
        std::process::exit(1);
    }
    eprintln!("{}", summary.green().bold());
    Ok(())
}
