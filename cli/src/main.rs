//! qmi-gen: schema-to-Rust code generator CLI (§6)
//!
//! Two invocation shapes: no args regenerates the canonical schema set from
//! a fixed `schemas/` directory into `generated/`; two positional args
//! process exactly one schema file, after first loading `schemas/common.json`
//! so its `common-ref` definitions resolve. Any `SchemaError`,
//! `CodegenError`, or I/O failure exits nonzero, following the teacher's
//! service-binary convention of `main() -> anyhow::Result<()>` plus
//! `tracing` for progress, rather than printing and swallowing errors.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

const DEFAULT_SCHEMA_DIR: &str = "schemas";
const DEFAULT_OUTPUT_DIR: &str = "generated";
const COMMON_SCHEMA_FILE: &str = "common.json";

/// Compile QMI schema documents into Rust message types.
#[derive(Parser, Debug)]
#[command(name = "qmi-gen")]
struct Args {
    /// Schema file to compile. Omit both positionals to regenerate the
    /// canonical set from `schemas/` into `generated/`.
    input: Option<PathBuf>,

    /// Output Rust source file. Required together with `input`.
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    match (args.input, args.output) {
        (Some(input), Some(output)) => generate_one(&input, &output),
        (None, None) => regenerate_canonical_set(),
        _ => anyhow::bail!("expected either no arguments or both `input-schema` and `output-file`"),
    }
}

fn generate_one(input: &Path, output: &Path) -> Result<()> {
    let schema_dir = input.parent().unwrap_or_else(|| Path::new("."));
    let common_path = schema_dir.join(COMMON_SCHEMA_FILE);

    let common_text = fs::read_to_string(&common_path)
        .with_context(|| format!("reading common schema {}", common_path.display()))?;
    let service_text = fs::read_to_string(input)
        .with_context(|| format!("reading schema {}", input.display()))?;

    let schema = qmi_schema::load_with_common(&common_text, &service_text)
        .with_context(|| format!("loading schema {}", input.display()))?;
    let source = qmi_codegen::generate(&schema)
        .with_context(|| format!("generating code for {}", input.display()))?;

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory {}", parent.display()))?;
    }
    fs::write(output, source).with_context(|| format!("writing {}", output.display()))?;
    info!(input = %input.display(), output = %output.display(), "generated");
    Ok(())
}

/// Regenerate every `*.json` schema in `schemas/` (besides the common
/// document itself) into `generated/<name>.rs`.
fn regenerate_canonical_set() -> Result<()> {
    let schema_dir = Path::new(DEFAULT_SCHEMA_DIR);
    let output_dir = Path::new(DEFAULT_OUTPUT_DIR);
    let common_path = schema_dir.join(COMMON_SCHEMA_FILE);
    let common_text = fs::read_to_string(&common_path)
        .with_context(|| format!("reading common schema {}", common_path.display()))?;

    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating output directory {}", output_dir.display()))?;

    let entries = fs::read_dir(schema_dir)
        .with_context(|| format!("reading schema directory {}", schema_dir.display()))?;

    let mut generated = 0usize;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if path.file_name().and_then(|n| n.to_str()) == Some(COMMON_SCHEMA_FILE) {
            continue;
        }

        let service_text = fs::read_to_string(&path)
            .with_context(|| format!("reading schema {}", path.display()))?;
        let schema = qmi_schema::load_with_common(&common_text, &service_text)
            .with_context(|| format!("loading schema {}", path.display()))?;
        let source = qmi_codegen::generate(&schema)
            .with_context(|| format!("generating code for {}", path.display()))?;

        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("schema");
        let out_path = output_dir.join(format!("{stem}.rs"));
        fs::write(&out_path, source).with_context(|| format!("writing {}", out_path.display()))?;
        info!(input = %path.display(), output = %out_path.display(), "generated");
        generated += 1;
    }

    info!(count = generated, "regenerated canonical schema set");
    Ok(())
}
