use std::path::Path;
use std::process;

use crate::{read_file, report_error, OutputFormat};

static SNAPSHOT_SCHEMA_STR: &str = include_str!("../../../../schema/inventory-snapshot.schema.json");

/// Check a snapshot file against the JSON Schema, then against the rules the
/// schema cannot express (unique refs per kind).
pub(crate) fn cmd_validate(path: &Path, output: OutputFormat, quiet: bool) {
    let schema: serde_json::Value = match serde_json::from_str(SNAPSHOT_SCHEMA_STR) {
        Ok(s) => s,
        Err(e) => {
            let msg = format!("internal error: failed to parse embedded snapshot schema: {}", e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };
    let validator = match jsonschema::validator_for(&schema) {
        Ok(v) => v,
        Err(e) => {
            let msg = format!("internal error: failed to compile schema: {}", e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    let doc_str = read_file(path, output, quiet);
    let doc: serde_json::Value = match serde_json::from_str(&doc_str) {
        Ok(v) => v,
        Err(e) => {
            let msg = format!("error parsing JSON in '{}': {}", path.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    let mut errors: Vec<String> = validator
        .iter_errors(&doc)
        .map(|e| format!("{}", e))
        .collect();
    let snapshot = if errors.is_empty() {
        match invsync_snapshot::from_json(&doc) {
            Ok(s) => Some(s),
            Err(e) => {
                errors.push(e.to_string());
                None
            }
        }
    } else {
        None
    };

    match snapshot {
        Some(snapshot) => {
            if quiet {
                return;
            }
            let counts = snapshot.counts();
            match output {
                OutputFormat::Text => println!(
                    "valid snapshot: {} groups, {} systems, {} credentials, {} sources, {} payloads, {} scripts",
                    counts.inventory_groups,
                    counts.configured_systems,
                    counts.credentials,
                    counts.script_sources,
                    counts.script_payloads,
                    counts.configuration_scripts,
                ),
                OutputFormat::Json => {
                    let json = serde_json::json!({ "valid": true, "counts": counts });
                    println!("{}", json);
                }
            }
        }
        None => {
            match output {
                OutputFormat::Text => {
                    if !quiet {
                        eprintln!("invalid snapshot");
                        for err in &errors {
                            eprintln!("  - {}", err);
                        }
                    }
                }
                OutputFormat::Json => {
                    let json = serde_json::json!({ "valid": false, "errors": errors });
                    eprintln!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
                }
            }
            process::exit(1);
        }
    }
}
