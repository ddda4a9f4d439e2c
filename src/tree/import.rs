use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::args::BaseArgs;
use crate::auth;
use crate::http::ApiClient;
use crate::ui::{
    apply_column_padding, header, print_command_status, styled_table, with_spinner, CommandStatus,
};
use crate::utils::pluralize;

use super::api::RestTreeGateway;
use super::error::{ImportError, TreeError};
use super::record::{self, JsonMap};
use super::resolve::{ImportResult, PlanPart, PlanResolver};

#[derive(Debug, Clone, Args)]
pub struct ImportArgs {
    /// Plan manifest produced by `sfdata export --plan`
    #[arg(
        short = 'p',
        long,
        conflicts_with = "files",
        required_unless_present = "files"
    )]
    pub plan: Option<PathBuf>,

    /// Record-tree data files to import directly
    #[arg(short = 'f', long = "files", num_args = 1..)]
    pub files: Vec<PathBuf>,
}

pub struct ImportOutcome {
    pub results: Vec<ImportResult>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanEntry {
    sobject_type: String,
    files: Vec<String>,
    // Accepted from older manifests; both are ignored with a warning.
    #[serde(default)]
    save_refs: Option<Value>,
    #[serde(default)]
    resolve_refs: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct DataFile {
    records: Vec<JsonMap>,
}

pub async fn run(base: BaseArgs, args: ImportArgs) -> Result<()> {
    let ctx = auth::resolve(&base)?;
    let client = ApiClient::new(&ctx)?;

    let outcome = match &args.plan {
        Some(plan) => with_spinner("Importing records...", import_from_plan(&client, plan)).await,
        None => with_spinner("Importing records...", import_from_files(&client, &args.files)).await,
    };

    match outcome {
        Ok(outcome) => {
            for warning in &outcome.warnings {
                print_command_status(CommandStatus::Warning, warning);
            }
            if base.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "results": outcome.results,
                        "warnings": outcome.warnings,
                    }))?
                );
            } else {
                print_results_table(&outcome.results);
                print_command_status(
                    CommandStatus::Success,
                    &format!(
                        "Imported {} {}",
                        outcome.results.len(),
                        pluralize(outcome.results.len(), "record", None)
                    ),
                );
            }
            Ok(())
        }
        Err(failure) => {
            let ImportError { error, results } = failure;
            report_failure(&error, &results, base.json)?;
            Err(error.into())
        }
    }
}

pub async fn import_from_plan(
    client: &ApiClient,
    manifest: &Path,
) -> Result<ImportOutcome, ImportError> {
    let mut warnings = Vec::new();
    let parts =
        load_plan_parts(manifest, &mut warnings).map_err(|e| ImportError::new(e, Vec::new()))?;

    let gateway = RestTreeGateway::new(client);
    let results = PlanResolver::new(&gateway).resolve(parts).await?;
    Ok(ImportOutcome { results, warnings })
}

pub async fn import_from_files(
    client: &ApiClient,
    paths: &[PathBuf],
) -> Result<ImportOutcome, ImportError> {
    let parts = load_file_parts(paths).map_err(|e| ImportError::new(e, Vec::new()))?;

    let gateway = RestTreeGateway::new(client);
    let results = PlanResolver::new(&gateway).resolve(parts).await?;
    Ok(ImportOutcome {
        results,
        warnings: Vec::new(),
    })
}

/// Read a plan manifest and every data file it names into plan parts, in
/// manifest order. File entries resolve relative to the manifest's
/// directory. All validation happens here, before anything is sent.
fn load_plan_parts(
    manifest_path: &Path,
    warnings: &mut Vec<String>,
) -> Result<Vec<PlanPart>, TreeError> {
    let entries = read_plan_manifest(manifest_path)?;
    let base_dir = manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let mut legacy_keys = false;
    let mut parts = Vec::new();
    for entry in entries {
        legacy_keys |= entry.save_refs.is_some() || entry.resolve_refs.is_some();
        for file in &entry.files {
            let path = base_dir.join(file);
            let records = load_data_file(&path)?;
            parts.push(PlanPart {
                sobject_type: entry.sobject_type.clone(),
                file_path: path,
                records,
            });
        }
    }
    if legacy_keys {
        warnings
            .push("The saveRefs and resolveRefs plan options are deprecated and ignored.".into());
    }
    Ok(parts)
}

fn read_plan_manifest(path: &Path) -> Result<Vec<PlanEntry>, TreeError> {
    let contents = fs::read_to_string(path).map_err(|e| TreeError::Configuration {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&contents).map_err(|e| TreeError::Configuration {
        path: path.to_path_buf(),
        reason: format!("not a valid plan manifest: {e}"),
    })
}

fn load_data_file(path: &Path) -> Result<Vec<JsonMap>, TreeError> {
    let contents = fs::read_to_string(path).map_err(|e| TreeError::Configuration {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let data: DataFile = serde_json::from_str(&contents).map_err(|e| TreeError::Configuration {
        path: path.to_path_buf(),
        reason: format!("expected {{\"records\": [...]}}: {e}"),
    })?;
    Ok(data.records)
}

/// Build parts directly from data files; the type comes from the records'
/// own attributes.
fn load_file_parts(paths: &[PathBuf]) -> Result<Vec<PlanPart>, TreeError> {
    let mut parts = Vec::new();
    for path in paths {
        let records = load_data_file(path)?;
        if records.is_empty() {
            return Err(TreeError::Configuration {
                path: path.clone(),
                reason: "file contains no records".into(),
            });
        }
        let Some(sobject_type) = records
            .first()
            .and_then(|r| record::sobject_type(r))
            .map(str::to_string)
        else {
            return Err(TreeError::Configuration {
                path: path.clone(),
                reason: "records must carry attributes.type".into(),
            });
        };
        parts.push(PlanPart {
            sobject_type,
            file_path: path.clone(),
            records,
        });
    }
    Ok(parts)
}

fn print_results_table(results: &[ImportResult]) {
    if results.is_empty() {
        return;
    }
    let mut table = styled_table();
    table.set_header(vec![header("Reference ID"), header("Type"), header("ID")]);
    apply_column_padding(&mut table, (0, 4));
    for result in results {
        table.add_row(vec![
            result.reference_id.as_str(),
            result.sobject_type.as_str(),
            result.id.as_str(),
        ]);
    }
    println!("{table}\n");
}

fn report_failure(error: &TreeError, results: &[ImportResult], json_output: bool) -> Result<()> {
    if json_output {
        let mut error_json = json!({
            "kind": error.kind(),
            "message": error.to_string(),
        });
        match error {
            TreeError::RemoteSave { failures, .. } => {
                error_json["failures"] = json!(failures);
            }
            TreeError::UnresolvableReferences { refs, .. } => {
                error_json["references"] = json!(refs);
            }
            _ => {}
        }
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "error": error_json,
                "results": results,
            }))?
        );
        return Ok(());
    }

    if let TreeError::RemoteSave { failures, .. } = error {
        let mut table = styled_table();
        table.set_header(vec![
            header("Reference ID"),
            header("Status Code"),
            header("Message"),
            header("Fields"),
        ]);
        apply_column_padding(&mut table, (0, 4));
        for failure in failures {
            table.add_row(vec![
                failure.reference_id.clone(),
                failure.status_code.clone(),
                failure.message.clone(),
                failure.fields.join(", "),
            ]);
        }
        eprintln!("{table}\n");
    }

    if !results.is_empty() {
        print_command_status(
            CommandStatus::Warning,
            &format!(
                "{} {} had already been created before the failure",
                results.len(),
                pluralize(results.len(), "record", None)
            ),
        );
        print_results_table(results);
    }
    Ok(())
}
