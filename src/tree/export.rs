use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::args::BaseArgs;
use crate::auth;
use crate::http::ApiClient;
use crate::query;
use crate::ui::{print_command_status, with_spinner, CommandStatus};
use crate::utils::pluralize;

use super::api::{fetch_describes, DescribeRegistry};
use super::flatten;
use super::record::{self, JsonMap};
use super::refs::ReferenceMap;
use super::rewrite;

#[derive(Debug, Clone, Args)]
pub struct ExportArgs {
    /// SOQL query selecting the record tree to export
    #[arg(short = 'q', long = "query")]
    pub soql: String,

    /// Directory to write files into (created if missing)
    #[arg(short = 'd', long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Write per-type flat files plus a plan manifest instead of nested trees
    #[arg(long)]
    pub plan: bool,

    /// Prefix prepended to every produced file name
    #[arg(short = 'x', long)]
    pub prefix: Option<String>,
}

pub struct ExportOutcome {
    pub files: Vec<PathBuf>,
    /// File name to file body, in write order.
    pub contents: Vec<(String, Value)>,
    pub warnings: Vec<String>,
}

pub async fn run(base: BaseArgs, args: ExportArgs) -> Result<()> {
    let ctx = auth::resolve(&base)?;
    let client = ApiClient::new(&ctx)?;

    let outcome = with_spinner(
        "Exporting records...",
        run_export(
            &client,
            &args.soql,
            &args.output_dir,
            args.plan,
            args.prefix.as_deref(),
        ),
    )
    .await?;

    for warning in &outcome.warnings {
        print_command_status(CommandStatus::Warning, warning);
    }

    if base.json {
        let mirror: Map<String, Value> = outcome.contents.into_iter().collect();
        println!("{}", serde_json::to_string_pretty(&mirror)?);
        return Ok(());
    }

    for (path, (name, body)) in outcome.files.iter().zip(&outcome.contents) {
        if name.ends_with("plan.json") {
            print_command_status(
                CommandStatus::Success,
                &format!("Wrote plan manifest to {}", path.display()),
            );
        } else {
            let count = record_count(body);
            print_command_status(
                CommandStatus::Success,
                &format!(
                    "Wrote {count} {} to {}",
                    pluralize(count, "record", None),
                    path.display()
                ),
            );
        }
    }
    Ok(())
}

pub async fn run_export(
    client: &ApiClient,
    soql: &str,
    output_dir: &Path,
    plan: bool,
    prefix: Option<&str>,
) -> Result<ExportOutcome> {
    let records = query::query_all(client, soql).await?;
    if records.is_empty() {
        bail!("Query returned no records; nothing to export.");
    }

    let types = collect_types(&records);
    let describes = fetch_describes(client, &types).await?;

    let (contents, warnings) = build_export_files(records, &describes, plan, prefix)?;

    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    let mut files = Vec::new();
    for (name, body) in &contents {
        let path = output_dir.join(name);
        write_json_atomic(&path, body)?;
        files.push(path);
    }

    Ok(ExportOutcome {
        files,
        contents,
        warnings,
    })
}

/// The full export pipeline after the org I/O: assign references, rewrite
/// lookups, optionally hoist children for a plan, and group records into
/// file bodies.
fn build_export_files(
    mut records: Vec<JsonMap>,
    describes: &DescribeRegistry,
    plan: bool,
    prefix: Option<&str>,
) -> Result<(Vec<(String, Value)>, Vec<String>)> {
    let mut refmap = ReferenceMap::new();
    for record in &mut records {
        flatten::assign_references(record, &mut refmap);
    }

    let mut rewritten = Vec::with_capacity(records.len());
    for record in &records {
        rewritten.push(rewrite::rewrite_record(record, &refmap, describes)?);
    }

    let mut warnings = Vec::new();
    let grouped = if plan {
        let flat: Vec<JsonMap> = rewritten
            .into_iter()
            .flat_map(|r| flatten::flatten_with_child_relationships(r, describes, &mut warnings))
            .collect();
        group_by_type(flat)
    } else {
        group_by_type(rewritten)
    };

    let mut contents: Vec<(String, Value)> = Vec::new();
    let mut manifest = Vec::new();
    for (sobject, group) in grouped {
        let file_name = data_file_name(prefix, &sobject);
        manifest.push(json!({"sobjectType": sobject, "files": [file_name.clone()]}));
        contents.push((file_name, json!({ "records": group })));
    }
    if plan {
        contents.push((plan_file_name(prefix), Value::Array(manifest)));
    }

    Ok((contents, warnings))
}

/// Every distinct sobject type in the result tree, in first-sight order.
fn collect_types(records: &[JsonMap]) -> Vec<String> {
    fn visit(record: &JsonMap, types: &mut Vec<String>) {
        if let Some(sobject) = record::sobject_type(record) {
            if !types.iter().any(|t| t == sobject) {
                types.push(sobject.to_string());
            }
        }
        for (_, value) in record {
            if let record::FieldShape::Children(children) = record::classify(value) {
                for child in children {
                    if let Value::Object(child) = child {
                        visit(child, types);
                    }
                }
            }
        }
    }

    let mut types = Vec::new();
    for record in records {
        visit(record, &mut types);
    }
    types
}

fn group_by_type(records: Vec<JsonMap>) -> Vec<(String, Vec<JsonMap>)> {
    let mut groups: Vec<(String, Vec<JsonMap>)> = Vec::new();
    for record in records {
        let sobject = record::sobject_type(&record).unwrap_or_default().to_string();
        match groups.iter_mut().find(|(t, _)| *t == sobject) {
            Some((_, group)) => group.push(record),
            None => groups.push((sobject, vec![record])),
        }
    }
    groups
}

fn data_file_name(prefix: Option<&str>, sobject: &str) -> String {
    match prefix {
        Some(p) => format!("{p}-{sobject}.json"),
        None => format!("{sobject}.json"),
    }
}

fn plan_file_name(prefix: Option<&str>) -> String {
    match prefix {
        Some(p) => format!("{p}-plan.json"),
        None => "plan.json".to_string(),
    }
}

/// Total records in a data file body, nested children included.
fn record_count(body: &Value) -> usize {
    let Some(Value::Array(records)) = body.get(record::RECORDS_KEY) else {
        return 0;
    };
    records
        .iter()
        .filter_map(|r| match r {
            Value::Object(map) => Some(flatten::flatten(map).len()),
            _ => None,
        })
        .sum()
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;

    let bytes = serde_json::to_vec_pretty(value).context("failed to serialize JSON")?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| {
        format!(
            "failed to move temporary file {} to {}",
            tmp.display(),
            path.display()
        )
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::api::SObjectDescribe;
    use super::super::resolve::testing::FakeGateway;
    use super::super::resolve::{PlanPart, PlanResolver};
    use super::*;

    fn map(value: Value) -> JsonMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn describes() -> DescribeRegistry {
        let account: SObjectDescribe = serde_json::from_value(json!({
            "name": "Account",
            "fields": [
                {"name": "Name", "type": "string"},
                {"name": "Industry", "type": "picklist"}
            ],
            "childRelationships": [
                {"relationshipName": "Contacts", "field": "AccountId", "childSObject": "Contact"}
            ]
        }))
        .unwrap();
        let contact: SObjectDescribe = serde_json::from_value(json!({
            "name": "Contact",
            "fields": [
                {"name": "LastName", "type": "string"},
                {"name": "AccountId", "type": "reference", "referenceTo": ["Account"], "relationshipName": "Account"}
            ],
            "childRelationships": []
        }))
        .unwrap();
        DescribeRegistry::from_describes(vec![account, contact])
    }

    fn query_result() -> Vec<JsonMap> {
        vec![
            map(json!({
                "attributes": {"type": "Account", "url": "/services/data/v62.0/sobjects/Account/001000000000001"},
                "Id": "001000000000001",
                "Name": "Acme",
                "Industry": "Technology",
                "Contacts": {"totalSize": 2, "done": true, "records": [
                    {
                        "attributes": {"type": "Contact", "url": "/services/data/v62.0/sobjects/Contact/003000000000001"},
                        "Id": "003000000000001",
                        "LastName": "Smith",
                        "AccountId": "001000000000001"
                    },
                    {
                        "attributes": {"type": "Contact", "url": "/services/data/v62.0/sobjects/Contact/003000000000002"},
                        "Id": "003000000000002",
                        "LastName": "Jones",
                        "AccountId": "001000000000001"
                    }
                ]}
            })),
            map(json!({
                "attributes": {"type": "Account", "url": "/services/data/v62.0/sobjects/Account/001000000000002"},
                "Id": "001000000000002",
                "Name": "Globex",
                "Industry": null
            })),
        ]
    }

    #[test]
    fn collect_types_walks_the_whole_tree() {
        assert_eq!(collect_types(&query_result()), vec!["Account", "Contact"]);
    }

    #[test]
    fn file_names_honor_the_prefix() {
        assert_eq!(data_file_name(None, "Account"), "Account.json");
        assert_eq!(data_file_name(Some("demo"), "Account"), "demo-Account.json");
        assert_eq!(plan_file_name(None), "plan.json");
        assert_eq!(plan_file_name(Some("demo")), "demo-plan.json");
    }

    #[test]
    fn nested_export_writes_one_file_per_top_level_type() {
        let (contents, warnings) =
            build_export_files(query_result(), &describes(), false, None).unwrap();

        assert!(warnings.is_empty());
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].0, "Account.json");

        let records = contents[0].1["records"].as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0]["attributes"],
            json!({"type": "Account", "referenceId": "AccountRef1"})
        );
        assert_eq!(
            records[0]["Contacts"]["records"][0]["attributes"]["referenceId"],
            "ContactRef1"
        );
        assert_eq!(record_count(&contents[0].1), 4);
    }

    #[test]
    fn plan_export_hoists_children_and_writes_a_manifest() {
        let (contents, warnings) =
            build_export_files(query_result(), &describes(), true, None).unwrap();

        assert!(warnings.is_empty());
        let names: Vec<&str> = contents.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Account.json", "Contact.json", "plan.json"]);

        let contacts = contents[1].1["records"].as_array().unwrap();
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0]["AccountId"], "@AccountRef1");
        assert_eq!(contacts[1]["AccountId"], "@AccountRef1");

        assert_eq!(
            contents[2].1,
            json!([
                {"sobjectType": "Account", "files": ["Account.json"]},
                {"sobjectType": "Contact", "files": ["Contact.json"]}
            ])
        );
    }

    #[tokio::test]
    async fn plan_export_round_trips_through_the_resolver() {
        let (contents, _) = build_export_files(query_result(), &describes(), true, None).unwrap();

        let parts: Vec<PlanPart> = contents
            .iter()
            .take(2)
            .map(|(name, body)| PlanPart {
                sobject_type: name.trim_end_matches(".json").to_string(),
                file_path: name.into(),
                records: body["records"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|r| map(r.clone()))
                    .collect(),
            })
            .collect();

        let gateway = FakeGateway::default();
        let results = PlanResolver::new(&gateway).resolve(parts).await.unwrap();

        let types: Vec<&str> = results.iter().map(|r| r.sobject_type.as_str()).collect();
        assert_eq!(types, vec!["Account", "Account", "Contact", "Contact"]);

        // Non-identity fields survive the round trip; the lookup now holds
        // the freshly assigned id.
        let batches = gateway.sent_batches();
        let account_id = &results[0].id;
        assert_eq!(batches[0].1[0]["Name"], "Acme");
        assert_eq!(batches[1].1[0]["LastName"], "Smith");
        assert_eq!(batches[1].1[0]["AccountId"], json!(account_id));
    }
}
