use std::fmt::Write as _;

use anyhow::Result;
use clap::Args;
use dialoguer::console;
use serde::Deserialize;
use serde_json::{Map, Value};
use urlencoding::encode;

use crate::args::BaseArgs;
use crate::auth;
use crate::http::ApiClient;
use crate::ui::{apply_column_padding, header, styled_table, truncate, with_spinner};
use crate::utils::pluralize;

const CELL_MAX_WIDTH: usize = 40;

#[derive(Debug, Clone, Args)]
pub struct QueryArgs {
    /// SOQL query to run
    #[arg(short = 'q', long = "query")]
    pub soql: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub records: Vec<Map<String, Value>>,
    #[serde(default)]
    pub next_records_url: Option<String>,
}

/// Run a query and follow nextRecordsUrl until the result set is complete.
pub async fn query_all(client: &ApiClient, soql: &str) -> Result<Vec<Map<String, Value>>> {
    let mut page: QueryResponse = client.get(&format!("/query?q={}", encode(soql))).await?;
    let mut records = std::mem::take(&mut page.records);
    while let Some(next) = page.next_records_url.take() {
        page = client.get_server_path(&next).await?;
        records.append(&mut page.records);
    }
    Ok(records)
}

/// First row of a query, for point lookups (e.g. resolving a RecordType id).
pub async fn single_record(client: &ApiClient, soql: &str) -> Result<Option<Map<String, Value>>> {
    let page: QueryResponse = client.get(&format!("/query?q={}", encode(soql))).await?;
    Ok(page.records.into_iter().next())
}

/// Quote a string literal for interpolation into a SOQL WHERE clause.
pub fn soql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

pub async fn run(base: BaseArgs, args: QueryArgs) -> Result<()> {
    let ctx = auth::resolve(&base)?;
    let client = ApiClient::new(&ctx)?;

    let records = with_spinner("Running query...", query_all(&client, &args.soql)).await?;

    if base.json {
        println!("{}", serde_json::to_string(&records)?);
        return Ok(());
    }

    let mut output = String::new();
    let count = format!(
        "{} {}",
        records.len(),
        pluralize(records.len(), "record", None)
    );
    writeln!(output, "{} returned\n", console::style(count).bold())?;

    if !records.is_empty() {
        let columns = column_names(&records);
        let mut table = styled_table();
        table.set_header(columns.iter().map(|c| header(c)).collect::<Vec<_>>());
        apply_column_padding(&mut table, (0, 4));

        for record in &records {
            let row: Vec<String> = columns
                .iter()
                .map(|col| cell_text(record.get(col.as_str())))
                .collect();
            table.add_row(row);
        }
        write!(output, "{table}")?;
    }

    println!("{output}");
    Ok(())
}

/// Column order follows the first record's field order; later records only
/// contribute fields the earlier ones did not have.
fn column_names(records: &[Map<String, Value>]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for record in records {
        for key in record.keys() {
            if key == "attributes" {
                continue;
            }
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => truncate(s, CELL_MAX_WIDTH),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Object(map)) => {
            // Child subqueries come back as {totalSize, done, records}.
            if let Some(Value::Array(rows)) = map.get("records") {
                let n = rows.len();
                return format!("({n} {})", pluralize(n, "record", None));
            }
            truncate(
                &serde_json::to_string(map).unwrap_or_default(),
                CELL_MAX_WIDTH,
            )
        }
        Some(other) => truncate(
            &serde_json::to_string(other).unwrap_or_default(),
            CELL_MAX_WIDTH,
        ),
    }
}
