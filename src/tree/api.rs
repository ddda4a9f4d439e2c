use std::collections::HashMap;

use anyhow::Result;
use futures_util::future::try_join_all;
use serde::Deserialize;
use serde_json::json;

use crate::http::ApiClient;
use crate::query;

use super::error::TreeError;
use super::record::JsonMap;

/// The composite tree endpoint rejects requests with more than this many
/// records.
pub const MAX_TREE_RECORDS: usize = 200;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeSaveResponse {
    pub has_errors: bool,
    pub results: Vec<TreeSaveResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeSaveResult {
    pub reference_id: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub errors: Vec<SaveErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveErrorDetail {
    pub status_code: String,
    pub message: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

/// The remote side of an import: create a batch of records, look up
/// record-type ids. Split out so the resolver can run against a fake in
/// tests.
pub trait TreeSaveGateway {
    async fn save_tree(
        &self,
        sobject: &str,
        records: &[JsonMap],
    ) -> Result<TreeSaveResponse, TreeError>;

    async fn record_type_id(&self, sobject: &str, name: &str)
        -> Result<Option<String>, TreeError>;
}

pub struct RestTreeGateway<'a> {
    client: &'a ApiClient,
}

impl<'a> RestTreeGateway<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }
}

impl TreeSaveGateway for RestTreeGateway<'_> {
    async fn save_tree(
        &self,
        sobject: &str,
        records: &[JsonMap],
    ) -> Result<TreeSaveResponse, TreeError> {
        self.client
            .post(
                &format!("/composite/tree/{sobject}"),
                &json!({ "records": records }),
            )
            .await
            .map_err(|e| TreeError::Transport(format!("{e:#}")))
    }

    async fn record_type_id(
        &self,
        sobject: &str,
        name: &str,
    ) -> Result<Option<String>, TreeError> {
        let soql = format!(
            "SELECT Id FROM RecordType WHERE SobjectType = {} AND Name = {}",
            query::soql_quote(sobject),
            query::soql_quote(name)
        );
        let row = query::single_record(self.client, &soql)
            .await
            .map_err(|e| TreeError::Transport(format!("{e:#}")))?;
        Ok(row
            .and_then(|r| r.get("Id").and_then(|v| v.as_str()).map(str::to_string)))
    }
}

// --- describe metadata ---

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SObjectDescribe {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDescribe>,
    #[serde(default)]
    pub child_relationships: Vec<ChildRelationship>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescribe {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub reference_to: Option<Vec<String>>,
    #[serde(default)]
    pub relationship_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildRelationship {
    #[serde(default)]
    pub relationship_name: Option<String>,
    pub field: String,
}

impl FieldDescribe {
    pub fn is_reference(&self) -> bool {
        self.field_type == "reference"
    }

    pub fn reference_targets(&self) -> &[String] {
        self.reference_to.as_deref().unwrap_or(&[])
    }
}

impl SObjectDescribe {
    pub fn field(&self, name: &str) -> Option<&FieldDescribe> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// The child relationship a nested collection key refers to, e.g.
    /// "Contacts" on Account.
    pub fn child_relationship(&self, relationship: &str) -> Option<&ChildRelationship> {
        self.child_relationships.iter().find(|c| {
            c.relationship_name
                .as_deref()
                .is_some_and(|n| n.eq_ignore_ascii_case(relationship))
        })
    }
}

/// Describe metadata for every type in an export, fetched once up front.
#[derive(Debug, Default)]
pub struct DescribeRegistry {
    describes: HashMap<String, SObjectDescribe>,
}

impl DescribeRegistry {
    pub fn get(&self, sobject: &str) -> Option<&SObjectDescribe> {
        self.describes.get(sobject)
    }

    #[cfg(test)]
    pub fn from_describes(describes: Vec<SObjectDescribe>) -> Self {
        Self {
            describes: describes
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
        }
    }
}

pub async fn fetch_describes(client: &ApiClient, types: &[String]) -> Result<DescribeRegistry> {
    let describes = try_join_all(types.iter().map(|sobject| async move {
        let describe: SObjectDescribe = client.get(&format!("/sobjects/{sobject}/describe")).await?;
        anyhow::Ok((describe.name.clone(), describe))
    }))
    .await?;
    Ok(DescribeRegistry {
        describes: describes.into_iter().collect(),
    })
}
