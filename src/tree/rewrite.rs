use serde_json::{json, Map, Value};

use super::api::{DescribeRegistry, SObjectDescribe};
use super::error::TreeError;
use super::record::{self, JsonMap};
use super::refs::ReferenceMap;

/// Rewrite one record for export: fresh attributes carrying only the type
/// and synthetic reference, identity and null fields dropped, lookup values
/// swapped for "@" references, children rewritten recursively in place.
/// The source record is left untouched.
pub fn rewrite_record(
    record: &JsonMap,
    refmap: &ReferenceMap,
    describes: &DescribeRegistry,
) -> Result<JsonMap, TreeError> {
    let sobject = record::sobject_type(record).unwrap_or_default().to_string();
    let describe = describes.get(&sobject);

    let mut out = JsonMap::new();
    let mut attributes = Map::new();
    attributes.insert(
        record::ATTR_TYPE.to_string(),
        Value::String(sobject.clone()),
    );
    if let Some(reference) = record::reference_id(record) {
        attributes.insert(
            record::ATTR_REFERENCE_ID.to_string(),
            Value::String(reference.to_string()),
        );
    }
    out.insert(record::ATTRIBUTES.to_string(), Value::Object(attributes));

    for (key, value) in record {
        if key == record::ATTRIBUTES || key == record::ID_FIELD {
            continue;
        }
        match record::classify(value) {
            record::FieldShape::Null => {}
            record::FieldShape::Children(children) => {
                let rewritten = children
                    .iter()
                    .filter_map(|child| match child {
                        Value::Object(c) => Some(c),
                        _ => None,
                    })
                    .map(|c| rewrite_record(c, refmap, describes).map(Value::Object))
                    .collect::<Result<Vec<Value>, TreeError>>()?;
                if !rewritten.is_empty() {
                    out.insert(key.clone(), json!({ "records": rewritten }));
                }
            }
            _ => {
                out.insert(
                    key.clone(),
                    rewrite_field(&sobject, describe, key, value, refmap)?,
                );
            }
        }
    }
    Ok(out)
}

fn rewrite_field(
    sobject: &str,
    describe: Option<&SObjectDescribe>,
    key: &str,
    value: &Value,
    refmap: &ReferenceMap,
) -> Result<Value, TreeError> {
    let Some(field) = describe.and_then(|d| d.field(key)) else {
        return Ok(cleaned(value));
    };
    if !field.is_reference() {
        return Ok(cleaned(value));
    }
    let Some(id) = value.as_str() else {
        return Ok(cleaned(value));
    };

    let targets = field.reference_targets();
    let reference = if targets.len() == 1 {
        refmap.lookup(&targets[0], id)
    } else if field.reference_to.is_none() && field.relationship_name.is_none() {
        return Err(TreeError::InconsistentMetadata {
            sobject: sobject.to_string(),
            field: field.name.clone(),
        });
    } else {
        // Polymorphic lookup: the target type is not pinned, so search
        // every type's assignments.
        refmap.lookup_any(id)
    };

    Ok(match reference {
        Some(r) => Value::String(format!("@{r}")),
        // References outside the exported set pass through untouched.
        None => Value::String(id.to_string()),
    })
}

/// Related-record projections (e.g. RecordType.Name queried through the
/// parent) keep their fields but drop the query bookkeeping.
fn cleaned(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, v) in map {
                if key == record::ATTRIBUTES {
                    continue;
                }
                out.insert(key.clone(), cleaned(v));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}
