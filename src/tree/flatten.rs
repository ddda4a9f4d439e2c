use serde_json::{Map, Value};

use super::api::DescribeRegistry;
use super::record::{self, JsonMap};
use super::refs::ReferenceMap;

/// First pass over a query result: give every record a synthetic reference,
/// stamped into its attributes, parents before children and children in the
/// order their relationship fields appear. First-sight order across the
/// whole traversal defines the numbering, so this runs strictly
/// sequentially.
pub fn assign_references(record: &mut JsonMap, refmap: &mut ReferenceMap) {
    let Some(sobject) = record::sobject_type(record).map(str::to_string) else {
        return;
    };
    let reference = match record::record_id(record) {
        Some(id) => refmap.assign(&sobject, id),
        None => refmap.mint(&sobject),
    };

    let mut attributes = Map::new();
    attributes.insert(record::ATTR_TYPE.to_string(), Value::String(sobject));
    attributes.insert(
        record::ATTR_REFERENCE_ID.to_string(),
        Value::String(reference),
    );
    record.insert(record::ATTRIBUTES.to_string(), Value::Object(attributes));

    for (_, value) in record.iter_mut() {
        if let Value::Object(map) = value {
            if let Some(Value::Array(children)) = map.get_mut(record::RECORDS_KEY) {
                for child in children {
                    if let Value::Object(child) = child {
                        assign_references(child, refmap);
                    }
                }
            }
        }
    }
}

/// Depth-first flatten: the record minus its child collections, then every
/// nested child, recursively.
pub fn flatten(record: &JsonMap) -> Vec<JsonMap> {
    let mut stripped = JsonMap::new();
    let mut nested: Vec<&Vec<Value>> = Vec::new();

    for (key, value) in record {
        match record::classify(value) {
            record::FieldShape::Children(children) => nested.push(children),
            _ => {
                stripped.insert(key.clone(), value.clone());
            }
        }
    }

    let mut out = vec![stripped];
    for children in nested {
        for child in children {
            if let Value::Object(child) = child {
                out.extend(flatten(child));
            }
        }
    }
    out
}

/// Plan-mode pass over a rewritten record: hoist each nested child to a
/// sibling, wiring the child's foreign key to the parent's reference. A
/// relationship the describe cannot resolve leaves those records nested and
/// raises a warning instead of failing the export.
pub fn flatten_with_child_relationships(
    record: JsonMap,
    describes: &DescribeRegistry,
    warnings: &mut Vec<String>,
) -> Vec<JsonMap> {
    let sobject = record::sobject_type(&record).unwrap_or_default().to_string();
    let parent_ref = record::reference_id(&record).unwrap_or_default().to_string();
    let describe = describes.get(&sobject);

    let mut parent = JsonMap::new();
    let mut hoisted: Vec<JsonMap> = Vec::new();

    for (key, value) in record {
        if !record::is_child_collection(&value) {
            parent.insert(key, value);
            continue;
        }

        let Some(relationship) = describe.and_then(|d| d.child_relationship(&key)) else {
            warnings.push(format!(
                "Unable to find a foreign key field for relationship {key} on {sobject}; leaving its records nested"
            ));
            parent.insert(key, value);
            continue;
        };

        let foreign_key = relationship.field.clone();
        if let Value::Object(mut collection) = value {
            if let Some(Value::Array(children)) = collection.remove(record::RECORDS_KEY) {
                for child in children {
                    if let Value::Object(mut child) = child {
                        child.insert(
                            foreign_key.clone(),
                            Value::String(format!("@{parent_ref}")),
                        );
                        hoisted.extend(flatten_with_child_relationships(
                            child, describes, warnings,
                        ));
                    }
                }
            }
        }
    }

    let mut out = vec![parent];
    out.extend(hoisted);
    out
}
