use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

pub type JsonMap = Map<String, Value>;

pub const ATTRIBUTES: &str = "attributes";
pub const ATTR_TYPE: &str = "type";
pub const ATTR_REFERENCE_ID: &str = "referenceId";
pub const ID_FIELD: &str = "Id";
pub const RECORDS_KEY: &str = "records";

/// What a field value is, for the flattening and rewriting passes.
pub enum FieldShape<'a> {
    Null,
    Scalar(&'a Value),
    Reference(&'a str),
    Children(&'a Vec<Value>),
}

pub fn classify(value: &Value) -> FieldShape<'_> {
    match value {
        Value::Null => FieldShape::Null,
        Value::String(s) if is_reference_value(s) => FieldShape::Reference(s),
        Value::Object(map) => match map.get(RECORDS_KEY) {
            Some(Value::Array(records)) => FieldShape::Children(records),
            _ => FieldShape::Scalar(value),
        },
        other => FieldShape::Scalar(other),
    }
}

fn ref_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^@\w+Ref\d+$").expect("valid reference pattern"))
}

/// True for synthetic reference values like "@AccountRef12".
pub fn is_reference_value(value: &str) -> bool {
    ref_pattern().is_match(value)
}

/// True when the value references a record of the given type, e.g.
/// "@AccountRef3" for sobject "Account".
pub fn is_same_type_reference(value: &str, sobject: &str) -> bool {
    value
        .strip_prefix('@')
        .and_then(|v| v.strip_prefix(sobject))
        .and_then(|v| v.strip_prefix("Ref"))
        .map(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

pub fn sobject_type(record: &JsonMap) -> Option<&str> {
    record.get(ATTRIBUTES)?.get(ATTR_TYPE)?.as_str()
}

pub fn reference_id(record: &JsonMap) -> Option<&str> {
    record.get(ATTRIBUTES)?.get(ATTR_REFERENCE_ID)?.as_str()
}

pub fn record_id(record: &JsonMap) -> Option<&str> {
    record.get(ID_FIELD)?.as_str()
}

pub fn is_child_collection(value: &Value) -> bool {
    matches!(classify(value), FieldShape::Children(_))
}

/// Visit every field value of the record and of records nested inside its
/// child collections. Attributes are not visited.
pub fn visit_values<'a, F: FnMut(&'a str, &'a Value)>(record: &'a JsonMap, visit: &mut F) {
    for (key, value) in record {
        if key == ATTRIBUTES {
            continue;
        }
        match classify(value) {
            FieldShape::Children(children) => {
                for child in children {
                    if let Value::Object(child) = child {
                        visit_values(child, visit);
                    }
                }
            }
            _ => visit(key, value),
        }
    }
}

/// Mutable counterpart of [`visit_values`] restricted to string fields,
/// which is where references live.
pub fn visit_string_values_mut<F: FnMut(&mut String)>(record: &mut JsonMap, visit: &mut F) {
    for (key, value) in record.iter_mut() {
        if key == ATTRIBUTES {
            continue;
        }
        match value {
            Value::String(s) => visit(s),
            Value::Object(map) => {
                if let Some(Value::Array(children)) = map.get_mut(RECORDS_KEY) {
                    for child in children {
                        if let Value::Object(child) = child {
                            visit_string_values_mut(child, visit);
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> JsonMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn reference_values_match() {
        assert!(is_reference_value("@AccountRef1"));
        assert!(is_reference_value("@My_Object__cRef12"));
        assert!(!is_reference_value("@AccountRef"));
        assert!(!is_reference_value("AccountRef1"));
        assert!(!is_reference_value("@someone_on_social"));
    }

    #[test]
    fn same_type_reference_requires_exact_type() {
        assert!(is_same_type_reference("@AccountRef3", "Account"));
        assert!(!is_same_type_reference("@AccountRef3", "Contact"));
        assert!(!is_same_type_reference("@AccountBrandRef3", "Account"));
    }

    #[test]
    fn visit_values_descends_into_children() {
        let record = map(json!({
            "attributes": {"type": "Account"},
            "Name": "Acme",
            "Contacts": {"records": [
                {"attributes": {"type": "Contact"}, "LastName": "Smith"}
            ]}
        }));

        let mut seen = Vec::new();
        visit_values(&record, &mut |key, _| seen.push(key.to_string()));
        assert_eq!(seen, vec!["Name", "LastName"]);
    }

    #[test]
    fn visit_string_values_mut_rewrites_nested() {
        let mut record = map(json!({
            "attributes": {"type": "Account"},
            "Name": "Acme",
            "Contacts": {"records": [
                {"attributes": {"type": "Contact"}, "LastName": "old"}
            ]}
        }));

        visit_string_values_mut(&mut record, &mut |s| *s = s.to_uppercase());
        assert_eq!(record["Name"], "ACME");
        assert_eq!(record["Contacts"]["records"][0]["LastName"], "OLD");
    }
}
