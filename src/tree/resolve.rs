use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;

use futures_util::future::try_join_all;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::api::{TreeSaveGateway, MAX_TREE_RECORDS};
use super::batch;
use super::error::{ImportError, RecordFailure, TreeError};
use super::record::{self, JsonMap};

const RECORD_TYPE_FIELD: &str = "RecordType";
const RECORD_TYPE_ID_FIELD: &str = "RecordTypeId";

/// One unit of import work: a type, the file it came from, and the records
/// still pending for it. Parts are never mutated in place across steps;
/// splitting replaces a part with derived parts.
#[derive(Debug, Clone, Serialize)]
pub struct PlanPart {
    pub sobject_type: String,
    pub file_path: PathBuf,
    pub records: Vec<JsonMap>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportResult {
    #[serde(rename = "refId")]
    pub reference_id: String,
    #[serde(rename = "type")]
    pub sobject_type: String,
    pub id: String,
}

/// Drives an import to completion: repeatedly takes the front part,
/// substitutes references that earlier sends resolved, defers records whose
/// references are still pending, and sends what is ready.
///
/// Termination: every loop iteration either shrinks the worklist (empty
/// head, successful send) or performs a bounded split. A state whose
/// fingerprint was already seen means no step since then made progress, so
/// some reference can never resolve and the import fails rather than
/// looping.
pub struct PlanResolver<'a, G> {
    gateway: &'a G,
}

impl<'a, G: TreeSaveGateway> PlanResolver<'a, G> {
    pub fn new(gateway: &'a G) -> Self {
        Self { gateway }
    }

    pub async fn resolve(&self, parts: Vec<PlanPart>) -> Result<Vec<ImportResult>, ImportError> {
        let mut queue: VecDeque<PlanPart> = parts.into();
        let mut results: Vec<ImportResult> = Vec::new();
        let mut fingerprints: HashSet<String> = HashSet::new();

        while let Some(mut head) = queue.pop_front() {
            if !fingerprints.insert(fingerprint(&results, &head, &queue)) {
                let refs = unresolved_references(&head);
                return Err(ImportError::new(
                    TreeError::UnresolvableReferences {
                        file: head.file_path,
                        refs,
                    },
                    results,
                ));
            }

            if head.records.is_empty() {
                continue;
            }

            substitute_known_references(&mut head, &results);

            let (ready, not_ready) = split_same_type_references(head);
            if !not_ready.records.is_empty() {
                queue.push_front(not_ready);
                queue.push_front(ready);
                continue;
            }
            let head = ready;

            // Records still referencing another type get one full pass of
            // the remaining parts before they come around again.
            let (resolved, unresolved) = split_unresolved(head);
            if !unresolved.records.is_empty() {
                queue.push_back(unresolved);
                queue.push_front(resolved);
                continue;
            }
            let head = resolved;

            if head.records.len() > MAX_TREE_RECORDS {
                for chunk in batch::split(head, MAX_TREE_RECORDS).into_iter().rev() {
                    queue.push_front(chunk);
                }
                continue;
            }

            let mut head = head;
            self.resolve_record_types(&mut head)
                .await
                .map_err(|error| ImportError::new(error, results.clone()))?;

            let saved = self
                .send(&head)
                .await
                .map_err(|error| ImportError::new(error, results.clone()))?;
            results.extend(saved);
        }

        Ok(results)
    }

    /// Swap `RecordType: {Name}` objects for a RecordTypeId, looked up with
    /// one query per affected record. Lookups within a batch run
    /// concurrently and all complete before the batch is sent.
    async fn resolve_record_types(&self, head: &mut PlanPart) -> Result<(), TreeError> {
        let lookups: Vec<(usize, String)> = head
            .records
            .iter()
            .enumerate()
            .filter_map(|(idx, rec)| record_type_name(rec).map(|name| (idx, name.to_string())))
            .collect();
        if lookups.is_empty() {
            return Ok(());
        }

        let sobject = head.sobject_type.clone();
        let gateway = self.gateway;
        let ids: Vec<String> = try_join_all(lookups.iter().map(|(_, name)| {
            let sobject = sobject.clone();
            async move {
                match gateway.record_type_id(&sobject, name).await? {
                    Some(id) => Ok(id),
                    None => Err(TreeError::RecordTypeLookup {
                        sobject,
                        name: name.clone(),
                    }),
                }
            }
        }))
        .await?;

        for ((idx, _), id) in lookups.iter().zip(ids) {
            let record = &mut head.records[*idx];
            record.remove(RECORD_TYPE_FIELD);
            record.insert(RECORD_TYPE_ID_FIELD.to_string(), Value::String(id));
        }
        Ok(())
    }

    async fn send(&self, head: &PlanPart) -> Result<Vec<ImportResult>, TreeError> {
        let response = self
            .gateway
            .save_tree(&head.sobject_type, &head.records)
            .await?;

        if response.has_errors {
            let failures = response
                .results
                .into_iter()
                .flat_map(|result| {
                    let reference_id = result.reference_id;
                    result.errors.into_iter().map(move |e| RecordFailure {
                        reference_id: reference_id.clone(),
                        status_code: e.status_code,
                        message: e.message,
                        fields: e.fields,
                    })
                })
                .collect();
            return Err(TreeError::RemoteSave {
                file: head.file_path.clone(),
                failures,
            });
        }

        Ok(response
            .results
            .into_iter()
            .filter_map(|result| {
                result.id.map(|id| ImportResult {
                    reference_id: result.reference_id,
                    sobject_type: head.sobject_type.clone(),
                    id,
                })
            })
            .collect())
    }
}

fn record_type_name(record: &JsonMap) -> Option<&str> {
    record.get(RECORD_TYPE_FIELD)?.get("Name")?.as_str()
}

/// Replace every field value equal to "@{referenceId}" of an already-saved
/// record with that record's new id. All accumulated results apply, not
/// just the latest batch.
pub(super) fn substitute_known_references(part: &mut PlanPart, results: &[ImportResult]) {
    if results.is_empty() {
        return;
    }
    let by_ref: HashMap<String, &str> = results
        .iter()
        .map(|r| (format!("@{}", r.reference_id), r.id.as_str()))
        .collect();
    for record in &mut part.records {
        record::visit_string_values_mut(record, &mut |value| {
            if let Some(id) = by_ref.get(value.as_str()) {
                *value = (*id).to_string();
            }
        });
    }
}

/// Partition a part into records free of same-type references and records
/// still waiting on a sibling of their own type.
pub(super) fn split_same_type_references(part: PlanPart) -> (PlanPart, PlanPart) {
    let PlanPart {
        sobject_type,
        file_path,
        records,
    } = part;
    let (not_ready, ready): (Vec<JsonMap>, Vec<JsonMap>) = records
        .into_iter()
        .partition(|r| has_same_type_reference(r, &sobject_type));
    (
        PlanPart {
            sobject_type: sobject_type.clone(),
            file_path: file_path.clone(),
            records: ready,
        },
        PlanPart {
            sobject_type,
            file_path,
            records: not_ready,
        },
    )
}

/// Partition a part into records whose references are all resolved and
/// records still carrying a reference to some other part.
pub(super) fn split_unresolved(part: PlanPart) -> (PlanPart, PlanPart) {
    let PlanPart {
        sobject_type,
        file_path,
        records,
    } = part;
    let (unresolved, resolved): (Vec<JsonMap>, Vec<JsonMap>) =
        records.into_iter().partition(has_any_reference);
    (
        PlanPart {
            sobject_type: sobject_type.clone(),
            file_path: file_path.clone(),
            records: resolved,
        },
        PlanPart {
            sobject_type,
            file_path,
            records: unresolved,
        },
    )
}

fn has_same_type_reference(record: &JsonMap, sobject: &str) -> bool {
    let mut found = false;
    record::visit_values(record, &mut |_, value| {
        if let Value::String(s) = value {
            if record::is_same_type_reference(s, sobject) {
                found = true;
            }
        }
    });
    found
}

fn has_any_reference(record: &JsonMap) -> bool {
    let mut found = false;
    record::visit_values(record, &mut |_, value| {
        if let Value::String(s) = value {
            if record::is_reference_value(s) {
                found = true;
            }
        }
    });
    found
}

/// Every distinct reference still present in the part, in field order.
fn unresolved_references(part: &PlanPart) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    for record in &part.records {
        record::visit_values(record, &mut |_, value| {
            if let Value::String(s) = value {
                if record::is_reference_value(s) && !refs.iter().any(|r| r == s) {
                    refs.push(s.clone());
                }
            }
        });
    }
    refs
}

/// Content hash of the whole resolver state. Two identical fingerprints
/// mean the intervening steps changed nothing.
fn fingerprint(results: &[ImportResult], head: &PlanPart, tail: &VecDeque<PlanPart>) -> String {
    let state = json!({
        "results": results,
        "parts": std::iter::once(head).chain(tail.iter()).collect::<Vec<_>>(),
    });

    let mut hasher = Sha256::new();
    hasher.update(state.to_string().as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[cfg(test)]
pub(super) mod testing {
    use std::sync::Mutex;

    use serde_json::{json, Value};

    use super::super::api::{SaveErrorDetail, TreeSaveGateway, TreeSaveResponse, TreeSaveResult};
    use super::super::error::TreeError;
    use super::super::record::{self, JsonMap};
    use super::PlanPart;

    pub fn map(value: Value) -> JsonMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    pub fn part(sobject: &str, file: &str, records: Vec<Value>) -> PlanPart {
        PlanPart {
            sobject_type: sobject.to_string(),
            file_path: file.into(),
            records: records.into_iter().map(map).collect(),
        }
    }

    pub fn account(reference: &str, name: &str) -> Value {
        json!({
            "attributes": {"type": "Account", "referenceId": reference},
            "Name": name
        })
    }

    pub fn contact(reference: &str, last_name: &str, account_ref: &str) -> Value {
        json!({
            "attributes": {"type": "Contact", "referenceId": reference},
            "LastName": last_name,
            "AccountId": account_ref
        })
    }

    /// Assigns ids sequentially and records every batch it receives.
    /// Reference ids listed in `fail_refs` fail like a validation rule
    /// would; any literal "@" value reaching the server is reported the way
    /// the real API rejects malformed ids.
    #[derive(Default)]
    pub struct FakeGateway {
        pub batches: Mutex<Vec<(String, Vec<JsonMap>)>>,
        pub record_types: Vec<((String, String), String)>,
        pub fail_refs: Vec<String>,
        pub counter: Mutex<usize>,
    }

    impl FakeGateway {
        pub fn sent_batches(&self) -> Vec<(String, Vec<JsonMap>)> {
            self.batches.lock().unwrap().clone()
        }
    }

    impl TreeSaveGateway for FakeGateway {
        async fn save_tree(
            &self,
            sobject: &str,
            records: &[JsonMap],
        ) -> Result<TreeSaveResponse, TreeError> {
            self.batches
                .lock()
                .unwrap()
                .push((sobject.to_string(), records.to_vec()));

            let mut results = Vec::new();
            let mut has_errors = false;
            for record in records {
                let reference_id = record::reference_id(record).unwrap_or("?").to_string();

                let mut dangling = false;
                record::visit_values(record, &mut |_, value| {
                    if matches!(value, Value::String(s) if s.starts_with('@')) {
                        dangling = true;
                    }
                });

                if dangling || self.fail_refs.contains(&reference_id) {
                    has_errors = true;
                    results.push(TreeSaveResult {
                        reference_id,
                        id: None,
                        errors: vec![SaveErrorDetail {
                            status_code: if dangling {
                                "INVALID_CROSS_REFERENCE_KEY".to_string()
                            } else {
                                "FIELD_CUSTOM_VALIDATION_EXCEPTION".to_string()
                            },
                            message: "rejected".to_string(),
                            fields: vec![],
                        }],
                    });
                } else {
                    let mut counter = self.counter.lock().unwrap();
                    *counter += 1;
                    results.push(TreeSaveResult {
                        reference_id,
                        id: Some(format!("001{:015}", *counter)),
                        errors: vec![],
                    });
                }
            }
            Ok(TreeSaveResponse {
                has_errors,
                results,
            })
        }

        async fn record_type_id(
            &self,
            sobject: &str,
            name: &str,
        ) -> Result<Option<String>, TreeError> {
            Ok(self
                .record_types
                .iter()
                .find(|((s, n), _)| s == sobject && n == name)
                .map(|(_, id)| id.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{account, contact, part, FakeGateway};
    use super::*;
    use serde_json::json;

    #[test]
    fn first_pass_splits_ready_from_self_referencing() {
        let input = part(
            "Account",
            "Account.json",
            vec![
                account("AccountRef1", "A"),
                json!({
                    "attributes": {"type": "Account", "referenceId": "AccountRef2"},
                    "Name": "B",
                    "ParentId": "@AccountRef1"
                }),
                json!({
                    "attributes": {"type": "Account", "referenceId": "AccountRef3"},
                    "Name": "C",
                    "ParentId": "@AccountRef2"
                }),
            ],
        );

        let (ready, not_ready) = split_same_type_references(input);
        let names = |p: &PlanPart| {
            p.records
                .iter()
                .map(|r| r["Name"].as_str().unwrap().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&ready), vec!["A"]);
        assert_eq!(names(&not_ready), vec!["B", "C"]);
    }

    #[tokio::test]
    async fn self_reference_chain_resolves_in_waves() {
        let gateway = FakeGateway::default();
        let parts = vec![part(
            "Account",
            "Account.json",
            vec![
                account("AccountRef1", "A"),
                json!({
                    "attributes": {"type": "Account", "referenceId": "AccountRef2"},
                    "Name": "B",
                    "ParentId": "@AccountRef1"
                }),
                json!({
                    "attributes": {"type": "Account", "referenceId": "AccountRef3"},
                    "Name": "C",
                    "ParentId": "@AccountRef2"
                }),
            ],
        )];

        let results = PlanResolver::new(&gateway).resolve(parts).await.unwrap();
        assert_eq!(results.len(), 3);

        let batches = gateway.sent_batches();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].1[0]["Name"], "A");
        assert_eq!(batches[1].1[0]["Name"], "B");
        assert_eq!(batches[2].1[0]["Name"], "C");

        // B went out with A's real id, not the reference
        let a_id = &results[0].id;
        assert_eq!(batches[1].1[0]["ParentId"], json!(a_id));
    }

    #[tokio::test]
    async fn two_files_resolve_in_plan_order() {
        let gateway = FakeGateway::default();
        let parts = vec![
            part(
                "Account",
                "Account.json",
                vec![account("AccountRef1", "Acme"), account("AccountRef2", "Globex")],
            ),
            part(
                "Contact",
                "Contact.json",
                vec![
                    contact("ContactRef1", "Smith", "@AccountRef1"),
                    contact("ContactRef2", "Jones", "@AccountRef1"),
                    contact("ContactRef3", "Brown", "@AccountRef2"),
                ],
            ),
        ];

        let results = PlanResolver::new(&gateway).resolve(parts).await.unwrap();

        let types: Vec<&str> = results.iter().map(|r| r.sobject_type.as_str()).collect();
        assert_eq!(
            types,
            vec!["Account", "Account", "Contact", "Contact", "Contact"]
        );

        let batches = gateway.sent_batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].0, "Account");
        assert_eq!(batches[0].1.len(), 2);
        assert_eq!(batches[1].0, "Contact");
        assert_eq!(batches[1].1.len(), 3);
    }

    #[tokio::test]
    async fn forward_references_defer_until_later_parts_resolve() {
        // Contact file listed before the Account file it references.
        let gateway = FakeGateway::default();
        let parts = vec![
            part(
                "Contact",
                "Contact.json",
                vec![contact("ContactRef1", "Smith", "@AccountRef1")],
            ),
            part("Account", "Account.json", vec![account("AccountRef1", "Acme")]),
        ];

        let results = PlanResolver::new(&gateway).resolve(parts).await.unwrap();

        let types: Vec<&str> = results.iter().map(|r| r.sobject_type.as_str()).collect();
        assert_eq!(types, vec!["Account", "Contact"]);

        let batches = gateway.sent_batches();
        assert_eq!(batches[0].0, "Account");
        assert_eq!(batches[1].0, "Contact");
        assert_eq!(batches[1].1[0]["AccountId"], json!(&results[0].id));
    }

    #[tokio::test]
    async fn missing_reference_terminates_with_error() {
        let gateway = FakeGateway::default();
        let parts = vec![part(
            "Contact",
            "Contact.json",
            vec![contact("ContactRef1", "Smith", "@AccountRef2000")],
        )];

        let err = PlanResolver::new(&gateway)
            .resolve(parts)
            .await
            .expect_err("import should fail");

        match &err.error {
            TreeError::UnresolvableReferences { file, refs } => {
                assert_eq!(file, &PathBuf::from("Contact.json"));
                assert_eq!(refs, &vec!["@AccountRef2000".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.results.is_empty());
        assert!(gateway.sent_batches().is_empty());
    }

    #[tokio::test]
    async fn missing_reference_keeps_earlier_results() {
        let gateway = FakeGateway::default();
        let parts = vec![
            part("Account", "Account.json", vec![account("AccountRef1", "Acme")]),
            part(
                "Contact",
                "Contact.json",
                vec![contact("ContactRef1", "Smith", "@AccountRef2000")],
            ),
        ];

        let err = PlanResolver::new(&gateway)
            .resolve(parts)
            .await
            .expect_err("import should fail");

        assert_eq!(err.results.len(), 1);
        assert_eq!(err.results[0].sobject_type, "Account");
        match &err.error {
            TreeError::UnresolvableReferences { refs, .. } => {
                assert_eq!(refs, &vec!["@AccountRef2000".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_parts_send_in_order_within_the_limit() {
        let gateway = FakeGateway::default();
        let records: Vec<Value> = (0..500)
            .map(|i| account(&format!("AccountRef{}", i + 1), &format!("account-{i}")))
            .collect();
        let parts = vec![part("Account", "Account.json", records)];

        let results = PlanResolver::new(&gateway).resolve(parts).await.unwrap();
        assert_eq!(results.len(), 500);

        let sizes: Vec<usize> = gateway
            .sent_batches()
            .iter()
            .map(|(_, records)| records.len())
            .collect();
        assert_eq!(sizes, vec![200, 200, 100]);
        assert_eq!(results[0].reference_id, "AccountRef1");
        assert_eq!(results[499].reference_id, "AccountRef500");
    }

    #[tokio::test]
    async fn record_type_names_resolve_before_sending() {
        let gateway = FakeGateway {
            record_types: vec![(
                ("Account".to_string(), "Partner".to_string()),
                "012000000000001".to_string(),
            )],
            ..Default::default()
        };
        let parts = vec![part(
            "Account",
            "Account.json",
            vec![json!({
                "attributes": {"type": "Account", "referenceId": "AccountRef1"},
                "Name": "Acme",
                "RecordType": {"Name": "Partner"}
            })],
        )];

        PlanResolver::new(&gateway).resolve(parts).await.unwrap();

        let batches = gateway.sent_batches();
        let sent = &batches[0].1[0];
        assert!(sent.get("RecordType").is_none());
        assert_eq!(sent["RecordTypeId"], "012000000000001");
    }

    #[tokio::test]
    async fn unknown_record_type_fails_the_import() {
        let gateway = FakeGateway::default();
        let parts = vec![part(
            "Account",
            "Account.json",
            vec![json!({
                "attributes": {"type": "Account", "referenceId": "AccountRef1"},
                "Name": "Acme",
                "RecordType": {"Name": "DoesNotExist"}
            })],
        )];

        let err = PlanResolver::new(&gateway)
            .resolve(parts)
            .await
            .expect_err("import should fail");

        match &err.error {
            TreeError::RecordTypeLookup { sobject, name } => {
                assert_eq!(sobject, "Account");
                assert_eq!(name, "DoesNotExist");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(gateway.sent_batches().is_empty());
    }

    #[tokio::test]
    async fn per_record_failures_surface_with_earlier_results() {
        let gateway = FakeGateway {
            fail_refs: vec!["ContactRef1".to_string()],
            ..Default::default()
        };
        let parts = vec![
            part("Account", "Account.json", vec![account("AccountRef1", "Acme")]),
            part(
                "Contact",
                "Contact.json",
                vec![contact("ContactRef1", "Smith", "@AccountRef1")],
            ),
        ];

        let err = PlanResolver::new(&gateway)
            .resolve(parts)
            .await
            .expect_err("import should fail");

        assert_eq!(err.results.len(), 1);
        match &err.error {
            TreeError::RemoteSave { file, failures } => {
                assert_eq!(file, &PathBuf::from("Contact.json"));
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].reference_id, "ContactRef1");
                assert_eq!(failures[0].status_code, "FIELD_CUSTOM_VALIDATION_EXCEPTION");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
