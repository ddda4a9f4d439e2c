use super::resolve::PlanPart;

/// Slice an oversized part into ordered chunks of at most `limit` records.
/// Every chunk keeps the input's type and file; concatenating the chunks
/// reproduces the input order exactly.
pub fn split(part: PlanPart, limit: usize) -> Vec<PlanPart> {
    if part.records.len() <= limit {
        return vec![part];
    }

    let PlanPart {
        sobject_type,
        file_path,
        records,
    } = part;

    let mut chunks = Vec::with_capacity(records.len().div_ceil(limit));
    let mut remaining = records;
    while !remaining.is_empty() {
        let rest = remaining.split_off(limit.min(remaining.len()));
        chunks.push(PlanPart {
            sobject_type: sobject_type.clone(),
            file_path: file_path.clone(),
            records: remaining,
        });
        remaining = rest;
    }
    chunks
}
