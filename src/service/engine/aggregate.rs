// Aggregation pipeline execution.
//
// Stages are applied in order to the collection snapshot.  Supported:
// $match, $sort, $skip, $limit, $project, $count, $group (with $sum, $avg,
// $min, $max accumulators).

use std::cmp::Ordering;
use std::collections::BTreeMap;

use bson::{doc, Bson, Document};

use crate::error::{Result, ServiceError};
use crate::service::engine::filter;
use crate::util::bson_ext::{path_get, path_set};

pub fn run(mut documents: Vec<Document>, stages: &[Document]) -> Result<Vec<Document>> {
    for stage in stages {
        let Some((operator, spec)) = stage.iter().next() else {
            return Err(ServiceError::Storage("empty pipeline stage".to_string()));
        };
        let operator: &str = operator.as_ref();
        documents = match operator {
            "$match" => match_stage(documents, spec)?,
            "$sort" => sort_stage(documents, spec)?,
            "$skip" => skip_stage(documents, spec)?,
            "$limit" => limit_stage(documents, spec)?,
            "$project" => project_stage(documents, spec)?,
            "$count" => count_stage(documents, spec)?,
            "$group" => group_stage(documents, spec)?,
            other => {
                return Err(ServiceError::Storage(format!(
                    "unsupported pipeline stage {}",
                    other
                )))
            }
        };
    }
    Ok(documents)
}

fn expect_document<'a>(stage: &str, spec: &'a Bson) -> Result<&'a Document> {
    match spec {
        Bson::Document(doc) => Ok(doc),
        _ => Err(ServiceError::Storage(format!(
            "{} specification is not a document",
            stage
        ))),
    }
}

fn expect_int(stage: &str, spec: &Bson) -> Result<i64> {
    match spec {
        Bson::Int32(v) => Ok(i64::from(*v)),
        Bson::Int64(v) => Ok(*v),
        _ => Err(ServiceError::Storage(format!(
            "{} takes an integer",
            stage
        ))),
    }
}

fn match_stage(documents: Vec<Document>, spec: &Bson) -> Result<Vec<Document>> {
    let query = expect_document("$match", spec)?;
    Ok(documents
        .into_iter()
        .filter(|doc| filter::matches(doc, query))
        .collect())
}

fn sort_stage(mut documents: Vec<Document>, spec: &Bson) -> Result<Vec<Document>> {
    let keys = expect_document("$sort", spec)?;
    documents.sort_by(|a, b| sort_ordering(a, b, keys));
    Ok(documents)
}

pub(crate) fn sort_ordering(a: &Document, b: &Document, keys: &Document) -> Ordering {
    for (path, direction) in keys.iter() {
        let path: &str = path.as_ref();
        let descending = matches!(direction, Bson::Int32(v) if *v < 0)
            || matches!(direction, Bson::Int64(v) if *v < 0)
            || matches!(direction, Bson::Double(v) if *v < 0.0);

        let left = path_get(a, path);
        let right = path_get(b, path);
        let ordering = match (left, right) {
            (Some(x), Some(y)) => filter::compare(x, y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        let ordering = if descending { ordering.reverse() } else { ordering };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn skip_stage(documents: Vec<Document>, spec: &Bson) -> Result<Vec<Document>> {
    let count = expect_int("$skip", spec)?.max(0) as usize;
    Ok(documents.into_iter().skip(count).collect())
}

fn limit_stage(documents: Vec<Document>, spec: &Bson) -> Result<Vec<Document>> {
    let count = expect_int("$limit", spec)?.max(0) as usize;
    Ok(documents.into_iter().take(count).collect())
}

fn count_stage(documents: Vec<Document>, spec: &Bson) -> Result<Vec<Document>> {
    let field = match spec {
        Bson::String(name) if !name.is_empty() => name.clone(),
        _ => return Err(ServiceError::Storage("$count takes a field name".to_string())),
    };
    let mut result = Document::new();
    result.insert(field, Bson::Int64(documents.len() as i64));
    Ok(vec![result])
}

pub(crate) fn apply_projection(document: &Document, projection: &Document) -> Document {
    let mut include = Vec::new();
    let mut exclude = Vec::new();
    for (path, flag) in projection.iter() {
        let path: &str = path.as_ref();
        let on = match flag {
            Bson::Int32(v) => *v != 0,
            Bson::Int64(v) => *v != 0,
            Bson::Boolean(v) => *v,
            Bson::Double(v) => *v != 0.0,
            _ => true,
        };
        if on {
            include.push(path);
        } else {
            exclude.push(path);
        }
    }

    if include.is_empty() {
        // exclusion projection
        let mut result = document.clone();
        for path in exclude {
            crate::util::bson_ext::path_remove(&mut result, path);
        }
        return result;
    }

    let mut result = Document::new();
    // _id rides along unless explicitly excluded
    if !exclude.contains(&"_id") {
        if let Some(id) = document.get("_id") {
            result.insert("_id", id.clone());
        }
    }
    for path in include {
        if let Some(value) = path_get(document, path) {
            path_set(&mut result, path, value.clone());
        }
    }
    result
}

fn project_stage(documents: Vec<Document>, spec: &Bson) -> Result<Vec<Document>> {
    let projection = expect_document("$project", spec)?;
    Ok(documents
        .iter()
        .map(|doc| apply_projection(doc, projection))
        .collect())
}

fn group_key(document: &Document, spec: &Bson) -> Bson {
    match spec {
        Bson::String(path) if path.starts_with('$') => path_get(document, &path[1..])
            .cloned()
            .unwrap_or(Bson::Null),
        other => other.clone(),
    }
}

fn group_stage(documents: Vec<Document>, spec: &Bson) -> Result<Vec<Document>> {
    let spec = expect_document("$group", spec)?;
    let id_spec = spec
        .get("_id")
        .ok_or_else(|| ServiceError::Storage("$group needs an _id".to_string()))?;

    // keyed by a canonical rendering so any scalar can group
    let mut groups: BTreeMap<String, (Bson, Vec<Document>)> = BTreeMap::new();
    for document in documents {
        let key = group_key(&document, id_spec);
        groups
            .entry(format!("{:?}", key))
            .or_insert_with(|| (key, Vec::new()))
            .1
            .push(document);
    }

    let mut results = Vec::with_capacity(groups.len());
    for (_, (key, members)) in groups {
        let mut result = doc! { "_id": key };
        for (field, accumulator) in spec.iter() {
            let field: &str = field.as_ref();
            if field == "_id" {
                continue;
            }
            let accumulator = expect_document("$group accumulator", accumulator)?;
            let Some((op, operand)) = accumulator.iter().next() else {
                return Err(ServiceError::Storage("empty accumulator".to_string()));
            };
            let op: &str = op.as_ref();
            result.insert(field, accumulate(op, operand, &members)?);
        }
        results.push(result);
    }
    Ok(results)
}

fn operand_values(operand: &Bson, members: &[Document]) -> Vec<Bson> {
    match operand {
        Bson::String(path) if path.starts_with('$') => members
            .iter()
            .filter_map(|doc| path_get(doc, &path[1..]).cloned())
            .collect(),
        other => members.iter().map(|_| other.clone()).collect(),
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

fn accumulate(op: &str, operand: &Bson, members: &[Document]) -> Result<Bson> {
    let values = operand_values(operand, members);
    match op {
        "$sum" => {
            let total: f64 = values.iter().filter_map(as_f64).sum();
            if total.fract() == 0.0 {
                Ok(Bson::Int64(total as i64))
            } else {
                Ok(Bson::Double(total))
            }
        }
        "$avg" => {
            let numbers: Vec<f64> = values.iter().filter_map(as_f64).collect();
            if numbers.is_empty() {
                Ok(Bson::Null)
            } else {
                Ok(Bson::Double(numbers.iter().sum::<f64>() / numbers.len() as f64))
            }
        }
        "$min" => Ok(fold_extreme(values, Ordering::Less)),
        "$max" => Ok(fold_extreme(values, Ordering::Greater)),
        other => Err(ServiceError::Storage(format!(
            "unsupported accumulator {}",
            other
        ))),
    }
}

fn fold_extreme(values: Vec<Bson>, keep: Ordering) -> Bson {
    let mut result: Option<Bson> = None;
    for value in values {
        result = match result {
            None => Some(value),
            Some(current) => {
                if filter::compare(&value, &current) == Some(keep) {
                    Some(value)
                } else {
                    Some(current)
                }
            }
        };
    }
    result.unwrap_or(Bson::Null)
}
