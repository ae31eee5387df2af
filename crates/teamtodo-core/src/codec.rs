use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::error::DecodeError;
use crate::ids::{IdClock, MAX_TASK_ID};
use crate::task::{Task, TaskCollection};

pub const UNKNOWN_AUTHOR: &str = "unknown";
pub const UNTITLED: &str = "Untitled";

/// Decodes a stored record, coercing every element into a valid [`Task`].
///
/// The record itself must be a JSON array; anything else is rejected as a
/// whole. Individual elements are never rejected: missing or malformed fields
/// are replaced so the result always satisfies the task invariants. Ids that
/// are missing, zero, out of range, or repeated within the record are
/// replaced by ids derived from the record alone, so decoding the same text
/// twice yields the same collection. Every resulting id is reported to `ids`.
#[tracing::instrument(skip(raw, ids), fields(len = raw.map_or(0, str::len)))]
pub fn parse_tasks(raw: Option<&str>, ids: &IdClock) -> Result<TaskCollection, DecodeError> {
    let raw = raw.ok_or(DecodeError::Absent)?;
    let value: Value = serde_json::from_str(raw)?;
    let Value::Array(items) = value else {
        return Err(DecodeError::NotArray);
    };

    let empty = Map::new();
    let objects: Vec<&Map<String, Value>> = items
        .iter()
        .map(|item| item.as_object().unwrap_or(&empty))
        .collect();

    let stored_ids: Vec<Option<i64>> = objects.iter().map(|obj| coerce_id(obj.get("id"))).collect();
    let mut spare = SpareIds::new(stored_ids.iter().flatten().copied());

    let mut seen = HashSet::with_capacity(objects.len());
    let mut out = Vec::with_capacity(objects.len());
    for (obj, stored_id) in objects.into_iter().zip(stored_ids) {
        let id = match stored_id {
            Some(id) if seen.insert(id) => id,
            other => {
                let replacement = spare.next().ok_or(DecodeError::IdsExhausted)?;
                trace!(stored = ?other, replacement, "replaced task id");
                seen.insert(replacement);
                replacement
            }
        };

        let title = js_string(obj.get("title")).trim().to_string();
        out.push(Task {
            id,
            author: non_empty_or(js_string(obj.get("author")), UNKNOWN_AUTHOR),
            title: non_empty_or(title, UNTITLED),
            description: js_string(obj.get("description")),
            completed: obj.get("completed").is_some_and(truthy),
        });
    }

    ids.observe(out.iter().map(|t| t.id));
    debug!(count = out.len(), "decoded task record");
    Ok(out)
}

/// Replacement ids for one record: counting up from its highest valid id,
/// then from 1 once that would leave the accepted range. Never yields an id
/// the record already uses.
struct SpareIds {
    taken: HashSet<i64>,
    next: i64,
    wrapped: bool,
}

impl SpareIds {
    fn new(stored: impl Iterator<Item = i64>) -> Self {
        let taken: HashSet<i64> = stored.collect();
        let highest = taken.iter().copied().max().unwrap_or(0).max(0);
        Self {
            taken,
            next: highest + 1,
            wrapped: false,
        }
    }
}

impl Iterator for SpareIds {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        loop {
            if self.next > MAX_TASK_ID {
                if self.wrapped {
                    return None;
                }
                self.wrapped = true;
                self.next = 1;
            }
            let candidate = self.next;
            self.next += 1;
            if self.taken.insert(candidate) {
                return Some(candidate);
            }
        }
    }
}

pub fn encode_tasks(tasks: &[Task]) -> serde_json::Result<String> {
    serde_json::to_string(tasks)
}

fn coerce_id(value: Option<&Value>) -> Option<i64> {
    let number = match value? {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return (i != 0 && i.unsigned_abs() <= MAX_TASK_ID.unsigned_abs()).then_some(i);
            }
            n.as_f64()?
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok()?
        }
        Value::Bool(true) => 1.0,
        _ => return None,
    };

    let truncated = number.trunc();
    if !truncated.is_finite() || truncated == 0.0 || truncated.abs() > MAX_TASK_ID as f64 {
        return None;
    }
    Some(truncated as i64)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// String conversion with falsy values mapped to the empty string.
fn js_string(value: Option<&Value>) -> String {
    match value {
        None => String::new(),
        Some(v) if !truthy(v) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => format_number(n),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => js_string(Some(other)),
            })
            .collect::<Vec<_>>()
            .join(","),
        Some(Value::Object(_)) => "[object Object]".to_string(),
        Some(Value::Null) => String::new(),
    }
}

fn format_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e21 => format!("{f:.0}"),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

fn non_empty_or(value: String, placeholder: &str) -> String {
    if value.trim().is_empty() {
        placeholder.to_string()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{UNKNOWN_AUTHOR, UNTITLED, encode_tasks, parse_tasks};
    use crate::error::DecodeError;
    use crate::ids::{IdClock, MAX_TASK_ID};
    use crate::task::Task;

    #[test]
    fn rejects_absent_garbage_and_non_arrays() {
        let ids = IdClock::new();
        assert!(matches!(parse_tasks(None, &ids), Err(DecodeError::Absent)));
        assert!(matches!(parse_tasks(Some("{not json"), &ids), Err(DecodeError::Json(_))));
        assert!(matches!(
            parse_tasks(Some(r#"{"id":1}"#), &ids),
            Err(DecodeError::NotArray)
        ));
        assert!(matches!(parse_tasks(Some("null"), &ids), Err(DecodeError::NotArray)));
    }

    #[test]
    fn well_formed_records_pass_through() {
        let ids = IdClock::new();
        let tasks = vec![
            Task::new_pending(1, "alice", "One", ""),
            Task {
                completed: true,
                ..Task::new_pending(2, "bob", "Two", "desc")
            },
        ];
        let raw = encode_tasks(&tasks).expect("encode");
        assert_eq!(parse_tasks(Some(&raw), &ids).expect("decode"), tasks);
    }

    #[test]
    fn malformed_fields_are_coerced() {
        let ids = IdClock::new();
        let raw = r#"[
            {"id": "17", "author": "", "title": "  Keep  ", "completed": 1},
            {"title": 42, "description": null, "completed": "no"},
            {"id": 3.9, "author": 5, "title": "", "description": ["a", "b"], "completed": 0},
            "not an object"
        ]"#;
        let tasks = parse_tasks(Some(raw), &ids).expect("decode");
        assert_eq!(tasks.len(), 4);

        assert_eq!(tasks[0].id, 17);
        assert_eq!(tasks[0].author, UNKNOWN_AUTHOR);
        assert_eq!(tasks[0].title, "Keep");
        assert!(tasks[0].completed);

        assert!(tasks[1].id > 17);
        assert_eq!(tasks[1].title, "42");
        assert_eq!(tasks[1].description, "");
        assert!(tasks[1].completed);

        assert_eq!(tasks[2].id, 3);
        assert_eq!(tasks[2].author, "5");
        assert_eq!(tasks[2].title, UNTITLED);
        assert_eq!(tasks[2].description, "a,b");
        assert!(!tasks[2].completed);

        assert_eq!(tasks[3].title, UNTITLED);
        assert_eq!(tasks[3].author, UNKNOWN_AUTHOR);
    }

    #[test]
    fn duplicate_and_zero_ids_get_fresh_unique_ids() {
        let ids = IdClock::new();
        let raw = r#"[{"id":5,"title":"a"},{"id":5,"title":"b"},{"id":0,"title":"c"}]"#;
        let tasks = parse_tasks(Some(raw), &ids).expect("decode");
        assert_eq!(tasks[0].id, 5);
        assert_ne!(tasks[1].id, 5);
        assert_ne!(tasks[2].id, 0);
        assert_ne!(tasks[1].id, tasks[2].id);
    }

    #[test]
    fn replacement_ids_depend_only_on_the_record() {
        let raw = r#"[{"title":"x"},{"id":40,"title":"y"},{"id":40,"title":"z"},{"id":"abc"}]"#;
        let first = parse_tasks(Some(raw), &IdClock::new()).expect("decode");

        let busy = IdClock::new();
        busy.observe([5_000_000]);
        let again = parse_tasks(Some(raw), &busy).expect("decode");
        let twice = parse_tasks(Some(raw), &busy).expect("decode");

        assert_eq!(first, again);
        assert_eq!(again, twice);
        assert_eq!(
            first.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![41, 40, 42, 43]
        );
    }

    #[test]
    fn ids_beyond_the_safe_range_are_replaced() {
        let ids = IdClock::new();
        let raw = format!(
            r#"[{{"id":{}}},{{"id":{}}},{{"id":1e300}},{{"id":-9007199254740993}},{{"id":{MAX_TASK_ID}}},{{"title":"last"}}]"#,
            i64::MAX,
            u64::MAX
        );
        let tasks = parse_tasks(Some(&raw), &ids).expect("decode");
        let got: Vec<i64> = tasks.iter().map(|t| t.id).collect();
        assert_eq!(got, vec![1, 2, 3, 4, MAX_TASK_ID, 5]);
        assert_eq!(ids.high_water(), MAX_TASK_ID);
    }

    fn any_id() -> impl Strategy<Value = serde_json::Value> {
        prop_oneof![
            Just(serde_json::Value::Null),
            (-1_000i64..1_000_000).prop_map(serde_json::Value::from),
            (0i64..4).prop_map(serde_json::Value::from),
            Just(serde_json::Value::from(i64::MAX)),
            Just(serde_json::Value::from(MAX_TASK_ID)),
            (-1e6f64..1e20).prop_map(serde_json::Value::from),
            "[ a-z0-9]{0,6}".prop_map(serde_json::Value::from),
        ]
    }

    proptest! {
        #[test]
        fn decoded_tasks_always_have_titles_and_unique_ids(
            entries in prop::collection::vec(
                (
                    any_id(),
                    prop_oneof![Just(serde_json::Value::Null), any::<bool>().prop_map(serde_json::Value::from), "[ \\t]{0,3}[a-z]{0,4}".prop_map(serde_json::Value::from)],
                ),
                0..12,
            )
        ) {
            let ids = IdClock::new();
            let array: Vec<serde_json::Value> = entries
                .into_iter()
                .map(|(id, title)| serde_json::json!({ "id": id, "title": title }))
                .collect();
            let raw = serde_json::Value::Array(array).to_string();
            let tasks = parse_tasks(Some(&raw), &ids).expect("array always decodes");

            let mut seen = std::collections::HashSet::new();
            for task in &tasks {
                prop_assert!(!task.title.trim().is_empty());
                prop_assert!(task.id != 0 && task.id.abs() <= MAX_TASK_ID);
                prop_assert!(seen.insert(task.id));
            }

            let again = parse_tasks(Some(&raw), &ids).expect("array always decodes");
            prop_assert_eq!(&again, &tasks);
        }
    }
}
