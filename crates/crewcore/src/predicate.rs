use crate::TaskId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Guard evaluated against the latest outputs of earlier tasks.
///
/// `path` is a JSON pointer into the referenced task's output; an empty path
/// selects the whole output. A task with no recorded output makes every leaf
/// predicate false.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    Always,
    Equals {
        task: TaskId,
        #[serde(default)]
        path: String,
        value: Value,
    },
    Contains {
        task: TaskId,
        #[serde(default)]
        path: String,
        text: String,
    },
    Exists {
        task: TaskId,
        #[serde(default)]
        path: String,
    },
    Not {
        predicate: Box<Predicate>,
    },
    All {
        predicates: Vec<Predicate>,
    },
    Any {
        predicates: Vec<Predicate>,
    },
}

impl Predicate {
    pub fn evaluate(&self, outputs: &BTreeMap<TaskId, Value>) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Equals { task, path, value } => {
                select(outputs, task, path).map_or(false, |found| found == value)
            }
            Predicate::Contains { task, path, text } => match select(outputs, task, path) {
                Some(Value::String(s)) => s.contains(text.as_str()),
                Some(Value::Array(items)) => items
                    .iter()
                    .any(|item| item.as_str() == Some(text.as_str())),
                _ => false,
            },
            Predicate::Exists { task, path } => {
                select(outputs, task, path).map_or(false, |found| !found.is_null())
            }
            Predicate::Not { predicate } => !predicate.evaluate(outputs),
            Predicate::All { predicates } => predicates.iter().all(|p| p.evaluate(outputs)),
            Predicate::Any { predicates } => predicates.iter().any(|p| p.evaluate(outputs)),
        }
    }

    /// Task ids whose outputs this predicate reads
    pub fn referenced_tasks(&self) -> Vec<&TaskId> {
        let mut found = Vec::new();
        self.collect_references(&mut found);
        found
    }

    fn collect_references<'a>(&'a self, found: &mut Vec<&'a TaskId>) {
        match self {
            Predicate::Always => {}
            Predicate::Equals { task, .. }
            | Predicate::Contains { task, .. }
            | Predicate::Exists { task, .. } => found.push(task),
            Predicate::Not { predicate } => predicate.collect_references(found),
            Predicate::All { predicates } | Predicate::Any { predicates } => {
                for p in predicates {
                    p.collect_references(found);
                }
            }
        }
    }
}

fn select<'a>(outputs: &'a BTreeMap<TaskId, Value>, task: &str, path: &str) -> Option<&'a Value> {
    let output = outputs.get(task)?;
    if path.is_empty() {
        Some(output)
    } else {
        output.pointer(path)
    }
}
