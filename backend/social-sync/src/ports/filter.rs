use crate::domain::value_key;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A row of an externally-owned table
pub type Row = Map<String, Value>;

/// One column condition
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    Neq(String, Value),
    In(String, Vec<Value>),
}

/// Conjunction of column conditions
///
/// Values are compared by their normalized string form, so a numeric id
/// matches its textual spelling.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Eq(column.into(), value.into()));
        self
    }

    pub fn neq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Neq(column.into(), value.into()));
        self
    }

    pub fn is_in<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.conditions.push(Condition::In(
            column.into(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|condition| match condition {
            Condition::Eq(column, expected) => cell_equals(row.get(column), expected),
            Condition::Neq(column, expected) => !cell_equals(row.get(column), expected),
            Condition::In(column, values) => {
                values.iter().any(|v| cell_equals(row.get(column), v))
            }
        })
    }
}

fn cell_equals(cell: Option<&Value>, expected: &Value) -> bool {
    match (cell, expected) {
        (None | Some(Value::Null), Value::Null) => true,
        (Some(cell), expected) => match (value_key(cell), value_key(expected)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        (None, _) => false,
    }
}

/// Sort order for selects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }

    /// Compare two rows on this order's column; missing cells sort last
    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        let ordering = match (a.get(&self.column), b.get(&self.column)) {
            (Some(x), Some(y)) => compare_values(x, y),
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if self.ascending {
            ordering
        } else {
            ordering.reverse()
        }
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        _ => value_key(a).cmp(&value_key(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn filter_matches_across_id_representations() {
        let r = row(json!({ "post_id": 12, "user_id": "u1" }));
        assert!(Filter::new().eq("post_id", "12").matches(&r));
        assert!(Filter::new().eq("post_id", 12).eq("user_id", "u1").matches(&r));
        assert!(!Filter::new().eq("user_id", "u2").matches(&r));
        assert!(Filter::new().neq("user_id", "u2").matches(&r));
        assert!(Filter::new().is_in("post_id", [json!(3), json!("12")]).matches(&r));
    }

    #[test]
    fn order_compares_numbers_and_strings() {
        let a = row(json!({ "id": 2, "created_at": "2024-01-01T00:00:00Z" }));
        let b = row(json!({ "id": 10, "created_at": "2024-02-01T00:00:00Z" }));
        assert_eq!(Order::asc("id").compare(&a, &b), Ordering::Less);
        assert_eq!(Order::desc("created_at").compare(&a, &b), Ordering::Greater);
    }
}
