//! Store-independent query description: filters, ordering and a window.

use crate::value::{Record, Value};
use regex::RegexBuilder;
use std::cmp::Ordering;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Eq(String, Value),
    Ne(String, Value),
    Gte(String, Value),
    Lte(String, Value),
    In(String, Vec<Value>),
    /// Regex match against the column cast to text.
    Matches {
        column: String,
        pattern: String,
        case_insensitive: bool,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq(column.into(), value.into())
    }

    /// Conjunction of column equalities, e.g. a primary key lookup.
    pub fn all_eq(pairs: &[(String, Value)]) -> Self {
        Predicate::And(pairs.iter().map(|(c, v)| Predicate::Eq(c.clone(), v.clone())).collect())
    }

    /// Evaluates the predicate against an in-memory record.
    pub fn matches(&self, record: &Record) -> Result<bool, regex::Error> {
        Ok(match self {
            Predicate::Eq(c, v) => !v.is_null() && record.value(c).loosely_equals(v),
            Predicate::Ne(c, v) => {
                let cur = record.value(c);
                !cur.is_null() && !cur.loosely_equals(v)
            }
            Predicate::Gte(c, v) => {
                let cur = record.value(c);
                !cur.is_null() && cur.compare(v) != Ordering::Less
            }
            Predicate::Lte(c, v) => {
                let cur = record.value(c);
                !cur.is_null() && cur.compare(v) != Ordering::Greater
            }
            Predicate::In(c, values) => {
                let cur = record.value(c);
                values.iter().any(|v| !v.is_null() && cur.loosely_equals(v))
            }
            Predicate::Matches {
                column,
                pattern,
                case_insensitive,
            } => {
                let cur = record.value(column);
                if cur.is_null() {
                    false
                } else {
                    let re = RegexBuilder::new(pattern).case_insensitive(*case_insensitive).build()?;
                    re.is_match(&cur.to_string())
                }
            }
            Predicate::And(items) => {
                for p in items {
                    if !p.matches(record)? {
                        return Ok(false);
                    }
                }
                true
            }
            Predicate::Or(items) => {
                for p in items {
                    if p.matches(record)? {
                        return Ok(true);
                    }
                }
                false
            }
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

impl Order {
    pub fn asc(column: impl Into<String>) -> Self {
        Order {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Order {
            column: column.into(),
            descending: true,
        }
    }
}

/// Filters are conjunctive. Orderings apply left to right.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Predicate>,
    pub order: Vec<Order>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl Query {
    pub fn new() -> Self {
        Query::default()
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    pub fn order_by(mut self, order: Order) -> Self {
        self.order.push(order);
        self
    }

    /// Appends an ascending ordering unless the column is already ordered on.
    pub fn then_order_by(self, column: &str) -> Self {
        if self.order.iter().any(|o| o.column == column) {
            self
        } else {
            self.order_by(Order::asc(column))
        }
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn is_paginated(&self) -> bool {
        self.offset.is_some() || self.limit.is_some()
    }

    /// Same filters without the window, for occurrence counts.
    pub fn unpaginated(&self) -> Query {
        Query {
            filters: self.filters.clone(),
            order: Vec::new(),
            offset: None,
            limit: None,
        }
    }

    /// Applies filters, ordering and window to an in-memory row set.
    pub fn apply(&self, rows: impl IntoIterator<Item = Record>) -> Result<Vec<Record>, regex::Error> {
        let mut out = Vec::new();
        for row in rows {
            let mut keep = true;
            for f in &self.filters {
                if !f.matches(&row)? {
                    keep = false;
                    break;
                }
            }
            if keep {
                out.push(row);
            }
        }
        if !self.order.is_empty() {
            out.sort_by(|a, b| {
                for o in &self.order {
                    let ord = a.value(&o.column).compare(&b.value(&o.column));
                    let ord = if o.descending { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }
        let offset = self.offset.unwrap_or(0) as usize;
        let rows = out.into_iter().skip(offset);
        Ok(match self.limit {
            Some(limit) => rows.take(limit as usize).collect(),
            None => rows.collect(),
        })
    }
}

/// Persistent refinement installed on an endpoint.
pub type QueryFactory = Arc<dyn Fn(Query) -> Query + Send + Sync>;

pub fn identity_factory() -> QueryFactory {
    Arc::new(|q| q)
}

/// `outer(inner(q))`: the refinement of a sub-endpoint runs after its parent's.
pub fn compose(inner: QueryFactory, outer: QueryFactory) -> QueryFactory {
    Arc::new(move |q| outer(inner(q)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trees() -> Vec<Record> {
        vec![
            Record::new().with("id", 1).with("name", "pine"),
            Record::new().with("id", 2).with("name", "maple"),
            Record::new().with("id", 3).with("name", "oak"),
        ]
    }

    #[test]
    fn filters_order_and_window() {
        let q = Query::new()
            .filter(Predicate::Gte("id".into(), Value::Integer(2)))
            .order_by(Order::desc("id"))
            .limit(1);
        let rows = q.apply(trees()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value("name"), Value::from("oak"));
    }

    #[test]
    fn case_insensitive_regex_over_text_cast() {
        let q = Query::new().filter(Predicate::Or(vec![
            Predicate::Matches {
                column: "name".into(),
                pattern: "MAP".into(),
                case_insensitive: true,
            },
            Predicate::Matches {
                column: "id".into(),
                pattern: "^3$".into(),
                case_insensitive: true,
            },
        ]));
        let rows = q.apply(trees()).unwrap();
        let names: Vec<_> = rows.iter().map(|r| r.value("name").to_string()).collect();
        assert_eq!(names, vec!["maple", "oak"]);
    }

    #[test]
    fn null_never_equals() {
        let rows = vec![Record::new().with("id", 1).with("tree_id", Value::Null)];
        let q = Query::new().filter(Predicate::Eq("tree_id".into(), Value::Null));
        assert!(q.apply(rows).unwrap().is_empty());
    }

    #[test]
    fn composed_factories_apply_in_order() {
        let parent: QueryFactory = Arc::new(|q: Query| q.filter(Predicate::eq("id", 1)));
        let child: QueryFactory = Arc::new(|q: Query| q.limit(5));
        let q = compose(parent, child)(Query::new());
        assert_eq!(q.filters.len(), 1);
        assert_eq!(q.limit, Some(5));
    }

    #[test]
    fn unpaginated_drops_window() {
        let q = Query::new().offset(3).limit(2).order_by(Order::asc("id"));
        let u = q.unpaginated();
        assert!(!u.is_paginated());
        assert!(q.is_paginated());
    }
}
