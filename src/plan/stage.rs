//! Plan stages
//!
//! Typed stage descriptors. [`Stage::to_document`] renders the
//! document-store form (`{"$match": {...}}`, ...), which is also what
//! `explain` prints.

use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::query::{OrderByField, SortDirection};

/// One projected field
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionValue {
    Include,
    Exclude,
    /// Computed from an expression, e.g. `"$_id.category"`
    Expr(Value),
}

impl ProjectionValue {
    fn to_document(&self) -> Value {
        match self {
            ProjectionValue::Include => json!(1),
            ProjectionValue::Exclude => json!(0),
            ProjectionValue::Expr(expr) => expr.clone(),
        }
    }
}

/// Ordered field projection
pub type Projection = Vec<(String, ProjectionValue)>;

/// Accumulator applied per group
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulator {
    /// Output field
    pub alias: String,
    /// Native operator (`$sum`, `$avg`, `$min`, `$max`)
    pub operator: &'static str,
    /// `"$field"` or a constant (`1` for counting)
    pub input: Value,
}

/// One stage of a compiled aggregation sequence
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Value),
    /// Group by the named keys into a synthetic `_id` object
    Group {
        keys: Vec<String>,
        accumulators: Vec<Accumulator>,
    },
    Project(Projection),
    AddFields(Vec<(String, Value)>),
    Unset(Vec<String>),
    Sort(Vec<OrderByField>),
    Skip(u64),
    Limit(u64),
    Lookup {
        from: String,
        local_field: String,
        foreign_field: String,
        alias: String,
    },
    Unwind {
        path: String,
        preserve_null_and_empty: bool,
    },
}

impl Stage {
    /// Native stage operator
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Group { .. } => "$group",
            Stage::Project(_) => "$project",
            Stage::AddFields(_) => "$addFields",
            Stage::Unset(_) => "$unset",
            Stage::Sort(_) => "$sort",
            Stage::Skip(_) => "$skip",
            Stage::Limit(_) => "$limit",
            Stage::Lookup { .. } => "$lookup",
            Stage::Unwind { .. } => "$unwind",
        }
    }

    /// Render the document-store form of this stage
    pub fn to_document(&self) -> Value {
        let body = match self {
            Stage::Match(filter) => filter.clone(),
            Stage::Group { keys, accumulators } => {
                let mut id = Map::new();
                for key in keys {
                    id.insert(key.clone(), Value::String(format!("${}", key)));
                }
                let mut group = Map::new();
                group.insert("_id".to_string(), Value::Object(id));
                for acc in accumulators {
                    group.insert(acc.alias.clone(), json!({ acc.operator: acc.input }));
                }
                Value::Object(group)
            }
            Stage::Project(fields) => Value::Object(projection_document(fields)),
            Stage::AddFields(fields) => Value::Object(fields.iter().cloned().collect()),
            Stage::Unset(fields) if fields.len() == 1 => Value::String(fields[0].clone()),
            Stage::Unset(fields) => json!(fields),
            Stage::Sort(order) => Value::Object(sort_document(order)),
            Stage::Skip(n) | Stage::Limit(n) => json!(n),
            Stage::Lookup {
                from,
                local_field,
                foreign_field,
                alias,
            } => json!({
                "from": from,
                "localField": local_field,
                "foreignField": foreign_field,
                "as": alias,
            }),
            Stage::Unwind {
                path,
                preserve_null_and_empty,
            } => json!({
                "path": format!("${}", path),
                "preserveNullAndEmptyArrays": preserve_null_and_empty,
            }),
        };
        json!({ self.name(): body })
    }
}

impl Serialize for Stage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_document().serialize(serializer)
    }
}

/// `{field: 1|0|expr}`
pub fn projection_document(fields: &Projection) -> Map<String, Value> {
    fields
        .iter()
        .map(|(name, value)| (name.clone(), value.to_document()))
        .collect()
}

/// `{field: 1|-1}`
pub fn sort_document(order: &[OrderByField]) -> Map<String, Value> {
    order
        .iter()
        .map(|o| {
            let dir = match o.direction {
                SortDirection::Asc => 1,
                SortDirection::Desc => -1,
            };
            (o.field.clone(), json!(dir))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_document() {
        let stage = Stage::Group {
            keys: vec!["category".to_string()],
            accumulators: vec![Accumulator {
                alias: "n".to_string(),
                operator: "$sum",
                input: json!(1),
            }],
        };
        assert_eq!(
            stage.to_document(),
            json!({"$group": {"_id": {"category": "$category"}, "n": {"$sum": 1}}})
        );
    }

    #[test]
    fn test_lookup_and_unwind_documents() {
        let lookup = Stage::Lookup {
            from: "customers".to_string(),
            local_field: "customerId".to_string(),
            foreign_field: "_id".to_string(),
            alias: "customer".to_string(),
        };
        assert_eq!(
            lookup.to_document(),
            json!({"$lookup": {"from": "customers", "localField": "customerId", "foreignField": "_id", "as": "customer"}})
        );

        let unwind = Stage::Unwind {
            path: "customer".to_string(),
            preserve_null_and_empty: true,
        };
        assert_eq!(
            unwind.to_document(),
            json!({"$unwind": {"path": "$customer", "preserveNullAndEmptyArrays": true}})
        );
    }

    #[test]
    fn test_sort_and_unset_documents() {
        let sort = Stage::Sort(vec![OrderByField::desc("total"), OrderByField::asc("name")]);
        assert_eq!(sort.to_document(), json!({"$sort": {"total": -1, "name": 1}}));
        assert_eq!(
            Stage::Unset(vec!["__tmp_0".to_string()]).to_document(),
            json!({"$unset": "__tmp_0"})
        );
    }
}
