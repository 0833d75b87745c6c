//! # Pipeline Compiler
//!
//! Turns a query description into a [`CompiledPlan`]: either a single
//! direct find, or an ordered aggregation sequence when a join, search,
//! grouping, or compute clause is requested.
//!
//! Pipeline stage order:
//!
//! ```text
//! match(filter) → match(search) → group → project(keys) → compute…
//!   → sort → skip → limit → (lookup [→ unwind])… → project(select)
//! ```
//!
//! Joins run after paging so only the returned page is enriched.

use serde_json::{json, Map, Value};
use tracing::warn;

use super::catalogue::ComputeLowering;
use super::paging::{effective_limit, effective_skip};
use super::stage::{projection_document, sort_document, Accumulator, Projection, ProjectionValue, Stage};
use crate::config::ExecutionConfig;
use crate::config::IDENTITY_FIELD;
use crate::errors::ODataResult;
use crate::filter::{FilterCompiler, FilterGrammar};
use crate::observability::Event;
use crate::query::{AggregateOp, ApplyClause, OrderByField, QueryDescription};

/// Options for a direct find
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub projection: Option<Projection>,
    pub sort: Vec<OrderByField>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
}

/// The two compiled forms
#[derive(Debug, Clone, PartialEq)]
pub enum PlanForm {
    /// Single query: filter + projection + sort + limit + skip
    Direct(FindOptions),
    /// Ordered aggregation sequence
    Pipeline(Vec<Stage>),
}

/// Plan for one request. Built, executed once, then dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPlan {
    /// Predicate for the direct form
    pub filter: Value,
    /// Predicate for the separate count query
    pub count_filter: Value,
    pub form: PlanForm,
}

impl CompiledPlan {
    pub fn is_pipeline(&self) -> bool {
        matches!(self.form, PlanForm::Pipeline(_))
    }

    pub fn stages(&self) -> Option<&[Stage]> {
        match &self.form {
            PlanForm::Pipeline(stages) => Some(stages),
            PlanForm::Direct(_) => None,
        }
    }

    /// JSON rendering for `explain`
    pub fn to_document(&self) -> Value {
        match &self.form {
            PlanForm::Direct(options) => {
                let mut doc = Map::new();
                doc.insert("form".to_string(), json!("direct"));
                doc.insert("filter".to_string(), self.filter.clone());
                if let Some(projection) = &options.projection {
                    doc.insert("projection".to_string(), Value::Object(projection_document(projection)));
                }
                if !options.sort.is_empty() {
                    doc.insert("sort".to_string(), Value::Object(sort_document(&options.sort)));
                }
                if let Some(limit) = options.limit {
                    doc.insert("limit".to_string(), json!(limit));
                }
                if let Some(skip) = options.skip {
                    doc.insert("skip".to_string(), json!(skip));
                }
                doc.insert("countFilter".to_string(), self.count_filter.clone());
                Value::Object(doc)
            }
            PlanForm::Pipeline(stages) => json!({
                "form": "pipeline",
                "pipeline": stages,
                "countFilter": self.count_filter,
            }),
        }
    }
}

/// Compiles query descriptions for one execution config
pub struct PipelineCompiler<'a> {
    grammar: &'a dyn FilterGrammar,
    config: &'a ExecutionConfig,
    aggregate_supported: bool,
}

impl<'a> PipelineCompiler<'a> {
    pub fn new(grammar: &'a dyn FilterGrammar, config: &'a ExecutionConfig) -> Self {
        Self {
            grammar,
            config,
            aggregate_supported: true,
        }
    }

    /// Whether the target collection can run aggregation sequences
    pub fn with_aggregate_support(mut self, supported: bool) -> Self {
        self.aggregate_supported = supported;
        self
    }

    /// Compile a query description. Fails only on filter compilation.
    pub fn compile(&self, query: &QueryDescription) -> ODataResult<CompiledPlan> {
        let filter = FilterCompiler::new(self.grammar, self.config).compile(query.filter.as_ref())?;

        let search = self.search_clause(query);
        let count_filter = match &search {
            Some(clause) => and_predicates(&filter, clause),
            None => filter.clone(),
        };

        let options = FindOptions {
            projection: build_projection(&query.select),
            sort: query.order_by.clone(),
            limit: effective_limit(query.top, &self.config.limits),
            skip: effective_skip(query.skip),
        };

        let wants_pipeline = !query.expand.is_empty()
            || search.is_some()
            || query.usable_apply().is_some()
            || !query.compute.is_empty();

        if !wants_pipeline {
            return Ok(CompiledPlan {
                filter,
                count_filter,
                form: PlanForm::Direct(options),
            });
        }

        if !self.aggregate_supported {
            warn!(
                event = %Event::AggregateFallback,
                expand = query.expand.len(),
                compute = query.compute.len(),
                apply = query.usable_apply().is_some(),
                "collection cannot aggregate; running direct query"
            );
            return Ok(CompiledPlan {
                filter: count_filter.clone(),
                count_filter,
                form: PlanForm::Direct(options),
            });
        }

        let stages = self.build_pipeline(query, &filter, search, options);
        Ok(CompiledPlan {
            filter,
            count_filter,
            form: PlanForm::Pipeline(stages),
        })
    }

    fn build_pipeline(
        &self,
        query: &QueryDescription,
        filter: &Value,
        search: Option<Value>,
        options: FindOptions,
    ) -> Vec<Stage> {
        let mut stages = Vec::new();

        if !is_empty_predicate(filter) {
            stages.push(Stage::Match(filter.clone()));
        }
        if let Some(clause) = search {
            stages.push(Stage::Match(clause));
        }

        if let Some(apply) = query.usable_apply() {
            stages.extend(group_stages(apply));
        }

        let mut lowering = ComputeLowering::new();
        for clause in &query.compute {
            stages.extend(lowering.lower_clause(clause));
        }

        if !options.sort.is_empty() {
            stages.push(Stage::Sort(options.sort));
        }
        if let Some(skip) = options.skip {
            stages.push(Stage::Skip(skip));
        }
        if let Some(limit) = options.limit {
            stages.push(Stage::Limit(limit));
        }

        for request in &query.expand {
            let Some(join) = self.config.expand_map.get(&request.path) else {
                continue;
            };
            let alias = join.output_field().to_string();
            stages.push(Stage::Lookup {
                from: join.from.clone(),
                local_field: join.local_field.clone(),
                foreign_field: join.foreign_field.clone(),
                alias: alias.clone(),
            });
            if join.single {
                stages.push(Stage::Unwind {
                    path: alias,
                    preserve_null_and_empty: true,
                });
            }
        }

        if let Some(projection) = options.projection {
            stages.push(Stage::Project(projection));
        }

        stages
    }

    /// Case-insensitive OR across the configured search fields
    fn search_clause(&self, query: &QueryDescription) -> Option<Value> {
        let term = query.search.as_deref().filter(|t| !t.is_empty())?;
        let fields = &self.config.search.fields;
        if fields.is_empty() {
            return None;
        }

        let pattern = regex::escape(term);
        let ors: Vec<Value> = fields
            .iter()
            .map(|field| json!({ field.as_str(): { "$regex": pattern, "$options": "i" } }))
            .collect();
        Some(json!({ "$or": ors }))
    }
}

/// `$select` projection; the identity field is excluded unless selected
pub fn build_projection(select: &[String]) -> Option<Projection> {
    if select.is_empty() {
        return None;
    }
    let mut projection: Projection = select
        .iter()
        .map(|field| (field.clone(), ProjectionValue::Include))
        .collect();
    if !select.iter().any(|f| f == IDENTITY_FIELD) {
        projection.push((IDENTITY_FIELD.to_string(), ProjectionValue::Exclude));
    }
    Some(projection)
}

fn group_stages(apply: &ApplyClause) -> [Stage; 2] {
    let accumulators = apply
        .aggregates
        .iter()
        .map(|agg| {
            let (operator, input) = match agg.op {
                AggregateOp::Sum => ("$sum", json!(format!("${}", agg.source))),
                AggregateOp::Avg => ("$avg", json!(format!("${}", agg.source))),
                AggregateOp::Min => ("$min", json!(format!("${}", agg.source))),
                AggregateOp::Max => ("$max", json!(format!("${}", agg.source))),
                AggregateOp::Count => ("$sum", json!(1)),
            };
            Accumulator {
                alias: agg.alias.clone(),
                operator,
                input,
            }
        })
        .collect();

    let mut flatten: Projection = apply
        .group_by
        .iter()
        .map(|key| (key.clone(), ProjectionValue::Expr(json!(format!("$_id.{}", key)))))
        .collect();
    flatten.extend(
        apply
            .aggregates
            .iter()
            .map(|agg| (agg.alias.clone(), ProjectionValue::Include)),
    );
    flatten.push((IDENTITY_FIELD.to_string(), ProjectionValue::Exclude));

    [
        Stage::Group {
            keys: apply.group_by.clone(),
            accumulators,
        },
        Stage::Project(flatten),
    ]
}

fn is_empty_predicate(filter: &Value) -> bool {
    matches!(filter, Value::Object(map) if map.is_empty())
}

fn and_predicates(left: &Value, right: &Value) -> Value {
    if is_empty_predicate(left) {
        right.clone()
    } else {
        json!({ "$and": [left, right] })
    }
}
