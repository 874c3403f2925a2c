//! Parameterized query model over a single shard.
//!
//! A `ShardQuery` keeps structure and values apart. The structure (source
//! shard, columns, grouping, ordering, constant regexes) is fixed when the
//! query is built. Caller values only enter through [`ShardQuery::bind`],
//! which turns them into typed literals of a scan expression. Rendering the
//! query as SQL text never involves caller values.

use std::collections::BTreeSet;
use std::fmt::{self, Write as _};

use catasto_shard_io::{ComparisonOp, Expression, ScanRequest};
use catasto_tabular::ScalarValue;
use regex::Regex;

use crate::error::{LookupError, Result};
use crate::shard::ShardFile;

/// Positional parameter slot, rendered `$n` (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Param(usize);

impl Param {
    pub const fn new(slot: usize) -> Self {
        Self(slot)
    }

    pub fn slot(&self) -> usize {
        self.0
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

/// One item of the SELECT list.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// A stored column, output under its own name.
    Column(String),
    /// `column / divisor AS alias`, always a DOUBLE.
    Scaled {
        column: String,
        divisor: f64,
        alias: String,
    },
    /// `COUNT(*) AS alias`, only in grouped queries.
    CountStar { alias: String },
}

impl SelectItem {
    pub fn column(name: impl Into<String>) -> Self {
        Self::Column(name.into())
    }

    pub fn scaled(column: impl Into<String>, divisor: f64, alias: impl Into<String>) -> Self {
        Self::Scaled {
            column: column.into(),
            divisor,
            alias: alias.into(),
        }
    }

    pub fn count_star(alias: impl Into<String>) -> Self {
        Self::CountStar {
            alias: alias.into(),
        }
    }

    /// Name of the result column this item produces.
    pub fn output_name(&self) -> &str {
        match self {
            Self::Column(name) => name,
            Self::Scaled { alias, .. } | Self::CountStar { alias } => alias,
        }
    }

    fn source_column(&self) -> Option<&str> {
        match self {
            Self::Column(name) => Some(name),
            Self::Scaled { column, .. } => Some(column),
            Self::CountStar { .. } => None,
        }
    }
}

impl fmt::Display for SelectItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column(name) => f.write_str(name),
            Self::Scaled {
                column,
                divisor,
                alias,
            } => write!(f, "{} / {:?} AS {}", column, divisor, alias),
            Self::CountStar { alias } => write!(f, "COUNT(*) AS {}", alias),
        }
    }
}

/// WHERE clause. Leaves compare against parameter slots or constant regexes.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryFilter {
    Compare {
        column: String,
        op: ComparisonOp,
        param: Param,
    },
    /// `regexp_matches(column, pattern)`. The pattern is part of the program,
    /// never caller input.
    Matches {
        column: String,
        pattern: &'static str,
    },
    And(Vec<QueryFilter>),
}

impl QueryFilter {
    pub fn eq(column: impl Into<String>, param: Param) -> Self {
        Self::Compare {
            column: column.into(),
            op: ComparisonOp::Eq,
            param,
        }
    }

    pub fn matches(column: impl Into<String>, pattern: &'static str) -> Self {
        Self::Matches {
            column: column.into(),
            pattern,
        }
    }

    fn and_with(self, other: QueryFilter) -> Self {
        match (self, other) {
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), right) => {
                left.push(right);
                Self::And(left)
            }
            (left, Self::And(mut right)) => {
                right.insert(0, left);
                Self::And(right)
            }
            (left, right) => Self::And(vec![left, right]),
        }
    }

    fn collect_params(&self, params: &mut BTreeSet<Param>) {
        match self {
            Self::Compare { param, .. } => {
                params.insert(*param);
            }
            Self::Matches { .. } => {}
            Self::And(children) => children.iter().for_each(|c| c.collect_params(params)),
        }
    }

    fn collect_patterns(&self, patterns: &mut Vec<&'static str>) {
        match self {
            Self::Compare { .. } => {}
            Self::Matches { pattern, .. } => patterns.push(*pattern),
            Self::And(children) => children.iter().for_each(|c| c.collect_patterns(patterns)),
        }
    }

    /// Substitute bound values, producing the scan predicate.
    fn to_expression(&self, params: &[ScalarValue]) -> Result<Expression> {
        match self {
            Self::Compare { column, op, param } => {
                let value = param
                    .slot()
                    .checked_sub(1)
                    .and_then(|i| params.get(i))
                    .ok_or_else(|| LookupError::query(format!("parameter {} is not bound", param)))?;
                Ok(Expression::Comparison {
                    column: column.clone(),
                    op: *op,
                    value: value.clone(),
                })
            }
            Self::Matches { column, pattern } => {
                let regex = Regex::new(pattern).map_err(|e| {
                    LookupError::query(format!("invalid pattern '{}': {}", pattern, e))
                })?;
                Ok(Expression::matches(column.clone(), regex))
            }
            Self::And(children) => Ok(Expression::and(
                children
                    .iter()
                    .map(|c| c.to_expression(params))
                    .collect::<Result<Vec<_>>>()?,
            )),
        }
    }
}

impl fmt::Display for QueryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compare { column, op, param } => write!(f, "{} {} {}", column, op, param),
            Self::Matches { column, pattern } => {
                write!(f, "regexp_matches({}, {})", column, sql_string(pattern))
            }
            Self::And(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" AND ")?;
                    }
                    match child {
                        Self::And(_) => write!(f, "({})", child)?,
                        _ => write!(f, "{}", child)?,
                    }
                }
                Ok(())
            }
        }
    }
}

/// GROUP BY keys with an optional `HAVING COUNT(*) > n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupBy {
    pub keys: Vec<String>,
    pub having_count_gt: Option<u64>,
}

/// ORDER BY key over an output column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Fixed(usize),
    Param(Param),
}

/// A validated query against one shard.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardQuery {
    source: ShardFile,
    select: Vec<SelectItem>,
    filter: Option<QueryFilter>,
    group_by: Option<GroupBy>,
    order_by: Vec<OrderBy>,
    limit: Option<Limit>,
    param_count: usize,
}

impl ShardQuery {
    pub fn builder(source: ShardFile) -> ShardQueryBuilder {
        ShardQueryBuilder {
            source,
            select: Vec::new(),
            filter: None,
            group_by: None,
            having_count_gt: None,
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn source(&self) -> &ShardFile {
        &self.source
    }

    pub fn select(&self) -> &[SelectItem] {
        &self.select
    }

    pub fn filter(&self) -> Option<&QueryFilter> {
        self.filter.as_ref()
    }

    pub fn group_by(&self) -> Option<&GroupBy> {
        self.group_by.as_ref()
    }

    pub fn order_by(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn limit(&self) -> Option<Limit> {
        self.limit
    }

    /// Number of parameters `bind` expects.
    pub fn param_count(&self) -> usize {
        self.param_count
    }

    /// Result column names, in SELECT order.
    pub fn output_columns(&self) -> Vec<String> {
        self.select
            .iter()
            .map(|item| item.output_name().to_string())
            .collect()
    }

    /// Stored columns the SELECT list and grouping read, deduplicated.
    fn source_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        let group_keys = self.group_by.iter().flat_map(|g| g.keys.iter().map(String::as_str));
        for name in self
            .select
            .iter()
            .filter_map(SelectItem::source_column)
            .chain(group_keys)
        {
            if !columns.iter().any(|c| c == name) {
                columns.push(name.to_string());
            }
        }
        columns
    }

    /// Render DuckDB-compatible SQL for logs and diagnostics.
    ///
    /// The source renders as a quoted path literal under `base_url`; filter
    /// values appear only as `$n` placeholders.
    pub fn to_sql(&self, base_url: &str) -> String {
        let mut sql = String::from("SELECT ");
        let items: Vec<String> = self.select.iter().map(|item| item.to_string()).collect();
        sql.push_str(&items.join(", "));

        let _ = write!(
            sql,
            " FROM {}",
            sql_string(&format!("{}{}", base_url, self.source))
        );
        if let Some(filter) = &self.filter {
            let _ = write!(sql, " WHERE {}", filter);
        }
        if let Some(group) = &self.group_by {
            let _ = write!(sql, " GROUP BY {}", group.keys.join(", "));
            if let Some(n) = group.having_count_gt {
                let _ = write!(sql, " HAVING COUNT(*) > {}", n);
            }
        }
        if !self.order_by.is_empty() {
            let keys: Vec<String> = self
                .order_by
                .iter()
                .map(|key| {
                    if key.descending {
                        format!("{} DESC", key.column)
                    } else {
                        key.column.clone()
                    }
                })
                .collect();
            let _ = write!(sql, " ORDER BY {}", keys.join(", "));
        }
        match self.limit {
            Some(Limit::Fixed(n)) => {
                let _ = write!(sql, " LIMIT {}", n);
            }
            Some(Limit::Param(param)) => {
                let _ = write!(sql, " LIMIT {}", param);
            }
            None => {}
        }
        sql
    }

    /// Bind positional parameters (`params[0]` is `$1`).
    pub fn bind(&self, params: Vec<ScalarValue>) -> Result<BoundQuery<'_>> {
        if params.len() != self.param_count {
            return Err(LookupError::query(format!(
                "query expects {} parameters, got {}",
                self.param_count,
                params.len()
            )));
        }

        let filter = match &self.filter {
            Some(filter) => filter.to_expression(&params)?,
            None => Expression::AlwaysTrue,
        };

        let limit = match self.limit {
            Some(Limit::Fixed(n)) => Some(n),
            Some(Limit::Param(param)) => {
                let value = &params[param.slot() - 1];
                match value.as_i64() {
                    Some(n) if n >= 0 => Some(n as usize),
                    _ => {
                        return Err(LookupError::query(format!(
                            "LIMIT must be a non-negative integer, got {}",
                            value
                        )))
                    }
                }
            }
            None => None,
        };

        let mut scan = ScanRequest::new(self.source_columns()).with_filter(filter);
        // Without grouping or ordering the first rows are the answer.
        if self.group_by.is_none() && self.order_by.is_empty() {
            if let Some(n) = limit {
                scan = scan.with_limit(n);
            }
        }

        Ok(BoundQuery {
            query: self,
            scan,
            limit,
        })
    }
}

/// A query with its parameters substituted, ready to execute.
#[derive(Debug, Clone)]
pub struct BoundQuery<'q> {
    pub query: &'q ShardQuery,
    /// Scan of the source shard, with bound values as typed literals.
    pub scan: ScanRequest,
    pub limit: Option<usize>,
}

/// Builder for [`ShardQuery`].
#[derive(Debug, Clone)]
pub struct ShardQueryBuilder {
    source: ShardFile,
    select: Vec<SelectItem>,
    filter: Option<QueryFilter>,
    group_by: Option<Vec<String>>,
    having_count_gt: Option<u64>,
    order_by: Vec<OrderBy>,
    limit: Option<Limit>,
}

impl ShardQueryBuilder {
    pub fn select(mut self, item: SelectItem) -> Self {
        self.select.push(item);
        self
    }

    pub fn select_column(self, name: impl Into<String>) -> Self {
        self.select(SelectItem::column(name))
    }

    /// Add a filter, ANDed with any filter already present.
    pub fn filter(mut self, filter: QueryFilter) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and_with(filter),
            None => filter,
        });
        self
    }

    pub fn group_by<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn having_count_gt(mut self, n: u64) -> Self {
        self.having_count_gt = Some(n);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            descending: false,
        });
        self
    }

    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            descending: true,
        });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(Limit::Fixed(n));
        self
    }

    pub fn limit_param(mut self, param: Param) -> Self {
        self.limit = Some(Limit::Param(param));
        self
    }

    /// Validate and build the query.
    pub fn build(self) -> Result<ShardQuery> {
        if self.select.is_empty() {
            return Err(LookupError::query("SELECT list is empty"));
        }

        let group_by = match self.group_by {
            Some(keys) => {
                if keys.is_empty() {
                    return Err(LookupError::query("GROUP BY needs at least one key"));
                }
                for item in &self.select {
                    match item {
                        SelectItem::Column(name) if keys.contains(name) => {}
                        SelectItem::CountStar { .. } => {}
                        other => {
                            return Err(LookupError::query(format!(
                                "'{}' is neither a group key nor an aggregate",
                                other
                            )))
                        }
                    }
                }
                Some(GroupBy {
                    keys,
                    having_count_gt: self.having_count_gt,
                })
            }
            None => {
                if self.having_count_gt.is_some() {
                    return Err(LookupError::query("HAVING requires GROUP BY"));
                }
                if let Some(item) = self
                    .select
                    .iter()
                    .find(|item| matches!(item, SelectItem::CountStar { .. }))
                {
                    return Err(LookupError::query(format!(
                        "'{}' requires GROUP BY",
                        item
                    )));
                }
                None
            }
        };

        for item in &self.select {
            if let SelectItem::Scaled { divisor, .. } = item {
                if *divisor == 0.0 || !divisor.is_finite() {
                    return Err(LookupError::query(format!("invalid divisor in '{}'", item)));
                }
            }
        }

        for key in &self.order_by {
            if !self.select.iter().any(|item| item.output_name() == key.column) {
                return Err(LookupError::query(format!(
                    "ORDER BY column '{}' is not in the SELECT list",
                    key.column
                )));
            }
        }

        let mut params = BTreeSet::new();
        if let Some(filter) = &self.filter {
            filter.collect_params(&mut params);
            let mut patterns = Vec::new();
            filter.collect_patterns(&mut patterns);
            for pattern in patterns {
                Regex::new(pattern).map_err(|e| {
                    LookupError::query(format!("invalid pattern '{}': {}", pattern, e))
                })?;
            }
        }
        if let Some(Limit::Param(param)) = self.limit {
            params.insert(param);
        }
        // Slots must be exactly $1..$n.
        for (expected, param) in (1..).zip(&params) {
            if param.slot() != expected {
                return Err(LookupError::query(format!(
                    "parameter slots must be contiguous from $1, found {}",
                    param
                )));
            }
        }

        Ok(ShardQuery {
            source: self.source,
            select: self.select,
            filter: self.filter,
            group_by,
            order_by: self.order_by,
            limit: self.limit,
            param_count: params.len(),
        })
    }
}

/// Single-quoted SQL string literal.
fn sql_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://example.org/anagrafica/";

    fn lazio() -> ShardFile {
        ShardFile::from_catalog("lazio.parquet").unwrap()
    }

    fn duplicates_query() -> ShardQuery {
        ShardQuery::builder(lazio())
            .select_column("foglio")
            .select_column("particella")
            .select(SelectItem::count_star("n"))
            .filter(QueryFilter::eq("comune", Param::new(1)))
            .group_by(["foglio", "particella"])
            .having_count_gt(1)
            .order_by_desc("n")
            .order_by("foglio")
            .order_by("particella")
            .limit_param(Param::new(2))
            .build()
            .unwrap()
    }

    #[test]
    fn test_render_parcel_lookup() {
        let query = ShardQuery::builder(lazio())
            .select_column("INSPIREID_LOCALID")
            .select(SelectItem::scaled("x", 1_000_000.0, "lon"))
            .filter(QueryFilter::eq("comune", Param::new(1)))
            .filter(QueryFilter::eq("foglio", Param::new(2)))
            .limit(1)
            .build()
            .unwrap();

        assert_eq!(
            query.to_sql(BASE),
            "SELECT INSPIREID_LOCALID, x / 1000000.0 AS lon \
             FROM 'https://example.org/anagrafica/lazio.parquet' \
             WHERE comune = $1 AND foglio = $2 LIMIT 1"
        );
        assert_eq!(query.param_count(), 2);
    }

    #[test]
    fn test_render_grouped_query() {
        let query = duplicates_query();
        assert_eq!(
            query.to_sql(BASE),
            "SELECT foglio, particella, COUNT(*) AS n \
             FROM 'https://example.org/anagrafica/lazio.parquet' \
             WHERE comune = $1 GROUP BY foglio, particella HAVING COUNT(*) > 1 \
             ORDER BY n DESC, foglio, particella LIMIT $2"
        );
    }

    #[test]
    fn test_bound_values_never_reach_sql() {
        let query = duplicates_query();
        let hostile = "H501' OR '1'='1";
        let bound = query
            .bind(vec![ScalarValue::text(hostile), ScalarValue::Int(10)])
            .unwrap();

        assert!(!query.to_sql(BASE).contains(hostile));
        assert_eq!(bound.limit, Some(10));
        match &bound.scan.filter {
            Expression::Comparison { column, value, .. } => {
                assert_eq!(column, "comune");
                assert_eq!(value, &ScalarValue::text(hostile));
            }
            other => panic!("unexpected filter {}", other),
        }
        // Grouped queries read everything before limiting.
        assert_eq!(bound.scan.limit, None);
        assert_eq!(bound.scan.columns, vec!["foglio", "particella"]);
    }

    #[test]
    fn test_bind_checks_parameters() {
        let query = duplicates_query();
        assert!(matches!(
            query.bind(vec![ScalarValue::text("H501")]),
            Err(LookupError::Query(_))
        ));
        assert!(matches!(
            query.bind(vec![ScalarValue::text("H501"), ScalarValue::Int(-1)]),
            Err(LookupError::Query(_))
        ));
        assert!(matches!(
            query.bind(vec![ScalarValue::text("H501"), ScalarValue::text("10")]),
            Err(LookupError::Query(_))
        ));
    }

    #[test]
    fn test_ungrouped_limit_is_pushed_into_scan() {
        let query = ShardQuery::builder(lazio())
            .select_column("particella")
            .filter(QueryFilter::eq("comune", Param::new(1)))
            .filter(QueryFilter::matches("particella", "^[0-9]+$"))
            .limit(1)
            .build()
            .unwrap();
        let bound = query.bind(vec![ScalarValue::text("H501")]).unwrap();
        assert_eq!(bound.scan.limit, Some(1));
        assert!(query
            .to_sql(BASE)
            .contains("WHERE comune = $1 AND regexp_matches(particella, '^[0-9]+$')"));
    }

    #[test]
    fn test_build_rejects_malformed_queries() {
        let err = |builder: ShardQueryBuilder| builder.build().unwrap_err();

        assert!(matches!(err(ShardQuery::builder(lazio())), LookupError::Query(_)));
        err(ShardQuery::builder(lazio())
            .select_column("foglio")
            .select(SelectItem::count_star("n")));
        err(ShardQuery::builder(lazio())
            .select_column("comune")
            .group_by(["foglio"]));
        err(ShardQuery::builder(lazio())
            .select_column("foglio")
            .having_count_gt(1));
        err(ShardQuery::builder(lazio())
            .select_column("foglio")
            .order_by("n"));
        err(ShardQuery::builder(lazio())
            .select_column("foglio")
            .filter(QueryFilter::eq("comune", Param::new(2))));
        err(ShardQuery::builder(lazio())
            .select(SelectItem::scaled("x", 0.0, "lon")));
        err(ShardQuery::builder(lazio())
            .select_column("foglio")
            .filter(QueryFilter::matches("foglio", "([")));
    }
}
