//! Relation references and expression traversal.
//!
//! The walkers here descend through queries, joins and expressions the same way
//! for every consumer; what differs is the callback. Subqueries are surfaced as
//! their own event so callers can open a nested scope instead of flattening.

use crate::types::common::ident_key;
use sqlparser::ast::*;
use std::collections::{BTreeSet, HashSet};

/// Something met while walking an expression tree.
pub(crate) enum ExprEvent<'a> {
    /// Any expression node, parents before children.
    Expr(&'a Expr),
    /// A query nested in an expression; not descended into.
    Subquery(&'a Query),
}

/// Walks `expr` and its children, stopping at subquery boundaries.
///
/// Lambda bodies are not entered: their parameters would read as columns.
pub(crate) fn walk_expr<'a, F: FnMut(ExprEvent<'a>)>(expr: &'a Expr, f: &mut F) {
    f(ExprEvent::Expr(expr));
    match expr {
        Expr::BinaryOp { left, right, .. }
        | Expr::AnyOp { left, right, .. }
        | Expr::AllOp { left, right, .. }
        | Expr::IsDistinctFrom(left, right)
        | Expr::IsNotDistinctFrom(left, right)
        | Expr::AtTimeZone {
            timestamp: left,
            time_zone: right,
        }
        | Expr::Position {
            expr: left,
            r#in: right,
        }
        | Expr::InUnnest {
            expr: left,
            array_expr: right,
            ..
        } => {
            walk_expr(left, f);
            walk_expr(right, f);
        }
        Expr::MemberOf(member) => {
            walk_expr(&member.value, f);
            walk_expr(&member.array, f);
        }
        Expr::UnaryOp { expr: inner, .. }
        | Expr::Nested(inner)
        | Expr::Cast { expr: inner, .. }
        | Expr::IsNull(inner)
        | Expr::IsNotNull(inner)
        | Expr::IsTrue(inner)
        | Expr::IsNotTrue(inner)
        | Expr::IsFalse(inner)
        | Expr::IsNotFalse(inner)
        | Expr::IsUnknown(inner)
        | Expr::IsNotUnknown(inner)
        | Expr::IsNormalized { expr: inner, .. }
        | Expr::Collate { expr: inner, .. }
        | Expr::Extract { expr: inner, .. }
        | Expr::Ceil { expr: inner, .. }
        | Expr::Floor { expr: inner, .. }
        | Expr::Named { expr: inner, .. }
        | Expr::Prefixed { value: inner, .. }
        | Expr::OuterJoin(inner)
        | Expr::Prior(inner) => walk_expr(inner, f),
        Expr::Interval(interval) => walk_expr(&interval.value, f),
        Expr::Convert { expr, styles, .. } => {
            walk_expr(expr, f);
            for style in styles {
                walk_expr(style, f);
            }
        }
        Expr::Like { expr, pattern, .. }
        | Expr::ILike { expr, pattern, .. }
        | Expr::SimilarTo { expr, pattern, .. }
        | Expr::RLike { expr, pattern, .. } => {
            walk_expr(expr, f);
            walk_expr(pattern, f);
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            walk_expr(expr, f);
            walk_expr(low, f);
            walk_expr(high, f);
        }
        Expr::Substring {
            expr,
            substring_from,
            substring_for,
            ..
        } => {
            walk_expr(expr, f);
            for part in [substring_from, substring_for].into_iter().flatten() {
                walk_expr(part, f);
            }
        }
        Expr::Trim {
            expr,
            trim_what,
            trim_characters,
            ..
        } => {
            walk_expr(expr, f);
            if let Some(what) = trim_what {
                walk_expr(what, f);
            }
            for character in trim_characters.iter().flatten() {
                walk_expr(character, f);
            }
        }
        Expr::Overlay {
            expr,
            overlay_what,
            overlay_from,
            overlay_for,
        } => {
            walk_expr(expr, f);
            walk_expr(overlay_what, f);
            walk_expr(overlay_from, f);
            if let Some(length) = overlay_for {
                walk_expr(length, f);
            }
        }
        Expr::InList { expr, list, .. } => {
            walk_expr(expr, f);
            for item in list {
                walk_expr(item, f);
            }
        }
        Expr::Tuple(items)
        | Expr::Struct { values: items, .. }
        | Expr::Array(Array { elem: items, .. }) => {
            for item in items {
                walk_expr(item, f);
            }
        }
        Expr::GroupingSets(sets) | Expr::Cube(sets) | Expr::Rollup(sets) => {
            for item in sets.iter().flatten() {
                walk_expr(item, f);
            }
        }
        Expr::Dictionary(fields) => {
            for field in fields {
                walk_expr(&field.value, f);
            }
        }
        Expr::Map(map) => {
            for entry in &map.entries {
                walk_expr(&entry.key, f);
                walk_expr(&entry.value, f);
            }
        }
        // Dotted field names in the chain are not column references.
        Expr::CompoundFieldAccess { root, access_chain } => {
            walk_expr(root, f);
            for access in access_chain {
                if let AccessExpr::Subscript(subscript) = access {
                    walk_subscript(subscript, f);
                }
            }
        }
        Expr::JsonAccess { value, path } => {
            walk_expr(value, f);
            for elem in &path.path {
                if let JsonPathElem::Bracket { key } = elem {
                    walk_expr(key, f);
                }
            }
        }
        Expr::Case {
            operand,
            conditions,
            else_result,
            ..
        } => {
            if let Some(op) = operand {
                walk_expr(op, f);
            }
            for case_when in conditions {
                walk_expr(&case_when.condition, f);
                walk_expr(&case_when.result, f);
            }
            if let Some(el) = else_result {
                walk_expr(el, f);
            }
        }
        Expr::Function(func) => walk_function(func, f),
        Expr::InSubquery {
            expr: inner,
            subquery,
            ..
        } => {
            walk_expr(inner, f);
            f(ExprEvent::Subquery(subquery));
        }
        Expr::Subquery(subquery) | Expr::Exists { subquery, .. } => {
            f(ExprEvent::Subquery(subquery));
        }
        _ => {}
    }
}

fn walk_subscript<'a, F: FnMut(ExprEvent<'a>)>(subscript: &'a Subscript, f: &mut F) {
    match subscript {
        Subscript::Index { index } => walk_expr(index, f),
        Subscript::Slice {
            lower_bound,
            upper_bound,
            stride,
        } => {
            for bound in [lower_bound, upper_bound, stride].into_iter().flatten() {
                walk_expr(bound, f);
            }
        }
    }
}

fn walk_function<'a, F: FnMut(ExprEvent<'a>)>(func: &'a Function, f: &mut F) {
    match &func.args {
        FunctionArguments::Subquery(query) => f(ExprEvent::Subquery(query)),
        FunctionArguments::List(arg_list) => {
            for arg in &arg_list.args {
                match arg {
                    FunctionArg::Unnamed(FunctionArgExpr::Expr(expr))
                    | FunctionArg::Named {
                        arg: FunctionArgExpr::Expr(expr),
                        ..
                    }
                    | FunctionArg::ExprNamed {
                        arg: FunctionArgExpr::Expr(expr),
                        ..
                    } => walk_expr(expr, f),
                    _ => {}
                }
            }
            for clause in &arg_list.clauses {
                if let FunctionArgumentClause::OrderBy(order_by_exprs) = clause {
                    for order_by_expr in order_by_exprs {
                        walk_expr(&order_by_expr.expr, f);
                    }
                }
            }
        }
        FunctionArguments::None => {}
    }

    for order_by_expr in &func.within_group {
        walk_expr(&order_by_expr.expr, f);
    }
    if let Some(filter) = &func.filter {
        walk_expr(filter, f);
    }
    if let Some(WindowType::WindowSpec(spec)) = &func.over {
        for expr in &spec.partition_by {
            walk_expr(expr, f);
        }
        for order_by_expr in &spec.order_by {
            walk_expr(&order_by_expr.expr, f);
        }
    }
}

/// The `ON` expression of a join, if it has one.
pub(crate) fn join_on_expr(op: &JoinOperator) -> Option<&Expr> {
    let constraint = match op {
        JoinOperator::Join(c)
        | JoinOperator::Inner(c)
        | JoinOperator::Left(c)
        | JoinOperator::LeftOuter(c)
        | JoinOperator::Right(c)
        | JoinOperator::RightOuter(c)
        | JoinOperator::FullOuter(c)
        | JoinOperator::CrossJoin(c)
        | JoinOperator::Semi(c)
        | JoinOperator::LeftSemi(c)
        | JoinOperator::RightSemi(c)
        | JoinOperator::Anti(c)
        | JoinOperator::LeftAnti(c)
        | JoinOperator::RightAnti(c)
        | JoinOperator::StraightJoin(c) => c,
        JoinOperator::AsOf { constraint, .. } => constraint,
        JoinOperator::CrossApply | JoinOperator::OuterApply => return None,
    };
    match constraint {
        JoinConstraint::On(expr) => Some(expr),
        _ => None,
    }
}

/// Lookup key for a relation name: normalized parts joined with `.`.
pub(crate) fn relation_key(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|part| match part.as_ident() {
            Some(ident) => ident_key(ident),
            None => part.to_string().to_lowercase(),
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Normalized names of every relation `query` reads from.
///
/// Covers FROM and JOIN positions at any nesting level, including subqueries
/// inside expressions. Names bound by a `WITH` clause inside `query` itself are
/// local and excluded.
pub fn referenced_relations(query: &Query) -> BTreeSet<String> {
    let mut collector = RelationCollector::default();
    collector.visit_query(query);
    collector.found
}

/// Relations read by a whole statement.
///
/// Queries are handled by [`referenced_relations`]; for INSERT, CREATE TABLE AS
/// and CREATE VIEW the source query is used.
pub fn statement_relations(statement: &Statement) -> BTreeSet<String> {
    match statement {
        Statement::Query(query) => referenced_relations(query),
        Statement::Insert(insert) => insert
            .source
            .as_deref()
            .map(referenced_relations)
            .unwrap_or_default(),
        Statement::CreateTable(create) => create
            .query
            .as_deref()
            .map(referenced_relations)
            .unwrap_or_default(),
        Statement::CreateView { query, .. } => referenced_relations(query),
        _ => BTreeSet::new(),
    }
}

#[derive(Default)]
struct RelationCollector {
    scopes: Vec<HashSet<String>>,
    found: BTreeSet<String>,
}

impl RelationCollector {
    fn is_local(&self, key: &str) -> bool {
        self.scopes.iter().any(|scope| scope.contains(key))
    }

    fn visit_query(&mut self, query: &Query) {
        let has_with = query.with.is_some();
        if let Some(with) = &query.with {
            let names = with
                .cte_tables
                .iter()
                .map(|cte| ident_key(&cte.alias.name))
                .collect();
            self.scopes.push(names);
            for cte in &with.cte_tables {
                self.visit_query(&cte.query);
            }
        }

        self.visit_set_expr(&query.body);

        if let Some(order_by) = &query.order_by {
            if let OrderByKind::Expressions(exprs) = &order_by.kind {
                for order_expr in exprs {
                    self.visit_expr(&order_expr.expr);
                }
            }
        }

        if has_with {
            self.scopes.pop();
        }
    }

    fn visit_set_expr(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => self.visit_select(select),
            SetExpr::Query(query) => self.visit_query(query),
            SetExpr::SetOperation { left, right, .. } => {
                self.visit_set_expr(left);
                self.visit_set_expr(right);
            }
            SetExpr::Values(values) => {
                for row in &values.rows {
                    for expr in row {
                        self.visit_expr(expr);
                    }
                }
            }
            _ => {}
        }
    }

    fn visit_select(&mut self, select: &Select) {
        for table_with_joins in &select.from {
            self.visit_table_with_joins(table_with_joins);
        }
        for item in &select.projection {
            if let SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } = item {
                self.visit_expr(expr);
            }
        }
        if let Some(selection) = &select.selection {
            self.visit_expr(selection);
        }
        if let GroupByExpr::Expressions(exprs, _) = &select.group_by {
            for expr in exprs {
                self.visit_expr(expr);
            }
        }
        if let Some(having) = &select.having {
            self.visit_expr(having);
        }
        if let Some(qualify) = &select.qualify {
            self.visit_expr(qualify);
        }
    }

    fn visit_table_with_joins(&mut self, table: &TableWithJoins) {
        self.visit_table_factor(&table.relation);
        for join in &table.joins {
            self.visit_table_factor(&join.relation);
            if let Some(on) = join_on_expr(&join.join_operator) {
                self.visit_expr(on);
            }
        }
    }

    fn visit_table_factor(&mut self, factor: &TableFactor) {
        match factor {
            TableFactor::Table { name, .. } => {
                let key = relation_key(name);
                if !self.is_local(&key) {
                    self.found.insert(key);
                }
            }
            TableFactor::Derived { subquery, .. } => self.visit_query(subquery),
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.visit_table_with_joins(table_with_joins),
            TableFactor::Pivot { table, .. }
            | TableFactor::Unpivot { table, .. }
            | TableFactor::MatchRecognize { table, .. } => self.visit_table_factor(table),
            _ => {}
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        let mut nested = Vec::new();
        walk_expr(expr, &mut |event| {
            if let ExprEvent::Subquery(query) = event {
                nested.push(query);
            }
        });
        for query in nested {
            self.visit_query(query);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_sql;
    use rstest::rstest;

    fn relations(sql: &str) -> Vec<String> {
        let statements = parse_sql(sql).unwrap();
        statement_relations(&statements[0]).into_iter().collect()
    }

    #[test]
    fn test_from_and_joins() {
        assert_eq!(
            relations("SELECT * FROM a JOIN b ON a.id = b.id LEFT JOIN s.c ON true"),
            vec!["a", "b", "s.c"]
        );
    }

    #[test]
    fn test_subqueries_in_expressions_and_from() {
        assert_eq!(
            relations(
                "SELECT (SELECT max(v) FROM m) AS mx FROM (SELECT * FROM inner_t) d \
                 WHERE EXISTS (SELECT 1 FROM e) AND id IN (SELECT id FROM f)"
            ),
            vec!["e", "f", "inner_t", "m"]
        );
    }

    #[rstest]
    #[case::any_op("SELECT id FROM t WHERE id = ANY(SELECT id FROM z)")]
    #[case::all_op("SELECT id FROM t WHERE id > ALL(SELECT id FROM z)")]
    #[case::substring("SELECT SUBSTRING((SELECT name FROM z) FROM 1 FOR 2) AS s FROM t")]
    #[case::trim("SELECT TRIM((SELECT name FROM z)) AS s FROM t")]
    #[case::position("SELECT POSITION('a' IN (SELECT name FROM z)) AS p FROM t")]
    #[case::at_time_zone("SELECT (SELECT ts FROM z) AT TIME ZONE 'UTC' AS ts FROM t")]
    #[case::in_unnest("SELECT id FROM t WHERE id IN UNNEST((SELECT ids FROM z))")]
    #[case::similar_to("SELECT id FROM t WHERE name SIMILAR TO (SELECT pattern FROM z)")]
    #[case::array("SELECT ARRAY[(SELECT id FROM z)] AS a FROM t")]
    #[case::ceil("SELECT CEIL((SELECT amount FROM z)) AS c FROM t")]
    #[case::overlay("SELECT OVERLAY(name PLACING (SELECT name FROM z) FROM 1) AS o FROM t")]
    #[case::is_not_true("SELECT id FROM t WHERE (id IN (SELECT id FROM z)) IS NOT TRUE")]
    fn test_subqueries_under_expression_forms(#[case] sql: &str) {
        assert_eq!(relations(sql), vec!["t", "z"]);
    }

    #[test]
    fn test_local_cte_names_are_excluded() {
        assert_eq!(
            relations("WITH x AS (SELECT * FROM base) SELECT * FROM x JOIN y ON true"),
            vec!["base", "y"]
        );
    }

    #[test]
    fn test_set_operations_and_case_folding() {
        assert_eq!(
            relations("SELECT id FROM Users UNION ALL SELECT id FROM \"Admins\""),
            vec!["Admins", "users"]
        );
    }

    #[test]
    fn test_insert_select_uses_source() {
        assert_eq!(
            relations("INSERT INTO archive SELECT * FROM events"),
            vec!["events"]
        );
    }
}
