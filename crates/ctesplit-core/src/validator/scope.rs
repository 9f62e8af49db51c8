//! Column resolution over nested query scopes.

use crate::parser::projection::expr_output_name;
use crate::parser::references::{join_on_expr, relation_key, walk_expr, ExprEvent};
use crate::types::common::ident_key;
use crate::types::normalize_name;
use sqlparser::ast::*;
use std::collections::{HashMap, HashSet};

/// Output columns of a relation; `None` when they are not known.
pub(crate) type Columns = Option<Vec<String>>;

/// Relations visible to a unit before its own body is read, keyed by
/// normalized relation name.
#[derive(Debug, Clone, Default)]
pub(crate) struct Catalog {
    relations: HashMap<String, Columns>,
}

impl Catalog {
    pub(crate) fn insert(&mut self, key: String, columns: Columns) {
        self.relations.insert(key, columns);
    }

    /// `None` both for unknown relations and relations with unknown columns.
    fn columns(&self, key: &str) -> Columns {
        self.relations.get(key).cloned().flatten()
    }
}

/// A relation in a FROM clause, as the select sees it.
#[derive(Debug)]
struct Source {
    /// Alias or table name key; empty for anonymous sources.
    binding: String,
    columns: Columns,
}

impl Source {
    fn has_column(&self, name: &str) -> Option<bool> {
        self.columns
            .as_ref()
            .map(|columns| columns.iter().any(|c| c.eq_ignore_ascii_case(name)))
    }
}

#[derive(Debug, Default)]
struct Scope {
    sources: Vec<Source>,
    /// Columns merged by `USING` or `NATURAL` joins; never ambiguous.
    merged: HashSet<String>,
    /// Select-list aliases, when the clause being checked may use them.
    aliases: Option<HashSet<String>>,
    /// Holds a source whose binding or columns cannot be known.
    opaque: bool,
}

enum Lookup {
    Found,
    Ambiguous,
    Missing,
}

/// Walks one query, recording references that resolve nowhere.
pub(crate) struct Checker<'c> {
    catalog: &'c Catalog,
    ctes: Vec<HashMap<String, Columns>>,
    scopes: Vec<Scope>,
    unresolved: Vec<String>,
    ambiguous: Vec<String>,
}

impl<'c> Checker<'c> {
    pub(crate) fn new(catalog: &'c Catalog) -> Self {
        Self {
            catalog,
            ctes: Vec::new(),
            scopes: Vec::new(),
            unresolved: Vec::new(),
            ambiguous: Vec::new(),
        }
    }

    /// Column references that matched no source, in first-seen order.
    pub(crate) fn unresolved(&self) -> &[String] {
        &self.unresolved
    }

    /// Unqualified references matching more than one source.
    pub(crate) fn ambiguous(&self) -> &[String] {
        &self.ambiguous
    }

    fn record(list: &mut Vec<String>, name: String) {
        if !list.contains(&name) {
            list.push(name);
        }
    }

    pub(crate) fn check_query(&mut self, query: &Query) -> Columns {
        if let Some(with) = &query.with {
            self.ctes.push(HashMap::new());
            for cte in &with.cte_tables {
                let key = ident_key(&cte.alias.name);
                let declared = declared_columns(&cte.alias.columns);
                if with.recursive {
                    if let Some(frame) = self.ctes.last_mut() {
                        frame.insert(key.clone(), declared.clone());
                    }
                }
                let produced = self.check_query(&cte.query);
                if let Some(frame) = self.ctes.last_mut() {
                    frame.insert(key, declared.or(produced));
                }
            }
        }

        let output = self.check_set_expr(&query.body, query.order_by.as_ref());

        if query.with.is_some() {
            self.ctes.pop();
        }
        output
    }

    fn check_set_expr(&mut self, body: &SetExpr, order_by: Option<&OrderBy>) -> Columns {
        match body {
            SetExpr::Select(select) => self.check_select(select, order_by),
            SetExpr::Query(query) => self.check_query(query),
            SetExpr::SetOperation { left, right, .. } => {
                let output = self.check_set_expr(left, None);
                self.check_set_expr(right, None);
                if let Some(OrderByKind::Expressions(exprs)) = order_by.map(|o| &o.kind) {
                    // ORDER BY after a set operation sees the leftmost branch's columns.
                    self.scopes.push(Scope {
                        sources: vec![Source {
                            binding: String::new(),
                            columns: output.clone(),
                        }],
                        ..Scope::default()
                    });
                    for order_expr in exprs {
                        self.check_expr(&order_expr.expr);
                    }
                    self.scopes.pop();
                }
                output
            }
            SetExpr::Values(values) => {
                for row in &values.rows {
                    for expr in row {
                        self.check_expr(expr);
                    }
                }
                let width = values.rows.first().map_or(0, Vec::len);
                Some((1..=width).map(|i| format!("column{i}")).collect())
            }
            _ => None,
        }
    }

    fn check_select(&mut self, select: &Select, order_by: Option<&OrderBy>) -> Columns {
        let mut scope = Scope::default();
        let mut on_exprs = Vec::new();
        for table in &select.from {
            self.add_table_with_joins(table, &mut scope, &mut on_exprs);
        }
        self.scopes.push(scope);

        for expr in on_exprs {
            self.check_expr(expr);
        }

        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                    self.check_expr(expr);
                }
                SelectItem::QualifiedWildcard(SelectItemQualifiedWildcardKind::ObjectName(name), _) => {
                    let qualifier = qualifier_key(name);
                    if self.find_binding(&qualifier).is_none() && !self.any_opaque() {
                        Self::record(&mut self.unresolved, format!("{name}.*"));
                    }
                }
                _ => {}
            }
        }

        if let Some(selection) = &select.selection {
            self.check_expr(selection);
        }

        let aliases: HashSet<String> = select
            .projection
            .iter()
            .filter_map(|item| match item {
                SelectItem::ExprWithAlias { alias, .. } => Some(alias.value.to_lowercase()),
                _ => None,
            })
            .collect();
        if let Some(scope) = self.scopes.last_mut() {
            scope.aliases = Some(aliases);
        }

        if let GroupByExpr::Expressions(exprs, _) = &select.group_by {
            for expr in exprs {
                self.check_expr(expr);
            }
        }
        if let Some(having) = &select.having {
            self.check_expr(having);
        }
        if let Some(qualify) = &select.qualify {
            self.check_expr(qualify);
        }
        if let Some(OrderByKind::Expressions(exprs)) = order_by.map(|o| &o.kind) {
            for order_expr in exprs {
                self.check_expr(&order_expr.expr);
            }
        }

        let output = self.select_output(select);
        self.scopes.pop();
        output
    }

    fn select_output(&self, select: &Select) -> Columns {
        let Some(scope) = self.scopes.last() else {
            return None;
        };

        let mut output = Vec::new();
        for item in &select.projection {
            match item {
                SelectItem::ExprWithAlias { alias, .. } => output.push(alias.value.clone()),
                SelectItem::UnnamedExpr(expr) => output.push(expr_output_name(expr)?),
                SelectItem::Wildcard(_) => {
                    if scope.opaque {
                        return None;
                    }
                    for source in &scope.sources {
                        output.extend(source.columns.clone()?);
                    }
                }
                SelectItem::QualifiedWildcard(SelectItemQualifiedWildcardKind::ObjectName(name), _) => {
                    let qualifier = qualifier_key(name);
                    let source = scope.sources.iter().find(|s| s.binding == qualifier)?;
                    output.extend(source.columns.clone()?);
                }
                SelectItem::QualifiedWildcard(..) => return None,
            }
        }
        Some(output)
    }

    fn add_table_with_joins<'q>(
        &mut self,
        table: &'q TableWithJoins,
        scope: &mut Scope,
        on_exprs: &mut Vec<&'q Expr>,
    ) {
        self.add_table_factor(&table.relation, scope, on_exprs);
        for join in &table.joins {
            let before = scope.sources.len();
            self.add_table_factor(&join.relation, scope, on_exprs);
            merge_join_columns(&join.join_operator, scope, before);
            if let Some(on) = join_on_expr(&join.join_operator) {
                on_exprs.push(on);
            }
        }
    }

    fn add_table_factor<'q>(
        &mut self,
        factor: &'q TableFactor,
        scope: &mut Scope,
        on_exprs: &mut Vec<&'q Expr>,
    ) {
        match factor {
            TableFactor::Table {
                name, alias, args, ..
            } => {
                let key = relation_key(name);
                let columns = if args.is_some() {
                    None
                } else {
                    self.relation_columns(&key)
                };
                let binding = match alias {
                    Some(alias) => ident_key(&alias.name),
                    None => qualifier_key(name),
                };
                scope.sources.push(Source {
                    binding,
                    columns: renamed(alias.as_ref(), columns),
                });
            }
            TableFactor::Derived {
                lateral,
                subquery,
                alias,
            } => {
                let columns = if *lateral {
                    // Sources to the left are in scope for a LATERAL subquery.
                    self.scopes.push(std::mem::take(scope));
                    let columns = self.check_query(subquery);
                    *scope = self.scopes.pop().unwrap_or_default();
                    columns
                } else {
                    self.check_query(subquery)
                };
                scope.sources.push(Source {
                    binding: alias
                        .as_ref()
                        .map(|alias| ident_key(&alias.name))
                        .unwrap_or_default(),
                    columns: renamed(alias.as_ref(), columns),
                });
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.add_table_with_joins(table_with_joins, scope, on_exprs),
            other => {
                let alias = table_factor_alias(other);
                if alias.is_none() {
                    scope.opaque = true;
                }
                scope.sources.push(Source {
                    binding: alias.map(|a| ident_key(&a.name)).unwrap_or_default(),
                    columns: alias.and_then(|a| declared_columns(&a.columns)),
                });
            }
        }
    }

    /// Local CTEs shadow the catalog; anything else is an open source.
    fn relation_columns(&self, key: &str) -> Columns {
        for frame in self.ctes.iter().rev() {
            if let Some(columns) = frame.get(key) {
                return columns.clone();
            }
        }
        self.catalog.columns(key)
    }

    fn check_expr(&mut self, expr: &Expr) {
        let mut subqueries = Vec::new();
        let mut identifiers = Vec::new();
        walk_expr(expr, &mut |event| match event {
            ExprEvent::Expr(Expr::Identifier(ident)) => identifiers.push(vec![ident]),
            ExprEvent::Expr(Expr::CompoundIdentifier(parts)) => {
                identifiers.push(parts.iter().collect())
            }
            ExprEvent::Expr(_) => {}
            ExprEvent::Subquery(query) => subqueries.push(query),
        });

        for parts in identifiers {
            match parts.as_slice() {
                [] => {}
                [ident] => self.check_unqualified(ident),
                _ => self.check_qualified(&parts),
            }
        }
        for query in subqueries {
            self.check_query(query);
        }
    }

    fn check_unqualified(&mut self, ident: &Ident) {
        match self.lookup(&ident.value) {
            Lookup::Found => {}
            Lookup::Ambiguous => Self::record(&mut self.ambiguous, ident.value.clone()),
            Lookup::Missing => Self::record(&mut self.unresolved, ident.value.clone()),
        }
    }

    fn check_qualified(&mut self, parts: &[&Ident]) {
        let (column, qualifiers) = match parts.split_last() {
            Some(split) => split,
            None => return,
        };
        let display = || {
            parts
                .iter()
                .map(|ident| ident.value.as_str())
                .collect::<Vec<_>>()
                .join(".")
        };

        if let Some(qualifier) = qualifiers.last() {
            let bound = self
                .find_binding(&ident_key(qualifier))
                .map(|source| source.has_column(&column.value));
            if let Some(has_column) = bound {
                if has_column == Some(false) {
                    Self::record(&mut self.unresolved, display());
                }
                return;
            }
        }

        // `col.field` on a struct column.
        if matches!(self.lookup(&parts[0].value), Lookup::Found | Lookup::Ambiguous) {
            return;
        }
        if !self.any_opaque() {
            Self::record(&mut self.unresolved, display());
        }
    }

    fn find_binding(&self, key: &str) -> Option<&Source> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| {
                scope
                    .sources
                    .iter()
                    .find(|source| !source.binding.is_empty() && source.binding == key)
            })
    }

    fn any_opaque(&self) -> bool {
        self.scopes.iter().any(|scope| scope.opaque)
    }

    /// Resolves an unqualified name from the innermost scope outwards.
    fn lookup(&self, name: &str) -> Lookup {
        let lower = name.to_lowercase();
        for scope in self.scopes.iter().rev() {
            if scope.merged.contains(&lower)
                || scope.aliases.as_ref().is_some_and(|a| a.contains(&lower))
            {
                return Lookup::Found;
            }

            let matches = scope
                .sources
                .iter()
                .filter(|source| source.has_column(name) == Some(true))
                .count();
            match matches {
                0 => {}
                1 => return Lookup::Found,
                _ => return Lookup::Ambiguous,
            }

            if scope.opaque || scope.sources.iter().any(|s| s.columns.is_none()) {
                return Lookup::Found;
            }
        }
        Lookup::Missing
    }
}

/// Records columns a `USING` or `NATURAL` join merges into one.
fn merge_join_columns(operator: &JoinOperator, scope: &mut Scope, right_start: usize) {
    let constraint = match operator {
        JoinOperator::Join(c)
        | JoinOperator::Inner(c)
        | JoinOperator::Left(c)
        | JoinOperator::LeftOuter(c)
        | JoinOperator::Right(c)
        | JoinOperator::RightOuter(c)
        | JoinOperator::FullOuter(c) => c,
        _ => return,
    };
    match constraint {
        JoinConstraint::Using(columns) => {
            for column in columns {
                let name = column.to_string();
                let last = name.rsplit('.').next().unwrap_or(&name);
                scope.merged.insert(normalize_name(last).to_lowercase());
            }
        }
        JoinConstraint::Natural => {
            let (left, right) = scope.sources.split_at(right_start);
            for source in right {
                for column in source.columns.iter().flatten() {
                    if left.iter().any(|l| l.has_column(column) != Some(false)) {
                        scope.merged.insert(column.to_lowercase());
                    }
                }
            }
        }
        _ => {}
    }
}

fn declared_columns(columns: &[TableAliasColumnDef]) -> Columns {
    if columns.is_empty() {
        None
    } else {
        Some(columns.iter().map(|c| c.name.value.clone()).collect())
    }
}

/// An alias column list renames the relation's columns.
fn renamed(alias: Option<&TableAlias>, columns: Columns) -> Columns {
    alias
        .and_then(|alias| declared_columns(&alias.columns))
        .or(columns)
}

/// The binding a bare table reference introduces: its last name part.
fn qualifier_key(name: &ObjectName) -> String {
    name.0
        .last()
        .and_then(|part| part.as_ident())
        .map(ident_key)
        .unwrap_or_default()
}

fn table_factor_alias(factor: &TableFactor) -> Option<&TableAlias> {
    match factor {
        TableFactor::Table { alias, .. }
        | TableFactor::Derived { alias, .. }
        | TableFactor::TableFunction { alias, .. }
        | TableFactor::Function { alias, .. }
        | TableFactor::UNNEST { alias, .. }
        | TableFactor::JsonTable { alias, .. }
        | TableFactor::OpenJsonTable { alias, .. }
        | TableFactor::NestedJoin { alias, .. }
        | TableFactor::Pivot { alias, .. }
        | TableFactor::Unpivot { alias, .. }
        | TableFactor::MatchRecognize { alias, .. }
        | TableFactor::XmlTable { alias, .. }
        | TableFactor::SemanticView { alias, .. } => alias.as_ref(),
    }
}
