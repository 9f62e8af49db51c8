//! Output column names of a query.

use sqlparser::ast::{Expr, Query, SelectItem, SetExpr};

/// Name a projected expression would carry without an alias.
///
/// Columns keep their own name, casts and parentheses are transparent and
/// function calls are named after the function. Anything else has no stable
/// name.
pub(crate) fn expr_output_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|ident| ident.value.clone()),
        Expr::Nested(inner) | Expr::Cast { expr: inner, .. } => expr_output_name(inner),
        Expr::Function(func) => func
            .name
            .0
            .last()
            .and_then(|part| part.as_ident())
            .map(|ident| ident.value.to_lowercase()),
        _ => None,
    }
}

/// Output name of one select item; `None` for wildcards and unnamed
/// expressions.
pub(crate) fn item_name(item: &SelectItem) -> Option<String> {
    match item {
        SelectItem::ExprWithAlias { alias, .. } => Some(alias.value.clone()),
        SelectItem::UnnamedExpr(expr) => expr_output_name(expr),
        _ => None,
    }
}

/// Column names a query produces, when they can be read off its projection.
///
/// Set operations take their names from the left branch; `VALUES` lists are
/// named `column1`, `column2`, ...
pub(crate) fn projected_columns(query: &Query) -> Option<Vec<String>> {
    set_expr_columns(&query.body)
}

fn set_expr_columns(body: &SetExpr) -> Option<Vec<String>> {
    match body {
        SetExpr::Select(select) => select.projection.iter().map(item_name).collect(),
        SetExpr::Query(query) => projected_columns(query),
        SetExpr::SetOperation { left, .. } => set_expr_columns(left),
        SetExpr::Values(values) => {
            let width = values.rows.first()?.len();
            Some((1..=width).map(|i| format!("column{i}")).collect())
        }
        _ => None,
    }
}
