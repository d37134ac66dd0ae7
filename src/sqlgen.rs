//! SQL generator: compiles a decorated [`AqlQuery`] into parameterized
//! SQL using sea-query.
//!
//! Literal values are never interpolated into the SQL text; they come out
//! as bound parameters in [`CompiledQuery::params`]. Joins and output
//! columns are emitted in insertion order, so compiling the same query
//! twice yields byte-identical SQL.

use sea_query::{
    Expr, Iden, JoinType, LikeExpr, Order, SelectStatement, SimpleExpr, SqliteQueryBuilder, Value,
    Values,
};

use crate::error::Result;
use crate::model::{AqlDomain, AqlQuery, AqlValue, ComparatorOp, Criteria, SortDirection};
use crate::schema::{self, FieldBinding, Table, TableLink};

/// Column identifier wrapper for sea-query.
#[derive(Debug, Clone, Copy)]
pub struct Col(pub &'static str);

impl Iden for Col {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(s, "{}", self.0).unwrap();
    }
}

/// One output column position, mapped back to its logical field. The
/// execution engine decodes rows positionally through this mapping, never
/// by column name.
#[derive(Debug, Clone)]
pub struct ResolvedColumn {
    pub field: String,
    pub binding: FieldBinding,
}

/// Output of SQL generation, consumed by the execution engine.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub domain: AqlDomain,
    pub sql: String,
    pub params: Values,
    pub columns: Vec<ResolvedColumn>,
}

/// Compiles a (decorated) query model into parameterized SQL.
pub fn generate(query: &AqlQuery) -> Result<CompiledQuery> {
    let main = schema::main_table(query.domain);
    let mut joins: Vec<TableLink> = Vec::new();

    // Result columns: resolved in request order, de-duplicated by physical
    // column so two aliases of one field produce a single SELECT entry.
    let mut columns: Vec<ResolvedColumn> = Vec::new();
    for field in &query.fields {
        let binding = schema::resolve_field(query.domain, field)?;
        require_path(query.domain, binding.table, &mut joins)?;
        let duplicate = columns
            .iter()
            .any(|c| c.binding.table == binding.table && c.binding.column == binding.column);
        if !duplicate {
            columns.push(ResolvedColumn {
                field: field.clone(),
                binding,
            });
        }
    }

    let where_expr = match &query.criteria {
        Some(criteria) => Some(criteria_expr(query.domain, criteria, &mut joins)?),
        None => None,
    };

    // Sort fields resolve like any other reference but are not added to
    // the SELECT list.
    let mut order: Vec<(FieldBinding, SortDirection)> = Vec::new();
    for (field, direction) in &query.sort {
        let binding = schema::resolve_field(query.domain, field)?;
        require_path(query.domain, binding.table, &mut joins)?;
        order.push((binding, *direction));
    }

    let mut select = SelectStatement::new();
    select.from(main);
    for col in &columns {
        select.column((col.binding.table, Col(col.binding.column)));
    }
    for link in &joins {
        select.join(
            JoinType::LeftJoin,
            link.to,
            Expr::col((link.from, Col(link.from_column)))
                .equals((link.to, Col(link.to_column))),
        );
    }
    if let Some(expr) = where_expr {
        select.and_where(expr);
    }
    for (binding, direction) in &order {
        let ord = match direction {
            SortDirection::Asc => Order::Asc,
            SortDirection::Desc => Order::Desc,
        };
        select.order_by((binding.table, Col(binding.column)), ord);
    }
    if let Some(limit) = query.limit {
        select.limit(limit);
    } else if query.offset > 0 {
        // SQLite accepts OFFSET only after a LIMIT clause.
        select.limit(i64::MAX as u64);
    }
    if query.offset > 0 {
        select.offset(query.offset);
    }

    let (sql, params) = select.build(SqliteQueryBuilder);
    tracing::debug!(domain = query.domain.as_str(), %sql, "generated SQL");

    Ok(CompiledQuery {
        domain: query.domain,
        sql,
        params,
        columns,
    })
}

/// Appends the join path to `target`, skipping edges already present so
/// one path serves every reference that needs it.
fn require_path(domain: AqlDomain, target: Table, joins: &mut Vec<TableLink>) -> Result<()> {
    for link in schema::join_path(domain, target)? {
        if !joins.contains(&link) {
            joins.push(link);
        }
    }
    Ok(())
}

/// Recursive translation of the criteria tree into a bound expression.
fn criteria_expr(
    domain: AqlDomain,
    criteria: &Criteria,
    joins: &mut Vec<TableLink>,
) -> Result<SimpleExpr> {
    match criteria {
        Criteria::And(children) => {
            let exprs: Vec<SimpleExpr> = children
                .iter()
                .map(|c| criteria_expr(domain, c, joins))
                .collect::<Result<_>>()?;
            Ok(exprs
                .into_iter()
                .reduce(|acc, e| acc.and(e))
                .unwrap_or_else(|| Expr::val(true).into()))
        }
        Criteria::Or(children) => {
            let exprs: Vec<SimpleExpr> = children
                .iter()
                .map(|c| criteria_expr(domain, c, joins))
                .collect::<Result<_>>()?;
            Ok(exprs
                .into_iter()
                .reduce(|acc, e| acc.or(e))
                .unwrap_or_else(|| Expr::val(false).into()))
        }
        Criteria::Not(inner) => Ok(criteria_expr(domain, inner, joins)?.not()),
        Criteria::Cmp { field, op, value } => {
            let binding = schema::resolve_field(domain, field)?;
            schema::check_comparator(field, binding, *op, value)?;
            require_path(domain, binding.table, joins)?;
            Ok(comparison_expr(binding, *op, value))
        }
    }
}

fn comparison_expr(binding: FieldBinding, op: ComparatorOp, value: &AqlValue) -> SimpleExpr {
    let col = Expr::col((binding.table, Col(binding.column)));
    match (op, value) {
        // Null means row absence across the outer join.
        (ComparatorOp::Eq, AqlValue::Null) => col.is_null(),
        (ComparatorOp::Ne, AqlValue::Null) => col.is_not_null(),
        (ComparatorOp::Match, AqlValue::Str(pattern)) => {
            col.like(LikeExpr::new(wildcard_to_like(pattern)).escape('\\'))
        }
        (ComparatorOp::NotMatch, AqlValue::Str(pattern)) => {
            col.not_like(LikeExpr::new(wildcard_to_like(pattern)).escape('\\'))
        }
        (op, value) => {
            let bound = to_value(value);
            match op {
                ComparatorOp::Eq => col.eq(bound),
                ComparatorOp::Ne => col.ne(bound),
                ComparatorOp::Gt => col.gt(bound),
                ComparatorOp::Gte => col.gte(bound),
                ComparatorOp::Lt => col.lt(bound),
                ComparatorOp::Lte => col.lte(bound),
                // Guarded by check_comparator: match ops always carry a
                // string pattern and null only reaches $eq/$ne.
                ComparatorOp::Match | ComparatorOp::NotMatch => col.eq(bound),
            }
        }
    }
}

fn to_value(value: &AqlValue) -> Value {
    match value {
        AqlValue::Str(s) => Value::String(Some(Box::new(s.clone()))),
        AqlValue::Int(n) => Value::BigInt(Some(*n)),
        AqlValue::Null => Value::String(None),
    }
}

/// Translates AQL wildcards (`*`, `?`) to SQL LIKE (`%`, `_`), escaping
/// characters that are wildcards in LIKE but literal in AQL.
fn wildcard_to_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            other => out.push(other),
        }
    }
    out
}
