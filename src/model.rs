//! The typed intermediate query model and its two construction paths:
//! the token-stream builder (fed by the parser) and the fluent
//! [`AqlQueryBuilder`] for code-level construction. Both converge on
//! [`AqlQuery`] before the decorator stage.

use serde::Serialize;

use crate::error::{AqlError, Result};
use crate::grammar::TokenTag;
use crate::parse::ParseToken;
use crate::schema;

/// A logical result category, anchored to one main physical table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AqlDomain {
    Items,
    Entries,
    Statistics,
    Properties,
}

impl AqlDomain {
    pub fn from_keyword(word: &str) -> Result<AqlDomain> {
        match word {
            "items" => Ok(AqlDomain::Items),
            "entries" => Ok(AqlDomain::Entries),
            "statistics" => Ok(AqlDomain::Statistics),
            "properties" => Ok(AqlDomain::Properties),
            other => Err(AqlError::UnknownDomain(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AqlDomain::Items => "items",
            AqlDomain::Entries => "entries",
            AqlDomain::Statistics => "statistics",
            AqlDomain::Properties => "properties",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparatorOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Match,
    NotMatch,
}

impl ComparatorOp {
    fn from_keyword(word: &str) -> Option<ComparatorOp> {
        match word {
            "$eq" => Some(ComparatorOp::Eq),
            "$ne" => Some(ComparatorOp::Ne),
            "$gt" => Some(ComparatorOp::Gt),
            "$gte" => Some(ComparatorOp::Gte),
            "$lt" => Some(ComparatorOp::Lt),
            "$lte" => Some(ComparatorOp::Lte),
            "$match" => Some(ComparatorOp::Match),
            "$nmatch" => Some(ComparatorOp::NotMatch),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComparatorOp::Eq => "$eq",
            ComparatorOp::Ne => "$ne",
            ComparatorOp::Gt => "$gt",
            ComparatorOp::Gte => "$gte",
            ComparatorOp::Lt => "$lt",
            ComparatorOp::Lte => "$lte",
            ComparatorOp::Match => "$match",
            ComparatorOp::NotMatch => "$nmatch",
        }
    }
}

/// A literal comparison operand. `Null` means "no corresponding row across
/// the outer join", not a stored NULL column value.
#[derive(Debug, Clone, PartialEq)]
pub enum AqlValue {
    Str(String),
    Int(i64),
    Null,
}

impl From<&str> for AqlValue {
    fn from(s: &str) -> Self {
        AqlValue::Str(s.to_string())
    }
}

impl From<String> for AqlValue {
    fn from(s: String) -> Self {
        AqlValue::Str(s)
    }
}

impl From<i64> for AqlValue {
    fn from(n: i64) -> Self {
        AqlValue::Int(n)
    }
}

/// The boolean filter tree. Owned exclusively by one [`AqlQuery`].
#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    And(Vec<Criteria>),
    Or(Vec<Criteria>),
    Not(Box<Criteria>),
    Cmp {
        field: String,
        op: ComparatorOp,
        value: AqlValue,
    },
}

impl Criteria {
    pub fn cmp(field: impl Into<String>, op: ComparatorOp, value: impl Into<AqlValue>) -> Criteria {
        Criteria::Cmp {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<AqlValue>) -> Criteria {
        Criteria::cmp(field, ComparatorOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<AqlValue>) -> Criteria {
        Criteria::cmp(field, ComparatorOp::Ne, value)
    }

    pub fn matches(field: impl Into<String>, pattern: impl Into<AqlValue>) -> Criteria {
        Criteria::cmp(field, ComparatorOp::Match, pattern)
    }

    pub fn and(children: Vec<Criteria>) -> Criteria {
        Criteria::And(children)
    }

    pub fn or(children: Vec<Criteria>) -> Criteria {
        Criteria::Or(children)
    }

    pub fn not(child: Criteria) -> Criteria {
        Criteria::Not(Box::new(child))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// The fully built, domain-typed query. Mutated only by decorators,
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct AqlQuery {
    pub domain: AqlDomain,
    pub criteria: Option<Criteria>,
    /// Ordered, de-duplicated output fields. Never empty after build:
    /// defaults to the domain's canonical field set.
    pub fields: Vec<String>,
    /// Sort fields need not be members of `fields`.
    pub sort: Vec<(String, SortDirection)>,
    /// `None` means "not specified"; the limit decorator fills in the
    /// engine ceiling. `Some(0)` is valid and yields zero rows.
    pub limit: Option<u64>,
    pub offset: u64,
}

/// Walks the winning derivation's token stream into an [`AqlQuery`].
pub fn build_query(tokens: &[ParseToken]) -> Result<AqlQuery> {
    let mut cursor = Cursor { tokens, index: 0 };

    let domain_tok = cursor.expect_any("domain keyword")?;
    debug_assert_eq!(domain_tok.tag, TokenTag::Domain);
    let domain = AqlDomain::from_keyword(&domain_tok.text)?;

    let mut criteria = None;
    if cursor.peek_tag() == Some(TokenTag::CriteriaOpen) {
        let items = read_criteria_items(&mut cursor)?;
        criteria = fold_items(items);
    }

    let mut fields: Vec<String> = Vec::new();
    let mut sort: Vec<(String, SortDirection)> = Vec::new();
    let mut limit = None;
    let mut offset = 0;

    // Projection fields (second argument of find) come through as bare
    // Field tokens; trailer clauses are introduced by their keyword tags.
    while let Some(tag) = cursor.peek_tag() {
        match tag {
            TokenTag::Field => {
                fields.push(cursor.next().unwrap().text.clone());
            }
            TokenTag::IncludeKw => {
                cursor.next();
                while cursor.peek_tag() == Some(TokenTag::Field) {
                    fields.push(cursor.next().unwrap().text.clone());
                }
            }
            TokenTag::SortAsc | TokenTag::SortDesc => {
                let direction = if tag == TokenTag::SortAsc {
                    SortDirection::Asc
                } else {
                    SortDirection::Desc
                };
                cursor.next();
                cursor.expect(TokenTag::ListOpen)?;
                while cursor.peek_tag() == Some(TokenTag::Field) {
                    sort.push((cursor.next().unwrap().text.clone(), direction));
                }
                cursor.expect(TokenTag::ListClose)?;
            }
            TokenTag::LimitKw => {
                cursor.next();
                limit = Some(read_integer(&mut cursor)?);
            }
            TokenTag::OffsetKw => {
                cursor.next();
                offset = read_integer(&mut cursor)?;
            }
            other => {
                let tok = cursor.next().unwrap();
                return Err(malformed(tok, &format!("unexpected {:?}", other)));
            }
        }
    }

    dedup_in_place(&mut fields);
    if fields.is_empty() {
        fields = schema::default_fields(domain)
            .iter()
            .map(|f| f.to_string())
            .collect();
    }

    Ok(AqlQuery {
        domain,
        criteria,
        fields,
        sort,
        limit,
        offset,
    })
}

/// Reads one `{...}` criteria object and returns its top-level items.
fn read_criteria_items(cursor: &mut Cursor<'_>) -> Result<Vec<Criteria>> {
    cursor.expect(TokenTag::CriteriaOpen)?;
    let mut items = Vec::new();
    loop {
        match cursor.peek_tag() {
            Some(TokenTag::CriteriaClose) => {
                cursor.next();
                break;
            }
            Some(TokenTag::AndOp) => {
                cursor.next();
                items.push(Criteria::And(read_criteria_list(cursor)?));
            }
            Some(TokenTag::OrOp) => {
                cursor.next();
                items.push(Criteria::Or(read_criteria_list(cursor)?));
            }
            Some(TokenTag::NotOp) => {
                cursor.next();
                let inner = read_criteria_items(cursor)?;
                let folded = fold_items(inner).unwrap_or(Criteria::And(Vec::new()));
                items.push(Criteria::Not(Box::new(folded)));
            }
            Some(TokenTag::Field) => {
                let field = cursor.next().unwrap().text.clone();
                let op = if cursor.peek_tag() == Some(TokenTag::Comparator) {
                    let tok = cursor.next().unwrap();
                    ComparatorOp::from_keyword(&tok.text)
                        .ok_or_else(|| malformed(tok, "unknown comparator"))?
                } else {
                    ComparatorOp::Eq
                };
                let value = read_value(cursor)?;
                items.push(Criteria::Cmp { field, op, value });
            }
            _ => {
                let tok = cursor.expect_any("criteria item")?;
                return Err(malformed(tok, "unexpected token in criteria"));
            }
        }
    }
    Ok(items)
}

/// `[` criteria+ `]` — commas are invisible terminals, so the list is
/// delimited purely by the bracket tokens.
fn read_criteria_list(cursor: &mut Cursor<'_>) -> Result<Vec<Criteria>> {
    cursor.expect(TokenTag::ListOpen)?;
    let mut out = Vec::new();
    while cursor.peek_tag() == Some(TokenTag::CriteriaOpen) {
        let items = read_criteria_items(cursor)?;
        out.push(fold_items(items).unwrap_or(Criteria::And(Vec::new())));
    }
    cursor.expect(TokenTag::ListClose)?;
    Ok(out)
}

fn read_value(cursor: &mut Cursor<'_>) -> Result<AqlValue> {
    let tok = cursor.expect_any("literal value")?;
    match tok.tag {
        TokenTag::ValueStr => Ok(AqlValue::Str(tok.text.clone())),
        TokenTag::ValueInt => tok
            .text
            .parse::<i64>()
            .map(AqlValue::Int)
            .map_err(|_| malformed(tok, "integer literal out of range")),
        TokenTag::ValueNull => Ok(AqlValue::Null),
        _ => Err(malformed(tok, "expected literal value")),
    }
}

fn read_integer(cursor: &mut Cursor<'_>) -> Result<u64> {
    let tok = cursor.expect_any("integer")?;
    if tok.tag != TokenTag::Integer {
        return Err(malformed(tok, "expected integer"));
    }
    tok.text
        .parse::<u64>()
        .map_err(|_| malformed(tok, "integer literal out of range"))
}

/// Multiple items inside one criteria object combine with AND.
fn fold_items(mut items: Vec<Criteria>) -> Option<Criteria> {
    match items.len() {
        0 => None,
        1 => Some(items.remove(0)),
        _ => Some(Criteria::And(items)),
    }
}

fn dedup_in_place(fields: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    fields.retain(|f| seen.insert(f.clone()));
}

fn malformed(tok: &ParseToken, message: &str) -> AqlError {
    AqlError::Syntax {
        position: tok.pos,
        message: message.to_string(),
    }
}

struct Cursor<'a> {
    tokens: &'a [ParseToken],
    index: usize,
}

impl<'a> Cursor<'a> {
    fn peek_tag(&self) -> Option<TokenTag> {
        self.tokens.get(self.index).map(|t| t.tag)
    }

    fn next(&mut self) -> Option<&'a ParseToken> {
        let tok = self.tokens.get(self.index)?;
        self.index += 1;
        Some(tok)
    }

    fn expect_any(&mut self, what: &str) -> Result<&'a ParseToken> {
        self.next().ok_or_else(|| AqlError::Syntax {
            position: 0,
            message: format!("expected {}, found end of token stream", what),
        })
    }

    fn expect(&mut self, tag: TokenTag) -> Result<&'a ParseToken> {
        let tok = self.expect_any(&format!("{:?}", tag))?;
        if tok.tag == tag {
            Ok(tok)
        } else {
            Err(malformed(tok, &format!("expected {:?}", tag)))
        }
    }
}

/// Fluent builder producing an [`AqlQuery`] without going through the
/// text parser. Converges with the parsed path at the decorator stage.
#[derive(Debug, Clone)]
pub struct AqlQueryBuilder {
    domain: AqlDomain,
    criteria: Option<Criteria>,
    fields: Vec<String>,
    sort: Vec<(String, SortDirection)>,
    limit: Option<u64>,
    offset: u64,
}

impl AqlQueryBuilder {
    pub fn new(domain: AqlDomain) -> Self {
        Self {
            domain,
            criteria: None,
            fields: Vec::new(),
            sort: Vec::new(),
            limit: None,
            offset: 0,
        }
    }

    /// Sets the filter tree. A later call replaces the earlier one.
    pub fn criteria(mut self, criteria: Criteria) -> Self {
        self.criteria = Some(criteria);
        self
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn build(mut self) -> AqlQuery {
        dedup_in_place(&mut self.fields);
        if self.fields.is_empty() {
            self.fields = schema::default_fields(self.domain)
                .iter()
                .map(|f| f.to_string())
                .collect();
        }
        AqlQuery {
            domain: self.domain,
            criteria: self.criteria,
            fields: self.fields,
            sort: self.sort,
            limit: self.limit,
            offset: self.offset,
        }
    }
}
