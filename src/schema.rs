//! Per-domain join graph and logical field resolution.
//!
//! Each domain anchors to one main table and may reach auxiliary tables
//! over directed [`TableLink`] edges. A per-domain exclusion set forbids
//! traversing edges that would fan a query out into unrelated tables
//! (e.g. a statistics query must not wander from `items` into `props`).

use sea_query::Iden;

use crate::error::{AqlError, Result};
use crate::model::{AqlDomain, AqlValue, ComparatorOp};

/// Physical tables of the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Items,
    Stats,
    Props,
    ArchiveEntries,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Items => "items",
            Table::Stats => "stats",
            Table::Props => "props",
            Table::ArchiveEntries => "archive_entries",
        }
    }
}

impl Iden for Table {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(s, "{}", self.name()).unwrap();
    }
}

/// Declared type of a logical field. Timestamps are integer millis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Str,
    Int,
    Timestamp,
}

/// A logical field bound to its physical column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldBinding {
    pub table: Table,
    pub column: &'static str,
    pub ty: FieldType,
}

const fn bind(table: Table, column: &'static str, ty: FieldType) -> FieldBinding {
    FieldBinding { table, column, ty }
}

/// A directed join edge between two physical tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableLink {
    pub from: Table,
    pub from_column: &'static str,
    pub to: Table,
    pub to_column: &'static str,
}

/// All join edges of the graph. Forward edges fan out from `items`;
/// reverse edges let auxiliary domains reach back to `items`.
const LINKS: &[TableLink] = &[
    TableLink { from: Table::Items, from_column: "id", to: Table::Stats, to_column: "item_id" },
    TableLink { from: Table::Items, from_column: "id", to: Table::Props, to_column: "item_id" },
    TableLink { from: Table::Items, from_column: "id", to: Table::ArchiveEntries, to_column: "item_id" },
    TableLink { from: Table::Stats, from_column: "item_id", to: Table::Items, to_column: "id" },
    TableLink { from: Table::Props, from_column: "item_id", to: Table::Items, to_column: "id" },
    TableLink { from: Table::ArchiveEntries, from_column: "item_id", to: Table::Items, to_column: "id" },
];

pub fn main_table(domain: AqlDomain) -> Table {
    match domain {
        AqlDomain::Items => Table::Items,
        AqlDomain::Entries => Table::ArchiveEntries,
        AqlDomain::Statistics => Table::Stats,
        AqlDomain::Properties => Table::Props,
    }
}

/// Canonical output fields used when a query requests none.
pub fn default_fields(domain: AqlDomain) -> &'static [&'static str] {
    match domain {
        AqlDomain::Items => &["repo", "path", "name", "size", "modified"],
        AqlDomain::Entries => &["entry_name", "entry_path", "item.repo", "item.path", "item.name"],
        AqlDomain::Statistics => &["downloads", "last_downloaded", "item.repo", "item.path", "item.name"],
        AqlDomain::Properties => &["key", "value", "item.repo", "item.path", "item.name"],
    }
}

/// Edges a domain must never traverse, preventing join fan-out.
fn excluded(domain: AqlDomain) -> &'static [(Table, Table)] {
    match domain {
        AqlDomain::Items => &[],
        AqlDomain::Entries => &[(Table::Items, Table::Stats), (Table::Items, Table::Props)],
        AqlDomain::Statistics => &[
            (Table::Items, Table::Props),
            (Table::Items, Table::ArchiveEntries),
        ],
        AqlDomain::Properties => &[
            (Table::Items, Table::Stats),
            (Table::Items, Table::ArchiveEntries),
        ],
    }
}

/// Resolves a logical field name within a domain. Dotted names reference
/// sibling tables (`stat.downloads`, `property.key`, `item.repo`, …).
pub fn resolve_field(domain: AqlDomain, field: &str) -> Result<FieldBinding> {
    let binding = match domain {
        AqlDomain::Items => match field {
            "repo" => Some(bind(Table::Items, "repo", FieldType::Str)),
            "path" => Some(bind(Table::Items, "path", FieldType::Str)),
            "name" => Some(bind(Table::Items, "name", FieldType::Str)),
            "size" => Some(bind(Table::Items, "size", FieldType::Int)),
            "modified" => Some(bind(Table::Items, "modified", FieldType::Timestamp)),
            "stat.downloads" => Some(bind(Table::Stats, "downloads", FieldType::Int)),
            "stat.last_downloaded" => {
                Some(bind(Table::Stats, "last_downloaded", FieldType::Timestamp))
            }
            "property.key" => Some(bind(Table::Props, "prop_key", FieldType::Str)),
            "property.value" => Some(bind(Table::Props, "prop_value", FieldType::Str)),
            "archive.entry_name" => {
                Some(bind(Table::ArchiveEntries, "entry_name", FieldType::Str))
            }
            "archive.entry_path" => {
                Some(bind(Table::ArchiveEntries, "entry_path", FieldType::Str))
            }
            _ => None,
        },
        AqlDomain::Entries => match field {
            "entry_name" => Some(bind(Table::ArchiveEntries, "entry_name", FieldType::Str)),
            "entry_path" => Some(bind(Table::ArchiveEntries, "entry_path", FieldType::Str)),
            _ => item_field(field),
        },
        AqlDomain::Statistics => match field {
            "downloads" => Some(bind(Table::Stats, "downloads", FieldType::Int)),
            "last_downloaded" => {
                Some(bind(Table::Stats, "last_downloaded", FieldType::Timestamp))
            }
            // Bound but unreachable for this domain: the join resolver
            // rejects the path with JoinGraphUnreachable.
            "property.key" => Some(bind(Table::Props, "prop_key", FieldType::Str)),
            "property.value" => Some(bind(Table::Props, "prop_value", FieldType::Str)),
            _ => item_field(field),
        },
        AqlDomain::Properties => match field {
            "key" => Some(bind(Table::Props, "prop_key", FieldType::Str)),
            "value" => Some(bind(Table::Props, "prop_value", FieldType::Str)),
            _ => item_field(field),
        },
    };
    binding.ok_or_else(|| AqlError::UnknownField {
        domain: domain.as_str().to_string(),
        field: field.to_string(),
    })
}

/// `item.*` fields shared by every auxiliary domain.
fn item_field(field: &str) -> Option<FieldBinding> {
    match field {
        "item.repo" => Some(bind(Table::Items, "repo", FieldType::Str)),
        "item.path" => Some(bind(Table::Items, "path", FieldType::Str)),
        "item.name" => Some(bind(Table::Items, "name", FieldType::Str)),
        "item.size" => Some(bind(Table::Items, "size", FieldType::Int)),
        "item.modified" => Some(bind(Table::Items, "modified", FieldType::Timestamp)),
        _ => None,
    }
}

/// Shortest allowed join path (BFS) from the domain's main table to
/// `target`, respecting the domain's exclusion set.
pub fn join_path(domain: AqlDomain, target: Table) -> Result<Vec<TableLink>> {
    let start = main_table(domain);
    if start == target {
        return Ok(Vec::new());
    }

    let banned = excluded(domain);
    let mut queue = std::collections::VecDeque::new();
    let mut came_from: Vec<(Table, TableLink)> = Vec::new();
    let mut visited = vec![start];
    queue.push_back(start);

    while let Some(current) = queue.pop_front() {
        for link in LINKS {
            if link.from != current
                || visited.contains(&link.to)
                || banned.contains(&(link.from, link.to))
            {
                continue;
            }
            came_from.push((link.to, *link));
            if link.to == target {
                return Ok(reconstruct(&came_from, start, target));
            }
            visited.push(link.to);
            queue.push_back(link.to);
        }
    }

    Err(AqlError::JoinGraphUnreachable {
        domain: domain.as_str().to_string(),
        from: start.name().to_string(),
        to: target.name().to_string(),
    })
}

fn reconstruct(came_from: &[(Table, TableLink)], start: Table, target: Table) -> Vec<TableLink> {
    let mut path = Vec::new();
    let mut current = target;
    while current != start {
        let (_, link) = came_from
            .iter()
            .find(|(table, _)| *table == current)
            .expect("BFS predecessor must exist");
        path.push(*link);
        current = link.from;
    }
    path.reverse();
    path
}

/// Checks comparator/value compatibility against the field's declared type.
pub fn check_comparator(
    field: &str,
    binding: FieldBinding,
    op: ComparatorOp,
    value: &AqlValue,
) -> Result<()> {
    let mismatch = |reason: &str| AqlError::TypeMismatch {
        field: field.to_string(),
        comparator: op.as_str().to_string(),
        reason: reason.to_string(),
    };

    if let AqlValue::Null = value {
        // Null only combines with equality: it means row absence across
        // the outer join, which has no ordering.
        return match op {
            ComparatorOp::Eq | ComparatorOp::Ne => Ok(()),
            _ => Err(mismatch("null permits only $eq and $ne")),
        };
    }

    match op {
        ComparatorOp::Match | ComparatorOp::NotMatch => {
            if binding.ty != FieldType::Str {
                return Err(mismatch("wildcard match requires a string field"));
            }
            if !matches!(value, AqlValue::Str(_)) {
                return Err(mismatch("wildcard pattern must be a string"));
            }
        }
        ComparatorOp::Gt | ComparatorOp::Gte | ComparatorOp::Lt | ComparatorOp::Lte => {
            if binding.ty == FieldType::Str {
                return Err(mismatch("ordering comparator requires a numeric field"));
            }
            if !matches!(value, AqlValue::Int(_)) {
                return Err(mismatch("ordering comparand must be an integer"));
            }
        }
        ComparatorOp::Eq | ComparatorOp::Ne => {
            let compatible = matches!(
                (binding.ty, value),
                (FieldType::Str, AqlValue::Str(_))
                    | (FieldType::Int, AqlValue::Int(_))
                    | (FieldType::Timestamp, AqlValue::Int(_))
            );
            if !compatible {
                return Err(mismatch("literal type does not match field type"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_table_per_domain() {
        assert_eq!(main_table(AqlDomain::Items), Table::Items);
        assert_eq!(main_table(AqlDomain::Entries), Table::ArchiveEntries);
        assert_eq!(main_table(AqlDomain::Statistics), Table::Stats);
        assert_eq!(main_table(AqlDomain::Properties), Table::Props);
    }

    #[test]
    fn test_resolve_local_and_dotted_fields() {
        let local = resolve_field(AqlDomain::Items, "repo").unwrap();
        assert_eq!(local.table, Table::Items);

        let dotted = resolve_field(AqlDomain::Items, "stat.downloads").unwrap();
        assert_eq!(dotted.table, Table::Stats);
        assert_eq!(dotted.column, "downloads");
        assert_eq!(dotted.ty, FieldType::Int);
    }

    #[test]
    fn test_unknown_field() {
        match resolve_field(AqlDomain::Items, "flavour") {
            Err(AqlError::UnknownField { domain, field }) => {
                assert_eq!(domain, "items");
                assert_eq!(field, "flavour");
            }
            other => panic!("expected UnknownField, got {:?}", other),
        }
    }

    #[test]
    fn test_join_path_main_table_is_empty() {
        assert!(join_path(AqlDomain::Items, Table::Items).unwrap().is_empty());
    }

    #[test]
    fn test_join_path_one_hop() {
        let path = join_path(AqlDomain::Items, Table::Stats).unwrap();
        assert_eq!(path.len(), 1);
        assert_eq!(path[0].from, Table::Items);
        assert_eq!(path[0].to, Table::Stats);
    }

    #[test]
    fn test_aux_domain_reaches_items() {
        let path = join_path(AqlDomain::Statistics, Table::Items).unwrap();
        assert_eq!(path.len(), 1);
        assert_eq!(path[0].from, Table::Stats);
        assert_eq!(path[0].to, Table::Items);
    }

    #[test]
    fn test_exclusion_blocks_fan_out() {
        // stats -> items is allowed, but items -> props is excluded for
        // the statistics domain, so props is unreachable.
        match join_path(AqlDomain::Statistics, Table::Props) {
            Err(AqlError::JoinGraphUnreachable { domain, to, .. }) => {
                assert_eq!(domain, "statistics");
                assert_eq!(to, "props");
            }
            other => panic!("expected JoinGraphUnreachable, got {:?}", other),
        }
    }

    #[test]
    fn test_null_with_ordering_comparator_rejected() {
        let binding = resolve_field(AqlDomain::Items, "stat.downloads").unwrap();
        let err = check_comparator("stat.downloads", binding, ComparatorOp::Gt, &AqlValue::Null);
        assert!(matches!(err, Err(AqlError::TypeMismatch { .. })));
    }

    #[test]
    fn test_match_requires_string_field() {
        let binding = resolve_field(AqlDomain::Items, "size").unwrap();
        let err = check_comparator(
            "size",
            binding,
            ComparatorOp::Match,
            &AqlValue::Str("lib-*".to_string()),
        );
        assert!(matches!(err, Err(AqlError::TypeMismatch { .. })));
    }

    #[test]
    fn test_ordering_on_timestamp_ok() {
        let binding = resolve_field(AqlDomain::Items, "modified").unwrap();
        check_comparator("modified", binding, ComparatorOp::Lt, &AqlValue::Int(5)).unwrap();
    }

    #[test]
    fn test_eq_type_agreement() {
        let binding = resolve_field(AqlDomain::Items, "repo").unwrap();
        check_comparator("repo", binding, ComparatorOp::Eq, &AqlValue::Str("r".into())).unwrap();
        let err = check_comparator("repo", binding, ComparatorOp::Eq, &AqlValue::Int(1));
        assert!(matches!(err, Err(AqlError::TypeMismatch { .. })));
    }
}
