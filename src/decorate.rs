//! Query decorators: passes that add implicit, non-client-authored
//! constraints to a built [`AqlQuery`].
//!
//! Decorators run in a fixed order and may only narrow a query — they
//! never remove or weaken a client-specified filter:
//!
//! 1. [`exclude_trashed`] — hide soft-deleted content (the trash repo)
//! 2. [`hide_protected_properties`] — hide configured property keys
//!    from the properties domain
//! 3. [`clamp_limit`] — fill in or cap the row limit at the engine
//!    ceiling

use crate::config::EngineConfig;
use crate::model::{AqlDomain, AqlQuery, Criteria};

/// Runs all decorators in their fixed order.
pub fn decorate(query: AqlQuery, config: &EngineConfig) -> AqlQuery {
    let query = exclude_trashed(query, config);
    let query = hide_protected_properties(query, config);
    clamp_limit(query, config)
}

/// ANDs `constraint` onto the existing criteria without reshaping the
/// client's own tree.
fn add_constraint(query: &mut AqlQuery, constraint: Criteria) {
    query.criteria = Some(match query.criteria.take() {
        None => constraint,
        Some(Criteria::And(mut children)) => {
            children.push(constraint);
            Criteria::And(children)
        }
        Some(existing) => Criteria::And(vec![existing, constraint]),
    });
}

fn exclude_trashed(mut query: AqlQuery, config: &EngineConfig) -> AqlQuery {
    let repo_field = match query.domain {
        AqlDomain::Items => "repo",
        _ => "item.repo",
    };
    add_constraint(
        &mut query,
        Criteria::ne(repo_field, config.trash_repo.as_str()),
    );
    tracing::trace!(repo = %config.trash_repo, "decorator: excluded trash repository");
    query
}

fn hide_protected_properties(mut query: AqlQuery, config: &EngineConfig) -> AqlQuery {
    if query.domain != AqlDomain::Properties || config.hidden_properties.is_empty() {
        return query;
    }
    for key in &config.hidden_properties {
        add_constraint(&mut query, Criteria::ne("key", key.as_str()));
    }
    tracing::trace!(
        hidden = config.hidden_properties.len(),
        "decorator: hid protected property keys"
    );
    query
}

fn clamp_limit(mut query: AqlQuery, config: &EngineConfig) -> AqlQuery {
    query.limit = Some(match query.limit {
        None => config.max_limit,
        Some(requested) => requested.min(config.max_limit),
    });
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AqlQueryBuilder, AqlValue, ComparatorOp};

    fn config() -> EngineConfig {
        EngineConfig {
            hidden_properties: vec!["security.token".to_string()],
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_trash_constraint_added_for_items() {
        let query = AqlQueryBuilder::new(AqlDomain::Items)
            .criteria(Criteria::eq("repo", "repo1"))
            .build();
        let decorated = decorate(query, &config());
        match decorated.criteria.unwrap() {
            Criteria::And(children) => {
                assert_eq!(children[0], Criteria::eq("repo", "repo1"));
                assert_eq!(children[1], Criteria::ne("repo", "auto-trashcan"));
            }
            other => panic!("expected And, got {:?}", other),
        }
    }

    #[test]
    fn test_trash_constraint_uses_item_repo_for_aux_domains() {
        let query = AqlQueryBuilder::new(AqlDomain::Statistics).build();
        let decorated = decorate(query, &config());
        match decorated.criteria.unwrap() {
            Criteria::Cmp { field, op, value } => {
                assert_eq!(field, "item.repo");
                assert_eq!(op, ComparatorOp::Ne);
                assert_eq!(value, AqlValue::Str("auto-trashcan".to_string()));
            }
            other => panic!("expected Cmp, got {:?}", other),
        }
    }

    #[test]
    fn test_hidden_properties_only_touch_properties_domain() {
        let items = decorate(AqlQueryBuilder::new(AqlDomain::Items).build(), &config());
        let items_criteria = format!("{:?}", items.criteria);
        assert!(!items_criteria.contains("security.token"));

        let props = decorate(
            AqlQueryBuilder::new(AqlDomain::Properties).build(),
            &config(),
        );
        let props_criteria = format!("{:?}", props.criteria);
        assert!(props_criteria.contains("security.token"));
    }

    #[test]
    fn test_client_criteria_never_weakened() {
        let original = Criteria::or(vec![
            Criteria::eq("repo", "a"),
            Criteria::eq("repo", "b"),
        ]);
        let query = AqlQueryBuilder::new(AqlDomain::Items)
            .criteria(original.clone())
            .build();
        let decorated = decorate(query, &config());
        // The client's tree survives intact as the first AND child.
        match decorated.criteria.unwrap() {
            Criteria::And(children) => assert_eq!(children[0], original),
            other => panic!("expected And, got {:?}", other),
        }
    }

    #[test]
    fn test_limit_filled_and_capped() {
        let absent = decorate(AqlQueryBuilder::new(AqlDomain::Items).build(), &config());
        assert_eq!(absent.limit, Some(50_000));

        let oversized = decorate(
            AqlQueryBuilder::new(AqlDomain::Items).limit(9_000_000).build(),
            &config(),
        );
        assert_eq!(oversized.limit, Some(50_000));

        let zero = decorate(
            AqlQueryBuilder::new(AqlDomain::Items).limit(0).build(),
            &config(),
        );
        assert_eq!(zero.limit, Some(0));
    }

    #[test]
    fn test_decoration_is_deterministic() {
        let build = || AqlQueryBuilder::new(AqlDomain::Properties).build();
        let a = decorate(build(), &config());
        let b = decorate(build(), &config());
        assert_eq!(a, b);
    }
}
