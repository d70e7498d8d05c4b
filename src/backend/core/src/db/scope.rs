//! SQL translation of a [`ScopeFilter`].

use sqlx::{Postgres, QueryBuilder};

use crate::rbac::{ScopeFilter, ScopePredicate};

/// Append `filter` to a query whose WHERE clause is already open.
///
/// `Allow` appends nothing, `Deny` appends `AND FALSE`, and `AllowIf` appends
/// one parenthesized disjunction over `"author_id"`.
pub fn push_scope_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &ScopeFilter) {
    let predicates = match filter {
        ScopeFilter::Allow => return,
        ScopeFilter::AllowIf(predicates) if !predicates.is_empty() => predicates,
        ScopeFilter::Deny(_) | ScopeFilter::AllowIf(_) => {
            builder.push(" AND FALSE");
            return;
        }
    };

    builder.push(" AND (");
    for (index, predicate) in predicates.iter().enumerate() {
        if index > 0 {
            builder.push(" OR ");
        }
        match predicate {
            ScopePredicate::OwnedByAuthor(member) => {
                builder
                    .push("\"author_id\" = ")
                    .push_bind(member.as_str().to_string());
            }
            ScopePredicate::AuthoredByAnyOf(members) => {
                let ids: Vec<String> = members.iter().map(|m| m.as_str().to_string()).collect();
                builder
                    .push("\"author_id\" = ANY(")
                    .push_bind(ids)
                    .push(")");
            }
        }
    }
    builder.push(")");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::{Denial, MemberId};

    fn base() -> QueryBuilder<'static, Postgres> {
        let mut builder = QueryBuilder::new("SELECT id FROM resource WHERE app_id = ");
        builder.push_bind(1_i64);
        builder
    }

    #[test]
    fn test_allow_appends_nothing() {
        let mut builder = base();
        push_scope_filter(&mut builder, &ScopeFilter::Allow);
        assert_eq!(builder.sql(), "SELECT id FROM resource WHERE app_id = $1");
    }

    #[test]
    fn test_deny_appends_false() {
        let mut builder = base();
        push_scope_filter(&mut builder, &ScopeFilter::Deny(Denial::Unauthenticated));
        assert_eq!(builder.sql(), "SELECT id FROM resource WHERE app_id = $1 AND FALSE");
    }

    #[test]
    fn test_predicates_become_disjunction() {
        let mut builder = base();
        let filter = ScopeFilter::AllowIf(vec![
            ScopePredicate::OwnedByAuthor(MemberId::new("alice")),
            ScopePredicate::AuthoredByAnyOf(vec![MemberId::new("bob"), MemberId::new("carol")]),
        ]);
        push_scope_filter(&mut builder, &filter);
        assert_eq!(
            builder.sql(),
            "SELECT id FROM resource WHERE app_id = $1 AND (\"author_id\" = $2 OR \"author_id\" = ANY($3))"
        );
    }

    #[test]
    fn test_empty_predicate_list_matches_nothing() {
        let mut builder = base();
        push_scope_filter(&mut builder, &ScopeFilter::AllowIf(Vec::new()));
        assert!(builder.sql().ends_with(" AND FALSE"));
    }
}
