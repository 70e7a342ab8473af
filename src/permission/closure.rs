//! Group subtree closure
//!
//! Collects every group reachable from a starting group through child links,
//! together with the users directly in any of them.

use std::collections::HashSet;

use sea_orm::ConnectionTrait;
use serde::Serialize;

use super::AuthzResult;
use crate::repository;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupClosure {
    pub user_ids: Vec<String>,
    pub group_ids: Vec<String>,
}

/// Close over the subtree rooted at `group_id`.
///
/// Groups come out in pre-order with siblings oldest first; users in the
/// order their groups are visited. Both lists are free of duplicates, and a
/// cycle in the parent links is visited once.
pub async fn close_group<C: ConnectionTrait>(
    db: &C,
    tenant_id: &str,
    group_id: &str,
) -> AuthzResult<GroupClosure> {
    repository::find_group(db, tenant_id, group_id).await?;

    let mut closure = GroupClosure::default();
    let mut seen_groups = HashSet::new();
    let mut seen_users = HashSet::new();
    let mut pending = vec![group_id.to_string()];

    while let Some(current) = pending.pop() {
        if !seen_groups.insert(current.clone()) {
            continue;
        }

        for user_id in repository::find_group_member_ids(db, tenant_id, &current).await? {
            if seen_users.insert(user_id.clone()) {
                closure.user_ids.push(user_id);
            }
        }

        let children = repository::find_child_groups(db, tenant_id, &current).await?;
        pending.extend(
            children
                .into_iter()
                .rev()
                .map(|child| child.id)
                .filter(|id| !seen_groups.contains(id)),
        );

        closure.group_ids.push(current);
    }

    Ok(closure)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::entity::{group, user, user_group};
    use crate::permission::AuthzError;
    use chrono::{Duration, Utc};
    use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};

    pub(crate) async fn insert_group(
        db: &DatabaseConnection,
        tenant_id: &str,
        id: &str,
        parent: Option<&str>,
        age: i64,
    ) {
        let created = Utc::now() - Duration::seconds(1000 - age);
        group::ActiveModel {
            id: Set(id.to_string()),
            tenant_id: Set(tenant_id.to_string()),
            parent_group_id: Set(parent.map(str::to_string)),
            display_name: Set(id.to_string()),
            enabled: Set(true),
            created_at: Set(created),
            updated_at: Set(created),
        }
        .insert(db)
        .await
        .unwrap();
    }

    pub(crate) async fn insert_user(db: &DatabaseConnection, tenant_id: &str, id: &str, groups: &[&str]) {
        let now = Utc::now();
        user::ActiveModel {
            id: Set(id.to_string()),
            tenant_id: Set(tenant_id.to_string()),
            username: Set(id.to_string()),
            display_name: Set(id.to_string()),
            email: Set(format!("{}@example.com", id)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .unwrap();

        for group_id in groups {
            user_group::ActiveModel {
                user_id: Set(id.to_string()),
                group_id: Set(group_id.to_string()),
                tenant_id: Set(tenant_id.to_string()),
            }
            .insert(db)
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn test_closure_walks_subtree() {
        let (_dir, db) = crate::db::tests::sqlite_db().await;
        insert_group(&db, "t1", "root", None, 1).await;
        insert_group(&db, "t1", "eng", Some("root"), 2).await;
        insert_group(&db, "t1", "ops", Some("root"), 3).await;
        insert_group(&db, "t1", "backend", Some("eng"), 4).await;
        insert_group(&db, "t1", "other", None, 5).await;

        insert_user(&db, "t1", "alice", &["root"]).await;
        insert_user(&db, "t1", "bob", &["backend", "ops"]).await;
        insert_user(&db, "t1", "carol", &["ops"]).await;
        insert_user(&db, "t1", "dave", &["other"]).await;

        let closure = close_group(&db, "t1", "root").await.unwrap();
        assert_eq!(closure.group_ids, vec!["root", "eng", "backend", "ops"]);
        assert_eq!(closure.user_ids, vec!["alice", "bob", "carol"]);

        let leaf = close_group(&db, "t1", "backend").await.unwrap();
        assert_eq!(leaf.group_ids, vec!["backend"]);
        assert_eq!(leaf.user_ids, vec!["bob"]);
    }

    #[tokio::test]
    async fn test_closure_missing_group() {
        let (_dir, db) = crate::db::tests::sqlite_db().await;
        let err = close_group(&db, "t1", "ghost").await.unwrap_err();
        assert!(matches!(err, AuthzError::NotFound { kind: "group", .. }));
    }

    #[tokio::test]
    async fn test_closure_is_tenant_scoped() {
        let (_dir, db) = crate::db::tests::sqlite_db().await;
        insert_group(&db, "t1", "root", None, 1).await;
        insert_group(&db, "t2", "child", Some("root"), 2).await;

        let closure = close_group(&db, "t1", "root").await.unwrap();
        assert_eq!(closure.group_ids, vec!["root"]);
        assert!(matches!(
            close_group(&db, "t2", "root").await,
            Err(AuthzError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_closure_survives_cycles() {
        let (_dir, db) = crate::db::tests::sqlite_db().await;
        insert_group(&db, "t1", "a", Some("b"), 1).await;
        insert_group(&db, "t1", "b", Some("a"), 2).await;
        insert_user(&db, "t1", "u1", &["a", "b"]).await;

        let closure = close_group(&db, "t1", "a").await.unwrap();
        assert_eq!(closure.group_ids, vec!["a", "b"]);
        assert_eq!(closure.user_ids, vec!["u1"]);
    }
}
