//! Access Scope Directory (C5): per-user, per-team, per-role assignments
//! used for authorization and inbox routing (spec.md §4.5).

use std::collections::HashSet;

use sqlx::query_scalar;
use uuid::Uuid;

use crate::infrastructure::db::PgPool;

pub async fn roles_of(
    pool: &PgPool,
    user_id: Uuid,
    team_id: Uuid,
) -> Result<HashSet<Uuid>, sqlx::Error> {
    let roles: Vec<Uuid> = query_scalar(
        r#"
        SELECT role_lookup_id
        FROM access_scopes
        WHERE user_id = $1 AND team_id = $2 AND active = true
        "#,
    )
    .bind(user_id)
    .bind(team_id)
    .fetch_all(pool)
    .await?;

    Ok(roles.into_iter().collect())
}

pub async fn users_with_role(
    pool: &PgPool,
    team_id: Uuid,
    role_lookup_id: Uuid,
) -> Result<HashSet<Uuid>, sqlx::Error> {
    let users: Vec<Uuid> = query_scalar(
        r#"
        SELECT user_id
        FROM access_scopes
        WHERE team_id = $1 AND role_lookup_id = $2 AND active = true
        "#,
    )
    .bind(team_id)
    .bind(role_lookup_id)
    .fetch_all(pool)
    .await?;

    Ok(users.into_iter().collect())
}
