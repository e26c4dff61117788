//! Team Purchase Config (C4): resolves which form/workflow template
//! versions apply for a team + purchase type, and enforces that at most
//! one config row is active per `(team, purchase_type)` pair (spec.md
//! §4.4, Testable Property 4).

use sqlx::query_as;
use uuid::Uuid;

use crate::{
    domain::models::{FormTemplate, TeamPurchaseConfig, WorkflowTemplate},
    infrastructure::db::PgPool,
    services::errors::EngineError,
};

pub async fn resolve_active(
    pool: &PgPool,
    team_id: Uuid,
    purchase_type_lookup_id: Uuid,
) -> Result<(FormTemplate, WorkflowTemplate), EngineError> {
    let config = query_as::<_, TeamPurchaseConfig>(
        r#"
        SELECT id, team_id, purchase_type_lookup_id, form_template_id, workflow_template_id, active
        FROM team_purchase_configs
        WHERE team_id = $1 AND purchase_type_lookup_id = $2 AND active = true
        "#,
    )
    .bind(team_id)
    .bind(purchase_type_lookup_id)
    .fetch_optional(pool)
    .await?
    .ok_or(EngineError::ConfigurationMissing)?;

    let form_template = query_as::<_, FormTemplate>(
        r#"
        SELECT id, name, version_number, active, created_by, created_at, updated_at
        FROM form_templates
        WHERE id = $1
        "#,
    )
    .bind(config.form_template_id)
    .fetch_one(pool)
    .await?;

    let workflow_template = query_as::<_, WorkflowTemplate>(
        r#"
        SELECT id, name, version_number, active, description, created_at, updated_at
        FROM workflow_templates
        WHERE id = $1
        "#,
    )
    .bind(config.workflow_template_id)
    .fetch_one(pool)
    .await?;

    Ok((form_template, workflow_template))
}

/// Activates a new config row for `(team, purchase_type)`, deactivating
/// any prior active row in the same transaction so the at-most-one
/// invariant never has a window where two rows are simultaneously active.
pub async fn activate(
    pool: &PgPool,
    team_id: Uuid,
    purchase_type_lookup_id: Uuid,
    form_template_id: Uuid,
    workflow_template_id: Uuid,
) -> Result<TeamPurchaseConfig, EngineError> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE team_purchase_configs
        SET active = false
        WHERE team_id = $1 AND purchase_type_lookup_id = $2 AND active = true
        "#,
    )
    .bind(team_id)
    .bind(purchase_type_lookup_id)
    .execute(&mut *tx)
    .await?;

    let config = query_as::<_, TeamPurchaseConfig>(
        r#"
        INSERT INTO team_purchase_configs
            (id, team_id, purchase_type_lookup_id, form_template_id, workflow_template_id, active)
        VALUES ($1, $2, $3, $4, $5, true)
        RETURNING id, team_id, purchase_type_lookup_id, form_template_id, workflow_template_id, active
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(team_id)
    .bind(purchase_type_lookup_id)
    .bind(form_template_id)
    .bind(workflow_template_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(config)
}
