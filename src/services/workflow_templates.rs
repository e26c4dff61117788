//! Workflow Template Store (C3): versioned ordered step sequences. Save
//! invariants mirror the Form Template Store (C2) — contiguous step
//! orders, a single trailing finance step, non-empty approver sets per
//! step — checked with `domain::workflow` before anything is persisted.

use std::collections::HashMap;

use sqlx::query_as;
use uuid::Uuid;

use crate::{
    domain::{
        models::{WorkflowTemplate, WorkflowTemplateStep, WorkflowTemplateStepApprover},
        workflow::{validate_step_approvers, validate_step_sequence},
    },
    infrastructure::db::PgPool,
    services::errors::EngineError,
};

#[derive(Debug, Clone)]
pub struct NewStep {
    pub step_order: i32,
    pub step_name: String,
    pub is_finance_review: bool,
    pub approver_role_lookup_ids: Vec<Uuid>,
}

pub async fn create(
    pool: &PgPool,
    name: &str,
    description: Option<String>,
    steps: Vec<NewStep>,
    require_finance_review_last: bool,
) -> Result<WorkflowTemplate, EngineError> {
    let provisional: Vec<WorkflowTemplateStep> = steps
        .iter()
        .map(|s| WorkflowTemplateStep {
            id: Uuid::new_v4(),
            template_id: Uuid::nil(),
            step_order: s.step_order,
            step_name: s.step_name.clone(),
            is_finance_review: s.is_finance_review,
        })
        .collect();

    validate_step_sequence(&provisional, require_finance_review_last)
        .map_err(|e| EngineError::TemplateInvariantViolated(e.to_string()))?;

    let approver_counts: HashMap<Uuid, usize> = provisional
        .iter()
        .zip(steps.iter())
        .map(|(p, s)| (p.id, s.approver_role_lookup_ids.len()))
        .collect();
    validate_step_approvers(&provisional, |step_id| {
        approver_counts.get(&step_id).copied().unwrap_or(0)
    })
    .map_err(|e| EngineError::TemplateInvariantViolated(e.to_string()))?;

    let mut tx = pool.begin().await?;

    let next_version: i32 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(MAX(version_number), 0) + 1
        FROM workflow_templates
        WHERE name = $1
        FOR UPDATE
        "#,
    )
    .bind(name)
    .fetch_one(&mut *tx)
    .await?;

    let template = query_as::<_, WorkflowTemplate>(
        r#"
        INSERT INTO workflow_templates (id, name, version_number, active, description, created_at, updated_at)
        VALUES ($1, $2, $3, true, $4, now(), now())
        RETURNING id, name, version_number, active, description, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(next_version)
    .bind(&description)
    .fetch_one(&mut *tx)
    .await?;

    for (step, provisioned) in steps.iter().zip(provisional.iter()) {
        sqlx::query(
            r#"
            INSERT INTO workflow_template_steps (id, template_id, step_order, step_name, is_finance_review)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(provisioned.id)
        .bind(template.id)
        .bind(step.step_order)
        .bind(&step.step_name)
        .bind(step.is_finance_review)
        .execute(&mut *tx)
        .await?;

        for role_id in &step.approver_role_lookup_ids {
            sqlx::query(
                r#"
                INSERT INTO workflow_template_step_approvers (id, step_id, role_lookup_id)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(provisioned.id)
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    Ok(template)
}

pub async fn get_with_steps(
    pool: &PgPool,
    template_id: Uuid,
) -> Result<
    (
        WorkflowTemplate,
        Vec<WorkflowTemplateStep>,
        Vec<WorkflowTemplateStepApprover>,
    ),
    EngineError,
> {
    let template = query_as::<_, WorkflowTemplate>(
        r#"
        SELECT id, name, version_number, active, description, created_at, updated_at
        FROM workflow_templates
        WHERE id = $1
        "#,
    )
    .bind(template_id)
    .fetch_optional(pool)
    .await?
    .ok_or(EngineError::NotFound)?;

    let steps = query_as::<_, WorkflowTemplateStep>(
        r#"
        SELECT id, template_id, step_order, step_name, is_finance_review
        FROM workflow_template_steps
        WHERE template_id = $1
        ORDER BY step_order
        "#,
    )
    .bind(template_id)
    .fetch_all(pool)
    .await?;

    let step_ids: Vec<Uuid> = steps.iter().map(|s| s.id).collect();
    let approvers = query_as::<_, WorkflowTemplateStepApprover>(
        r#"
        SELECT id, step_id, role_lookup_id
        FROM workflow_template_step_approvers
        WHERE step_id = ANY($1)
        "#,
    )
    .bind(&step_ids)
    .fetch_all(pool)
    .await?;

    Ok((template, steps, approvers))
}

/// Clones the current version of `old_template_id` into a new, monotonically
/// numbered version, per spec.md §4.3 ("Operations mirror C2"). For each
/// step in `mutated_steps` whose `approver_role_lookup_ids` is empty, the
/// approver set is inherited from the old version's step with the same
/// `step_name` — "Clone preserves approver role sets by role lookup id". A
/// non-empty `approver_role_lookup_ids` is an explicit override and is used
/// as given.
pub async fn clone_and_bump(
    pool: &PgPool,
    old_template_id: Uuid,
    mutated_steps: Vec<NewStep>,
    require_finance_review_last: bool,
) -> Result<WorkflowTemplate, EngineError> {
    let (old_template, old_steps, old_approvers) = get_with_steps(pool, old_template_id).await?;
    let resolved_steps = inherit_approvers(&old_steps, &old_approvers, mutated_steps);
    create(
        pool,
        &old_template.name,
        old_template.description.clone(),
        resolved_steps,
        require_finance_review_last,
    )
    .await
}

/// Pure merge step behind `clone_and_bump`: fills in an empty approver set
/// on a mutated step by looking up the old step with the same name and
/// collecting its approvers' `role_lookup_id`s.
fn inherit_approvers(
    old_steps: &[WorkflowTemplateStep],
    old_approvers: &[WorkflowTemplateStepApprover],
    mutated_steps: Vec<NewStep>,
) -> Vec<NewStep> {
    mutated_steps
        .into_iter()
        .map(|mut step| {
            if step.approver_role_lookup_ids.is_empty() {
                if let Some(old_step) = old_steps.iter().find(|s| s.step_name == step.step_name) {
                    step.approver_role_lookup_ids = old_approvers
                        .iter()
                        .filter(|a| a.step_id == old_step.id)
                        .map(|a| a.role_lookup_id)
                        .collect();
                }
            }
            step
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_steps_missing_finance_review_last() {
        let provisional = vec![
            WorkflowTemplateStep {
                id: Uuid::new_v4(),
                template_id: Uuid::nil(),
                step_order: 1,
                step_name: "Manager".to_string(),
                is_finance_review: true,
            },
            WorkflowTemplateStep {
                id: Uuid::new_v4(),
                template_id: Uuid::nil(),
                step_order: 2,
                step_name: "Finance".to_string(),
                is_finance_review: false,
            },
        ];
        assert!(validate_step_sequence(&provisional, true).is_err());
    }

    #[test]
    fn inherit_approvers_fills_empty_sets_by_step_name() {
        let manager_step_id = Uuid::new_v4();
        let old_steps = vec![WorkflowTemplateStep {
            id: manager_step_id,
            template_id: Uuid::nil(),
            step_order: 1,
            step_name: "Manager".to_string(),
            is_finance_review: false,
        }];
        let manager_role = Uuid::new_v4();
        let old_approvers = vec![WorkflowTemplateStepApprover {
            id: Uuid::new_v4(),
            step_id: manager_step_id,
            role_lookup_id: manager_role,
        }];
        let mutated = vec![NewStep {
            step_order: 1,
            step_name: "Manager".to_string(),
            is_finance_review: false,
            approver_role_lookup_ids: Vec::new(),
        }];

        let resolved = inherit_approvers(&old_steps, &old_approvers, mutated);
        assert_eq!(resolved[0].approver_role_lookup_ids, vec![manager_role]);
    }

    #[test]
    fn inherit_approvers_respects_explicit_override() {
        let manager_step_id = Uuid::new_v4();
        let old_steps = vec![WorkflowTemplateStep {
            id: manager_step_id,
            template_id: Uuid::nil(),
            step_order: 1,
            step_name: "Manager".to_string(),
            is_finance_review: false,
        }];
        let old_approvers = vec![WorkflowTemplateStepApprover {
            id: Uuid::new_v4(),
            step_id: manager_step_id,
            role_lookup_id: Uuid::new_v4(),
        }];
        let override_role = Uuid::new_v4();
        let mutated = vec![NewStep {
            step_order: 1,
            step_name: "Manager".to_string(),
            is_finance_review: false,
            approver_role_lookup_ids: vec![override_role],
        }];

        let resolved = inherit_approvers(&old_steps, &old_approvers, mutated);
        assert_eq!(resolved[0].approver_role_lookup_ids, vec![override_role]);
    }
}
