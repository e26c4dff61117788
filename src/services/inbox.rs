//! Inbox Router (C8): computes, for a given user, the set of requests
//! currently awaiting their action (spec.md §4.8). Every query is phrased
//! so a request can appear at most once regardless of how many qualifying
//! roles the user holds on the team — Testable Property 9.

use sqlx::query_as;
use uuid::Uuid;

use crate::{domain::models::PurchaseRequest, infrastructure::db::PgPool, services::errors::EngineError};

const APPROVER_STATUSES: [&str; 2] = ["PENDING_APPROVAL", "IN_REVIEW"];

/// Requests where the user holds at least one approver role on the
/// current step and has not yet acted (APPROVE or REJECT) on that
/// `(request, step)` under that role. Excludes the finance step outright —
/// those requests belong solely to `finance_inbox` (Testable Property 9).
pub async fn approver_inbox(pool: &PgPool, user_id: Uuid) -> Result<Vec<PurchaseRequest>, EngineError> {
    let requests = query_as::<_, PurchaseRequest>(
        r#"
        SELECT DISTINCT r.id, r.requestor_user_id, r.team_id, r.purchase_type_lookup_id,
               r.status_lookup_id, r.form_template_id, r.workflow_template_id,
               r.current_template_step_id, r.vendor_name, r.vendor_account, r.subject,
               r.description, r.submitted_at, r.completed_at, r.rejection_comment, r.active,
               r.created_at, r.updated_at
        FROM purchase_requests r
        JOIN lookups status ON status.id = r.status_lookup_id
        JOIN workflow_template_steps step ON step.id = r.current_template_step_id
        JOIN workflow_template_step_approvers wtsa ON wtsa.step_id = step.id
        JOIN access_scopes scope
            ON scope.team_id = r.team_id
           AND scope.role_lookup_id = wtsa.role_lookup_id
           AND scope.user_id = $1
           AND scope.active = true
        WHERE r.active = true
          AND status.code = ANY($2)
          AND r.current_template_step_id IS NOT NULL
          AND step.is_finance_review = false
          AND NOT EXISTS (
              SELECT 1 FROM approval_history ah
              WHERE ah.request_id = r.id
                AND ah.template_step_id = r.current_template_step_id
                AND ah.approver_user_id = $1
                AND ah.role_lookup_id = wtsa.role_lookup_id
                AND ah.action IN ('APPROVE', 'REJECT')
          )
        ORDER BY r.id
        "#,
    )
    .bind(user_id)
    .bind(&APPROVER_STATUSES[..])
    .fetch_all(pool)
    .await?;
    Ok(requests)
}

/// Requests drafted or rejected by the user — theirs to edit and
/// (re)submit (spec.md §4.8).
pub async fn requestor_inbox(pool: &PgPool, user_id: Uuid) -> Result<Vec<PurchaseRequest>, EngineError> {
    let requests = query_as::<_, PurchaseRequest>(
        r#"
        SELECT r.id, r.requestor_user_id, r.team_id, r.purchase_type_lookup_id,
               r.status_lookup_id, r.form_template_id, r.workflow_template_id,
               r.current_template_step_id, r.vendor_name, r.vendor_account, r.subject,
               r.description, r.submitted_at, r.completed_at, r.rejection_comment, r.active,
               r.created_at, r.updated_at
        FROM purchase_requests r
        JOIN lookups status ON status.id = r.status_lookup_id
        WHERE r.active = true
          AND r.requestor_user_id = $1
          AND status.code IN ('DRAFT', 'REJECTED')
        ORDER BY r.updated_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(requests)
}

/// Requests in `FINANCE_REVIEW` where the user holds a role configured on
/// the pinned workflow's finance step (spec.md §4.8: "a role whose lookup
/// code configures the finance step in the pinned workflow").
pub async fn finance_inbox(pool: &PgPool, user_id: Uuid) -> Result<Vec<PurchaseRequest>, EngineError> {
    let requests = query_as::<_, PurchaseRequest>(
        r#"
        SELECT DISTINCT r.id, r.requestor_user_id, r.team_id, r.purchase_type_lookup_id,
               r.status_lookup_id, r.form_template_id, r.workflow_template_id,
               r.current_template_step_id, r.vendor_name, r.vendor_account, r.subject,
               r.description, r.submitted_at, r.completed_at, r.rejection_comment, r.active,
               r.created_at, r.updated_at
        FROM purchase_requests r
        JOIN lookups status ON status.id = r.status_lookup_id
        JOIN workflow_template_steps step
            ON step.id = r.current_template_step_id AND step.is_finance_review = true
        JOIN workflow_template_step_approvers wtsa ON wtsa.step_id = step.id
        JOIN access_scopes scope
            ON scope.team_id = r.team_id
           AND scope.role_lookup_id = wtsa.role_lookup_id
           AND scope.user_id = $1
           AND scope.active = true
        WHERE r.active = true AND status.code = 'FINANCE_REVIEW'
        ORDER BY r.id
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(requests)
}
