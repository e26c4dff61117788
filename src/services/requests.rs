//! Request Lifecycle Engine (C7) — the core of the core (spec.md §4.7).
//!
//! Every operation here runs inside a single transaction with a row-level
//! write lock (`SELECT ... FOR UPDATE`) on the target `PurchaseRequest`,
//! acquired before any state-dependent read, per spec.md §5. The pure
//! decision logic (step advancement, tallying) lives in
//! `domain::workflow`; this module owns persistence, authorization, and
//! the audit trail each transition appends to.

use std::{
    collections::HashSet,
    future::Future,
    time::Duration,
};

use chrono::Utc;
use serde::Deserialize;
use sqlx::{query_as, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    domain::{
        models::{
            AttachmentCategory, AuditEventType, FieldValueInput, FormField, PurchaseRequest,
            RequestFieldValue, RequestStatus, WorkflowTemplateStep,
        },
        validation::{validate_submission, ValidationOutcome},
        workflow::{advance_past_step, evaluate_step, Advance},
    },
    infrastructure::{config::WorkflowConfig, db::PgPool},
    services::{audit, errors::EngineError, lookups::LookupRegistry},
};

#[derive(Debug, Clone, Deserialize)]
pub struct NewRequestHeader {
    pub vendor_name: String,
    pub vendor_account: String,
    pub subject: String,
    pub description: String,
}

/// Retries the body up to 3 times when it surfaces `ConcurrentUpdate`
/// (lock contention escalated from a serialization failure), per spec.md
/// §7: "the only error the engine may retry internally". Every other
/// error, and the final exhausted attempt, propagates as-is.
async fn with_concurrency_retry<F, Fut, T>(mut attempt: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut tries = 0u32;
    loop {
        match attempt().await {
            Err(EngineError::ConcurrentUpdate) if tries < 3 => {
                tries += 1;
                tokio::time::sleep(Duration::from_millis(20 * tries as u64)).await;
            }
            other => return other,
        }
    }
}

async fn fetch_for_update(
    tx: &mut Transaction<'_, Postgres>,
    request_id: Uuid,
) -> Result<PurchaseRequest, EngineError> {
    query_as::<_, PurchaseRequest>(
        r#"
        SELECT id, requestor_user_id, team_id, purchase_type_lookup_id, status_lookup_id,
               form_template_id, workflow_template_id, current_template_step_id, vendor_name,
               vendor_account, subject, description, submitted_at, completed_at,
               rejection_comment, active, created_at, updated_at
        FROM purchase_requests
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(request_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(EngineError::NotFound)
}

async fn fetch_ordered_steps(
    tx: &mut Transaction<'_, Postgres>,
    workflow_template_id: Uuid,
) -> Result<Vec<WorkflowTemplateStep>, EngineError> {
    let steps = query_as::<_, WorkflowTemplateStep>(
        r#"
        SELECT id, template_id, step_order, step_name, is_finance_review
        FROM workflow_template_steps
        WHERE template_id = $1
        ORDER BY step_order
        "#,
    )
    .bind(workflow_template_id)
    .fetch_all(&mut **tx)
    .await?;
    Ok(steps)
}

async fn fetch_step_approver_roles(
    tx: &mut Transaction<'_, Postgres>,
    step_id: Uuid,
) -> Result<HashSet<Uuid>, EngineError> {
    let roles: Vec<Uuid> = sqlx::query_scalar(
        "SELECT role_lookup_id FROM workflow_template_step_approvers WHERE step_id = $1",
    )
    .bind(step_id)
    .fetch_all(&mut **tx)
    .await?;
    Ok(roles.into_iter().collect())
}

async fn fetch_actor_roles(
    tx: &mut Transaction<'_, Postgres>,
    actor: Uuid,
    team_id: Uuid,
) -> Result<HashSet<Uuid>, EngineError> {
    let roles: Vec<Uuid> = sqlx::query_scalar(
        "SELECT role_lookup_id FROM access_scopes WHERE user_id = $1 AND team_id = $2 AND active = true",
    )
    .bind(actor)
    .bind(team_id)
    .fetch_all(&mut **tx)
    .await?;
    Ok(roles.into_iter().collect())
}

async fn fetch_approved_roles(
    tx: &mut Transaction<'_, Postgres>,
    request_id: Uuid,
    step_id: Uuid,
) -> Result<HashSet<Uuid>, EngineError> {
    let roles: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT role_lookup_id FROM approval_history
        WHERE request_id = $1 AND template_step_id = $2 AND action = 'APPROVE'
        "#,
    )
    .bind(request_id)
    .bind(step_id)
    .fetch_all(&mut **tx)
    .await?;
    Ok(roles.into_iter().collect())
}

async fn set_status(
    tx: &mut Transaction<'_, Postgres>,
    lookups: &LookupRegistry,
    pool: &PgPool,
    request_id: Uuid,
    status: RequestStatus,
) -> Result<Uuid, EngineError> {
    let status_lookup = lookups.resolve(pool, "REQUEST_STATUS", status.code()).await?;
    sqlx::query("UPDATE purchase_requests SET status_lookup_id = $1, updated_at = now() WHERE id = $2")
        .bind(status_lookup.id)
        .bind(request_id)
        .execute(&mut **tx)
        .await?;
    Ok(status_lookup.id)
}

async fn status_code_of(
    lookups: &LookupRegistry,
    pool: &PgPool,
    request: &PurchaseRequest,
) -> Result<RequestStatus, EngineError> {
    let lookup = lookups.resolve_by_id(pool, request.status_lookup_id).await?;
    lookup
        .code
        .parse::<RequestStatus>()
        .map_err(EngineError::Internal)
}

/// `draft.create`: resolves the active `(form_tpl, wf_tpl)` config for the
/// team + purchase type and pins both onto a new `DRAFT` request (spec.md
/// §4.7). Template resolution happens exactly once, here; nothing else in
/// this module ever re-resolves the config for an existing request.
pub async fn draft_create(
    pool: &PgPool,
    lookups: &LookupRegistry,
    requestor: Uuid,
    team_id: Uuid,
    purchase_type_code: &str,
    header: NewRequestHeader,
) -> Result<PurchaseRequest, EngineError> {
    let purchase_type = lookups.resolve(pool, "PURCHASE_TYPE", purchase_type_code).await?;
    let (form_tpl, wf_tpl) =
        crate::services::team_config::resolve_active(pool, team_id, purchase_type.id).await?;
    let draft_status = lookups.resolve(pool, "REQUEST_STATUS", RequestStatus::Draft.code()).await?;

    let mut tx = pool.begin().await?;
    let request_id = Uuid::new_v4();
    let request = query_as::<_, PurchaseRequest>(
        r#"
        INSERT INTO purchase_requests
            (id, requestor_user_id, team_id, purchase_type_lookup_id, status_lookup_id,
             form_template_id, workflow_template_id, current_template_step_id, vendor_name,
             vendor_account, subject, description, active, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, NULL, $8, $9, $10, $11, true, now(), now())
        RETURNING id, requestor_user_id, team_id, purchase_type_lookup_id, status_lookup_id,
                  form_template_id, workflow_template_id, current_template_step_id, vendor_name,
                  vendor_account, subject, description, submitted_at, completed_at,
                  rejection_comment, active, created_at, updated_at
        "#,
    )
    .bind(request_id)
    .bind(requestor)
    .bind(team_id)
    .bind(purchase_type.id)
    .bind(draft_status.id)
    .bind(form_tpl.id)
    .bind(wf_tpl.id)
    .bind(&header.vendor_name)
    .bind(&header.vendor_account)
    .bind(&header.subject)
    .bind(&header.description)
    .fetch_one(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        AuditEventType::RequestCreated,
        Some(requestor),
        Some(request.id),
        None,
        serde_json::json!({
            "form_template_id": form_tpl.id,
            "form_template_version": form_tpl.version_number,
            "workflow_template_id": wf_tpl.id,
            "workflow_template_version": wf_tpl.version_number,
        }),
    )
    .await?;

    tx.commit().await?;
    Ok(request)
}

/// `draft.update_field`: allowed only while the request is owned by the
/// requestor (`DRAFT` or `REJECTED`, spec.md §3 "Lifecycle ownership").
/// Stores into the typed slot matching the field's declared type and
/// emits `FIELD_UPDATE` with the old and new values.
pub async fn set_field(
    pool: &PgPool,
    lookups: &LookupRegistry,
    request_id: Uuid,
    actor: Uuid,
    field: &FormField,
    value: FieldValueInput,
) -> Result<(), EngineError> {
    let mut tx = pool.begin().await?;
    let request = fetch_for_update(&mut tx, request_id).await?;

    if request.requestor_user_id != actor {
        return Err(EngineError::PermissionDenied);
    }

    let status = status_code_of(lookups, pool, &request).await?;
    if !matches!(status, RequestStatus::Draft | RequestStatus::Rejected) {
        return Err(EngineError::InvalidTransition);
    }

    let existing = query_as::<_, RequestFieldValue>(
        "SELECT id, request_id, field_id, value_text, value_number, value_bool, value_date, value_dropdown \
         FROM request_field_values WHERE request_id = $1 AND field_id = $2",
    )
    .bind(request_id)
    .bind(field.id)
    .fetch_optional(&mut *tx)
    .await?;

    let old_value = existing.as_ref().map(render_value);
    let new_value = render_input(&value);

    let (text, number, boolean, date, dropdown) = columns_for(&value);

    sqlx::query(
        r#"
        INSERT INTO request_field_values
            (id, request_id, field_id, value_text, value_number, value_bool, value_date, value_dropdown)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (request_id, field_id) DO UPDATE SET
            value_text = EXCLUDED.value_text,
            value_number = EXCLUDED.value_number,
            value_bool = EXCLUDED.value_bool,
            value_date = EXCLUDED.value_date,
            value_dropdown = EXCLUDED.value_dropdown
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(request_id)
    .bind(field.id)
    .bind(text)
    .bind(number)
    .bind(boolean)
    .bind(date)
    .bind(dropdown)
    .execute(&mut *tx)
    .await?;

    let event_id = audit::record(
        &mut tx,
        AuditEventType::FieldUpdate,
        Some(actor),
        Some(request_id),
        None,
        serde_json::json!({ "field_id": field.field_id }),
    )
    .await?;
    audit::record_field_change(&mut tx, event_id, Some(field.id), None, old_value, Some(new_value))
        .await?;

    tx.commit().await?;
    Ok(())
}

type ValueColumns = (
    Option<String>,
    Option<f64>,
    Option<bool>,
    Option<chrono::NaiveDate>,
    Option<String>,
);

fn columns_for(value: &FieldValueInput) -> ValueColumns {
    match value {
        FieldValueInput::Text(v) => (Some(v.clone()), None, None, None, None),
        FieldValueInput::Number(v) => (None, Some(*v), None, None, None),
        FieldValueInput::Boolean(v) => (None, None, Some(*v), None, None),
        FieldValueInput::Date(v) => (None, None, None, Some(*v), None),
        FieldValueInput::Dropdown(v) => (None, None, None, None, Some(v.clone())),
    }
}

fn render_input(value: &FieldValueInput) -> String {
    match value {
        FieldValueInput::Text(v) => v.clone(),
        FieldValueInput::Number(v) => v.to_string(),
        FieldValueInput::Boolean(v) => v.to_string(),
        FieldValueInput::Date(v) => v.to_string(),
        FieldValueInput::Dropdown(v) => v.clone(),
    }
}

fn render_value(value: &RequestFieldValue) -> String {
    if let Some(v) = &value.value_text {
        return v.clone();
    }
    if let Some(v) = value.value_number {
        return v.to_string();
    }
    if let Some(v) = value.value_bool {
        return v.to_string();
    }
    if let Some(v) = value.value_date {
        return v.to_string();
    }
    if let Some(v) = &value.value_dropdown {
        return v.clone();
    }
    String::new()
}

async fn load_validation_inputs(
    tx: &mut Transaction<'_, Postgres>,
    request: &PurchaseRequest,
) -> Result<ValidationOutcome, EngineError> {
    let fields = query_as::<_, FormField>(
        r#"
        SELECT id, template_id, field_id, label, field_type, required, "order",
               default_value, help_text, validation_rules, dropdown_options, satisfies_category
        FROM form_fields
        WHERE template_id = $1
        "#,
    )
    .bind(request.form_template_id)
    .fetch_all(&mut **tx)
    .await?;

    let values = query_as::<_, RequestFieldValue>(
        "SELECT id, request_id, field_id, value_text, value_number, value_bool, value_date, value_dropdown \
         FROM request_field_values WHERE request_id = $1",
    )
    .bind(request.id)
    .fetch_all(&mut **tx)
    .await?;

    let categories = query_as::<_, AttachmentCategory>(
        "SELECT id, team_id, name, required, active FROM attachment_categories WHERE team_id = $1",
    )
    .bind(request.team_id)
    .fetch_all(&mut **tx)
    .await?;

    let attachments = query_as::<_, crate::domain::models::Attachment>(
        r#"
        SELECT id, request_id, category_id, filename, storage_ref, file_size, mime_type,
               uploaded_by, uploaded_at, approval_history_ref
        FROM attachments
        WHERE request_id = $1
        "#,
    )
    .bind(request.id)
    .fetch_all(&mut **tx)
    .await?;

    Ok(validate_submission(&fields, &values, &categories, &attachments))
}

/// `request.submit`: the first submission of a `DRAFT` request. Rejected
/// requests resubmit via `resubmit`, which resumes at the step the
/// rejection occurred at rather than resetting to step 1 — see
/// DESIGN.md's resolution of spec.md §9's `current_step` open question.
pub async fn submit(
    pool: &PgPool,
    lookups: &LookupRegistry,
    request_id: Uuid,
    actor: Uuid,
) -> Result<PurchaseRequest, EngineError> {
    with_concurrency_retry(|| async {
        let mut tx = pool.begin().await?;
        let request = fetch_for_update(&mut tx, request_id).await?;

        if request.requestor_user_id != actor {
            return Err(EngineError::PermissionDenied);
        }

        let status = status_code_of(lookups, pool, &request).await?;
        if status != RequestStatus::Draft {
            return Err(EngineError::InvalidTransition);
        }

        let outcome = load_validation_inputs(&mut tx, &request).await?;
        if !outcome.is_valid() {
            return Err(EngineError::ValidationFailed(outcome));
        }

        let steps = fetch_ordered_steps(&mut tx, request.workflow_template_id).await?;
        let first_step = steps
            .iter()
            .find(|s| s.step_order == 1)
            .ok_or_else(|| EngineError::Internal("workflow template has no first step".into()))?;

        sqlx::query(
            "UPDATE purchase_requests SET current_template_step_id = $1, submitted_at = now(), updated_at = now() WHERE id = $2",
        )
        .bind(first_step.id)
        .bind(request.id)
        .execute(&mut *tx)
        .await?;
        set_status(&mut tx, lookups, pool, request.id, RequestStatus::PendingApproval).await?;

        audit::record(
            &mut tx,
            AuditEventType::RequestSubmitted,
            Some(actor),
            Some(request.id),
            None,
            serde_json::json!({}),
        )
        .await?;
        audit::record(
            &mut tx,
            AuditEventType::WorkflowStepChange,
            Some(actor),
            Some(request.id),
            None,
            serde_json::json!({ "to_step": first_step.step_name, "to_step_order": first_step.step_order }),
        )
        .await?;

        let updated = fetch_for_update(&mut tx, request.id).await?;
        tx.commit().await?;
        Ok(updated)
    })
    .await
}

struct StepAuthorization {
    role_lookup_id: Uuid,
    step: WorkflowTemplateStep,
}

async fn authorize_step_action(
    tx: &mut Transaction<'_, Postgres>,
    lookups: &LookupRegistry,
    pool: &PgPool,
    request: &PurchaseRequest,
    actor: Uuid,
    role_code: &str,
    allowed_statuses: &[RequestStatus],
) -> Result<StepAuthorization, EngineError> {
    let status = status_code_of(lookups, pool, request).await?;
    if !allowed_statuses.contains(&status) {
        return Err(EngineError::InvalidTransition);
    }

    let current_step_id = request.current_template_step_id.ok_or(EngineError::InvalidTransition)?;
    let steps = fetch_ordered_steps(tx, request.workflow_template_id).await?;
    let step = steps
        .into_iter()
        .find(|s| s.id == current_step_id)
        .ok_or_else(|| EngineError::Internal("current step not found in pinned workflow".into()))?;

    let role_lookup = lookups.resolve(pool, "COMPANY_ROLE", role_code).await?;
    let step_approvers = fetch_step_approver_roles(tx, step.id).await?;
    if !step_approvers.contains(&role_lookup.id) {
        return Err(EngineError::PermissionDenied);
    }

    let actor_roles = fetch_actor_roles(tx, actor, request.team_id).await?;
    if !actor_roles.contains(&role_lookup.id) {
        return Err(EngineError::PermissionDenied);
    }

    Ok(StepAuthorization {
        role_lookup_id: role_lookup.id,
        step,
    })
}

const ACTIVE_STEP_STATUSES: [RequestStatus; 3] = [
    RequestStatus::PendingApproval,
    RequestStatus::InReview,
    RequestStatus::FinanceReview,
];

/// `request.approve`: records an `APPROVE` decision, aggregates the
/// step's remaining roles, and advances the request when every required
/// role has acted (spec.md §4.7, Testable Property 7).
pub async fn approve(
    pool: &PgPool,
    lookups: &LookupRegistry,
    request_id: Uuid,
    actor: Uuid,
    role_code: &str,
    comment: Option<String>,
) -> Result<PurchaseRequest, EngineError> {
    with_concurrency_retry(|| {
        let comment = comment.clone();
        async {
            let mut tx = pool.begin().await?;
            let request = fetch_for_update(&mut tx, request_id).await?;

            let auth = authorize_step_action(
                &mut tx,
                lookups,
                pool,
                &request,
                actor,
                role_code,
                &ACTIVE_STEP_STATUSES,
            )
            .await?;

            let already_acted: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM approval_history
                    WHERE request_id = $1 AND template_step_id = $2 AND approver_user_id = $3 AND action = 'APPROVE'
                )
                "#,
            )
            .bind(request.id)
            .bind(auth.step.id)
            .bind(actor)
            .fetch_one(&mut *tx)
            .await?;
            if already_acted {
                return Err(EngineError::AlreadyActed);
            }

            sqlx::query(
                r#"
                INSERT INTO approval_history
                    (id, request_id, template_step_id, approver_user_id, role_lookup_id, action, comment, timestamp)
                VALUES ($1, $2, $3, $4, $5, 'APPROVE', $6, now())
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(request.id)
            .bind(auth.step.id)
            .bind(actor)
            .bind(auth.role_lookup_id)
            .bind(&comment)
            .execute(&mut *tx)
            .await?;

            audit::record(
                &mut tx,
                AuditEventType::Approval,
                Some(actor),
                Some(request.id),
                None,
                serde_json::json!({ "step": auth.step.step_name, "role_lookup_id": auth.role_lookup_id }),
            )
            .await?;

            let required_roles = fetch_step_approver_roles(&mut tx, auth.step.id).await?;
            let approved_roles = fetch_approved_roles(&mut tx, request.id, auth.step.id).await?;
            let tally = evaluate_step(&required_roles, &approved_roles);

            if !tally.step_complete {
                set_status(&mut tx, lookups, pool, request.id, RequestStatus::InReview).await?;
            } else {
                let steps = fetch_ordered_steps(&mut tx, request.workflow_template_id).await?;
                match advance_past_step(&auth.step, &steps) {
                    Advance::Completed => {
                        sqlx::query(
                            "UPDATE purchase_requests SET completed_at = now(), updated_at = now() WHERE id = $1",
                        )
                        .bind(request.id)
                        .execute(&mut *tx)
                        .await?;
                        set_status(&mut tx, lookups, pool, request.id, RequestStatus::Completed).await?;
                        audit::record(
                            &mut tx,
                            AuditEventType::RequestCompleted,
                            Some(actor),
                            Some(request.id),
                            None,
                            serde_json::json!({}),
                        )
                        .await?;
                    }
                    Advance::MovedToStep { next_step_id, next_status } => {
                        sqlx::query(
                            "UPDATE purchase_requests SET current_template_step_id = $1, updated_at = now() WHERE id = $2",
                        )
                        .bind(next_step_id)
                        .bind(request.id)
                        .execute(&mut *tx)
                        .await?;
                        set_status(&mut tx, lookups, pool, request.id, next_status).await?;

                        let mut metadata = serde_json::json!({ "to_step_id": next_step_id });
                        if next_status == RequestStatus::FinanceReview {
                            // Open Question 2 (spec.md §9): FULLY_APPROVED is
                            // coalesced into FINANCE_REVIEW and surfaces only
                            // as this audit metadata tag, never as a durable
                            // status — see DESIGN.md.
                            metadata["fully_approved"] = serde_json::json!(true);
                        }
                        audit::record(
                            &mut tx,
                            AuditEventType::WorkflowStepChange,
                            Some(actor),
                            Some(request.id),
                            None,
                            metadata,
                        )
                        .await?;
                    }
                }
            }

            let updated = fetch_for_update(&mut tx, request.id).await?;
            tx.commit().await?;
            Ok(updated)
        }
    })
    .await
}

/// `request.reject`: ends the current step and the request's forward
/// progress, requiring a comment of at least
/// `config.rejection_min_comment_chars` characters (spec.md §4.7).
pub async fn reject(
    pool: &PgPool,
    lookups: &LookupRegistry,
    config: &WorkflowConfig,
    request_id: Uuid,
    actor: Uuid,
    role_code: &str,
    comment: String,
) -> Result<PurchaseRequest, EngineError> {
    if comment.trim().chars().count() < config.rejection_min_comment_chars {
        return Err(EngineError::RejectionCommentRequired {
            min_chars: config.rejection_min_comment_chars,
        });
    }

    with_concurrency_retry(|| {
        let comment = comment.clone();
        async {
            let mut tx = pool.begin().await?;
            let request = fetch_for_update(&mut tx, request_id).await?;

            let auth = authorize_step_action(
                &mut tx,
                lookups,
                pool,
                &request,
                actor,
                role_code,
                &ACTIVE_STEP_STATUSES,
            )
            .await?;

            sqlx::query(
                r#"
                INSERT INTO approval_history
                    (id, request_id, template_step_id, approver_user_id, role_lookup_id, action, comment, timestamp)
                VALUES ($1, $2, $3, $4, $5, 'REJECT', $6, now())
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(request.id)
            .bind(auth.step.id)
            .bind(actor)
            .bind(auth.role_lookup_id)
            .bind(&comment)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE purchase_requests SET rejection_comment = $1, updated_at = now() WHERE id = $2",
            )
            .bind(&comment)
            .bind(request.id)
            .execute(&mut *tx)
            .await?;
            set_status(&mut tx, lookups, pool, request.id, RequestStatus::Rejected).await?;

            audit::record(
                &mut tx,
                AuditEventType::Rejection,
                Some(actor),
                Some(request.id),
                None,
                serde_json::json!({ "step": auth.step.step_name, "comment": comment }),
            )
            .await?;

            let updated = fetch_for_update(&mut tx, request.id).await?;
            tx.commit().await?;
            Ok(updated)
        }
    })
    .await
}

/// `request.resubmit`: re-runs the submission validator against the
/// pinned templates and, on success, resumes the pipeline at the step
/// where the rejection occurred (Testable Property 8) rather than
/// resetting to step 1.
pub async fn resubmit(
    pool: &PgPool,
    lookups: &LookupRegistry,
    request_id: Uuid,
    actor: Uuid,
) -> Result<PurchaseRequest, EngineError> {
    with_concurrency_retry(|| async {
        let mut tx = pool.begin().await?;
        let request = fetch_for_update(&mut tx, request_id).await?;

        if request.requestor_user_id != actor {
            return Err(EngineError::PermissionDenied);
        }

        let status = status_code_of(lookups, pool, &request).await?;
        if status != RequestStatus::Rejected {
            return Err(EngineError::InvalidTransition);
        }

        let outcome = load_validation_inputs(&mut tx, &request).await?;
        if !outcome.is_valid() {
            return Err(EngineError::ValidationFailed(outcome));
        }

        // RESUBMITTED is never persisted as a durable status, matching the
        // FULLY_APPROVED coalescing precedent (DESIGN.md); the audit event
        // alone carries the transient marker.
        set_status(&mut tx, lookups, pool, request.id, RequestStatus::PendingApproval).await?;

        audit::record(
            &mut tx,
            AuditEventType::Resubmission,
            Some(actor),
            Some(request.id),
            None,
            serde_json::json!({ "coalesced_status": "RESUBMITTED" }),
        )
        .await?;

        let updated = fetch_for_update(&mut tx, request.id).await?;
        tx.commit().await?;
        Ok(updated)
    })
    .await
}

/// `draft.upload_attachment`: allowed in any non-terminal state (spec.md
/// §4.7). Delegates the blob write and row insert to `services::attachments`
/// and wraps it with the audit event the lifecycle engine owns.
pub async fn upload_attachment(
    pool: &PgPool,
    lookups: &LookupRegistry,
    storage: &dyn crate::infrastructure::storage::StorageBackend,
    attachment_config: &crate::infrastructure::config::AttachmentConfig,
    request_id: Uuid,
    actor: Uuid,
    category: Option<AttachmentCategory>,
    new: crate::services::attachments::NewAttachment,
) -> Result<crate::domain::models::Attachment, EngineError> {
    let mut tx = pool.begin().await?;
    let request = fetch_for_update(&mut tx, request_id).await?;

    let status = status_code_of(lookups, pool, &request).await?;
    if status.is_terminal() {
        return Err(EngineError::InvalidTransition);
    }

    let attachment = crate::services::attachments::attach(
        &mut tx,
        storage,
        attachment_config,
        request.id,
        request.team_id,
        category.as_ref(),
        new,
    )
    .await?;

    audit::record(
        &mut tx,
        AuditEventType::AttachmentUpload,
        Some(actor),
        Some(request.id),
        None,
        serde_json::json!({ "attachment_id": attachment.id, "filename": attachment.filename }),
    )
    .await?;

    tx.commit().await?;
    Ok(attachment)
}

/// Returns the pinned step a request is currently at. A `None`
/// `current_template_step_id` means the request predates the template
/// path (or is still a `DRAFT`); per the resolution of spec.md §9's open
/// question, this reimplementation supports only the template path, so
/// the legacy fallback is a documented no-op rather than a second code
/// path to maintain.
pub async fn get_current_step(
    pool: &PgPool,
    request: &PurchaseRequest,
) -> Result<Option<WorkflowTemplateStep>, EngineError> {
    let Some(step_id) = request.current_template_step_id else {
        return Ok(legacy_step_fallback(request));
    };

    let step = query_as::<_, WorkflowTemplateStep>(
        "SELECT id, template_id, step_order, step_name, is_finance_review FROM workflow_template_steps WHERE id = $1",
    )
    .bind(step_id)
    .fetch_optional(pool)
    .await?;
    Ok(step)
}

fn legacy_step_fallback(_request: &PurchaseRequest) -> Option<WorkflowTemplateStep> {
    None
}

/// Plain (non-locking) fetch used by read paths — REST handlers, the
/// inbox router's detail views — that don't need the write lock a
/// transition acquires.
pub async fn get(pool: &PgPool, request_id: Uuid) -> Result<PurchaseRequest, EngineError> {
    query_as::<_, PurchaseRequest>(
        r#"
        SELECT id, requestor_user_id, team_id, purchase_type_lookup_id, status_lookup_id,
               form_template_id, workflow_template_id, current_template_step_id, vendor_name,
               vendor_account, subject, description, submitted_at, completed_at,
               rejection_comment, active, created_at, updated_at
        FROM purchase_requests
        WHERE id = $1
        "#,
    )
    .bind(request_id)
    .fetch_optional(pool)
    .await?
    .ok_or(EngineError::NotFound)
}
