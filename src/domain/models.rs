use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

/// Closed enumeration backing the `REQUEST_STATUS` lookup type.
///
/// Persistence keeps the generic `(type_code, code)` row per spec so new
/// statuses can in principle be registered without a migration, but the
/// engine itself only ever transitions through these nine values — see
/// `domain::workflow`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RequestStatus {
    Draft,
    PendingApproval,
    InReview,
    Rejected,
    Resubmitted,
    FullyApproved,
    FinanceReview,
    Completed,
    Archived,
}

impl RequestStatus {
    pub fn code(&self) -> &'static str {
        match self {
            RequestStatus::Draft => "DRAFT",
            RequestStatus::PendingApproval => "PENDING_APPROVAL",
            RequestStatus::InReview => "IN_REVIEW",
            RequestStatus::Rejected => "REJECTED",
            RequestStatus::Resubmitted => "RESUBMITTED",
            RequestStatus::FullyApproved => "FULLY_APPROVED",
            RequestStatus::FinanceReview => "FINANCE_REVIEW",
            RequestStatus::Completed => "COMPLETED",
            RequestStatus::Archived => "ARCHIVED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Archived)
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DRAFT" => Ok(RequestStatus::Draft),
            "PENDING_APPROVAL" => Ok(RequestStatus::PendingApproval),
            "IN_REVIEW" => Ok(RequestStatus::InReview),
            "REJECTED" => Ok(RequestStatus::Rejected),
            "RESUBMITTED" => Ok(RequestStatus::Resubmitted),
            "FULLY_APPROVED" => Ok(RequestStatus::FullyApproved),
            "FINANCE_REVIEW" => Ok(RequestStatus::FinanceReview),
            "COMPLETED" => Ok(RequestStatus::Completed),
            "ARCHIVED" => Ok(RequestStatus::Archived),
            other => Err(format!("unknown request status {other}")),
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Closed enumeration backing the `PURCHASE_TYPE` lookup type. The registry
/// (C1) may carry additional codes for UI purposes; the engine only needs to
/// tell these two apart (§3 lists them as the minimum supported set).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PurchaseType {
    Service,
    Good,
}

impl PurchaseType {
    pub fn code(&self) -> &'static str {
        match self {
            PurchaseType::Service => "SERVICE",
            PurchaseType::Good => "GOOD",
        }
    }
}

impl FromStr for PurchaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SERVICE" => Ok(PurchaseType::Service),
            "GOOD" => Ok(PurchaseType::Good),
            other => Err(format!("unknown purchase type {other}")),
        }
    }
}

impl std::fmt::Display for PurchaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// A resolved row from the Lookup Registry (C1): a coded enumeration value,
/// e.g. `(REQUEST_STATUS, PENDING_APPROVAL)` or `(COMPANY_ROLE, MANAGER)`.
/// Roles are team-neutral codes; which team a role applies on is asserted by
/// `AccessScope`, not by the lookup row itself.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Lookup {
    pub id: Uuid,
    pub type_code: String,
    pub code: String,
    pub title: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Globally versioned, team-agnostic form definition. `(name, version_number)`
/// is unique; a template referenced by any `PurchaseRequest` is never mutated
/// in place — see `services::form_templates::clone_and_bump`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FormTemplate {
    pub id: Uuid,
    pub name: String,
    pub version_number: i32,
    pub active: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Number,
    Date,
    Boolean,
    Dropdown,
    FileUpload,
}

impl FieldType {
    pub fn code(&self) -> &'static str {
        match self {
            FieldType::Text => "TEXT",
            FieldType::Number => "NUMBER",
            FieldType::Date => "DATE",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Dropdown => "DROPDOWN",
            FieldType::FileUpload => "FILE_UPLOAD",
        }
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TEXT" => Ok(FieldType::Text),
            "NUMBER" => Ok(FieldType::Number),
            "DATE" => Ok(FieldType::Date),
            "BOOLEAN" => Ok(FieldType::Boolean),
            "DROPDOWN" => Ok(FieldType::Dropdown),
            "FILE_UPLOAD" => Ok(FieldType::FileUpload),
            other => Err(format!("unknown field type {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FormField {
    pub id: Uuid,
    pub template_id: Uuid,
    /// Stable within the template; diffed across versions by `field_id`,
    /// never by row id (field rows are recreated on clone-and-bump).
    pub field_id: String,
    pub label: String,
    pub field_type: String,
    pub required: bool,
    pub order: i32,
    pub default_value: Option<String>,
    pub help_text: Option<String>,
    pub validation_rules: serde_json::Value,
    pub dropdown_options: Option<serde_json::Value>,
    /// Explicit binding for FILE_UPLOAD fields: which `AttachmentCategory`
    /// satisfies this field on submission. See SPEC_FULL.md §B.3.
    pub satisfies_category: Option<Uuid>,
}

impl FormField {
    pub fn kind(&self) -> Result<FieldType, String> {
        FieldType::from_str(&self.field_type)
    }

    pub fn is_dropdown(&self) -> bool {
        self.field_type.eq_ignore_ascii_case("DROPDOWN")
    }
}

/// Globally versioned, team-agnostic workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowTemplate {
    pub id: Uuid,
    pub name: String,
    pub version_number: i32,
    pub active: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowTemplateStep {
    pub id: Uuid,
    pub template_id: Uuid,
    pub step_order: i32,
    pub step_name: String,
    pub is_finance_review: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowTemplateStepApprover {
    pub id: Uuid,
    pub step_id: Uuid,
    pub role_lookup_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TeamPurchaseConfig {
    pub id: Uuid,
    pub team_id: Uuid,
    pub purchase_type_lookup_id: Uuid,
    pub form_template_id: Uuid,
    pub workflow_template_id: Uuid,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AccessScope {
    pub id: Uuid,
    pub user_id: Uuid,
    pub team_id: Uuid,
    pub role_lookup_id: Uuid,
    pub active: bool,
    pub position_title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AttachmentCategory {
    pub id: Uuid,
    pub team_id: Uuid,
    pub name: String,
    pub required: bool,
    pub active: bool,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PurchaseRequest {
    pub id: Uuid,
    pub requestor_user_id: Uuid,
    pub team_id: Uuid,
    pub purchase_type_lookup_id: Uuid,
    pub status_lookup_id: Uuid,
    pub form_template_id: Uuid,
    pub workflow_template_id: Uuid,
    /// Nullable: null while in `DRAFT` (never submitted) and for legacy rows
    /// migrated without a template path — see `domain::workflow::get_current_step`.
    pub current_template_step_id: Option<Uuid>,
    pub vendor_name: String,
    pub vendor_account: String,
    pub subject: String,
    pub description: String,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub rejection_comment: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Tagged-union value for one `FormField` on one `PurchaseRequest`. Exactly
/// one of the typed columns is populated; `domain::validation` and the store
/// both enforce the single-value-column invariant (Testable Property 2).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RequestFieldValue {
    pub id: Uuid,
    pub request_id: Uuid,
    pub field_id: Uuid,
    pub value_text: Option<String>,
    pub value_number: Option<f64>,
    pub value_bool: Option<bool>,
    pub value_date: Option<chrono::NaiveDate>,
    pub value_dropdown: Option<String>,
}

impl RequestFieldValue {
    pub fn is_populated(&self) -> bool {
        self.value_text.as_deref().is_some_and(|v| !v.trim().is_empty())
            || self.value_number.is_some()
            || self.value_bool.is_some()
            || self.value_date.is_some()
            || self.value_dropdown.as_deref().is_some_and(|v| !v.trim().is_empty())
    }
}

/// A single typed value supplied by a caller for `set_field` / draft
/// creation, before it is persisted into the tagged columns above.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldValueInput {
    Text(String),
    Number(f64),
    Boolean(bool),
    Date(chrono::NaiveDate),
    Dropdown(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Attachment {
    pub id: Uuid,
    pub request_id: Uuid,
    pub category_id: Option<Uuid>,
    pub filename: String,
    pub storage_ref: String,
    pub file_size: i64,
    pub mime_type: String,
    pub uploaded_by: Uuid,
    pub uploaded_at: DateTime<Utc>,
    pub approval_history_ref: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ApprovalAction {
    Approve,
    Reject,
}

impl ApprovalAction {
    pub fn code(&self) -> &'static str {
        match self {
            ApprovalAction::Approve => "APPROVE",
            ApprovalAction::Reject => "REJECT",
        }
    }
}

impl FromStr for ApprovalAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "APPROVE" => Ok(ApprovalAction::Approve),
            "REJECT" => Ok(ApprovalAction::Reject),
            other => Err(format!("unknown approval action {other}")),
        }
    }
}

/// Append-only decision record. Never updated or deleted — see Testable
/// Property 5/6.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApprovalHistory {
    pub id: Uuid,
    pub request_id: Uuid,
    pub template_step_id: Uuid,
    pub approver_user_id: Uuid,
    pub role_lookup_id: Uuid,
    pub action: String,
    pub comment: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ApprovalHistory {
    pub fn action(&self) -> Result<ApprovalAction, String> {
        ApprovalAction::from_str(&self.action)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuditEventType {
    RequestCreated,
    RequestSubmitted,
    Approval,
    Rejection,
    Resubmission,
    WorkflowStepChange,
    RequestCompleted,
    FieldUpdate,
    AttachmentUpload,
    AttachmentRemoved,
    StatusChange,
}

impl AuditEventType {
    pub fn code(&self) -> &'static str {
        match self {
            AuditEventType::RequestCreated => "REQUEST_CREATED",
            AuditEventType::RequestSubmitted => "REQUEST_SUBMITTED",
            AuditEventType::Approval => "APPROVAL",
            AuditEventType::Rejection => "REJECTION",
            AuditEventType::Resubmission => "RESUBMISSION",
            AuditEventType::WorkflowStepChange => "WORKFLOW_STEP_CHANGE",
            AuditEventType::RequestCompleted => "REQUEST_COMPLETED",
            AuditEventType::FieldUpdate => "FIELD_UPDATE",
            AuditEventType::AttachmentUpload => "ATTACHMENT_UPLOAD",
            AuditEventType::AttachmentRemoved => "ATTACHMENT_REMOVED",
            AuditEventType::StatusChange => "STATUS_CHANGE",
        }
    }
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEvent {
    pub id: Uuid,
    pub event_type: String,
    pub actor_user_id: Option<Uuid>,
    pub request_id: Option<Uuid>,
    pub submission_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FieldChange {
    pub id: Uuid,
    pub audit_event_id: Uuid,
    pub field_id: Option<Uuid>,
    pub field_name: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}
