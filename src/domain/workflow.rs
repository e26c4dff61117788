//! Pure state-machine logic for the request lifecycle engine (C7).
//!
//! Nothing here touches the database or the clock; `services::requests`
//! wraps these functions in a transaction and a row-level write lock so the
//! "remaining roles" computation in `evaluate_step` is single-shot per
//! spec.md §5.

use std::collections::HashSet;
use uuid::Uuid;

use super::models::{RequestStatus, WorkflowTemplateStep};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("workflow template must have at least 2 steps")]
    TooFewSteps,
    #[error("step orders must form a contiguous 1..n sequence")]
    NonContiguousOrder,
    #[error("exactly one step must be marked as the finance review step")]
    FinanceStepCount(usize),
    #[error("the finance review step must be the last step")]
    FinanceStepNotLast,
    #[error("every step must have at least one approver role")]
    StepWithoutApprovers(Uuid),
}

/// Validates the invariants spec.md §3/§4.3 place on a saved workflow
/// template: contiguous 1..n step orders, exactly one finance step, and
/// (when `require_finance_last` is set) that step is last. Approver sets
/// are passed in separately since they live in a child table.
///
/// `require_finance_last` mirrors the `REQUIRE_FINANCE_REVIEW_LAST` config
/// option (spec.md §6): when false, the finance step no longer needs to be
/// the terminal one, though exactly one step must still be marked finance.
pub fn validate_step_sequence(
    steps: &[WorkflowTemplateStep],
    require_finance_last: bool,
) -> Result<(), TemplateError> {
    if steps.len() < 2 {
        return Err(TemplateError::TooFewSteps);
    }

    let mut ordered: Vec<&WorkflowTemplateStep> = steps.iter().collect();
    ordered.sort_by_key(|s| s.step_order);
    for (idx, step) in ordered.iter().enumerate() {
        if step.step_order != (idx as i32) + 1 {
            return Err(TemplateError::NonContiguousOrder);
        }
    }

    let finance_count = ordered.iter().filter(|s| s.is_finance_review).count();
    if finance_count != 1 {
        return Err(TemplateError::FinanceStepCount(finance_count));
    }

    if require_finance_last {
        let last = ordered.last().expect("checked len >= 2 above");
        if !last.is_finance_review {
            return Err(TemplateError::FinanceStepNotLast);
        }
    }

    Ok(())
}

pub fn validate_step_approvers(
    steps: &[WorkflowTemplateStep],
    approver_roles_by_step: impl Fn(Uuid) -> usize,
) -> Result<(), TemplateError> {
    for step in steps {
        if approver_roles_by_step(step.id) == 0 {
            return Err(TemplateError::StepWithoutApprovers(step.id));
        }
    }
    Ok(())
}

/// Result of folding one more `APPROVE` action into a step's tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTally {
    pub step_complete: bool,
}

/// A role appearing twice among the actor's access scopes, or a role
/// approving twice, counts once — callers pass deduplicated sets.
pub fn evaluate_step(required_roles: &HashSet<Uuid>, approved_roles: &HashSet<Uuid>) -> StepTally {
    let remaining = required_roles.difference(approved_roles).count();
    StepTally {
        step_complete: remaining == 0,
    }
}

/// What happens to the request once a step's required roles are all
/// satisfied: either the pipeline moves to the next step, or — if the step
/// just completed was the finance step — the request is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Completed,
    MovedToStep {
        next_step_id: Uuid,
        next_status: RequestStatus,
    },
}

/// Computes the next step/status once `current`'s required roles are all
/// satisfied. `ordered_steps` must be sorted by `step_order` ascending and
/// must include `current`. Per spec.md §4.7, `FULLY_APPROVED` is coalesced
/// into `FINANCE_REVIEW` rather than materialized as a durable status — see
/// DESIGN.md's Open Question resolution.
pub fn advance_past_step(
    current: &WorkflowTemplateStep,
    ordered_steps: &[WorkflowTemplateStep],
) -> Advance {
    if current.is_finance_review {
        return Advance::Completed;
    }

    let next = ordered_steps
        .iter()
        .find(|s| s.step_order == current.step_order + 1)
        .expect("a non-finance step always has a successor: finance is last by TemplateError::FinanceStepNotLast");

    let next_status = if next.is_finance_review {
        RequestStatus::FinanceReview
    } else {
        RequestStatus::PendingApproval
    };

    Advance::MovedToStep {
        next_step_id: next.id,
        next_status,
    }
}
