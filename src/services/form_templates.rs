//! Form Template Store (C2): versioned field sets. Templates are never
//! mutated in place once a request references them (spec.md §4.2); every
//! edit is a clone-and-bump producing a new, monotonically numbered
//! version.

use sqlx::query_as;
use uuid::Uuid;

use crate::{
    domain::models::{FormField, FormTemplate},
    infrastructure::db::PgPool,
    services::errors::EngineError,
};

#[derive(Debug, Clone)]
pub struct NewField {
    pub field_id: String,
    pub label: String,
    pub field_type: String,
    pub required: bool,
    pub order: i32,
    pub default_value: Option<String>,
    pub help_text: Option<String>,
    pub validation_rules: serde_json::Value,
    pub dropdown_options: Option<serde_json::Value>,
    pub satisfies_category: Option<Uuid>,
}

pub async fn create(
    pool: &PgPool,
    name: &str,
    fields: Vec<NewField>,
    created_by: Option<Uuid>,
) -> Result<FormTemplate, EngineError> {
    let mut tx = pool.begin().await?;

    let next_version: i32 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(MAX(version_number), 0) + 1
        FROM form_templates
        WHERE name = $1
        FOR UPDATE
        "#,
    )
    .bind(name)
    .fetch_one(&mut *tx)
    .await?;

    let template = query_as::<_, FormTemplate>(
        r#"
        INSERT INTO form_templates (id, name, version_number, active, created_by, created_at, updated_at)
        VALUES ($1, $2, $3, true, $4, now(), now())
        RETURNING id, name, version_number, active, created_by, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(next_version)
    .bind(created_by)
    .fetch_one(&mut *tx)
    .await?;

    insert_fields(&mut tx, template.id, &fields).await?;

    tx.commit().await?;
    Ok(template)
}

/// Compares `mutated_fields` against the current version's fields by
/// stable `field_id`. Any difference in count, label, type, required,
/// order, default, help text, validation rules, or dropdown options
/// forces a new version per spec.md §4.2.
pub fn fields_differ(existing: &[FormField], mutated: &[NewField]) -> bool {
    if existing.len() != mutated.len() {
        return true;
    }

    for candidate in mutated {
        let Some(current) = existing.iter().find(|f| f.field_id == candidate.field_id) else {
            return true;
        };
        if current.label != candidate.label
            || current.field_type != candidate.field_type
            || current.required != candidate.required
            || current.order != candidate.order
            || current.default_value != candidate.default_value
            || current.help_text != candidate.help_text
            || current.validation_rules != candidate.validation_rules
            || current.dropdown_options != candidate.dropdown_options
            || current.satisfies_category != candidate.satisfies_category
        {
            return true;
        }
    }

    false
}

pub async fn clone_and_bump(
    pool: &PgPool,
    old_template_id: Uuid,
    mutated_fields: Vec<NewField>,
    created_by: Option<Uuid>,
) -> Result<FormTemplate, EngineError> {
    let (old_template, _) = get_with_fields(pool, old_template_id).await?;
    create(pool, &old_template.name, mutated_fields, created_by).await
}

pub async fn get_with_fields(
    pool: &PgPool,
    template_id: Uuid,
) -> Result<(FormTemplate, Vec<FormField>), EngineError> {
    let template = query_as::<_, FormTemplate>(
        r#"
        SELECT id, name, version_number, active, created_by, created_at, updated_at
        FROM form_templates
        WHERE id = $1
        "#,
    )
    .bind(template_id)
    .fetch_optional(pool)
    .await?
    .ok_or(EngineError::NotFound)?;

    let fields = query_as::<_, FormField>(
        r#"
        SELECT id, template_id, field_id, label, field_type, required, "order",
               default_value, help_text, validation_rules, dropdown_options, satisfies_category
        FROM form_fields
        WHERE template_id = $1
        ORDER BY "order"
        "#,
    )
    .bind(template_id)
    .fetch_all(pool)
    .await?;

    Ok((template, fields))
}

/// Resolves one field by its stable `field_id` within a template — used by
/// `api::rest::drafts` to turn a caller-supplied field code into the
/// `FormField` row `services::requests::set_field` needs.
pub async fn get_field(
    pool: &PgPool,
    template_id: Uuid,
    field_id: &str,
) -> Result<FormField, EngineError> {
    query_as::<_, FormField>(
        r#"
        SELECT id, template_id, field_id, label, field_type, required, "order",
               default_value, help_text, validation_rules, dropdown_options, satisfies_category
        FROM form_fields
        WHERE template_id = $1 AND field_id = $2
        "#,
    )
    .bind(template_id)
    .bind(field_id)
    .fetch_optional(pool)
    .await?
    .ok_or(EngineError::NotFound)
}

async fn insert_fields(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    template_id: Uuid,
    fields: &[NewField],
) -> Result<(), EngineError> {
    for field in fields {
        if field.field_type.eq_ignore_ascii_case("DROPDOWN")
            && field
                .dropdown_options
                .as_ref()
                .and_then(|v| v.as_array())
                .map(|a| a.is_empty())
                .unwrap_or(true)
        {
            return Err(EngineError::TemplateInvariantViolated(format!(
                "dropdown field {} must declare non-empty dropdown_options",
                field.field_id
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO form_fields
                (id, template_id, field_id, label, field_type, required, "order",
                 default_value, help_text, validation_rules, dropdown_options, satisfies_category)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(template_id)
        .bind(&field.field_id)
        .bind(&field.label)
        .bind(&field.field_type)
        .bind(field.required)
        .bind(field.order)
        .bind(&field.default_value)
        .bind(&field.help_text)
        .bind(&field.validation_rules)
        .bind(&field.dropdown_options)
        .bind(field.satisfies_category)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(field_id: &str, order: i32) -> FormField {
        FormField {
            id: Uuid::new_v4(),
            template_id: Uuid::new_v4(),
            field_id: field_id.to_string(),
            label: field_id.to_string(),
            field_type: "TEXT".to_string(),
            required: true,
            order,
            default_value: None,
            help_text: None,
            validation_rules: serde_json::json!({}),
            dropdown_options: None,
            satisfies_category: None,
        }
    }

    fn new_field(field_id: &str, order: i32) -> NewField {
        NewField {
            field_id: field_id.to_string(),
            label: field_id.to_string(),
            field_type: "TEXT".to_string(),
            required: true,
            order,
            default_value: None,
            help_text: None,
            validation_rules: serde_json::json!({}),
            dropdown_options: None,
            satisfies_category: None,
        }
    }

    #[test]
    fn identical_field_sets_do_not_differ() {
        let existing = vec![field("vendor_name", 1)];
        let mutated = vec![new_field("vendor_name", 1)];
        assert!(!fields_differ(&existing, &mutated));
    }

    #[test]
    fn added_field_forces_new_version() {
        let existing = vec![field("vendor_name", 1)];
        let mutated = vec![new_field("vendor_name", 1), new_field("amount", 2)];
        assert!(fields_differ(&existing, &mutated));
    }

    #[test]
    fn changed_required_flag_forces_new_version() {
        let existing = vec![field("vendor_name", 1)];
        let mut mutated = new_field("vendor_name", 1);
        mutated.required = false;
        assert!(fields_differ(&existing, &[mutated]));
    }
}
