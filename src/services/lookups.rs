//! Lookup Registry (C1): resolves `(type_code, code)` pairs among active
//! rows, with a read-through cache since status/role/purchase-type
//! resolution sits on the hot path of every lifecycle operation (spec.md
//! §4.1).

use std::collections::HashMap;

use parking_lot::RwLock;
use sqlx::query_as;
use uuid::Uuid;

use crate::{domain::models::Lookup, infrastructure::db::PgPool, services::errors::EngineError};

#[derive(Default)]
pub struct LookupRegistry {
    cache: RwLock<HashMap<(String, String), Lookup>>,
}

impl LookupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn resolve(
        &self,
        pool: &PgPool,
        type_code: &str,
        code: &str,
    ) -> Result<Lookup, EngineError> {
        let key = (type_code.to_string(), code.to_string());
        if let Some(hit) = self.cache.read().get(&key).cloned() {
            return Ok(hit);
        }

        let row = query_as::<_, Lookup>(
            r#"
            SELECT id, type_code, code, title, active, created_at, updated_at
            FROM lookups
            WHERE type_code = $1 AND code = $2 AND active = true
            "#,
        )
        .bind(type_code)
        .bind(code)
        .fetch_optional(pool)
        .await?
        .ok_or(EngineError::LookupNotFound)?;

        self.cache.write().insert(key, row.clone());
        Ok(row)
    }

    pub async fn resolve_by_id(&self, pool: &PgPool, id: Uuid) -> Result<Lookup, EngineError> {
        if let Some(hit) = self
            .cache
            .read()
            .values()
            .find(|l| l.id == id)
            .cloned()
        {
            return Ok(hit);
        }

        let row = query_as::<_, Lookup>(
            r#"
            SELECT id, type_code, code, title, active, created_at, updated_at
            FROM lookups
            WHERE id = $1 AND active = true
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(EngineError::LookupNotFound)?;

        self.cache
            .write()
            .insert((row.type_code.clone(), row.code.clone()), row.clone());
        Ok(row)
    }

    /// Invalidates the whole cache. Called after any admin write to the
    /// `lookups` table; the registry does not track per-row dependents.
    pub fn invalidate(&self) {
        self.cache.write().clear();
    }

    pub async fn list(&self, pool: &PgPool, type_code: &str) -> Result<Vec<Lookup>, EngineError> {
        let rows = query_as::<_, Lookup>(
            r#"
            SELECT id, type_code, code, title, active, created_at, updated_at
            FROM lookups
            WHERE type_code = $1 AND active = true
            ORDER BY title
            "#,
        )
        .bind(type_code)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }
}
