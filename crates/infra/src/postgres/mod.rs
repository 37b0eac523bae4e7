//! PostgreSQL stores for follow-up levels and partner follow-up state.
//!
//! The engine ports are synchronous; every call blocks on the runtime handle
//! the store was built with. Build stores from a runtime you do not call them
//! from (e.g. the scheduler's worker threads).
//!
//! ## Error mapping
//!
//! | sqlx error                      | `StoreError`  |
//! |---------------------------------|---------------|
//! | database, unique violation      | `Conflict`    |
//! | anything else                   | `Unavailable` |

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use tracing::{debug, warn};
use uuid::Uuid;

use dunning_core::{CompanyId, LevelId, PartnerId, UserId};
use dunning_followup::{
    FollowupLevel, FollowupResult, FollowupStateStore, LevelStore, PartnerFollowupState,
    StoreError, TemplateRef,
};

/// DDL for both tables. Idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS followup_level (
    id                 UUID PRIMARY KEY,
    company_id         UUID NOT NULL,
    sequence           INTEGER NOT NULL CHECK (sequence >= 0),
    name               TEXT NOT NULL,
    delay_days         INTEGER NOT NULL CHECK (delay_days >= 0),
    send_email         BOOLEAN NOT NULL DEFAULT FALSE,
    send_letter        BOOLEAN NOT NULL DEFAULT FALSE,
    manual             BOOLEAN NOT NULL DEFAULT FALSE,
    auto_execute       BOOLEAN NOT NULL DEFAULT TRUE,
    mail_template_ref  TEXT,
    print_template_ref TEXT,
    description        TEXT NOT NULL DEFAULT '',
    translations       JSONB NOT NULL DEFAULT '{}'::jsonb
);

CREATE UNIQUE INDEX IF NOT EXISTS followup_level_company_sequence
    ON followup_level (company_id, sequence);

CREATE TABLE IF NOT EXISTS partner_followup_state (
    partner_id          UUID PRIMARY KEY,
    current_level_id    UUID,
    next_action_date    DATE,
    last_reminder_date  DATE,
    responsible_user_id UUID,
    version             BIGINT NOT NULL DEFAULT 0
);
"#;

/// Connect to `database_url`, or to `DATABASE_URL` when `None`.
pub async fn connect(database_url: Option<&str>) -> anyhow::Result<PgPool> {
    let url = match database_url {
        Some(url) => url.to_string(),
        None => std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
    };
    PgPool::connect(&url)
        .await
        .with_context(|| "failed to connect to follow-up database".to_string())
}

pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;
    Ok(())
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
            StoreError::Conflict(format!("{operation}: {}", db_err.message()))
        }
        _ => {
            warn!(operation, error = %err, "follow-up store failure");
            StoreError::Unavailable(format!("{operation}: {err}"))
        }
    }
}

fn to_u32(column: &str, value: i32) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|_| StoreError::Unavailable(format!("negative {column} in stored row: {value}")))
}

fn to_i32(column: &str, value: u32) -> Result<i32, StoreError> {
    i32::try_from(value)
        .map_err(|_| StoreError::Unavailable(format!("{column} out of range: {value}")))
}

#[derive(Debug, Clone)]
pub struct PostgresLevelStore {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresLevelStore {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    async fn fetch(&self, company_id: CompanyId) -> Result<Vec<FollowupLevel>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, company_id, sequence, name, delay_days, send_email, send_letter,
                   manual, auto_execute, mail_template_ref, print_template_ref,
                   description, translations
            FROM followup_level
            WHERE company_id = $1
            ORDER BY sequence ASC
            "#,
        )
        .bind(company_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("levels_for", e))?;

        rows.iter().map(level_from_row).collect()
    }

    async fn replace(
        &self,
        company_id: CompanyId,
        levels: &[FollowupLevel],
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("DELETE FROM followup_level WHERE company_id = $1")
            .bind(company_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_levels", e))?;

        for level in levels {
            sqlx::query(
                r#"
                INSERT INTO followup_level (
                    id, company_id, sequence, name, delay_days, send_email, send_letter,
                    manual, auto_execute, mail_template_ref, print_template_ref,
                    description, translations
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(level.id.as_uuid())
            .bind(company_id.as_uuid())
            .bind(to_i32("sequence", level.sequence)?)
            .bind(&level.name)
            .bind(to_i32("delay_days", level.delay_days)?)
            .bind(level.send_email)
            .bind(level.send_letter)
            .bind(level.manual)
            .bind(level.auto_execute)
            .bind(level.mail_template.as_ref().map(TemplateRef::as_str))
            .bind(level.print_template.as_ref().map(TemplateRef::as_str))
            .bind(&level.description)
            .bind(Json(&level.translations))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_level", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        debug!(company_id = %company_id, levels = levels.len(), "level table saved");
        Ok(())
    }
}

impl LevelStore for PostgresLevelStore {
    fn levels_for(&self, company_id: CompanyId) -> Result<Vec<FollowupLevel>, StoreError> {
        self.runtime.block_on(self.fetch(company_id))
    }

    fn save_levels(
        &self,
        company_id: CompanyId,
        levels: &[FollowupLevel],
    ) -> Result<(), StoreError> {
        self.runtime.block_on(self.replace(company_id, levels))
    }
}

fn level_from_row(row: &PgRow) -> Result<FollowupLevel, StoreError> {
    let decode = |e| map_sqlx_error("decode_level", e);

    let translations: Json<BTreeMap<String, String>> =
        row.try_get("translations").map_err(decode)?;
    let mail: Option<String> = row.try_get("mail_template_ref").map_err(decode)?;
    let print: Option<String> = row.try_get("print_template_ref").map_err(decode)?;

    Ok(FollowupLevel {
        id: LevelId::from_uuid(row.try_get::<Uuid, _>("id").map_err(decode)?),
        company_id: CompanyId::from_uuid(row.try_get::<Uuid, _>("company_id").map_err(decode)?),
        sequence: to_u32("sequence", row.try_get("sequence").map_err(decode)?)?,
        name: row.try_get("name").map_err(decode)?,
        delay_days: to_u32("delay_days", row.try_get("delay_days").map_err(decode)?)?,
        send_email: row.try_get("send_email").map_err(decode)?,
        send_letter: row.try_get("send_letter").map_err(decode)?,
        manual: row.try_get("manual").map_err(decode)?,
        auto_execute: row.try_get("auto_execute").map_err(decode)?,
        mail_template: mail.map(TemplateRef),
        print_template: print.map(TemplateRef),
        description: row.try_get("description").map_err(decode)?,
        translations: translations.0,
    })
}

/// Partner state rows, locked with `SELECT ... FOR UPDATE`.
#[derive(Debug, Clone)]
pub struct PostgresStateStore {
    pool: Arc<PgPool>,
    runtime: Handle,
}

const SELECT_STATE: &str = r#"
    SELECT partner_id, current_level_id, next_action_date, last_reminder_date,
           responsible_user_id, version
    FROM partner_followup_state
    WHERE partner_id = $1
"#;

impl PostgresStateStore {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    async fn fetch(&self, partner_id: PartnerId) -> Result<Option<PartnerFollowupState>, StoreError> {
        let row = sqlx::query(SELECT_STATE)
            .bind(partner_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_state", e))?;
        row.as_ref().map(state_from_row).transpose()
    }
}

impl FollowupStateStore for PostgresStateStore {
    fn load(&self, partner_id: PartnerId) -> Result<Option<PartnerFollowupState>, StoreError> {
        self.runtime.block_on(self.fetch(partner_id))
    }

    fn partners_in_cycle(&self, levels: &[LevelId]) -> Result<Vec<PartnerId>, StoreError> {
        let ids: Vec<Uuid> = levels.iter().map(|id| *id.as_uuid()).collect();
        let rows = self
            .runtime
            .block_on(
                sqlx::query(
                    "SELECT partner_id FROM partner_followup_state \
                     WHERE current_level_id = ANY($1) ORDER BY partner_id",
                )
                .bind(&ids)
                .fetch_all(&*self.pool),
            )
            .map_err(|e| map_sqlx_error("partners_in_cycle", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<Uuid, _>("partner_id")
                    .map(PartnerId::from_uuid)
                    .map_err(|e| map_sqlx_error("decode_state", e))
            })
            .collect()
    }

    fn with_lock(
        &self,
        partner_id: PartnerId,
        f: &mut dyn FnMut(&mut Option<PartnerFollowupState>) -> FollowupResult<()>,
    ) -> FollowupResult<()> {
        let rt = &self.runtime;
        let mut tx = rt
            .block_on(self.pool.begin())
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Materialize the row so there is something to lock.
        rt.block_on(
            sqlx::query(
                "INSERT INTO partner_followup_state (partner_id) VALUES ($1) \
                 ON CONFLICT (partner_id) DO NOTHING",
            )
            .bind(partner_id.as_uuid())
            .execute(&mut *tx),
        )
        .map_err(|e| map_sqlx_error("init_state", e))?;

        let row = rt
            .block_on(
                sqlx::query(&format!("{SELECT_STATE} FOR UPDATE"))
                    .bind(partner_id.as_uuid())
                    .fetch_one(&mut *tx),
            )
            .map_err(|e| map_sqlx_error("lock_state", e))?;

        let before = Some(state_from_row(&row)?);
        let mut slot = before.clone();

        if let Err(err) = f(&mut slot) {
            rt.block_on(tx.rollback())
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(err);
        }

        if slot != before {
            let state = slot.unwrap_or_else(|| PartnerFollowupState::new(partner_id));
            rt.block_on(
                sqlx::query(
                    r#"
                    UPDATE partner_followup_state
                    SET current_level_id = $2,
                        next_action_date = $3,
                        last_reminder_date = $4,
                        responsible_user_id = $5,
                        version = $6
                    WHERE partner_id = $1
                    "#,
                )
                .bind(partner_id.as_uuid())
                .bind(state.current_level.map(|id| *id.as_uuid()))
                .bind(state.next_action_date)
                .bind(state.last_reminder_date)
                .bind(state.responsible_user_id.map(|id| *id.as_uuid()))
                .bind(i64::try_from(state.version).unwrap_or(i64::MAX))
                .execute(&mut *tx),
            )
            .map_err(|e| map_sqlx_error("update_state", e))?;
        }

        rt.block_on(tx.commit())
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }
}

fn state_from_row(row: &PgRow) -> Result<PartnerFollowupState, StoreError> {
    let decode = |e| map_sqlx_error("decode_state", e);

    let version: i64 = row.try_get("version").map_err(decode)?;
    Ok(PartnerFollowupState {
        partner_id: PartnerId::from_uuid(row.try_get::<Uuid, _>("partner_id").map_err(decode)?),
        current_level: row
            .try_get::<Option<Uuid>, _>("current_level_id")
            .map_err(decode)?
            .map(LevelId::from_uuid),
        next_action_date: row
            .try_get::<Option<NaiveDate>, _>("next_action_date")
            .map_err(decode)?,
        last_reminder_date: row
            .try_get::<Option<NaiveDate>, _>("last_reminder_date")
            .map_err(decode)?,
        responsible_user_id: row
            .try_get::<Option<Uuid>, _>("responsible_user_id")
            .map_err(decode)?
            .map(UserId::from_uuid),
        version: u64::try_from(version).unwrap_or_default(),
    })
}
