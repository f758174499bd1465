//! PostgreSQL store
//!
//! Layout: `pots` keyed by name, `ledger_entries` keyed by sequence with
//! their per-pot `ledger_entry_legs`, and `withdrawals` keyed by withdrawal
//! id with a unique idempotency key. Each commit is one SQL transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::common::errors::{LedgerError, Result};
use crate::common::traits::{BalanceUpdate, LedgerCommit, LedgerStore};
use crate::common::types::{AuditEntry, AuditKind, AuditLeg, Pot, WithdrawalRecord};
use crate::config::types::DatabaseConfig;

const SCHEMA: &str = include_str!("../../migrations/0001_pot_ledger.sql");

/// Durable `LedgerStore` backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect using the database configuration
    #[instrument(skip(config))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect(&config.url)
            .await?;
        info!(max_connections = config.max_connections, "Connected to PostgreSQL");

        let store = Self { pool };
        if config.run_migrations {
            store.migrate().await?;
        }
        Ok(store)
    }

    /// Create the ledger tables if they do not exist
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Schema ready");
        Ok(())
    }

    /// Delete every pot, entry and withdrawal. Only for disposable databases.
    pub async fn reset(&self) -> Result<()> {
        sqlx::query("TRUNCATE withdrawals, ledger_entry_legs, ledger_entries, pots")
            .execute(&self.pool)
            .await?;
        info!("Ledger tables truncated");
        Ok(())
    }

    async fn apply_balance_update(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        update: &BalanceUpdate,
    ) -> Result<()> {
        let row = sqlx::query(
            "UPDATE pots SET balance = balance + $2 \
             WHERE name = $1 AND balance + $2 >= 0 \
             RETURNING balance",
        )
        .bind(&update.pot)
        .bind(update.delta)
        .fetch_optional(&mut **tx)
        .await?;

        let Some(row) = row else {
            let balance: Option<Decimal> =
                sqlx::query_scalar("SELECT balance FROM pots WHERE name = $1")
                    .bind(&update.pot)
                    .fetch_optional(&mut **tx)
                    .await?;
            return Err(match balance {
                None => LedgerError::NotFound(update.pot.clone()),
                Some(balance) => LedgerError::InsufficientFunds {
                    pot: update.pot.clone(),
                    balance,
                    requested: -update.delta,
                },
            });
        };

        let balance: Decimal = row.try_get("balance")?;
        if balance != update.resulting_balance {
            return Err(LedgerError::StorageUnavailable(format!(
                "pot {} was modified concurrently: expected {}, found {}",
                update.pot, update.resulting_balance, balance
            )));
        }
        Ok(())
    }
}

fn to_db_sequence(sequence: u64) -> Result<i64> {
    i64::try_from(sequence)
        .map_err(|_| LedgerError::StorageUnavailable(format!("sequence {} out of range", sequence)))
}

fn from_db_sequence(sequence: i64) -> Result<u64> {
    u64::try_from(sequence)
        .map_err(|_| LedgerError::StorageUnavailable(format!("invalid stored sequence {}", sequence)))
}

#[async_trait]
impl LedgerStore for PostgresStore {
    async fn load_pots(&self) -> Result<Vec<Pot>> {
        let rows = sqlx::query("SELECT name, position, percentage, balance FROM pots ORDER BY position")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<Pot> {
                let position: i32 = row.try_get("position")?;
                Ok(Pot {
                    name: row.try_get("name")?,
                    percentage: row.try_get("percentage")?,
                    balance: row.try_get("balance")?,
                    position: position as u32,
                })
            })
            .collect()
    }

    async fn initialize_pots(&self, pots: &[Pot]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pots")
            .fetch_one(&mut *tx)
            .await?;
        if existing > 0 {
            return Err(LedgerError::InvalidConfiguration(
                "pots already initialized".to_string(),
            ));
        }
        for pot in pots {
            sqlx::query("INSERT INTO pots (name, position, percentage, balance) VALUES ($1, $2, $3, $4)")
                .bind(&pot.name)
                .bind(pot.position as i32)
                .bind(pot.percentage)
                .bind(pot.balance)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load_entries(&self) -> Result<Vec<AuditEntry>> {
        let leg_rows = sqlx::query(
            "SELECT sequence, pot_name, delta, resulting_balance, percentage \
             FROM ledger_entry_legs ORDER BY sequence, position",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut legs: HashMap<i64, Vec<AuditLeg>> = HashMap::new();
        for row in &leg_rows {
            let sequence: i64 = row.try_get("sequence")?;
            legs.entry(sequence).or_default().push(AuditLeg {
                pot: row.try_get("pot_name")?,
                delta: row.try_get("delta")?,
                resulting_balance: row.try_get("resulting_balance")?,
                percentage: row.try_get("percentage")?,
            });
        }

        let entry_rows = sqlx::query(
            "SELECT sequence, kind, reference, actor, withdrawal_id, recorded_at \
             FROM ledger_entries ORDER BY sequence",
        )
        .fetch_all(&self.pool)
        .await?;

        entry_rows
            .iter()
            .map(|row| -> Result<AuditEntry> {
                let sequence: i64 = row.try_get("sequence")?;
                let kind: String = row.try_get("kind")?;
                let recorded_at: DateTime<Utc> = row.try_get("recorded_at")?;
                Ok(AuditEntry {
                    sequence: from_db_sequence(sequence)?,
                    kind: kind.parse::<AuditKind>()?,
                    legs: legs.remove(&sequence).unwrap_or_default(),
                    reference: row.try_get("reference")?,
                    actor: row.try_get("actor")?,
                    withdrawal_id: row.try_get("withdrawal_id")?,
                    recorded_at,
                })
            })
            .collect()
    }

    async fn load_withdrawals(&self) -> Result<Vec<WithdrawalRecord>> {
        let rows = sqlx::query(
            "SELECT withdrawal_id, idempotency_key, pot_name, amount, actor, \
                    remaining_balance, sequence, recorded_at \
             FROM withdrawals ORDER BY sequence",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<WithdrawalRecord> {
                let sequence: i64 = row.try_get("sequence")?;
                Ok(WithdrawalRecord {
                    withdrawal_id: row.try_get("withdrawal_id")?,
                    idempotency_key: row.try_get("idempotency_key")?,
                    pot: row.try_get("pot_name")?,
                    amount: row.try_get("amount")?,
                    actor: row.try_get("actor")?,
                    remaining_balance: row.try_get("remaining_balance")?,
                    sequence: from_db_sequence(sequence)?,
                    recorded_at: row.try_get("recorded_at")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self, commit), fields(sequence = commit.entry.sequence, kind = %commit.entry.kind))]
    async fn commit(&self, commit: &LedgerCommit) -> Result<()> {
        let sequence = to_db_sequence(commit.entry.sequence)?;
        let mut tx = self.pool.begin().await?;

        // Row locks are taken in name order so two-pot transfers cannot deadlock
        let mut updates: Vec<&BalanceUpdate> = commit.balance_updates.iter().collect();
        updates.sort_by(|a, b| a.pot.cmp(&b.pot));
        for update in updates {
            Self::apply_balance_update(&mut tx, update).await?;
        }

        for (name, percentage) in &commit.percentage_updates {
            let result = sqlx::query("UPDATE pots SET percentage = $2 WHERE name = $1")
                .bind(name)
                .bind(*percentage)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                return Err(LedgerError::NotFound(name.clone()));
            }
        }

        let entry = &commit.entry;
        sqlx::query(
            "INSERT INTO ledger_entries (sequence, kind, reference, actor, withdrawal_id, recorded_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(sequence)
        .bind(entry.kind.as_str())
        .bind(&entry.reference)
        .bind(&entry.actor)
        .bind(&entry.withdrawal_id)
        .bind(entry.recorded_at)
        .execute(&mut *tx)
        .await?;

        for (position, leg) in entry.legs.iter().enumerate() {
            sqlx::query(
                "INSERT INTO ledger_entry_legs \
                 (sequence, position, pot_name, delta, resulting_balance, percentage) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(sequence)
            .bind(position as i32)
            .bind(&leg.pot)
            .bind(leg.delta)
            .bind(leg.resulting_balance)
            .bind(leg.percentage)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(record) = &commit.withdrawal {
            sqlx::query(
                "INSERT INTO withdrawals \
                 (withdrawal_id, idempotency_key, pot_name, amount, actor, remaining_balance, sequence, recorded_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(&record.withdrawal_id)
            .bind(&record.idempotency_key)
            .bind(&record.pot)
            .bind(record.amount)
            .bind(&record.actor)
            .bind(record.remaining_balance)
            .bind(sequence)
            .bind(record.recorded_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Commit persisted");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
