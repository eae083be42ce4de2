//! PostgreSQL account repository.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use super::{Account, AccountRepository, DatabaseConfig, DatabaseError, Result};

/// Build a connection pool and verify it with `SELECT 1`.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    info!(max_connections = config.max_connections, "Connecting to database");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
        .map_err(|e| DatabaseError::Connection(format!("failed to create pool: {}", e)))?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(|e| DatabaseError::Connection(format!("failed to ping database: {}", e)))?;

    info!("Connected to database");
    Ok(pool)
}

/// Account repository backed by the database-side account functions.
pub struct PostgresAccountRepository {
    pool: PgPool,
}

impl PostgresAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    let updated_at: NaiveDateTime = row.try_get("updated_at")?;
    Ok(Account {
        name: row.try_get("name")?,
        balance: row.try_get("balance")?,
        account_number: row.try_get("account_number")?,
        user_id: row.try_get("user_id")?,
        updated_at: updated_at.and_utc(),
        is_deleted: row.try_get("is_deleted")?,
    })
}

#[async_trait]
impl AccountRepository for PostgresAccountRepository {
    async fn create_account(&self, user_id: &str, name: &str, initial_balance: f32) -> Result<()> {
        sqlx::query("SELECT create_account($1, $2, $3)")
            .bind(user_id)
            .bind(name)
            .bind(initial_balance)
            .execute(&self.pool)
            .await?;
        debug!(user_id = %user_id, "Account created");
        Ok(())
    }

    async fn update_account(&self, account_number: &str, user_id: &str, name: &str) -> Result<()> {
        sqlx::query("SELECT update_account($1, $2, $3)")
            .bind(account_number)
            .bind(user_id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_user_accounts(&self, user_id: &str) -> Result<Vec<Account>> {
        let rows = sqlx::query(
            "SELECT name, balance, account_number, user_id, updated_at, is_deleted \
             FROM get_accounts($1)",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut accounts = rows
            .iter()
            .map(account_from_row)
            .collect::<Result<Vec<_>>>()?;
        accounts.sort_by_key(|a| a.updated_at);
        Ok(accounts)
    }

    async fn delete_account(&self, account_number: &str, user_id: &str) -> Result<()> {
        sqlx::query("SELECT delete_account($1, $2)")
            .bind(account_number)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        debug!(account_number = %account_number, user_id = %user_id, "Account deleted");
        Ok(())
    }
}
