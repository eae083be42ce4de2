//! Mock account repository for testing.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{Account, AccountRepository, DatabaseError, Result};

/// In-memory account repository with switchable failures.
#[derive(Default)]
pub struct MockAccountRepository {
    accounts: RwLock<Vec<Account>>,
    fail_on_write: RwLock<bool>,
    fail_on_read: RwLock<bool>,
}

impl MockAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_write(&self, fail: bool) {
        *self.fail_on_write.write().await = fail;
    }

    pub async fn set_fail_on_read(&self, fail: bool) {
        *self.fail_on_read.write().await = fail;
    }

    /// Every stored account, deleted ones included.
    pub async fn all_accounts(&self) -> Vec<Account> {
        self.accounts.read().await.clone()
    }

    async fn check_write(&self) -> Result<()> {
        if *self.fail_on_write.read().await {
            return Err(DatabaseError::Unavailable("mock write failure".to_string()));
        }
        Ok(())
    }
}

fn owned_mut<'a>(
    accounts: &'a mut [Account],
    account_number: &str,
    user_id: &str,
) -> Result<&'a mut Account> {
    accounts
        .iter_mut()
        .find(|a| a.account_number == account_number && a.user_id == user_id && !a.is_deleted)
        .ok_or_else(|| DatabaseError::AccountNotFound {
            account_number: account_number.to_string(),
        })
}

#[async_trait]
impl AccountRepository for MockAccountRepository {
    async fn create_account(&self, user_id: &str, name: &str, initial_balance: f32) -> Result<()> {
        self.check_write().await?;
        let mut accounts = self.accounts.write().await;
        let account_number = format!("{:010}", accounts.len() + 1);
        accounts.push(Account {
            name: name.to_string(),
            balance: initial_balance,
            account_number,
            user_id: user_id.to_string(),
            updated_at: Utc::now(),
            is_deleted: false,
        });
        Ok(())
    }

    async fn update_account(&self, account_number: &str, user_id: &str, name: &str) -> Result<()> {
        self.check_write().await?;
        let mut accounts = self.accounts.write().await;
        let account = owned_mut(&mut accounts, account_number, user_id)?;
        account.name = name.to_string();
        account.updated_at = Utc::now();
        Ok(())
    }

    async fn get_user_accounts(&self, user_id: &str) -> Result<Vec<Account>> {
        if *self.fail_on_read.read().await {
            return Err(DatabaseError::Unavailable("mock read failure".to_string()));
        }
        let mut accounts: Vec<Account> = self
            .accounts
            .read()
            .await
            .iter()
            .filter(|a| a.user_id == user_id && !a.is_deleted)
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.updated_at);
        Ok(accounts)
    }

    async fn delete_account(&self, account_number: &str, user_id: &str) -> Result<()> {
        self.check_write().await?;
        let mut accounts = self.accounts.write().await;
        let account = owned_mut(&mut accounts, account_number, user_id)?;
        account.is_deleted = true;
        account.updated_at = Utc::now();
        Ok(())
    }
}
