use async_trait::async_trait;
use dashmap::DashMap;
use karma_core::Wallet;
use karma_tools::PointsTool;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct PointsAccount {
    balance: u64,
    wallet: Option<Wallet>,
}

/// Karma Points balances held in memory, one entry lock per user.
#[derive(Default)]
pub struct InMemoryPointsLedger {
    accounts: DashMap<Uuid, PointsAccount>,
}

impl InMemoryPointsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_account(&self, user_id: Uuid, balance: u64) {
        self.accounts.entry(user_id).or_default().balance = balance;
    }

    pub fn link_wallet(&self, user_id: Uuid, wallet: Wallet) {
        self.accounts.entry(user_id).or_default().wallet = Some(wallet);
    }
}

#[async_trait]
impl PointsTool for InMemoryPointsLedger {
    async fn balance(&self, user_id: Uuid) -> anyhow::Result<u64> {
        Ok(self
            .accounts
            .get(&user_id)
            .map(|account| account.balance)
            .unwrap_or_default())
    }

    async fn debit(&self, user_id: Uuid, amount: u64) -> anyhow::Result<bool> {
        if amount == 0 {
            return Ok(true);
        }

        let Some(mut account) = self.accounts.get_mut(&user_id) else {
            return Ok(false);
        };
        if account.balance < amount {
            return Ok(false);
        }
        account.balance -= amount;
        Ok(true)
    }

    async fn credit(&self, user_id: Uuid, amount: u64) -> anyhow::Result<()> {
        let mut account = self.accounts.entry(user_id).or_default();
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or_else(|| anyhow::anyhow!("points balance overflow for user {user_id}"))?;
        Ok(())
    }

    async fn linked_wallet(&self, user_id: Uuid) -> anyhow::Result<Option<Wallet>> {
        Ok(self
            .accounts
            .get(&user_id)
            .and_then(|account| account.wallet.clone()))
    }
}
