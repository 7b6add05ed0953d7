//! In-memory finance store for development and tests

use super::*;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    next_id: i64,
    transactions: Vec<Transaction>,
    liabilities: Vec<Liability>,
    investments: Vec<Investment>,
    goals: Vec<FinancialGoal>,
    wishlist: Vec<WishlistItem>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

pub struct InMemoryFinanceStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryFinanceStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }
}

impl Default for InMemoryFinanceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl FinanceStore for InMemoryFinanceStore {
    async fn insert_transaction(&self, transaction: NewTransaction) -> Result<Transaction> {
        let mut inner = self.inner.write().await;
        let record = Transaction {
            id: inner.next_id(),
            timestamp: transaction.timestamp,
            amount: transaction.amount,
            currency: transaction.currency,
            kind: transaction.kind,
            description: transaction.description,
            category: transaction.category,
            subcategory: transaction.subcategory,
            notes: transaction.notes,
        };
        inner.transactions.push(record.clone());
        Ok(record)
    }

    async fn list_transactions(&self, limit: Option<usize>) -> Result<Vec<Transaction>> {
        let inner = self.inner.read().await;
        let mut transactions = inner.transactions.clone();
        transactions.sort_by_key(|t| std::cmp::Reverse(t.timestamp));
        if let Some(limit) = limit {
            transactions.truncate(limit);
        }
        Ok(transactions)
    }

    async fn monthly_total(
        &self,
        kind: TransactionKind,
        year: i32,
        month: u32,
    ) -> Result<f64> {
        let inner = self.inner.read().await;
        Ok(inner
            .transactions
            .iter()
            .filter(|t| t.kind == kind && month_key(&t.timestamp) == (year, month))
            .map(|t| t.amount)
            .sum())
    }

    async fn average_monthly_income(&self) -> Result<Option<f64>> {
        let inner = self.inner.read().await;
        let mut by_month: HashMap<(i32, u32), f64> = HashMap::new();

        for t in inner
            .transactions
            .iter()
            .filter(|t| t.kind == TransactionKind::Income)
        {
            *by_month.entry(month_key(&t.timestamp)).or_insert(0.0) += t.amount;
        }

        if by_month.is_empty() {
            return Ok(None);
        }
        Ok(Some(by_month.values().sum::<f64>() / by_month.len() as f64))
    }

    async fn insert_liability(&self, liability: NewLiability) -> Result<Liability> {
        let mut inner = self.inner.write().await;
        let record = Liability {
            id: inner.next_id(),
            name: liability.name,
            detail: liability.detail,
            notes: liability.notes,
        };
        inner.liabilities.push(record.clone());
        Ok(record)
    }

    async fn list_liabilities(&self) -> Result<Vec<Liability>> {
        let inner = self.inner.read().await;
        Ok(inner.liabilities.clone())
    }

    async fn insert_investment(&self, investment: NewInvestment) -> Result<Investment> {
        let mut inner = self.inner.write().await;
        let record = Investment {
            id: inner.next_id(),
            name: investment.name,
            currency: investment.currency,
            detail: investment.detail,
            notes: investment.notes,
        };
        inner.investments.push(record.clone());
        Ok(record)
    }

    async fn list_investments(&self) -> Result<Vec<Investment>> {
        let inner = self.inner.read().await;
        Ok(inner.investments.clone())
    }

    async fn update_asset(&self, name: &str, patch: AssetPatch) -> Result<Option<Investment>> {
        let mut inner = self.inner.write().await;

        let Some(investment) = inner
            .investments
            .iter_mut()
            .find(|i| i.name == name && matches!(i.detail, InvestmentDetail::Asset { .. }))
        else {
            return Ok(None);
        };

        if let InvestmentDetail::Asset {
            quantity,
            average_buy_price_usd,
            average_buy_price_user_currency,
            current_market_price,
            ..
        } = &mut investment.detail
        {
            if let Some(v) = patch.quantity {
                *quantity = v;
            }
            if let Some(v) = patch.average_buy_price_usd {
                *average_buy_price_usd = v;
            }
            if let Some(v) = patch.average_buy_price_user_currency {
                *average_buy_price_user_currency = v;
            }
            if let Some(v) = patch.current_market_price {
                *current_market_price = Some(v);
            }
        }
        if let Some(v) = patch.notes {
            investment.notes = Some(v);
        }

        Ok(Some(investment.clone()))
    }

    async fn update_fixed_deposit(
        &self,
        name: &str,
        patch: FixedDepositPatch,
    ) -> Result<Option<Investment>> {
        let mut inner = self.inner.write().await;

        let Some(investment) = inner.investments.iter_mut().find(|i| {
            i.name == name && matches!(i.detail, InvestmentDetail::FixedDeposit { .. })
        }) else {
            return Ok(None);
        };

        if let InvestmentDetail::FixedDeposit {
            principal_amount,
            interest_rate,
            maturity_date,
            is_active,
            ..
        } = &mut investment.detail
        {
            if let Some(v) = patch.principal_amount {
                *principal_amount = v;
            }
            if let Some(v) = patch.interest_rate {
                *interest_rate = v;
            }
            if let Some(v) = patch.maturity_date {
                *maturity_date = Some(v);
            }
            if let Some(v) = patch.is_active {
                *is_active = v;
            }
        }

        Ok(Some(investment.clone()))
    }

    async fn insert_goal(&self, goal: NewGoal) -> Result<FinancialGoal> {
        let mut inner = self.inner.write().await;
        let record = FinancialGoal {
            id: inner.next_id(),
            description: goal.description,
            deadline: goal.deadline,
            status: GoalStatus::InProgress,
            notes: goal.notes,
        };
        inner.goals.push(record.clone());
        Ok(record)
    }

    async fn list_goals(&self) -> Result<Vec<FinancialGoal>> {
        let inner = self.inner.read().await;
        Ok(inner.goals.clone())
    }

    async fn update_goal_status(
        &self,
        id: i64,
        status: GoalStatus,
    ) -> Result<Option<FinancialGoal>> {
        let mut inner = self.inner.write().await;
        let Some(goal) = inner.goals.iter_mut().find(|g| g.id == id) else {
            return Ok(None);
        };
        goal.status = status;
        Ok(Some(goal.clone()))
    }

    async fn insert_wishlist_item(&self, item: NewWishlistItem) -> Result<WishlistItem> {
        let mut inner = self.inner.write().await;
        let record = WishlistItem {
            id: inner.next_id(),
            item_name: item.item_name,
            estimated_price: item.estimated_price,
            urgency: item.urgency,
            priority: item.priority,
            kind: item.kind,
            status: WishlistStatus::Active,
            notes: item.notes,
        };
        inner.wishlist.push(record.clone());
        Ok(record)
    }

    async fn list_wishlist(&self, status: Option<WishlistStatus>) -> Result<Vec<WishlistItem>> {
        let inner = self.inner.read().await;
        Ok(inner
            .wishlist
            .iter()
            .filter(|w| status.map_or(true, |s| w.status == s))
            .cloned()
            .collect())
    }

    async fn update_wishlist_status(
        &self,
        item_name: &str,
        status: WishlistStatus,
    ) -> Result<Option<WishlistItem>> {
        let needle = item_name.to_lowercase();
        let mut inner = self.inner.write().await;
        let Some(item) = inner
            .wishlist
            .iter_mut()
            .find(|w| w.item_name.to_lowercase().contains(&needle))
        else {
            return Ok(None);
        };
        item.status = status;
        Ok(Some(item.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tx(kind: TransactionKind, amount: f64, year: i32, month: u32) -> NewTransaction {
        NewTransaction {
            timestamp: Utc.with_ymd_and_hms(year, month, 15, 12, 0, 0).unwrap(),
            amount,
            currency: "IDR".to_string(),
            kind,
            description: "test".to_string(),
            category: "food".to_string(),
            subcategory: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn transactions_get_sequential_ids() {
        let store = InMemoryFinanceStore::new();
        let a = store
            .insert_transaction(tx(TransactionKind::Expense, 50_000.0, 2025, 3))
            .await
            .unwrap();
        let b = store
            .insert_transaction(tx(TransactionKind::Expense, 20_000.0, 2025, 3))
            .await
            .unwrap();
        assert!(b.id > a.id);
        assert_eq!(store.list_transactions(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn monthly_total_filters_kind_and_month() {
        let store = InMemoryFinanceStore::new();
        store
            .insert_transaction(tx(TransactionKind::Expense, 50_000.0, 2025, 3))
            .await
            .unwrap();
        store
            .insert_transaction(tx(TransactionKind::Income, 9_000_000.0, 2025, 3))
            .await
            .unwrap();
        store
            .insert_transaction(tx(TransactionKind::Expense, 70_000.0, 2025, 4))
            .await
            .unwrap();

        let total = store
            .monthly_total(TransactionKind::Expense, 2025, 3)
            .await
            .unwrap();
        assert_eq!(total, 50_000.0);
    }

    #[tokio::test]
    async fn average_monthly_income_spans_months() {
        let store = InMemoryFinanceStore::new();
        assert!(store.average_monthly_income().await.unwrap().is_none());

        store
            .insert_transaction(tx(TransactionKind::Income, 1_000.0, 2025, 1))
            .await
            .unwrap();
        store
            .insert_transaction(tx(TransactionKind::Income, 3_000.0, 2025, 2))
            .await
            .unwrap();

        let avg = store.average_monthly_income().await.unwrap().unwrap();
        assert_eq!(avg, 2_000.0);
    }

    #[tokio::test]
    async fn update_asset_patches_only_given_fields() {
        let store = InMemoryFinanceStore::new();
        store
            .insert_investment(NewInvestment {
                name: "Apple Stock".to_string(),
                currency: "USD".to_string(),
                detail: InvestmentDetail::Asset {
                    symbol: "AAPL".to_string(),
                    quantity: 10.0,
                    average_buy_price_usd: 150.0,
                    average_buy_price_user_currency: 150.0,
                    current_market_price: None,
                },
                notes: None,
            })
            .await
            .unwrap();

        let updated = store
            .update_asset(
                "Apple Stock",
                AssetPatch {
                    quantity: Some(12.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        match updated.detail {
            InvestmentDetail::Asset {
                quantity,
                average_buy_price_usd,
                ..
            } => {
                assert_eq!(quantity, 12.0);
                assert_eq!(average_buy_price_usd, 150.0);
            }
            _ => panic!("expected asset detail"),
        }

        assert!(store
            .update_asset("Missing", AssetPatch::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn wishlist_status_updates_by_partial_name() {
        let store = InMemoryFinanceStore::new();
        store
            .insert_wishlist_item(NewWishlistItem {
                item_name: "Mechanical Keyboard".to_string(),
                estimated_price: Some(1_200_000.0),
                urgency: UrgencyLevel::Low,
                priority: UrgencyLevel::Medium,
                kind: WishlistKind::Want,
                notes: None,
            })
            .await
            .unwrap();

        let updated = store
            .update_wishlist_status("keyboard", WishlistStatus::Purchased)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, WishlistStatus::Purchased);

        let active = store
            .list_wishlist(Some(WishlistStatus::Active))
            .await
            .unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn goal_lifecycle() {
        let store = InMemoryFinanceStore::new();
        let goal = store
            .insert_goal(NewGoal {
                description: "Emergency fund".to_string(),
                deadline: Utc.with_ymd_and_hms(2026, 12, 31, 0, 0, 0).unwrap(),
                notes: None,
            })
            .await
            .unwrap();
        assert_eq!(goal.status, GoalStatus::InProgress);

        let updated = store
            .update_goal_status(goal.id, GoalStatus::Achieved)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, GoalStatus::Achieved);
    }
}
