//! Domain storage for the finance actions
//!
//! The orchestrator never touches these records directly; they are reached
//! only through actions. The liability and investment kinds from the source
//! schema are tagged unions here instead of parent/detail table pairs.

use crate::Result;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryFinanceStore;
pub use postgres::PostgresFinanceStore;

//
// ================= Transactions =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Income,
    Expense,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub amount: f64,
    pub currency: String,
    pub kind: TransactionKind,
    pub description: String,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub timestamp: DateTime<Utc>,
    pub amount: f64,
    pub currency: String,
    pub kind: TransactionKind,
    pub description: String,
    pub category: String,
    pub subcategory: Option<String>,
    pub notes: Option<String>,
}

//
// ================= Liabilities =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LiabilityDetail {
    Debt {
        total_amount: f64,
        amount_paid: f64,
        /// Annual rate as a decimal (0.18 for 18%)
        interest_rate: Option<f64>,
        min_monthly_payment: Option<f64>,
        payment_due_day: Option<u8>,
        due_date: Option<DateTime<Utc>>,
    },
    Installment {
        original_price: f64,
        monthly_payment: f64,
        total_installments: u32,
        installments_paid: u32,
        payment_due_day: Option<u8>,
    },
    Subscription {
        monthly_cost: f64,
        billing_cycle: String,
        next_billing_date: Option<DateTime<Utc>>,
        last_usage_days: Option<u32>,
    },
}

impl LiabilityDetail {
    pub fn kind(&self) -> &'static str {
        match self {
            LiabilityDetail::Debt { .. } => "debt",
            LiabilityDetail::Installment { .. } => "installment",
            LiabilityDetail::Subscription { .. } => "subscription",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Liability {
    pub id: i64,
    pub name: String,
    #[serde(flatten)]
    pub detail: LiabilityDetail,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewLiability {
    pub name: String,
    pub detail: LiabilityDetail,
    pub notes: Option<String>,
}

//
// ================= Investments =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvestmentDetail {
    /// Tradable holdings: stocks, crypto, ETFs
    Asset {
        symbol: String,
        quantity: f64,
        average_buy_price_usd: f64,
        average_buy_price_user_currency: f64,
        current_market_price: Option<f64>,
    },
    /// Fixed income: bonds, CDs, time deposits
    FixedDeposit {
        principal_amount: f64,
        interest_rate: f64,
        start_date: DateTime<Utc>,
        maturity_date: Option<DateTime<Utc>>,
        is_active: bool,
    },
}

impl InvestmentDetail {
    pub fn kind(&self) -> &'static str {
        match self {
            InvestmentDetail::Asset { .. } => "asset",
            InvestmentDetail::FixedDeposit { .. } => "fixed_deposit",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Investment {
    pub id: i64,
    pub name: String,
    pub currency: String,
    #[serde(flatten)]
    pub detail: InvestmentDetail,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewInvestment {
    pub name: String,
    pub currency: String,
    pub detail: InvestmentDetail,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AssetPatch {
    pub quantity: Option<f64>,
    pub average_buy_price_usd: Option<f64>,
    pub average_buy_price_user_currency: Option<f64>,
    pub current_market_price: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FixedDepositPatch {
    pub principal_amount: Option<f64>,
    pub interest_rate: Option<f64>,
    pub maturity_date: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
}

//
// ================= Goals =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    InProgress,
    Achieved,
    Abandoned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialGoal {
    pub id: i64,
    pub description: String,
    pub deadline: DateTime<Utc>,
    pub status: GoalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewGoal {
    pub description: String,
    pub deadline: DateTime<Utc>,
    pub notes: Option<String>,
}

//
// ================= Wishlist =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WishlistKind {
    Need,
    Want,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WishlistStatus {
    Active,
    Purchased,
    Removed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WishlistItem {
    pub id: i64,
    pub item_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_price: Option<f64>,
    pub urgency: UrgencyLevel,
    pub priority: UrgencyLevel,
    pub kind: WishlistKind,
    pub status: WishlistStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewWishlistItem {
    pub item_name: String,
    pub estimated_price: Option<f64>,
    pub urgency: UrgencyLevel,
    pub priority: UrgencyLevel,
    pub kind: WishlistKind,
    pub notes: Option<String>,
}

//
// ================= Store trait =================
//

/// Trait for domain record storage. Implementations must be safe to share
/// across concurrent sessions.
#[async_trait::async_trait]
pub trait FinanceStore: Send + Sync {
    async fn insert_transaction(&self, transaction: NewTransaction) -> Result<Transaction>;
    async fn list_transactions(&self, limit: Option<usize>) -> Result<Vec<Transaction>>;
    /// Sum of all transactions of one kind within a calendar month (UTC).
    async fn monthly_total(
        &self,
        kind: TransactionKind,
        year: i32,
        month: u32,
    ) -> Result<f64>;
    /// Average income per calendar month, over the months with any income.
    async fn average_monthly_income(&self) -> Result<Option<f64>>;

    async fn insert_liability(&self, liability: NewLiability) -> Result<Liability>;
    async fn list_liabilities(&self) -> Result<Vec<Liability>>;

    async fn insert_investment(&self, investment: NewInvestment) -> Result<Investment>;
    async fn list_investments(&self) -> Result<Vec<Investment>>;
    async fn update_asset(&self, name: &str, patch: AssetPatch) -> Result<Option<Investment>>;
    async fn update_fixed_deposit(
        &self,
        name: &str,
        patch: FixedDepositPatch,
    ) -> Result<Option<Investment>>;

    async fn insert_goal(&self, goal: NewGoal) -> Result<FinancialGoal>;
    async fn list_goals(&self) -> Result<Vec<FinancialGoal>>;
    async fn update_goal_status(
        &self,
        id: i64,
        status: GoalStatus,
    ) -> Result<Option<FinancialGoal>>;

    async fn insert_wishlist_item(&self, item: NewWishlistItem) -> Result<WishlistItem>;
    async fn list_wishlist(&self, status: Option<WishlistStatus>) -> Result<Vec<WishlistItem>>;
    async fn update_wishlist_status(
        &self,
        item_name: &str,
        status: WishlistStatus,
    ) -> Result<Option<WishlistItem>>;
}

/// Key a timestamp by UTC calendar month.
pub(crate) fn month_key(timestamp: &DateTime<Utc>) -> (i32, u32) {
    (timestamp.year(), timestamp.month())
}
