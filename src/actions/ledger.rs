//! Bookkeeping actions: transactions, balance and budget

use super::{parse_args, parse_timestamp, Action, ActionContext};
use crate::models::ProfileField;
use crate::store::{NewTransaction, TransactionKind};
use crate::Result;
use chrono::{Datelike, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

fn currency_schema() -> Value {
    json!({"type": "string", "description": "Currency code, defaults to the user's currency"})
}

#[derive(Deserialize)]
struct RecordTransactionParams {
    timestamp: String,
    amount: f64,
    #[serde(default)]
    currency: Option<String>,
    #[serde(rename = "type")]
    kind: TransactionKind,
    description: String,
    category: String,
    #[serde(default)]
    subcategory: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

/// Insert a transaction into the ledger
pub struct RecordTransaction;

#[async_trait::async_trait]
impl Action for RecordTransaction {
    fn name(&self) -> &'static str {
        "record_transaction"
    }

    fn description(&self) -> &'static str {
        "Record an income or expense transaction"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "timestamp": {"type": "string", "description": "Transaction date, 'YYYY-MM-DD HH:MM:SS'"},
                "amount": {"type": "number", "description": "Amount of the transaction"},
                "currency": currency_schema(),
                "type": {"type": "string", "enum": ["income", "expense"]},
                "description": {"type": "string"},
                "category": {"type": "string", "description": "Transaction category"},
                "subcategory": {"type": "string", "description": "Optional sub-category"},
                "notes": {"type": "string", "description": "Optional notes from the user"}
            },
            "required": ["timestamp", "amount", "type", "description", "category"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value> {
        let params: RecordTransactionParams = parse_args(args)?;
        let timestamp = parse_timestamp(&params.timestamp)?;
        let currency = params
            .currency
            .map(|c| c.to_uppercase())
            .unwrap_or_else(|| ctx.state.profile().currency.clone());

        ctx.progress.notify("Recording transaction..");
        let record = ctx
            .store
            .insert_transaction(NewTransaction {
                timestamp,
                amount: params.amount,
                currency: currency.clone(),
                kind: params.kind,
                description: params.description.clone(),
                category: params.category.to_lowercase(),
                subcategory: params.subcategory.map(|s| s.to_lowercase()),
                notes: params.notes,
            })
            .await?;

        Ok(json!({
            "status": "success",
            "summary": format!(
                "Transaction recorded: {} {:.2} {} for {}",
                match params.kind {
                    TransactionKind::Income => "income of",
                    TransactionKind::Expense => "expense of",
                },
                params.amount,
                currency,
                params.description
            ),
            "transaction": record,
        }))
    }
}

#[derive(Deserialize)]
struct ListTransactionsParams {
    #[serde(default)]
    limit: Option<usize>,
}

/// Read back recent transactions
pub struct ListTransactions;

#[async_trait::async_trait]
impl Action for ListTransactions {
    fn name(&self) -> &'static str {
        "list_transactions"
    }

    fn description(&self) -> &'static str {
        "List recent transactions, newest first"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": {"type": "integer", "description": "Maximum number of transactions"}
            }
        })
    }

    fn retry_safe(&self) -> bool {
        true
    }

    async fn execute(&self, args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value> {
        let params: ListTransactionsParams = parse_args(args)?;
        ctx.progress.notify("Retrieving transactions..");

        let transactions = ctx.store.list_transactions(params.limit).await?;
        Ok(json!({
            "status": "success",
            "summary": format!("Retrieved {} transaction(s)", transactions.len()),
            "transactions": transactions,
        }))
    }
}

/// Read the cached balance from the profile
pub struct CheckBalance;

#[async_trait::async_trait]
impl Action for CheckBalance {
    fn name(&self) -> &'static str {
        "check_balance"
    }

    fn description(&self) -> &'static str {
        "Check the user's current account balance"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    fn retry_safe(&self) -> bool {
        true
    }

    async fn execute(&self, _args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value> {
        ctx.progress.notify("Checking balance..");
        let profile = ctx.state.profile();
        Ok(json!({
            "status": "success",
            "balance": profile.balance,
            "currency": profile.currency,
        }))
    }
}

#[derive(Deserialize)]
struct UpdateBalanceParams {
    balance: f64,
}

/// Designated writer for the cached balance
pub struct UpdateBalance;

#[async_trait::async_trait]
impl Action for UpdateBalance {
    fn name(&self) -> &'static str {
        "update_balance"
    }

    fn description(&self) -> &'static str {
        "Set the user's current account balance"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "balance": {"type": "number", "description": "New balance in the user's currency"}
            },
            "required": ["balance"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value> {
        let params: UpdateBalanceParams = parse_args(args)?;
        ctx.progress.notify("Updating balance..");
        ctx.state
            .set(ProfileField::Balance, Value::from(params.balance))?;

        Ok(json!({
            "status": "success",
            "summary": format!(
                "Balance updated to {:.2} {}",
                params.balance,
                ctx.state.profile().currency
            ),
        }))
    }
}

/// Compare this month's spending with the configured budget
pub struct CheckBudget;

#[async_trait::async_trait]
impl Action for CheckBudget {
    fn name(&self) -> &'static str {
        "check_budget"
    }

    fn description(&self) -> &'static str {
        "Compare this month's spending against the monthly budget"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    fn retry_safe(&self) -> bool {
        true
    }

    async fn execute(&self, _args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value> {
        ctx.progress.notify("Checking budget..");

        let Some(budget) = ctx.state.profile().monthly_budget else {
            return Ok(json!({
                "status": "error",
                "error_message": "No monthly budget is configured",
            }));
        };

        let now = Utc::now();
        let spent = ctx
            .store
            .monthly_total(TransactionKind::Expense, now.year(), now.month())
            .await?;

        Ok(json!({
            "status": "success",
            "monthly_budget": budget,
            "spent_this_month": spent,
            "remaining": budget - spent,
            "currency": ctx.state.profile().currency,
        }))
    }
}

#[derive(Deserialize)]
struct UpdateBudgetParams {
    monthly_budget: Option<f64>,
}

/// Designated writer for the monthly budget
pub struct UpdateBudget;

#[async_trait::async_trait]
impl Action for UpdateBudget {
    fn name(&self) -> &'static str {
        "update_budget"
    }

    fn description(&self) -> &'static str {
        "Set or clear the user's monthly spending budget"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "monthly_budget": {
                    "type": "number",
                    "description": "New monthly budget; omit to clear"
                }
            }
        })
    }

    async fn execute(&self, args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value> {
        let params: UpdateBudgetParams = parse_args(args)?;
        ctx.progress.notify("Updating budget..");

        let value = params.monthly_budget.map(Value::from).unwrap_or(Value::Null);
        ctx.state.set(ProfileField::MonthlyBudget, value)?;

        let summary = match params.monthly_budget {
            Some(budget) => format!(
                "Monthly budget set to {:.2} {}",
                budget,
                ctx.state.profile().currency
            ),
            None => "Monthly budget cleared".to_string(),
        };
        Ok(json!({"status": "success", "summary": summary}))
    }
}

/// Average income per month across recorded history
pub struct AverageIncome;

#[async_trait::async_trait]
impl Action for AverageIncome {
    fn name(&self) -> &'static str {
        "average_income"
    }

    fn description(&self) -> &'static str {
        "Compute the user's average monthly income from recorded transactions"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    fn retry_safe(&self) -> bool {
        true
    }

    async fn execute(&self, _args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value> {
        ctx.progress.notify("Computing average income..");

        match ctx.store.average_monthly_income().await? {
            Some(average) => Ok(json!({
                "status": "success",
                "average_monthly_income": average,
                "currency": ctx.state.profile().currency,
            })),
            None => Ok(json!({
                "status": "error",
                "error_message": "No income transactions recorded yet",
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ProgressSink;
    use crate::state::SessionState;
    use crate::store::{FinanceStore, InMemoryFinanceStore};

    fn ctx_parts() -> (SessionState, InMemoryFinanceStore, ProgressSink) {
        (
            SessionState::new("thread-1"),
            InMemoryFinanceStore::new(),
            ProgressSink::disabled(),
        )
    }

    #[tokio::test]
    async fn record_transaction_defaults_to_profile_currency() {
        let (mut state, store, progress) = ctx_parts();
        state
            .set(ProfileField::Currency, Value::from("IDR"))
            .unwrap();
        let mut ctx = ActionContext {
            state: &mut state,
            store: &store,
            progress: &progress,
        };

        let result = RecordTransaction
            .execute(
                &json!({
                    "timestamp": "2025-03-15 12:30:00",
                    "amount": 50000,
                    "type": "expense",
                    "description": "lunch",
                    "category": "Food"
                }),
                &mut ctx,
            )
            .await
            .unwrap();

        assert_eq!(result["status"], "success");
        let stored = store.list_transactions(None).await.unwrap();
        assert_eq!(stored[0].currency, "IDR");
        assert_eq!(stored[0].category, "food");
    }

    #[tokio::test]
    async fn update_balance_writes_through_accessor() {
        let (mut state, store, progress) = ctx_parts();
        let mut ctx = ActionContext {
            state: &mut state,
            store: &store,
            progress: &progress,
        };

        UpdateBalance
            .execute(&json!({"balance": 750000.0}), &mut ctx)
            .await
            .unwrap();
        assert_eq!(state.profile().balance, 750000.0);
    }

    #[tokio::test]
    async fn check_budget_requires_configuration() {
        let (mut state, store, progress) = ctx_parts();
        let mut ctx = ActionContext {
            state: &mut state,
            store: &store,
            progress: &progress,
        };

        let result = CheckBudget.execute(&json!({}), &mut ctx).await.unwrap();
        assert_eq!(result["status"], "error");
    }

    #[tokio::test]
    async fn check_budget_reports_remaining() {
        let (mut state, store, progress) = ctx_parts();
        state
            .set(ProfileField::MonthlyBudget, Value::from(2_000_000.0))
            .unwrap();

        let now = Utc::now();
        store
            .insert_transaction(NewTransaction {
                timestamp: now,
                amount: 500_000.0,
                currency: "IDR".to_string(),
                kind: TransactionKind::Expense,
                description: "groceries".to_string(),
                category: "food".to_string(),
                subcategory: None,
                notes: None,
            })
            .await
            .unwrap();

        let mut ctx = ActionContext {
            state: &mut state,
            store: &store,
            progress: &progress,
        };
        let result = CheckBudget.execute(&json!({}), &mut ctx).await.unwrap();
        assert_eq!(result["status"], "success");
        assert_eq!(result["remaining"], 1_500_000.0);
    }
}
