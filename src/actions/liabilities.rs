//! Liability actions: debts, installment plans and subscriptions

use super::{parse_args, parse_timestamp, Action, ActionContext};
use crate::store::{LiabilityDetail, NewLiability};
use crate::Result;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
struct AddDebtParams {
    name: String,
    total_amount: f64,
    #[serde(default)]
    interest_rate: Option<f64>,
    #[serde(default)]
    amount_paid: Option<f64>,
    #[serde(default)]
    min_monthly_payment: Option<f64>,
    #[serde(default)]
    payment_due_day: Option<u8>,
    #[serde(default)]
    due_date: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

/// Record a high-interest debt (loan, credit card)
pub struct AddDebt;

#[async_trait::async_trait]
impl Action for AddDebt {
    fn name(&self) -> &'static str {
        "add_debt"
    }

    fn description(&self) -> &'static str {
        "Record a loan or credit-card debt with its interest rate and payment terms"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "description": "Descriptive name, e.g. 'Credit Card A'"},
                "total_amount": {"type": "number", "description": "Initial total amount of the debt"},
                "interest_rate": {"type": "number", "description": "APR as a decimal, 0.18 for 18%"},
                "amount_paid": {"type": "number", "description": "Amount already paid, defaults to 0"},
                "min_monthly_payment": {"type": "number"},
                "payment_due_day": {"type": "integer", "description": "Day of month the payment is due (1-31)"},
                "due_date": {"type": "string", "description": "Optional final due date, 'YYYY-MM-DD HH:MM:SS'"},
                "notes": {"type": "string"}
            },
            "required": ["name", "total_amount"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value> {
        let params: AddDebtParams = parse_args(args)?;
        let due_date = params
            .due_date
            .as_deref()
            .map(parse_timestamp)
            .transpose()?;

        ctx.progress.notify("Recording debt..");
        let record = ctx
            .store
            .insert_liability(NewLiability {
                name: params.name.clone(),
                detail: LiabilityDetail::Debt {
                    total_amount: params.total_amount,
                    amount_paid: params.amount_paid.unwrap_or(0.0),
                    interest_rate: params.interest_rate,
                    min_monthly_payment: params.min_monthly_payment,
                    payment_due_day: params.payment_due_day,
                    due_date,
                },
                notes: params.notes,
            })
            .await?;

        Ok(json!({
            "status": "success",
            "summary": format!(
                "Debt '{}' recorded (interest: {}). ID: {}",
                params.name,
                params
                    .interest_rate
                    .map(|r| format!("{:.2}%", r * 100.0))
                    .unwrap_or_else(|| "n/a".to_string()),
                record.id
            ),
        }))
    }
}

#[derive(Deserialize)]
struct AddInstallmentParams {
    item_name: String,
    original_price: f64,
    monthly_payment: f64,
    total_installments: u32,
    #[serde(default)]
    installments_paid: Option<u32>,
    #[serde(default)]
    payment_due_day: Option<u8>,
    #[serde(default)]
    notes: Option<String>,
}

/// Record an installment plan or buy-now-pay-later item
pub struct AddInstallment;

#[async_trait::async_trait]
impl Action for AddInstallment {
    fn name(&self) -> &'static str {
        "add_installment"
    }

    fn description(&self) -> &'static str {
        "Record an installment plan or buy-now-pay-later purchase"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "item_name": {"type": "string"},
                "original_price": {"type": "number", "description": "Full original price of the item"},
                "monthly_payment": {"type": "number", "description": "Fixed payment per month"},
                "total_installments": {"type": "integer"},
                "installments_paid": {"type": "integer", "description": "Payments already made, defaults to 0"},
                "payment_due_day": {"type": "integer"},
                "notes": {"type": "string"}
            },
            "required": ["item_name", "original_price", "monthly_payment", "total_installments"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value> {
        let params: AddInstallmentParams = parse_args(args)?;

        ctx.progress.notify("Recording installment plan..");
        let record = ctx
            .store
            .insert_liability(NewLiability {
                name: params.item_name.clone(),
                detail: LiabilityDetail::Installment {
                    original_price: params.original_price,
                    monthly_payment: params.monthly_payment,
                    total_installments: params.total_installments,
                    installments_paid: params.installments_paid.unwrap_or(0),
                    payment_due_day: params.payment_due_day,
                },
                notes: params.notes,
            })
            .await?;

        Ok(json!({
            "status": "success",
            "summary": format!(
                "Installment for '{}' recorded. Total payments: {}. ID: {}",
                params.item_name, params.total_installments, record.id
            ),
        }))
    }
}

#[derive(Deserialize)]
struct AddSubscriptionParams {
    name: String,
    monthly_cost: f64,
    #[serde(default)]
    billing_cycle: Option<String>,
    #[serde(default)]
    next_billing_date: Option<String>,
    #[serde(default)]
    last_usage_days: Option<u32>,
    #[serde(default)]
    notes: Option<String>,
}

/// Record a recurring subscription service
pub struct AddSubscription;

#[async_trait::async_trait]
impl Action for AddSubscription {
    fn name(&self) -> &'static str {
        "add_subscription"
    }

    fn description(&self) -> &'static str {
        "Record a recurring subscription service"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "description": "e.g. 'Netflix', 'Gym Membership'"},
                "monthly_cost": {"type": "number", "description": "Recurring cost on a monthly basis"},
                "billing_cycle": {"type": "string", "description": "'monthly', 'yearly' or 'weekly'"},
                "next_billing_date": {"type": "string", "description": "'YYYY-MM-DD HH:MM:SS'"},
                "last_usage_days": {"type": "integer", "description": "Days since the service was last used"},
                "notes": {"type": "string"}
            },
            "required": ["name", "monthly_cost"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value> {
        let params: AddSubscriptionParams = parse_args(args)?;
        let next_billing_date = params
            .next_billing_date
            .as_deref()
            .map(parse_timestamp)
            .transpose()?;

        ctx.progress.notify("Recording subscription..");
        let record = ctx
            .store
            .insert_liability(NewLiability {
                name: params.name.clone(),
                detail: LiabilityDetail::Subscription {
                    monthly_cost: params.monthly_cost,
                    billing_cycle: params
                        .billing_cycle
                        .map(|c| c.to_lowercase())
                        .unwrap_or_else(|| "monthly".to_string()),
                    next_billing_date,
                    last_usage_days: params.last_usage_days,
                },
                notes: params.notes,
            })
            .await?;

        Ok(json!({
            "status": "success",
            "summary": format!(
                "Subscription '{}' ({:.2} per month) recorded. ID: {}",
                params.name, params.monthly_cost, record.id
            ),
        }))
    }
}

/// Retrieve every liability, grouped by kind
pub struct ListLiabilities;

#[async_trait::async_trait]
impl Action for ListLiabilities {
    fn name(&self) -> &'static str {
        "list_liabilities"
    }

    fn description(&self) -> &'static str {
        "Retrieve all debts, installments and subscriptions"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    fn retry_safe(&self) -> bool {
        true
    }

    async fn execute(&self, _args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value> {
        ctx.progress.notify("Retrieving liabilities..");

        let liabilities = ctx.store.list_liabilities().await?;
        let mut grouped = json!({"debt": [], "installment": [], "subscription": []});
        for liability in &liabilities {
            if let Some(bucket) = grouped
                .get_mut(liability.detail.kind())
                .and_then(Value::as_array_mut)
            {
                bucket.push(serde_json::to_value(liability)?);
            }
        }

        Ok(json!({
            "status": "success",
            "summary": format!("Retrieved {} liability record(s)", liabilities.len()),
            "data": grouped,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ProgressSink;
    use crate::state::SessionState;
    use crate::store::InMemoryFinanceStore;

    #[tokio::test]
    async fn liabilities_group_by_kind() {
        let mut state = SessionState::new("thread-1");
        let store = InMemoryFinanceStore::new();
        let progress = ProgressSink::disabled();
        let mut ctx = ActionContext {
            state: &mut state,
            store: &store,
            progress: &progress,
        };

        AddDebt
            .execute(
                &json!({"name": "Credit Card A", "total_amount": 5000.0, "interest_rate": 0.18}),
                &mut ctx,
            )
            .await
            .unwrap();
        AddSubscription
            .execute(&json!({"name": "Netflix", "monthly_cost": 15.0}), &mut ctx)
            .await
            .unwrap();

        let result = ListLiabilities.execute(&json!({}), &mut ctx).await.unwrap();
        assert_eq!(result["status"], "success");
        assert_eq!(result["data"]["debt"].as_array().unwrap().len(), 1);
        assert_eq!(result["data"]["subscription"].as_array().unwrap().len(), 1);
        assert!(result["data"]["installment"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_debt_rejects_missing_fields() {
        let mut state = SessionState::new("thread-1");
        let store = InMemoryFinanceStore::new();
        let progress = ProgressSink::disabled();
        let mut ctx = ActionContext {
            state: &mut state,
            store: &store,
            progress: &progress,
        };

        let result = AddDebt.execute(&json!({"name": "No amount"}), &mut ctx).await;
        assert!(result.is_err());
    }
}
