//! Investment actions: tradable assets and fixed deposits

use super::{parse_args, parse_timestamp, Action, ActionContext};
use crate::store::{AssetPatch, FixedDepositPatch, InvestmentDetail, NewInvestment};
use crate::Result;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
struct AddAssetParams {
    name: String,
    symbol: String,
    quantity: f64,
    average_buy_price_usd: f64,
    average_buy_price_user_currency: f64,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

/// Record a variable income asset (stocks, crypto, ETFs)
pub struct AddAsset;

#[async_trait::async_trait]
impl Action for AddAsset {
    fn name(&self) -> &'static str {
        "add_asset"
    }

    fn description(&self) -> &'static str {
        "Record a tradable asset holding (stocks, crypto, ETFs)"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "description": "Display name, e.g. 'Apple Stock'"},
                "symbol": {"type": "string", "description": "Ticker symbol"},
                "quantity": {"type": "number", "description": "Units or shares held"},
                "average_buy_price_usd": {"type": "number"},
                "average_buy_price_user_currency": {"type": "number"},
                "currency": {"type": "string", "description": "Local currency code, defaults to the user's currency"},
                "notes": {"type": "string"}
            },
            "required": ["name", "symbol", "quantity", "average_buy_price_usd", "average_buy_price_user_currency"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value> {
        let params: AddAssetParams = parse_args(args)?;
        let currency = params
            .currency
            .map(|c| c.to_uppercase())
            .unwrap_or_else(|| ctx.state.profile().currency.clone());

        ctx.progress
            .notify(format!("Recording asset {} ({})..", params.name, params.symbol));
        let record = ctx
            .store
            .insert_investment(NewInvestment {
                name: params.name.clone(),
                currency: currency.clone(),
                detail: InvestmentDetail::Asset {
                    symbol: params.symbol.to_uppercase(),
                    quantity: params.quantity,
                    average_buy_price_usd: params.average_buy_price_usd,
                    average_buy_price_user_currency: params.average_buy_price_user_currency,
                    // Market price starts at the USD buy price until refreshed
                    current_market_price: Some(params.average_buy_price_usd),
                },
                notes: params.notes,
            })
            .await?;

        Ok(json!({
            "status": "success",
            "summary": format!(
                "Asset '{}' recorded. Qty: {} | Avg USD: {:.2} | Avg {}: {:.2}",
                params.name,
                params.quantity,
                params.average_buy_price_usd,
                currency,
                params.average_buy_price_user_currency
            ),
            "investment_id": record.id,
        }))
    }
}

#[derive(Deserialize)]
struct AddFixedDepositParams {
    name: String,
    principal_amount: f64,
    interest_rate: f64,
    start_date: String,
    #[serde(default)]
    maturity_date: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

/// Record a fixed income investment (bonds, CDs, time deposits)
pub struct AddFixedDeposit;

#[async_trait::async_trait]
impl Action for AddFixedDeposit {
    fn name(&self) -> &'static str {
        "add_fixed_deposit"
    }

    fn description(&self) -> &'static str {
        "Record a fixed income investment (bonds, CDs, time deposits)"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "description": "Display name, e.g. 'Emergency Fund CD'"},
                "principal_amount": {"type": "number"},
                "interest_rate": {"type": "number", "description": "Annual rate as a decimal, 0.05 for 5%"},
                "start_date": {"type": "string", "description": "'YYYY-MM-DD'"},
                "maturity_date": {"type": "string", "description": "Optional, 'YYYY-MM-DD'"},
                "currency": {"type": "string"},
                "notes": {"type": "string"}
            },
            "required": ["name", "principal_amount", "interest_rate", "start_date"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value> {
        let params: AddFixedDepositParams = parse_args(args)?;
        let start_date = parse_timestamp(&params.start_date)?;
        let maturity_date = params
            .maturity_date
            .as_deref()
            .map(parse_timestamp)
            .transpose()?;
        let currency = params
            .currency
            .map(|c| c.to_uppercase())
            .unwrap_or_else(|| ctx.state.profile().currency.clone());

        ctx.progress
            .notify(format!("Recording fixed deposit {}..", params.name));
        let record = ctx
            .store
            .insert_investment(NewInvestment {
                name: params.name.clone(),
                currency: currency.clone(),
                detail: InvestmentDetail::FixedDeposit {
                    principal_amount: params.principal_amount,
                    interest_rate: params.interest_rate,
                    start_date,
                    maturity_date,
                    is_active: true,
                },
                notes: params.notes,
            })
            .await?;

        Ok(json!({
            "status": "success",
            "summary": format!(
                "Fixed deposit '{}' recorded. Principal: {} {:.2} at {:.2}%",
                params.name,
                currency,
                params.principal_amount,
                params.interest_rate * 100.0
            ),
            "investment_id": record.id,
        }))
    }
}

/// Retrieve the whole portfolio, grouped by kind
pub struct ListInvestments;

#[async_trait::async_trait]
impl Action for ListInvestments {
    fn name(&self) -> &'static str {
        "list_investments"
    }

    fn description(&self) -> &'static str {
        "Retrieve all investment holdings (assets and fixed deposits)"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    fn retry_safe(&self) -> bool {
        true
    }

    async fn execute(&self, _args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value> {
        ctx.progress.notify("Retrieving investments..");

        let investments = ctx.store.list_investments().await?;
        let mut grouped = json!({"asset": [], "fixed_deposit": []});
        for investment in &investments {
            if let Some(bucket) = grouped
                .get_mut(investment.detail.kind())
                .and_then(Value::as_array_mut)
            {
                bucket.push(serde_json::to_value(investment)?);
            }
        }

        Ok(json!({
            "status": "success",
            "summary": format!("Retrieved {} investment record(s)", investments.len()),
            "data": grouped,
        }))
    }
}

#[derive(Deserialize)]
struct UpdateAssetParams {
    name: String,
    #[serde(default)]
    quantity: Option<f64>,
    #[serde(default)]
    average_buy_price_usd: Option<f64>,
    #[serde(default)]
    average_buy_price_user_currency: Option<f64>,
    #[serde(default)]
    current_market_price: Option<f64>,
    #[serde(default)]
    notes: Option<String>,
}

/// Update an existing asset holding
pub struct UpdateAsset;

#[async_trait::async_trait]
impl Action for UpdateAsset {
    fn name(&self) -> &'static str {
        "update_asset"
    }

    fn description(&self) -> &'static str {
        "Update quantity, prices or notes of an existing asset"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "description": "Exact name of the investment"},
                "quantity": {"type": "number"},
                "average_buy_price_usd": {"type": "number"},
                "average_buy_price_user_currency": {"type": "number"},
                "current_market_price": {"type": "number"},
                "notes": {"type": "string"}
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value> {
        let params: UpdateAssetParams = parse_args(args)?;

        let mut changes = Vec::new();
        if let Some(v) = params.quantity {
            changes.push(format!("qty: {}", v));
        }
        if let Some(v) = params.average_buy_price_usd {
            changes.push(format!("avg USD: {:.2}", v));
        }
        if let Some(v) = params.average_buy_price_user_currency {
            changes.push(format!("avg local: {:.2}", v));
        }
        if let Some(v) = params.current_market_price {
            changes.push(format!("market price: {:.2}", v));
        }
        if params.notes.is_some() {
            changes.push("notes updated".to_string());
        }

        ctx.progress
            .notify(format!("Updating asset {}..", params.name));
        let updated = ctx
            .store
            .update_asset(
                &params.name,
                AssetPatch {
                    quantity: params.quantity,
                    average_buy_price_usd: params.average_buy_price_usd,
                    average_buy_price_user_currency: params.average_buy_price_user_currency,
                    current_market_price: params.current_market_price,
                    notes: params.notes,
                },
            )
            .await?;

        match updated {
            Some(_) => Ok(json!({
                "status": "success",
                "summary": format!("Updated '{}': {}", params.name, changes.join(", ")),
            })),
            None => Ok(json!({
                "status": "error",
                "error_message": format!("Asset '{}' not found", params.name),
            })),
        }
    }
}

#[derive(Deserialize)]
struct UpdateFixedDepositParams {
    name: String,
    #[serde(default)]
    principal_amount: Option<f64>,
    #[serde(default)]
    interest_rate: Option<f64>,
    #[serde(default)]
    maturity_date: Option<String>,
    #[serde(default)]
    is_active: Option<bool>,
}

/// Update an existing fixed deposit
pub struct UpdateFixedDeposit;

#[async_trait::async_trait]
impl Action for UpdateFixedDeposit {
    fn name(&self) -> &'static str {
        "update_fixed_deposit"
    }

    fn description(&self) -> &'static str {
        "Update an existing fixed deposit, or mark it matured"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "description": "Exact name of the investment"},
                "principal_amount": {"type": "number"},
                "interest_rate": {"type": "number"},
                "maturity_date": {"type": "string", "description": "'YYYY-MM-DD'"},
                "is_active": {"type": "boolean", "description": "false marks the deposit matured/closed"}
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value> {
        let params: UpdateFixedDepositParams = parse_args(args)?;
        let maturity_date = params
            .maturity_date
            .as_deref()
            .map(parse_timestamp)
            .transpose()?;

        ctx.progress
            .notify(format!("Updating fixed deposit {}..", params.name));
        let updated = ctx
            .store
            .update_fixed_deposit(
                &params.name,
                FixedDepositPatch {
                    principal_amount: params.principal_amount,
                    interest_rate: params.interest_rate,
                    maturity_date,
                    is_active: params.is_active,
                },
            )
            .await?;

        match updated {
            Some(_) => Ok(json!({
                "status": "success",
                "summary": format!("Fixed deposit '{}' updated", params.name),
            })),
            None => Ok(json!({
                "status": "error",
                "error_message": format!("Fixed deposit '{}' not found", params.name),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ProgressSink;
    use crate::state::SessionState;
    use crate::store::InMemoryFinanceStore;

    #[tokio::test]
    async fn update_missing_asset_reports_error_payload() {
        let mut state = SessionState::new("thread-1");
        let store = InMemoryFinanceStore::new();
        let progress = ProgressSink::disabled();
        let mut ctx = ActionContext {
            state: &mut state,
            store: &store,
            progress: &progress,
        };

        let result = UpdateAsset
            .execute(&json!({"name": "Ghost", "quantity": 1.0}), &mut ctx)
            .await
            .unwrap();
        assert_eq!(result["status"], "error");
    }

    #[tokio::test]
    async fn asset_roundtrip_through_actions() {
        let mut state = SessionState::new("thread-1");
        let store = InMemoryFinanceStore::new();
        let progress = ProgressSink::disabled();
        let mut ctx = ActionContext {
            state: &mut state,
            store: &store,
            progress: &progress,
        };

        AddAsset
            .execute(
                &json!({
                    "name": "Apple Stock",
                    "symbol": "aapl",
                    "quantity": 10.0,
                    "average_buy_price_usd": 150.0,
                    "average_buy_price_user_currency": 2400000.0,
                    "currency": "idr"
                }),
                &mut ctx,
            )
            .await
            .unwrap();

        let listed = ListInvestments.execute(&json!({}), &mut ctx).await.unwrap();
        let assets = listed["data"]["asset"].as_array().unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0]["symbol"], "AAPL");
        assert_eq!(assets[0]["currency"], "IDR");
    }
}
