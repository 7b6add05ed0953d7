//! Postgres finance store
//!
//! Flat columns for transactions; liabilities and investments keep their
//! tagged detail payload in a JSONB column next to a kind discriminator.

use super::*;
use crate::error::OrchestratorError;
use crate::Result;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;

pub struct PostgresFinanceStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

fn db_err(context: &str, e: impl std::fmt::Display) -> OrchestratorError {
    OrchestratorError::DatabaseError(format!("{}: {}", context, e))
}

impl PostgresFinanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    pub fn connect_lazy(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(url)
            .map_err(|e| OrchestratorError::ConfigError(format!("invalid database URL: {}", e)))?;
        Ok(Self::new(pool))
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS transactions (
                      id BIGSERIAL PRIMARY KEY,
                      ts TIMESTAMPTZ NOT NULL,
                      amount DOUBLE PRECISION NOT NULL,
                      currency TEXT NOT NULL,
                      kind TEXT NOT NULL,
                      description TEXT NOT NULL,
                      category TEXT NOT NULL,
                      subcategory TEXT,
                      notes TEXT
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS liabilities (
                      id BIGSERIAL PRIMARY KEY,
                      name TEXT NOT NULL,
                      kind TEXT NOT NULL,
                      detail JSONB NOT NULL,
                      notes TEXT
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS investments (
                      id BIGSERIAL PRIMARY KEY,
                      name TEXT NOT NULL,
                      currency TEXT NOT NULL,
                      kind TEXT NOT NULL,
                      detail JSONB NOT NULL,
                      notes TEXT
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS financial_goals (
                      id BIGSERIAL PRIMARY KEY,
                      description TEXT NOT NULL,
                      deadline TIMESTAMPTZ NOT NULL,
                      status TEXT NOT NULL DEFAULT 'in_progress',
                      notes TEXT
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS wishlist_items (
                      id BIGSERIAL PRIMARY KEY,
                      item_name TEXT NOT NULL,
                      estimated_price DOUBLE PRECISION,
                      urgency TEXT NOT NULL,
                      priority TEXT NOT NULL,
                      kind TEXT NOT NULL,
                      status TEXT NOT NULL DEFAULT 'active',
                      notes TEXT
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| db_err("Failed to initialize finance schema", e))?;

        Ok(())
    }
}

fn transaction_from_row(row: &sqlx::postgres::PgRow) -> Result<Transaction> {
    let kind: String = row.try_get("kind").map_err(|e| db_err("kind", e))?;
    Ok(Transaction {
        id: row.try_get("id").map_err(|e| db_err("id", e))?,
        timestamp: row.try_get("ts").map_err(|e| db_err("ts", e))?,
        amount: row.try_get("amount").map_err(|e| db_err("amount", e))?,
        currency: row.try_get("currency").map_err(|e| db_err("currency", e))?,
        kind: serde_json::from_value(serde_json::Value::from(kind))?,
        description: row
            .try_get("description")
            .map_err(|e| db_err("description", e))?,
        category: row.try_get("category").map_err(|e| db_err("category", e))?,
        subcategory: row
            .try_get("subcategory")
            .map_err(|e| db_err("subcategory", e))?,
        notes: row.try_get("notes").map_err(|e| db_err("notes", e))?,
    })
}

fn liability_from_row(row: &sqlx::postgres::PgRow) -> Result<Liability> {
    let detail: serde_json::Value = row.try_get("detail").map_err(|e| db_err("detail", e))?;
    Ok(Liability {
        id: row.try_get("id").map_err(|e| db_err("id", e))?,
        name: row.try_get("name").map_err(|e| db_err("name", e))?,
        detail: serde_json::from_value(detail)?,
        notes: row.try_get("notes").map_err(|e| db_err("notes", e))?,
    })
}

fn investment_from_row(row: &sqlx::postgres::PgRow) -> Result<Investment> {
    let detail: serde_json::Value = row.try_get("detail").map_err(|e| db_err("detail", e))?;
    Ok(Investment {
        id: row.try_get("id").map_err(|e| db_err("id", e))?,
        name: row.try_get("name").map_err(|e| db_err("name", e))?,
        currency: row.try_get("currency").map_err(|e| db_err("currency", e))?,
        detail: serde_json::from_value(detail)?,
        notes: row.try_get("notes").map_err(|e| db_err("notes", e))?,
    })
}

fn goal_from_row(row: &sqlx::postgres::PgRow) -> Result<FinancialGoal> {
    let status: String = row.try_get("status").map_err(|e| db_err("status", e))?;
    Ok(FinancialGoal {
        id: row.try_get("id").map_err(|e| db_err("id", e))?,
        description: row
            .try_get("description")
            .map_err(|e| db_err("description", e))?,
        deadline: row.try_get("deadline").map_err(|e| db_err("deadline", e))?,
        status: serde_json::from_value(serde_json::Value::from(status))?,
        notes: row.try_get("notes").map_err(|e| db_err("notes", e))?,
    })
}

fn wishlist_from_row(row: &sqlx::postgres::PgRow) -> Result<WishlistItem> {
    let urgency: String = row.try_get("urgency").map_err(|e| db_err("urgency", e))?;
    let priority: String = row.try_get("priority").map_err(|e| db_err("priority", e))?;
    let kind: String = row.try_get("kind").map_err(|e| db_err("kind", e))?;
    let status: String = row.try_get("status").map_err(|e| db_err("status", e))?;
    Ok(WishlistItem {
        id: row.try_get("id").map_err(|e| db_err("id", e))?,
        item_name: row
            .try_get("item_name")
            .map_err(|e| db_err("item_name", e))?,
        estimated_price: row
            .try_get("estimated_price")
            .map_err(|e| db_err("estimated_price", e))?,
        urgency: serde_json::from_value(serde_json::Value::from(urgency))?,
        priority: serde_json::from_value(serde_json::Value::from(priority))?,
        kind: serde_json::from_value(serde_json::Value::from(kind))?,
        status: serde_json::from_value(serde_json::Value::from(status))?,
        notes: row.try_get("notes").map_err(|e| db_err("notes", e))?,
    })
}

fn as_tag<T: serde::Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(OrchestratorError::SerializationError(
            serde::de::Error::custom(format!("expected string tag, got {}", other)),
        )),
    }
}

#[async_trait::async_trait]
impl FinanceStore for PostgresFinanceStore {
    async fn insert_transaction(&self, transaction: NewTransaction) -> Result<Transaction> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO transactions (ts, amount, currency, kind, description, category, subcategory, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, ts, amount, currency, kind, description, category, subcategory, notes
            "#,
        )
        .bind(transaction.timestamp)
        .bind(transaction.amount)
        .bind(&transaction.currency)
        .bind(as_tag(&transaction.kind)?)
        .bind(&transaction.description)
        .bind(&transaction.category)
        .bind(&transaction.subcategory)
        .bind(&transaction.notes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err("Failed to insert transaction", e))?;

        transaction_from_row(&row)
    }

    async fn list_transactions(&self, limit: Option<usize>) -> Result<Vec<Transaction>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, ts, amount, currency, kind, description, category, subcategory, notes
            FROM transactions
            ORDER BY ts DESC
            LIMIT $1
            "#,
        )
        .bind(limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to list transactions", e))?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn monthly_total(
        &self,
        kind: TransactionKind,
        year: i32,
        month: u32,
    ) -> Result<f64> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(amount), 0) AS total
            FROM transactions
            WHERE kind = $1
              AND EXTRACT(YEAR FROM ts AT TIME ZONE 'UTC') = $2
              AND EXTRACT(MONTH FROM ts AT TIME ZONE 'UTC') = $3
            "#,
        )
        .bind(as_tag(&kind)?)
        .bind(year as i64)
        .bind(month as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err("Failed to sum transactions", e))?;

        row.try_get("total").map_err(|e| db_err("total", e))
    }

    async fn average_monthly_income(&self) -> Result<Option<f64>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            SELECT AVG(monthly.total) AS average
            FROM (
              SELECT SUM(amount) AS total
              FROM transactions
              WHERE kind = 'income'
              GROUP BY date_trunc('month', ts AT TIME ZONE 'UTC')
            ) AS monthly
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err("Failed to average income", e))?;

        row.try_get("average").map_err(|e| db_err("average", e))
    }

    async fn insert_liability(&self, liability: NewLiability) -> Result<Liability> {
        self.ensure_schema().await?;

        let detail = serde_json::to_value(&liability.detail)?;
        let row = sqlx::query(
            r#"
            INSERT INTO liabilities (name, kind, detail, notes)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, detail, notes
            "#,
        )
        .bind(&liability.name)
        .bind(liability.detail.kind())
        .bind(detail)
        .bind(&liability.notes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err("Failed to insert liability", e))?;

        liability_from_row(&row)
    }

    async fn list_liabilities(&self) -> Result<Vec<Liability>> {
        self.ensure_schema().await?;

        let rows = sqlx::query("SELECT id, name, detail, notes FROM liabilities ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err("Failed to list liabilities", e))?;

        rows.iter().map(liability_from_row).collect()
    }

    async fn insert_investment(&self, investment: NewInvestment) -> Result<Investment> {
        self.ensure_schema().await?;

        let detail = serde_json::to_value(&investment.detail)?;
        let row = sqlx::query(
            r#"
            INSERT INTO investments (name, currency, kind, detail, notes)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, currency, detail, notes
            "#,
        )
        .bind(&investment.name)
        .bind(&investment.currency)
        .bind(investment.detail.kind())
        .bind(detail)
        .bind(&investment.notes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err("Failed to insert investment", e))?;

        investment_from_row(&row)
    }

    async fn list_investments(&self) -> Result<Vec<Investment>> {
        self.ensure_schema().await?;

        let rows =
            sqlx::query("SELECT id, name, currency, detail, notes FROM investments ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| db_err("Failed to list investments", e))?;

        rows.iter().map(investment_from_row).collect()
    }

    async fn update_asset(&self, name: &str, patch: AssetPatch) -> Result<Option<Investment>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            "SELECT id, name, currency, detail, notes FROM investments WHERE name = $1 AND kind = 'asset'",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("Failed to load asset", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut investment = investment_from_row(&row)?;

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

        sqlx::query("UPDATE investments SET detail = $1, notes = $2 WHERE id = $3")
            .bind(serde_json::to_value(&investment.detail)?)
            .bind(&investment.notes)
            .bind(investment.id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err("Failed to update asset", e))?;

        Ok(Some(investment))
    }

    async fn update_fixed_deposit(
        &self,
        name: &str,
        patch: FixedDepositPatch,
    ) -> Result<Option<Investment>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            "SELECT id, name, currency, detail, notes FROM investments WHERE name = $1 AND kind = 'fixed_deposit'",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("Failed to load fixed deposit", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut investment = investment_from_row(&row)?;

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

        sqlx::query("UPDATE investments SET detail = $1 WHERE id = $2")
            .bind(serde_json::to_value(&investment.detail)?)
            .bind(investment.id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err("Failed to update fixed deposit", e))?;

        Ok(Some(investment))
    }

    async fn insert_goal(&self, goal: NewGoal) -> Result<FinancialGoal> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO financial_goals (description, deadline, notes)
            VALUES ($1, $2, $3)
            RETURNING id, description, deadline, status, notes
            "#,
        )
        .bind(&goal.description)
        .bind(goal.deadline)
        .bind(&goal.notes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err("Failed to insert goal", e))?;

        goal_from_row(&row)
    }

    async fn list_goals(&self) -> Result<Vec<FinancialGoal>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            "SELECT id, description, deadline, status, notes FROM financial_goals ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to list goals", e))?;

        rows.iter().map(goal_from_row).collect()
    }

    async fn update_goal_status(
        &self,
        id: i64,
        status: GoalStatus,
    ) -> Result<Option<FinancialGoal>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            UPDATE financial_goals SET status = $1 WHERE id = $2
            RETURNING id, description, deadline, status, notes
            "#,
        )
        .bind(as_tag(&status)?)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("Failed to update goal", e))?;

        row.as_ref().map(goal_from_row).transpose()
    }

    async fn insert_wishlist_item(&self, item: NewWishlistItem) -> Result<WishlistItem> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO wishlist_items (item_name, estimated_price, urgency, priority, kind, notes)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, item_name, estimated_price, urgency, priority, kind, status, notes
            "#,
        )
        .bind(&item.item_name)
        .bind(item.estimated_price)
        .bind(as_tag(&item.urgency)?)
        .bind(as_tag(&item.priority)?)
        .bind(as_tag(&item.kind)?)
        .bind(&item.notes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err("Failed to insert wishlist item", e))?;

        wishlist_from_row(&row)
    }

    async fn list_wishlist(&self, status: Option<WishlistStatus>) -> Result<Vec<WishlistItem>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, item_name, estimated_price, urgency, priority, kind, status, notes
            FROM wishlist_items
            WHERE $1::TEXT IS NULL OR status = $1
            ORDER BY id
            "#,
        )
        .bind(status.map(|s| as_tag(&s)).transpose()?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to list wishlist", e))?;

        rows.iter().map(wishlist_from_row).collect()
    }

    async fn update_wishlist_status(
        &self,
        item_name: &str,
        status: WishlistStatus,
    ) -> Result<Option<WishlistItem>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            UPDATE wishlist_items SET status = $1
            WHERE id = (
              SELECT id FROM wishlist_items WHERE item_name ILIKE '%' || $2 || '%' ORDER BY id LIMIT 1
            )
            RETURNING id, item_name, estimated_price, urgency, priority, kind, status, notes
            "#,
        )
        .bind(as_tag(&status)?)
        .bind(item_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("Failed to update wishlist item", e))?;

        row.as_ref().map(wishlist_from_row).transpose()
    }
}
