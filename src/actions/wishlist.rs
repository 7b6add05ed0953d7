//! Wishlist actions

use super::{parse_args, Action, ActionContext};
use crate::store::{NewWishlistItem, UrgencyLevel, WishlistKind, WishlistStatus};
use crate::Result;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
struct AddWishlistItemParams {
    item_name: String,
    #[serde(default)]
    estimated_price: Option<f64>,
    #[serde(default)]
    urgency: Option<UrgencyLevel>,
    #[serde(default)]
    priority: Option<UrgencyLevel>,
    #[serde(default, rename = "type")]
    kind: Option<WishlistKind>,
    #[serde(default)]
    notes: Option<String>,
}

/// Add an item to the user's wishlist
pub struct AddWishlistItem;

#[async_trait::async_trait]
impl Action for AddWishlistItem {
    fn name(&self) -> &'static str {
        "add_wishlist_item"
    }

    fn description(&self) -> &'static str {
        "Add an item to the user's wishlist"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "item_name": {"type": "string"},
                "estimated_price": {"type": "number"},
                "urgency": {"type": "string", "enum": ["low", "medium", "high"], "description": "User's perceived urgency"},
                "priority": {"type": "string", "enum": ["low", "medium", "high"], "description": "Calculated financial priority"},
                "type": {"type": "string", "enum": ["need", "want"]},
                "notes": {"type": "string", "description": "Rationale or details"}
            },
            "required": ["item_name"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value> {
        let params: AddWishlistItemParams = parse_args(args)?;

        ctx.progress
            .notify(format!("Adding '{}' to wishlist..", params.item_name));
        ctx.store
            .insert_wishlist_item(NewWishlistItem {
                item_name: params.item_name.clone(),
                estimated_price: params.estimated_price,
                urgency: params.urgency.unwrap_or(UrgencyLevel::Low),
                priority: params.priority.unwrap_or(UrgencyLevel::Medium),
                kind: params.kind.unwrap_or(WishlistKind::Want),
                notes: params.notes,
            })
            .await?;

        Ok(json!({
            "status": "success",
            "summary": format!("Added '{}' to wishlist", params.item_name),
        }))
    }
}

#[derive(Deserialize)]
struct UpdateWishlistStatusParams {
    item_name: String,
    new_status: WishlistStatus,
}

/// Update the status of a wishlist item (e.g. mark as purchased)
pub struct UpdateWishlistStatus;

#[async_trait::async_trait]
impl Action for UpdateWishlistStatus {
    fn name(&self) -> &'static str {
        "update_wishlist_status"
    }

    fn description(&self) -> &'static str {
        "Mark a wishlist item as purchased, removed or active again"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "item_name": {"type": "string", "description": "Name of the item, partial match allowed"},
                "new_status": {"type": "string", "enum": ["active", "purchased", "removed"]}
            },
            "required": ["item_name", "new_status"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value> {
        let params: UpdateWishlistStatusParams = parse_args(args)?;

        ctx.progress.notify("Updating wishlist item..");
        match ctx
            .store
            .update_wishlist_status(&params.item_name, params.new_status)
            .await?
        {
            Some(item) => Ok(json!({
                "status": "success",
                "summary": format!("Updated '{}' status to {:?}", item.item_name, item.status),
            })),
            None => Ok(json!({
                "status": "error",
                "error_message": format!("Item '{}' not found", params.item_name),
            })),
        }
    }
}

#[derive(Deserialize)]
struct ListWishlistParams {
    #[serde(default)]
    status: Option<WishlistStatus>,
}

/// Retrieve wishlist items, optionally filtered by status
pub struct ListWishlist;

#[async_trait::async_trait]
impl Action for ListWishlist {
    fn name(&self) -> &'static str {
        "list_wishlist"
    }

    fn description(&self) -> &'static str {
        "Retrieve wishlist items, optionally filtered by status"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "status": {"type": "string", "enum": ["active", "purchased", "removed"]}
            }
        })
    }

    fn retry_safe(&self) -> bool {
        true
    }

    async fn execute(&self, args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value> {
        let params: ListWishlistParams = parse_args(args)?;

        ctx.progress.notify("Retrieving wishlist..");
        let items = ctx.store.list_wishlist(params.status).await?;
        Ok(json!({
            "status": "success",
            "summary": format!("Retrieved {} wishlist item(s)", items.len()),
            "wishlist": items,
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
    async fn wishlist_flow_add_update_list() {
        let mut state = SessionState::new("thread-1");
        let store = InMemoryFinanceStore::new();
        let progress = ProgressSink::disabled();
        let mut ctx = ActionContext {
            state: &mut state,
            store: &store,
            progress: &progress,
        };

        AddWishlistItem
            .execute(
                &json!({"item_name": "Standing Desk", "estimated_price": 3000000.0, "type": "need"}),
                &mut ctx,
            )
            .await
            .unwrap();

        UpdateWishlistStatus
            .execute(
                &json!({"item_name": "standing", "new_status": "purchased"}),
                &mut ctx,
            )
            .await
            .unwrap();

        let active = ListWishlist
            .execute(&json!({"status": "active"}), &mut ctx)
            .await
            .unwrap();
        assert!(active["wishlist"].as_array().unwrap().is_empty());

        let all = ListWishlist.execute(&json!({}), &mut ctx).await.unwrap();
        assert_eq!(all["wishlist"].as_array().unwrap().len(), 1);
    }
}
