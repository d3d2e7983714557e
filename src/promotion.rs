//! Promotion weight write path

use crate::error::{InvalidPromotionWeight, StoreError};
use crate::store::ItemStore;
use crate::types::{Item, PromotionWeight};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromotionError {
    #[error(transparent)]
    InvalidPromotionWeight(#[from] InvalidPromotionWeight),

    #[error("item {0} not found")]
    ItemNotFound(String),

    #[error("item {0} is not approved")]
    NotApproved(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Set an approved item's promotion weight and return the updated item
pub async fn set_promotion_weight(
    items: &dyn ItemStore,
    item_id: &str,
    weight: i64,
    promoted_at: DateTime<Utc>,
) -> Result<Item, PromotionError> {
    let weight = PromotionWeight::new(weight)?;

    let item = items
        .get_item(item_id)
        .await?
        .ok_or_else(|| PromotionError::ItemNotFound(item_id.to_string()))?;
    if !item.is_approved() {
        log::warn!("Refusing to promote {} item {}", item.status.as_str(), item_id);
        return Err(PromotionError::NotApproved(item_id.to_string()));
    }

    items.set_promotion_weight(item_id, weight, promoted_at).await?;
    log::info!("⭐ Item {} promoted to weight {}", item_id, weight.get());

    Ok(Item {
        promotion_weight: weight,
        ..item
    })
}
