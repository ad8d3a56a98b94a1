//! Shopping carts.
//!
//! A cart is the partition of the Cart table named by the user id; each row
//! is one product, keyed by product id.

use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::Utc;
use tracing::{debug, warn};

use crate::entity::EntityIdentity;
use crate::models::{CartItem, Product, CART_TABLE};
use crate::table::{TableError, TableResult, TableService, TableStore};

/// Attempts at the read-increment-write cycle before a conflict surfaces.
const MAX_ATTEMPTS: usize = 3;

pub struct CartService {
    items: TableService<CartItem>,
}

impl CartService {
    pub async fn new(store: Arc<dyn TableStore>) -> TableResult<Self> {
        Ok(Self {
            items: TableService::new(store, CART_TABLE).await?,
        })
    }

    /// Put `product` in the user's cart, or bump its quantity by one if it is
    /// already there. Returns the stored line.
    pub async fn add_item(&self, user_id: &str, product: &Product) -> TableResult<CartItem> {
        let product_id = product.identity.row_key.as_str();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match self.items.get_entity(user_id, product_id).await? {
                Some(mut item) => {
                    item.quantity = item.quantity.saturating_add(1);
                    self.items.update_entity(&item).await.map(|etag| {
                        item.identity.etag = Some(etag);
                        item
                    })
                }
                None => {
                    let item = new_line(user_id, product);
                    self.items.add_entity(&item).await.map(|etag| {
                        let mut item = item;
                        item.identity.etag = Some(etag);
                        item
                    })
                }
            };
            match result {
                Err(
                    TableError::PreconditionFailed { .. } | TableError::EntityAlreadyExists { .. },
                ) if attempt < MAX_ATTEMPTS => {
                    debug!(user_id, product_id, attempt, "Cart line changed underneath us; retrying");
                }
                other => return other,
            }
        }
    }

    /// The user's cart, most recently added first.
    pub async fn get_cart(&self, user_id: &str) -> TableResult<Vec<CartItem>> {
        let mut items = self.items.query_partition(user_id).await?;
        items.sort_by(|a, b| b.added_date.cmp(&a.added_date));
        Ok(items)
    }

    pub async fn remove_item(&self, user_id: &str, product_id: &str) -> TableResult<()> {
        self.items.delete_entity(user_id, product_id).await
    }

    /// Empty the cart. Returns the number of lines removed.
    pub async fn clear(&self, user_id: &str) -> TableResult<usize> {
        let items = self.items.query_partition(user_id).await?;
        for item in &items {
            self.items
                .delete_entity(user_id, &item.identity.row_key)
                .await?;
        }
        Ok(items.len())
    }
}

fn new_line(user_id: &str, product: &Product) -> CartItem {
    let product_id = product.identity.row_key.clone();
    CartItem {
        identity: EntityIdentity::new(user_id, product_id.clone()),
        product_id,
        product_name: product.product_name.clone(),
        image_url: product.image_url.clone().unwrap_or_default(),
        product_price: parse_price(&product.price),
        quantity: 1,
        added_date: Utc::now(),
    }
}

/// Product prices are free text; anything unparsable counts as zero.
fn parse_price(text: &str) -> BigDecimal {
    let trimmed = text.trim().trim_start_matches(|c: char| !c.is_ascii_digit() && c != '-');
    match BigDecimal::from_str(trimmed) {
        Ok(price) => price,
        Err(_) => {
            if !text.trim().is_empty() {
                warn!("Unparsable product price {:?}; using 0", text);
            }
            BigDecimal::default()
        }
    }
}
