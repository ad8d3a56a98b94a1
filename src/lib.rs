//! Storefront library: typed table storage and the storefront services on
//! top of it.
//!
//! This crate provides the entity mapper between typed records and untyped
//! table rows, pluggable table stores, blob containers, message queues, and
//! the HTTP surface of the storefront.

use std::collections::HashMap;
use std::sync::Arc;

pub mod cart;
pub mod config;
pub mod entity;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod orders;
pub mod queue;
pub mod serialization;
pub mod server;
pub mod storage;
pub mod table;

use crate::cart::CartService;
use crate::config::Config;
use crate::models::{CustomerProfile, Product, CUSTOMER_TABLE, PRODUCT_TABLE};
use crate::orders::OrderService;
use crate::queue::{MemoryQueue, MessageQueue, ORDER_QUEUE, PRODUCT_QUEUE};
use crate::storage::BlobStore;
use crate::table::{TableService, TableStore};

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Untyped access to every table (ingestion and raw row endpoints).
    pub tables: Arc<dyn TableStore>,
    pub products: Arc<TableService<Product>>,
    pub customers: TableService<CustomerProfile>,
    pub cart: CartService,
    pub orders: Arc<OrderService>,
    /// Product image container.
    pub images: Arc<dyn BlobStore>,
    /// Contracts file share.
    pub contracts: Arc<dyn BlobStore>,
    /// Queues by name.
    pub queues: HashMap<String, Arc<dyn MessageQueue>>,
}

impl AppState {
    /// Wire services over the given stores. Creates every storefront table
    /// and the in-process queues.
    pub async fn build(
        config: Config,
        tables: Arc<dyn TableStore>,
        images: Arc<dyn BlobStore>,
        contracts: Arc<dyn BlobStore>,
    ) -> anyhow::Result<Self> {
        let order_queue: Arc<dyn MessageQueue> = Arc::new(MemoryQueue::new(ORDER_QUEUE));
        let product_queue: Arc<dyn MessageQueue> = Arc::new(MemoryQueue::new(PRODUCT_QUEUE));

        let products = Arc::new(TableService::new(tables.clone(), PRODUCT_TABLE).await?);
        let customers = TableService::new(tables.clone(), CUSTOMER_TABLE).await?;
        let cart = CartService::new(tables.clone()).await?;
        let orders = Arc::new(
            OrderService::new(tables.clone(), products.clone(), order_queue.clone()).await?,
        );

        let queues = [order_queue, product_queue]
            .into_iter()
            .map(|q| (q.name().to_string(), q))
            .collect();

        Ok(Self {
            config,
            tables,
            products,
            customers,
            cart,
            orders,
            images,
            contracts,
            queues,
        })
    }

    pub fn queue(&self, name: &str) -> Option<&Arc<dyn MessageQueue>> {
        self.queues.get(name)
    }
}
