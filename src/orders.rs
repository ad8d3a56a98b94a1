//! Order placement and the order-queue worker.
//!
//! Placing an order only enqueues it; the worker is what writes the Order
//! table. Messages carry the order's PascalCase JSON without identity.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::QueuesConfig;
use crate::entity::EntityIdentity;
use crate::models::{
    Customer, Order, Product, CUSTOMER_PARTITION, ORDER_PARTITION, ORDER_TABLE, PRODUCT_PARTITION,
    QUEUED,
};
use crate::queue::{MessageQueue, QueueError, ReceivedMessage};
use crate::table::{TableError, TableResult, TableService, TableStore};

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("customer {0} not found")]
    CustomerNotFound(String),

    #[error("product {0} not found")]
    ProductNotFound(String),

    #[error("order {0} not found")]
    OrderNotFound(String),

    #[error("invalid order: {0}")]
    Invalid(#[from] garde::Report),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("failed to encode order message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Body of `POST /api/orders`.
#[derive(Debug, Clone, Deserialize, Validate, utoipa::ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct PlaceOrder {
    #[garde(length(min = 1))]
    pub customer_id: String,
    #[garde(length(min = 1))]
    pub product_id: String,
    #[garde(range(min = 1))]
    pub quantity: i32,
}

/// What travels on the order queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "PascalCase")]
pub struct OrderMessage {
    #[garde(length(min = 1))]
    pub customer_id: String,
    #[garde(skip)]
    #[serde(default)]
    pub customer_name: String,
    #[garde(length(min = 1))]
    pub product_id: String,
    #[garde(skip)]
    #[serde(default)]
    pub product_name: String,
    #[garde(range(min = 1))]
    pub quantity: i32,
    #[garde(skip)]
    pub order_date: DateTime<FixedOffset>,
    #[garde(skip)]
    #[serde(default = "default_queue_status")]
    pub queue_status: String,
}

fn default_queue_status() -> String {
    QUEUED.to_string()
}

impl OrderMessage {
    /// The order this message describes, stored under partition "Order" with
    /// a fresh row key.
    pub fn into_order(self) -> Order {
        Order {
            identity: EntityIdentity::new(ORDER_PARTITION, uuid::Uuid::new_v4().to_string()),
            customer_id: self.customer_id,
            customer_name: self.customer_name,
            product_id: self.product_id,
            product_name: self.product_name,
            quantity: self.quantity,
            order_date: self.order_date,
            queue_status: self.queue_status,
        }
    }
}

/// Worker tuning, from the `queues` config section.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub visibility_timeout: Duration,
    pub batch_size: usize,
}

impl From<&QueuesConfig> for WorkerSettings {
    fn from(config: &QueuesConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            visibility_timeout: config.visibility_timeout(),
            batch_size: config.batch_size,
        }
    }
}

pub struct OrderService {
    orders: TableService<Order>,
    customers: TableService<Customer>,
    products: Arc<TableService<Product>>,
    queue: Arc<dyn MessageQueue>,
}

impl OrderService {
    pub async fn new(
        store: Arc<dyn TableStore>,
        products: Arc<TableService<Product>>,
        queue: Arc<dyn MessageQueue>,
    ) -> TableResult<Self> {
        Ok(Self {
            orders: TableService::new(store.clone(), ORDER_TABLE).await?,
            customers: TableService::new(store, crate::models::CUSTOMER_TABLE).await?,
            products,
            queue,
        })
    }

    /// Resolve names, then enqueue. Returns the queued message and its id.
    pub async fn place_order(&self, request: PlaceOrder) -> Result<(String, OrderMessage), OrderError> {
        request.validate()?;

        let customer = self
            .customers
            .get_entity(CUSTOMER_PARTITION, &request.customer_id)
            .await?
            .ok_or_else(|| OrderError::CustomerNotFound(request.customer_id.clone()))?;
        let product = self
            .products
            .get_entity(PRODUCT_PARTITION, &request.product_id)
            .await?
            .ok_or_else(|| OrderError::ProductNotFound(request.product_id.clone()))?;

        let message = OrderMessage {
            customer_id: request.customer_id,
            customer_name: customer.full_name,
            product_id: request.product_id,
            product_name: product.product_name,
            quantity: request.quantity,
            order_date: Utc::now().fixed_offset(),
            queue_status: QUEUED.to_string(),
        };
        let text = serde_json::to_string(&message)?;
        let id = self.queue.send(&text).await?;
        info!(message_id = %id, customer = %message.customer_id, "Order queued");
        Ok((id, message))
    }

    pub async fn list_orders(&self) -> TableResult<Vec<Order>> {
        self.orders.query_partition(ORDER_PARTITION).await
    }

    pub async fn set_status(&self, order_id: &str, status: &str) -> Result<Order, OrderError> {
        let mut order = self
            .orders
            .get_entity(ORDER_PARTITION, order_id)
            .await?
            .ok_or_else(|| OrderError::OrderNotFound(order_id.to_string()))?;
        order.queue_status = status.to_string();
        let etag = self.orders.update_entity(&order).await?;
        order.identity.etag = Some(etag);
        Ok(order)
    }

    /// Receive one batch and store every valid order in it. Returns how many
    /// messages were taken off the queue.
    pub async fn process_batch(&self, settings: &WorkerSettings) -> Result<usize, OrderError> {
        let messages = self
            .queue
            .receive(settings.batch_size, settings.visibility_timeout)
            .await?;
        let taken = messages.len();
        for message in messages {
            self.process_message(message).await?;
        }
        Ok(taken)
    }

    async fn process_message(&self, message: ReceivedMessage) -> Result<(), OrderError> {
        debug!(message_id = %message.id, "Processing order message: {}", message.text);

        let decoded = serde_json::from_str::<OrderMessage>(&message.text)
            .map_err(|e| e.to_string())
            .and_then(|m| m.validate().map(|()| m).map_err(|e| e.to_string()));

        match decoded {
            Ok(order_message) => {
                let order = order_message.into_order();
                self.orders.add_entity(&order).await?;
                info!(row_key = %order.identity.row_key, "Saved order from queue");
            }
            Err(reason) => {
                // Dropped, not retried.
                warn!(message_id = %message.id, "Discarding unusable order message: {}", reason);
            }
        }
        self.queue.delete(&message.id, &message.pop_receipt).await?;
        Ok(())
    }
}

/// Drain the order queue until `shutdown` flips to true.
///
/// Batches are processed back to back while the queue has work; an empty
/// receive waits one poll interval. A failed batch is logged and its
/// messages reappear after the visibility timeout.
pub async fn run_worker(
    service: Arc<OrderService>,
    settings: WorkerSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        "Order worker started (poll every {:?}, visibility {:?})",
        settings.poll_interval, settings.visibility_timeout
    );
    loop {
        if *shutdown.borrow() {
            break;
        }
        let idle = match service.process_batch(&settings).await {
            Ok(taken) => taken == 0,
            Err(e) => {
                error!("Order worker batch failed: {e}");
                true
            }
        };
        if idle {
            tokio::select! {
                _ = tokio::time::sleep(settings.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }
    info!("Order worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CustomerProfile, CUSTOMER_TABLE, PRODUCT_TABLE};
    use crate::queue::MemoryQueue;
    use crate::table::memory::MemoryTableStore;

    const SETTINGS: WorkerSettings = WorkerSettings {
        poll_interval: Duration::from_millis(10),
        visibility_timeout: Duration::from_secs(30),
        batch_size: 16,
    };

    struct Fixture {
        service: Arc<OrderService>,
        queue: Arc<MemoryQueue>,
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn TableStore> = Arc::new(MemoryTableStore::new());
        let products = Arc::new(TableService::<Product>::new(store.clone(), PRODUCT_TABLE).await.unwrap());
        products
            .add_entity(&Product {
                identity: EntityIdentity::new(PRODUCT_PARTITION, "p1"),
                product_name: "Lamp".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let customers = TableService::<CustomerProfile>::new(store.clone(), CUSTOMER_TABLE)
            .await
            .unwrap();
        customers
            .add_entity(&CustomerProfile {
                identity: EntityIdentity::new(CUSTOMER_PARTITION, "c1"),
                full_name: "Ada".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let queue = Arc::new(MemoryQueue::new("order-queue"));
        let service = OrderService::new(store, products, queue.clone()).await.unwrap();
        Fixture {
            service: Arc::new(service),
            queue,
        }
    }

    fn request(customer: &str, product: &str, quantity: i32) -> PlaceOrder {
        PlaceOrder {
            customer_id: customer.into(),
            product_id: product.into(),
            quantity,
        }
    }

    #[tokio::test]
    async fn test_place_order_enqueues_with_names() {
        let f = fixture().await;
        let (_, message) = f.service.place_order(request("c1", "p1", 2)).await.unwrap();
        assert_eq!(message.customer_name, "Ada");
        assert_eq!(message.product_name, "Lamp");

        let peeked = f.queue.peek(1).await.unwrap();
        let wire: serde_json::Value = serde_json::from_str(&peeked[0].text).unwrap();
        assert_eq!(wire["CustomerName"], "Ada");
        assert_eq!(wire["QueueStatus"], "Queued");
        assert!(wire.get("ETag").is_none());
        assert!(wire.get("PartitionKey").is_none());
    }

    #[tokio::test]
    async fn test_place_order_unknown_references() {
        let f = fixture().await;
        let err = f.service.place_order(request("nobody", "p1", 1)).await.unwrap_err();
        assert!(matches!(err, OrderError::CustomerNotFound(_)));
        let err = f.service.place_order(request("c1", "nothing", 1)).await.unwrap_err();
        assert!(matches!(err, OrderError::ProductNotFound(_)));
        let err = f.service.place_order(request("c1", "p1", 0)).await.unwrap_err();
        assert!(matches!(err, OrderError::Invalid(_)));
        assert!(f.queue.is_empty());
    }

    #[tokio::test]
    async fn test_worker_batch_stores_order_and_deletes_message() {
        let f = fixture().await;
        f.service.place_order(request("c1", "p1", 3)).await.unwrap();

        assert_eq!(f.service.process_batch(&SETTINGS).await.unwrap(), 1);
        assert!(f.queue.is_empty());

        let orders = f.service.list_orders().await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].quantity, 3);
        assert_eq!(orders[0].identity.partition_key, "Order");
        assert!(uuid::Uuid::parse_str(&orders[0].identity.row_key).is_ok());
    }

    #[tokio::test]
    async fn test_poison_messages_are_dropped() {
        let f = fixture().await;
        f.queue.send("not json").await.unwrap();
        f.queue
            .send(r#"{"CustomerId":"","ProductId":"p1","Quantity":1,"OrderDate":"2024-01-01T00:00:00+00:00"}"#)
            .await
            .unwrap();

        assert_eq!(f.service.process_batch(&SETTINGS).await.unwrap(), 2);
        assert!(f.queue.is_empty());
        assert!(f.service.list_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_status() {
        let f = fixture().await;
        f.service.place_order(request("c1", "p1", 1)).await.unwrap();
        f.service.process_batch(&SETTINGS).await.unwrap();
        let id = f.service.list_orders().await.unwrap()[0].identity.row_key.clone();

        let updated = f.service.set_status(&id, "Shipped").await.unwrap();
        assert_eq!(updated.queue_status, "Shipped");
        assert_eq!(f.service.list_orders().await.unwrap()[0].queue_status, "Shipped");

        let err = f.service.set_status("missing", "Shipped").await.unwrap_err();
        assert!(matches!(err, OrderError::OrderNotFound(_)));
    }

    #[tokio::test]
    async fn test_run_worker_stops_on_shutdown() {
        let f = fixture().await;
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_worker(f.service.clone(), SETTINGS, rx));

        f.service.place_order(request("c1", "p1", 1)).await.unwrap();
        for _ in 0..50 {
            if !f.service.list_orders().await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.service.list_orders().await.unwrap().len(), 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
