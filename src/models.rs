//! Storefront record types.
//!
//! Each record keeps its identity in an [`EntityIdentity`] that serde never
//! sees, and declares its persisted fields in [`TableEntity::schema`]. Field
//! names are the PascalCase column names the other writers of these tables
//! use.

use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::{EntityIdentity, EntitySchema, TableEntity};

pub const PRODUCT_TABLE: &str = "Product";
pub const CUSTOMER_TABLE: &str = "Customer";
pub const ORDER_TABLE: &str = "Order";
pub const CART_TABLE: &str = "Cart";

/// Every table the server creates at startup.
pub const ALL_TABLES: [&str; 4] = [PRODUCT_TABLE, CUSTOMER_TABLE, ORDER_TABLE, CART_TABLE];

pub const PRODUCT_PARTITION: &str = "Product";
pub const CUSTOMER_PARTITION: &str = "Customer";
pub const ORDER_PARTITION: &str = "Order";

/// Default `QueueStatus` of a freshly placed order.
pub const QUEUED: &str = "Queued";

macro_rules! entity_identity {
    () => {
        fn identity(&self) -> &EntityIdentity {
            &self.identity
        }

        fn identity_mut(&mut self) -> &mut EntityIdentity {
            &mut self.identity
        }
    };
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Product {
    #[serde(skip)]
    pub identity: EntityIdentity,
    pub product_name: String,
    pub description: String,
    /// Free-form display price, stored as text.
    pub price: String,
    pub category: String,
    pub stock_quantity: i32,
    pub created_date: DateTime<Utc>,
    pub image_url: Option<String>,
}

impl TableEntity for Product {
    entity_identity!();

    fn schema() -> EntitySchema<Self> {
        EntitySchema::new("Product")
            .field("ProductName", |p: &Self| &p.product_name, |p: &mut Self| &mut p.product_name)
            .field("Description", |p: &Self| &p.description, |p: &mut Self| &mut p.description)
            .field("Price", |p: &Self| &p.price, |p: &mut Self| &mut p.price)
            .field("Category", |p: &Self| &p.category, |p: &mut Self| &mut p.category)
            .field("StockQuantity", |p: &Self| &p.stock_quantity, |p: &mut Self| &mut p.stock_quantity)
            .field("CreatedDate", |p: &Self| &p.created_date, |p: &mut Self| &mut p.created_date)
            .field("ImageUrl", |p: &Self| &p.image_url, |p: &mut Self| &mut p.image_url)
    }
}

/// Lightweight customer projection: the columns order placement needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Customer {
    #[serde(skip)]
    pub identity: EntityIdentity,
    pub full_name: String,
    pub email: String,
    pub created_date: DateTime<FixedOffset>,
}

impl TableEntity for Customer {
    entity_identity!();

    fn schema() -> EntitySchema<Self> {
        EntitySchema::new("Customer")
            .field("FullName", |c: &Self| &c.full_name, |c: &mut Self| &mut c.full_name)
            .field("Email", |c: &Self| &c.email, |c: &mut Self| &mut c.email)
            .field("CreatedDate", |c: &Self| &c.created_date, |c: &mut Self| &mut c.created_date)
    }
}

/// Full customer row, stored in the Customer table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct CustomerProfile {
    #[serde(skip)]
    pub identity: EntityIdentity,
    pub full_name: String,
    pub email: String,
    pub phone_number: String,
    pub address: String,
    pub date_of_birth: DateTime<FixedOffset>,
    pub created_date: DateTime<FixedOffset>,
}

impl TableEntity for CustomerProfile {
    entity_identity!();

    fn schema() -> EntitySchema<Self> {
        EntitySchema::new("CustomerProfile")
            .field("FullName", |c: &Self| &c.full_name, |c: &mut Self| &mut c.full_name)
            .field("Email", |c: &Self| &c.email, |c: &mut Self| &mut c.email)
            .field("PhoneNumber", |c: &Self| &c.phone_number, |c: &mut Self| &mut c.phone_number)
            .field("Address", |c: &Self| &c.address, |c: &mut Self| &mut c.address)
            .field("DateOfBirth", |c: &Self| &c.date_of_birth, |c: &mut Self| &mut c.date_of_birth)
            .field("CreatedDate", |c: &Self| &c.created_date, |c: &mut Self| &mut c.created_date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Order {
    #[serde(skip)]
    pub identity: EntityIdentity,
    pub customer_id: String,
    pub customer_name: String,
    pub product_id: String,
    pub product_name: String,
    pub quantity: i32,
    pub order_date: DateTime<FixedOffset>,
    pub queue_status: String,
}

impl Default for Order {
    fn default() -> Self {
        Self {
            identity: EntityIdentity::default(),
            customer_id: String::new(),
            customer_name: String::new(),
            product_id: String::new(),
            product_name: String::new(),
            quantity: 0,
            order_date: DateTime::<FixedOffset>::default(),
            queue_status: QUEUED.to_string(),
        }
    }
}

impl TableEntity for Order {
    entity_identity!();

    fn schema() -> EntitySchema<Self> {
        EntitySchema::new("Order")
            .field("CustomerId", |o: &Self| &o.customer_id, |o: &mut Self| &mut o.customer_id)
            .field("CustomerName", |o: &Self| &o.customer_name, |o: &mut Self| &mut o.customer_name)
            .field("ProductId", |o: &Self| &o.product_id, |o: &mut Self| &mut o.product_id)
            .field("ProductName", |o: &Self| &o.product_name, |o: &mut Self| &mut o.product_name)
            .field("Quantity", |o: &Self| &o.quantity, |o: &mut Self| &mut o.quantity)
            .field("OrderDate", |o: &Self| &o.order_date, |o: &mut Self| &mut o.order_date)
            .field("QueueStatus", |o: &Self| &o.queue_status, |o: &mut Self| &mut o.queue_status)
    }
}

/// One product in a user's cart. Partition = user id, row = product id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct CartItem {
    #[serde(skip)]
    pub identity: EntityIdentity,
    pub product_id: String,
    pub product_name: String,
    pub image_url: String,
    pub product_price: BigDecimal,
    pub quantity: i32,
    pub added_date: DateTime<Utc>,
}

impl Default for CartItem {
    fn default() -> Self {
        Self {
            identity: EntityIdentity::default(),
            product_id: String::new(),
            product_name: String::new(),
            image_url: String::new(),
            product_price: BigDecimal::default(),
            quantity: 1,
            added_date: DateTime::<Utc>::default(),
        }
    }
}

impl TableEntity for CartItem {
    entity_identity!();

    fn schema() -> EntitySchema<Self> {
        EntitySchema::new("CartItem")
            .field("ProductId", |c: &Self| &c.product_id, |c: &mut Self| &mut c.product_id)
            .field("ProductName", |c: &Self| &c.product_name, |c: &mut Self| &mut c.product_name)
            .field("ImageUrl", |c: &Self| &c.image_url, |c: &mut Self| &mut c.image_url)
            .field("ProductPrice", |c: &Self| &c.product_price, |c: &mut Self| &mut c.product_price)
            .field("Quantity", |c: &Self| &c.quantity, |c: &mut Self| &mut c.quantity)
            .field("AddedDate", |c: &Self| &c.added_date, |c: &mut Self| &mut c.added_date)
    }
}

/// JSON view of a record for HTTP responses: its serde fields plus the
/// identity columns.
pub fn to_json<T: TableEntity + Serialize>(record: &T) -> Value {
    let mut value = serde_json::to_value(record).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        let identity = record.identity();
        map.insert("PartitionKey".into(), Value::from(identity.partition_key.clone()));
        map.insert("RowKey".into(), Value::from(identity.row_key.clone()));
        if let Some(ts) = identity.timestamp {
            map.insert("Timestamp".into(), Value::from(ts.to_rfc3339()));
        }
        if let Some(etag) = &identity.etag {
            map.insert("ETag".into(), Value::from(etag.as_str()));
        }
    }
    value
}

/// Notice sent to the product queue when a product is created.
pub fn product_added_notice(name: &str, at: DateTime<Utc>) -> String {
    format!("New product added: {} at {}", name, at.format("%Y-%m-%d %H:%M:%S"))
}

pub fn product_altered_notice(name: &str) -> String {
    format!("Product: {} has been altered", name)
}

pub fn product_deleted_notice(name: &str) -> String {
    format!("Product: {} has been deleted", name)
}
