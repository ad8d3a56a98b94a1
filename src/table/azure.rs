//! Azure Table Storage backend.
//!
//! Talks to the Azure Table REST API with `reqwest`, using the OData JSON
//! codec from [`crate::entity::odata`] for entity bodies.
//!
//! Credentials are resolved via:
//!   - `AZURE_STORAGE_KEY` environment variable (Shared Key Lite auth)
//!   - `AZURE_STORAGE_CONNECTION_STRING` environment variable
//!   - `AZURE_STORAGE_SAS_TOKEN` environment variable (SAS token auth)
//!
//! A custom endpoint (e.g. Azurite at `http://127.0.0.1:10002/devstoreaccount1`)
//! replaces the default `https://{account}.table.core.windows.net`.

use std::future::Future;
use std::pin::Pin;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::{Method, StatusCode, Url};
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, info};

use super::store::{
    validate_keys, validate_table_name, TableError, TableResult, TableStore, UpdateMode,
};
use crate::entity::odata::{from_odata, to_odata};
use crate::entity::{ETag, PropertyBag};

/// Azure Table REST API version used for all requests.
const AZURE_API_VERSION: &str = "2019-02-02";

const JSON_METADATA: &str = "application/json;odata=minimalmetadata";

/// Percent-encoding set for the entity path: encode everything except
/// unreserved characters and the OData key syntax.
const AZURE_TABLE_ENCODE_SET: percent_encoding::AsciiSet = percent_encoding::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'(')
    .remove(b')')
    .remove(b'=')
    .remove(b',');

/// Azure authentication method.
enum AzureAuth {
    /// Shared Key Lite authentication using the storage account key.
    SharedKey { key_bytes: Vec<u8> },
    /// SAS token authentication (appended as query parameter).
    SasToken { token: String },
}

/// Table store backed by an Azure Storage account.
pub struct AzureTableStore {
    client: reqwest::Client,
    account: String,
    /// Scheme, host and port, without a trailing slash.
    origin: String,
    /// Path prefix of the endpoint (empty for the public cloud).
    path_prefix: String,
    auth: AzureAuth,
}

impl AzureTableStore {
    /// Create a client for `account`, optionally against a custom endpoint.
    pub fn new(account: String, endpoint: Option<String>) -> anyhow::Result<Self> {
        let auth = Self::resolve_auth()?;
        let store = Self::with_auth(account, endpoint, auth)?;
        info!(
            "Azure table store initialized: account={} endpoint={}{}",
            store.account, store.origin, store.path_prefix
        );
        Ok(store)
    }

    fn with_auth(account: String, endpoint: Option<String>, auth: AzureAuth) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        let endpoint =
            endpoint.unwrap_or_else(|| format!("https://{}.table.core.windows.net", account));
        let url = Url::parse(&endpoint)
            .map_err(|e| anyhow::anyhow!("Invalid table endpoint {:?}: {}", endpoint, e))?;
        let origin = url.origin().ascii_serialization();
        let path_prefix = url.path().trim_end_matches('/').to_string();

        Ok(Self {
            client,
            account,
            origin,
            path_prefix,
            auth,
        })
    }

    /// Resolve Azure authentication from environment variables.
    fn resolve_auth() -> anyhow::Result<AzureAuth> {
        if let Ok(key) = std::env::var("AZURE_STORAGE_KEY") {
            let key_bytes = BASE64_STANDARD.decode(&key).map_err(|e| {
                anyhow::anyhow!("Invalid AZURE_STORAGE_KEY (not valid base64): {}", e)
            })?;
            return Ok(AzureAuth::SharedKey { key_bytes });
        }

        if let Ok(conn_str) = std::env::var("AZURE_STORAGE_CONNECTION_STRING") {
            if let Some(key_val) = conn_str
                .split(';')
                .find_map(|part| part.strip_prefix("AccountKey="))
            {
                let key_bytes = BASE64_STANDARD.decode(key_val).map_err(|e| {
                    anyhow::anyhow!("Invalid AccountKey in connection string: {}", e)
                })?;
                return Ok(AzureAuth::SharedKey { key_bytes });
            }
        }

        if let Ok(sas) = std::env::var("AZURE_STORAGE_SAS_TOKEN") {
            let token = sas.strip_prefix('?').unwrap_or(&sas).to_string();
            return Ok(AzureAuth::SasToken { token });
        }

        Err(anyhow::anyhow!(
            "No Azure credentials found. Set AZURE_STORAGE_KEY, \
             AZURE_STORAGE_CONNECTION_STRING, or AZURE_STORAGE_SAS_TOKEN."
        ))
    }

    /// Encoded request path for a resource such as `Tables` or
    /// `Product(PartitionKey='p',RowKey='r')`.
    fn resource_path(&self, resource: &str) -> String {
        let encoded =
            percent_encoding::utf8_percent_encode(resource, &AZURE_TABLE_ENCODE_SET).to_string();
        format!("{}/{}", self.path_prefix, encoded)
    }

    /// OData key predicate with single quotes doubled.
    fn entity_resource(table: &str, partition_key: &str, row_key: &str) -> String {
        format!(
            "{}(PartitionKey='{}',RowKey='{}')",
            table,
            partition_key.replace('\'', "''"),
            row_key.replace('\'', "''")
        )
    }

    /// Shared Key Lite signature:
    /// `HMAC-SHA256(key, "{x-ms-date}\n/{account}{path}")`.
    fn sign_request(&self, date: &str, path: &str) -> anyhow::Result<Option<String>> {
        let key_bytes = match &self.auth {
            AzureAuth::SharedKey { key_bytes } => key_bytes,
            AzureAuth::SasToken { .. } => return Ok(None),
        };
        let string_to_sign = format!("{}\n/{}{}", date, self.account, path);

        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(key_bytes)
            .map_err(|e| anyhow::anyhow!("HMAC key error: {}", e))?;
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());
        Ok(Some(format!("SharedKeyLite {}:{}", self.account, signature)))
    }

    fn rfc1123_date() -> String {
        httpdate::fmt_http_date(std::time::SystemTime::now())
    }

    fn build_url(&self, path: &str, query: &[(&str, String)]) -> anyhow::Result<Url> {
        let mut url = Url::parse(&format!("{}{}", self.origin, path))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        if let AzureAuth::SasToken { token } = &self.auth {
            let joined = match url.query() {
                Some(q) => format!("{}&{}", q, token),
                None => token.clone(),
            };
            url.set_query(Some(&joined));
        }
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        resource: &str,
        query: &[(&str, String)],
        if_match: Option<&ETag>,
        body: Option<&Value>,
    ) -> anyhow::Result<reqwest::Response> {
        let path = self.resource_path(resource);
        let url = self.build_url(&path, query)?;
        let date = Self::rfc1123_date();

        let mut req = self
            .client
            .request(method.clone(), url)
            .header("x-ms-date", &date)
            .header("x-ms-version", AZURE_API_VERSION)
            .header("Accept", JSON_METADATA)
            .header("DataServiceVersion", "3.0;NetFx")
            .header("MaxDataServiceVersion", "3.0;NetFx");
        if let Some(auth) = self.sign_request(&date, &path)? {
            req = req.header("Authorization", auth);
        }
        if let Some(etag) = if_match {
            req = req.header("If-Match", etag.as_str());
        }
        if let Some(body) = body {
            req = req
                .header("Content-Type", "application/json")
                .header("Prefer", "return-no-content")
                .body(body.to_string());
        }

        debug!("Azure table {} {}", method, resource);
        req.send()
            .await
            .map_err(|e| anyhow::anyhow!("Azure table request failed: {}", e))
    }

    async fn fail(resp: reqwest::Response, context: &str) -> TableError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        TableError::Backend(anyhow::anyhow!(
            "Azure {}: HTTP {} - {}",
            context,
            status,
            body
        ))
    }

    /// `odata.error.code` of an error body, if present.
    fn error_code(body: &str) -> Option<String> {
        let json: Value = serde_json::from_str(body).ok()?;
        json.pointer("/odata.error/code")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn etag_header(resp: &reqwest::Response) -> TableResult<ETag> {
        resp.headers()
            .get("ETag")
            .and_then(|v| v.to_str().ok())
            .map(ETag::new)
            .ok_or_else(|| TableError::Backend(anyhow::anyhow!("Azure response missing ETag")))
    }

    async fn write_entity(
        &self,
        table: &str,
        bag: &PropertyBag,
        method: Method,
        if_match: Option<&ETag>,
    ) -> TableResult<ETag> {
        let resource = Self::entity_resource(table, bag.partition_key(), bag.row_key());
        let body = entity_body(bag);
        let resp = self.send(method, &resource, &[], if_match, Some(&body)).await?;
        match resp.status() {
            s if s.is_success() => Self::etag_header(&resp),
            StatusCode::NOT_FOUND => {
                let code = Self::error_code(&resp.text().await.unwrap_or_default());
                if code.as_deref() == Some("TableNotFound") {
                    Err(TableError::TableNotFound(table.to_string()))
                } else {
                    Err(TableError::not_found(table, bag.partition_key(), bag.row_key()))
                }
            }
            StatusCode::PRECONDITION_FAILED => Err(TableError::precondition_failed(
                table,
                bag.partition_key(),
                bag.row_key(),
            )),
            _ => Err(Self::fail(resp, "update entity").await),
        }
    }
}

/// Request body for a write: user properties plus keys, without system fields.
fn entity_body(bag: &PropertyBag) -> Value {
    let mut body = to_odata(bag);
    if let Some(object) = body.as_object_mut() {
        object.remove("Timestamp");
        object.remove("Timestamp@odata.type");
        object.remove("odata.etag");
    }
    body
}

fn merge_method() -> Method {
    // MERGE is a valid token; from_bytes only fails on invalid characters.
    Method::from_bytes(b"MERGE").unwrap_or(Method::PATCH)
}

fn mode_method(mode: UpdateMode) -> Method {
    match mode {
        UpdateMode::Replace => Method::PUT,
        UpdateMode::Merge => merge_method(),
    }
}

impl TableStore for AzureTableStore {
    fn create_table(
        &self,
        table: &str,
    ) -> Pin<Box<dyn Future<Output = TableResult<bool>> + Send + '_>> {
        let table = table.to_string();
        Box::pin(async move {
            validate_table_name(&table)?;
            let body = serde_json::json!({ "TableName": table });
            let resp = self.send(Method::POST, "Tables", &[], None, Some(&body)).await?;
            match resp.status() {
                s if s.is_success() => Ok(true),
                StatusCode::CONFLICT => Ok(false),
                _ => Err(Self::fail(resp, "create table").await),
            }
        })
    }

    fn list_tables(&self) -> Pin<Box<dyn Future<Output = TableResult<Vec<String>>> + Send + '_>> {
        Box::pin(async move {
            let mut names = Vec::new();
            let mut next: Option<String> = None;
            loop {
                let query: Vec<(&str, String)> = next
                    .take()
                    .map(|n| vec![("NextTableName", n)])
                    .unwrap_or_default();
                let resp = self.send(Method::GET, "Tables", &query, None, None).await?;
                if !resp.status().is_success() {
                    return Err(Self::fail(resp, "list tables").await);
                }
                next = resp
                    .headers()
                    .get("x-ms-continuation-NextTableName")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let json: Value = resp
                    .json()
                    .await
                    .map_err(|e| anyhow::anyhow!("Azure list tables body: {}", e))?;
                if let Some(rows) = json.get("value").and_then(Value::as_array) {
                    names.extend(
                        rows.iter()
                            .filter_map(|r| r.get("TableName").and_then(Value::as_str))
                            .map(str::to_string),
                    );
                }
                if next.is_none() {
                    break;
                }
            }
            names.sort();
            Ok(names)
        })
    }

    fn add_entity(
        &self,
        table: &str,
        bag: PropertyBag,
    ) -> Pin<Box<dyn Future<Output = TableResult<ETag>> + Send + '_>> {
        let table = table.to_string();
        Box::pin(async move {
            validate_keys(&bag)?;
            let body = entity_body(&bag);
            let resp = self.send(Method::POST, &table, &[], None, Some(&body)).await?;
            match resp.status() {
                s if s.is_success() => Self::etag_header(&resp),
                StatusCode::CONFLICT => Err(TableError::already_exists(&table, &bag)),
                StatusCode::NOT_FOUND => Err(TableError::TableNotFound(table)),
                _ => Err(Self::fail(resp, "insert entity").await),
            }
        })
    }

    fn get_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Pin<Box<dyn Future<Output = TableResult<Option<PropertyBag>>> + Send + '_>> {
        let table = table.to_string();
        let resource = Self::entity_resource(&table, partition_key, row_key);
        Box::pin(async move {
            let resp = self.send(Method::GET, &resource, &[], None, None).await?;
            match resp.status() {
                s if s.is_success() => {
                    let json: Value = resp
                        .json()
                        .await
                        .map_err(|e| anyhow::anyhow!("Azure get entity body: {}", e))?;
                    Ok(Some(from_odata(&json)?))
                }
                StatusCode::NOT_FOUND => {
                    let code = Self::error_code(&resp.text().await.unwrap_or_default());
                    if code.as_deref() == Some("TableNotFound") {
                        Err(TableError::TableNotFound(table))
                    } else {
                        Ok(None)
                    }
                }
                _ => Err(Self::fail(resp, "get entity").await),
            }
        })
    }

    fn update_entity(
        &self,
        table: &str,
        bag: PropertyBag,
        etag: &ETag,
        mode: UpdateMode,
    ) -> Pin<Box<dyn Future<Output = TableResult<ETag>> + Send + '_>> {
        let table = table.to_string();
        let etag = etag.clone();
        Box::pin(async move {
            self.write_entity(&table, &bag, mode_method(mode), Some(&etag))
                .await
        })
    }

    fn upsert_entity(
        &self,
        table: &str,
        bag: PropertyBag,
        mode: UpdateMode,
    ) -> Pin<Box<dyn Future<Output = TableResult<ETag>> + Send + '_>> {
        let table = table.to_string();
        Box::pin(async move {
            validate_keys(&bag)?;
            // Without If-Match, PUT and MERGE are insert-or-replace and insert-or-merge.
            self.write_entity(&table, &bag, mode_method(mode), None).await
        })
    }

    fn delete_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
        etag: &ETag,
    ) -> Pin<Box<dyn Future<Output = TableResult<()>> + Send + '_>> {
        let table = table.to_string();
        let partition_key = partition_key.to_string();
        let row_key = row_key.to_string();
        let etag = etag.clone();
        Box::pin(async move {
            let resource = Self::entity_resource(&table, &partition_key, &row_key);
            let resp = self
                .send(Method::DELETE, &resource, &[], Some(&etag), None)
                .await?;
            match resp.status() {
                s if s.is_success() => Ok(()),
                StatusCode::NOT_FOUND => {
                    let code = Self::error_code(&resp.text().await.unwrap_or_default());
                    if code.as_deref() == Some("TableNotFound") {
                        Err(TableError::TableNotFound(table))
                    } else {
                        Ok(())
                    }
                }
                StatusCode::PRECONDITION_FAILED => Err(TableError::precondition_failed(
                    &table,
                    &partition_key,
                    &row_key,
                )),
                _ => Err(Self::fail(resp, "delete entity").await),
            }
        })
    }

    fn query(
        &self,
        table: &str,
        partition_key: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = TableResult<Vec<PropertyBag>>> + Send + '_>> {
        let table = table.to_string();
        let filter = partition_key.map(|pk| format!("PartitionKey eq '{}'", pk.replace('\'', "''")));
        Box::pin(async move {
            let resource = format!("{}()", table);
            let mut bags = Vec::new();
            let mut continuation: Option<(String, Option<String>)> = None;
            loop {
                let mut query: Vec<(&str, String)> = Vec::new();
                if let Some(filter) = &filter {
                    query.push(("$filter", filter.clone()));
                }
                if let Some((next_pk, next_rk)) = continuation.take() {
                    query.push(("NextPartitionKey", next_pk));
                    if let Some(next_rk) = next_rk {
                        query.push(("NextRowKey", next_rk));
                    }
                }

                let resp = self.send(Method::GET, &resource, &query, None, None).await?;
                match resp.status() {
                    s if s.is_success() => {}
                    StatusCode::NOT_FOUND => return Err(TableError::TableNotFound(table)),
                    _ => return Err(Self::fail(resp, "query entities").await),
                }
                let header = |name: &str| {
                    resp.headers()
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                };
                continuation = header("x-ms-continuation-NextPartitionKey")
                    .map(|pk| (pk, header("x-ms-continuation-NextRowKey")));

                let json: Value = resp
                    .json()
                    .await
                    .map_err(|e| anyhow::anyhow!("Azure query body: {}", e))?;
                if let Some(rows) = json.get("value").and_then(Value::as_array) {
                    for row in rows {
                        bags.push(from_odata(row)?);
                    }
                }
                if continuation.is_none() {
                    break;
                }
            }
            Ok(bags)
        })
    }
}
