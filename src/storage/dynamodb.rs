//! DynamoDB backend.
//!
//! ## Table Schema
//!
//! ```text
//! Table: arxiv-papers (configurable)
//!
//! Primary Key:
//!   - PK (String, Partition Key): CATEGORY#.., AUTHOR#.., KEYWORD#.., PAPER#..
//!   - SK (String, Sort Key): {isoDate}#{id} or PAPER#{id}
//!
//! Attributes:
//!   - item_type: String - CATEGORY | AUTHOR | KEYWORD | CANONICAL
//!   - paper_id: String - id of the owning paper
//!   - payload: String - JSON encoded item payload
//!   - title, published: String - copies for console browsing, never read back
//! ```

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType,
    ScalarAttributeType, TableStatus,
};
use aws_sdk_dynamodb::Client;
use aws_smithy_types::timeout::TimeoutConfig;
use tracing::{debug, info};

use super::{ItemPage, ItemStore, RangeQuery, SortKeyCondition, StoreError, StoreResult};
use crate::models::{Item, ItemKind, ItemPayload};

pub const ATTR_PK: &str = "PK";
pub const ATTR_SK: &str = "SK";
pub const ATTR_ITEM_TYPE: &str = "item_type";
pub const ATTR_PAPER_ID: &str = "paper_id";
pub const ATTR_PAYLOAD: &str = "payload";
pub const ATTR_TITLE: &str = "title";
pub const ATTR_PUBLISHED: &str = "published";

/// Error codes DynamoDB uses when it sheds load.
const THROTTLING_CODES: &[&str] = &[
    "ProvisionedThroughputExceededException",
    "ThrottlingException",
    "RequestLimitExceeded",
];

/// Server-side faults worth another attempt.
const SERVER_FAULT_CODES: &[&str] = &["InternalServerError", "ServiceUnavailable"];

/// DynamoDB store configuration
#[derive(Debug, Clone)]
pub struct DynamoDbConfig {
    /// DynamoDB table name
    pub table_name: String,
    /// AWS region (optional, uses SDK default if not specified)
    pub region: Option<String>,
    /// Optional endpoint override (e.g. DynamoDB Local)
    pub endpoint: Option<String>,
    /// Per-operation timeout in milliseconds
    pub timeout_ms: Option<u64>,
}

/// Single-table DynamoDB store.
#[derive(Clone)]
pub struct DynamoDbStore {
    client: Client,
    table_name: String,
}

impl std::fmt::Debug for DynamoDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoDbStore")
            .field("table_name", &self.table_name)
            .finish()
    }
}

impl DynamoDbStore {
    /// Create a store from shared SDK configuration plus overrides.
    pub fn new(sdk_config: &aws_config::SdkConfig, config: DynamoDbConfig) -> Self {
        let mut builder = aws_sdk_dynamodb::config::Builder::from(sdk_config);

        if let Some(region) = config.region {
            builder = builder.region(aws_sdk_dynamodb::config::Region::new(region));
        }

        if let Some(endpoint) = config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        if let Some(timeout_ms) = config.timeout_ms {
            let timeout_config = TimeoutConfig::builder()
                .operation_timeout(Duration::from_millis(timeout_ms))
                .build();
            builder = builder.timeout_config(timeout_config);
        }

        Self {
            client: Client::from_conf(builder.build()),
            table_name: config.table_name,
        }
    }

    /// Create the table (pay-per-request) if it does not exist yet, then
    /// wait for it to become active.
    pub async fn ensure_table(&self) -> StoreResult<()> {
        match self
            .client
            .describe_table()
            .table_name(&self.table_name)
            .send()
            .await
        {
            Ok(_) => {
                debug!("Table {} already exists", self.table_name);
                return Ok(());
            }
            Err(e)
                if e.as_service_error()
                    .is_some_and(|s| s.is_resource_not_found_exception()) => {}
            Err(e) => return Err(classify("DescribeTable", e)),
        }

        info!("Creating table {}", self.table_name);
        let build_err = |e: aws_sdk_dynamodb::error::BuildError| StoreError::Other(e.to_string());
        self.client
            .create_table()
            .table_name(&self.table_name)
            .attribute_definitions(
                AttributeDefinition::builder()
                    .attribute_name(ATTR_PK)
                    .attribute_type(ScalarAttributeType::S)
                    .build()
                    .map_err(build_err)?,
            )
            .attribute_definitions(
                AttributeDefinition::builder()
                    .attribute_name(ATTR_SK)
                    .attribute_type(ScalarAttributeType::S)
                    .build()
                    .map_err(build_err)?,
            )
            .key_schema(
                KeySchemaElement::builder()
                    .attribute_name(ATTR_PK)
                    .key_type(KeyType::Hash)
                    .build()
                    .map_err(build_err)?,
            )
            .key_schema(
                KeySchemaElement::builder()
                    .attribute_name(ATTR_SK)
                    .key_type(KeyType::Range)
                    .build()
                    .map_err(build_err)?,
            )
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await
            .map_err(|e| classify("CreateTable", e))?;

        for _ in 0..30 {
            let response = self
                .client
                .describe_table()
                .table_name(&self.table_name)
                .send()
                .await
                .map_err(|e| classify("DescribeTable", e))?;
            let status = response.table().and_then(|t| t.table_status());
            if status == Some(&TableStatus::Active) {
                info!("Table {} is active", self.table_name);
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        Err(StoreError::Unavailable(format!(
            "table {} did not become active",
            self.table_name
        )))
    }

    fn item_to_attributes(item: &Item) -> StoreResult<HashMap<String, AttributeValue>> {
        let payload = serde_json::to_string(&item.payload)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let summary = item.summary();

        Ok(HashMap::from([
            (ATTR_PK.to_string(), AttributeValue::S(item.pk.clone())),
            (ATTR_SK.to_string(), AttributeValue::S(item.sk.clone())),
            (
                ATTR_ITEM_TYPE.to_string(),
                AttributeValue::S(item.kind.as_str().to_string()),
            ),
            (ATTR_PAPER_ID.to_string(), AttributeValue::S(item.paper_id.clone())),
            (ATTR_PAYLOAD.to_string(), AttributeValue::S(payload)),
            (ATTR_TITLE.to_string(), AttributeValue::S(summary.title)),
            (
                ATTR_PUBLISHED.to_string(),
                AttributeValue::S(summary.published.to_rfc3339()),
            ),
        ]))
    }

    fn attributes_to_item(attributes: &HashMap<String, AttributeValue>) -> StoreResult<Item> {
        let kind_tag = string_attr(attributes, ATTR_ITEM_TYPE)?;
        let kind = ItemKind::parse(kind_tag)
            .ok_or_else(|| StoreError::Serialization(format!("unknown item type {}", kind_tag)))?;
        let payload: ItemPayload = serde_json::from_str(string_attr(attributes, ATTR_PAYLOAD)?)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(Item {
            pk: string_attr(attributes, ATTR_PK)?.clone(),
            sk: string_attr(attributes, ATTR_SK)?.clone(),
            kind,
            paper_id: string_attr(attributes, ATTR_PAPER_ID)?.clone(),
            payload,
        })
    }
}

fn string_attr<'a>(
    attributes: &'a HashMap<String, AttributeValue>,
    name: &str,
) -> StoreResult<&'a String> {
    attributes
        .get(name)
        .and_then(|v| v.as_s().ok())
        .ok_or_else(|| StoreError::Serialization(format!("missing attribute {}", name)))
}

/// Map an SDK failure onto the store error taxonomy.
fn classify<E>(operation: &str, err: SdkError<E>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = format!("DynamoDB {} failed: {}", operation, err);
    match &err {
        SdkError::TimeoutError(_) => StoreError::Timeout(message),
        SdkError::DispatchFailure(_) => StoreError::Unavailable(message),
        SdkError::ServiceError(service_err) => classify_code(service_err.err().code(), message),
        _ => StoreError::Other(message),
    }
}

/// Only throttling and server faults are transient. Validation errors, a
/// missing table and failed conditions are permanent.
fn classify_code(code: Option<&str>, message: String) -> StoreError {
    match code {
        Some(code) if THROTTLING_CODES.contains(&code) => StoreError::Throttled(message),
        Some(code) if SERVER_FAULT_CODES.contains(&code) => StoreError::Unavailable(message),
        Some(_) => StoreError::Rejected(message),
        None => StoreError::Other(message),
    }
}

#[async_trait]
impl ItemStore for DynamoDbStore {
    async fn get_item(&self, pk: &str, sk: &str) -> StoreResult<Option<Item>> {
        let response = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(ATTR_PK, AttributeValue::S(pk.to_string()))
            .key(ATTR_SK, AttributeValue::S(sk.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| classify("GetItem", e))?;

        response.item().map(Self::attributes_to_item).transpose()
    }

    async fn put_item(&self, item: &Item) -> StoreResult<()> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(Self::item_to_attributes(item)?))
            .send()
            .await
            .map_err(|e| classify("PutItem", e))?;
        Ok(())
    }

    async fn delete_item(&self, pk: &str, sk: &str) -> StoreResult<()> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key(ATTR_PK, AttributeValue::S(pk.to_string()))
            .key(ATTR_SK, AttributeValue::S(sk.to_string()))
            .send()
            .await
            .map_err(|e| classify("DeleteItem", e))?;
        Ok(())
    }

    async fn query_range(&self, query: &RangeQuery) -> StoreResult<ItemPage> {
        let mut request = self
            .client
            .query()
            .table_name(&self.table_name)
            .expression_attribute_names("#pk", ATTR_PK)
            .expression_attribute_values(":pk", AttributeValue::S(query.pk.clone()))
            .scan_index_forward(!query.descending);

        request = match &query.condition {
            None => request.key_condition_expression("#pk = :pk"),
            Some(SortKeyCondition::BeginsWith(prefix)) => request
                .key_condition_expression("#pk = :pk AND begins_with(#sk, :prefix)")
                .expression_attribute_names("#sk", ATTR_SK)
                .expression_attribute_values(":prefix", AttributeValue::S(prefix.clone())),
            Some(SortKeyCondition::Between(lower, upper)) => request
                .key_condition_expression("#pk = :pk AND #sk BETWEEN :lower AND :upper")
                .expression_attribute_names("#sk", ATTR_SK)
                .expression_attribute_values(":lower", AttributeValue::S(lower.clone()))
                .expression_attribute_values(":upper", AttributeValue::S(upper.clone())),
        };

        if let Some(limit) = query.limit {
            request = request.limit(i32::try_from(limit).unwrap_or(i32::MAX));
        }

        if let Some(resume) = &query.start_after {
            request = request.set_exclusive_start_key(Some(HashMap::from([
                (ATTR_PK.to_string(), AttributeValue::S(query.pk.clone())),
                (ATTR_SK.to_string(), AttributeValue::S(resume.clone())),
            ])));
        }

        let response = request.send().await.map_err(|e| classify("Query", e))?;

        let items = response
            .items()
            .iter()
            .map(Self::attributes_to_item)
            .collect::<StoreResult<Vec<_>>>()?;

        let last_evaluated_sk = response
            .last_evaluated_key()
            .and_then(|key| key.get(ATTR_SK))
            .and_then(|v| v.as_s().ok())
            .cloned();

        Ok(ItemPage {
            items,
            last_evaluated_sk,
        })
    }

    fn name(&self) -> &str {
        "dynamodb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaperSummary;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_attribute_round_trip() {
        let item = Item {
            pk: "AUTHOR#ada lovelace".to_string(),
            sk: "2023-01-01T00:00:00Z#x".to_string(),
            kind: ItemKind::Author,
            paper_id: "x".to_string(),
            payload: ItemPayload::Summary(PaperSummary {
                id: "x".to_string(),
                title: "Notes".to_string(),
                authors: vec!["Ada Lovelace".to_string()],
                categories: vec!["math.HO".to_string()],
                published: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            }),
        };

        let attributes = DynamoDbStore::item_to_attributes(&item).unwrap();
        assert_eq!(
            attributes.get(ATTR_ITEM_TYPE).and_then(|v| v.as_s().ok()).map(String::as_str),
            Some("AUTHOR")
        );
        assert_eq!(DynamoDbStore::attributes_to_item(&attributes).unwrap(), item);
    }

    #[test]
    fn test_only_transient_codes_are_retryable() {
        for code in ["ThrottlingException", "RequestLimitExceeded", "ProvisionedThroughputExceededException"] {
            let err = classify_code(Some(code), code.to_string());
            assert!(matches!(err, StoreError::Throttled(_)));
            assert!(err.is_retryable());
        }
        for code in ["InternalServerError", "ServiceUnavailable"] {
            let err = classify_code(Some(code), code.to_string());
            assert!(matches!(err, StoreError::Unavailable(_)));
            assert!(err.is_retryable());
        }
        for code in [
            "ValidationException",
            "ResourceNotFoundException",
            "ConditionalCheckFailedException",
        ] {
            let err = classify_code(Some(code), code.to_string());
            assert!(matches!(err, StoreError::Rejected(_)));
            assert!(!err.is_retryable());
        }
        assert!(matches!(classify_code(None, "?".into()), StoreError::Other(_)));
    }

    #[test]
    fn test_missing_attribute_is_serialization_error() {
        let attributes = HashMap::from([(ATTR_PK.to_string(), AttributeValue::S("P".into()))]);
        assert!(matches!(
            DynamoDbStore::attributes_to_item(&attributes),
            Err(StoreError::Serialization(_))
        ));
    }
}
