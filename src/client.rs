//! Backend client abstraction.
//!
//! The mapper drives DynamoDB through the [`DynamoClient`] trait so that
//! tests can substitute an in-memory double. The real implementation wraps
//! [`aws_sdk_dynamodb::Client`].

use crate::error::Error;
use async_trait::async_trait;
use aws_sdk_dynamodb::operation::batch_get_item::{BatchGetItemInput, BatchGetItemOutput};
use aws_sdk_dynamodb::operation::batch_write_item::{BatchWriteItemInput, BatchWriteItemOutput};
use aws_sdk_dynamodb::operation::create_table::{CreateTableInput, CreateTableOutput};
use aws_sdk_dynamodb::operation::delete_item::{DeleteItemInput, DeleteItemOutput};
use aws_sdk_dynamodb::operation::delete_table::{DeleteTableInput, DeleteTableOutput};
use aws_sdk_dynamodb::operation::describe_table::{DescribeTableInput, DescribeTableOutput};
use aws_sdk_dynamodb::operation::get_item::{GetItemInput, GetItemOutput};
use aws_sdk_dynamodb::operation::list_tables::{ListTablesInput, ListTablesOutput};
use aws_sdk_dynamodb::operation::put_item::{PutItemInput, PutItemOutput};
use aws_sdk_dynamodb::operation::query::{QueryInput, QueryOutput};
use aws_sdk_dynamodb::operation::scan::{ScanInput, ScanOutput};
use aws_sdk_dynamodb::operation::transact_get_items::{TransactGetItemsInput, TransactGetItemsOutput};
use aws_sdk_dynamodb::operation::transact_write_items::{
    TransactWriteItemsInput, TransactWriteItemsOutput,
};
use aws_sdk_dynamodb::operation::update_time_to_live::{
    UpdateTimeToLiveInput, UpdateTimeToLiveOutput,
};
use aws_sdk_dynamodb::operation::update_item::{UpdateItemInput, UpdateItemOutput};
use aws_smithy_runtime_api::client::result::SdkError;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// The capability set the mapper consumes from the backend.
///
/// Errors are surfaced as [`Error`] with the original service error text
/// preserved, so the runner can classify conditional failures, throughput
/// exhaustion and transaction cancellations by message.
#[async_trait]
pub trait DynamoClient: Send + Sync {
    /// Single-item read.
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, Error>;
    /// Single-item write.
    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, Error>;
    /// Single-item delete.
    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput, Error>;
    /// Single-item update.
    async fn update_item(&self, input: UpdateItemInput) -> Result<UpdateItemOutput, Error>;
    /// Index query.
    async fn query(&self, input: QueryInput) -> Result<QueryOutput, Error>;
    /// Table scan.
    async fn scan(&self, input: ScanInput) -> Result<ScanOutput, Error>;
    /// Batched reads.
    async fn batch_get_item(&self, input: BatchGetItemInput) -> Result<BatchGetItemOutput, Error>;
    /// Batched writes.
    async fn batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> Result<BatchWriteItemOutput, Error>;
    /// Transactional reads.
    async fn transact_get_items(
        &self,
        input: TransactGetItemsInput,
    ) -> Result<TransactGetItemsOutput, Error>;
    /// Transactional writes.
    async fn transact_write_items(
        &self,
        input: TransactWriteItemsInput,
    ) -> Result<TransactWriteItemsOutput, Error>;
    /// Table creation DDL.
    async fn create_table(&self, input: CreateTableInput) -> Result<CreateTableOutput, Error>;
    /// Table deletion DDL.
    async fn delete_table(&self, input: DeleteTableInput) -> Result<DeleteTableOutput, Error>;
    /// Table description.
    async fn describe_table(&self, input: DescribeTableInput)
        -> Result<DescribeTableOutput, Error>;
    /// Table listing.
    async fn list_tables(&self, input: ListTablesInput) -> Result<ListTablesOutput, Error>;
    /// TTL configuration.
    async fn update_time_to_live(
        &self,
        input: UpdateTimeToLiveInput,
    ) -> Result<UpdateTimeToLiveOutput, Error>;
}

fn sdk_error<E: Debug, R: Debug>(err: SdkError<E, R>) -> Error {
    Error::backend(format!("{:?}", err))
}

#[async_trait]
impl DynamoClient for aws_sdk_dynamodb::Client {
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, Error> {
        self.get_item()
            .set_table_name(input.table_name)
            .set_key(input.key)
            .set_consistent_read(input.consistent_read)
            .set_projection_expression(input.projection_expression)
            .set_expression_attribute_names(input.expression_attribute_names)
            .send()
            .await
            .map_err(sdk_error)
    }

    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, Error> {
        self.put_item()
            .set_table_name(input.table_name)
            .set_item(input.item)
            .set_condition_expression(input.condition_expression)
            .set_expression_attribute_names(input.expression_attribute_names)
            .set_expression_attribute_values(input.expression_attribute_values)
            .set_return_values(input.return_values)
            .send()
            .await
            .map_err(sdk_error)
    }

    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput, Error> {
        self.delete_item()
            .set_table_name(input.table_name)
            .set_key(input.key)
            .set_condition_expression(input.condition_expression)
            .set_expression_attribute_names(input.expression_attribute_names)
            .set_expression_attribute_values(input.expression_attribute_values)
            .set_return_values(input.return_values)
            .send()
            .await
            .map_err(sdk_error)
    }

    async fn update_item(&self, input: UpdateItemInput) -> Result<UpdateItemOutput, Error> {
        self.update_item()
            .set_table_name(input.table_name)
            .set_key(input.key)
            .set_update_expression(input.update_expression)
            .set_condition_expression(input.condition_expression)
            .set_expression_attribute_names(input.expression_attribute_names)
            .set_expression_attribute_values(input.expression_attribute_values)
            .set_return_values(input.return_values)
            .send()
            .await
            .map_err(sdk_error)
    }

    async fn query(&self, input: QueryInput) -> Result<QueryOutput, Error> {
        self.query()
            .set_table_name(input.table_name)
            .set_index_name(input.index_name)
            .set_key_condition_expression(input.key_condition_expression)
            .set_filter_expression(input.filter_expression)
            .set_projection_expression(input.projection_expression)
            .set_expression_attribute_names(input.expression_attribute_names)
            .set_expression_attribute_values(input.expression_attribute_values)
            .set_limit(input.limit)
            .set_consistent_read(input.consistent_read)
            .set_scan_index_forward(input.scan_index_forward)
            .set_exclusive_start_key(input.exclusive_start_key)
            .set_select(input.select)
            .set_return_consumed_capacity(input.return_consumed_capacity)
            .send()
            .await
            .map_err(sdk_error)
    }

    async fn scan(&self, input: ScanInput) -> Result<ScanOutput, Error> {
        self.scan()
            .set_table_name(input.table_name)
            .set_index_name(input.index_name)
            .set_filter_expression(input.filter_expression)
            .set_projection_expression(input.projection_expression)
            .set_expression_attribute_names(input.expression_attribute_names)
            .set_expression_attribute_values(input.expression_attribute_values)
            .set_limit(input.limit)
            .set_consistent_read(input.consistent_read)
            .set_exclusive_start_key(input.exclusive_start_key)
            .set_segment(input.segment)
            .set_total_segments(input.total_segments)
            .set_select(input.select)
            .set_return_consumed_capacity(input.return_consumed_capacity)
            .send()
            .await
            .map_err(sdk_error)
    }

    async fn batch_get_item(&self, input: BatchGetItemInput) -> Result<BatchGetItemOutput, Error> {
        self.batch_get_item()
            .set_request_items(input.request_items)
            .set_return_consumed_capacity(input.return_consumed_capacity)
            .send()
            .await
            .map_err(sdk_error)
    }

    async fn batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> Result<BatchWriteItemOutput, Error> {
        self.batch_write_item()
            .set_request_items(input.request_items)
            .set_return_consumed_capacity(input.return_consumed_capacity)
            .send()
            .await
            .map_err(sdk_error)
    }

    async fn transact_get_items(
        &self,
        input: TransactGetItemsInput,
    ) -> Result<TransactGetItemsOutput, Error> {
        self.transact_get_items()
            .set_transact_items(input.transact_items)
            .send()
            .await
            .map_err(sdk_error)
    }

    async fn transact_write_items(
        &self,
        input: TransactWriteItemsInput,
    ) -> Result<TransactWriteItemsOutput, Error> {
        self.transact_write_items()
            .set_transact_items(input.transact_items)
            .set_client_request_token(input.client_request_token)
            .send()
            .await
            .map_err(sdk_error)
    }

    async fn create_table(&self, input: CreateTableInput) -> Result<CreateTableOutput, Error> {
        self.create_table()
            .set_table_name(input.table_name)
            .set_attribute_definitions(input.attribute_definitions)
            .set_key_schema(input.key_schema)
            .set_billing_mode(input.billing_mode)
            .set_provisioned_throughput(input.provisioned_throughput)
            .set_global_secondary_indexes(input.global_secondary_indexes)
            .set_local_secondary_indexes(input.local_secondary_indexes)
            .send()
            .await
            .map_err(sdk_error)
    }

    async fn delete_table(&self, input: DeleteTableInput) -> Result<DeleteTableOutput, Error> {
        self.delete_table()
            .set_table_name(input.table_name)
            .send()
            .await
            .map_err(sdk_error)
    }

    async fn describe_table(
        &self,
        input: DescribeTableInput,
    ) -> Result<DescribeTableOutput, Error> {
        self.describe_table()
            .set_table_name(input.table_name)
            .send()
            .await
            .map_err(sdk_error)
    }

    async fn list_tables(&self, input: ListTablesInput) -> Result<ListTablesOutput, Error> {
        self.list_tables()
            .set_exclusive_start_table_name(input.exclusive_start_table_name)
            .set_limit(input.limit)
            .send()
            .await
            .map_err(sdk_error)
    }

    async fn update_time_to_live(
        &self,
        input: UpdateTimeToLiveInput,
    ) -> Result<UpdateTimeToLiveOutput, Error> {
        self.update_time_to_live()
            .set_table_name(input.table_name)
            .set_time_to_live_specification(input.time_to_live_specification)
            .send()
            .await
            .map_err(sdk_error)
    }
}

/// Build a client from the ambient AWS configuration with sensible defaults:
/// adaptive retries (3 attempts), 3 s connect / 20 s read / 60 s operation
/// timeouts, and LocalStack support via `AWS_PROFILE=localstack`.
pub async fn default_client() -> Arc<dyn DynamoClient> {
    use aws_config::retry::RetryConfig;
    use aws_config::timeout::TimeoutConfig;
    use aws_config::BehaviorVersion;

    let timeout_config = TimeoutConfig::builder()
        .connect_timeout(Duration::from_secs(3))
        .read_timeout(Duration::from_secs(20))
        .operation_timeout(Duration::from_secs(60))
        .build();

    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .retry_config(
            RetryConfig::adaptive()
                .with_max_attempts(3)
                .with_initial_backoff(Duration::from_secs(1)),
        )
        .timeout_config(timeout_config);

    if std::env::var("AWS_PROFILE").unwrap_or_default() == "localstack" {
        loader = loader.endpoint_url("http://127.0.0.1:4566");
    }

    let config = loader.load().await;
    Arc::new(aws_sdk_dynamodb::Client::new(&config))
}
