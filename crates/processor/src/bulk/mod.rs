//! Bulk writes to the search-index store
//!
//! Documents enter through [`BulkIndexWriter::process`], are staged in an
//! [`EsBuffer`] and written by a background flush lane through an
//! [`IndexStore`]. The store answers per item; [`RetryWriter`] keeps the
//! successes, resubmits transient failures and drops the rest with the
//! store's own error message in the log.

mod buffer;
mod retry;
mod store;
mod writer;

pub use buffer::{BulkItem, EsBuffer};
pub use retry::{parse_result_errors, FailedItem, RetryPolicy, RetryWriter, WriteReport};
pub use store::{
    bulk_body, BulkItemResponse, BulkResponse, HttpIndexStore, IndexStore, ItemError, ItemResult,
    REJECTED_EXECUTION,
};
pub use writer::{BulkIndexWriter, BulkWriterConfig, IndexRequest};
