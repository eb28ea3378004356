//! Simulated container for end-to-end pipeline tests.
//!
//! [`SimulatedContainer`] implements [`BatchTransport`] by decoding each batch
//! request and applying its operations to an in-memory item store, the way the
//! service would. It consults the authoritative map of a shared
//! [`HashRangeResolver`], so splitting a range there makes requests addressed
//! to the old range fail with 410/1002 until the client refreshes.
//!
//! Faults are injected through a [`FaultPlan`]:
//! - whole-request connection failures
//! - whole-request throttling (429 with a retry-after hint)
//! - per-operation throttling inside an otherwise successful batch
//! - fixed response latency

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cosmos_bulk::{BatchRequest, BatchResponse, BatchTransport, TransportError, TransportResult};
use cosmos_bulk_codec::{decode_batch_request, encode_batch_response, OperationRecord, OutcomeRecord};
use cosmos_bulk_core::{status_codes, sub_status_codes, OperationType, PartitionKey};
use cosmos_bulk_routing::HashRangeResolver;
use serde_json::Value;
use tracing::trace;

/// Request units charged per operation.
const CHARGE_PER_OPERATION: f64 = 1.0;

/// Faults to inject into upcoming requests.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Number of upcoming requests that fail with a connection error.
    pub fail_requests: usize,
    /// Number of upcoming requests that are throttled as a whole.
    pub throttle_requests: usize,
    /// Number of upcoming operations that are throttled individually.
    pub throttle_operations: usize,
    /// Retry-after hint attached to throttled responses.
    pub retry_after: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ItemKey {
    partition: String,
    id: String,
}

#[derive(Debug, Clone)]
struct StoredItem {
    etag: String,
    body: Bytes,
}

#[derive(Debug, Default, Clone)]
struct Store {
    items: HashMap<ItemKey, StoredItem>,
    next_etag: u64,
}

/// In-memory container answering batch requests.
pub struct SimulatedContainer {
    resolver: Arc<HashRangeResolver>,
    store: Mutex<Store>,
    faults: Mutex<FaultPlan>,
    requests: Mutex<Vec<BatchRequest>>,
    latency: Duration,
}

impl SimulatedContainer {
    /// Creates an empty container that routes by `resolver`'s published map.
    #[must_use]
    pub fn new(resolver: Arc<HashRangeResolver>) -> Self {
        Self {
            resolver,
            store: Mutex::new(Store::default()),
            faults: Mutex::new(FaultPlan::default()),
            requests: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
        }
    }

    /// Delays every response by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Replaces the fault plan.
    pub fn inject(&self, plan: FaultPlan) {
        *lock(&self.faults) = plan;
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<BatchRequest> {
        lock(&self.requests).clone()
    }

    /// Returns the number of stored items.
    pub fn item_count(&self) -> usize {
        lock(&self.store).items.len()
    }

    /// Returns the stored document for `(partition_key, id)`.
    pub fn item(&self, partition_key: &PartitionKey, id: &str) -> Option<Value> {
        let key = ItemKey {
            partition: partition_key.as_json().to_owned(),
            id: id.to_owned(),
        };
        let store = lock(&self.store);
        store
            .items
            .get(&key)
            .and_then(|item| serde_json::from_slice(&item.body).ok())
    }

    fn execute(&self, request: &BatchRequest, records: &[OperationRecord]) -> BatchResponse {
        let atomic = request.headers.is_batch_atomic;
        let mut store = lock(&self.store);
        let mut staged = store.clone();
        let mut outcomes = Vec::with_capacity(records.len());

        for record in records {
            if !atomic && self.take_operation_throttle() {
                outcomes.push(self.throttled_outcome());
                continue;
            }
            outcomes.push(apply(&mut staged, record));
        }

        let failed = outcomes
            .iter()
            .position(|o| !(200..400).contains(&o.status_code));

        let status = if atomic {
            if let Some(index) = failed {
                let failure = outcomes[index].status_code;
                for (i, outcome) in outcomes.iter_mut().enumerate() {
                    if i != index {
                        *outcome = OutcomeRecord::with_status(status_codes::FAILED_DEPENDENCY, 0);
                    }
                }
                failure
            } else {
                *store = staged;
                status_codes::OK
            }
        } else {
            *store = staged;
            if failed.is_some() {
                status_codes::MULTI_STATUS
            } else {
                status_codes::OK
            }
        };
        drop(store);

        match encode_batch_response(&outcomes) {
            Ok(body) => {
                let mut response = BatchResponse::new(status, 0, body);
                response.request_charge = CHARGE_PER_OPERATION * outcomes.len() as f64;
                response
            }
            Err(_) => BatchResponse::new(status_codes::INTERNAL_SERVER_ERROR, 0, Bytes::new()),
        }
    }

    fn take_request_fault(&self) -> Option<RequestFault> {
        let mut faults = lock(&self.faults);
        if faults.fail_requests > 0 {
            faults.fail_requests -= 1;
            return Some(RequestFault::Fail);
        }
        if faults.throttle_requests > 0 {
            faults.throttle_requests -= 1;
            return Some(RequestFault::Throttle(faults.retry_after));
        }
        None
    }

    fn take_operation_throttle(&self) -> bool {
        let mut faults = lock(&self.faults);
        if faults.throttle_operations > 0 {
            faults.throttle_operations -= 1;
            true
        } else {
            false
        }
    }

    fn throttled_outcome(&self) -> OutcomeRecord {
        let retry_after = lock(&self.faults).retry_after;
        let mut outcome = OutcomeRecord::with_status(status_codes::TOO_MANY_REQUESTS, 0);
        outcome.retry_after_ms = u32::try_from(retry_after.as_millis()).unwrap_or(u32::MAX);
        outcome
    }
}

enum RequestFault {
    Fail,
    Throttle(Duration),
}

#[async_trait]
impl BatchTransport for SimulatedContainer {
    async fn send(&self, request: BatchRequest) -> TransportResult<BatchResponse> {
        lock(&self.requests).push(request.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.take_request_fault() {
            Some(RequestFault::Fail) => {
                return Err(TransportError::Connection {
                    message: "connection reset by peer".to_string(),
                })
            }
            Some(RequestFault::Throttle(retry_after)) => {
                return Ok(
                    BatchResponse::new(status_codes::TOO_MANY_REQUESTS, 0, Bytes::new())
                        .with_retry_after(retry_after),
                )
            }
            None => {}
        }

        let range_id = &request.headers.partition_key_range_id;
        if !self.resolver.is_live(range_id).await {
            trace!(range_id = %range_id, "Request addressed a retired range");
            return Ok(BatchResponse::new(
                status_codes::GONE,
                sub_status_codes::PARTITION_KEY_RANGE_GONE,
                Bytes::new(),
            ));
        }

        let Ok(records) = decode_batch_request(&request.body) else {
            return Ok(BatchResponse::new(status_codes::BAD_REQUEST, 0, Bytes::new()));
        };
        Ok(self.execute(&request, &records))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn item_key(record: &OperationRecord) -> Option<ItemKey> {
    let partition = match (&record.partition_key, &record.effective_partition_key) {
        (Some(pk), _) => pk.clone(),
        (None, Some(epk)) => format!("epk:{epk:?}"),
        (None, None) => return None,
    };
    Some(ItemKey {
        partition,
        id: record.id.clone()?,
    })
}

fn apply(store: &mut Store, record: &OperationRecord) -> OutcomeRecord {
    let Some(key) = item_key(record) else {
        return OutcomeRecord::with_status(status_codes::BAD_REQUEST, 0);
    };
    let existing = store.items.get(&key).cloned();

    if let (Some(expected), Some(item)) = (&record.if_match, &existing) {
        if *expected != item.etag {
            return OutcomeRecord::with_status(status_codes::PRECONDITION_FAILED, 0);
        }
    }

    match (record.operation_type, existing) {
        (OperationType::Create, Some(_)) => OutcomeRecord::with_status(status_codes::CONFLICT, 0),
        (OperationType::Create, None) => store_body(store, key, record, status_codes::CREATED),
        (OperationType::Upsert, Some(_)) => store_body(store, key, record, status_codes::OK),
        (OperationType::Upsert, None) => store_body(store, key, record, status_codes::CREATED),
        (OperationType::Replace, Some(_)) => store_body(store, key, record, status_codes::OK),
        (OperationType::Read, Some(item)) => {
            if record.if_none_match.as_deref() == Some(item.etag.as_str()) {
                return OutcomeRecord::with_status(status_codes::NOT_MODIFIED, 0);
            }
            let mut outcome = OutcomeRecord::with_status(status_codes::OK, 0);
            outcome.etag = Some(item.etag);
            outcome.resource_body = Some(item.body);
            outcome.request_charge = CHARGE_PER_OPERATION;
            outcome
        }
        (OperationType::Delete, Some(_)) => {
            store.items.remove(&key);
            OutcomeRecord::with_status(status_codes::NO_CONTENT, 0)
        }
        (OperationType::Patch, Some(item)) => {
            let merged = merge(&item.body, record.resource_body.as_deref().unwrap_or_default());
            let mut patched = record.clone();
            patched.resource_body = Some(merged);
            store_body(store, key, &patched, status_codes::OK)
        }
        (OperationType::Replace | OperationType::Read | OperationType::Delete | OperationType::Patch, None) => {
            OutcomeRecord::with_status(status_codes::NOT_FOUND, 0)
        }
    }
}

fn store_body(store: &mut Store, key: ItemKey, record: &OperationRecord, status: i32) -> OutcomeRecord {
    store.next_etag += 1;
    let etag = format!("\"{:08x}\"", store.next_etag);
    let body = record.resource_body.clone().unwrap_or_default();
    store.items.insert(
        key,
        StoredItem {
            etag: etag.clone(),
            body: body.clone(),
        },
    );

    let mut outcome = OutcomeRecord::with_status(status, 0);
    outcome.etag = Some(etag);
    outcome.resource_body = Some(body);
    outcome.request_charge = CHARGE_PER_OPERATION;
    outcome
}

/// Shallow-merges the top-level fields of `patch` into `current`.
fn merge(current: &[u8], patch: &[u8]) -> Bytes {
    let current: Value = serde_json::from_slice(current).unwrap_or(Value::Null);
    let patch: Value = serde_json::from_slice(patch).unwrap_or(Value::Null);
    let merged = match (current, patch) {
        (Value::Object(mut base), Value::Object(fields)) => {
            base.extend(fields);
            Value::Object(base)
        }
        (base, _) => base,
    };
    Bytes::from(serde_json::to_vec(&merged).unwrap_or_default())
}
