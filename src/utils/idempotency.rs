use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{HttpRequest, HttpResponse, http::StatusCode};
use moka::future::Cache;
use serde_json::Value;

use crate::error::{ApiError, ApiResult};

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
const MAX_KEY_LEN: usize = 128;

/// A successful mutation response, kept for replay.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResponse {
    pub status: u16,
    pub body: Value,
}

impl StoredResponse {
    pub fn new(status: StatusCode, body: Value) -> Self {
        Self {
            status: status.as_u16(),
            body,
        }
    }

    pub fn into_response(self) -> HttpResponse {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        HttpResponse::build(status).json(self.body)
    }
}

/// Remembers responses of payments and advance movements by client token.
#[derive(Clone)]
pub struct IdempotencyStore {
    inner: Cache<String, StoredResponse>,
}

impl IdempotencyStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Reads the client token and scopes it to the operation and caller.
    pub fn key_for(req: &HttpRequest, operation: &str, user_id: u64) -> ApiResult<Option<String>> {
        let raw = match req.headers().get(IDEMPOTENCY_HEADER) {
            Some(v) => v
                .to_str()
                .map_err(|_| ApiError::validation("Idempotency-Key must be visible ASCII"))?
                .trim(),
            None => return Ok(None),
        };

        if raw.is_empty() || raw.len() > MAX_KEY_LEN {
            return Err(ApiError::validation(format!(
                "Idempotency-Key must be 1 to {MAX_KEY_LEN} characters"
            )));
        }

        Ok(Some(format!("{operation}:{user_id}:{raw}")))
    }

    /// Runs `mutation` unless a response for `key` is already stored.
    ///
    /// Concurrent calls with the same key wait for the first one. Errors are
    /// returned but never stored, so the client may retry with the same key.
    pub async fn run<F>(&self, key: Option<String>, mutation: F) -> ApiResult<StoredResponse>
    where
        F: Future<Output = ApiResult<StoredResponse>>,
    {
        match key {
            None => mutation.await,
            Some(key) => self
                .inner
                .try_get_with(key, mutation)
                .await
                .map_err(|e: Arc<ApiError>| (*e).clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store() -> IdempotencyStore {
        IdempotencyStore::new(Duration::from_secs(60))
    }

    #[test]
    fn key_is_scoped_to_operation_and_user() {
        let req = TestRequest::default()
            .insert_header((IDEMPOTENCY_HEADER, " pay-42 "))
            .to_http_request();
        let key = IdempotencyStore::key_for(&req, "pay_salary", 7).unwrap();
        assert_eq!(key.as_deref(), Some("pay_salary:7:pay-42"));
    }

    #[test]
    fn missing_header_means_no_key() {
        let req = TestRequest::default().to_http_request();
        assert_eq!(IdempotencyStore::key_for(&req, "give_advance", 1).unwrap(), None);
    }

    #[test]
    fn oversized_key_is_rejected() {
        let req = TestRequest::default()
            .insert_header((IDEMPOTENCY_HEADER, "x".repeat(200)))
            .to_http_request();
        assert!(IdempotencyStore::key_for(&req, "give_advance", 1).is_err());
    }

    #[actix_web::test]
    async fn repeated_key_replays_without_running_again() {
        let store = store();
        let runs = AtomicUsize::new(0);
        let counter = &runs;
        let mutation = move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(StoredResponse::new(StatusCode::CREATED, json!({ "run": n })))
        };

        let first = store.run(Some("k".into()), mutation()).await.unwrap();
        let second = store.run(Some("k".into()), mutation()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.status, 201);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[actix_web::test]
    async fn failure_is_not_remembered() {
        let store = store();
        let err = store
            .run(Some("k".into()), async { Err(ApiError::conflict("Salary already paid")) })
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::conflict("Salary already paid"));

        let ok = store
            .run(Some("k".into()), async { Ok(StoredResponse::new(StatusCode::OK, json!({}))) })
            .await
            .unwrap();
        assert_eq!(ok.status, 200);
    }

    #[actix_web::test]
    async fn without_key_every_call_runs() {
        let store = store();
        let runs = AtomicUsize::new(0);
        for _ in 0..3 {
            store
                .run(None, async {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(StoredResponse::new(StatusCode::OK, json!({})))
                })
                .await
                .unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }
}
