//! Axum request handlers for all service endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::protocol::{
    BatchResponse, BatchResult, CiphertextBatchRequest, CiphertextItem, CiphertextRequest,
    CiphertextResponse, ConfigureKeyRequest, CreateKeyRequest, EncryptBatchRequest,
    EncryptRequest, ErrorResponse, HealthResponse, KeyResponse, ListKeysResponse,
    PlaintextResponse,
};
use common::ServiceError;
use tracing::{debug, info, warn};

use super::state::AppState;
use crate::engine::TransitContext;
use crate::error::TransitError;
use crate::keys::{KeyConfig, KeyOptions};

/// Error returned by every handler; renders as `{code, message}`.
#[derive(Debug)]
pub struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl From<TransitError> for ApiError {
    fn from(err: TransitError) -> Self {
        debug!(kind = err.kind(), "transit operation rejected");
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(error = %self.0, "request failed");
        }
        (status, Json(ErrorResponse::from(&self.0))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Key management
// ---------------------------------------------------------------------------

/// `POST /v1/transit/keys`
pub async fn create_key(
    State(state): State<AppState>,
    Json(req): Json<CreateKeyRequest>,
) -> ApiResult<Json<KeyResponse>> {
    let options = KeyOptions {
        derived: req.derived,
        convergent_encryption: req.convergent_encryption,
        ..KeyOptions::default()
    };
    let meta = state.keys().create_key(&req.name, options).await?;
    Ok(Json(meta.into()))
}

/// `GET /v1/transit/keys`
pub async fn list_keys(State(state): State<AppState>) -> Json<ListKeysResponse> {
    Json(ListKeysResponse {
        keys: state.keys().list_key_names().into_iter().collect(),
    })
}

/// `GET /v1/transit/keys/{name}`. Unlike the operation routes, an unknown
/// key here is a 404.
pub async fn read_key(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<KeyResponse>> {
    let meta = state
        .keys()
        .metadata(&name)
        .ok_or_else(|| ServiceError::NotFound(format!("no such key: {name}")))?;
    Ok(Json(meta.into()))
}

/// `POST /v1/transit/keys/{name}/config`
pub async fn configure_key(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<ConfigureKeyRequest>,
) -> ApiResult<Json<KeyResponse>> {
    let config = KeyConfig {
        deletion_allowed: req.deletion_allowed,
        min_decryption_version: req.min_decryption_version,
    };
    let meta = state.keys().configure_key(&name, config).await?;
    Ok(Json(meta.into()))
}

/// `POST /v1/transit/keys/{name}/rotate`
pub async fn rotate_key(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<KeyResponse>> {
    let meta = state.keys().rotate(&name).await?;
    Ok(Json(meta.into()))
}

/// `DELETE /v1/transit/keys/{name}`
pub async fn delete_key(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.keys().delete_key(&name).await?;
    info!(key = %name, "key deleted via api");
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Single-item operations
// ---------------------------------------------------------------------------

/// `POST /v1/transit/encrypt`
pub async fn encrypt(
    State(state): State<AppState>,
    Json(req): Json<EncryptRequest>,
) -> ApiResult<Json<CiphertextResponse>> {
    let plaintext = decode_b64("plaintext", &req.plaintext)?;
    let ctx = transit_context(req.context.as_deref(), req.nonce.as_deref())?;
    let ciphertext = state.engine.encrypt(&req.key, &plaintext, &ctx)?;
    Ok(Json(CiphertextResponse { ciphertext }))
}

/// `POST /v1/transit/decrypt`
pub async fn decrypt(
    State(state): State<AppState>,
    Json(req): Json<CiphertextRequest>,
) -> ApiResult<Json<PlaintextResponse>> {
    let ctx = transit_context(req.context.as_deref(), req.nonce.as_deref())?;
    let plaintext = state.engine.decrypt(&req.key, &req.ciphertext, &ctx)?;
    Ok(Json(PlaintextResponse {
        plaintext: STANDARD.encode(plaintext),
    }))
}

/// `POST /v1/transit/rewrap`
pub async fn rewrap(
    State(state): State<AppState>,
    Json(req): Json<CiphertextRequest>,
) -> ApiResult<Json<CiphertextResponse>> {
    let ctx = transit_context(req.context.as_deref(), req.nonce.as_deref())?;
    let ciphertext = state.engine.rewrap(&req.key, &req.ciphertext, &ctx)?;
    Ok(Json(CiphertextResponse { ciphertext }))
}

// ---------------------------------------------------------------------------
// Batch operations
// ---------------------------------------------------------------------------

/// `POST /v1/transit/encrypt/batch`
pub async fn encrypt_batch(
    State(state): State<AppState>,
    Json(req): Json<EncryptBatchRequest>,
) -> ApiResult<Json<BatchResponse>> {
    let with_ctx = req
        .batch
        .iter()
        .any(|item| item.context.is_some() || item.nonce.is_some());
    let decoded = DecodedBatch::new(req.batch, with_ctx, |item| {
        let plaintext = decode_b64("plaintext", &item.plaintext)?;
        let ctx = transit_context(item.context.as_deref(), item.nonce.as_deref())?;
        Ok((plaintext, ctx))
    });

    let results = state
        .batch
        .encrypt_batch(&req.key, decoded.inputs, decoded.contexts)
        .await?;
    Ok(Json(merge_results(decoded.rejected, results, BatchResult::ciphertext)))
}

/// `POST /v1/transit/decrypt/batch`
pub async fn decrypt_batch(
    State(state): State<AppState>,
    Json(req): Json<CiphertextBatchRequest>,
) -> ApiResult<Json<BatchResponse>> {
    let decoded = decode_ciphertext_batch(req.batch);
    let results = state
        .batch
        .decrypt_batch(&req.key, decoded.inputs, decoded.contexts)
        .await?;
    Ok(Json(merge_results(decoded.rejected, results, |plaintext| {
        BatchResult::plaintext(STANDARD.encode(plaintext))
    })))
}

/// `POST /v1/transit/rewrap/batch`
pub async fn rewrap_batch(
    State(state): State<AppState>,
    Json(req): Json<CiphertextBatchRequest>,
) -> ApiResult<Json<BatchResponse>> {
    let decoded = decode_ciphertext_batch(req.batch);
    let results = state
        .batch
        .rewrap_batch(&req.key, decoded.inputs, decoded.contexts)
        .await?;
    Ok(Json(merge_results(decoded.rejected, results, BatchResult::ciphertext)))
}

// ---------------------------------------------------------------------------
// Health and fallback
// ---------------------------------------------------------------------------

/// `GET /health`: liveness check. Always `200 OK` while the server answers.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        keys_loaded: state.keys().len(),
    })
}

/// Catch-all 404 handler.
pub async fn not_found() -> impl IntoResponse {
    let err = ErrorResponse::new("not_found", "the requested resource does not exist");
    (StatusCode::NOT_FOUND, Json(err))
}

// ---------------------------------------------------------------------------
// Request decoding helpers
// ---------------------------------------------------------------------------

fn decode_b64(field: &str, value: &str) -> Result<Vec<u8>, ServiceError> {
    STANDARD
        .decode(value)
        .map_err(|_| ServiceError::BadRequest(format!("{field} is not valid base64")))
}

fn transit_context(
    context: Option<&str>,
    nonce: Option<&str>,
) -> Result<TransitContext, ServiceError> {
    Ok(TransitContext {
        context: context.map(|c| decode_b64("context", c)).transpose()?,
        nonce: nonce.map(|n| decode_b64("nonce", n)).transpose()?,
    })
}

/// Batch items after base64 decoding.
///
/// Items that decoded go to the processor; items that did not keep their
/// error at their original index in `rejected`.
struct DecodedBatch<I> {
    inputs: Vec<I>,
    contexts: Option<Vec<TransitContext>>,
    /// One slot per request item, `Some(message)` if it failed to decode.
    rejected: Vec<Option<String>>,
}

impl<I> DecodedBatch<I> {
    fn new<T>(
        items: Vec<T>,
        with_ctx: bool,
        decode: impl Fn(T) -> Result<(I, TransitContext), ServiceError>,
    ) -> Self {
        let mut inputs = Vec::with_capacity(items.len());
        let mut contexts = Vec::with_capacity(items.len());
        let mut rejected = Vec::with_capacity(items.len());
        for item in items {
            match decode(item) {
                Ok((input, ctx)) => {
                    inputs.push(input);
                    contexts.push(ctx);
                    rejected.push(None);
                }
                Err(e) => rejected.push(Some(e.message().to_owned())),
            }
        }
        Self {
            inputs,
            contexts: with_ctx.then_some(contexts),
            rejected,
        }
    }
}

fn decode_ciphertext_batch(items: Vec<CiphertextItem>) -> DecodedBatch<String> {
    let with_ctx = items
        .iter()
        .any(|item| item.context.is_some() || item.nonce.is_some());
    DecodedBatch::new(items, with_ctx, |item| {
        let ctx = transit_context(item.context.as_deref(), item.nonce.as_deref())?;
        Ok((item.ciphertext, ctx))
    })
}

/// Interleave processor results with decode failures, in request order.
fn merge_results<T>(
    rejected: Vec<Option<String>>,
    results: Vec<Result<T, TransitError>>,
    ok: impl Fn(T) -> BatchResult,
) -> BatchResponse {
    let mut results = results.into_iter();
    let batch_results = rejected
        .into_iter()
        .map(|slot| match slot {
            Some(message) => BatchResult::error(message),
            None => match results.next() {
                Some(Ok(value)) => ok(value),
                Some(Err(e)) => BatchResult::error(e.to_string()),
                None => BatchResult::error("missing batch result"),
            },
        })
        .collect();
    BatchResponse { batch_results }
}
