use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, warn};

use super::request::{Method, PipelineRequest, PipelineResponse};
use super::stage::{Stage, StageTrace};
use crate::auth::{AccessPolicy, Operation, Principal};
use crate::cache::{CacheStats, CacheStatus, Derivative, DerivativeCache, DerivativeKey};
use crate::error::{PipelineError, ResponseCode, StorageError};
use crate::store::{AssetId, AssetInfo, AssetStore};
use crate::transcode::{ImageKind, TranscodePool, TransformSpec};

/// Maximum number of ids accepted by [`Pipeline::describe_many`].
pub const MAX_BATCH_IDS: usize = 100;

/// Image bytes returned by [`Pipeline::fetch`].
#[derive(Debug, Clone)]
pub struct Fetched {
    pub data: Bytes,
    pub kind: ImageKind,
    /// Pixel size, known for derivatives only
    pub dimensions: Option<(u32, u32)>,
    /// `None` when the original was served
    pub cache: Option<CacheStatus>,
    pub trace: StageTrace,
}

struct Body {
    data: Bytes,
    kind: ImageKind,
    dimensions: Option<(u32, u32)>,
    cache: Option<CacheStatus>,
}

/// Request orchestrator.
///
/// Every operation authenticates the bearer token and checks it against
/// the owner of the asset involved before touching any data.
///
/// ```text
/// Received -> Authorizing -> CacheLookup -> Hit  ─────────────────────────────┐
///                                        -> Miss -> Transcoding -> CacheStore ├-> Responding -> Done
///                                        -> Joined -> AwaitingShared ─────────┘
///                         -> Denied
/// (any step)              -> Failed
/// ```
#[derive(Clone)]
pub struct Pipeline {
    policy: AccessPolicy,
    store: Arc<AssetStore>,
    cache: DerivativeCache,
    pool: TranscodePool,
}

impl Pipeline {
    pub fn new(
        policy: AccessPolicy,
        store: Arc<AssetStore>,
        cache: DerivativeCache,
        pool: TranscodePool,
    ) -> Self {
        Self {
            policy,
            store,
            cache,
            pool,
        }
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<AssetStore> {
        &self.store
    }

    pub fn cache(&self) -> &DerivativeCache {
        &self.cache
    }

    pub fn pool(&self) -> &TranscodePool {
        &self.pool
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Store a new original owned by the token's subject.
    pub async fn upload(
        &self,
        token: Option<&str>,
        data: Bytes,
        mime_type: &str,
    ) -> Result<AssetInfo, PipelineError> {
        let mut trace = StageTrace::new();
        let result = self.run_upload(token, data, mime_type, &mut trace).await;
        finish("upload", &mut trace, &result);
        result
    }

    /// Serve the original, or a derivative when `spec` asks for one.
    pub async fn fetch(
        &self,
        token: Option<&str>,
        asset_id: &str,
        spec: Option<TransformSpec>,
    ) -> Result<Fetched, PipelineError> {
        let mut trace = StageTrace::new();
        let result = self.run_fetch(token, asset_id, spec, &mut trace).await;
        finish("fetch", &mut trace, &result);
        result.map(|body| Fetched {
            data: body.data,
            kind: body.kind,
            dimensions: body.dimensions,
            cache: body.cache,
            trace,
        })
    }

    /// Metadata of a single asset.
    pub async fn describe(
        &self,
        token: Option<&str>,
        asset_id: &str,
    ) -> Result<AssetInfo, PipelineError> {
        let mut trace = StageTrace::new();
        let result = self.run_describe(token, asset_id, &mut trace).await;
        finish("describe", &mut trace, &result);
        result
    }

    /// Metadata of several assets.
    ///
    /// Fails with `NotFound` naming every missing id when any is missing.
    pub async fn describe_many(
        &self,
        token: Option<&str>,
        asset_ids: &[String],
    ) -> Result<Vec<AssetInfo>, PipelineError> {
        let mut trace = StageTrace::new();
        let result = self.run_describe_many(token, asset_ids, &mut trace).await;
        finish("describe_many", &mut trace, &result);
        result
    }

    /// Delete an asset and, through the store's listeners, its derivatives.
    pub async fn delete(
        &self,
        token: Option<&str>,
        asset_id: &str,
    ) -> Result<AssetInfo, PipelineError> {
        let mut trace = StageTrace::new();
        let result = self.run_delete(token, asset_id, &mut trace).await;
        finish("delete", &mut trace, &result);
        result
    }

    /// Execute a transport-neutral request.
    pub async fn handle(&self, request: PipelineRequest) -> PipelineResponse {
        let mut trace = StageTrace::new();
        let token = request.token.as_deref();

        let result: Result<(Option<Bytes>, Option<String>), PipelineError> = match request.method
        {
            Method::Get => match request.asset_id.as_deref() {
                Some(id) => self
                    .run_fetch(token, id, request.transform, &mut trace)
                    .await
                    .map(|body| (Some(body.data), Some(body.kind.mime_type().to_string()))),
                None => Err(PipelineError::InvalidRequest(
                    "GET requires an asset id".to_string(),
                )),
            },
            Method::Put => match (request.body, request.mime_type.as_deref()) {
                (Some(body), Some(mime)) => {
                    match self.run_upload(token, body, mime, &mut trace).await {
                        Ok(info) => serde_json::to_vec(&info)
                            .map(|json| {
                                (
                                    Some(Bytes::from(json)),
                                    Some("application/json".to_string()),
                                )
                            })
                            .map_err(|e| PipelineError::Internal(e.to_string())),
                        Err(e) => Err(e),
                    }
                }
                _ => Err(PipelineError::InvalidRequest(
                    "PUT requires a body and a MIME type".to_string(),
                )),
            },
            Method::Delete => match request.asset_id.as_deref() {
                Some(id) => self
                    .run_delete(token, id, &mut trace)
                    .await
                    .map(|_| (None, None)),
                None => Err(PipelineError::InvalidRequest(
                    "DELETE requires an asset id".to_string(),
                )),
            },
        };

        finish(op_name(request.method), &mut trace, &result);

        match result {
            Ok((body, mime_type)) => PipelineResponse {
                code: ResponseCode::Ok,
                body,
                mime_type,
                message: None,
                trace,
            },
            Err(e) => PipelineResponse {
                code: e.code(),
                body: None,
                mime_type: None,
                message: Some(e.to_string()),
                trace,
            },
        }
    }

    fn authenticate(
        &self,
        token: Option<&str>,
        trace: &mut StageTrace,
    ) -> Result<Principal, PipelineError> {
        trace.enter(Stage::Authorizing);
        Ok(self.policy.authenticate(token)?)
    }

    async fn run_upload(
        &self,
        token: Option<&str>,
        data: Bytes,
        mime_type: &str,
        trace: &mut StageTrace,
    ) -> Result<AssetInfo, PipelineError> {
        let principal = self.authenticate(token, trace)?;
        self.policy
            .permit(&principal, &principal.subject, Operation::Write)?;

        let asset = self.store.put(data, mime_type, &principal.subject).await?;
        Ok(asset.info())
    }

    async fn run_fetch(
        &self,
        token: Option<&str>,
        asset_id: &str,
        spec: Option<TransformSpec>,
        trace: &mut StageTrace,
    ) -> Result<Body, PipelineError> {
        let principal = self.authenticate(token, trace)?;
        let id: AssetId = asset_id.parse()?;
        // NotFound is reported before the owner check
        let info = self.store.info(&id).await?;
        self.policy.permit(&principal, &info.owner, Operation::Read)?;

        if let Some(spec) = &spec {
            self.pool.engine().validate(spec)?;
        }

        let spec = match spec {
            Some(spec) if !spec.is_identity() => spec,
            _ => {
                let asset = self.store.get(&id).await?;
                return Ok(Body {
                    data: asset.data,
                    kind: asset.kind,
                    dimensions: None,
                    cache: None,
                });
            }
        };

        trace.enter(Stage::CacheLookup);
        let store = Arc::clone(&self.store);
        let pool = self.pool.clone();
        let key = DerivativeKey::new(id.clone(), spec);
        let pending = self
            .cache
            .lookup(key, move || compute_derivative(store, pool, id, spec))
            .await;

        let status = pending.status();
        match status {
            CacheStatus::Hit => trace.enter(Stage::Hit),
            CacheStatus::Miss => {
                trace.enter(Stage::Miss);
                trace.enter(Stage::Transcoding);
            }
            CacheStatus::Joined => {
                trace.enter(Stage::Joined);
                trace.enter(Stage::AwaitingShared);
            }
        }

        let derivative = pending.wait().await?;
        if status == CacheStatus::Miss {
            trace.enter(Stage::CacheStore);
        }

        Ok(Body {
            data: derivative.data,
            kind: derivative.kind,
            dimensions: Some((derivative.width, derivative.height)),
            cache: Some(status),
        })
    }

    async fn run_describe(
        &self,
        token: Option<&str>,
        asset_id: &str,
        trace: &mut StageTrace,
    ) -> Result<AssetInfo, PipelineError> {
        let principal = self.authenticate(token, trace)?;
        let id: AssetId = asset_id.parse()?;
        let info = self.store.info(&id).await?;
        self.policy.permit(&principal, &info.owner, Operation::Read)?;
        Ok(info)
    }

    async fn run_describe_many(
        &self,
        token: Option<&str>,
        asset_ids: &[String],
        trace: &mut StageTrace,
    ) -> Result<Vec<AssetInfo>, PipelineError> {
        let principal = self.authenticate(token, trace)?;

        if asset_ids.is_empty() {
            return Err(PipelineError::InvalidRequest("no asset ids given".to_string()));
        }
        if asset_ids.len() > MAX_BATCH_IDS {
            return Err(PipelineError::InvalidRequest(format!(
                "at most {} asset ids per request, got {}",
                MAX_BATCH_IDS,
                asset_ids.len()
            )));
        }

        let mut found = Vec::with_capacity(asset_ids.len());
        let mut missing = Vec::new();
        for raw in asset_ids {
            let Ok(id) = raw.parse::<AssetId>() else {
                missing.push(raw.as_str());
                continue;
            };
            match self.store.info(&id).await {
                Ok(info) => found.push(info),
                Err(StorageError::NotFound(_)) => missing.push(raw.as_str()),
                Err(e) => return Err(e.into()),
            }
        }

        if !missing.is_empty() {
            return Err(StorageError::NotFound(missing.join(", ")).into());
        }

        for info in &found {
            self.policy.permit(&principal, &info.owner, Operation::Read)?;
        }
        Ok(found)
    }

    async fn run_delete(
        &self,
        token: Option<&str>,
        asset_id: &str,
        trace: &mut StageTrace,
    ) -> Result<AssetInfo, PipelineError> {
        let principal = self.authenticate(token, trace)?;
        let id: AssetId = asset_id.parse()?;
        let info = self.store.info(&id).await?;
        self.policy
            .permit(&principal, &info.owner, Operation::Delete)?;

        Ok(self.store.delete(&id, &principal.subject).await?)
    }
}

/// Load the original and transcode it. Runs detached inside the cache.
async fn compute_derivative(
    store: Arc<AssetStore>,
    pool: TranscodePool,
    id: AssetId,
    spec: TransformSpec,
) -> Result<Derivative, PipelineError> {
    let asset = store.get(&id).await?;
    let image = pool
        .run(asset.data, asset.kind.mime_type().to_string(), spec)
        .await?;

    debug!(
        asset_id = %id,
        requested = %spec.format,
        produced = %image.kind,
        width = image.width,
        height = image.height,
        "Derivative generated"
    );
    Ok(Derivative::from_transcoded(id, spec, image))
}

fn op_name(method: Method) -> &'static str {
    match method {
        Method::Get => "fetch",
        Method::Put => "upload",
        Method::Delete => "delete",
    }
}

/// Close the trace and log the outcome by severity.
fn finish<T>(op: &'static str, trace: &mut StageTrace, result: &Result<T, PipelineError>) {
    match result {
        Ok(_) => {
            trace.enter(Stage::Responding);
            trace.enter(Stage::Done);
            debug!(op, trace = %trace, "Request complete");
        }
        Err(e) if e.code() == ResponseCode::Denied => {
            trace.enter(Stage::Denied);
            warn!(op, reason = %e, trace = %trace, "Request denied");
        }
        Err(e) => {
            trace.enter(Stage::Failed);
            match e.code() {
                ResponseCode::InternalFailure => {
                    error!(op, error = %e, trace = %trace, "Request failed")
                }
                _ => debug!(op, error = %e, trace = %trace, "Request rejected"),
            }
        }
    }
}
