use crate::auth::AuthProvider;
use crate::config::ClientConfig;
use crate::error::RepoError;
use crate::navigation::NavigationSignal;
use crate::pagination::{self, Page, Pagination};
use crate::transport::{Transport, TransportRequest, TransportResponse, Verb};

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use magpie_store::metrics::{ETAG_304, OPTIMISTIC_SUCCESS, ROLLBACK};
use magpie_store::{CacheEntry, CacheStore, Metrics};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// DTO/domain conversion plus naming for one API resource collection.
///
/// Adapters implement this per resource type; the repository engine stays
/// generic. `version_of` supplies the optimistic-concurrency tag carried
/// as `If-Match` on updates, typically the DTO's version field.
pub trait Resource: Send + Sync + 'static {
    type Dto: Serialize + DeserializeOwned + Send;
    type Model: Clone + Send + Sync;

    /// Collection segment of resource URLs (`.../{tenant}/{name}`).
    fn name(&self) -> &str;

    fn from_dto(&self, dto: Self::Dto) -> Self::Model;
    fn to_dto(&self, model: &Self::Model) -> Self::Dto;

    fn version_of(&self, _model: &Self::Model) -> Option<String> {
        None
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<Value, RepoError>>>;

#[derive(Clone, Copy, Debug, PartialEq)]
enum FetchKind {
    Item,
    /// Page envelope: only the `data` rows are cached; fresh hits are
    /// re-wrapped in a single-page envelope.
    List,
}

/// Generic caching repository for one tenant-scoped resource collection.
///
/// Reads are cache-first with conditional revalidation and in-flight
/// coalescing; writes are optimistic with rollback. Clones share the
/// same in-flight table and collaborators.
pub struct Repository<R: Resource> {
    resource: Arc<R>,
    inner: Arc<RepoInner>,
}

impl<R: Resource> Clone for Repository<R> {
    fn clone(&self) -> Self {
        Self {
            resource: Arc::clone(&self.resource),
            inner: Arc::clone(&self.inner),
        }
    }
}

struct RepoInner {
    transport: Arc<dyn Transport>,
    cache: Arc<CacheStore>,
    metrics: Arc<Metrics>,
    auth: Arc<dyn AuthProvider>,
    nav: NavigationSignal,
    config: ClientConfig,
    inflight: Mutex<HashMap<(Verb, String), SharedFetch>>,
}

impl<R: Resource> Repository<R> {
    pub fn new(
        resource: R,
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        cache: Arc<CacheStore>,
        metrics: Arc<Metrics>,
        auth: Arc<dyn AuthProvider>,
        nav: NavigationSignal,
    ) -> Self {
        Self {
            resource: Arc::new(resource),
            inner: Arc::new(RepoInner {
                transport,
                cache,
                metrics,
                auth,
                nav,
                config,
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Cache key for the unparameterized collection listing.
    pub fn list_key(&self) -> String {
        format!("list:{}", self.resource.name())
    }

    /// Cache key for a parameterized listing; parameters are sorted so
    /// equivalent queries share an entry.
    pub fn list_key_with(&self, params: &BTreeMap<String, String>) -> String {
        if params.is_empty() {
            return self.list_key();
        }
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.list_key(), query)
    }

    pub fn item_key(&self, id: &str) -> String {
        format!("{}:{}", self.list_key(), id)
    }

    pub fn collection_url(&self, tenant: &str) -> String {
        format!(
            "{}/api/v1/{}/{}",
            self.inner.config.api_base.trim_end_matches('/'),
            tenant,
            self.resource.name()
        )
    }

    fn item_url(&self, tenant: &str, id: &str) -> String {
        format!("{}/{}", self.collection_url(tenant), id)
    }

    /// Fetch a single resource, serving fresh cache hits without touching
    /// the network and joining any in-flight read for the same key.
    pub async fn get_one(&self, tenant: &str, id: &str) -> Result<R::Model, RepoError> {
        let key = self.item_key(id);
        if let Some(entry) = self.inner.cache.get(&key) {
            return self.decode_model(entry.data);
        }
        let value = self
            .inner
            .fetch(key, self.item_url(tenant, id), Vec::new(), FetchKind::Item)
            .await?;
        self.decode_model(value)
    }

    /// Fetch one page of the collection. A fresh cached result is
    /// returned as a single-page envelope (`has_next = false`); otherwise
    /// the server's envelope is passed through.
    pub async fn get_many(
        &self,
        tenant: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Page<R::Model>, RepoError> {
        let key = self.list_key_with(params);
        if let Some(entry) = self.inner.cache.get(&key) {
            let rows: Vec<R::Dto> =
                serde_json::from_value(entry.data).map_err(RepoError::decode)?;
            let data: Vec<R::Model> = rows
                .into_iter()
                .map(|dto| self.resource.from_dto(dto))
                .collect();
            return Ok(Page {
                pagination: Pagination::single_page(data.len() as u64),
                data,
            });
        }

        let query = params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<Vec<_>>();
        let value = self
            .inner
            .fetch(key, self.collection_url(tenant), query, FetchKind::List)
            .await?;
        let page: Page<R::Dto> = serde_json::from_value(value).map_err(RepoError::decode)?;
        Ok(Page {
            data: page
                .data
                .into_iter()
                .map(|dto| self.resource.from_dto(dto))
                .collect(),
            pagination: page.pagination,
        })
    }

    /// Walk the whole collection, following cursors until the server
    /// reports no further page.
    pub async fn get_all(
        &self,
        tenant: &str,
        params: BTreeMap<String, String>,
    ) -> Result<Vec<R::Model>, RepoError> {
        pagination::collect_all(params, |p| async move { self.get_many(tenant, &p).await }).await
    }

    /// Create a resource. No speculative cache insert happens; affected
    /// list keys are invalidated once the server confirms.
    pub async fn create(&self, tenant: &str, payload: &R::Dto) -> Result<R::Model, RepoError> {
        let url = self.collection_url(tenant);
        let body = serde_json::to_value(payload).map_err(RepoError::decode)?;
        let value = self
            .inner
            .optimistic_create(url, body, vec![self.list_key()])
            .await?;
        self.decode_model(value)
    }

    /// Optimistically update a resource: the merged value is visible in
    /// the cache (stale) while the PATCH is in flight, the server checks
    /// the `If-Match` precondition, and a failure restores the snapshot.
    pub async fn update(
        &self,
        tenant: &str,
        id: &str,
        model: &R::Model,
    ) -> Result<R::Model, RepoError> {
        let patch =
            serde_json::to_value(self.resource.to_dto(model)).map_err(RepoError::decode)?;
        let value = self
            .inner
            .optimistic_update(
                self.item_key(id),
                self.item_url(tenant, id),
                patch,
                self.resource.version_of(model),
                vec![self.list_key()],
            )
            .await?;
        self.decode_model(value)
    }

    /// Optimistically delete a resource: the cache entry disappears
    /// before the DELETE settles and reappears if the server refuses.
    pub async fn delete(&self, tenant: &str, id: &str) -> Result<(), RepoError> {
        self.inner
            .optimistic_delete(
                self.item_key(id),
                self.item_url(tenant, id),
                vec![self.list_key()],
            )
            .await
    }

    fn decode_model(&self, value: Value) -> Result<R::Model, RepoError> {
        let dto: R::Dto = serde_json::from_value(value).map_err(RepoError::decode)?;
        Ok(self.resource.from_dto(dto))
    }
}

impl RepoInner {
    /// Single-flight GET: at most one outstanding read per cache key;
    /// concurrent callers join the same shared computation.
    fn fetch(
        self: &Arc<Self>,
        key: String,
        url: String,
        params: Vec<(String, String)>,
        kind: FetchKind,
    ) -> SharedFetch {
        let dedup = (Verb::Get, key.clone());
        let mut inflight = self.inflight.lock();
        if let Some(existing) = inflight.get(&dedup) {
            tracing::trace!(key = %key, "joining in-flight request");
            return existing.clone();
        }

        let inner = Arc::clone(self);
        let fut = async move {
            let result = RepoInner::do_fetch(&inner, &key, url, params, kind).await;
            inner.inflight.lock().remove(&(Verb::Get, key));
            result
        }
        .boxed()
        .shared();

        inflight.insert(dedup, fut.clone());
        drop(inflight);

        // Drive the request to completion even if every caller drops, so
        // the in-flight entry is always removed on settlement.
        tokio::spawn(fut.clone());
        fut
    }

    async fn do_fetch(
        inner: &Arc<RepoInner>,
        key: &str,
        url: String,
        params: Vec<(String, String)>,
        kind: FetchKind,
    ) -> Result<Value, RepoError> {
        let mut req = TransportRequest::new(Verb::Get, url).params(params);
        let request_url = req.full_url();

        let prior_etag = inner
            .cache
            .peek(key)
            .and_then(|e| e.etag)
            .or_else(|| inner.cache.get_url_etag(&request_url));
        if let Some(tag) = &prior_etag {
            req = req.header("If-None-Match", tag.clone());
        }

        let guard = inner.nav.guard();
        let resp = tokio::select! {
            _ = guard.cancelled() => return Err(RepoError::Cancelled),
            resp = inner.transport.send(req) => resp?,
        };

        let etag = resp.etag().or(prior_etag);
        let body = if resp.is_not_modified() {
            inner.metrics.inc(ETAG_304);
            tracing::debug!(key = %key, "not modified, recovering cached body");
            inner
                .cache
                .get_url_body(&request_url)
                .or_else(|| inner.recover_from_entry(key, kind))
        } else if resp.is_success() {
            resp.json()?
                .or_else(|| inner.recover_from_entry(key, kind))
        } else {
            return Err(RepoError::from_status(
                resp.status,
                resp.json().unwrap_or(None),
            ));
        };

        let Some(body) = body else {
            return Err(RepoError::MissingBody { url: request_url });
        };

        match kind {
            FetchKind::Item => {
                inner
                    .cache
                    .set(key, body.clone(), etag.clone(), inner.config.ttl());
            }
            FetchKind::List => {
                let rows = body
                    .get("data")
                    .cloned()
                    .unwrap_or_else(|| Value::Array(Vec::new()));
                inner.cache.set(key, rows, etag.clone(), inner.config.ttl());
            }
        }
        inner.cache.set_url_meta(&request_url, etag, Some(body.clone()));

        Ok(body)
    }

    /// Body recovery from a (possibly stale) cache entry, shaped per
    /// fetch kind: list entries hold only the rows.
    fn recover_from_entry(&self, key: &str, kind: FetchKind) -> Option<Value> {
        let entry = self.cache.peek(key)?;
        Some(match kind {
            FetchKind::Item => entry.data,
            FetchKind::List => {
                let returned = entry.data.as_array().map(Vec::len).unwrap_or(0) as u64;
                serde_json::json!({
                    "data": entry.data,
                    "pagination": Pagination::single_page(returned),
                })
            }
        })
    }

    async fn optimistic_create(
        &self,
        url: String,
        body: Value,
        invalidate: Vec<String>,
    ) -> Result<Value, RepoError> {
        let req = self.with_antiforgery(TransportRequest::new(Verb::Post, &url).json(body));

        let guard = self.nav.guard();
        let outcome = tokio::select! {
            _ = guard.cancelled() => return Err(RepoError::Cancelled),
            resp = self.transport.send(req) => read_entity(resp),
        };

        match outcome {
            Ok((body, etag)) => {
                let Some(entity) = body else {
                    self.metrics.inc(ROLLBACK);
                    return Err(RepoError::MissingBody { url });
                };
                self.cache.invalidate(&invalidate, true);
                if let Some(id) = entity.get("id").and_then(Value::as_str) {
                    // canonical URL of the created entity, primed for the
                    // first GET by id
                    self.cache
                        .set_url_meta(&format!("{url}/{id}"), etag, Some(entity.clone()));
                }
                self.metrics.inc(OPTIMISTIC_SUCCESS);
                Ok(entity)
            }
            Err(err) => {
                self.metrics.inc(ROLLBACK);
                tracing::warn!(url = %url, error = %err, "create failed");
                Err(err)
            }
        }
    }

    async fn optimistic_update(
        &self,
        key: String,
        url: String,
        patch: Value,
        expected_tag: Option<String>,
        invalidate: Vec<String>,
    ) -> Result<Value, RepoError> {
        let snapshot = self.cache.peek(&key);
        let mut applied = None;
        if let Some(snap) = &snapshot {
            let merged = merge_patch(&snap.data, &patch);
            self.cache.set_stale(&key, merged.clone(), snap.etag.clone());
            applied = Some(merged);
        }
        let if_match = expected_tag.or_else(|| snapshot.as_ref().and_then(|s| s.etag.clone()));

        let mut req = TransportRequest::new(Verb::Patch, &url).json(patch);
        if let Some(tag) = &if_match {
            req = req.header("If-Match", tag.clone());
        }
        let req = self.with_antiforgery(req);

        let guard = self.nav.guard();
        let outcome = tokio::select! {
            _ = guard.cancelled() => return Err(RepoError::Cancelled),
            resp = self.transport.send(req) => read_entity(resp),
        };

        let committed = outcome.and_then(|(body, etag)| {
            let data = body
                .or_else(|| snapshot.as_ref().map(|s| s.data.clone()))
                .ok_or_else(|| RepoError::MissingBody { url: url.clone() })?;
            self.cache.set(
                &key,
                data.clone(),
                etag.or_else(|| if_match.clone()),
                self.config.ttl(),
            );
            self.cache.invalidate(&invalidate, true);
            self.metrics.inc(OPTIMISTIC_SUCCESS);
            Ok(data)
        });

        if let Err(err) = &committed {
            self.rollback_update(&key, &snapshot, &applied);
            self.metrics.inc(ROLLBACK);
            tracing::warn!(key = %key, error = %err, "update failed, rolled back");
        }
        committed
    }

    /// Restore the pre-mutation snapshot, but only while the cached value
    /// is still the one this mutation applied; a newer write's pending
    /// state must not be clobbered by an older rollback.
    fn rollback_update(&self, key: &str, snapshot: &Option<CacheEntry>, applied: &Option<Value>) {
        let (Some(snap), Some(mine)) = (snapshot, applied) else {
            return;
        };
        let still_ours = self
            .cache
            .peek(key)
            .is_some_and(|current| current.data == *mine);
        if still_ours {
            self.cache
                .set(key, snap.data.clone(), snap.etag.clone(), self.config.ttl());
        } else {
            tracing::debug!(key = %key, "rollback skipped, entry replaced by a newer write");
        }
    }

    async fn optimistic_delete(
        &self,
        key: String,
        url: String,
        invalidate: Vec<String>,
    ) -> Result<(), RepoError> {
        let snapshot = self.cache.peek(&key);
        // the entry disappears before the server confirms
        self.cache.invalidate(std::slice::from_ref(&key), true);

        let req = self.with_antiforgery(TransportRequest::new(Verb::Delete, &url));
        let guard = self.nav.guard();
        let outcome: Result<(), RepoError> = tokio::select! {
            _ = guard.cancelled() => return Err(RepoError::Cancelled),
            resp = self.transport.send(req) => match resp {
                Ok(r) if r.is_success() => Ok(()),
                Ok(r) => Err(RepoError::from_status(r.status, r.json().unwrap_or(None))),
                Err(e) => Err(e),
            },
        };

        match outcome {
            Ok(()) => {
                self.cache.invalidate(&invalidate, true);
                self.metrics.inc(OPTIMISTIC_SUCCESS);
                Ok(())
            }
            Err(err) => {
                if let Some(snap) = &snapshot {
                    if self.cache.peek(&key).is_none() {
                        self.cache
                            .set(&key, snap.data.clone(), snap.etag.clone(), self.config.ttl());
                    } else {
                        tracing::debug!(key = %key, "restore skipped, key recreated during delete");
                    }
                }
                self.metrics.inc(ROLLBACK);
                tracing::warn!(key = %key, error = %err, "delete failed, snapshot restored");
                Err(err)
            }
        }
    }

    fn with_antiforgery(&self, mut req: TransportRequest) -> TransportRequest {
        if let Some((name, value)) = self.auth.antiforgery_header() {
            req = req.header(name, value);
        }
        req
    }
}

fn read_entity(
    resp: Result<TransportResponse, RepoError>,
) -> Result<(Option<Value>, Option<String>), RepoError> {
    let resp = resp?;
    if !resp.is_success() {
        return Err(RepoError::from_status(
            resp.status,
            resp.json().unwrap_or(None),
        ));
    }
    let etag = resp.etag();
    let body = resp.json()?;
    Ok((body, etag))
}

/// Shallow merge of a patch object over a base object; non-object
/// patches replace the base wholesale.
fn merge_patch(base: &Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            let mut merged = base.clone();
            for (k, v) in patch {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        _ => patch.clone(),
    }
}
