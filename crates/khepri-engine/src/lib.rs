use std::fs;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use khepri_contracts::request::file_name_of;
use khepri_contracts::{
    GenerateError, GenerationOutcome, GenerationRequest, ImageRef, TaskHandle, TaskSnapshot,
    TaskState, ValidationLimits,
};
use log::{debug, info};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use uuid::Uuid;

const DEFAULT_KIE_API_BASE: &str = "https://api.kie.ai/api/v1";
const DEFAULT_MODEL: &str = "nano-banana-pro";
const DEFAULT_STORAGE_BUCKET: &str = "ai-test-images";

// Per-call ceilings; submission and single status queries must never be able
// to starve the overall poll budget.
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(60);
const STATUS_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Poll pacing and the wall-clock ceiling for one generation. A fixed
/// interval, not a backoff: job durations are bounded and a status query is
/// cheap next to generation latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub ceiling: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            ceiling: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub base_url: String,
    pub anon_key: String,
    pub bucket: String,
}

/// Explicit configuration for one engine instance. Replaces the module-level
/// credential globals of the original service; the caller owns the lifecycle.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub kie_api_base: String,
    pub kie_api_key: String,
    pub model: String,
    pub storage: Option<StorageConfig>,
    pub poll: PollPolicy,
    pub limits: ValidationLimits,
}

impl EngineConfig {
    /// Reads configuration from the environment. `KIE_API_KEY` is required;
    /// storage credentials are optional and staging fails with a
    /// configuration error only when a request actually needs them.
    pub fn from_env() -> Result<Self> {
        let Some(kie_api_key) = non_empty_env("KIE_API_KEY") else {
            bail!("KIE_API_KEY is not set");
        };
        let kie_api_base = non_empty_env("KIE_API_BASE")
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_KIE_API_BASE.to_string());
        let storage = match (non_empty_env("SUPABASE_URL"), non_empty_env("SUPABASE_ANON_KEY")) {
            (Some(base_url), Some(anon_key)) => Some(StorageConfig {
                base_url: base_url.trim_end_matches('/').to_string(),
                anon_key,
                bucket: non_empty_env("SUPABASE_BUCKET")
                    .unwrap_or_else(|| DEFAULT_STORAGE_BUCKET.to_string()),
            }),
            _ => None,
        };
        Ok(Self {
            kie_api_base,
            kie_api_key,
            model: non_empty_env("KIE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            storage,
            poll: PollPolicy::default(),
            limits: ValidationLimits::default(),
        })
    }
}

/// Fully resolved job description: every image reference is a public URL by
/// the time one of these exists.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub model: String,
    pub prompt: String,
    pub image_urls: Vec<String>,
    pub aspect_ratio: String,
    pub resolution: String,
    pub output_format: String,
}

impl JobSpec {
    pub fn from_request(request: &GenerationRequest, model: &str, image_urls: Vec<String>) -> Self {
        Self {
            model: model.to_string(),
            prompt: request.prompt.clone(),
            image_urls,
            aspect_ratio: request.aspect_ratio.clone(),
            resolution: request.resolution.as_str().to_string(),
            output_format: request.output_format.as_str().to_string(),
        }
    }

    pub fn payload(&self) -> Value {
        json!({
            "model": self.model,
            "input": {
                "prompt": self.prompt,
                "image_input": self.image_urls,
                "aspect_ratio": self.aspect_ratio,
                "resolution": self.resolution,
                "output_format": self.output_format,
            },
        })
    }
}

/// The remote generation provider: submit a job, later ask how it is doing.
pub trait GenerationApi: Send + Sync {
    fn create_task(&self, job: &JobSpec) -> Result<TaskHandle, GenerateError>;
    fn record_info(&self, task: &TaskHandle) -> Result<TaskSnapshot, GenerateError>;
}

/// Object storage: turn a local file into a publicly fetchable URL.
pub trait BlobStore: Send + Sync {
    fn stage(&self, path: &Path) -> Result<String, GenerateError>;
}

/// HTTP client for the Kie generation API.
pub struct KieClient {
    api_base: String,
    api_key: String,
    http: HttpClient,
}

impl KieClient {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
            http: HttpClient::new(),
        }
    }
}

impl GenerationApi for KieClient {
    fn create_task(&self, job: &JobSpec) -> Result<TaskHandle, GenerateError> {
        let endpoint = format!("{}/jobs/createTask", self.api_base);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .timeout(SUBMIT_TIMEOUT)
            .json(&job.payload())
            .send()
            .map_err(|err| GenerateError::SubmissionRejected {
                message: format!("createTask request failed: {err}"),
            })?;
        let payload = api_payload("createTask", response)
            .map_err(|message| GenerateError::SubmissionRejected { message })?;
        parse_task_id(&payload).ok_or_else(|| GenerateError::SubmissionRejected {
            message: format!(
                "createTask response missing taskId: {}",
                truncate_text(&payload.to_string(), 512)
            ),
        })
    }

    fn record_info(&self, task: &TaskHandle) -> Result<TaskSnapshot, GenerateError> {
        let endpoint = format!("{}/jobs/recordInfo", self.api_base);
        let response = self
            .http
            .get(&endpoint)
            .bearer_auth(&self.api_key)
            .timeout(STATUS_TIMEOUT)
            .query(&[("taskId", task.as_str())])
            .send()
            .map_err(|err| GenerateError::PollTransport {
                message: format!("recordInfo request failed: {err}"),
            })?;
        let payload = api_payload("recordInfo", response)
            .map_err(|message| GenerateError::PollTransport { message })?;
        parse_snapshot(&payload).map_err(|message| GenerateError::PollTransport { message })
    }
}

/// Supabase Storage backend. Each upload gets a fresh uuid key; two uploads
/// of the same file land under different keys (dedup is out of scope).
pub struct SupabaseStore {
    base_url: String,
    anon_key: String,
    bucket: String,
    http: HttpClient,
}

impl SupabaseStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            bucket: config.bucket.clone(),
            http: HttpClient::new(),
        }
    }

    pub fn public_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, key
        )
    }
}

impl BlobStore for SupabaseStore {
    fn stage(&self, path: &Path) -> Result<String, GenerateError> {
        let resolved = fs::canonicalize(path).map_err(|_| GenerateError::FileNotFound {
            path: path.display().to_string(),
        })?;
        let bytes = fs::read(&resolved).map_err(|err| GenerateError::UploadFailed {
            message: format!("failed reading {}: {err}", resolved.display()),
        })?;
        let key = storage_key_for(&resolved);
        let endpoint = format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, key);

        let mut builder = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.anon_key)
            .timeout(UPLOAD_TIMEOUT)
            .body(bytes);
        if let Some(mime) = mime_for_path(&resolved) {
            builder = builder.header(CONTENT_TYPE, mime);
        }
        let response = builder.send().map_err(|err| GenerateError::UploadFailed {
            message: format!("upload request failed ({}): {err}", file_name_of(&resolved)),
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(GenerateError::UploadFailed {
                message: format!(
                    "upload of {} failed ({}): {}",
                    file_name_of(&resolved),
                    status.as_u16(),
                    truncate_text(&body, 512)
                ),
            });
        }
        let url = self.public_url(&key);
        info!("staged {} -> {url}", resolved.display());
        Ok(url)
    }
}

/// Globally unique storage key: fresh uuid, original extension preserved.
pub fn storage_key_for(path: &Path) -> String {
    match path.extension().and_then(|value| value.to_str()) {
        Some(ext) if !ext.is_empty() => format!("{}.{}", Uuid::new_v4(), ext),
        _ => Uuid::new_v4().to_string(),
    }
}

/// External cancellation signal, shared between the caller and the poll
/// loop. Doubles as the inter-poll sleep so a cancel wakes the loop
/// immediately instead of waiting out the interval.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut cancelled = lock_unpoisoned(&self.inner.cancelled);
        *cancelled = true;
        self.inner.signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *lock_unpoisoned(&self.inner.cancelled)
    }

    /// Sleeps for up to `duration`; returns true if cancellation arrived
    /// before the time elapsed.
    pub fn wait(&self, duration: Duration) -> bool {
        let cancelled = lock_unpoisoned(&self.inner.cancelled);
        if *cancelled {
            return true;
        }
        match self
            .inner
            .signal
            .wait_timeout_while(cancelled, duration, |cancelled| !*cancelled)
        {
            Ok((guard, _)) => *guard,
            Err(poisoned) => *poisoned.into_inner().0,
        }
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Queries task status until a terminal state, the ceiling, or cancellation.
///
/// State machine per query: `success` -> done; `fail` -> remote failure with
/// the provider's message; any other tag -> still in progress. The ceiling
/// is checked after each query so the last observed tag can be reported.
/// A transport or envelope error on any single query fails the workflow
/// immediately; transient-error retry is deliberately not implemented.
pub fn poll_until_terminal(
    api: &dyn GenerationApi,
    task: &TaskHandle,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<TaskSnapshot, GenerateError> {
    let started = Instant::now();
    loop {
        if cancel.is_cancelled() {
            return Err(GenerateError::Cancelled);
        }
        let snapshot = api.record_info(task)?;
        match snapshot.task_state() {
            TaskState::Success => {
                debug!("task {task} succeeded after {:.1}s", started.elapsed().as_secs_f64());
                return Ok(snapshot);
            }
            TaskState::Fail => {
                return Err(GenerateError::RemoteFailure {
                    message: snapshot
                        .fail_msg
                        .filter(|msg| !msg.trim().is_empty())
                        .unwrap_or_else(|| "provider reported failure without a message".to_string()),
                });
            }
            TaskState::InProgress => {}
        }
        let elapsed = started.elapsed();
        if elapsed >= policy.ceiling {
            return Err(GenerateError::TimedOut {
                elapsed_secs: elapsed.as_secs_f64(),
                last_state: snapshot.state,
            });
        }
        debug!("task {task} still in progress (state: {})", snapshot.state);
        if cancel.wait(policy.interval) {
            return Err(GenerateError::Cancelled);
        }
    }
}

/// Orchestrates one generation: validate, stage local inputs, submit, poll
/// to a terminal state, extract the artifact URL. Stateless between calls
/// and safe to share across threads; concurrent invocations only share the
/// underlying HTTP connection pools.
pub struct Engine {
    api: Arc<dyn GenerationApi>,
    store: Option<Arc<dyn BlobStore>>,
    model: String,
    poll: PollPolicy,
    limits: ValidationLimits,
}

impl Engine {
    pub fn new(
        api: Arc<dyn GenerationApi>,
        store: Option<Arc<dyn BlobStore>>,
        model: impl Into<String>,
        poll: PollPolicy,
        limits: ValidationLimits,
    ) -> Self {
        Self {
            api,
            store,
            model: model.into(),
            poll,
            limits,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            api: Arc::new(KieClient::new(
                config.kie_api_base.clone(),
                config.kie_api_key.clone(),
            )),
            store: config
                .storage
                .as_ref()
                .map(|storage| Arc::new(SupabaseStore::new(storage)) as Arc<dyn BlobStore>),
            model: config.model.clone(),
            poll: config.poll,
            limits: config.limits,
        }
    }

    pub fn generate(&self, request: &GenerationRequest) -> GenerationOutcome {
        self.generate_with_cancel(request, &CancellationToken::new())
    }

    /// Runs one generation under an external cancellation signal. Every
    /// failure mode collapses into `GenerationOutcome::Error`, carrying the
    /// task handle whenever submission got far enough to produce one.
    pub fn generate_with_cancel(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> GenerationOutcome {
        let mut task: Option<TaskHandle> = None;
        match self.run(request, cancel, &mut task) {
            Ok(image_url) => match task {
                Some(task_id) => GenerationOutcome::Success { task_id, image_url },
                None => GenerationOutcome::Error {
                    task_id: None,
                    error: "internal: task handle missing after success".to_string(),
                },
            },
            Err(err) => GenerationOutcome::failure(task, &err),
        }
    }

    fn run(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
        task_slot: &mut Option<TaskHandle>,
    ) -> Result<String, GenerateError> {
        request.validate(&self.limits)?;
        let image_urls = self.stage_inputs(request)?;
        let job = JobSpec::from_request(request, &self.model, image_urls);
        let task = self.api.create_task(&job)?;
        info!("submitted task {task} ({} input images)", job.image_urls.len());
        *task_slot = Some(task.clone());
        let snapshot = poll_until_terminal(self.api.as_ref(), &task, &self.poll, cancel)?;
        snapshot.first_result_url().ok_or(GenerateError::NoResultUrl)
    }

    /// Resolves every image reference to a public URL, uploading local files
    /// concurrently. Output order follows input order.
    fn stage_inputs(&self, request: &GenerationRequest) -> Result<Vec<String>, GenerateError> {
        let locals: Vec<(usize, &Path)> = request
            .images
            .iter()
            .enumerate()
            .filter_map(|(idx, image)| image.as_local().map(|path| (idx, path)))
            .collect();
        if locals.is_empty() {
            return Ok(request
                .images
                .iter()
                .filter_map(|image| match image {
                    ImageRef::Url(url) => Some(url.clone()),
                    ImageRef::Local(_) => None,
                })
                .collect());
        }
        let Some(store) = self.store.as_deref() else {
            return Err(GenerateError::StorageUnavailable {
                reason: "object storage credentials are not configured".to_string(),
            });
        };

        let mut staged: Vec<Option<Result<String, GenerateError>>> =
            request.images.iter().map(|_| None).collect();
        thread::scope(|scope| {
            let mut handles = Vec::new();
            for &(idx, path) in &locals {
                handles.push((idx, scope.spawn(move || store.stage(path))));
            }
            for (idx, handle) in handles {
                let result = handle.join().unwrap_or_else(|_| {
                    Err(GenerateError::UploadFailed {
                        message: "staging thread panicked".to_string(),
                    })
                });
                staged[idx] = Some(result);
            }
        });

        let mut urls = Vec::with_capacity(request.images.len());
        for (idx, image) in request.images.iter().enumerate() {
            match image {
                ImageRef::Url(url) => urls.push(url.clone()),
                ImageRef::Local(path) => match staged[idx].take() {
                    Some(result) => urls.push(result?),
                    None => {
                        return Err(GenerateError::UploadFailed {
                            message: format!("no staging result for {}", path.display()),
                        })
                    }
                },
            }
        }
        Ok(urls)
    }
}

/// Reads a provider response and enforces the two-layer success contract:
/// the transport status AND the embedded application code must both pass.
fn api_payload(context: &str, response: HttpResponse) -> Result<Value, String> {
    let status = response.status().as_u16();
    let body = response
        .text()
        .map_err(|err| format!("{context} response body read failed: {err}"))?;
    unwrap_envelope(context, status, &body)
}

fn unwrap_envelope(context: &str, status: u16, body: &str) -> Result<Value, String> {
    if !(200..300).contains(&status) {
        return Err(format!(
            "{context} request failed ({status}): {}",
            truncate_text(body, 512)
        ));
    }
    let parsed: Value = serde_json::from_str(body).map_err(|_| {
        format!(
            "{context} returned non-JSON payload: {}",
            truncate_text(body, 200)
        )
    })?;
    let code = parsed.get("code").and_then(Value::as_i64);
    if code != Some(200) {
        return Err(format!(
            "{context} reported an application error: {}",
            truncate_text(&parsed.to_string(), 512)
        ));
    }
    Ok(parsed)
}

fn parse_task_id(payload: &Value) -> Option<TaskHandle> {
    payload
        .get("data")
        .and_then(|data| data.get("taskId"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(TaskHandle::new)
}

fn parse_snapshot(payload: &Value) -> Result<TaskSnapshot, String> {
    let data = payload
        .get("data")
        .cloned()
        .ok_or_else(|| "recordInfo response missing data".to_string())?;
    serde_json::from_value(data).map_err(|err| format!("recordInfo data malformed: {err}"))
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
