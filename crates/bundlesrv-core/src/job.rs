//! Bundle jobs: lazy build, deferred requests, rebuild on change.
//!
//! One [`BundleJob`] exists per configured bundle. The first request starts
//! a build; requests that arrive before any bundle is available wait in a
//! FIFO queue and are answered, in order, by the build that completes.
//!
//! ```text
//! serve ──► persisted copy on disk? ──► ready? ──yes──► respond
//!                                        │
//!                                        no ──► build() (no-op if in flight)
//!                                        │
//!                        disk copy? ─yes─┴─no──► queue ──► answered on success
//! ```
//!
//! All job state sits behind one mutex. `building` is the only guard
//! against concurrent builds; backend work runs on a blocking worker and its
//! completion is consumed by exactly one task, which drains the queue while
//! holding the lock.

use crate::backend::{BundleBackend, BundleError, BundleOutput};
use crate::codes;
use crate::config::{BundleSpec, ServerConfig};
use crate::persist::WritePolicy;
use crate::plan::BundlePlan;
use crate::response::{BundleResponse, Payload};
use crate::watch::{next_change, DependencyWatcher};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A request waiting for the first successful build.
#[derive(Debug)]
struct DeferredRequest {
    /// `If-None-Match` sent with the request.
    validator: Option<String>,
    reply: oneshot::Sender<BundleResponse>,
}

#[derive(Debug, Default)]
struct JobState {
    building: bool,
    /// A change arrived while building; build again when done.
    rebuild_pending: bool,
    payload: Option<Payload>,
    ready: bool,
    queue: VecDeque<DeferredRequest>,
    builds: u64,
    last_error: Option<String>,
}

/// Result of one build, resolved by the handle [`BundleJob::build`] returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Built {
        fingerprint: String,
        size: usize,
        /// Deferred requests answered by this build.
        answered: usize,
    },
    Failed(BundleError),
}

impl BuildOutcome {
    #[must_use]
    pub fn is_built(&self) -> bool {
        matches!(self, Self::Built { .. })
    }
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub file: String,
    pub building: bool,
    pub ready: bool,
    pub watching: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    pub size: usize,
    pub queued: usize,
    pub builds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Options resolved from configuration at construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    /// Watch the dependency graph and rebuild on change.
    pub watch: bool,
    /// Give up on a deferred request after this long.
    pub defer_timeout: Option<Duration>,
}

impl JobOptions {
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            watch: config.dev_mode,
            defer_timeout: config.defer_timeout(),
        }
    }
}

/// One configured bundle and everything needed to build and serve it.
pub struct BundleJob {
    plan: BundlePlan,
    policy: WritePolicy,
    options: JobOptions,
    backend: Arc<dyn BundleBackend>,
    state: Mutex<JobState>,
    watcher: Mutex<Option<DependencyWatcher>>,
}

impl std::fmt::Debug for BundleJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleJob")
            .field("plan", &self.plan)
            .field("policy", &self.policy)
            .field("options", &self.options)
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

impl BundleJob {
    #[must_use]
    pub fn new(
        plan: BundlePlan,
        policy: WritePolicy,
        options: JobOptions,
        backend: Arc<dyn BundleBackend>,
    ) -> Arc<Self> {
        Arc::new(Self {
            plan,
            policy,
            options,
            backend,
            state: Mutex::new(JobState::default()),
            watcher: Mutex::new(None),
        })
    }

    /// Create the job for one configured bundle.
    #[must_use]
    pub fn from_config(
        spec: &BundleSpec,
        config: &ServerConfig,
        backend: Arc<dyn BundleBackend>,
    ) -> Arc<Self> {
        let plan = BundlePlan::resolve(spec, config);
        let policy = WritePolicy::resolve(&plan.file_name, config);
        Self::new(plan, policy, JobOptions::from_config(config), backend)
    }

    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.plan.file_name
    }

    #[must_use]
    pub fn plan(&self) -> &BundlePlan {
        &self.plan
    }

    #[must_use]
    pub fn output_path(&self) -> &std::path::Path {
        &self.policy.output_path
    }

    fn lock(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap()
    }

    /// Start a build unless one is already in flight.
    ///
    /// Returns the completion handle of the started build, or `None` if the
    /// call was a no-op.
    pub fn build(self: &Arc<Self>) -> Option<JoinHandle<BuildOutcome>> {
        let mut state = self.lock();
        self.start_build(&mut state)
    }

    /// Rebuild after a dependency change. A change during an in-flight
    /// build schedules exactly one follow-up build.
    pub fn rebuild(self: &Arc<Self>) -> Option<JoinHandle<BuildOutcome>> {
        let mut state = self.lock();
        if state.building {
            state.rebuild_pending = true;
            return None;
        }
        self.start_build(&mut state)
    }

    fn start_build(self: &Arc<Self>, state: &mut JobState) -> Option<JoinHandle<BuildOutcome>> {
        if state.building {
            return None;
        }
        state.building = true;

        let job = Arc::clone(self);
        Some(tokio::spawn(async move { job.run_build().await }))
    }

    async fn run_build(self: Arc<Self>) -> BuildOutcome {
        if self.options.watch {
            self.ensure_watching().await;
        }

        let backend = Arc::clone(&self.backend);
        let plan = self.plan.clone();
        let started = Instant::now();

        let result = tokio::task::spawn_blocking(move || backend.bundle(&plan))
            .await
            .unwrap_or_else(|e| Err(BundleError::new(codes::BUNDLE_WORKER_FAILED, e.to_string())));

        let (outcome, output) = self.complete(result, started.elapsed());

        if let Some(output) = output {
            if let Some(watcher) = self.watcher.lock().unwrap().as_mut() {
                watcher.retarget(output.modules.iter().map(|m| m.path.clone()));
            }
            let job = Arc::clone(&self);
            match tokio::task::spawn_blocking(move || job.policy.persist(&job.plan, &output)).await {
                Ok(persisted) if !persisted.failed.is_empty() => {
                    warn!(
                        file = %self.plan.log_name,
                        written = persisted.written.len(),
                        failed = persisted.failed.len(),
                        "Some outputs were not written"
                    );
                }
                Ok(persisted) => {
                    debug!(file = %self.plan.log_name, written = persisted.written.len(), "Persisted");
                }
                Err(e) => {
                    warn!(file = %self.plan.log_name, error = %e, "Persist task failed");
                }
            }
        }

        // Stays `building` until persisted: two builds never write the same
        // outputs at once.
        let again = {
            let mut state = self.lock();
            state.building = false;
            std::mem::take(&mut state.rebuild_pending)
        };
        if again {
            debug!(file = %self.plan.log_name, "Dependencies changed during build");
            let _ = self.rebuild();
        }

        outcome
    }

    /// Record a finished build. Runs synchronously under the state lock so
    /// no request can slip between storing the payload and draining the
    /// queue.
    fn complete(
        &self,
        result: Result<BundleOutput, BundleError>,
        elapsed: Duration,
    ) -> (BuildOutcome, Option<BundleOutput>) {
        let mut state = self.lock();

        match result {
            Ok(output) => {
                let payload = Payload::new(output.code.clone());
                let first = state.builds == 0;
                state.builds += 1;
                state.ready = true;
                state.last_error = None;
                state.payload = Some(payload.clone());

                let mut answered = 0;
                for deferred in state.queue.drain(..) {
                    let response = payload.respond(deferred.validator.as_deref());
                    if deferred.reply.send(response).is_ok() {
                        answered += 1;
                    } else {
                        debug!(file = %self.plan.log_name, "Deferred request went away");
                    }
                }

                let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                if first {
                    info!(
                        file = %self.plan.log_name,
                        fingerprint = payload.fingerprint(),
                        size = payload.size(),
                        answered,
                        elapsed_ms,
                        "built"
                    );
                } else {
                    info!(
                        file = %self.plan.log_name,
                        fingerprint = payload.fingerprint(),
                        size = payload.size(),
                        elapsed_ms,
                        "rebuilt"
                    );
                }

                let outcome = BuildOutcome::Built {
                    fingerprint: payload.fingerprint().to_string(),
                    size: payload.size(),
                    answered,
                };
                (outcome, Some(output))
            }
            Err(e) => {
                error!(
                    file = %self.plan.log_name,
                    code = e.code,
                    error = %e.message,
                    "error building"
                );
                state.last_error = Some(e.to_string());
                (BuildOutcome::Failed(e), None)
            }
        }
    }

    /// Answer a request for this bundle.
    ///
    /// `validator` is the request's `If-None-Match` header. The returned
    /// future resolves immediately when a bundle is available, otherwise once
    /// a build succeeds (or the configured deferral timeout passes).
    pub async fn serve(self: &Arc<Self>, validator: Option<String>) -> BundleResponse {
        let on_disk = tokio::fs::read(&self.policy.output_path)
            .await
            .ok()
            .filter(|bytes| !bytes.is_empty());

        let pending = {
            let mut state = self.lock();
            if state.ready {
                None
            } else {
                let _ = self.start_build(&mut state);
                match on_disk {
                    None => {
                        state.queue.retain(|d| !d.reply.is_closed());
                        let (reply, rx) = oneshot::channel();
                        state.queue.push_back(DeferredRequest { validator: validator.clone(), reply });
                        debug!(file = %self.plan.log_name, queued = state.queue.len(), "Deferring request");
                        Some(rx)
                    }
                    Some(bytes) => {
                        if state.payload.is_none() {
                            state.payload = Some(Payload::new(bytes));
                        }
                        None
                    }
                }
            }
        };

        match pending {
            Some(rx) => self.wait_deferred(rx).await,
            None => match self.lock().payload.as_ref() {
                Some(payload) => payload.respond(validator.as_deref()),
                None => BundleResponse::Unavailable,
            },
        }
    }

    async fn wait_deferred(&self, rx: oneshot::Receiver<BundleResponse>) -> BundleResponse {
        let received = match self.options.defer_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    // The receiver is gone; drop its queue entry with it
                    let queued = {
                        let mut state = self.lock();
                        state.queue.retain(|d| !d.reply.is_closed());
                        state.queue.len()
                    };
                    warn!(
                        file = %self.plan.log_name,
                        timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                        queued,
                        "Deferred request timed out"
                    );
                    return BundleResponse::Unavailable;
                }
            },
            None => rx.await,
        };
        received.unwrap_or(BundleResponse::Unavailable)
    }

    /// Snapshot of the job's state.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        let watching = self.watcher.lock().unwrap().is_some();
        let state = self.lock();
        JobStatus {
            file: self.plan.file_name.clone(),
            building: state.building,
            ready: state.ready,
            watching,
            fingerprint: state.payload.as_ref().map(|p| p.fingerprint().to_string()),
            size: state.payload.as_ref().map_or(0, Payload::size),
            queued: state.queue.len(),
            builds: state.builds,
            last_error: state.last_error.clone(),
        }
    }

    /// Start the dependency watcher once; later calls are no-ops. Only runs
    /// from a build task, so it never races itself.
    async fn ensure_watching(self: &Arc<Self>) {
        if self.watcher.lock().unwrap().is_some() {
            return;
        }

        // The initial scan walks the whole base directory
        let (tx, rx) = mpsc::unbounded_channel();
        let basedir = self.plan.basedir.clone();
        let started = tokio::task::spawn_blocking(move || DependencyWatcher::start(&basedir, tx)).await;

        match started {
            Ok(Ok(watcher)) => {
                info!(file = %self.plan.log_name, "Watching for changes...");
                *self.watcher.lock().unwrap() = Some(watcher);
                tokio::spawn(watch_loop(Arc::downgrade(self), rx));
            }
            Ok(Err(e)) => {
                warn!(file = %self.plan.log_name, error = %e, "Failed to start watcher");
            }
            Err(e) => {
                warn!(file = %self.plan.log_name, error = %e, "Watcher task failed");
            }
        }
    }
}

/// Rebuild the job whenever its dependencies change. Ends when the job is
/// dropped or the watcher goes away.
async fn watch_loop(job: Weak<BundleJob>, mut rx: mpsc::UnboundedReceiver<Vec<PathBuf>>) {
    while let Some(changed) = next_change(&mut rx).await {
        let Some(job) = job.upgrade() else {
            break;
        };
        debug!(file = %job.plan.log_name, count = changed.len(), "Dependencies changed");
        let _ = job.rebuild();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc as std_mpsc;
    use tempfile::{tempdir, TempDir};
    use tracing_subscriber::fmt::MakeWriter;

    /// Backend whose builds block until the test hands it a result.
    struct GatedBackend {
        calls: AtomicUsize,
        results: Mutex<std_mpsc::Receiver<Result<BundleOutput, BundleError>>>,
    }

    impl GatedBackend {
        fn new() -> (Arc<Self>, std_mpsc::Sender<Result<BundleOutput, BundleError>>) {
            let (tx, rx) = std_mpsc::channel();
            let backend = Arc::new(Self {
                calls: AtomicUsize::new(0),
                results: Mutex::new(rx),
            });
            (backend, tx)
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Calls observed once the spawned build reached the backend.
        async fn calls_after_spawn(&self) -> usize {
            for _ in 0..200 {
                if self.calls() > 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            self.calls()
        }
    }

    impl BundleBackend for GatedBackend {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn bundle(&self, _plan: &BundlePlan) -> Result<BundleOutput, BundleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .unwrap()
                .recv()
                .unwrap_or_else(|_| Err(BundleError::new(codes::BUNDLE_FAILED, "gate closed")))
        }
    }

    fn job_with(
        dir: &TempDir,
        backend: Arc<dyn BundleBackend>,
        configure: impl FnOnce(ServerConfig) -> ServerConfig,
    ) -> Arc<BundleJob> {
        let config = configure(ServerConfig::new(dir.path().to_path_buf()));
        std::fs::create_dir_all(config.resolved_client_dir()).unwrap();
        BundleJob::from_config(&BundleSpec::new("app.js"), &config, backend)
    }

    async fn wait_for_queue(job: &Arc<BundleJob>, len: usize) {
        for _ in 0..200 {
            if job.status().queued == len {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("queue never reached {len}");
    }

    async fn wait_until_idle(job: &Arc<BundleJob>) {
        for _ in 0..400 {
            if !job.status().building {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("build never finished");
    }

    fn ok(code: &str) -> Result<BundleOutput, BundleError> {
        Ok(BundleOutput::new(code))
    }

    #[tokio::test]
    async fn test_first_request_is_deferred_then_answered() {
        let dir = tempdir().unwrap();
        let (backend, gate) = GatedBackend::new();
        let job = job_with(&dir, backend.clone(), |c| c);

        let first = tokio::spawn({
            let job = Arc::clone(&job);
            async move { job.serve(None).await }
        });
        wait_for_queue(&job, 1).await;

        gate.send(ok("B")).unwrap();
        let response = first.await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(response.body(), bytes::Bytes::from_static(b"B"));
        let etag = fingerprint(b"B");
        assert_eq!(response.etag(), Some(etag.as_str()));

        let second = job.serve(Some(etag)).await;
        assert_eq!(second, BundleResponse::NotModified);
        assert!(second.body().is_empty());
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_requests_start_one_build() {
        let dir = tempdir().unwrap();
        let (backend, gate) = GatedBackend::new();
        let job = job_with(&dir, backend.clone(), |c| c);

        let mut waiting = Vec::new();
        for _ in 0..5 {
            let job = Arc::clone(&job);
            waiting.push(tokio::spawn(async move { job.serve(None).await }));
        }
        wait_for_queue(&job, 5).await;
        assert!(job.build().is_none());

        gate.send(ok("bundle")).unwrap();
        for handle in waiting {
            let response = handle.await.unwrap();
            assert_eq!(response.body(), bytes::Bytes::from_static(b"bundle"));
        }
        assert_eq!(backend.calls(), 1);
        assert_eq!(job.status().queued, 0);
    }

    #[tokio::test]
    async fn test_drain_is_fifo() {
        let dir = tempdir().unwrap();
        let (backend, _gate) = GatedBackend::new();
        let job = job_with(&dir, backend, |c| c);

        let mut receivers = Vec::new();
        {
            let mut state = job.lock();
            for i in 0..3 {
                let (reply, rx) = oneshot::channel();
                let validator = (i == 1).then(|| fingerprint(b"fifo"));
                state.queue.push_back(DeferredRequest { validator, reply });
                receivers.push(rx);
            }
            state.building = true;
        }

        let (outcome, _) = job.complete(ok("fifo"), Duration::ZERO);
        assert_eq!(
            outcome,
            BuildOutcome::Built {
                fingerprint: fingerprint(b"fifo"),
                size: 4,
                answered: 3
            }
        );

        let responses: Vec<_> = receivers.into_iter().map(|mut rx| rx.try_recv().unwrap()).collect();
        assert_eq!(responses[0].status(), 200);
        assert_eq!(responses[1], BundleResponse::NotModified);
        assert_eq!(responses[2].status(), 200);
    }

    #[tokio::test]
    async fn test_failed_build_keeps_requests_queued() {
        let dir = tempdir().unwrap();
        let (backend, gate) = GatedBackend::new();
        let job = job_with(&dir, backend.clone(), |c| c);

        let waiting = tokio::spawn({
            let job = Arc::clone(&job);
            async move { job.serve(None).await }
        });
        wait_for_queue(&job, 1).await;

        gate.send(Err(BundleError::new(codes::BUNDLE_FAILED, "syntax error"))).unwrap();
        wait_until_idle(&job).await;

        let status = job.status();
        assert!(!status.ready);
        assert_eq!(status.queued, 1);
        assert!(status.last_error.unwrap().contains("syntax error"));
        assert!(!waiting.is_finished());

        // The next trigger retries and the queued request gets the result
        let retry = job.build().unwrap();
        gate.send(ok("fixed")).unwrap();
        assert!(retry.await.unwrap().is_built());
        assert_eq!(waiting.await.unwrap().body(), bytes::Bytes::from_static(b"fixed"));
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_persisted_bundle_served_while_building() {
        let dir = tempdir().unwrap();
        let (backend, gate) = GatedBackend::new();
        let job = job_with(&dir, backend.clone(), |c| c);
        bundlesrv_util::fs::output_file(job.output_path(), b"from disk").unwrap();

        let response = job.serve(None).await;
        assert_eq!(response.body(), bytes::Bytes::from_static(b"from disk"));
        assert_eq!(backend.calls_after_spawn().await, 1);

        gate.send(ok("fresh")).unwrap();
        wait_until_idle(&job).await;
        let response = job.serve(None).await;
        assert_eq!(response.body(), bytes::Bytes::from_static(b"fresh"));
    }

    #[tokio::test]
    async fn test_build_persists_to_static_output() {
        let dir = tempdir().unwrap();
        let (backend, gate) = GatedBackend::new();
        let job = job_with(&dir, backend, |c| c.with_write_to_static(true));

        let handle = job.build().unwrap();
        gate.send(ok("persist me")).unwrap();
        assert!(handle.await.unwrap().is_built());

        assert_eq!(
            std::fs::read_to_string(dir.path().join("public/admin/app.js")).unwrap(),
            "persist me"
        );
    }

    #[tokio::test]
    async fn test_defer_timeout_gives_up() {
        let dir = tempdir().unwrap();
        let (backend, _gate) = GatedBackend::new();
        let job = job_with(&dir, backend, |c| c.with_defer_timeout(Duration::from_millis(20)));

        let response = job.serve(None).await;
        assert_eq!(response, BundleResponse::Unavailable);
    }

    #[tokio::test]
    async fn test_rebuild_replaces_payload() {
        let dir = tempdir().unwrap();
        let (backend, gate) = GatedBackend::new();
        let job = job_with(&dir, backend, |c| c);

        let first = job.build().unwrap();
        gate.send(ok("v1")).unwrap();
        first.await.unwrap();
        assert_eq!(job.serve(None).await.body(), bytes::Bytes::from_static(b"v1"));

        let second = job.rebuild().unwrap();
        gate.send(ok("v2")).unwrap();
        assert!(second.await.unwrap().is_built());

        let response = job.serve(Some(fingerprint(b"v1"))).await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.body(), bytes::Bytes::from_static(b"v2"));
        assert_eq!(job.status().builds, 2);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_payload_and_logs() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let dir = tempdir().unwrap();
        let (backend, gate) = GatedBackend::new();
        let job = job_with(&dir, backend, |c| c);

        let first = job.build().unwrap();
        gate.send(ok("good")).unwrap();
        first.await.unwrap();

        let second = job.rebuild().unwrap();
        gate.send(Err(BundleError::new(codes::BUNDLE_FAILED, "Unexpected token"))).unwrap();
        assert!(!second.await.unwrap().is_built());

        let response = job.serve(None).await;
        assert_eq!(response.body(), bytes::Bytes::from_static(b"good"));
        assert!(job.status().ready);

        let output = logs.contents();
        assert!(output.contains("error building"), "{output}");
        assert!(output.contains("Unexpected token"), "{output}");
        assert!(output.contains("app"), "{output}");
    }

    #[tokio::test]
    async fn test_change_during_build_schedules_one_rebuild() {
        let dir = tempdir().unwrap();
        let (backend, gate) = GatedBackend::new();
        let job = job_with(&dir, backend.clone(), |c| c);

        let first = job.build().unwrap();
        assert!(job.rebuild().is_none());
        assert!(job.rebuild().is_none());

        gate.send(ok("one")).unwrap();
        first.await.unwrap();

        gate.send(ok("two")).unwrap();
        wait_until_idle(&job).await;
        for _ in 0..200 {
            if job.status().builds == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(backend.calls(), 2);
        assert_eq!(job.serve(None).await.body(), bytes::Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn test_watch_mode_starts_watcher_once() {
        let dir = tempdir().unwrap();
        let (backend, gate) = GatedBackend::new();
        let job = job_with(&dir, backend, |c| c.with_dev_mode(true));

        let first = job.build().unwrap();
        gate.send(Err(BundleError::new(codes::BUNDLE_FAILED, "broken"))).unwrap();
        first.await.unwrap();
        assert!(job.status().watching);

        let second = job.build().unwrap();
        gate.send(ok("ok")).unwrap();
        second.await.unwrap();
        assert!(job.status().watching);
    }

    #[tokio::test]
    async fn test_timed_out_requests_leave_the_queue() {
        let dir = tempdir().unwrap();
        let (backend, _gate) = GatedBackend::new();
        let job = job_with(&dir, backend, |c| c.with_defer_timeout(Duration::from_millis(10)));

        for _ in 0..50 {
            assert_eq!(job.serve(None).await, BundleResponse::Unavailable);
        }

        let status = job.status();
        assert_eq!(status.queued, 0);
        assert!(status.building);
    }

    #[tokio::test]
    async fn test_abandoned_requests_pruned_on_enqueue() {
        let dir = tempdir().unwrap();
        let (backend, _gate) = GatedBackend::new();
        let job = job_with(&dir, backend, |c| c);

        let abandoned = tokio::spawn({
            let job = Arc::clone(&job);
            async move { job.serve(None).await }
        });
        wait_for_queue(&job, 1).await;
        abandoned.abort();
        let _ = abandoned.await;

        let waiting = tokio::spawn({
            let job = Arc::clone(&job);
            async move { job.serve(None).await }
        });
        wait_for_queue(&job, 1).await;
        assert_eq!(job.status().queued, 1);
        waiting.abort();
    }

    async fn wait_for_builds(job: &Arc<BundleJob>, builds: u64) {
        for _ in 0..400 {
            let status = job.status();
            if status.builds >= builds && !status.building {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job never reached {builds} builds");
    }

    async fn wait_for_error(job: &Arc<BundleJob>) {
        for _ in 0..400 {
            let status = job.status();
            if status.last_error.is_some() && !status.building {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job never failed");
    }

    #[tokio::test]
    async fn test_change_event_rebuilds_and_replaces_payload() {
        let dir = tempdir().unwrap();
        let (backend, gate) = GatedBackend::new();
        let job = job_with(&dir, backend.clone(), |c| c);

        let first = job.build().unwrap();
        gate.send(ok("v1")).unwrap();
        first.await.unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(watch_loop(Arc::downgrade(&job), rx));

        gate.send(ok("v2")).unwrap();
        tx.send(vec![dir.path().join("client/app.js")]).unwrap();
        tx.send(vec![dir.path().join("client/lib.js")]).unwrap();
        wait_for_builds(&job, 2).await;

        assert_eq!(job.serve(None).await.body(), bytes::Bytes::from_static(b"v2"));
        // Both events fell in one coalescing window
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_change_event_with_failed_rebuild_keeps_payload() {
        let dir = tempdir().unwrap();
        let (backend, gate) = GatedBackend::new();
        let job = job_with(&dir, backend, |c| c);

        let first = job.build().unwrap();
        gate.send(ok("v1")).unwrap();
        first.await.unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(watch_loop(Arc::downgrade(&job), rx));

        gate.send(Err(BundleError::new(codes::BUNDLE_FAILED, "Unexpected token"))).unwrap();
        tx.send(vec![dir.path().join("client/app.js")]).unwrap();
        wait_for_error(&job).await;

        let status = job.status();
        assert!(status.ready);
        assert_eq!(status.builds, 1);
        assert_eq!(job.serve(None).await.body(), bytes::Bytes::from_static(b"v1"));
    }

    #[tokio::test]
    async fn test_watch_loop_ends_with_job() {
        let dir = tempdir().unwrap();
        let (backend, _gate) = GatedBackend::new();
        let job = job_with(&dir, backend, |c| c);

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(watch_loop(Arc::downgrade(&job), rx));
        drop(job);

        tx.send(vec![dir.path().join("client/app.js")]).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_unwritable_output_is_logged_and_build_succeeds() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let dir = tempdir().unwrap();
        let (backend, gate) = GatedBackend::new();
        let job = job_with(&dir, backend, |c| c.with_write_to_static(true));
        // A non-empty directory where the bundle file should go
        let blocked = dir.path().join("public/admin/app.js");
        std::fs::create_dir_all(&blocked).unwrap();
        std::fs::write(blocked.join("keep"), "x").unwrap();

        let build = job.build().unwrap();
        gate.send(ok("code")).unwrap();
        assert!(build.await.unwrap().is_built());
        assert!(job.status().ready);

        let output = logs.contents();
        assert!(output.contains("Some outputs were not written"), "{output}");
        assert!(output.contains("failed=1"), "{output}");
    }
}
