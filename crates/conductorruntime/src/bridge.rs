//! Request/response execution across a process boundary.
//!
//! [`ExecutionBridge`] is the calling side: it emits `Execute` events on its
//! bus and correlates the `Result`/`Error` events that come back by execution
//! id. [`BridgeWorker`] is the remote side. Moving events between the two
//! buses is the job of the IPC forwarder in `conductorcore::ipc`.

use crate::runtime::ConductorRuntime;
use conductorcore::{
    ConductorError, ConductorEvent, EventBus, ExecutionErrorEvent, ExecutionId, ExecutionRequest,
    ExecutionResult, ExecutionResultEvent, NodeDefinition, Params, ProgressEvent,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type Settlement = Result<ExecutionResult, ConductorError>;

struct PendingExecution {
    sender: oneshot::Sender<Settlement>,
    timer: JoinHandle<()>,
}

type PendingMap = Arc<Mutex<HashMap<ExecutionId, PendingExecution>>>;

pub type ProgressHandler = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

type ProgressHandlers = Arc<Mutex<HashMap<u64, ProgressHandler>>>;

/// Identifies a handler registered with [`ExecutionBridge::on_progress`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgressSubscription(u64);

/// Settles with the remote result, the remote error, or a timeout,
/// whichever comes first.
pub struct ExecutionHandle {
    id: ExecutionId,
    receiver: oneshot::Receiver<Settlement>,
}

impl ExecutionHandle {
    pub fn id(&self) -> &ExecutionId {
        &self.id
    }
}

impl Future for ExecutionHandle {
    type Output = Settlement;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(settlement)) => Poll::Ready(settlement),
            // Sender dropped without settling: the bridge went away
            Poll::Ready(Err(_)) => Poll::Ready(Err(ConductorError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub struct ExecutionBridge {
    bus: EventBus,
    default_timeout: Duration,
    pending: PendingMap,
    progress_handlers: ProgressHandlers,
    next_subscription: AtomicU64,
    listener: JoinHandle<()>,
}

impl ExecutionBridge {
    /// Must be called inside a tokio runtime; the bus listener starts
    /// immediately so no response can slip past it.
    pub fn new(bus: EventBus, default_timeout: Duration) -> Self {
        let pending: PendingMap = Arc::default();
        let progress_handlers: ProgressHandlers = Arc::default();
        let listener = tokio::spawn(listen(
            bus.subscribe(),
            pending.clone(),
            progress_handlers.clone(),
        ));

        Self {
            bus,
            default_timeout,
            pending,
            progress_handlers,
            next_subscription: AtomicU64::new(1),
            listener,
        }
    }

    /// Execute `definition` remotely under a fresh execution id
    pub fn execute(&self, definition: NodeDefinition, inputs: Params) -> Result<ExecutionHandle, ConductorError> {
        self.execute_request(ExecutionRequest::new(definition, inputs))
    }

    /// Send a prepared request. Validation failures are returned here,
    /// before anything is emitted.
    pub fn execute_request(&self, request: ExecutionRequest) -> Result<ExecutionHandle, ConductorError> {
        request.validate()?;

        let id = request.id.clone();
        let budget = request
            .options
            .timeout
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);
        let (sender, receiver) = oneshot::channel();

        {
            let mut pending = self.pending.lock();
            if pending.contains_key(&id) {
                return Err(ConductorError::Validation(format!(
                    "execution {} is already pending",
                    id
                )));
            }
            let timer = tokio::spawn(expire(self.pending.clone(), id.clone(), budget));
            pending.insert(id.clone(), PendingExecution { sender, timer });
        }

        tracing::debug!(
            execution_id = %id,
            node_id = %request.node_id,
            timeout_ms = budget.as_millis() as u64,
            "Dispatching execution"
        );
        self.bus.emit(ConductorEvent::Execute(request));

        Ok(ExecutionHandle { id, receiver })
    }

    /// Receive every progress event, for every execution
    pub fn on_progress(&self, handler: impl Fn(&ProgressEvent) + Send + Sync + 'static) -> ProgressSubscription {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.progress_handlers.lock().insert(id, Arc::new(handler));
        ProgressSubscription(id)
    }

    pub fn off_progress(&self, subscription: ProgressSubscription) -> bool {
        self.progress_handlers.lock().remove(&subscription.0).is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, id: &ExecutionId) -> bool {
        self.pending.lock().contains_key(id)
    }
}

impl Drop for ExecutionBridge {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Remove and settle a pending entry. Later settlements for the same id
/// find nothing and are dropped.
fn settle(pending: &PendingMap, id: &ExecutionId, settlement: Settlement) -> bool {
    let Some(entry) = pending.lock().remove(id) else {
        return false;
    };
    entry.timer.abort();
    if entry.sender.send(settlement).is_err() {
        tracing::debug!(execution_id = %id, "Caller stopped waiting before settlement");
    }
    true
}

async fn expire(pending: PendingMap, id: ExecutionId, budget: Duration) {
    tokio::time::sleep(budget).await;
    let Some(entry) = pending.lock().remove(&id) else {
        return;
    };
    let millis = budget.as_millis() as u64;
    tracing::warn!(execution_id = %id, timeout_ms = millis, "Execution timed out waiting for a response");
    let _ = entry.sender.send(Err(ConductorError::Timeout { millis }));
}

async fn listen(
    mut events: broadcast::Receiver<ConductorEvent>,
    pending: PendingMap,
    progress_handlers: ProgressHandlers,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Bridge listener lagged behind the event bus");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            ConductorEvent::Result(ExecutionResultEvent { execution_id, result }) => {
                if !settle(&pending, &execution_id, Ok(result)) {
                    tracing::warn!(execution_id = %execution_id, "Result for unknown execution");
                }
            }
            ConductorEvent::Error(ExecutionErrorEvent {
                execution_id,
                message,
                code,
            }) => {
                if !settle(&pending, &execution_id, Err(ConductorError::Remote { code, message })) {
                    tracing::warn!(execution_id = %execution_id, "Error for unknown execution");
                }
            }
            ConductorEvent::Progress(progress) => {
                let handlers: Vec<ProgressHandler> = progress_handlers.lock().values().cloned().collect();
                for handler in handlers {
                    handler(&progress);
                }
            }
            ConductorEvent::Execute(_) => {}
        }
    }
}

/// Serves `Execute` events from a bus by running them on a local runtime
pub struct BridgeWorker {
    runtime: Arc<ConductorRuntime>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeWorker {
    pub fn new(runtime: Arc<ConductorRuntime>) -> Self {
        Self {
            runtime,
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Start serving; a second call is a no-op. A stopped worker stays stopped.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        if self.shutdown.is_cancelled() {
            tracing::warn!("Bridge worker was stopped and cannot be restarted");
            return;
        }
        let events = self.runtime.event_bus().subscribe();
        *task = Some(tokio::spawn(serve(
            self.runtime.clone(),
            events,
            self.shutdown.clone(),
        )));
        tracing::info!("Bridge worker started");
    }

    /// Stop accepting requests and cancel the ones in flight. Also wakes
    /// `stopped()` on a worker that never started.
    pub fn stop(&self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.lock().take() {
            task.abort();
            tracing::info!("Bridge worker stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Wait until `stop` is called
    pub async fn stopped(&self) {
        self.shutdown.cancelled().await;
    }
}

impl Drop for BridgeWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve(
    runtime: Arc<ConductorRuntime>,
    mut events: broadcast::Receiver<ConductorEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(ConductorEvent::Execute(request)) => {
                tokio::spawn(handle_request(runtime.clone(), request, shutdown.child_token()));
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Bridge worker lagged behind the event bus");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn handle_request(runtime: Arc<ConductorRuntime>, request: ExecutionRequest, cancellation: CancellationToken) {
    let bus = runtime.event_bus().clone();
    let execution_id = request.id.clone();

    let event = match run_request(&runtime, request, &cancellation).await {
        Ok(result) => ConductorEvent::Result(ExecutionResultEvent {
            execution_id: execution_id.clone(),
            result,
        }),
        Err(e) => {
            tracing::error!(execution_id = %execution_id, "Execution request failed: {}", e);
            ConductorEvent::Error(ExecutionErrorEvent::from_error(execution_id.clone(), &e))
        }
    };
    bus.emit(event);
}

async fn run_request(
    runtime: &ConductorRuntime,
    request: ExecutionRequest,
    cancellation: &CancellationToken,
) -> Result<ExecutionResult, ConductorError> {
    request.validate()?;

    let ExecutionRequest {
        id,
        definition,
        inputs,
        options,
        ..
    } = request;
    let run = runtime.execute_with(&definition, inputs, &runtime.config().execution, id, cancellation);

    let outcome = match options.timeout {
        Some(millis) => match tokio::time::timeout(Duration::from_millis(millis), run).await {
            Ok(outcome) => outcome?,
            Err(_) => {
                cancellation.cancel();
                return Err(ConductorError::Timeout { millis });
            }
        },
        None => run.await?,
    };

    if cancellation.is_cancelled() {
        return Err(ConductorError::Cancelled);
    }
    Ok(outcome.result)
}
