//! Compile queue
//!
//! Sources are transformed one at a time, in submission order. The transform
//! itself runs on tokio's blocking pool; everything else (the job list, the
//! settle callbacks) stays on the local thread, so the queue has to be used
//! from inside a [`tokio::task::LocalSet`].
//!
//! ```text
//! submit ──► jobs ──► pump (spawn_local) ──► transform (spawn_blocking)
//!                          │                                  │
//!                          └──── settle callback ◄────────────┘
//! ```
//!
//! A job counts as finished only after its callback returned, and the queue
//! reports idle only once no jobs are left, so a [`CompileQueue::wait_for_compiled`]
//! started while draining also covers jobs queued by earlier callbacks.
//!
//! Each transition to idle bumps an epoch. Waiters compare epochs rather than
//! the idle flag, so an idle moment ended by an immediate `submit` still
//! releases them.

mod jsx;
mod state;

pub use jsx::JsxTransformer;
pub use state::CompiledState;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;

use tokio::sync::{oneshot, watch};
use tracing::debug;

use crate::config::JsxOptions;
use crate::error::CompileError;

/// Source-to-source transform applied to every submitted snippet
///
/// Must be a pure function of its input.
pub trait Transformer: Send + Sync + 'static {
    fn transform(&self, source: &str) -> Result<String, CompileError>;
}

impl<F> Transformer for F
where
    F: Fn(&str) -> Result<String, CompileError> + Send + Sync + 'static,
{
    fn transform(&self, source: &str) -> Result<String, CompileError> {
        self(source)
    }
}

/// Wrap a cell's expression into a named function declaration
///
/// The newline before `)` keeps a trailing line comment in `code` from
/// swallowing the rest of the wrapper.
pub fn wrap_cell(id: &str, code: &str) -> String {
    format!("function {}() {{ return (() => {}\n)(); }}", id, code)
}

type Settle = Box<dyn FnOnce(Result<String, CompileError>)>;

struct Job {
    id: u64,
    source: String,
    settle: Settle,
}

struct QueueInner {
    transformer: Arc<dyn Transformer>,
    jobs: RefCell<VecDeque<Job>>,
    running: Cell<bool>,
    next_id: Cell<u64>,
    idle: Cell<bool>,
    idle_epoch: watch::Sender<u64>,
}

/// FIFO compile queue. Cheap to clone; clones share the queue.
#[derive(Clone)]
pub struct CompileQueue(Rc<QueueInner>);

impl CompileQueue {
    /// Queue using the JSX transform
    pub fn new(options: &JsxOptions) -> Self {
        Self::with_transformer(JsxTransformer::new(options.clone()))
    }

    pub fn with_transformer(transformer: impl Transformer) -> Self {
        let (idle_epoch, _) = watch::channel(0);
        CompileQueue(Rc::new(QueueInner {
            transformer: Arc::new(transformer),
            jobs: RefCell::new(VecDeque::new()),
            running: Cell::new(false),
            next_id: Cell::new(1),
            idle: Cell::new(true),
            idle_epoch,
        }))
    }

    /// Enqueue `source`; `on_settled` runs on this thread with the result
    ///
    /// Must be called inside a `LocalSet`.
    pub fn submit(
        &self,
        source: impl Into<String>,
        on_settled: impl FnOnce(Result<String, CompileError>) + 'static,
    ) -> u64 {
        let id = self.0.next_id.get();
        self.0.next_id.set(id + 1);
        self.0.jobs.borrow_mut().push_back(Job {
            id,
            source: source.into(),
            settle: Box::new(on_settled),
        });
        self.0.idle.set(false);
        debug!(job = id, pending = self.pending(), "compile job queued");

        if !self.0.running.replace(true) {
            tokio::task::spawn_local(pump(self.0.clone()));
        }
        id
    }

    /// Enqueue `source` and wait for its result
    pub fn compile(&self, source: impl Into<String>) -> impl Future<Output = Result<String, CompileError>> {
        let (tx, rx) = oneshot::channel();
        self.submit(source, move |result| {
            let _ = tx.send(result);
        });
        async move { rx.await.unwrap_or(Err(CompileError::Cancelled)) }
    }

    /// Resolve once the queue has been idle at some point since the call
    pub async fn wait_for_compiled(&self) {
        let mut epochs = self.0.idle_epoch.subscribe();
        let start = *epochs.borrow_and_update();
        if self.is_idle() {
            return;
        }
        // The sender lives as long as `self`, so this cannot fail.
        let _ = epochs.wait_for(|epoch| *epoch != start).await;
    }

    pub fn is_idle(&self) -> bool {
        self.0.idle.get()
    }

    /// Number of times the queue has drained
    pub fn idle_epoch(&self) -> u64 {
        *self.0.idle_epoch.borrow()
    }

    /// Jobs waiting to start (excluding the running one)
    pub fn pending(&self) -> usize {
        self.0.jobs.borrow().len()
    }
}

impl std::fmt::Debug for CompileQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompileQueue")
            .field("pending", &self.pending())
            .field("running", &self.0.running.get())
            .finish()
    }
}

async fn pump(inner: Rc<QueueInner>) {
    loop {
        let next = inner.jobs.borrow_mut().pop_front();
        let Some(Job { id, source, settle }) = next else {
            break;
        };

        let transformer = inner.transformer.clone();
        let result = match tokio::task::spawn_blocking(move || transformer.transform(&source)).await {
            Ok(result) => result,
            Err(join_error) => Err(CompileError::Internal(join_error.to_string())),
        };
        match &result {
            Ok(compiled) => debug!(job = id, len = compiled.len(), "compile job settled"),
            Err(error) => debug!(job = id, %error, "compile job failed"),
        }
        settle(result);
    }
    inner.running.set(false);
    inner.idle.set(true);
    inner.idle_epoch.send_modify(|epoch| *epoch += 1);
}
