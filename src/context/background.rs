use std::io;
use std::mem;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::ambient;
use crate::call_depth::CallDepthGuard;
use crate::cancel::CancellationToken;
use crate::console::ConsoleBuffer;
use crate::context::{ContextId, ExecutionContext};
use crate::error::ScriptError;
use crate::lock;

/// Context for script work that runs detached from the host tick.
///
/// It has no time budget: `check_budget` only fails once the token is
/// cancelled, and the work is expected to run to completion or cancellation.
pub struct BackgroundContext {
    id: ContextId,
    token: CancellationToken,
    console: ConsoleBuffer,
    depth: CallDepthGuard,
    children: Mutex<Vec<Arc<BackgroundContext>>>,
}

impl BackgroundContext {
    pub fn new(token: CancellationToken, console: ConsoleBuffer, max_call_depth: usize) -> Arc<Self> {
        Arc::new(Self {
            id: ContextId::new(),
            token,
            console,
            depth: CallDepthGuard::new(max_call_depth),
            children: Mutex::new(Vec::new()),
        })
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancels this context and every descendant. Same as [`ExecutionContext::cleanup`].
    pub fn cancel(&self) {
        self.cleanup();
    }

    /// Spawns a child whose token also trips when this context's token does.
    pub fn spawn_linked(&self) -> Arc<BackgroundContext> {
        self.spawn_background(self.token.child())
    }

    pub fn children(&self) -> Vec<Arc<BackgroundContext>> {
        lock(&self.children).clone()
    }

    /// Runs `work` on a dedicated named thread with this context bound as ambient.
    pub fn run_detached<T, F>(self: &Arc<Self>, name: &str, work: F) -> io::Result<JoinHandle<Result<T, ScriptError>>>
    where
        T: Send + 'static,
        F: FnOnce(&BackgroundContext) -> Result<T, ScriptError> + Send + 'static,
    {
        let context = Arc::clone(self);
        thread::Builder::new().name(format!("script-bg-{name}")).spawn(move || {
            let _ambient = ambient::bind(context.clone());
            context.token.check()?;
            work(&context)
        })
    }
}

impl ExecutionContext for BackgroundContext {
    fn id(&self) -> ContextId {
        self.id
    }

    fn is_background(&self) -> bool {
        true
    }

    fn check_budget(&self) -> Result<(), ScriptError> {
        self.token.check()
    }

    fn reset_budget(&self) {}

    fn depth_guard(&self) -> &CallDepthGuard {
        &self.depth
    }

    fn spawn_background(&self, token: CancellationToken) -> Arc<BackgroundContext> {
        let child = BackgroundContext::new(token, self.console.clone(), self.depth.max_depth());
        lock(&self.children).push(Arc::clone(&child));
        log::debug!("[context:{}] spawned background child {}", self.id, child.id);
        child
    }

    fn cleanup(&self) {
        self.token.cancel();
        let children = mem::take(&mut *lock(&self.children));
        for child in children {
            child.cleanup();
        }
    }

    fn console(&self) -> &ConsoleBuffer {
        &self.console
    }
}
