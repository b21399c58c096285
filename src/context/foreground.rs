use std::mem;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bevy_ecs::entity::Entity;

use crate::ambient;
use crate::call_depth::CallDepthGuard;
use crate::cancel::CancellationToken;
use crate::config::ContextConfig;
use crate::console::ConsoleBuffer;
use crate::context::{BackgroundContext, ContextHandle, ContextId, ExecutionContext, YieldRequest};
use crate::error::ScriptError;
use crate::hooks::{ControlHook, ControlHookRegistry, EntityTickSource, HookRef};
use crate::lock;
use crate::markers::{MarkerRef, MarkerSet};
use crate::telemetry::TimeSeriesCollection;
use crate::time::TickBudget;
use crate::transfers::{TransferRef, TransferSet};

/// Context bound to the host's per-tick callback.
///
/// Created behind an `Arc` so hook dispatch and marker triggers can bind it as
/// the ambient context. Dropping the last handle runs [`ExecutionContext::cleanup`].
pub struct ForegroundContext {
    id: ContextId,
    me: Weak<ForegroundContext>,
    budget: Mutex<TickBudget>,
    depth: CallDepthGuard,
    next_yield: Mutex<YieldRequest>,
    console: ConsoleBuffer,
    telemetry: TimeSeriesCollection,
    markers: Mutex<MarkerSet>,
    transfers: Mutex<TransferSet>,
    hooks: ControlHookRegistry,
    children: Mutex<Vec<Arc<BackgroundContext>>>,
}

impl ForegroundContext {
    pub fn new(
        config: &ContextConfig,
        host: Arc<dyn EntityTickSource>,
        console: ConsoleBuffer,
        telemetry: TimeSeriesCollection,
    ) -> Arc<Self> {
        Self::with_budget(config.tick_budget(), config.max_call_depth, host, console, telemetry)
    }

    pub fn with_budget(
        budget: Duration,
        max_call_depth: usize,
        host: Arc<dyn EntityTickSource>,
        console: ConsoleBuffer,
        telemetry: TimeSeriesCollection,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<ForegroundContext>| {
            let owner: Weak<dyn ExecutionContext> = me.clone();
            Self {
                id: ContextId::new(),
                me: me.clone(),
                budget: Mutex::new(TickBudget::new(budget)),
                depth: CallDepthGuard::new(max_call_depth),
                next_yield: Mutex::new(YieldRequest::NextTick),
                console,
                telemetry,
                markers: Mutex::new(MarkerSet::new()),
                transfers: Mutex::new(TransferSet::new()),
                hooks: ControlHookRegistry::new(host, owner),
                children: Mutex::new(Vec::new()),
            }
        })
    }

    pub fn handle(&self) -> Option<ContextHandle> {
        self.me.upgrade().map(|me| me as ContextHandle)
    }

    pub fn budget(&self) -> Duration {
        lock(&self.budget).budget()
    }

    pub fn elapsed(&self) -> Duration {
        lock(&self.budget).elapsed()
    }

    /// Returns the pending resume request and resets it to [`YieldRequest::NextTick`].
    pub fn take_next_yield(&self) -> YieldRequest {
        mem::take(&mut *lock(&self.next_yield))
    }

    pub fn set_next_yield(&self, request: YieldRequest) {
        *lock(&self.next_yield) = request;
    }

    /// Arms a callback fired exactly once by the next [`ExecutionContext::reset_budget`].
    pub fn on_next_yield_once(&self, callback: impl FnOnce() + Send + 'static) {
        lock(&self.budget).arm_once(Box::new(callback));
    }

    pub fn has_pending_once(&self) -> bool {
        lock(&self.budget).has_pending()
    }

    pub fn hooks(&self) -> &ControlHookRegistry {
        &self.hooks
    }

    pub fn hook(&self, entity: Entity, hook: HookRef) -> bool {
        self.hooks.attach(entity, hook)
    }

    pub fn unhook(&self, entity: Entity, hook: &HookRef) -> bool {
        self.hooks.detach(entity, hook)
    }

    pub fn unhook_all(&self, entity: Entity) -> bool {
        self.hooks.detach_all(entity)
    }

    pub fn find_hook<T: ControlHook + 'static>(&self, entity: Entity) -> Option<HookRef> {
        self.hooks.find_hook::<T>(entity)
    }

    pub fn add_marker(&self, marker: MarkerRef) {
        lock(&self.markers).add(marker);
    }

    pub fn remove_marker(&self, marker: &MarkerRef) -> bool {
        lock(&self.markers).remove(marker)
    }

    pub fn clear_markers(&self) {
        lock(&self.markers).clear();
    }

    pub fn marker_count(&self) -> usize {
        lock(&self.markers).len()
    }

    pub fn trigger_marker_update(&self) {
        self.for_each_marker(|marker| marker.on_update());
    }

    pub fn trigger_marker_render(&self) {
        self.for_each_marker(|marker| marker.on_render());
    }

    pub fn add_resource_transfer(&self, transfer: TransferRef) {
        lock(&self.transfers).add(transfer);
    }

    pub fn resource_transfer_count(&self) -> usize {
        lock(&self.transfers).len()
    }

    pub fn children(&self) -> Vec<Arc<BackgroundContext>> {
        lock(&self.children).clone()
    }

    fn for_each_marker(&self, f: impl Fn(&MarkerRef)) {
        let markers = lock(&self.markers).snapshot();
        if markers.is_empty() {
            return;
        }
        let _ambient = self.handle().map(ambient::bind);
        for marker in &markers {
            f(marker);
        }
    }
}

impl ExecutionContext for ForegroundContext {
    fn id(&self) -> ContextId {
        self.id
    }

    fn is_background(&self) -> bool {
        false
    }

    fn check_budget(&self) -> Result<(), ScriptError> {
        lock(&self.budget).check()
    }

    fn reset_budget(&self) {
        // Run the one-shot outside the lock; it may touch this context.
        let pending = lock(&self.budget).take_pending();
        if let Some(callback) = pending {
            callback();
        }
        lock(&self.budget).restart();
    }

    fn depth_guard(&self) -> &CallDepthGuard {
        &self.depth
    }

    fn spawn_background(&self, token: CancellationToken) -> Arc<BackgroundContext> {
        let child = BackgroundContext::new(token, self.console.clone(), self.depth.max_depth());
        lock(&self.children).push(Arc::clone(&child));
        log::debug!("[context:{}] spawned background child {}", self.id, child.id());
        child
    }

    fn cleanup(&self) {
        lock(&self.markers).clear();
        self.hooks.clear();
        lock(&self.transfers).clear_all();
        let children = mem::take(&mut *lock(&self.children));
        for child in children {
            child.cleanup();
        }
    }

    fn console(&self) -> &ConsoleBuffer {
        &self.console
    }

    fn telemetry(&self) -> Option<&TimeSeriesCollection> {
        Some(&self.telemetry)
    }
}

impl Drop for ForegroundContext {
    fn drop(&mut self) {
        self.cleanup();
    }
}
