//! Per-entity control hooks multiplexed over the host's single-callback API.
//!
//! The host offers one tick callback per subscription. The registry keeps at
//! most one subscription per entity and fans each tick out to every hook
//! attached to that entity, in attachment order. Subscribing happens on the
//! first attach and unsubscribing on the last detach.
//!
//! A hook that returns an error is logged and counted; the remaining hooks for
//! that entity still run in the same tick. Each tick works on a snapshot of the
//! hook list taken when dispatch starts, so a hook detached by an earlier hook
//! in that tick still runs once more.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bevy_ecs::entity::Entity;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::ambient;
use crate::context::ExecutionContext;
use crate::error::ScriptError;
use crate::lock;

/// Control inputs for one simulated body, mutated by hooks every physics step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlState {
    pub throttle: f32,
    /// Pitch, yaw, roll in `[-1, 1]`.
    pub rotation: Vec3,
    /// Fore/aft, lateral, vertical translation in `[-1, 1]`.
    pub translation: Vec3,
    pub wheel_throttle: f32,
    pub wheel_steer: f32,
    pub brakes: bool,
}

impl ControlState {
    /// Clamps every axis to its valid range.
    pub fn clamp(&mut self) {
        self.throttle = self.throttle.clamp(0.0, 1.0);
        self.rotation = self.rotation.clamp(Vec3::splat(-1.0), Vec3::ONE);
        self.translation = self.translation.clamp(Vec3::splat(-1.0), Vec3::ONE);
        self.wheel_throttle = self.wheel_throttle.clamp(-1.0, 1.0);
        self.wheel_steer = self.wheel_steer.clamp(-1.0, 1.0);
    }
}

/// Callback invoked by the host once per physics step for a subscribed entity.
pub type TickCallback = Arc<dyn Fn(&mut ControlState, f32) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Host side of the per-entity tick notification.
pub trait EntityTickSource: Send + Sync {
    fn subscribe(&self, entity: Entity, callback: TickCallback) -> SubscriptionId;

    /// Returns `false` if the subscription was unknown (e.g. the entity is gone).
    fn unsubscribe(&self, entity: Entity, subscription: SubscriptionId) -> bool;
}

/// Per-tick callback a script attaches to an entity.
pub trait ControlHook: Send + Sync {
    fn label(&self) -> &str {
        "hook"
    }

    fn update(&self, ctx: &dyn ExecutionContext, state: &mut ControlState, dt: f32) -> Result<(), ScriptError>;

    fn as_any(&self) -> &dyn Any;
}

pub type HookRef = Arc<dyn ControlHook>;

type HookList = SmallVec<[HookRef; 4]>;

/// Fan-out target the host calls for one entity.
struct HookFanout {
    entity: Entity,
    owner: Weak<dyn ExecutionContext>,
    hooks: Mutex<HookList>,
    failures: AtomicU64,
}

impl HookFanout {
    fn dispatch(&self, state: &mut ControlState, dt: f32) {
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        let hooks = lock(&self.hooks).clone();
        if hooks.is_empty() {
            return;
        }
        let _ambient = ambient::bind(Arc::clone(&owner));
        for hook in &hooks {
            if let Err(err) = hook.update(owner.as_ref(), state, dt) {
                self.failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("[hooks] {} on {:?} failed: {err}", hook.label(), self.entity);
            }
        }
    }
}

struct HookBinding {
    subscription: SubscriptionId,
    fanout: Arc<HookFanout>,
}

pub struct ControlHookRegistry {
    host: Arc<dyn EntityTickSource>,
    owner: Weak<dyn ExecutionContext>,
    bindings: Mutex<HashMap<Entity, HookBinding>>,
}

impl ControlHookRegistry {
    /// `owner` is bound as the ambient context while hooks run.
    pub fn new(host: Arc<dyn EntityTickSource>, owner: Weak<dyn ExecutionContext>) -> Self {
        Self { host, owner, bindings: Mutex::new(HashMap::new()) }
    }

    /// Attaches `hook` to `entity`. Returns `false` if that exact hook was already attached.
    pub fn attach(&self, entity: Entity, hook: HookRef) -> bool {
        let mut bindings = lock(&self.bindings);
        if let Some(binding) = bindings.get(&entity) {
            let mut hooks = lock(&binding.fanout.hooks);
            if hooks.iter().any(|existing| Arc::ptr_eq(existing, &hook)) {
                return false;
            }
            log::debug!("[hooks] attach {} to {entity:?}", hook.label());
            hooks.push(hook);
            return true;
        }

        log::debug!("[hooks] attach {} to {entity:?}; subscribing entity", hook.label());
        let mut hooks = HookList::new();
        hooks.push(hook);
        let fanout = Arc::new(HookFanout {
            entity,
            owner: self.owner.clone(),
            hooks: Mutex::new(hooks),
            failures: AtomicU64::new(0),
        });
        let target = Arc::clone(&fanout);
        let callback: TickCallback = Arc::new(move |state, dt| target.dispatch(state, dt));
        let subscription = self.host.subscribe(entity, callback);
        bindings.insert(entity, HookBinding { subscription, fanout });
        true
    }

    /// Detaches `hook` from `entity`. Detaching the last hook unsubscribes the entity.
    pub fn detach(&self, entity: Entity, hook: &HookRef) -> bool {
        let mut bindings = lock(&self.bindings);
        let Some(binding) = bindings.get(&entity) else {
            return false;
        };
        let now_empty = {
            let mut hooks = lock(&binding.fanout.hooks);
            let Some(index) = hooks.iter().position(|existing| Arc::ptr_eq(existing, hook)) else {
                return false;
            };
            hooks.remove(index);
            hooks.is_empty()
        };
        log::debug!("[hooks] detach {} from {entity:?}", hook.label());
        if now_empty {
            if let Some(binding) = bindings.remove(&entity) {
                self.release(entity, binding);
            }
        }
        true
    }

    /// Drops every hook on `entity` and its subscription.
    pub fn detach_all(&self, entity: Entity) -> bool {
        let binding = lock(&self.bindings).remove(&entity);
        match binding {
            Some(binding) => {
                self.release(entity, binding);
                true
            }
            None => false,
        }
    }

    /// Unsubscribes every bound entity and forgets all hooks.
    pub fn clear(&self) {
        let drained: Vec<(Entity, HookBinding)> = lock(&self.bindings).drain().collect();
        for (entity, binding) in drained {
            self.release(entity, binding);
        }
    }

    /// First hook on `entity` whose concrete type is `T`.
    pub fn find_hook<T: ControlHook + 'static>(&self, entity: Entity) -> Option<HookRef> {
        let bindings = lock(&self.bindings);
        let binding = bindings.get(&entity)?;
        let hooks = lock(&binding.fanout.hooks);
        hooks.iter().find(|hook| hook.as_any().is::<T>()).cloned()
    }

    pub fn hooks(&self, entity: Entity) -> Vec<HookRef> {
        lock(&self.bindings)
            .get(&entity)
            .map(|binding| lock(&binding.fanout.hooks).iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_bound(&self, entity: Entity) -> bool {
        lock(&self.bindings).contains_key(&entity)
    }

    pub fn bound_entities(&self) -> Vec<Entity> {
        let mut entities: Vec<Entity> = lock(&self.bindings).keys().copied().collect();
        entities.sort();
        entities
    }

    pub fn failure_count(&self, entity: Entity) -> u64 {
        lock(&self.bindings)
            .get(&entity)
            .map(|binding| binding.fanout.failures.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        lock(&self.bindings).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.bindings).is_empty()
    }

    fn release(&self, entity: Entity, binding: HookBinding) {
        log::debug!("[hooks] unsubscribing {entity:?}");
        lock(&binding.fanout.hooks).clear();
        if !self.host.unsubscribe(entity, binding.subscription) {
            log::debug!("[hooks] host no longer tracks {entity:?}");
        }
    }
}

impl fmt::Debug for ControlHookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlHookRegistry").field("bound_entities", &self.bound_entities()).finish()
    }
}
