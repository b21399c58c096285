//! ECS-backed host that owns the controllable bodies and their tick callbacks.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use bevy_ecs::prelude::{Component, Entity, World};

use crate::hooks::{ControlState, EntityTickSource, SubscriptionId, TickCallback};
use crate::lock;

#[derive(Component, Clone, Copy, Debug, Default)]
pub struct ControlledBody {
    pub state: ControlState,
}

#[derive(Component, Clone, Debug)]
pub struct BodyName(pub String);

pub struct EcsTickHost {
    world: Mutex<World>,
    subscriptions: Mutex<BTreeMap<Entity, Vec<(SubscriptionId, TickCallback)>>>,
    next_id: AtomicU64,
}

impl EcsTickHost {
    pub fn new() -> Self {
        Self { world: Mutex::new(World::new()), subscriptions: Mutex::new(BTreeMap::new()), next_id: AtomicU64::new(1) }
    }

    pub fn spawn_body(&self, name: impl Into<String>) -> Entity {
        lock(&self.world).spawn((ControlledBody::default(), BodyName(name.into()))).id()
    }

    /// Removes the body; its subscriptions go with it.
    pub fn despawn(&self, entity: Entity) -> bool {
        let removed = lock(&self.world).despawn(entity);
        if lock(&self.subscriptions).remove(&entity).is_some() {
            log::debug!("[host] dropped subscriptions of despawned {entity:?}");
        }
        removed
    }

    pub fn state(&self, entity: Entity) -> Option<ControlState> {
        lock(&self.world).get::<ControlledBody>(entity).map(|body| body.state)
    }

    pub fn name(&self, entity: Entity) -> Option<String> {
        lock(&self.world).get::<BodyName>(entity).map(|name| name.0.clone())
    }

    pub fn set_state(&self, entity: Entity, state: ControlState) -> bool {
        match lock(&self.world).get_mut::<ControlledBody>(entity) {
            Some(mut body) => {
                body.state = state;
                true
            }
            None => false,
        }
    }

    /// Runs every callback subscribed to `entity` against its control state.
    ///
    /// Callbacks run without any host lock held, so they may subscribe or
    /// unsubscribe. Returns the number of callbacks invoked.
    pub fn fire_tick(&self, entity: Entity, dt: f32) -> usize {
        let callbacks: Vec<TickCallback> = match lock(&self.subscriptions).get(&entity) {
            Some(entries) => entries.iter().map(|(_, callback)| callback.clone()).collect(),
            None => return 0,
        };
        let Some(mut state) = self.state(entity) else {
            return 0;
        };
        for callback in &callbacks {
            callback(&mut state, dt);
        }
        state.clamp();
        self.set_state(entity, state);
        callbacks.len()
    }

    /// One physics step: fires the callbacks of every subscribed entity in entity order.
    pub fn step(&self, dt: f32) -> usize {
        let entities: Vec<Entity> = lock(&self.subscriptions).keys().copied().collect();
        entities.into_iter().map(|entity| self.fire_tick(entity, dt)).sum()
    }

    pub fn subscription_count(&self, entity: Entity) -> usize {
        lock(&self.subscriptions).get(&entity).map(Vec::len).unwrap_or(0)
    }

    pub fn body_count(&self) -> usize {
        let mut world = lock(&self.world);
        let mut query = world.query::<&ControlledBody>();
        query.iter(&world).count()
    }
}

impl Default for EcsTickHost {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityTickSource for EcsTickHost {
    fn subscribe(&self, entity: Entity, callback: TickCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.subscriptions).entry(entity).or_default().push((id, callback));
        id
    }

    fn unsubscribe(&self, entity: Entity, subscription: SubscriptionId) -> bool {
        let mut subscriptions = lock(&self.subscriptions);
        let Some(entries) = subscriptions.get_mut(&entity) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(id, _)| *id != subscription);
        let removed = entries.len() != before;
        if entries.is_empty() {
            subscriptions.remove(&entity);
        }
        removed
    }
}
