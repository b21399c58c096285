use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kestrel_script_runtime::ambient;
use kestrel_script_runtime::hooks::{SubscriptionId, TickCallback};
use kestrel_script_runtime::markers::{Marker, MarkerRef};
use kestrel_script_runtime::transfers::{ResourceTransfer, TransferRef};
use kestrel_script_runtime::{
    CancellationToken, ConsoleBuffer, ControlHook, ControlState, Entity, EntityTickSource, ExecutionContext,
    ForegroundContext, ScriptError, TimeSeriesCollection,
};

#[derive(Default)]
struct CountingHost {
    next: AtomicUsize,
    unsubscribed: Mutex<Vec<Entity>>,
}

impl EntityTickSource for CountingHost {
    fn subscribe(&self, _entity: Entity, _callback: TickCallback) -> SubscriptionId {
        SubscriptionId(self.next.fetch_add(1, Ordering::SeqCst) as u64)
    }

    fn unsubscribe(&self, entity: Entity, _subscription: SubscriptionId) -> bool {
        self.unsubscribed.lock().unwrap().push(entity);
        true
    }
}

struct Beacon {
    visible: AtomicBool,
    updates: AtomicUsize,
    ambient_seen: AtomicUsize,
}

impl Beacon {
    fn new() -> Arc<Self> {
        Arc::new(Self { visible: AtomicBool::new(true), updates: AtomicUsize::new(0), ambient_seen: AtomicUsize::new(0) })
    }
}

impl Marker for Beacon {
    fn visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }

    fn on_update(&self) {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if ambient::is_bound() {
            self.ambient_seen.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Default)]
struct Pump {
    cleared: AtomicUsize,
}

impl ResourceTransfer for Pump {
    fn clear(&self) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.cleared.load(Ordering::SeqCst) == 0
    }
}

struct Idle;

impl ControlHook for Idle {
    fn update(&self, _ctx: &dyn ExecutionContext, _state: &mut ControlState, _dt: f32) -> Result<(), ScriptError> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn context(host: Arc<CountingHost>) -> Arc<ForegroundContext> {
    ForegroundContext::with_budget(
        Duration::from_millis(100),
        100,
        host,
        ConsoleBuffer::default(),
        TimeSeriesCollection::new(),
    )
}

#[test]
fn cleanup_hides_markers_clears_transfers_and_unsubscribes_each_entity_once() {
    let host = Arc::new(CountingHost::default());
    let ctx = context(host.clone());

    let beacons: Vec<Arc<Beacon>> = (0..4).map(|_| Beacon::new()).collect();
    for beacon in &beacons {
        ctx.add_marker(beacon.clone());
    }
    let pumps: Vec<Arc<Pump>> = (0..3).map(|_| Arc::new(Pump::default())).collect();
    for pump in &pumps {
        ctx.add_resource_transfer(pump.clone());
    }
    let entities = [Entity::from_raw(1), Entity::from_raw(2)];
    for entity in entities {
        ctx.hook(entity, Arc::new(Idle));
        ctx.hook(entity, Arc::new(Idle));
    }
    let worker = ctx.spawn_background(CancellationToken::new());

    ctx.cleanup();

    assert!(beacons.iter().all(|beacon| !beacon.visible()));
    assert!(pumps.iter().all(|pump| pump.cleared.load(Ordering::SeqCst) == 1));
    let mut unsubscribed = host.unsubscribed.lock().unwrap().clone();
    unsubscribed.sort();
    assert_eq!(unsubscribed, entities.to_vec());
    assert!(worker.is_cancelled());
    assert_eq!(ctx.marker_count(), 0);
    assert_eq!(ctx.resource_transfer_count(), 0);
    assert!(ctx.hooks().is_empty());
}

#[test]
fn cleanup_twice_is_safe() {
    let host = Arc::new(CountingHost::default());
    let ctx = context(host.clone());
    let pump = Arc::new(Pump::default());
    ctx.add_resource_transfer(pump.clone());
    ctx.hook(Entity::from_raw(5), Arc::new(Idle));

    ctx.cleanup();
    ctx.cleanup();

    assert_eq!(pump.cleared.load(Ordering::SeqCst), 1);
    assert_eq!(host.unsubscribed.lock().unwrap().len(), 1);
}

#[test]
fn removing_a_marker_hides_it() {
    let host = Arc::new(CountingHost::default());
    let ctx = context(host);
    let beacon = Beacon::new();
    let marker: MarkerRef = beacon.clone();
    ctx.add_marker(marker.clone());

    assert!(ctx.remove_marker(&marker));
    assert!(!beacon.visible());
    assert!(!ctx.remove_marker(&marker));
    assert_eq!(ctx.marker_count(), 0);
}

#[test]
fn marker_update_runs_with_context_bound() {
    let host = Arc::new(CountingHost::default());
    let ctx = context(host);
    let first = Beacon::new();
    let second = Beacon::new();
    ctx.add_marker(first.clone());
    ctx.add_marker(second.clone());

    ctx.trigger_marker_update();
    ctx.trigger_marker_render();

    for beacon in [&first, &second] {
        assert_eq!(beacon.updates.load(Ordering::SeqCst), 1);
        assert_eq!(beacon.ambient_seen.load(Ordering::SeqCst), 1);
    }
    assert!(!ambient::is_bound());
}

#[test]
fn dropping_the_context_runs_cleanup() {
    let host = Arc::new(CountingHost::default());
    let pump = Arc::new(Pump::default());
    let transfer: TransferRef = pump.clone();
    {
        let ctx = context(host.clone());
        ctx.add_resource_transfer(transfer);
        ctx.hook(Entity::from_raw(9), Arc::new(Idle));
    }
    assert_eq!(pump.cleared.load(Ordering::SeqCst), 1);
    assert!(!pump.is_running());
    assert_eq!(host.unsubscribed.lock().unwrap().len(), 1);
}
