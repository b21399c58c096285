use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::Poll;

use kestrel_script_runtime::config::ContextConfig;
use kestrel_script_runtime::eval::{EvalOutcome, PendingValue, ProgramItem, Ready};
use kestrel_script_runtime::{
    ambient, ConsoleBuffer, EcsTickHost, ExecutionContext, ForegroundContext, OneShotEvaluator, ScriptError,
    TimeSeriesCollection,
};
use rhai::Dynamic;

/// Item that resolves to `value` on its `polls`-th poll.
struct Delayed {
    polls: usize,
    value: i64,
    declaration: bool,
    started: Arc<AtomicUsize>,
}

struct DelayedValue {
    remaining: usize,
    value: i64,
}

impl PendingValue for DelayedValue {
    fn poll_value(&mut self, ctx: &ForegroundContext) -> Poll<EvalOutcome> {
        assert!(ambient::is_bound());
        ctx.check_budget().expect("each poll starts a fresh slice");
        self.remaining -= 1;
        if self.remaining == 0 {
            Poll::Ready(Ok(Dynamic::from(self.value)))
        } else {
            Poll::Pending
        }
    }
}

impl ProgramItem for Delayed {
    fn is_declaration(&self) -> bool {
        self.declaration
    }

    fn start(&self, _ctx: &ForegroundContext) -> Box<dyn PendingValue + '_> {
        self.started.fetch_add(1, Ordering::SeqCst);
        Box::new(DelayedValue { remaining: self.polls, value: self.value })
    }
}

struct Never;

struct NeverValue;

impl PendingValue for NeverValue {
    fn poll_value(&mut self, _ctx: &ForegroundContext) -> Poll<EvalOutcome> {
        Poll::Pending
    }
}

impl ProgramItem for Never {
    fn start(&self, _ctx: &ForegroundContext) -> Box<dyn PendingValue + '_> {
        Box::new(NeverValue)
    }
}

struct Failing;

impl ProgramItem for Failing {
    fn start(&self, _ctx: &ForegroundContext) -> Box<dyn PendingValue + '_> {
        Box::new(Ready::new(Err(ScriptError::script("boom"))))
    }
}

/// Declaration that records the order it ran in.
struct Ordered {
    declaration: bool,
    log: Arc<std::sync::Mutex<Vec<&'static str>>>,
    tag: &'static str,
}

impl ProgramItem for Ordered {
    fn is_declaration(&self) -> bool {
        self.declaration
    }

    fn start(&self, _ctx: &ForegroundContext) -> Box<dyn PendingValue + '_> {
        self.log.lock().unwrap().push(self.tag);
        Box::new(Ready::new(Ok(Dynamic::UNIT)))
    }
}

fn evaluator() -> OneShotEvaluator {
    OneShotEvaluator::new(
        ContextConfig::default(),
        Arc::new(EcsTickHost::new()),
        ConsoleBuffer::default(),
        TimeSeriesCollection::new(),
    )
}

fn delayed(polls: usize, value: i64) -> Box<dyn ProgramItem> {
    Box::new(Delayed { polls, value, declaration: false, started: Arc::new(AtomicUsize::new(0)) })
}

#[test]
fn five_items_of_three_polls_each_complete() {
    let items: Vec<Box<dyn ProgramItem>> = (1..=5).map(|value| delayed(3, value)).collect();
    let value = evaluator().evaluate(&items).expect("15 polls fit under the cap");
    assert_eq!(value.as_int().ok(), Some(5));
}

#[test]
fn never_resolving_item_gives_up_after_exactly_one_hundred_polls() {
    let items: Vec<Box<dyn ProgramItem>> = vec![Box::new(Never)];
    let evaluator = evaluator();
    assert_eq!(evaluator.max_polls(), 100);
    assert_eq!(evaluator.evaluate(&items).map(|_| ()), Err(ScriptError::NoResult { polls: 100 }));
}

#[test]
fn poll_allowance_is_shared_across_items() {
    // 40 + 40 fits, the third item needs 30 more than the remaining 20.
    let items: Vec<Box<dyn ProgramItem>> = vec![delayed(40, 1), delayed(40, 2), delayed(30, 3)];
    assert_eq!(evaluator().evaluate(&items).map(|_| ()), Err(ScriptError::NoResult { polls: 100 }));
}

#[test]
fn declarations_run_before_statements() {
    let log = Arc::new(std::sync::Mutex::new(Vec::new()));
    let item = |declaration, tag| -> Box<dyn ProgramItem> {
        Box::new(Ordered { declaration, log: Arc::clone(&log), tag })
    };
    let items = vec![item(false, "stmt-1"), item(true, "decl-1"), item(false, "stmt-2"), item(true, "decl-2")];
    evaluator().evaluate(&items).expect("all items resolve");
    assert_eq!(*log.lock().unwrap(), vec!["decl-1", "decl-2", "stmt-1", "stmt-2"]);
}

#[test]
fn declaration_values_are_discarded() {
    let started = Arc::new(AtomicUsize::new(0));
    let items: Vec<Box<dyn ProgramItem>> = vec![
        Box::new(Delayed { polls: 1, value: 99, declaration: true, started: Arc::clone(&started) }),
    ];
    let value = evaluator().evaluate(&items).expect("declaration resolves");
    assert!(value.is_unit());
    assert_eq!(started.load(Ordering::SeqCst), 1);
}

#[test]
fn empty_program_yields_unit() {
    let value = evaluator().evaluate(&[]).expect("nothing to run");
    assert!(value.is_unit());
}

#[test]
fn item_errors_come_back_as_values() {
    let items: Vec<Box<dyn ProgramItem>> = vec![delayed(1, 1), Box::new(Failing), delayed(1, 2)];
    let outcome = evaluator().evaluate(&items);
    assert_eq!(outcome.map(|_| ()), Err(ScriptError::script("boom")));
    assert!(!ambient::is_bound());
}
