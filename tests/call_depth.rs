use std::sync::Arc;
use std::thread;

use kestrel_script_runtime::{
    BackgroundContext, CallDepthGuard, CancellationToken, ConsoleBuffer, ExecutionContext, ScriptError,
};

#[test]
fn enter_past_maximum_overflows_and_leaves_restore_zero() {
    let guard = CallDepthGuard::new(4);
    for _ in 0..4 {
        guard.enter().expect("within limit");
    }
    let err = guard.enter().expect_err("fifth enter should overflow");
    assert_eq!(err, ScriptError::ExecutionOverflow { max_depth: 4 });
    for _ in 0..5 {
        guard.leave();
    }
    assert_eq!(guard.depth(), 0);
}

#[test]
fn leave_at_zero_saturates() {
    let guard = CallDepthGuard::new(2);
    guard.leave();
    guard.leave();
    assert_eq!(guard.depth(), 0);
    guard.enter().expect("enter after unbalanced leaves");
    assert_eq!(guard.depth(), 1);
}

#[test]
fn scope_undoes_failed_enter() {
    let guard = CallDepthGuard::new(1);
    let outer = guard.scope().expect("first scope");
    assert!(matches!(guard.scope(), Err(ScriptError::ExecutionOverflow { max_depth: 1 })));
    assert_eq!(guard.depth(), 1);
    drop(outer);
    assert_eq!(guard.depth(), 0);
}

#[test]
fn default_limit_is_one_hundred() {
    let guard = CallDepthGuard::default();
    assert_eq!(guard.max_depth(), 100);
    for _ in 0..100 {
        guard.enter().expect("within default limit");
    }
    assert!(guard.enter().is_err());
}

#[test]
fn counter_is_shared_across_threads() {
    let context = BackgroundContext::new(CancellationToken::new(), ConsoleBuffer::default(), 1_000);
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let context = Arc::clone(&context);
            thread::spawn(move || {
                for _ in 0..100 {
                    context.enter_call().expect("well under the limit");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker thread");
    }
    assert_eq!(context.call_depth(), 400);
    for _ in 0..400 {
        context.leave_call();
    }
    assert_eq!(context.call_depth(), 0);
}

#[test]
fn recursion_through_call_scope_stops_at_limit() {
    fn recurse(ctx: &dyn ExecutionContext, level: usize) -> Result<usize, ScriptError> {
        let _call = ctx.call_scope()?;
        recurse(ctx, level + 1)
    }

    let context = BackgroundContext::new(CancellationToken::new(), ConsoleBuffer::default(), 10);
    let err = recurse(context.as_ref(), 0).expect_err("unbounded recursion must overflow");
    assert!(matches!(err, ScriptError::ExecutionOverflow { max_depth: 10 }));
    assert_eq!(context.call_depth(), 0);
}
