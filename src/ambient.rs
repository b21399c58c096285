//! Thread-local "current context" slot.
//!
//! Script-facing native functions cannot receive the context as an argument,
//! so whoever drives script code binds it here for the duration of the call.
//! Each thread has its own slot; the foreground thread and background threads
//! never see each other's binding.

use std::cell::RefCell;
use std::marker::PhantomData;

use crate::context::{ContextHandle, ExecutionContext};

thread_local! {
    static CURRENT_CONTEXT: RefCell<Option<ContextHandle>> = const { RefCell::new(None) };
}

/// Binds `context` as the current context until the returned guard drops.
///
/// The guard restores whatever was bound before, so nested bindings unwind
/// correctly and the slot is restored on early return, error, or panic.
pub fn bind(context: ContextHandle) -> AmbientGuard {
    let previous = CURRENT_CONTEXT.with(|slot| slot.borrow_mut().replace(context));
    AmbientGuard { previous, _not_send: PhantomData }
}

pub fn current() -> Option<ContextHandle> {
    CURRENT_CONTEXT.with(|slot| slot.borrow().clone())
}

pub fn is_bound() -> bool {
    CURRENT_CONTEXT.with(|slot| slot.borrow().is_some())
}

/// Runs `f` against the current context, if any.
pub fn with_current<R>(f: impl FnOnce(&dyn ExecutionContext) -> R) -> Option<R> {
    // Clone out of the slot so `f` may bind nested contexts itself.
    current().map(|context| f(context.as_ref()))
}

#[must_use = "the binding is released as soon as the guard drops"]
pub struct AmbientGuard {
    previous: Option<ContextHandle>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for AmbientGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_CONTEXT.with(|slot| *slot.borrow_mut() = previous);
    }
}
