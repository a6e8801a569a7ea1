//! An execution-scoped propagation mechanism for the active span identity.
//!
//! The full context type of the OpenTelemetry API is a typed immutable map;
//! this SDK core only needs the slice of it that its own components consult:
//! the currently active [`SpanContext`]. Exemplar sampling uses it to decide
//! whether a measurement happened inside a sampled trace, and spans started
//! without an explicit parent inherit from it.

use std::cell::RefCell;
use std::mem;

use crate::trace::SpanContext;

thread_local! {
    static CURRENT_CONTEXT: RefCell<Context> = RefCell::new(Context::default());
}

/// The ambient state a unit of work executes in.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Context {
    span_context: Option<SpanContext>,
}

impl Context {
    /// An empty context.
    pub fn new() -> Self {
        Context::default()
    }

    /// Returns a snapshot of the context active on the current thread.
    pub fn current() -> Self {
        CURRENT_CONTEXT.with(|cx| cx.borrow().clone())
    }

    /// Returns a copy of this context carrying `span_context` as the active
    /// span identity.
    pub fn with_span_context(&self, span_context: SpanContext) -> Self {
        Context {
            span_context: Some(span_context),
        }
    }

    /// The active span identity, if any.
    pub fn span_context(&self) -> Option<&SpanContext> {
        self.span_context.as_ref()
    }

    /// Whether the active span identity is valid and sampled.
    pub fn has_sampled_span(&self) -> bool {
        self.span_context
            .as_ref()
            .map(|sc| sc.is_valid() && sc.is_sampled())
            .unwrap_or(false)
    }

    /// Makes this context current on the calling thread until the returned
    /// guard is dropped, at which point the previous context is restored.
    pub fn attach(self) -> ContextGuard {
        let previous = CURRENT_CONTEXT.with(|cx| mem::replace(&mut *cx.borrow_mut(), self));
        ContextGuard { previous }
    }
}

/// Restores the previously current context when dropped.
#[derive(Debug)]
pub struct ContextGuard {
    previous: Context,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = mem::take(&mut self.previous);
        CURRENT_CONTEXT.with(|cx| *cx.borrow_mut() = previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{SpanId, TraceFlags, TraceId, TraceState};

    fn sampled_span_context() -> SpanContext {
        SpanContext::new(
            TraceId::from(1u128),
            SpanId::from(1u64),
            TraceFlags::SAMPLED,
            false,
            TraceState::NONE,
        )
    }

    #[test]
    fn attach_and_restore() {
        assert_eq!(Context::current().span_context(), None);

        let guard = Context::new()
            .with_span_context(sampled_span_context())
            .attach();
        assert!(Context::current().has_sampled_span());

        drop(guard);
        assert_eq!(Context::current().span_context(), None);
    }

    #[test]
    fn nested_attach_restores_in_order() {
        let outer = sampled_span_context();
        let inner = SpanContext::new(
            TraceId::from(2u128),
            SpanId::from(2u64),
            TraceFlags::default(),
            false,
            TraceState::NONE,
        );

        let _outer_guard = Context::new().with_span_context(outer.clone()).attach();
        {
            let _inner_guard = Context::new().with_span_context(inner).attach();
            assert!(!Context::current().has_sampled_span());
        }
        assert_eq!(Context::current().span_context(), Some(&outer));
    }
}
