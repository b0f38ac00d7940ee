//! Ordered handler chains used as extension points.
//!
//! A chain dispatches a mutable context to each registered handler in
//! priority order. A handler may stop propagation, and an error aborts
//! the dispatch.

use crate::error::SyncResult;

/// A context that can stop propagation through a chain.
pub trait HandlerContext {
    /// Returns true once a handler asked to stop the chain.
    fn is_propagation_stopped(&self) -> bool {
        false
    }
}

/// One handler in a chain.
pub trait SyncHandler<C>: Send + Sync {
    /// Handles the context.
    fn handle(&self, context: &mut C) -> SyncResult<()>;
}

impl<C, F> SyncHandler<C> for F
where
    F: Fn(&mut C) -> SyncResult<()> + Send + Sync,
{
    fn handle(&self, context: &mut C) -> SyncResult<()> {
        self(context)
    }
}

struct Registered<C> {
    priority: i32,
    handler: Box<dyn SyncHandler<C>>,
}

/// Handlers sorted by descending priority; equal priorities keep
/// registration order.
pub struct HandlerChain<C> {
    handlers: Vec<Registered<C>>,
}

impl<C: HandlerContext> HandlerChain<C> {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Registers a handler with priority 0.
    pub fn register(&mut self, handler: impl SyncHandler<C> + 'static) {
        self.register_with_priority(0, handler);
    }

    /// Registers a handler; higher priorities run first.
    pub fn register_with_priority(&mut self, priority: i32, handler: impl SyncHandler<C> + 'static) {
        let position = self
            .handlers
            .iter()
            .position(|h| h.priority < priority)
            .unwrap_or(self.handlers.len());
        self.handlers.insert(
            position,
            Registered {
                priority,
                handler: Box::new(handler),
            },
        );
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, handler: impl SyncHandler<C> + 'static) -> Self {
        self.register(handler);
        self
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatches the context through the chain.
    pub fn dispatch(&self, context: &mut C) -> SyncResult<()> {
        for registered in &self.handlers {
            registered.handler.handle(context)?;
            if context.is_propagation_stopped() {
                break;
            }
        }
        Ok(())
    }
}

impl<C: HandlerContext> Default for HandlerChain<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> std::fmt::Debug for HandlerChain<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerChain")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    #[derive(Default)]
    struct Trace {
        seen: Vec<&'static str>,
        stop: bool,
    }

    impl HandlerContext for Trace {
        fn is_propagation_stopped(&self) -> bool {
            self.stop
        }
    }

    #[test]
    fn priority_order_then_registration_order() {
        let mut chain: HandlerChain<Trace> = HandlerChain::new();
        chain.register(|t: &mut Trace| -> SyncResult<()> {
            t.seen.push("a");
            Ok(())
        });
        chain.register_with_priority(10, |t: &mut Trace| -> SyncResult<()> {
            t.seen.push("high");
            Ok(())
        });
        chain.register(|t: &mut Trace| -> SyncResult<()> {
            t.seen.push("b");
            Ok(())
        });

        let mut trace = Trace::default();
        chain.dispatch(&mut trace).unwrap();
        assert_eq!(trace.seen, vec!["high", "a", "b"]);
    }

    #[test]
    fn stop_propagation() {
        let chain = HandlerChain::<Trace>::new()
            .with(|t: &mut Trace| -> SyncResult<()> {
                t.seen.push("first");
                t.stop = true;
                Ok(())
            })
            .with(|t: &mut Trace| -> SyncResult<()> {
                t.seen.push("second");
                Ok(())
            });

        let mut trace = Trace::default();
        chain.dispatch(&mut trace).unwrap();
        assert_eq!(trace.seen, vec!["first"]);
    }

    #[test]
    fn error_aborts_dispatch() {
        let chain = HandlerChain::<Trace>::new()
            .with(|_: &mut Trace| -> SyncResult<()> { Err(SyncError::Protocol("rejected".into())) })
            .with(|t: &mut Trace| -> SyncResult<()> {
                t.seen.push("never");
                Ok(())
            });

        let mut trace = Trace::default();
        assert!(chain.dispatch(&mut trace).is_err());
        assert!(trace.seen.is_empty());
    }
}
