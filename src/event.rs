//! A minimal synchronous multi-subscriber notifier.

use alloc::{rc::Rc, vec::Vec};
use core::cell::{Cell, RefCell};

use crate::error::HandlingError;

/// Identifies a registered handler so it can be unregistered later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(usize);

type Handler<T> = Rc<dyn Fn(&mut T) -> Result<(), HandlingError>>;

/// A hook for processing instances of one kind of event. A consumer
/// registers interest in the event, and a producer triggers each instance.
///
/// Handlers run in registration order on the triggering thread. The
/// subscriber list is snapshotted per trigger, so a handler may register or
/// unregister without corrupting the iteration in progress.
pub struct EventHook<T> {
    handlers: RefCell<Vec<(HandlerId, Handler<T>)>>,
    next_id: Cell<usize>,
}

impl<T> EventHook<T> {
    pub fn new() -> EventHook<T> {
        EventHook {
            handlers: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
        }
    }

    pub fn register<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&mut T) -> Result<(), HandlingError> + 'static,
    {
        let id = HandlerId(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);
        self.handlers.borrow_mut().push((id, Rc::new(handler)));
        id
    }

    pub fn unregister(&self, id: HandlerId) {
        self.handlers.borrow_mut().retain(|(other, _)| *other != id);
    }

    pub fn clear(&self) {
        self.handlers.borrow_mut().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.borrow().is_empty()
    }

    /// Invokes the handlers registered at the time of the call, stopping
    /// at the first failure.
    pub fn trigger(&self, event: &mut T) -> Result<(), HandlingError> {
        let snapshot: Vec<Handler<T>> = self
            .handlers
            .borrow()
            .iter()
            .map(|(_, handler)| Rc::clone(handler))
            .collect();
        for handler in snapshot {
            handler(event)?;
        }
        Ok(())
    }
}

impl<T> Default for EventHook<T> {
    fn default() -> EventHook<T> {
        EventHook::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use alloc::vec;
    use core::cell::RefCell;

    #[test]
    fn handlers_run_in_registration_order() {
        let hook: EventHook<Vec<u32>> = EventHook::new();
        hook.register(|seen: &mut Vec<u32>| {
            seen.push(1);
            Ok(())
        });
        hook.register(|seen: &mut Vec<u32>| {
            seen.push(2);
            Ok(())
        });

        let mut seen = Vec::new();
        hook.trigger(&mut seen).unwrap();
        assert_eq!(vec![1, 2], seen);
    }

    #[test]
    fn unregister_removes_handler() {
        let hook: EventHook<u32> = EventHook::new();
        let id = hook.register(|count: &mut u32| {
            *count += 1;
            Ok(())
        });

        let mut count = 0;
        hook.trigger(&mut count).unwrap();
        hook.unregister(id);
        hook.trigger(&mut count).unwrap();
        assert_eq!(1, count);
        assert!(hook.is_empty());
    }

    #[test]
    fn clear_removes_all_handlers() {
        let hook: EventHook<u32> = EventHook::new();
        hook.register(|_| Ok(()));
        hook.register(|_| Ok(()));
        hook.clear();
        assert!(hook.is_empty());
    }

    #[test]
    fn error_stops_remaining_handlers() {
        let hook: EventHook<u32> = EventHook::new();
        hook.register(|_: &mut u32| {
            Err(HandlingError::internal("boom"))
        });
        hook.register(|count: &mut u32| {
            *count += 1;
            Ok(())
        });

        let mut count = 0;
        assert!(hook.trigger(&mut count).is_err());
        assert_eq!(0, count);
    }

    #[test]
    fn registering_during_trigger_does_not_disturb_iteration() {
        let hook: Rc<EventHook<u32>> = Rc::new(EventHook::new());
        let late_calls = Rc::new(RefCell::new(0));

        let hook_inner = Rc::clone(&hook);
        let late_inner = Rc::clone(&late_calls);
        hook.register(move |_: &mut u32| {
            let late = Rc::clone(&late_inner);
            hook_inner.register(move |_: &mut u32| {
                *late.borrow_mut() += 1;
                Ok(())
            });
            Ok(())
        });

        let mut event = 0;
        // The handler registered mid-trigger runs from the next trigger on.
        hook.trigger(&mut event).unwrap();
        assert_eq!(0, *late_calls.borrow());
        hook.trigger(&mut event).unwrap();
        assert_eq!(1, *late_calls.borrow());
    }
}
