//! Per-router application state injection.
//!
//! Each [`Router`](crate::router::Router) owns its own set of typed state
//! values instead of reaching into a process-wide slot. `Router::state`
//! records the value together with a small injector closure; `dispatch`
//! runs every injector over the incoming request before handing it to the
//! middleware chain, stashing the value as `Arc<T>` in the request's
//! extensions — the same mechanism the router already uses for `PathParams`.
//! The `State<T>` extractor in [crate::extractors::state] then reads it
//! straight back out of those extensions.
//!
//! Scoping state to the router instance (rather than a `TypeId`-keyed
//! global) means two independently built routers — e.g. two registries
//! running in the same test binary — never clobber each other's state.

use std::sync::Arc;

use crate::types::Request;

type Injector = Arc<dyn Fn(&mut Request) + Send + Sync>;

/// Per-router store of typed state values, applied to every dispatched request.
#[derive(Clone, Default)]
pub(crate) struct RouterState {
    injectors: Vec<Injector>,
}

impl RouterState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records `value`, to be stashed as `Arc<T>` in every request's extensions.
    pub(crate) fn insert<T: Send + Sync + 'static>(&mut self, value: T) {
        let arc = Arc::new(value);
        self.injectors.push(Arc::new(move |req: &mut Request| {
            req.extensions_mut().insert(arc.clone());
        }));
    }

    /// Applies every recorded state value to `req`'s extensions.
    pub(crate) fn apply(&self, req: &mut Request) {
        for injector in &self.injectors {
            injector(req);
        }
    }

    /// Appends another router's state values to this one, for `Router::merge`.
    pub(crate) fn extend(&mut self, other: &RouterState) {
        self.injectors.extend(other.injectors.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Widget(u32);

    #[test]
    fn insert_records_one_injector_per_value() {
        let mut state = RouterState::new();
        state.insert(Widget(7));
        state.insert("tag".to_string());
        assert_eq!(state.injectors.len(), 2);
    }

    #[test]
    fn extend_appends_the_other_routers_injectors() {
        let mut a = RouterState::new();
        a.insert(Widget(1));
        let mut b = RouterState::new();
        b.insert(Widget(2));
        b.insert(Widget(3));

        a.extend(&b);
        assert_eq!(a.injectors.len(), 3);
    }
}
