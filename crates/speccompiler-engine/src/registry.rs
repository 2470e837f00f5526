//! Handler registry and per-phase scheduler
//!
//! Handlers register once at driver construction. For each phase the
//! scheduler selects the handlers implementing that phase's callback,
//! orders them by prerequisites (Kahn's algorithm) and runs them
//! sequentially. A prerequisite naming an unregistered handler is
//! silently permissive; a prerequisite cycle is fatal.

use anyhow::Result;
use speccompiler_phase_api::{Context, Diagnostics, Handler, Phase};
use speccompiler_store::Store;
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;
use tracing::debug;

/// Registration and scheduling errors. All are fatal setup errors.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Handler registered without a name")]
    MissingName,

    #[error("Duplicate handler name '{name}'")]
    DuplicateName { name: String },

    #[error("Prerequisite cycle among handlers: {}", names.join(", "))]
    PrerequisiteCycle { names: Vec<String> },
}

/// The set of registered handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Handler>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Duplicate names and empty names are fatal.
    pub fn register(&mut self, handler: Handler) -> Result<(), RegistryError> {
        if handler.name.trim().is_empty() {
            return Err(RegistryError::MissingName);
        }
        if self.handlers.iter().any(|h| h.name == handler.name) {
            return Err(RegistryError::DuplicateName {
                name: handler.name,
            });
        }
        self.handlers.push(handler);
        Ok(())
    }

    /// All registered handlers, in registration order.
    #[must_use]
    pub fn handlers(&self) -> &[Handler] {
        &self.handlers
    }

    /// Handlers implementing `phase`, in prerequisite topological order.
    ///
    /// Only prerequisites between handlers that both participate in the
    /// phase constrain the order; edges to absent or non-participating
    /// handlers are permissive. Without an edge, registration order is
    /// preserved, which keeps scheduling deterministic build-to-build.
    pub fn phase_order(&self, phase: Phase) -> Result<Vec<&Handler>, RegistryError> {
        let participants: Vec<&Handler> = self
            .handlers
            .iter()
            .filter(|h| h.implements(phase))
            .collect();
        let index: BTreeMap<&str, usize> = participants
            .iter()
            .enumerate()
            .map(|(i, h)| (h.name.as_str(), i))
            .collect();

        let mut indegree = vec![0usize; participants.len()];
        let mut edges: Vec<Vec<usize>> = vec![Vec::new(); participants.len()];
        for (i, handler) in participants.iter().enumerate() {
            for prereq in &handler.prerequisites {
                if let Some(&p) = index.get(prereq.as_str()) {
                    edges[p].push(i);
                    indegree[i] += 1;
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..participants.len())
            .filter(|&i| indegree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(participants.len());
        while let Some(i) = queue.pop_front() {
            order.push(i);
            for &next in &edges[i] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if order.len() != participants.len() {
            let names = participants
                .iter()
                .enumerate()
                .filter(|(i, _)| indegree[*i] > 0)
                .map(|(_, h)| h.name.clone())
                .collect();
            return Err(RegistryError::PrerequisiteCycle { names });
        }
        Ok(order.into_iter().map(|i| participants[i]).collect())
    }

    /// Run every participating handler for `phase` over `contexts`.
    pub fn run_phase(
        &self,
        phase: Phase,
        store: &Store,
        contexts: &mut [Context],
        diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        if contexts.is_empty() {
            return Ok(());
        }
        for handler in self.phase_order(phase)? {
            debug!(phase = %phase, handler = %handler.name, "running handler");
            if let Some(callback) = handler.callback(phase) {
                callback(store, contexts, diagnostics)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    fn noop(name: &str, prereqs: &[&str]) -> Handler {
        Handler::new(name, prereqs).on_transform(|_, _, _| Ok(()))
    }

    #[test]
    fn duplicate_names_are_fatal() {
        let mut registry = HandlerRegistry::new();
        registry.register(noop("a", &[])).unwrap();
        let err = registry.register(noop("a", &[])).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName { .. }));
    }

    #[test]
    fn empty_name_is_fatal() {
        let mut registry = HandlerRegistry::new();
        let err = registry.register(noop("  ", &[])).unwrap_err();
        assert!(matches!(err, RegistryError::MissingName));
    }

    #[test]
    fn prerequisites_order_execution() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        for name in ["c", "b", "a"] {
            let seen = Rc::clone(&order);
            let prereqs: &[&str] = match name {
                "c" => &["b"],
                "b" => &["a"],
                _ => &[],
            };
            registry
                .register(Handler::new(name, prereqs).on_transform(move |_, _, _| {
                    seen.borrow_mut().push(name.to_string());
                    Ok(())
                }))
                .unwrap();
        }

        let store = Store::open_in_memory().unwrap();
        let mut diags = Diagnostics::collecting(BTreeMap::new());
        let mut contexts = vec![Context::cached(
            "x".to_string(),
            std::path::PathBuf::from("x.md"),
        )];
        registry
            .run_phase(Phase::Transform, &store, &mut contexts, &mut diags)
            .unwrap();
        assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn missing_prerequisite_is_permissive() {
        let mut registry = HandlerRegistry::new();
        registry.register(noop("a", &["ghost"])).unwrap();
        let order = registry.phase_order(Phase::Transform).unwrap();
        assert_eq!(order.len(), 1);
    }

    #[test]
    fn cycle_is_fatal() {
        let mut registry = HandlerRegistry::new();
        registry.register(noop("a", &["b"])).unwrap();
        registry.register(noop("b", &["a"])).unwrap();
        let err = registry.phase_order(Phase::Transform).unwrap_err();
        assert!(matches!(err, RegistryError::PrerequisiteCycle { .. }));
    }

    #[test]
    fn empty_contexts_run_no_callbacks() {
        let called = Rc::new(RefCell::new(false));
        let flag = Rc::clone(&called);
        let mut registry = HandlerRegistry::new();
        registry
            .register(Handler::new("a", &[]).on_transform(move |_, _, _| {
                *flag.borrow_mut() = true;
                Ok(())
            }))
            .unwrap();
        let store = Store::open_in_memory().unwrap();
        let mut diags = Diagnostics::collecting(BTreeMap::new());
        registry
            .run_phase(Phase::Transform, &store, &mut [], &mut diags)
            .unwrap();
        assert!(!*called.borrow());
    }

    #[test]
    fn only_participants_are_ordered() {
        let mut registry = HandlerRegistry::new();
        registry.register(noop("t", &[])).unwrap();
        registry
            .register(Handler::new("e", &["t"]).on_emit(|_, _, _| Ok(())))
            .unwrap();
        // "e" does not implement TRANSFORM, "t" does not implement EMIT.
        assert_eq!(registry.phase_order(Phase::Transform).unwrap().len(), 1);
        assert_eq!(registry.phase_order(Phase::Emit).unwrap().len(), 1);
    }
}
