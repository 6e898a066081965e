//! Manager registry
//!
//! Ordered collection of managers keyed by id. Registration enforces two
//! invariants up front so the pipelines never have to:
//!
//! - ids are unique
//! - every dependency of a manager is registered before it
//!
//! There is no topological sort; registration order is the dependency order.
//! An optional explicit execution order overrides registration order for the
//! pipelines. When set, only the managers it names take part in `process` and
//! `post_process`; state assembly always visits every manager.

use std::collections::HashSet;
use std::sync::Arc;

use sdk::errors::EngineError;
use sdk::manager::{Manager, ManagerId};
use tracing::debug;

#[derive(Default)]
pub struct ManagerRegistry {
    managers: Vec<Arc<dyn Manager>>,
    execution_order: Vec<ManagerId>,
}

impl ManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a manager after every manager it depends on
    pub fn register(&mut self, manager: Arc<dyn Manager>) -> Result<(), EngineError> {
        let id = manager.id();
        if self.contains(&id) {
            return Err(EngineError::DuplicateManager(id));
        }

        for dependency in manager.dependencies() {
            if !self.contains(&dependency) {
                return Err(EngineError::MissingDependency {
                    manager: id,
                    dependency,
                });
            }
        }

        debug!(manager = %id, "Registered manager");
        self.managers.push(manager);
        Ok(())
    }

    /// Register a batch in order; nothing is added unless the whole batch is valid
    ///
    /// A dependency is satisfied by an already registered manager or by one
    /// earlier in the batch.
    pub fn register_all(&mut self, managers: Vec<Arc<dyn Manager>>) -> Result<(), EngineError> {
        let mut seen: HashSet<ManagerId> = self.managers.iter().map(|m| m.id()).collect();

        for manager in &managers {
            let id = manager.id();
            for dependency in manager.dependencies() {
                if !seen.contains(&dependency) {
                    return Err(EngineError::MissingDependency {
                        manager: id,
                        dependency,
                    });
                }
            }
            if !seen.insert(id.clone()) {
                return Err(EngineError::DuplicateManager(id));
            }
        }

        for manager in managers {
            debug!(manager = %manager.id(), "Registered manager");
            self.managers.push(manager);
        }
        Ok(())
    }

    /// Replace the explicit execution order; an empty order restores
    /// registration order
    pub fn set_execution_order(&mut self, order: Vec<ManagerId>) -> Result<(), EngineError> {
        self.validate_order(&order)?;
        self.execution_order = order;
        Ok(())
    }

    /// Check that an order names only registered managers, each at most once
    pub fn validate_order(&self, order: &[ManagerId]) -> Result<(), EngineError> {
        let mut seen = HashSet::with_capacity(order.len());
        for id in order {
            if !self.contains(id) {
                return Err(EngineError::UnknownManager(id.clone()));
            }
            if !seen.insert(id) {
                return Err(EngineError::DuplicateInExecutionOrder(id.clone()));
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &ManagerId) -> Option<&Arc<dyn Manager>> {
        self.managers.iter().find(|m| &m.id() == id)
    }

    pub fn contains(&self, id: &ManagerId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    /// Managers in registration order
    pub fn managers(&self) -> &[Arc<dyn Manager>] {
        &self.managers
    }

    pub fn execution_order(&self) -> &[ManagerId] {
        &self.execution_order
    }

    /// Managers a pipeline should run, in the order it should run them
    ///
    /// The base order is `override_order` when non-empty, then the registry's
    /// explicit order, then registration order. `selected` is applied on top;
    /// it never reorders and never adds managers.
    pub fn resolve<F>(
        &self,
        override_order: Option<&[ManagerId]>,
        selected: F,
    ) -> Result<Vec<Arc<dyn Manager>>, EngineError>
    where
        F: Fn(&ManagerId) -> bool,
    {
        let base: Vec<Arc<dyn Manager>> = match override_order {
            Some(order) if !order.is_empty() => {
                self.validate_order(order)?;
                self.lookup_all(order)
            }
            _ if !self.execution_order.is_empty() => self.lookup_all(&self.execution_order),
            _ => self.managers.clone(),
        };

        Ok(base.into_iter().filter(|m| selected(&m.id())).collect())
    }

    fn lookup_all(&self, order: &[ManagerId]) -> Vec<Arc<dyn Manager>> {
        order
            .iter()
            .filter_map(|id| self.get(id).map(Arc::clone))
            .collect()
    }
}
