//! Registry of backend modules keyed by [`ModuleId`].
//!
//! Dependents hold a `ModuleId` and look the module up here rather than
//! keeping a reference to it. Iteration follows registration order.
//!
//! At most one module is active (initialized, connected or disconnected)
//! at a time: initialization goes through the registry, which refuses it
//! until the active module has been terminated.

use indexmap::IndexMap;

use cacao_core::{LifecycleError, ModuleId, ModuleState};

use crate::module::{Backend, BackendModule, ModuleError};

/// Owns every registered backend module.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: IndexMap<ModuleId, BackendModule>,
    next_id: u32,
}

impl ModuleRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `backend` under a unique `name`. The module starts
    /// uninitialized.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        backend: Backend,
    ) -> Result<ModuleId, LifecycleError> {
        let name = name.into();
        if self.find(&name).is_some() {
            return Err(LifecycleError::DuplicateModule { name });
        }
        let id = ModuleId(self.next_id);
        self.next_id += 1;
        tracing::debug!(%id, module = %name, kind = %backend.kind(), "backend module registered");
        self.modules.insert(id, BackendModule::new(id, name, backend));
        Ok(id)
    }

    /// Look a module up.
    pub fn get(&self, id: ModuleId) -> Result<&BackendModule, LifecycleError> {
        self.modules
            .get(&id)
            .ok_or(LifecycleError::UnknownModule { id })
    }

    /// Look a module up for a lifecycle call.
    pub fn get_mut(&mut self, id: ModuleId) -> Result<&mut BackendModule, LifecycleError> {
        self.modules
            .get_mut(&id)
            .ok_or(LifecycleError::UnknownModule { id })
    }

    /// Id of the module registered as `name`.
    pub fn find(&self, name: &str) -> Option<ModuleId> {
        self.modules
            .values()
            .find(|m| m.name() == name)
            .map(BackendModule::id)
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.modules.keys().copied()
    }

    /// Number of registered modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// The module currently holding backend resources, if any. There is
    /// never more than one.
    pub fn active(&self) -> Option<ModuleId> {
        self.modules
            .values()
            .find(|m| {
                matches!(
                    m.state(),
                    ModuleState::Initialized | ModuleState::Connected | ModuleState::Disconnected
                )
            })
            .map(BackendModule::id)
    }

    /// Remove a module. Only an uninitialized or terminated module may
    /// be destroyed; anything else stays registered.
    pub fn destroy(&mut self, id: ModuleId) -> Result<BackendModule, LifecycleError> {
        let module = self.get(id)?;
        let state = module.state();
        if !matches!(state, ModuleState::Uninitialized | ModuleState::Terminated) {
            return Err(LifecycleError::ModuleTransition {
                module: module.name().to_owned(),
                operation: "destroy",
                state,
            });
        }
        let module = self
            .modules
            .shift_remove(&id)
            .ok_or(LifecycleError::UnknownModule { id })?;
        tracing::debug!(%id, module = %module.name(), "backend module destroyed");
        Ok(module)
    }

    /// Refuse to bring up `requested` while another module is active.
    fn ensure_none_active(&self, requested: ModuleId) -> Result<(), LifecycleError> {
        let Some(active) = self.active().filter(|id| *id != requested) else {
            return Ok(());
        };
        let name = |id: ModuleId| {
            self.modules
                .get(&id)
                .map_or_else(|| id.to_string(), |m| m.name().to_owned())
        };
        let error = LifecycleError::ModuleActive {
            active: name(active),
            requested: name(requested),
        };
        tracing::error!(%error, "backend module lifecycle violation");
        Err(error)
    }

    /// Initialize one module. Fails while a different module is active.
    pub fn init(&mut self, id: ModuleId) -> Result<(), ModuleError> {
        self.ensure_none_active(id)?;
        self.get_mut(id)?.init()
    }

    /// Initialize the first module in `preference` order that accepts
    /// `init`. Unknown names are skipped; init failures are logged and
    /// the next candidate tried.
    ///
    /// Fails without trying anything while a module is already active.
    pub fn init_first<S: AsRef<str>>(
        &mut self,
        preference: &[S],
    ) -> Result<Option<ModuleId>, LifecycleError> {
        if let Some(active) = self.active() {
            let error = LifecycleError::ModuleActive {
                active: self.get(active)?.name().to_owned(),
                requested: preference
                    .iter()
                    .map(|name| name.as_ref())
                    .collect::<Vec<_>>()
                    .join("|"),
            };
            tracing::error!(%error, "backend module lifecycle violation");
            return Err(error);
        }
        for name in preference {
            let name = name.as_ref();
            let Some(id) = self.find(name) else {
                tracing::debug!(backend = name, "preferred backend not registered");
                continue;
            };
            let Some(module) = self.modules.get_mut(&id) else {
                continue;
            };
            match module.init() {
                Ok(()) => {
                    tracing::info!(backend = name, kind = %module.kind(), "backend selected");
                    return Ok(Some(id));
                }
                Err(e) => {
                    tracing::warn!(backend = name, error = %e, "backend failed to initialize, trying next");
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessImmediate, HeadlessQueued};

    fn registry() -> ModuleRegistry {
        let mut reg = ModuleRegistry::new();
        reg.register("queued", Backend::Queued(Box::new(HeadlessQueued::default())))
            .unwrap();
        reg.register(
            "immediate",
            Backend::Immediate(Box::new(HeadlessImmediate::default())),
        )
        .unwrap();
        reg
    }

    #[test]
    fn ids_follow_registration_order() {
        let reg = registry();
        let ids: Vec<_> = reg.ids().collect();
        assert_eq!(ids, vec![ModuleId(0), ModuleId(1)]);
        assert_eq!(reg.find("immediate"), Some(ModuleId(1)));
        assert_eq!(reg.find("metal"), None);
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut reg = registry();
        let err = reg
            .register("queued", Backend::Queued(Box::new(HeadlessQueued::default())))
            .unwrap_err();
        assert_eq!(
            err,
            LifecycleError::DuplicateModule {
                name: "queued".into()
            }
        );
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn unknown_id_is_an_error() {
        let reg = registry();
        assert_eq!(
            reg.get(ModuleId(9)).unwrap_err(),
            LifecycleError::UnknownModule { id: ModuleId(9) }
        );
    }

    #[test]
    fn destroy_requires_quiescent_module() {
        let mut reg = registry();
        let id = reg.find("queued").unwrap();
        reg.init(id).unwrap();
        assert!(reg.destroy(id).is_err());
        assert_eq!(reg.len(), 2);

        reg.get_mut(id).unwrap().term().unwrap();
        let module = reg.destroy(id).unwrap();
        assert_eq!(module.state(), ModuleState::Terminated);
        assert!(reg.get(id).is_err());
    }

    #[test]
    fn init_first_skips_unknown_names() {
        let mut reg = registry();
        let picked = reg.init_first(&["vulkan", "immediate", "queued"]).unwrap();
        assert_eq!(picked, reg.find("immediate"));
        assert_eq!(reg.active(), picked);
    }

    #[test]
    fn second_module_refused_while_one_is_active() {
        let mut reg = registry();
        let queued = reg.init_first(&["queued"]).unwrap().unwrap();
        assert_eq!(
            reg.init_first(&["immediate"]),
            Err(LifecycleError::ModuleActive {
                active: "queued".into(),
                requested: "immediate".into(),
            })
        );
        let immediate = reg.find("immediate").unwrap();
        assert_eq!(
            reg.init(immediate),
            Err(ModuleError::Lifecycle(LifecycleError::ModuleActive {
                active: "queued".into(),
                requested: "immediate".into(),
            }))
        );
        assert_eq!(
            reg.get(immediate).unwrap().state(),
            ModuleState::Uninitialized
        );

        reg.get_mut(queued).unwrap().term().unwrap();
        reg.init(immediate).unwrap();
        assert_eq!(reg.active(), Some(immediate));
    }
}
