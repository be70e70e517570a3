//! # Bean Container
//!
//! Type-keyed registry of shared instances and factories. Routes look up
//! their controller here the first time they run; actions can also ask for
//! beans as arguments.

use crate::error::{Error, Result};
use crate::handler::Target;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

type Factory = Arc<dyn Fn() -> Result<Target> + Send + Sync>;

#[derive(Clone)]
enum Bean {
    Instance(Target),
    Factory(Factory),
}

/// Thread-safe bean container
///
/// Cloning is cheap and clones share the same registry.
#[derive(Clone, Default)]
pub struct Container {
    beans: Arc<RwLock<HashMap<TypeId, Bean>>>,
}

impl Container {
    /// Create an empty container
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shared instance of `T`, replacing any previous bean
    pub fn register_instance<T: Send + Sync + 'static>(&self, value: T) {
        self.insert::<T>(Bean::Instance(Arc::new(value)));
    }

    /// Register a factory that builds a fresh `T` on every lookup
    pub fn register_factory<T, F>(&self, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move || Ok(Arc::new(factory()) as Target));
        self.insert::<T>(Bean::Factory(factory));
    }

    /// Register a fallible factory
    pub fn register_try_factory<T, F>(&self, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move || factory().map(|bean| Arc::new(bean) as Target));
        self.insert::<T>(Bean::Factory(factory));
    }

    fn insert<T: 'static>(&self, bean: Bean) {
        let mut beans = self.beans.write().unwrap_or_else(PoisonError::into_inner);
        beans.insert(TypeId::of::<T>(), bean);
        debug!(bean = std::any::type_name::<T>(), "Bean registered");
    }

    /// Resolve a bean by type id.
    ///
    /// Factories run outside the registry lock.
    ///
    /// # Errors
    ///
    /// Returns `Error::BeanNotFound` if nothing is registered for the type,
    /// or the factory's error.
    pub fn resolve_bean(&self, type_id: TypeId, type_name: &str) -> Result<Target> {
        let bean = {
            let beans = self.beans.read().unwrap_or_else(PoisonError::into_inner);
            beans.get(&type_id).cloned()
        };

        match bean {
            Some(Bean::Instance(instance)) => Ok(instance),
            Some(Bean::Factory(factory)) => factory(),
            None => Err(Error::BeanNotFound {
                type_name: type_name.to_string(),
            }),
        }
    }

    /// Resolve a bean of type `T`
    ///
    /// # Errors
    ///
    /// Same as [`Container::resolve_bean`].
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let type_name = std::any::type_name::<T>();
        self.resolve_bean(TypeId::of::<T>(), type_name)?
            .downcast::<T>()
            .map_err(|_| Error::BeanNotFound {
                type_name: type_name.to_string(),
            })
    }

    /// Whether a bean of type `T` is registered
    #[must_use]
    pub fn contains<T: 'static>(&self) -> bool {
        let beans = self.beans.read().unwrap_or_else(PoisonError::into_inner);
        beans.contains_key(&TypeId::of::<T>())
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let beans = self.beans.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Container").field("beans", &beans.len()).finish()
    }
}
