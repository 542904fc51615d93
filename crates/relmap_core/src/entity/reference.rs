//! Relation values and lazily resolved references.

use super::record::Entity;
use crate::error::{CoreError, CoreResult};
use relmap_store::Row;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Callable that loads the value behind a [`Promise`].
pub type Loader = Arc<dyn Fn(&Promise) -> CoreResult<RelationValue> + Send + Sync>;

/// The value held in an entity's relation slot.
#[derive(Debug, Clone)]
pub enum RelationValue {
    /// A single related entity, or none.
    One(Option<Entity>),
    /// A collection of related entities.
    Many(Vec<Entity>),
    /// Not loaded yet.
    Deferred(Promise),
}

impl RelationValue {
    /// Returns true unless the value is an unresolved promise.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        !matches!(self, RelationValue::Deferred(_))
    }

    /// Returns the related entities, or `None` for a deferred value.
    #[must_use]
    pub fn loaded(&self) -> Option<Vec<Entity>> {
        match self {
            RelationValue::One(one) => Some(one.iter().cloned().collect()),
            RelationValue::Many(many) => Some(many.clone()),
            RelationValue::Deferred(_) => None,
        }
    }

    /// Returns true if `entity` is among the loaded related entities.
    #[must_use]
    pub fn contains(&self, entity: &Entity) -> bool {
        match self {
            RelationValue::One(one) => one.as_ref() == Some(entity),
            RelationValue::Many(many) => many.contains(entity),
            RelationValue::Deferred(_) => false,
        }
    }
}

struct PromiseInner {
    role: String,
    scope: Row,
    loader: Option<Loader>,
    resolved: OnceLock<RelationValue>,
}

/// A reference to related data that has not been loaded.
///
/// The scope holds the key values that identify the related rows (for a
/// belongs-to promise: the target's key; for a has-many promise: the
/// children's foreign key). Resolution runs the loader synchronously once;
/// later calls return the cached value. Clones share the cache.
#[derive(Clone)]
pub struct Promise {
    inner: Arc<PromiseInner>,
}

impl Promise {
    /// Creates a promise without a loader.
    pub fn new(role: impl Into<String>, scope: Row) -> Self {
        Self {
            inner: Arc::new(PromiseInner {
                role: role.into(),
                scope,
                loader: None,
                resolved: OnceLock::new(),
            }),
        }
    }

    /// Returns a promise with the same role and scope that resolves through
    /// `loader`.
    #[must_use]
    pub fn with_loader<F>(self, loader: F) -> Self
    where
        F: Fn(&Promise) -> CoreResult<RelationValue> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(PromiseInner {
                role: self.inner.role.clone(),
                scope: self.inner.scope.clone(),
                loader: Some(Arc::new(loader)),
                resolved: OnceLock::new(),
            }),
        }
    }

    /// Target role.
    #[must_use]
    pub fn role(&self) -> &str {
        &self.inner.role
    }

    /// Key values identifying the related rows.
    #[must_use]
    pub fn scope(&self) -> &Row {
        &self.inner.scope
    }

    /// Returns true once the loader has run.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.inner.resolved.get().is_some()
    }

    /// Resolves the promise, running the loader on first access.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PromiseUnresolved`] when there is no loader, or
    /// the loader's own error.
    pub fn resolve(&self) -> CoreResult<RelationValue> {
        if let Some(value) = self.inner.resolved.get() {
            return Ok(value.clone());
        }
        let loader = self.inner.loader.as_ref().ok_or_else(|| CoreError::PromiseUnresolved {
            role: self.inner.role.clone(),
        })?;
        let value = loader(self)?;
        Ok(self.inner.resolved.get_or_init(|| value).clone())
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("role", &self.inner.role)
            .field("scope", &self.inner.scope)
            .field("resolved", &self.is_resolved())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_store::row;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn promise_without_loader_fails() {
        let promise = Promise::new("user", row! { "id" => 1 });
        assert!(matches!(
            promise.resolve(),
            Err(CoreError::PromiseUnresolved { ref role }) if role == "user"
        ));
        assert!(!promise.is_resolved());
    }

    #[test]
    fn loader_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let promise = Promise::new("user", row! { "id" => 7 }).with_loader(move |p| {
            counter.fetch_add(1, Ordering::SeqCst);
            let user = Entity::new(p.role()).with_field("id", p.scope()["id"].clone());
            Ok(RelationValue::One(Some(user)))
        });

        let first = promise.resolve().unwrap();
        let second = promise.clone().resolve().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(promise.is_resolved());

        let (a, b) = match (first, second) {
            (RelationValue::One(Some(a)), RelationValue::One(Some(b))) => (a, b),
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(a, b);
    }

    #[test]
    fn loaded_views() {
        let a = Entity::new("tag");
        let many = RelationValue::Many(vec![a.clone()]);
        assert!(many.contains(&a));
        assert_eq!(many.loaded().unwrap().len(), 1);
        assert_eq!(RelationValue::One(None).loaded().unwrap().len(), 0);

        let deferred = RelationValue::Deferred(Promise::new("tag", Row::new()));
        assert!(!deferred.is_loaded());
        assert!(deferred.loaded().is_none());
    }
}
