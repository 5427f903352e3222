//! Export and Object registries.
//!
//! Both are process-scoped, owned by the [`Exporter`](crate::exporter::Exporter),
//! and thread-safe via `DashMap`.

use crate::class::{AnyInstance, ExportedClass};
use classrpc_types::envelope::ObjectId;
use classrpc_types::error::{BridgeError, BridgeResult};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;

/// Exported classes keyed by their unique name.
pub struct ExportRegistry {
    classes: DashMap<String, Arc<ExportedClass>>,
}

impl ExportRegistry {
    pub fn new() -> Self {
        Self {
            classes: DashMap::new(),
        }
    }

    /// Add a class. A taken name fails with `Conflict` and keeps the first entry.
    pub fn insert(&self, class: ExportedClass) -> BridgeResult<Arc<ExportedClass>> {
        match self.classes.entry(class.name().to_string()) {
            Entry::Occupied(entry) => Err(BridgeError::Conflict(entry.key().clone())),
            Entry::Vacant(entry) => {
                let class = Arc::new(class);
                entry.insert(Arc::clone(&class));
                Ok(class)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ExportedClass>> {
        self.classes.get(name).map(|c| Arc::clone(c.value()))
    }

    /// Look a class up, failing with `NotExported`.
    pub fn require(&self, name: &str) -> BridgeResult<Arc<ExportedClass>> {
        self.get(name)
            .ok_or_else(|| BridgeError::NotExported(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Remove a class. Returns whether it was present.
    pub fn remove(&self, name: &str) -> bool {
        self.classes.remove(name).is_some()
    }

    /// Exported names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl Default for ExportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A live instance together with the class it was built from.
#[derive(Debug, Clone)]
pub struct LiveObject {
    /// Holding the class keeps the instance callable after its name is removed.
    pub class: Arc<ExportedClass>,
    pub instance: AnyInstance,
}

/// Live instances keyed by object id.
///
/// Destroyed ids are retired for the life of the registry and never name an
/// instance again.
pub struct ObjectRegistry {
    objects: DashMap<ObjectId, LiveObject>,
    retired: DashSet<ObjectId>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            retired: DashSet::new(),
        }
    }

    /// Register a new instance. A live or retired id is a bad request.
    pub fn insert(&self, id: ObjectId, object: LiveObject) -> BridgeResult<()> {
        if self.retired.contains(&id) {
            return Err(retired(id));
        }
        match self.objects.entry(id) {
            Entry::Occupied(_) => Err(BridgeError::BadRequest(format!(
                "object {id} is already live"
            ))),
            Entry::Vacant(entry) => {
                entry.insert(object);
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &ObjectId) -> Option<LiveObject> {
        self.objects.get(id).map(|o| o.value().clone())
    }

    /// Look an instance up, failing with `DestroyedObject`.
    pub fn require(&self, id: &ObjectId) -> BridgeResult<LiveObject> {
        self.get(id)
            .ok_or_else(|| BridgeError::DestroyedObject(id.to_string()))
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    /// Whether `id` is live or was destroyed earlier.
    pub fn is_taken(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id) || self.retired.contains(id)
    }

    /// Remove an instance and retire its id. Returns whether it was live.
    pub fn remove(&self, id: &ObjectId) -> bool {
        self.retired.insert(*id);
        self.objects.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

fn retired(id: ObjectId) -> BridgeError {
    BridgeError::BadRequest(format!("object id {id} was destroyed and cannot be reused"))
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}
