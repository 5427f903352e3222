//! The origin side of the bridge.
//!
//! Owns the Export Registry and the Object Registry and turns every incoming
//! [`CallEnvelope`] into exactly one [`ResultEnvelope`]. Failures of any kind
//! (bridge errors, errors thrown by exported code, panics) end up as failure
//! envelopes; nothing escapes [`Exporter::dispatch`].

use crate::class::{Args, ClassDef, ExportedClass, Outcome};
use crate::codec::ErrorCodec;
use crate::registry::{ExportRegistry, LiveObject, ObjectRegistry};
use classrpc_types::config::BridgeConfig;
use classrpc_types::envelope::{
    CallEnvelope, CallKind, ResultEnvelope, CONSTRUCT_MEMBER, DESTROY_MEMBER,
};
use classrpc_types::error::{BridgeError, BridgeResult, ThrownError};
use classrpc_types::surface::{ClassSurface, NamingRules};
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::{debug, info, warn};

/// Origin-side registry and dispatcher.
pub struct Exporter {
    classes: ExportRegistry,
    objects: ObjectRegistry,
    naming: NamingRules,
}

impl Exporter {
    /// Exporter with the default naming rules.
    pub fn new() -> Self {
        Self::with_naming(NamingRules::default())
    }

    pub fn with_naming(naming: NamingRules) -> Self {
        Self {
            classes: ExportRegistry::new(),
            objects: ObjectRegistry::new(),
            naming,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::with_naming(config.naming())
    }

    /// Publish a class under `name`.
    pub fn export_class(&self, name: &str, def: impl Into<ClassDef>) -> BridgeResult<()> {
        if self.classes.contains(name) {
            return Err(BridgeError::Conflict(name.to_string()));
        }
        let class = ExportedClass::new(name, def.into(), &self.naming);
        let members = class.surface().members.len();
        self.classes.insert(class)?;
        info!(class = %name, members, "Class exported");
        Ok(())
    }

    /// Withdraw a class. Live instances keep working.
    pub fn unexport_class(&self, name: &str) -> bool {
        let removed = self.classes.remove(name);
        if removed {
            info!(class = %name, "Class unexported");
        }
        removed
    }

    /// Exported class names, sorted.
    pub fn list_classes(&self) -> Vec<String> {
        self.classes.names()
    }

    /// Surface of an exported class.
    pub fn surface(&self, name: &str) -> Option<ClassSurface> {
        self.classes.get(name).map(|c| c.surface().clone())
    }

    /// Number of live instances.
    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    /// Dispatch one envelope.
    pub async fn dispatch(&self, envelope: CallEnvelope) -> ResultEnvelope {
        debug!(
            class = %envelope.class_name,
            member = %envelope.member,
            object_id = ?envelope.object_id,
            is_async = envelope.is_async(),
            "Dispatching call"
        );

        let started = std::panic::catch_unwind(AssertUnwindSafe(|| self.begin(&envelope)));
        let result = match started {
            Ok(Ok(Outcome::Ready(result))) => result.map_err(BridgeError::User),
            Ok(Ok(Outcome::Deferred(fut))) => match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result.map_err(BridgeError::User),
                Err(panic) => Err(panicked(&envelope, panic)),
            },
            Ok(Err(e)) => Err(e),
            Err(panic) => Err(panicked(&envelope, panic)),
        };

        if let Err(e) = &result {
            debug!(
                class = %envelope.class_name,
                member = %envelope.member,
                error = %e,
                "Call failed"
            );
        }
        ErrorCodec::encode_result(result)
    }

    /// The synchronous part of a dispatch.
    fn begin(&self, envelope: &CallEnvelope) -> BridgeResult<Outcome> {
        let args = Args::new(envelope.args.clone());
        match (envelope.kind, envelope.member.as_str()) {
            (CallKind::Call, CONSTRUCT_MEMBER) => self.construct(envelope, args),
            (CallKind::Call, DESTROY_MEMBER) => self.destroy(envelope),
            (CallKind::Call, member) => match &envelope.object_id {
                None => {
                    let class = self.classes.require(&envelope.class_name)?;
                    class.invoke(None, member, args)
                }
                Some(_) => {
                    let object = self.live_object(envelope)?;
                    object.class.invoke(Some(&object.instance), member, args)
                }
            },
            (CallKind::Accessor, member) => {
                let op = envelope.accessor_op()?;
                let value = match &envelope.object_id {
                    None => {
                        let class = self.classes.require(&envelope.class_name)?;
                        class.access(None, member, op)?
                    }
                    Some(_) => {
                        let object = self.live_object(envelope)?;
                        object.class.access(Some(&object.instance), member, op)?
                    }
                };
                Ok(Outcome::Ready(Ok(value)))
            }
        }
    }

    fn construct(&self, envelope: &CallEnvelope, args: Args) -> BridgeResult<Outcome> {
        let id = envelope.object_id.ok_or_else(|| {
            BridgeError::BadRequest(format!(
                "construct of {} without object id",
                envelope.class_name
            ))
        })?;
        let class = self.classes.require(&envelope.class_name)?;
        if self.objects.is_taken(&id) {
            return Err(BridgeError::BadRequest(format!("object id {id} is already in use")));
        }
        let instance = match class.construct(args) {
            Ok(instance) => instance,
            Err(thrown) => return Ok(Outcome::Ready(Err(thrown))),
        };
        self.objects.insert(id, LiveObject { class, instance })?;
        debug!(class = %envelope.class_name, object_id = %id, "Object constructed");
        Ok(Outcome::Ready(Ok(Value::Bool(true))))
    }

    fn destroy(&self, envelope: &CallEnvelope) -> BridgeResult<Outcome> {
        let id = envelope.object_id.ok_or_else(|| {
            BridgeError::BadRequest(format!(
                "destroy of {} without object id",
                envelope.class_name
            ))
        })?;
        if self.objects.remove(&id) {
            debug!(class = %envelope.class_name, object_id = %id, "Object destroyed");
        }
        Ok(Outcome::Ready(Ok(Value::Bool(true))))
    }

    fn live_object(&self, envelope: &CallEnvelope) -> BridgeResult<LiveObject> {
        let id = envelope
            .object_id
            .ok_or_else(|| BridgeError::BadRequest("missing object id".to_string()))?;
        let object = self.objects.require(&id)?;
        if object.class.name() != envelope.class_name {
            return Err(BridgeError::BadRequest(format!(
                "object {id} is a {}, not a {}",
                object.class.name(),
                envelope.class_name
            )));
        }
        Ok(object)
    }
}

impl Default for Exporter {
    fn default() -> Self {
        Self::new()
    }
}

fn panicked(envelope: &CallEnvelope, panic: Box<dyn Any + Send>) -> BridgeError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "exported member panicked".to_string());
    warn!(
        class = %envelope.class_name,
        member = %envelope.member,
        panic = %message,
        "Exported code panicked"
    );
    BridgeError::User(ThrownError::generic(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassBuilder;
    use classrpc_types::envelope::{CallId, ObjectId};
    use classrpc_types::error::ErrorKind;
    use serde_json::json;
    use std::time::Duration;

    struct Pair {
        a: String,
        b: i64,
    }

    fn pair_class() -> ClassBuilder<Pair, u32> {
        ClassBuilder::with_statics(
            |args: Args| {
                Ok(Pair {
                    a: args.arg(0)?,
                    b: args.arg(1)?,
                })
            },
            1,
        )
        .property("a", |p| p.a.clone(), |p, v: String| p.a = v)
        .property("b", |p| p.b, |p, v: i64| p.b = v)
        .method("getASync", |p, _| Ok(p.a.clone()))
        .async_method("getB", |p, _| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let b = p.lock().unwrap().b;
            Ok::<_, ThrownError>(b)
        })
        .method("failSync", |_, _| -> Result<(), ThrownError> {
            Err(ThrownError::new("RangeError", "bad").with_field("code", 7))
        })
        .method("panicSync", |_, _| -> Result<(), ThrownError> { panic!("exploded") })
        .async_method("panicLater", |_, _| async move {
            tokio::task::yield_now().await;
            if true {
                panic!("exploded later");
            }
            Ok::<_, ThrownError>(())
        })
        .static_property("version", |v| *v, |v, n: u32| *v = n)
    }

    fn exporter() -> Exporter {
        let exporter = Exporter::new();
        exporter.export_class("Pair", pair_class()).unwrap();
        exporter
    }

    async fn construct(exporter: &Exporter) -> ObjectId {
        let id = ObjectId::new();
        let result = exporter
            .dispatch(CallEnvelope::construct("Pair", id, vec![json!("foo"), json!(23)]))
            .await;
        assert_eq!(result, ResultEnvelope::success(json!(true)));
        id
    }

    fn error_type(result: &ResultEnvelope) -> &str {
        &result.err.as_ref().expect("expected failure").constructor
    }

    #[tokio::test]
    async fn test_duplicate_export_conflicts() {
        let exporter = exporter();
        let err = exporter.export_class("Pair", pair_class()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(exporter.list_classes(), vec!["Pair"]);
    }

    #[tokio::test]
    async fn test_construct_and_initial_properties() {
        let exporter = exporter();
        let id = construct(&exporter).await;
        assert_eq!(exporter.live_objects(), 1);

        let a = exporter.dispatch(CallEnvelope::get("Pair", Some(id), "a")).await;
        assert_eq!(a.data, json!("foo"));
        let b = exporter.dispatch(CallEnvelope::get("Pair", Some(id), "b")).await;
        assert_eq!(b.data, json!(23));
    }

    #[tokio::test]
    async fn test_sync_and_deferred_methods() {
        let exporter = exporter();
        let id = construct(&exporter).await;
        let a = exporter
            .dispatch(CallEnvelope::call("Pair", Some(id), "getASync", vec![]))
            .await;
        assert_eq!(a.data, json!("foo"));
        let b = exporter
            .dispatch(
                CallEnvelope::call("Pair", Some(id), "getB", vec![]).with_call_id(CallId::new()),
            )
            .await;
        assert_eq!(b.data, json!(23));
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let exporter = exporter();
        let id = construct(&exporter).await;
        let set = exporter
            .dispatch(CallEnvelope::set("Pair", Some(id), "a", json!("bar")))
            .await;
        assert_eq!(set.data, json!(true));
        let a = exporter
            .dispatch(CallEnvelope::call("Pair", Some(id), "getASync", vec![]))
            .await;
        assert_eq!(a.data, json!("bar"));

        let set = exporter
            .dispatch(CallEnvelope::set("Pair", None, "version", json!(9)))
            .await;
        assert!(!set.is_err());
        let version = exporter.dispatch(CallEnvelope::get("Pair", None, "version")).await;
        assert_eq!(version.data, json!(9));
    }

    #[tokio::test]
    async fn test_destroyed_object() {
        let exporter = exporter();
        let id = construct(&exporter).await;
        let destroyed = exporter.dispatch(CallEnvelope::destroy("Pair", id)).await;
        assert_eq!(destroyed.data, json!(true));
        assert_eq!(exporter.live_objects(), 0);

        let result = exporter
            .dispatch(CallEnvelope::call("Pair", Some(id), "getASync", vec![]))
            .await;
        assert_eq!(error_type(&result), "DestroyedObjectError");

        // Destroying twice is not an error.
        let again = exporter.dispatch(CallEnvelope::destroy("Pair", id)).await;
        assert!(!again.is_err());
    }

    #[tokio::test]
    async fn test_lifecycle_without_object_id() {
        let exporter = exporter();
        let mut construct = CallEnvelope::construct("Pair", ObjectId::new(), vec![]);
        construct.object_id = None;
        let result = exporter.dispatch(construct).await;
        assert_eq!(error_type(&result), "BadRequestError");

        let mut destroy = CallEnvelope::destroy("Pair", ObjectId::new());
        destroy.object_id = None;
        let result = exporter.dispatch(destroy).await;
        assert_eq!(error_type(&result), "BadRequestError");
    }

    #[tokio::test]
    async fn test_duplicate_live_id() {
        let exporter = exporter();
        let id = construct(&exporter).await;
        let result = exporter
            .dispatch(CallEnvelope::construct("Pair", id, vec![json!("x"), json!(1)]))
            .await;
        assert_eq!(error_type(&result), "BadRequestError");
    }

    #[tokio::test]
    async fn test_destroyed_id_cannot_be_reconstructed() {
        let exporter = exporter();
        let id = construct(&exporter).await;
        exporter.dispatch(CallEnvelope::destroy("Pair", id)).await;

        let result = exporter
            .dispatch(CallEnvelope::construct("Pair", id, vec![json!("x"), json!(1)]))
            .await;
        assert_eq!(error_type(&result), "BadRequestError");
        let result = exporter
            .dispatch(CallEnvelope::call("Pair", Some(id), "getASync", vec![]))
            .await;
        assert_eq!(error_type(&result), "DestroyedObjectError");
    }

    #[tokio::test]
    async fn test_unknown_class_and_member() {
        let exporter = exporter();
        let result = exporter
            .dispatch(CallEnvelope::construct("Missing", ObjectId::new(), vec![]))
            .await;
        assert_eq!(error_type(&result), "NotExportedError");

        let id = construct(&exporter).await;
        let result = exporter
            .dispatch(CallEnvelope::call("Pair", Some(id), "nope", vec![]))
            .await;
        assert_eq!(error_type(&result), "BadRequestError");

        let result = exporter
            .dispatch(CallEnvelope::call("Other", Some(id), "getASync", vec![]))
            .await;
        assert_eq!(error_type(&result), "BadRequestError");
    }

    #[tokio::test]
    async fn test_user_error_fields_serialized() {
        let exporter = exporter();
        let id = construct(&exporter).await;
        let result = exporter
            .dispatch(CallEnvelope::call("Pair", Some(id), "failSync", vec![]))
            .await;
        let err = result.err.unwrap();
        assert_eq!(err.constructor, "RangeError");
        assert_eq!(err.fields["message"], json!("bad"));
        assert_eq!(err.fields["code"], json!(7));
    }

    #[tokio::test]
    async fn test_panics_become_failures() {
        let exporter = exporter();
        let id = construct(&exporter).await;
        let result = exporter
            .dispatch(CallEnvelope::call("Pair", Some(id), "panicSync", vec![]))
            .await;
        assert_eq!(result.err.unwrap().fields["message"], json!("exploded"));

        let result = exporter
            .dispatch(CallEnvelope::call("Pair", Some(id), "panicLater", vec![]))
            .await;
        assert_eq!(result.err.unwrap().fields["message"], json!("exploded later"));

        // The instance survives its own panics.
        let a = exporter
            .dispatch(CallEnvelope::call("Pair", Some(id), "getASync", vec![]))
            .await;
        assert_eq!(a.data, json!("foo"));
    }

    #[tokio::test]
    async fn test_instances_outlive_unexport() {
        let exporter = exporter();
        let id = construct(&exporter).await;
        assert!(exporter.unexport_class("Pair"));
        assert!(exporter.surface("Pair").is_none());

        let a = exporter
            .dispatch(CallEnvelope::call("Pair", Some(id), "getASync", vec![]))
            .await;
        assert_eq!(a.data, json!("foo"));

        let result = exporter.dispatch(CallEnvelope::get("Pair", None, "version")).await;
        assert_eq!(error_type(&result), "NotExportedError");
    }
}
