//! The consumer side of the bridge.
//!
//! [`Importer::import_class`] fetches a class surface once and hands out a
//! cached [`ProxyClass`]. Proxies check every member name against the surface
//! before anything is sent, pick the call style the surface declares, and
//! forward the call through the [`CallRouter`].
//!
//! A [`RemoteObject`] owns nothing on the origin side: dropping it leaves the
//! origin instance alive. Only [`RemoteObject::destroy`] releases it.

use crate::codec::ErrorCodec;
use crate::error::{RpcError, RpcResult};
use crate::router::{CallRouter, PendingCall};
use classrpc_types::envelope::{CallEnvelope, ObjectId};
use classrpc_types::surface::{ClassSurface, MemberDecl, MemberKind};
use classrpc_wire::Transport;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of [`RemoteObject::invoke`]: sync members settle before returning.
#[derive(Debug)]
pub enum Invocation {
    /// Result of a sync-marked member.
    Ready(Value),
    /// Handle to the result of an asynchronous member.
    Pending(PendingCall),
}

impl Invocation {
    /// Wait for the value, whichever style the member used.
    pub async fn resolve(self) -> RpcResult<Value> {
        match self {
            Invocation::Ready(value) => Ok(value),
            Invocation::Pending(pending) => pending.await,
        }
    }
}

/// Consumer-side entry point; caches one proxy per class name.
pub struct Importer {
    router: Arc<CallRouter>,
    cache: DashMap<String, Arc<ProxyClass>>,
}

impl Importer {
    /// Importer over `transport` with the default error codec.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_codec(transport, Arc::new(ErrorCodec::new()))
    }

    pub fn with_codec(transport: Arc<dyn Transport>, codec: Arc<ErrorCodec>) -> Self {
        Self {
            router: Arc::new(CallRouter::new(transport, codec)),
            cache: DashMap::new(),
        }
    }

    /// The codec used to rebuild errors; register application error types here.
    pub fn codec(&self) -> &ErrorCodec {
        self.router.codec()
    }

    /// Proxy for an exported class. Repeated imports return the same `Arc`.
    pub fn import_class(&self, name: &str) -> RpcResult<Arc<ProxyClass>> {
        if let Some(proxy) = self.cache.get(name) {
            return Ok(Arc::clone(proxy.value()));
        }
        let surface = self.router.import(name)?;
        debug!(class = %name, members = surface.members.len(), "Imported class surface");
        let proxy = Arc::new(ProxyClass {
            surface,
            router: Arc::clone(&self.router),
        });
        let cached = self.cache.entry(name.to_string()).or_insert(proxy);
        Ok(Arc::clone(cached.value()))
    }

    /// Names exported on the origin side.
    pub fn list_classes(&self) -> RpcResult<Vec<String>> {
        self.router.list()
    }

    /// Remove a class on the origin side and forget its proxy.
    ///
    /// Proxies already handed out keep working against live instances.
    pub fn remove_class(&self, name: &str) -> RpcResult<bool> {
        self.cache.remove(name);
        let removed = self.router.remove(name)?;
        info!(class = %name, removed, "Removed class");
        Ok(removed)
    }
}

/// Local stand-in for an exported class.
pub struct ProxyClass {
    surface: ClassSurface,
    router: Arc<CallRouter>,
}

impl ProxyClass {
    pub fn name(&self) -> &str {
        &self.surface.class_name
    }

    pub fn surface(&self) -> &ClassSurface {
        &self.surface
    }

    /// Construct a new origin instance.
    pub fn construct(self: &Arc<Self>, args: Vec<Value>) -> RpcResult<RemoteObject> {
        let object_id = ObjectId::new();
        self.router
            .call_sync(CallEnvelope::construct(self.name(), object_id, args))?;
        Ok(RemoteObject {
            class: Arc::clone(self),
            object_id,
        })
    }

    fn member(&self, name: &str, kind: MemberKind, is_static: bool) -> RpcResult<&MemberDecl> {
        self.surface
            .member(name, is_static)
            .filter(|m| m.kind == kind)
            .ok_or_else(|| RpcError::UnknownMember {
                class_name: self.name().to_string(),
                member: name.to_string(),
            })
    }

    fn invoke_on(
        &self,
        object_id: Option<ObjectId>,
        method: &str,
        args: Vec<Value>,
    ) -> RpcResult<Invocation> {
        let decl = self.member(method, MemberKind::Method, object_id.is_none())?;
        let envelope = CallEnvelope::call(self.name(), object_id, method, args);
        if decl.sync {
            self.router.call_sync(envelope).map(Invocation::Ready)
        } else {
            self.router.call_async(envelope).map(Invocation::Pending)
        }
    }

    fn call_sync_on(
        &self,
        object_id: Option<ObjectId>,
        method: &str,
        args: Vec<Value>,
    ) -> RpcResult<Value> {
        let decl = self.member(method, MemberKind::Method, object_id.is_none())?;
        if !decl.sync {
            return Err(wrong_style(method, "asynchronously"));
        }
        self.router
            .call_sync(CallEnvelope::call(self.name(), object_id, method, args))
    }

    fn call_on(
        &self,
        object_id: Option<ObjectId>,
        method: &str,
        args: Vec<Value>,
    ) -> RpcResult<PendingCall> {
        let decl = self.member(method, MemberKind::Method, object_id.is_none())?;
        if decl.sync {
            return Err(wrong_style(method, "synchronously"));
        }
        self.router
            .call_async(CallEnvelope::call(self.name(), object_id, method, args))
    }

    fn get_on(&self, object_id: Option<ObjectId>, property: &str) -> RpcResult<Value> {
        self.member(property, MemberKind::Property, object_id.is_none())?;
        self.router
            .call_sync(CallEnvelope::get(self.name(), object_id, property))
    }

    fn set_on(&self, object_id: Option<ObjectId>, property: &str, value: Value) -> RpcResult<()> {
        self.member(property, MemberKind::Property, object_id.is_none())?;
        self.router
            .call_sync(CallEnvelope::set(self.name(), object_id, property, value))?;
        Ok(())
    }

    /// Call a static method in the style its surface declares.
    pub fn invoke_static(&self, method: &str, args: Vec<Value>) -> RpcResult<Invocation> {
        self.invoke_on(None, method, args)
    }

    /// Call a sync-marked static method.
    pub fn call_static_sync(&self, method: &str, args: Vec<Value>) -> RpcResult<Value> {
        self.call_sync_on(None, method, args)
    }

    /// Call an asynchronous static method.
    pub fn call_static(&self, method: &str, args: Vec<Value>) -> RpcResult<PendingCall> {
        self.call_on(None, method, args)
    }

    pub fn get_static(&self, property: &str) -> RpcResult<Value> {
        self.get_on(None, property)
    }

    pub fn set_static(&self, property: &str, value: Value) -> RpcResult<()> {
        self.set_on(None, property, value)
    }
}

impl std::fmt::Debug for ProxyClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyClass")
            .field("surface", &self.surface)
            .finish_non_exhaustive()
    }
}

fn wrong_style(member: &str, expected: &'static str) -> RpcError {
    RpcError::WrongCallStyle {
        member: member.to_string(),
        expected,
    }
}

/// Local handle to one origin instance.
#[derive(Debug, Clone)]
pub struct RemoteObject {
    class: Arc<ProxyClass>,
    object_id: ObjectId,
}

impl RemoteObject {
    pub fn id(&self) -> ObjectId {
        self.object_id
    }

    pub fn class(&self) -> &Arc<ProxyClass> {
        &self.class
    }

    /// Read an instance property.
    pub fn get(&self, property: &str) -> RpcResult<Value> {
        self.class.get_on(Some(self.object_id), property)
    }

    /// Assign an instance property.
    pub fn set(&self, property: &str, value: Value) -> RpcResult<()> {
        self.class.set_on(Some(self.object_id), property, value)
    }

    /// Call a method in the style its surface declares.
    pub fn invoke(&self, method: &str, args: Vec<Value>) -> RpcResult<Invocation> {
        self.class.invoke_on(Some(self.object_id), method, args)
    }

    /// Call a sync-marked method, blocking until it returns.
    pub fn call_sync(&self, method: &str, args: Vec<Value>) -> RpcResult<Value> {
        self.class.call_sync_on(Some(self.object_id), method, args)
    }

    /// Call an asynchronous method.
    pub fn call(&self, method: &str, args: Vec<Value>) -> RpcResult<PendingCall> {
        self.class.call_on(Some(self.object_id), method, args)
    }

    /// Release the origin instance. Later calls fail with `DestroyedObject`.
    pub fn destroy(&self) -> RpcResult<()> {
        self.class
            .router
            .call_sync(CallEnvelope::destroy(self.class.name(), self.object_id))?;
        Ok(())
    }
}
