//! Declarative class definitions and per-class dispatch tables.
//!
//! A class is described once with a [`ClassBuilder`]: a constructor plus the
//! members that may be called remotely. Exporting turns the resulting
//! [`ClassDef`] into an [`ExportedClass`], which holds the published
//! [`ClassSurface`] and a lookup table from member name to handler.
//!
//! Instances live behind `Arc<Mutex<T>>`. Synchronous handlers get `&mut T`
//! for the duration of the call; asynchronous handlers get the shared handle
//! so their futures can outlive the dispatch that started them.

use crate::codec::TYPE_ERROR;
use classrpc_types::envelope::AccessorOp;
use classrpc_types::error::{BridgeError, BridgeResult, ThrownError};
use classrpc_types::surface::{ClassSurface, MemberDecl, MemberKind, NamingRules};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// A live instance with its concrete type erased.
pub type AnyInstance = Arc<dyn Any + Send + Sync>;

type CtorFn = Box<dyn Fn(Args) -> Result<AnyInstance, ThrownError> + Send + Sync>;
type MethodFn = Arc<dyn Fn(&AnyInstance, Args) -> Outcome + Send + Sync>;
type StaticFn = Arc<dyn Fn(Args) -> Outcome + Send + Sync>;
type GetFn = Arc<dyn Fn(&AnyInstance) -> Result<Value, ThrownError> + Send + Sync>;
type SetFn = Arc<dyn Fn(&AnyInstance, Value) -> Result<(), ThrownError> + Send + Sync>;
type StaticGetFn = Arc<dyn Fn() -> Result<Value, ThrownError> + Send + Sync>;
type StaticSetFn = Arc<dyn Fn(Value) -> Result<(), ThrownError> + Send + Sync>;

/// Positional arguments of a call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Vec<Value>);

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw argument at `index`.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Decode the argument at `index`. A missing argument decodes from `null`,
    /// so `Option<_>` parameters may be omitted.
    pub fn arg<V: DeserializeOwned>(&self, index: usize) -> Result<V, ThrownError> {
        let value = self.0.get(index).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| {
            ThrownError::new(TYPE_ERROR, format!("argument {index}: {e}"))
        })
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// Result of invoking a member: settled now, or settling later.
pub enum Outcome {
    /// The member returned or threw synchronously.
    Ready(Result<Value, ThrownError>),
    /// The member returned a future.
    Deferred(BoxFuture<'static, Result<Value, ThrownError>>),
}

impl Outcome {
    /// Wait for the outcome to settle.
    pub async fn settle(self) -> Result<Value, ThrownError> {
        match self {
            Outcome::Ready(result) => result,
            Outcome::Deferred(fut) => fut.await,
        }
    }
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Outcome::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

fn to_json<R: Serialize>(value: R) -> Result<Value, ThrownError> {
    serde_json::to_value(value).map_err(|e| ThrownError::new(TYPE_ERROR, e.to_string()))
}

fn from_json<V: DeserializeOwned>(value: Value) -> Result<V, ThrownError> {
    serde_json::from_value(value).map_err(|e| ThrownError::new(TYPE_ERROR, e.to_string()))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn downcast<T: Send + 'static>(instance: &AnyInstance) -> Result<Arc<Mutex<T>>, ThrownError> {
    Arc::clone(instance)
        .downcast::<Mutex<T>>()
        .map_err(|_| ThrownError::new(TYPE_ERROR, "instance does not belong to this class"))
}

enum Member {
    Method(MethodFn),
    StaticMethod(StaticFn),
    Property { get: GetFn, set: Option<SetFn> },
    StaticProperty { get: StaticGetFn, set: Option<StaticSetFn> },
}

impl Member {
    fn kind(&self) -> MemberKind {
        match self {
            Member::Method(_) | Member::StaticMethod(_) => MemberKind::Method,
            Member::Property { .. } | Member::StaticProperty { .. } => MemberKind::Property,
        }
    }

    fn is_static(&self) -> bool {
        matches!(self, Member::StaticMethod(_) | Member::StaticProperty { .. })
    }
}

/// A class definition with its concrete types erased, ready to export.
pub struct ClassDef {
    ctor: CtorFn,
    members: Vec<(String, Member)>,
}

/// Typed builder for a class with instance type `T` and static state `S`.
pub struct ClassBuilder<T, S = ()> {
    ctor: CtorFn,
    statics: Arc<Mutex<S>>,
    members: Vec<(String, Member)>,
    _instance: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> ClassBuilder<T, ()> {
    /// Start a class without static state.
    pub fn new<F>(ctor: F) -> Self
    where
        F: Fn(Args) -> Result<T, ThrownError> + Send + Sync + 'static,
    {
        Self::with_statics(ctor, ())
    }
}

impl<T: Send + 'static, S: Send + 'static> ClassBuilder<T, S> {
    /// Start a class whose static members share `state`.
    pub fn with_statics<F>(ctor: F, state: S) -> Self
    where
        F: Fn(Args) -> Result<T, ThrownError> + Send + Sync + 'static,
    {
        let ctor: CtorFn = Box::new(move |args: Args| {
            let instance = ctor(args)?;
            Ok(Arc::new(Mutex::new(instance)) as AnyInstance)
        });
        Self {
            ctor,
            statics: Arc::new(Mutex::new(state)),
            members: Vec::new(),
            _instance: PhantomData,
        }
    }

    fn push(mut self, name: &str, member: Member) -> Self {
        self.members.push((name.to_string(), member));
        self
    }

    /// Instance method that completes before returning.
    pub fn method<F, R>(self, name: &str, f: F) -> Self
    where
        F: Fn(&mut T, Args) -> Result<R, ThrownError> + Send + Sync + 'static,
        R: Serialize,
    {
        let handler: MethodFn = Arc::new(move |instance: &AnyInstance, args: Args| {
            let result = downcast::<T>(instance).and_then(|shared| {
                let mut this = lock(&shared);
                f(&mut *this, args).and_then(to_json)
            });
            Outcome::Ready(result)
        });
        self.push(name, Member::Method(handler))
    }

    /// Instance method returning a future.
    pub fn async_method<F, Fut, R>(self, name: &str, f: F) -> Self
    where
        F: Fn(Arc<Mutex<T>>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ThrownError>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        let handler: MethodFn = Arc::new(move |instance: &AnyInstance, args: Args| {
            match downcast::<T>(instance) {
                Ok(shared) => {
                    let fut = f(shared, args);
                    Outcome::Deferred(async move { fut.await.and_then(to_json) }.boxed())
                }
                Err(e) => Outcome::Ready(Err(e)),
            }
        });
        self.push(name, Member::Method(handler))
    }

    /// Instance property with a getter and a setter.
    pub fn property<G, P, R, V>(self, name: &str, get: G, set: P) -> Self
    where
        G: Fn(&T) -> R + Send + Sync + 'static,
        P: Fn(&mut T, V) + Send + Sync + 'static,
        R: Serialize,
        V: DeserializeOwned,
    {
        let getter = Self::getter(get);
        let setter: SetFn = Arc::new(move |instance: &AnyInstance, value: Value| {
            let shared = downcast::<T>(instance)?;
            let value = from_json::<V>(value)?;
            set(&mut *lock(&shared), value);
            Ok(())
        });
        self.push(
            name,
            Member::Property {
                get: getter,
                set: Some(setter),
            },
        )
    }

    /// Instance property that cannot be assigned remotely.
    pub fn readonly<G, R>(self, name: &str, get: G) -> Self
    where
        G: Fn(&T) -> R + Send + Sync + 'static,
        R: Serialize,
    {
        let getter = Self::getter(get);
        self.push(name, Member::Property { get: getter, set: None })
    }

    fn getter<G, R>(get: G) -> GetFn
    where
        G: Fn(&T) -> R + Send + Sync + 'static,
        R: Serialize,
    {
        Arc::new(move |instance: &AnyInstance| {
            let shared = downcast::<T>(instance)?;
            let value = get(&*lock(&shared));
            to_json(value)
        })
    }

    /// Static method over the class state that completes before returning.
    pub fn static_method<F, R>(self, name: &str, f: F) -> Self
    where
        F: Fn(&mut S, Args) -> Result<R, ThrownError> + Send + Sync + 'static,
        R: Serialize,
    {
        let statics = Arc::clone(&self.statics);
        let handler: StaticFn = Arc::new(move |args: Args| {
            let mut state = lock(&statics);
            Outcome::Ready(f(&mut *state, args).and_then(to_json))
        });
        self.push(name, Member::StaticMethod(handler))
    }

    /// Static method returning a future.
    pub fn async_static_method<F, Fut, R>(self, name: &str, f: F) -> Self
    where
        F: Fn(Arc<Mutex<S>>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ThrownError>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        let statics = Arc::clone(&self.statics);
        let handler: StaticFn = Arc::new(move |args: Args| {
            let fut = f(Arc::clone(&statics), args);
            Outcome::Deferred(async move { fut.await.and_then(to_json) }.boxed())
        });
        self.push(name, Member::StaticMethod(handler))
    }

    /// Static property over the class state.
    pub fn static_property<G, P, R, V>(self, name: &str, get: G, set: P) -> Self
    where
        G: Fn(&S) -> R + Send + Sync + 'static,
        P: Fn(&mut S, V) + Send + Sync + 'static,
        R: Serialize,
        V: DeserializeOwned,
    {
        let read_state = Arc::clone(&self.statics);
        let getter: StaticGetFn = Arc::new(move || to_json(get(&*lock(&read_state))));
        let write_state = Arc::clone(&self.statics);
        let setter: StaticSetFn = Arc::new(move |value: Value| {
            let value = from_json::<V>(value)?;
            set(&mut *lock(&write_state), value);
            Ok(())
        });
        self.push(
            name,
            Member::StaticProperty {
                get: getter,
                set: Some(setter),
            },
        )
    }

    /// Finish the definition.
    pub fn build(self) -> ClassDef {
        ClassDef {
            ctor: self.ctor,
            members: self.members,
        }
    }
}

impl<T: Send + 'static, S: Send + 'static> From<ClassBuilder<T, S>> for ClassDef {
    fn from(builder: ClassBuilder<T, S>) -> Self {
        builder.build()
    }
}

/// An exported class: its surface plus the dispatch table behind it.
pub struct ExportedClass {
    surface: ClassSurface,
    ctor: CtorFn,
    members: HashMap<(String, bool), Member>,
}

impl ExportedClass {
    /// Compute the surface and dispatch table of `def` under `name`.
    ///
    /// Private and reserved members are left out of both. A repeated
    /// declaration keeps its first position on the surface and its last handler.
    pub fn new(name: &str, def: ClassDef, naming: &NamingRules) -> Self {
        let mut surface = ClassSurface::new(name);
        let mut members = HashMap::new();

        for (member_name, member) in def.members {
            if !naming.is_public(&member_name) {
                debug!(class = %name, member = %member_name, "Skipping non-public member");
                continue;
            }
            let kind = member.kind();
            let is_static = member.is_static();
            let decl = MemberDecl {
                name: member_name.clone(),
                kind,
                sync: kind == MemberKind::Property || naming.is_sync(&member_name),
                is_static,
            };
            match surface
                .members
                .iter_mut()
                .find(|m| m.name == member_name && m.is_static == is_static)
            {
                Some(existing) => *existing = decl,
                None => surface.members.push(decl),
            }
            members.insert((member_name, is_static), member);
        }

        Self {
            surface,
            ctor: def.ctor,
            members,
        }
    }

    /// The exported name.
    pub fn name(&self) -> &str {
        &self.surface.class_name
    }

    /// The published surface.
    pub fn surface(&self) -> &ClassSurface {
        &self.surface
    }

    /// Run the constructor.
    pub fn construct(&self, args: Args) -> Result<AnyInstance, ThrownError> {
        (self.ctor)(args)
    }

    fn member(&self, name: &str, is_static: bool) -> Option<&Member> {
        self.members.get(&(name.to_string(), is_static))
    }

    fn unknown(&self, what: &str, name: &str) -> BridgeError {
        BridgeError::BadRequest(format!("{} has no {what} '{name}'", self.name()))
    }

    /// Invoke a method on `instance`, or a static method when `instance` is `None`.
    pub fn invoke(
        &self,
        instance: Option<&AnyInstance>,
        name: &str,
        args: Args,
    ) -> BridgeResult<Outcome> {
        match (instance, self.member(name, instance.is_none())) {
            (Some(instance), Some(Member::Method(handler))) => Ok(handler(instance, args)),
            (None, Some(Member::StaticMethod(handler))) => Ok(handler(args)),
            (Some(_), _) => Err(self.unknown("method", name)),
            (None, _) => Err(self.unknown("static method", name)),
        }
    }

    /// Read or assign a property; static when `instance` is `None`.
    ///
    /// A successful assignment yields `true`.
    pub fn access(
        &self,
        instance: Option<&AnyInstance>,
        name: &str,
        op: AccessorOp,
    ) -> BridgeResult<Value> {
        let result = match (instance, self.member(name, instance.is_none()), op) {
            (Some(instance), Some(Member::Property { get, .. }), AccessorOp::Get) => get(instance),
            (Some(instance), Some(Member::Property { set, .. }), AccessorOp::Set(value)) => {
                match set {
                    Some(set) => set(instance, value).map(|_| Value::Bool(true)),
                    None => return Err(self.read_only(name)),
                }
            }
            (None, Some(Member::StaticProperty { get, .. }), AccessorOp::Get) => get(),
            (None, Some(Member::StaticProperty { set, .. }), AccessorOp::Set(value)) => match set {
                Some(set) => set(value).map(|_| Value::Bool(true)),
                None => return Err(self.read_only(name)),
            },
            (Some(_), _, _) => return Err(self.unknown("property", name)),
            (None, _, _) => return Err(self.unknown("static property", name)),
        };
        result.map_err(BridgeError::User)
    }

    fn read_only(&self, name: &str) -> BridgeError {
        BridgeError::BadRequest(format!("{}.{name} is read-only", self.name()))
    }
}

impl std::fmt::Debug for ExportedClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportedClass")
            .field("surface", &self.surface)
            .finish_non_exhaustive()
    }
}
