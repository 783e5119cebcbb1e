//! Host objects standing for script functions.
//!
//! A [`FunctionHandle`] is created when a handle ID arrives from the script
//! side. It must be closed exactly once; closing removes the adopted entry
//! and tells the script side to drop its function. A handle that is dropped
//! without being closed logs a warning and is released anyway.
//!
//! The typed wrappers ([`ScriptFunction`], [`ScriptFunctionWithArg`],
//! [`ScriptFunctionWithPromise`], [`ScriptFunctionWithPromiseAndArg`]) can be
//! used directly as parameter types of exposed functions.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::conversion::{encode, FromValue, IntoValue};
use super::error::BridgeError;
use super::handle::HandleId;
use super::link::HostLink;
use super::promise::Promise;
use super::types::{Describe, HandleShape, TypeDesc};
use super::value::Value;

struct ProxyCore {
    id: HandleId,
    shape: HandleShape,
    arg: Option<TypeDesc>,
    result: Option<TypeDesc>,
    closed: AtomicBool,
    link: Arc<HostLink>,
}

impl Drop for ProxyCore {
    fn drop(&mut self) {
        if !*self.closed.get_mut() {
            tracing::warn!(
                target: "jsbridge::proxy",
                handle = self.id,
                "There is no more reference to function {} but close was never called",
                self.id
            );
            if let Err(err) = self.link.release_handle(self.id) {
                tracing::debug!(
                    target: "jsbridge::proxy",
                    handle = self.id,
                    "Failed to release dropped handle: {}",
                    err
                );
            }
        }
    }
}

/// Untyped proxy for a script function.
#[derive(Clone)]
pub struct FunctionHandle(Arc<ProxyCore>);

impl fmt::Debug for FunctionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionHandle")
            .field("id", &self.0.id)
            .field("shape", &self.0.shape)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PartialEq for FunctionHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl FunctionHandle {
    pub(crate) fn new(
        link: Arc<HostLink>,
        id: HandleId,
        shape: HandleShape,
        arg: Option<TypeDesc>,
        result: Option<TypeDesc>,
    ) -> Self {
        Self(Arc::new(ProxyCore {
            id,
            shape,
            arg,
            result,
            closed: AtomicBool::new(false),
            link,
        }))
    }

    pub fn id(&self) -> HandleId {
        self.0.id
    }

    pub fn shape(&self) -> HandleShape {
        self.0.shape
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), BridgeError> {
        if self.is_closed() {
            Err(BridgeError::UseAfterClose(self.0.id))
        } else {
            Ok(())
        }
    }

    fn encode_arg(&self, arg: Option<Value>) -> Result<Option<serde_json::Value>, BridgeError> {
        let fallback = TypeDesc::Json;
        let desc = self.0.arg.as_ref().unwrap_or(&fallback);
        arg.map(|value| encode(&value, desc)).transpose()
    }

    /// Call the script function, fire-and-forget.
    ///
    /// No lock is held while the command is sent, so the channel may call
    /// back into this handle.
    pub fn invoke(&self, arg: Option<Value>) -> Result<(), BridgeError> {
        self.ensure_open()?;
        let arg = self.encode_arg(arg)?;
        self.0.link.invoke_handle(self.0.id, arg)
    }

    /// Call a promise-returning script function. The result is decoded as the
    /// declared result type, or kept as JSON when none was declared.
    pub fn invoke_for_promise(&self, arg: Option<Value>) -> Result<Promise<Value>, BridgeError> {
        self.ensure_open()?;
        let arg = self.encode_arg(arg)?;
        let expected = self.0.result.clone().unwrap_or(TypeDesc::Json);
        self.0
            .link
            .invoke_handle_for_promise(self.0.id, arg, expected)
    }

    /// Release the script function. Only the first close succeeds.
    pub fn close(&self) -> Result<(), BridgeError> {
        if self.0.closed.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::HandleAlreadyClosed(self.0.id));
        }
        self.0.link.release_handle(self.0.id)
    }
}

fn expect_function(value: Value, shape: HandleShape) -> Result<FunctionHandle, BridgeError> {
    match value {
        Value::Function(handle) if handle.shape() == shape => Ok(handle),
        Value::Function(handle) => Err(BridgeError::mismatch(
            format!("{:?} function", shape),
            format!("{:?} function", handle.shape()),
        )),
        other => Err(BridgeError::mismatch(
            format!("{:?} function", shape),
            other.type_name(),
        )),
    }
}

macro_rules! proxy_common {
    ($name:ident $(<$($param:ident),+>)?) => {
        impl$(<$($param),+>)? $name$(<$($param),+>)? {
            pub fn handle(&self) -> &FunctionHandle {
                &self.handle
            }

            pub fn id(&self) -> HandleId {
                self.handle.id()
            }

            pub fn is_closed(&self) -> bool {
                self.handle.is_closed()
            }

            pub fn close(&self) -> Result<(), BridgeError> {
                self.handle.close()
            }
        }

        impl$(<$($param),+>)? Clone for $name$(<$($param),+>)? {
            fn clone(&self) -> Self {
                Self {
                    handle: self.handle.clone(),
                    _types: PhantomData,
                }
            }
        }

        impl$(<$($param),+>)? fmt::Debug for $name$(<$($param),+>)? {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.handle).finish()
            }
        }

        impl$(<$($param),+>)? IntoValue for $name$(<$($param),+>)?
        where
            Self: Describe,
        {
            fn into_value(self) -> Value {
                Value::Function(self.handle)
            }
        }
    };
}

/// Script function without argument or result.
pub struct ScriptFunction {
    handle: FunctionHandle,
    _types: PhantomData<()>,
}

proxy_common!(ScriptFunction);

impl ScriptFunction {
    pub fn call(&self) -> Result<(), BridgeError> {
        self.handle.invoke(None)
    }
}

impl Describe for ScriptFunction {
    fn describe() -> TypeDesc {
        TypeDesc::handle(HandleShape::Plain, None, None)
    }
}

impl FromValue for ScriptFunction {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        Ok(Self {
            handle: expect_function(value, HandleShape::Plain)?,
            _types: PhantomData,
        })
    }
}

/// Script function taking one argument.
pub struct ScriptFunctionWithArg<A> {
    handle: FunctionHandle,
    _types: PhantomData<fn(A)>,
}

proxy_common!(ScriptFunctionWithArg<A>);

impl<A: IntoValue> ScriptFunctionWithArg<A> {
    pub fn call(&self, arg: A) -> Result<(), BridgeError> {
        self.handle.invoke(Some(arg.into_value()))
    }
}

impl<A: Describe> Describe for ScriptFunctionWithArg<A> {
    fn describe() -> TypeDesc {
        TypeDesc::handle(HandleShape::WithArg, Some(A::describe()), None)
    }
}

impl<A: Describe> FromValue for ScriptFunctionWithArg<A> {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        Ok(Self {
            handle: expect_function(value, HandleShape::WithArg)?,
            _types: PhantomData,
        })
    }
}

/// Script function returning a promise.
pub struct ScriptFunctionWithPromise<R> {
    handle: FunctionHandle,
    _types: PhantomData<fn() -> R>,
}

proxy_common!(ScriptFunctionWithPromise<R>);

impl<R: FromValue + Clone + Send + 'static> ScriptFunctionWithPromise<R> {
    pub fn call(&self) -> Result<Promise<R>, BridgeError> {
        Ok(self.handle.invoke_for_promise(None)?.map(R::from_value))
    }
}

impl<R: Describe> Describe for ScriptFunctionWithPromise<R> {
    fn describe() -> TypeDesc {
        TypeDesc::handle(HandleShape::WithPromise, None, Some(R::describe()))
    }
}

impl<R: Describe> FromValue for ScriptFunctionWithPromise<R> {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        Ok(Self {
            handle: expect_function(value, HandleShape::WithPromise)?,
            _types: PhantomData,
        })
    }
}

/// Script function taking one argument and returning a promise.
pub struct ScriptFunctionWithPromiseAndArg<A, R> {
    handle: FunctionHandle,
    _types: PhantomData<fn(A) -> R>,
}

proxy_common!(ScriptFunctionWithPromiseAndArg<A, R>);

impl<A: IntoValue, R: FromValue + Clone + Send + 'static> ScriptFunctionWithPromiseAndArg<A, R> {
    pub fn call(&self, arg: A) -> Result<Promise<R>, BridgeError> {
        Ok(self
            .handle
            .invoke_for_promise(Some(arg.into_value()))?
            .map(R::from_value))
    }
}

impl<A: Describe, R: Describe> Describe for ScriptFunctionWithPromiseAndArg<A, R> {
    fn describe() -> TypeDesc {
        TypeDesc::handle(
            HandleShape::WithPromiseAndArg,
            Some(A::describe()),
            Some(R::describe()),
        )
    }
}

impl<A: Describe, R: Describe> FromValue for ScriptFunctionWithPromiseAndArg<A, R> {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        Ok(Self {
            handle: expect_function(value, HandleShape::WithPromiseAndArg)?,
            _types: PhantomData,
        })
    }
}
