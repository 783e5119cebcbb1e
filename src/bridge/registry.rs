//! Interface registry: which functions the script side may call.
//!
//! An interface is a named set of exposed functions. Each function carries a
//! call type, parameter and return descriptors and an invoker. Functions can
//! be declared from typed closures (the descriptors come from the closure
//! signature) or assembled by hand with [`FunctionDescriptor::new`].

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::conversion::{FromValue, IntoValue};
use super::error::BridgeError;
use super::promise::Promise;
use super::types::TypeDesc;
use super::value::Value;

/// How a call is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallType {
    /// Script blocks until the answer comes back
    FullSync,
    /// Script gets a promise; the host still runs synchronously
    WebPromise,
    /// Host completes later through the promise binding
    #[default]
    FullPromise,
}

impl CallType {
    /// Name of the script-side helper that performs this kind of call.
    pub fn helper_name(&self) -> &'static str {
        match self {
            CallType::FullSync => "nativeCallFullSync",
            CallType::WebPromise => "nativeCallWebPromise",
            CallType::FullPromise => "nativeCallFullPromise",
        }
    }
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallType::FullSync => "FULL_SYNC",
            CallType::WebPromise => "WEB_PROMISE",
            CallType::FullPromise => "FULL_PROMISE",
        };
        f.write_str(name)
    }
}

/// What an invoked function produced.
pub enum Outcome {
    Value(Value),
    Void,
    Deferred(Promise<Value>),
}

/// Type-erased function body.
pub type Invoker = Arc<dyn Fn(Vec<Value>) -> Result<Outcome, BridgeError> + Send + Sync>;

/// Return types an exposed function may have.
pub trait IntoOutcome {
    fn describe_return() -> TypeDesc;
    fn into_outcome(self) -> Result<Outcome, BridgeError>;
}

impl<T: IntoValue> IntoOutcome for T {
    fn describe_return() -> TypeDesc {
        T::describe()
    }

    fn into_outcome(self) -> Result<Outcome, BridgeError> {
        if T::describe().is_unit() {
            Ok(Outcome::Void)
        } else {
            Ok(Outcome::Value(self.into_value()))
        }
    }
}

impl<T: IntoValue, E: fmt::Display> IntoOutcome for Result<T, E> {
    fn describe_return() -> TypeDesc {
        T::describe()
    }

    fn into_outcome(self) -> Result<Outcome, BridgeError> {
        match self {
            Ok(value) => value.into_outcome(),
            Err(err) => Err(BridgeError::invocation(&err)),
        }
    }
}

impl<T: IntoValue + Clone + Send + 'static> IntoOutcome for Promise<T> {
    fn describe_return() -> TypeDesc {
        TypeDesc::future(T::describe())
    }

    fn into_outcome(self) -> Result<Outcome, BridgeError> {
        Ok(Outcome::Deferred(self.map(|value| Ok(value.into_value()))))
    }
}

/// Closures usable as exposed functions.
///
/// Implemented for `Fn(A1, .., An) -> R` up to six parameters, where every
/// parameter is [`FromValue`] and `R` is [`IntoOutcome`].
pub trait Handler<Args>: Send + Sync + 'static {
    fn params() -> Vec<TypeDesc>;
    fn returns() -> TypeDesc;
    fn call(&self, args: Vec<Value>) -> Result<Outcome, BridgeError>;
}

macro_rules! impl_handler {
    ($($arg:ident),*) => {
        impl<F, R, $($arg,)*> Handler<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            R: IntoOutcome,
            $($arg: FromValue,)*
        {
            fn params() -> Vec<TypeDesc> {
                vec![$($arg::describe()),*]
            }

            fn returns() -> TypeDesc {
                R::describe_return()
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn call(&self, args: Vec<Value>) -> Result<Outcome, BridgeError> {
                let mut args = args.into_iter();
                $(let $arg = $arg::from_value(args.next().unwrap_or(Value::Null))?;)*
                (self)($($arg),*).into_outcome()
            }
        }
    };
}

impl_handler!();
impl_handler!(A1);
impl_handler!(A1, A2);
impl_handler!(A1, A2, A3);
impl_handler!(A1, A2, A3, A4);
impl_handler!(A1, A2, A3, A4, A5);
impl_handler!(A1, A2, A3, A4, A5, A6);

/// One exposed function.
#[derive(Clone)]
pub struct FunctionDescriptor {
    pub name: String,
    pub call_type: CallType,
    pub params: Vec<TypeDesc>,
    pub returns: TypeDesc,
    invoker: Invoker,
}

impl fmt::Debug for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDescriptor")
            .field("name", &self.name)
            .field("call_type", &self.call_type)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .finish()
    }
}

impl FunctionDescriptor {
    pub fn new<F>(
        name: impl Into<String>,
        call_type: CallType,
        params: Vec<TypeDesc>,
        returns: TypeDesc,
        invoker: F,
    ) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Outcome, BridgeError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            call_type,
            params,
            returns,
            invoker: Arc::new(invoker),
        }
    }

    /// Build a descriptor from a typed closure.
    pub fn from_handler<Args, H>(name: impl Into<String>, call_type: CallType, handler: H) -> Self
    where
        H: Handler<Args>,
    {
        Self::new(name, call_type, H::params(), H::returns(), move |args| {
            handler.call(args)
        })
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Run the function. Panics are caught and reported as invocation faults.
    pub fn invoke(&self, args: Vec<Value>) -> Result<Outcome, BridgeError> {
        catch_unwind(AssertUnwindSafe(|| (self.invoker)(args)))
            .unwrap_or_else(|payload| Err(BridgeError::from_panic(payload)))
    }

    /// Type of the value delivered to the script side.
    pub fn result_type(&self) -> &TypeDesc {
        match self.returns.unprojected() {
            TypeDesc::Future(inner) => inner,
            other => other,
        }
    }

    fn validate(&self) -> Result<(), BridgeError> {
        for ty in self.params.iter().chain(std::iter::once(&self.returns)) {
            if let Some(variance) = ty.find_variance() {
                return Err(BridgeError::UnsupportedVariance {
                    context: self.name.clone(),
                    variance: variance.to_string(),
                });
            }
        }

        let returns_future = self.returns.is_future();
        let valid = match self.call_type {
            CallType::FullPromise => returns_future,
            CallType::FullSync | CallType::WebPromise => !returns_future,
        };
        if !valid {
            return Err(BridgeError::InvalidReturnType {
                function: self.name.clone(),
                call_type: self.call_type.to_string(),
                found: self.returns.to_string(),
            });
        }
        Ok(())
    }

    pub fn manifest(&self) -> FunctionManifest {
        FunctionManifest {
            name: self.name.clone(),
            call_type: self.call_type,
            arity: self.arity(),
        }
    }
}

/// Declaration of an interface before validation.
#[derive(Debug, Clone)]
pub struct InterfaceDef {
    name: String,
    functions: Vec<FunctionDescriptor>,
}

impl InterfaceDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Expose a typed closure.
    pub fn function<Args, H>(mut self, call_type: CallType, name: impl Into<String>, handler: H) -> Self
    where
        H: Handler<Args>,
    {
        self.functions
            .push(FunctionDescriptor::from_handler(name, call_type, handler));
        self
    }

    /// Expose a hand-built descriptor.
    pub fn descriptor(mut self, function: FunctionDescriptor) -> Self {
        self.functions.push(function);
        self
    }

    /// Pull in every function of a shared definition.
    pub fn mixin(mut self, other: InterfaceDef) -> Self {
        self.functions.extend(other.functions);
        self
    }
}

/// Validated interface.
#[derive(Debug)]
pub struct InterfaceData {
    pub name: String,
    functions: IndexMap<String, Arc<FunctionDescriptor>>,
}

impl InterfaceData {
    fn build(def: InterfaceDef) -> Result<Self, BridgeError> {
        let mut duplicates: Vec<String> = Vec::new();
        let mut functions = IndexMap::with_capacity(def.functions.len());
        for function in def.functions {
            function.validate()?;
            let name = function.name.clone();
            if functions.insert(name.clone(), Arc::new(function)).is_some()
                && !duplicates.contains(&name)
            {
                duplicates.push(name);
            }
        }
        if !duplicates.is_empty() {
            duplicates.sort();
            return Err(BridgeError::DuplicateFunctionName(duplicates));
        }
        Ok(Self {
            name: def.name,
            functions,
        })
    }

    pub fn function(&self, name: &str) -> Option<&Arc<FunctionDescriptor>> {
        self.functions.get(name)
    }

    pub fn functions(&self) -> impl Iterator<Item = &Arc<FunctionDescriptor>> {
        self.functions.values()
    }

    pub fn manifest(&self) -> InterfaceManifest {
        InterfaceManifest {
            name: self.name.clone(),
            functions: self.functions.values().map(|f| f.manifest()).collect(),
        }
    }
}

/// What the script side needs to know about an exposed function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionManifest {
    pub name: String,
    pub call_type: CallType,
    pub arity: usize,
}

/// Published form of an interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceManifest {
    pub name: String,
    pub functions: Vec<FunctionManifest>,
}

impl InterfaceManifest {
    pub fn function(&self, name: &str) -> Option<&FunctionManifest> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// Registry of interfaces, keyed by name.
#[derive(Default)]
pub struct InterfaceRegistry {
    interfaces: RwLock<IndexMap<String, Arc<InterfaceData>>>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store an interface, replacing any previous one of the
    /// same name.
    pub fn add(&self, def: InterfaceDef) -> Result<Arc<InterfaceData>, BridgeError> {
        let data = Arc::new(InterfaceData::build(def)?);
        let replaced = self
            .interfaces
            .write()
            .insert(data.name.clone(), Arc::clone(&data))
            .is_some();
        tracing::debug!(
            target: "jsbridge::registry",
            interface = %data.name,
            functions = data.functions.len(),
            replaced,
            "Registered interface"
        );
        Ok(data)
    }

    pub fn get(&self, name: &str) -> Result<Arc<InterfaceData>, BridgeError> {
        self.interfaces
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| BridgeError::NoSuchInterface(name.to_string()))
    }

    /// Find a function by interface and function name.
    pub fn resolve(
        &self,
        interface: &str,
        function: &str,
    ) -> Result<Arc<FunctionDescriptor>, BridgeError> {
        self.get(interface)?
            .function(function)
            .cloned()
            .ok_or_else(|| BridgeError::NoSuchFunction {
                interface: interface.to_string(),
                function: function.to_string(),
            })
    }

    pub fn manifest(&self) -> Vec<InterfaceManifest> {
        self.interfaces
            .read()
            .values()
            .map(|data| data.manifest())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.interfaces.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
