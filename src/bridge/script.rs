//! Script side of the protocol, implemented in Rust.
//!
//! [`ScriptRuntime`] plays the part the bootstrap script plays inside a real
//! engine: it owns the table of script functions handed to the host, performs
//! the three kinds of native call, runs host commands on its own event loop
//! thread and turns host faults into [`NativeError`]s. It is a
//! [`ScriptChannel`], so a [`Bridge`](super::host::Bridge) can talk to it
//! directly.
//!
//! [`NativeError`]: super::error::NativeError

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde_json::Value as Json;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use super::channel::{HostEndpoint, ScriptChannel, ScriptCommand};
use super::correlation::CorrelationId;
use super::error::BridgeError;
use super::event_loop::EventLoop;
use super::handle::{HandleId, HandleTable};
use super::promise::Promise;
use super::registry::{CallType, InterfaceManifest};
use super::wire::{Answer, Call};

/// Name of the script runtime's loop thread.
pub const SCRIPT_THREAD_NAME: &str = "jsbridge-script";

/// A function living on the script side.
pub type ScriptFn = Arc<dyn Fn(Option<Json>) -> Result<ScriptOutput, BridgeError> + Send + Sync>;

/// What a script function or native call produced.
#[derive(Debug, Clone)]
pub enum ScriptOutput {
    Undefined,
    Value(Json),
    Promise(Promise<Json>),
}

impl ScriptOutput {
    /// View the output as a promise. `Undefined` resolves to null.
    pub fn into_promise(self) -> Promise<Json> {
        match self {
            ScriptOutput::Undefined => Promise::resolved(Json::Null),
            ScriptOutput::Value(value) => Promise::resolved(value),
            ScriptOutput::Promise(promise) => promise,
        }
    }
}

/// Argument of a native call; functions are passed by handle.
pub enum ScriptArg {
    Value(Json),
    Function(ScriptFn),
}

impl ScriptArg {
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(Option<Json>) -> Result<ScriptOutput, BridgeError> + Send + Sync + 'static,
    {
        ScriptArg::Function(Arc::new(f))
    }
}

impl From<Json> for ScriptArg {
    fn from(value: Json) -> Self {
        ScriptArg::Value(value)
    }
}

#[derive(Default)]
struct Session {
    bridge_name: Option<String>,
    interfaces: Vec<InterfaceManifest>,
    waiters: Vec<Promise<()>>,
}

struct ScriptState {
    functions: HandleTable<ScriptFn>,
    host: OnceCell<Weak<dyn HostEndpoint>>,
    session: Mutex<Session>,
}

impl ScriptState {
    fn host(&self) -> Result<Arc<dyn HostEndpoint>, BridgeError> {
        self.host
            .get()
            .and_then(Weak::upgrade)
            .ok_or(BridgeError::ChannelClosed)
    }

    fn native_call_full_sync(&self, call: &Call) -> Result<Option<Json>, BridgeError> {
        let host = self.host()?;
        let answer = Answer::from_json(&host.dispatch(&call.to_json()?))?;
        answer.into_native_result()
    }

    fn invoke_function(&self, handle: HandleId, arg: Option<Json>) -> Result<ScriptOutput, BridgeError> {
        let function = self.functions.get(handle)?;
        catch_unwind(AssertUnwindSafe(|| function(arg)))
            .unwrap_or_else(|payload| Err(BridgeError::from_panic(payload)))
    }

    fn complete(&self, correlation: CorrelationId, answer: Answer) {
        let delivered = self
            .host()
            .and_then(|host| host.complete_correlation(correlation, &answer.to_json()));
        if let Err(err) = delivered {
            tracing::warn!(
                target: "jsbridge::script",
                correlation,
                "Failed to complete host call: {}",
                err
            );
        }
    }

    fn handle_command(self: &Arc<Self>, command: ScriptCommand) {
        match command {
            ScriptCommand::Initialize {
                bridge_name,
                interfaces,
                ..
            } => self.initialize(bridge_name, interfaces),
            ScriptCommand::UpdateInterfaces { interfaces } => {
                let mut session = self.session.lock();
                if session.bridge_name.is_some() {
                    session.interfaces = interfaces;
                }
            }
            ScriptCommand::InvokeHandle { handle, arg } => {
                if let Err(err) = self.invoke_function(handle, arg) {
                    tracing::warn!(
                        target: "jsbridge::script",
                        handle,
                        "Error in script function: {}",
                        err
                    );
                }
            }
            ScriptCommand::InvokeHandleForPromise {
                handle,
                correlation,
                arg,
            } => match self.invoke_function(handle, arg) {
                Ok(ScriptOutput::Undefined) => self.complete(correlation, Answer::void()),
                Ok(ScriptOutput::Value(value)) => self.complete(correlation, Answer::value(value)),
                Ok(ScriptOutput::Promise(promise)) => {
                    let on_success = Arc::clone(self);
                    let on_failure = Arc::clone(self);
                    promise.on_success(move |value| {
                        on_success.complete(correlation, Answer::value(value))
                    });
                    promise.on_failure(move |err| {
                        on_failure.complete(correlation, Answer::error(&err))
                    });
                }
                Err(err) => self.complete(correlation, Answer::error(&err)),
            },
            ScriptCommand::ReleaseHandle { handle } => {
                if self.functions.release(handle).is_err() {
                    tracing::debug!(
                        target: "jsbridge::script",
                        handle,
                        "Release of unknown function"
                    );
                }
            }
        }
    }

    fn initialize(&self, bridge_name: String, interfaces: Vec<InterfaceManifest>) {
        let waiters = {
            let mut session = self.session.lock();
            if session.bridge_name.is_some() {
                tracing::debug!(target: "jsbridge::script", "Bridge is already initialized");
                return;
            }
            session.bridge_name = Some(bridge_name);
            session.interfaces = interfaces;
            std::mem::take(&mut session.waiters)
        };

        match self.host() {
            Ok(host) => host.notify_ready(),
            Err(_) => tracing::warn!(
                target: "jsbridge::script",
                "Initialized without an attached host"
            ),
        }
        for waiter in waiters {
            let _ = waiter.resolve(());
        }
    }
}

/// In-process script peer running on its own event loop.
pub struct ScriptRuntime {
    state: Arc<ScriptState>,
    event_loop: EventLoop,
}

impl ScriptRuntime {
    pub fn new() -> Result<Arc<Self>, BridgeError> {
        Ok(Arc::new(Self {
            state: Arc::new(ScriptState {
                functions: HandleTable::new(),
                host: OnceCell::new(),
                session: Mutex::new(Session::default()),
            }),
            event_loop: EventLoop::spawn(SCRIPT_THREAD_NAME)?,
        }))
    }

    /// Connect the host the runtime calls into. Only a weak reference is
    /// kept, and a runtime can be attached once.
    pub fn attach<H: HostEndpoint + 'static>(&self, host: &Arc<H>) -> Result<(), BridgeError> {
        let weak: Weak<H> = Arc::downgrade(host);
        let weak: Weak<dyn HostEndpoint> = weak;
        self.state
            .host
            .set(weak)
            .map_err(|_| BridgeError::Bootstrap("Script runtime is already attached".to_string()))
    }

    pub fn is_initialized(&self) -> bool {
        self.state.session.lock().bridge_name.is_some()
    }

    pub fn bridge_name(&self) -> Option<String> {
        self.state.session.lock().bridge_name.clone()
    }

    pub fn interfaces(&self) -> Vec<InterfaceManifest> {
        self.state.session.lock().interfaces.clone()
    }

    /// Promise resolved once the host's initialize command has run.
    pub fn ready(&self) -> Promise<()> {
        let mut session = self.state.session.lock();
        if session.bridge_name.is_some() {
            return Promise::resolved(());
        }
        let promise = Promise::new();
        session.waiters.push(promise.clone());
        promise
    }

    /// Keep a function on the script side and return its handle.
    pub fn register_function<F>(&self, function: F) -> HandleId
    where
        F: Fn(Option<Json>) -> Result<ScriptOutput, BridgeError> + Send + Sync + 'static,
    {
        self.state.functions.allocate(Arc::new(function))
    }

    /// Handles of functions the host has not released.
    pub fn outstanding_functions(&self) -> Vec<HandleId> {
        self.state.functions.ids()
    }

    /// Call an exposed host function through the helper its call type
    /// selects. Full-sync faults are returned directly; the promise call
    /// types report them through the promise.
    pub fn call(
        &self,
        interface: &str,
        function: &str,
        args: Vec<ScriptArg>,
    ) -> Result<ScriptOutput, BridgeError> {
        let call_type = {
            let session = self.state.session.lock();
            let manifest = session
                .interfaces
                .iter()
                .find(|i| i.name == interface)
                .ok_or_else(|| BridgeError::NoSuchInterface(interface.to_string()))?;
            manifest
                .function(function)
                .ok_or_else(|| BridgeError::NoSuchFunction {
                    interface: interface.to_string(),
                    function: function.to_string(),
                })?
                .call_type
        };

        let arguments = args
            .into_iter()
            .map(|arg| match arg {
                ScriptArg::Value(value) => value,
                ScriptArg::Function(f) => Json::from(self.state.functions.allocate(f)),
            })
            .collect();
        let call = Call::new(interface, function, arguments);

        match call_type {
            CallType::FullSync => self
                .native_call_full_sync(call)
                .map(|value| value.map_or(ScriptOutput::Undefined, ScriptOutput::Value)),
            CallType::WebPromise => Ok(ScriptOutput::Promise(self.native_call_web_promise(call))),
            CallType::FullPromise => Ok(ScriptOutput::Promise(self.native_call_full_promise(call))),
        }
    }

    /// Blocking call on the current thread.
    pub fn native_call_full_sync(&self, call: Call) -> Result<Option<Json>, BridgeError> {
        self.state.native_call_full_sync(&call)
    }

    /// Blocking call performed on the loop thread.
    pub fn native_call_web_promise(&self, call: Call) -> Promise<Json> {
        let promise = Promise::new();
        let settle = promise.clone();
        let state = Arc::clone(&self.state);
        self.event_loop.execute(move || {
            let result = state
                .native_call_full_sync(&call)
                .map(|value| value.unwrap_or(Json::Null));
            let _ = settle.settle(result);
        });
        promise
    }

    /// Call that the host completes later through a bound completion
    /// function.
    pub fn native_call_full_promise(&self, call: Call) -> Promise<Json> {
        let promise = Promise::new();
        let settle = promise.clone();
        let binding = self
            .state
            .functions
            .allocate(Arc::new(move |answer: Option<Json>| {
                let result = answer
                    .ok_or_else(|| {
                        BridgeError::MalformedMessage("Completion without an answer".to_string())
                    })
                    .and_then(|json| {
                        serde_json::from_value::<Answer>(json)
                            .map_err(|e| BridgeError::MalformedMessage(e.to_string()))
                    })
                    .and_then(Answer::into_native_result)
                    .map(|value| value.unwrap_or(Json::Null));
                if settle.settle(result).is_err() {
                    tracing::debug!(target: "jsbridge::script", "Completion after settlement");
                }
                Ok(ScriptOutput::Undefined)
            }));

        let state = Arc::clone(&self.state);
        let reject = promise.clone();
        self.event_loop.execute(move || {
            let call = call.with_promise_binding(binding);
            if let Err(err) = state.native_call_full_sync(&call) {
                let _ = state.functions.release(binding);
                let _ = reject.reject(err);
            }
        });
        promise
    }

    /// Wait until every job queued so far has run.
    #[cfg(test)]
    pub(crate) fn flush(&self) {
        let (tx, rx) = std::sync::mpsc::channel();
        self.event_loop.execute(move || {
            let _ = tx.send(());
        });
        let _ = rx.recv_timeout(std::time::Duration::from_secs(5));
    }
}

impl ScriptChannel for ScriptRuntime {
    fn send(&self, command: ScriptCommand) -> Result<(), BridgeError> {
        let state = Arc::clone(&self.state);
        self.event_loop.execute(move || state.handle_command(command));
        Ok(())
    }
}

impl Drop for ScriptRuntime {
    fn drop(&mut self) {
        let leaked = self.state.functions.len();
        if leaked > 0 {
            tracing::warn!(
                target: "jsbridge::script",
                "{} function handles not released before shutdown",
                leaked
            );
        }
    }
}
