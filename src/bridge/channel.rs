//! Outbound commands to the script side and the collaborator traits around
//! them.
//!
//! Every host-to-script interaction is one of the [`ScriptCommand`] variants,
//! delivered fire-and-forget through a [`ScriptChannel`]. Engines that can
//! only evaluate source text are served by [`JsChannel`], which renders each
//! command as a script.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::fmt::Write as _;

use super::correlation::CorrelationId;
use super::error::BridgeError;
use super::handle::HandleId;
use super::registry::InterfaceManifest;

/// Host-to-script command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ScriptCommand {
    /// Install the bridge and publish the interface table.
    Initialize {
        bridge_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bootstrap: Option<String>,
        interfaces: Vec<InterfaceManifest>,
    },
    /// Replace the interface table of an initialized bridge.
    UpdateInterfaces { interfaces: Vec<InterfaceManifest> },
    InvokeHandle {
        handle: HandleId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arg: Option<Json>,
    },
    /// Invoke a promise-returning function and report its settlement through
    /// `complete_correlation`.
    InvokeHandleForPromise {
        handle: HandleId,
        correlation: CorrelationId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arg: Option<Json>,
    },
    ReleaseHandle { handle: HandleId },
}

/// Delivers commands to the script side.
pub trait ScriptChannel: Send + Sync {
    fn send(&self, command: ScriptCommand) -> Result<(), BridgeError>;
}

/// Script engine that can evaluate source text. Results are not observed.
pub trait ScriptEvaluator: Send + Sync {
    fn evaluate_script(&self, script: String);
}

/// Source of the bootstrap script installed by `init`.
pub trait BootstrapLoader: Send + Sync {
    /// Failures should be reported as [`BridgeError::Bootstrap`].
    fn load_bootstrap_script(&self) -> Result<String, BridgeError>;
}

/// Entry points the script side calls on the host.
pub trait HostEndpoint: Send + Sync {
    /// Handle a serialized Call and return the serialized Answer.
    fn dispatch(&self, call: &str) -> String;

    /// Deliver the serialized Answer of a pending host-to-script call.
    fn complete_correlation(&self, correlation: CorrelationId, answer: &str)
        -> Result<(), BridgeError>;

    /// The script side finished initializing.
    fn notify_ready(&self);
}

/// Renders commands as script text for a [`ScriptEvaluator`].
///
/// The rendered scripts expect the bootstrap to define `initBridge` and the
/// `invokeHandle`, `invokeHandleForPromise` and `releaseHandle` entry points
/// on the bridge object.
pub struct JsChannel<E> {
    bridge_name: String,
    evaluator: E,
}

impl<E: ScriptEvaluator> JsChannel<E> {
    /// `bridge_name` must match the configured bridge name.
    pub fn new(bridge_name: impl Into<String>, evaluator: E) -> Self {
        Self {
            bridge_name: bridge_name.into(),
            evaluator,
        }
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    pub fn render(&self, command: &ScriptCommand) -> Result<String, BridgeError> {
        let name = &self.bridge_name;
        let script = match command {
            ScriptCommand::Initialize {
                bootstrap,
                interfaces,
                ..
            } => {
                let table = self.interface_table(interfaces)?;
                match bootstrap {
                    Some(bootstrap) => format!("{};initBridge({},{});", bootstrap, name, table),
                    None => format!("initBridge({},{});", name, table),
                }
            }
            ScriptCommand::UpdateInterfaces { interfaces } => {
                let table = self.interface_table(interfaces)?;
                format!("if ({name}.initialized) {{{name}.interfaces={table}}}")
            }
            ScriptCommand::InvokeHandle { handle, arg } => match arg {
                Some(arg) => format!("{}.invokeHandle({},{})", name, handle, json_text(arg)?),
                None => format!("{}.invokeHandle({})", name, handle),
            },
            ScriptCommand::InvokeHandleForPromise {
                handle,
                correlation,
                arg,
            } => match arg {
                Some(arg) => format!(
                    "{}.invokeHandleForPromise({},{},{})",
                    name,
                    handle,
                    correlation,
                    json_text(arg)?
                ),
                None => format!("{}.invokeHandleForPromise({},{})", name, handle, correlation),
            },
            ScriptCommand::ReleaseHandle { handle } => {
                format!("{}.releaseHandle({})", name, handle)
            }
        };
        Ok(script)
    }

    /// One forwarding function per exposed function, calling the dispatch
    /// helper that matches its call type.
    fn interface_table(&self, interfaces: &[InterfaceManifest]) -> Result<String, BridgeError> {
        let mut table = String::from("{");
        for (i, interface) in interfaces.iter().enumerate() {
            if i > 0 {
                table.push(',');
            }
            let interface_name = json_text(&interface.name)?;
            let _ = write!(table, "{}:{{", interface_name);
            for (j, function) in interface.functions.iter().enumerate() {
                if j > 0 {
                    table.push(',');
                }
                let args = (0..function.arity)
                    .map(|n| format!("a{}", n))
                    .collect::<Vec<_>>()
                    .join(",");
                let _ = write!(
                    table,
                    "{fname}:({args})=>{{const call={{\"interfaceName\":{iname},\"functionName\":{fname},\"arguments\":[{args}]}};return {bridge}.{helper}(call);}}",
                    fname = json_text(&function.name)?,
                    iname = interface_name,
                    args = args,
                    bridge = self.bridge_name,
                    helper = function.call_type.helper_name(),
                );
            }
            table.push('}');
        }
        table.push('}');
        Ok(table)
    }
}

fn json_text<T: Serialize + ?Sized>(value: &T) -> Result<String, BridgeError> {
    serde_json::to_string(value).map_err(|e| BridgeError::MalformedMessage(e.to_string()))
}

impl<E: ScriptEvaluator> ScriptChannel for JsChannel<E> {
    fn send(&self, command: ScriptCommand) -> Result<(), BridgeError> {
        let script = self.render(&command)?;
        tracing::trace!(target: "jsbridge::channel", "Evaluating {}", script);
        self.evaluator.evaluate_script(script);
        Ok(())
    }
}

/// Channel that records every command, for tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingChannel {
    sent: parking_lot::Mutex<Vec<ScriptCommand>>,
    closed: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl RecordingChannel {
    pub(crate) fn sent(&self) -> Vec<ScriptCommand> {
        self.sent.lock().clone()
    }

    pub(crate) fn last(&self) -> Option<ScriptCommand> {
        self.sent.lock().last().cloned()
    }

    /// Make every later send fail with `ChannelClosed`.
    pub(crate) fn close(&self) {
        self.closed
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl ScriptChannel for RecordingChannel {
    fn send(&self, command: ScriptCommand) -> Result<(), BridgeError> {
        if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(BridgeError::ChannelClosed);
        }
        self.sent.lock().push(command);
        Ok(())
    }
}
