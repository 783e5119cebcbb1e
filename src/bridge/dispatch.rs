//! Dispatch of script-to-host calls.
//!
//! `dispatch` never fails: every fault, including a panic in the invoked
//! function, is turned into an error Answer.

use std::sync::Arc;

use super::conversion::{encode, Decoder, HandleAdopter};
use super::error::BridgeError;
use super::handle::HandleId;
use super::link::HostLink;
use super::promise::Promise;
use super::proxy::FunctionHandle;
use super::registry::{CallType, FunctionDescriptor, InterfaceRegistry, Outcome};
use super::types::{HandleShape, TypeDesc};
use super::value::Value;
use super::wire::{Answer, Call};

/// Handle one serialized Call.
pub(crate) fn dispatch(registry: &InterfaceRegistry, link: &Arc<HostLink>, text: &str) -> Answer {
    match dispatch_call(registry, link, text) {
        Ok(answer) => answer,
        Err(err) => {
            tracing::debug!(target: "jsbridge::dispatch", kind = err.kind(), "Call failed: {}", err);
            Answer::error(&err)
        }
    }
}

fn dispatch_call(
    registry: &InterfaceRegistry,
    link: &Arc<HostLink>,
    text: &str,
) -> Result<Answer, BridgeError> {
    let call = Call::from_json(text)?;
    let function = registry.resolve(&call.interface_name, &call.function_name)?;
    tracing::trace!(
        target: "jsbridge::dispatch",
        function = %call.qualified_name(),
        call_type = %function.call_type,
        "Dispatching"
    );

    if call.arguments.len() != function.arity() {
        return Err(BridgeError::ArgumentCountMismatch {
            expected: function.arity(),
            got: call.arguments.len(),
        });
    }

    let binding = match function.call_type {
        CallType::FullPromise => Some(
            call.promise_function_binding
                .ok_or_else(|| BridgeError::MissingPromiseBinding(call.qualified_name()))?,
        ),
        CallType::FullSync | CallType::WebPromise => None,
    };

    let args = decode_arguments(link, &function, &call)?;
    let outcome = function.invoke(args)?;

    match (binding, outcome) {
        (Some(binding), outcome) => {
            let promise = match outcome {
                Outcome::Deferred(promise) => promise,
                Outcome::Value(value) => Promise::resolved(value),
                Outcome::Void => Promise::resolved(Value::Null),
            };
            complete_through_binding(link, binding, function.result_type().clone(), promise)?;
            Ok(Answer::void())
        }
        (None, Outcome::Value(_)) | (None, Outcome::Void) if function.result_type().is_unit() => {
            Ok(Answer::void())
        }
        (None, Outcome::Value(value)) => Ok(Answer::value(encode(&value, function.result_type())?)),
        (None, Outcome::Void) => Ok(Answer::void()),
        (None, Outcome::Deferred(promise)) => {
            let err = BridgeError::InvalidReturnType {
                function: function.name.clone(),
                call_type: function.call_type.to_string(),
                found: function.returns.to_string(),
            };
            let _ = promise.reject(err.clone());
            Err(err)
        }
    }
}

fn decode_arguments(
    link: &Arc<HostLink>,
    function: &FunctionDescriptor,
    call: &Call,
) -> Result<Vec<Value>, BridgeError> {
    let mut decoder = Decoder::new(link.limits()).with_adopter(link);
    let mut args = Vec::with_capacity(call.arguments.len());
    for (json, desc) in call.arguments.iter().zip(&function.params) {
        match decoder.decode(json, desc) {
            Ok(value) => args.push(value),
            Err(err) => {
                drop(args);
                decoder.release_adopted();
                return Err(err);
            }
        }
    }
    Ok(args)
}

/// Deliver the settlement of `promise` to the script side through the
/// with-argument function bound to the call, then release that function.
fn complete_through_binding(
    link: &Arc<HostLink>,
    binding: HandleId,
    result_type: TypeDesc,
    promise: Promise<Value>,
) -> Result<(), BridgeError> {
    let callback = link.adopt_handle(binding, HandleShape::WithArg, Some(TypeDesc::Json), None)?;
    let on_failure = callback.clone();

    promise.on_success(move |value| {
        let answer = if result_type.is_unit() {
            Answer::void()
        } else {
            match encode(&value, &result_type) {
                Ok(json) => Answer::value(json),
                Err(err) => Answer::error(&err),
            }
        };
        deliver(&callback, answer);
    });
    promise.on_failure(move |err| deliver(&on_failure, Answer::error(&err)));
    Ok(())
}

fn deliver(callback: &FunctionHandle, answer: Answer) {
    let sent = serde_json::to_value(&answer)
        .map_err(|e| BridgeError::MalformedMessage(e.to_string()))
        .and_then(|payload| callback.invoke(Some(Value::Json(payload))));
    if let Err(err) = sent {
        tracing::warn!(
            target: "jsbridge::dispatch",
            binding = callback.id(),
            "Failed to deliver promise completion: {}",
            err
        );
    }
    if let Err(err) = callback.close() {
        tracing::debug!(
            target: "jsbridge::dispatch",
            binding = callback.id(),
            "Failed to release promise binding: {}",
            err
        );
    }
}
