//! Host side of the connection: the outbound channel, the table of adopted
//! script handles and the pending host-to-script calls.

use serde_json::Value as Json;
use std::sync::Arc;

use super::channel::{ScriptChannel, ScriptCommand};
use super::config::Limits;
use super::conversion::{Decoder, HandleAdopter};
use super::correlation::{CorrelationId, CorrelationTable};
use super::error::BridgeError;
use super::handle::{HandleId, HandleTable};
use super::promise::Promise;
use super::proxy::FunctionHandle;
use super::types::{HandleShape, TypeDesc};
use super::value::Value;
use super::wire::Answer;

pub(crate) struct HostLink {
    channel: Arc<dyn ScriptChannel>,
    handles: HandleTable<HandleShape>,
    correlations: Arc<CorrelationTable>,
    limits: Limits,
}

impl HostLink {
    pub(crate) fn new(
        channel: Arc<dyn ScriptChannel>,
        correlations: Arc<CorrelationTable>,
        limits: Limits,
    ) -> Self {
        Self {
            channel,
            handles: HandleTable::new(),
            correlations,
            limits,
        }
    }

    pub(crate) fn limits(&self) -> Limits {
        self.limits
    }

    pub(crate) fn correlations(&self) -> &CorrelationTable {
        &self.correlations
    }

    pub(crate) fn send(&self, command: ScriptCommand) -> Result<(), BridgeError> {
        self.channel.send(command)
    }

    pub(crate) fn invoke_handle(&self, handle: HandleId, arg: Option<Json>) -> Result<(), BridgeError> {
        tracing::trace!(target: "jsbridge::link", handle, "Invoking script function");
        self.send(ScriptCommand::InvokeHandle { handle, arg })
    }

    /// Invoke a promise-returning script function. The returned promise is
    /// settled by [`HostLink::complete_correlation`].
    pub(crate) fn invoke_handle_for_promise(
        &self,
        handle: HandleId,
        arg: Option<Json>,
        expected: TypeDesc,
    ) -> Result<Promise<Value>, BridgeError> {
        let (correlation, promise) = self.correlations.register(expected);
        tracing::trace!(
            target: "jsbridge::link",
            handle,
            correlation,
            "Invoking script function for promise"
        );
        let sent = self.send(ScriptCommand::InvokeHandleForPromise {
            handle,
            correlation,
            arg,
        });
        if let Err(err) = sent {
            let _ = self.correlations.cancel(correlation, err.clone());
            return Err(err);
        }
        Ok(promise)
    }

    /// Forget an adopted handle and tell the owning side to drop it.
    pub(crate) fn release_handle(&self, handle: HandleId) -> Result<(), BridgeError> {
        if self.handles.release(handle).is_err() {
            tracing::debug!(
                target: "jsbridge::link",
                handle,
                "Releasing a handle that was not adopted"
            );
        }
        self.send(ScriptCommand::ReleaseHandle { handle })
    }

    pub(crate) fn outstanding_handles(&self) -> Vec<HandleId> {
        self.handles.ids()
    }
}

/// Decode a value that may carry handles; handles adopted before a failure
/// are released again.
pub(crate) fn decode_with_handles(
    link: &Arc<HostLink>,
    json: &Json,
    desc: &TypeDesc,
) -> Result<Value, BridgeError> {
    let mut decoder = Decoder::new(link.limits).with_adopter(link);
    let result = decoder.decode(json, desc);
    if result.is_err() {
        decoder.release_adopted();
    }
    result
}

/// Accept the answer of a pending host-to-script call.
pub(crate) fn complete_correlation(
    link: &Arc<HostLink>,
    correlation: CorrelationId,
    answer: Answer,
) -> Result<(), BridgeError> {
    let decode_link = Arc::clone(link);
    link.correlations.complete(correlation, answer, move |json, desc| {
        decode_with_handles(&decode_link, json, desc)
    })
}

impl HandleAdopter for Arc<HostLink> {
    fn adopt_handle(
        &self,
        id: HandleId,
        shape: HandleShape,
        arg: Option<TypeDesc>,
        result: Option<TypeDesc>,
    ) -> Result<FunctionHandle, BridgeError> {
        self.handles.adopt(id, shape)?;
        Ok(FunctionHandle::new(Arc::clone(self), id, shape, arg, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::channel::RecordingChannel;
    use serde_json::json;

    fn link() -> (Arc<RecordingChannel>, Arc<HostLink>) {
        let channel = Arc::new(RecordingChannel::default());
        let correlations = CorrelationTable::spawn(None).unwrap();
        let link = Arc::new(HostLink::new(
            channel.clone(),
            correlations,
            Limits::default(),
        ));
        (channel, link)
    }

    #[test]
    fn test_adopt_and_release() {
        let (channel, link) = link();
        let handle = link
            .adopt_handle(3, HandleShape::Plain, None, None)
            .unwrap();
        assert_eq!(link.outstanding_handles(), vec![3]);
        assert_eq!(
            link.adopt_handle(3, HandleShape::Plain, None, None).unwrap_err(),
            BridgeError::DuplicateHandle(3)
        );
        handle.close().unwrap();
        assert!(link.outstanding_handles().is_empty());
        assert_eq!(
            channel.last(),
            Some(ScriptCommand::ReleaseHandle { handle: 3 })
        );
    }

    #[test]
    fn test_decode_failure_releases_adopted_handles() {
        let (channel, link) = link();
        let desc = TypeDesc::list(TypeDesc::handle(HandleShape::Plain, None, None));
        let err = decode_with_handles(&link, &json!([1, 2, "x"]), &desc).unwrap_err();
        assert_eq!(err.kind(), "TypeDecodeFailure");
        assert!(link.outstanding_handles().is_empty());
        assert_eq!(
            channel.sent(),
            vec![
                ScriptCommand::ReleaseHandle { handle: 1 },
                ScriptCommand::ReleaseHandle { handle: 2 },
            ]
        );
    }

    #[tokio::test]
    async fn test_invoke_for_promise_round_trip() {
        let (channel, link) = link();
        let promise = link
            .invoke_handle_for_promise(5, Some(json!(1)), TypeDesc::string())
            .unwrap();
        let correlation = match channel.last() {
            Some(ScriptCommand::InvokeHandleForPromise {
                handle: 5,
                correlation,
                arg: Some(arg),
            }) => {
                assert_eq!(arg, json!(1));
                correlation
            }
            other => panic!("unexpected command {:?}", other),
        };
        complete_correlation(&link, correlation, Answer::value(json!("done"))).unwrap();
        assert_eq!(promise.await, Ok(Value::from("done")));
        assert_eq!(
            complete_correlation(&link, correlation, Answer::void()),
            Err(BridgeError::NoSuchCorrelation(correlation))
        );
    }

    #[tokio::test]
    async fn test_send_failure_cancels_correlation() {
        let (channel, link) = link();
        channel.close();
        let err = link
            .invoke_handle_for_promise(5, None, TypeDesc::Unit)
            .unwrap_err();
        assert_eq!(err, BridgeError::ChannelClosed);
        assert!(link.correlations().is_empty());
    }
}
