//! Pending host-to-script call awaiting its completion.

use serde_json::Value as Json;
use std::time::Instant;

use super::CorrelationId;
use crate::bridge::error::BridgeError;
use crate::bridge::promise::Promise;
use crate::bridge::types::TypeDesc;
use crate::bridge::value::Value;
use crate::bridge::wire::Answer;

/// Entry of the correlation table.
pub struct PendingCompletion {
    pub id: CorrelationId,
    pub expected: TypeDesc,
    pub promise: Promise<Value>,
    pub registered_at: Instant,
}

impl PendingCompletion {
    pub fn new(id: CorrelationId, expected: TypeDesc, promise: Promise<Value>) -> Self {
        Self {
            id,
            expected,
            promise,
            registered_at: Instant::now(),
        }
    }

    /// Decode the answer against the expected type and settle the promise.
    pub fn settle<D>(self, answer: Answer, decode: D)
    where
        D: FnOnce(&Json, &TypeDesc) -> Result<Value, BridgeError>,
    {
        let result = answer.into_remote_result().and_then(|value| match value {
            None => Ok(Value::Null),
            Some(_) if self.expected.is_unit() => Ok(Value::Null),
            Some(json) => decode(&json, &self.expected),
        });
        if let Err(ref err) = result {
            tracing::debug!(
                target: "jsbridge::correlation",
                correlation = self.id,
                "Call failed: {}",
                err
            );
        }
        self.finish(result);
    }

    /// Settle with a local failure.
    pub fn fail(self, error: BridgeError) {
        self.finish(Err(error));
    }

    fn finish(self, result: Result<Value, BridgeError>) {
        if self.promise.settle(result).is_err() {
            tracing::debug!(
                target: "jsbridge::correlation",
                correlation = self.id,
                "Promise was already settled"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::config::Limits;
    use crate::bridge::conversion::decode;
    use serde_json::json;

    fn decode_default(json: &Json, desc: &TypeDesc) -> Result<Value, BridgeError> {
        decode(json, desc, Limits::default())
    }

    #[test]
    fn test_registration_time_is_recorded() {
        let before = Instant::now();
        let promise = Promise::new();
        let pending = PendingCompletion::new(3, TypeDesc::int(), promise.clone());
        assert!(pending.registered_at >= before);
        assert!(pending.registered_at.elapsed() <= before.elapsed());
        pending.fail(BridgeError::Timeout(1));
        assert_eq!(promise.state(), crate::bridge::promise::PromiseState::Rejected);
    }

    #[test]
    fn test_settle_with_value() {
        let promise = Promise::new();
        let pending = PendingCompletion::new(1, TypeDesc::int(), promise.clone());
        pending.settle(Answer::value(json!("12")), decode_default);
        assert_eq!(futures::executor::block_on(promise), Ok(Value::Int(12)));
    }

    #[test]
    fn test_settle_void_and_unit() {
        let promise = Promise::new();
        PendingCompletion::new(1, TypeDesc::int(), promise.clone())
            .settle(Answer::void(), decode_default);
        assert_eq!(futures::executor::block_on(promise), Ok(Value::Null));

        let promise = Promise::new();
        PendingCompletion::new(2, TypeDesc::Unit, promise.clone())
            .settle(Answer::value(json!({"ignored": true})), decode_default);
        assert_eq!(futures::executor::block_on(promise), Ok(Value::Null));
    }

    #[test]
    fn test_settle_with_error_answer() {
        let promise = Promise::new();
        let answer = Answer::from_json(
            r#"{"hasError":true,"error":{"message":"nope","stackTrace":"at x"}}"#,
        )
        .unwrap();
        PendingCompletion::new(3, TypeDesc::int(), promise.clone()).settle(answer, decode_default);
        assert_eq!(
            futures::executor::block_on(promise),
            Err(BridgeError::RemoteFault {
                message: "nope".into(),
                stack_trace: "at x".into()
            })
        );
    }

    #[test]
    fn test_settle_with_decode_failure() {
        let promise = Promise::new();
        PendingCompletion::new(4, TypeDesc::int(), promise.clone())
            .settle(Answer::value(json!("not a number")), decode_default);
        let err = futures::executor::block_on(promise).unwrap_err();
        assert_eq!(err.kind(), "TypeDecodeFailure");
    }
}
