//! Bidirectional call bridge between a Rust host and a script runtime.
//!
//! The two sides only exchange text. The script side calls exposed host
//! functions with a JSON [`Call`](wire::Call) and receives a JSON
//! [`Answer`](wire::Answer); the host reaches script functions through
//! integer handles and [`ScriptCommand`](channel::ScriptCommand)s. Results
//! that arrive later are delivered through [`Promise`](promise::Promise)s.
//!
//! Typical wiring with the in-process script runtime:
//!
//! ```ignore
//! let script = ScriptRuntime::new()?;
//! let bridge = Arc::new(Bridge::new(BridgeConfig::default(), script.clone())?);
//! script.attach(&bridge)?;
//! bridge.add_interface(
//!     InterfaceDef::new("Greeter")
//!         .function(CallType::FullSync, "hello", |name: String| format!("hello {}", name)),
//! )?;
//! bridge.init()?;
//! script.ready().wait()?;
//! ```

pub mod channel;
pub mod config;
pub mod conversion;
pub mod correlation;
mod dispatch;
pub mod error;
pub mod event_loop;
pub mod handle;
pub mod host;
mod link;
pub mod promise;
pub mod proxy;
pub mod registry;
pub mod script;
pub mod types;
pub mod value;
pub mod wire;

pub use channel::{BootstrapLoader, HostEndpoint, JsChannel, ScriptChannel, ScriptCommand, ScriptEvaluator};
pub use config::{BridgeConfig, Limits};
pub use conversion::{FromValue, IntoValue};
pub use error::{BridgeError, BridgeResult, NativeError};
pub use host::Bridge;
pub use promise::{spawn_blocking_promise, Promise, PromiseState};
pub use proxy::{
    FunctionHandle, ScriptFunction, ScriptFunctionWithArg, ScriptFunctionWithPromise,
    ScriptFunctionWithPromiseAndArg,
};
pub use registry::{CallType, FunctionDescriptor, InterfaceDef, Outcome};
pub use script::{ScriptArg, ScriptOutput, ScriptRuntime};
pub use types::{Describe, HandleShape, TypeDesc};
pub use value::{Record, Value};
pub use wire::{Answer, Call};

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::{json, Value as Json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn wait_until<F: Fn() -> bool>(condition: F) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("condition not reached in time");
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Add {
        a: i32,
        b: i32,
    }

    impl Describe for Add {
        fn describe() -> TypeDesc {
            TypeDesc::record("Add", [("a", TypeDesc::int()), ("b", TypeDesc::int())])
        }
    }

    impl FromValue for Add {
        fn from_value(value: Value) -> Result<Self, BridgeError> {
            match value {
                Value::Record(mut record) => Ok(Add {
                    a: i32::from_value(record.take("a"))?,
                    b: i32::from_value(record.take("b"))?,
                }),
                other => Err(BridgeError::TypeDecodeFailure {
                    expected: "Add".into(),
                    got: other.type_name().into(),
                }),
            }
        }
    }

    struct Session {
        script: Arc<ScriptRuntime>,
        bridge: Arc<Bridge>,
    }

    impl Session {
        async fn start(def: InterfaceDef) -> Self {
            init_tracing();
            let script = ScriptRuntime::new().unwrap();
            let bridge = Arc::new(Bridge::new(BridgeConfig::default(), script.clone()).unwrap());
            script.attach(&bridge).unwrap();
            bridge.add_interface(def).unwrap();
            bridge.init().unwrap();
            script.ready().await.unwrap();
            Self { script, bridge }
        }

        fn call(&self, interface: &str, function: &str, args: Vec<ScriptArg>) -> Promise<Json> {
            self.script
                .call(interface, function, args)
                .unwrap()
                .into_promise()
        }

        fn assert_no_leaks(&self) {
            wait_until(|| self.script.outstanding_functions().is_empty());
            wait_until(|| self.bridge.outstanding_handles().is_empty());
            assert_eq!(self.bridge.pending_correlations(), 0);
        }
    }

    fn greeter() -> InterfaceDef {
        InterfaceDef::new("Test")
            .function(CallType::FullSync, "hello", |name: String| {
                format!("hello {}", name)
            })
            .function(CallType::WebPromise, "helloWeb", |name: String| {
                format!("hello {}", name)
            })
            .function(CallType::FullPromise, "helloLater", |name: String| {
                spawn_blocking_promise(move || Ok(format!("hello {}", name)))
            })
            .function(CallType::FullSync, "add", |add: Add| add.a + add.b)
            .function(CallType::FullPromise, "fail", || {
                spawn_blocking_promise(|| -> Result<i32, BridgeError> {
                    Err(BridgeError::invocation("nothing to do"))
                })
            })
    }

    #[tokio::test]
    async fn test_script_calls_host_with_every_call_type() {
        let session = Session::start(greeter()).await;

        for function in ["hello", "helloWeb", "helloLater"] {
            let answer = session.call("Test", function, vec![json!("World").into()]).await;
            assert_eq!(answer, Ok(json!("hello World")), "{}", function);
        }

        let sum = session
            .call("Test", "add", vec![json!({"a": 2, "b": "40"}).into()])
            .await;
        assert_eq!(sum, Ok(json!(42)));

        session.assert_no_leaks();
    }

    #[tokio::test]
    async fn test_host_faults_reach_script_as_native_errors() {
        let session = Session::start(greeter()).await;

        match session.call("Test", "fail", vec![]).await {
            Err(BridgeError::Native(err)) => {
                assert_eq!(err.native_message, "nothing to do");
                assert_eq!(err.to_string(), "Error in Native Layer: nothing to do");
            }
            other => panic!("unexpected result {:?}", other),
        }

        match session.script.call("Test", "hello", vec![]) {
            Err(BridgeError::Native(err)) => {
                assert!(err.native_message.contains("expected 1, got 0"));
            }
            other => panic!("unexpected result {:?}", other),
        }

        let web = session.call("Test", "helloWeb", vec![json!([1]).into()]).await;
        assert_eq!(web.unwrap_err().kind(), "NativeError");

        session.assert_no_leaks();
    }

    #[tokio::test]
    async fn test_host_calls_script_promise_function() {
        let relay = InterfaceDef::new("Relay").function(
            CallType::FullPromise,
            "relay",
            |f: ScriptFunctionWithPromiseAndArg<String, String>| match f.call("ping".to_string()) {
                Ok(reply) => reply.map(move |text| {
                    f.close()?;
                    Ok(format!("{} relayed", text))
                }),
                Err(err) => Promise::rejected(err),
            },
        );
        let session = Session::start(relay).await;

        let responder = ScriptArg::function(|arg| {
            let text = arg.and_then(|a| a.as_str().map(str::to_string)).unwrap_or_default();
            Ok(ScriptOutput::Promise(Promise::resolved(json!(format!("{} pong", text)))))
        });
        let answer = session.call("Relay", "relay", vec![responder]).await;
        assert_eq!(answer, Ok(json!("ping pong relayed")));

        session.assert_no_leaks();
        let stats = session.bridge.correlation_stats();
        assert_eq!(stats.total_registered, 1);
        assert_eq!(stats.total_completed, 1);
    }

    #[tokio::test]
    async fn test_callback_lifecycle() {
        let stored: Arc<Mutex<Option<ScriptFunctionWithArg<String>>>> = Arc::new(Mutex::new(None));
        let slot = stored.clone();
        let def = InterfaceDef::new("Events").function(
            CallType::FullSync,
            "subscribe",
            move |callback: ScriptFunctionWithArg<String>| {
                *slot.lock() = Some(callback);
            },
        );
        let session = Session::start(def).await;

        let (tx, rx) = std::sync::mpsc::channel::<Json>();
        let tx = Mutex::new(tx);
        let listener = ScriptArg::function(move |arg| {
            let _ = tx.lock().send(arg.unwrap_or(Json::Null));
            Ok(ScriptOutput::Undefined)
        });
        session
            .call("Events", "subscribe", vec![listener])
            .await
            .unwrap();

        let callback = stored.lock().take().unwrap();
        assert_eq!(session.bridge.outstanding_handles(), vec![callback.id()]);
        callback.call("first".into()).unwrap();
        callback.call("second".into()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(json!("first")));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(json!("second")));

        callback.close().unwrap();
        assert_eq!(
            callback.call("third".into()),
            Err(BridgeError::UseAfterClose(callback.id()))
        );
        assert_eq!(
            callback.close(),
            Err(BridgeError::HandleAlreadyClosed(callback.id()))
        );
        session.assert_no_leaks();
    }

    #[tokio::test]
    async fn test_math_greeting_and_tick() {
        let ticks: Arc<Mutex<Option<ScriptFunctionWithArg<i32>>>> = Arc::new(Mutex::new(None));
        let slot = ticks.clone();
        let def = InterfaceDef::new("Math")
            .function(CallType::FullSync, "add", |a: i32, b: i32| a + b)
            .function(CallType::FullPromise, "greetAsync", |name: String| {
                spawn_blocking_promise(move || Ok(format!("hello {}", name)))
            })
            .function(CallType::FullSync, "onTick", move |cb: ScriptFunctionWithArg<i32>| {
                *slot.lock() = Some(cb);
            });
        let session = Session::start(def).await;

        let answer = session
            .bridge
            .dispatch(r#"{"interfaceName":"Math","functionName":"add","arguments":[2,3]}"#);
        let answer: Json = serde_json::from_str(&answer).unwrap();
        assert_eq!(answer, json!({"hasError": false, "isVoid": false, "value": 5}));

        let greeting = session
            .call("Math", "greetAsync", vec![json!("Bob").into()])
            .await;
        assert_eq!(greeting, Ok(json!("hello Bob")));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let tick = ScriptArg::function(move |arg| {
            record.lock().push(arg);
            Ok(ScriptOutput::Undefined)
        });
        session.call("Math", "onTick", vec![tick]).await.unwrap();
        let cb = ticks.lock().take().unwrap();
        cb.call(7).unwrap();
        wait_until(|| !seen.lock().is_empty());
        cb.close().unwrap();
        assert_eq!(cb.call(8), Err(BridgeError::UseAfterClose(cb.id())));
        session.assert_no_leaks();
        assert_eq!(*seen.lock(), vec![Some(json!(7))]);
    }

    #[tokio::test]
    async fn test_listeners_and_republication() {
        init_tracing();
        let script = ScriptRuntime::new().unwrap();
        let bridge = Arc::new(Bridge::new(BridgeConfig::default(), script.clone()).unwrap());
        script.attach(&bridge).unwrap();

        let ready = Arc::new(AtomicUsize::new(0));
        let counter = ready.clone();
        bridge.add_after_initialize_listener(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bridge.init().unwrap();
        script.ready().await.unwrap();
        assert_eq!(ready.load(Ordering::SeqCst), 1);
        assert!(script.interfaces().is_empty());

        bridge.add_interface(greeter()).unwrap();
        wait_until(|| !script.interfaces().is_empty());
        let answer = script
            .call("Test", "hello", vec![json!("again").into()])
            .unwrap()
            .into_promise()
            .await;
        assert_eq!(answer, Ok(json!("hello again")));
    }

    #[tokio::test]
    async fn test_close_cancels_pending_host_calls() {
        let def = InterfaceDef::new("Hold").function(
            CallType::FullSync,
            "hold",
            |f: ScriptFunctionWithPromise<i32>| -> Result<(), BridgeError> {
                let _pending = f.call()?;
                Ok(())
            },
        );
        let session = Session::start(def).await;
        let never = Promise::<Json>::new();
        let keep = never.clone();
        let holder = ScriptArg::function(move |_| Ok(ScriptOutput::Promise(keep.clone())));
        session.call("Hold", "hold", vec![holder]).await.unwrap();

        wait_until(|| session.bridge.pending_correlations() == 1);
        session.bridge.close();
        assert_eq!(session.bridge.pending_correlations(), 0);
        let _ = never.resolve(Json::Null);
    }
}
