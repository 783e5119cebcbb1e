//! jsbridge
//!
//! A call bridge between a Rust host and a script runtime that can only
//! exchange text. Host functions are exposed through typed interfaces, script
//! functions are reached through integer handles, and asynchronous results
//! travel as promises correlated with the call that requested them.

pub mod bridge;

pub use bridge::{
    spawn_blocking_promise, Bridge, BridgeConfig, BridgeError, BridgeResult, CallType, Describe,
    FromValue, FunctionHandle, InterfaceDef, IntoValue, NativeError, Promise, ScriptArg,
    ScriptChannel, ScriptFunction, ScriptFunctionWithArg, ScriptFunctionWithPromise,
    ScriptFunctionWithPromiseAndArg, ScriptOutput, ScriptRuntime, TypeDesc, Value,
};
