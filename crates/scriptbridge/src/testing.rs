//! Scripted in-process remote for facade tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::bridge::transport::{Transport, TransportError};

type Handler = dyn Fn(&str, &[Value]) -> Result<Value, TransportError> + Send + Sync;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordedCall {
    pub name: String,
    pub args: Vec<Value>,
    pub void: bool,
}

/// Answers every call through one handler and records what it saw.
pub(crate) struct ScriptedRemote {
    handler: Box<Handler>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedRemote {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&str, &[Value]) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Every call returns `value`.
    pub fn replying(value: Value) -> Arc<Self> {
        Self::new(move |_, _| Ok(value.clone()))
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_named(&self, name: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.name == name)
            .collect()
    }

    fn record(&self, name: &str, args: &[Value], void: bool) {
        self.calls.lock().unwrap().push(RecordedCall {
            name: name.to_string(),
            args: args.to_vec(),
            void,
        });
    }
}

#[async_trait]
impl Transport for ScriptedRemote {
    async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, TransportError> {
        self.record(name, &args, false);
        (self.handler)(name, &args)
    }

    async fn call_void(&self, name: &str, args: Vec<Value>) -> Result<(), TransportError> {
        self.record(name, &args, true);
        (self.handler)(name, &args).map(|_| ())
    }
}
