//! Structured record of verification operations.
//!
//! Tracing is opt-in through [`crate::Scheme::verify_with_trace`]: every
//! HMAC, decrypt, and bind step copies its operands into the recorder, one
//! [`Trace`] per macaroon in the stack. Traces render as human-readable
//! JSON with non-printable bytes hex-escaped as `"0x…"`.

use std::fmt;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::error::Error;
use crate::macaroon::printable_bytes;

/// The kind of a recorded operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceOpKind {
    /// `HMAC(arg1, arg2) -> result`
    Hmac,
    /// `Decrypt(key=arg1, ciphertext=arg2) -> result`
    Decrypt,
    /// `BindForRequest(target_sig=arg1, sig=arg2) -> result`
    Bind,
    /// Verification aborted; `error` holds the cause chain.
    Fail,
}

impl TraceOpKind {
    fn as_str(self) -> &'static str {
        match self {
            TraceOpKind::Hmac => "HMAC",
            TraceOpKind::Decrypt => "Decrypt",
            TraceOpKind::Bind => "BindForRequest",
            TraceOpKind::Fail => "FAILURE",
        }
    }
}

impl fmt::Display for TraceOpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded operation.
#[derive(Clone, Debug)]
pub struct TraceOp {
    pub kind: TraceOpKind,
    pub arg1: Vec<u8>,
    pub arg2: Vec<u8>,
    pub result: Vec<u8>,
    /// Messages of the error and its source chain, outermost first.
    pub error: Vec<String>,
}

impl Serialize for TraceOp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("TraceOp", 4)?;
        st.serialize_field("kind", self.kind.as_str())?;
        let mut args = Vec::with_capacity(2);
        if !self.arg1.is_empty() {
            args.push(printable_bytes(&self.arg1));
        }
        if !self.arg2.is_empty() {
            args.push(printable_bytes(&self.arg2));
        }
        st.serialize_field("args", &args)?;
        st.serialize_field("result", &printable_bytes(&self.result))?;
        st.serialize_field("error", &self.error)?;
        st.end()
    }
}

/// The operations performed on a single macaroon, along with the chain key
/// in effect when its verification started.
#[derive(Clone, Debug, Default)]
pub struct Trace {
    pub root_key: Vec<u8>,
    pub ops: Vec<TraceOp>,
}

impl Serialize for Trace {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("Trace", 2)?;
        st.serialize_field("rootKey", &printable_bytes(&self.root_key))?;
        st.serialize_field("ops", &self.ops)?;
        st.end()
    }
}

/// Recorder holding one [`Trace`] per macaroon in the verified stack.
#[derive(Clone, Debug, Default)]
pub struct Traces(Vec<Trace>);

impl Traces {
    pub fn new() -> Traces {
        Traces::default()
    }

    pub fn traces(&self) -> &[Trace] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&Trace> {
        self.0.get(i)
    }

    pub(crate) fn reset(&mut self, stack_len: usize) {
        self.0.clear();
        self.0.resize_with(stack_len, Trace::default);
    }

    pub(crate) fn set_root_key(&mut self, i: usize, key: &[u8]) {
        if let Some(t) = self.0.get_mut(i) {
            t.root_key = key.to_vec();
        }
    }

    pub(crate) fn record(
        &mut self,
        i: usize,
        kind: TraceOpKind,
        arg1: impl AsRef<[u8]>,
        arg2: impl AsRef<[u8]>,
        result: impl AsRef<[u8]>,
    ) {
        if let Some(t) = self.0.get_mut(i) {
            t.ops.push(TraceOp {
                kind,
                arg1: arg1.as_ref().to_vec(),
                arg2: arg2.as_ref().to_vec(),
                result: result.as_ref().to_vec(),
                error: Vec::new(),
            });
        }
    }

    pub(crate) fn fail(&mut self, i: usize, err: &Error) {
        let mut chain = vec![err.to_string()];
        let mut source = std::error::Error::source(err);
        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }
        if let Some(t) = self.0.get_mut(i) {
            t.ops.push(TraceOp {
                kind: TraceOpKind::Fail,
                arg1: Vec::new(),
                arg2: Vec::new(),
                result: Vec::new(),
                error: chain,
            });
        }
    }
}

impl Serialize for Traces {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("Traces", 1)?;
        st.serialize_field("traces", &self.0)?;
        st.end()
    }
}

impl fmt::Display for Traces {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string_pretty(self) {
            Ok(js) => f.write_str(&js),
            Err(_) => Err(fmt::Error),
        }
    }
}
