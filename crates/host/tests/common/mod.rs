//! Shared helpers for driving a host session over in-memory streams

#![allow(dead_code, unreachable_pub)]

use std::collections::VecDeque;
use std::io::Cursor;

use cardgate_host::card::{CardBackend, CardConnection, CardError, ConnectionInfo};
use cardgate_host::dispatch::{Dispatcher, FatalError};
use cardgate_host::signer::{KeystoreSigner, Signer};
use cardgate_pcsc::{PcscError, Protocols};
use serde_json::Value;

pub const CERT: &[u8] = include_bytes!("../fixtures/auth.der");
pub const KEY: &str = include_str!("../fixtures/key.hex");

/// Keystore signer built from the test fixtures
pub fn keystore() -> KeystoreSigner {
    let key = hex::decode(KEY.trim()).unwrap();
    KeystoreSigner::new(&key, CERT.to_vec(), CERT.to_vec()).unwrap()
}

/// Frame a single JSON message
pub fn frame(message: &Value) -> Vec<u8> {
    frame_raw(message.to_string().as_bytes())
}

/// Frame raw payload bytes
pub fn frame_raw(payload: &[u8]) -> Vec<u8> {
    let mut bytes = (payload.len() as u32).to_le_bytes().to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

/// Frame a sequence of messages back to back
pub fn frames(messages: &[Value]) -> Vec<u8> {
    messages.iter().flat_map(frame).collect()
}

/// Split host output into decoded responses
pub fn responses(mut output: &[u8]) -> Vec<Value> {
    let mut decoded = Vec::new();
    while !output.is_empty() {
        let length = u32::from_le_bytes(output[..4].try_into().unwrap()) as usize;
        decoded.push(serde_json::from_slice(&output[4..4 + length]).unwrap());
        output = &output[4 + length..];
    }
    decoded
}

/// Run one session over `input`, returning the outcome and all responses
pub fn run<S: Signer, B: CardBackend>(
    dispatcher: &mut Dispatcher<S, B>,
    input: Vec<u8>,
) -> (Result<(), FatalError>, Vec<Value>) {
    let mut output = Vec::new();
    let result = dispatcher.serve(Cursor::new(input), &mut output);
    (result, responses(&output))
}

/// Scripted transmit results; anything beyond the script answers `9000`
#[derive(Debug, Default)]
pub struct MockBackend {
    pub script: Vec<Result<Vec<u8>, PcscError>>,
    pub fail_open: Option<PcscError>,
}

impl MockBackend {
    pub fn with_script(script: Vec<Result<Vec<u8>, PcscError>>) -> Self {
        Self {
            script,
            fail_open: None,
        }
    }
}

#[derive(Debug)]
pub struct MockConnection {
    script: VecDeque<Result<Vec<u8>, PcscError>>,
}

impl CardConnection for MockConnection {
    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            reader: "Mock Reader 00 00".into(),
            atr: hex::decode("3bdb960080b1fe451f830012233f536549440f9000f1").unwrap(),
            protocol: "T=1".into(),
        }
    }

    fn transmit(&mut self, _command: &[u8]) -> Result<Vec<u8>, CardError> {
        match self.script.pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(e)) => Err(e.into()),
            None => Ok(vec![0x90, 0x00]),
        }
    }

    fn close(&mut self) {}
}

impl CardBackend for MockBackend {
    type Connection = MockConnection;

    fn open(&mut self, _protocols: Protocols) -> Result<MockConnection, CardError> {
        if let Some(e) = self.fail_open.take() {
            return Err(e.into());
        }
        Ok(MockConnection {
            script: self.script.drain(..).collect(),
        })
    }
}
