//! Canned transport for exercising the wire protocol without hardware.
use std::collections::VecDeque;
use std::time::Duration;

use super::Transport;
use crate::error::Result;

/// Replays queued read chunks in order and records every write.
///
/// Each call to `read` consumes at most one chunk; an empty chunk models a
/// zero-byte read. Once the queue is exhausted every read returns 0.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    replies: VecDeque<Vec<u8>>,
    writes: Vec<Vec<u8>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, bytes: &[u8]) -> Self {
        self.replies.push_back(bytes.to_vec());
        self
    }

    /// Queue a zero-byte read.
    pub fn gap(mut self) -> Self {
        self.replies.push_back(Vec::new());
        self
    }

    /// Queue one single-byte reply per element.
    pub fn replies(mut self, bytes: &[u8]) -> Self {
        self.replies.extend(bytes.iter().map(|&b| vec![b]));
        self
    }

    pub fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }

    /// Every byte written so far, concatenated.
    pub fn written(&self) -> Vec<u8> {
        self.writes.concat()
    }

    pub fn pending(&self) -> usize {
        self.replies.iter().map(Vec::len).sum()
    }
}

impl Transport for ScriptedTransport {
    fn write(&mut self, raw: &[u8], _timeout: Duration) -> Result<()> {
        self.writes.push(raw.to_vec());
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let Some(mut chunk) = self.replies.pop_front() else {
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            let rest = chunk.split_off(n);
            self.replies.push_front(rest);
        }
        Ok(n)
    }
}
