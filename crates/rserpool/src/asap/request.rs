// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inter-thread request envelope between callers and the engine worker.

use crossbeam::channel::{self, Receiver, Sender};

use crate::error::{Result, RspError};
use crate::message::constants::*;
use crate::message::{encode, RserpoolMessage};

/// Reply port handed back to a waiting caller.
pub(crate) type ReplySender = Sender<Result<RserpoolMessage>>;
pub(crate) type ReplyReceiver = Receiver<Result<RserpoolMessage>>;

/// Response type a request waits for, if any.
pub(crate) fn expected_response(request_type: u16) -> Option<u16> {
    match request_type {
        AHT_REGISTRATION => Some(AHT_REGISTRATION_RESPONSE),
        AHT_DEREGISTRATION => Some(AHT_DEREGISTRATION_RESPONSE),
        AHT_HANDLE_RESOLUTION => Some(AHT_HANDLE_RESOLUTION_RESPONSE),
        _ => None,
    }
}

/// One queued request.
#[derive(Debug)]
pub(crate) struct Request {
    pub message: RserpoolMessage,
    /// Encoded once at creation so encoding errors surface to the caller.
    pub payload: Vec<u8>,
    pub response_type: Option<u16>,
    pub reply: Option<ReplySender>,
    pub created: u64,
    pub transmitted: Option<u64>,
    /// Absolute response deadline while awaiting a response.
    pub deadline: Option<u64>,
    pub trials: u32,
}

impl Request {
    /// Build a request; returns the reply port when `wait` is set.
    pub fn new(
        message: RserpoolMessage,
        wait: bool,
        now: u64,
    ) -> Result<(Self, Option<ReplyReceiver>)> {
        let payload = encode(&message)?;
        let response_type = expected_response(message.message_type());
        let (reply, port) = if wait && response_type.is_some() {
            let (tx, rx) = channel::bounded(1);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        Ok((
            Self {
                message,
                payload,
                response_type,
                reply,
                created: now,
                transmitted: None,
                deadline: None,
                trials: 0,
            },
            port,
        ))
    }

    pub fn response_expected(&self) -> bool {
        self.response_type.is_some()
    }

    /// Deliver the outcome to the waiting caller, if any.
    pub fn complete(self, outcome: Result<RserpoolMessage>) {
        if let Some(reply) = self.reply {
            // The caller may have given up; nothing to do then.
            let _ = reply.send(outcome);
        }
    }
}

/// Block on a reply port until the worker answers.
pub(crate) fn wait_reply(port: ReplyReceiver) -> Result<RserpoolMessage> {
    port.recv().unwrap_or(Err(RspError::Aborted))
}
