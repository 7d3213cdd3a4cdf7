// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! One-shot client for the hub wire protocol
//!
//! Every call opens a fresh connection, writes one request line, reads one
//! reply line and closes. The whole exchange (connect included) is bounded by
//! a single timeout, so no call can hang.

use futures::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use crate::domain::protocol::{encode, HubReply, HubRequest};

/// Upper bound on a single JSON line
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(std::io::Error),

    #[error("connection closed before a reply arrived")]
    Closed,

    #[error("malformed reply: {0}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(std::io::Error),
}

impl From<LinesCodecError> for ExchangeError {
    fn from(e: LinesCodecError) -> Self {
        match e {
            LinesCodecError::Io(io) => ExchangeError::Io(io),
            LinesCodecError::MaxLineLengthExceeded => {
                ExchangeError::Malformed("reply exceeds maximum frame length".to_string())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HubClient {
    addr: String,
    timeout: Duration,
}

impl HubClient {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn send(&self, request: &HubRequest) -> Result<HubReply, ExchangeError> {
        match tokio::time::timeout(self.timeout, exchange(&self.addr, request)).await {
            Ok(result) => result,
            Err(_) => Err(ExchangeError::Timeout(self.timeout)),
        }
    }
}

async fn exchange(addr: &str, request: &HubRequest) -> Result<HubReply, ExchangeError> {
    let stream = TcpStream::connect(addr).await.map_err(ExchangeError::Connect)?;
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LEN));

    let line = encode(request).map_err(|e| ExchangeError::Malformed(e.to_string()))?;
    framed.send(line).await?;

    match framed.next().await {
        Some(Ok(line)) => {
            serde_json::from_str(&line).map_err(|e| ExchangeError::Malformed(e.to_string()))
        }
        Some(Err(e)) => Err(e.into()),
        None => Err(ExchangeError::Closed),
    }
}
