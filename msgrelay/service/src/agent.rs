// This file is part of Gear.
//
// Copyright (C) 2024-2025 Gear Technologies Inc.
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Processing agent collaborator.

use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use msgrelay_common::AgentChunk;
use serde::Serialize;
use std::time::Duration;
use url::Url;

pub type AgentStream = BoxStream<'static, Result<AgentChunk, AgentError>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    #[error("agent request failed: {0}")]
    Request(String),
    #[error("agent responded with status {0}")]
    Status(u16),
    #[error("undecodable agent output: {0}")]
    Decode(String),
    #[error("agent did not finish within {0:?}")]
    Timeout(Duration),
}

/// Turns message content into a stream of typed output chunks.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn process(&self, content: String) -> Result<AgentStream, AgentError>;
}

#[derive(Serialize)]
struct ProcessRequest<'a> {
    content: &'a str,
}

/// Agent reached over HTTP.
///
/// Content is posted as `{"content": ...}`, the response body is
/// newline-delimited JSON, one [`AgentChunk`] per line.
#[derive(Clone, Debug)]
pub struct HttpAgent {
    client: reqwest::Client,
    url: Url,
}

impl HttpAgent {
    pub fn new(url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Agent for HttpAgent {
    async fn process(&self, content: String) -> Result<AgentStream, AgentError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&ProcessRequest { content: &content })
            .send()
            .await
            .map_err(|err| AgentError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::Status(status.as_u16()));
        }

        let mut body = response.bytes_stream();

        let stream = async_stream::try_stream! {
            let mut buffer = Vec::new();

            while let Some(bytes) = body.next().await {
                let bytes = bytes.map_err(|err| AgentError::Request(err.to_string()))?;
                buffer.extend_from_slice(&bytes);

                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    if let Some(chunk) = decode_line(&line)? {
                        yield chunk;
                    }
                }
            }

            if let Some(chunk) = decode_line(&buffer)? {
                yield chunk;
            }
        };

        Ok(stream.boxed())
    }
}

fn decode_line(line: &[u8]) -> Result<Option<AgentChunk>, AgentError> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    serde_json::from_slice(line)
        .map(Some)
        .map_err(|err| AgentError::Decode(err.to_string()))
}
