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

use msgrelay_common::{ChainEvent, ContentRef, MessageId};
use msgrelay_ethereum::{ChainError, ChainReader};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("message {0} has no stored content")]
    Missing(MessageId),
    #[error("message {0} has empty content")]
    Empty(MessageId),
    #[error("content of message {0} is unavailable: {1}")]
    Unavailable(MessageId, ChainError),
}

/// Resolves the content reference of an event into the message text.
#[derive(Clone)]
pub struct MessageFetcher {
    reader: Arc<dyn ChainReader>,
}

impl MessageFetcher {
    pub fn new(reader: Arc<dyn ChainReader>) -> Self {
        Self { reader }
    }

    pub async fn fetch(&self, event: &ChainEvent) -> Result<String, FetchError> {
        let id = event.id;

        let content = match &event.content_ref {
            ContentRef::Uri(content) => content.clone(),
            ContentRef::Stored => {
                self.reader
                    .message_content(id)
                    .await
                    .map_err(|err| match err {
                        ChainError::NotFound(id) => FetchError::Missing(id),
                        err => FetchError::Unavailable(id, err),
                    })?
            }
        };

        if content.trim().is_empty() {
            return Err(FetchError::Empty(id));
        }

        Ok(content)
    }
}
