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

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// Unique identifier of a paid message.
///
/// Derived on-chain from the message content hash and used both as the
/// deduplication key and as the argument of the acknowledgement call.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
    derive_more::Into,
)]
#[display("{_0}")]
#[serde(transparent)]
pub struct MessageId(B256);

impl MessageId {
    pub const fn new(hash: B256) -> Self {
        Self(hash)
    }

    pub const fn into_inner(self) -> B256 {
        self.0
    }
}

impl From<[u8; 32]> for MessageId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(B256::from(bytes))
    }
}

/// Where the body of a paid message lives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentRef {
    /// The body is carried inline by the event.
    Uri(String),
    /// The body is stored by the contract and must be read with a second call.
    Stored,
}

/// Immutable record of one `MessagePaid` log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub id: MessageId,
    pub payer: Address,
    pub content_ref: ContentRef,
    /// Hash of the content, as emitted by newer contract revisions.
    pub content_hash: Option<B256>,
    pub block_number: u64,
    pub tx_hash: B256,
    pub user_mint: U256,
    pub dev_mint: U256,
}
