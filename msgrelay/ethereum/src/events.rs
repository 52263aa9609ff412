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

use crate::{
    ChainError,
    abi::{IMessageManager, IMessageManagerUri},
    decode_log,
};
use alloy::rpc::types::eth::Log;
use msgrelay_common::{ChainEvent, ContentRef, MessageId};

pub mod signatures {
    use crate::{
        abi::{IMessageManager, IMessageManagerUri},
        signatures_consts,
    };

    signatures_consts! {
        MESSAGE_PAID: IMessageManager::MessagePaid,
        MESSAGE_PAID_URI: IMessageManagerUri::MessagePaid,
    }
}

/// Decodes a `MessagePaid` log of either contract revision.
///
/// Logs with unrelated topics yield `Ok(None)`. A log carrying a known
/// signature is either fully decoded or rejected.
pub fn try_extract_event(log: &Log) -> Result<Option<ChainEvent>, ChainError> {
    use signatures::*;

    let Some(topic0) = log.topic0() else {
        return Ok(None);
    };

    let (id, payer, content_ref, content_hash, user_mint, dev_mint) = match *topic0 {
        b if b == MESSAGE_PAID => {
            let event = decode_log::<IMessageManager::MessagePaid>(log)?;
            (
                event.messageHash,
                event.payer,
                ContentRef::Stored,
                None,
                event.userMint,
                event.devMint,
            )
        }
        b if b == MESSAGE_PAID_URI => {
            let event = decode_log::<IMessageManagerUri::MessagePaid>(log)?;
            (
                event.sigHash,
                event.payer,
                ContentRef::Uri(event.messageURI),
                Some(event.messageHash),
                event.userMint,
                event.devMint,
            )
        }
        _ => return Ok(None),
    };

    let block_number = log
        .block_number
        .ok_or_else(|| ChainError::Malformed(format!("log of message {id} has no block number")))?;
    let tx_hash = log
        .transaction_hash
        .ok_or_else(|| ChainError::Malformed(format!("log of message {id} has no tx hash")))?;

    Ok(Some(ChainEvent {
        id: MessageId::new(id),
        payer,
        content_ref,
        content_hash,
        block_number,
        tx_hash,
        user_mint,
        dev_mint,
    }))
}
