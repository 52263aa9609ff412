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

use crate::{Address, B256, ChainEvent, ContentRef, MessageId, U256};

pub trait Mock {
    type Args;

    fn mock(args: Self::Args) -> Self;
}

impl Mock for MessageId {
    type Args = ();

    fn mock(_args: Self::Args) -> Self {
        MessageId::from(rand::random::<[u8; 32]>())
    }
}

impl Mock for ChainEvent {
    type Args = (MessageId, ContentRef);

    fn mock((id, content_ref): Self::Args) -> Self {
        ChainEvent {
            id,
            payer: Address::from(rand::random::<[u8; 20]>()),
            content_ref,
            content_hash: None,
            block_number: 43,
            tx_hash: B256::from(rand::random::<[u8; 32]>()),
            user_mint: U256::from(100),
            dev_mint: U256::from(10),
        }
    }
}
