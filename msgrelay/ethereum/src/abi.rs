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

pub use message_manager_abi::*;
pub use message_uri_abi::*;

mod message_manager_abi {
    alloy::sol!(
        #[sol(rpc)]
        interface IMessageManager {
            event MessagePaid(
                bytes32 indexed messageHash,
                address indexed payer,
                uint256 userMint,
                uint256 devMint
            );

            event MessageProcessed(bytes32 indexed messageHash, address indexed processor);

            function AGENT_ROLE() external view returns (bytes32);

            function hasRole(bytes32 role, address account) external view returns (bool);

            function paidMessages(bytes32 messageHash) external view returns (string memory);

            function processedMessages(bytes32 messageHash) external view returns (bool);

            function markMessageProcessed(bytes32 messageHash) external;
        }
    );
}

/// Layout of newer deployments, which carry the message URI inline.
mod message_uri_abi {
    alloy::sol!(
        interface IMessageManagerUri {
            event MessagePaid(
                bytes32 indexed sigHash,
                address indexed payer,
                string messageURI,
                bytes32 messageHash,
                uint256 userMint,
                uint256 devMint
            );
        }
    );
}
