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

use jsonrpsee::types::ErrorObject;

pub fn service_unavailable() -> ErrorObject<'static> {
    ErrorObject::owned(8000, "Service unavailable", None::<&str>)
}

pub fn service_busy() -> ErrorObject<'static> {
    ErrorObject::owned(8001, "Service is busy, retry later", None::<&str>)
}

pub fn admin_disabled() -> ErrorObject<'static> {
    ErrorObject::owned(8002, "Admin methods are disabled", None::<&str>)
}
