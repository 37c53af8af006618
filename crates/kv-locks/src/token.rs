// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of PlexSpaces.
//
// PlexSpaces is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// PlexSpaces is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with PlexSpaces. If not, see <https://www.gnu.org/licenses/>.

//! Holder tokens.
//!
//! A token is the value stored under a lock key; presenting it is what
//! authorizes a release. Callers with a natural unique id (node id, session
//! id) can use that directly. Everyone else can use [`generate_token`].

use ulid::Ulid;

/// Generate a fresh, practically unique holder token (a ULID).
pub fn generate_token() -> String {
    Ulid::new().to_string()
}
