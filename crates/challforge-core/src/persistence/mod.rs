// Copyright (C) 2026 Challforge contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence for challenge, build, and instance state.
//!
//! All multi-row writes go through scoped transactions so a failure partway
//! through an update never leaves half a challenge in the database. Queries
//! are split per entity: challenge queries in `challenges`, build queries in
//! `builds`, instance queries in `instances`.

mod builds;
mod challenges;
mod instances;
mod sqlite;

pub use sqlite::SqlitePersistence;
