//! The singleton helper row: cursor, recently edited paths, schema version.
//!
//! Every update is a read-modify-write of one named field inside a single
//! write transaction. redb serializes write transactions, so two sessions
//! updating different fields never clobber each other.

use crate::database::{decode, encode, HELPERS_TABLE};
use crate::error::{storage, Result};
use crate::store::Store;
use crate::types::{Helper, ThoughtPath, Timestamp, HELPER_ID};
use redb::{ReadableTable, WriteTransaction};
use std::collections::BTreeMap;
use tracing::debug;

impl Store {
    /// Returns the helper row, creating it with defaults if absent.
    pub fn get_helpers(&self) -> Result<Helper> {
        {
            let read_txn = self.database().begin_read()?;
            let table = read_txn
                .open_table(HELPERS_TABLE)
                .map_err(storage("Failed to open helpers table"))?;
            let row = table
                .get(HELPER_ID)
                .map_err(storage("Failed to read helpers"))?;
            if let Some(guard) = row {
                return decode(guard.value());
            }
        }

        self.update_helper(|_| {})
    }

    /// Sets or clears the cursor.
    pub fn update_cursor(&self, cursor: Option<ThoughtPath>) -> Result<Helper> {
        self.update_helper(|helper| helper.cursor = cursor)
    }

    /// Clears the cursor.
    pub fn delete_cursor(&self) -> Result<Helper> {
        self.update_cursor(None)
    }

    /// Replaces the recently edited map.
    pub fn update_recently_edited(
        &self,
        recently_edited: BTreeMap<String, Timestamp>,
    ) -> Result<Helper> {
        self.update_helper(|helper| helper.recently_edited = recently_edited)
    }

    /// Records the application data schema version.
    pub fn update_schema_version(&self, schema_version: u32) -> Result<Helper> {
        self.update_helper(|helper| helper.schema_version = schema_version)
    }

    /// Records the application's last update time.
    pub fn update_last_updated(&self, last_updated: Timestamp) -> Result<Helper> {
        self.update_helper(|helper| helper.last_updated = last_updated)
    }

    fn update_helper(&self, apply: impl FnOnce(&mut Helper)) -> Result<Helper> {
        let write_txn = self.database().begin_write()?;
        let helper = modify_helper(&write_txn, apply)?;
        write_txn.commit().map_err(storage("Failed to commit"))?;
        debug!(session = self.session().id(), "Updated helpers");
        Ok(helper)
    }
}

fn modify_helper(txn: &WriteTransaction, apply: impl FnOnce(&mut Helper)) -> Result<Helper> {
    let mut table = txn
        .open_table(HELPERS_TABLE)
        .map_err(storage("Failed to open helpers table"))?;

    let mut helper = match table
        .get(HELPER_ID)
        .map_err(storage("Failed to read helpers"))?
    {
        Some(guard) => decode(guard.value())?,
        None => Helper::default(),
    };
    apply(&mut helper);

    let bytes = encode(&helper)?;
    table
        .insert(HELPER_ID, bytes.as_slice())
        .map_err(storage("Failed to write helpers"))?;
    Ok(helper)
}
