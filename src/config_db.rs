use std::{collections::HashMap, path::Path};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const DOCUMENTS: TableDefinition<&str, &str> = TableDefinition::new("documents");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

/// Registry entry for one ingested document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Full hex key, see [`crate::doc_id::DocumentId::key`].
    pub id: String,
    /// File name shown to users.
    pub name: String,
    pub path: String,
    pub page_count: usize,
    pub chunk_count: usize,
    /// Content hash at ingestion time.
    pub fingerprint: String,
    /// Seconds since the Unix epoch.
    pub added_at: u64,
}

impl DocumentRecord {
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(crate::doc_id::SHORT_ID_LEN)]
    }
}

pub struct ConfigDb {
    db: Database,
}

impl ConfigDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(DOCUMENTS)?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Documents --

    pub fn put_document(&self, record: &DocumentRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(DOCUMENTS)?;
            table.insert(record.id.as_str(), json.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        match table.get(id)? {
            Some(v) => Ok(Some(serde_json::from_str(v.value())?)),
            None => Ok(None),
        }
    }

    pub fn remove_document(&self, id: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(DOCUMENTS)?;
            table.remove(id)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    /// All registered documents, ordered by id.
    pub fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_k, v) = entry?;
            result.push(serde_json::from_str(v.value())?);
        }
        Ok(result)
    }

    /// Forget every document. Returns how many were registered.
    pub fn clear_documents(&self) -> Result<usize> {
        let txn = self.db.begin_write()?;
        let count = {
            let mut table = txn.open_table(DOCUMENTS)?;
            let keys: Vec<String> = table
                .iter()?
                .map(|entry| entry.map(|(k, _)| k.value().to_string()))
                .collect::<std::result::Result<_, _>>()?;
            for key in &keys {
                table.remove(key.as_str())?;
            }
            keys.len()
        };
        txn.commit()?;
        Ok(count)
    }

    /// Look a document up by full id, id prefix (with or without a leading
    /// `#`) or file name.
    pub fn find_document(&self, reference: &str) -> Result<DocumentRecord> {
        let wanted = reference.trim().trim_start_matches('#');
        let not_found = || Error::NotFound {
            kind: "document",
            name: reference.to_string(),
        };
        if wanted.is_empty() {
            return Err(not_found());
        }

        let documents = self.list_documents()?;
        if let Some(doc) = documents.iter().find(|d| d.id == wanted) {
            return Ok(doc.clone());
        }

        let by_prefix: Vec<&DocumentRecord> = documents
            .iter()
            .filter(|d| d.id.starts_with(wanted))
            .collect();
        match by_prefix.as_slice() {
            [doc] => return Ok((*doc).clone()),
            [] => {}
            _ => {
                return Err(Error::Config(format!(
                    "document id '{wanted}' is ambiguous, \
                     {} documents match",
                    by_prefix.len()
                )));
            }
        }

        documents
            .into_iter()
            .find(|d| d.name == wanted)
            .ok_or_else(not_found)
    }

    /// Resolve document references (see [`ConfigDb::find_document`]) to
    /// full ids.
    pub fn resolve_document_ids(
        &self,
        references: &[String],
    ) -> Result<Vec<String>> {
        references
            .iter()
            .map(|r| self.find_document(r).map(|d| d.id))
            .collect()
    }

    /// Map of document id to file name.
    pub fn document_names(&self) -> Result<HashMap<String, String>> {
        Ok(self
            .list_documents()?
            .into_iter()
            .map(|d| (d.id, d.name))
            .collect())
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    /// Get a setting, returning the default if not set.
    pub fn get_setting_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_setting(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(result)
    }
}

impl std::fmt::Debug for ConfigDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDb").finish_non_exhaustive()
    }
}
