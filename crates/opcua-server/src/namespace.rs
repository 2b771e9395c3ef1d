//! Namespace registry (component B): an append-only URI table indexed by 16-bit
//! handles, with index 0 fixed to the OPC Foundation namespace and index 1 lazily
//! populated from the application URI.

use opcua_core::ServerError;

pub const OPC_FOUNDATION_NAMESPACE: &str = "http://opcfoundation.org/UA/";

/// The namespace table. `add`/`lookup_by_uri`/`lookup_by_index` are the only mutating
/// and reading surface; `setup_ns1` is called at the entry of every public operation
/// plus once at startup, matching the "any observable read sees ns1 populated"
/// property.
#[derive(Debug)]
pub struct NamespaceTable {
    uris: Vec<String>,
    application_uri: String,
}

impl NamespaceTable {
    /// A fresh table with only index 0 populated; index 1 remains empty until
    /// `setup_ns1` runs (lazily, or explicitly at `startup`).
    pub fn new(application_uri: impl Into<String>) -> Self {
        Self {
            uris: vec![OPC_FOUNDATION_NAMESPACE.to_string(), String::new()],
            application_uri: application_uri.into(),
        }
    }

    /// Populates index 1 from the application URI if it is currently empty and the
    /// application URI is non-empty. A no-op otherwise, so repeated calls are cheap.
    pub fn setup_ns1(&mut self) {
        if self.uris[1].is_empty() && !self.application_uri.is_empty() {
            self.uris[1] = self.application_uri.clone();
        }
    }

    /// Returns the index of `uri`, appending a new entry if it is not already
    /// present. Idempotent: a second `add` of the same URI returns the same index and
    /// leaves the table size unchanged.
    pub fn add(&mut self, uri: &str) -> Result<u16, ServerError> {
        self.setup_ns1();
        if let Some(index) = self.position(uri) {
            return Ok(index);
        }
        let index = self.uris.len();
        if index > u16::MAX as usize {
            return Err(ServerError::out_of_memory("namespace table exhausted 16-bit index space"));
        }
        self.uris.push(uri.to_string());
        Ok(index as u16)
    }

    pub fn lookup_by_uri(&mut self, uri: &str) -> Result<u16, ServerError> {
        self.setup_ns1();
        self.position(uri)
            .ok_or_else(|| ServerError::namespace_not_found(format!("no namespace registered for `{uri}`")))
    }

    /// Out-of-range is `index >= size`, not `index > size`: `index == size` would read
    /// one past the last element.
    pub fn lookup_by_index(&mut self, index: u16) -> Result<&str, ServerError> {
        self.setup_ns1();
        let index = index as usize;
        if index >= self.uris.len() {
            return Err(ServerError::namespace_not_found(format!("namespace index {index} out of range")));
        }
        Ok(&self.uris[index])
    }

    pub fn len(&self) -> usize {
        self.uris.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uris.is_empty()
    }

    fn position(&self, uri: &str) -> Option<u16> {
        self.uris.iter().position(|entry| entry == uri).map(|i| i as u16)
    }
}
