//! Display handlers resolved through an explicit registry.
//!
//! Node types can carry a post-processing step that shapes their export
//! data just before encoding (formatting, redaction, derived fields). The
//! registry is a plain value passed to the encoder — there is no
//! process-wide mutable table.

use serde_json::{Map, Value};

type Handler = Box<dyn Fn(&mut Map<String, Value>)>;

/// Per-node-type export-data post-processors.
#[derive(Default)]
pub struct DisplayRegistry {
    handlers: ahash::AHashMap<String, Handler>,
}

impl std::fmt::Debug for DisplayRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayRegistry")
            .field("types", &self.handlers.len())
            .finish()
    }
}

impl DisplayRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `cell_type`, replacing any previous one.
    pub fn register(
        &mut self,
        cell_type: impl Into<String>,
        handler: impl Fn(&mut Map<String, Value>) + 'static,
    ) {
        self.handlers.insert(cell_type.into(), Box::new(handler));
    }

    /// Apply the handler for `cell_type` to `export`, if one exists.
    pub fn apply(&self, cell_type: &str, export: &mut Map<String, Value>) {
        if let Some(handler) = self.handlers.get(cell_type) {
            handler(export);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
