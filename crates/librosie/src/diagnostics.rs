use serde::Deserialize;

/// JSON-encoded diagnostics of one call. `None` means there were no
/// messages at all; an empty array is never produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics(Option<String>);

/// One diagnostic record, as produced by the pattern compiler and loader.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Record {
    pub who: String,
    pub severity: String,
    pub message: String,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub pos: Option<usize>,
}

impl Diagnostics {
    pub fn none() -> Self {
        Diagnostics(None)
    }

    pub(crate) fn from_json(json: Option<String>) -> Self {
        Diagnostics(json.filter(|s| !s.is_empty() && s != "[]"))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn as_json(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn into_json(self) -> Option<String> {
        self.0
    }

    /// Parse the records.
    pub fn records(&self) -> Vec<Record> {
        self.0
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default()
    }

    pub fn has_errors(&self) -> bool {
        self.records().iter().any(|r| r.severity == "error")
    }
}
