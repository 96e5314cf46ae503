//! File-tree model shared with the file-storage gateway.
//!
//! The gateway's metadata endpoint lists folder children as JSON entries;
//! assembled trees nest those entries under their parent folders. File sizes
//! arrive as JSON numbers or as decimal strings depending on the upstream
//! provider, so the size field accepts both.

use serde::{Deserialize, Serialize};

/// Kind of a file-tree entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Folder,
}

/// One entry in a provider file tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Provider-relative path ("/", "/qwerty", "/qwerty/asdfgh")
    pub path: String,
    /// Display name; empty for the root folder
    pub name: String,
    pub kind: FileKind,
    /// File size in bytes; absent for folders and for providers that do not
    /// report sizes
    #[serde(
        default,
        with = "size_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub size: Option<u64>,
    /// Folder children; empty until fetched, always empty for files
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileEntry>,
}

/// Size values come back as numbers or decimal strings; accept both.
mod size_field {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }

    pub fn serialize<S>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(n) => serializer.serialize_u64(*n),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::Num(n)) => Ok(Some(n)),
            Some(Raw::Str(s)) => s
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

impl FileEntry {
    /// The root folder every provider tree starts from
    #[must_use]
    pub fn root() -> Self {
        Self {
            path: "/".to_string(),
            name: String::new(),
            kind: FileKind::Folder,
            size: None,
            children: Vec::new(),
        }
    }

    /// Construct a file entry
    #[must_use]
    pub fn file(path: impl Into<String>, name: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            kind: FileKind::File,
            size: Some(size),
            children: Vec::new(),
        }
    }

    /// Construct a folder entry with children
    #[must_use]
    pub fn folder(
        path: impl Into<String>,
        name: impl Into<String>,
        children: Vec<FileEntry>,
    ) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            kind: FileKind::Folder,
            size: None,
            children,
        }
    }

    #[must_use]
    pub fn is_folder(&self) -> bool {
        self.kind == FileKind::Folder
    }
}
