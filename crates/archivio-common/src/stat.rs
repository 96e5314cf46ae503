//! File-tree statistics.
//!
//! Before any copy is requested the archiver walks each provider's assembled
//! file tree and rolls the leaf sizes up into an [`AggregateStatResult`]. The
//! per-provider results roll up once more into a registration-wide total that
//! is checked against the configured size cap.

use serde::{Deserialize, Serialize};

use crate::filetree::{FileEntry, FileKind};
use crate::types::Provider;

/// Rolled-up usage numbers for one target (a file, a provider, or a whole
/// registration).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateStatResult {
    /// What was measured: a file path, a provider name, or a registration id
    pub target_id: String,
    pub target_name: String,
    /// Total bytes under this target
    pub disk_usage: u64,
    /// Number of files under this target
    pub num_files: u64,
    /// Per-child breakdown; empty for file leaves. Stat results are stored
    /// through bincode, so every field is always written.
    pub targets: Vec<AggregateStatResult>,
}

impl AggregateStatResult {
    /// Result for a single file. A missing size counts as zero bytes.
    #[must_use]
    pub fn leaf(entry: &FileEntry) -> Self {
        Self {
            target_id: entry.path.clone(),
            target_name: entry.name.clone(),
            disk_usage: entry.size.unwrap_or(0),
            num_files: 1,
            targets: Vec::new(),
        }
    }

    /// Sum child results into a single roll-up.
    #[must_use]
    pub fn roll_up(
        target_id: impl Into<String>,
        target_name: impl Into<String>,
        targets: Vec<AggregateStatResult>,
    ) -> Self {
        let disk_usage = targets.iter().map(|t| t.disk_usage).sum();
        let num_files = targets.iter().map(|t| t.num_files).sum();
        Self {
            target_id: target_id.into(),
            target_name: target_name.into(),
            disk_usage,
            num_files,
            targets,
        }
    }
}

/// Walk an assembled provider tree and roll every file leaf into one result.
///
/// Folders contribute nothing themselves; only file leaves carry size. The
/// returned `targets` holds one entry per file found, in tree order.
#[must_use]
pub fn aggregate_file_tree(provider: &Provider, tree: &FileEntry) -> AggregateStatResult {
    let mut leaves = Vec::new();
    collect_files(tree, &mut leaves);
    AggregateStatResult::roll_up(provider.as_str(), provider.as_str(), leaves)
}

fn collect_files(entry: &FileEntry, out: &mut Vec<AggregateStatResult>) {
    match entry.kind {
        FileKind::File => out.push(AggregateStatResult::leaf(entry)),
        FileKind::Folder => {
            for child in &entry.children {
                collect_files(child, out);
            }
        }
    }
}
