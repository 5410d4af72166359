//! Metadata catalog: one five-line text record per captured call.
//!
//! ```text
//! <symbol_name>
//! <owner_type_name | NOT_A_CLASS_METHOD>
//! <import_expression>
//! <args_blob_path>
//! <result_blob_path>
//! ```
//!
//! Capture files share a zero-padded `<sequence>_<site-id>` prefix, so a
//! directory listing sorts in capture order and the pair can be recovered
//! from any file name alone.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use walkdir::WalkDir;

use crate::config::ZERO_PAD_WIDTH;
use crate::errors::{CallrecError, CallrecResult};
use crate::models::ResolvedIdentity;

// ---------------------------------------------------------------------------
// Format constants
// ---------------------------------------------------------------------------

/// Owner-field sentinel for callables that are not methods of a class.
pub const NOT_CLASS_METHOD: &str = "NOT_A_CLASS_METHOD";

pub const META_SUFFIX: &str = "_META.txt";
pub const CALL_SUFFIX: &str = "_CALL.json";
pub const RETURN_SUFFIX: &str = "_RETURN.json";
pub const ERROR_LOG_NAME: &str = "error.txt";
pub const TEST_FILE_PREFIX: &str = "test_";
pub const TEST_FILE_SUFFIX: &str = ".py";

const RECORD_LINES: usize = 5;

static CAPTURE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:test_)?(\d+)_(\d+)(?:_(?:META|CALL|RETURN))?\.[A-Za-z0-9]+$").unwrap()
});

// ---------------------------------------------------------------------------
// CaptureKey
// ---------------------------------------------------------------------------

/// The `(sequence, site-id)` pair naming every file of one capture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CaptureKey {
    pub sequence: u64,
    pub site_id: u64,
}

impl CaptureKey {
    pub fn new(sequence: u64, site_id: u64) -> Self {
        Self { sequence, site_id }
    }

    pub fn prefix(&self) -> String {
        format!(
            "{:0width$}_{:0width$}",
            self.sequence,
            self.site_id,
            width = ZERO_PAD_WIDTH
        )
    }

    pub fn meta_file_name(&self) -> String {
        format!("{}{META_SUFFIX}", self.prefix())
    }

    pub fn call_blob_name(&self) -> String {
        format!("{}{CALL_SUFFIX}", self.prefix())
    }

    pub fn return_blob_name(&self) -> String {
        format!("{}{RETURN_SUFFIX}", self.prefix())
    }

    /// `test_<sequence>_<site-id>`
    pub fn test_case_name(&self) -> String {
        format!("{TEST_FILE_PREFIX}{}", self.prefix())
    }

    pub fn test_file_name(&self) -> String {
        format!("{}{TEST_FILE_SUFFIX}", self.test_case_name())
    }

    /// Recover the key from a capture file or synthesized test file name.
    pub fn parse_file_name(file_name: &str) -> Option<Self> {
        let caps = CAPTURE_NAME_RE.captures(file_name)?;
        let sequence = caps.get(1)?.as_str().parse().ok()?;
        let site_id = caps.get(2)?.as_str().parse().ok()?;
        Some(Self { sequence, site_id })
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_name()
            .and_then(|n| n.to_str())
            .and_then(Self::parse_file_name)
    }
}

// ---------------------------------------------------------------------------
// CatalogRecord
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogRecord {
    pub symbol_name: String,
    /// `None` is stored on disk as [`NOT_CLASS_METHOD`].
    pub owner_type_name: Option<String>,
    pub import_expression: String,
    pub args_blob_path: PathBuf,
    pub result_blob_path: PathBuf,
}

impl CatalogRecord {
    /// Build a record from a resolved identity; `None` unless both the symbol
    /// name and the import expression were resolved.
    pub fn from_identity(
        identity: &ResolvedIdentity,
        args_blob_path: PathBuf,
        result_blob_path: PathBuf,
    ) -> Option<Self> {
        Some(Self {
            symbol_name: identity.symbol_name.clone()?,
            owner_type_name: identity.owner_type_name.clone(),
            import_expression: identity.import_expression.clone()?,
            args_blob_path,
            result_blob_path,
        })
    }

    pub fn owner_field(&self) -> &str {
        self.owner_type_name.as_deref().unwrap_or(NOT_CLASS_METHOD)
    }

    /// The expression a synthesized test calls: `Owner.symbol` or `symbol`.
    pub fn callee_expression(&self) -> String {
        match &self.owner_type_name {
            Some(owner) => format!("{owner}.{}", self.symbol_name),
            None => self.symbol_name.clone(),
        }
    }

    fn fields(&self) -> [String; RECORD_LINES] {
        [
            self.symbol_name.clone(),
            self.owner_field().to_string(),
            self.import_expression.clone(),
            self.args_blob_path.to_string_lossy().into_owned(),
            self.result_blob_path.to_string_lossy().into_owned(),
        ]
    }

    pub fn to_text(&self) -> CallrecResult<String> {
        let mut text = String::new();
        for field in self.fields() {
            if field.is_empty() || field.contains(['\n', '\r']) {
                return Err(CallrecError::Catalog(format!(
                    "field {field:?} cannot be stored on a single line"
                )));
            }
            text.push_str(&field);
            text.push('\n');
        }
        Ok(text)
    }

    pub fn parse(text: &str) -> CallrecResult<Self> {
        let lines: Vec<&str> = text.lines().map(|l| l.trim_end_matches('\r')).collect();
        if lines.len() != RECORD_LINES {
            return Err(CallrecError::Catalog(format!(
                "expected {RECORD_LINES} lines, found {}",
                lines.len()
            )));
        }
        if let Some(idx) = lines.iter().position(|l| l.is_empty()) {
            return Err(CallrecError::Catalog(format!("line {} is empty", idx + 1)));
        }
        let owner_type_name = match lines[1] {
            NOT_CLASS_METHOD => None,
            owner => Some(owner.to_string()),
        };
        Ok(Self {
            symbol_name: lines[0].to_string(),
            owner_type_name,
            import_expression: lines[2].to_string(),
            args_blob_path: PathBuf::from(lines[3]),
            result_blob_path: PathBuf::from(lines[4]),
        })
    }

    /// Write through a temporary sibling and rename, so a reader never sees a
    /// partially written record.
    pub fn write_to(&self, path: &Path) -> CallrecResult<()> {
        let text = self.to_text()?;
        let tmp = path.with_extension("txt.partial");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(text.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> CallrecResult<Self> {
        Self::parse(&fs::read_to_string(path)?)
    }
}

// ---------------------------------------------------------------------------
// MetaFile
// ---------------------------------------------------------------------------

/// A catalog record together with where it was read from.
#[derive(Clone, Debug)]
pub struct MetaFile {
    pub path: PathBuf,
    pub key: CaptureKey,
    pub record: CatalogRecord,
}

impl MetaFile {
    pub fn load(path: &Path) -> CallrecResult<Self> {
        if !is_meta_file(path) {
            return Err(CallrecError::Catalog(format!(
                "{} is not a meta file",
                path.display()
            )));
        }
        let key = CaptureKey::from_path(path).ok_or_else(|| {
            CallrecError::Catalog(format!("{} has no capture prefix", path.display()))
        })?;
        let record = CatalogRecord::read_from(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            key,
            record,
        })
    }

    /// Name of the capture run directory holding this record.
    pub fn log_dir_name(&self) -> Option<String> {
        self.path
            .parent()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
    }

    pub fn test_case_name(&self) -> String {
        self.key.test_case_name()
    }
}

pub fn is_meta_file(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(META_SUFFIX))
}

/// Every meta file exactly one run directory below `log_base`, in run order
/// then capture order.
pub fn discover_meta_files(log_base: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(log_base)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(Result::ok)
        .map(|entry| entry.into_path())
        .filter(|path| is_meta_file(path))
        .collect();
    found.sort();
    found
}

/// Map a synthesized test file back to the catalog record it came from.
///
/// Pure path arithmetic: `<out>/<run>/test_<seq>_<site>.py` maps to
/// `<log_base>/<run>/<seq>_<site>_META.txt`.
pub fn meta_path_for_test(test_path: &Path, log_base: &Path) -> Option<PathBuf> {
    let key = CaptureKey::from_path(test_path)?;
    let run = test_path.parent()?.file_name()?;
    Some(log_base.join(run).join(key.meta_file_name()))
}

/// Symbol name for a synthesized test, read from its originating record.
pub fn symbol_for_test(test_path: &Path, log_base: &Path) -> Option<String> {
    let meta = meta_path_for_test(test_path, log_base)?;
    CatalogRecord::read_from(&meta)
        .map(|record| record.symbol_name)
        .ok()
}
