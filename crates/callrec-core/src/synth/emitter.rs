//! Test synthesis: one catalog record in, one standalone Python test out.
//!
//! A synthesized test imports the recorded symbol, reloads the captured
//! arguments and result from their blobs, replays the call, and asserts the
//! outcome. Results whose type has no equality of its own are compared
//! structurally (same type, same instance attributes) instead of with `==`,
//! which would otherwise fall back to identity and always fail.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::SynthesisPolicy;
use crate::errors::CallrecError;
use crate::models::Value;
use crate::recorder::identity::is_identifier;
use crate::store::blob::{read_args, read_result, CallPayload};
use crate::store::catalog::{CatalogRecord, MetaFile};

/// Decoder for tagged JSON blobs, embedded in every synthesized test.
///
/// Every module-level name it binds or reads carries the `_callrec_` prefix,
/// so the recorded symbol imported after it can never shadow the decoder.
const DECODER_PRELUDE: &str = r#"import builtins as _callrec_builtins
import importlib as _callrec_importlib
import json as _callrec_json


def _callrec_decode(node):
    kind = node["kind"]
    value = node.get("value")
    if kind == "none":
        return None
    if kind in ("bool", "int", "str"):
        return value
    if kind == "big_int":
        return _callrec_builtins.int(value)
    if kind == "float":
        return _callrec_builtins.float(value)
    if kind == "bytes":
        return _callrec_builtins.bytes.fromhex(value)
    if kind == "list":
        return [_callrec_decode(item) for item in value]
    if kind == "tuple":
        return _callrec_builtins.tuple(_callrec_decode(item) for item in value)
    if kind == "set":
        return _callrec_builtins.set(_callrec_decode(item) for item in value)
    if kind == "dict":
        return {_callrec_decode(k): _callrec_decode(v) for k, v in value}
    if kind == "object":
        owner = _callrec_importlib.import_module(value["module"])
        for part in value["type_name"].split("."):
            owner = _callrec_builtins.getattr(owner, part)
        instance = owner.__new__(owner)
        instance.__dict__.update(
            {name: _callrec_decode(field) for name, field in value["fields"].items()}
        )
        return instance
    raise _callrec_builtins.ValueError("unsupported payload kind: %s" % kind)


def _callrec_load(path):
    with _callrec_builtins.open(path, "r", encoding="utf-8") as handle:
        node = _callrec_json.load(handle)
    if _callrec_builtins.isinstance(node, _callrec_builtins.list):
        return (
            _callrec_builtins.tuple(_callrec_decode(item) for item in node[0]),
            {name: _callrec_decode(arg) for name, arg in node[1].items()},
        )
    return _callrec_decode(node)
"#;

// Module-level names of a synthesized test.
const PAYLOAD_VAR: &str = "_callrec_payload";
const POS_VAR: &str = "_callrec_pos_args";
const KW_VAR: &str = "_callrec_kw_args";
const EXPECTED_VAR: &str = "_callrec_expected";
const ACTUAL_VAR: &str = "_callrec_actual";

const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Why a record produced no test.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SkipReason {
    MissingBlob,
    EmptyPayload,
    Undecodable,
    NullResult,
    NoArguments,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::MissingBlob => "missing_blob",
            SkipReason::EmptyPayload => "empty_payload",
            SkipReason::Undecodable => "undecodable",
            SkipReason::NullResult => "null_result",
            SkipReason::NoArguments => "no_arguments",
        }
    }
}

#[derive(Clone, Debug)]
pub struct SynthesizedTest {
    pub source_text: String,
    pub file_path: PathBuf,
    pub originating_record: CatalogRecord,
}

#[derive(Clone, Debug)]
pub enum Synthesis {
    Test(SynthesizedTest),
    Skipped(SkipReason),
}

// ---------------------------------------------------------------------------
// Python source helpers
// ---------------------------------------------------------------------------

/// A single-quoted Python string literal.
pub fn py_str_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c == '\u{7f}' => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn is_plain_kwarg(name: &str) -> bool {
    is_identifier(name) && !PYTHON_KEYWORDS.contains(&name)
}

pub fn pos_arg_name(index: usize) -> String {
    format!("_callrec_pos_arg_{index:02}")
}

fn call_arguments(payload: &CallPayload) -> String {
    let mut args: Vec<String> = (0..payload.pos_args.len()).map(pos_arg_name).collect();
    let mut unpacked: Vec<String> = Vec::new();
    for name in payload.kw_args.keys() {
        let lookup = format!("{KW_VAR}[{}]", py_str_literal(name));
        if is_plain_kwarg(name) {
            args.push(format!("{name}={lookup}"));
        } else {
            unpacked.push(format!("{}: {lookup}", py_str_literal(name)));
        }
    }
    if !unpacked.is_empty() {
        args.push(format!("**{{{}}}", unpacked.join(", ")));
    }
    args.join(", ")
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Render the test source for a record whose payloads are already decoded.
pub fn render_test(
    record: &CatalogRecord,
    payload: &CallPayload,
    expected: &Value,
    policy: &SynthesisPolicy,
) -> String {
    let args_path = py_str_literal(&record.args_blob_path.to_string_lossy());
    let result_path = py_str_literal(&record.result_blob_path.to_string_lossy());
    let pos_placeholder = policy.placeholder_for_empty && payload.pos_args.is_empty();
    let kw_placeholder = policy.placeholder_for_empty && payload.kw_args.is_empty();

    let mut src = String::new();
    let _ = writeln!(
        src,
        "# Replays a recorded call of {} and checks the recorded result.",
        record.callee_expression()
    );
    src.push_str(DECODER_PRELUDE);
    src.push('\n');
    let _ = writeln!(src, "{}", record.import_expression);
    src.push('\n');

    if !(pos_placeholder && kw_placeholder) {
        let _ = writeln!(src, "{PAYLOAD_VAR} = _callrec_load({args_path})");
    }
    if pos_placeholder {
        let _ = writeln!(src, "{POS_VAR} = ()");
    } else {
        let _ = writeln!(src, "{POS_VAR} = {PAYLOAD_VAR}[0]");
    }
    if kw_placeholder {
        let _ = writeln!(src, "{KW_VAR} = {{}}");
    } else {
        let _ = writeln!(src, "{KW_VAR} = {PAYLOAD_VAR}[1]");
    }
    let _ = writeln!(src, "{EXPECTED_VAR} = _callrec_load({result_path})");
    let _ = writeln!(src, "assert {EXPECTED_VAR} is not None\n");

    match payload.pos_args.len() {
        0 => {}
        // A lone argument binds as the value itself, never as a 1-tuple.
        1 => {
            let _ = writeln!(src, "{} = {POS_VAR}[0]", pos_arg_name(0));
        }
        n => {
            let names: Vec<String> = (0..n).map(pos_arg_name).collect();
            let _ = writeln!(src, "{} = {POS_VAR}", names.join(", "));
        }
    }

    let _ = writeln!(
        src,
        "{ACTUAL_VAR} = {}({})",
        record.callee_expression(),
        call_arguments(payload)
    );
    src.push('\n');

    if expected.needs_structural_comparison() {
        for builtin in ["type", "vars"] {
            let _ = writeln!(
                src,
                "assert _callrec_builtins.{builtin}({ACTUAL_VAR}) \
                 == _callrec_builtins.{builtin}({EXPECTED_VAR})"
            );
        }
    } else {
        let _ = writeln!(src, "assert {ACTUAL_VAR} == {EXPECTED_VAR}");
    }
    src
}

fn load_failure(err: &CallrecError) -> SkipReason {
    match err {
        CallrecError::EmptyPayload(_) => SkipReason::EmptyPayload,
        _ => SkipReason::Undecodable,
    }
}

/// Where the test for `meta` lives: `<out_base>/<run>/test_<seq>_<site>.py`.
pub fn test_path_for(meta: &MetaFile, out_base: &Path) -> PathBuf {
    let run = meta.log_dir_name().unwrap_or_else(|| "unsorted".to_string());
    out_base.join(run).join(meta.key.test_file_name())
}

/// Synthesize the test for one catalog record. Nothing is written to disk.
pub fn synthesize(meta: &MetaFile, out_base: &Path, policy: &SynthesisPolicy) -> Synthesis {
    let record = &meta.record;
    let skip = |reason: SkipReason| {
        debug!(meta = %meta.path.display(), reason = reason.as_str(), "no test synthesized");
        Synthesis::Skipped(reason)
    };

    if !record.args_blob_path.is_file() || !record.result_blob_path.is_file() {
        return skip(SkipReason::MissingBlob);
    }
    let payload = match read_args(&record.args_blob_path) {
        Ok(p) => p,
        Err(e) => return skip(load_failure(&e)),
    };
    let expected = match read_result(&record.result_blob_path) {
        Ok(v) => v,
        Err(e) => return skip(load_failure(&e)),
    };
    if expected.is_none() {
        return skip(SkipReason::NullResult);
    }
    if policy.skip_no_arg_calls && payload.is_empty() {
        return skip(SkipReason::NoArguments);
    }

    Synthesis::Test(SynthesizedTest {
        source_text: render_test(record, &payload, &expected, policy),
        file_path: test_path_for(meta, out_base),
        originating_record: record.clone(),
    })
}
