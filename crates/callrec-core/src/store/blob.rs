//! Payload blobs: the captured argument pair and the captured result.
//!
//! Blobs are tagged JSON (see [`Value`]). The args blob is the two-element
//! array `[positional, keyword]`; keyword order is preserved.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;

use crate::errors::{CallrecError, CallrecResult};
use crate::models::Value;

/// Decoded contents of an args blob.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CallPayload {
    pub pos_args: Vec<Value>,
    pub kw_args: IndexMap<String, Value>,
}

impl CallPayload {
    pub fn is_empty(&self) -> bool {
        self.pos_args.is_empty() && self.kw_args.is_empty()
    }
}

fn reject_opaque<'a>(values: impl IntoIterator<Item = &'a Value>) -> CallrecResult<()> {
    for value in values {
        if let Some(type_name) = value.find_opaque() {
            return Err(CallrecError::Unserializable(format!(
                "value of type {type_name} cannot be captured"
            )));
        }
    }
    Ok(())
}

pub fn encode_args(
    pos_args: &[Value],
    kw_args: &IndexMap<String, Value>,
) -> CallrecResult<Vec<u8>> {
    reject_opaque(pos_args.iter().chain(kw_args.values()))?;
    Ok(serde_json::to_vec(&(pos_args, kw_args))?)
}

pub fn encode_result(result: &Value) -> CallrecResult<Vec<u8>> {
    reject_opaque([result])?;
    Ok(serde_json::to_vec(result)?)
}

fn read_nonempty(path: &Path) -> CallrecResult<Vec<u8>> {
    let bytes = fs::read(path)?;
    if bytes.is_empty() {
        return Err(CallrecError::EmptyPayload(path.to_path_buf()));
    }
    Ok(bytes)
}

pub fn read_args(path: &Path) -> CallrecResult<CallPayload> {
    let bytes = read_nonempty(path)?;
    let (pos_args, kw_args): (Vec<Value>, IndexMap<String, Value>) =
        serde_json::from_slice(&bytes)?;
    Ok(CallPayload { pos_args, kw_args })
}

pub fn read_result(path: &Path) -> CallrecResult<Value> {
    let bytes = read_nonempty(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
