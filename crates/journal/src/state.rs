use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Read a JSON state file. A missing file is `None`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).or_raise(|| ErrorKind::Read(path.to_path_buf())),
    };
    serde_json::from_slice(&bytes).map(Some).or_raise(|| ErrorKind::Malformed(path.to_path_buf()))
}

/// Write a JSON state file through a temporary sibling so readers in other
/// processes never see a half-written document.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).or_raise(|| ErrorKind::Write(path.to_path_buf()))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes).or_raise(|| ErrorKind::Write(tmp.clone()))?;
    std::fs::rename(&tmp, path).or_raise(|| ErrorKind::Write(path.to_path_buf()))
}
