//! Glob pattern compilation for rule domain matching.

use anyhow::{Result, anyhow};
use regex::Regex;

/// Compile a glob pattern (where `*` matches any sequence) into an anchored
/// regex. Done once at rule load time to keep the hot path free of regex
/// compilation.
pub fn compile_glob_pattern(pattern: &str) -> Result<Regex> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    let anchored = format!("^{escaped}$");
    Regex::new(&anchored).map_err(|e| anyhow!("invalid glob pattern '{pattern}': {e}"))
}
