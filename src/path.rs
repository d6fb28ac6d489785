// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

/// Determine default absolute path to tapsmith's configuration file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/tapsmith/config.toml` as the
/// default absolute path. Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if configuration directory cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("tapsmith").join("config.toml"))
        .ok_or(NoWayHome)
}

/// Determine path of the snapshot kept for a formula file.
///
/// The snapshot sits next to the formula with `suffix` appended to its full
/// file name, e.g., `Formula/tool.rb` becomes `Formula/tool.rb.backup`.
pub fn backup_path(formula: impl AsRef<Path>, suffix: impl AsRef<str>) -> PathBuf {
    let mut name = OsString::from(formula.as_ref().as_os_str());
    name.push(suffix.as_ref());
    PathBuf::from(name)
}

/// Name a formula by its file stem.
pub fn formula_name(formula: impl AsRef<Path>) -> String {
    formula
        .as_ref()
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "formula".into())
}

/// No way to determine user's configuration directory.
///
/// # See Also
///
/// - [`dirs::config_dir`](https://docs.rs/dirs/latest/dirs/fn.config_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's configuration directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn backup_path_appends_suffix() {
        let result = backup_path("Formula/tool.rb", ".backup");
        assert_eq!(result, PathBuf::from("Formula/tool.rb.backup"));
    }

    #[test]
    fn formula_name_uses_file_stem() {
        assert_eq!(formula_name("Formula/sentinel.rb"), "sentinel");
    }
}
