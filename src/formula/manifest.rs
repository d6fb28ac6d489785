// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Checksums manifest lookup.
//!
//! Releases may ship a manifest listing the SHA-256 of every attached file,
//! one per line in the usual `sha256sum` layout:
//!
//! ```text
//! 0f3a...  sentinel-v1.2.3-macos
//! 9c1e... *Extension-v1.2.3.tar.gz
//! ```
//!
//! The asterisk marks binary mode, and is ignored.

use crate::release::Checksum;

/// Find checksum of target file in manifest text.
///
/// Returns [`None`] if no line names the file, or if the checksum on the
/// matching line is malformed.
pub fn find_checksum(manifest: &str, filename: &str) -> Option<Checksum> {
    manifest.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let hex = parts.next()?;
        let name = parts.next()?.trim_start_matches('*');
        if name != filename || parts.next().is_some() {
            return None;
        }

        Checksum::parse(hex).ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::formatdoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn find_checksum_by_filename() {
        let manifest = formatdoc! {"
            {}  sentinel-v1.2.3-macos
            {} *Extension-v1.2.3.tar.gz
        ", "a".repeat(64), "B".repeat(64)};

        assert_eq!(
            find_checksum(&manifest, "Extension-v1.2.3.tar.gz").map(|sum| sum.to_string()),
            Some("B".repeat(64))
        );
        assert_eq!(
            find_checksum(&manifest, "sentinel-v1.2.3-macos").map(|sum| sum.to_string()),
            Some("a".repeat(64))
        );
        assert_eq!(find_checksum(&manifest, "sentinel"), None);
    }

    #[test]
    fn find_checksum_rejects_malformed_value() {
        let manifest = "not-a-checksum  Extension-v1.2.3.tar.gz\n";
        assert_eq!(find_checksum(manifest, "Extension-v1.2.3.tar.gz"), None);
    }
}
