// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Scoped substitution of release fields.
//!
//! Every substitution targets one located field of a [`FormulaDocument`].
//! Plain text search and replace is never used, so a resource checksum
//! cannot be clobbered by the primary one, and an old version number that
//! happens to appear in an unrelated string stays untouched.

use crate::{
    formula::document::{FieldChange, FormulaDocument},
    release::{Checksum, ReleaseDescriptor, ReleaseUrl, Version},
};

use tracing::{debug, warn};

/// New values for a resource block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePatch {
    /// Name of the resource block.
    pub name: String,

    /// New download URL, if it could be derived.
    pub url: Option<String>,

    /// New checksum, if it is known.
    pub checksum: Option<Checksum>,
}

/// Patched formula text with every change made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patched {
    pub text: String,
    pub changes: Vec<FieldChange>,
}

/// Apply release to formula.
///
/// # Errors
///
/// - Return [`PatchError::MissingField`] if the primary `url`, `version`, or
///   `sha256` field cannot be found.
pub fn apply(
    document: &FormulaDocument,
    descriptor: &ReleaseDescriptor,
    resource: Option<&ResourcePatch>,
) -> Result<Patched> {
    let url = document
        .primary_url()
        .ok_or(PatchError::MissingField("url"))?;
    let version = document
        .top_level("version")
        .ok_or(PatchError::MissingField("version"))?;
    let checksum = document
        .primary_checksum()
        .ok_or(PatchError::MissingField("sha256"))?;

    let old_tag = previous_tag(&url.value, &version.value);
    let mut edit = document.edit();
    edit.replace(url, descriptor.binary_url.as_str());
    edit.replace(version, descriptor.version.bare());
    edit.replace(checksum, descriptor.checksum.as_str());

    if let Some(resource) = resource {
        if let (Some(field), Some(new)) = (
            document.resource_field(&resource.name, "url"),
            resource.url.as_deref(),
        ) {
            edit.replace(field, new);
        }

        match (
            document.resource_field(&resource.name, "sha256"),
            resource.checksum.as_ref(),
        ) {
            (Some(field), Some(new)) => edit.replace(field, new.as_str()),
            (Some(field), None) => warn!(
                "checksum of resource {:?} at line {} left stale",
                resource.name, field.line
            ),
            (None, _) => debug!("resource {:?} has no checksum field", resource.name),
        }
    }

    if let Some(old_tag) = old_tag.as_deref() {
        for literal in document.install_literals() {
            let new = replace_token(&literal.value, old_tag, descriptor.version.tag());
            edit.replace(literal, new);
        }
    }

    let (text, changes) = edit.finish();

    Ok(Patched { text, changes })
}

/// Derive new URL of a secondary artifact.
///
/// The release segment of the URL is replaced by the new tag, and the old tag
/// (or the old bare version, when the file name carries no `v`) inside its
/// file name is replaced by its new counterpart. Returns [`None`] if the URL
/// is not a release download URL.
pub fn rewrite_resource_url(url: &str, version: &Version) -> Option<String> {
    let release = ReleaseUrl::parse(url).ok()?;
    let old_tag = release.tag();
    let old_bare = old_tag.strip_prefix('v').unwrap_or(old_tag);
    let filename = release.filename();

    let filename = if contains_token(filename, old_tag) {
        replace_token(filename, old_tag, version.tag())
    } else {
        replace_token(filename, old_bare, version.bare())
    };

    Some(release.at(version.tag(), filename))
}

fn previous_tag(url: &str, version: &str) -> Option<String> {
    if let Ok(release) = ReleaseUrl::parse(url) {
        return Some(release.tag().into());
    }

    Version::parse(format!("v{version}"))
        .ok()
        .map(|version| version.tag().into())
}

/// Replace whole version tokens only.
///
/// An occurrence counts when it is not glued to a longer version number, so
/// replacing `1.2.2` leaves `1.2.22` and `11.2.2` alone.
pub fn replace_token(haystack: &str, old: &str, new: &str) -> String {
    if old.is_empty() {
        return haystack.into();
    }

    let mut result = String::with_capacity(haystack.len());
    let mut rest = 0;
    for (start, _) in haystack.match_indices(old) {
        if start < rest || !is_token(haystack, start, old.len()) {
            continue;
        }
        result.push_str(&haystack[rest..start]);
        result.push_str(new);
        rest = start + old.len();
    }
    result.push_str(&haystack[rest..]);

    result
}

fn contains_token(haystack: &str, token: &str) -> bool {
    !token.is_empty()
        && haystack
            .match_indices(token)
            .any(|(start, _)| is_token(haystack, start, token.len()))
}

fn is_token(haystack: &str, start: usize, len: usize) -> bool {
    let before = haystack[..start].chars().next_back();
    let after = haystack[start + len..].chars().next();
    let glued_before = before.is_some_and(|c| c.is_ascii_digit() || c == '.');
    let glued_after = after.is_some_and(|c| c.is_ascii_digit())
        || (after == Some('.') && haystack[start + len + 1..].starts_with(|c: char| c.is_ascii_digit()));

    !glued_before && !glued_after
}

/// Patch error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    /// Formula lacks a field that must be patched.
    #[error("formula has no top-level {0:?} field")]
    MissingField(&'static str),
}

/// Friendly result alias :3
type Result<T, E = PatchError> = std::result::Result<T, E>;
