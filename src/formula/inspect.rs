// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Post-patch formula inspection.
//!
//! A patched formula is only promoted over the original if inspection finds
//! no defect at all. Every check runs, so the report lists every problem at
//! once instead of the first one.

use crate::{formula::document::FormulaDocument, release::ReleaseDescriptor};

use std::fmt::{Display, Formatter, Result as FmtResult};

const REQUIRED_FIELDS: &[&str] = &["desc", "homepage", "url", "version", "sha256"];

/// Defects found in a patched formula.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// Broken nesting or quoting, and missing required parts.
    pub structural: Vec<String>,

    /// Fields that disagree with the release.
    pub content: Vec<String>,

    /// Template markers left in the formula.
    pub placeholders: Vec<String>,
}

impl ValidationReport {
    /// Total number of defects.
    pub fn defect_count(&self) -> usize {
        self.structural.len() + self.content.len() + self.placeholders.len()
    }

    /// Check if no defect was found.
    pub fn is_clean(&self) -> bool {
        self.defect_count() == 0
    }
}

impl Display for ValidationReport {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        if self.is_clean() {
            return fmt.write_str("no defects");
        }

        write!(fmt, "{} defect(s):", self.defect_count())?;
        let sections = [
            ("structural", &self.structural),
            ("content", &self.content),
            ("placeholder", &self.placeholders),
        ];
        for (kind, defects) in sections {
            for defect in defects {
                write!(fmt, "\n  - {kind}: {defect}")?;
            }
        }

        Ok(())
    }
}

/// Inspect patched formula against the release it was patched for.
pub fn inspect(
    document: &FormulaDocument,
    descriptor: &ReleaseDescriptor,
    placeholders: &[String],
) -> ValidationReport {
    let mut report = ValidationReport {
        structural: document.syntax_issues().to_vec(),
        ..ValidationReport::default()
    };

    if document.class_name().is_none() {
        report
            .structural
            .push("missing `class ... < Formula` declaration".into());
    }
    for key in REQUIRED_FIELDS {
        if document.top_level(key).is_none() {
            report
                .structural
                .push(format!("missing top-level `{key}` field"));
        }
    }
    if !document.has_install() {
        report.structural.push("missing `def install` step".into());
    }

    if let Some(version) = document.top_level("version") {
        if version.value != descriptor.version.bare() {
            report.content.push(format!(
                "line {}: version is {:?}, expected {:?}",
                version.line,
                version.value,
                descriptor.version.bare()
            ));
        }
    }

    match document.primary_checksum() {
        Some(checksum) if descriptor.checksum.matches(&checksum.value) => {}
        Some(checksum) => report.content.push(format!(
            "line {}: checksum is {:?}, expected {:?}",
            checksum.line,
            checksum.value,
            descriptor.checksum.as_str()
        )),
        None => {}
    }
    if !document.as_str().contains(descriptor.checksum.as_str()) {
        report.content.push(format!(
            "checksum {:?} does not appear in formula",
            descriptor.checksum.as_str()
        ));
    }

    if let Some(url) = document.primary_url() {
        let segment = format!("/{}/", descriptor.version.tag());
        if !url.value.contains(&segment) {
            report.content.push(format!(
                "line {}: url {:?} does not contain {segment:?}",
                url.line, url.value
            ));
        }
    }

    for placeholder in placeholders.iter().filter(|token| !token.is_empty()) {
        for (index, line) in document.as_str().lines().enumerate() {
            if line.contains(placeholder.as_str()) {
                report
                    .placeholders
                    .push(format!("line {}: {placeholder:?} left in formula", index + 1));
            }
        }
    }

    report
}
