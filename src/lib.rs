// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Release automation for a package-manager tap.
//!
//! A __tap__ is a Git repository of formula files. Each formula describes
//! where a release artifact lives, which version it is, and what its SHA-256
//! checksum should be. Tapsmith keeps one such formula in step with upstream
//! releases in two stages:
//!
//! 1. The [`artifact`] stage fetches the release artifact with bounded
//!    retries and proves that it is what the release claims it is. Nothing
//!    persistent is touched here.
//! 2. The [`formula`] stage rewrites the formula's version, URL, and checksum
//!    fields, validates the result, rolls back on failure, and records the
//!    change in the tap's commit history.
//!
//! Failures of either stage are summarized as a [`report::FailureReport`] so
//! that an outside issue reporter can file them.

pub mod artifact;
pub mod config;
pub mod formula;
pub mod path;
pub mod release;
pub mod report;
