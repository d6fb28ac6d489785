// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Content checks for downloaded artifacts.

use sha2::{Digest, Sha256};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

/// Compute hexadecimal SHA-256 digest of a file.
///
/// Reads the file in fixed chunks, so artifacts of any size hash in constant
/// memory.
pub fn sha256_file(path: impl AsRef<Path>) -> std::io::Result<String> {
    let mut reader = BufReader::new(File::open(path.as_ref())?);
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 64 * 1024];
    loop {
        let count = reader.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Kind of archive recognized by its leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Gzip,
    Bzip2,
    Xz,
    Zstd,
    Tar,
}

impl Display for ArchiveKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::Gzip => "gzip compressed data",
            Self::Bzip2 => "bzip2 compressed data",
            Self::Xz => "xz compressed data",
            Self::Zstd => "zstd compressed data",
            Self::Tar => "tar archive",
        };
        fmt.write_str(name)
    }
}

/// Recognize compressed tarball by magic bytes.
///
/// Only a heuristic. Returns [`None`] for anything it does not know.
pub fn detect_archive(header: &[u8]) -> Option<ArchiveKind> {
    match header {
        [0x1F, 0x8B, ..] => Some(ArchiveKind::Gzip),
        [b'B', b'Z', b'h', ..] => Some(ArchiveKind::Bzip2),
        [0xFD, b'7', b'z', b'X', b'Z', 0x00, ..] => Some(ArchiveKind::Xz),
        [0x28, 0xB5, 0x2F, 0xFD, ..] => Some(ArchiveKind::Zstd),
        _ if header.len() >= 263 && &header[257..262] == b"ustar" => Some(ArchiveKind::Tar),
        _ => None,
    }
}

/// Read the header of a file, and recognize it as an archive.
pub fn sniff_archive(path: impl AsRef<Path>) -> std::io::Result<Option<ArchiveKind>> {
    let mut header = Vec::with_capacity(512);
    File::open(path.as_ref())?
        .take(512)
        .read_to_end(&mut header)?;

    Ok(detect_archive(&header))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sha256_of_known_content() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello world")?;

        assert_eq!(
            sha256_file(&path)?,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );

        Ok(())
    }

    #[test]
    fn detect_compressed_tarballs() {
        assert_eq!(detect_archive(&[0x1F, 0x8B, 0x08, 0x00]), Some(ArchiveKind::Gzip));
        assert_eq!(detect_archive(b"BZh91AY&SY"), Some(ArchiveKind::Bzip2));
        assert_eq!(
            detect_archive(&[0xFD, b'7', b'z', b'X', b'Z', 0x00, 0x00]),
            Some(ArchiveKind::Xz)
        );
        assert_eq!(
            detect_archive(&[0x28, 0xB5, 0x2F, 0xFD, 0x00]),
            Some(ArchiveKind::Zstd)
        );
    }

    #[test]
    fn detect_plain_tar() {
        let mut header = [0_u8; 512];
        header[257..263].copy_from_slice(b"ustar\0");
        assert_eq!(detect_archive(&header), Some(ArchiveKind::Tar));
    }

    #[test]
    fn detect_unknown_content() {
        assert_eq!(detect_archive(b"#!/bin/sh\necho hi\n"), None);
        assert_eq!(detect_archive(&[]), None);
    }
}
