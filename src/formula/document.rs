// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Located field model of a formula file.
//!
//! Formula files are Ruby source. Rather than parsing Ruby in full, the
//! scanner walks the file line by line, tracks `class`/`def`/`do` ... `end`
//! nesting, and records every field it cares about together with the block it
//! lives in and the byte span of its string value. Edits are then applied to
//! those spans only, so a checksum inside a `resource` block can never be
//! mistaken for the top-level checksum, whatever order the fields appear in.
//!
//! # Layout
//!
//! ```ruby
//! class Sentinel < Formula
//!   desc "Host monitoring daemon"
//!   homepage "https://github.com/acme/sentinel"
//!   url "https://github.com/acme/sentinel/releases/download/v1.2.2/sentinel-v1.2.2-macos"
//!   version "1.2.2"
//!   sha256 "..."
//!
//!   resource "extension" do
//!     url "https://github.com/acme/sentinel/releases/download/v1.2.2/Extension-v1.2.2.tar.gz"
//!     sha256 "..."
//!   end
//!
//!   def install
//!     bin.install "sentinel-v1.2.2-macos" => "sentinel"
//!   end
//! end
//! ```

use regex::Regex;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    ops::Range,
    sync::LazyLock,
};

static FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(url|version|sha256|desc|homepage|license)\s+"([^"\\]*(?:\\.[^"\\]*)*)""#)
        .unwrap()
});

static LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"\\]*(?:\\.[^"\\]*)*)""#).unwrap());

static CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^class\s+([A-Z][A-Za-z0-9_:]*)\s*<\s*Formula\b").unwrap());

static RESOURCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^resource\s+"([^"]+)"\s+do\s*$"#).unwrap());

static TRAILING_DO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bdo(\s*\|[^|]*\|)?\s*$").unwrap());

static HEREDOC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<<[~-]?(?:"([A-Za-z_]\w*)"|'([A-Za-z_]\w*)'|([A-Za-z_]\w*))"#).unwrap()
});

const KEYWORD_OPENERS: &[&str] = &[
    "class", "module", "def", "if", "unless", "case", "while", "until", "begin",
];

/// Block a field lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Directly inside the formula class.
    TopLevel,

    /// Inside `resource "<name>" do ... end`.
    Resource(String),

    /// Inside `def install ... end`.
    Install,

    /// Inside any other block, e.g., `livecheck do ... end`.
    Block(String),
}

impl Display for Scope {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::TopLevel => fmt.write_str("top level"),
            Self::Resource(name) => write!(fmt, "resource {name:?}"),
            Self::Install => fmt.write_str("install step"),
            Self::Block(name) => write!(fmt, "{name} block"),
        }
    }
}

/// Located string field.
///
/// String literals inside the install step are recorded with the key
/// `"literal"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub key: String,
    pub scope: Scope,
    pub value: String,
    pub span: Range<usize>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Frame {
    Class,
    Resource(String),
    Install,
    Block(String),
}

/// Formula file with its located fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaDocument {
    text: String,
    fields: Vec<Field>,
    class_name: Option<String>,
    has_install: bool,
    syntax_issues: Vec<String>,
}

impl FormulaDocument {
    /// Full text of the formula.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// All located fields in file order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Name of the formula class, if declared as `class X < Formula`.
    pub fn class_name(&self) -> Option<&str> {
        self.class_name.as_deref()
    }

    /// Check if formula defines an install step.
    pub fn has_install(&self) -> bool {
        self.has_install
    }

    /// Problems found with block nesting or string quoting.
    pub fn syntax_issues(&self) -> &[String] {
        &self.syntax_issues
    }

    /// Fields with target key in target scope.
    pub fn fields_in(&self, key: &str, scope: &Scope) -> Vec<&Field> {
        self.fields
            .iter()
            .filter(|field| field.key == key && field.scope == *scope)
            .collect()
    }

    /// First top-level field with target key.
    pub fn top_level(&self, key: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|field| field.key == key && field.scope == Scope::TopLevel)
    }

    /// Download URL of the primary artifact.
    pub fn primary_url(&self) -> Option<&Field> {
        self.top_level("url")
    }

    /// Checksum of the primary artifact.
    ///
    /// Picks the top-level checksum that follows the primary URL, or the
    /// closest one before it when none follows. Checksums inside resource or
    /// other blocks are never candidates.
    pub fn primary_checksum(&self) -> Option<&Field> {
        let checksums = self.fields_in("sha256", &Scope::TopLevel);
        let Some(url) = self.primary_url() else {
            return checksums.first().copied();
        };

        checksums
            .iter()
            .find(|field| field.span.start > url.span.start)
            .or_else(|| checksums.last())
            .copied()
    }

    /// Names of resource blocks in file order.
    pub fn resources(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for field in &self.fields {
            if let Scope::Resource(name) = &field.scope {
                if !names.contains(&name.as_str()) {
                    names.push(name.as_str());
                }
            }
        }

        names
    }

    /// Field with target key inside named resource block.
    pub fn resource_field(&self, resource: &str, key: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|field| field.key == key && field.scope == Scope::Resource(resource.into()))
    }

    /// String literals of the install step.
    pub fn install_literals(&self) -> impl Iterator<Item = &Field> {
        self.fields
            .iter()
            .filter(|field| field.scope == Scope::Install && field.key == "literal")
    }

    /// Start editing located fields.
    pub fn edit(&self) -> FormulaEdit<'_> {
        FormulaEdit {
            document: self,
            replacements: Vec::new(),
        }
    }
}

impl From<String> for FormulaDocument {
    fn from(text: String) -> Self {
        Scanner::default().scan(text)
    }
}

impl From<&str> for FormulaDocument {
    fn from(text: &str) -> Self {
        Self::from(text.to_string())
    }
}

impl Display for FormulaDocument {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.text)
    }
}

/// Change applied to one located field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub key: String,
    pub scope: Scope,
    pub line: usize,
    pub old: String,
    pub new: String,
}

impl Display for FieldChange {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "line {} ({} {}): {:?} -> {:?}",
            self.line, self.scope, self.key, self.old, self.new
        )
    }
}

/// Span editor over a formula's located fields.
///
/// # Invariant
///
/// - Only located value spans are ever rewritten.
/// - Replacing a field with its current value is not a change.
#[derive(Debug, Clone)]
pub struct FormulaEdit<'a> {
    document: &'a FormulaDocument,
    replacements: Vec<(Field, String)>,
}

impl FormulaEdit<'_> {
    /// Replace value of located field.
    pub fn replace(&mut self, field: &Field, value: impl Into<String>) {
        let value = value.into();
        if field.value == value {
            return;
        }

        self.replacements.retain(|(existing, _)| existing.span != field.span);
        self.replacements.push((field.clone(), value));
    }

    /// Check if any field changes.
    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty()
    }

    /// Apply edits, returning the new text and every change made in file
    /// order.
    pub fn finish(mut self) -> (String, Vec<FieldChange>) {
        self.replacements
            .sort_by_key(|(field, _)| std::cmp::Reverse(field.span.start));

        let mut text = self.document.text.clone();
        for (field, value) in &self.replacements {
            text.replace_range(field.span.clone(), value);
        }

        let mut changes = self
            .replacements
            .into_iter()
            .map(|(field, new)| FieldChange {
                key: field.key,
                scope: field.scope,
                line: field.line,
                old: field.value,
                new,
            })
            .collect::<Vec<_>>();
        changes.sort_by_key(|change| change.line);

        (text, changes)
    }
}

#[derive(Debug, Default)]
struct Scanner {
    stack: Vec<(Frame, usize)>,
    heredoc: Option<(String, usize)>,
    fields: Vec<Field>,
    class_name: Option<String>,
    has_install: bool,
    syntax_issues: Vec<String>,
}

impl Scanner {
    fn scan(mut self, text: String) -> FormulaDocument {
        let mut offset = 0;
        for (index, raw) in text.split_inclusive('\n').enumerate() {
            self.scan_line(raw, offset, index + 1);
            offset += raw.len();
        }

        if let Some((terminator, line)) = &self.heredoc {
            self.syntax_issues
                .push(format!("line {line}: heredoc is never terminated with `{terminator}`"));
        }

        for (frame, line) in self.stack.iter().rev() {
            self.syntax_issues
                .push(format!("line {line}: {} is never closed with `end`", frame_name(frame)));
        }

        FormulaDocument {
            text,
            fields: self.fields,
            class_name: self.class_name,
            has_install: self.has_install,
            syntax_issues: self.syntax_issues,
        }
    }

    fn scan_line(&mut self, raw: &str, offset: usize, line: usize) {
        let trimmed = raw.trim();

        // INVARIANT: Heredoc bodies are opaque text up to their terminator.
        if let Some((terminator, _)) = &self.heredoc {
            if trimmed == terminator {
                self.heredoc = None;
            }
            return;
        }

        if trimmed.is_empty() || trimmed.starts_with('#') {
            return;
        }

        let (code, unterminated) = split_comment(trimmed);
        if unterminated {
            self.syntax_issues
                .push(format!("line {line}: unterminated string literal"));
        }

        if let Some(captures) = HEREDOC.captures(code) {
            if let Some(terminator) = captures.get(1).or(captures.get(2)).or(captures.get(3)) {
                self.heredoc = Some((terminator.as_str().into(), line));
            }
        }

        let scope = self.scope();
        if scope == Some(Scope::Install) {
            for value in LITERAL.captures_iter(raw).filter_map(|captures| captures.get(1)) {
                self.fields.push(Field {
                    key: "literal".into(),
                    scope: Scope::Install,
                    value: value.as_str().into(),
                    span: offset + value.start()..offset + value.end(),
                    line,
                });
            }
        } else if let (Some(scope), Some(captures)) = (scope, FIELD.captures(raw)) {
            if let (Some(key), Some(value)) = (captures.get(1), captures.get(2)) {
                self.fields.push(Field {
                    key: key.as_str().into(),
                    scope,
                    value: value.as_str().into(),
                    span: offset + value.start()..offset + value.end(),
                    line,
                });
            }
        }

        if is_closer(code) {
            if self.stack.pop().is_none() {
                self.syntax_issues
                    .push(format!("line {line}: `end` without matching block"));
            }
            return;
        }

        // INVARIANT: One-liners like `def caveats; "..."; end` open nothing.
        if code.contains(';') && code.ends_with("end") {
            return;
        }

        if let Some(frame) = self.opener(code) {
            self.stack.push((frame, line));
        }
    }

    fn opener(&mut self, trimmed: &str) -> Option<Frame> {
        if let Some(captures) = CLASS.captures(trimmed) {
            if self.class_name.is_none() {
                self.class_name = Some(captures[1].into());
            }
            return Some(Frame::Class);
        }

        if let Some(captures) = RESOURCE.captures(trimmed) {
            return Some(Frame::Resource(captures[1].into()));
        }

        if trimmed == "def install" || trimmed.starts_with("def install ") {
            self.has_install = true;
            return Some(Frame::Install);
        }

        let word = trimmed
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .unwrap_or_default();
        if KEYWORD_OPENERS.contains(&word) {
            return Some(Frame::Block(word.into()));
        }

        if TRAILING_DO.is_match(trimmed) {
            let name = trimmed
                .split(|c: char| c.is_whitespace() || c == '(')
                .next()
                .unwrap_or("do");
            return Some(Frame::Block(name.into()));
        }

        None
    }

    fn scope(&self) -> Option<Scope> {
        if self
            .stack
            .iter()
            .any(|(frame, _)| matches!(frame, Frame::Install))
        {
            return Some(Scope::Install);
        }

        match self.stack.as_slice() {
            [(Frame::Class, _)] => Some(Scope::TopLevel),
            [] => None,
            [.., (Frame::Resource(name), _)] => Some(Scope::Resource(name.clone())),
            [.., (Frame::Block(name), _)] => Some(Scope::Block(name.clone())),
            [.., (Frame::Class, _)] => Some(Scope::Block("class".into())),
            [.., (Frame::Install, _)] => Some(Scope::Install),
        }
    }
}

fn frame_name(frame: &Frame) -> String {
    match frame {
        Frame::Class => "class".into(),
        Frame::Resource(name) => format!("resource {name:?}"),
        Frame::Install => "def install".into(),
        Frame::Block(name) => format!("`{name}` block"),
    }
}

fn is_closer(trimmed: &str) -> bool {
    trimmed == "end"
        || trimmed.starts_with("end ")
        || trimmed.starts_with("end.")
        || trimmed.starts_with("end)")
}

/// Split off a trailing `# comment`, reporting whether a string literal is
/// left open.
fn split_comment(trimmed: &str) -> (&str, bool) {
    let mut inside = false;
    let mut escaped = false;
    for (index, c) in trimmed.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if inside => escaped = true,
            '"' => inside = !inside,
            '#' if !inside => return (trimmed[..index].trim_end(), false),
            _ => {}
        }
    }

    (trimmed, inside)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::{formatdoc, indoc};
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    const FORMULA: &str = indoc! {r#"
        class Sentinel < Formula
          desc "Host monitoring daemon"
          homepage "https://github.com/acme/sentinel"
          url "https://github.com/acme/sentinel/releases/download/v1.2.2/sentinel-v1.2.2-macos"
          version "1.2.2"
          sha256 "1111111111111111111111111111111111111111111111111111111111111111"
          license "MIT"

          resource "extension" do
            url "https://github.com/acme/sentinel/releases/download/v1.2.1/Extension-v1.2.1.tar.gz"
            sha256 "2222222222222222222222222222222222222222222222222222222222222222"
          end

          livecheck do
            url :stable
          end

          def install
            bin.install "sentinel-v1.2.2-macos" => "sentinel"
            resource("extension").stage { prefix.install Dir["*"] }
          end

          def caveats; "Run sentinel --help"; end
        end
    "#};

    #[test]
    fn scan_locates_fields_by_scope() {
        let document = FormulaDocument::from(FORMULA);

        assert_eq!(document.class_name(), Some("Sentinel"));
        assert!(document.has_install());
        assert_eq!(document.syntax_issues(), &[] as &[String]);
        assert_eq!(document.resources(), vec!["extension"]);

        let version = document.top_level("version").unwrap();
        assert_eq!(version.value, "1.2.2");
        assert_eq!(version.line, 5);
        assert_eq!(&FORMULA[version.span.clone()], "1.2.2");

        let primary = document.primary_checksum().unwrap();
        assert_eq!(primary.value, "1".repeat(64));
        let secondary = document.resource_field("extension", "sha256").unwrap();
        assert_eq!(secondary.value, "2".repeat(64));

        let literals = document
            .install_literals()
            .map(|field| field.value.as_str())
            .collect::<Vec<_>>();
        assert_eq!(literals, vec!["sentinel-v1.2.2-macos", "sentinel", "extension", "*"]);
    }

    #[test]
    fn primary_checksum_ignores_preceding_resource_block() {
        let document = FormulaDocument::from(indoc! {r#"
            class Sentinel < Formula
              resource "extension" do
                sha256 "2222222222222222222222222222222222222222222222222222222222222222"
                url "https://github.com/acme/sentinel/releases/download/v1.2.1/Extension.tar.gz"
              end

              sha256 "1111111111111111111111111111111111111111111111111111111111111111"
              url "https://github.com/acme/sentinel/releases/download/v1.2.2/sentinel"
            end
        "#});

        assert_eq!(document.primary_checksum().unwrap().value, "1".repeat(64));
        assert_eq!(
            document.resource_field("extension", "sha256").unwrap().value,
            "2".repeat(64)
        );
    }

    #[test]
    fn edit_rewrites_only_target_span() {
        let document = FormulaDocument::from(FORMULA);
        let mut edit = document.edit();
        edit.replace(document.top_level("version").unwrap(), "1.2.3");
        edit.replace(document.primary_checksum().unwrap(), "3".repeat(64));
        let (text, changes) = edit.finish();

        assert!(text.contains(r#"version "1.2.3""#));
        assert!(text.contains(&"3".repeat(64)));
        assert!(text.contains(&"2".repeat(64)));
        assert!(!text.contains(&"1".repeat(64)));
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].line, 5);
        assert_eq!(changes[0].old, "1.2.2");
        assert_eq!(changes[0].new, "1.2.3");
    }

    #[test]
    fn edit_with_same_value_is_no_change() {
        let document = FormulaDocument::from(FORMULA);
        let mut edit = document.edit();
        edit.replace(document.top_level("version").unwrap(), "1.2.2");

        assert!(edit.is_empty());
        assert_eq!(edit.finish().0, FORMULA);
    }

    #[test]
    fn scan_reports_unbalanced_blocks_and_quotes() {
        let document = FormulaDocument::from(indoc! {r#"
            class Sentinel < Formula
              desc "Host monitoring daemon
              resource "extension" do
                sha256 "2222"
            end
        "#});

        assert_eq!(
            document.syntax_issues(),
            &[
                "line 2: unterminated string literal".to_string(),
                "line 1: class is never closed with `end`".to_string(),
            ]
        );
    }

    #[test]
    fn scan_reports_stray_end() {
        let document = FormulaDocument::from("class Sentinel < Formula\nend\nend\n");
        assert_eq!(
            document.syntax_issues(),
            &["line 3: `end` without matching block".to_string()]
        );
    }

    #[test_case("beginning with macOS 13, approve the extension in System Settings."; "begin prefix")]
    #[test_case("until the extension is approved, sentinel runs without it."; "until")]
    #[test_case("if you upgrade, restart the daemon."; "if clause")]
    #[test_case("while it runs, sentinel keeps a log in /var/log."; "while clause")]
    #[test_case("case sensitivity of paths matters here."; "case")]
    #[test_case("approve the extension, as macOS requires you to do"; "trailing do")]
    #[test]
    fn scan_skips_heredoc_bodies(prose: &str) {
        use pretty_assertions::assert_eq;

        let text = formatdoc! {r#"
            class Sentinel < Formula
              url "https://github.com/acme/sentinel/releases/download/v1.2.2/sentinel"

              def caveats
                <<~EOS
                  {}
                  url "https://example.com/not-a-field"
                EOS
              end
            end
        "#, prose};
        let document = FormulaDocument::from(text);

        assert_eq!(document.syntax_issues(), &[] as &[String]);
        assert_eq!(document.fields().len(), 1);
    }

    #[test_case("<<-EOS", "  EOS"; "dash")]
    #[test_case("<<'EOS'", "EOS"; "single quoted")]
    #[test_case(r#"<<~"EOS""#, "  EOS"; "double quoted")]
    #[test]
    fn scan_honours_heredoc_forms(opener: &str, terminator: &str) {
        use pretty_assertions::assert_eq;

        let text = format!(
            "class Sentinel < Formula\n  def caveats\n    {opener}\n      if so\n{terminator}\n  end\nend\n"
        );
        assert_eq!(
            FormulaDocument::from(text).syntax_issues(),
            &[] as &[String]
        );
    }

    #[test]
    fn scan_ignores_keywords_in_comments_and_prefixes() {
        let document = FormulaDocument::from(indoc! {r#"
            class Sentinel < Formula
              depends_on :macos # needed to do
              beginning = "1"
              iffy = true
              service do
                run [opt_bin/"sentinel"] # keep alive while logged in, do
              end
            end
        "#});

        assert_eq!(document.syntax_issues(), &[] as &[String]);
    }

    #[test]
    fn scan_reports_unterminated_heredoc() {
        let document = FormulaDocument::from(indoc! {r#"
            class Sentinel < Formula
              def caveats
                <<~EOS
                  approve the extension
              end
            end
        "#});

        assert_eq!(
            document.syntax_issues(),
            &[
                "line 3: heredoc is never terminated with `EOS`".to_string(),
                "line 2: `def` block is never closed with `end`".to_string(),
                "line 1: class is never closed with `end`".to_string(),
            ]
        );
    }
}
