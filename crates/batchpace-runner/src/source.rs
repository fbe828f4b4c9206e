//! Command sources: where the list of commands to run comes from.
//!
//! Both sources produce a fully-formed, ordered list of shell command
//! strings; the scheduler treats them identically once materialized.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::{debug, warn};

/// Something that can produce the ordered list of commands for a run.
pub trait CommandSource {
    /// Produce the commands in the order they should be launched.
    fn materialize(&self) -> Result<Vec<String>, SourceError>;
}

/// Reads one command per line from a file.
///
/// Blank lines and lines starting with `#` are skipped.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CommandSource for FileSource {
    fn materialize(&self) -> Result<Vec<String>, SourceError> {
        let content =
            std::fs::read_to_string(&self.path).map_err(|source| SourceError::ReadFile {
                path: self.path.clone(),
                source,
            })?;
        let commands: Vec<String> = content
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.trim_start().is_empty() && !line.trim_start().starts_with('#'))
            .map(String::from)
            .collect();
        debug!(path = %self.path.display(), count = commands.len(), "Read command file");
        Ok(commands)
    }
}

/// Generates one command per matching file in a directory.
///
/// File names matching `pattern` are sorted lexicographically and substituted
/// into `template`. Supported placeholders: `{path}`, `{name}`, `{stem}`,
/// `{dir}`. Substituted values are shell-quoted. A template without any
/// placeholder gets the quoted path appended.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
    pattern: Regex,
    template: String,
}

/// Template placeholders, matched in a single left-to-right pass.
#[allow(clippy::expect_used)]
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(path|name|stem|dir)\}").expect("static regex is valid"));

impl DirectorySource {
    pub fn new(
        dir: impl Into<PathBuf>,
        pattern: &str,
        template: impl Into<String>,
    ) -> Result<Self, SourceError> {
        let pattern = Regex::new(pattern).map_err(|source| SourceError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;
        let template = template.into();
        if template.trim().is_empty() {
            return Err(SourceError::EmptyTemplate);
        }
        Ok(Self {
            dir: dir.into(),
            pattern,
            template,
        })
    }

    /// Substitute one file into the command template.
    pub fn render(&self, path: &Path) -> String {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dir = path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let full = path.to_string_lossy();

        if !PLACEHOLDER_RE.is_match(&self.template) {
            return format!("{} {}", self.template.trim_end(), shell_quote(&full));
        }

        // Substituted values are never rescanned, so names containing
        // placeholder text stay intact.
        PLACEHOLDER_RE
            .replace_all(&self.template, |caps: &Captures<'_>| match &caps[1] {
                "path" => shell_quote(&full),
                "name" => shell_quote(&name),
                "stem" => shell_quote(&stem),
                _ => shell_quote(&dir),
            })
            .into_owned()
    }

    fn matching_files(&self) -> Result<Vec<PathBuf>, SourceError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| SourceError::ReadDir {
            path: self.dir.clone(),
            source,
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| SourceError::ReadDir {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                warn!(path = %path.display(), "Skipping file with non UTF-8 name");
                continue;
            };
            if self.pattern.is_match(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names.into_iter().map(|n| self.dir.join(n)).collect())
    }
}

impl CommandSource for DirectorySource {
    fn materialize(&self) -> Result<Vec<String>, SourceError> {
        let files = self.matching_files()?;
        debug!(
            dir = %self.dir.display(),
            pattern = %self.pattern,
            count = files.len(),
            "Listed input directory"
        );
        Ok(files.iter().map(|f| self.render(f)).collect())
    }
}

/// Quote a value for `sh` unless it only contains safe characters.
pub fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./,:=+@%".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// Errors from materializing a command list.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Failed to read command file {}: {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read input directory {}: {source}", .path.display())]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid file name pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("Command template must not be empty")]
    EmptyTemplate,
}
