//! Points the user's shell at one installed SDK.
//!
//! fvs owns exactly one block in the shell artifacts, delimited by marker
//! comments:
//!
//! ```bash
//! # >>> fvs: flutter activation >>>
//! alias flutter='/home/dev/Downloads/flutter_sdk/flutter_3.19.0_x64/flutter/bin/flutter'
//! # <<< fvs: flutter activation <<<
//! ```
//!
//! Activation removes any previous block (and hand-written `alias flutter`
//! lines in the alias file) before appending the new one, so running it
//! repeatedly converges on the same file content.

use crate::core::outcome::Outcome;
use crate::core::version::{sdk_bin_dir, sdk_binary, InstallKey};
use crate::error::{FvsError, Result};
use crate::utils::fs;
use crate::utils::shell::{double_quote_escape, single_quote, Shell};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

pub const BLOCK_BEGIN: &str = "# >>> fvs: flutter activation >>>";
pub const BLOCK_END: &str = "# <<< fvs: flutter activation <<<";

const ALIASES_FILE: &str = ".bash_aliases";
const SOURCE_STANZA: &str = "if [ -f ~/.bash_aliases ]; then\n  . ~/.bash_aliases\nfi\n";

/// Serializes every shell-file rewrite in this process.
static PROFILE_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationMode {
    /// `alias flutter=...` in `~/.bash_aliases`, sourced from the rc file.
    #[default]
    Alias,
    /// `export PATH=...` directly in the rc file.
    Path,
}

impl FromStr for ActivationMode {
    type Err = FvsError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "alias" => Ok(ActivationMode::Alias),
            "path" => Ok(ActivationMode::Path),
            other => Err(FvsError::settings(format!(
                "unknown activation mode '{other}', expected 'alias' or 'path'"
            ))),
        }
    }
}

impl fmt::Display for ActivationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationMode::Alias => f.write_str("alias"),
            ActivationMode::Path => f.write_str("path"),
        }
    }
}

pub struct VersionActivator {
    home: PathBuf,
    shell: Shell,
    mode: ActivationMode,
}

impl VersionActivator {
    pub fn new(home: PathBuf, shell: Shell, mode: ActivationMode) -> Self {
        Self { home, shell, mode }
    }

    /// Activator for the current user's home directory and `$SHELL`.
    pub fn from_env(mode: ActivationMode) -> Result<Self> {
        let home = dirs::home_dir().ok_or(FvsError::HomeDirectoryNotFound)?;
        Ok(Self::new(home, Shell::detect(), mode))
    }

    pub fn mode(&self) -> ActivationMode {
        self.mode
    }

    pub fn shell(&self) -> Shell {
        self.shell
    }

    pub fn aliases_file(&self) -> PathBuf {
        self.home.join(ALIASES_FILE)
    }

    pub fn rc_file(&self) -> PathBuf {
        self.shell.rc_file(&self.home)
    }

    /// Activates the SDK unpacked in `installed_dir`.
    ///
    /// On success the outcome carries the file holding the new entry.
    pub fn activate(&self, key: &InstallKey, installed_dir: &Path) -> Outcome {
        let binary = sdk_binary(installed_dir);
        if !installed_dir.is_dir() || !binary.is_file() {
            tracing::warn!("no flutter binary at {}", binary.display());
            return Outcome::NotFound { path: binary };
        }

        match self.apply(installed_dir) {
            Ok(artifact) => {
                tracing::info!("activated {key} via {}", artifact.display());
                Outcome::Completed {
                    path: artifact,
                    key: key.clone(),
                }
            }
            Err(e) => {
                tracing::warn!("{e}");
                Outcome::failed(e)
            }
        }
    }

    fn apply(&self, installed_dir: &Path) -> Result<PathBuf> {
        let bin_dir = sdk_bin_dir(installed_dir);
        let touched = fs::make_tree_executable(&bin_dir)
            .map_err(|e| FvsError::activation(&bin_dir, e.to_string()))?;
        tracing::debug!("marked {touched} files executable under {}", bin_dir.display());

        let _guard = PROFILE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let aliases = self.aliases_file();
        let rc = self.rc_file();

        // Both files are edited in memory before either is written, rc file first.
        match self.mode {
            ActivationMode::Alias => {
                let entry = format!("alias flutter={}", single_quote(&sdk_binary(installed_dir)));
                let rc_edit = prepare(&rc, true, |content| {
                    ensure_sourced(&replace_block(content, None, |_| false))
                })?;
                let aliases_edit = prepare(&aliases, true, |content| {
                    replace_block(content, Some(&entry), is_legacy_alias)
                })?;
                commit([rc_edit, aliases_edit])?;
                Ok(aliases)
            }
            ActivationMode::Path => {
                let entry = format!(
                    "export PATH=\"{}:$PATH\"",
                    double_quote_escape(&sdk_bin_dir(installed_dir))
                );
                let rc_edit =
                    prepare(&rc, true, |content| replace_block(content, Some(&entry), |_| false))?;
                let aliases_edit = prepare(&aliases, false, |content| {
                    replace_block(content, None, is_legacy_alias)
                })?;
                commit([rc_edit, aliases_edit])?;
                Ok(rc)
            }
        }
    }

    /// Installed directory the shell artifacts currently point at, if any.
    pub fn current_target(&self) -> Option<PathBuf> {
        [self.aliases_file(), self.rc_file()]
            .iter()
            .filter_map(|file| std::fs::read_to_string(file).ok())
            .find_map(|content| block_body(&content).and_then(|body| parse_target(&body)))
    }

    /// Human-readable hint for making the change visible in the current shell.
    pub fn reload_hint(&self) -> String {
        format!(
            "Shell configuration updated. Restart your terminal or run 'source {}' to apply changes.",
            self.shell.rc_display()
        )
    }
}

/// New content for one shell file.
struct Edit {
    path: PathBuf,
    content: String,
}

/// Reads `path` and computes its edited content, `None` when nothing changes.
///
/// A file that cannot be read is never written. Missing files are created
/// only when `create` is set.
fn prepare(path: &Path, create: bool, edit: impl FnOnce(&str) -> String) -> Result<Option<Edit>> {
    let exists = path.exists();
    if !exists && !create {
        return Ok(None);
    }

    let content = fs::read_to_string_or_empty(path)
        .map_err(|e| FvsError::activation(path, format!("cannot read: {e}")))?;
    let updated = edit(&content);
    if exists && updated == content {
        return Ok(None);
    }

    Ok(Some(Edit {
        path: path.to_path_buf(),
        content: updated,
    }))
}

/// Writes the edits in order, each through an atomic replace. A failure
/// names the files already written.
fn commit<const N: usize>(edits: [Option<Edit>; N]) -> Result<()> {
    let mut written: Vec<String> = Vec::new();
    for edit in edits.into_iter().flatten() {
        if let Err(e) = fs::write_atomic(&edit.path, &edit.content) {
            let reason = if written.is_empty() {
                e.to_string()
            } else {
                format!("{e} (already updated: {})", written.join(", "))
            };
            return Err(FvsError::activation(&edit.path, reason));
        }
        written.push(edit.path.display().to_string());
    }
    Ok(())
}

/// Removes every fvs block and every line matching `strip`, then appends a
/// fresh block holding `body` when one is given.
///
/// Kept lines are copied byte for byte, line endings included. A new block
/// uses the file's line ending (`\r\n` when the file already has one).
pub fn replace_block(content: &str, body: Option<&str>, strip: impl Fn(&str) -> bool) -> String {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let mut output = String::with_capacity(content.len());

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim();

        if trimmed == BLOCK_BEGIN {
            match lines[i + 1..].iter().position(|l| l.trim() == BLOCK_END) {
                Some(offset) => i += offset + 2,
                None => i += 1,
            }
            continue;
        }
        if trimmed == BLOCK_END || strip(line) {
            i += 1;
            continue;
        }

        output.push_str(line);
        i += 1;
    }

    if let Some(body) = body {
        let eol = if content.contains("\r\n") { "\r\n" } else { "\n" };
        if !output.is_empty() && !output.ends_with('\n') {
            output.push_str(eol);
        }
        for line in [BLOCK_BEGIN, body, BLOCK_END] {
            output.push_str(line);
            output.push_str(eol);
        }
    }
    output
}

/// Appends the `~/.bash_aliases` sourcing stanza unless it is already present.
pub fn ensure_sourced(content: &str) -> String {
    if content.contains(SOURCE_STANZA.trim()) {
        return content.to_string();
    }

    let mut output = content.to_string();
    if !output.is_empty() {
        if !output.ends_with('\n') {
            output.push('\n');
        }
        output.push('\n');
    }
    output.push_str(SOURCE_STANZA);
    output
}

/// `alias flutter=...` written by hand or by older tools.
fn is_legacy_alias(line: &str) -> bool {
    line.trim_start()
        .strip_prefix("alias")
        .filter(|rest| rest.starts_with(char::is_whitespace))
        .map(str::trim_start)
        .and_then(|rest| rest.strip_prefix("flutter"))
        .is_some_and(|rest| rest.starts_with('=') || rest.starts_with(char::is_whitespace))
}

fn block_body(content: &str) -> Option<String> {
    let mut lines = content.lines().skip_while(|l| l.trim() != BLOCK_BEGIN);
    lines.next()?;
    let body: Vec<&str> = lines.take_while(|l| l.trim() != BLOCK_END).collect();
    Some(body.join("\n"))
}

fn parse_target(body: &str) -> Option<PathBuf> {
    let line = body.lines().next()?.trim();

    if let Some(quoted) = line.strip_prefix("alias flutter=") {
        let binary = quoted
            .strip_prefix('\'')?
            .strip_suffix('\'')?
            .replace(r"'\''", "'");
        // <install>/flutter/bin/flutter
        return PathBuf::from(binary)
            .ancestors()
            .nth(3)
            .map(Path::to_path_buf);
    }

    if let Some(rest) = line.strip_prefix("export PATH=\"") {
        let escaped = rest.strip_suffix(":$PATH\"")?;
        let mut bin = String::with_capacity(escaped.len());
        let mut chars = escaped.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                bin.extend(chars.next());
            } else {
                bin.push(c);
            }
        }
        // <install>/flutter/bin
        return PathBuf::from(bin).ancestors().nth(2).map(Path::to_path_buf);
    }

    None
}
