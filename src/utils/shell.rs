use std::path::{Path, PathBuf};

/// Shell dialects whose rc files fvs knows how to edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    Bash,
    Zsh,
}

impl Shell {
    /// Detects the shell from `SHELL`. Anything that is not zsh is treated as bash.
    pub fn detect() -> Self {
        std::env::var("SHELL")
            .ok()
            .map(|shell| Self::from_path(&shell))
            .unwrap_or(Shell::Bash)
    }

    pub fn from_path(path: &str) -> Self {
        let name = Path::new(path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        if name.contains("zsh") {
            Shell::Zsh
        } else {
            Shell::Bash
        }
    }

    pub fn rc_file(self, home: &Path) -> PathBuf {
        match self {
            Shell::Bash => home.join(".bashrc"),
            Shell::Zsh => home.join(".zshrc"),
        }
    }

    pub fn rc_display(self) -> &'static str {
        match self {
            Shell::Bash => "~/.bashrc",
            Shell::Zsh => "~/.zshrc",
        }
    }
}

/// Quotes a path for use inside single quotes in a POSIX shell.
pub fn single_quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}

/// Escapes a path for use inside double quotes in a POSIX shell.
pub fn double_quote_escape(path: &Path) -> String {
    path.display()
        .to_string()
        .replace('\\', "\\\\")
        .replace('$', "\\$")
        .replace('`', "\\`")
        .replace('"', "\\\"")
}
