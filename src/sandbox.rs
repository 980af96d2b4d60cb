//! Sandboxed executor.
//!
//! Every file read, write, listing and shell command is confined to a single
//! root directory. Paths are resolved lexically first (so `..` and absolute
//! paths are rejected before touching the filesystem), then the nearest
//! existing ancestor is canonicalised to catch symlinks pointing outside.
//!
//! ## Path normalisation
//!
//! - `\` becomes `/`
//! - a leading `./` is dropped
//! - a leading copy of the root's own directory name, or of a registered
//!   alias such as the configured workspace directory, is dropped, so
//!   `workspace/index.html` and `index.html` address the same file when the
//!   run lives under `workspace/runs/<id>`

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use walkdir::WalkDir;

/// Hard upper bound for any command timeout.
pub const MAX_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Merged command output is cut down to this many trailing characters.
pub const MAX_OUTPUT_CHARS: usize = 8000;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Path escapes the sandbox root: {0}")]
    PathEscape(String),

    #[error("Blocked dangerous command pattern '{pattern}': {reason}")]
    BlockedCommand {
        pattern: &'static str,
        reason: &'static str,
    },

    #[error("Command timed out after {0} seconds")]
    Timeout(u64),

    #[error("Failed to execute command: {0}")]
    Spawn(std::io::Error),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl SandboxError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

pub type SandboxResult<T> = Result<T, SandboxError>;

/// Command fragments that are refused outright, with the reason reported back.
const DENY_LIST: &[(&str, &str)] = &[
    ("rm -rf /", "This would destroy the entire system"),
    ("rm -fr /", "This would destroy the entire system"),
    ("rm -rf ~", "This would wipe the home directory"),
    ("mkfs", "Formatting filesystems is blocked"),
    ("dd if=/dev/", "Direct disk operations are blocked"),
    ("> /dev/sd", "Writing to block devices is blocked"),
    (":(){", "Fork bombs are blocked"),
    ("chmod -R 777 /", "Recursive permission changes on / are blocked"),
    ("sudo", "Privilege escalation is blocked"),
    ("doas ", "Privilege escalation is blocked"),
    ("su root", "Privilege escalation is blocked"),
    ("shutdown", "Shutting down the host is blocked"),
    ("reboot", "Rebooting the host is blocked"),
    ("poweroff", "Powering off the host is blocked"),
    ("init 0", "Powering off the host is blocked"),
    ("init 6", "Rebooting the host is blocked"),
];

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// True when `pattern` occurs in `haystack` as a whole token: an alphanumeric
/// edge of the pattern may not touch another word character.
fn contains_token(haystack: &str, pattern: &str) -> bool {
    let text = haystack.as_bytes();
    let pat = pattern.as_bytes();
    let (Some(&first), Some(&last)) = (pat.first(), pat.last()) else {
        return false;
    };

    haystack.match_indices(pattern).any(|(start, _)| {
        let end = start + pat.len();
        let clear_before = !is_word_byte(first) || start == 0 || !is_word_byte(text[start - 1]);
        let clear_after = !is_word_byte(last) || end == text.len() || !is_word_byte(text[end]);
        clear_before && clear_after
    })
}

/// Check a command against the deny-list.
///
/// Whitespace runs are collapsed first so `rm  -rf  /` is caught as well.
/// Patterns match whole words, so `pseudo_check.py` is not mistaken for `sudo`.
pub fn validate_command(command: &str) -> SandboxResult<()> {
    let collapsed = command.split_whitespace().collect::<Vec<_>>().join(" ");

    for (pattern, reason) in DENY_LIST {
        if contains_token(&collapsed, pattern) {
            return Err(SandboxError::BlockedCommand { pattern, reason });
        }
    }

    Ok(())
}

/// Sanitize command output to be safe for LLM consumption.
/// Removes binary garbage while preserving valid text.
pub fn sanitize_output(bytes: &[u8]) -> String {
    let non_printable_count = bytes
        .iter()
        .filter(|&&b| b < 0x20 && b != b'\n' && b != b'\r' && b != b'\t')
        .count();

    // More than 10% control bytes: treat as binary.
    if bytes.len() > 100 && non_printable_count > bytes.len() / 10 {
        return format!(
            "[Binary output detected - {} bytes, {}% non-printable]",
            bytes.len(),
            non_printable_count * 100 / bytes.len()
        );
    }

    String::from_utf8_lossy(bytes)
        .chars()
        .filter(|&c| c == '\n' || c == '\r' || c == '\t' || (c >= ' ' && c != '\u{FFFD}'))
        .collect()
}

/// Keep only the last `max` characters of `text`.
fn tail_chars(text: String, max: usize) -> (String, bool) {
    let count = text.chars().count();
    if count <= max {
        return (text, false);
    }
    (text.chars().skip(count - max).collect(), true)
}

/// Result of a sandboxed shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// stdout followed by stderr, sanitised and tail-truncated.
    pub output: String,
    pub truncated: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A directory that confines all file and process operations.
///
/// Cheap to clone; holds no open handles.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    /// Leading path segments dropped by [`Sandbox::normalize`].
    aliases: Vec<String>,
}

impl Sandbox {
    /// Create the root directory (if needed) and bind a sandbox to it.
    ///
    /// Failure here is the one condition that aborts a whole run.
    pub fn create(root: impl AsRef<Path>) -> SandboxResult<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)
            .map_err(|e| SandboxError::io(format!("create sandbox root {}", root.display()), e))?;
        let root = root
            .canonicalize()
            .map_err(|e| SandboxError::io(format!("resolve sandbox root {}", root.display()), e))?;
        let aliases = root
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .into_iter()
            .collect();

        tracing::debug!("Sandbox bound to {}", root.display());

        Ok(Self { root, aliases })
    }

    /// Also treat a leading `alias/` as naming the root.
    ///
    /// Used for the workspace directory name, which models tend to prepend
    /// even though each run is rooted at `workspace/runs/<id>`.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        let alias = alias.trim_matches('/');
        if !alias.is_empty() && !self.aliases.iter().any(|a| a == alias) {
            self.aliases.push(alias.to_string());
        }
        self
    }

    /// Canonical absolute root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalise a caller-supplied relative path without touching the filesystem.
    pub fn normalize(&self, path: &str) -> String {
        let mut normalized = path.trim().replace('\\', "/");
        if let Some(rest) = normalized.strip_prefix("./") {
            normalized = rest.to_string();
        }
        for name in &self.aliases {
            if normalized == *name {
                normalized.clear();
                break;
            }
            if let Some(rest) = normalized.strip_prefix(&format!("{name}/")) {
                normalized = rest.to_string();
                break;
            }
        }
        normalized
    }

    /// Resolve a relative path to an absolute path inside the root.
    pub fn resolve(&self, path: &str) -> SandboxResult<PathBuf> {
        let normalized = self.normalize(path);
        if normalized.starts_with('/') || has_drive_prefix(&normalized) {
            return Err(SandboxError::PathEscape(path.to_string()));
        }

        let mut resolved = self.root.clone();
        for component in Path::new(&normalized).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(SandboxError::PathEscape(path.to_string()));
                }
            }
        }

        self.ensure_confined(&resolved, path)?;
        Ok(resolved)
    }

    /// Canonicalise the nearest existing ancestor and check it stays under the root.
    fn ensure_confined(&self, resolved: &Path, original: &str) -> SandboxResult<()> {
        let mut ancestor = resolved;
        loop {
            if ancestor.symlink_metadata().is_ok() {
                let canonical = ancestor
                    .canonicalize()
                    .map_err(|_| SandboxError::PathEscape(original.to_string()))?;
                if canonical.starts_with(&self.root) {
                    return Ok(());
                }
                return Err(SandboxError::PathEscape(original.to_string()));
            }
            match ancestor.parent() {
                Some(parent) => ancestor = parent,
                None => return Ok(()),
            }
        }
    }

    /// Write `content` to `path`, creating parent directories. Returns the absolute path.
    pub async fn write(&self, path: &str, content: &str) -> SandboxResult<PathBuf> {
        let full_path = self.resolve(path)?;
        if full_path == self.root {
            return Err(SandboxError::io(
                "write artifact",
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "path names the sandbox root"),
            ));
        }

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SandboxError::io(format!("create directory for {path}"), e))?;
        }

        tokio::fs::write(&full_path, content)
            .await
            .map_err(|e| SandboxError::io(format!("write {path}"), e))?;

        tracing::debug!("Wrote {} bytes to {}", content.len(), full_path.display());
        Ok(full_path)
    }

    /// Read a UTF-8 file from the sandbox.
    pub async fn read(&self, path: &str) -> SandboxResult<String> {
        let full_path = self.resolve(path)?;
        tokio::fs::read_to_string(&full_path)
            .await
            .map_err(|e| SandboxError::io(format!("read {path}"), e))
    }

    /// List every file below `path`, relative to the root, sorted.
    ///
    /// A missing directory lists as empty.
    pub fn list(&self, path: &str) -> SandboxResult<Vec<String>> {
        let dir = self.resolve(path)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&dir) {
            let entry = entry.map_err(|e| {
                let context = format!("list {path}");
                match e.into_io_error() {
                    Some(io) => SandboxError::io(context, io),
                    None => SandboxError::io(
                        context,
                        std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop"),
                    ),
                }
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&self.root) {
                files.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }

        files.sort();
        Ok(files)
    }

    /// Run a shell command with the root as working directory.
    ///
    /// The deny-list is checked before any process is spawned. The timeout is
    /// clamped to [`MAX_COMMAND_TIMEOUT`]; on expiry the child is killed.
    pub async fn run_command(&self, command: &str, timeout: Duration) -> SandboxResult<CommandOutput> {
        if let Err(e) = validate_command(command) {
            tracing::warn!("Blocked dangerous command: {}", command);
            return Err(e);
        }

        let timeout = timeout.clamp(Duration::from_secs(1), MAX_COMMAND_TIMEOUT);
        let (shell, flag) = if cfg!(target_os = "windows") {
            ("cmd", "/C")
        } else {
            ("/bin/sh", "-c")
        };

        tracing::info!("Executing command in {}: {}", self.root.display(), command);

        let child = Command::new(shell)
            .arg(flag)
            .arg(command)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(SandboxError::Spawn)?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(SandboxError::io("wait for command", e)),
            Err(_) => {
                tracing::warn!("Command timed out after {:?}: {}", timeout, command);
                return Err(SandboxError::Timeout(timeout.as_secs()));
            }
        };

        let mut merged = sanitize_output(&output.stdout);
        let stderr = sanitize_output(&output.stderr);
        if !stderr.is_empty() {
            if !merged.is_empty() && !merged.ends_with('\n') {
                merged.push('\n');
            }
            merged.push_str(&stderr);
        }
        let (output_text, truncated) = tail_chars(merged, MAX_OUTPUT_CHARS);
        let exit_code = output.status.code();

        tracing::debug!(
            "Command completed: exit={:?}, output_len={}, truncated={}",
            exit_code,
            output_text.len(),
            truncated
        );

        Ok(CommandOutput {
            exit_code,
            output: output_text,
            truncated,
        })
    }
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
