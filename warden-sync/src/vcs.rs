//! Version-control boundary.
//!
//! The engine never builds command lines itself: every invocation is a
//! [`VcsCommand`] handed to a [`Vcs`] implementation. [`GitCli`] shells out to
//! `git`; tests substitute a scripted fake.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::VcsError;

/// The complete command surface the sync engine relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VcsCommand {
    Fetch { remote: String },
    StatusPorcelain,
    /// Stages the given paths; an empty list stages the whole tree.
    Add { paths: Vec<PathBuf> },
    Commit { message: String },
    Push { remote: String, branch: String, force: bool },
    Pull { remote: String, branch: String, allow_unrelated: bool },
    Diff { from: String, to: String },
    Log { from: String, to: String },
    CurrentBranch,
    Remotes,
}

impl VcsCommand {
    /// Argument vector passed to the binary, excluding the program name.
    pub fn args(&self) -> Vec<String> {
        match self {
            VcsCommand::Fetch { remote } => vec!["fetch".into(), remote.clone()],
            VcsCommand::StatusPorcelain => vec!["status".into(), "--porcelain".into()],
            VcsCommand::Add { paths } => {
                let mut args = vec!["add".to_string(), "-A".to_string()];
                if !paths.is_empty() {
                    args.push("--".to_string());
                    args.extend(paths.iter().map(|p| p.to_string_lossy().into_owned()));
                }
                args
            }
            VcsCommand::Commit { message } => {
                vec!["commit".into(), "-m".into(), message.clone()]
            }
            VcsCommand::Push {
                remote,
                branch,
                force,
            } => {
                let mut args = vec!["push".to_string()];
                if *force {
                    args.push("-f".to_string());
                }
                args.push(remote.clone());
                args.push(branch.clone());
                args
            }
            VcsCommand::Pull {
                remote,
                branch,
                allow_unrelated,
            } => {
                let mut args = vec!["pull".to_string()];
                if *allow_unrelated {
                    args.push("--allow-unrelated-histories".to_string());
                }
                args.push(remote.clone());
                args.push(branch.clone());
                args
            }
            VcsCommand::Diff { from, to } => vec!["diff".into(), format!("{from}..{to}")],
            VcsCommand::Log { from, to } => {
                vec!["log".into(), format!("{from}..{to}"), "--oneline".into()]
            }
            VcsCommand::CurrentBranch => {
                vec!["branch".into(), "--show-current".into()]
            }
            VcsCommand::Remotes => vec!["remote".into(), "-v".into()],
        }
    }

    /// Short operation name used in logs and error entries.
    pub fn name(&self) -> &'static str {
        match self {
            VcsCommand::Fetch { .. } => "fetch",
            VcsCommand::StatusPorcelain => "status",
            VcsCommand::Add { .. } => "add",
            VcsCommand::Commit { .. } => "commit",
            VcsCommand::Push { .. } => "push",
            VcsCommand::Pull { .. } => "pull",
            VcsCommand::Diff { .. } => "diff",
            VcsCommand::Log { .. } => "log",
            VcsCommand::CurrentBranch => "branch",
            VcsCommand::Remotes => "remote",
        }
    }
}

impl fmt::Display for VcsCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Commit messages are multi-line; keep log output on one line.
        match self {
            VcsCommand::Commit { .. } => write!(f, "commit -m <message>"),
            VcsCommand::Add { paths } if paths.len() > 3 => {
                write!(f, "add -A -- <{} paths>", paths.len())
            }
            other => write!(f, "{}", other.args().join(" ")),
        }
    }
}

/// Captured output of a successful invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VcsOutput {
    pub stdout: String,
    pub stderr: String,
}

impl VcsOutput {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stdout: text.into(),
            stderr: String::new(),
        }
    }
}

/// Narrow interface over the version-control binary.
///
/// Implementations are blocking; the daemon calls them from
/// `spawn_blocking`.
pub trait Vcs: Send + Sync {
    fn exec(&self, command: &VcsCommand) -> Result<VcsOutput, VcsError>;
}

/// [`Vcs`] backed by the `git` executable, run inside `root`.
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
    program: PathBuf,
}

impl GitCli {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            program: PathBuf::from("git"),
        }
    }

    /// Use a specific binary instead of `git` from `PATH`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Vcs for GitCli {
    fn exec(&self, command: &VcsCommand) -> Result<VcsOutput, VcsError> {
        let output = Command::new(&self.program)
            .args(command.args())
            .current_dir(&self.root)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .map_err(|e| VcsError::Launch {
                command: command.to_string(),
                message: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if output.status.success() {
            tracing::debug!("git {command}: ok");
            return Ok(VcsOutput { stdout, stderr });
        }

        Err(VcsError::Failed {
            command: command.to_string(),
            status: output.status.to_string(),
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_vectors_match_git_surface() {
        let push = VcsCommand::Push {
            remote: "origin".into(),
            branch: "main".into(),
            force: true,
        };
        assert_eq!(push.args(), vec!["push", "-f", "origin", "main"]);

        let pull = VcsCommand::Pull {
            remote: "origin".into(),
            branch: "main".into(),
            allow_unrelated: true,
        };
        assert_eq!(
            pull.args(),
            vec!["pull", "--allow-unrelated-histories", "origin", "main"]
        );

        let add = VcsCommand::Add {
            paths: vec![PathBuf::from("src/lib.rs"), PathBuf::from("README.md")],
        };
        assert_eq!(add.args(), vec!["add", "-A", "--", "src/lib.rs", "README.md"]);
        assert_eq!(VcsCommand::Add { paths: vec![] }.args(), vec!["add", "-A"]);

        let log = VcsCommand::Log {
            from: "main".into(),
            to: "origin/main".into(),
        };
        assert_eq!(log.args(), vec!["log", "main..origin/main", "--oneline"]);
    }

    #[test]
    fn display_hides_commit_message() {
        let commit = VcsCommand::Commit {
            message: "line one\nline two".into(),
        };
        assert_eq!(commit.to_string(), "commit -m <message>");
    }

    #[test]
    fn missing_binary_is_launch_error() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let git = GitCli::new(dir.path()).with_program("/nonexistent/warden-git");
        let err = git.exec(&VcsCommand::CurrentBranch).unwrap_err();
        assert!(matches!(err, VcsError::Launch { .. }), "got: {err}");
    }
}
