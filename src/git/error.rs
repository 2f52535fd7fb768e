//! Git error types and formatting

/// Errors raised by the git driver and the parsers built on top of it.
///
/// `CommandFailed` carries the command line (credentials already scrubbed at
/// construction time) together with the merged stderr/stdout text, so the
/// orchestrator can record a useful failure against a branch without
/// re-running anything.
#[derive(Debug)]
pub enum GitError {
    /// A git subcommand exited non-zero
    CommandFailed { command: String, output: String },
    /// Git produced output we could not make sense of
    ParseError(String),
}

impl std::fmt::Display for GitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitError::CommandFailed { command, output } => {
                if output.is_empty() {
                    write!(f, "Git command failed: {command}")
                } else {
                    write!(f, "Git command failed: {command}\nOutput: {output}")
                }
            }
            GitError::ParseError(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for GitError {}
