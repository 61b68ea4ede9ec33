//! Terminal command classification and resolution.
//!
//! Three invocation shapes, checked in order:
//!
//! 1. Command strings containing shell metacharacters run under
//!    `sh -c` with any args appended to the command line.
//! 2. When no args were supplied and the command contains whitespace or a
//!    quoted substring, a small tokenizer (double quotes, backslash
//!    escapes) splits it into program + args.
//! 3. Anything else is a bare program name, resolved against a fixed
//!    prefix list and then `which`.

use std::path::PathBuf;

use crate::{PeerError, Result};

/// Prefixes probed before falling back to a `PATH` lookup.
const PROBE_PREFIXES: &[&str] = &[
    "/usr/local/bin",
    "/usr/bin",
    "/bin",
    "/opt/homebrew/bin",
    "/opt/local/bin",
];

/// How a terminal command will be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Run `sh -c <line>`.
    Shell(String),
    /// Run the program directly with the given args.
    Direct {
        /// Resolved program path or bare name usable as-is.
        program: PathBuf,
        /// Argument vector.
        args: Vec<String>,
    },
}

/// Plan the invocation for a `terminal/create` request.
///
/// # Errors
///
/// - `PeerError::CommandParse` — unterminated quote or empty command.
/// - `PeerError::ExecutableNotFound` — bare program not found anywhere.
pub fn plan_invocation(command: &str, args: Option<Vec<String>>) -> Result<Invocation> {
    if command.trim().is_empty() {
        return Err(PeerError::CommandParse("command is empty".into()));
    }

    if has_shell_metachars(command) {
        let mut line = command.to_owned();
        for arg in args.unwrap_or_default() {
            line.push(' ');
            line.push_str(&arg);
        }
        return Ok(Invocation::Shell(line));
    }

    match args {
        Some(args) => {
            let program = resolve_program(command)?;
            Ok(Invocation::Direct { program, args })
        }
        None if command.contains(char::is_whitespace) || command.contains('"') => {
            let mut tokens = tokenize(command)?;
            if tokens.is_empty() {
                return Err(PeerError::CommandParse("command is empty".into()));
            }
            let program = resolve_program(&tokens.remove(0))?;
            Ok(Invocation::Direct {
                program,
                args: tokens,
            })
        }
        None => {
            let program = resolve_program(command)?;
            Ok(Invocation::Direct {
                program,
                args: Vec::new(),
            })
        }
    }
}

/// Whether the command string needs a shell to interpret it.
fn has_shell_metachars(command: &str) -> bool {
    command.contains(['|', ';', '>', '<', '&', '`']) || command.contains("$(")
}

/// Split a command string into tokens, honoring double quotes and
/// backslash escapes.
fn tokenize(command: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut in_quotes = false;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escaped = chars.next().ok_or_else(|| {
                    PeerError::CommandParse("trailing backslash".into())
                })?;
                current.push(escaped);
                in_token = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                in_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if in_quotes {
        return Err(PeerError::CommandParse("unterminated quote".into()));
    }
    if in_token {
        tokens.push(current);
    }

    Ok(tokens)
}

/// Resolve a program name to an executable path.
///
/// Names containing a path separator are used as-is; bare names probe the
/// fixed prefix list and then fall back to a `PATH` lookup.
fn resolve_program(name: &str) -> Result<PathBuf> {
    if name.contains('/') {
        return Ok(PathBuf::from(name));
    }

    for prefix in PROBE_PREFIXES {
        let candidate = PathBuf::from(prefix).join(name);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    which::which(name).map_err(|_| PeerError::ExecutableNotFound(name.to_owned()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
