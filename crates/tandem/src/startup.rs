//! Startup script placement.
//!
//! The scripting runtime is initialized with the process argv, with the
//! role's bootstrap script spliced in as `argv[1]`. The script lives in a
//! `resources` directory located relative to the executable; on macOS the
//! secondary role runs from a helper bundle nested inside the main bundle,
//! hence the deeper walk.

use std::path::{Path, PathBuf};

use crate::config::Role;
use crate::error::{BridgeError, Result};

pub fn resources_dir(exe: &Path, role: Role) -> PathBuf {
    if cfg!(target_os = "macos") {
        let depth = match role {
            Role::Primary => 2,
            Role::Secondary => 5,
        };
        ancestor(exe, depth).join("Resources")
    } else {
        ancestor(exe, 1).join("resources")
    }
}

pub fn startup_script(exe: &Path, role: Role) -> PathBuf {
    let name = match role {
        Role::Primary => "main.js",
        Role::Secondary => "renderer.js",
    };
    resources_dir(exe, role).join("bootstrap").join(name)
}

/// Insert the role's startup script after `argv[0]`.
pub fn startup_argv(mut argv: Vec<String>, exe: &Path, role: Role) -> Result<Vec<String>> {
    if argv.is_empty() {
        return Err(BridgeError::EmptyArgv);
    }
    let script = startup_script(exe, role);
    argv.insert(1, script.to_string_lossy().into_owned());
    Ok(argv)
}

// Path::parent returns None at the root; stop there rather than failing.
fn ancestor(path: &Path, depth: usize) -> &Path {
    let mut current = path;
    for _ in 0..depth {
        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }
    current
}
