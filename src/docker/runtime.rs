use std::io;
use std::path::{Path, PathBuf};

use which::which;

/// Locate the container runtime `program` on PATH.
pub fn container_runtime_path(program: &str) -> io::Result<PathBuf> {
    if let Ok(p) = which(program) {
        return Ok(p);
    }
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("{program} is required but was not found in PATH."),
    ))
}

/// `<runtime> run --cidfile=<cidfile> <user args...>`
pub fn run_args(runtime: &str, cidfile: &Path, user_args: &[String]) -> Vec<String> {
    let mut argv = Vec::with_capacity(user_args.len() + 3);
    argv.push(runtime.to_string());
    argv.push("run".to_string());
    argv.push(format!("--cidfile={}", cidfile.display()));
    argv.extend(user_args.iter().cloned());
    argv
}

/// `<runtime> rm -f <container id>`
pub fn rm_args(runtime: &str, container_id: &str) -> Vec<String> {
    vec![
        runtime.to_string(),
        "rm".to_string(),
        "-f".to_string(),
        container_id.to_string(),
    ]
}
