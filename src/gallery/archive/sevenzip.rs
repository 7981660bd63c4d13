use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Hard cap on subprocess stdout; anything larger is rejected instead of
/// buffered.
const MAX_OUTPUT_BYTES: usize = 512 * 1024 * 1024;

static TABLE_RULE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[ \-]{5,}$").unwrap());
static NAME_COLUMN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bname\b *").unwrap());

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("no usable 7-Zip executable found")]
    ToolMissing,

    #[error("7-Zip exited with {0}")]
    ToolFailed(std::process::ExitStatus),

    #[error("7-Zip output exceeded the {MAX_OUTPUT_BYTES} byte limit")]
    OutputTooLarge,

    #[error("7-Zip I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Archive backend that shells out to 7-Zip for listing, extracting and
/// inserting single entries.
#[derive(Debug, Clone)]
pub struct SevenZip {
    commands: Vec<String>,
}

impl SevenZip {
    /// `commands` are executable candidates tried in order; an empty list
    /// falls back to plain `7z` on the PATH.
    pub fn new(commands: &[String]) -> Self {
        let commands = if commands.is_empty() {
            vec!["7z".to_string()]
        } else {
            commands.to_vec()
        };
        Self { commands }
    }

    /// Lists entry names in listing order. A nonzero exit is treated as an
    /// unreadable archive and yields an empty listing.
    pub async fn list(&self, archive: &Path) -> Result<Vec<String>, BackendError> {
        let archive = archive.to_string_lossy();
        let (status, stdout) = self.run(&["l", "-sccUTF-8", &archive], None).await?;
        if !status.success() {
            debug!("7-Zip listing failed with {status}; treating archive as empty");
            return Ok(Vec::new());
        }
        Ok(parse_listing(&String::from_utf8_lossy(&stdout)))
    }

    /// Extracts one entry to memory via `-so`.
    pub async fn read_entry(&self, archive: &Path, name: &str) -> Result<Vec<u8>, BackendError> {
        let archive = archive.to_string_lossy();
        let (status, stdout) = self.run(&["e", "-so", &archive, name], None).await?;
        if !status.success() {
            return Err(BackendError::ToolFailed(status));
        }
        Ok(stdout)
    }

    /// Inserts (or replaces) one entry, streaming the content over stdin.
    pub async fn write_entry(
        &self,
        archive: &Path,
        name: &str,
        content: &[u8],
    ) -> Result<(), BackendError> {
        let archive = archive.to_string_lossy();
        let stdin_arg = format!("-si{name}");
        let (status, _) = self.run(&["a", &archive, &stdin_arg], Some(content)).await?;
        if !status.success() {
            return Err(BackendError::ToolFailed(status));
        }
        Ok(())
    }

    async fn run(
        &self,
        args: &[&str],
        input: Option<&[u8]>,
    ) -> Result<(std::process::ExitStatus, Vec<u8>), BackendError> {
        let mut child = None;
        for command in &self.commands {
            let mut cmd = Command::new(command);
            cmd.args(args)
                .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
                .stdout(Stdio::piped())
                .stderr(Stdio::null());
            match cmd.spawn() {
                Ok(spawned) => {
                    child = Some(spawned);
                    break;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(BackendError::Io(e)),
            }
        }
        let mut child = child.ok_or(BackendError::ToolMissing)?;

        if let Some(content) = input {
            let mut stdin = child.stdin.take().ok_or(BackendError::ToolMissing)?;
            stdin.write_all(content).await?;
            drop(stdin);
        }

        let mut stdout_pipe = child.stdout.take().ok_or(BackendError::ToolMissing)?;
        let stdout = match read_capped(&mut stdout_pipe, MAX_OUTPUT_BYTES).await {
            Ok(stdout) => stdout,
            Err(e) => {
                // Stop the producer before abandoning it.
                child.start_kill().ok();
                return Err(e);
            }
        };
        let status = child.wait().await?;
        Ok((status, stdout))
    }
}

/// Reads a stream to its end, failing as soon as the accumulated content
/// would exceed `cap` bytes.
async fn read_capped<R: AsyncRead + Unpin>(
    reader: &mut R,
    cap: usize,
) -> Result<Vec<u8>, BackendError> {
    let mut content = Vec::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(content);
        }
        if content.len() + n > cap {
            return Err(BackendError::OutputTooLarge);
        }
        content.extend_from_slice(&buf[..n]);
    }
}

/// Parses the file table of a `7z l` listing.
///
/// The table is delimited by two dashed rule lines; the header row above the
/// first rule carries a `Name` column. When `Name` is followed by another
/// column its width is fixed, otherwise the name runs to the end of the row.
fn parse_listing(stdout: &str) -> Vec<String> {
    let lines: Vec<&str> = stdout.lines().collect();

    let Some(rule0) = lines.iter().position(|l| TABLE_RULE.is_match(l)) else {
        return Vec::new();
    };
    if rule0 == 0 {
        return Vec::new();
    }
    let header = lines[rule0 - 1];
    let Some(rule1) = lines[rule0 + 1..]
        .iter()
        .position(|l| TABLE_RULE.is_match(l))
        .map(|i| i + rule0 + 1)
    else {
        return Vec::new();
    };

    let Some(column) = NAME_COLUMN.find(header) else {
        return Vec::new();
    };
    let start = column.start();
    let fixed_width = if column.end() < header.len() {
        Some(column.end() - column.start())
    } else {
        None
    };

    let mut names = Vec::new();
    for line in &lines[rule0 + 1..rule1] {
        let Some(cell) = line.get(start..) else {
            continue;
        };
        let name = match fixed_width {
            Some(width) => {
                let end = cell
                    .char_indices()
                    .nth(width)
                    .map(|(i, _)| i)
                    .unwrap_or(cell.len());
                cell[..end].trim_end()
            }
            None => cell,
        };
        names.push(name.to_string());
    }
    names
}
