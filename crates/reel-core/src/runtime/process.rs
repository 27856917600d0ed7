use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;

/// Lines of output kept for error reporting.
const TAIL_LINES: usize = 20;

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    /// Last non-empty output lines, oldest first.
    pub tail: Vec<String>,
}

impl ProcessOutput {
    pub fn tail_text(&self) -> String {
        self.tail.join("\n")
    }
}

#[cfg(windows)]
fn shell(command_line: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command_line);
    cmd
}

#[cfg(not(windows))]
fn shell(command_line: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command_line);
    cmd
}

/// Run `command_line` through the platform shell inside `cwd`.
///
/// stdout and stderr are drained concurrently and split on both `\n` and
/// `\r` (ffmpeg rewrites its status line with carriage returns). Each line is
/// handed to `on_line` as it arrives.
pub async fn run_shell<F>(command_line: &str, cwd: &Path, mut on_line: F) -> std::io::Result<ProcessOutput>
where
    F: FnMut(&str) + Send,
{
    let mut child = shell(command_line)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let mut pumps = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        pumps.push(tokio::spawn(pump(stdout, tx.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(tokio::spawn(pump(stderr, tx.clone())));
    }
    drop(tx);

    let mut tail: VecDeque<String> = VecDeque::with_capacity(TAIL_LINES);
    while let Some(line) = rx.recv().await {
        on_line(&line);
        if tail.len() == TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    for pump in pumps {
        if let Err(e) = pump.await {
            tracing::warn!(error = %e, "output reader task failed");
        }
    }
    let status = child.wait().await?;

    Ok(ProcessOutput {
        status,
        tail: tail.into(),
    })
}

async fn pump<R>(mut reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(error = %e, "output stream read failed");
                break;
            }
        };
        for &byte in &buf[..n] {
            if byte == b'\n' || byte == b'\r' {
                emit(&mut pending, &tx);
            } else {
                pending.push(byte);
            }
        }
    }
    emit(&mut pending, &tx);
}

fn emit(pending: &mut Vec<u8>, tx: &mpsc::UnboundedSender<String>) {
    if pending.is_empty() {
        return;
    }
    let line = String::from_utf8_lossy(pending).trim_end().to_owned();
    pending.clear();
    if !line.is_empty() {
        let _ = tx.send(line);
    }
}

#[cfg(all(test, unix))]
mod test {
    use super::*;

    #[tokio::test]
    async fn collects_both_streams_and_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut seen = Vec::new();
        let out = run_shell("echo out; echo err 1>&2; exit 3", dir.path(), |l| {
            seen.push(l.to_owned())
        })
        .await
        .unwrap();

        assert_eq!(out.status.code(), Some(3));
        seen.sort();
        assert_eq!(seen, vec!["err".to_owned(), "out".to_owned()]);
    }

    #[tokio::test]
    async fn runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_shell("echo hi > made.txt", dir.path(), |_| {}).await.unwrap();
        assert!(out.status.success());
        assert!(dir.path().join("made.txt").exists());
    }

    #[tokio::test]
    async fn splits_on_carriage_returns_and_bounds_tail() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_shell(
            "printf 'a\\rb\\r'; i=0; while [ $i -lt 30 ]; do echo line$i; i=$((i+1)); done",
            dir.path(),
            |_| {},
        )
        .await
        .unwrap();
        assert_eq!(out.tail.len(), TAIL_LINES);
        assert_eq!(out.tail.last().map(String::as_str), Some("line29"));
    }
}
