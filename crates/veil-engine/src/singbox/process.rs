//! sing-box process plumbing: binary location, argument building, spawning,
//! line relays and termination signals. Lifecycle policy lives in
//! [`crate::singbox::supervisor`].

use crate::singbox::logging::{EngineLogLine, LogStream, SharedLogSink};
use crate::singbox::types::*;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// Engine binary file name for this platform.
pub fn engine_binary_name() -> &'static str {
    if cfg!(windows) {
        "sing-box.exe"
    } else {
        "sing-box"
    }
}

/// `<dir of the running executable>/core/sing-box[.exe]`.
pub fn bundled_engine_path() -> Result<PathBuf, SingBoxError> {
    let exe = std::env::current_exe().map_err(|e| {
        SingBoxError::io(
            SingBoxErrorKind::EngineNotFound,
            "Cannot determine the host executable location",
            &e,
        )
    })?;
    let dir = exe.parent().ok_or_else(|| {
        SingBoxError::new(
            SingBoxErrorKind::EngineNotFound,
            "Host executable has no parent directory",
        )
    })?;
    Ok(dir.join("core").join(engine_binary_name()))
}

/// Resolve the engine binary and make sure it exists.
pub fn locate_engine(override_path: Option<&Path>) -> Result<PathBuf, SingBoxError> {
    let path = match override_path {
        Some(p) => p.to_path_buf(),
        None => bundled_engine_path()?,
    };
    if path.is_file() {
        Ok(path)
    } else {
        Err(SingBoxError::new(
            SingBoxErrorKind::EngineNotFound,
            "sing-box binary not found",
        )
        .with_detail(path.display().to_string()))
    }
}

pub fn build_args(config_path: &Path) -> Vec<String> {
    vec![
        "run".into(),
        "-c".into(),
        config_path.to_string_lossy().into_owned(),
    ]
}

/// Spawn `sing-box run -c <config>` in `work_dir` with piped output.
pub fn spawn_engine(binary: &Path, config_path: &Path, work_dir: &Path) -> Result<Child, SingBoxError> {
    let mut cmd = Command::new(binary);
    cmd.args(build_args(config_path))
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(windows)]
    {
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.spawn().map_err(|e| {
        SingBoxError::new(
            SingBoxErrorKind::ProcessSpawnFailed,
            format!("Failed to spawn sing-box: {}", e),
        )
        .with_detail(binary.display().to_string())
    })
}

/// Forward each line of `reader` to `sink` until EOF. Bytes that are not
/// UTF-8 are replaced, never dropped, so the pipe keeps draining.
pub fn relay_lines<R>(reader: R, stream: LogStream, sink: SharedLogSink) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => sink.on_line(&EngineLogLine::new(stream, decode_line(&buf))),
                Err(e) => {
                    log::debug!("sing-box {} relay stopped: {}", stream, e);
                    break;
                }
            }
        }
    })
}

/// Strip the line terminator (`\n` or `\r\n`) and decode lossily.
fn decode_line(raw: &[u8]) -> String {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

/// Attach relays to the child's stdout and stderr.
pub fn attach_relays(child: &mut Child, sink: &SharedLogSink) -> Vec<JoinHandle<()>> {
    let mut relays = Vec::with_capacity(2);
    if let Some(out) = child.stdout.take() {
        relays.push(relay_lines(out, LogStream::Stdout, sink.clone()));
    }
    if let Some(err) = child.stderr.take() {
        relays.push(relay_lines(err, LogStream::Stderr, sink.clone()));
    }
    relays
}

/// Ask the process to exit on its own. Returns whether a request was sent.
///
/// Windows has no cooperative signal for a windowless console child, so there
/// the caller relies on the kill fallback.
pub fn request_shutdown(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        // SAFETY: kill(2) with a pid we spawned and have not yet reaped.
        unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::singbox::logging::FnSink;
    use std::sync::{Arc, Mutex};

    #[test]
    fn args_run_with_config() {
        let args = build_args(Path::new("/data/sb_config.json"));
        assert_eq!(args, vec!["run", "-c", "/data/sb_config.json"]);
    }

    #[test]
    fn bundled_path_under_core() {
        let p = bundled_engine_path().unwrap();
        assert!(p.ends_with(Path::new("core").join(engine_binary_name())));
    }

    #[test]
    fn missing_override_is_engine_not_found() {
        let err = locate_engine(Some(Path::new("/nope/sing-box"))).unwrap_err();
        assert_eq!(err.kind, SingBoxErrorKind::EngineNotFound);
        assert_eq!(err.detail.as_deref(), Some("/nope/sing-box"));
    }

    #[test]
    fn existing_override_is_accepted() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(locate_engine(Some(tmp.path())).unwrap(), tmp.path());
    }

    #[tokio::test]
    async fn relay_splits_lines_and_keeps_text() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink: SharedLogSink = {
            let seen = seen.clone();
            Arc::new(FnSink(move |l: &EngineLogLine| {
                seen.lock().unwrap().push((l.stream, l.text.clone()))
            }))
        };
        let input: &[u8] = b"INFO started\n  WARN  padded  \nlast-without-newline";
        relay_lines(input, LogStream::Stderr, sink).await.unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (LogStream::Stderr, "INFO started".to_string()),
                (LogStream::Stderr, "  WARN  padded  ".to_string()),
                (LogStream::Stderr, "last-without-newline".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn relay_survives_invalid_utf8() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink: SharedLogSink = {
            let seen = seen.clone();
            Arc::new(FnSink(move |l: &EngineLogLine| seen.lock().unwrap().push(l.text.clone())))
        };
        let input: &[u8] = b"first\nbad \xff byte\r\nthird\nfourth\n";
        relay_lines(input, LogStream::Stdout, sink).await.unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first", "bad \u{FFFD} byte", "third", "fourth"]
        );
    }

    #[test]
    fn decode_strips_terminators_only() {
        assert_eq!(decode_line(b"a b \r\n"), "a b ");
        assert_eq!(decode_line(b"tail"), "tail");
        assert_eq!(decode_line(b"\n"), "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawn_missing_binary_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let err = spawn_engine(
            &tmp.path().join("absent"),
            &tmp.path().join("cfg.json"),
            tmp.path(),
        )
        .unwrap_err();
        assert_eq!(err.kind, SingBoxErrorKind::ProcessSpawnFailed);
    }
}
