use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::core::error::{EngineError, EngineResult};
use crate::core::events::LogSink;
use crate::core::registry::VariantId;

/// Engine command line: `--host <host> --port <port> [--use_gpu]`.
pub fn engine_args(variant: VariantId, host: &str, port: u16) -> Vec<String> {
    let mut args = vec![
        "--host".to_string(),
        host.to_string(),
        "--port".to_string(),
        port.to_string(),
    ];
    if variant.is_gpu() {
        args.push("--use_gpu".to_string());
    }
    args
}

pub fn spawn_engine(executable: &Path, working_dir: &Path, args: &[String]) -> EngineResult<Child> {
    let mut cmd = Command::new(executable);
    cmd.args(args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    configure_platform_spawn(&mut cmd);

    cmd.spawn().map_err(|source| EngineError::Spawn {
        path: executable.to_path_buf(),
        source,
    })
}

fn configure_platform_spawn(cmd: &mut Command) {
    #[cfg(target_os = "windows")]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    #[cfg(not(target_os = "windows"))]
    let _ = cmd;
}

#[derive(Debug, Clone, Copy)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn label(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

/// Forward each line of an engine pipe to the log sink until it closes.
pub fn forward_lines<R>(pipe: R, variant: VariantId, stream: Stream, log: Arc<dyn LogSink>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim_end();
                    if line.is_empty() {
                        continue;
                    }
                    match stream {
                        Stream::Stdout => debug!("[engine:{}][stdout] {}", variant, line),
                        Stream::Stderr => warn!("[engine:{}][stderr] {}", variant, line),
                    }
                    log.log(&format!("[VOICEVOX {}] {}", stream.label(), line));
                }
                Ok(None) => break,
                Err(err) => {
                    debug!("Stopped reading engine {}: {}", stream.label(), err);
                    break;
                }
            }
        }
    });
}

/// Ask the engine (and on Windows its whole process tree) to exit.
pub async fn terminate(pid: u32) -> EngineResult<()> {
    #[cfg(target_os = "windows")]
    let status = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    #[cfg(not(target_os = "windows"))]
    let status = Command::new("kill")
        .args(["-15", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    let status = status
        .map_err(|err| EngineError::Other(format!("Could not stop engine process {pid}: {err}")))?;
    if !status.success() {
        return Err(EngineError::Other(format!(
            "Stopping engine process {pid} returned code {:?}",
            status.code()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_variants_get_use_gpu_flag() {
        assert_eq!(
            engine_args(VariantId::Cuda, "127.0.0.1", 50021),
            vec!["--host", "127.0.0.1", "--port", "50021", "--use_gpu"]
        );
        assert!(engine_args(VariantId::DirectMl, "127.0.0.1", 50021).contains(&"--use_gpu".to_string()));
        assert_eq!(
            engine_args(VariantId::Cpu, "localhost", 50031),
            vec!["--host", "localhost", "--port", "50031"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn forwards_output_lines_to_log_sink() {
        use std::sync::Mutex;

        let lines = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink_lines = lines.clone();
        let sink: Arc<dyn LogSink> =
            Arc::new(move |line: &str| sink_lines.lock().unwrap().push(line.to_string()));

        let mut child = Command::new("sh")
            .args(["-c", "echo ready; echo oops >&2"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        forward_lines(child.stdout.take().unwrap(), VariantId::Cpu, Stream::Stdout, sink.clone());
        forward_lines(child.stderr.take().unwrap(), VariantId::Cpu, Stream::Stderr, sink);
        child.wait().await.unwrap();

        for _ in 0..50 {
            if lines.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        let mut got = lines.lock().unwrap().clone();
        got.sort();
        assert_eq!(got, vec!["[VOICEVOX stderr] oops", "[VOICEVOX stdout] ready"]);
    }
}
