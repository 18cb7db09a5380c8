use crate::model::{PageKind, ResourceKind, RowData};
use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command as TokioCommand};
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const CAPTURE_TIMEOUT: Duration = Duration::from_secs(15);
const LOG_TAIL_LINES: usize = 500;
const SHELL_BOOTSTRAP: &str = "TERM=xterm-256color; export TERM; \
    [ -x /bin/bash ] && ([ -x /usr/bin/script ] && /usr/bin/script -q -c /bin/bash /dev/null || exec /bin/bash) || exec /bin/sh";

/// The resource a kubectl invocation targets.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResourceRef {
    pub resource: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceRef {
    /// None on pages that list no kubectl resource.
    pub fn from_row(kind: &PageKind, row: &RowData) -> Option<Self> {
        Some(Self {
            resource: kind.kubectl_resource()?,
            namespace: if kind.namespaced() {
                row.namespace.clone()
            } else {
                None
            },
            name: row.name.clone(),
        })
    }

    pub fn label(&self) -> String {
        match &self.namespace {
            Some(namespace) => format!("{}/{namespace}/{}", self.resource, self.name),
            None => format!("{}/{}", self.resource, self.name),
        }
    }

    fn push_target(&self, args: &mut Vec<String>) {
        args.push(self.resource.clone());
        args.push(self.name.clone());
        if let Some(namespace) = &self.namespace {
            args.push("-n".to_string());
            args.push(namespace.clone());
        }
    }
}

/// Read-only kubectl verbs whose output lands in a detail layer.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DetailVerb {
    Yaml,
    Describe,
}

impl DetailVerb {
    pub fn title(self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Describe => "describe",
        }
    }

    pub fn args(self, target: &ResourceRef) -> Vec<String> {
        match self {
            Self::Yaml => get_yaml_args(target),
            Self::Describe => describe_args(target),
        }
    }
}

pub fn get_yaml_args(target: &ResourceRef) -> Vec<String> {
    let mut args = vec!["get".to_string()];
    target.push_target(&mut args);
    args.extend(["-o".to_string(), "yaml".to_string()]);
    args
}

pub fn describe_args(target: &ResourceRef) -> Vec<String> {
    let mut args = vec!["describe".to_string()];
    target.push_target(&mut args);
    args
}

pub fn logs_args(target: &ResourceRef) -> Result<Vec<String>> {
    let namespace = pod_namespace(target)?;
    Ok(vec![
        "logs".to_string(),
        "-f".to_string(),
        "-n".to_string(),
        namespace.to_string(),
        target.name.clone(),
        "--all-containers".to_string(),
        format!("--tail={LOG_TAIL_LINES}"),
    ])
}

pub fn delete_args(target: &ResourceRef) -> Vec<String> {
    let mut args = vec!["delete".to_string()];
    target.push_target(&mut args);
    args
}

pub fn edit_args(target: &ResourceRef) -> Vec<String> {
    let mut args = vec!["edit".to_string()];
    target.push_target(&mut args);
    args
}

pub fn shell_args(target: &ResourceRef) -> Result<Vec<String>> {
    let namespace = pod_namespace(target)?;
    Ok(vec![
        "exec".to_string(),
        "-it".to_string(),
        "-n".to_string(),
        namespace.to_string(),
        target.name.clone(),
        "--".to_string(),
        "/bin/sh".to_string(),
        "-c".to_string(),
        SHELL_BOOTSTRAP.to_string(),
    ])
}

fn pod_namespace(target: &ResourceRef) -> Result<&str> {
    if target.resource != ResourceKind::Pods.token() {
        anyhow::bail!("only pods support this action, not {}", target.resource);
    }
    target
        .namespace
        .as_deref()
        .with_context(|| format!("pod {} has no namespace", target.name))
}

/// Runs kubectl to completion and returns stdout. A non-zero exit becomes an
/// error carrying stderr.
pub async fn run_capture(args: &[String]) -> Result<String> {
    debug!(args = ?args, "running kubectl");
    let mut cmd = TokioCommand::new("kubectl");
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = timeout(CAPTURE_TIMEOUT, cmd.output())
        .await
        .with_context(|| format!("kubectl {} timed out", args.join(" ")))?
        .with_context(|| format!("failed to execute kubectl {}", args.join(" ")))?;

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }

    Err(exit_error(output.status, &output.stderr))
}

/// Runs kubectl attached to the terminal. The caller suspends the UI first.
pub async fn run_interactive(args: &[String]) -> Result<()> {
    let mut cmd = TokioCommand::new("kubectl");
    cmd.args(args);
    if std::env::var_os("KUBE_EDITOR").is_none()
        && let Some(editor) = std::env::var_os("EDITOR")
    {
        cmd.env("KUBE_EDITOR", editor);
    }
    cmd.stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    let status = cmd
        .status()
        .await
        .with_context(|| format!("failed to run kubectl {}", args.join(" ")))?;
    if status.success() {
        Ok(())
    } else {
        Err(anyhow::anyhow!("kubectl {} exited with {status}", args.join(" ")))
    }
}

fn exit_error(status: std::process::ExitStatus, stderr: &[u8]) -> anyhow::Error {
    let stderr = String::from_utf8_lossy(stderr);
    let reason = stderr.trim();
    if reason.is_empty() {
        anyhow::anyhow!("kubectl exited with {status}")
    } else {
        anyhow::anyhow!("{reason}")
    }
}

/// Output of a followed log, delivered line by line.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LogFeed {
    Line(String),
    /// The process ended on its own, with the failure reason if it failed.
    Closed(Option<String>),
}

pub type LogSink = Box<dyn Fn(LogFeed) + Send + Sync>;

/// A running `kubectl logs -f`. Stopping or dropping it kills the child.
pub struct LogStream {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl LogStream {
    pub fn follow(args: &[String], sink: LogSink) -> Result<Self> {
        Self::spawn("kubectl", args, sink)
    }

    pub(crate) fn spawn(program: &str, args: &[String], sink: LogSink) -> Result<Self> {
        let mut child = TokioCommand::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start {program} {}", args.join(" ")))?;
        let stdout = child
            .stdout
            .take()
            .context("log stream has no stdout handle")?;

        let token = CancellationToken::new();
        let task = tokio::spawn(pump_log_lines(child, stdout, token.clone(), sink));
        debug!(program, args = ?args, "log stream started");
        Ok(Self { token, task })
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn pump_log_lines(
    mut child: Child,
    stdout: ChildStdout,
    token: CancellationToken,
    sink: LogSink,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                if let Err(error) = child.kill().await {
                    warn!(%error, "failed to kill log stream");
                }
                debug!("log stream stopped");
                return;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => sink(LogFeed::Line(line)),
                Ok(None) => break,
                Err(error) => {
                    warn!(%error, "log stream read failed");
                    break;
                }
            },
        }
    }

    let reason = match child.wait_with_output().await {
        Ok(output) if output.status.success() => None,
        Ok(output) => Some(exit_error(output.status, &output.stderr).to_string()),
        Err(error) => Some(error.to_string()),
    };
    sink(LogFeed::Closed(reason));
}

#[cfg(test)]
mod tests {
    use super::{
        DetailVerb, LogFeed, LogStream, ResourceRef, delete_args, describe_args, edit_args,
        get_yaml_args, logs_args, shell_args,
    };
    use crate::model::{PageKind, ResourceKind, RowData};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn pod() -> ResourceRef {
        ResourceRef {
            resource: "pods".to_string(),
            namespace: Some("default".to_string()),
            name: "web-0".to_string(),
        }
    }

    fn sh(script: &str) -> (LogStream, mpsc::UnboundedReceiver<LogFeed>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let args = vec!["-c".to_string(), script.to_string()];
        let stream = LogStream::spawn(
            "sh",
            &args,
            Box::new(move |feed: LogFeed| {
                let _ = tx.send(feed);
            }),
        )
        .expect("spawn sh");
        (stream, rx)
    }

    async fn next_feed(rx: &mut mpsc::UnboundedReceiver<LogFeed>) -> LogFeed {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("log feed")
            .expect("open channel")
    }

    #[test]
    fn get_yaml_targets_namespaced_resource() {
        assert_eq!(
            get_yaml_args(&pod()),
            vec!["get", "pods", "web-0", "-n", "default", "-o", "yaml"]
        );
    }

    #[test]
    fn cluster_scoped_rows_drop_namespace() {
        let row = RowData {
            name: "worker-1".to_string(),
            namespace: Some("ignored".to_string()),
            columns: Vec::new(),
        };
        let target =
            ResourceRef::from_row(&PageKind::Resource(ResourceKind::Nodes), &row).expect("target");
        assert_eq!(target.namespace, None);
        assert_eq!(describe_args(&target), vec!["describe", "nodes", "worker-1"]);
        assert_eq!(target.label(), "nodes/worker-1");
    }

    #[test]
    fn discovery_rows_are_not_targets() {
        let row = RowData {
            name: "certificates.cert-manager.io".to_string(),
            namespace: None,
            columns: Vec::new(),
        };
        assert_eq!(ResourceRef::from_row(&PageKind::ApiResources, &row), None);
    }

    #[test]
    fn logs_follow_all_containers() {
        let args = logs_args(&pod()).expect("pod logs");
        assert_eq!(&args[..5], &["logs", "-f", "-n", "default", "web-0"]);
        assert!(args.contains(&"--all-containers".to_string()));
        assert!(args.iter().any(|arg| arg.starts_with("--tail=")));
    }

    #[test]
    fn pod_only_actions_reject_other_kinds() {
        let deployment = ResourceRef {
            resource: "deployments".to_string(),
            namespace: Some("default".to_string()),
            name: "api".to_string(),
        };
        assert!(logs_args(&deployment).is_err());
        assert!(shell_args(&deployment).is_err());
        assert_eq!(
            DetailVerb::Describe.args(&deployment),
            vec!["describe", "deployments", "api", "-n", "default"]
        );
    }

    #[test]
    fn shell_falls_back_to_sh() {
        let args = shell_args(&pod()).expect("shell");
        assert_eq!(&args[..6], &["exec", "-it", "-n", "default", "web-0", "--"]);
        assert_eq!(args[6], "/bin/sh");
        assert!(args[8].contains("exec /bin/bash"));
    }

    #[test]
    fn mutating_verbs_target_the_resource() {
        assert_eq!(delete_args(&pod()), vec!["delete", "pods", "web-0", "-n", "default"]);
        assert_eq!(edit_args(&pod()), vec!["edit", "pods", "web-0", "-n", "default"]);
    }

    #[tokio::test]
    async fn log_stream_delivers_lines_then_closes() {
        let (_stream, mut rx) = sh("printf 'one\\ntwo\\n'");
        assert_eq!(next_feed(&mut rx).await, LogFeed::Line("one".to_string()));
        assert_eq!(next_feed(&mut rx).await, LogFeed::Line("two".to_string()));
        assert_eq!(next_feed(&mut rx).await, LogFeed::Closed(None));
    }

    #[tokio::test]
    async fn log_stream_reports_failed_exit() {
        let (_stream, mut rx) = sh("echo 'pod not found' >&2; exit 3");
        assert_eq!(
            next_feed(&mut rx).await,
            LogFeed::Closed(Some("pod not found".to_string()))
        );
    }

    #[tokio::test]
    async fn stopping_a_log_stream_kills_the_child() {
        let (stream, mut rx) = sh("echo ready; sleep 30");
        assert_eq!(next_feed(&mut rx).await, LogFeed::Line("ready".to_string()));

        stream.stop();
        tokio::time::timeout(Duration::from_secs(2), async {
            while !stream.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("log stream should stop well before sleep ends");
        assert!(rx.try_recv().is_err());
    }
}
