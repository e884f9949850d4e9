//! A long-lived MCP client driving one stdio child process.
//!
//! The child's stdout is read by a single background task that correlates
//! responses to outstanding calls by JSON-RPC id (§5: "the MCP client over
//! stdio is driven by a single background reader that correlates responses
//! by JSON-RPC id"). Concurrent callers share this one reader; each call
//! parks on a oneshot that the reader completes when its id's frame
//! arrives.

use dashmap::DashMap;
use indexmap::IndexMap;
use serde_json::Value;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{oneshot, Mutex};

use crate::error::{GatewayError, GatewayResult};
use crate::metrics::GatewayMetrics;
use crate::secrets::SecretStore;

/// What the reader handed back for one outstanding call.
enum StdioReply {
    Result(Value),
    Error(String),
}

type Pending = Arc<DashMap<i64, oneshot::Sender<StdioReply>>>;

/// One live connection to a stdio MCP server child process.
pub struct StdioClient {
    name: String,
    stdin: Mutex<ChildStdin>,
    pending: Pending,
    next_id: AtomicI64,
    dead: Arc<AtomicBool>,
    child: Mutex<Child>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl StdioClient {
    /// Spawns `command args...` with `env` (resolved) merged into the
    /// child's environment, connects stdin/stdout/stderr, and starts the
    /// background reader/drain tasks.
    pub async fn connect(
        name: &str,
        command: &str,
        args: &[String],
        env: &IndexMap<String, String>,
        cwd: Option<&str>,
        secrets: &dyn SecretStore,
        metrics: &GatewayMetrics,
    ) -> GatewayResult<Self> {
        let mut resolved_env = std::collections::HashMap::with_capacity(env.len());
        for (key, value) in env {
            resolved_env.insert(key.clone(), crate::secrets::resolve(value, secrets)?);
        }

        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args)
            .envs(resolved_env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| GatewayError::stdio_transport(name, format!("spawn failed: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GatewayError::stdio_transport(name, "child stdin not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::stdio_transport(name, "child stdout not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| GatewayError::stdio_transport(name, "child stderr not piped"))?;

        let pending: Pending = Arc::new(DashMap::new());
        let dead = Arc::new(AtomicBool::new(false));

        let reader_task = tokio::spawn(read_loop(
            stdout,
            pending.clone(),
            name.to_string(),
            dead.clone(),
        ));

        let stderr_name = name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(upstream = %stderr_name, "{line}");
            }
        });

        metrics.inc_stdio_spawned();

        Ok(Self {
            name: name.to_string(),
            stdin: Mutex::new(stdin),
            pending,
            next_id: AtomicI64::new(1),
            dead,
            child: Mutex::new(child),
            reader_task,
        })
    }

    /// `true` once the reader task has observed the child exit, its pipe
    /// close, or a fatal frame error. A dead client must be evicted by the
    /// pool and replaced on the next call.
    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    /// Issues one JSON-RPC call and awaits its matching reply.
    ///
    /// Returns `Err(UpstreamRpcError)` for an application-level error
    /// object from the child (non-evicting) and `Err(StdioTransportError)`
    /// / `Err(UpstreamTimeout)` for anything transport-level (evicting —
    /// the caller is responsible for invalidating the pool entry on those).
    pub async fn call(&self, method: &str, params: Value, timeout: Duration) -> GatewayResult<Value> {
        if self.is_dead() {
            return Err(GatewayError::stdio_transport(&self.name, "connection already closed"));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                self.pending.remove(&id);
                return Err(GatewayError::stdio_transport(&self.name, e.to_string()));
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(StdioReply::Result(value))) => Ok(value),
            Ok(Ok(StdioReply::Error(message))) => Err(GatewayError::upstream_rpc(&self.name, message)),
            Ok(Err(_recv_dropped)) => {
                Err(GatewayError::stdio_transport(&self.name, "connection closed mid-call"))
            }
            Err(_elapsed) => {
                self.pending.remove(&id);
                Err(GatewayError::upstream_timeout(&self.name, method, timeout.as_millis() as u64))
            }
        }
    }

    /// Aborts the reader task and kills the child. Best-effort: close
    /// errors are ignored, matching §4.3's shutdown contract.
    pub async fn shutdown(&self) {
        self.reader_task.abort();
        let mut child = self.child.lock().await;
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

async fn read_loop(
    stdout: tokio::process::ChildStdout,
    pending: Pending,
    name: String,
    dead: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(&line) {
                    Ok(value) => dispatch_frame(&pending, &value),
                    Err(e) => {
                        tracing::debug!(upstream = %name, error = %e, "ignoring unparseable stdio line");
                    }
                }
            }
            Ok(None) => {
                tracing::debug!(upstream = %name, "stdio child closed stdout");
                break;
            }
            Err(e) => {
                tracing::debug!(upstream = %name, error = %e, "stdio read error");
                break;
            }
        }
    }
    dead.store(true, Ordering::Release);
    // Dropping every pending sender completes the corresponding receiver
    // with a RecvError, which `call()` maps to a transport failure.
    pending.clear();
}

fn dispatch_frame(pending: &Pending, value: &Value) {
    let Some(id) = value.get("id").and_then(Value::as_i64) else {
        return;
    };
    let Some((_, tx)) = pending.remove(&id) else {
        return;
    };
    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("upstream error")
            .to_string();
        let _ = tx.send(StdioReply::Error(message));
    } else {
        let result = value.get("result").cloned().unwrap_or(Value::Null);
        let _ = tx.send(StdioReply::Result(result));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_frame_routes_result_and_error() {
        let pending: Pending = Arc::new(DashMap::new());
        let (tx_ok, rx_ok) = oneshot::channel();
        let (tx_err, rx_err) = oneshot::channel();
        pending.insert(1, tx_ok);
        pending.insert(2, tx_err);

        dispatch_frame(&pending, &serde_json::json!({"jsonrpc":"2.0","id":1,"result":{"tools":[]}}));
        dispatch_frame(&pending, &serde_json::json!({"jsonrpc":"2.0","id":2,"error":{"code":-32000,"message":"boom"}}));

        match rx_ok.try_recv() {
            Ok(StdioReply::Result(v)) => assert_eq!(v, serde_json::json!({"tools": []})),
            _ => panic!("expected a result reply"),
        }
        match rx_err.try_recv() {
            Ok(StdioReply::Error(msg)) => assert_eq!(msg, "boom"),
            _ => panic!("expected an error reply"),
        }
        assert!(pending.is_empty());
    }

    #[test]
    fn dispatch_frame_ignores_unknown_id() {
        let pending: Pending = Arc::new(DashMap::new());
        dispatch_frame(&pending, &serde_json::json!({"jsonrpc":"2.0","id":99,"result":{}}));
        assert!(pending.is_empty());
    }
}
