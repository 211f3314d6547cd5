//! Built-in handlers, one per job kind.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Value as JsonValue, json};
use tracing::{debug, warn};

use cronq_core::{Job, JobClosure};
use cronq_events::{EventBus, JobEvent};

use super::capture::OutputSink;
use super::handler::{Handler, HandlerError, HandlerOutput};

const CHILD_POLL: Duration = Duration::from_millis(25);

/// Runs `program` with `args` directly, no shell.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandHandler;

impl Handler for CommandHandler {
    fn name(&self) -> &str {
        "command"
    }

    fn handle(&mut self, job: &Job, out: &mut OutputSink) -> Result<HandlerOutput, HandlerError> {
        let payload = job.payload();
        let program = str_field(payload, "program")?;
        let args: Vec<&str> = payload
            .get("args")
            .and_then(JsonValue::as_array)
            .map(|args| args.iter().filter_map(JsonValue::as_str).collect())
            .unwrap_or_default();

        let mut cmd = Command::new(program);
        cmd.args(&args);
        apply_cwd(&mut cmd, payload);
        run_child(cmd, job.timeout(), out)
    }
}

/// Runs `command` through `sh -c`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellHandler;

impl Handler for ShellHandler {
    fn name(&self) -> &str {
        "shell"
    }

    fn handle(&mut self, job: &Job, out: &mut OutputSink) -> Result<HandlerOutput, HandlerError> {
        let payload = job.payload();
        let command = str_field(payload, "command")?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        apply_cwd(&mut cmd, payload);
        run_child(cmd, job.timeout(), out)
    }
}

/// Invokes the closure owned by the job.
#[derive(Debug, Clone)]
pub struct ClosureHandler {
    closure: JobClosure,
}

impl ClosureHandler {
    pub fn new(closure: JobClosure) -> Self {
        Self { closure }
    }
}

impl Handler for ClosureHandler {
    fn name(&self) -> &str {
        "closure"
    }

    fn handle(&mut self, job: &Job, out: &mut OutputSink) -> Result<HandlerOutput, HandlerError> {
        match self.closure.call(job.payload(), out) {
            Ok(data) => Ok(HandlerOutput::ok(data)),
            Err(message) => Err(HandlerError::Failed(message)),
        }
    }
}

/// Publishes `{event, data}` on the event bus.
pub struct EventHandler {
    bus: Arc<dyn EventBus<JobEvent>>,
}

impl EventHandler {
    pub fn new(bus: Arc<dyn EventBus<JobEvent>>) -> Self {
        Self { bus }
    }
}

impl Handler for EventHandler {
    fn name(&self) -> &str {
        "event"
    }

    fn handle(&mut self, job: &Job, out: &mut OutputSink) -> Result<HandlerOutput, HandlerError> {
        let payload = job.payload();
        let name = str_field(payload, "event")?;
        let data = payload.get("data").cloned().unwrap_or(JsonValue::Null);

        self.bus.publish(JobEvent::new(name, data).for_job(job.name()))?;
        writeln!(out, "published {name}")?;
        Ok(HandlerOutput::ok(None))
    }
}

/// Performs an HTTP GET/POST; the response body becomes the output.
#[derive(Debug, Default, Clone, Copy)]
pub struct UrlHandler;

impl Handler for UrlHandler {
    fn name(&self) -> &str {
        "url"
    }

    fn handle(&mut self, job: &Job, out: &mut OutputSink) -> Result<HandlerOutput, HandlerError> {
        let payload = job.payload();
        let url = str_field(payload, "url")?;
        let method = payload
            .get("method")
            .and_then(JsonValue::as_str)
            .unwrap_or("GET");

        let mut builder = reqwest::blocking::Client::builder();
        if let Some(timeout) = job.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        let mut request = match method {
            "GET" => client.get(url),
            "POST" => client.post(url),
            other => return Err(HandlerError::Payload(format!("unsupported method `{other}`"))),
        };
        if let Some(headers) = payload.get("headers").and_then(JsonValue::as_object) {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key.as_str(), value);
                }
            }
        }
        if let Some(body) = payload.get("body") {
            request = request.json(body);
        }

        let response = request.send()?;
        let status = response.status();
        let body = response.text()?;
        out.write_all(body.as_bytes())?;

        debug!(url, method, status = status.as_u16(), "url job responded");
        if status.is_success() {
            Ok(HandlerOutput::ok(None))
        } else {
            Ok(HandlerOutput::failed(Some(json!(format!("HTTP {status}")))))
        }
    }
}

fn str_field<'a>(payload: &'a JsonValue, field: &str) -> Result<&'a str, HandlerError> {
    payload
        .get(field)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| HandlerError::Payload(format!("missing string field `{field}`")))
}

fn apply_cwd(cmd: &mut Command, payload: &JsonValue) {
    if let Some(cwd) = payload.get("cwd").and_then(JsonValue::as_str) {
        cmd.current_dir(cwd);
    }
}

/// Spawn `cmd`, capture stdout then stderr into `out`, and enforce `timeout`.
///
/// A non-zero exit is a failed attempt carrying the exit status; the
/// captured output is kept.
fn run_child(
    mut cmd: Command,
    timeout: Option<Duration>,
    out: &mut OutputSink,
) -> Result<HandlerOutput, HandlerError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn()?;

    // Pipes are drained on their own threads so a chatty child cannot block.
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = match wait_with_timeout(&mut child, timeout)? {
        Some(status) => status,
        None => {
            let secs = timeout.map(|t| t.as_secs()).unwrap_or_default();
            warn!(timeout_secs = secs, "killing child after timeout");
            if let Err(e) = child.kill() {
                warn!(error = %e, "failed to kill timed out child");
            }
            let _ = child.wait();
            return Err(HandlerError::Timeout(secs));
        }
    };

    for reader in [stdout, stderr].into_iter().flatten() {
        let bytes = reader
            .join()
            .map_err(|_| HandlerError::failed("output reader panicked"))??;
        out.write_all(&bytes)?;
    }

    if status.success() {
        Ok(HandlerOutput::ok(None))
    } else {
        Ok(HandlerOutput::failed(Some(json!(format!("process {status}")))))
    }
}

fn wait_with_timeout(
    child: &mut Child,
    timeout: Option<Duration>,
) -> Result<Option<ExitStatus>, HandlerError> {
    let Some(timeout) = timeout else {
        return Ok(Some(child.wait()?));
    };

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(CHILD_POLL);
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<std::io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    })
}
