use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::process::{Child, Command};
use tracing::{debug, warn};
use workerlink_comm::{CallError, CallOptions, Communicator, DEFAULT_OPERATION};
use workerlink_port::StreamPort;

use crate::cmd::{parse_duration, runtime, CallArgs};
use crate::exit::{
    call_error, io_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{print_report, CallReport, EventRecord, OutputFormat};

const WORKER_EXIT_GRACE: Duration = Duration::from_secs(2);

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = resolve_payload(&args)?;
    let timeout = parse_duration(&args.timeout)?;
    let (program, worker_args) = worker_command(&args)?;
    runtime()?.block_on(call(args, payload, timeout, program, worker_args, format))
}

fn resolve_payload(args: &CallArgs) -> CliResult<Value> {
    if let Some(json) = &args.json {
        return serde_json::from_str(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")));
    }
    if let Some(data) = &args.data {
        return Ok(Value::String(data.clone()));
    }
    Ok(Value::Null)
}

fn worker_command(args: &CallArgs) -> CliResult<(String, Vec<String>)> {
    if let Some((program, rest)) = args.worker.split_first() {
        return Ok((program.clone(), rest.to_vec()));
    }
    let exe = std::env::current_exe()
        .map_err(|err| io_error("failed to locate workerlink executable", err))?;
    Ok((
        exe.to_string_lossy().into_owned(),
        vec![
            "--log-level".to_string(),
            args.worker_log_level.as_arg().to_string(),
            "serve".to_string(),
        ],
    ))
}

async fn call(
    args: CallArgs,
    payload: Value,
    timeout: Duration,
    program: String,
    worker_args: Vec<String>,
    format: OutputFormat,
) -> CliResult<i32> {
    debug!(program = %program, args = ?worker_args, "starting worker");
    let mut child = Command::new(&program)
        .args(&worker_args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| io_error(&format!("failed to start worker {program}"), err))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| CliError::new(INTERNAL, "worker stdin unavailable"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| CliError::new(INTERNAL, "worker stdout unavailable"))?;

    let (port, inbox) = StreamPort::spawn(stdout, stdin);
    let port = Arc::new(port);
    let comm = Communicator::new(Arc::clone(&port));
    comm.spawn(inbox);

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let options = CallOptions::new().with_on_event(move |event, payload| {
        debug!(event, "scoped event");
        sink.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(EventRecord {
                event: event.to_string(),
                payload,
            });
    });

    let started = Instant::now();
    let pending = match &args.operation {
        Some(operation) => comm.exec_with(operation, payload, options),
        None => comm.post_message_with(payload, options),
    };
    let message_id = pending.message_id();
    let settled = tokio::time::timeout(timeout, pending).await;
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    comm.terminate();
    port.shutdown().await;
    reap(&mut child).await;

    let settled = settled.map_err(|_| {
        CliError::new(
            TIMEOUT,
            format!("call timed out after {}ms", timeout.as_millis()),
        )
    })?;

    let events = std::mem::take(&mut *events.lock().unwrap_or_else(PoisonError::into_inner));
    let operation = args
        .operation
        .unwrap_or_else(|| DEFAULT_OPERATION.to_string());
    let (success, result, error) = match settled {
        Ok(value) => (true, Some(value), None),
        Err(CallError::Remote(remote)) => (false, None, Some(remote.into_payload())),
        Err(err) => return Err(call_error("call failed", err)),
    };

    print_report(
        &CallReport {
            operation,
            message_id,
            success,
            result,
            error,
            events,
            elapsed_ms,
        },
        format,
    );

    Ok(if success { SUCCESS } else { FAILURE })
}

/// Give the worker a moment to exit on stdin EOF, then kill it.
async fn reap(child: &mut Child) {
    match tokio::time::timeout(WORKER_EXIT_GRACE, child.wait()).await {
        Ok(Ok(status)) => debug!(%status, "worker exited"),
        Ok(Err(err)) => warn!(error = %err, "failed to wait for worker"),
        Err(_) => {
            warn!("worker did not exit after stdin closed, killing it");
            if let Err(err) = child.kill().await {
                warn!(error = %err, "failed to kill worker");
            }
        }
    }
}
