use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info};
use workerlink_comm::{Communicator, Emitter, Handler, HandlerError};
use workerlink_port::StreamPort;
use workerlink_wire::FrameConfig;

use crate::cmd::{runtime, ServeArgs};
use crate::exit::{comm_error, CliError, CliResult, INTERNAL, SUCCESS};

const DEFAULT_COUNT: u64 = 3;
const DEFAULT_SLEEP_MS: u64 = 100;

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let runtime = runtime()?;
    let result = runtime.block_on(serve(args));
    // A blocking stdin read may still be parked after Ctrl-C.
    runtime.shutdown_background();
    result
}

async fn serve(args: ServeArgs) -> CliResult<i32> {
    let config = FrameConfig::default().with_max_payload_size(args.max_frame_size);
    let (port, inbox) =
        StreamPort::spawn_with_config(tokio::io::stdin(), tokio::io::stdout(), config);
    let port = Arc::new(port);

    let worker = Communicator::new(Arc::clone(&port));
    register_demo_operations(&worker);
    let mut pings = forward_pings(&worker);

    info!(operations = ?worker.operations(), "worker ready on stdio");
    let mut dispatch = worker.spawn(inbox);
    let outcome = loop {
        tokio::select! {
            finished = &mut dispatch => {
                debug!("stdin closed");
                if let Err(err) = finished {
                    break Err(CliError::new(INTERNAL, format!("dispatch loop failed: {err}")));
                }
                // Pings delivered just before EOF are still answered.
                let mut answered = Ok(SUCCESS);
                while let Ok(args) = pings.try_recv() {
                    if let Err(err) = answer_ping(&worker, args) {
                        answered = Err(err);
                        break;
                    }
                }
                break answered;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break Ok(SUCCESS);
            }
            Some(args) = pings.recv() => {
                if let Err(err) = answer_ping(&worker, args) {
                    break Err(err);
                }
            }
        }
    };

    worker.terminate();
    port.shutdown().await;
    outcome
}

/// Hand `ping` arguments to the serve loop.
fn forward_pings(worker: &Communicator) -> mpsc::UnboundedReceiver<Vec<Value>> {
    let (tx, rx) = mpsc::unbounded_channel();
    worker.on("ping", move |args| {
        debug!(args = args.len(), "ping received");
        let _ = tx.send(args.to_vec());
    });
    rx
}

fn answer_ping(worker: &Communicator, args: Vec<Value>) -> CliResult<()> {
    worker
        .emit("pong", args)
        .map(|_| ())
        .map_err(|err| comm_error("failed to answer ping", err))
}

/// Operations served by `workerlink serve`.
pub(crate) fn register_demo_operations(worker: &Communicator) {
    worker
        .operation("echo", |payload, _emit| async move {
            Ok::<_, HandlerError>(payload)
        })
        .operation_sync("count", |payload: Value, emit: &Emitter| {
            let n = payload.as_u64().unwrap_or(DEFAULT_COUNT);
            for i in 1..=n {
                emit.emit("tick", json!(i))?;
            }
            Ok::<_, HandlerError>(json!("done"))
        })
        .operation_sync("boom", |payload: Value, _: &Emitter| {
            let message = payload.as_str().unwrap_or("boom").to_string();
            Err::<Value, _>(HandlerError::msg(message))
        })
        .operation("sleep", |payload, _emit| async move {
            let ms = payload.as_u64().unwrap_or(DEFAULT_SLEEP_MS);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, HandlerError>(json!({ "slept_ms": ms }))
        })
        .default_operation(Handler::from_sync(|payload: Value, _: &Emitter| {
            let name = payload.as_str().unwrap_or("world");
            Ok::<_, HandlerError>(json!(format!("hello, {name}")))
        }));
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use workerlink_comm::CallOptions;
    use workerlink_port::memory;

    use super::*;

    fn demo_pair() -> Communicator {
        let ((client_port, client_inbox), (worker_port, worker_inbox)) = memory::pair();
        let client = Communicator::new(client_port);
        let worker = Communicator::new(worker_port);
        register_demo_operations(&worker);
        client.spawn(client_inbox);
        worker.spawn(worker_inbox);
        client
    }

    #[tokio::test]
    async fn demo_operations_answer() {
        let client = demo_pair();

        assert_eq!(client.exec("echo", json!([1, 2])).await.unwrap(), json!([1, 2]));
        assert_eq!(
            client.post_message(json!("ada")).await.unwrap(),
            json!("hello, ada")
        );
        assert_eq!(
            client.exec("sleep", json!(1)).await.unwrap(),
            json!({ "slept_ms": 1 })
        );

        let err = client.exec("boom", json!("bad input")).await.unwrap_err();
        assert_eq!(
            err.remote().and_then(|remote| remote.message()),
            Some("bad input")
        );
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let ((client_port, client_inbox), (worker_port, worker_inbox)) = memory::pair();
        let client = Communicator::new(client_port);
        let worker = Communicator::new(worker_port);
        let mut pings = forward_pings(&worker);
        client.spawn(client_inbox);
        worker.spawn(worker_inbox);

        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Mutex::new(Some(tx));
        client.once("pong", move |args| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(args.to_vec());
            }
        });
        client.emit("ping", vec![json!(7), json!("x")]).unwrap();

        let args = pings.recv().await.unwrap();
        answer_ping(&worker, args).unwrap();
        assert_eq!(rx.await.unwrap(), vec![json!(7), json!("x")]);

        worker.terminate();
        assert!(answer_ping(&worker, vec![]).is_ok());
    }

    #[tokio::test]
    async fn count_streams_ticks() {
        let client = demo_pair();
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ticks);
        let options = CallOptions::new().with_on_event(move |name, payload| {
            assert_eq!(name, "tick");
            sink.lock().unwrap().push(payload);
        });

        let done = client.exec_with("count", Value::Null, options).await.unwrap();
        assert_eq!(done, json!("done"));
        assert_eq!(*ticks.lock().unwrap(), vec![json!(1), json!(2), json!(3)]);
    }
}
