//! Two communicators linked in memory: one calls, the other works.
//!
//! Run with:
//!   cargo run --example in-process

use std::time::Duration;

use serde_json::json;
use workerlink::port::memory;
use workerlink::{CallOptions, Communicator, HandlerError};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let ((main_port, main_inbox), (worker_port, worker_inbox)) = memory::pair();
    let main_side = Communicator::new(main_port);
    let worker = Communicator::new(worker_port);
    main_side.spawn(main_inbox);
    worker.spawn(worker_inbox);

    worker.operation("progress", |payload, emit| async move {
        let steps = payload.as_u64().unwrap_or(3);
        for step in 1..=steps {
            tokio::time::sleep(Duration::from_millis(50)).await;
            emit.emit("step", json!({ "step": step, "of": steps }))?;
        }
        Ok::<_, HandlerError>(json!("finished"))
    });
    worker.on("hello", |args| eprintln!("worker got hello: {args:?}"));

    main_side.emit("hello", vec![json!("from main")])?;

    let options = CallOptions::new().with_on_event(|name, payload| eprintln!("{name}: {payload}"));
    let result = main_side.exec_with("progress", json!(4), options).await?;
    eprintln!("result: {result}");

    match main_side.exec("missing", json!(null)).await {
        Ok(value) => eprintln!("unexpected success: {value}"),
        Err(err) => eprintln!("expected failure: {err}"),
    }

    main_side.terminate();
    Ok(())
}
