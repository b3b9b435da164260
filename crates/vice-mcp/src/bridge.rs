//! Marshals tool calls onto the execution context.
//!
//! The context that owns the machine runs on its own thread. Network tasks
//! hold a [`BridgeHandle`], enqueue a call and await the reply; the
//! execution thread drains the queue at instruction boundaries, so handlers
//! never run concurrently with an instruction or with each other.

use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::context::McpContext;
use crate::error::{ToolError, ToolResult};
use crate::registry::ToolDescriptor;

/// Pending calls allowed before callers start waiting for queue space.
pub const QUEUE_CAPACITY: usize = 64;

/// Instructions executed between two queue drains while running.
pub const INSTRUCTIONS_PER_SLICE: usize = 10_000;

/// Pause between slices; roughly one PAL frame of a headless CPU.
const SLICE_PERIOD: Duration = Duration::from_millis(20);

struct Call {
    tool: &'static ToolDescriptor,
    params: Value,
    reply: oneshot::Sender<ToolResult>,
}

/// Network-side handle. Cheap to clone; the execution thread exits once
/// every handle has been dropped.
#[derive(Clone, Debug)]
pub struct BridgeHandle {
    tx: mpsc::Sender<Call>,
}

impl BridgeHandle {
    pub async fn call(&self, tool: &'static ToolDescriptor, params: Value) -> ToolResult {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Call { tool, params, reply })
            .await
            .map_err(|_| ToolError::internal("Execution context is not running"))?;
        response
            .await
            .map_err(|_| ToolError::internal("Execution context dropped the request"))?
    }
}

pub struct ExecutionContext {
    ctx: McpContext,
    rx: mpsc::Receiver<Call>,
}

impl ExecutionContext {
    pub fn new(ctx: McpContext) -> (Self, BridgeHandle) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        (Self { ctx, rx }, BridgeHandle { tx })
    }

    pub fn context(&self) -> &McpContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut McpContext {
        &mut self.ctx
    }

    /// Serves calls and executes instructions until every handle is gone.
    ///
    /// While stopped the thread blocks on the queue. While running it
    /// executes a slice of instructions, serving any queued call between two
    /// instructions, then yields for [`SLICE_PERIOD`].
    pub fn run(mut self) -> McpContext {
        tracing::debug!(target: "vice.mcp.exec", "execution context started");
        loop {
            if self.ctx.exec_state().is_stopped() {
                match self.rx.blocking_recv() {
                    Some(call) => self.serve(call),
                    None => break,
                }
                continue;
            }

            let mut executed = 0;
            while executed < INSTRUCTIONS_PER_SLICE {
                match self.rx.try_recv() {
                    Ok(call) => self.serve(call),
                    Err(mpsc::error::TryRecvError::Empty) => {}
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        tracing::debug!(target: "vice.mcp.exec", "execution context stopped");
                        return self.ctx;
                    }
                }
                if !self.ctx.run_instruction() {
                    break;
                }
                executed += 1;
            }
            if !self.ctx.exec_state().is_stopped() {
                thread::sleep(SLICE_PERIOD);
            }
        }
        tracing::debug!(target: "vice.mcp.exec", "execution context stopped");
        self.ctx
    }

    pub fn spawn(self) -> std::io::Result<thread::JoinHandle<McpContext>> {
        thread::Builder::new()
            .name("vice-mcp-exec".to_owned())
            .spawn(move || self.run())
    }

    fn serve(&mut self, call: Call) {
        let Call { tool, params, reply } = call;
        let ctx = &mut self.ctx;
        let result = panic::catch_unwind(AssertUnwindSafe(|| (tool.handler)(ctx, params)))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref()).unwrap_or("<non-string panic payload>");
                tracing::error!(target: "vice.mcp", tool = tool.name, panic = message, "tool handler panicked");
                Err(ToolError::internal("Internal error: tool handler panicked"))
            });
        if let Err(err) = &result {
            tracing::debug!(target: "vice.mcp", tool = tool.name, code = err.code.code(), error = %err.message, "tool failed");
        }
        // The caller may have gone away; its reply is simply dropped.
        let _ = reply.send(result);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> Option<&str> {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ErrorCode;
    use crate::machine::headless::HeadlessMachine;
    use crate::registry;

    fn spawn_context() -> (BridgeHandle, thread::JoinHandle<McpContext>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = McpContext::new(Box::new(HeadlessMachine::new()), dir.path());
        let (exec, handle) = ExecutionContext::new(ctx);
        let join = exec.spawn().expect("spawn execution thread");
        (handle, join, dir)
    }

    fn tool(name: &str) -> &'static ToolDescriptor {
        registry::find(name).expect("tool")
    }

    #[tokio::test]
    async fn calls_are_served_on_the_execution_thread() {
        let (handle, join, _dir) = spawn_context();
        let pong = handle.call(tool("vice.ping"), Value::Null).await.expect("ping");
        assert_eq!(pong["execution"], "paused");

        drop(handle);
        let ctx = tokio::task::spawn_blocking(move || join.join().expect("join"))
            .await
            .expect("blocking");
        assert!(ctx.exec_state().is_stopped());
    }

    #[tokio::test]
    async fn calls_are_served_while_running() {
        let (handle, join, _dir) = spawn_context();
        handle.call(tool("vice.execution.run"), Value::Null).await.expect("run");
        let pong = handle.call(tool("vice.ping"), Value::Null).await.expect("ping");
        assert_eq!(pong["execution"], "running");

        let err = handle
            .call(tool("vice.memory.write"), json!({ "address": 0x1000, "data": [1] }))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::EmulatorRunning);

        handle.call(tool("vice.execution.pause"), Value::Null).await.expect("pause");
        drop(handle);
        tokio::task::spawn_blocking(move || join.join().expect("join"))
            .await
            .expect("blocking");
    }

    #[tokio::test]
    async fn steps_complete_before_the_next_call() {
        let (handle, join, _dir) = spawn_context();
        handle
            .call(tool("vice.registers.set"), json!({ "register": "PC", "value": 0x1000 }))
            .await
            .expect("set pc");
        handle
            .call(tool("vice.execution.step"), json!({ "count": 4 }))
            .await
            .expect("step");

        // Stepping finishes well within one slice; poll until it has.
        let mut regs = Value::Null;
        for _ in 0..50 {
            regs = handle.call(tool("vice.registers.get"), Value::Null).await.expect("regs");
            if regs["PC"] == 0x1004 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(regs["PC"], 0x1004);

        drop(handle);
        tokio::task::spawn_blocking(move || join.join().expect("join"))
            .await
            .expect("blocking");
    }

    #[test]
    fn panic_payloads_are_reported() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), Some("boom"));
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), Some("bang"));
        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), None);
    }
}
