use flow_control::{
    ControlPlane, Dispatcher, PipelineLoader, RequestFrame, ResponseFrame, RunRemoteFlow,
    RunningFlowRegistry,
};
use flow_control_service::{ServiceConfig, init_tracing};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

/// Decodes one request line and answers it on its own task, inside a
/// `control_request` span carrying a fresh correlation id.
fn spawn_request(
    dispatcher: &Dispatcher,
    line: String,
    responses: mpsc::UnboundedSender<ResponseFrame>,
) {
    let dispatcher = dispatcher.clone();
    let correlation_id = Uuid::new_v4().to_string();
    let span = tracing::info_span!("control_request", correlation_id = %correlation_id);

    tokio::spawn(
        async move {
            let response = match RequestFrame::from_json(&line) {
                Ok(frame) => dispatcher.dispatch(frame).await,
                Err(e) => {
                    warn!(error = %e, "Malformed request frame");
                    ResponseFrame::failure("", e.to_string())
                }
            };
            if responses.send(response).is_err() {
                warn!("Response writer closed, dropping response");
            }
        }
        .instrument(span),
    );
}

/// Writes response frames to stdout, one JSON document per line.
async fn write_responses(mut responses: mpsc::UnboundedReceiver<ResponseFrame>) {
    let mut stdout = tokio::io::stdout();
    while let Some(frame) = responses.recv().await {
        let line = match frame.to_json() {
            Ok(line) => line,
            Err(e) => {
                error!(command = %frame.command, error = %e, "Failed to encode response frame");
                continue;
            }
        };
        let written = async {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await
        };
        if let Err(e) = written.await {
            error!(error = %e, "Failed to write response, closing writer");
            break;
        }
    }
}

async fn start_flows(dispatcher: &Dispatcher, config: &ServiceConfig) {
    for path in &config.startup_flows {
        let mut command = RunRemoteFlow::new(path, true);
        let response = dispatcher.invoke(&mut command).await;
        match response.error {
            None => info!(path = %path.display(), flow_id = ?command.registered_id(), "Started flow"),
            Some(e) => error!(path = %path.display(), error = %e, "Failed to start flow"),
        }
    }
}

/// Stops every registered flow and waits up to `grace` for their workers.
async fn shutdown(plane: &ControlPlane, grace: Duration) {
    plane.shutdown();
    let executions = plane.registry().stop_all();
    info!(flows = executions.len(), "Stopping registered flows");

    let all_finished = async {
        for execution in &executions {
            execution.wait().await;
        }
    };
    if tokio::time::timeout(grace, all_finished).await.is_err() {
        warn!(grace_ms = grace.as_millis() as u64, "Flows still running after grace period");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env()?;
    init_tracing(config.log_format);

    let plane = ControlPlane::new(RunningFlowRegistry::new(), Arc::new(PipelineLoader::new()));
    let dispatcher = Dispatcher::new(plane.clone());
    start_flows(&dispatcher, &config).await;

    let (responses, receiver) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_responses(receiver));

    info!("Control endpoint ready, reading request frames from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => spawn_request(&dispatcher, line, responses.clone()),
                Ok(None) => {
                    info!("Control input closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read control input");
                    break;
                }
            },
            _ = &mut ctrl_c => {
                info!("Received Ctrl-C");
                break;
            }
        }
    }

    shutdown(&plane, config.shutdown_grace).await;

    // In-flight requests still hold senders; give them the same grace period.
    drop(responses);
    if tokio::time::timeout(config.shutdown_grace, writer).await.is_err() {
        warn!("Pending responses not written before exit");
    }
    info!("Shutdown complete");
    Ok(())
}
