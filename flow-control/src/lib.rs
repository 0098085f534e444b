pub mod command;
pub mod context;
pub mod error;
pub mod execution;
pub mod flow;
pub mod loader;
pub mod pipeline;
pub mod plane;
pub mod protocol;
pub mod registry;
pub mod task;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use command::{
    Command, CommandWithResponse, ControlResponse, ControlVerb, FlowRow, GetFlow, ListFlows,
    RemoteFlowExecution, RemoteFlowPayload, RestartFlow, RunRemoteFlow, SendFlowControlCommand,
    StopFlow,
};
pub use context::{Context, StorageMap, StorageName};
pub use error::{CommandError, FlowError, LoadError, ProtocolError, Result, StorageError};
pub use execution::FlowExecution;
pub use flow::{
    FLOW_DIR, FLOW_FILENAME_LONG, FLOW_FILENAME_SHORT, Flow, FlowId, FlowSelector,
    apply_file_variables,
};
pub use loader::{FlowLoader, PipelineLoader, check_flow_file};
pub use pipeline::{FlowState, Pipeline, PipelineDefinition, TaskContext};
pub use plane::ControlPlane;
pub use protocol::{Dispatcher, RequestFrame, ResponseFrame, decode_response, encode_request};
pub use registry::RunningFlowRegistry;
pub use task::{Task, TaskDefinition};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const FOREVER: &str = r#"
type: pipeline
name: nightly
annotation: refreshes the model
iterations: 0
steps:
  - type: set_storage
    name: started
    value: true
  - type: sleep
    millis: 5
"#;

    const THREE_ROUNDS: &str = r#"
type: pipeline
name: batch
iterations: 3
steps:
  - type: log
    message: "round of @{flow_filename_short}"
  - type: sleep
    millis: 20
"#;

    const TRAINER: &str = r#"
type: pipeline
name: trainer
iterations: 0
steps:
  - type: require_storage
    name: model
  - type: set_storage
    name: seen
    value: true
  - type: sleep
    millis: 5
"#;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(ControlPlane::new(
            RunningFlowRegistry::new(),
            Arc::new(PipelineLoader::new()),
        ))
    }

    fn write_flow(dir: &TempDir, file: &str, text: &str) -> PathBuf {
        let path = dir.path().join(file);
        std::fs::write(&path, text).unwrap();
        path
    }

    async fn send(dispatcher: &Dispatcher, command: &mut dyn Command) -> ResponseFrame {
        let request = encode_request(command).await.unwrap();
        let response = dispatcher.dispatch(request).await;
        if response.is_success() {
            decode_response(command, &response).unwrap();
        }
        response
    }

    async fn run_registered(dispatcher: &Dispatcher, path: &Path) -> FlowId {
        let request = encode_request(&mut RunRemoteFlow::new(path, true)).await.unwrap();
        let mut command = dispatcher.decode(&request).unwrap();
        let response = dispatcher.invoke(command.as_mut()).await;
        assert!(response.is_success(), "{:?}", response.error);
        *dispatcher.plane().registry().list().last().unwrap()
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    async fn control(dispatcher: &Dispatcher, id: FlowId, verb: ControlVerb) -> ControlResponse {
        let mut command = SendFlowControlCommand::new(FlowSelector::Id(id), verb);
        let response = send(dispatcher, &mut command).await;
        assert!(response.is_success(), "{:?}", response.error);
        command.response().unwrap()
    }

    #[tokio::test]
    async fn run_then_list_then_get() {
        let dir = TempDir::new().unwrap();
        let path = write_flow(&dir, "nightly.yaml", FOREVER);
        let dispatcher = dispatcher();

        let id = run_registered(&dispatcher, &path).await;

        let mut list = ListFlows::new();
        send(&dispatcher, &mut list).await;
        assert_eq!(list.rows().len(), 1);
        let row = &list.rows()[0];
        assert_eq!(row.id, id);
        assert_eq!(row.name, "nightly");
        assert_eq!(row.annotation, "refreshes the model");
        assert!(row.path.as_deref().unwrap().ends_with("nightly.yaml"));
        assert!(!row.stopped);

        let mut get = GetFlow::new(FlowSelector::Id(row.id));
        send(&dispatcher, &mut get).await;
        let definition = get.flow_definition().unwrap();
        assert!(definition.contains("type: pipeline"));
        assert!(definition.contains("name: nightly"));

        let mut only = GetFlow::default();
        send(&dispatcher, &mut only).await;
        assert_eq!(only.flow_definition(), get.flow_definition());

        assert_eq!(control(&dispatcher, id, ControlVerb::Stop).await, ControlResponse::Success);
        assert!(dispatcher.plane().registry().is_empty());
    }

    #[tokio::test]
    async fn restart_leaves_exactly_one_registered_flow() {
        let dir = TempDir::new().unwrap();
        let path = write_flow(&dir, "batch.yaml", THREE_ROUNDS);
        let dispatcher = dispatcher();
        let id = run_registered(&dispatcher, &path).await;

        assert_eq!(
            control(&dispatcher, id, ControlVerb::Restart).await,
            ControlResponse::Success
        );

        let mut list = ListFlows::new();
        send(&dispatcher, &mut list).await;
        assert_eq!(list.rows().len(), 1);
        let row = &list.rows()[0];
        assert_eq!(row.name, "batch");
        assert!(!row.stopped);
        assert!(row.path.as_deref().unwrap().ends_with("batch.yaml"));
    }

    #[tokio::test]
    async fn restart_flow_swaps_in_fresh_instance() {
        let dir = TempDir::new().unwrap();
        let path = write_flow(&dir, "nightly.yaml", FOREVER);
        let dispatcher = dispatcher();
        let old_id = run_registered(&dispatcher, &path).await;
        let old = dispatcher.plane().registry().get(old_id).unwrap();

        let mut restart = RestartFlow::new(FlowSelector::Only, 10);
        let response = send(&dispatcher, &mut restart).await;
        assert!(response.is_success(), "{:?}", response.error);

        assert!(old.is_stopped());
        let ids = dispatcher.plane().registry().list();
        assert_eq!(ids.len(), 1);
        assert_ne!(ids[0], old_id);
        let fresh = dispatcher.plane().registry().get(ids[0]).unwrap();
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert_eq!(fresh.variable(FLOW_FILENAME_SHORT).as_deref(), Some("nightly.yaml"));

        let storage = fresh.storage();
        eventually(|| storage.contains("started")).await;
        fresh.stop_execution();
    }

    #[tokio::test]
    async fn relocated_flow_sees_caller_storage_at_start() {
        let dir = TempDir::new().unwrap();
        let path = write_flow(&dir, "trainer.yaml", TRAINER);
        let dispatcher = dispatcher();

        let caller_storage = Context::new();
        let model = StorageName::new("model").unwrap();
        caller_storage.set(&model, json!({ "layers": 3 })).unwrap();

        let mut relocate = RemoteFlowExecution::new(&path, vec!["model".to_string()])
            .with_caller_storage(caller_storage)
            .with_registration(true);
        let response = send(&dispatcher, &mut relocate).await;
        assert!(response.is_success(), "{:?}", response.error);

        let flow = dispatcher.plane().registry().list_flows()[0].clone();
        let storage = flow.storage();
        eventually(|| storage.contains("seen")).await;
        assert_eq!(storage.get_value("model"), Some(json!({ "layers": 3 })));
        flow.stop_execution();
    }

    #[tokio::test]
    async fn pause_and_resume_are_idempotent_on_a_running_pipeline() {
        let dir = TempDir::new().unwrap();
        let path = write_flow(&dir, "nightly.yaml", FOREVER);
        let dispatcher = dispatcher();
        let id = run_registered(&dispatcher, &path).await;
        let storage = dispatcher.plane().registry().get(id).unwrap().storage();
        eventually(|| storage.contains("started")).await;

        assert_eq!(control(&dispatcher, id, ControlVerb::Pause).await, ControlResponse::Success);
        assert_eq!(
            control(&dispatcher, id, ControlVerb::Pause).await,
            ControlResponse::AlreadyPaused
        );
        assert_eq!(control(&dispatcher, id, ControlVerb::Resume).await, ControlResponse::Success);
        assert_eq!(
            control(&dispatcher, id, ControlVerb::Resume).await,
            ControlResponse::AlreadyRunning
        );
        assert_eq!(control(&dispatcher, id, ControlVerb::Stop).await, ControlResponse::Success);
    }

    #[tokio::test]
    async fn pause_right_after_run_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = write_flow(&dir, "nightly.yaml", FOREVER);
        let dispatcher = dispatcher();
        let id = run_registered(&dispatcher, &path).await;

        assert_eq!(control(&dispatcher, id, ControlVerb::Pause).await, ControlResponse::Success);
        assert_eq!(
            control(&dispatcher, id, ControlVerb::Pause).await,
            ControlResponse::AlreadyPaused
        );
        let flow = dispatcher.plane().registry().get(id).unwrap();
        assert!(flow.is_paused());

        let mut list = ListFlows::new();
        send(&dispatcher, &mut list).await;
        assert!(list.rows()[0].paused);

        assert_eq!(control(&dispatcher, id, ControlVerb::Resume).await, ControlResponse::Success);
        let storage = flow.storage();
        eventually(|| storage.contains("started")).await;
        assert_eq!(control(&dispatcher, id, ControlVerb::Stop).await, ControlResponse::Success);
    }

    #[tokio::test]
    async fn restarted_pipeline_stays_stoppable_through_stop_flow() {
        let dir = TempDir::new().unwrap();
        let path = write_flow(&dir, "nightly.yaml", FOREVER);
        let dispatcher = dispatcher();
        let id = run_registered(&dispatcher, &path).await;
        let flow = dispatcher.plane().registry().get(id).unwrap();
        let first_run = dispatcher.plane().registry().execution(id).unwrap();

        let restart = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { control(&dispatcher, id, ControlVerb::Restart).await })
        };
        first_run.wait().await;
        eventually(|| dispatcher.plane().registry().size() == 1 && !flow.is_stopped()).await;

        let response = send(&dispatcher, &mut StopFlow::default()).await;
        assert!(response.is_success(), "{:?}", response.error);

        let verdict = tokio::time::timeout(Duration::from_secs(5), restart)
            .await
            .expect("restarted pipeline kept running")
            .unwrap();
        assert_eq!(verdict, ControlResponse::Success);
    }

    #[tokio::test]
    async fn standalone_root_cannot_be_run_remotely() {
        let dir = TempDir::new().unwrap();
        let path = write_flow(&dir, "sleep.yaml", "type: sleep\nmillis: 10\n");
        let dispatcher = dispatcher();

        let mut run = RunRemoteFlow::new(&path, true);
        let response = send(&dispatcher, &mut run).await;
        assert_eq!(
            response.error.as_deref(),
            Some("Root actor is not a pipeline: sleep")
        );
        assert!(dispatcher.plane().registry().is_empty());
    }

    #[tokio::test]
    async fn stop_flow_requests_stop_and_worker_deregisters() {
        let dir = TempDir::new().unwrap();
        let path = write_flow(&dir, "nightly.yaml", FOREVER);
        let dispatcher = dispatcher();
        let id = run_registered(&dispatcher, &path).await;
        let execution = dispatcher.plane().registry().execution(id).unwrap();

        let response = send(&dispatcher, &mut StopFlow::default()).await;
        assert!(response.is_success());
        assert!(response.payload.is_empty());

        execution.wait().await;
        assert!(dispatcher.plane().registry().is_empty());
    }
}
