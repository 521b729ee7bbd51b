mod support;

use std::time::Duration;

use uuid::Uuid;

use support::{push_to_main, Harness, RecordingStatusSink};
use tide_core::events::{Deployment, LogHandle, PublicEndpoint, TaskId, TideEvent};
use tide_core::flow::TaskKind;
use tide_core::ports::{EventStore, TideRepository};
use tide_core::status::{State, Status};
use tide_core::task::ExecutorCommand;
use tide_core::{EngineError, StartOutcome, TideCommand, TideError, TideStatus};

async fn create(harness: &mut Harness, pull_request: Option<u64>) -> Uuid {
    let request = push_to_main(pull_request);
    let tide_uuid = request.tide_uuid;

    let outcome = harness
        .engine
        .handle_command(TideCommand::CreateTide(request))
        .await
        .unwrap();
    assert_eq!(outcome, StartOutcome::Started);

    harness.pump().await;
    tide_uuid
}

/// Report a start for every dispatched image build; the build at
/// `failing` (if any) fails, the others succeed.
async fn run_builds(harness: &mut Harness, tide_uuid: Uuid, failing: Option<usize>) {
    let builds: Vec<TaskId> = harness
        .commands()
        .await
        .into_iter()
        .filter_map(|command| match command {
            ExecutorCommand::BuildImage { task, .. } => Some(task.task_id),
            _ => None,
        })
        .collect();
    assert_eq!(builds.len(), 2);

    for (index, task_id) in builds.into_iter().enumerate() {
        let build_uuid = Uuid::new_v4();
        harness
            .report(TideEvent::BuildStarted {
                tide_uuid,
                task_id,
                build_uuid,
            })
            .await;

        let outcome = if failing == Some(index) {
            TideEvent::BuildFailed {
                tide_uuid,
                build_uuid,
                reason: "npm ERR! missing script: build".to_string(),
            }
        } else {
            TideEvent::BuildSuccessful {
                tide_uuid,
                build_uuid,
            }
        };
        harness.report(outcome).await;
    }
}

async fn deploy(harness: &mut Harness, tide_uuid: Uuid) {
    let environment = match harness.commands().await.last() {
        Some(ExecutorCommand::Deploy { environment, .. }) => environment.clone(),
        other => panic!("expected a deploy command, got {other:?}"),
    };
    assert_eq!(environment, "6f0c6b8e-2b1a-4c55-9b0e-0a1f3f1f2a10-main");

    let deployment_uuid = Uuid::new_v4();
    harness
        .report(TideEvent::DeploymentStarted {
            tide_uuid,
            task_id: TaskId::new("deployment"),
            deployment_uuid,
        })
        .await;
    harness
        .report(TideEvent::DeploymentSuccessful {
            tide_uuid,
            deployment: Deployment {
                uuid: deployment_uuid,
                environment,
                public_endpoints: vec![
                    PublicEndpoint {
                        name: "web".to_string(),
                        address: "1.2.3.4".to_string(),
                    },
                    PublicEndpoint {
                        name: "api".to_string(),
                        address: "5.6.7.8".to_string(),
                    },
                ],
            },
        })
        .await;
}

fn count(events: &[TideEvent], kind: &str) -> usize {
    events.iter().filter(|e| e.kind() == kind).count()
}

#[tokio::test]
async fn test_push_to_main_runs_to_success() {
    let mut harness = Harness::new(true);
    let tide_uuid = create(&mut harness, None).await;

    assert_eq!(
        harness.statuses().await,
        vec![Status::new(State::Pending, "Running")]
    );
    assert!(harness.processed.iter().any(|e| matches!(
        e,
        TideEvent::ImageBuildsStarted { build_requests, .. } if build_requests.len() == 2
    )));

    run_builds(&mut harness, tide_uuid, None).await;
    assert_eq!(count(&harness.processed, "images_built"), 1);

    deploy(&mut harness, tide_uuid).await;

    let configuration = match harness.commands().await.last() {
        Some(ExecutorCommand::StartRun { configuration, .. }) => configuration.clone(),
        other => panic!("expected a run command, got {other:?}"),
    };
    assert_eq!(
        configuration.commands,
        vec!["curl -f http://5.6.7.8/health".to_string()]
    );
    let variable = |name: &str| {
        configuration
            .environment_variables
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.value.clone())
    };
    assert_eq!(variable("BASE_URL").as_deref(), Some("http://1.2.3.4/"));
    assert_eq!(variable("ON_MAIN").as_deref(), Some("yes"));
    assert_eq!(
        variable("SERVICE_WEB_PUBLIC_ENDPOINT").as_deref(),
        Some("1.2.3.4")
    );

    let run_uuid = Uuid::new_v4();
    harness
        .report(TideEvent::RunStarted {
            tide_uuid,
            task_id: TaskId::new("smoke"),
            run_uuid,
        })
        .await;
    harness
        .report(TideEvent::RunSuccessful {
            tide_uuid,
            run_uuid,
        })
        .await;

    assert_eq!(count(&harness.processed, "tide_successful"), 1);
    assert_eq!(
        harness.statuses().await.last(),
        Some(&Status::new(State::Success, "Successfully ran in 02m 05s"))
    );
    assert!(harness.comments.comments.lock().await.is_empty());

    let tide = TideRepository::new(harness.store.clone())
        .find(tide_uuid)
        .await
        .unwrap();
    assert_eq!(tide.status(), TideStatus::Success);
}

#[tokio::test]
async fn test_one_failing_build_fails_the_tide() {
    let mut harness = Harness::new(true);
    let tide_uuid = create(&mut harness, None).await;

    run_builds(&mut harness, tide_uuid, Some(1)).await;

    assert!(harness.processed.contains(&TideEvent::TideFailed {
        tide_uuid,
        reason: "Build failed: npm ERR! missing script: build".to_string(),
    }));
    assert_eq!(count(&harness.processed, "tide_failed"), 1);
    assert_eq!(count(&harness.processed, "images_built"), 0);
    assert_eq!(
        harness.statuses().await.last(),
        Some(&Status::new(
            State::Failure,
            "Build failed: npm ERR! missing script: build"
        ))
    );
    assert!(!harness
        .commands()
        .await
        .iter()
        .any(|c| matches!(c, ExecutorCommand::Deploy { .. })));
}

#[tokio::test]
async fn test_concurrency_limit_defers_start_by_one_minute() {
    let harness = Harness::new(false);
    let request = push_to_main(None);

    let outcome = harness
        .engine
        .handle_command(TideCommand::StartTide(request.clone()))
        .await
        .unwrap();

    assert_eq!(outcome, StartOutcome::Deferred);
    assert!(harness.publisher.queue.lock().await.is_empty());
    assert_eq!(
        *harness.scheduler.scheduled.lock().await,
        vec![(TideCommand::StartTide(request), Duration::from_secs(60))]
    );
}

#[tokio::test]
async fn test_duplicate_start_is_ignored() {
    let mut harness = Harness::new(true);
    let request = push_to_main(None);
    harness
        .engine
        .handle_command(TideCommand::CreateTide(request.clone()))
        .await
        .unwrap();
    harness.pump().await;

    let outcome = harness
        .engine
        .handle_command(TideCommand::StartTide(request))
        .await
        .unwrap();

    assert_eq!(outcome, StartOutcome::AlreadyStarted);
    assert!(harness.publisher.queue.lock().await.is_empty());
    assert_eq!(count(&harness.processed, "tide_started"), 1);
}

#[tokio::test]
async fn test_status_failures_are_logged_not_raised() {
    let failing = RecordingStatusSink {
        failing: true,
        ..Default::default()
    };
    let mut harness = Harness::with_status_sink(true, failing);
    create(&mut harness, None).await;

    let lines = harness.logs.lines(&LogHandle::new("flows/shop")).await;
    assert!(lines.iter().any(|line| line.contains("GitHub API error: 502")));
    assert_eq!(harness.commands().await.len(), 2);
}

#[tokio::test]
async fn test_pull_request_gets_deployment_comment() {
    let mut harness = Harness::new(true);
    let tide_uuid = create(&mut harness, Some(42)).await;

    run_builds(&mut harness, tide_uuid, None).await;
    deploy(&mut harness, tide_uuid).await;

    let comments = harness.comments.comments.lock().await.clone();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].0, 42);
    assert!(comments[0].1.contains("- **web**: 1.2.3.4"));
}

#[tokio::test]
async fn test_stored_history_replays_without_new_events() {
    let mut harness = Harness::new(true);
    let tide_uuid = create(&mut harness, None).await;
    run_builds(&mut harness, tide_uuid, None).await;

    let repository = TideRepository::new(harness.store.clone());
    let mut first = repository.find(tide_uuid).await.unwrap();
    let second = repository.find(tide_uuid).await.unwrap();

    assert!(first.pop_new_events().is_empty());
    assert_eq!(first.events(), second.events());
    assert_eq!(first.status(), TideStatus::Running);
}

#[tokio::test]
async fn test_event_for_unknown_tide_is_rejected() {
    let harness = Harness::new(true);

    let err = harness
        .engine
        .process_event(TideEvent::ImagesBuilt {
            tide_uuid: Uuid::new_v4(),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Tide(TideError::NotStarted)));
}

#[tokio::test]
async fn test_build_success_without_started_builds_is_not_stored() {
    let mut harness = Harness::new(true);
    let mut request = push_to_main(None);
    request
        .configuration
        .tasks
        .retain(|task| !matches!(task.kind, TaskKind::Build(_)));
    let tide_uuid = request.tide_uuid;
    harness
        .engine
        .handle_command(TideCommand::CreateTide(request))
        .await
        .unwrap();
    harness.pump().await;
    let before = harness.store.find(tide_uuid).await.unwrap();

    let err = harness
        .engine
        .process_event(TideEvent::BuildSuccessful {
            tide_uuid,
            build_uuid: Uuid::new_v4(),
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Tide(TideError::BuildNotFound { tide_uuid: uuid }) if uuid == tide_uuid
    ));
    assert_eq!(harness.store.find(tide_uuid).await.unwrap(), before);
    assert!(harness.publisher.queue.lock().await.is_empty());
}
