//! Integration tests for the reorder coordinator over in-memory storage.

mod common;

use common::{Board, assert_approx_eq, assert_strictly_increasing};
use rstest::rstest;

use kanban_reorder::application::{
    CreateTaskRequest, ErrorKind, RenormalizeRequest, ReorderError,
};
use kanban_reorder::domain::{ActorId, AuditAction, Role, TaskId, TaskStatus, WorkspaceId};
use kanban_reorder::infrastructure::TaskStore;

// =============================================================================
// Allocation Through Moves
// =============================================================================

#[rstest]
#[tokio::test]
async fn test_first_move_into_empty_lane_gets_seed() {
    let board = Board::new().await;
    let task = board.seed(TaskStatus::Todo, 1000.0).await;

    let outcome = board
        .coordinator
        .move_task(board.move_request(&task.task_id, "in_progress"))
        .await
        .unwrap();

    assert_eq!(outcome.task.status, TaskStatus::InProgress);
    assert_approx_eq(outcome.task.position, 1000.0);
    assert!(!outcome.precision_exhausted);
}

#[rstest]
#[tokio::test]
async fn test_move_without_anchors_appends_after_tail() {
    let board = Board::new().await;
    board.seed_many(TaskStatus::Done, &[1000.0, 4000.0]).await;
    let task = board.seed(TaskStatus::Todo, 1000.0).await;

    let outcome = board
        .coordinator
        .move_task(board.move_request(&task.task_id, "done"))
        .await
        .unwrap();

    assert_approx_eq(outcome.task.position, 5000.0);
}

#[rstest]
#[tokio::test]
async fn test_before_only_moves_step_by_increment() {
    let board = Board::new().await;
    let mut head = board.seed(TaskStatus::Todo, 1000.0).await;
    let incoming = board
        .seed_many(TaskStatus::Done, &[1000.0, 2000.0, 3000.0])
        .await;

    let mut positions = Vec::new();
    for task in &incoming {
        let outcome = board
            .coordinator
            .move_task(
                board
                    .move_request(&task.task_id, "todo")
                    .before(head.task_id.clone()),
            )
            .await
            .unwrap();
        positions.push(outcome.task.position);
        head = outcome.task;
    }

    assert_eq!(positions, vec![0.0, -1000.0, -2000.0]);
}

#[rstest]
#[tokio::test]
async fn test_after_only_moves_step_by_increment() {
    let board = Board::new().await;
    let tail = board.seed(TaskStatus::Todo, 1000.0).await;
    let incoming = board.seed(TaskStatus::Done, 1000.0).await;

    let outcome = board
        .coordinator
        .move_task(
            board
                .move_request(&incoming.task_id, "todo")
                .after(tail.task_id.clone()),
        )
        .await
        .unwrap();

    assert_approx_eq(outcome.task.position, 2000.0);
}

#[rstest]
#[tokio::test]
async fn test_midpoint_between_neighbors() {
    let board = Board::new().await;
    let lower = board.seed(TaskStatus::Todo, 1000.0).await;
    let upper = board.seed(TaskStatus::Todo, 2000.0).await;
    let task = board.seed(TaskStatus::InProgress, 1000.0).await;

    let outcome = board
        .coordinator
        .move_task(
            board
                .move_request(&task.task_id, "todo")
                .after(lower.task_id.clone())
                .before(upper.task_id.clone()),
        )
        .await
        .unwrap();

    assert_approx_eq(outcome.task.position, 1500.0);
    assert!(!outcome.precision_exhausted);
    assert_eq!(
        board.lane_ids(TaskStatus::Todo).await,
        vec![lower.task_id, task.task_id, upper.task_id]
    );
}

#[rstest]
#[tokio::test]
async fn test_move_within_same_lane() {
    let board = Board::new().await;
    let tasks = board
        .seed_many(TaskStatus::Todo, &[1000.0, 2000.0, 3000.0])
        .await;

    board
        .coordinator
        .move_task(
            board
                .move_request(&tasks[2].task_id, "todo")
                .before(tasks[0].task_id.clone()),
        )
        .await
        .unwrap();

    assert_eq!(
        board.lane_ids(TaskStatus::Todo).await,
        vec![
            tasks[2].task_id.clone(),
            tasks[0].task_id.clone(),
            tasks[1].task_id.clone()
        ]
    );
}

#[rstest]
#[tokio::test]
async fn test_repeated_inserts_at_same_anchors_stay_distinct() {
    let board = Board::new().await;
    let lower = board.seed(TaskStatus::Todo, 1000.0).await;
    let upper = board.seed(TaskStatus::Todo, 2000.0).await;
    let incoming = board
        .seed_many(TaskStatus::Done, &[1000.0, 2000.0, 3000.0])
        .await;

    for task in &incoming {
        board
            .coordinator
            .move_task(
                board
                    .move_request(&task.task_id, "todo")
                    .after(lower.task_id.clone())
                    .before(upper.task_id.clone()),
            )
            .await
            .unwrap();
    }

    let positions = board.positions(TaskStatus::Todo).await;
    assert_eq!(positions.len(), 5);
    assert_strictly_increasing(&positions);
    assert_eq!(positions, vec![1000.0, 1125.0, 1250.0, 1500.0, 2000.0]);
}

#[rstest]
#[tokio::test]
async fn test_narrow_gap_sets_precision_flag_and_commits() {
    let board = Board::new().await;
    let lower = board.seed(TaskStatus::Todo, 1.0).await;
    let upper = board.seed(TaskStatus::Todo, 1.000_000_1).await;
    let task = board.seed(TaskStatus::Done, 1000.0).await;

    let outcome = board
        .coordinator
        .move_task(
            board
                .move_request(&task.task_id, "todo")
                .after(lower.task_id.clone())
                .before(upper.task_id.clone()),
        )
        .await
        .unwrap();

    assert!(outcome.precision_exhausted);
    assert_eq!(outcome.task.status, TaskStatus::Todo);
    assert!(outcome.task.position > 1.0 && outcome.task.position < 1.000_000_1);
}

// =============================================================================
// Scope Violations
// =============================================================================

#[rstest]
#[tokio::test]
async fn test_anchor_in_other_lane_is_not_found_and_nothing_changes() {
    let board = Board::new().await;
    let anchor = board.seed(TaskStatus::Done, 1000.0).await;
    let task = board.seed(TaskStatus::Todo, 1000.0).await;

    let error = board
        .coordinator
        .move_task(
            board
                .move_request(&task.task_id, "in_progress")
                .before(anchor.task_id.clone()),
        )
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::NotFound);
    assert_eq!(board.find(&task.task_id).await, Some(task));
    assert_eq!(board.find(&anchor.task_id).await, Some(anchor));
    assert!(board.audit.entries().await.is_empty());
}

#[rstest]
#[tokio::test]
async fn test_anchor_in_other_workspace_is_not_found() {
    let board = Board::new().await;
    let other = Board::new().await;
    let foreign = other.seed(TaskStatus::Todo, 1000.0).await;
    let task = board.seed(TaskStatus::Todo, 2000.0).await;

    let error = board
        .coordinator
        .move_task(
            board
                .move_request(&task.task_id, "todo")
                .after(foreign.task_id.clone()),
        )
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::NotFound);
}

#[rstest]
#[tokio::test]
async fn test_missing_target_is_not_found() {
    let board = Board::new().await;

    let error = board
        .coordinator
        .move_task(board.move_request(&TaskId::generate(), "todo"))
        .await
        .unwrap_err();

    assert!(matches!(error, ReorderError::NotFound(_)));
}

#[rstest]
#[tokio::test]
async fn test_deleted_anchor_is_not_found() {
    let board = Board::new().await;
    let anchor = board.seed(TaskStatus::Todo, 1000.0).await;
    let task = board.seed(TaskStatus::Todo, 2000.0).await;
    assert!(
        board
            .store
            .soft_delete(&board.workspace_id, &anchor.task_id)
            .await
            .unwrap()
    );

    let error = board
        .coordinator
        .move_task(
            board
                .move_request(&task.task_id, "todo")
                .before(anchor.task_id.clone()),
        )
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::NotFound);
    assert_eq!(board.positions(TaskStatus::Todo).await, vec![2000.0]);
}

// =============================================================================
// Request Validation
// =============================================================================

#[rstest]
#[tokio::test]
async fn test_non_member_is_unauthorized() {
    let board = Board::new().await;
    let task = board.seed(TaskStatus::Todo, 1000.0).await;
    let mut request = board.move_request(&task.task_id, "done");
    request.actor_id = ActorId::generate();

    let error = board.coordinator.move_task(request).await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Unauthorized);
    assert_eq!(board.find(&task.task_id).await, Some(task));
}

#[rstest]
#[case(Role::Viewer, false)]
#[case(Role::Member, true)]
#[case(Role::Admin, true)]
#[case(Role::Owner, true)]
#[tokio::test]
async fn test_role_capability(#[case] role: Role, #[case] allowed: bool) {
    let board = Board::new().await;
    board
        .authorization
        .grant(&board.workspace_id, &board.actor_id, role)
        .await;
    let task = board.seed(TaskStatus::Todo, 1000.0).await;

    let result = board
        .coordinator
        .move_task(board.move_request(&task.task_id, "done"))
        .await;

    assert_eq!(result.is_ok(), allowed);
    if !allowed {
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Unauthorized);
    }
}

#[rstest]
#[tokio::test]
async fn test_role_is_resolved_on_every_call() {
    let board = Board::new().await;
    let task = board.seed(TaskStatus::Todo, 1000.0).await;

    board
        .coordinator
        .move_task(board.move_request(&task.task_id, "done"))
        .await
        .unwrap();
    board
        .authorization
        .revoke(&board.workspace_id, &board.actor_id)
        .await;

    let error = board
        .coordinator
        .move_task(board.move_request(&task.task_id, "todo"))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Unauthorized);
}

#[rstest]
#[case("archived")]
#[case("")]
#[case("in progress")]
#[tokio::test]
async fn test_unknown_lane_is_invalid_argument(#[case] lane: &str) {
    let board = Board::new().await;
    let task = board.seed(TaskStatus::Todo, 1000.0).await;

    let error = board
        .coordinator
        .move_task(board.move_request(&task.task_id, lane))
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::InvalidArgument);
}

#[rstest]
#[tokio::test]
async fn test_lane_names_are_case_insensitive() {
    let board = Board::new().await;
    let task = board.seed(TaskStatus::Todo, 1000.0).await;

    let outcome = board
        .coordinator
        .move_task(board.move_request(&task.task_id, "In-Progress"))
        .await
        .unwrap();

    assert_eq!(outcome.task.status, TaskStatus::InProgress);
}

#[rstest]
#[tokio::test]
async fn test_self_anchor_is_invalid_argument() {
    let board = Board::new().await;
    let task = board.seed(TaskStatus::Todo, 1000.0).await;

    let error = board
        .coordinator
        .move_task(
            board
                .move_request(&task.task_id, "todo")
                .after(task.task_id.clone()),
        )
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::InvalidArgument);
}

#[rstest]
#[case(2000.0, 1000.0)]
#[case(1500.0, 1500.0)]
#[tokio::test]
async fn test_anchors_out_of_order_are_invalid_and_nothing_changes(
    #[case] after_position: f64,
    #[case] before_position: f64,
) {
    let board = Board::new().await;
    let after = board.seed(TaskStatus::Todo, after_position).await;
    let before = board.seed(TaskStatus::Todo, before_position).await;
    let task = board.seed(TaskStatus::Done, 1000.0).await;

    let error = board
        .coordinator
        .move_task(
            board
                .move_request(&task.task_id, "todo")
                .after(after.task_id.clone())
                .before(before.task_id.clone()),
        )
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::InvalidArgument);
    assert_eq!(board.find(&task.task_id).await, Some(task));
    assert_eq!(board.lane(TaskStatus::Todo).await.len(), 2);
    assert!(board.audit.entries().await.is_empty());
}

// =============================================================================
// Audit And Observation
// =============================================================================

#[rstest]
#[tokio::test]
async fn test_move_writes_audit_entry() {
    let board = Board::new().await;
    let task = board.seed(TaskStatus::Todo, 1000.0).await;

    board
        .coordinator
        .move_task(board.move_request(&task.task_id, "done"))
        .await
        .unwrap();

    let entries = board.audit.entries().await;
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.action, AuditAction::Move);
    assert_eq!(entry.actor_id, board.actor_id);
    assert_eq!(entry.resource_id, *task.task_id.as_uuid());
    assert_eq!(entry.metadata["fromLane"], "todo");
    assert_eq!(entry.metadata["toLane"], "done");
    assert_eq!(entry.metadata["newPosition"], 1000.0);
}

#[rstest]
#[tokio::test]
async fn test_audit_failure_does_not_fail_move() {
    let board = Board::new().await;
    board.audit.set_failing(true);
    let task = board.seed(TaskStatus::Todo, 1000.0).await;

    let outcome = board
        .coordinator
        .move_task(board.move_request(&task.task_id, "done"))
        .await
        .unwrap();

    assert_eq!(outcome.task.status, TaskStatus::Done);
    assert!(board.audit.entries().await.is_empty());
}

#[rstest]
#[tokio::test]
async fn test_refetch_matches_move_response() {
    let board = Board::new().await;
    let lower = board.seed(TaskStatus::Done, 1000.0).await;
    let task = board.seed(TaskStatus::Todo, 1000.0).await;

    let outcome = board
        .coordinator
        .move_task(
            board
                .move_request(&task.task_id, "done")
                .after(lower.task_id.clone()),
        )
        .await
        .unwrap();

    assert_eq!(board.find(&task.task_id).await, Some(outcome.task.clone()));
    assert_eq!(outcome.task.title, task.title);
    assert_eq!(outcome.task.created_at, task.created_at);
}

// =============================================================================
// Creation
// =============================================================================

#[rstest]
#[tokio::test]
async fn test_create_appends_to_lane() {
    let board = Board::new().await;
    let request = |title: &str| CreateTaskRequest {
        workspace_id: board.workspace_id.clone(),
        actor_id: board.actor_id.clone(),
        title: title.to_string(),
        status: "todo".to_string(),
    };

    let first = board.coordinator.create_task(request("First")).await.unwrap();
    let second = board.coordinator.create_task(request("  Second  ")).await.unwrap();

    assert_approx_eq(first.position, 1000.0);
    assert_approx_eq(second.position, 2000.0);
    assert_eq!(second.title, "Second");
    assert_eq!(
        board.lane_ids(TaskStatus::Todo).await,
        vec![first.task_id.clone(), second.task_id]
    );

    let entries = board.audit.entries().await;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].action, AuditAction::Create);
    assert_eq!(entries[0].resource_id, *first.task_id.as_uuid());
}

#[rstest]
#[case("", "todo", ErrorKind::InvalidArgument)]
#[case("   ", "todo", ErrorKind::InvalidArgument)]
#[case("Title", "backlog", ErrorKind::InvalidArgument)]
#[tokio::test]
async fn test_create_rejects_bad_requests(
    #[case] title: &str,
    #[case] status: &str,
    #[case] expected: ErrorKind,
) {
    let board = Board::new().await;

    let error = board
        .coordinator
        .create_task(CreateTaskRequest {
            workspace_id: board.workspace_id.clone(),
            actor_id: board.actor_id.clone(),
            title: title.to_string(),
            status: status.to_string(),
        })
        .await
        .unwrap_err();

    assert_eq!(error.kind(), expected);
    assert!(board.lane(TaskStatus::Todo).await.is_empty());
}

#[rstest]
#[tokio::test]
async fn test_create_in_foreign_workspace_is_unauthorized() {
    let board = Board::new().await;

    let error = board
        .coordinator
        .create_task(CreateTaskRequest {
            workspace_id: WorkspaceId::generate(),
            actor_id: board.actor_id.clone(),
            title: "Sneaky".to_string(),
            status: "todo".to_string(),
        })
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Unauthorized);
}

// =============================================================================
// Renormalization
// =============================================================================

#[rstest]
#[tokio::test]
async fn test_renormalize_preserves_order_and_respaces() {
    let board = Board::new().await;
    board
        .seed_many(TaskStatus::Todo, &[1.0, 1.000_000_1, -5.0, 7000.0])
        .await;
    board.seed(TaskStatus::Done, 42.0).await;
    let before = board.lane_ids(TaskStatus::Todo).await;

    let outcome = board
        .coordinator
        .renormalize_lane(RenormalizeRequest {
            workspace_id: board.workspace_id.clone(),
            actor_id: board.actor_id.clone(),
            status: "todo".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(outcome.lane, TaskStatus::Todo);
    let returned: Vec<TaskId> = outcome.tasks.iter().map(|task| task.task_id.clone()).collect();
    assert_eq!(returned, before);
    assert_eq!(board.lane_ids(TaskStatus::Todo).await, before);
    assert_eq!(
        board.positions(TaskStatus::Todo).await,
        vec![1000.0, 2000.0, 3000.0, 4000.0]
    );
    assert_eq!(board.positions(TaskStatus::Done).await, vec![42.0]);

    let entries = board.audit.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, AuditAction::Renormalize);
    assert_eq!(entries[0].metadata["taskCount"], 4);
}

#[rstest]
#[tokio::test]
async fn test_renormalize_empty_lane() {
    let board = Board::new().await;

    let outcome = board
        .coordinator
        .renormalize_lane(RenormalizeRequest {
            workspace_id: board.workspace_id.clone(),
            actor_id: board.actor_id.clone(),
            status: "cancelled".to_string(),
        })
        .await
        .unwrap();

    assert!(outcome.tasks.is_empty());
}

#[rstest]
#[tokio::test]
async fn test_renormalize_requires_modify_capability() {
    let board = Board::new().await;
    board
        .authorization
        .grant(&board.workspace_id, &board.actor_id, Role::Viewer)
        .await;
    board.seed_many(TaskStatus::Todo, &[5.0, 6.0]).await;

    let error = board
        .coordinator
        .renormalize_lane(RenormalizeRequest {
            workspace_id: board.workspace_id.clone(),
            actor_id: board.actor_id.clone(),
            status: "todo".to_string(),
        })
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Unauthorized);
    assert_eq!(board.positions(TaskStatus::Todo).await, vec![5.0, 6.0]);
}

#[rstest]
#[tokio::test]
async fn test_renormalize_then_bisect_no_longer_exhausted() {
    let board = Board::new().await;
    let lower = board.seed(TaskStatus::Todo, 1.0).await;
    let upper = board.seed(TaskStatus::Todo, 1.000_000_1).await;
    let task = board.seed(TaskStatus::Done, 1.0).await;

    board
        .coordinator
        .renormalize_lane(RenormalizeRequest {
            workspace_id: board.workspace_id.clone(),
            actor_id: board.actor_id.clone(),
            status: "todo".to_string(),
        })
        .await
        .unwrap();
    let outcome = board
        .coordinator
        .move_task(
            board
                .move_request(&task.task_id, "todo")
                .after(lower.task_id.clone())
                .before(upper.task_id.clone()),
        )
        .await
        .unwrap();

    assert!(!outcome.precision_exhausted);
    assert_approx_eq(outcome.task.position, 1500.0);
}
