//! End-to-end tests against a real `PostgreSQL`.
//!
//! Run with `DATABASE_URL` pointing at a disposable database:
//!
//! ```text
//! cargo test --test postgres_integration -- --ignored
//! ```

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{assert_approx_eq, assert_strictly_increasing};
use rstest::rstest;

use kanban_reorder::application::{
    CreateTaskRequest, ErrorKind, MoveRequest, RenormalizeRequest, ReorderCoordinator,
};
use kanban_reorder::config::ReorderConfig;
use kanban_reorder::domain::{ActorId, Role, Task, TaskStatus, WorkspaceId};
use kanban_reorder::infrastructure::{
    LockingTransaction, PostgresAuditSink, PostgresAuthorizationResolver, PostgresTaskStore,
    TaskStore, connect, ensure_schema,
};

type PostgresCoordinator =
    ReorderCoordinator<PostgresTaskStore, PostgresAuthorizationResolver, PostgresAuditSink>;

struct PostgresBoard {
    coordinator: Arc<PostgresCoordinator>,
    store: PostgresTaskStore,
    workspace_id: WorkspaceId,
    actor_id: ActorId,
}

impl PostgresBoard {
    async fn new(lock_timeout: Duration) -> Self {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/test".into());
        let config = ReorderConfig::builder()
            .database_url(database_url)
            .lock_timeout(lock_timeout)
            .build()
            .unwrap();
        let pool = connect(&config).await.unwrap();
        ensure_schema(&pool).await.unwrap();

        let workspace_id = WorkspaceId::generate();
        let actor_id = ActorId::generate();
        let authorization = PostgresAuthorizationResolver::new(pool.clone());
        authorization
            .grant(&workspace_id, &actor_id, Role::Member)
            .await
            .unwrap();

        let store = PostgresTaskStore::new(pool.clone(), config.lock_timeout());
        let coordinator = Arc::new(ReorderCoordinator::new(
            store.clone(),
            authorization,
            PostgresAuditSink::new(pool),
            config.allocator(),
        ));

        Self {
            coordinator,
            store,
            workspace_id,
            actor_id,
        }
    }

    async fn create(&self, lane: &str) -> Task {
        self.coordinator
            .create_task(CreateTaskRequest {
                workspace_id: self.workspace_id.clone(),
                actor_id: self.actor_id.clone(),
                title: "Postgres task".to_string(),
                status: lane.to_string(),
            })
            .await
            .unwrap()
    }

    fn move_request(&self, task: &Task, lane: &str) -> MoveRequest {
        MoveRequest::new(
            self.workspace_id.clone(),
            task.task_id.clone(),
            self.actor_id.clone(),
            lane,
        )
    }

    async fn positions(&self, lane: TaskStatus) -> Vec<f64> {
        self.store
            .list_lane(&self.workspace_id, lane)
            .await
            .unwrap()
            .into_iter()
            .map(|task| task.position)
            .collect()
    }
}

#[rstest]
#[tokio::test]
#[ignore = "Requires PostgreSQL instance"]
async fn test_postgres_create_and_move_between() {
    let board = PostgresBoard::new(Duration::from_secs(5)).await;
    let lower = board.create("todo").await;
    let upper = board.create("todo").await;
    let task = board.create("done").await;

    assert_approx_eq(lower.position, 1000.0);
    assert_approx_eq(upper.position, 2000.0);

    let outcome = board
        .coordinator
        .move_task(
            board
                .move_request(&task, "todo")
                .after(lower.task_id.clone())
                .before(upper.task_id.clone()),
        )
        .await
        .unwrap();

    assert_approx_eq(outcome.task.position, 1500.0);
    assert_eq!(outcome.task.status, TaskStatus::Todo);
}

#[rstest]
#[tokio::test]
#[ignore = "Requires PostgreSQL instance"]
async fn test_postgres_foreign_lane_anchor_is_not_found() {
    let board = PostgresBoard::new(Duration::from_secs(5)).await;
    let anchor = board.create("done").await;
    let task = board.create("todo").await;

    let error = board
        .coordinator
        .move_task(board.move_request(&task, "todo").before(anchor.task_id.clone()))
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::NotFound);
    assert_eq!(board.positions(TaskStatus::Todo).await, vec![1000.0]);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "Requires PostgreSQL instance"]
async fn test_postgres_concurrent_inserts_are_distinct() {
    let board = PostgresBoard::new(Duration::from_secs(5)).await;
    let lower = board.create("todo").await;
    let upper = board.create("todo").await;
    let mut movers = Vec::new();
    for _ in 0..8 {
        movers.push(board.create("done").await);
    }

    let handles: Vec<_> = movers
        .iter()
        .map(|mover| {
            let coordinator = Arc::clone(&board.coordinator);
            let request = board
                .move_request(mover, "todo")
                .after(lower.task_id.clone())
                .before(upper.task_id.clone());
            tokio::spawn(async move { coordinator.move_task(request).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let positions = board.positions(TaskStatus::Todo).await;
    assert_eq!(positions.len(), 10);
    assert_strictly_increasing(&positions);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "Requires PostgreSQL instance"]
async fn test_postgres_opposite_anchor_moves_are_distinct() {
    let board = PostgresBoard::new(Duration::from_secs(5)).await;
    let lower = board.create("todo").await;
    let upper = board.create("todo").await;
    let after_lower = board.create("done").await;
    let before_upper = board.create("done").await;

    let requests = [
        board.move_request(&after_lower, "todo").after(lower.task_id.clone()),
        board.move_request(&before_upper, "todo").before(upper.task_id.clone()),
    ];
    let handles: Vec<_> = requests
        .into_iter()
        .map(|request| {
            let coordinator = Arc::clone(&board.coordinator);
            tokio::spawn(async move { coordinator.move_task(request).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let positions = board.positions(TaskStatus::Todo).await;
    assert_eq!(positions.len(), 4);
    assert_strictly_increasing(&positions);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "Requires PostgreSQL instance"]
async fn test_postgres_concurrent_moves_into_empty_lane_are_distinct() {
    let board = PostgresBoard::new(Duration::from_secs(5)).await;
    let mut movers = Vec::new();
    for _ in 0..4 {
        movers.push(board.create("done").await);
    }

    let handles: Vec<_> = movers
        .iter()
        .map(|mover| {
            let coordinator = Arc::clone(&board.coordinator);
            let request = board.move_request(mover, "in_progress");
            tokio::spawn(async move { coordinator.move_task(request).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(
        board.positions(TaskStatus::InProgress).await,
        vec![1000.0, 2000.0, 3000.0, 4000.0]
    );
}

#[rstest]
#[tokio::test]
#[ignore = "Requires PostgreSQL instance"]
async fn test_postgres_lock_timeout_is_internal() {
    let board = PostgresBoard::new(Duration::from_millis(200)).await;
    let task = board.create("todo").await;

    let mut holder = board.store.begin().await.unwrap();
    holder
        .lock_target(&board.workspace_id, &task.task_id)
        .await
        .unwrap();

    let error = board
        .coordinator
        .move_task(board.move_request(&task, "done"))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Internal);

    holder.rollback().await.unwrap();
}

#[rstest]
#[tokio::test]
#[ignore = "Requires PostgreSQL instance"]
async fn test_postgres_renormalize() {
    let board = PostgresBoard::new(Duration::from_secs(5)).await;
    let first = board.create("todo").await;
    board.create("todo").await;
    let incoming = board.create("done").await;
    board
        .coordinator
        .move_task(board.move_request(&incoming, "todo").before(first.task_id.clone()))
        .await
        .unwrap();
    assert_eq!(board.positions(TaskStatus::Todo).await, vec![0.0, 1000.0, 2000.0]);

    let outcome = board
        .coordinator
        .renormalize_lane(RenormalizeRequest {
            workspace_id: board.workspace_id.clone(),
            actor_id: board.actor_id.clone(),
            status: "todo".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(outcome.tasks[0].task_id, incoming.task_id);
    assert_eq!(
        board.positions(TaskStatus::Todo).await,
        vec![1000.0, 2000.0, 3000.0]
    );
}
