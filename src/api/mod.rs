use crate::{
    abtest::{AbTestEngine, CreateAbTestRequest},
    agents::{CoderAgent, PlannerAgent, ReviewerAgent, TesterAgent},
    clients::{ClassifierClient, GitHubClient},
    config::Config,
    coordinator::{ContextLoader, EmptyContextLoader, ExecutionCoordinator},
    events::{EventPublisher, InMemoryEventPublisher},
    feedback::FeedbackService,
    llm::LlmClient,
    logstream::ExecutionLogService,
    models::{CodingTask, ModelInfo, TaskComplexity, TaskExecution, TaskType},
    performance::PerformanceTracker,
    registry::ModelRegistry,
    selection::{ModelSelector, StrategySelector},
    store::{
        InMemoryExecutionRepository, InMemoryFeedbackRepository, InMemoryTaskRepository, TaskPage,
    },
    strategies::{
        ChangeParser, IterativeStrategy, MultiAgentStrategy, SingleShotStrategy, StrategySet,
    },
    tasks::TaskService,
    ForgeError, Result,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::Json,
    routing::{get, post},
    Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

const SERVICE_NAME: &str = "taskforge";
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

const ROUTE_HEALTH: &str = "/api/health";
const ROUTE_TASKS: &str = "/api/tasks";
const ROUTE_TASK_BY_ID: &str = "/api/tasks/{task_id}";
const ROUTE_TASK_EXECUTE: &str = "/api/tasks/{task_id}/execute";
const ROUTE_TASK_LOGS: &str = "/api/tasks/{task_id}/logs";
const ROUTE_MODELS: &str = "/api/models";
const ROUTE_MODELS_REFRESH: &str = "/api/models/refresh";
const ROUTE_MODELS_SELECT: &str = "/api/models/select";
const ROUTE_MODELS_METRICS: &str = "/api/models/metrics";
const ROUTE_MODELS_BEST: &str = "/api/models/best/{task_type}/{complexity}";
const ROUTE_AB_TESTS: &str = "/api/ab-tests";
const ROUTE_AB_TESTS_ACTIVE: &str = "/api/ab-tests/active/{task_type}";

/// Header carrying the caller identity; authentication itself lives in
/// the gateway, the core only scopes data by it.
const USER_ID_HEADER: &str = "x-user-id";
const DEFAULT_USER: &str = "anonymous";

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

fn error_response(error: ForgeError) -> ApiError {
    let status = match &error {
        ForgeError::Validation(_) | ForgeError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ForgeError::NotFound(_) => StatusCode::NOT_FOUND,
        ForgeError::Conflict(_) => StatusCode::CONFLICT,
        ForgeError::ServiceUnavailable(_) | ForgeError::Transport(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ForgeError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
        // Never leak internals; the correlation id in logs is enough.
        ErrorResponse {
            error: "Internal server error".to_string(),
            details: None,
        }
    } else {
        ErrorResponse {
            error: error.to_string(),
            details: None,
        }
    };
    (status, Json(body))
}

/// Shared service graph behind the router.
#[derive(Clone)]
pub struct AppState {
    pub tasks: Arc<TaskService>,
    pub coordinator: Arc<ExecutionCoordinator>,
    pub logs: Arc<ExecutionLogService>,
    pub registry: Arc<ModelRegistry>,
    pub tracker: Arc<PerformanceTracker>,
    pub ab_engine: Arc<AbTestEngine>,
    pub model_selector: Arc<ModelSelector>,
    pub feedback: Arc<FeedbackService>,
}

impl AppState {
    /// Assembles the full service graph on in-memory stores. `main` and
    /// the test suites both build through here so the wiring stays in one
    /// place.
    pub fn build(config: &Config, llm: Arc<dyn LlmClient>) -> Result<Self> {
        Self::build_with_context_loader(config, llm, Arc::new(EmptyContextLoader))
    }

    pub fn build_with_context_loader(
        config: &Config,
        llm: Arc<dyn LlmClient>,
        context_loader: Arc<dyn ContextLoader>,
    ) -> Result<Self> {
        let events: Arc<dyn EventPublisher> = Arc::new(InMemoryEventPublisher::new());
        Self::build_with(config, llm, context_loader, events)
    }

    pub fn build_with(
        config: &Config,
        llm: Arc<dyn LlmClient>,
        context_loader: Arc<dyn ContextLoader>,
        events: Arc<dyn EventPublisher>,
    ) -> Result<Self> {
        let classifier = Arc::new(ClassifierClient::new(&config.classifier)?);
        let github = Arc::new(GitHubClient::new(&config.github)?);

        let task_repo = Arc::new(InMemoryTaskRepository::new());
        let execution_repo = Arc::new(InMemoryExecutionRepository::new());
        let feedback_repo = Arc::new(InMemoryFeedbackRepository::new());

        let registry = Arc::new(ModelRegistry::new(
            config.orchestration.registry_refresh_ttl_secs,
        ));
        let tracker = Arc::new(PerformanceTracker::new(
            config.orchestration.performance_min_samples,
        ));
        let ab_engine = Arc::new(AbTestEngine::new(
            config.orchestration.ab_default_traffic_percent,
        ));
        let model_selector = Arc::new(ModelSelector::new(
            Arc::clone(&registry),
            Arc::clone(&tracker),
            Arc::clone(&ab_engine),
        ));
        let strategy_selector = Arc::new(StrategySelector::new(Arc::clone(&classifier)));

        let parser = Arc::new(ChangeParser::new());
        let strategies = Arc::new(StrategySet::new(
            Arc::new(SingleShotStrategy::new(Arc::clone(&llm), Arc::clone(&parser))),
            Arc::new(
                IterativeStrategy::new(Arc::clone(&llm), Arc::clone(&parser))
                    .with_limits(&config.orchestration),
            ),
            Arc::new(MultiAgentStrategy::new(
                PlannerAgent::new(Arc::clone(&llm)),
                CoderAgent::new(Arc::clone(&llm), Arc::clone(&parser)),
                ReviewerAgent::new(Arc::clone(&llm)),
                TesterAgent::new(Arc::clone(&llm), Arc::clone(&parser)),
                config.orchestration.max_parallel_coders,
            )),
        ));

        let tasks = Arc::new(TaskService::new(
            task_repo,
            events,
            Some(github),
            config.github.clone(),
        ));
        let logs = Arc::new(ExecutionLogService::new());
        let feedback = Arc::new(FeedbackService::new(feedback_repo, classifier, None));
        let coordinator = Arc::new(ExecutionCoordinator::new(
            Arc::clone(&tasks),
            execution_repo,
            strategy_selector,
            Arc::clone(&model_selector),
            strategies,
            Arc::clone(&logs),
            Arc::clone(&tracker),
            Arc::clone(&ab_engine),
            Arc::clone(&feedback),
            context_loader,
        ));

        Ok(Self {
            tasks,
            coordinator,
            logs,
            registry,
            tracker,
            ab_engine,
            model_selector,
            feedback,
        })
    }
}

pub struct ApiServer {
    config: Config,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: Config, state: AppState) -> Self {
        Self { config, state }
    }

    pub async fn run(&self) -> Result<()> {
        let app = self.build_router();
        let listener = tokio::net::TcpListener::bind(format!(
            "{}:{}",
            self.config.api.host, self.config.api.port
        ))
        .await
        .map_err(|e| ForgeError::Internal(e.into()))?;

        info!(
            "API server listening on {}:{}",
            self.config.api.host, self.config.api.port
        );
        axum::serve(listener, app)
            .await
            .map_err(|e| ForgeError::Internal(e.into()))?;
        Ok(())
    }

    pub fn build_router(&self) -> Router {
        let cors_layer = CorsLayer::new()
            .allow_origin(
                self.config
                    .api
                    .allowed_origins
                    .iter()
                    .filter_map(|origin| origin.parse().ok())
                    .collect::<Vec<_>>(),
            )
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PUT,
                axum::http::Method::DELETE,
            ])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::HeaderName::from_static(USER_ID_HEADER),
            ]);

        router_for(self.state.clone()).layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer),
        )
    }
}

/// Routes without middleware; the test suites drive this directly.
pub fn router_for(state: AppState) -> Router {
    Router::new()
        .route(ROUTE_HEALTH, get(health_check))
        .route(ROUTE_TASKS, post(create_task).get(list_tasks))
        .route(
            ROUTE_TASK_BY_ID,
            get(get_task).put(update_task).delete(delete_task),
        )
        .route(ROUTE_TASK_EXECUTE, post(execute_task))
        .route(ROUTE_TASK_LOGS, get(stream_task_logs))
        .route(ROUTE_MODELS, get(list_models))
        .route(ROUTE_MODELS_REFRESH, post(refresh_models))
        .route(ROUTE_MODELS_SELECT, post(select_model))
        .route(ROUTE_MODELS_METRICS, get(model_metrics))
        .route(ROUTE_MODELS_BEST, get(best_model))
        .route(ROUTE_AB_TESTS, post(create_ab_test))
        .route(ROUTE_AB_TESTS_ACTIVE, get(active_ab_test))
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecuteTaskRequest {
    #[serde(default)]
    pub strategy: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TaskListQuery {
    pub page: Option<usize>,
    #[serde(alias = "pageSize")]
    pub page_size: Option<usize>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SelectModelRequest {
    #[serde(alias = "taskDescription")]
    pub task_description: String,
    #[serde(alias = "taskType")]
    pub task_type: String,
    pub complexity: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BestModelResponse {
    pub model: Option<String>,
}

fn user_id_from(headers: &axum::http::HeaderMap) -> String {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_USER)
        .to_string()
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION
    }))
}

async fn create_task(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<(StatusCode, Json<CodingTask>)> {
    let user_id = user_id_from(&headers);
    let task = state
        .tasks
        .create(&user_id, &request.title, &request.description)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> ApiResult<Json<CodingTask>> {
    let task = state.tasks.get(task_id).await.map_err(error_response)?;
    Ok(Json(task))
}

async fn list_tasks(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Query(query): Query<TaskListQuery>,
) -> ApiResult<Json<TaskPage>> {
    let user_id = user_id_from(&headers);
    let page = query.page.unwrap_or(1);
    let page_size = query
        .page_size
        .unwrap_or(crate::constants::DEFAULT_PAGE_SIZE)
        .min(crate::constants::MAX_PAGE_SIZE);
    if page == 0 || page_size == 0 {
        return Err(error_response(ForgeError::Validation(
            "page and page_size must be positive".into(),
        )));
    }
    let listing = state
        .tasks
        .list_by_user(&user_id, page, page_size, query.search.as_deref())
        .await
        .map_err(error_response)?;
    Ok(Json(listing))
}

async fn update_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Json(request): Json<UpdateTaskRequest>,
) -> ApiResult<Json<CodingTask>> {
    let task = state
        .tasks
        .update(task_id, request.title.as_deref(), request.description.as_deref())
        .await
        .map_err(error_response)?;
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.tasks.delete(task_id).await.map_err(error_response)?;
    state.coordinator.cancel_for_task(task_id).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn execute_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Json(request): Json<ExecuteTaskRequest>,
) -> ApiResult<(StatusCode, Json<TaskExecution>)> {
    let execution = state
        .coordinator
        .queue_execution(task_id, request.strategy.as_deref())
        .await
        .map_err(error_response)?;
    Ok((StatusCode::ACCEPTED, Json(execution)))
}

async fn stream_task_logs(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> ApiResult<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    // 404 for unknown tasks and for tasks that never executed.
    state.tasks.get(task_id).await.map_err(error_response)?;
    let execution = state
        .coordinator
        .latest_execution(task_id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| {
            error_response(ForgeError::NotFound(format!(
                "no execution for task {task_id}"
            )))
        })?;

    let subscription = state.logs.subscribe(execution.id).await;
    let stream = subscription
        .into_stream()
        .map(|line| Ok(Event::default().data(line)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn list_models(State(state): State<AppState>) -> Json<Vec<ModelInfo>> {
    Json(state.registry.list().await)
}

async fn refresh_models(State(state): State<AppState>) -> StatusCode {
    state.registry.refresh().await;
    StatusCode::NO_CONTENT
}

async fn select_model(
    State(state): State<AppState>,
    Json(request): Json<SelectModelRequest>,
) -> ApiResult<Json<crate::selection::ModelSelection>> {
    let task_type: TaskType = request
        .task_type
        .parse()
        .map_err(|e: String| error_response(ForgeError::Validation(e)))?;
    let complexity: TaskComplexity = request
        .complexity
        .parse()
        .map_err(|e: String| error_response(ForgeError::Validation(e)))?;

    let selection = state
        .model_selector
        .select_best_model(
            &request.task_description,
            task_type,
            complexity,
            &request.task_description,
        )
        .await;
    Ok(Json(selection))
}

async fn model_metrics(
    State(state): State<AppState>,
) -> Json<std::collections::HashMap<String, crate::models::ModelPerformanceMetrics>> {
    Json(state.tracker.get_all().await)
}

async fn best_model(
    State(state): State<AppState>,
    Path((task_type, complexity)): Path<(String, String)>,
) -> ApiResult<Json<BestModelResponse>> {
    let task_type: TaskType = task_type
        .parse()
        .map_err(|e: String| error_response(ForgeError::Validation(e)))?;
    let complexity: TaskComplexity = complexity
        .parse()
        .map_err(|e: String| error_response(ForgeError::Validation(e)))?;
    let model = state.tracker.get_best(task_type, complexity).await;
    Ok(Json(BestModelResponse { model }))
}

async fn create_ab_test(
    State(state): State<AppState>,
    Json(request): Json<CreateAbTestRequest>,
) -> ApiResult<(StatusCode, Json<crate::models::ABTest>)> {
    let test = state
        .ab_engine
        .create_test(request)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(test)))
}

async fn active_ab_test(
    State(state): State<AppState>,
    Path(task_type): Path<String>,
) -> ApiResult<Json<Option<crate::models::ABTest>>> {
    let task_type: TaskType = task_type
        .parse()
        .map_err(|e: String| error_response(ForgeError::Validation(e)))?;
    Ok(Json(state.ab_engine.get_active_test(Some(task_type)).await))
}
