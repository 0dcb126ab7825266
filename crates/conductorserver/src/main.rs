use actix_cors::Cors;
use actix_web::{delete, get, post, put, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult};
use actix_ws::Message;
use chrono::{DateTime, Utc};
use conductorcore::{ConductorError, ExecutionId, NodeDefinition, Params};
use conductorruntime::{ConductorConfig, ConductorRuntime, ExecutionConfig, FlowDocument, ListOptions};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
struct AppState {
    runtime: Arc<ConductorRuntime>,
}

/// Request body for flow execution
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExecuteRequest {
    inputs: Params,
    /// Overrides the server's execution settings for this run
    config: Option<ExecutionConfig>,
}

/// Request body for saving a flow
#[derive(Debug, Deserialize)]
struct SaveFlowRequest {
    name: String,
    #[serde(default)]
    description: String,
    definition: NodeDefinition,
}

/// Summary row for flow listings
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FlowSummary {
    id: String,
    name: String,
    description: String,
    node_type: String,
    children: usize,
    updated_at: DateTime<Utc>,
}

impl From<&FlowDocument> for FlowSummary {
    fn from(flow: &FlowDocument) -> Self {
        Self {
            id: flow.id.clone(),
            name: flow.name.clone(),
            description: flow.description.clone(),
            node_type: flow.definition.node_type.clone(),
            children: flow.definition.children.len(),
            updated_at: flow.updated_at,
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl ErrorResponse {
    fn from_error(error: &ConductorError) -> Self {
        Self {
            error: error.to_string(),
            code: error.code(),
        }
    }
}

fn not_found(flow_id: &str) -> HttpResponse {
    HttpResponse::NotFound().json(ErrorResponse {
        error: format!("Flow {} not found", flow_id),
        code: "NOT_FOUND",
    })
}

/// Map a conductor error to a status code
fn error_response(error: &ConductorError) -> HttpResponse {
    let body = ErrorResponse::from_error(error);
    match error {
        ConductorError::Validation(_) | ConductorError::CycleDetected { .. } | ConductorError::Serialization(_) => {
            HttpResponse::BadRequest().json(body)
        }
        _ => HttpResponse::InternalServerError().json(body),
    }
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "conductor"
    }))
}

/// List saved flows
#[get("/api/flows")]
async fn list_flows(data: web::Data<AppState>, query: web::Query<ListOptions>) -> ActixResult<impl Responder> {
    match data.runtime.flows().list_flows(query.into_inner()).await {
        Ok(flows) => {
            let summaries: Vec<FlowSummary> = flows.iter().map(FlowSummary::from).collect();
            Ok(HttpResponse::Ok().json(summaries))
        }
        Err(e) => Ok(error_response(&e)),
    }
}

/// Save a new flow
#[post("/api/flows")]
async fn create_flow(data: web::Data<AppState>, body: web::Json<SaveFlowRequest>) -> ActixResult<impl Responder> {
    let SaveFlowRequest {
        name,
        description,
        definition,
    } = body.into_inner();

    // Reject graphs that could never run
    if let Err(e) = data.runtime.analyze(&definition) {
        return Ok(error_response(&e));
    }

    let flow = FlowDocument::new(name, definition).with_description(description);
    info!("Creating flow: {} ({})", flow.name, flow.id);

    match data.runtime.flows().save_flow(flow).await {
        Ok(saved) => Ok(HttpResponse::Created().json(saved)),
        Err(e) => Ok(error_response(&e)),
    }
}

/// Get a specific flow
#[get("/api/flows/{id}")]
async fn get_flow(data: web::Data<AppState>, path: web::Path<String>) -> ActixResult<impl Responder> {
    let flow_id = path.into_inner();
    match data.runtime.flows().load_flow(&flow_id).await {
        Ok(Some(flow)) => Ok(HttpResponse::Ok().json(flow)),
        Ok(None) => Ok(not_found(&flow_id)),
        Err(e) => Ok(error_response(&e)),
    }
}

/// Replace a flow's content
#[put("/api/flows/{id}")]
async fn update_flow(
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<SaveFlowRequest>,
) -> ActixResult<impl Responder> {
    let flow_id = path.into_inner();
    let flows = data.runtime.flows();

    let existing = match flows.load_flow(&flow_id).await {
        Ok(Some(flow)) => flow,
        Ok(None) => return Ok(not_found(&flow_id)),
        Err(e) => return Ok(error_response(&e)),
    };

    let SaveFlowRequest {
        name,
        description,
        definition,
    } = body.into_inner();
    if let Err(e) = data.runtime.analyze(&definition) {
        return Ok(error_response(&e));
    }

    let updated = FlowDocument {
        name,
        description,
        definition,
        ..existing
    };
    match flows.save_flow(updated).await {
        Ok(saved) => Ok(HttpResponse::Ok().json(saved)),
        Err(e) => Ok(error_response(&e)),
    }
}

/// Delete a flow
#[delete("/api/flows/{id}")]
async fn delete_flow(data: web::Data<AppState>, path: web::Path<String>) -> ActixResult<impl Responder> {
    let flow_id = path.into_inner();
    match data.runtime.flows().delete_flow(&flow_id).await {
        Ok(true) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "message": "Flow deleted successfully"
        }))),
        Ok(false) => Ok(not_found(&flow_id)),
        Err(e) => Ok(error_response(&e)),
    }
}

/// Execute a saved flow
#[post("/api/flows/{id}/execute")]
async fn execute_flow(
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: Option<web::Json<ExecuteRequest>>,
) -> ActixResult<impl Responder> {
    let flow_id = path.into_inner();
    let request = body.map(|b| b.into_inner()).unwrap_or_default();

    let flow = match data.runtime.flows().load_flow(&flow_id).await {
        Ok(Some(flow)) => flow,
        Ok(None) => return Ok(not_found(&flow_id)),
        Err(e) => return Ok(error_response(&e)),
    };

    let config = request
        .config
        .unwrap_or_else(|| data.runtime.config().execution.clone());
    let execution_id = ExecutionId::generate();
    info!(flow_id = %flow_id, execution_id = %execution_id, "Executing flow");

    match data
        .runtime
        .execute_with(&flow.definition, request.inputs, &config, execution_id.clone(), &CancellationToken::new())
        .await
    {
        Ok(outcome) => {
            info!(
                "Flow {} finished: success={} nodes={}",
                flow_id, outcome.result.success, outcome.metadata.child_nodes_executed
            );
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "executionId": execution_id,
                "result": outcome.result,
                "metadata": outcome.metadata,
            })))
        }
        Err(e) => {
            error!("Flow {} execution failed: {}", flow_id, e);
            Ok(error_response(&e))
        }
    }
}

/// Scheduling plan for an unsaved definition
#[post("/api/analyze")]
async fn analyze_definition(
    data: web::Data<AppState>,
    definition: web::Json<NodeDefinition>,
) -> ActixResult<impl Responder> {
    match data.runtime.analyze(&definition) {
        Ok(graph) => Ok(HttpResponse::Ok().json(graph)),
        Err(e) => Ok(error_response(&e)),
    }
}

/// WebSocket endpoint for real-time events
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");

    let mut events = data.runtime.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "WebSocket client fell behind the event stream");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

/// List available node types
#[get("/api/nodes")]
async fn list_node_types(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.runtime.registry();
    let weights = data.runtime.config().weights.clone();

    let nodes: Vec<_> = registry
        .list_node_types()
        .iter()
        .map(|node_type| {
            let metadata = registry.get_metadata(node_type);
            serde_json::json!({
                "type": node_type,
                "weight": weights.weight_for(node_type),
                "description": metadata.as_ref().map(|m| m.description.clone()).unwrap_or_default(),
                "category": metadata.as_ref().map(|m| m.category.clone()).unwrap_or_default(),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(nodes))
}

fn load_config() -> anyhow::Result<ConductorConfig> {
    let config = match std::env::var("CONDUCTOR_CONFIG") {
        Ok(path) => ConductorConfig::from_file(&path)?,
        Err(_) => ConductorConfig::default(),
    };
    Ok(config.with_env_overrides())
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 Starting Conductor Server");

    let config = load_config()?;
    let runtime = ConductorRuntime::with_registry(Arc::new(conductornodes::standard_registry()), config);

    info!("✅ Runtime initialized with standard nodes");

    let app_state = web::Data::new(AppState {
        runtime: Arc::new(runtime),
    });

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("🌐 Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .service(health_check)
            .service(list_flows)
            .service(create_flow)
            .service(get_flow)
            .service(update_flow)
            .service(delete_flow)
            .service(execute_flow)
            .service(analyze_definition)
            .service(websocket_events)
            .service(list_node_types)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
