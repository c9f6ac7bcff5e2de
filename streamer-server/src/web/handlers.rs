use super::exchange::ChannelExchange;
use super::server::AppState;
use axum::{
    extract::{Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, error, info_span, warn};
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    status: String,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            status: "success".to_string(),
            data: Some(data),
            error: None,
        }
    }

    fn error(message: String) -> ApiResponse<()> {
        ApiResponse {
            status: "error".to_string(),
            data: None,
            error: Some(message),
        }
    }
}

/// 健康检查
pub async fn health_check() -> Json<ApiResponse<String>> {
    Json(ApiResponse::success("OK".to_string()))
}

/// 已注册的流路由
pub async fn list_routes(State(state): State<AppState>) -> Json<ApiResponse<Vec<String>>> {
    let routes = state
        .registry
        .routes()
        .into_iter()
        .map(|(method, route)| format!("{} {}", method, route))
        .collect();
    Json(ApiResponse::success(routes))
}

/// 把请求分发给注册表中的处理器
///
/// 处理器在阻塞线程池中运行，这里只等待响应头；
/// 响应体随后由处理器通过通道持续写入。
pub async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let Some(handler) = state.registry.lookup(&method, &path) else {
        debug!("No handler for {} {}", method, path);
        return (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()>::error(format!("No route for {} {}", method, path))),
        )
            .into_response();
    };

    // 无法解析的查询串按无参数处理
    let query = Query::<HashMap<String, String>>::try_from_uri(request.uri())
        .map(|Query(query)| query)
        .unwrap_or_default();

    let request_id = Uuid::new_v4();
    let span = info_span!("stream", %request_id, %method, %path);
    let (exchange, head_rx) = ChannelExchange::new(query, state.body_buffer_chunks);

    tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        let mut exchange = exchange;
        if let Err(e) = handler.handle(&mut exchange) {
            warn!("Request failed: {}", e);
        }
    });

    match head_rx.await {
        Ok(response) => response,
        Err(_) => {
            error!("Handler for {} exited without a response ({})", path, request_id);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<()>::error("Handler failed".to_string())),
            )
                .into_response()
        }
    }
}
