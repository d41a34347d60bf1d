use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::app::{ApiError, App};

const YAML_CONTENT_TYPE: &str = "application/x-yaml";

#[derive(Clone)]
pub struct AppState {
	pub app: Arc<App>,
}

pub fn router(app: Arc<App>) -> Router {
	Router::new()
		.route("/api/v1/status", get(get_status))
		.route("/api/v1/capabilities", get(get_capabilities))
		.route("/api/v1/policies", get(list_policies).post(create_policies))
		.route(
			"/api/v1/policies/{policy}",
			get(get_policy).delete(delete_policy),
		)
		.layer(CorsLayer::permissive())
		.with_state(AppState { app })
}

#[derive(Serialize)]
struct Message {
	message: String,
}

type ErrorReply = (StatusCode, Json<Message>);

fn reply(err: ApiError) -> ErrorReply {
	(
		err.status_code(),
		Json(Message {
			message: err.to_string(),
		}),
	)
}

async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
	Json(state.app.status().await)
}

async fn get_capabilities(
	State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ErrorReply> {
	let raw = state.app.capabilities().await;
	if raw.is_empty() {
		return Ok(Json(serde_json::Value::Null));
	}
	let value: serde_json::Value = serde_yaml::from_slice(&raw)
		.map_err(|e| reply(ApiError::Capabilities(e.to_string())))?;
	Ok(Json(value))
}

async fn list_policies(State(state): State<AppState>) -> Json<Vec<String>> {
	Json(state.app.policy_names().await)
}

async fn get_policy(
	State(state): State<AppState>,
	Path(policy): Path<String>,
) -> Result<Response, ErrorReply> {
	match state.app.policy_view(&policy).await {
		Some(view) => yaml_response(StatusCode::OK, &BTreeMap::from([(policy, view)])),
		None => Err(reply(ApiError::NotFound)),
	}
}

async fn create_policies(
	State(state): State<AppState>,
	headers: HeaderMap,
	body: Bytes,
) -> Result<Response, ErrorReply> {
	let content_type = headers
		.get(header::CONTENT_TYPE)
		.and_then(|v| v.to_str().ok());
	if content_type != Some(YAML_CONTENT_TYPE) {
		return Err(reply(ApiError::UnsupportedContentType));
	}

	let payload: serde_yaml::Mapping =
		serde_yaml::from_slice(&body).map_err(|e| reply(ApiError::Decode(e)))?;

	let admitted = state.app.create_policies(payload).await.map_err(reply)?;
	yaml_response(StatusCode::CREATED, &admitted)
}

async fn delete_policy(
	State(state): State<AppState>,
	Path(policy): Path<String>,
) -> Result<Json<Message>, ErrorReply> {
	state.app.delete_policy(&policy).await.map_err(reply)?;
	Ok(Json(Message {
		message: format!("{policy} was deleted"),
	}))
}

fn yaml_response<T: Serialize>(code: StatusCode, value: &T) -> Result<Response, ErrorReply> {
	let body = serde_yaml::to_string(value).map_err(|e| {
		(
			StatusCode::INTERNAL_SERVER_ERROR,
			Json(Message {
				message: e.to_string(),
			}),
		)
	})?;
	Ok((code, [(header::CONTENT_TYPE, YAML_CONTENT_TYPE)], body).into_response())
}
