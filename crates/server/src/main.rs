use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use server_api::{
    add_group_rights, add_user_rights, assign_workspace, create_document, create_workspace,
    delete_workspace, list_workspaces, load_add_group_form, load_add_user_form,
    load_change_workspace_form, remove_rights, set_workspaces_public, switch_right, ApiContext,
};
use shared::{
    domain::{UserId, WorkspaceId},
    error::{ApiError, ErrorCode},
    protocol::{
        AddGroupRightsRequest, AddUserRightsRequest, AssignWorkspaceRequest,
        ChangeWorkspaceFormRequest, CreateDocumentRequest, CreateDocumentResponse,
        CreateWorkspaceRequest, CreateWorkspaceResponse, FormFragmentResponse, LoginRequest,
        LoginResponse, RemoveRightsRequest, RightsFormRequest, SetPublicRequest,
        SwitchRightRequest,
    },
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};

mod config;

use config::{load_settings, prepare_database_url};

#[derive(Clone)]
struct AppState {
    api: ApiContext,
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: i64,
}

const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(%database_url, %error, "failed to open the SQLite database");
        error
    })?;
    let api = ApiContext { storage };

    let state = AppState { api };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/login", post(login))
        .route("/documents", post(http_create_document))
        .route("/workspaces", get(http_list_workspaces))
        .route("/workspaces", post(http_create_workspace))
        .route("/workspaces/change-form", post(http_change_workspace_form))
        .route("/workspaces/assign", post(http_assign_workspace))
        .route("/workspaces/public", post(http_set_public))
        .route("/workspaces/rights/user-form", post(http_add_user_form))
        .route("/workspaces/rights/user", post(http_add_user_rights))
        .route("/workspaces/rights/group-form", post(http_add_group_form))
        .route("/workspaces/rights/group", post(http_add_group_rights))
        .route("/workspaces/rights/switch", post(http_switch_right))
        .route("/workspaces/rights/remove", post(http_remove_rights))
        .route("/workspaces/:workspace_id", delete(http_delete_workspace))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

/// Failures travel as plain text so pages can splice the body straight into
/// their error region.
fn error_response(err: ApiError) -> (StatusCode, String) {
    let status = match err.code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::NotUnique => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.message)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, (StatusCode, String)> {
    state
        .api
        .storage
        .health_check()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok("ok")
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, String)> {
    let username = req.username.trim();
    if username.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "You need to enter a username.".to_string(),
        ));
    }
    let user_id = state
        .api
        .storage
        .create_user(username)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(LoginResponse { user_id }))
}

async fn http_create_document(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
    Json(req): Json<CreateDocumentRequest>,
) -> Result<Json<CreateDocumentResponse>, (StatusCode, String)> {
    let document_id = create_document(&state.api, UserId(q.user_id), &req.title)
        .await
        .map_err(error_response)?;
    Ok(Json(CreateDocumentResponse { document_id }))
}

async fn http_list_workspaces(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
) -> Result<Json<Vec<shared::protocol::WorkspaceSummary>>, (StatusCode, String)> {
    let workspaces = list_workspaces(&state.api, UserId(q.user_id))
        .await
        .map_err(error_response)?;
    Ok(Json(workspaces))
}

async fn http_create_workspace(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
    Json(req): Json<CreateWorkspaceRequest>,
) -> Result<Json<CreateWorkspaceResponse>, (StatusCode, String)> {
    let workspace_id = create_workspace(&state.api, UserId(q.user_id), &req.name)
        .await
        .map_err(error_response)?;
    Ok(Json(CreateWorkspaceResponse { workspace_id }))
}

async fn http_change_workspace_form(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
    Json(req): Json<ChangeWorkspaceFormRequest>,
) -> Result<Json<FormFragmentResponse>, (StatusCode, String)> {
    let form = load_change_workspace_form(&state.api, UserId(q.user_id), &[req.document_id])
        .await
        .map_err(error_response)?;
    Ok(Json(FormFragmentResponse { form }))
}

async fn http_assign_workspace(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
    Json(req): Json<AssignWorkspaceRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    assign_workspace(
        &state.api,
        UserId(q.user_id),
        &req.workspace_id,
        &[req.document_id],
    )
    .await
    .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_set_public(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
    Json(req): Json<SetPublicRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    set_workspaces_public(&state.api, UserId(q.user_id), &req.workspace_ids)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_add_user_form(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
    Json(req): Json<RightsFormRequest>,
) -> Result<Json<FormFragmentResponse>, (StatusCode, String)> {
    let form = load_add_user_form(&state.api, UserId(q.user_id), req.workspace_id)
        .await
        .map_err(error_response)?;
    Ok(Json(FormFragmentResponse { form }))
}

async fn http_add_user_rights(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
    Json(req): Json<AddUserRightsRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    add_user_rights(
        &state.api,
        UserId(q.user_id),
        req.workspace_id,
        &req.user_ids,
        req.read,
        req.write,
    )
    .await
    .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_add_group_form(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
    Json(req): Json<RightsFormRequest>,
) -> Result<Json<FormFragmentResponse>, (StatusCode, String)> {
    let form = load_add_group_form(&state.api, UserId(q.user_id), req.workspace_id)
        .await
        .map_err(error_response)?;
    Ok(Json(FormFragmentResponse { form }))
}

async fn http_add_group_rights(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
    Json(req): Json<AddGroupRightsRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    add_group_rights(
        &state.api,
        UserId(q.user_id),
        req.workspace_id,
        &req.group_ids,
        req.read,
        req.write,
    )
    .await
    .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_switch_right(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
    Json(req): Json<SwitchRightRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    switch_right(
        &state.api,
        UserId(q.user_id),
        req.workspace_id,
        req.holder,
        req.object_id,
        req.action,
        req.value,
    )
    .await
    .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_remove_rights(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
    Json(req): Json<RemoveRightsRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    remove_rights(
        &state.api,
        UserId(q.user_id),
        req.workspace_id,
        req.holder,
        req.object_id,
    )
    .await
    .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_delete_workspace(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<i64>,
    Query(q): Query<UserQuery>,
) -> Result<StatusCode, (StatusCode, String)> {
    delete_workspace(&state.api, UserId(q.user_id), WorkspaceId(workspace_id))
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request},
    };
    use tower::ServiceExt;

    async fn test_app() -> (Router, Storage, i64, i64, i64) {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        let owner = storage.create_user("alice").await.expect("user");
        let workspace = storage
            .create_workspace("General", owner)
            .await
            .expect("workspace");
        let document = storage
            .create_document("notes.txt", owner)
            .await
            .expect("document");

        let api = ApiContext {
            storage: storage.clone(),
        };
        let app = build_router(Arc::new(AppState { api }));
        (app, storage, owner.0, workspace.0, document.0)
    }

    fn json_post(uri: String, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let (app, _, _, _, _) = test_app().await;
        let response = app
            .oneshot(Request::get("/healthz").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn login_upserts_the_username() {
        let (app, _, _, _, _) = test_app().await;
        let request = json_post("/login".to_string(), serde_json::json!({"username": "bob"}));
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert!(parsed["user_id"].as_i64().expect("user_id") > 0);
    }

    #[tokio::test]
    async fn change_form_returns_the_rendered_fragment() {
        let (app, _, owner, _, document) = test_app().await;
        let request = json_post(
            format!("/workspaces/change-form?user_id={owner}"),
            serde_json::json!({"document_id": document.to_string()}),
        );
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        let form = parsed["form"].as_str().expect("form");
        assert!(form.contains("id_workspaces"));
        assert!(form.contains("General"));
    }

    #[tokio::test]
    async fn assign_returns_no_content_and_moves_the_document() {
        let (app, storage, owner, workspace, document) = test_app().await;
        let request = json_post(
            format!("/workspaces/assign?user_id={owner}"),
            serde_json::json!({
                "workspace_id": workspace.to_string(),
                "document_id": document.to_string(),
            }),
        );
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let stored = storage
            .document_by_id(shared::domain::DocumentId(document))
            .await
            .expect("lookup")
            .expect("document");
        assert_eq!(stored.workspace_id, Some(WorkspaceId(workspace)));
    }

    #[tokio::test]
    async fn failures_travel_as_plain_text() {
        let (app, _, owner, _, document) = test_app().await;
        let request = json_post(
            format!("/workspaces/assign?user_id={owner}"),
            serde_json::json!({
                "workspace_id": "999999",
                "document_id": document.to_string(),
            }),
        );
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        assert_eq!(&bytes[..], b"The workspace does not exist.");
    }

    #[tokio::test]
    async fn duplicate_workspace_title_is_a_conflict() {
        let (app, _, owner, _, _) = test_app().await;
        let request = json_post(
            format!("/workspaces?user_id={owner}"),
            serde_json::json!({"name": "general"}),
        );
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected() {
        let (app, _, owner, _, _) = test_app().await;
        let request = Request::post(format!("/workspaces/change-form?user_id={owner}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(vec![b'x'; MAX_BODY_BYTES + 1]))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
