use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{DocumentId, GroupId, RightAction, RightHolder, UserId, WorkspaceId};

/// Body of the change-workspace call that fetches the selection form.
///
/// The identifier is a string on purpose: the page sends whatever value its
/// selection accessor currently holds, and the server decides whether it
/// resolves to a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeWorkspaceFormRequest {
    pub document_id: String,
}

/// Body of the assign-workspace call submitted from the modal. Both values
/// are raw page state, already trimmed by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignWorkspaceRequest {
    pub workspace_id: String,
    pub document_id: String,
}

/// Successful form-fetch payload: an opaque HTML fragment the page injects
/// wholesale into the modal body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormFragmentResponse {
    pub form: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDocumentRequest {
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDocumentResponse {
    pub document_id: DocumentId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWorkspaceRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWorkspaceResponse {
    pub workspace_id: WorkspaceId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSummary {
    pub workspace_id: WorkspaceId,
    pub title: String,
    pub owner_id: UserId,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetPublicRequest {
    pub workspace_ids: Vec<WorkspaceId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RightsFormRequest {
    pub workspace_id: WorkspaceId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddUserRightsRequest {
    pub workspace_id: WorkspaceId,
    pub user_ids: Vec<UserId>,
    pub read: bool,
    pub write: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddGroupRightsRequest {
    pub workspace_id: WorkspaceId,
    pub group_ids: Vec<GroupId>,
    pub read: bool,
    pub write: bool,
}

/// Grants or revokes a single read/write flag for one user or group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchRightRequest {
    pub workspace_id: WorkspaceId,
    pub holder: RightHolder,
    pub object_id: i64,
    pub action: RightAction,
    pub value: bool,
}

/// Removes both flags for one user or group at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveRightsRequest {
    pub workspace_id: WorkspaceId,
    pub holder: RightHolder,
    pub object_id: i64,
}
