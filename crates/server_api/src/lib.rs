use shared::{
    domain::{DocumentId, GroupId, RightAction, RightHolder, UserId, WorkspaceId},
    error::{ApiError, ErrorCode},
    protocol::WorkspaceSummary,
};
use storage::{Storage, StoredDocument, StoredUser, StoredWorkspace};
use tracing::error;

mod forms;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

/// Renders the workspace dropdown for the assignment modal. Choices are the
/// workspaces the acting user can write to, minus the workspaces the selected
/// documents already sit in. Document ids that do not parse or do not resolve
/// are skipped without complaint.
pub async fn load_change_workspace_form(
    ctx: &ApiContext,
    user_id: UserId,
    document_ids: &[String],
) -> Result<String, ApiError> {
    let user = require_user(ctx, user_id).await?;
    let writable = writable_workspaces(ctx, &user).await?;
    if writable.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "You don't have access to any workspaces with sufficient rights to assign a document.",
        ));
    }

    let mut current = Vec::new();
    for raw in document_ids {
        let Ok(id) = raw.trim().parse::<i64>() else {
            continue;
        };
        let document = ctx
            .storage
            .document_by_id(DocumentId(id))
            .await
            .map_err(internal)?;
        if let Some(workspace_id) = document.and_then(|d| d.workspace_id) {
            current.push(workspace_id);
        }
    }

    let choices: Vec<&StoredWorkspace> = writable
        .iter()
        .filter(|workspace| !current.contains(&workspace.workspace_id))
        .collect();
    Ok(forms::change_workspace_select(&choices))
}

/// Moves the selected documents into the chosen workspace. The first document
/// that fails a check aborts the whole request with that failure; documents
/// already processed stay assigned.
pub async fn assign_workspace(
    ctx: &ApiContext,
    user_id: UserId,
    workspace_id: &str,
    document_ids: &[String],
) -> Result<(), ApiError> {
    let user = require_user(ctx, user_id).await?;
    if document_ids.is_empty() {
        return Ok(());
    }
    let workspace = require_workspace_raw(ctx, workspace_id).await?;
    for raw in document_ids {
        let document = require_document_raw(ctx, raw).await?;
        if !user.is_superuser {
            ensure_document_owner(&user, &document)?;
            ensure_write_access(ctx, workspace.workspace_id, user.user_id).await?;
        }
        ctx.storage
            .assign_document(document.document_id, workspace.workspace_id)
            .await
            .map_err(internal)?;
    }
    Ok(())
}

pub async fn create_workspace(
    ctx: &ApiContext,
    user_id: UserId,
    name: &str,
) -> Result<WorkspaceId, ApiError> {
    require_user(ctx, user_id).await?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "You need to enter a name for the workspace.",
        ));
    }
    if ctx
        .storage
        .workspace_title_exists(name)
        .await
        .map_err(internal)?
    {
        return Err(ApiError::new(
            ErrorCode::NotUnique,
            format!("A workspace called {name} already exists. Please change the name and try again."),
        ));
    }
    ctx.storage
        .create_workspace(name, user_id)
        .await
        .map_err(|err| {
            error!("workspace insert failed: {err:#}");
            ApiError::new(
                ErrorCode::Internal,
                "A problem occurred while creating the workspace.",
            )
        })
}

/// Marks every listed workspace public. All ids are resolved up front, so an
/// unknown id fails the request before anything is flipped; an ownership
/// failure partway through leaves the earlier workspaces public.
pub async fn set_workspaces_public(
    ctx: &ApiContext,
    user_id: UserId,
    workspace_ids: &[WorkspaceId],
) -> Result<(), ApiError> {
    let user = require_user(ctx, user_id).await?;
    let mut workspaces = Vec::with_capacity(workspace_ids.len());
    for &workspace_id in workspace_ids {
        workspaces.push(require_workspace(ctx, workspace_id).await?);
    }
    for workspace in workspaces {
        ensure_workspace_owner(&user, &workspace)?;
        ctx.storage
            .set_workspace_public(workspace.workspace_id)
            .await
            .map_err(internal)?;
    }
    Ok(())
}

pub async fn load_add_user_form(
    ctx: &ApiContext,
    user_id: UserId,
    workspace_id: WorkspaceId,
) -> Result<String, ApiError> {
    let user = require_user(ctx, user_id).await?;
    let workspace = require_workspace(ctx, workspace_id).await?;
    ensure_workspace_owner(&user, &workspace)?;
    let candidates = ctx
        .storage
        .list_users_without_access(workspace_id)
        .await
        .map_err(internal)?;
    if candidates.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "There is no users that can be added.",
        ));
    }
    Ok(forms::user_multi_select(&candidates))
}

/// Grants the checked flags to every selected user; an unchecked flag leaves
/// any existing grant untouched.
pub async fn add_user_rights(
    ctx: &ApiContext,
    user_id: UserId,
    workspace_id: WorkspaceId,
    target_user_ids: &[UserId],
    read: bool,
    write: bool,
) -> Result<(), ApiError> {
    if target_user_ids.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "You need to select at least one user.",
        ));
    }
    ensure_some_permission(read, write)?;
    let user = require_user(ctx, user_id).await?;
    let workspace = require_workspace(ctx, workspace_id).await?;
    ensure_workspace_owner(&user, &workspace)?;
    for &target in target_user_ids {
        require_user(ctx, target).await?;
        if read {
            ctx.storage
                .set_user_right(workspace_id, target, RightAction::Read, true)
                .await
                .map_err(internal)?;
        }
        if write {
            ctx.storage
                .set_user_right(workspace_id, target, RightAction::Write, true)
                .await
                .map_err(internal)?;
        }
    }
    Ok(())
}

pub async fn load_add_group_form(
    ctx: &ApiContext,
    user_id: UserId,
    workspace_id: WorkspaceId,
) -> Result<String, ApiError> {
    let user = require_user(ctx, user_id).await?;
    let workspace = require_workspace(ctx, workspace_id).await?;
    ensure_workspace_owner(&user, &workspace)?;
    let candidates = ctx
        .storage
        .list_groups_without_access(workspace_id)
        .await
        .map_err(internal)?;
    if candidates.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "There is no groups that can be added.",
        ));
    }
    Ok(forms::group_multi_select(&candidates))
}

pub async fn add_group_rights(
    ctx: &ApiContext,
    user_id: UserId,
    workspace_id: WorkspaceId,
    group_ids: &[GroupId],
    read: bool,
    write: bool,
) -> Result<(), ApiError> {
    if group_ids.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "You need to select at least one group.",
        ));
    }
    ensure_some_permission(read, write)?;
    let user = require_user(ctx, user_id).await?;
    let workspace = require_workspace(ctx, workspace_id).await?;
    ensure_workspace_owner(&user, &workspace)?;
    for &group_id in group_ids {
        require_group(ctx, group_id).await?;
        if read {
            ctx.storage
                .set_group_right(workspace_id, group_id, RightAction::Read, true)
                .await
                .map_err(internal)?;
        }
        if write {
            ctx.storage
                .set_group_right(workspace_id, group_id, RightAction::Write, true)
                .await
                .map_err(internal)?;
        }
    }
    Ok(())
}

/// Flips a single read or write flag for one grant holder.
pub async fn switch_right(
    ctx: &ApiContext,
    user_id: UserId,
    workspace_id: WorkspaceId,
    holder: RightHolder,
    object_id: i64,
    action: RightAction,
    value: bool,
) -> Result<(), ApiError> {
    let user = require_user(ctx, user_id).await?;
    let workspace = require_workspace(ctx, workspace_id).await?;
    ensure_workspace_owner(&user, &workspace)?;
    match holder {
        RightHolder::User => {
            let target = UserId(object_id);
            require_user(ctx, target).await?;
            ctx.storage
                .set_user_right(workspace_id, target, action, value)
                .await
                .map_err(internal)?;
        }
        RightHolder::Group => {
            let group_id = GroupId(object_id);
            require_group(ctx, group_id).await?;
            ctx.storage
                .set_group_right(workspace_id, group_id, action, value)
                .await
                .map_err(internal)?;
        }
    }
    Ok(())
}

/// Drops the grant row entirely, so the holder shows up again in the add
/// forms.
pub async fn remove_rights(
    ctx: &ApiContext,
    user_id: UserId,
    workspace_id: WorkspaceId,
    holder: RightHolder,
    object_id: i64,
) -> Result<(), ApiError> {
    let user = require_user(ctx, user_id).await?;
    let workspace = require_workspace(ctx, workspace_id).await?;
    ensure_workspace_owner(&user, &workspace)?;
    match holder {
        RightHolder::User => {
            let target = UserId(object_id);
            require_user(ctx, target).await?;
            ctx.storage
                .remove_user_rights(workspace_id, target)
                .await
                .map_err(internal)?;
        }
        RightHolder::Group => {
            let group_id = GroupId(object_id);
            require_group(ctx, group_id).await?;
            ctx.storage
                .remove_group_rights(workspace_id, group_id)
                .await
                .map_err(internal)?;
        }
    }
    Ok(())
}

pub async fn delete_workspace(
    ctx: &ApiContext,
    user_id: UserId,
    workspace_id: WorkspaceId,
) -> Result<(), ApiError> {
    let user = require_user(ctx, user_id).await?;
    let workspace = require_workspace(ctx, workspace_id).await?;
    ensure_workspace_owner(&user, &workspace)?;
    ctx.storage
        .delete_workspace(workspace.workspace_id)
        .await
        .map_err(internal)?;
    Ok(())
}

pub async fn list_workspaces(
    ctx: &ApiContext,
    user_id: UserId,
) -> Result<Vec<WorkspaceSummary>, ApiError> {
    let user = require_user(ctx, user_id).await?;
    let workspaces = if user.is_superuser {
        ctx.storage.list_all_workspaces().await.map_err(internal)?
    } else {
        ctx.storage
            .list_workspaces_with_read_access(user_id)
            .await
            .map_err(internal)?
    };
    Ok(workspaces
        .into_iter()
        .map(|workspace| WorkspaceSummary {
            workspace_id: workspace.workspace_id,
            title: workspace.title,
            owner_id: workspace.owner_user_id,
            is_public: workspace.is_public,
            created_at: workspace.created_at,
        })
        .collect())
}

pub async fn create_document(
    ctx: &ApiContext,
    user_id: UserId,
    title: &str,
) -> Result<DocumentId, ApiError> {
    require_user(ctx, user_id).await?;
    let title = title.trim();
    if title.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "You need to enter a title for the document.",
        ));
    }
    ctx.storage
        .create_document(title, user_id)
        .await
        .map_err(internal)
}

async fn writable_workspaces(
    ctx: &ApiContext,
    user: &StoredUser,
) -> Result<Vec<StoredWorkspace>, ApiError> {
    if user.is_superuser {
        ctx.storage.list_all_workspaces().await.map_err(internal)
    } else {
        ctx.storage
            .list_workspaces_with_write_access(user.user_id)
            .await
            .map_err(internal)
    }
}

async fn require_user(ctx: &ApiContext, user_id: UserId) -> Result<StoredUser, ApiError> {
    let user = ctx.storage.user_by_id(user_id).await.map_err(internal)?;
    user.ok_or_else(|| ApiError::new(ErrorCode::NotFound, "The user does not exist."))
}

async fn require_group(ctx: &ApiContext, group_id: GroupId) -> Result<(), ApiError> {
    let group = ctx.storage.group_by_id(group_id).await.map_err(internal)?;
    if group.is_none() {
        return Err(ApiError::new(
            ErrorCode::NotFound,
            "The group does not exist.",
        ));
    }
    Ok(())
}

async fn require_workspace(
    ctx: &ApiContext,
    workspace_id: WorkspaceId,
) -> Result<StoredWorkspace, ApiError> {
    let workspace = ctx
        .storage
        .workspace_by_id(workspace_id)
        .await
        .map_err(internal)?;
    workspace.ok_or_else(|| ApiError::new(ErrorCode::NotFound, "The workspace does not exist."))
}

async fn require_workspace_raw(
    ctx: &ApiContext,
    raw: &str,
) -> Result<StoredWorkspace, ApiError> {
    let Ok(id) = raw.trim().parse::<i64>() else {
        return Err(ApiError::new(
            ErrorCode::NotFound,
            "The workspace does not exist.",
        ));
    };
    require_workspace(ctx, WorkspaceId(id)).await
}

async fn require_document_raw(ctx: &ApiContext, raw: &str) -> Result<StoredDocument, ApiError> {
    let parsed = raw.trim().parse::<i64>().ok();
    let document = match parsed {
        Some(id) => ctx
            .storage
            .document_by_id(DocumentId(id))
            .await
            .map_err(internal)?,
        None => None,
    };
    document.ok_or_else(|| ApiError::new(ErrorCode::NotFound, "The document does not exist."))
}

fn ensure_workspace_owner(
    user: &StoredUser,
    workspace: &StoredWorkspace,
) -> Result<(), ApiError> {
    if user.is_superuser || workspace.owner_user_id == user.user_id {
        return Ok(());
    }
    Err(ApiError::new(
        ErrorCode::Forbidden,
        "The user does not have the permission. The user is not the owner of this workspace.",
    ))
}

fn ensure_document_owner(user: &StoredUser, document: &StoredDocument) -> Result<(), ApiError> {
    if document.owner_user_id == user.user_id {
        return Ok(());
    }
    Err(ApiError::new(
        ErrorCode::Forbidden,
        "The user does not have the permission. The user is not the owner of this document.",
    ))
}

async fn ensure_write_access(
    ctx: &ApiContext,
    workspace_id: WorkspaceId,
    user_id: UserId,
) -> Result<(), ApiError> {
    let allowed = ctx
        .storage
        .has_write_access(workspace_id, user_id)
        .await
        .map_err(internal)?;
    if allowed {
        return Ok(());
    }
    Err(ApiError::new(
        ErrorCode::Forbidden,
        "The user does not have the permission. The user does not have write access to this workspace.",
    ))
}

fn ensure_some_permission(read: bool, write: bool) -> Result<(), ApiError> {
    if read || write {
        return Ok(());
    }
    Err(ApiError::new(
        ErrorCode::Validation,
        "You need to select at least one permission (read and/or write).",
    ))
}

fn internal(err: anyhow::Error) -> ApiError {
    error!("storage failure: {err:#}");
    ApiError::new(ErrorCode::Internal, "Something wrong happened.")
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
