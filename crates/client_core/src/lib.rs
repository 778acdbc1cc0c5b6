use std::{sync::Arc, time::Duration};

use reqwest::Client;
use shared::protocol::{AssignWorkspaceRequest, ChangeWorkspaceFormRequest, FormFragmentResponse};
use thiserror::Error;
use tracing::{debug, warn};

/// How long the page takes to slide the banner error region into view.
pub const ERROR_BANNER_REVEAL: Duration = Duration::from_millis(500);

/// Everything the hosting page injects into the modal controller: the two
/// endpoint URLs and the functional-object prefix that scopes the hidden
/// record-id field on pages hosting several record types.
#[derive(Debug, Clone)]
pub struct ModalConfig {
    pub change_workspace_url: String,
    pub assign_workspace_url: String,
    pub functional_object: String,
}

/// One row in the record list. The page stores the record's identifier in a
/// custom attribute, so it arrives here as an uninterpreted string.
#[derive(Debug, Clone)]
pub struct RecordRow {
    pub object_id: String,
}

/// A request that did not produce a usable response. Carries the text shown
/// to the user: the raw response body when the server answered with an error
/// status, otherwise the transport or decode error rendered as text.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct RequestFailure(pub String);

/// The page operations the controller drives. Implementations bind these to
/// whatever DOM or view layer hosts the modal; the fake in the test suite
/// journals them instead.
pub trait PageSurface: Send + Sync {
    fn show_modal(&self);
    /// Sets the hidden record-id field whose class is derived from the
    /// functional-object prefix.
    fn set_record_field(&self, functional_object: &str, value: &str);
    /// Identifier of the currently selected document, page-global.
    fn selected_document(&self) -> String;
    /// Raw value of the workspace dropdown, whitespace and all.
    fn selected_workspace(&self) -> String;
    fn replace_form_fragment(&self, html: &str);
    fn set_error_text(&self, text: &str);
    /// Animates the banner error region into view over `duration`.
    fn reveal_error_banner(&self, duration: Duration);
    fn hide_error_banner(&self);
    fn reload(&self);
}

#[derive(Clone)]
pub struct AssignWorkspaceModal {
    http: Client,
    config: ModalConfig,
    page: Arc<dyn PageSurface>,
}

impl AssignWorkspaceModal {
    pub fn new(config: ModalConfig, page: Arc<dyn PageSurface>) -> Self {
        Self {
            http: Client::new(),
            config,
            page,
        }
    }

    /// Trigger flow: the dialog opens and the hidden record field is seeded
    /// immediately, then the form fragment is fetched for the currently
    /// selected document. A failure leaves the previous fragment in place and
    /// surfaces the error in the banner.
    pub async fn open_for_record(&self, row: &RecordRow) {
        self.page.show_modal();
        self.page
            .set_record_field(&self.config.functional_object, &row.object_id);

        let document_id = self.page.selected_document();
        match self.fetch_change_workspace_form(document_id).await {
            Ok(form) => {
                self.page.hide_error_banner();
                self.page.replace_form_fragment(&form);
                debug!("assignment form refreshed");
            }
            Err(failure) => self.display_failure(&failure),
        }
    }

    /// Confirm flow: submits the trimmed workspace selection together with
    /// the selected document, then reloads the page so the listing reflects
    /// the new assignment.
    pub async fn confirm_assignment(&self) {
        let workspace_id = self.page.selected_workspace().trim().to_string();
        let document_id = self.page.selected_document();
        match self.submit_assignment(workspace_id, document_id).await {
            Ok(()) => self.page.reload(),
            Err(failure) => self.display_failure(&failure),
        }
    }

    async fn fetch_change_workspace_form(
        &self,
        document_id: String,
    ) -> Result<String, RequestFailure> {
        let response = self
            .http
            .post(&self.config.change_workspace_url)
            .json(&ChangeWorkspaceFormRequest { document_id })
            .send()
            .await
            .map_err(|e| RequestFailure(e.to_string()))?;
        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| RequestFailure(e.to_string()))?;
            return Err(RequestFailure(body));
        }
        let payload: FormFragmentResponse = response
            .json()
            .await
            .map_err(|e| RequestFailure(e.to_string()))?;
        Ok(payload.form)
    }

    async fn submit_assignment(
        &self,
        workspace_id: String,
        document_id: String,
    ) -> Result<(), RequestFailure> {
        let response = self
            .http
            .post(&self.config.assign_workspace_url)
            .json(&AssignWorkspaceRequest {
                workspace_id,
                document_id,
            })
            .send()
            .await
            .map_err(|e| RequestFailure(e.to_string()))?;
        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| RequestFailure(e.to_string()))?;
            return Err(RequestFailure(body));
        }
        Ok(())
    }

    fn display_failure(&self, failure: &RequestFailure) {
        warn!("assignment request failed: {failure}");
        self.page.set_error_text(&failure.0);
        self.page.reveal_error_banner(ERROR_BANNER_REVEAL);
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
