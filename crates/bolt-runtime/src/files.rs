//! Token-scoped file operations against the session workspace.
//!
//! Paths cross the [`crate::paths`] boundary in both directions: requests
//! arrive as virtual paths and results go back out as virtual paths. The
//! compose id always comes from the verified token.

use crate::error::Result;
use crate::orchestrator::SessionOrchestrator;
use crate::paths;
use dokploy::{FileContent, FileEncoding, FileInfo, FileKind, WriteFile};
use serde::Serialize;

/// A directory entry with both path forms.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntryView {
    pub name: String,
    pub virtual_path: String,
    pub platform_path: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
}

/// A file read result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReadView {
    pub name: String,
    pub virtual_path: String,
    pub platform_path: String,
    pub content: String,
    pub encoding: FileEncoding,
    pub is_binary: bool,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
}

/// Outcome of a write, noting whether it queued a redeploy.
#[derive(Debug, Clone, Copy)]
pub struct WriteOutcome {
    pub redeployed: bool,
}

fn entry_view(info: FileInfo) -> Result<FileEntryView> {
    let virtual_path = paths::to_virtual_path(&info.path)?;
    Ok(FileEntryView {
        name: info.name,
        virtual_path,
        platform_path: info.path,
        kind: info.kind,
        size: info.size,
        modified_at: info.modified_at,
    })
}

fn read_view(content: FileContent) -> Result<FileReadView> {
    let virtual_path = paths::to_virtual_path(&content.path)?;
    Ok(FileReadView {
        name: content.name,
        virtual_path,
        platform_path: content.path,
        content: content.content,
        encoding: content.encoding,
        is_binary: content.is_binary,
        size: content.size,
        modified_at: content.modified_at,
    })
}

impl SessionOrchestrator {
    pub async fn list_files(
        &self,
        token: &str,
        virtual_path: Option<&str>,
        request_id: Option<&str>,
    ) -> Result<Vec<FileEntryView>> {
        let claims = self.with_claims(token)?;
        let platform_path =
            paths::to_platform_path(virtual_path.unwrap_or(paths::VIRTUAL_WORKDIR))?;
        let entries = self
            .platform()
            .file_list(&claims.compose_id, &platform_path, request_id)
            .await?;
        entries.into_iter().map(entry_view).collect()
    }

    pub async fn read_file(
        &self,
        token: &str,
        virtual_path: &str,
        request_id: Option<&str>,
    ) -> Result<FileReadView> {
        let claims = self.with_claims(token)?;
        let platform_path = paths::to_platform_path(virtual_path)?;
        let content = self
            .platform()
            .file_read(&claims.compose_id, &platform_path, request_id)
            .await?;
        read_view(content)
    }

    /// Write a file. Writes to a dependency manifest at the workdir root
    /// queue a redeploy before returning.
    pub async fn write_file(
        &self,
        token: &str,
        virtual_path: &str,
        content: String,
        encoding: FileEncoding,
        request_id: Option<&str>,
    ) -> Result<WriteOutcome> {
        let claims = self.with_claims(token)?;
        let platform_path = paths::to_platform_path(virtual_path)?;
        self.platform()
            .file_write(
                WriteFile {
                    compose_id: claims.compose_id.clone(),
                    path: platform_path,
                    content,
                    encoding,
                    overwrite: true,
                },
                request_id,
            )
            .await?;

        if paths::is_redeploy_trigger_path(virtual_path) {
            self.platform()
                .compose_redeploy(&claims.compose_id, request_id)
                .await?;
            return Ok(WriteOutcome { redeployed: true });
        }
        Ok(WriteOutcome { redeployed: false })
    }

    pub async fn make_directory(
        &self,
        token: &str,
        virtual_path: &str,
        request_id: Option<&str>,
    ) -> Result<()> {
        let claims = self.with_claims(token)?;
        let platform_path = paths::to_platform_path(virtual_path)?;
        self.platform()
            .file_mkdir(&claims.compose_id, &platform_path, request_id)
            .await?;
        Ok(())
    }

    pub async fn delete_entry(
        &self,
        token: &str,
        virtual_path: &str,
        recursive: bool,
        request_id: Option<&str>,
    ) -> Result<()> {
        let claims = self.with_claims(token)?;
        let platform_path = paths::to_platform_path(virtual_path)?;
        self.platform()
            .file_delete(&claims.compose_id, &platform_path, recursive, request_id)
            .await?;
        Ok(())
    }

    pub async fn search_files(
        &self,
        token: &str,
        query: &str,
        virtual_path: Option<&str>,
        request_id: Option<&str>,
    ) -> Result<Vec<FileEntryView>> {
        let claims = self.with_claims(token)?;
        let platform_path = match virtual_path {
            Some(path) => Some(paths::to_platform_path(path)?),
            None => None,
        };
        let entries = self
            .platform()
            .file_search(
                &claims.compose_id,
                query,
                platform_path.as_deref(),
                request_id,
            )
            .await?;
        entries.into_iter().map(entry_view).collect()
    }
}
