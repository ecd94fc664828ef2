//! Platform seam: the orchestrator and sweeper talk to Dokploy through this
//! trait so tests can inject an in-memory platform.

use async_trait::async_trait;
use dokploy::{
    Compose, CreateCompose, CreateDomain, CreateProject, Deployment, DokployClient, Domain,
    FileContent, FileInfo, GenerateDomain, GeneratedDomain, Project, Result, Server, UpdateCompose,
    WriteFile,
};

#[async_trait]
pub trait Platform: Send + Sync {
    async fn project_all(&self, request_id: Option<&str>) -> Result<Vec<Project>>;
    async fn project_create(
        &self,
        input: CreateProject,
        request_id: Option<&str>,
    ) -> Result<Project>;
    async fn project_one(&self, project_id: &str, request_id: Option<&str>) -> Result<Project>;

    async fn compose_create(
        &self,
        input: CreateCompose,
        request_id: Option<&str>,
    ) -> Result<Compose>;
    async fn compose_one(&self, compose_id: &str, request_id: Option<&str>) -> Result<Compose>;
    async fn compose_update(&self, input: UpdateCompose, request_id: Option<&str>) -> Result<()>;
    async fn compose_delete(
        &self,
        compose_id: &str,
        delete_volumes: bool,
        request_id: Option<&str>,
    ) -> Result<()>;
    async fn compose_deploy(&self, compose_id: &str, request_id: Option<&str>) -> Result<()>;
    async fn compose_redeploy(&self, compose_id: &str, request_id: Option<&str>) -> Result<()>;

    async fn deployments_by_compose(
        &self,
        compose_id: &str,
        request_id: Option<&str>,
    ) -> Result<Vec<Deployment>>;

    async fn domains_by_compose(
        &self,
        compose_id: &str,
        request_id: Option<&str>,
    ) -> Result<Vec<Domain>>;
    async fn domain_generate(
        &self,
        input: GenerateDomain,
        request_id: Option<&str>,
    ) -> Result<GeneratedDomain>;
    async fn domain_create(&self, input: CreateDomain, request_id: Option<&str>) -> Result<Domain>;

    async fn server_all(&self, request_id: Option<&str>) -> Result<Vec<Server>>;

    async fn file_list(
        &self,
        compose_id: &str,
        path: &str,
        request_id: Option<&str>,
    ) -> Result<Vec<FileInfo>>;
    async fn file_read(
        &self,
        compose_id: &str,
        path: &str,
        request_id: Option<&str>,
    ) -> Result<FileContent>;
    async fn file_write(&self, input: WriteFile, request_id: Option<&str>) -> Result<()>;
    async fn file_mkdir(
        &self,
        compose_id: &str,
        path: &str,
        request_id: Option<&str>,
    ) -> Result<()>;
    async fn file_delete(
        &self,
        compose_id: &str,
        path: &str,
        recursive: bool,
        request_id: Option<&str>,
    ) -> Result<()>;
    async fn file_search(
        &self,
        compose_id: &str,
        query: &str,
        path: Option<&str>,
        request_id: Option<&str>,
    ) -> Result<Vec<FileInfo>>;
}

#[async_trait]
impl Platform for DokployClient {
    async fn project_all(&self, request_id: Option<&str>) -> Result<Vec<Project>> {
        DokployClient::project_all(self, request_id).await
    }

    async fn project_create(
        &self,
        input: CreateProject,
        request_id: Option<&str>,
    ) -> Result<Project> {
        DokployClient::project_create(self, input, request_id).await
    }

    async fn project_one(&self, project_id: &str, request_id: Option<&str>) -> Result<Project> {
        DokployClient::project_one(self, project_id, request_id).await
    }

    async fn compose_create(
        &self,
        input: CreateCompose,
        request_id: Option<&str>,
    ) -> Result<Compose> {
        DokployClient::compose_create(self, input, request_id).await
    }

    async fn compose_one(&self, compose_id: &str, request_id: Option<&str>) -> Result<Compose> {
        DokployClient::compose_one(self, compose_id, request_id).await
    }

    async fn compose_update(&self, input: UpdateCompose, request_id: Option<&str>) -> Result<()> {
        DokployClient::compose_update(self, input, request_id).await
    }

    async fn compose_delete(
        &self,
        compose_id: &str,
        delete_volumes: bool,
        request_id: Option<&str>,
    ) -> Result<()> {
        DokployClient::compose_delete(self, compose_id, delete_volumes, request_id).await
    }

    async fn compose_deploy(&self, compose_id: &str, request_id: Option<&str>) -> Result<()> {
        DokployClient::compose_deploy(self, compose_id, request_id).await
    }

    async fn compose_redeploy(&self, compose_id: &str, request_id: Option<&str>) -> Result<()> {
        DokployClient::compose_redeploy(self, compose_id, request_id).await
    }

    async fn deployments_by_compose(
        &self,
        compose_id: &str,
        request_id: Option<&str>,
    ) -> Result<Vec<Deployment>> {
        DokployClient::deployments_by_compose(self, compose_id, request_id).await
    }

    async fn domains_by_compose(
        &self,
        compose_id: &str,
        request_id: Option<&str>,
    ) -> Result<Vec<Domain>> {
        DokployClient::domains_by_compose(self, compose_id, request_id).await
    }

    async fn domain_generate(
        &self,
        input: GenerateDomain,
        request_id: Option<&str>,
    ) -> Result<GeneratedDomain> {
        DokployClient::domain_generate(self, input, request_id).await
    }

    async fn domain_create(&self, input: CreateDomain, request_id: Option<&str>) -> Result<Domain> {
        DokployClient::domain_create(self, input, request_id).await
    }

    async fn server_all(&self, request_id: Option<&str>) -> Result<Vec<Server>> {
        DokployClient::server_all(self, request_id).await
    }

    async fn file_list(
        &self,
        compose_id: &str,
        path: &str,
        request_id: Option<&str>,
    ) -> Result<Vec<FileInfo>> {
        DokployClient::file_list(self, compose_id, path, request_id).await
    }

    async fn file_read(
        &self,
        compose_id: &str,
        path: &str,
        request_id: Option<&str>,
    ) -> Result<FileContent> {
        DokployClient::file_read(self, compose_id, path, request_id).await
    }

    async fn file_write(&self, input: WriteFile, request_id: Option<&str>) -> Result<()> {
        DokployClient::file_write(self, input, request_id).await
    }

    async fn file_mkdir(
        &self,
        compose_id: &str,
        path: &str,
        request_id: Option<&str>,
    ) -> Result<()> {
        DokployClient::file_mkdir(self, compose_id, path, request_id).await
    }

    async fn file_delete(
        &self,
        compose_id: &str,
        path: &str,
        recursive: bool,
        request_id: Option<&str>,
    ) -> Result<()> {
        DokployClient::file_delete(self, compose_id, path, recursive, request_id).await
    }

    async fn file_search(
        &self,
        compose_id: &str,
        query: &str,
        path: Option<&str>,
        request_id: Option<&str>,
    ) -> Result<Vec<FileInfo>> {
        DokployClient::file_search(self, compose_id, query, path, request_id).await
    }
}
