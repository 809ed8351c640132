//! Meilisearch backend over its HTTP API.

use async_trait::async_trait;
use fsindex_core::{
    DocumentsPage, DocumentsQuery, Fields, IndexBackend, IndexError, IndexStats, TaskDetails,
    TaskInfo, TaskStatus, ID_FIELD,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Connection settings for [`MeiliBackend`].
#[derive(Debug, Clone)]
pub struct MeiliConfig {
    /// Base URL, e.g. `http://meilisearch:7700`
    pub host: String,
    pub api_key: Option<String>,
    pub index_name: String,
    pub request_timeout: Duration,
}

/// [`IndexBackend`] talking to a Meilisearch server.
#[derive(Clone)]
pub struct MeiliBackend {
    client: Client,
    host: String,
    api_key: Option<String>,
    index_name: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    code: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateIndexBody<'a> {
    uid: &'a str,
    primary_key: &'a str,
}

#[derive(Debug, Serialize)]
struct FetchBody<'a> {
    offset: usize,
    limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<&'a [String]>,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    results: Vec<Fields>,
    total: u64,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    uid: u64,
    status: TaskStatus,
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    number_of_documents: u64,
    is_indexing: bool,
}

impl MeiliBackend {
    /// Build a backend from connection settings.
    pub fn new(config: MeiliConfig) -> Result<Self, IndexError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| IndexError::Request(e.to_string()))?;

        Ok(Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            api_key: config.api_key.filter(|key| !key.is_empty()),
            index_name: config.index_name,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }

    fn index_url(&self, path: &str) -> String {
        self.url(&format!("/indexes/{}{}", self.index_name, path))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, IndexError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| IndexError::Request(e.to_string()))?;
        self.handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: Response) -> Result<T, IndexError> {
        let status = response.status();

        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                warn!("Failed to parse Meilisearch response: {}", e);
                IndexError::Decode(e.to_string())
            });
        }

        let body = response.text().await.unwrap_or_default();
        Err(error_from_body(&self.index_name, status, &body))
    }
}

/// Map a non-success response onto [`IndexError`].
fn error_from_body(index_name: &str, status: StatusCode, body: &str) -> IndexError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(error) if error.code.as_deref() == Some("index_not_found") => {
            IndexError::IndexNotFound(index_name.to_string())
        }
        Ok(error) => IndexError::Http {
            status: status.as_u16(),
            code: error.code,
            message: error.message,
        },
        Err(_) => IndexError::Http {
            status: status.as_u16(),
            code: None,
            message: if body.is_empty() {
                status.to_string()
            } else {
                body.to_string()
            },
        },
    }
}

#[async_trait]
impl IndexBackend for MeiliBackend {
    fn index_name(&self) -> &str {
        &self.index_name
    }

    async fn index_exists(&self) -> Result<bool, IndexError> {
        let request = self.client.get(self.index_url(""));
        match self.send::<serde_json::Value>(request).await {
            Ok(_) => Ok(true),
            Err(IndexError::IndexNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_index(&self, primary_key: &str) -> Result<TaskInfo, IndexError> {
        debug!("Creating index {} with primary key {}", self.index_name, primary_key);
        let body = CreateIndexBody {
            uid: &self.index_name,
            primary_key,
        };
        self.send(self.client.post(self.url("/indexes")).json(&body))
            .await
    }

    async fn set_filterable_attributes(
        &self,
        attributes: &[String],
    ) -> Result<TaskInfo, IndexError> {
        let url = self.index_url("/settings/filterable-attributes");
        self.send(self.client.put(url).json(attributes)).await
    }

    async fn set_sortable_attributes(&self, attributes: &[String]) -> Result<TaskInfo, IndexError> {
        let url = self.index_url("/settings/sortable-attributes");
        self.send(self.client.put(url).json(attributes)).await
    }

    async fn get_documents(&self, query: &DocumentsQuery) -> Result<DocumentsPage, IndexError> {
        let body = FetchBody {
            offset: query.offset,
            limit: query.limit,
            filter: query.filter.as_ref().map(ToString::to_string),
            fields: query.fields.as_deref(),
        };
        let url = self.index_url("/documents/fetch");
        let response: FetchResponse = self.send(self.client.post(url).json(&body)).await?;
        Ok(DocumentsPage {
            results: response.results,
            total: response.total,
        })
    }

    async fn update_documents(&self, documents: &[Fields]) -> Result<TaskInfo, IndexError> {
        let url = self.index_url("/documents");
        let request = self
            .client
            .put(url)
            .query(&[("primaryKey", ID_FIELD)])
            .json(documents);
        self.send(request).await
    }

    async fn delete_documents(&self, ids: &[String]) -> Result<TaskInfo, IndexError> {
        let url = self.index_url("/documents/delete-batch");
        self.send(self.client.post(url).json(ids)).await
    }

    async fn get_task(&self, task_uid: u64) -> Result<TaskDetails, IndexError> {
        let url = self.url(&format!("/tasks/{task_uid}"));
        let task: TaskResponse = self.send(self.client.get(url)).await?;
        Ok(TaskDetails {
            uid: task.uid,
            status: task.status,
            error: task.error.map(|e| e.message),
        })
    }

    async fn stats(&self) -> Result<IndexStats, IndexError> {
        let stats: StatsResponse = self.send(self.client.get(self.index_url("/stats"))).await?;
        Ok(IndexStats {
            number_of_documents: stats.number_of_documents,
            is_indexing: stats.is_indexing,
        })
    }
}
