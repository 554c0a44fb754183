//! CouchDB document store.
//!
//! Documents live at `{url}/{database}/{id}`. CouchDB's own `_rev` is the
//! revision token: a `PUT` carrying a stale `_rev` answers 409, which is
//! reported as [`StoreError::Conflict`].

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value};

use dicom_sink_core::store::{DocumentStore, StoreError, StoreResult};

use crate::config::CouchDbConfig;

pub struct CouchDocumentStore {
    client: Client,
    base: Url,
    database: String,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
struct RevisionOnly {
    #[serde(rename = "_rev")]
    rev: String,
}

#[derive(Deserialize)]
struct WriteResponse {
    rev: String,
}

impl CouchDocumentStore {
    pub fn from_config(config: &CouchDbConfig) -> Result<Self> {
        let base = Url::parse(&config.url)
            .with_context(|| format!("Invalid couchdb.url: {}", config.url))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base,
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn url(&self, id: Option<&str>) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow!("couchdb.url cannot be a base URL: {}", self.base))?;
            segments.pop_if_empty().push(&self.database);
            if let Some(id) = id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(user) => request.basic_auth(user, self.password.as_ref()),
            None => request,
        }
    }

    /// Create the database if it does not exist yet.
    pub async fn ensure_database(&self) -> Result<()> {
        let url = self.url(None)?;
        let resp = self
            .authorized(self.client.put(url.clone()))
            .send()
            .await
            .map_err(|e| anyhow!("Failed to reach CouchDB at {}: {}", url, e))?;

        match resp.status() {
            StatusCode::CREATED | StatusCode::ACCEPTED => {
                tracing::info!(database = %self.database, "created CouchDB database");
                Ok(())
            }
            StatusCode::PRECONDITION_FAILED => Ok(()),
            status => {
                let body = resp.text().await.unwrap_or_default();
                bail!(
                    "CouchDB database creation failed (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                );
            }
        }
    }

    async fn put(&self, id: &str, body: &Map<String, Value>) -> StoreResult<String> {
        let url = self.url(Some(id))?;
        let resp = self
            .authorized(self.client.put(url).json(body))
            .send()
            .await
            .map_err(|e| anyhow!("Failed to write document {}: {}", id, e))?;

        match resp.status() {
            StatusCode::CONFLICT => Err(StoreError::Conflict { id: id.to_string() }),
            status if status.is_success() => {
                let written: WriteResponse = resp
                    .json()
                    .await
                    .map_err(|e| anyhow!("Invalid CouchDB write response for {}: {}", id, e))?;
                Ok(written.rev)
            }
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(anyhow!(
                    "CouchDB PUT {} failed (HTTP {}): {}",
                    id,
                    status,
                    body.chars().take(500).collect::<String>()
                )
                .into())
            }
        }
    }
}

#[async_trait]
impl DocumentStore for CouchDocumentStore {
    async fn fetch_revision(&self, id: &str) -> StoreResult<Option<String>> {
        let url = self.url(Some(id))?;
        let resp = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| anyhow!("Failed to fetch document {}: {}", id, e))?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let doc: RevisionOnly = resp
                    .json()
                    .await
                    .map_err(|e| anyhow!("Document {} has no _rev: {}", id, e))?;
                Ok(Some(doc.rev))
            }
            status => Err(anyhow!("CouchDB GET {} failed (HTTP {})", id, status).into()),
        }
    }

    async fn create_document(&self, id: &str, body: &Map<String, Value>) -> StoreResult<String> {
        self.put(id, body).await
    }

    async fn update_document(
        &self,
        id: &str,
        revision: &str,
        body: &Map<String, Value>,
    ) -> StoreResult<String> {
        let mut body = body.clone();
        body.insert("_rev".to_string(), Value::String(revision.to_string()));
        self.put(id, &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve one canned `(status line, body)` per connection and return the
    /// requests seen, as `(request line, body)`.
    async fn canned_server(
        responses: Vec<(&'static str, &'static str)>,
    ) -> (String, JoinHandle<Vec<(String, String)>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                seen.push(read_request(&mut socket).await);
                let reply = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
            seen
        });
        (url, handle)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> (String, String) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before headers");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let content_length = head
            .lines()
            .find_map(|l| {
                let (name, value) = l.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().unwrap())
            })
            .unwrap_or(0);
        while buf.len() < header_end + content_length {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before body");
            buf.extend_from_slice(&chunk[..n]);
        }
        let request_line = head.lines().next().unwrap_or_default().to_string();
        let body = String::from_utf8_lossy(&buf[header_end..header_end + content_length]).to_string();
        (request_line, body)
    }

    fn body() -> Map<String, Value> {
        json!({ "t00080060": "CT" }).as_object().unwrap().clone()
    }

    fn config(url: &str) -> CouchDbConfig {
        CouchDbConfig {
            url: url.to_string(),
            database: "dicom".to_string(),
            username: None,
            password: None,
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_document_url_escapes_id() {
        let store = CouchDocumentStore::from_config(&config("http://localhost:5984")).unwrap();
        assert_eq!(
            store.url(Some("1.2.3")).unwrap().as_str(),
            "http://localhost:5984/dicom/1.2.3"
        );
        assert_eq!(
            store.url(Some("a/b")).unwrap().as_str(),
            "http://localhost:5984/dicom/a%2Fb"
        );
    }

    #[test]
    fn test_database_url_with_trailing_slash_base() {
        let store = CouchDocumentStore::from_config(&config("http://db:5984/couch/")).unwrap();
        assert_eq!(store.url(None).unwrap().as_str(), "http://db:5984/couch/dicom");
    }

    #[tokio::test]
    async fn test_missing_document_has_no_revision() {
        let (url, server) =
            canned_server(vec![("404 Object Not Found", r#"{"error":"not_found"}"#)]).await;
        let store = CouchDocumentStore::from_config(&config(&url)).unwrap();

        assert_eq!(store.fetch_revision("1.2.3").await.unwrap(), None);
        let seen = server.await.unwrap();
        assert_eq!(seen[0].0, "GET /dicom/1.2.3 HTTP/1.1");
    }

    #[tokio::test]
    async fn test_existing_document_revision_is_read() {
        let (url, server) =
            canned_server(vec![("200 OK", r#"{"_id":"1.2.3","_rev":"4-abc","t00080060":"CT"}"#)])
                .await;
        let store = CouchDocumentStore::from_config(&config(&url)).unwrap();

        assert_eq!(
            store.fetch_revision("1.2.3").await.unwrap().as_deref(),
            Some("4-abc")
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_create_returns_new_revision() {
        let (url, server) =
            canned_server(vec![("201 Created", r#"{"ok":true,"id":"1.2.3","rev":"1-def"}"#)]).await;
        let store = CouchDocumentStore::from_config(&config(&url)).unwrap();

        let rev = store.create_document("1.2.3", &body()).await.unwrap();
        assert_eq!(rev, "1-def");

        let seen = server.await.unwrap();
        assert_eq!(seen[0].0, "PUT /dicom/1.2.3 HTTP/1.1");
        let sent: Value = serde_json::from_str(&seen[0].1).unwrap();
        assert_eq!(sent["t00080060"], "CT");
        assert!(sent.get("_rev").is_none());
    }

    #[tokio::test]
    async fn test_update_sends_revision_and_maps_conflict() {
        let (url, server) = canned_server(vec![(
            "409 Conflict",
            r#"{"error":"conflict","reason":"Document update conflict."}"#,
        )])
        .await;
        let store = CouchDocumentStore::from_config(&config(&url)).unwrap();

        let err = store
            .update_document("1.2.3", "1-def", &body())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { ref id } if id == "1.2.3"));

        let seen = server.await.unwrap();
        let sent: Value = serde_json::from_str(&seen[0].1).unwrap();
        assert_eq!(sent["_rev"], "1-def");
    }

    #[tokio::test]
    async fn test_server_error_is_backend_failure() {
        let (url, server) =
            canned_server(vec![("500 Internal Server Error", r#"{"error":"boom"}"#)]).await;
        let store = CouchDocumentStore::from_config(&config(&url)).unwrap();

        let err = store.fetch_revision("1.2.3").await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_database_accepts_existing() {
        let (url, server) = canned_server(vec![
            ("201 Created", r#"{"ok":true}"#),
            ("412 Precondition Failed", r#"{"error":"file_exists"}"#),
        ])
        .await;
        let store = CouchDocumentStore::from_config(&config(&url)).unwrap();

        store.ensure_database().await.unwrap();
        store.ensure_database().await.unwrap();
        let seen = server.await.unwrap();
        assert_eq!(seen[1].0, "PUT /dicom HTTP/1.1");
    }
}
