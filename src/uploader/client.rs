use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;
use crate::config::ClientConfig;
use super::errors::{Result, UploaderError};
use super::metadata::Metadata;
use super::progress_stream::{chunked, ProgressStream};
use super::types::{FileId, OutgoingFile, ProgressCallback, WidgetId};

const UPLOAD_PATH: &str = "upload_file";

/// Transport used by the manager. Implementations must report progress through
/// `on_progress` and give up with [`UploaderError::Cancelled`] once `cancel` fires.
#[async_trait]
pub trait UploadClient: Send + Sync {
    async fn upload_files(
        &self,
        widget_id: &WidgetId,
        files: Vec<OutgoingFile>,
        on_progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<()>;

    async fn delete(&self, widget_id: &WidgetId, file_id: &FileId) -> Result<()>;
}

/// Plain HTTP transport: one `POST` per file, `DELETE` to remove it again.
#[derive(Debug, Clone)]
pub struct HttpUploadClient {
    client: Client,
    endpoint: Url,
}

impl HttpUploadClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()?;

        let mut endpoint = config.endpoint_url()?;
        // join() 需要以 / 结尾
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        Ok(Self { client, endpoint })
    }

    pub fn file_url(&self, widget_id: &WidgetId, file_id: &FileId) -> Result<Url> {
        let mut url = self.endpoint.join(UPLOAD_PATH)?;
        url.path_segments_mut()
            .map_err(|_| UploaderError::InvalidConfig(format!("endpoint cannot be a base: {}", self.endpoint)))?
            .push(widget_id.as_str())
            .push(file_id.as_str());
        Ok(url)
    }

    fn create_headers(file: &OutgoingFile) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let metadata = Metadata::for_file(&file.descriptor).with("fileId", file.id.as_str());
        headers.insert("Upload-Metadata", HeaderValue::from_str(&metadata.to_header())?);

        let content_type = if file.descriptor.mime_type.is_empty() {
            HeaderValue::from_static("application/octet-stream")
        } else {
            HeaderValue::from_str(&file.descriptor.mime_type)?
        };
        headers.insert(CONTENT_TYPE, content_type);

        Ok(headers)
    }
}

#[async_trait]
impl UploadClient for HttpUploadClient {
    async fn upload_files(
        &self,
        widget_id: &WidgetId,
        files: Vec<OutgoingFile>,
        on_progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<()> {
        let total: u64 = files.iter().map(|file| file.descriptor.size).sum();
        let mut loaded = 0;

        for file in files {
            if cancel.is_cancelled() {
                return Err(UploaderError::Cancelled);
            }

            let url = self.file_url(widget_id, &file.id)?;
            let headers = Self::create_headers(&file)?;
            let size = file.descriptor.size;
            let stream = ProgressStream::new(
                chunked(file.descriptor.data.clone()),
                on_progress.clone(),
                loaded,
                total,
            );

            debug!(file_id = %file.id, %url, size, "Sending file");
            let request = self.client
                .post(url)
                .headers(headers)
                .body(reqwest::Body::wrap_stream(stream))
                .send();

            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(UploaderError::Cancelled),
                response = request => response?,
            };

            let status = response.status();
            if !status.is_success() {
                return Err(UploaderError::server_error(
                    status.as_u16(),
                    format!("Upload failed with status {}", status),
                ));
            }

            loaded += size;
        }

        Ok(())
    }

    async fn delete(&self, widget_id: &WidgetId, file_id: &FileId) -> Result<()> {
        let url = self.file_url(widget_id, file_id)?;
        let response = self.client.delete(url).send().await?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(UploaderError::server_error(status.as_u16(), "Failed to delete file"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::types::FileDescriptor;

    fn client(endpoint: &str) -> HttpUploadClient {
        HttpUploadClient::new(&ClientConfig {
            endpoint: endpoint.to_string(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_file_url() {
        let widget_id = WidgetId::new("uploader-1");
        let file_id = FileId::from("0-1700000000000");

        let url = client("http://localhost:8501").file_url(&widget_id, &file_id).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8501/upload_file/uploader-1/0-1700000000000");

        let url = client("http://localhost:8501/api").file_url(&widget_id, &file_id).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8501/api/upload_file/uploader-1/0-1700000000000");
    }

    #[test]
    fn test_file_url_escapes_segments() {
        let url = client("https://example.com/")
            .file_url(&WidgetId::new("a/b"), &FileId::from("1 2"))
            .unwrap();
        assert_eq!(url.as_str(), "https://example.com/upload_file/a%2Fb/1%202");
    }

    #[test]
    fn test_headers() {
        let file = OutgoingFile {
            id: FileId::from("7"),
            descriptor: FileDescriptor::new("a.csv", "text/csv", &b"1,2"[..]),
        };
        let headers = HttpUploadClient::create_headers(&file).unwrap();
        assert_eq!(headers[CONTENT_TYPE], "text/csv");
        assert!(headers["Upload-Metadata"].to_str().unwrap().starts_with("filename "));

        let file = OutgoingFile {
            id: FileId::from("8"),
            descriptor: FileDescriptor::new("blob", "", &b""[..]),
        };
        let headers = HttpUploadClient::create_headers(&file).unwrap();
        assert_eq!(headers[CONTENT_TYPE], "application/octet-stream");
    }
}
