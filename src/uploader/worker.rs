use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use super::client::UploadClient;
use super::errors::{Result, UploaderError};
use super::types::{FileId, OutgoingFile, ProgressCallback, ProgressEvent, WidgetId, WorkerEvent};

/// Runs one upload request and reports back to the manager worker.
pub(crate) struct UploadWorker {
    pub(crate) client: Arc<dyn UploadClient>,
    pub(crate) widget_id: WidgetId,
    pub(crate) cancellation_token: CancellationToken,
    pub(crate) event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl UploadWorker {
    pub(crate) async fn run(self, file: OutgoingFile) {
        let file_id = file.id.clone();
        let result = self.upload(file).await;

        let _ = self.event_tx.send(WorkerEvent::UploadFinished { file_id, result });
    }

    async fn upload(&self, file: OutgoingFile) -> Result<()> {
        let on_progress: ProgressCallback = {
            let event_tx = self.event_tx.clone();
            let file_id = file.id.clone();
            Arc::new(move |progress: ProgressEvent| {
                let _ = event_tx.send(WorkerEvent::Progress { file_id: file_id.clone(), progress });
            })
        };

        let future = self.client.upload_files(
            &self.widget_id,
            vec![file],
            on_progress,
            self.cancellation_token.clone(),
        );

        // 取消优先
        tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => Err(UploaderError::Cancelled),
            result = future => result,
        }
    }
}

/// Runs one remote delete and reports back to the manager worker.
pub(crate) async fn run_delete(
    client: Arc<dyn UploadClient>,
    widget_id: WidgetId,
    file_id: FileId,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
) {
    let result = client.delete(&widget_id, &file_id).await;
    let _ = event_tx.send(WorkerEvent::DeleteFinished { file_id, result });
}
