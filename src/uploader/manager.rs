use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use crate::config::{Config, SessionConfig};
use super::client::UploadClient;
use super::errors::{Result, UploaderError};
use super::manager_worker::UploadManagerWorker;
use super::session::UploadSession;
use super::types::{
    FileDescriptor, FileId, ManagerCommand, RejectedFile, ResetPolicy, SessionSnapshot,
    TransferErrorPolicy, UploadEvent, WidgetId,
};

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub widget_id: WidgetId,
    pub session: SessionConfig,
    pub transfer_error_policy: TransferErrorPolicy,
    pub reset_policy: ResetPolicy,
}

impl ManagerOptions {
    pub fn new(widget_id: WidgetId, session: SessionConfig) -> Self {
        Self {
            widget_id,
            session,
            transfer_error_policy: TransferErrorPolicy::default(),
            reset_policy: ResetPolicy::default(),
        }
    }

    pub fn from_config(widget_id: WidgetId, config: &Config) -> Self {
        Self {
            widget_id,
            session: config.session.clone(),
            transfer_error_policy: config.manager.transfer_error_policy,
            reset_policy: config.manager.reset_policy,
        }
    }

    pub fn transfer_error_policy(mut self, policy: TransferErrorPolicy) -> Self {
        self.transfer_error_policy = policy;
        self
    }

    pub fn reset_policy(mut self, policy: ResetPolicy) -> Self {
        self.reset_policy = policy;
        self
    }
}

/// Cheap, cloneable front of one upload session.
#[derive(Clone)]
pub struct UploadManager {
    command_tx: mpsc::Sender<ManagerCommand>,
    event_tx: broadcast::Sender<UploadEvent>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
}

/// 上传管理器句柄 - 包含管理器和工作线程
pub struct UploadManagerHandle {
    pub manager: UploadManager,
    pub worker_handle: JoinHandle<()>,
}

impl UploadManagerHandle {
    /// Stops the worker once every clone of the manager is gone. Uploads still
    /// running at that point are cancelled.
    pub async fn shutdown(self) -> Result<()> {
        drop(self.manager);
        self.worker_handle.await
            .map_err(|err| UploaderError::internal_error(format!("Worker panic: {}", err)))
    }
}

impl UploadManager {
    pub fn new(client: Arc<dyn UploadClient>, options: ManagerOptions) -> UploadManagerHandle {
        let (command_tx, command_rx) = mpsc::channel(100);
        // 最大缓存 256 个事件
        let (event_tx, _) = broadcast::channel(256);

        let session = UploadSession::new(options.widget_id, options.session)
            .with_policies(options.transfer_error_policy, options.reset_policy);
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());

        let worker_handle = tokio::spawn(UploadManagerWorker::run(
            session,
            client,
            command_rx,
            event_tx.clone(),
            snapshot_tx,
        ));

        let manager = Self {
            command_tx,
            event_tx,
            snapshot_rx,
        };

        UploadManagerHandle {
            manager,
            worker_handle,
        }
    }

    async fn request<T>(&self, command: ManagerCommand, reply_rx: oneshot::Receiver<T>) -> Result<T> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| UploaderError::ManagerShutdown)?;

        reply_rx
            .await
            .map_err(|_| UploaderError::ManagerShutdown)
    }

    /// Update widget settings
    pub async fn configure(&self, config: SessionConfig) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.request(ManagerCommand::Configure { config, reply }, reply_rx).await
    }

    /// Hand over a drop. Returns the new file ids in list order.
    pub async fn drop_files(&self, accepted: Vec<FileDescriptor>, rejected: Vec<RejectedFile>) -> Result<Vec<FileId>> {
        let (reply, reply_rx) = oneshot::channel();
        self.request(ManagerCommand::Drop { accepted, rejected, reply }, reply_rx).await
    }

    /// Start deleting a file. Resolves once the delete is issued, not when the
    /// file leaves the list.
    pub async fn delete(&self, file_id: FileId) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.request(ManagerCommand::Delete { file_id, reply }, reply_rx).await?
    }

    /// Clear every file
    pub async fn reset(&self) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.request(ManagerCommand::Reset { reply }, reply_rx).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (reply, reply_rx) = oneshot::channel();
        self.request(ManagerCommand::GetSnapshot { reply }, reply_rx).await
    }

    /// Latest published snapshot, without a round trip to the worker.
    pub fn current_snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// A new snapshot is published after every change.
    pub fn subscribe_snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Waits until a published snapshot satisfies `predicate`.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<SessionSnapshot>
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        let mut snapshot_rx = self.snapshot_rx.clone();
        let snapshot = snapshot_rx
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .map_err(|_| UploaderError::ManagerShutdown)?;
        Ok(snapshot.clone())
    }

    /// 订阅事件
    ///
    /// 注意：
    /// - 如果接收速度跟不上发送速度，可能会丢失事件（lagged error）
    /// - 每个订阅者都会收到完整的事件副本
    pub fn subscribe_events(&self) -> broadcast::Receiver<UploadEvent> {
        self.event_tx.subscribe()
    }

    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredEventReceiver<F> {
        FilteredEventReceiver {
            receiver: self.event_tx.subscribe(),
            filter
        }
    }
}

/// 过滤的事件接收器
pub struct FilteredEventReceiver<F> {
    receiver: broadcast::Receiver<UploadEvent>,
    filter: F,
}

impl<F> FilteredEventReceiver<F>
where
    F: Fn(&UploadEvent) -> bool,
{
    pub async fn recv(&mut self) -> Result<UploadEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if (self.filter)(&event) {
                return Ok(event);
            }
        }
    }
}
