use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use super::client::UploadClient;
use super::session::{Effect, UploadSession};
use super::types::{FileId, ManagerCommand, SessionSnapshot, UploadEvent, WorkerEvent};
use super::worker::{run_delete, UploadWorker};

/// Owns the session. Commands and transfer results are applied one at a time,
/// in the order they arrive.
pub struct UploadManagerWorker {
    session: UploadSession,
    client: Arc<dyn UploadClient>,
    outstanding: HashMap<FileId, CancellationToken>,

    event_tx: broadcast::Sender<UploadEvent>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    worker_tx: mpsc::UnboundedSender<WorkerEvent>,
    worker_rx: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl UploadManagerWorker {
    pub(crate) async fn run(
        session: UploadSession,
        client: Arc<dyn UploadClient>,
        mut command_rx: mpsc::Receiver<ManagerCommand>,
        event_tx: broadcast::Sender<UploadEvent>,
        snapshot_tx: watch::Sender<SessionSnapshot>,
    ) {
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let mut worker = Self {
            session,
            client,
            outstanding: HashMap::new(),
            event_tx,
            snapshot_tx,
            worker_tx,
            worker_rx,
        };

        // 主事件循环
        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(command) => worker.handle_command(command),
                    None => break,
                },
                Some(event) = worker.worker_rx.recv() => {
                    worker.handle_worker_event(event);
                }
            }

            worker.publish();
        }

        worker.shutdown();
    }

    fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::Configure { config, reply } => {
                let effects = self.session.configure(config);
                self.apply(effects);
                let _ = reply.send(());
            }
            ManagerCommand::Drop { accepted, rejected, reply } => {
                debug!(accepted = accepted.len(), rejected = rejected.len(), "Files dropped");
                let (file_ids, effects) = self.session.on_drop(accepted, rejected);
                self.apply(effects);
                let _ = reply.send(file_ids);
            }
            ManagerCommand::Delete { file_id, reply } => {
                let result = self.session
                    .delete(&file_id)
                    .map(|effects| self.apply(effects));
                let _ = reply.send(result);
            }
            ManagerCommand::Reset { reply } => {
                let effects = self.session.reset();
                self.apply(effects);
                let _ = reply.send(());
            }
            ManagerCommand::GetSnapshot { reply } => {
                let _ = reply.send(self.session.snapshot());
            }
        }
    }

    fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Progress { file_id, progress } => {
                self.session.on_progress(&file_id, progress);
            }
            WorkerEvent::UploadFinished { file_id, result } => {
                self.outstanding.remove(&file_id);
                self.session.on_upload_finished(&file_id, result);
            }
            WorkerEvent::DeleteFinished { file_id, result } => {
                self.session.on_delete_finished(&file_id, result);
            }
        }
    }

    /// Effects run in the order given, so a cancel always fires before the
    /// delete that follows it is sent.
    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::StartUpload { file, token } => {
                    self.outstanding.insert(file.id.clone(), token.clone());
                    let worker = UploadWorker {
                        client: self.client.clone(),
                        widget_id: self.session.widget_id().clone(),
                        cancellation_token: token,
                        event_tx: self.worker_tx.clone(),
                    };
                    tokio::spawn(worker.run(file));
                }
                Effect::CancelUpload { file_id, token } => {
                    debug!(file_id = %file_id, "Cancelling upload");
                    token.cancel();
                    self.outstanding.remove(&file_id);
                }
                Effect::RemoteDelete { file_id } => {
                    debug!(file_id = %file_id, "Sending delete");
                    tokio::spawn(run_delete(
                        self.client.clone(),
                        self.session.widget_id().clone(),
                        file_id,
                        self.worker_tx.clone(),
                    ));
                }
            }
        }
    }

    fn publish(&mut self) {
        for event in self.session.take_events() {
            // 没有订阅者时忽略
            let _ = self.event_tx.send(event);
        }

        let snapshot = self.session.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }

    fn shutdown(&mut self) {
        info!(
            widget_id = %self.session.widget_id(),
            outstanding = self.outstanding.len(),
            "Upload manager shutting down"
        );
        for (_, token) in self.outstanding.drain() {
            token.cancel();
        }
    }
}
