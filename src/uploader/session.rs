use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use crate::config::SessionConfig;
use super::errors::{Result, UploaderError};
use super::rejection::{classify, RejectionCode};
use super::task::{DeleteStart, FileTask};
use super::types::{
    FileDescriptor, FileId, FileStatus, OutgoingFile, ProgressEvent, RejectedFile,
    ResetPolicy, SessionSnapshot, SessionStatus, TransferErrorPolicy, UploadEvent, WidgetId,
};

pub const FILE_NOT_FOUND_MESSAGE: &str = "File not found. Please try again.";
const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error";

/// Side effects a transition asks for, to be carried out in order.
#[derive(Debug)]
pub enum Effect {
    StartUpload {
        file: OutgoingFile,
        token: CancellationToken,
    },
    CancelUpload {
        file_id: FileId,
        token: CancellationToken,
    },
    RemoteDelete {
        file_id: FileId,
    },
}

/// The uploader's state: configuration plus the ordered task list.
///
/// Nothing here touches the network. Every operation returns the [`Effect`]s the caller
/// has to run and queues [`UploadEvent`]s, drained with [`UploadSession::take_events`].
pub struct UploadSession {
    widget_id: WidgetId,
    config: SessionConfig,
    max_size_bytes: u64,
    tasks: Vec<FileTask>,
    error_message: Option<String>,
    next_sequence: u64,
    transfer_error_policy: TransferErrorPolicy,
    reset_policy: ResetPolicy,
    events: Vec<UploadEvent>,
}

impl UploadSession {
    pub fn new(widget_id: WidgetId, config: SessionConfig) -> Self {
        Self {
            widget_id,
            max_size_bytes: config.max_size_bytes(),
            config,
            tasks: Vec::new(),
            error_message: None,
            next_sequence: 0,
            transfer_error_policy: TransferErrorPolicy::default(),
            reset_policy: ResetPolicy::default(),
            events: Vec::new(),
        }
    }

    pub fn with_policies(mut self, transfer_error_policy: TransferErrorPolicy, reset_policy: ResetPolicy) -> Self {
        self.transfer_error_policy = transfer_error_policy;
        self.reset_policy = reset_policy;
        self
    }

    pub fn widget_id(&self) -> &WidgetId {
        &self.widget_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    pub fn tasks(&self) -> &[FileTask] {
        &self.tasks
    }

    pub fn task(&self, file_id: &FileId) -> Option<&FileTask> {
        self.tasks.iter().find(|task| &task.id == file_id)
    }

    fn task_mut(&mut self, file_id: &FileId) -> Option<&mut FileTask> {
        self.tasks.iter_mut().find(|task| &task.id == file_id)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn status(&self) -> SessionStatus {
        if self.error_message.is_some() {
            return SessionStatus::Error;
        }
        if self.tasks.is_empty() {
            return SessionStatus::Ready;
        }
        let in_progress = self
            .tasks
            .iter()
            .any(|task| matches!(task.status(), FileStatus::Queued | FileStatus::Uploading));
        if in_progress {
            SessionStatus::Uploading
        } else {
            SessionStatus::Uploaded
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            widget_id: self.widget_id.clone(),
            status: self.status(),
            error_message: self.error_message.clone(),
            multiple_files: self.config.multiple_files,
            disabled: self.config.disabled,
            max_size_bytes: self.max_size_bytes,
            files: self.tasks.iter().map(FileTask::snapshot).collect(),
        }
    }

    pub fn take_events(&mut self) -> Vec<UploadEvent> {
        std::mem::take(&mut self.events)
    }

    fn next_id(&mut self) -> FileId {
        let id = FileId::generate(self.next_sequence);
        self.next_sequence += 1;
        id
    }

    fn set_error(&mut self, message: String) {
        self.error_message = Some(message.clone());
        self.events.push(UploadEvent::SessionError { message });
    }

    fn emit_state_change(&mut self, file_id: &FileId, old_state: Option<FileStatus>, new_state: FileStatus) {
        self.events.push(UploadEvent::StateChanged {
            file_id: file_id.clone(),
            old_state,
            new_state,
        });
    }

    /// Applies new widget settings.
    ///
    /// A new size limit only affects later drops. Going from enabled to disabled
    /// resets the session.
    pub fn configure(&mut self, config: SessionConfig) -> Vec<Effect> {
        let becomes_disabled = !self.config.disabled && config.disabled;
        if config.max_upload_size_mb != self.config.max_upload_size_mb {
            debug!(widget_id = %self.widget_id, max_upload_size_mb = config.max_upload_size_mb, "Size limit changed");
        }

        self.max_size_bytes = config.max_size_bytes();
        self.config = config;

        if becomes_disabled {
            info!(widget_id = %self.widget_id, "Session disabled, resetting");
            return self.reset();
        }
        Vec::new()
    }

    fn push_rejected(&mut self, rejected: RejectedFile) -> FileId {
        let id = self.next_id();
        let message = classify(&rejected.primary_code(), &rejected.file, self.max_size_bytes);
        debug!(file_id = %id, name = %rejected.file.name, code = %rejected.primary_code(), "File rejected");

        self.tasks.push(FileTask::rejected(id.clone(), &rejected.file, message));
        self.emit_state_change(&id, None, FileStatus::Error);
        id
    }

    fn push_accepted(&mut self, file: FileDescriptor) -> (FileId, Effect) {
        let id = self.next_id();
        let mut task = FileTask::accepted(id.clone(), &file);
        self.emit_state_change(&id, None, FileStatus::Queued);

        let token = CancellationToken::new();
        if let Ok(old_state) = task.submit(token.clone()) {
            self.emit_state_change(&id, Some(old_state), FileStatus::Uploading);
        }
        info!(file_id = %id, name = %file.name, size = file.size, "Upload submitted");

        self.tasks.push(task);
        let effect = Effect::StartUpload {
            file: OutgoingFile { id: id.clone(), descriptor: file },
            token,
        };
        (id, effect)
    }

    /// Takes in one drop from the drop zone.
    ///
    /// In single-file mode every task not already being deleted is replaced, and only the
    /// first accepted file is kept; the others are rejected with `too-many-files`. A
    /// single-file drop with no accepted file and several rejections hands the first
    /// rejection the accepted slot: it is queued and uploaded like an accepted file, and
    /// only the remaining rejections are listed as errors. Each accepted file is submitted
    /// right away.
    ///
    /// Returns the ids of the new tasks in list order.
    pub fn on_drop(&mut self, mut accepted: Vec<FileDescriptor>, mut rejected: Vec<RejectedFile>) -> (Vec<FileId>, Vec<Effect>) {
        let mut effects = Vec::new();
        let mut file_ids = Vec::new();

        if self.config.disabled {
            warn!(widget_id = %self.widget_id, "Drop ignored, session is disabled");
            return (file_ids, effects);
        }

        let multiple_files = self.config.multiple_files;
        if !multiple_files {
            let existing: Vec<FileId> = self
                .tasks
                .iter()
                .filter(|task| task.status() != FileStatus::Deleting)
                .map(|task| task.id.clone())
                .collect();
            for file_id in existing {
                debug!(file_id = %file_id, "Replacing existing file");
                if let Ok(replaced) = self.delete(&file_id) {
                    effects.extend(replaced);
                }
            }

            if accepted.len() > 1 {
                rejected.extend(
                    accepted
                        .drain(1..)
                        .map(|file| RejectedFile::new(file, RejectionCode::TooManyFiles)),
                );
            }
        }

        let mut rejected = rejected.into_iter();
        if !multiple_files && accepted.is_empty() && rejected.len() > 1 {
            // 第一个被拒绝的文件占用接受文件的位置
            if let Some(first) = rejected.next() {
                debug!(name = %first.file.name, code = %first.primary_code(), "First rejection takes the upload slot");
                let (id, effect) = self.push_accepted(first.file);
                effects.push(effect);
                file_ids.push(id);
            }
        }
        for rejected_file in rejected {
            file_ids.push(self.push_rejected(rejected_file));
        }

        for file in accepted {
            let (id, effect) = self.push_accepted(file);
            effects.push(effect);
            file_ids.push(id);
        }

        (file_ids, effects)
    }

    /// Starts deleting a task.
    ///
    /// A rejected file that never went out is removed on the spot. Otherwise the task
    /// moves to DELETING, its live upload (if any) is cancelled before the remote delete
    /// is issued, and it leaves the list when [`UploadSession::on_delete_finished`] reports
    /// success. Deleting a task that is already being deleted does nothing.
    pub fn delete(&mut self, file_id: &FileId) -> Result<Vec<Effect>> {
        let Some(index) = self.tasks.iter().position(|task| &task.id == file_id) else {
            warn!(file_id = %file_id, "Delete requested for unknown file");
            self.set_error(FILE_NOT_FOUND_MESSAGE.to_string());
            return Err(UploaderError::NotFound(file_id.clone()));
        };

        let old_state = self.tasks[index].status();
        let mut effects = Vec::new();
        match self.tasks[index].begin_delete()? {
            DeleteStart::Local => {
                self.tasks.remove(index);
                debug!(file_id = %file_id, "Removed file that was never uploaded");
                self.events.push(UploadEvent::Removed { file_id: file_id.clone() });
            }
            DeleteStart::InFlight => {
                debug!(file_id = %file_id, "Delete already in flight");
            }
            DeleteStart::Remote { cancel } => {
                if old_state != FileStatus::Deleting {
                    self.emit_state_change(file_id, Some(old_state), FileStatus::Deleting);
                }
                if let Some(token) = cancel {
                    effects.push(Effect::CancelUpload { file_id: file_id.clone(), token });
                }
                effects.push(Effect::RemoteDelete { file_id: file_id.clone() });
            }
        }

        Ok(effects)
    }

    /// Drops every task and returns to READY.
    pub fn reset(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.reset_policy == ResetPolicy::CancelOutstanding {
            for task in self.tasks.iter_mut() {
                if let Some(token) = task.take_cancellation() {
                    effects.push(Effect::CancelUpload { file_id: task.id.clone(), token });
                }
            }
        }

        info!(widget_id = %self.widget_id, dropped = self.tasks.len(), "Session reset");
        self.tasks.clear();
        self.error_message = None;
        self.events.push(UploadEvent::Reset);
        effects
    }

    pub fn on_progress(&mut self, file_id: &FileId, progress: ProgressEvent) {
        let percent = progress.percent();
        let Some(task) = self.task_mut(file_id) else {
            return;
        };
        if task.update_progress(percent) {
            self.events.push(UploadEvent::Progress { file_id: file_id.clone(), progress: percent });
        }
    }

    /// Applies the outcome of an upload request.
    ///
    /// Cancellations are silent. Other failures set the session message and, under
    /// [`TransferErrorPolicy::MarkTaskFailed`], move the task to ERROR.
    pub fn on_upload_finished(&mut self, file_id: &FileId, result: Result<()>) {
        match result {
            Ok(()) => {
                let Some(task) = self.task_mut(file_id) else {
                    debug!(file_id = %file_id, "Upload finished for a file no longer listed");
                    return;
                };
                match task.complete() {
                    Ok(old_state) => {
                        info!(file_id = %file_id, "Upload completed");
                        self.emit_state_change(file_id, Some(old_state), FileStatus::Uploaded);
                    }
                    Err(err) => debug!(file_id = %file_id, "Ignoring completion: {}", err),
                }
            }
            Err(err) if err.is_cancelled() => {
                debug!(file_id = %file_id, "Upload cancelled");
            }
            Err(err) => {
                let superseded = self
                    .task(file_id)
                    .map(|task| task.status() == FileStatus::Deleting)
                    .unwrap_or(true);
                if superseded {
                    debug!(file_id = %file_id, "Ignoring failure of a superseded upload: {}", err);
                    return;
                }

                warn!(file_id = %file_id, "Upload failed: {}", err);
                let message = err.to_string();
                let message = if message.is_empty() { UNKNOWN_ERROR_MESSAGE.to_string() } else { message };

                let policy = self.transfer_error_policy;
                let mut failed_from = None;
                if let Some(task) = self.task_mut(file_id) {
                    match policy {
                        TransferErrorPolicy::MarkTaskFailed => failed_from = task.fail(message.clone()).ok(),
                        TransferErrorPolicy::SessionMessageOnly => {
                            if task.status() == FileStatus::Uploading {
                                task.release_cancellation();
                            }
                        }
                    }
                }
                if let Some(old_state) = failed_from {
                    self.emit_state_change(file_id, Some(old_state), FileStatus::Error);
                }
                self.set_error(message);
            }
        }
    }

    /// Applies the outcome of a remote delete.
    pub fn on_delete_finished(&mut self, file_id: &FileId, result: Result<()>) {
        match result {
            Ok(()) => {
                let Some(index) = self.tasks.iter().position(|task| &task.id == file_id) else {
                    return;
                };
                self.tasks.remove(index);
                self.error_message = None;
                info!(file_id = %file_id, "File deleted");
                self.events.push(UploadEvent::Removed { file_id: file_id.clone() });
            }
            Err(err) => {
                warn!(file_id = %file_id, "Delete failed: {}", err);
                let Some(task) = self.task_mut(file_id) else {
                    return;
                };
                task.delete_failed();
                self.set_error(err.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::rejection::RejectionCode;

    fn file(name: &str) -> FileDescriptor {
        FileDescriptor::new(name, "text/plain", &b"hello"[..])
    }

    fn multi_session() -> UploadSession {
        UploadSession::new(
            WidgetId::new("w"),
            SessionConfig { multiple_files: true, ..Default::default() },
        )
    }

    fn upload_token(effects: &[Effect], index: usize) -> CancellationToken {
        match &effects[index] {
            Effect::StartUpload { token, .. } => token.clone(),
            other => panic!("expected StartUpload, got {:?}", other),
        }
    }

    #[test]
    fn test_accepted_files_start_uploading() {
        let mut session = multi_session();
        let (ids, effects) = session.on_drop(vec![file("a.txt"), file("b.txt")], vec![]);

        assert_eq!(ids.len(), 2);
        assert_eq!(effects.len(), 2);
        assert!(session.tasks().iter().all(|t| t.status() == FileStatus::Uploading));
        assert_eq!(session.status(), SessionStatus::Uploading);

        let events = session.take_events();
        assert_eq!(
            events[0],
            UploadEvent::StateChanged { file_id: ids[0].clone(), old_state: None, new_state: FileStatus::Queued }
        );
        assert_eq!(
            events[1],
            UploadEvent::StateChanged {
                file_id: ids[0].clone(),
                old_state: Some(FileStatus::Queued),
                new_state: FileStatus::Uploading
            }
        );
        assert!(session.take_events().is_empty());
    }

    #[test]
    fn test_rejected_files_make_no_effects() {
        let mut session = multi_session();
        let (ids, effects) = session.on_drop(
            vec![],
            vec![RejectedFile::new(file("a.exe"), RejectionCode::FileInvalidType)],
        );

        assert!(effects.is_empty());
        let task = session.task(&ids[0]).unwrap();
        assert_eq!(task.status(), FileStatus::Error);
        assert_eq!(task.error_message(), Some("text/plain files are not allowed."));
        assert!(!task.is_transmitted());
    }

    #[test]
    fn test_list_order_rejections_then_accepted() {
        let mut session = multi_session();
        let (ids, _) = session.on_drop(
            vec![file("ok.txt")],
            vec![
                RejectedFile::new(file("r1.txt"), RejectionCode::FileTooLarge),
                RejectedFile::new(file("r2.txt"), RejectionCode::FileTooLarge),
            ],
        );

        let names: Vec<_> = session.tasks().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["r1.txt", "r2.txt", "ok.txt"]);
        let listed: Vec<_> = session.tasks().iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, listed);
    }

    #[test]
    fn test_progress_and_completion() {
        let mut session = multi_session();
        let (ids, _) = session.on_drop(vec![file("a.txt")], vec![]);
        session.take_events();

        session.on_progress(&ids[0], ProgressEvent { loaded: 1, total: 4 });
        assert_eq!(session.task(&ids[0]).unwrap().progress(), Some(25));
        assert_eq!(
            session.take_events(),
            vec![UploadEvent::Progress { file_id: ids[0].clone(), progress: 25 }]
        );

        session.on_upload_finished(&ids[0], Ok(()));
        let task = session.task(&ids[0]).unwrap();
        assert_eq!(task.status(), FileStatus::Uploaded);
        assert_eq!(task.progress(), None);
        assert!(!task.has_live_upload());
        assert_eq!(session.status(), SessionStatus::Uploaded);
    }

    #[test]
    fn test_unknown_delete_sets_session_error() {
        let mut session = multi_session();
        session.on_drop(vec![file("a.txt")], vec![]);

        let err = session.delete(&FileId::from("missing")).unwrap_err();
        assert!(matches!(err, UploaderError::NotFound(_)));
        assert_eq!(session.tasks().len(), 1);
        assert_eq!(session.error_message(), Some(FILE_NOT_FOUND_MESSAGE));
        assert_eq!(session.status(), SessionStatus::Error);
    }

    #[test]
    fn test_delete_uploaded_file() {
        let mut session = multi_session();
        let (ids, _) = session.on_drop(vec![file("a.txt")], vec![]);
        session.on_upload_finished(&ids[0], Ok(()));

        let effects = session.delete(&ids[0]).unwrap();
        assert_eq!(effects.len(), 1);
        assert!(matches!(&effects[0], Effect::RemoteDelete { file_id } if file_id == &ids[0]));
        assert_eq!(session.task(&ids[0]).unwrap().status(), FileStatus::Deleting);

        session.on_delete_finished(&ids[0], Ok(()));
        assert!(session.tasks().is_empty());
        assert_eq!(session.status(), SessionStatus::Ready);
    }

    #[test]
    fn test_failed_delete_keeps_deleting_and_retries() {
        let mut session = multi_session();
        let (ids, _) = session.on_drop(vec![file("a.txt")], vec![]);
        session.on_upload_finished(&ids[0], Ok(()));
        session.delete(&ids[0]).unwrap();

        session.on_delete_finished(&ids[0], Err(UploaderError::server_error(500, "down")));
        assert_eq!(session.task(&ids[0]).unwrap().status(), FileStatus::Deleting);
        assert_eq!(session.status(), SessionStatus::Error);

        let effects = session.delete(&ids[0]).unwrap();
        assert!(matches!(&effects[..], [Effect::RemoteDelete { .. }]));
        session.on_delete_finished(&ids[0], Ok(()));
        assert!(session.tasks().is_empty());
        assert_eq!(session.error_message(), None);
    }

    #[test]
    fn test_transfer_error_session_message_only() {
        let mut session = multi_session();
        let (ids, _) = session.on_drop(vec![file("a.txt")], vec![]);

        session.on_upload_finished(&ids[0], Err(UploaderError::server_error(500, "boom")));

        let task = session.task(&ids[0]).unwrap();
        assert_eq!(task.status(), FileStatus::Uploading);
        assert!(!task.has_live_upload());
        assert_eq!(
            session.error_message(),
            Some("Server error: status code 500, message: boom")
        );
        assert_eq!(session.status(), SessionStatus::Error);
    }

    #[test]
    fn test_transfer_error_marks_task_failed() {
        let mut session = multi_session()
            .with_policies(TransferErrorPolicy::MarkTaskFailed, ResetPolicy::Abandon);
        let (ids, _) = session.on_drop(vec![file("a.txt")], vec![]);

        session.on_upload_finished(&ids[0], Err(UploaderError::server_error(500, "boom")));

        let task = session.task(&ids[0]).unwrap();
        assert_eq!(task.status(), FileStatus::Error);
        assert_eq!(task.error_message(), Some("Server error: status code 500, message: boom"));
        assert!(session.error_message().is_some());

        // 已上传过的失败任务需要远程删除
        let effects = session.delete(&ids[0]).unwrap();
        assert!(matches!(&effects[..], [Effect::RemoteDelete { .. }]));
    }

    #[test]
    fn test_failure_after_delete_is_ignored() {
        let mut session = multi_session();
        let (ids, _) = session.on_drop(vec![file("a.txt")], vec![]);
        session.delete(&ids[0]).unwrap();

        session.on_upload_finished(&ids[0], Err(UploaderError::server_error(499, "aborted")));
        assert_eq!(session.task(&ids[0]).unwrap().status(), FileStatus::Deleting);
        assert_eq!(session.error_message(), None);

        session.reset();
        session.on_upload_finished(&ids[0], Err(UploaderError::server_error(500, "late")));
        assert_eq!(session.status(), SessionStatus::Ready);
    }

    #[test]
    fn test_cancellation_is_silent() {
        let mut session = multi_session();
        let (ids, _) = session.on_drop(vec![file("a.txt")], vec![]);
        session.take_events();

        session.on_upload_finished(&ids[0], Err(UploaderError::Cancelled));

        assert_eq!(session.task(&ids[0]).unwrap().status(), FileStatus::Uploading);
        assert_eq!(session.error_message(), None);
        assert!(session.take_events().is_empty());
    }

    #[test]
    fn test_configure_size_limit_is_not_retroactive() {
        let mut session = multi_session();
        let (ids, _) = session.on_drop(
            vec![],
            vec![RejectedFile::new(file("a.txt"), RejectionCode::FileTooLarge)],
        );

        let effects = session.configure(SessionConfig {
            max_upload_size_mb: 1.0,
            multiple_files: true,
            ..Default::default()
        });
        assert!(effects.is_empty());
        assert_eq!(session.max_size_bytes(), 1024 * 1024);
        assert_eq!(
            session.task(&ids[0]).unwrap().error_message(),
            Some("File must be 200.0MB or smaller.")
        );

        let (ids, _) = session.on_drop(
            vec![],
            vec![RejectedFile::new(file("b.txt"), RejectionCode::FileTooLarge)],
        );
        assert_eq!(
            session.task(&ids[0]).unwrap().error_message(),
            Some("File must be 1.0MB or smaller.")
        );
    }

    #[test]
    fn test_disabling_resets() {
        let mut session = multi_session();
        session.on_drop(vec![file("a.txt")], vec![]);

        session.configure(SessionConfig { multiple_files: true, disabled: true, ..Default::default() });
        assert!(session.tasks().is_empty());
        assert_eq!(session.status(), SessionStatus::Ready);

        let (ids, effects) = session.on_drop(vec![file("b.txt")], vec![]);
        assert!(ids.is_empty());
        assert!(effects.is_empty());
    }

    #[test]
    fn test_reset_cancel_policy() {
        let mut session = multi_session()
            .with_policies(TransferErrorPolicy::SessionMessageOnly, ResetPolicy::CancelOutstanding);
        let (ids, starts) = session.on_drop(vec![file("a.txt"), file("b.txt")], vec![]);
        session.on_upload_finished(&ids[1], Ok(()));

        let effects = session.reset();
        assert_eq!(effects.len(), 1);
        match &effects[0] {
            Effect::CancelUpload { token, .. } => {
                token.cancel();
                assert!(upload_token(&starts, 0).is_cancelled());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(session.tasks().is_empty());
    }

    #[test]
    fn test_reset_abandon_policy() {
        let mut session = multi_session();
        let (ids, starts) = session.on_drop(vec![file("a.txt")], vec![]);

        assert!(session.reset().is_empty());
        assert!(!upload_token(&starts, 0).is_cancelled());

        // 重置后迟到的回调没有可见效果
        session.on_progress(&ids[0], ProgressEvent { loaded: 1, total: 2 });
        session.on_upload_finished(&ids[0], Ok(()));
        session.on_upload_finished(&ids[0], Err(UploaderError::Cancelled));
        assert!(session.tasks().is_empty());
        assert_eq!(session.status(), SessionStatus::Ready);
    }
}
