use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use super::errors::{Result, UploaderError};
use super::types::{FileDescriptor, FileId, FileSnapshot, FileStatus};

/// What a delete request has to do for one task.
#[derive(Debug)]
pub(crate) enum DeleteStart {
    /// Never reached the server, drop it locally.
    Local,
    /// A remote delete is already outstanding.
    InFlight,
    /// Issue a remote delete, cancelling the upload first when one is live.
    Remote { cancel: Option<CancellationToken> },
}

/// One file's lifecycle inside a session.
#[derive(Debug, Clone)]
pub struct FileTask {
    pub id: FileId,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
    status: FileStatus,
    progress: Option<u8>,
    error_message: Option<String>,
    cancellation_token: Option<CancellationToken>,
    transmitted: bool,
    delete_in_flight: bool,
}

impl FileTask {
    pub(crate) fn accepted(id: FileId, file: &FileDescriptor) -> Self {
        Self::with_status(id, file, FileStatus::Queued, None)
    }

    pub(crate) fn rejected(id: FileId, file: &FileDescriptor, message: String) -> Self {
        Self::with_status(id, file, FileStatus::Error, Some(message))
    }

    fn with_status(id: FileId, file: &FileDescriptor, status: FileStatus, error_message: Option<String>) -> Self {
        Self {
            id,
            name: file.name.clone(),
            size: file.size,
            mime_type: file.mime_type.clone(),
            created_at: Utc::now(),
            status,
            progress: None,
            error_message,
            cancellation_token: None,
            transmitted: false,
            delete_in_flight: false,
        }
    }

    pub fn status(&self) -> FileStatus {
        self.status
    }

    pub fn progress(&self) -> Option<u8> {
        self.progress
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// An upload request was ever issued for this task.
    pub fn is_transmitted(&self) -> bool {
        self.transmitted
    }

    pub fn has_live_upload(&self) -> bool {
        self.cancellation_token.is_some()
    }

    fn transition(&mut self, next: FileStatus) -> Result<FileStatus> {
        let from = self.status;
        if !from.can_transition_to(next) {
            return Err(UploaderError::InvalidTransition { from, to: next });
        }

        self.status = next;
        if next != FileStatus::Uploading {
            self.progress = None;
        }
        if next != FileStatus::Error {
            self.error_message = None;
        }

        Ok(from)
    }

    /// QUEUED -> UPLOADING, taking ownership of the request's cancellation handle.
    pub(crate) fn submit(&mut self, token: CancellationToken) -> Result<FileStatus> {
        let from = self.transition(FileStatus::Uploading)?;
        self.progress = Some(0);
        self.cancellation_token = Some(token);
        self.transmitted = true;
        Ok(from)
    }

    /// Returns false when the task is no longer uploading.
    pub(crate) fn update_progress(&mut self, progress: u8) -> bool {
        if self.status != FileStatus::Uploading {
            return false;
        }
        self.progress = Some(progress.min(100));
        true
    }

    pub(crate) fn complete(&mut self) -> Result<FileStatus> {
        let from = self.transition(FileStatus::Uploaded)?;
        self.cancellation_token = None;
        Ok(from)
    }

    pub(crate) fn fail(&mut self, message: String) -> Result<FileStatus> {
        let from = self.transition(FileStatus::Error)?;
        self.error_message = Some(message);
        self.cancellation_token = None;
        Ok(from)
    }

    /// The request behind the handle has finished, the handle is dead.
    pub(crate) fn release_cancellation(&mut self) {
        self.cancellation_token = None;
    }

    pub(crate) fn take_cancellation(&mut self) -> Option<CancellationToken> {
        self.cancellation_token.take()
    }

    pub(crate) fn begin_delete(&mut self) -> Result<DeleteStart> {
        if self.status == FileStatus::Deleting {
            if self.delete_in_flight {
                return Ok(DeleteStart::InFlight);
            }
            // 上一次删除失败，重新发起
            self.delete_in_flight = true;
            return Ok(DeleteStart::Remote { cancel: None });
        }

        if !self.transmitted {
            return Ok(DeleteStart::Local);
        }

        self.transition(FileStatus::Deleting)?;
        self.delete_in_flight = true;
        Ok(DeleteStart::Remote { cancel: self.cancellation_token.take() })
    }

    pub(crate) fn delete_failed(&mut self) {
        self.delete_in_flight = false;
    }

    pub fn snapshot(&self) -> FileSnapshot {
        FileSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            size: self.size,
            status: self.status,
            progress: self.progress,
            error_message: self.error_message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> FileDescriptor {
        FileDescriptor::new("data.csv", "text/csv", &b"a,b,c"[..])
    }

    fn uploading() -> (FileTask, CancellationToken) {
        let mut task = FileTask::accepted(FileId::from("1"), &descriptor());
        let token = CancellationToken::new();
        task.submit(token.clone()).unwrap();
        (task, token)
    }

    #[test]
    fn test_accepted_task_lifecycle() {
        let (mut task, _token) = uploading();
        assert_eq!(task.status(), FileStatus::Uploading);
        assert_eq!(task.progress(), Some(0));
        assert!(task.has_live_upload());

        assert!(task.update_progress(55));
        assert_eq!(task.progress(), Some(55));

        assert_eq!(task.complete().unwrap(), FileStatus::Uploading);
        assert_eq!(task.status(), FileStatus::Uploaded);
        assert_eq!(task.progress(), None);
        assert!(!task.has_live_upload());
        assert!(!task.update_progress(80));
    }

    #[test]
    fn test_failed_upload_keeps_message() {
        let (mut task, _token) = uploading();
        task.fail("Server error".to_string()).unwrap();

        assert_eq!(task.status(), FileStatus::Error);
        assert_eq!(task.error_message(), Some("Server error"));
        assert_eq!(task.progress(), None);
        assert!(task.is_transmitted());
    }

    #[test]
    fn test_rejected_task_deletes_locally() {
        let mut task = FileTask::rejected(FileId::from("2"), &descriptor(), "nope".to_string());
        assert_eq!(task.status(), FileStatus::Error);
        assert!(matches!(task.begin_delete().unwrap(), DeleteStart::Local));
    }

    #[test]
    fn test_delete_while_uploading_hands_back_token() {
        let (mut task, token) = uploading();

        match task.begin_delete().unwrap() {
            DeleteStart::Remote { cancel: Some(cancel) } => {
                cancel.cancel();
                assert!(token.is_cancelled());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(task.status(), FileStatus::Deleting);
        assert_eq!(task.progress(), None);
        assert!(!task.has_live_upload());

        // 重复删除无效
        assert!(matches!(task.begin_delete().unwrap(), DeleteStart::InFlight));
        // DELETING 不能再回到其他状态
        assert!(task.complete().is_err());
        assert!(task.fail("late".to_string()).is_err());
        assert!(!task.update_progress(10));
    }

    #[test]
    fn test_failed_delete_can_be_retried() {
        let (mut task, _token) = uploading();
        task.complete().unwrap();

        assert!(matches!(task.begin_delete().unwrap(), DeleteStart::Remote { cancel: None }));
        task.delete_failed();
        assert_eq!(task.status(), FileStatus::Deleting);
        assert!(matches!(task.begin_delete().unwrap(), DeleteStart::Remote { cancel: None }));
        assert!(matches!(task.begin_delete().unwrap(), DeleteStart::InFlight));
    }

    #[test]
    fn test_invalid_submit() {
        let (mut task, _token) = uploading();
        let err = task.submit(CancellationToken::new()).unwrap_err();
        assert!(matches!(
            err,
            UploaderError::InvalidTransition { from: FileStatus::Uploading, to: FileStatus::Uploading }
        ));
    }
}
