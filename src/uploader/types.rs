use std::sync::Arc;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;
use crate::config::SessionConfig;
use crate::utils::{format_size, SizeUnit};
use super::errors::Result;
use super::rejection::RejectionCode;

/// 控件（会话）唯一标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct WidgetId(String);

impl WidgetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WidgetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// File id, unique within one session.
///
/// Built from the session's sequence number and the acceptance timestamp, so two
/// files with identical content still get distinct ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct FileId(String);

impl FileId {
    pub(crate) fn generate(sequence: u64) -> Self {
        Self(format!("{}-{}", sequence, chrono::Utc::now().timestamp_millis()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FileId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for FileId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 单个文件的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    /// 等待中
    Queued,
    /// 上传中
    Uploading,
    /// 已完成
    Uploaded,
    /// 失败
    Error,
    /// 删除中
    Deleting,
}

impl FileStatus {
    pub fn can_transition_to(self, next: FileStatus) -> bool {
        use FileStatus::*;

        matches!(
            (self, next),
            (Queued, Uploading)
                | (Uploading, Uploaded)
                | (Uploading, Error)
                | (Uploading, Deleting)
                | (Uploaded, Deleting)
                | (Error, Deleting)
        )
    }

    /// Counts toward the single-file limit.
    pub fn is_active(self) -> bool {
        matches!(self, FileStatus::Queued | FileStatus::Uploading | FileStatus::Uploaded)
    }
}

/// 会话整体状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Ready,
    Uploading,
    Uploaded,
    Error,
}

/// A file handed over by the drop zone.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub data: Bytes,
}

impl FileDescriptor {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size: data.len() as u64,
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Lowercased extension without the dot, if the name has one.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() && ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// A file the drop zone refused, with the reasons in the order they were detected.
#[derive(Debug, Clone)]
pub struct RejectedFile {
    pub file: FileDescriptor,
    pub codes: Vec<RejectionCode>,
}

impl RejectedFile {
    pub fn new(file: FileDescriptor, code: RejectionCode) -> Self {
        Self { file, codes: vec![code] }
    }

    /// Only the first reason is shown to the user.
    pub fn primary_code(&self) -> RejectionCode {
        self.codes
            .first()
            .cloned()
            .unwrap_or_else(|| RejectionCode::Other(String::new()))
    }
}

/// A file with its session id, as given to the upload client.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub id: FileId,
    pub descriptor: FileDescriptor,
}

/// Raw transfer progress reported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub loaded: u64,
    pub total: u64,
}

impl ProgressEvent {
    /// Rounded percentage, clamped to 0..=100.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let percent = (self.loaded as f64 * 100.0 / self.total as f64).round();
        percent.clamp(0.0, 100.0) as u8
    }
}

pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Read-only view of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileSnapshot {
    pub id: FileId,
    pub name: String,
    pub size: u64,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl FileSnapshot {
    /// The small caption rendered under the file name.
    pub fn status_line(&self) -> String {
        if let Some(progress) = self.progress {
            return format!("{}%", progress);
        }

        match self.status {
            FileStatus::Error => self
                .error_message
                .clone()
                .unwrap_or_else(|| "error".to_string()),
            FileStatus::Uploaded => format!(
                "Uploaded • {}",
                format_size(self.size as f64, SizeUnit::B, 1)
            ),
            _ => String::new(),
        }
    }
}

/// Immutable view of a session, published after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub widget_id: WidgetId,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub multiple_files: bool,
    pub disabled: bool,
    pub max_size_bytes: u64,
    pub files: Vec<FileSnapshot>,
}

impl SessionSnapshot {
    /// The drop zone stays visible in multi-file mode or while nothing is listed.
    pub fn accepts_drop(&self) -> bool {
        !self.disabled && (self.multiple_files || self.files.is_empty())
    }

    /// No task is waiting on the network.
    pub fn is_settled(&self) -> bool {
        self.files
            .iter()
            .all(|file| matches!(file.status, FileStatus::Uploaded | FileStatus::Error))
    }

    pub fn file(&self, id: &FileId) -> Option<&FileSnapshot> {
        self.files.iter().find(|file| &file.id == id)
    }
}

/// How a non-cancel transfer failure is reflected in the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferErrorPolicy {
    /// Only the session-level message changes.
    #[default]
    SessionMessageOnly,
    /// The task also moves to ERROR with the same message.
    MarkTaskFailed,
}

/// What happens to outstanding transfers on reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetPolicy {
    /// Tasks are dropped; transfers finish on their own and land nowhere.
    #[default]
    Abandon,
    /// Every live cancellation handle fires before the tasks are dropped.
    CancelOutstanding,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// 任务状态变更
    StateChanged {
        file_id: FileId,
        old_state: Option<FileStatus>,
        new_state: FileStatus,
    },

    /// 进度更新
    Progress {
        file_id: FileId,
        progress: u8,
    },

    /// 任务已移除
    Removed {
        file_id: FileId,
    },

    /// 会话级错误
    SessionError {
        message: String,
    },

    /// 会话已重置
    Reset,
}

/// 上传管理器命令
pub enum ManagerCommand {
    /// 更新配置
    Configure {
        config: SessionConfig,
        reply: oneshot::Sender<()>,
    },

    /// 拖入文件
    Drop {
        accepted: Vec<FileDescriptor>,
        rejected: Vec<RejectedFile>,
        reply: oneshot::Sender<Vec<FileId>>,
    },

    /// 删除
    Delete {
        file_id: FileId,
        reply: oneshot::Sender<Result<()>>,
    },

    /// 重置
    Reset {
        reply: oneshot::Sender<()>,
    },

    /// 获取快照
    GetSnapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// Messages from spawned transfers back to the manager worker.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Progress {
        file_id: FileId,
        progress: ProgressEvent,
    },

    UploadFinished {
        file_id: FileId,
        result: Result<()>,
    },

    DeleteFinished {
        file_id: FileId,
        result: Result<()>,
    },
}
