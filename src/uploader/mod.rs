mod client;
mod errors;
mod manager;
mod manager_worker;
mod metadata;
mod progress_stream;
mod rejection;
mod session;
mod task;
mod worker;
pub mod types;

pub use client::{HttpUploadClient, UploadClient};
pub use errors::{Result, UploaderError};
pub use manager::{FilteredEventReceiver, ManagerOptions, UploadManager, UploadManagerHandle};
pub use metadata::Metadata;
pub use rejection::{classify, instructions, validate_drop, RejectionCode};
pub use session::{Effect, UploadSession, FILE_NOT_FOUND_MESSAGE};
pub use task::FileTask;
pub use types::{
    FileDescriptor, FileId, FileSnapshot, FileStatus, OutgoingFile, ProgressCallback,
    ProgressEvent, RejectedFile, ResetPolicy, SessionSnapshot, SessionStatus,
    TransferErrorPolicy, UploadEvent, WidgetId,
};
