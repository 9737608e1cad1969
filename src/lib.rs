pub mod config;
pub mod uploader;
pub mod utils;

pub use config::{ClientConfig, Config, ManagerConfig, SessionConfig};

pub use uploader::{
    FileDescriptor,
    FileId,
    FileSnapshot,
    FileStatus,
    HttpUploadClient,
    ManagerOptions,
    RejectedFile,
    RejectionCode,
    SessionSnapshot,
    SessionStatus,
    UploadClient,
    UploadEvent,
    UploadManager,
    UploadManagerHandle,
    UploaderError,
    WidgetId,
    Result,
};

pub use utils::{format_size, SizeUnit};
