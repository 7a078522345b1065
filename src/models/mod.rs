pub mod archive;
pub mod checksum;
pub mod discovery;
pub mod download;
pub mod locator;
pub mod manager;
pub mod manifest;
pub mod registry;
pub mod source;
pub mod transport;

pub use download::{DownloadProgress, FileFetcher, ProgressHandler, RetryPolicy};
pub use locator::{AssetLocator, AssetOrigin};
pub use manager::{is_ready_dir, ModelStore};
pub use manifest::{InstallRecord, ModelManifest, ModelUrls};
pub use registry::ModelDescriptor;
pub use source::{ArchiveFormat, ModelSource};
pub use transport::{HttpResponse, HttpTransport, Transport};
