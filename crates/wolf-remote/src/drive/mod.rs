//! Google Drive backend.

mod client;
mod gateway;
mod service_account;

pub use client::{DriveApiClient, DriveFile};
pub use gateway::{DriveFolderGateway, DriveFolderGatewayConfig};
pub use service_account::{AccessTokenSource, ServiceAccountTokenSource, StaticAccessToken};

pub(crate) const DRIVE_FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
