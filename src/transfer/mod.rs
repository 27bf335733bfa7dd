pub mod downloader;
pub mod uploader;

pub use downloader::Downloader;
pub use uploader::Uploader;
