pub mod file_manager;

pub use file_manager::{
    is_partial_download, partial_download_name, validate_file_name, FileCatalog,
};
