pub mod atomic;
pub mod format;
pub mod store;

pub use store::{
    delete_backup, delete_unused_backup_files, path_for, read_backup, write_backup,
};
