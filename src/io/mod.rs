//! Persistence boundary: label volumes on disk.

pub mod nifti;

pub use nifti::{read_label_volume, write_label_volume, CaseWriter, NiftiError};
