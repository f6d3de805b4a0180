//! Single-file NIfTI-1 codec for label volumes.
//!
//! Writes uncompressed `.nii` files: the fixed 348-byte header, a 4-byte
//! extension flag, then the raw voxel data. Labels are stored as `uint8`
//! with the spatial transform in the sform rows. The reader exists for tests
//! and tooling and only accepts what the writer produces (3D `uint8`).
//!
//! # Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Header (348 bytes)                           │
//! ├──────────────────────────────────────────────┤
//! │ Extension flag (4 zero bytes)                │
//! ├──────────────────────────────────────────────┤
//! │ Voxel data (dim1 fastest-varying)            │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The in-memory `(depth, height, width)` array is written in C order, so on
//! disk `width` maps to NIfTI `dim[1]` (fastest), `height` to `dim[2]`, and
//! `depth` to `dim[3]`.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::info;
use ndarray::Array3;
use thiserror::Error;

use crate::volume::{LabelVolume, SpatialTransform};

// =============================================================================
// Constants
// =============================================================================

/// Fixed NIfTI-1 header size.
pub const HEADER_SIZE: usize = 348;

/// Offset of the voxel data in files this codec writes.
pub const DATA_OFFSET: u64 = 352;

/// Magic for single-file NIfTI-1.
pub const MAGIC: &[u8; 4] = b"n+1\0";

/// NIfTI datatype code for unsigned 8-bit integers.
const DT_UINT8: i16 = 2;

/// Spatial units code: millimeters.
const UNITS_MM: u8 = 2;

// =============================================================================
// Errors
// =============================================================================

/// Codec failures.
#[derive(Debug, Error)]
pub enum NiftiError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("not a NIfTI-1 file: {0}")]
    BadMagic(String),

    #[error("unsupported NIfTI content: {0}")]
    Unsupported(String),
}

// =============================================================================
// Header buffer helpers
// =============================================================================

fn put_i16(buf: &mut [u8], offset: usize, value: i16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_f32(buf: &mut [u8], offset: usize, value: f32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_i16(buf: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn get_i32(buf: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes(buf[offset..offset + 4].try_into().expect("4 bytes"))
}

fn get_f32(buf: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes(buf[offset..offset + 4].try_into().expect("4 bytes"))
}

// =============================================================================
// Write
// =============================================================================

fn encode_header(shape: [usize; 3], transform: &SpatialTransform) -> Result<[u8; HEADER_SIZE], NiftiError> {
    let [d, h, w] = shape;
    for &axis in &shape {
        if axis > i16::MAX as usize {
            return Err(NiftiError::Unsupported(format!(
                "axis length {axis} exceeds the NIfTI-1 dimension limit"
            )));
        }
    }

    let mut buf = [0u8; HEADER_SIZE];
    put_i32(&mut buf, 0, HEADER_SIZE as i32); // sizeof_hdr
    buf[38] = b'r'; // regular

    // dim: rank 3, dim[1] fastest on disk
    put_i16(&mut buf, 40, 3);
    put_i16(&mut buf, 42, w as i16);
    put_i16(&mut buf, 44, h as i16);
    put_i16(&mut buf, 46, d as i16);
    for i in 4..8 {
        put_i16(&mut buf, 40 + 2 * i, 1);
    }

    put_i16(&mut buf, 70, DT_UINT8); // datatype
    put_i16(&mut buf, 72, 8); // bitpix

    // pixdim: qfac 1, unit spacings (geometry lives in the sform)
    for i in 0..4 {
        put_f32(&mut buf, 76 + 4 * i, 1.0);
    }

    put_f32(&mut buf, 108, DATA_OFFSET as f32); // vox_offset
    put_f32(&mut buf, 112, 1.0); // scl_slope
    buf[123] = UNITS_MM; // xyzt_units

    let descrip = b"volseg label map";
    buf[148..148 + descrip.len()].copy_from_slice(descrip);

    // qform unused, sform carries the affine verbatim
    put_i16(&mut buf, 252, 0);
    put_i16(&mut buf, 254, 1);
    for (row, base) in [(0usize, 280usize), (1, 296), (2, 312)] {
        for col in 0..4 {
            put_f32(&mut buf, base + 4 * col, transform.0[row][col] as f32);
        }
    }

    buf[344..348].copy_from_slice(MAGIC);
    Ok(buf)
}

/// Write a label volume and its spatial transform to `path`.
pub fn write_label_volume(
    path: &Path,
    labels: &LabelVolume,
    transform: &SpatialTransform,
) -> Result<(), NiftiError> {
    let (d, h, w) = labels.dim();
    let header = encode_header([d, h, w], transform)?;

    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(&header)?;
    out.write_all(&[0u8; 4])?; // no extensions

    let data = labels.as_standard_layout();
    out.write_all(data.as_slice().expect("standard layout is contiguous"))?;
    out.flush()?;
    Ok(())
}

// =============================================================================
// Read
// =============================================================================

/// Read back a label volume written by [`write_label_volume`].
pub fn read_label_volume(path: &Path) -> Result<(LabelVolume, SpatialTransform), NiftiError> {
    let mut file = BufReader::new(File::open(path)?);
    let mut header = [0u8; HEADER_SIZE];
    file.read_exact(&mut header)?;

    if &header[344..348] != MAGIC {
        return Err(NiftiError::BadMagic(path.display().to_string()));
    }
    if get_i32(&header, 0) != HEADER_SIZE as i32 {
        return Err(NiftiError::BadMagic(path.display().to_string()));
    }
    let datatype = get_i16(&header, 70);
    if datatype != DT_UINT8 {
        return Err(NiftiError::Unsupported(format!(
            "datatype {datatype}, this codec only handles uint8 label maps"
        )));
    }
    let rank = get_i16(&header, 40);
    if rank != 3 {
        return Err(NiftiError::Unsupported(format!(
            "rank {rank} volume, expected 3"
        )));
    }

    let w = get_i16(&header, 42) as usize;
    let h = get_i16(&header, 44) as usize;
    let d = get_i16(&header, 46) as usize;

    let vox_offset = get_f32(&header, 108) as u64;
    file.seek(SeekFrom::Start(vox_offset))?;
    let mut data = vec![0u8; d * h * w];
    file.read_exact(&mut data)?;
    let labels = Array3::from_shape_vec((d, h, w), data).expect("length matches shape");

    let mut transform = SpatialTransform::identity();
    for (row, base) in [(0usize, 280usize), (1, 296), (2, 312)] {
        for col in 0..4 {
            transform.0[row][col] = get_f32(&header, base + 4 * col) as f64;
        }
    }

    Ok((labels, transform))
}

// =============================================================================
// CaseWriter
// =============================================================================

/// Writes each case's final label map into a per-run output directory.
///
/// Pure serialization boundary: no resampling or decision logic happens
/// here. The filename is derived from the case identifier.
#[derive(Debug, Clone)]
pub struct CaseWriter {
    out_dir: PathBuf,
}

impl CaseWriter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    /// Output directory this writer targets.
    #[inline]
    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Path the given case will be written to.
    pub fn case_path(&self, case_id: &str) -> PathBuf {
        if case_id.ends_with(".nii") {
            self.out_dir.join(case_id)
        } else {
            self.out_dir.join(format!("{case_id}.nii"))
        }
    }

    /// Serialize one case's labels and transform; returns the written path.
    pub fn write(
        &self,
        case_id: &str,
        labels: &LabelVolume,
        transform: &SpatialTransform,
    ) -> Result<PathBuf, NiftiError> {
        fs::create_dir_all(&self.out_dir)?;
        let path = self.case_path(case_id);
        write_label_volume(&path, labels, transform)?;
        info!("wrote {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use tempfile::tempdir;

    fn checker(shape: (usize, usize, usize)) -> LabelVolume {
        Array3::from_shape_fn(shape, |(d, h, w)| ((d + h + w) % 2) as u8)
    }

    #[test]
    fn round_trip_preserves_labels_and_transform() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("case.nii");
        let labels = checker((5, 4, 3));
        let transform = SpatialTransform::from_spacing(0.5, 0.5, 2.0);

        write_label_volume(&path, &labels, &transform).unwrap();
        let (back, t) = read_label_volume(&path).unwrap();
        assert_eq!(back, labels);
        assert_eq!(t, transform);
    }

    #[test]
    fn header_is_well_formed() {
        let header = encode_header([4, 3, 2], &SpatialTransform::identity()).unwrap();
        assert_eq!(get_i32(&header, 0), 348);
        assert_eq!(get_i16(&header, 40), 3);
        // width is the fastest-varying axis on disk
        assert_eq!(get_i16(&header, 42), 2);
        assert_eq!(get_i16(&header, 46), 4);
        assert_eq!(get_i16(&header, 70), DT_UINT8);
        assert_eq!(&header[344..348], MAGIC);
    }

    #[test]
    fn rejects_non_nifti_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("junk.nii");
        fs::write(&path, vec![0u8; 512]).unwrap();
        assert!(matches!(
            read_label_volume(&path),
            Err(NiftiError::BadMagic(_))
        ));
    }

    #[test]
    fn case_writer_names_files_after_cases() {
        let dir = tempdir().unwrap();
        let writer = CaseWriter::new(dir.path());
        let labels = checker((2, 2, 2));
        let path = writer
            .write("subject_042", &labels, &SpatialTransform::identity())
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "subject_042.nii");
        // ids that already look like filenames are kept as-is
        assert_eq!(
            writer.case_path("img0007.nii").file_name().unwrap(),
            "img0007.nii"
        );
        let (back, _) = read_label_volume(&path).unwrap();
        assert_eq!(back, labels);
    }

    #[test]
    fn oversized_axis_is_rejected() {
        let err = encode_header([40000, 1, 1], &SpatialTransform::identity()).unwrap_err();
        assert!(matches!(err, NiftiError::Unsupported(_)));
    }
}
