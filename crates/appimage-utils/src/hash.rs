use std::{
    fs::File,
    io::{self, Read},
    path::Path,
};

use md5::{Digest, Md5};

use crate::error::{HashError, HashResult};

const CHUNK_SIZE: usize = 64 * 1024;

/// Calculates the MD5 digest of a file's full contents, as lowercase hex.
///
/// The file is streamed in fixed-size chunks so large AppImages are never held in memory.
///
/// # Errors
///
/// * [`HashError::ReadFailed`] if the file cannot be opened or read.
///
/// # Example
///
/// ```no_run
/// use appimage_utils::error::HashResult;
/// use appimage_utils::hash::calculate_md5;
///
/// fn main() -> HashResult<()> {
///     let digest = calculate_md5("/path/to/App.AppImage")?;
///     println!("{digest}");
///     Ok(())
/// }
/// ```
pub fn calculate_md5<P: AsRef<Path>>(file_path: P) -> HashResult<String> {
    let file_path = file_path.as_ref();
    let read_err = |err| {
        HashError::ReadFailed {
            path: file_path.to_path_buf(),
            source: err,
        }
    };

    let file = File::open(file_path).map_err(read_err)?;
    md5_reader(file, file_path)
}

/// Streams `reader` to its end and returns the MD5 as lowercase hex.
///
/// `path` names the data in the returned error.
pub fn md5_reader<R: Read, P: AsRef<Path>>(mut reader: R, path: P) -> HashResult<String> {
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                return Err(HashError::ReadFailed {
                    path: path.as_ref().to_path_buf(),
                    source: err,
                })
            }
        };
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Returns the lowercase hex MD5 of `data`.
pub fn md5_hex<D: AsRef<[u8]>>(data: D) -> String {
    hex::encode(Md5::digest(data.as_ref()))
}
