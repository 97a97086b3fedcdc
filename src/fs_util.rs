use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tempfile::NamedTempFile;

use crate::error::M2eError;

pub fn write_atomic<F>(dest: &Path, write: F) -> Result<(), M2eError>
where
    F: FnOnce(&mut BufWriter<&mut NamedTempFile>) -> Result<(), M2eError>,
{
    let parent = dest
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| M2eError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".m2e-file")
        .tempfile_in(parent)
        .map_err(|err| M2eError::Filesystem(err.to_string()))?;
    {
        let mut writer = BufWriter::new(&mut temp);
        write(&mut writer)?;
        writer
            .flush()
            .map_err(|err| M2eError::Filesystem(err.to_string()))?;
    }
    if dest.exists() {
        fs::remove_file(dest).map_err(|err| M2eError::Filesystem(err.to_string()))?;
    }
    temp.persist(dest)
        .map_err(|err| M2eError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn write_bytes_atomic(dest: &Path, content: &[u8]) -> Result<(), M2eError> {
    write_atomic(dest, |writer| {
        writer
            .write_all(content)
            .map_err(|err| M2eError::Filesystem(err.to_string()))
    })
}

pub fn gunzip_target(path: &Path) -> PathBuf {
    match path.extension() {
        Some(ext) if ext == "gz" => path.with_extension(""),
        _ => {
            let mut name = path.as_os_str().to_os_string();
            name.push(".out");
            PathBuf::from(name)
        }
    }
}

pub fn gunzip(path: &Path) -> Result<PathBuf, M2eError> {
    let target = gunzip_target(path);
    let input = fs::File::open(path)
        .map_err(|err| M2eError::Filesystem(format!("open {}: {err}", path.display())))?;
    let mut decoder = GzDecoder::new(io::BufReader::new(input));
    write_atomic(&target, |writer| {
        io::copy(&mut decoder, writer)
            .map(|_| ())
            .map_err(|err| M2eError::Filesystem(format!("decompress {}: {err}", path.display())))
    })?;
    fs::remove_file(path).map_err(|err| M2eError::Filesystem(err.to_string()))?;
    Ok(target)
}
