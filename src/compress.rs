//! gzip compression for single files and tar+gzip for folders
//!
//! Folder transfer is reduced to file transfer: a folder becomes one
//! `<name>.tar.gz` artifact, so the wire protocol never needs more than a
//! single stream.

use crate::error::CompressError;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};
use walkdir::WalkDir;

type Result<T> = std::result::Result<T, CompressError>;

pub const GZ_SUFFIX: &str = ".gz";
pub const TAR_GZ_SUFFIX: &str = ".tar.gz";
pub const TGZ_SUFFIX: &str = ".tgz";
const TAR_SUFFIX: &str = ".tar";
/// Used when a file to decompress does not carry the `.gz` suffix
const FALLBACK_SUFFIX: &str = ".out";

const IO_BUFFER: usize = 64 * 1024;

/// A file holding gzip-compressed bytes, ready to be sent.
///
/// Temporary artifacts live alone inside a scratch directory; `cleanup`
/// removes both.
#[derive(Debug)]
pub struct CompressedArtifact {
    path: PathBuf,
    is_temporary: bool,
    scratch_dir: Option<PathBuf>,
}

impl CompressedArtifact {
    /// An artifact the caller keeps (no cleanup owed).
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            is_temporary: false,
            scratch_dir: None,
        }
    }

    /// An artifact created inside `scratch_dir`, removed by [`cleanup`](Self::cleanup).
    pub fn temporary(path: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            is_temporary: true,
            scratch_dir: Some(scratch_dir.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temporary(&self) -> bool {
        self.is_temporary
    }

    /// Remove a temporary artifact. No-op for persistent ones.
    pub fn cleanup(&self) -> io::Result<()> {
        if !self.is_temporary {
            return Ok(());
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        if let Some(dir) = &self.scratch_dir {
            match fs::remove_dir(dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// True when the file name ends in `.gz`, ignoring case.
pub fn has_gz_suffix(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase().ends_with(GZ_SUFFIX))
        .unwrap_or(false)
}

fn strip_suffix_ci<'a>(name: &'a str, suffix: &str) -> Option<&'a str> {
    let cut = name.len().checked_sub(suffix.len())?;
    if !name.is_char_boundary(cut) {
        return None;
    }
    let (stem, tail) = name.split_at(cut);
    tail.eq_ignore_ascii_case(suffix).then_some(stem)
}

fn base_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            CompressError::io(
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
            )
        })
}

/// Compress `source` into `<source>.gz` next to it.
pub fn compress_file(source: &Path) -> Result<CompressedArtifact> {
    let mut dest = source.as_os_str().to_owned();
    dest.push(GZ_SUFFIX);
    compress_file_to(source, Path::new(&dest))
}

/// Compress `source` into `dest` at maximum compression level.
pub fn compress_file_to(source: &Path, dest: &Path) -> Result<CompressedArtifact> {
    let input = File::open(source).map_err(|e| CompressError::io(source, e))?;
    gzip_stream(BufReader::with_capacity(IO_BUFFER, input), dest)?;
    Ok(CompressedArtifact::persistent(dest))
}

/// Gzip `reader` into `dest`. A failed write never leaves a partial `dest`.
fn gzip_stream<R: Read>(reader: R, dest: &Path) -> Result<()> {
    let out = File::create(dest).map_err(|e| CompressError::io(dest, e))?;
    write_gzip(reader, out).map_err(|e| discard_intermediate(dest, CompressError::io(dest, e)))
}

fn write_gzip<R: Read>(mut reader: R, out: File) -> io::Result<()> {
    let mut encoder = GzEncoder::new(BufWriter::with_capacity(IO_BUFFER, out), Compression::best());
    io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?.flush()
}

/// Default output name for a `.gz` file: the suffix stripped, or `.out` appended.
pub fn default_decompressed_name(source: &Path) -> Result<String> {
    let name = base_name(source)?;
    match strip_suffix_ci(&name, GZ_SUFFIX) {
        Some(stem) if !stem.is_empty() => Ok(stem.to_string()),
        _ => Ok(format!("{name}{FALLBACK_SUFFIX}")),
    }
}

/// Decompress `source` into `output_dir`, naming the result after the source.
pub fn decompress_file(source: &Path, output_dir: &Path) -> Result<PathBuf> {
    let dest = output_dir.join(default_decompressed_name(source)?);
    decompress_file_to(source, &dest)?;
    Ok(dest)
}

/// Decompress `source` into `dest`; returns bytes written.
///
/// Corrupt headers and CRC mismatches surface as [`CompressError::Io`].
pub fn decompress_file_to(source: &Path, dest: &Path) -> Result<u64> {
    let mut decoder = gzip_reader(source)?;
    let out = File::create(dest).map_err(|e| CompressError::io(dest, e))?;
    let mut writer = BufWriter::with_capacity(IO_BUFFER, out);
    let n = io::copy(&mut decoder, &mut writer).map_err(|e| CompressError::io(source, e))?;
    writer.flush().map_err(|e| CompressError::io(dest, e))?;
    Ok(n)
}

/// Open a gzip file for streaming reads.
pub fn gzip_reader(source: &Path) -> Result<MultiGzDecoder<BufReader<File>>> {
    let input = File::open(source).map_err(|e| CompressError::io(source, e))?;
    Ok(MultiGzDecoder::new(BufReader::with_capacity(IO_BUFFER, input)))
}

/// Archive `source_dir` as `<output_dir>/<folder>.tar.gz`.
///
/// Stages: tar the folder (rooted at its base name), gzip the tar, remove
/// the tar. A failed stage removes what it left behind; if that removal
/// fails too the result is [`CompressError::Leak`].
pub fn compress_folder(source_dir: &Path, output_dir: &Path) -> Result<CompressedArtifact> {
    if !source_dir.is_dir() {
        return Err(CompressError::io(
            source_dir,
            io::Error::new(io::ErrorKind::NotFound, "not a directory"),
        ));
    }
    let folder = base_name(source_dir)?;
    let tar_path = output_dir.join(format!("{folder}{TAR_SUFFIX}"));
    let gz_path = output_dir.join(format!("{folder}{TAR_GZ_SUFFIX}"));

    if let Err(e) = build_tar(source_dir, &folder, &tar_path) {
        return Err(discard_intermediate(&tar_path, e));
    }

    let gz_result = File::open(&tar_path)
        .map_err(|e| CompressError::io(&tar_path, e))
        .and_then(|f| gzip_stream(BufReader::with_capacity(IO_BUFFER, f), &gz_path));
    if let Err(e) = gz_result {
        // gzip_stream already discarded its own partial output
        return Err(discard_intermediate(&tar_path, e));
    }

    fs::remove_file(&tar_path).map_err(|e| CompressError::Leak {
        path: tar_path.clone(),
        cause: "archive complete".to_string(),
        source: e,
    })?;
    Ok(CompressedArtifact::persistent(gz_path))
}

fn discard_intermediate(path: &Path, cause: CompressError) -> CompressError {
    match fs::remove_file(path) {
        Ok(()) => cause,
        Err(e) if e.kind() == io::ErrorKind::NotFound => cause,
        Err(e) => CompressError::Leak {
            path: path.to_path_buf(),
            cause: cause.to_string(),
            source: e,
        },
    }
}

fn build_tar(source_dir: &Path, root_name: &str, tar_path: &Path) -> Result<()> {
    let out = File::create(tar_path).map_err(|e| CompressError::io(tar_path, e))?;
    let mut builder = Builder::new(BufWriter::with_capacity(IO_BUFFER, out));
    // Links are archived as links, so broken or outward links never fail or leak
    builder.follow_symlinks(false);
    let root = Path::new(root_name);

    // Sorted walk keeps archives reproducible for the same tree
    for entry in WalkDir::new(source_dir).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| CompressError::archive(source_dir, e.into()))?;
        let path = entry.path();
        let rel = path.strip_prefix(source_dir).unwrap_or(path);
        let name = root.join(rel);
        let appended = if entry.file_type().is_dir() {
            builder.append_dir(&name, path)
        } else {
            builder.append_path_with_name(path, &name)
        };
        appended.map_err(|e| CompressError::archive(path, e))?;
    }

    let mut writer = builder
        .into_inner()
        .map_err(|e| CompressError::archive(tar_path, e))?;
    writer.flush().map_err(|e| CompressError::io(tar_path, e))?;
    Ok(())
}

/// Folder name an archive extracts into: the base name without `.tar.gz`/`.tgz`.
pub fn archive_stem(source: &Path) -> Result<String> {
    let name = base_name(source)?;
    let stem = strip_suffix_ci(&name, TAR_GZ_SUFFIX)
        .or_else(|| strip_suffix_ci(&name, TGZ_SUFFIX))
        .unwrap_or(&name);
    if stem.is_empty() {
        return Err(CompressError::io(
            source,
            io::Error::new(io::ErrorKind::InvalidInput, "archive name has no stem"),
        ));
    }
    Ok(stem.to_string())
}

/// Extract a `.tar.gz` into `<output_dir>/<stem>`; returns that directory.
pub fn decompress_folder(source: &Path, output_dir: &Path) -> Result<PathBuf> {
    let target = output_dir.join(archive_stem(source)?);
    let decoder = gzip_reader(source)?;
    fs::create_dir_all(&target).map_err(|e| CompressError::io(&target, e))?;
    let mut archive = Archive::new(decoder);
    archive
        .unpack(&target)
        .map_err(|e| CompressError::archive(source, e))?;
    Ok(target)
}

/// True for names handled by [`decompress_folder`].
pub fn is_folder_archive(path: &Path) -> bool {
    path.file_name()
        .map(|n| {
            let n = n.to_string_lossy().to_ascii_lowercase();
            n.ends_with(TAR_GZ_SUFFIX) || n.ends_with(TGZ_SUFFIX)
        })
        .unwrap_or(false)
}

/// Decompress by suffix: folder archives are extracted, anything else is
/// treated as a single gzip file.
pub fn decompress_auto(source: &Path, output_dir: &Path) -> Result<PathBuf> {
    if is_folder_archive(source) {
        decompress_folder(source, output_dir)
    } else {
        decompress_file(source, output_dir)
    }
}

/// Compress by kind: folders become `.tar.gz`, files `.gz`, both in `output_dir`.
pub fn compress_auto(source: &Path, output_dir: &Path) -> Result<CompressedArtifact> {
    if source.is_dir() {
        compress_folder(source, output_dir)
    } else {
        let dest = output_dir.join(format!("{}{GZ_SUFFIX}", base_name(source)?));
        compress_file_to(source, &dest)
    }
}
