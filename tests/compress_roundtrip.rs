use anyhow::Result;
use gzdrop::compress;
use gzdrop::logger::NoopLogger;
use gzdrop::logrotate;
use std::io::Write;
use std::path::Path;

fn write_file(path: &Path, size: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut f = std::fs::File::create(path)?;
    let mut buf = vec![0u8; 1024 * 64];
    let mut remaining = size;
    let mut val: u8 = 0;
    while remaining > 0 {
        for b in buf.iter_mut() {
            *b = val;
            val = val.wrapping_add(1);
        }
        let n = remaining.min(buf.len());
        f.write_all(&buf[..n])?;
        remaining -= n;
    }
    Ok(())
}

#[test]
fn auto_dispatch_handles_files_and_folders() -> Result<()> {
    let work = tempfile::tempdir()?;
    let packed = tempfile::tempdir()?;
    let unpacked = tempfile::tempdir()?;

    write_file(&work.path().join("report.csv"), 300_000)?;
    write_file(&work.path().join("project/src/main.c"), 5_000)?;
    write_file(&work.path().join("project/README"), 0)?;

    let file_gz = compress::compress_auto(&work.path().join("report.csv"), packed.path())?;
    let dir_gz = compress::compress_auto(&work.path().join("project"), packed.path())?;
    assert_eq!(file_gz.path(), packed.path().join("report.csv.gz"));
    assert_eq!(dir_gz.path(), packed.path().join("project.tar.gz"));
    assert!(compress::is_folder_archive(dir_gz.path()));
    assert!(!compress::is_folder_archive(file_gz.path()));

    let file_out = compress::decompress_auto(file_gz.path(), unpacked.path())?;
    assert_eq!(
        std::fs::read(&file_out)?,
        std::fs::read(work.path().join("report.csv"))?
    );

    let dir_out = compress::decompress_auto(dir_gz.path(), unpacked.path())?;
    assert_eq!(dir_out, unpacked.path().join("project"));
    assert_eq!(
        std::fs::read(dir_out.join("project/src/main.c"))?,
        std::fs::read(work.path().join("project/src/main.c"))?
    );
    assert_eq!(std::fs::metadata(dir_out.join("project/README"))?.len(), 0);
    Ok(())
}

#[test]
fn folder_archives_are_reproducible() -> Result<()> {
    let work = tempfile::tempdir()?;
    write_file(&work.path().join("data/b.bin"), 10_000)?;
    write_file(&work.path().join("data/a.bin"), 10_000)?;

    let first = tempfile::tempdir()?;
    let second = tempfile::tempdir()?;
    let a = compress::compress_folder(&work.path().join("data"), first.path())?;
    let b = compress::compress_folder(&work.path().join("data"), second.path())?;
    assert_eq!(std::fs::read(a.path())?, std::fs::read(b.path())?);
    Ok(())
}

#[test]
fn rotated_log_reads_back() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let log = dir.path().join("app.log");
    std::fs::write(&log, "[2024-01-01 00:00:00] [INFO] Receiver - Listening\n")?;

    let archive = logrotate::rotate(&log, 2, &NoopLogger)?.expect("log had content");
    assert!(compress::has_gz_suffix(&archive));
    assert!(logrotate::read_log(&archive)?.contains("Receiver - Listening"));
    assert_eq!(logrotate::read_log(&log)?, "");
    Ok(())
}
