use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;

/// Cheap first-stage filter: a line must contain one of these literals
/// before the regex ever sees it. The raw transcript is multiple GB, so the
/// pass has to stay a plain substring scan.
pub const STAGE_ONE_MARKERS: &[&str] = &["=== Plex Backup", "total size is", "sent "];

static MARKER_FILTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"=== Plex Backup (Started|Completed|FAILED)|sent .* bytes.*received|total size is .* speedup",
    )
    .expect("valid marker filter")
});

const DEADLINE_CHECK_EVERY: usize = 4096;

/// Scans the raw transcript once and writes the matching marker lines, in
/// order, to `cache_path` (via a temp file, so a half-written cache is never
/// observed). Best effort: a missing transcript, an I/O failure, or running
/// past the deadline yields `None` rather than an error — enrichment simply
/// has no cache to work from.
pub fn extract_stats_file(
    log_path: &Path,
    cache_path: &Path,
    timeout: Duration,
) -> Option<PathBuf> {
    let file = File::open(log_path).ok()?;
    if let Some(parent) = cache_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).ok()?;
    }
    let tmp_path = cache_path.with_extension("tmp");
    let tmp = File::create(&tmp_path).ok()?;

    let deadline = Instant::now() + timeout;
    match copy_marker_lines(BufReader::new(file), BufWriter::new(tmp), deadline) {
        Ok(true) => {
            fs::rename(&tmp_path, cache_path).ok()?;
            Some(cache_path.to_path_buf())
        }
        Ok(false) | Err(_) => {
            let _ = fs::remove_file(&tmp_path);
            None
        }
    }
}

fn copy_marker_lines(
    mut reader: impl BufRead,
    mut writer: impl Write,
    deadline: Instant,
) -> std::io::Result<bool> {
    let mut buf = Vec::new();
    let mut lines_since_check = 0usize;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        lines_since_check += 1;
        if lines_since_check >= DEADLINE_CHECK_EVERY {
            lines_since_check = 0;
            if Instant::now() >= deadline {
                return Ok(false);
            }
        }
        // rsync output is not guaranteed to be clean UTF-8.
        let text = String::from_utf8_lossy(&buf);
        if !STAGE_ONE_MARKERS.iter().any(|marker| text.contains(marker)) {
            continue;
        }
        if !MARKER_FILTER_RE.is_match(&text) {
            continue;
        }
        writer.write_all(&buf)?;
    }
    writer.flush()?;
    Ok(true)
}
