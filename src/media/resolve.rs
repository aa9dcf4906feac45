//! Locating the file the downloader produced.
//!
//! yt-dlp's console output is not a stable interface, so resolution happens in
//! two tiers: destination announcements seen on stdout first, then a scan of
//! the output directory for files carrying the output base name.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::Result;

static ANNOUNCEMENT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"^\[Merger\] Merging formats into "(?P<path>.+)"\s*$"#,
        r"^\[download\] Destination: (?P<path>.+?)\s*$",
        r"^\[download\] (?P<path>.+?) has already been downloaded",
        r#"^\[(?:VideoRemuxer|VideoConvertor|ExtractAudio)\] .*?(?:into|Destination:) "?(?P<path>[^"]+?)"?\s*$"#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid announcement pattern"))
    .collect()
});

/// Extract the path announced by one line of downloader output, if any
pub fn parse_announcement(line: &str) -> Option<&str> {
    let line = line.trim_start();
    ANNOUNCEMENT_PATTERNS
        .iter()
        .find_map(|re| re.captures(line))
        .and_then(|caps| caps.name("path"))
        .map(|m| m.as_str())
}

/// Whether `name` is a file produced from the base name `base_name`:
/// the base itself or the base followed by an extension.
pub fn artifact_matches(base_name: &str, name: &str) -> bool {
    match name.strip_prefix(base_name) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}

/// Fragments yt-dlp writes while downloading; never the finished file
fn is_fragment(name: &str) -> bool {
    name.ends_with(".part") || name.ends_with(".ytdl") || name.contains(".part-Frag")
}

/// Tracks destination announcements for one download
#[derive(Debug)]
pub struct DestinationResolver {
    output_base: PathBuf,
    announced: Option<PathBuf>,
}

impl DestinationResolver {
    pub fn new<P: AsRef<Path>>(output_base: P) -> Self {
        Self {
            output_base: output_base.as_ref().to_path_buf(),
            announced: None,
        }
    }

    /// Feed one stdout line. Later announcements win, so the merged file
    /// replaces the per-format files announced before it.
    pub fn observe(&mut self, line: &str) {
        let Some(path) = parse_announcement(line) else {
            return;
        };

        let base = self.output_base.to_string_lossy();
        if path.starts_with(base.as_ref()) {
            debug!("Downloader announced destination {}", path);
            self.announced = Some(PathBuf::from(path));
        } else {
            debug!("Ignoring announced path outside of output base: {}", path);
        }
    }

    pub fn announced(&self) -> Option<&Path> {
        self.announced.as_deref()
    }

    /// Resolve the downloaded file once the downloader exited successfully.
    ///
    /// An announced path is used when it exists on disk; otherwise the output
    /// directory is scanned.
    pub fn resolve(&self) -> Result<Option<PathBuf>> {
        if let Some(path) = &self.announced {
            if path.is_file() {
                return Ok(Some(path.clone()));
            }
            warn!(
                "Announced destination {} does not exist, scanning output directory",
                path.display()
            );
        } else {
            debug!("No destination announced, scanning output directory");
        }

        let found = find_artifacts(&self.output_base)?
            .into_iter()
            .find(|path| {
                path.file_name()
                    .map(|name| !is_fragment(&name.to_string_lossy()))
                    .unwrap_or(false)
            });

        if let Some(path) = &found {
            warn!("Resolved download through directory scan: {}", path.display());
        }
        Ok(found)
    }
}

/// List every file in the directory of `output_base` whose name derives from
/// its base name, sorted by name. A missing directory yields no files.
pub fn find_artifacts<P: AsRef<Path>>(output_base: P) -> Result<Vec<PathBuf>> {
    let output_base = output_base.as_ref();
    let Some(base_name) = output_base.file_name().map(|n| n.to_string_lossy().to_string()) else {
        return Ok(Vec::new());
    };
    let dir = match output_base.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = artifact_matches(&base_name, &entry.file_name().to_string_lossy());
        if matches {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_announcements() {
        assert_eq!(
            parse_announcement("[download] Destination: uploads/temp-muxed-1.mp4"),
            Some("uploads/temp-muxed-1.mp4")
        );
        assert_eq!(
            parse_announcement(r#"[Merger] Merging formats into "uploads/temp-muxed-1.mkv""#),
            Some("uploads/temp-muxed-1.mkv")
        );
        assert_eq!(
            parse_announcement("[download] uploads/temp-muxed-1.mp4 has already been downloaded"),
            Some("uploads/temp-muxed-1.mp4")
        );
        assert_eq!(parse_announcement("[youtube] 42: Downloading webpage"), None);
        assert_eq!(parse_announcement("[download]  42.0% of 10.00MiB"), None);
    }

    #[test]
    fn test_every_announcement_pattern_is_active() {
        assert_eq!(ANNOUNCEMENT_PATTERNS.len(), 4);
        assert_eq!(
            parse_announcement(r#"[VideoRemuxer] Remuxing video from "webm" to "mp4"; Destination: uploads/temp-muxed-1.mp4"#),
            Some("uploads/temp-muxed-1.mp4")
        );
    }

    #[test]
    fn test_artifact_matches_requires_extension_boundary() {
        assert!(artifact_matches("temp-muxed-1", "temp-muxed-1.mp4"));
        assert!(artifact_matches("temp-muxed-1", "temp-muxed-1.f137.mp4.part"));
        assert!(artifact_matches("temp-muxed-1", "temp-muxed-1"));
        assert!(!artifact_matches("temp-muxed-1", "temp-muxed-12.mp4"));
        assert!(!artifact_matches("temp-muxed-1", "clip-1.mp4"));
    }

    #[test]
    fn test_merger_announcement_overrides_format_destinations() {
        let mut resolver = DestinationResolver::new("uploads/temp-muxed-1");
        resolver.observe("[download] Destination: uploads/temp-muxed-1.f137.mp4");
        resolver.observe("[download] Destination: uploads/temp-muxed-1.f140.m4a");
        resolver.observe(r#"[Merger] Merging formats into "uploads/temp-muxed-1.mp4""#);
        assert_eq!(resolver.announced(), Some(Path::new("uploads/temp-muxed-1.mp4")));
    }

    #[test]
    fn test_foreign_announcement_is_ignored() {
        let mut resolver = DestinationResolver::new("uploads/temp-muxed-1");
        resolver.observe("[download] Destination: /tmp/elsewhere.mp4");
        assert!(resolver.announced().is_none());
    }

    #[test]
    fn test_scan_fallback_skips_fragments() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("temp-muxed-7");
        std::fs::write(dir.path().join("temp-muxed-7.mp4.part"), b"partial").unwrap();
        std::fs::write(dir.path().join("temp-muxed-7.webm"), b"video").unwrap();
        std::fs::write(dir.path().join("temp-muxed-70.mp4"), b"other job").unwrap();

        let resolver = DestinationResolver::new(&base);
        let resolved = resolver.resolve().unwrap();
        assert_eq!(resolved, Some(dir.path().join("temp-muxed-7.webm")));
    }

    #[test]
    fn test_announced_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("temp-muxed-8");
        let mut resolver = DestinationResolver::new(&base);
        resolver.observe(&format!("[download] Destination: {}.f137.mp4", base.display()));
        std::fs::write(dir.path().join("temp-muxed-8.mkv"), b"merged").unwrap();

        assert_eq!(resolver.resolve().unwrap(), Some(dir.path().join("temp-muxed-8.mkv")));
    }

    #[test]
    fn test_nothing_found() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = DestinationResolver::new(dir.path().join("temp-muxed-9"));
        assert_eq!(resolver.resolve().unwrap(), None);
        assert!(find_artifacts(dir.path().join("missing").join("temp-muxed-9")).unwrap().is_empty());
    }
}
