//! Session report: metadata.json, report.html and the zip archive
//!
//! Only unique frames make it into the report. The "actual year range" is
//! the first and last unique sample in scan order, not a chronological
//! min/max; Google Earth's timeline is ordered, so the two normally agree.

use crate::error::{CaptureError, Result};
use crate::scanner::ScanRange;
use crate::session::{CaptureSession, Coordinates, Sample, SessionState};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const METADATA_FILE_NAME: &str = "metadata.json";
pub const REPORT_FILE_NAME: &str = "report.html";

/// One gallery card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryEntry {
    /// 0-based display index
    pub index: usize,
    pub sequence_index: usize,
    pub filename: String,
    pub date_region_file: String,
    pub date: String,
    pub estimated_year: i32,
    pub ocr_text: Option<String>,
    pub pixel_x: f64,
    /// Position along the timeline strip, percent
    pub timeline_percent: f64,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub location: String,
    pub coordinates: Coordinates,
    pub capture_date: String,
    pub ended_at: Option<String>,
    pub duration_seconds: f64,
    pub target_year_range: String,
    pub captured_images: usize,
    pub actual_year_range: String,
    pub total_samples: usize,
    pub failed_probes: usize,
    pub status: SessionState,
    pub images: Vec<GalleryEntry>,
}

/// Files produced by `SessionReport::write`.
#[derive(Debug, Clone)]
pub struct ReportArtifacts {
    pub metadata: PathBuf,
    pub html: PathBuf,
    pub images: Vec<PathBuf>,
}

pub struct SessionReport<'a> {
    session: &'a CaptureSession,
    metadata: SessionMetadata,
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// `{location}_{dateKey}.png`; not unique when two samples share a key.
pub fn frame_file_name(stem: &str, sample: &Sample) -> String {
    format!("{}_{}.png", stem, sample.date_key())
}

pub fn date_region_file_name(sample: &Sample) -> String {
    format!("date_display_{}.png", sample.sequence_index)
}

impl<'a> SessionReport<'a> {
    pub fn new(session: &'a CaptureSession, scan: &ScanRange) -> Self {
        let stem = session.file_stem();

        let images: Vec<GalleryEntry> = session
            .unique_samples()
            .enumerate()
            .map(|(index, sample)| GalleryEntry {
                index,
                sequence_index: sample.sequence_index,
                filename: frame_file_name(&stem, sample),
                date_region_file: date_region_file_name(sample),
                date: sample.date.canonical.clone(),
                estimated_year: sample.estimated_year,
                ocr_text: sample.date.raw_ocr_text.clone(),
                pixel_x: sample.pixel_x,
                timeline_percent: scan.relative_percent(sample.pixel_x),
                sha256: sha256_hex(&sample.frame_bytes),
            })
            .collect();

        let actual_year_range = match (images.first(), images.last()) {
            (Some(first), Some(last)) => format!("{} to {}", first.date, last.date),
            _ => "N/A".to_string(),
        };

        let (start_year, current_year) = session.target_year_range;
        let metadata = SessionMetadata {
            location: session.location_label.clone(),
            coordinates: session.coordinates,
            capture_date: session.started_at.to_rfc3339(),
            ended_at: session.ended_at.map(|t| t.to_rfc3339()),
            duration_seconds: session.duration().num_milliseconds() as f64 / 1000.0,
            target_year_range: format!("{}-{}", start_year, current_year),
            captured_images: images.len(),
            actual_year_range,
            total_samples: session.samples.len(),
            failed_probes: session.failures.len(),
            status: session.state.clone(),
            images,
        };

        Self { session, metadata }
    }

    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.metadata.images
    }

    /// Self-contained gallery page referencing sibling image files.
    pub fn render_html(&self) -> String {
        let m = &self.metadata;
        let mut html = String::with_capacity(8 * 1024);

        html.push_str(&format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Historical imagery: {title}</title>
<style>
body {{ font-family: system-ui, sans-serif; margin: 0; padding: 24px; background: #10141a; color: #e8eaed; }}
h1 {{ margin-top: 0; font-weight: 500; }}
.summary {{ display: flex; flex-wrap: wrap; gap: 24px; margin-bottom: 24px; color: #9aa0a6; }}
.summary b {{ color: #e8eaed; }}
.timeline {{ position: relative; height: 48px; margin: 32px 0; border-bottom: 2px solid #5f6368; }}
.marker {{ position: absolute; bottom: -7px; width: 12px; height: 12px; margin-left: -6px; border-radius: 50%; background: #8ab4f8; cursor: pointer; }}
.marker span {{ position: absolute; bottom: 18px; left: 50%; transform: translateX(-50%); white-space: nowrap; font-size: 11px; color: #9aa0a6; }}
.gallery {{ display: grid; grid-template-columns: repeat(auto-fill, minmax(360px, 1fr)); gap: 20px; }}
.card {{ background: #1f242c; border-radius: 8px; overflow: hidden; }}
.card img.frame {{ width: 100%; display: block; cursor: zoom-in; }}
.card .info {{ padding: 12px 16px; font-size: 14px; line-height: 1.6; }}
.card .date {{ font-size: 18px; color: #8ab4f8; }}
.card img.crop {{ max-width: 100%; margin-top: 8px; border: 1px solid #3c4043; }}
.empty {{ padding: 48px; text-align: center; color: #9aa0a6; border: 1px dashed #3c4043; border-radius: 8px; }}
#viewer {{ display: none; position: fixed; inset: 0; background: rgba(0,0,0,.9); align-items: center; justify-content: center; }}
#viewer img {{ max-width: 95vw; max-height: 95vh; }}
</style>
</head>
<body>
<h1>Historical imagery: {title}</h1>
<div class="summary">
<div>Coordinates <b>{lat}, {lon}</b></div>
<div>Captured <b>{captured}</b></div>
<div>Duration <b>{duration:.0}s</b></div>
<div>Target years <b>{target}</b></div>
<div>Observed range <b>{actual}</b></div>
<div>Unique frames <b>{count}</b> of {total} samples</div>
</div>
"#,
            title = escape_html(&m.location),
            lat = m.coordinates.latitude,
            lon = m.coordinates.longitude,
            captured = escape_html(&m.capture_date),
            duration = m.duration_seconds,
            target = escape_html(&m.target_year_range),
            actual = escape_html(&m.actual_year_range),
            count = m.captured_images,
            total = m.total_samples,
        ));

        html.push_str("<div class=\"timeline\">\n");
        for entry in &m.images {
            html.push_str(&format!(
                "<div class=\"marker\" style=\"left: {:.2}%\" onclick=\"document.getElementById('card-{}').scrollIntoView({{behavior: 'smooth'}})\"><span>{}</span></div>\n",
                entry.timeline_percent,
                entry.index,
                escape_html(&entry.date)
            ));
        }
        html.push_str("</div>\n");

        if m.images.is_empty() {
            html.push_str("<div class=\"empty\">No unique frames were captured.</div>\n");
        } else {
            html.push_str("<div class=\"gallery\">\n");
            for entry in &m.images {
                let ocr = entry
                    .ocr_text
                    .as_deref()
                    .map(escape_html)
                    .unwrap_or_else(|| "Unknown".to_string());
                html.push_str(&format!(
                    r#"<div class="card" id="card-{index}">
<img class="frame" src="{file}" alt="{date}" loading="lazy">
<div class="info">
<div class="date">{date}</div>
<div>Estimated year: {year}</div>
<div>OCR text: {ocr}</div>
<div>Timeline position: x={x:.0}</div>
<img class="crop" src="{crop}" alt="date label">
</div>
</div>
"#,
                    index = entry.index,
                    file = escape_html(&entry.filename),
                    date = escape_html(&entry.date),
                    year = entry.estimated_year,
                    ocr = ocr,
                    x = entry.pixel_x,
                    crop = escape_html(&entry.date_region_file),
                ));
            }
            html.push_str("</div>\n");
        }

        html.push_str(
            r#"<div id="viewer" onclick="this.style.display='none'"><img alt=""></div>
<script>
document.querySelectorAll('img.frame').forEach(function (img) {
  img.addEventListener('click', function () {
    var viewer = document.getElementById('viewer');
    viewer.querySelector('img').src = img.src;
    viewer.style.display = 'flex';
  });
});
</script>
</body>
</html>
"#,
        );

        html
    }

    /// Write images, metadata.json and report.html into `dir`.
    pub async fn write(&self, dir: &Path) -> Result<ReportArtifacts> {
        tokio::fs::create_dir_all(dir).await?;

        let mut images = Vec::new();
        let mut written = HashSet::new();
        for (entry, sample) in self.entries().iter().zip(self.session.unique_samples()) {
            if !written.insert(entry.filename.clone()) {
                log::warn!(
                    "{} already written by an earlier sample; overwriting with sample {}",
                    entry.filename,
                    sample.sequence_index
                );
            }
            let frame_path = dir.join(&entry.filename);
            tokio::fs::write(&frame_path, &sample.frame_bytes).await?;
            images.push(frame_path);

            if !sample.date_region_bytes.is_empty() {
                let crop_path = dir.join(&entry.date_region_file);
                tokio::fs::write(&crop_path, &sample.date_region_bytes).await?;
                images.push(crop_path);
            }
        }

        let metadata = dir.join(METADATA_FILE_NAME);
        tokio::fs::write(&metadata, serde_json::to_string_pretty(&self.metadata)?).await?;

        let html = dir.join(REPORT_FILE_NAME);
        tokio::fs::write(&html, self.render_html()).await?;

        log::info!(
            "Report written: {} unique frames, range {}",
            self.metadata.captured_images,
            self.metadata.actual_year_range
        );

        Ok(ReportArtifacts {
            metadata,
            html,
            images,
        })
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Zip every file under `dir` into `dest` at maximum Deflate compression.
///
/// Entries are stored under the directory's own name, so extracting the
/// archive recreates the session folder.
pub fn create_archive(dir: &Path, dest: &Path) -> Result<PathBuf> {
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    fn archive_err(e: impl std::fmt::Display) -> CaptureError {
        CaptureError::Archive(e.to_string())
    }

    let root_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| CaptureError::Archive(format!("{} has no name", dir.display())))?;

    let file = std::fs::File::create(dest).map_err(|e| archive_err(&e))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9));

    let mut pending = vec![dir.to_path_buf()];
    let mut files = Vec::new();
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current).map_err(|e| archive_err(&e))? {
            let path = entry.map_err(|e| archive_err(&e))?.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();

    for path in files {
        let relative = path
            .strip_prefix(dir)
            .map_err(|e| archive_err(&e))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/");
        let bytes = std::fs::read(&path).map_err(|e| archive_err(&e))?;
        zip.start_file(format!("{}/{}", root_name, relative), options)
            .map_err(|e| archive_err(&e))?;
        zip.write_all(&bytes).map_err(|e| archive_err(&e))?;
    }

    zip.finish().map_err(|e| archive_err(&e))?;
    Ok(dest.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date::{estimate_key, DateResolution, DateSource};

    fn sample(sequence_index: usize, pixel_x: f64, year: i32, unique: bool) -> Sample {
        Sample {
            sequence_index,
            pixel_x,
            estimated_year: year,
            frame_bytes: vec![sequence_index as u8; 10],
            date_region_bytes: vec![1, 2, 3],
            date: DateResolution {
                canonical: estimate_key(year),
                estimated_year: year,
                raw_ocr_text: None,
                source: DateSource::Estimate,
            },
            is_unique_frame: unique,
        }
    }

    fn session_with(samples: Vec<Sample>) -> CaptureSession {
        let coords: Coordinates = "5.5555,-0.2616".parse().unwrap();
        let mut session = CaptureSession::new("5.5555,-0.2616", coords, 2019);
        for s in samples {
            session.push_sample(s);
        }
        session.finish();
        session
    }

    #[test]
    fn test_empty_session_report() {
        let session = session_with(vec![]);
        let report = SessionReport::new(&session, &ScanRange::default());
        assert_eq!(report.metadata().captured_images, 0);
        assert_eq!(report.metadata().actual_year_range, "N/A");

        let html = report.render_html();
        assert!(html.contains("No unique frames"));
        assert!(!html.contains("class=\"card\""));
        assert!(html.trim_end().ends_with("</html>"));
    }

    #[test]
    fn test_year_range_follows_scan_order() {
        // Out of chronological order on purpose
        let session = session_with(vec![
            sample(1, 400.0, 2018, true),
            sample(2, 700.0, 2010, true),
            sample(3, 1000.0, 2012, false),
        ]);
        let report = SessionReport::new(&session, &ScanRange::default());
        assert_eq!(report.metadata().actual_year_range, "est_2018 to est_2010");
        assert_eq!(report.metadata().total_samples, 3);
        assert_eq!(report.entries().len(), 2);
        assert_eq!(report.entries()[1].index, 1);
        assert_eq!(report.entries()[1].sequence_index, 2);
    }

    #[test]
    fn test_entry_file_names_and_timeline_position() {
        let session = session_with(vec![sample(4, 1000.0, 2013, true)]);
        let report = SessionReport::new(&session, &ScanRange::default());
        let entry = &report.entries()[0];
        assert_eq!(entry.filename, "5_5555_0_2616_est_2013.png");
        assert_eq!(entry.date_region_file, "date_display_4.png");
        assert_eq!(entry.timeline_percent, 50.0);
        assert_eq!(entry.sha256.len(), 64);

        let html = report.render_html();
        assert!(html.contains("OCR text: Unknown"));
        assert!(html.contains("left: 50.00%"));
    }

    #[test]
    fn test_metadata_json_field_names() {
        let session = session_with(vec![sample(1, 400.0, 2002, true)]);
        let report = SessionReport::new(&session, &ScanRange::default());
        let json = serde_json::to_value(report.metadata()).unwrap();
        assert_eq!(json["capturedImages"], 1);
        assert_eq!(json["actualYearRange"], "est_2002 to est_2002");
        assert_eq!(json["status"]["state"], "completed");
        assert!(json["targetYearRange"].as_str().unwrap().starts_with("2019-"));
        assert_eq!(json["images"][0]["dateRegionFile"], "date_display_1.png");
    }

    #[tokio::test]
    async fn test_colliding_date_keys_share_one_file() {
        let mut later = sample(2, 460.0, 2003, true);
        later.frame_bytes = vec![9; 20];
        let session = session_with(vec![sample(1, 430.0, 2003, true), later]);
        let report = SessionReport::new(&session, &ScanRange::default());
        assert_eq!(report.entries().len(), 2);
        assert_eq!(report.entries()[0].filename, report.entries()[1].filename);

        let dir = std::env::temp_dir().join("earth-history-report-collision-test");
        let artifacts = report.write(&dir).await.unwrap();

        let frames: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name.ends_with("_est_2003.png"))
            .collect();
        assert_eq!(frames, vec!["5_5555_0_2616_est_2003.png".to_string()]);
        // Last writer wins
        assert_eq!(std::fs::read(dir.join(&frames[0])).unwrap(), vec![9; 20]);
        assert!(dir.join("date_display_1.png").exists());
        assert!(dir.join("date_display_2.png").exists());

        let html = std::fs::read_to_string(&artifacts.html).unwrap();
        assert_eq!(html.matches("class=\"card\"").count(), 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<b>\"Jan\" & 'Feb'</b>"),
            "&lt;b&gt;&quot;Jan&quot; &amp; &#39;Feb&#39;&lt;/b&gt;"
        );
    }
}
