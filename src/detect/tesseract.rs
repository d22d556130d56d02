use anyhow::{Context, Result, anyhow};
use image::RgbaImage;
use std::io::Write;
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

use super::{RawRegion, TextDetector, merge, parse, preprocess};
use crate::unit::Geometry;

/// Detector backed by the `tesseract` command line tool.
pub struct TesseractDetector {
    /// Page segmentation modes tried on the first preprocessing variant.
    primary_psm: Vec<u32>,
}

impl TesseractDetector {
    pub fn new() -> Self {
        Self {
            primary_psm: vec![6, 4],
        }
    }
}

impl Default for TesseractDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl TextDetector for TesseractDetector {
    fn detect(&self, image: &RgbaImage, hints: &[String]) -> Result<Vec<RawRegion>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }
        let languages = select_languages(hints)?;
        let scale = preprocess::scale_for(width);

        let mut lines = Vec::new();
        for (variant_idx, variant) in preprocess::variants(image, scale).into_iter().enumerate() {
            let mut tmp = tempfile::Builder::new()
                .suffix(".png")
                .tempfile()
                .with_context(|| "failed to create temp file for recognition")?;
            variant
                .write_to(&mut tmp, image::ImageFormat::Png)
                .with_context(|| "failed to write temp image for recognition")?;
            tmp.flush().ok();

            let psm_list: &[u32] = if variant_idx == 0 { &self.primary_psm } else { &[4] };
            for psm in psm_list {
                let tsv = run_tesseract_tsv(tmp.path(), &languages, *psm)?;
                lines = merge::merge_passes(lines, parse::parse_tsv_lines(&tsv));
            }
        }

        let lines = merge::unscale(lines, scale);
        let lines = merge::filter_implausible(lines, width, height);
        let lines = merge::merge_inline(lines);
        let lines = merge::suppress_duplicates(lines);
        debug!(lines = lines.len(), "tesseract recognized lines");

        Ok(lines
            .into_iter()
            .filter_map(|line| {
                let bbox = line.bbox.clamp_to(width, height)?;
                Some(RawRegion {
                    geometry: Geometry::from_bbox(bbox),
                    text: line.text,
                    confidence: (line.conf / 100.0).clamp(0.0, 1.0),
                    orientation: None,
                })
            })
            .collect())
    }
}

pub fn list_tesseract_languages() -> Result<Vec<String>> {
    let output = Command::new("tesseract")
        .arg("--list-langs")
        .output()
        .with_context(|| "failed to run tesseract --list-langs")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("tesseract --list-langs failed: {}", stderr.trim()));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect())
}

/// Keeps the hinted languages tesseract actually has installed.
fn select_languages(hints: &[String]) -> Result<String> {
    let requested = hints
        .iter()
        .flat_map(|hint| hint.split(['+', ',', ' ']))
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
        .collect::<Vec<_>>();
    if requested.is_empty() {
        return Ok("eng".to_string());
    }

    let Ok(available) = list_tesseract_languages() else {
        return Ok(requested.join("+"));
    };
    let (chosen, missing): (Vec<&str>, Vec<&str>) = requested
        .into_iter()
        .partition(|lang| available.iter().any(|value| value == lang));
    if chosen.is_empty() {
        return Err(anyhow!(
            "recognition language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        ));
    }
    if !missing.is_empty() {
        warn!(
            "recognition language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        );
    }
    Ok(chosen.join("+"))
}

fn run_tesseract_tsv(path: &Path, languages: &str, psm: u32) -> Result<String> {
    let output = Command::new("tesseract")
        .arg(path)
        .arg("stdout")
        .arg("-l")
        .arg(languages)
        .arg("--oem")
        .arg("1")
        .arg("--psm")
        .arg(psm.to_string())
        .arg("--dpi")
        .arg("300")
        .arg("tsv")
        .output()
        .with_context(|| "failed to run tesseract (is it installed?)")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("tesseract failed: {}", stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
