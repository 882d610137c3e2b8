pub mod visualization;

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use image::{RgbImage, codecs::jpeg::JpegEncoder};
use serde::Serialize;
use tempfile::TempDir;

use crate::{
    MatchStats, VerificationResult,
    detection::Stage,
    error::Result,
};

const STAGED_JPEG_QUALITY: u8 = 92;

#[derive(Debug, Clone, Serialize)]
pub struct JsonReport {
    pub verdict: String,
    pub belongs: bool,
    pub reason: Option<String>,
    pub stage: Stage,
    pub reference_path: Option<String>,
    pub crop_path: Option<String>,
    pub reference_size: [u32; 2],
    pub crop_size: [u32; 2],
    pub matches: MatchStats,
    pub localization: Option<LocalizationSection>,
    pub log: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocalizationSection {
    /// Row-major crop-to-reference matrix, normalized so the last entry is 1.
    pub homography: [[f64; 3]; 3],
    pub footprint: [[f64; 2]; 4],
    pub inlier_rms: f64,
}

impl From<&VerificationResult> for JsonReport {
    fn from(result: &VerificationResult) -> Self {
        Self {
            verdict: result.verdict.tag().to_string(),
            belongs: result.belongs(),
            reason: result.verdict.reason().map(|r| r.to_string()),
            stage: result.stage,
            reference_path: None,
            crop_path: None,
            reference_size: [result.reference.width(), result.reference.height()],
            crop_size: [result.crop.width(), result.crop.height()],
            matches: result.stats,
            localization: result.localization.as_ref().map(|l| LocalizationSection {
                homography: l.homography.to_rows(),
                footprint: l.footprint.map(|p| [p.x, p.y]),
                inlier_rms: l.inlier_rms,
            }),
            log: result.log.lines().to_vec(),
        }
    }
}

impl JsonReport {
    pub fn with_sources<P: AsRef<Path>, Q: AsRef<Path>>(mut self, reference: P, crop: Q) -> Self {
        self.reference_path = Some(reference.as_ref().to_string_lossy().to_string());
        self.crop_path = Some(crop.as_ref().to_string_lossy().to_string());
        self
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// JPEG copies of the result images, owned by a temporary directory that is
/// removed when this value is dropped or released.
pub struct StagedImages {
    dir: TempDir,
    pub reference: PathBuf,
    pub crop: PathBuf,
    pub overlay: Option<PathBuf>,
}

impl StagedImages {
    pub fn stage(result: &VerificationResult) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("crop-report-").tempdir()?;

        let reference = write_jpeg(&result.reference, &dir.path().join("reference.jpg"))?;
        let crop = write_jpeg(&result.crop, &dir.path().join("crop.jpg"))?;
        let overlay = result
            .overlay()
            .map(|overlay| write_jpeg(overlay, &dir.path().join("overlay.jpg")))
            .transpose()?;

        log::debug!("staged report images in {}", dir.path().display());

        Ok(Self {
            dir,
            reference,
            crop,
            overlay,
        })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Deletes the staged files, surfacing any cleanup error.
    pub fn release(self) -> Result<()> {
        self.dir.close()?;
        Ok(())
    }
}

fn write_jpeg(image: &RgbImage, path: &Path) -> Result<PathBuf> {
    let mut writer = BufWriter::new(File::create(path)?);
    let encoder = JpegEncoder::new_with_quality(&mut writer, STAGED_JPEG_QUALITY);
    image.write_with_encoder(encoder)?;
    writer.flush()?;
    Ok(path.to_path_buf())
}

/// Everything a renderer may place in the document.
pub struct ReportDocument<'a> {
    pub report: &'a JsonReport,
    pub images: &'a StagedImages,
}

/// Assembles a report document at `output`.
pub trait DocumentRenderer {
    fn render(&self, document: &ReportDocument<'_>, output: &Path) -> Result<()>;
}

/// Writes the report as pretty JSON and copies the images next to it as
/// `<stem>_reference.jpg`, `<stem>_crop.jpg` and `<stem>_overlay.jpg`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReportRenderer;

impl DocumentRenderer for JsonReportRenderer {
    fn render(&self, document: &ReportDocument<'_>, output: &Path) -> Result<()> {
        fs::write(output, document.report.to_json()?)?;

        let stem = output
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "report".to_string());
        let dir = output.parent().unwrap_or_else(|| Path::new(""));

        let images = [
            ("reference", Some(&document.images.reference)),
            ("crop", Some(&document.images.crop)),
            ("overlay", document.images.overlay.as_ref()),
        ];
        for (name, staged) in images {
            if let Some(staged) = staged {
                fs::copy(staged, dir.join(format!("{stem}_{name}.jpg")))?;
            }
        }

        Ok(())
    }
}

/// Stages the result images, renders the document, then removes the staged
/// files whether or not rendering succeeded.
pub fn generate_report<R, P, Q>(
    renderer: &R,
    result: &VerificationResult,
    reference_path: P,
    crop_path: Q,
    output: &Path,
) -> Result<()>
where
    R: DocumentRenderer + ?Sized,
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let report = JsonReport::from(result).with_sources(reference_path, crop_path);
    let images = StagedImages::stage(result)?;

    let rendered = renderer.render(
        &ReportDocument {
            report: &report,
            images: &images,
        },
        output,
    );
    let released = images.release();

    rendered?;
    released?;

    log::info!("report written to {}", output.display());
    Ok(())
}
