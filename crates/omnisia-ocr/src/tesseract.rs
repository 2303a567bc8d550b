//! Tesseract / ocrmypdf subprocess backend.
//!
//! Images go through `tesseract <image> stdout -l <lang>`. PDFs go through
//! `ocrmypdf --sidecar <txt>` into a scratch directory; the sidecar holds the
//! recognised text.

use std::ffi::OsStr;
use std::path::Path;

use async_trait::async_trait;
use omnisia_core::config::OcrConfig;
use omnisia_core::error::OmnisiaError;
use tokio::process::Command;
use tracing::{debug, info};

use crate::{OcrInput, OcrService};

#[derive(Debug, Clone)]
pub struct TesseractOcrService {
    tesseract_bin: String,
    ocrmypdf_bin: String,
    language: String,
}

impl TesseractOcrService {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            tesseract_bin: config.tesseract_bin.clone(),
            ocrmypdf_bin: config.ocrmypdf_bin.clone(),
            language: config.language.clone(),
        }
    }

    async fn ocr_image(&self, path: &Path) -> Result<String, OmnisiaError> {
        let mut cmd = Command::new(&self.tesseract_bin);
        cmd.arg(path).arg("stdout");
        if !self.language.is_empty() {
            cmd.args(["-l", &self.language]);
        }
        let stdout = run(&mut cmd, &self.tesseract_bin).await?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    async fn ocr_pdf(&self, path: &Path) -> Result<String, OmnisiaError> {
        let scratch = tempfile::tempdir()?;
        let sidecar = scratch.path().join("ocr.txt");
        let output = scratch.path().join("ocr.pdf");

        let mut cmd = Command::new(&self.ocrmypdf_bin);
        cmd.arg("--skip-text").arg("--sidecar").arg(&sidecar);
        if !self.language.is_empty() {
            cmd.args(["-l", &self.language]);
        }
        cmd.arg(path).arg(&output);
        run(&mut cmd, &self.ocrmypdf_bin).await?;

        let text = tokio::fs::read_to_string(&sidecar).await.map_err(|e| {
            OmnisiaError::Ocr(format!("failed to read OCR sidecar {}: {}", sidecar.display(), e))
        })?;
        Ok(text)
    }
}

#[async_trait]
impl OcrService for TesseractOcrService {
    async fn extract_text(&self, path: &Path) -> Result<String, OmnisiaError> {
        let input = OcrInput::from_path(path)?;
        if !path.is_file() {
            return Err(OmnisiaError::Ocr(format!("file not found: {}", path.display())));
        }

        let text = match input {
            OcrInput::Image => self.ocr_image(path).await?,
            OcrInput::Pdf => self.ocr_pdf(path).await?,
        };

        info!(
            path = %path.display(),
            kind = ?input,
            chars = text.chars().count(),
            "OCR completed"
        );
        Ok(text)
    }

    fn name(&self) -> &str {
        "tesseract"
    }
}

/// Run `cmd` to completion, returning stdout or an OCR error carrying stderr.
async fn run(cmd: &mut Command, program: impl AsRef<OsStr>) -> Result<Vec<u8>, OmnisiaError> {
    let program = program.as_ref().to_string_lossy().into_owned();
    debug!(program = %program, "Running OCR tool");

    let output = cmd
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| OmnisiaError::Ocr(format!("failed to run {}: {}", program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(OmnisiaError::Ocr(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        )));
    }
    Ok(output.stdout)
}
