//! Turns the PDFs in one folder into markdown files in another, ready for
//! the document store.

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use shared::types::{RagError, Result};
use shared::utils::is_pdf_file;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedFile {
    pub source: PathBuf,
    pub output: PathBuf,
    pub bytes: usize,
}

#[derive(Debug, Default)]
pub struct ConversionReport {
    pub converted: Vec<ConvertedFile>,
    pub failed: Vec<RagError>,
}

impl ConversionReport {
    pub fn is_empty(&self) -> bool {
        self.converted.is_empty() && self.failed.is_empty()
    }
}

pub struct PdfConverter {
    input_dir: PathBuf,
    output_dir: PathBuf,
}

impl PdfConverter {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    /// `*.pdf` files directly inside the input folder, sorted by name.
    pub fn find_pdfs(&self) -> Result<Vec<PathBuf>> {
        if !self.input_dir.is_dir() {
            return Err(RagError::Conversion {
                path: self.input_dir.clone(),
                message: "PDF folder does not exist".to_string(),
            });
        }
        let mut pdfs: Vec<PathBuf> = fs::read_dir(&self.input_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_pdf_file(path))
            .collect();
        pdfs.sort();
        Ok(pdfs)
    }

    /// Convert every PDF, writing `<stem>.md` into the output folder.
    /// One bad file does not stop the others.
    pub fn convert_all(&self) -> Result<ConversionReport> {
        let pdfs = self.find_pdfs()?;
        if pdfs.is_empty() {
            warn!(dir = %self.input_dir.display(), "no PDF files found");
            return Ok(ConversionReport::default());
        }
        fs::create_dir_all(&self.output_dir)?;

        let outcomes: Vec<Result<ConvertedFile>> =
            pdfs.par_iter().map(|pdf| self.convert_file(pdf)).collect();

        let mut report = ConversionReport::default();
        for outcome in outcomes {
            match outcome {
                Ok(file) => {
                    info!(source = %file.source.display(), bytes = file.bytes, "converted");
                    report.converted.push(file);
                }
                Err(e) => {
                    warn!(error = %e, "conversion failed");
                    report.failed.push(e);
                }
            }
        }
        Ok(report)
    }

    pub fn convert_file(&self, pdf: &Path) -> Result<ConvertedFile> {
        let failed = |message: String| RagError::Conversion {
            path: pdf.to_path_buf(),
            message,
        };
        // pdf-extract panics on some malformed files.
        let extracted = panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text(pdf)))
            .map_err(|_| failed("PDF parser crashed on this file".to_string()))?
            .map_err(|e| failed(e.to_string()))?;

        let stem = pdf
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| failed("file has no name".to_string()))?;
        let markdown = to_markdown(&stem, &extracted);
        if markdown.trim().is_empty() {
            return Err(failed("no extractable text (scanned PDF?)".to_string()));
        }

        let output = self.output_dir.join(format!("{stem}.md"));
        fs::write(&output, &markdown).map_err(|e| failed(e.to_string()))?;
        Ok(ConvertedFile {
            source: pdf.to_path_buf(),
            output,
            bytes: markdown.len(),
        })
    }
}

/// Page breaks become paragraph breaks, trailing spaces go, and runs of
/// blank lines collapse to one. The file stem becomes the title.
pub fn to_markdown(title: &str, extracted: &str) -> String {
    let normalized = extracted.replace('\u{c}', "\n\n");
    let mut body = String::with_capacity(normalized.len());
    let mut blank_run = 0;
    for line in normalized.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        body.push_str(line);
        body.push('\n');
    }
    let body = body.trim();
    if body.is_empty() {
        return String::new();
    }
    format!("# {title}\n\n{body}\n")
}
