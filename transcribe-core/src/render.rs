//! # Raster Rendering Module
//!
//! Optional PNG rendering of a MusicXML score by an external notation
//! program. Rendering is a capability the pipeline may or may not have;
//! its failures are reported to the caller as a value and never abort the
//! MIDI and MusicXML exports.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::debug;

/// Environment variable naming the MuseScore executable.
pub const MUSESCORE_PATH_ENV: &str = "MUSESCORE_PATH";

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("renderer reported success but wrote no image at {0}")]
    MissingOutput(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Something that can turn a MusicXML file into a PNG image.
pub trait RasterRenderer: Send + Sync {
    /// Renders `musicxml` into an image at exactly `png`.
    ///
    /// # Errors
    /// Any failure to launch, run or collect the output of the renderer.
    fn render(&self, musicxml: &Path, png: &Path) -> Result<(), RenderError>;
}

/// Renders through the MuseScore command line (`mscore -o out.png in.musicxml`).
#[derive(Debug, Clone)]
pub struct MuseScoreRenderer {
    executable: PathBuf,
}

impl MuseScoreRenderer {
    /// Uses the given MuseScore executable (`mscore`, `MuseScore4`, ...).
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Uses `MUSESCORE_PATH` if it is set and non-empty.
    pub fn from_env() -> Option<Self> {
        std::env::var_os(MUSESCORE_PATH_ENV)
            .filter(|p| !p.is_empty())
            .map(Self::new)
    }

    /// The executable this renderer launches.
    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

/// MuseScore names multi-page PNG exports `<stem>-1.png`, `<stem>-2.png`, ...
fn first_page_path(png: &Path) -> Option<PathBuf> {
    let stem = png.file_stem()?.to_str()?;
    let ext = png.extension().and_then(|e| e.to_str()).unwrap_or("png");
    Some(png.with_file_name(format!("{stem}-1.{ext}")))
}

impl RasterRenderer for MuseScoreRenderer {
    fn render(&self, musicxml: &Path, png: &Path) -> Result<(), RenderError> {
        let program = self.executable.display().to_string();
        debug!("Rendering {} with {}", musicxml.display(), program);

        let output = Command::new(&self.executable)
            .arg("-o")
            .arg(png)
            .arg(musicxml)
            .output()
            .map_err(|source| RenderError::Launch {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(RenderError::Failed {
                program,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        if png.exists() {
            return Ok(());
        }
        match first_page_path(png) {
            Some(page) if page.exists() => {
                std::fs::rename(&page, png)?;
                Ok(())
            }
            _ => Err(RenderError::MissingOutput(png.to_path_buf())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_page_path() {
        assert_eq!(
            first_page_path(Path::new("/tmp/out/output_sheet.png")),
            Some(PathBuf::from("/tmp/out/output_sheet-1.png"))
        );
    }

    #[test]
    fn test_missing_executable_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = MuseScoreRenderer::new(dir.path().join("no-such-mscore"));
        let result = renderer.render(&dir.path().join("in.musicxml"), &dir.path().join("out.png"));
        assert!(matches!(result, Err(RenderError::Launch { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_renderer_is_reported() {
        // `false` ignores its arguments and exits with status 1
        let renderer = MuseScoreRenderer::new("false");
        let dir = tempfile::tempdir().unwrap();
        let result = renderer.render(&dir.path().join("in.musicxml"), &dir.path().join("out.png"));
        assert!(matches!(result, Err(RenderError::Failed { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_success_without_image_is_missing_output() {
        let renderer = MuseScoreRenderer::new("true");
        let dir = tempfile::tempdir().unwrap();
        let result = renderer.render(&dir.path().join("in.musicxml"), &dir.path().join("out.png"));
        assert!(matches!(result, Err(RenderError::MissingOutput(_))));
    }
}
