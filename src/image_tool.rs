//! External image re-encoding
//!
//! Images are compressed after they have been copied, in place, by an
//! external tool. [`ImageTool`] is the seam: [`ImageMagick`] drives the
//! `identify` and `convert` binaries, tests substitute an in-process fake.

use crate::error::{MirrorError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// Interlacing scheme written by the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interlace {
    /// Progressive JPEG
    Jpeg,
    /// Adam7 PNG
    Png,
}

impl Interlace {
    /// Argument value understood by ImageMagick
    pub fn as_arg(&self) -> &'static str {
        match self {
            Interlace::Jpeg => "JPEG",
            Interlace::Png => "PNG",
        }
    }
}

/// Encoding parameters for one re-encode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    /// Target quality (1..=100)
    pub quality: u32,
    /// Chroma sampling factor, e.g. `4:2:0`
    pub sampling_factor: String,
    /// Interlacing scheme
    pub interlace: Interlace,
}

/// Queries and rewrites image encodings
pub trait ImageTool: Send + Sync + fmt::Debug {
    /// Current encoding quality of the image at `path`
    fn quality(&self, path: &Path) -> Result<u32>;

    /// Re-encode the image at `path` in place
    fn recompress(&self, path: &Path, settings: &EncodeSettings) -> Result<()>;
}

/// [`ImageTool`] backed by the ImageMagick command line
#[derive(Debug, Clone)]
pub struct ImageMagick {
    identify: Option<PathBuf>,
    convert: Option<PathBuf>,
}

impl ImageMagick {
    /// Locate `identify` and `convert` on `PATH`
    ///
    /// Missing binaries are not an error here; compression of each file then
    /// fails with [`MirrorError::ToolNotFound`] and the plain copy is kept.
    pub fn detect() -> Self {
        let identify = which::which("identify").ok();
        let convert = which::which("convert").ok();
        if identify.is_none() || convert.is_none() {
            warn!("ImageMagick not found on PATH, image compression will be skipped");
        } else {
            debug!("Using ImageMagick: {:?}, {:?}", identify, convert);
        }
        Self { identify, convert }
    }

    /// Whether both binaries were found
    pub fn is_available(&self) -> bool {
        self.identify.is_some() && self.convert.is_some()
    }

    fn run(command: &mut Command) -> Result<String> {
        let output = command.output()?;
        if !output.status.success() {
            return Err(MirrorError::image_tool(format!(
                "{:?} exited with {}: {}",
                command.get_program(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ImageTool for ImageMagick {
    fn quality(&self, path: &Path) -> Result<u32> {
        let identify = self
            .identify
            .as_deref()
            .ok_or_else(|| MirrorError::ToolNotFound("identify".to_string()))?;
        let stdout = Self::run(Command::new(identify).arg("-format").arg("%Q").arg(path))?;
        parse_quality(&stdout)
    }

    fn recompress(&self, path: &Path, settings: &EncodeSettings) -> Result<()> {
        let convert = self
            .convert
            .as_deref()
            .ok_or_else(|| MirrorError::ToolNotFound("convert".to_string()))?;
        Self::run(
            Command::new(convert)
                .arg(path)
                .args(["-sampling-factor", settings.sampling_factor.as_str()])
                .arg("-strip")
                .args(["-quality", settings.quality.to_string().as_str()])
                .args(["-interlace", settings.interlace.as_arg()])
                .args(["-colorspace", "sRGB"])
                .arg(path),
        )?;
        Ok(())
    }
}

/// Parse the `%Q` output of `identify`
///
/// Multi-frame images print one value per frame; the first frame decides.
pub fn parse_quality(output: &str) -> Result<u32> {
    let first = output
        .trim()
        .trim_matches('\'')
        .split_whitespace()
        .next()
        .unwrap_or_default();
    let digits: String = first.chars().take_while(char::is_ascii_digit).collect();
    digits
        .parse()
        .map_err(|_| MirrorError::image_tool(format!("unexpected quality output {:?}", output)))
}
