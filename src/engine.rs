//! End-to-end background removal: load, segment, composite, save.

use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbImage, RgbaImage};
use tempfile::NamedTempFile;

use crate::compositing;
use crate::error::{Error, Result};
use crate::label::{LabelMask, Rect};
use crate::segmentation::{self, SegmentOptions, DEFAULT_ITERATIONS};

/// Default inset of the initialization rectangle from each border.
pub const DEFAULT_MARGIN: f32 = 0.05;

/// Suffix appended to the input file stem for the output file.
pub const OUTPUT_SUFFIX: &str = "_nobg";

/// Options controlling background removal.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Number of segmentation refinement rounds.
    pub iterations: usize,
    /// Fraction of each dimension left outside the initialization rectangle
    /// on every side. Ignored when `rect` is set.
    pub margin: f32,
    /// Explicit initialization rectangle.
    pub rect: Option<Rect>,
    /// Enable verbose logging.
    pub verbose: bool,
    /// Suppress non-error output.
    pub quiet: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            margin: DEFAULT_MARGIN,
            rect: None,
            verbose: false,
            quiet: false,
        }
    }
}

impl ProcessOptions {
    /// The initialization rectangle for an image of the given size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the rectangle would be degenerate.
    pub fn rect_for(&self, width: u32, height: u32) -> Result<Rect> {
        match self.rect {
            Some(rect) => {
                rect.validate(width, height)?;
                Ok(rect)
            }
            None => Rect::inset(width, height, self.margin),
        }
    }
}

/// Result of processing a single image file.
#[derive(Debug)]
pub struct ProcessResult {
    /// Path of the processed file.
    pub path: PathBuf,
    /// Path of the written output, if any.
    pub output: Option<PathBuf>,
    /// Whether processing succeeded.
    pub success: bool,
    /// Whether segmentation failed and the rectangle was used as foreground.
    pub fallback: bool,
    /// Human-readable status message.
    pub message: String,
}

/// Segment `image` and composite it into a transparent-background RGBA buffer.
///
/// On [`Error::ConvergenceFailure`] the whole initialization rectangle is
/// kept as foreground instead. The second tuple element reports whether
/// that fallback was taken.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for an empty image or a bad rectangle.
pub fn remove_background_with_status(
    image: &RgbImage,
    opts: &ProcessOptions,
) -> Result<(RgbaImage, bool)> {
    segment_and_composite(image, opts, segmentation::segment)
}

fn segment_and_composite<F>(
    image: &RgbImage,
    opts: &ProcessOptions,
    segmenter: F,
) -> Result<(RgbaImage, bool)>
where
    F: FnOnce(&RgbImage, Rect, &SegmentOptions) -> Result<LabelMask>,
{
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(Error::InvalidInput(format!(
            "image {width}x{height} is empty"
        )));
    }
    let rect = opts.rect_for(width, height)?;
    tracing::debug!(?rect, iterations = opts.iterations, "segmenting");

    let segment_opts = SegmentOptions {
        iterations: opts.iterations,
    };
    let (mask, fallback) = match segmenter(image, rect, &segment_opts) {
        Ok(mask) => (mask, false),
        Err(err) if err.is_recoverable() => {
            tracing::warn!("{err}; keeping the initialization rectangle as foreground");
            (LabelMask::from_rect(width, height, rect)?, true)
        }
        Err(err) => return Err(err),
    };

    let output = compositing::composite(image, &mask)?;
    Ok((output, fallback))
}

/// Segment `image` and composite it into a transparent-background RGBA buffer.
///
/// # Errors
///
/// See [`remove_background_with_status`].
pub fn remove_background(image: &RgbImage, opts: &ProcessOptions) -> Result<RgbaImage> {
    remove_background_with_status(image, opts).map(|(output, _)| output)
}

/// Process a single image file: load, remove background, save as PNG.
///
/// Never panics or propagates; failures are reported in the returned
/// [`ProcessResult`].
#[must_use]
pub fn process_file(input: &Path, output: &Path, opts: &ProcessOptions) -> ProcessResult {
    let _span = tracing::info_span!("process_file", path = %input.display()).entered();
    let mut result = ProcessResult {
        path: input.to_path_buf(),
        output: None,
        success: false,
        fallback: false,
        message: String::new(),
    };

    let rgb_img = match image::open(input) {
        Ok(img) => img.to_rgb8(),
        Err(e) => {
            result.message = format!("Failed to load: {e}");
            return result;
        }
    };
    tracing::debug!(width = rgb_img.width(), height = rgb_img.height(), "decoded");

    let (rgba, fallback) = match remove_background_with_status(&rgb_img, opts) {
        Ok(out) => out,
        Err(e) => {
            result.message = format!("Failed to remove background: {e}");
            return result;
        }
    };
    result.fallback = fallback;

    match save_png(&rgba, output) {
        Ok(()) => {
            result.success = true;
            result.output = Some(output.to_path_buf());
            result.message = if fallback {
                "Background removed (segmentation fell back to the initial rectangle)".to_string()
            } else {
                "Background removed".to_string()
            };
        }
        Err(e) => {
            result.message = format!("Failed to save: {e}");
        }
    }

    result
}

/// Check if a file has a supported image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(
            ext.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "webp"
        ),
        None => false,
    }
}

/// Write an RGBA image as PNG, atomically.
///
/// The data goes to a temporary file next to `path` which is then renamed
/// over it, so the target is either fully written or left untouched. An
/// existing file is replaced.
///
/// # Errors
///
/// Returns an error if `path` does not name a PNG file or writing fails.
pub fn save_png(img: &RgbaImage, path: &Path) -> Result<()> {
    let format =
        ImageFormat::from_path(path).map_err(|e| Error::UnsupportedFormat(e.to_string()))?;
    if format != ImageFormat::Png {
        return Err(Error::UnsupportedFormat(format!(
            "{format:?} cannot hold an alpha channel losslessly"
        )));
    }

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }

    let mut tmp = NamedTempFile::new_in(dir)?;
    img.write_to(tmp.as_file_mut(), ImageFormat::Png)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Generate the output path for an input path.
///
/// Example: `"photo.jpg"` becomes `"photo_nobg.png"` in the same directory.
#[must_use]
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let parent = input.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}{OUTPUT_SUFFIX}.png"))
}
