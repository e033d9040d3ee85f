//! GrabCut-style foreground estimation.
//!
//! Every round fits one color model to the current foreground pixels and one
//! to the background pixels, builds an 8-connected pixel graph whose terminal
//! links carry the per-model negative log-likelihoods, and relabels the
//! probable pixels from the minimum cut. Definite labels are hard constraints.

use image::RgbImage;

use crate::error::{Error, Result};
use crate::gmm::{Color, Gmm};
use crate::graph::{Graph, GraphError};
use crate::label::{Label, LabelMask, Rect};

/// Default number of refinement rounds.
pub const DEFAULT_ITERATIONS: usize = 5;

/// Smoothness strength between neighboring pixels.
const GAMMA: f64 = 50.0;

/// Terminal weight pinning definite pixels; larger than any node's total n-link weight.
const HARD_CONSTRAINT: f64 = 9.0 * GAMMA;

/// Options for [`segment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentOptions {
    /// Number of refinement rounds; exactly this many run.
    pub iterations: usize,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

/// Segment `image` starting from the initialization rectangle `rect`.
///
/// Pixels outside `rect` start (and stay) [`Label::DefiniteBackground`];
/// pixels inside start as [`Label::ProbableForeground`].
///
/// # Errors
///
/// - [`Error::InvalidInput`] if the image is empty, `rect` is degenerate or
///   out of bounds, or either initial color sample is empty.
/// - [`Error::ConvergenceFailure`] if a graph cut cannot be computed.
pub fn segment(image: &RgbImage, rect: Rect, options: &SegmentOptions) -> Result<LabelMask> {
    ensure_non_empty(image)?;
    let mut mask = LabelMask::from_rect(image.width(), image.height(), rect)?;
    segment_with_mask(image, &mut mask, options)?;
    Ok(mask)
}

/// Refine an existing mask in place, e.g. one seeded with
/// [`Label::DefiniteForeground`] pixels.
///
/// # Errors
///
/// Same conditions as [`segment`], plus [`Error::InvalidInput`] when the mask
/// and image dimensions differ.
pub fn segment_with_mask(
    image: &RgbImage,
    mask: &mut LabelMask,
    options: &SegmentOptions,
) -> Result<()> {
    ensure_non_empty(image)?;
    if mask.dimensions() != image.dimensions() {
        return Err(Error::InvalidInput(format!(
            "mask {}x{} does not match image {}x{}",
            mask.width(),
            mask.height(),
            image.width(),
            image.height()
        )));
    }
    if options.iterations == 0 {
        return Ok(());
    }

    let colors: Vec<Color> = image
        .pixels()
        .map(|p| [f64::from(p[0]), f64::from(p[1]), f64::from(p[2])])
        .collect();
    let width = image.width() as usize;
    let smoothness = Smoothness::new(&colors, width);
    tracing::debug!(beta = smoothness.beta, "neighbor weights computed");

    let (fg_samples, bg_samples) = split_samples(&colors, mask);
    let mut foreground = Gmm::fit(&fg_samples)
        .ok_or_else(|| Error::InvalidInput("no foreground pixels to model".to_string()))?;
    let mut background = Gmm::fit(&bg_samples).ok_or_else(|| {
        Error::InvalidInput("rectangle covers the whole image; no background pixels".to_string())
    })?;

    for iteration in 0..options.iterations {
        let _span = tracing::debug_span!("grabcut_iteration", iteration).entered();

        if iteration > 0 {
            let (fg_samples, bg_samples) = split_samples(&colors, mask);
            if let Some(model) = foreground.refit(&fg_samples) {
                foreground = model;
            } else {
                tracing::debug!("foreground emptied; keeping previous model");
            }
            if let Some(model) = background.refit(&bg_samples) {
                background = model;
            } else {
                tracing::debug!("background emptied; keeping previous model");
            }
        }

        let converge = |err: GraphError| Error::ConvergenceFailure {
            iteration,
            reason: err.to_string(),
        };
        let mut graph = build_graph(&colors, mask, &smoothness, &foreground, &background)
            .map_err(converge)?;
        let flow = graph.max_flow().map_err(converge)?;

        let mut changed = 0usize;
        for i in 0..colors.len() {
            if mask.relabel(i, graph.in_source_segment(i)) {
                changed += 1;
            }
        }
        tracing::debug!(
            flow,
            changed,
            foreground = mask.foreground_count(),
            "cut applied"
        );
    }
    Ok(())
}

fn ensure_non_empty(image: &RgbImage) -> Result<()> {
    if image.width() == 0 || image.height() == 0 {
        return Err(Error::InvalidInput(format!(
            "image {}x{} is empty",
            image.width(),
            image.height()
        )));
    }
    Ok(())
}

fn split_samples(colors: &[Color], mask: &LabelMask) -> (Vec<Color>, Vec<Color>) {
    let mut foreground = Vec::new();
    let mut background = Vec::new();
    for (&c, label) in colors.iter().zip(mask.as_slice()) {
        if label.is_foreground() {
            foreground.push(c);
        } else {
            background.push(c);
        }
    }
    (foreground, background)
}

/// Precomputed n-link weights towards the already-visited neighbors of each
/// pixel (left, up-left, up, up-right). Zero where the neighbor is missing.
struct Smoothness {
    beta: f64,
    left: Vec<f64>,
    up_left: Vec<f64>,
    up: Vec<f64>,
    up_right: Vec<f64>,
}

impl Smoothness {
    fn new(colors: &[Color], width: usize) -> Self {
        let height = colors.len() / width;
        let beta = Self::beta(colors, width, height);
        let diagonal = GAMMA / std::f64::consts::SQRT_2;
        let weight = |a: Color, b: Color, scale: f64| scale * (-beta * sq_dist(a, b)).exp();

        let n = colors.len();
        let mut s = Self {
            beta,
            left: vec![0.0; n],
            up_left: vec![0.0; n],
            up: vec![0.0; n],
            up_right: vec![0.0; n],
        };
        for y in 0..height {
            for x in 0..width {
                let i = y * width + x;
                let c = colors[i];
                if x > 0 {
                    s.left[i] = weight(c, colors[i - 1], GAMMA);
                }
                if y > 0 {
                    s.up[i] = weight(c, colors[i - width], GAMMA);
                    if x > 0 {
                        s.up_left[i] = weight(c, colors[i - width - 1], diagonal);
                    }
                    if x + 1 < width {
                        s.up_right[i] = weight(c, colors[i - width + 1], diagonal);
                    }
                }
            }
        }
        s
    }

    /// `1 / (2 * mean squared color difference)` over all neighbor pairs;
    /// zero for a uniform image.
    fn beta(colors: &[Color], width: usize, height: usize) -> f64 {
        let mut total = 0.0;
        let mut pairs = 0usize;
        for y in 0..height {
            for x in 0..width {
                let i = y * width + x;
                let c = colors[i];
                if x > 0 {
                    total += sq_dist(c, colors[i - 1]);
                    pairs += 1;
                }
                if y > 0 {
                    total += sq_dist(c, colors[i - width]);
                    pairs += 1;
                    if x > 0 {
                        total += sq_dist(c, colors[i - width - 1]);
                        pairs += 1;
                    }
                    if x + 1 < width {
                        total += sq_dist(c, colors[i - width + 1]);
                        pairs += 1;
                    }
                }
            }
        }

        if pairs == 0 || total <= f64::EPSILON {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let mean = total / pairs as f64;
            1.0 / (2.0 * mean)
        }
    }
}

fn sq_dist(a: Color, b: Color) -> f64 {
    let d = [a[0] - b[0], a[1] - b[1], a[2] - b[2]];
    d[0] * d[0] + d[1] * d[1] + d[2] * d[2]
}

fn build_graph(
    colors: &[Color],
    mask: &LabelMask,
    smoothness: &Smoothness,
    foreground: &Gmm,
    background: &Gmm,
) -> std::result::Result<Graph, GraphError> {
    let width = mask.width() as usize;
    let n = colors.len();
    let mut graph = Graph::with_capacity(n, 4 * n);
    for _ in 0..n {
        graph.add_node();
    }

    for (i, (&c, &label)) in colors.iter().zip(mask.as_slice()).enumerate() {
        // cutting the source link labels the pixel background, and vice versa
        let (source, sink) = match label {
            Label::ProbableBackground | Label::ProbableForeground => {
                (background.penalty(c), foreground.penalty(c))
            }
            Label::DefiniteBackground => (0.0, HARD_CONSTRAINT),
            Label::DefiniteForeground => (HARD_CONSTRAINT, 0.0),
        };
        graph.add_terminal_weights(i, source, sink)?;

        let x = i % width;
        if x > 0 {
            let w = smoothness.left[i];
            graph.add_edge(i, i - 1, w, w)?;
        }
        if i >= width {
            let w = smoothness.up[i];
            graph.add_edge(i, i - width, w, w)?;
            if x > 0 {
                let w = smoothness.up_left[i];
                graph.add_edge(i, i - width - 1, w, w)?;
            }
            if x + 1 < width {
                let w = smoothness.up_right[i];
                graph.add_edge(i, i - width + 1, w, w)?;
            }
        }
    }
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const RED: Rgb<u8> = Rgb([220, 20, 30]);
    const BLUE: Rgb<u8> = Rgb([20, 40, 200]);

    fn block_image(size: u32, block: Rect) -> RgbImage {
        RgbImage::from_fn(size, size, |x, y| {
            if block.contains(x, y) {
                RED
            } else {
                BLUE
            }
        })
    }

    #[test]
    fn one_iteration_keeps_block_and_background() {
        let block = Rect::new(5, 5, 10, 10);
        let img = block_image(20, block);
        let opts = SegmentOptions { iterations: 1 };
        let mask = segment(&img, block, &opts).unwrap();

        for y in 0..20 {
            for x in 0..20 {
                let label = mask.get(x, y);
                if block.contains(x, y) {
                    assert!(label.is_foreground(), "({x}, {y}) = {label:?}");
                } else {
                    assert_eq!(label, Label::DefiniteBackground, "({x}, {y})");
                }
            }
        }
    }

    #[test]
    fn loose_rectangle_sheds_background_ring() {
        let block = Rect::new(8, 8, 8, 8);
        let img = block_image(24, block);
        let mask = segment(&img, Rect::new(4, 4, 16, 16), &SegmentOptions::default()).unwrap();

        assert_eq!(mask.foreground_count(), 64);
        assert_eq!(mask.get(5, 5), Label::ProbableBackground);
        assert_eq!(mask.get(10, 10), Label::ProbableForeground);
        assert_eq!(mask.get(0, 0), Label::DefiniteBackground);
    }

    #[test]
    fn zero_iterations_return_initial_mask() {
        let img = block_image(10, Rect::new(2, 2, 4, 4));
        let rect = Rect::new(1, 1, 6, 6);
        let mask = segment(&img, rect, &SegmentOptions { iterations: 0 }).unwrap();
        assert_eq!(mask, LabelMask::from_rect(10, 10, rect).unwrap());
    }

    #[test]
    fn rejects_empty_image() {
        let img = RgbImage::new(0, 5);
        let err = segment(&img, Rect::new(0, 0, 1, 1), &SegmentOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn rejects_degenerate_and_oversized_rectangles() {
        let img = block_image(10, Rect::new(2, 2, 4, 4));
        let opts = SegmentOptions::default();
        for rect in [
            Rect::new(2, 2, 0, 4),
            Rect::new(2, 2, 4, 0),
            Rect::new(5, 5, 6, 2),
            Rect::new(0, 0, 11, 10),
        ] {
            assert!(
                matches!(segment(&img, rect, &opts), Err(Error::InvalidInput(_))),
                "{rect:?}"
            );
        }
    }

    #[test]
    fn full_image_rectangle_has_no_background_sample() {
        let img = block_image(10, Rect::new(2, 2, 4, 4));
        let err = segment(&img, Rect::new(0, 0, 10, 10), &SegmentOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn mismatched_mask_is_rejected() {
        let img = block_image(10, Rect::new(2, 2, 4, 4));
        let mut mask = LabelMask::filled(9, 10, Label::ProbableForeground);
        let err = segment_with_mask(&img, &mut mask, &SegmentOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn definite_seeds_survive_refinement() {
        let img = block_image(16, Rect::new(4, 4, 6, 6));
        let mut mask = LabelMask::from_rect(16, 16, Rect::new(2, 2, 12, 12)).unwrap();
        // a blue pixel forced into the foreground
        mask.set(3, 3, Label::DefiniteForeground);

        segment_with_mask(&img, &mut mask, &SegmentOptions::default()).unwrap();
        assert_eq!(mask.get(3, 3), Label::DefiniteForeground);
        assert_eq!(mask.get(0, 0), Label::DefiniteBackground);
        assert!(mask.get(6, 6).is_foreground());
    }

    #[test]
    fn segmentation_is_deterministic() {
        let img = RgbImage::from_fn(18, 14, |x, y| {
            let v = u8::try_from((x * 13 + y * 7) % 256).unwrap();
            Rgb([v, v.wrapping_mul(3), 255 - v])
        });
        let rect = Rect::new(3, 2, 10, 9);
        let a = segment(&img, rect, &SegmentOptions::default()).unwrap();
        let b = segment(&img, rect, &SegmentOptions::default()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.dimensions(), (18, 14));
    }

    /// Noisy blue field with a noisy red square, `subject` pixels wide, in the middle.
    fn noisy_scene(width: u32, height: u32, subject: u32) -> RgbImage {
        let (x0, y0) = ((width - subject) / 2, (height - subject) / 2);
        RgbImage::from_fn(width, height, |x, y| {
            let base = if (x0..x0 + subject).contains(&x) && (y0..y0 + subject).contains(&y) {
                RED
            } else {
                BLUE
            };
            Rgb(std::array::from_fn(|c| {
                let v = i16::from(base[c]) + jitter(x, y, c);
                u8::try_from(v.clamp(0, 255)).unwrap()
            }))
        })
    }

    /// Hash noise in `-20..=20`.
    fn jitter(x: u32, y: u32, channel: usize) -> i16 {
        let c = u32::try_from(channel).unwrap() + 1;
        let mut h =
            x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663) ^ c.wrapping_mul(83_492_791);
        h ^= h >> 13;
        h = h.wrapping_mul(0x5bd1_e995);
        h ^= h >> 15;
        i16::try_from(h % 41).unwrap() - 20
    }

    #[test]
    fn collinear_colors_segment_without_failure() {
        // every color lies on the line (v, 3v, 255 - v)
        let img = RgbImage::from_fn(18, 14, |x, y| {
            let v = u8::try_from((x * 13 + y * 7) % 86).unwrap();
            Rgb([v, v * 3, 255 - v])
        });
        for iterations in 1..=5 {
            let mask = segment(&img, Rect::new(3, 2, 10, 9), &SegmentOptions { iterations });
            assert!(mask.is_ok(), "{iterations} rounds: {mask:?}");
        }
    }

    #[test]
    fn noisy_scene_is_deterministic_over_many_rounds() {
        let img = noisy_scene(48, 40, 16);
        let rect = Rect::new(4, 4, 40, 32);
        let opts = SegmentOptions { iterations: 8 };
        let a = segment(&img, rect, &opts).unwrap();
        let b = segment(&img, rect, &opts).unwrap();
        assert_eq!(a, b);
        assert!(a.get(24, 20).is_foreground());
        assert!(!a.get(6, 6).is_foreground());
    }

    #[test]
    fn beta_is_zero_for_uniform_image() {
        let colors = vec![[10.0, 20.0, 30.0]; 12];
        assert!(Smoothness::beta(&colors, 4, 3).abs() < f64::EPSILON);
        let s = Smoothness::new(&colors, 4);
        assert!((s.left[1] - GAMMA).abs() < 1e-12);
        assert!(s.left[0].abs() < f64::EPSILON);
    }
}
