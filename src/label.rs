//! Per-pixel segmentation labels and the initialization rectangle.

use crate::error::{Error, Result};

/// Absorbs `f32` margin rounding, e.g. `0.05f32` times 200 is just above 10.
const ROUNDING_SLACK: f64 = 1e-4;

/// Segmentation state of a single pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    /// Known background; never reassigned by refinement.
    DefiniteBackground,
    /// Known foreground; never reassigned by refinement.
    DefiniteForeground,
    /// Background according to the latest graph cut.
    ProbableBackground,
    /// Foreground according to the latest graph cut.
    ProbableForeground,
}

impl Label {
    /// Whether the pixel belongs to the foreground (definite or probable).
    #[must_use]
    pub const fn is_foreground(self) -> bool {
        matches!(self, Self::DefiniteForeground | Self::ProbableForeground)
    }

    /// Whether the label is a hard constraint.
    #[must_use]
    pub const fn is_definite(self) -> bool {
        matches!(self, Self::DefiniteBackground | Self::DefiniteForeground)
    }
}

/// Axis-aligned region in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Rect {
    /// Create a rectangle from its top-left corner and size.
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle inset from every image border by `margin` (a fraction of the
    /// corresponding dimension, in `[0, 0.5)`).
    ///
    /// With the default margin of 0.05, a 200x100 image yields `(10, 5, 180, 90)`.
    /// The span is `floor(len * (1 - 2 * margin))`, so a 10x10 image still
    /// keeps a background column and row: `(0, 0, 9, 9)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty image or an out-of-range margin.
    pub fn inset(image_width: u32, image_height: u32, margin: f32) -> Result<Self> {
        if image_width == 0 || image_height == 0 {
            return Err(Error::InvalidInput(format!(
                "image {image_width}x{image_height} is empty"
            )));
        }
        if !(0.0..0.5).contains(&margin) {
            return Err(Error::InvalidInput(format!(
                "margin {margin} must be in [0, 0.5)"
            )));
        }

        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let side = |len: u32| -> (u32, u32) {
            let len = f64::from(len);
            let margin = f64::from(margin);
            let offset = ((len * margin + ROUNDING_SLACK).floor() as u32).min(len as u32 - 1);
            // floor of the inner span, so any positive margin leaves a border from 2px up
            let size = ((len * (1.0 - 2.0 * margin) + ROUNDING_SLACK).floor() as u32)
                .clamp(1, len as u32 - offset);
            (offset, size)
        };

        let (x, width) = side(image_width);
        let (y, height) = side(image_height);
        Ok(Self::new(x, y, width, height))
    }

    /// Check that the rectangle has positive area and lies within the image.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when the rectangle is degenerate or
    /// exceeds the `image_width` x `image_height` bounds.
    pub fn validate(&self, image_width: u32, image_height: u32) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidInput(format!(
                "rectangle {}x{} has zero area",
                self.width, self.height
            )));
        }

        let right = self.x.checked_add(self.width);
        let bottom = self.y.checked_add(self.height);
        match (right, bottom) {
            (Some(r), Some(b)) if r <= image_width && b <= image_height => Ok(()),
            _ => Err(Error::InvalidInput(format!(
                "rectangle ({}, {}, {}, {}) exceeds image bounds {image_width}x{image_height}",
                self.x, self.y, self.width, self.height
            ))),
        }
    }

    /// Whether the pixel `(px, py)` lies inside the rectangle.
    #[must_use]
    pub const fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x
            && py >= self.y
            && (px - self.x) < self.width
            && (py - self.y) < self.height
    }
}

/// Row-major grid of [`Label`]s with the same dimensions as the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMask {
    width: u32,
    height: u32,
    labels: Vec<Label>,
}

impl LabelMask {
    /// Mask with every cell set to `label`.
    #[must_use]
    pub fn filled(width: u32, height: u32, label: Label) -> Self {
        Self {
            width,
            height,
            labels: vec![label; width as usize * height as usize],
        }
    }

    /// Initial mask: inside `rect` is probable foreground, outside is definite background.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `rect` fails [`Rect::validate`].
    pub fn from_rect(width: u32, height: u32, rect: Rect) -> Result<Self> {
        rect.validate(width, height)?;

        let mut mask = Self::filled(width, height, Label::DefiniteBackground);
        for y in rect.y..rect.y + rect.height {
            let row = y as usize * width as usize;
            let start = row + rect.x as usize;
            mask.labels[start..start + rect.width as usize].fill(Label::ProbableForeground);
        }
        Ok(mask)
    }

    /// Mask width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Mask height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// `(width, height)`.
    #[must_use]
    pub const fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// All labels in row-major order.
    #[must_use]
    pub fn as_slice(&self) -> &[Label] {
        &self.labels
    }

    /// Label at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinates are out of bounds.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Label {
        self.labels[self.index(x, y)]
    }

    /// Overwrite the label at `(x, y)` unconditionally (used for seeding).
    ///
    /// # Panics
    ///
    /// Panics if the coordinates are out of bounds.
    pub fn set(&mut self, x: u32, y: u32, label: Label) {
        let idx = self.index(x, y);
        self.labels[idx] = label;
    }

    /// Apply a graph-cut decision to the pixel at row-major `index`.
    ///
    /// Definite labels are left untouched; probable labels become
    /// [`Label::ProbableForeground`] or [`Label::ProbableBackground`].
    /// Returns `true` if the label changed.
    pub(crate) fn relabel(&mut self, index: usize, foreground: bool) -> bool {
        let current = self.labels[index];
        if current.is_definite() {
            return false;
        }
        let next = if foreground {
            Label::ProbableForeground
        } else {
            Label::ProbableBackground
        };
        self.labels[index] = next;
        current != next
    }

    /// Number of cells labeled foreground (definite or probable).
    #[must_use]
    pub fn foreground_count(&self) -> usize {
        self.labels.iter().filter(|l| l.is_foreground()).count()
    }

    fn index(&self, x: u32, y: u32) -> usize {
        assert!(
            x < self.width && y < self.height,
            "({x}, {y}) outside {}x{} mask",
            self.width,
            self.height
        );
        y as usize * self.width as usize + x as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_classification() {
        assert!(Label::DefiniteForeground.is_foreground());
        assert!(Label::ProbableForeground.is_foreground());
        assert!(!Label::DefiniteBackground.is_foreground());
        assert!(!Label::ProbableBackground.is_foreground());

        assert!(Label::DefiniteForeground.is_definite());
        assert!(Label::DefiniteBackground.is_definite());
        assert!(!Label::ProbableForeground.is_definite());
    }

    #[test]
    fn validate_rejects_zero_area() {
        assert!(matches!(
            Rect::new(1, 1, 0, 5).validate(10, 10),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            Rect::new(1, 1, 5, 0).validate(10, 10),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn validate_rejects_out_of_bounds() {
        assert!(Rect::new(5, 5, 6, 1).validate(10, 10).is_err());
        assert!(Rect::new(0, 9, 1, 2).validate(10, 10).is_err());
        assert!(Rect::new(u32::MAX, 0, 2, 2).validate(10, 10).is_err());
        assert!(Rect::new(0, 0, 10, 10).validate(10, 10).is_ok());
        assert!(Rect::new(9, 9, 1, 1).validate(10, 10).is_ok());
    }

    #[test]
    fn inset_uses_margin_per_side() {
        assert_eq!(Rect::inset(200, 100, 0.05).unwrap(), Rect::new(10, 5, 180, 90));
        assert_eq!(Rect::inset(100, 100, 0.1).unwrap(), Rect::new(10, 10, 80, 80));
        assert_eq!(Rect::inset(1, 1, 0.05).unwrap(), Rect::new(0, 0, 1, 1));
    }

    #[test]
    fn inset_leaves_a_border_on_small_images() {
        assert_eq!(Rect::inset(10, 10, 0.05).unwrap(), Rect::new(0, 0, 9, 9));
        assert_eq!(Rect::inset(19, 5, 0.05).unwrap(), Rect::new(0, 0, 17, 4));
        assert_eq!(Rect::inset(2, 2, 0.05).unwrap(), Rect::new(0, 0, 1, 1));
        for len in 2..40 {
            let rect = Rect::inset(len, len, 0.05).unwrap();
            rect.validate(len, len).unwrap();
            assert!(rect.width < len && rect.height < len, "{len}: {rect:?}");
        }
        assert_eq!(Rect::inset(10, 10, 0.0).unwrap(), Rect::new(0, 0, 10, 10));
    }

    #[test]
    fn inset_rejects_bad_margin() {
        assert!(Rect::inset(10, 10, 0.5).is_err());
        assert!(Rect::inset(10, 10, -0.1).is_err());
        assert!(Rect::inset(0, 10, 0.05).is_err());
    }

    #[test]
    fn from_rect_marks_inside_probable_foreground() {
        let mask = LabelMask::from_rect(6, 4, Rect::new(1, 1, 3, 2)).unwrap();
        assert_eq!(mask.dimensions(), (6, 4));
        for y in 0..4 {
            for x in 0..6 {
                let expected = if (1..4).contains(&x) && (1..3).contains(&y) {
                    Label::ProbableForeground
                } else {
                    Label::DefiniteBackground
                };
                assert_eq!(mask.get(x, y), expected, "pixel ({x}, {y})");
            }
        }
        assert_eq!(mask.foreground_count(), 6);
    }

    #[test]
    fn relabel_never_flips_definite_labels() {
        let mut mask = LabelMask::filled(2, 1, Label::DefiniteBackground);
        mask.set(1, 0, Label::DefiniteForeground);

        assert!(!mask.relabel(0, true));
        assert!(!mask.relabel(1, false));
        assert_eq!(mask.get(0, 0), Label::DefiniteBackground);
        assert_eq!(mask.get(1, 0), Label::DefiniteForeground);
    }

    #[test]
    fn relabel_moves_probable_labels() {
        let mut mask = LabelMask::filled(1, 1, Label::ProbableForeground);
        assert!(mask.relabel(0, false));
        assert_eq!(mask.get(0, 0), Label::ProbableBackground);
        assert!(!mask.relabel(0, false));
        assert!(mask.relabel(0, true));
        assert_eq!(mask.get(0, 0), Label::ProbableForeground);
    }

    #[test]
    fn contains_matches_bounds() {
        let rect = Rect::new(2, 3, 4, 5);
        assert!(rect.contains(2, 3));
        assert!(rect.contains(5, 7));
        assert!(!rect.contains(6, 7));
        assert!(!rect.contains(5, 8));
        assert!(!rect.contains(1, 3));
    }
}
