//! Remove the background of a still image with GrabCut segmentation.
//!
//! A rectangle around the subject seeds an iterative foreground/background
//! estimate: color mixture models are refit every round and a min-cut over
//! the pixel graph relabels the uncertain pixels. The final labels become a
//! binary alpha channel; background pixels are fully blanked.
//!
//! # Quick Start
//!
//! ```no_run
//! use nobg::{default_output_path, remove_background, save_png, ProcessOptions};
//!
//! let img = image::open("photo.jpg").unwrap().to_rgb8();
//! let rgba = remove_background(&img, &ProcessOptions::default()).unwrap();
//! save_png(&rgba, &default_output_path("photo.jpg".as_ref())).unwrap();
//! ```
//!
//! # Lower-level steps
//!
//! ```no_run
//! use nobg::{composite, segment, Rect, SegmentOptions};
//!
//! let img = image::open("photo.png").unwrap().to_rgb8();
//! let rect = Rect::new(25, 25, 50, 50);
//! let mask = segment(&img, rect, &SegmentOptions::default()).unwrap();
//! let rgba = composite(&img, &mask).unwrap();
//! println!("{} foreground pixels", mask.foreground_count());
//! # let _ = rgba;
//! ```

#![deny(missing_docs)]

pub mod compositing;
mod engine;
pub mod error;
mod gmm;
mod graph;
pub mod label;
pub mod segmentation;
pub mod shell;

pub use compositing::{composite, opacity_mask};
pub use engine::{
    default_output_path, is_supported_image, process_file, remove_background,
    remove_background_with_status, save_png, ProcessOptions, ProcessResult, DEFAULT_MARGIN,
    OUTPUT_SUFFIX,
};
pub use error::{Error, Result};
pub use label::{Label, LabelMask, Rect};
pub use segmentation::{segment, segment_with_mask, SegmentOptions, DEFAULT_ITERATIONS};
pub use shell::{AssociationEntry, AssociationStore, DirectoryStore, MemoryStore, ShellIntegration};
