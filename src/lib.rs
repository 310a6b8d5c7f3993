#![deny(missing_docs)]

//! Tiny-YOLOv2 output decoding in Rust
//!
//! This crate turns the raw output tensor of a Tiny-YOLOv2 network into
//! labeled bounding boxes, filtered with non-maximum suppression.
//!
//! # Examples
//!
//! ```no_run
//! use kornia_tiny_yolo::{TinyYoloV2, TinyYoloV2Config};
//!
//! let config = TinyYoloV2Config {
//!     confidence_threshold: 0.3,
//!     overlap_threshold: 0.5,
//!     max_boxes: 5,
//!     ..Default::default()
//! };
//!
//! let decoder = TinyYoloV2::new(config).expect("Failed to create decoder");
//!
//! // raw output of the network, e.g. a (1, 125, 13, 13) tensor flattened
//! let output = vec![0.0f32; decoder.config().expected_tensor_len()];
//!
//! let detections = decoder.decode_and_filter(&output).expect("Failed to decode");
//! for detection in detections {
//!     println!("Detection: {:?}", detection);
//! }
//! ```

/// Bounding box module with non-maximum suppression
mod bounding_box;

/// Tiny-YOLOv2 output decoding
mod tiny_yolov2;

pub use bounding_box::{BoundingBox, CLASS_COLORS, non_maximum_suppression};
pub use tiny_yolov2::{
    BOX_INFO_CHANNELS, TINY_YOLOV2_ANCHORS, TinyYoloV2, TinyYoloV2Config, TinyYoloV2Error,
    VOC_LABELS, decode_and_filter,
};
