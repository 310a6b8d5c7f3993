use super::bounding_box::{BoundingBox, non_maximum_suppression};
use candle_core::{DType, Device, Tensor};
use kornia_image::{Image, ImageSize};

/// Number of channels describing a box before the class scores: x, y, w, h, objectness.
pub const BOX_INFO_CHANNELS: usize = 5;

/// Pascal VOC class names predicted by the stock Tiny-YOLOv2 model.
pub const VOC_LABELS: [&str; 20] = [
    "aeroplane",
    "bicycle",
    "bird",
    "boat",
    "bottle",
    "bus",
    "car",
    "cat",
    "chair",
    "cow",
    "diningtable",
    "dog",
    "horse",
    "motorbike",
    "person",
    "pottedplant",
    "sheep",
    "sofa",
    "train",
    "tvmonitor",
];

/// Anchor box priors (width, height) of the stock Tiny-YOLOv2 model, in cells.
pub const TINY_YOLOV2_ANCHORS: [(f32, f32); 5] = [
    (1.08, 1.19),
    (3.42, 4.41),
    (6.63, 11.38),
    (9.42, 5.11),
    (16.62, 10.52),
];

/// Tiny-YOLOv2 error enum.
#[derive(thiserror::Error, Debug)]
pub enum TinyYoloV2Error {
    /// The output tensor does not hold the number of values the configuration expects.
    #[error("Invalid tensor length: expected {expected} values, got {actual}")]
    InvalidTensorLength {
        /// Number of values implied by the configuration.
        expected: usize,
        /// Number of values received.
        actual: usize,
    },

    /// The model configuration is inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Internal candle error.
    #[error(transparent)]
    CandleError(#[from] candle_core::Error),

    /// Kornia image error.
    #[error(transparent)]
    KorniaImageError(#[from] kornia_image::ImageError),
}

/// Tiny-YOLOv2 configuration struct.
#[derive(Debug, Clone)]
pub struct TinyYoloV2Config {
    /// Number of grid cells along the x axis
    pub grid_width: usize,
    /// Number of grid cells along the y axis
    pub grid_height: usize,
    /// Number of boxes predicted per grid cell
    pub boxes_per_cell: usize,
    /// Number of classes the model was trained on
    pub num_classes: usize,
    /// Class names, one per class
    pub class_labels: Vec<String>,
    /// Anchor box priors (width, height), one per box in a cell
    pub anchors: Vec<(f32, f32)>,
    /// Width of a grid cell in input pixels
    pub cell_width: f32,
    /// Height of a grid cell in input pixels
    pub cell_height: f32,
    /// The confidence threshold for the model
    pub confidence_threshold: f32,
    /// The non-maximum suppression threshold for the model
    pub overlap_threshold: f32,
    /// The maximum number of boxes kept after non-maximum suppression
    pub max_boxes: usize,
}

/// Default configuration for the VOC Tiny-YOLOv2 model.
impl Default for TinyYoloV2Config {
    fn default() -> Self {
        Self {
            grid_width: 13,
            grid_height: 13,
            boxes_per_cell: TINY_YOLOV2_ANCHORS.len(),
            num_classes: VOC_LABELS.len(),
            class_labels: VOC_LABELS.iter().map(|l| l.to_string()).collect(),
            anchors: TINY_YOLOV2_ANCHORS.to_vec(),
            cell_width: 32.0,
            cell_height: 32.0,
            confidence_threshold: 0.3,
            overlap_threshold: 0.5,
            max_boxes: 5,
        }
    }
}

impl TinyYoloV2Config {
    /// Number of channels for every grid cell.
    pub fn channels(&self) -> usize {
        self.boxes_per_cell * (BOX_INFO_CHANNELS + self.num_classes)
    }

    /// Number of values in one output tensor.
    pub fn expected_tensor_len(&self) -> usize {
        self.grid_width * self.grid_height * self.channels()
    }

    fn checked_tensor_len(&self) -> Option<usize> {
        BOX_INFO_CHANNELS
            .checked_add(self.num_classes)?
            .checked_mul(self.boxes_per_cell)?
            .checked_mul(self.grid_width)?
            .checked_mul(self.grid_height)
    }

    /// Size of the model input image.
    pub fn input_size(&self) -> ImageSize {
        ImageSize {
            width: (self.grid_width as f32 * self.cell_width).round() as usize,
            height: (self.grid_height as f32 * self.cell_height).round() as usize,
        }
    }

    /// Check that the configuration describes a usable model.
    pub fn validate(&self) -> Result<(), TinyYoloV2Error> {
        let invalid = |msg: String| Err(TinyYoloV2Error::InvalidConfiguration(msg));

        if self.grid_width == 0 || self.grid_height == 0 {
            return invalid(format!(
                "grid must not be empty: {}x{}",
                self.grid_width, self.grid_height
            ));
        }
        if self.boxes_per_cell == 0 {
            return invalid("boxes_per_cell must be at least 1".to_string());
        }
        if self.anchors.len() != self.boxes_per_cell {
            return invalid(format!(
                "expected {} anchors, got {}",
                self.boxes_per_cell,
                self.anchors.len()
            ));
        }
        if self.num_classes == 0 {
            return invalid("num_classes must be at least 1".to_string());
        }
        if self.class_labels.len() != self.num_classes {
            return invalid(format!(
                "expected {} class labels, got {}",
                self.num_classes,
                self.class_labels.len()
            ));
        }
        if !(self.cell_width > 0. && self.cell_height > 0.) {
            return invalid(format!(
                "cell size must be positive: {}x{}",
                self.cell_width, self.cell_height
            ));
        }
        if let Some((w, h)) = self.anchors.iter().find(|(w, h)| !(*w > 0. && *h > 0.)) {
            return invalid(format!("anchor must be positive: ({w}, {h})"));
        }
        if !(0. ..=1.).contains(&self.confidence_threshold) {
            return invalid(format!(
                "confidence_threshold out of range: {}",
                self.confidence_threshold
            ));
        }
        if !(0. ..=1.).contains(&self.overlap_threshold) {
            return invalid(format!(
                "overlap_threshold out of range: {}",
                self.overlap_threshold
            ));
        }
        if self.max_boxes == 0 {
            return invalid("max_boxes must be at least 1".to_string());
        }
        if self.checked_tensor_len().is_none() {
            return invalid(format!(
                "tensor size overflows: {}x{} grid, {} boxes, {} classes",
                self.grid_width, self.grid_height, self.boxes_per_cell, self.num_classes
            ));
        }

        Ok(())
    }
}

/// Tiny-YOLOv2 output decoder.
#[derive(Debug, Clone)]
pub struct TinyYoloV2 {
    config: TinyYoloV2Config,
}

impl TinyYoloV2 {
    /// Create a new Tiny-YOLOv2 decoder
    pub fn new(config: TinyYoloV2Config) -> Result<Self, TinyYoloV2Error> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The configuration of the decoder
    pub fn config(&self) -> &TinyYoloV2Config {
        &self.config
    }

    /// Decode a raw output tensor and filter the detections
    pub fn decode_and_filter(&self, tensor: &[f32]) -> Result<Vec<BoundingBox>, TinyYoloV2Error> {
        let candidates = self.decode(tensor)?;
        Ok(self.filter(&candidates))
    }

    /// Decode and filter the output tensor of an inference runtime.
    ///
    /// The tensor may have any shape (e.g. `(1, 125, 13, 13)`) as long as it
    /// holds the expected number of values in channel-major order.
    pub fn postprocess(&self, pred: &Tensor) -> Result<Vec<BoundingBox>, TinyYoloV2Error> {
        let values = pred.flatten_all()?.to_dtype(DType::F32)?.to_vec1::<f32>()?;
        self.decode_and_filter(&values)
    }

    /// Decode a raw output tensor into candidate boxes above the confidence threshold.
    ///
    /// Values are laid out channel-major: channel `c` of cell `(cx, cy)` lives
    /// at `c * grid_width * grid_height + cy * grid_width + cx`.
    pub fn decode(&self, tensor: &[f32]) -> Result<Vec<BoundingBox>, TinyYoloV2Error> {
        let config = &self.config;
        let expected = config.expected_tensor_len();
        if tensor.len() != expected {
            return Err(TinyYoloV2Error::InvalidTensorLength {
                expected,
                actual: tensor.len(),
            });
        }

        let channel_stride = config.grid_width * config.grid_height;
        let box_channels = BOX_INFO_CHANNELS + config.num_classes;
        let threshold = config.confidence_threshold;

        let mut probs = vec![0.0; config.num_classes];
        let mut boxes = Vec::new();

        for cx in 0..config.grid_width {
            for cy in 0..config.grid_height {
                let cell = cy * config.grid_width + cx;
                let at = |channel: usize| tensor[channel * channel_stride + cell];

                for (anchor, &(anchor_w, anchor_h)) in config.anchors.iter().enumerate() {
                    let channel = anchor * box_channels;

                    // confidence can only shrink once multiplied by a class probability;
                    // negated comparisons also drop NaN scores
                    let objectness = sigmoid(at(channel + 4));
                    if !(objectness >= threshold) {
                        continue;
                    }

                    for (i, p) in probs.iter_mut().enumerate() {
                        *p = at(channel + BOX_INFO_CHANNELS + i);
                    }
                    softmax(&mut probs);
                    let (class_index, class_prob) = argmax(&probs);

                    let confidence = objectness * class_prob;
                    if !(confidence >= threshold) {
                        continue;
                    }

                    let center_x = (cx as f32 + sigmoid(at(channel))) * config.cell_width;
                    let center_y = (cy as f32 + sigmoid(at(channel + 1))) * config.cell_height;
                    let width = at(channel + 2).exp() * config.cell_width * anchor_w;
                    let height = at(channel + 3).exp() * config.cell_height * anchor_h;

                    boxes.push(BoundingBox::new(
                        center_x - width / 2.0,
                        center_y - height / 2.0,
                        width,
                        height,
                        confidence,
                        class_index as u32,
                        config.class_labels[class_index].as_str(),
                    ));
                }
            }
        }

        tracing::debug!(
            "decoded {} candidates out of {} predictions",
            boxes.len(),
            channel_stride * config.boxes_per_cell
        );

        Ok(boxes)
    }

    /// Filter candidate boxes with cross-class non-maximum suppression
    pub fn filter(&self, candidates: &[BoundingBox]) -> Vec<BoundingBox> {
        let kept = non_maximum_suppression(
            candidates,
            self.config.max_boxes,
            self.config.overlap_threshold,
        );

        tracing::debug!("kept {} of {} candidates", kept.len(), candidates.len());
        for bbox in &kept {
            tracing::trace!(
                "{} ({:.3}) at ({:.1}, {:.1}, {:.1}, {:.1})",
                bbox.label,
                bbox.confidence,
                bbox.x,
                bbox.y,
                bbox.width,
                bbox.height
            );
        }

        kept
    }

    /// Prepare an rgb8 image as the `(1, 3, H, W)` input tensor of the model.
    ///
    /// Pixels keep their `0..=255` range, which is what the stock model expects.
    pub fn preprocess_image(
        &self,
        image: &Image<u8, 3>,
        device: &Device,
    ) -> Result<Tensor, TinyYoloV2Error> {
        let ImageSize { width, height } = self.config.input_size();

        let mut image_resized = Image::from_size_val(ImageSize { width, height }, 0)?;
        kornia_imgproc::resize::resize_fast(
            image,
            &mut image_resized,
            kornia_imgproc::interpolation::InterpolationMode::Bilinear,
        )?;

        let image_resized = image_resized.map(|&x| x as f32);

        let image_t =
            Tensor::from_vec::<_, f32>(image_resized.into_vec(), (height, width, 3), device)?
                .permute((2, 0, 1))?
                .unsqueeze(0)?;

        Ok(image_t)
    }
}

/// Decode a raw output tensor and filter the detections in one call.
///
/// The configuration is validated before the tensor is read.
pub fn decode_and_filter(
    tensor: &[f32],
    config: &TinyYoloV2Config,
) -> Result<Vec<BoundingBox>, TinyYoloV2Error> {
    config.validate()?;
    TinyYoloV2 {
        config: config.clone(),
    }
    .decode_and_filter(tensor)
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// In-place softmax, shifted by the maximum to avoid overflow.
fn softmax(values: &mut [f32]) {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    for v in values.iter_mut() {
        *v /= sum;
    }
}

/// Index and value of the largest element; the first one wins ties.
fn argmax(values: &[f32]) -> (usize, f32) {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    (best, values[best])
}
