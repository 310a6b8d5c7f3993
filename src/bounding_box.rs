use kornia_image::ImageSize;
use serde::Serialize;

/// RGB palette used to draw detections, indexed by [`BoundingBox::color_index`].
pub const CLASS_COLORS: [[u8; 3]; 21] = [
    [240, 230, 140], // khaki
    [255, 0, 255],   // fuchsia
    [192, 192, 192], // silver
    [65, 105, 225],  // royal blue
    [0, 128, 0],     // green
    [255, 140, 0],   // dark orange
    [128, 0, 128],   // purple
    [255, 215, 0],   // gold
    [255, 0, 0],     // red
    [127, 255, 212], // aquamarine
    [0, 255, 0],     // lime
    [240, 248, 255], // alice blue
    [160, 82, 45],   // sienna
    [218, 112, 214], // orchid
    [210, 180, 140], // tan
    [255, 182, 193], // light pink
    [255, 255, 0],   // yellow
    [255, 105, 180], // hot pink
    [107, 142, 35],  // olive drab
    [244, 164, 96],  // sandy brown
    [0, 206, 209],   // dark turquoise
];

/// Bounding box struct for detection results.
///
/// Coordinates are expressed in the model input space (the output grid scaled
/// by the cell size), with `(x, y)` at the top-left corner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundingBox {
    /// Minimum x coordinate of the bounding box.
    pub x: f32,
    /// Minimum y coordinate of the bounding box.
    pub y: f32,
    /// Width of the bounding box.
    pub width: f32,
    /// Height of the bounding box.
    pub height: f32,
    /// Confidence score of the bounding box.
    pub confidence: f32,
    /// Class index of the bounding box.
    pub class: u32,
    /// Class name of the bounding box.
    pub label: String,
    /// Index into [`CLASS_COLORS`] used when drawing the box.
    pub color_index: usize,
}

impl BoundingBox {
    /// Create a bounding box, deriving its color from the class index.
    pub fn new(
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        confidence: f32,
        class: u32,
        label: impl Into<String>,
    ) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence,
            class,
            label: label.into(),
            color_index: class as usize % CLASS_COLORS.len(),
        }
    }

    /// Maximum x coordinate of the bounding box.
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    /// Maximum y coordinate of the bounding box.
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Area covered by the bounding box.
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// RGB color assigned to the class of this box.
    pub fn color(&self) -> [u8; 3] {
        CLASS_COLORS[self.color_index % CLASS_COLORS.len()]
    }

    /// Intersection over union of two bounding boxes.
    ///
    /// Degenerate boxes (zero or negative area) never overlap anything.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let area_a = self.area();
        if area_a <= 0. {
            return 0.;
        }
        let area_b = other.area();
        if area_b <= 0. {
            return 0.;
        }

        let i_xmin = self.x.max(other.x);
        let i_ymin = self.y.max(other.y);
        let i_xmax = self.right().min(other.right());
        let i_ymax = self.bottom().min(other.bottom());
        let i_area = (i_xmax - i_xmin).max(0.) * (i_ymax - i_ymin).max(0.);

        i_area / (area_a + area_b - i_area)
    }

    /// Map the box from model input space into the pixel space of the source image.
    ///
    /// The box is first clamped to the input bounds, then scaled by the ratio
    /// between the image and input sizes.
    pub fn to_image_space(&self, input: ImageSize, image: ImageSize) -> BoundingBox {
        let input_w = input.width as f32;
        let input_h = input.height as f32;
        let w_ratio = image.width as f32 / input_w;
        let h_ratio = image.height as f32 / input_h;

        let x = self.x.clamp(0., input_w);
        let y = self.y.clamp(0., input_h);
        let width = self.width.min(input_w - x).max(0.);
        let height = self.height.min(input_h - y).max(0.);

        BoundingBox {
            x: x * w_ratio,
            y: y * h_ratio,
            width: width * w_ratio,
            height: height * h_ratio,
            ..self.clone()
        }
    }
}

/// Non-maximum suppression for bounding boxes.
///
/// Boxes are visited by descending confidence; ties keep their input order.
/// Each kept box suppresses every later box overlapping it with an IoU
/// greater than `threshold`, regardless of class. At most `max_boxes` boxes
/// are returned.
///
/// # Arguments
///
/// * `boxes` - The candidate bounding boxes.
/// * `max_boxes` - The maximum number of boxes to keep.
/// * `threshold` - The IoU threshold for suppression.
pub fn non_maximum_suppression(
    boxes: &[BoundingBox],
    max_boxes: usize,
    threshold: f32,
) -> Vec<BoundingBox> {
    // sort_by is stable, so equal confidences keep the decode order
    let mut sorted: Vec<&BoundingBox> = boxes.iter().collect();
    sorted.sort_by(|b1, b2| b2.confidence.total_cmp(&b1.confidence));

    let mut active = vec![true; sorted.len()];
    let mut result = Vec::with_capacity(max_boxes.min(sorted.len()));

    for index in 0..sorted.len() {
        if result.len() >= max_boxes {
            break;
        }
        if !active[index] {
            continue;
        }

        let picked = sorted[index];
        result.push(picked.clone());

        for next in index + 1..sorted.len() {
            if active[next] && picked.iou(sorted[next]) > threshold {
                active[next] = false;
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, width: f32, height: f32, confidence: f32) -> BoundingBox {
        BoundingBox::new(x, y, width, height, confidence, 0, "aeroplane")
    }

    #[test]
    fn test_iou() {
        let a = bbox(0.0, 0.0, 2.0, 2.0, 0.5);
        let b = bbox(1.0, 1.0, 2.0, 2.0, 0.5);
        let c = bbox(5.0, 5.0, 1.0, 1.0, 0.5);

        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&b), 1.0 / 7.0);
        assert_eq!(a.iou(&c), 0.0);
    }

    #[test]
    fn test_iou_degenerate_box() {
        let a = bbox(0.0, 0.0, 2.0, 2.0, 0.5);
        let empty = bbox(0.0, 0.0, 0.0, 2.0, 0.5);

        assert_eq!(a.iou(&empty), 0.0);
        assert_eq!(empty.iou(&a), 0.0);
    }

    #[test]
    fn test_non_maximum_suppression() {
        // iou = 90 / 100
        let boxes = vec![
            bbox(0.0, 0.0, 10.0, 9.0, 0.6),
            bbox(0.0, 0.0, 10.0, 10.0, 0.9),
        ];

        let picked = non_maximum_suppression(&boxes, 5, 0.5);

        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].confidence, 0.9);
    }

    #[test]
    fn test_non_maximum_suppression_keeps_iou_at_threshold() {
        // iou = 1 / (2 + 1 - 1)
        let boxes = vec![bbox(0.0, 0.0, 2.0, 1.0, 0.9), bbox(0.0, 0.0, 1.0, 1.0, 0.8)];
        assert_eq!(boxes[0].iou(&boxes[1]), 0.5);

        let picked = non_maximum_suppression(&boxes, 5, 0.5);

        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn test_non_maximum_suppression_is_cross_class() {
        let mut other = bbox(0.0, 0.0, 10.0, 10.0, 0.7);
        other.class = 3;
        other.label = "boat".to_string();
        let boxes = vec![bbox(0.0, 0.0, 10.0, 10.0, 0.8), other];

        let picked = non_maximum_suppression(&boxes, 5, 0.5);

        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].label, "aeroplane");
    }

    #[test]
    fn test_non_maximum_suppression_limit_and_order() {
        let boxes = vec![
            bbox(0.0, 0.0, 1.0, 1.0, 0.4),
            bbox(10.0, 0.0, 1.0, 1.0, 0.9),
            bbox(20.0, 0.0, 1.0, 1.0, 0.4),
            bbox(30.0, 0.0, 1.0, 1.0, 0.7),
        ];

        let picked = non_maximum_suppression(&boxes, 3, 0.5);

        assert_eq!(picked.len(), 3);
        assert_eq!(picked[0].x, 10.0);
        assert_eq!(picked[1].x, 30.0);
        // ties keep their input order
        assert_eq!(picked[2].x, 0.0);
    }

    #[test]
    fn test_non_maximum_suppression_empty() {
        assert!(non_maximum_suppression(&[], 5, 0.5).is_empty());
    }

    #[test]
    fn test_to_image_space() {
        let b = bbox(-10.0, 20.0, 100.0, 500.0, 0.5);
        let input = ImageSize {
            width: 416,
            height: 416,
        };
        let image = ImageSize {
            width: 832,
            height: 416,
        };

        let mapped = b.to_image_space(input, image);

        assert_eq!(mapped.x, 0.0);
        assert_eq!(mapped.y, 20.0);
        assert_eq!(mapped.width, 200.0);
        assert_eq!(mapped.height, 396.0);
        assert_eq!(mapped.label, b.label);
        assert_eq!(mapped.confidence, b.confidence);
    }

    #[test]
    fn test_color_follows_class() {
        let b = BoundingBox::new(0.0, 0.0, 1.0, 1.0, 0.5, 8, "chair");
        assert_eq!(b.color_index, 8);
        assert_eq!(b.color(), [255, 0, 0]);
    }
}
