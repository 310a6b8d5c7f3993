use argh::FromArgs;
use std::path::PathBuf;

use kornia_io::functional as F;
use kornia_tiny_yolo::{TinyYoloV2, TinyYoloV2Config};

#[derive(FromArgs)]
/// Tiny-YOLOv2 detection application arguments
struct Args {
    /// path to an input image
    #[argh(option)]
    image_path: PathBuf,

    /// path to the raw network output, as little-endian f32 values
    #[argh(option)]
    output_path: PathBuf,

    /// the confidence threshold for the model
    #[argh(option, default = "0.3")]
    confidence_threshold: f32,

    /// the nms threshold for the model
    #[argh(option, default = "0.5")]
    overlap_threshold: f32,

    /// the maximum number of detections to keep
    #[argh(option, default = "5")]
    max_boxes: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Args = argh::from_env();

    let rec = rerun::RecordingStreamBuilder::new("Tiny-YOLOv2 Detection App").spawn()?;

    let config = TinyYoloV2Config {
        confidence_threshold: args.confidence_threshold,
        overlap_threshold: args.overlap_threshold,
        max_boxes: args.max_boxes,
        ..Default::default()
    };

    let decoder = TinyYoloV2::new(config)?;

    // read the image as RGB8
    let image = F::read_image_any(args.image_path)?;

    let bytes = std::fs::read(&args.output_path)?;
    if bytes.len() % 4 != 0 {
        return Err(format!(
            "{} holds {} bytes, not a whole number of f32 values",
            args.output_path.display(),
            bytes.len()
        )
        .into());
    }
    let output = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect::<Vec<_>>();

    // decode the network output and get the detections
    let detections = decoder.decode_and_filter(&output)?;

    rec.log(
        "image",
        &rerun::Image::from_elements(
            image.as_slice(),
            image.size().into(),
            rerun::ColorModel::RGB,
        ),
    )?;

    let input_size = decoder.config().input_size();
    let mut boxes_mins = Vec::new();
    let mut boxes_sizes = Vec::new();
    let mut labels = Vec::new();
    let mut colors = Vec::new();
    for detection in detections {
        let detection = detection.to_image_space(input_size, image.size());
        tracing::info!(
            "{} and its confidence score: {:.3}",
            detection.label,
            detection.confidence
        );

        let [r, g, b] = detection.color();
        boxes_mins.push((detection.x, detection.y));
        boxes_sizes.push((detection.width, detection.height));
        labels.push(format!(
            "{} ({:.0}%)",
            detection.label,
            detection.confidence * 100.0
        ));
        colors.push(rerun::Color::from_rgb(r, g, b));
    }

    rec.log(
        "boxes",
        &rerun::Boxes2D::from_mins_and_sizes(boxes_mins, boxes_sizes)
            .with_labels(labels)
            .with_colors(colors),
    )?;

    Ok(())
}
