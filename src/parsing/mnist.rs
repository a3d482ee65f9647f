use super::{Dataset, DatasetError, IMAGE_SIDE, NUM_CLASSES, NUM_FEATURES};
use flate2::read::GzDecoder;
use ndarray::Array2;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const LINE_SIZE: usize = NUM_FEATURES + 1;
const GREYSCALE_SIZE: f64 = 255f64;
const IMAGES_MAGIC: u32 = 2051;
const LABELS_MAGIC: u32 = 2049;

/// Parse a record in the dataset. Return the pixels and the label
/// Records are stored in the format: <label>,<pixel1>,<pixel2>,...
/// This is the layout of the Kaggle CSV export of Fashion-MNIST
fn parse_dataset_record(
    record: &csv::StringRecord,
    line: usize,
) -> Result<(Vec<f64>, usize), DatasetError> {
    if record.len() != LINE_SIZE {
        return Err(DatasetError::MalformedRecord {
            line,
            reason: format!("expected {} fields, found {}", LINE_SIZE, record.len()),
        });
    }

    let mut values = record.iter().map(|x| {
        x.trim()
            .parse::<f64>()
            .map_err(|_| DatasetError::MalformedRecord {
                line,
                reason: format!("{:?} is not a number", x),
            })
    });

    let label = values.next().unwrap_or(Ok(f64::NAN))?;
    if label.fract() != 0.0 || !(0.0..NUM_CLASSES as f64).contains(&label) {
        return Err(DatasetError::MalformedRecord {
            line,
            reason: format!("label {} is not a garment class", label),
        });
    }

    // we divide by 255 to normalize
    let pixels = values
        .map(|x| x.map(|x| x / GREYSCALE_SIZE))
        .collect::<Result<Vec<f64>, _>>()?;

    Ok((pixels, label as usize))
}

/// Construct one-hot encodings for the labels
fn one_hot(labels: &[usize]) -> Array2<f64> {
    let mut target = Array2::zeros((labels.len(), NUM_CLASSES));

    for (row, &label) in labels.iter().enumerate() {
        target[[row, label]] = 1f64;
    }

    target
}

fn into_dataset(pixels: Vec<f64>, labels: Vec<usize>) -> Result<Dataset, DatasetError> {
    if labels.is_empty() {
        return Err(DatasetError::Empty);
    }

    let images = pixels.len() / NUM_FEATURES;
    let data = Array2::from_shape_vec((labels.len(), NUM_FEATURES), pixels).map_err(|_| {
        DatasetError::LengthMismatch {
            images,
            labels: labels.len(),
        }
    })?;

    Ok(Dataset {
        data,
        target: one_hot(&labels),
    })
}

/// Read a CSV dataset. A leading header row is skipped.
pub fn parse_dataset_csv(path: &Path) -> Result<Dataset, DatasetError> {
    let file = File::open(path).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => DatasetError::NotFound(path.to_path_buf()),
        _ => DatasetError::Io(err),
    })?;
    let reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(BufReader::new(file));

    let mut pixels = Vec::new();
    let mut labels = Vec::new();

    for (idx, record) in reader.into_records().enumerate() {
        let record = record.map_err(|err| DatasetError::MalformedRecord {
            line: err.position().map_or(idx + 1, |p| p.line() as usize),
            reason: err.to_string(),
        })?;
        let line = record.position().map_or(idx + 1, |p| p.line() as usize);

        if idx == 0 && record.get(0).map_or(false, |x| x.trim().parse::<f64>().is_err()) {
            continue;
        }
        if record.iter().all(|x| x.trim().is_empty()) {
            continue;
        }

        let (row, label) = parse_dataset_record(&record, line)?;
        pixels.extend(row);
        labels.push(label);
    }

    tracing::debug!("parsed {} samples from {}", labels.len(), path.display());

    into_dataset(pixels, labels)
}

/// Open a file, gunzipping it when the name ends in `.gz`
fn read_all(path: &Path) -> Result<Vec<u8>, DatasetError> {
    let file = File::open(path)?;
    let mut bytes = Vec::new();

    if path.extension().map_or(false, |ext| ext == "gz") {
        GzDecoder::new(file).read_to_end(&mut bytes)?;
    } else {
        BufReader::new(file).read_to_end(&mut bytes)?;
    }

    Ok(bytes)
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, DatasetError> {
    bytes
        .get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| {
            DatasetError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "IDX header is truncated",
            ))
        })
}

fn check_magic(bytes: &[u8], expected: u32) -> Result<(), DatasetError> {
    let found = read_u32(bytes, 0)?;

    if found != expected {
        return Err(DatasetError::BadMagic { expected, found });
    }

    Ok(())
}

fn truncated(what: &str) -> DatasetError {
    DatasetError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("IDX {what} payload is truncated"),
    ))
}

/// Read an IDX image file and its companion label file.
///
/// Images have a 16-byte header (magic, count, rows, cols), labels an
/// 8-byte one (magic, count). All integers are big-endian.
pub fn parse_idx(images_path: &Path, labels_path: &Path) -> Result<Dataset, DatasetError> {
    let image_bytes = read_all(images_path)?;
    let label_bytes = read_all(labels_path)?;

    check_magic(&image_bytes, IMAGES_MAGIC)?;
    check_magic(&label_bytes, LABELS_MAGIC)?;

    let num_images = read_u32(&image_bytes, 4)? as usize;
    let rows = read_u32(&image_bytes, 8)?;
    let cols = read_u32(&image_bytes, 12)?;
    let num_labels = read_u32(&label_bytes, 4)? as usize;

    if rows as usize != IMAGE_SIDE || cols as usize != IMAGE_SIDE {
        return Err(DatasetError::BadDimensions { rows, cols });
    }
    if num_images != num_labels {
        return Err(DatasetError::LengthMismatch {
            images: num_images,
            labels: num_labels,
        });
    }

    let pixels = image_bytes
        .get(16..16 + num_images * NUM_FEATURES)
        .ok_or_else(|| truncated("image"))?
        .iter()
        .map(|&p| p as f64 / GREYSCALE_SIZE)
        .collect();
    let labels = label_bytes
        .get(8..8 + num_labels)
        .ok_or_else(|| truncated("label"))?
        .iter()
        .map(|&l| l as usize)
        .collect::<Vec<_>>();

    if let Some((index, &label)) = labels.iter().enumerate().find(|(_, &l)| l >= NUM_CLASSES) {
        return Err(DatasetError::LabelOutOfRange { index, label });
    }

    tracing::debug!(
        "parsed {} samples from {}",
        labels.len(),
        images_path.display()
    );

    into_dataset(pixels, labels)
}
