use crate::contract::QueueKind;
use crate::rendition::{FitMode, ImageSpec};

pub const BAG_IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "tif", "tiff", "png"];

/// Derivative key for an explicit rendition request. It lives next to the
/// source and encodes every spec field that changes the output bytes.
pub fn derivative_object_key(source_key: &str, spec: &ImageSpec) -> String {
    let (directory, file_name) = split_key(source_key);
    let stem = file_stem(file_name);

    let mut suffix = String::new();
    if let Some(width) = spec.width {
        suffix.push_str(&format!("_w{width}"));
    }
    if let Some(height) = spec.height {
        suffix.push_str(&format!("_h{height}"));
    }
    if let Some(scale) = spec.scale {
        suffix.push_str(&format!("_s{scale}"));
    }
    if spec.fit != FitMode::Contain {
        suffix.push('_');
        suffix.push_str(spec.fit.as_str());
    }
    if let Some(quality) = spec.quality {
        suffix.push_str(&format!("_q{quality}"));
    }

    format!("{directory}{stem}{suffix}.{}", spec.format.extension())
}

pub fn bag_source_object_key(bag: &str, image: &str) -> String {
    format!("source/{bag}/data/{image}")
}

pub fn bag_derivative_prefix(bag: &str, scale_label: &str) -> String {
    format!("derivative/{bag}/{scale_label}/")
}

/// Bag derivatives are always JPEG and keep the image's relative path.
pub fn legacy_derivative_object_key(bag: &str, scale_label: &str, image: &str) -> String {
    let (directory, file_name) = split_key(image);
    format!(
        "{}{directory}{}.jpg",
        bag_derivative_prefix(bag, scale_label),
        file_stem(file_name)
    )
}

pub fn bag_pdf_object_key(bag: &str) -> String {
    format!("derivative/{bag}/pdf/{bag}.pdf")
}

pub fn failure_record_object_key(base_prefix: &str, queue: QueueKind, message_id: &str) -> String {
    let trimmed = base_prefix.trim_matches('/');
    format!(
        "{trimmed}/dataset=terminal_failures/queue={}/message_id={message_id}/part-0.json",
        queue.as_str()
    )
}

/// Whether a listed key is a page image of a bag: a known image extension,
/// not a hidden file and not an `orig` master.
pub fn is_bag_page_image(key: &str) -> bool {
    let (_, file_name) = split_key(key);
    if file_name.starts_with('.') {
        return false;
    }
    if file_name.to_ascii_lowercase().contains("orig") {
        return false;
    }
    match file_name.rsplit_once('.') {
        Some((_, extension)) => BAG_IMAGE_EXTENSIONS
            .iter()
            .any(|known| extension.eq_ignore_ascii_case(known)),
        None => false,
    }
}

fn split_key(key: &str) -> (&str, &str) {
    match key.rfind('/') {
        Some(index) => key.split_at(index + 1),
        None => ("", key),
    }
}

fn file_stem(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(index) if index > 0 => &file_name[..index],
        _ => file_name,
    }
}
