//! PDF assembly from ordered page images.
//!
//! Every page is decoded and re-encoded before the document is built, so an
//! unreadable page fails the whole assembly and no partial document is ever
//! produced. The document carries no timestamps, which keeps output
//! byte-for-byte reproducible.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, StringFormat, Stream};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::outcome::FailureKind;
use crate::rendition::{decode_image, encode_jpeg, EncodedJpeg, JpegColor, RenderError};

pub const DEFAULT_PAGE_QUALITY: u8 = 90;
const PAGE_IMAGE_NAME: &[u8] = b"Im0";
/// Largest page edge, in user space units, that PDF consumers must accept.
pub const MAX_PAGE_EDGE: i64 = 14_400;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PdfMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
}

impl PdfMetadata {
    fn entries(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("Title", self.title.as_deref()),
            ("Author", self.author.as_deref()),
            ("Subject", self.subject.as_deref()),
            ("Keywords", self.keywords.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|value| (name, value)))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PdfSpec {
    /// Indices into the page list; `None` keeps list order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_order: Option<Vec<usize>>,
    #[serde(default)]
    pub metadata: PdfMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembleSettings {
    pub page_quality: u8,
    pub max_alloc_bytes: Option<u64>,
}

impl Default for AssembleSettings {
    fn default() -> Self {
        Self {
            page_quality: DEFAULT_PAGE_QUALITY,
            max_alloc_bytes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSource {
    pub key: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledPdf {
    pub bytes: Vec<u8>,
    pub page_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssembleError {
    #[error("page set is empty")]
    EmptyPageSet,
    #[error("page_order references page {index} but only {available} pages were supplied")]
    MissingPage { index: usize, available: usize },
    #[error("page_order references page {index} more than once")]
    DuplicatePage { index: usize },
    #[error("page '{key}' is unreadable: {reason}")]
    UnreadablePage { key: String, reason: String },
    #[error("page '{key}' exceeds decoder limits: {reason}")]
    ResourceExhausted { key: String, reason: String },
    #[error("failed to write pdf: {0}")]
    Pdf(String),
}

impl AssembleError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::ResourceExhausted { .. } => FailureKind::ResourceExhausted,
            _ => FailureKind::UnprocessableInput,
        }
    }
}

/// Memory guard for loading a page set: the pages may use at most
/// `1 - buffer_ratio` of the function's memory.
pub fn exceeds_memory_budget(total_bytes: u64, memory_limit_bytes: u64, buffer_ratio: f64) -> bool {
    total_bytes as f64 > memory_limit_bytes as f64 * (1.0 - buffer_ratio)
}

pub fn ordered_pages<'a, T>(
    pages: &'a [T],
    page_order: Option<&[usize]>,
) -> Result<Vec<&'a T>, AssembleError> {
    if pages.is_empty() {
        return Err(AssembleError::EmptyPageSet);
    }

    let Some(order) = page_order else {
        return Ok(pages.iter().collect());
    };
    if order.is_empty() {
        return Err(AssembleError::EmptyPageSet);
    }

    let mut seen = vec![false; pages.len()];
    let mut ordered = Vec::with_capacity(order.len());
    for &index in order {
        let page = pages.get(index).ok_or(AssembleError::MissingPage {
            index,
            available: pages.len(),
        })?;
        if std::mem::replace(&mut seen[index], true) {
            return Err(AssembleError::DuplicatePage { index });
        }
        ordered.push(page);
    }
    Ok(ordered)
}

pub fn assemble(
    pages: &[PageSource],
    spec: &PdfSpec,
    settings: &AssembleSettings,
) -> Result<AssembledPdf, AssembleError> {
    let ordered = ordered_pages(pages, spec.page_order.as_deref())?;
    let encoded = ordered
        .iter()
        .map(|page| page_image(page, settings))
        .collect::<Result<Vec<_>, _>>()?;

    let page_count = encoded.len();
    let bytes = write_document(encoded, &spec.metadata)?;
    tracing::debug!(page_count, size = bytes.len(), "assembled pdf");

    Ok(AssembledPdf { bytes, page_count })
}

fn page_image(page: &PageSource, settings: &AssembleSettings) -> Result<EncodedJpeg, AssembleError> {
    let image = decode_image(&page.bytes, settings.max_alloc_bytes).map_err(|error| match error {
        RenderError::ResourceExhausted(reason) => AssembleError::ResourceExhausted {
            key: page.key.clone(),
            reason,
        },
        other => AssembleError::UnreadablePage {
            key: page.key.clone(),
            reason: other.to_string(),
        },
    })?;

    encode_jpeg(&image, settings.page_quality).map_err(|error| AssembleError::UnreadablePage {
        key: page.key.clone(),
        reason: error.to_string(),
    })
}

fn write_document(pages: Vec<EncodedJpeg>, metadata: &PdfMetadata) -> Result<Vec<u8>, AssembleError> {
    // UserUnit needs PDF 1.6; only documents with oversized pages declare it.
    let oversized = pages
        .iter()
        .any(|page| page_geometry(page.width, page.height).user_unit > 1);
    let mut document = Document::with_version(if oversized { "1.6" } else { "1.5" });
    let pages_id = document.new_object_id();
    let page_count = pages.len();
    let mut kids: Vec<Object> = Vec::with_capacity(page_count);

    for page in pages {
        let width = i64::from(page.width);
        let height = i64::from(page.height);
        let geometry = page_geometry(page.width, page.height);
        let color_space = match page.color {
            JpegColor::Gray => "DeviceGray",
            JpegColor::Rgb => "DeviceRGB",
        };

        let image_id = document.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width,
                "Height" => height,
                "ColorSpace" => color_space,
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            page.bytes,
        ));

        // One image scaled to cover the whole page.
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        geometry.width.into(),
                        0.into(),
                        0.into(),
                        geometry.height.into(),
                        0.into(),
                        0.into(),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(PAGE_IMAGE_NAME.to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_bytes = content
            .encode()
            .map_err(|error| AssembleError::Pdf(error.to_string()))?;
        let content_id = document.add_object(Stream::new(dictionary! {}, content_bytes));

        let mut xobjects = Dictionary::new();
        xobjects.set(PAGE_IMAGE_NAME.to_vec(), image_id);
        let mut page_dict = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), geometry.width.into(), geometry.height.into()],
            "Contents" => content_id,
            "Resources" => dictionary! { "XObject" => xobjects },
        };
        if geometry.user_unit > 1 {
            page_dict.set("UserUnit", geometry.user_unit);
        }
        let page_id = document.add_object(page_dict);
        kids.push(page_id.into());
    }

    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
        }),
    );
    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    document.trailer.set("Root", catalog_id);

    let mut info = Dictionary::new();
    for (name, value) in metadata.entries() {
        info.set(name, pdf_text(value));
    }
    if !info.is_empty() {
        let info_id = document.add_object(info);
        document.trailer.set("Info", info_id);
    }

    let mut bytes = Vec::new();
    document
        .save_to(&mut bytes)
        .map_err(|error| AssembleError::Pdf(error.to_string()))?;
    Ok(bytes)
}

/// Page box in user space units. At 1 px = 1 pt a page may exceed
/// [`MAX_PAGE_EDGE`], so larger scans get a whole-number `UserUnit` that
/// brings the box back under the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PageGeometry {
    pub width: i64,
    pub height: i64,
    pub user_unit: i64,
}

pub(crate) fn page_geometry(width: u32, height: u32) -> PageGeometry {
    let width = i64::from(width);
    let height = i64::from(height);
    let longest = width.max(height);
    let user_unit = ((longest + MAX_PAGE_EDGE - 1) / MAX_PAGE_EDGE).max(1);
    PageGeometry {
        width: ((width + user_unit - 1) / user_unit).max(1),
        height: ((height + user_unit - 1) / user_unit).max(1),
        user_unit,
    }
}

/// PDF text string: literal for ASCII, UTF-16BE with BOM otherwise.
fn pdf_text(value: &str) -> Object {
    if value.is_ascii() {
        return Object::string_literal(value);
    }
    let mut encoded = vec![0xFE, 0xFF];
    for unit in value.encode_utf16() {
        encoded.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(encoded, StringFormat::Hexadecimal)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

    use super::*;

    fn page(key: &str, width: u32, height: u32, format: ImageFormat) -> PageSource {
        let image = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 128]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), format)
            .expect("fixture should encode");
        PageSource {
            key: key.to_string(),
            bytes,
        }
    }

    fn page_widths(pdf: &[u8]) -> Vec<i64> {
        let document = Document::load_mem(pdf).expect("pdf should parse");
        document
            .get_pages()
            .into_values()
            .map(|page_id| {
                let page = document
                    .get_object(page_id)
                    .and_then(Object::as_dict)
                    .expect("page dictionary");
                let media_box = page
                    .get(b"MediaBox")
                    .and_then(Object::as_array)
                    .expect("media box");
                media_box[2].as_i64().expect("integer width")
            })
            .collect()
    }

    fn three_pages() -> Vec<PageSource> {
        vec![
            page("p/1.jpg", 10, 20, ImageFormat::Jpeg),
            page("p/2.png", 30, 20, ImageFormat::Png),
            page("p/3.tif", 50, 20, ImageFormat::Tiff),
        ]
    }

    #[test]
    fn assembles_one_page_per_image_in_list_order() {
        let pdf = assemble(&three_pages(), &PdfSpec::default(), &AssembleSettings::default())
            .expect("assembly should succeed");

        assert_eq!(pdf.page_count, 3);
        assert!(pdf.bytes.starts_with(b"%PDF-1.5"));
        assert_eq!(page_widths(&pdf.bytes), vec![10, 30, 50]);
    }

    #[test]
    fn honours_page_order() {
        let spec = PdfSpec {
            page_order: Some(vec![2, 0, 1]),
            ..PdfSpec::default()
        };
        let pdf = assemble(&three_pages(), &spec, &AssembleSettings::default())
            .expect("assembly should succeed");

        assert_eq!(page_widths(&pdf.bytes), vec![50, 10, 30]);
    }

    #[test]
    fn empty_page_set_is_rejected() {
        let error = assemble(&[], &PdfSpec::default(), &AssembleSettings::default())
            .expect_err("empty page set should fail");
        assert_eq!(error, AssembleError::EmptyPageSet);
        assert_eq!(error.failure_kind(), FailureKind::UnprocessableInput);

        let spec = PdfSpec {
            page_order: Some(Vec::new()),
            ..PdfSpec::default()
        };
        let error = assemble(&three_pages(), &spec, &AssembleSettings::default())
            .expect_err("empty page order should fail");
        assert_eq!(error, AssembleError::EmptyPageSet);
    }

    #[test]
    fn unreadable_page_fails_the_whole_document() {
        let mut pages = three_pages();
        pages[1].bytes = b"corrupt page".to_vec();

        let error = assemble(&pages, &PdfSpec::default(), &AssembleSettings::default())
            .expect_err("corrupt page should fail");
        match &error {
            AssembleError::UnreadablePage { key, .. } => assert_eq!(key, "p/2.png"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(error.failure_kind(), FailureKind::UnprocessableInput);
    }

    #[test]
    fn page_order_must_reference_supplied_pages_once() {
        let spec = PdfSpec {
            page_order: Some(vec![0, 3]),
            ..PdfSpec::default()
        };
        let error = assemble(&three_pages(), &spec, &AssembleSettings::default())
            .expect_err("out of range index should fail");
        assert_eq!(
            error,
            AssembleError::MissingPage {
                index: 3,
                available: 3
            }
        );

        let spec = PdfSpec {
            page_order: Some(vec![1, 1]),
            ..PdfSpec::default()
        };
        let error = assemble(&three_pages(), &spec, &AssembleSettings::default())
            .expect_err("duplicate index should fail");
        assert_eq!(error, AssembleError::DuplicatePage { index: 1 });
    }

    #[test]
    fn writes_document_info() {
        let spec = PdfSpec {
            metadata: PdfMetadata {
                title: Some("Field Notes".to_string()),
                author: Some("Écrivain".to_string()),
                subject: None,
                keywords: Some("maps, survey".to_string()),
            },
            ..PdfSpec::default()
        };
        let pdf = assemble(&three_pages(), &spec, &AssembleSettings::default())
            .expect("assembly should succeed");

        let document = Document::load_mem(&pdf.bytes).expect("pdf should parse");
        let info_id = document
            .trailer
            .get(b"Info")
            .and_then(Object::as_reference)
            .expect("info reference");
        let info = document
            .get_object(info_id)
            .and_then(Object::as_dict)
            .expect("info dictionary");

        assert_eq!(
            info.get(b"Title").and_then(Object::as_str).expect("title"),
            b"Field Notes"
        );
        assert!(info.get(b"Author").is_ok());
        assert!(info.get(b"Subject").is_err());
    }

    #[test]
    fn page_geometry_stays_within_the_page_size_limit() {
        assert_eq!(
            page_geometry(1600, 1200),
            PageGeometry {
                width: 1600,
                height: 1200,
                user_unit: 1
            }
        );
        assert_eq!(page_geometry(14_400, 10).user_unit, 1);
        assert_eq!(
            page_geometry(14_401, 9_000),
            PageGeometry {
                width: 7_201,
                height: 4_500,
                user_unit: 2
            }
        );
        assert_eq!(
            page_geometry(40_000, 3),
            PageGeometry {
                width: 13_334,
                height: 1,
                user_unit: 3
            }
        );
    }

    #[test]
    fn oversized_scans_declare_a_user_unit() {
        let pages = vec![page("p/wide.jpg", 20_000, 2, ImageFormat::Png)];

        let assembled = assemble(&pages, &PdfSpec::default(), &AssembleSettings::default())
            .expect("assembly should succeed");

        let document = Document::load_mem(&assembled.bytes).expect("pdf should parse");
        assert_eq!(document.version, "1.6");
        let page_id = document.get_pages().into_values().next().expect("one page");
        let page = document
            .get_object(page_id)
            .and_then(Object::as_dict)
            .expect("page dictionary");
        assert_eq!(page.get(b"UserUnit").and_then(Object::as_i64).ok(), Some(2));
        assert_eq!(page_widths(&assembled.bytes), vec![10_000]);
    }

    #[test]
    fn assembly_is_deterministic() {
        let first = assemble(&three_pages(), &PdfSpec::default(), &AssembleSettings::default())
            .expect("first assembly");
        let second = assemble(&three_pages(), &PdfSpec::default(), &AssembleSettings::default())
            .expect("second assembly");
        assert_eq!(first.bytes, second.bytes);
    }

    #[test]
    fn memory_budget_keeps_a_buffer() {
        assert!(exceeds_memory_budget(1024, 1024, 0.3));
        assert!(!exceeds_memory_budget(716, 1024, 0.3));
        assert!(exceeds_memory_budget(717, 1024, 0.3));
        assert!(!exceeds_memory_budget(1024, 2048, 0.5));
    }
}
