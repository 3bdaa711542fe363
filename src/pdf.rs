use crate::document::{PageImage, PaginatedDocument};
use crate::error::PageSplitError;
use lopdf::content::{Content, Operation};
use lopdf::{Document as LoDocument, Object as LoObject, Stream as LoStream, dictionary};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PdfOptions {
    pub pdf_version: PdfVersion,
    pub document_title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PdfVersion {
    Pdf14,
    #[default]
    Pdf17,
}

impl PdfVersion {
    fn as_str(self) -> &'static str {
        match self {
            PdfVersion::Pdf14 => "1.4",
            PdfVersion::Pdf17 => "1.7",
        }
    }
}

pub(crate) fn document_to_pdf_bytes(doc: &PaginatedDocument) -> Result<Vec<u8>, PageSplitError> {
    pdf_bytes_with_options(doc, &PdfOptions::default())
}

pub fn pdf_bytes_with_options(
    doc: &PaginatedDocument,
    options: &PdfOptions,
) -> Result<Vec<u8>, PageSplitError> {
    let mut lo = build_pdf(doc, options)?;
    let mut out = Vec::new();
    lo.save_to(&mut out)?;
    Ok(out)
}

pub(crate) fn save_document_pdf(doc: &PaginatedDocument, path: &Path) -> Result<(), PageSplitError> {
    let mut lo = build_pdf(doc, &PdfOptions::default())?;
    lo.save(path)?;
    log::debug!("wrote {} page(s) to {}", doc.page_count(), path.display());
    Ok(())
}

/// One page per composed image; each image covers its whole MediaBox.
fn build_pdf(doc: &PaginatedDocument, options: &PdfOptions) -> Result<LoDocument, PageSplitError> {
    let mut lo = LoDocument::with_version(options.pdf_version.as_str());
    let pages_id = lo.new_object_id();
    let size = doc.geometry().page_size_points();
    let media_box: Vec<LoObject> = vec![
        0.into(),
        0.into(),
        LoObject::Real(size.width),
        LoObject::Real(size.height),
    ];

    let mut kids: Vec<LoObject> = Vec::with_capacity(doc.page_count());
    for page in doc.pages() {
        let image_id = lo.add_object(image_xobject(page)?);
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        LoObject::Real(size.width),
                        0.into(),
                        0.into(),
                        LoObject::Real(size.height),
                        0.into(),
                        0.into(),
                    ],
                ),
                Operation::new("Do", vec![LoObject::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = lo.add_object(LoStream::new(dictionary! {}, content.encode()?));
        let page_id = lo.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => media_box.clone(),
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
        });
        kids.push(page_id.into());
    }

    lo.objects.insert(
        pages_id,
        LoObject::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => doc.page_count() as i64,
        }),
    );
    let catalog_id = lo.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    lo.trailer.set("Root", catalog_id);

    let mut info = dictionary! {
        "Producer" => LoObject::string_literal("pagesplit"),
    };
    if let Some(title) = &options.document_title {
        info.set("Title", LoObject::string_literal(title.as_str()));
    }
    let info_id = lo.add_object(info);
    lo.trailer.set("Info", info_id);

    lo.compress();
    Ok(lo)
}

/// Decodes one page at a time and deflates it straight away, so only a
/// single raw page exists while the document is assembled.
fn image_xobject(page: &PageImage) -> Result<LoStream, PageSplitError> {
    let pixels = page.pixels()?;
    let mut rgb = Vec::with_capacity((pixels.width() * pixels.height() * 3) as usize);
    for pixel in pixels.pixels() {
        let [r, g, b, _] = pixel.0;
        rgb.extend_from_slice(&[r, g, b]);
    }
    drop(pixels);
    let mut stream = LoStream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => page.width_px() as i64,
            "Height" => page.height_px() as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        },
        rgb,
    );
    stream.compress()?;
    Ok(stream)
}
