use crate::error::PageSplitError;
use crate::layout::{LayoutSurface, PaintItem};
use crate::types::Color;
use base64::Engine;
use image::RgbaImage;
use std::collections::HashMap;
use std::path::Path as FsPath;
use tiny_skia::{FilterQuality, Paint, Pixmap, PixmapPaint, Rect, Transform};

/// A captured bitmap of the whole laid-out content. Read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterImage {
    pixels: RgbaImage,
    scale: f32,
}

impl RasterImage {
    /// `scale` is device pixels per layout pixel.
    pub fn from_rgba(pixels: RgbaImage, scale: f32) -> Result<Self, PageSplitError> {
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(PageSplitError::Capture(format!(
                "captured image is empty ({}x{})",
                pixels.width(),
                pixels.height()
            )));
        }
        if !(scale.is_finite() && scale > 0.0) {
            return Err(PageSplitError::InvalidConfiguration(format!(
                "capture scale must be > 0, got {scale}"
            )));
        }
        Ok(Self { pixels, scale })
    }

    /// Wraps a capture produced outside this crate.
    pub fn from_png_bytes(bytes: &[u8], scale: f32) -> Result<Self, PageSplitError> {
        let decoded = image::load_from_memory_with_format(bytes, image::ImageFormat::Png)?;
        Self::from_rgba(decoded.to_rgba8(), scale)
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub(crate) fn to_pixmap(&self) -> Result<Pixmap, PageSplitError> {
        rgba_to_pixmap(&self.pixels)
    }
}

/// Turns a committed layout into one tall bitmap.
pub trait Rasterizer {
    fn capture(
        &mut self,
        surface: &dyn LayoutSurface,
        scale: f32,
    ) -> Result<RasterImage, PageSplitError>;
}

/// Paints the surface display list with tiny-skia.
#[derive(Debug, Clone)]
pub struct DisplayListRasterizer {
    background: Color,
    image_cache: HashMap<String, Pixmap>,
}

impl Default for DisplayListRasterizer {
    fn default() -> Self {
        Self::new(Color::WHITE)
    }
}

impl DisplayListRasterizer {
    pub fn new(background: Color) -> Self {
        Self {
            background,
            image_cache: HashMap::new(),
        }
    }

    pub fn background(&self) -> Color {
        self.background
    }

    fn image(&mut self, source: &str) -> Result<&Pixmap, PageSplitError> {
        if !self.image_cache.contains_key(source) {
            let pixmap = load_image_pixmap(source)?;
            self.image_cache.insert(source.to_string(), pixmap);
        }
        self.image_cache
            .get(source)
            .ok_or_else(|| PageSplitError::Capture(format!("image {source} was not cached")))
    }

    fn paint_item(
        &mut self,
        pixmap: &mut Pixmap,
        item: &PaintItem,
        transform: Transform,
    ) -> Result<(), PageSplitError> {
        let Some(rect) = Rect::from_xywh(item.rect.x, item.rect.y, item.rect.width, item.rect.height)
        else {
            // Zero-height boxes paint nothing.
            return Ok(());
        };
        if let Some(fill) = item.fill {
            let mut paint = Paint::default();
            paint.set_color(fill.to_skia());
            paint.anti_alias = false;
            pixmap.fill_rect(rect, &paint, transform, None);
        }
        if let Some(source) = &item.image {
            let image = self.image(source)?;
            let src_w = image.width() as f32;
            let src_h = image.height() as f32;
            let image_ts = Transform::from_row(
                rect.width() / src_w,
                0.0,
                0.0,
                rect.height() / src_h,
                rect.x(),
                rect.y(),
            );
            let mut paint = PixmapPaint::default();
            paint.quality = FilterQuality::Bilinear;
            pixmap.draw_pixmap(0, 0, image.as_ref(), &paint, transform.pre_concat(image_ts), None);
        }
        Ok(())
    }
}

impl Rasterizer for DisplayListRasterizer {
    fn capture(
        &mut self,
        surface: &dyn LayoutSurface,
        scale: f32,
    ) -> Result<RasterImage, PageSplitError> {
        if !surface.is_committed() {
            return Err(PageSplitError::Measurement(
                "cannot capture a layout with uncommitted changes".to_string(),
            ));
        }
        if !(scale.is_finite() && scale > 0.0) {
            return Err(PageSplitError::InvalidConfiguration(format!(
                "capture scale must be > 0, got {scale}"
            )));
        }
        let width_px = (surface.width() * scale).ceil().max(1.0) as u32;
        // An empty layout still yields one blank row so it paginates to one page.
        let height_px = (surface.height() * scale).ceil().max(1.0) as u32;
        let mut pixmap = Pixmap::new(width_px, height_px).ok_or_else(|| {
            PageSplitError::Capture(format!("cannot allocate a {width_px}x{height_px} capture"))
        })?;
        pixmap.fill(self.background.to_skia());

        let transform = Transform::from_scale(scale, scale);
        for item in surface.paint_list()? {
            self.paint_item(&mut pixmap, &item, transform)?;
        }
        log::debug!("captured layout at {scale}x into {width_px}x{height_px} px");
        RasterImage::from_rgba(pixmap_to_rgba(&pixmap)?, scale)
    }
}

fn is_remote(source: &str) -> bool {
    let lower = source.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("//")
}

fn load_image_pixmap(source: &str) -> Result<Pixmap, PageSplitError> {
    if is_remote(source) {
        return Err(PageSplitError::Capture(format!(
            "remote image {source} cannot be read by the rasterizer"
        )));
    }
    if let Some((mime, data)) = parse_data_uri(source) {
        return decode_image_to_pixmap(&data, Some(&mime))
            .ok_or_else(|| PageSplitError::Capture(format!("undecodable {mime} data image")));
    }
    let bytes = std::fs::read(FsPath::new(source))
        .map_err(|e| PageSplitError::Capture(format!("image {source}: {e}")))?;
    decode_image_to_pixmap(&bytes, None)
        .ok_or_else(|| PageSplitError::Capture(format!("undecodable image {source}")))
}

fn decode_image_to_pixmap(data: &[u8], mime: Option<&str>) -> Option<Pixmap> {
    let guessed_format = match mime {
        Some(mime) if mime.contains("png") => Some(image::ImageFormat::Png),
        Some(mime) if mime.contains("jpeg") || mime.contains("jpg") => {
            Some(image::ImageFormat::Jpeg)
        }
        Some(_) => None,
        None => image::guess_format(data).ok(),
    };
    let decoded = match guessed_format {
        Some(fmt) => image::load_from_memory_with_format(data, fmt).ok()?,
        None => image::load_from_memory(data).ok()?,
    };
    rgba_to_pixmap(&decoded.to_rgba8()).ok()
}

pub(crate) fn rgba_to_pixmap(rgba: &RgbaImage) -> Result<Pixmap, PageSplitError> {
    let (width, height) = rgba.dimensions();
    let mut pixmap = Pixmap::new(width, height).ok_or_else(|| {
        PageSplitError::Capture(format!("cannot allocate a {width}x{height} pixmap"))
    })?;
    for (src, dst) in rgba
        .as_raw()
        .chunks_exact(4)
        .zip(pixmap.data_mut().chunks_exact_mut(4))
    {
        let a = src[3];
        dst[0] = premul_u8(src[0], a);
        dst[1] = premul_u8(src[1], a);
        dst[2] = premul_u8(src[2], a);
        dst[3] = a;
    }
    Ok(pixmap)
}

pub(crate) fn pixmap_to_rgba(pixmap: &Pixmap) -> Result<RgbaImage, PageSplitError> {
    let mut raw = Vec::with_capacity(pixmap.pixels().len() * 4);
    for pixel in pixmap.pixels() {
        let color = pixel.demultiply();
        raw.extend_from_slice(&[color.red(), color.green(), color.blue(), color.alpha()]);
    }
    RgbaImage::from_raw(pixmap.width(), pixmap.height(), raw).ok_or_else(|| {
        PageSplitError::Capture("pixmap buffer does not match its dimensions".to_string())
    })
}

fn premul_u8(channel: u8, alpha: u8) -> u8 {
    let prod = (channel as u16) * (alpha as u16) + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}

fn parse_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    if !uri.starts_with("data:") {
        return None;
    }
    let (header, payload) = uri.split_once(',')?;
    let mime = header
        .trim_start_matches("data:")
        .split(';')
        .next()
        .filter(|v| !v.is_empty())
        .unwrap_or("application/octet-stream")
        .to_string();
    let data = if header.contains(";base64") {
        base64::engine::general_purpose::STANDARD
            .decode(payload)
            .ok()?
    } else {
        payload.as_bytes().to_vec()
    };
    Some((mime, data))
}
