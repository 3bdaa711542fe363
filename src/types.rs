/// Unit a set of page dimensions is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Millimeter,
    Pixel,
    Point,
}

impl Unit {
    pub fn label(self) -> &'static str {
        match self {
            Unit::Millimeter => "mm",
            Unit::Pixel => "px",
            Unit::Point => "pt",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// ISO A4 in millimeters.
    pub fn a4_mm() -> Self {
        Self::new(210.0, 297.0)
    }

    /// ISO A4 rounded to whole CSS pixels at 96 DPI.
    pub fn a4_px() -> Self {
        Self::new(794.0, 1123.0)
    }

    pub fn scaled(self, factor: f32) -> Self {
        Self::new(self.width * factor, self.height * factor)
    }

    pub fn is_positive(self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Margins {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

impl Margins {
    pub fn all(value: f32) -> Self {
        Self {
            top: value,
            right: value,
            bottom: value,
            left: value,
        }
    }

    pub fn vertical(&self) -> f32 {
        self.top + self.bottom
    }

    pub fn horizontal(&self) -> f32 {
        self.left + self.right
    }

    pub(crate) fn is_valid(&self) -> bool {
        [self.top, self.right, self.bottom, self.left]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };

    pub const WHITE: Color = Color {
        r: 1.0,
        g: 1.0,
        b: 1.0,
    };

    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub fn from_rgb8(r: u8, g: u8, b: u8) -> Self {
        Self::rgb(r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0)
    }

    pub fn to_rgba8(self) -> [u8; 4] {
        let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        [channel(self.r), channel(self.g), channel(self.b), 255]
    }

    pub(crate) fn to_skia(self) -> tiny_skia::Color {
        let [r, g, b, a] = self.to_rgba8();
        tiny_skia::Color::from_rgba8(r, g, b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn margins_sum_per_axis() {
        let margins = Margins {
            top: 10.0,
            right: 4.0,
            bottom: 6.0,
            left: 2.0,
        };
        assert_eq!(margins.vertical(), 16.0);
        assert_eq!(margins.horizontal(), 6.0);
        assert!(margins.is_valid());
        assert!(!Margins::all(-1.0).is_valid());
        assert!(!Margins::all(f32::NAN).is_valid());
    }

    #[test]
    fn sizes_scale_and_reject_degenerate_dimensions() {
        let a4 = Size::a4_mm().scaled(2.0);
        assert_eq!(a4, Size::new(420.0, 594.0));
        assert!(a4.is_positive());
        assert!(!Size::new(0.0, 10.0).is_positive());
        assert!(!Size::new(10.0, f32::INFINITY).is_positive());
    }

    #[test]
    fn colors_clamp_to_opaque_bytes() {
        assert_eq!(Color::from_rgb8(12, 34, 56).to_rgba8(), [12, 34, 56, 255]);
        assert_eq!(Color::rgb(1.5, -0.2, 0.5).to_rgba8(), [255, 0, 128, 255]);
        assert_eq!(Rect::new(0.0, 5.0, 10.0, 7.5).bottom(), 12.5);
    }
}
