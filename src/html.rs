use crate::error::PageSplitError;
use crate::layout::{AvoidClass, LayoutNode, LayoutSurface, LayoutTree, NodeId, NodeKind};
use crate::types::Color;
use kuchiki::traits::TendrilSink;
use kuchiki::{ElementData, NodeData, NodeDataRef, NodeRef, Selectors};
use lightningcss::properties::Property;
use lightningcss::properties::display::{Display, DisplayKeyword};
use lightningcss::properties::size::Size as CssSize;
use lightningcss::stylesheet::{ParserOptions, StyleAttribute};
use lightningcss::values::color::CssColor;
use lightningcss::values::length::{LengthPercentage, LengthPercentageOrAuto};

/// Blocks a report should never see cut by a page boundary.
pub const DEFAULT_AVOID_SELECTORS: &str = ".income-card, h1, h2, h3, table thead, table tbody tr";

const DEFAULT_IMAGE_HEIGHT: f32 = 150.0;

const SKIPPED_TAGS: &[&str] = &[
    "head", "script", "style", "template", "noscript", "meta", "link", "title",
];

const INLINE_TAGS: &[&str] = &[
    "a", "abbr", "b", "br", "code", "em", "i", "label", "small", "span", "strong", "sub", "sup",
    "u",
];

#[derive(Debug, Clone, PartialEq)]
pub struct HtmlLayoutOptions {
    pub width: f32,
    pub avoid_selectors: String,
    /// Element to paginate; the whole `<body>` when unset.
    pub root_selector: Option<String>,
    pub font_size: f32,
    /// Line height as a multiple of the font size.
    pub line_height: f32,
}

impl HtmlLayoutOptions {
    pub fn new(width: f32) -> Self {
        Self {
            width,
            avoid_selectors: DEFAULT_AVOID_SELECTORS.to_string(),
            root_selector: None,
            font_size: 16.0,
            line_height: 1.25,
        }
    }

    pub fn with_avoid_selectors(mut self, selectors: impl Into<String>) -> Self {
        self.avoid_selectors = selectors.into();
        self
    }

    pub fn with_root(mut self, selector: impl Into<String>) -> Self {
        self.root_selector = Some(selector.into());
        self
    }
}

pub fn layout_from_html(
    html: &str,
    width: f32,
    avoid_selectors: &str,
) -> Result<LayoutTree, PageSplitError> {
    layout_from_html_with(
        html,
        &HtmlLayoutOptions::new(width).with_avoid_selectors(avoid_selectors),
    )
}

/// Builds a committed block-flow layout from markup. Elements matching the
/// avoid selectors become unsplittable; nothing else is, whatever its tag.
pub fn layout_from_html_with(
    html: &str,
    options: &HtmlLayoutOptions,
) -> Result<LayoutTree, PageSplitError> {
    let selectors = compile_selectors(&options.avoid_selectors)?;
    let document = kuchiki::parse_html().one(html);
    let builder = LayoutBuilder { selectors, options };
    let mut tree = LayoutTree::new(options.width);
    let tree_root = tree.root();

    match &options.root_selector {
        Some(selector) => {
            let root = document.select_first(selector).map_err(|()| {
                PageSplitError::Measurement(format!("no element matches {selector}"))
            })?;
            let mut pending = Vec::new();
            builder.append_element(&mut tree, &mut pending, tree_root, &root, true)?;
            builder.drain(&mut tree, pending)?;
        }
        None => {
            let body = document
                .select_first("body")
                .map(|body| body.as_node().clone())
                .unwrap_or(document);
            let seed = Pending {
                parent: tree_root,
                node: body,
                font_size: options.font_size,
            };
            builder.drain(&mut tree, vec![seed])?;
        }
    }

    tree.commit()?;
    log::debug!(
        "built layout from html: {} nodes, {:.1}px tall",
        tree.node_count(),
        tree.height()
    );
    Ok(tree)
}

pub(crate) fn compile_selectors(selectors: &str) -> Result<Selectors, PageSplitError> {
    Selectors::compile(selectors).map_err(|()| {
        PageSplitError::InvalidConfiguration(format!("invalid avoid-split selectors: {selectors}"))
    })
}

struct LayoutBuilder<'a> {
    selectors: Selectors,
    options: &'a HtmlLayoutOptions,
}

/// An element whose block children still have to be appended under `parent`.
struct Pending {
    parent: NodeId,
    node: NodeRef,
    font_size: f32,
}

impl LayoutBuilder<'_> {
    /// Drains the work list; each entry appends one element's children in
    /// order, so markup depth never grows the call stack.
    fn drain(
        &self,
        tree: &mut LayoutTree,
        mut pending: Vec<Pending>,
    ) -> Result<(), PageSplitError> {
        while let Some(next) = pending.pop() {
            self.append_children(tree, &next, &mut pending)?;
        }
        Ok(())
    }

    fn append_children(
        &self,
        tree: &mut LayoutTree,
        job: &Pending,
        pending: &mut Vec<Pending>,
    ) -> Result<(), PageSplitError> {
        let (parent, font_size) = (job.parent, job.font_size);
        let mut run = String::new();
        for child in job.node.children() {
            match child.data() {
                NodeData::Text(text) => run.push_str(&text.borrow()),
                NodeData::Element(el) => {
                    let tag = el.name.local.as_ref().to_ascii_lowercase();
                    if INLINE_TAGS.contains(&tag.as_str()) {
                        run.push(' ');
                        run.push_str(&child.text_contents());
                        run.push(' ');
                        continue;
                    }
                    if SKIPPED_TAGS.contains(&tag.as_str()) {
                        continue;
                    }
                    self.flush_text(tree, parent, &mut run, font_size)?;
                    if let Some(element) = child.clone().into_element_ref() {
                        self.append_element(tree, pending, parent, &element, false)?;
                    }
                }
                _ => {}
            }
        }
        self.flush_text(tree, parent, &mut run, font_size)
    }

    /// Loose text between blocks becomes an anonymous splittable block.
    fn flush_text(
        &self,
        tree: &mut LayoutTree,
        parent: NodeId,
        run: &mut String,
        font_size: f32,
    ) -> Result<(), PageSplitError> {
        let height = self.text_height(run, font_size, self.options.width);
        run.clear();
        if height > 0.0 {
            tree.append(parent, LayoutNode::block(height).splittable())?;
        }
        Ok(())
    }

    fn append_element(
        &self,
        tree: &mut LayoutTree,
        pending: &mut Vec<Pending>,
        parent: NodeId,
        element: &NodeDataRef<ElementData>,
        is_root: bool,
    ) -> Result<(), PageSplitError> {
        let tag = element.name.local.as_ref().to_ascii_lowercase();
        let attrs = element.attributes.borrow();
        let style = InlineStyle::parse(attrs.get("style"));
        if style.hidden {
            return Ok(());
        }
        let class = attrs.get("class").unwrap_or_default().to_string();
        let font_size = heading_level(&tag)
            .map(|level| heading_font_size(level, self.options.font_size))
            .unwrap_or(self.options.font_size);

        let kind = match tag.as_str() {
            "table" => NodeKind::Table,
            "thead" => NodeKind::TableHead,
            "tbody" => NodeKind::TableBody,
            "tr" => NodeKind::TableRow,
            "img" => NodeKind::Image {
                source: attrs.get("src").unwrap_or_default().to_string(),
            },
            _ => match heading_level(&tag) {
                Some(level) => NodeKind::Heading(level),
                None if has_card_class(&class) => NodeKind::Card,
                None => NodeKind::Block,
            },
        };
        let is_leaf = matches!(kind, NodeKind::TableRow | NodeKind::Image { .. });

        let mut node = LayoutNode::new(kind);
        node = if self.selectors.matches(element) {
            node.avoid(avoid_class(&tag, &class))
        } else {
            node.splittable()
        };
        if let Some(id) = attrs.get("id") {
            node = node.with_label(id);
        }

        let (ua_top, ua_bottom) = ua_margins(&tag, font_size, self.options.font_size);
        let margin_top = if is_root { 0.0 } else { style.margin_top.unwrap_or(ua_top) };
        let margin_bottom = if is_root {
            0.0
        } else {
            style.margin_bottom.unwrap_or(ua_bottom)
        };
        node = node
            .with_margins(margin_top, margin_bottom)
            .with_padding(
                style.padding_top.unwrap_or(0.0),
                style.padding_bottom.unwrap_or(0.0),
            );
        if let Some(background) = style.background {
            node = node.with_background(background);
        }

        let element_node = element.as_node();
        let has_blocks = !is_leaf && has_block_children(element_node);
        let intrinsic = match tag.as_str() {
            "tr" => self.row_height(element_node),
            "img" => attrs
                .get("height")
                .and_then(|h| h.trim().trim_end_matches("px").parse::<f32>().ok())
                .unwrap_or(DEFAULT_IMAGE_HEIGHT),
            _ if has_blocks => 0.0,
            _ => self.text_height(&element_node.text_contents(), font_size, self.options.width),
        };
        let explicit = style.height.unwrap_or(0.0).max(style.min_height.unwrap_or(0.0));
        let height = explicit.max(intrinsic);
        if height > 0.0 {
            node = node.with_height(height);
        }
        drop(attrs);

        let id = tree.append(parent, node)?;
        if has_blocks {
            pending.push(Pending {
                parent: id,
                node: element_node.clone(),
                font_size,
            });
        }
        Ok(())
    }

    /// Cells sit side by side, so a row is as tall as its tallest cell.
    fn row_height(&self, row: &NodeRef) -> f32 {
        let cells: Vec<NodeRef> = row
            .children()
            .filter(|child| {
                child
                    .as_element()
                    .map(|el| matches!(el.name.local.as_ref(), "td" | "th"))
                    .unwrap_or(false)
            })
            .collect();
        if cells.is_empty() {
            return 0.0;
        }
        let cell_width = self.options.width / cells.len() as f32;
        cells
            .iter()
            .map(|cell| {
                let padding = cell
                    .as_element()
                    .map(|el| InlineStyle::parse(el.attributes.borrow().get("style")))
                    .map(|style| {
                        style.padding_top.unwrap_or(0.0) + style.padding_bottom.unwrap_or(0.0)
                    })
                    .unwrap_or(0.0);
                let text = self.text_height(&cell.text_contents(), self.options.font_size, cell_width);
                // An empty cell still holds one line.
                text.max(self.options.font_size * self.options.line_height) + padding
            })
            .fold(0.0, f32::max)
    }

    /// Estimated wrapped height of `text` at roughly half an em per character.
    fn text_height(&self, text: &str, font_size: f32, width: f32) -> f32 {
        let chars = text.split_whitespace().map(|w| w.chars().count() + 1).sum::<usize>();
        if chars == 0 {
            return 0.0;
        }
        let per_line = ((width / (font_size * 0.5)).floor() as usize).max(1);
        let lines = (chars - 1).div_ceil(per_line).max(1);
        lines as f32 * font_size * self.options.line_height
    }
}

fn has_block_children(node: &NodeRef) -> bool {
    node.children().any(|child| {
        child
            .as_element()
            .map(|el| {
                let tag = el.name.local.as_ref().to_ascii_lowercase();
                !INLINE_TAGS.contains(&tag.as_str()) && !SKIPPED_TAGS.contains(&tag.as_str())
            })
            .unwrap_or(false)
    })
}

fn heading_level(tag: &str) -> Option<u8> {
    match tag {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

fn heading_font_size(level: u8, base: f32) -> f32 {
    let scale = match level {
        1 => 2.0,
        2 => 1.5,
        3 => 1.17,
        4 => 1.0,
        5 => 0.83,
        _ => 0.67,
    };
    base * scale
}

/// Default vertical margins, as browsers apply them.
fn ua_margins(tag: &str, font_size: f32, base: f32) -> (f32, f32) {
    let em = match tag {
        "h1" => 0.67,
        "h2" => 0.83,
        "h3" => 1.0,
        "h4" => 1.33,
        "h5" => 1.67,
        "h6" => 2.33,
        "p" | "ul" | "ol" | "blockquote" => return (base, base),
        _ => 0.0,
    };
    (font_size * em, font_size * em)
}

fn has_card_class(class: &str) -> bool {
    class.split_whitespace().any(|token| token.ends_with("card"))
}

fn avoid_class(tag: &str, class: &str) -> AvoidClass {
    match tag {
        "thead" => AvoidClass::TableHeader,
        "tr" => AvoidClass::TableRow,
        _ if heading_level(tag).is_some() => AvoidClass::Heading,
        _ if has_card_class(class) => AvoidClass::Card,
        _ => AvoidClass::Block,
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
struct InlineStyle {
    height: Option<f32>,
    min_height: Option<f32>,
    margin_top: Option<f32>,
    margin_bottom: Option<f32>,
    padding_top: Option<f32>,
    padding_bottom: Option<f32>,
    background: Option<Color>,
    hidden: bool,
}

impl InlineStyle {
    fn parse(style: Option<&str>) -> Self {
        let mut out = Self::default();
        let Some(style) = style else {
            return out;
        };
        let Ok(style_attr) = StyleAttribute::parse(style, ParserOptions::default()) else {
            return out;
        };
        // Important declarations win, so they are applied last.
        for property in style_attr
            .declarations
            .declarations
            .iter()
            .chain(style_attr.declarations.important_declarations.iter())
        {
            out.apply(property);
        }
        out
    }

    fn apply(&mut self, property: &Property) {
        match property {
            Property::Height(size) => self.height = size_to_px(size),
            Property::MinHeight(size) => self.min_height = size_to_px(size),
            Property::Margin(value) => {
                self.margin_top = lpa_to_px(&value.top);
                self.margin_bottom = lpa_to_px(&value.bottom);
            }
            Property::MarginTop(value) => self.margin_top = lpa_to_px(value),
            Property::MarginBottom(value) => self.margin_bottom = lpa_to_px(value),
            Property::Padding(value) => {
                self.padding_top = lpa_to_px(&value.top);
                self.padding_bottom = lpa_to_px(&value.bottom);
            }
            Property::PaddingTop(value) => self.padding_top = lpa_to_px(value),
            Property::PaddingBottom(value) => self.padding_bottom = lpa_to_px(value),
            Property::BackgroundColor(color) => self.background = css_color_to_color(color),
            Property::Display(Display::Keyword(DisplayKeyword::None)) => self.hidden = true,
            _ => {}
        }
    }
}

fn size_to_px(size: &CssSize) -> Option<f32> {
    match size {
        CssSize::LengthPercentage(LengthPercentage::Dimension(length)) => length.to_px(),
        _ => None,
    }
}

fn lpa_to_px(value: &LengthPercentageOrAuto) -> Option<f32> {
    match value {
        LengthPercentageOrAuto::LengthPercentage(LengthPercentage::Dimension(length)) => {
            length.to_px()
        }
        _ => None,
    }
}

fn css_color_to_color(color: &CssColor) -> Option<Color> {
    let CssColor::RGBA(rgba) = color else {
        return None;
    };
    let alpha = rgba.alpha as f32 / 255.0;
    // Preblend over white; pages have no alpha.
    let blend = |channel: u8| (channel as f32 / 255.0) * alpha + (1.0 - alpha);
    Some(Color::rgb(blend(rgba.red), blend(rgba.green), blend(rgba.blue)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spacer::{ReflowOptions, reflow};

    const REPORT: &str = r#"
        <html><body>
        <div id="pdf-content">
          <h1 id="title" style="height: 40px; margin: 0">Income report</h1>
          <div id="salary" class="income-card" style="height: 120px; margin: 0">Salary</div>
          <table id="items">
            <thead><tr><th>Source</th><th>Amount</th></tr></thead>
            <tbody>
              <tr style="height: 30px"><td>Rent</td><td>1200</td></tr>
              <tr style="height: 30px"><td>Dividends</td><td>80</td></tr>
            </tbody>
          </table>
        </div>
        </body></html>
    "#;

    fn report() -> LayoutTree {
        layout_from_html_with(
            REPORT,
            &HtmlLayoutOptions::new(600.0).with_root("#pdf-content"),
        )
        .unwrap()
    }

    #[test]
    fn default_selectors_protect_report_blocks() {
        let tree = report();
        let classes: Vec<AvoidClass> = tree
            .avoid_regions()
            .unwrap()
            .iter()
            .map(|region| region.class)
            .collect();
        assert_eq!(
            classes,
            vec![
                AvoidClass::Heading,
                AvoidClass::Card,
                AvoidClass::TableHeader,
                AvoidClass::TableRow,
                AvoidClass::TableRow,
            ]
        );
        let table = tree.find_by_label("items").unwrap();
        assert!(tree.node(table).unwrap().avoid_class().is_none());
    }

    #[test]
    fn inline_heights_and_margins_drive_offsets() {
        let tree = report();
        let frame = |label: &str| tree.frame(tree.find_by_label(label).unwrap()).unwrap();
        assert_eq!(frame("title").y, 0.0);
        assert_eq!(frame("salary").y, 40.0);
        assert_eq!(frame("items").y, 160.0);

        let regions = tree.avoid_regions().unwrap();
        // Header row is one 20px line; body rows are 30px each.
        assert_eq!((regions[2].top, regions[2].bottom), (160.0, 180.0));
        assert_eq!((regions[4].top, regions[4].bottom), (210.0, 240.0));
    }

    #[test]
    fn custom_selectors_replace_the_default_set() {
        let tree = layout_from_html(REPORT, 600.0, "h1").unwrap();
        let regions = tree.avoid_regions().unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].class, AvoidClass::Heading);
    }

    #[test]
    fn deeply_nested_markup_builds() {
        let depth = 10_000;
        let mut html = String::from("<body>");
        html.push_str(&"<div>".repeat(depth));
        html.push_str(r#"<div id="leaf" style="height: 20px"></div>"#);
        html.push_str(&"</div>".repeat(depth));
        html.push_str(r#"<div id="after" style="height: 5px"></div></body>"#);

        let tree = layout_from_html(&html, 400.0, "h1").unwrap();
        let frame = |label: &str| tree.frame(tree.find_by_label(label).unwrap()).unwrap();
        assert_eq!(frame("leaf").y, 0.0);
        assert_eq!(frame("after").y, 20.0);
        assert_eq!(tree.height(), 25.0);
    }

    #[test]
    fn invalid_selectors_are_a_configuration_error() {
        let err = layout_from_html(REPORT, 600.0, "h1 >>> ??").unwrap_err();
        assert!(matches!(err, PageSplitError::InvalidConfiguration(_)));
    }

    #[test]
    fn missing_root_is_a_measurement_error() {
        let options = HtmlLayoutOptions::new(600.0).with_root("#nope");
        let err = layout_from_html_with(REPORT, &options).unwrap_err();
        assert!(matches!(err, PageSplitError::Measurement(_)));
    }

    #[test]
    fn hidden_elements_are_skipped_and_backgrounds_painted() {
        let html = r#"<body>
            <div style="display: none; height: 500px">hidden</div>
            <div style="height: 50px; background-color: rgb(255, 0, 0)"></div>
        </body>"#;
        let tree = layout_from_html(html, 300.0, DEFAULT_AVOID_SELECTORS).unwrap();
        assert_eq!(tree.height(), 50.0);
        let paint = tree.paint_list().unwrap();
        assert_eq!(paint.len(), 1);
        assert_eq!(paint[0].fill, Some(Color::rgb(1.0, 0.0, 0.0)));
    }

    #[test]
    fn long_paragraphs_wrap_onto_more_lines() {
        let short = layout_from_html("<body><p style=\"margin:0\">Short</p></body>", 200.0, "h1")
            .unwrap();
        let long_text = "word ".repeat(100);
        let long = layout_from_html(
            &format!("<body><p style=\"margin:0\">{long_text}</p></body>"),
            200.0,
            "h1",
        )
        .unwrap();
        assert_eq!(short.height(), 20.0);
        assert!(long.height() > 10.0 * short.height());
    }

    #[test]
    fn loose_text_between_blocks_takes_space() {
        let html = r#"<body><div style="height: 10px"></div>Note <b>bold</b><div style="height: 10px"></div></body>"#;
        let tree = layout_from_html(html, 400.0, "h1").unwrap();
        assert_eq!(tree.height(), 40.0);
    }

    #[test]
    fn html_heading_is_pushed_past_the_boundary() {
        let html = r#"<body>
            <div style="height: 1100px"></div>
            <h2 id="summary" style="height: 40px; margin: 0">Summary</h2>
        </body>"#;
        let mut tree = layout_from_html(html, 794.0, DEFAULT_AVOID_SELECTORS).unwrap();
        let report = reflow(&mut tree, &ReflowOptions::new(1123.0), None).unwrap();
        assert_eq!(report.spacers.len(), 1);
        assert_eq!(report.spacers[0].height, 23.0);
        let heading = tree.find_by_label("summary").unwrap();
        assert_eq!(tree.frame(heading).unwrap().y, 1123.0);
    }
}
