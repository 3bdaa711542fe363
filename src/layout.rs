use crate::error::PageSplitError;
use crate::types::{Color, Rect};

pub type NodeId = usize;

/// The avoid-split classes pagination protects. Whole tables are
/// deliberately absent: only their header and each body row are kept whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AvoidClass {
    Heading,
    Card,
    TableHeader,
    TableRow,
    Block,
}

impl AvoidClass {
    pub fn as_str(self) -> &'static str {
        match self {
            AvoidClass::Heading => "heading",
            AvoidClass::Card => "card",
            AvoidClass::TableHeader => "table-header",
            AvoidClass::TableRow => "table-row",
            AvoidClass::Block => "block",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Block,
    Heading(u8),
    Card,
    Table,
    TableHead,
    TableBody,
    TableRow,
    Image { source: String },
    Spacer { before: NodeId },
}

/// A rectangle, relative to the root's top edge, that must not be divided by
/// a page boundary unless it is taller than a page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnsplittableRegion {
    pub node: NodeId,
    pub class: AvoidClass,
    pub top: f32,
    pub bottom: f32,
}

impl UnsplittableRegion {
    pub fn new(node: NodeId, class: AvoidClass, top: f32, bottom: f32) -> Self {
        Self {
            node,
            class,
            top,
            bottom,
        }
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpacerInfo {
    pub id: NodeId,
    pub before: NodeId,
    pub top: f32,
    pub height: f32,
}

/// One entry of the display list a rasterizer paints, in element pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct PaintItem {
    pub rect: Rect,
    pub fill: Option<Color>,
    pub image: Option<String>,
}

/// The layout handle pagination measures and mutates. All offsets are
/// element pixels relative to the root's top edge.
pub trait LayoutSurface {
    fn width(&self) -> f32;

    /// Height of the last committed layout.
    fn height(&self) -> f32;

    fn is_committed(&self) -> bool;

    /// Recompute measurements after mutations. Measuring before this is an error.
    fn commit(&mut self) -> Result<(), PageSplitError>;

    /// Fresh avoid-split regions in document order.
    fn avoid_regions(&self) -> Result<Vec<UnsplittableRegion>, PageSplitError>;

    fn insert_spacer_before(&mut self, node: NodeId, height: f32)
    -> Result<NodeId, PageSplitError>;

    /// Purge every spacer previously inserted. Returns how many were removed.
    fn remove_spacers(&mut self) -> usize;

    fn spacers(&self) -> Vec<SpacerInfo>;

    fn paint_list(&self) -> Result<Vec<PaintItem>, PageSplitError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutNode {
    kind: NodeKind,
    label: Option<String>,
    height: Option<f32>,
    margin_top: f32,
    margin_bottom: f32,
    padding_top: f32,
    padding_bottom: f32,
    background: Option<Color>,
    avoid: Option<AvoidClass>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    frame: Rect,
}

impl LayoutNode {
    pub fn new(kind: NodeKind) -> Self {
        let avoid = default_avoid_class(&kind);
        Self {
            kind,
            label: None,
            height: None,
            margin_top: 0.0,
            margin_bottom: 0.0,
            padding_top: 0.0,
            padding_bottom: 0.0,
            background: None,
            avoid,
            parent: None,
            children: Vec::new(),
            frame: Rect::new(0.0, 0.0, 0.0, 0.0),
        }
    }

    pub fn block(height: f32) -> Self {
        Self::new(NodeKind::Block).with_height(height)
    }

    pub fn container() -> Self {
        Self::new(NodeKind::Block)
    }

    pub fn heading(level: u8, height: f32) -> Self {
        Self::new(NodeKind::Heading(level)).with_height(height)
    }

    pub fn card(height: f32) -> Self {
        Self::new(NodeKind::Card).with_height(height)
    }

    pub fn table() -> Self {
        Self::new(NodeKind::Table)
    }

    pub fn table_head(height: f32) -> Self {
        Self::new(NodeKind::TableHead).with_height(height)
    }

    pub fn table_body() -> Self {
        Self::new(NodeKind::TableBody)
    }

    pub fn table_row(height: f32) -> Self {
        Self::new(NodeKind::TableRow).with_height(height)
    }

    pub fn image(source: impl Into<String>, height: f32) -> Self {
        Self::new(NodeKind::Image {
            source: source.into(),
        })
        .with_height(height)
    }

    pub fn with_height(mut self, height: f32) -> Self {
        self.height = Some(height.max(0.0));
        self
    }

    pub fn with_margins(mut self, top: f32, bottom: f32) -> Self {
        self.margin_top = top;
        self.margin_bottom = bottom;
        self
    }

    pub fn with_padding(mut self, top: f32, bottom: f32) -> Self {
        self.padding_top = top.max(0.0);
        self.padding_bottom = bottom.max(0.0);
        self
    }

    pub fn with_background(mut self, color: Color) -> Self {
        self.background = Some(color);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn avoid(mut self, class: AvoidClass) -> Self {
        self.avoid = Some(class);
        self
    }

    pub fn splittable(mut self) -> Self {
        self.avoid = None;
        self
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn avoid_class(&self) -> Option<AvoidClass> {
        self.avoid
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn frame(&self) -> Rect {
        self.frame
    }

    pub fn is_spacer(&self) -> bool {
        matches!(self.kind, NodeKind::Spacer { .. })
    }
}

fn default_avoid_class(kind: &NodeKind) -> Option<AvoidClass> {
    match kind {
        NodeKind::Heading(level) if (1..=3).contains(level) => Some(AvoidClass::Heading),
        NodeKind::Card => Some(AvoidClass::Card),
        NodeKind::TableHead => Some(AvoidClass::TableHeader),
        NodeKind::TableRow => Some(AvoidClass::TableRow),
        _ => None,
    }
}

struct PlaceFrame {
    id: NodeId,
    box_top: f32,
    cursor: f32,
    children: Vec<NodeId>,
    next: usize,
}

/// Arena-backed block-flow layout. Children stack vertically inside their
/// parent; removed nodes leave a free slot so surviving ids stay stable.
#[derive(Debug, Clone)]
pub struct LayoutTree {
    nodes: Vec<Option<LayoutNode>>,
    free: Vec<NodeId>,
    root: NodeId,
    width: f32,
    committed: bool,
}

impl LayoutTree {
    pub fn new(width: f32) -> Self {
        Self {
            nodes: vec![Some(LayoutNode::container().splittable())],
            free: Vec::new(),
            root: 0,
            width,
            committed: false,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&LayoutNode> {
        self.nodes.get(id).and_then(Option::as_ref)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.node(self.root)
            .map(|root| root.children.is_empty())
            .unwrap_or(true)
    }

    pub fn find_by_label(&self, label: &str) -> Option<NodeId> {
        self.document_order()
            .into_iter()
            .find(|id| self.node(*id).and_then(LayoutNode::label) == Some(label))
    }

    pub fn append(&mut self, parent: NodeId, mut node: LayoutNode) -> Result<NodeId, PageSplitError> {
        match self.node(parent) {
            Some(existing) if !existing.is_spacer() => {}
            Some(_) => {
                return Err(PageSplitError::Measurement(format!(
                    "node {parent} is a spacer and cannot hold children"
                )));
            }
            None => {
                return Err(PageSplitError::Measurement(format!(
                    "parent node {parent} is not in the layout"
                )));
            }
        }
        node.parent = Some(parent);
        node.children.clear();
        let id = self.alloc(node);
        if let Some(Some(parent_node)) = self.nodes.get_mut(parent) {
            parent_node.children.push(id);
        }
        self.committed = false;
        Ok(id)
    }

    /// Change a node's explicit height, as a host re-render would.
    pub fn set_height(&mut self, id: NodeId, height: f32) -> Result<(), PageSplitError> {
        let node = self
            .nodes
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or_else(|| PageSplitError::Measurement(format!("node {id} is not in the layout")))?;
        node.height = Some(height.max(0.0));
        self.committed = false;
        Ok(())
    }

    /// Committed frame relative to the root's top edge.
    pub fn frame(&self, id: NodeId) -> Option<Rect> {
        if !self.committed {
            return None;
        }
        let root_top = self.node(self.root)?.frame.y;
        let mut frame = self.node(id)?.frame;
        frame.y -= root_top;
        Some(frame)
    }

    pub fn document_order(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.node(id) else {
                continue;
            };
            out.push(id);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    fn alloc(&mut self, node: LayoutNode) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.nodes[id] = Some(node);
            id
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        }
    }

    /// Lays out `id` with its margin edge at `top`; returns the cursor after it.
    /// Walks with an explicit stack so nesting depth is bounded by the heap.
    fn place(&mut self, id: NodeId, top: f32) -> f32 {
        let Some(first) = self.enter(id, top) else {
            return top;
        };
        let mut stack = vec![first];
        while let Some(frame) = stack.last_mut() {
            if let Some(&child) = frame.children.get(frame.next) {
                frame.next += 1;
                let child_top = frame.cursor;
                if let Some(child_frame) = self.enter(child, child_top) {
                    stack.push(child_frame);
                }
                continue;
            }
            let Some(done) = stack.pop() else {
                break;
            };
            let end = self.close(&done);
            match stack.last_mut() {
                Some(parent) => parent.cursor = end,
                None => return end,
            }
        }
        top
    }

    fn enter(&self, id: NodeId, top: f32) -> Option<PlaceFrame> {
        let node = self.node(id)?;
        let box_top = top + node.margin_top;
        Some(PlaceFrame {
            id,
            box_top,
            cursor: box_top + node.padding_top,
            children: node.children.clone(),
            next: 0,
        })
    }

    /// Sizes a node once its children are placed; returns the cursor after it.
    fn close(&mut self, frame: &PlaceFrame) -> f32 {
        let width = self.width;
        let Some(Some(node)) = self.nodes.get_mut(frame.id) else {
            return frame.cursor;
        };
        let content = frame.cursor + node.padding_bottom - frame.box_top;
        let height = node.height.map_or(content, |h| h.max(content));
        node.frame = Rect::new(0.0, frame.box_top, width, height);
        frame.box_top + height + node.margin_bottom
    }

    fn relative(&self, rect: Rect) -> Rect {
        let root_top = self.node(self.root).map_or(0.0, |root| root.frame.y);
        Rect::new(rect.x, rect.y - root_top, rect.width, rect.height)
    }

    fn require_committed(&self) -> Result<(), PageSplitError> {
        if self.committed {
            Ok(())
        } else {
            Err(PageSplitError::Measurement(
                "layout has uncommitted changes".to_string(),
            ))
        }
    }
}

impl LayoutSurface for LayoutTree {
    fn width(&self) -> f32 {
        self.width
    }

    fn height(&self) -> f32 {
        self.node(self.root).map_or(0.0, |root| root.frame.height)
    }

    fn is_committed(&self) -> bool {
        self.committed
    }

    fn commit(&mut self) -> Result<(), PageSplitError> {
        if !(self.width.is_finite() && self.width > 0.0) {
            return Err(PageSplitError::Measurement(format!(
                "layout width must be positive, got {}",
                self.width
            )));
        }
        self.place(self.root, 0.0);
        self.committed = true;
        Ok(())
    }

    fn avoid_regions(&self) -> Result<Vec<UnsplittableRegion>, PageSplitError> {
        self.require_committed()?;
        let mut regions = Vec::new();
        for id in self.document_order() {
            let Some(node) = self.node(id) else {
                continue;
            };
            let Some(class) = node.avoid else {
                continue;
            };
            let frame = self.relative(node.frame);
            regions.push(UnsplittableRegion::new(id, class, frame.y, frame.bottom()));
        }
        Ok(regions)
    }

    fn insert_spacer_before(
        &mut self,
        node: NodeId,
        height: f32,
    ) -> Result<NodeId, PageSplitError> {
        if !(height.is_finite() && height >= 0.0) {
            return Err(PageSplitError::Measurement(format!(
                "spacer height must be finite and non-negative, got {height}"
            )));
        }
        let parent = self
            .node(node)
            .ok_or_else(|| PageSplitError::Measurement(format!("node {node} is not in the layout")))?
            .parent
            .ok_or_else(|| {
                PageSplitError::Measurement(format!("node {node} has no parent to hold a spacer"))
            })?;
        let position = self
            .node(parent)
            .and_then(|p| p.children.iter().position(|child| *child == node))
            .ok_or_else(|| {
                PageSplitError::Measurement(format!("node {node} is detached from its parent"))
            })?;

        let mut spacer = LayoutNode::new(NodeKind::Spacer { before: node }).with_height(height);
        spacer.parent = Some(parent);
        let id = self.alloc(spacer);
        if let Some(Some(parent_node)) = self.nodes.get_mut(parent) {
            parent_node.children.insert(position, id);
        }
        self.committed = false;
        Ok(id)
    }

    fn remove_spacers(&mut self) -> usize {
        let spacer_ids: Vec<NodeId> = self
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| match slot {
                Some(node) if node.is_spacer() => Some(id),
                _ => None,
            })
            .collect();
        if spacer_ids.is_empty() {
            return 0;
        }
        for id in &spacer_ids {
            if let Some(parent) = self.node(*id).and_then(|n| n.parent) {
                if let Some(Some(parent_node)) = self.nodes.get_mut(parent) {
                    parent_node.children.retain(|child| child != id);
                }
            }
            self.nodes[*id] = None;
            self.free.push(*id);
        }
        self.committed = false;
        spacer_ids.len()
    }

    fn spacers(&self) -> Vec<SpacerInfo> {
        self.document_order()
            .into_iter()
            .filter_map(|id| {
                let node = self.node(id)?;
                let NodeKind::Spacer { before } = node.kind else {
                    return None;
                };
                let frame = self.relative(node.frame);
                Some(SpacerInfo {
                    id,
                    before,
                    top: frame.y,
                    height: node.height.unwrap_or(frame.height),
                })
            })
            .collect()
    }

    fn paint_list(&self) -> Result<Vec<PaintItem>, PageSplitError> {
        self.require_committed()?;
        let mut items = Vec::new();
        for id in self.document_order() {
            let Some(node) = self.node(id) else {
                continue;
            };
            let image = match &node.kind {
                NodeKind::Image { source } => Some(source.clone()),
                _ => None,
            };
            if node.background.is_none() && image.is_none() {
                continue;
            }
            items.push(PaintItem {
                rect: self.relative(node.frame),
                fill: node.background,
                image,
            });
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stacked(heights: &[f32]) -> (LayoutTree, Vec<NodeId>) {
        let mut tree = LayoutTree::new(600.0);
        let root = tree.root();
        let ids = heights
            .iter()
            .map(|h| tree.append(root, LayoutNode::block(*h)).unwrap())
            .collect();
        tree.commit().unwrap();
        (tree, ids)
    }

    #[test]
    fn blocks_stack_in_document_order() {
        let (tree, ids) = stacked(&[100.0, 200.0, 50.0]);
        let tops: Vec<f32> = ids.iter().map(|id| tree.frame(*id).unwrap().y).collect();
        assert_eq!(tops, vec![0.0, 100.0, 300.0]);
        assert_eq!(tree.height(), 350.0);
    }

    #[test]
    fn margins_and_padding_shift_children() {
        let mut tree = LayoutTree::new(400.0);
        let root = tree.root();
        let card = tree
            .append(root, LayoutNode::card(0.0).with_margins(10.0, 20.0).with_padding(5.0, 5.0))
            .unwrap();
        let inner = tree.append(card, LayoutNode::block(30.0)).unwrap();
        let after = tree.append(root, LayoutNode::block(10.0)).unwrap();
        tree.commit().unwrap();

        assert_eq!(tree.frame(card).unwrap().y, 10.0);
        assert_eq!(tree.frame(card).unwrap().height, 40.0);
        assert_eq!(tree.frame(inner).unwrap().y, 15.0);
        assert_eq!(tree.frame(after).unwrap().y, 70.0);
    }

    #[test]
    fn avoid_regions_cover_rows_and_header_but_not_the_table() {
        let mut tree = LayoutTree::new(500.0);
        let root = tree.root();
        let heading = tree.append(root, LayoutNode::heading(1, 40.0)).unwrap();
        let table = tree.append(root, LayoutNode::table()).unwrap();
        let head = tree.append(table, LayoutNode::table_head(30.0)).unwrap();
        let body = tree.append(table, LayoutNode::table_body()).unwrap();
        let row_a = tree.append(body, LayoutNode::table_row(20.0)).unwrap();
        let row_b = tree.append(body, LayoutNode::table_row(20.0)).unwrap();
        tree.commit().unwrap();

        let regions = tree.avoid_regions().unwrap();
        let nodes: Vec<NodeId> = regions.iter().map(|r| r.node).collect();
        assert_eq!(nodes, vec![heading, head, row_a, row_b]);
        assert!(!nodes.contains(&table));
        assert_eq!(regions[3].top, 90.0);
        assert_eq!(regions[3].bottom, 110.0);
        assert_eq!(regions[2].class, AvoidClass::TableRow);
    }

    #[test]
    fn deep_headings_are_not_protected_by_default() {
        let mut tree = LayoutTree::new(500.0);
        let root = tree.root();
        tree.append(root, LayoutNode::heading(4, 20.0)).unwrap();
        tree.commit().unwrap();
        assert!(tree.avoid_regions().unwrap().is_empty());
    }

    #[test]
    fn measuring_uncommitted_layout_fails() {
        let (mut tree, ids) = stacked(&[10.0]);
        tree.set_height(ids[0], 20.0).unwrap();
        let err = tree.avoid_regions().unwrap_err();
        assert!(matches!(err, PageSplitError::Measurement(_)));
    }

    #[test]
    fn spacer_shifts_following_siblings() {
        let (mut tree, ids) = stacked(&[100.0, 40.0, 60.0]);
        tree.insert_spacer_before(ids[1], 25.0).unwrap();
        tree.commit().unwrap();
        assert_eq!(tree.frame(ids[0]).unwrap().y, 0.0);
        assert_eq!(tree.frame(ids[1]).unwrap().y, 125.0);
        assert_eq!(tree.frame(ids[2]).unwrap().y, 165.0);

        let spacers = tree.spacers();
        assert_eq!(spacers.len(), 1);
        assert_eq!(spacers[0].before, ids[1]);
        assert_eq!(spacers[0].top, 100.0);
        assert_eq!(spacers[0].height, 25.0);
    }

    #[test]
    fn removing_spacers_restores_layout_and_reuses_slots() {
        let (mut tree, ids) = stacked(&[100.0, 40.0]);
        let spacer = tree.insert_spacer_before(ids[1], 25.0).unwrap();
        assert_eq!(tree.remove_spacers(), 1);
        assert_eq!(tree.remove_spacers(), 0);
        tree.commit().unwrap();
        assert_eq!(tree.frame(ids[1]).unwrap().y, 100.0);
        assert!(tree.node(spacer).is_none());

        let again = tree.insert_spacer_before(ids[1], 5.0).unwrap();
        assert_eq!(again, spacer);
    }

    #[test]
    fn spacer_needs_an_attached_node() {
        let (mut tree, _) = stacked(&[10.0]);
        let root = tree.root();
        assert!(matches!(
            tree.insert_spacer_before(root, 5.0),
            Err(PageSplitError::Measurement(_))
        ));
        assert!(matches!(
            tree.insert_spacer_before(99, 5.0),
            Err(PageSplitError::Measurement(_))
        ));
    }

    #[test]
    fn deeply_nested_layout_commits() {
        let mut tree = LayoutTree::new(100.0);
        let mut parent = tree.root();
        for _ in 0..100_000 {
            parent = tree
                .append(parent, LayoutNode::container().with_padding(0.0, 0.0))
                .unwrap();
        }
        let leaf = tree.append(parent, LayoutNode::block(12.0).with_margins(3.0, 0.0)).unwrap();
        tree.commit().unwrap();
        assert_eq!(tree.height(), 15.0);
        assert_eq!(tree.frame(leaf).unwrap().y, 3.0);
    }

    #[test]
    fn paint_list_includes_fills_and_images() {
        let mut tree = LayoutTree::new(100.0);
        let root = tree.root();
        tree.append(root, LayoutNode::block(10.0).with_background(Color::BLACK))
            .unwrap();
        tree.append(root, LayoutNode::block(10.0)).unwrap();
        tree.append(root, LayoutNode::image("logo.png", 20.0)).unwrap();
        tree.commit().unwrap();
        let items = tree.paint_list().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].fill, Some(Color::BLACK));
        assert_eq!(items[1].image.as_deref(), Some("logo.png"));
        assert_eq!(items[1].rect.y, 20.0);
    }
}
