//! Document layout: word boxes grouped into text lines in reading order
//!
//! Lines are built greedily from detected word boxes and then sorted
//! top-to-bottom, with words sorted left-to-right inside each line.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Axis-aligned rectangle around a candidate word, in image pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Area in square pixels
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Exclusive right edge
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// How boxes are matched against existing lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineGrouping {
    /// Boxes are visited top-to-bottom and compared with each line's first member
    #[default]
    Anchor,
    /// Boxes are visited top-to-bottom and compared with each line's running mean y and height
    RunningMean,
}

impl std::fmt::Display for LineGrouping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineGrouping::Anchor => write!(f, "anchor"),
            LineGrouping::RunningMean => write!(f, "running_mean"),
        }
    }
}

impl std::str::FromStr for LineGrouping {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anchor" => Ok(LineGrouping::Anchor),
            "running_mean" | "running-mean" => Ok(LineGrouping::RunningMean),
            other => Err(format!("Unknown line grouping: '{other}'")),
        }
    }
}

/// One visual text line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Line {
    /// Words in reading order once clustering completes
    pub words: Vec<BoundingBox>,
    /// Vertical position used to order lines
    pub reference_y: f64,
    #[serde(skip)]
    anchor: BoundingBox,
    #[serde(skip)]
    sum_y: f64,
    #[serde(skip)]
    sum_height: f64,
}

impl Line {
    fn start(first: BoundingBox) -> Self {
        Self {
            words: vec![first],
            reference_y: first.y as f64,
            anchor: first,
            sum_y: first.y as f64,
            sum_height: first.height as f64,
        }
    }

    /// The box that opened this line
    pub fn anchor(&self) -> &BoundingBox {
        &self.anchor
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    fn mean_y(&self) -> f64 {
        self.sum_y / self.words.len() as f64
    }

    fn mean_height(&self) -> f64 {
        self.sum_height / self.words.len() as f64
    }

    fn accepts(&self, candidate: &BoundingBox, tolerance: f64, grouping: LineGrouping) -> bool {
        let (ref_y, ref_height) = match grouping {
            LineGrouping::Anchor => (self.anchor.y as f64, self.anchor.height as f64),
            LineGrouping::RunningMean => (self.mean_y(), self.mean_height()),
        };
        (candidate.y as f64 - ref_y).abs() <= ref_height * tolerance
    }

    fn push(&mut self, word: BoundingBox, grouping: LineGrouping) {
        self.words.push(word);
        self.sum_y += word.y as f64;
        self.sum_height += word.height as f64;
        if grouping == LineGrouping::RunningMean {
            self.reference_y = self.mean_y();
        }
    }
}

/// Lines of a document, top-to-bottom
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentLayout {
    pub lines: Vec<Line>,
}

impl DocumentLayout {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Total number of word boxes across all lines
    pub fn word_count(&self) -> usize {
        self.lines.iter().map(Line::len).sum()
    }

    /// Every word box in reading order, tagged with its (line, word) position
    pub fn words(&self) -> impl Iterator<Item = ((usize, usize), &BoundingBox)> {
        self.lines.iter().enumerate().flat_map(|(line_idx, line)| {
            line.words
                .iter()
                .enumerate()
                .map(move |(word_idx, word)| ((line_idx, word_idx), word))
        })
    }
}

/// Group word boxes into lines and put them in reading order
///
/// Boxes are visited in ascending `(y, x)` order regardless of the order they
/// were detected in, so the same set of boxes always yields the same layout.
/// Each box joins the first line (in creation order) whose reference lies
/// within `reference_height * tolerance` vertically, or starts a new line.
pub fn cluster_into_lines(
    boxes: &[BoundingBox],
    tolerance: f64,
    grouping: LineGrouping,
) -> DocumentLayout {
    let mut ordered = boxes.to_vec();
    ordered.sort_by_key(|b| (b.y, b.x, b.height, b.width));

    let mut lines: Vec<Line> = Vec::new();
    for word in ordered {
        match lines
            .iter_mut()
            .find(|line| line.accepts(&word, tolerance, grouping))
        {
            Some(line) => line.push(word, grouping),
            None => lines.push(Line::start(word)),
        }
    }

    sort_reading_order(&mut lines);

    debug!(
        "Clustered {} boxes into {} lines (tolerance {:.2}, {})",
        boxes.len(),
        lines.len(),
        tolerance,
        grouping
    );

    DocumentLayout { lines }
}

/// Order lines top-to-bottom and words left-to-right
fn sort_reading_order(lines: &mut [Line]) {
    lines.sort_by(|a, b| a.reference_y.total_cmp(&b.reference_y));
    for line in lines.iter_mut() {
        line.words.sort_by_key(|w| w.x);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bx(x: u32, y: u32) -> BoundingBox {
        BoundingBox::new(x, y, 40, 20)
    }

    fn ys(layout: &DocumentLayout) -> Vec<Vec<u32>> {
        layout
            .lines
            .iter()
            .map(|l| l.words.iter().map(|w| w.y).collect())
            .collect()
    }

    #[test]
    fn test_groups_close_rows_and_separates_distant_rows() {
        let boxes = vec![bx(0, 10), bx(50, 12), bx(0, 50), bx(50, 52)];
        let layout = cluster_into_lines(&boxes, 1.0, LineGrouping::Anchor);

        assert_eq!(layout.lines.len(), 2);
        assert_eq!(ys(&layout), vec![vec![10, 12], vec![50, 52]]);
    }

    #[test]
    fn test_reading_order_ignores_detection_order() {
        let boxes = vec![
            BoundingBox::new(300, 105, 40, 20),
            BoundingBox::new(10, 5, 40, 20),
            BoundingBox::new(150, 100, 40, 20),
            BoundingBox::new(200, 0, 40, 20),
            BoundingBox::new(20, 98, 40, 20),
        ];
        let layout = cluster_into_lines(&boxes, 1.0, LineGrouping::Anchor);

        let xs: Vec<Vec<u32>> = layout
            .lines
            .iter()
            .map(|l| l.words.iter().map(|w| w.x).collect())
            .collect();
        assert_eq!(xs, vec![vec![10, 200], vec![20, 150, 300]]);
        assert!(layout.lines[0].reference_y < layout.lines[1].reference_y);
    }

    #[test]
    fn test_same_boxes_any_order_same_layout() {
        let boxes = vec![bx(0, 0), bx(60, 15), bx(120, 30), bx(0, 80), bx(70, 95)];
        let expected = cluster_into_lines(&boxes, 1.0, LineGrouping::Anchor);

        let mut reversed = boxes.clone();
        reversed.reverse();
        assert_eq!(cluster_into_lines(&reversed, 1.0, LineGrouping::Anchor), expected);

        let rotated: Vec<_> = boxes[2..].iter().chain(&boxes[..2]).copied().collect();
        assert_eq!(cluster_into_lines(&rotated, 1.0, LineGrouping::Anchor), expected);
    }

    #[test]
    fn test_tolerance_boundary_is_inclusive() {
        // |30 - 10| == 20 * 1.0 joins; 31 does not
        let layout = cluster_into_lines(&[bx(0, 10), bx(50, 30)], 1.0, LineGrouping::Anchor);
        assert_eq!(layout.lines.len(), 1);

        let layout = cluster_into_lines(&[bx(0, 10), bx(50, 31)], 1.0, LineGrouping::Anchor);
        assert_eq!(layout.lines.len(), 2);
    }

    #[test]
    fn test_anchor_does_not_drift_but_running_mean_does() {
        // A slanted line: each word 12px lower than the previous one
        let boxes = vec![bx(0, 0), bx(50, 12), bx(100, 24)];

        let anchored = cluster_into_lines(&boxes, 1.0, LineGrouping::Anchor);
        assert_eq!(anchored.lines.len(), 2);

        let running = cluster_into_lines(&boxes, 1.0, LineGrouping::RunningMean);
        assert_eq!(running.lines.len(), 1);
        assert!((running.lines[0].reference_y - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_input_gives_empty_layout() {
        let layout = cluster_into_lines(&[], 2.0, LineGrouping::Anchor);
        assert!(layout.is_empty());
        assert_eq!(layout.word_count(), 0);
    }

    #[test]
    fn test_words_iterator_positions() {
        let boxes = [bx(0, 0), bx(50, 2), bx(0, 100)];
        let layout = cluster_into_lines(&boxes, 1.0, LineGrouping::Anchor);
        let positions: Vec<(usize, usize)> = layout.words().map(|(pos, _)| pos).collect();
        assert_eq!(positions, vec![(0, 0), (0, 1), (1, 0)]);
    }

    #[test]
    fn test_grouping_parse_roundtrip() {
        use std::str::FromStr;
        for g in [LineGrouping::Anchor, LineGrouping::RunningMean] {
            assert_eq!(LineGrouping::from_str(&g.to_string()).unwrap(), g);
        }
        assert!(LineGrouping::from_str("centroid").is_err());
    }
}
