//! Detected layer issues and the report that groups them.

use hashbrown::HashMap;
use layer_stack::{Point, Rect};
use std::fmt;

/// Kind of a detected issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IssueKind {
    /// Region with too little support on the layer below.
    Island,
    /// Enclosed cavity that never drains.
    ResinTrap,
    /// Lit pixels on the image border.
    TouchingBound,
    /// Layer with no lit pixel.
    EmptyLayer,
}

impl IssueKind {
    pub fn name(&self) -> &'static str {
        match self {
            IssueKind::Island => "Island",
            IssueKind::ResinTrap => "ResinTrap",
            IssueKind::TouchingBound => "TouchingBound",
            IssueKind::EmptyLayer => "EmptyLayer",
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One issue on one layer.
///
/// Islands and touching bounds carry the affected pixels; a resin trap
/// carries the closed boundary of the cavity.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Issue {
    pub kind: IssueKind,
    pub layer_index: usize,
    pub points: Vec<Point>,
    pub bounding_rect: Rect,
}

impl Issue {
    pub fn new(kind: IssueKind, layer_index: usize, points: Vec<Point>, bounding_rect: Rect) -> Self {
        Self {
            kind,
            layer_index,
            points,
            bounding_rect,
        }
    }

    /// Issue covering a set of pixels, bounded by those pixels.
    pub fn from_points(kind: IssueKind, layer_index: usize, points: Vec<Point>) -> Self {
        let bounding_rect = Rect::bounding(&points);
        Self::new(kind, layer_index, points, bounding_rect)
    }

    /// Approximate size in pixels.
    ///
    /// Resin traps report their bounding rectangle area, everything else
    /// the number of pixels.
    pub fn size(&self) -> u64 {
        match self.kind {
            IssueKind::ResinTrap if !self.bounding_rect.is_empty() => self.bounding_rect.area(),
            _ => self.points.len() as u64,
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on layer {} at {} ({} px)",
            self.kind,
            self.layer_index,
            self.bounding_rect,
            self.size()
        )
    }
}

/// Result of a detection run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DetectionReport {
    /// Issues sorted by layer, then kind.
    pub issues: Vec<Issue>,
    /// Set when detection stopped early. `issues` holds what was found.
    pub cancelled: bool,
}

impl DetectionReport {
    /// Build a report, sorting the issues.
    pub fn new(mut issues: Vec<Issue>, cancelled: bool) -> Self {
        issues.sort_by(|a, b| {
            (a.layer_index, a.kind, a.bounding_rect.y, a.bounding_rect.x).cmp(&(
                b.layer_index,
                b.kind,
                b.bounding_rect.y,
                b.bounding_rect.x,
            ))
        });
        Self { issues, cancelled }
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Issue> {
        self.issues.iter()
    }

    /// Issues on `layer_index`.
    pub fn issues_for_layer(&self, layer_index: usize) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(move |issue| issue.layer_index == layer_index)
    }

    /// Issues of `kind`.
    pub fn of_kind(&self, kind: IssueKind) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |issue| issue.kind == kind)
    }

    /// Number of issues of `kind`.
    pub fn count(&self, kind: IssueKind) -> usize {
        self.of_kind(kind).count()
    }

    /// Issues grouped by layer.
    pub fn by_layer(&self) -> HashMap<usize, Vec<&Issue>> {
        let mut map: HashMap<usize, Vec<&Issue>> = HashMap::new();
        for issue in &self.issues {
            map.entry(issue.layer_index).or_default().push(issue);
        }
        map
    }
}

impl<'a> IntoIterator for &'a DetectionReport {
    type Item = &'a Issue;
    type IntoIter = std::slice::Iter<'a, Issue>;

    fn into_iter(self) -> Self::IntoIter {
        self.issues.iter()
    }
}

impl fmt::Display for DetectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Issue Detection Report")?;
        writeln!(f, "  Islands:         {}", self.count(IssueKind::Island))?;
        writeln!(f, "  Resin traps:     {}", self.count(IssueKind::ResinTrap))?;
        writeln!(f, "  Touching bounds: {}", self.count(IssueKind::TouchingBound))?;
        writeln!(f, "  Empty layers:    {}", self.count(IssueKind::EmptyLayer))?;
        let layers = self.by_layer().len();
        write!(f, "  Total: {} issues on {} layers", self.issues.len(), layers)?;
        if self.cancelled {
            write!(f, " (cancelled, partial)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_by_kind() {
        let island = Issue::from_points(
            IssueKind::Island,
            3,
            vec![Point::new(1, 1), Point::new(2, 1), Point::new(1, 2)],
        );
        assert_eq!(island.size(), 3);
        assert_eq!(island.bounding_rect, Rect::new(1, 1, 2, 2));

        let trap = Issue::new(
            IssueKind::ResinTrap,
            3,
            vec![Point::new(5, 5), Point::new(9, 5), Point::new(9, 8)],
            Rect::new(5, 5, 5, 4),
        );
        assert_eq!(trap.size(), 20);
    }

    #[test]
    fn test_report_is_sorted_and_grouped() {
        let report = DetectionReport::new(
            vec![
                Issue::from_points(IssueKind::TouchingBound, 2, vec![Point::new(0, 0)]),
                Issue::from_points(IssueKind::Island, 2, vec![Point::new(4, 4)]),
                Issue::from_points(IssueKind::Island, 1, vec![Point::new(4, 4)]),
            ],
            false,
        );
        let order: Vec<(usize, IssueKind)> =
            report.iter().map(|i| (i.layer_index, i.kind)).collect();
        assert_eq!(
            order,
            vec![
                (1, IssueKind::Island),
                (2, IssueKind::Island),
                (2, IssueKind::TouchingBound)
            ]
        );
        assert_eq!(report.count(IssueKind::Island), 2);
        assert_eq!(report.by_layer()[&2].len(), 2);
        assert_eq!(report.issues_for_layer(1).count(), 1);
    }

    #[test]
    fn test_display_mentions_cancellation() {
        let report = DetectionReport::new(Vec::new(), true);
        let text = report.to_string();
        assert!(text.contains("Total: 0 issues"));
        assert!(text.contains("cancelled"));
    }
}
