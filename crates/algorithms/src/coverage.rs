//! Scanline coverage of geometries on a pixel grid.
//!
//! Geometries are taken to pixel space with the grid's inverse transform
//! and reduced to row spans. Polygon interiors are filled even-odd at row
//! centres, so a cell is covered when its centre is inside. In touched
//! mode every cell a polygon boundary passes through is added as well.
//! Lines always cover the cells they cross and points the cell holding
//! them.

use geo_types::{Coord, Geometry, LineString, Polygon};
use mcda_core::GeoTransform;

/// Columns `start..end` of one grid row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub row: usize,
    pub start: usize,
    pub end: usize,
}

/// Cells of a `rows x cols` grid covered by `geometry`.
///
/// Spans may overlap; cells outside the grid are dropped. A degenerate
/// transform covers nothing.
pub(crate) fn spans(
    geometry: &Geometry<f64>,
    transform: &GeoTransform,
    (rows, cols): (usize, usize),
    touched: bool,
) -> Vec<Span> {
    let mut scan = Scan {
        transform,
        rows,
        cols,
        touched,
        spans: Vec::new(),
    };
    scan.geometry(geometry);
    scan.spans
}

/// Non-horizontal polygon edge in pixel space, `y0 < y1`
struct Edge {
    y0: f64,
    y1: f64,
    x0: f64,
    dxdy: f64,
}

impl Edge {
    fn new(a: (f64, f64), b: (f64, f64)) -> Option<Self> {
        if a.1 == b.1 {
            return None;
        }
        let (lo, hi) = if a.1 < b.1 { (a, b) } else { (b, a) };
        Some(Edge {
            y0: lo.1,
            y1: hi.1,
            x0: lo.0,
            dxdy: (hi.0 - lo.0) / (hi.1 - lo.1),
        })
    }

    fn x_at(&self, y: f64) -> f64 {
        self.x0 + (y - self.y0) * self.dxdy
    }
}

/// Inclusive index range `[floor(lo), floor(hi)]` clamped to `0..n`
fn clamp_range(lo: f64, hi: f64, n: usize) -> Option<(usize, usize)> {
    let (lo, hi) = (lo.floor(), hi.floor());
    if n == 0 || hi < 0.0 || lo >= n as f64 {
        return None;
    }
    Some((lo.max(0.0) as usize, hi.min(n as f64 - 1.0) as usize))
}

struct Scan<'a> {
    transform: &'a GeoTransform,
    rows: usize,
    cols: usize,
    touched: bool,
    spans: Vec<Span>,
}

impl Scan<'_> {
    fn to_pixel(&self, coord: &Coord<f64>) -> Option<(f64, f64)> {
        let (col, row) = self.transform.geo_to_pixel(coord.x, coord.y);
        (col.is_finite() && row.is_finite()).then_some((col, row))
    }

    fn vertices(&self, line: &LineString<f64>) -> Option<Vec<(f64, f64)>> {
        line.coords().map(|c| self.to_pixel(c)).collect()
    }

    fn geometry(&mut self, geometry: &Geometry<f64>) {
        match geometry {
            Geometry::Point(p) => self.point(&p.0),
            Geometry::MultiPoint(mp) => {
                for p in mp {
                    self.point(&p.0);
                }
            }
            Geometry::Line(l) => self.path(&LineString::new(vec![l.start, l.end])),
            Geometry::LineString(ls) => self.path(ls),
            Geometry::MultiLineString(mls) => {
                for ls in mls {
                    self.path(ls);
                }
            }
            Geometry::Polygon(p) => self.polygon(p),
            Geometry::MultiPolygon(mp) => {
                for p in mp {
                    self.polygon(p);
                }
            }
            Geometry::Rect(r) => self.polygon(&r.to_polygon()),
            Geometry::Triangle(t) => self.polygon(&t.to_polygon()),
            Geometry::GeometryCollection(gc) => {
                for g in gc {
                    self.geometry(g);
                }
            }
        }
    }

    fn point(&mut self, coord: &Coord<f64>) {
        if let Some((x, y)) = self.to_pixel(coord) {
            self.segment((x, y), (x, y));
        }
    }

    fn path(&mut self, line: &LineString<f64>) {
        let Some(vertices) = self.vertices(line) else {
            return;
        };
        if let [single] = vertices.as_slice() {
            self.segment(*single, *single);
        }
        for pair in vertices.windows(2) {
            self.segment(pair[0], pair[1]);
        }
    }

    fn polygon(&mut self, polygon: &Polygon<f64>) {
        let rings: Option<Vec<Vec<(f64, f64)>>> = std::iter::once(polygon.exterior())
            .chain(polygon.interiors())
            .map(|ring| self.vertices(ring))
            .collect();
        let Some(rings) = rings else {
            return;
        };

        self.fill(&rings);
        if self.touched {
            for ring in &rings {
                for pair in ring.windows(2) {
                    self.segment(pair[0], pair[1]);
                }
            }
        }
    }

    /// Every cell the closed segment `a-b` passes through.
    fn segment(&mut self, a: (f64, f64), b: (f64, f64)) {
        let Some((first, last)) = clamp_range(a.1.min(b.1), a.1.max(b.1), self.rows) else {
            return;
        };
        for row in first..=last {
            let (x_lo, x_hi) = if a.1 == b.1 {
                (a.0.min(b.0), a.0.max(b.0))
            } else {
                // parameter along a-b where it meets y, kept on the segment
                let t = |y: f64| ((y - a.1) / (b.1 - a.1)).clamp(0.0, 1.0);
                let top = a.0 + t(row as f64) * (b.0 - a.0);
                let bottom = a.0 + t(row as f64 + 1.0) * (b.0 - a.0);
                (top.min(bottom), top.max(bottom))
            };
            if let Some((start, end)) = clamp_range(x_lo, x_hi, self.cols) {
                self.spans.push(Span {
                    row,
                    start,
                    end: end + 1,
                });
            }
        }
    }

    /// Even-odd fill of `rings` at row centres, with an active edge list.
    fn fill(&mut self, rings: &[Vec<(f64, f64)>]) {
        let mut edges: Vec<Edge> = rings
            .iter()
            .flat_map(|ring| ring.windows(2))
            .filter_map(|pair| Edge::new(pair[0], pair[1]))
            .collect();
        if edges.is_empty() {
            return;
        }
        edges.sort_by(|a, b| a.y0.total_cmp(&b.y0));

        let y_min = edges[0].y0;
        let y_max = edges.iter().map(|e| e.y1).fold(f64::NEG_INFINITY, f64::max);
        // rows whose centre lies in [y_min, y_max)
        let first = (y_min - 0.5).ceil().max(0.0);
        let last = (y_max - 0.5).ceil().min(self.rows as f64);
        if first >= last {
            return;
        }

        let cols = self.cols as f64;
        let mut next = 0;
        let mut active: Vec<usize> = Vec::new();
        let mut crossings: Vec<f64> = Vec::new();
        for row in first as usize..last as usize {
            let yc = row as f64 + 0.5;
            while next < edges.len() && edges[next].y0 <= yc {
                active.push(next);
                next += 1;
            }
            active.retain(|&i| edges[i].y1 > yc);

            crossings.clear();
            crossings.extend(active.iter().map(|&i| edges[i].x_at(yc)));
            crossings.sort_by(f64::total_cmp);

            // centres c + 0.5 in [xa, xb)
            for pair in crossings.chunks_exact(2) {
                let start = (pair[0] - 0.5).ceil().clamp(0.0, cols) as usize;
                let end = (pair[1] - 0.5).ceil().clamp(0.0, cols) as usize;
                if start < end {
                    self.spans.push(Span { row, start, end });
                }
            }
        }
    }
}
