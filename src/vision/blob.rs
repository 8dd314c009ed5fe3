//! Circular blob detection on a preprocessed frame.
//!
//! The binary input is scanned over a range of thresholds. At each threshold
//! dark 4-connected regions are labeled, their outer contour is traced and the
//! region is kept when its area, circularity, inertia ratio and convexity pass
//! the configured filters. Regions seen at nearby positions across thresholds
//! are merged, and only those that repeat often enough become features.

use crate::config::DetectorConfig;
use crate::types::{DetectedFeature, PixelPoint};
use image::GrayImage;
use std::f64::consts::PI;

/// Detector parameter set. Changing any field forces a rebuild of the
/// compiled scan plan on the next detection.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorParams {
    pub min_threshold: u8,
    pub max_threshold: u8,
    pub threshold_step: u8,
    pub min_area: f64,
    pub min_circularity: f64,
    pub max_circularity: f64,
    pub min_convexity: f64,
    pub max_convexity: f64,
    pub min_inertia_ratio: f64,
    pub min_dist_between_blobs: f64,
    pub min_repeatability: usize,
}

impl From<&DetectorConfig> for DetectorParams {
    fn from(config: &DetectorConfig) -> Self {
        Self {
            min_threshold: config.min_threshold,
            max_threshold: config.max_threshold,
            threshold_step: config.threshold_step,
            min_area: config.min_area,
            min_circularity: config.effective_min_circularity(),
            max_circularity: 1.0,
            min_convexity: config.min_convexity,
            max_convexity: 1.0,
            min_inertia_ratio: config.min_inertia_ratio,
            min_dist_between_blobs: config.min_dist_between_blobs,
            min_repeatability: config.min_repeatability,
        }
    }
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self::from(&DetectorConfig::default())
    }
}

/// Shape measurements of one region at one threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlobCandidate {
    pub center: PixelPoint,
    pub radius: f64,
    pub area: f64,
    pub circularity: f64,
    pub convexity: f64,
    pub inertia_ratio: f64,
}

#[derive(Debug, Clone)]
struct ScanPlan {
    thresholds: Vec<u8>,
    params: DetectorParams,
}

impl ScanPlan {
    fn build(params: &DetectorParams) -> Self {
        let step = params.threshold_step.max(1) as usize;
        let thresholds = (params.min_threshold..params.max_threshold)
            .step_by(step)
            .collect();
        Self {
            thresholds,
            params: params.clone(),
        }
    }
}

/// Parameterized blob detector returning every qualifying circular region.
#[derive(Debug, Clone)]
pub struct CircleDetector {
    params: DetectorParams,
    plan: Option<ScanPlan>,
    rebuilds: usize,
}

impl CircleDetector {
    pub fn new(params: DetectorParams) -> Self {
        Self {
            params,
            plan: None,
            rebuilds: 0,
        }
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    /// Replace the parameter set. Returns `true` when anything changed.
    pub fn set_params(&mut self, params: DetectorParams) -> bool {
        if params == self.params {
            return false;
        }
        log::debug!("Detector parameters changed, scan plan will be rebuilt");
        self.params = params;
        self.plan = None;
        true
    }

    /// How many times the scan plan has been compiled.
    pub fn rebuild_count(&self) -> usize {
        self.rebuilds
    }

    pub fn detect(&mut self, image: &GrayImage) -> Vec<DetectedFeature> {
        if self.plan.is_none() {
            self.plan = Some(ScanPlan::build(&self.params));
            self.rebuilds += 1;
        }
        match &self.plan {
            Some(plan) => run_plan(plan, image),
            None => Vec::new(),
        }
    }
}

impl Default for CircleDetector {
    fn default() -> Self {
        Self::new(DetectorParams::default())
    }
}

fn run_plan(plan: &ScanPlan, image: &GrayImage) -> Vec<DetectedFeature> {
    let params = &plan.params;
    let mut histogram = [0usize; 256];
    for &v in image.iter() {
        histogram[v as usize] += 1;
    }

    let mut groups: Vec<Vec<BlobCandidate>> = Vec::new();
    let mut previous: Option<(u8, Vec<BlobCandidate>)> = None;

    for &threshold in &plan.thresholds {
        // Binarization only changes when some pixel value lies in (prev, threshold].
        let candidates = match previous.take() {
            Some((prev, blobs))
                if histogram[prev as usize + 1..=threshold as usize]
                    .iter()
                    .all(|&c| c == 0) =>
            {
                blobs
            }
            _ => find_candidates(image, threshold, params),
        };

        merge_into_groups(&mut groups, &candidates, params.min_dist_between_blobs);
        previous = Some((threshold, candidates));
    }

    groups
        .iter()
        .filter(|g| g.len() >= params.min_repeatability)
        .map(|g| {
            let n = g.len() as f64;
            let u = g.iter().map(|c| c.center.u).sum::<f64>() / n;
            let v = g.iter().map(|c| c.center.v).sum::<f64>() / n;
            DetectedFeature::new(u, v, g[g.len() / 2].radius)
        })
        .collect()
}

fn merge_into_groups(
    groups: &mut Vec<Vec<BlobCandidate>>,
    candidates: &[BlobCandidate],
    min_dist: f64,
) {
    let mut fresh = Vec::new();
    for candidate in candidates {
        let mut placed = false;
        for group in groups.iter_mut() {
            let reference = group[group.len() / 2];
            let dist = (reference.center.u - candidate.center.u)
                .hypot(reference.center.v - candidate.center.v);
            let is_new =
                dist >= min_dist && dist >= reference.radius && dist >= candidate.radius;
            if !is_new {
                let at = group
                    .iter()
                    .position(|c| c.radius > candidate.radius)
                    .unwrap_or(group.len());
                group.insert(at, *candidate);
                placed = true;
                break;
            }
        }
        if !placed {
            fresh.push(vec![*candidate]);
        }
    }
    groups.extend(fresh);
}

/// Candidates among dark regions (`value <= threshold`) that do not touch the
/// frame border.
pub fn find_candidates(
    image: &GrayImage,
    threshold: u8,
    params: &DetectorParams,
) -> Vec<BlobCandidate> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let (labels, count) = label_components(image, threshold);
    if count == 0 {
        return Vec::new();
    }

    let mut regions = vec![RegionMoments::default(); count + 1];
    for y in 0..h {
        for x in 0..w {
            let label = labels[y * w + x] as usize;
            if label == 0 {
                continue;
            }
            let region = &mut regions[label];
            if region.m00 == 0.0 {
                region.start = (x as i32, y as i32);
            }
            region.add(x, y);
            if x == 0 || y == 0 || x + 1 == w || y + 1 == h {
                region.touches_border = true;
            }
        }
    }

    let mut out = Vec::new();
    for (label, region) in regions.iter().enumerate().skip(1) {
        if region.touches_border || region.m00 == 0.0 {
            continue;
        }
        let contour = trace_contour(&labels, w, h, label as u32, region.start);
        if let Some(candidate) = measure(region, &contour, params) {
            out.push(candidate);
        }
    }
    out
}

#[derive(Debug, Clone, Copy, Default)]
struct RegionMoments {
    m00: f64,
    m10: f64,
    m01: f64,
    m20: f64,
    m02: f64,
    m11: f64,
    start: (i32, i32),
    touches_border: bool,
}

impl RegionMoments {
    #[inline]
    fn add(&mut self, x: usize, y: usize) {
        let (x, y) = (x as f64, y as f64);
        self.m00 += 1.0;
        self.m10 += x;
        self.m01 += y;
        self.m20 += x * x;
        self.m02 += y * y;
        self.m11 += x * y;
    }

    fn centroid(&self) -> PixelPoint {
        PixelPoint::new(self.m10 / self.m00, self.m01 / self.m00)
    }

    /// Ratio of the minor to the major second moment, 1.0 for a disc.
    fn inertia_ratio(&self) -> f64 {
        let c = self.centroid();
        let mu20 = self.m20 / self.m00 - c.u * c.u;
        let mu02 = self.m02 / self.m00 - c.v * c.v;
        let mu11 = self.m11 / self.m00 - c.u * c.v;
        let denominator = (2.0 * mu11).hypot(mu20 - mu02);
        if denominator <= 1e-2 {
            return 1.0;
        }
        let cos_min = (mu20 - mu02) / denominator;
        let sin_min = 2.0 * mu11 / denominator;
        let i_min = 0.5 * (mu20 + mu02) - 0.5 * (mu20 - mu02) * cos_min - mu11 * sin_min;
        let i_max = 0.5 * (mu20 + mu02) + 0.5 * (mu20 - mu02) * cos_min + mu11 * sin_min;
        if i_max <= 0.0 {
            return 0.0;
        }
        i_min / i_max
    }
}

fn measure(
    region: &RegionMoments,
    contour: &[(i32, i32)],
    params: &DetectorParams,
) -> Option<BlobCandidate> {
    if contour.len() < 3 {
        return None;
    }
    let area = polygon_area(contour);
    if area < params.min_area {
        return None;
    }

    let perimeter = contour_perimeter(contour);
    let circularity = 4.0 * PI * area / (perimeter * perimeter);
    if circularity < params.min_circularity || circularity > params.max_circularity {
        return None;
    }

    let inertia_ratio = region.inertia_ratio();
    if inertia_ratio < params.min_inertia_ratio {
        return None;
    }

    let hull_area = polygon_area(&convex_hull(contour));
    if hull_area <= 0.0 {
        return None;
    }
    let convexity = area / hull_area;
    if convexity < params.min_convexity || convexity > params.max_convexity {
        return None;
    }

    let center = region.centroid();
    let mut distances: Vec<f64> = contour
        .iter()
        .map(|&(x, y)| (x as f64 - center.u).hypot(y as f64 - center.v))
        .collect();
    distances.sort_by(|a, b| a.total_cmp(b));
    let n = distances.len();
    let radius = (distances[(n - 1) / 2] + distances[n / 2]) / 2.0;

    Some(BlobCandidate {
        center,
        radius,
        area,
        circularity,
        convexity,
        inertia_ratio,
    })
}

/// Label 4-connected regions of pixels `<= threshold`. Label 0 is background.
fn label_components(image: &GrayImage, threshold: u8) -> (Vec<u32>, usize) {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let src = image.as_raw();
    let mut labels = vec![0u32; w * h];
    let mut parent: Vec<u32> = vec![0];

    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            if src[i] > threshold {
                continue;
            }
            let up = if y > 0 { labels[i - w] } else { 0 };
            let left = if x > 0 { labels[i - 1] } else { 0 };
            labels[i] = match (up, left) {
                (0, 0) => {
                    let next = parent.len() as u32;
                    parent.push(next);
                    next
                }
                (a, 0) | (0, a) => a,
                (a, b) => {
                    let low = a.min(b);
                    union(&mut parent, a, b);
                    low
                }
            };
        }
    }

    // Compact roots to consecutive labels.
    let mut remap = vec![0u32; parent.len()];
    let mut count = 0u32;
    for label in 1..parent.len() {
        let root = find(&mut parent, label as u32) as usize;
        if remap[root] == 0 {
            count += 1;
            remap[root] = count;
        }
        remap[label] = remap[root];
    }
    for label in labels.iter_mut() {
        *label = remap[*label as usize];
    }
    (labels, count as usize)
}

fn find(parent: &mut [u32], mut x: u32) -> u32 {
    while parent[x as usize] != x {
        let grand = parent[parent[x as usize] as usize];
        parent[x as usize] = grand;
        x = grand;
    }
    x
}

fn union(parent: &mut [u32], a: u32, b: u32) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        let (low, high) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parent[high as usize] = low;
    }
}

/// Clockwise neighbor offsets starting east, y pointing down.
const DIRECTIONS: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

fn direction_of(dx: i32, dy: i32) -> usize {
    DIRECTIONS
        .iter()
        .position(|&d| d == (dx, dy))
        .unwrap_or(4)
}

/// Moore-neighbor trace of the outer boundary of `label`, starting from its
/// first pixel in raster order.
fn trace_contour(
    labels: &[u32],
    w: usize,
    h: usize,
    label: u32,
    start: (i32, i32),
) -> Vec<(i32, i32)> {
    let inside = |(x, y): (i32, i32)| {
        x >= 0
            && y >= 0
            && (x as usize) < w
            && (y as usize) < h
            && labels[y as usize * w + x as usize] == label
    };

    let mut contour = vec![start];
    let mut p = start;
    // The west neighbor of the first raster pixel is never part of the region.
    let mut back = 4usize;
    let mut second: Option<(i32, i32)> = None;
    let limit = 4 * labels.len() + 8;

    for _ in 0..limit {
        let mut next = None;
        for i in 1..=8 {
            let d = (back + i) % 8;
            let q = (p.0 + DIRECTIONS[d].0, p.1 + DIRECTIONS[d].1);
            if inside(q) {
                next = Some((d, q));
                break;
            }
        }
        let Some((d, q)) = next else {
            break;
        };

        if p == start {
            match second {
                None => second = Some(q),
                Some(s) if s == q => break,
                Some(_) => {}
            }
        }

        let prev = DIRECTIONS[(d + 7) % 8];
        let b = (p.0 + prev.0, p.1 + prev.1);
        back = direction_of(b.0 - q.0, b.1 - q.1);
        p = q;
        contour.push(p);
    }

    if contour.len() > 1 && contour.last() == contour.first() {
        contour.pop();
    }
    contour
}

fn contour_perimeter(contour: &[(i32, i32)]) -> f64 {
    let n = contour.len();
    (0..n)
        .map(|i| {
            let (x0, y0) = contour[i];
            let (x1, y1) = contour[(i + 1) % n];
            ((x1 - x0) as f64).hypot((y1 - y0) as f64)
        })
        .sum()
}

fn polygon_area(points: &[(i32, i32)]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let twice: i64 = (0..n)
        .map(|i| {
            let (x0, y0) = points[i];
            let (x1, y1) = points[(i + 1) % n];
            x0 as i64 * y1 as i64 - x1 as i64 * y0 as i64
        })
        .sum();
    twice.abs() as f64 / 2.0
}

/// Andrew's monotone chain.
fn convex_hull(points: &[(i32, i32)]) -> Vec<(i32, i32)> {
    let mut pts = points.to_vec();
    pts.sort_unstable();
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }
    let cross = |o: (i32, i32), a: (i32, i32), b: (i32, i32)| {
        (a.0 - o.0) as i64 * (b.1 - o.1) as i64 - (a.1 - o.1) as i64 * (b.0 - o.0) as i64
    };

    let mut hull: Vec<(i32, i32)> = Vec::with_capacity(pts.len() * 2);
    for &p in &pts {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in pts.iter().rev().skip(1) {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0 {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic_data::{synthetic_blob_mask, MaskShape};
    use image::Luma;

    #[test]
    fn test_single_disc_detected() {
        let mask = synthetic_blob_mask(200, 150, &[MaskShape::disc(100.0, 75.0, 15.0)]);
        let features = CircleDetector::default().detect(&mask);
        assert_eq!(features.len(), 1);
        let f = features[0];
        assert!((f.center.u - 100.0).abs() < 0.5);
        assert!((f.center.v - 75.0).abs() < 0.5);
        assert!((f.radius - 15.0).abs() < 1.5, "radius {}", f.radius);
    }

    #[test]
    fn test_empty_mask() {
        let mask = GrayImage::from_pixel(100, 100, Luma([255]));
        assert!(CircleDetector::default().detect(&mask).is_empty());
    }

    #[test]
    fn test_two_discs() {
        let mask = synthetic_blob_mask(
            240,
            120,
            &[MaskShape::disc(60.0, 60.0, 14.0), MaskShape::disc(180.0, 60.0, 14.0)],
        );
        assert_eq!(CircleDetector::default().detect(&mask).len(), 2);
    }

    #[test]
    fn test_small_blob_rejected_by_area() {
        let mask = synthetic_blob_mask(100, 100, &[MaskShape::disc(50.0, 50.0, 5.0)]);
        assert!(CircleDetector::default().detect(&mask).is_empty());
    }

    #[test]
    fn test_elongated_blob_rejected() {
        let mask = synthetic_blob_mask(200, 100, &[MaskShape::rect(20, 40, 160, 12)]);
        assert!(CircleDetector::default().detect(&mask).is_empty());
    }

    #[test]
    fn test_border_blob_ignored() {
        let mask = synthetic_blob_mask(100, 100, &[MaskShape::disc(0.0, 50.0, 20.0)]);
        assert!(CircleDetector::default().detect(&mask).is_empty());
    }

    #[test]
    fn test_rebuild_only_on_change() {
        let mask = synthetic_blob_mask(100, 100, &[MaskShape::disc(50.0, 50.0, 14.0)]);
        let mut detector = CircleDetector::default();
        detector.detect(&mask);
        detector.detect(&mask);
        assert_eq!(detector.rebuild_count(), 1);

        assert!(!detector.set_params(DetectorParams::default()));
        detector.detect(&mask);
        assert_eq!(detector.rebuild_count(), 1);

        let loose = DetectorParams {
            min_circularity: 0.6,
            ..DetectorParams::default()
        };
        assert!(detector.set_params(loose));
        detector.detect(&mask);
        assert_eq!(detector.rebuild_count(), 2);
    }

    #[test]
    fn test_contour_of_square() {
        let mut labels = vec![0u32; 36];
        for y in 1..5 {
            for x in 1..5 {
                labels[y * 6 + x] = 1;
            }
        }
        let contour = trace_contour(&labels, 6, 6, 1, (1, 1));
        assert_eq!(contour.len(), 12);
        assert_eq!(polygon_area(&contour), 9.0);
        assert_eq!(contour_perimeter(&contour), 12.0);
        assert_eq!(polygon_area(&convex_hull(&contour)), 9.0);
    }

    #[test]
    fn test_shape_limits_are_inclusive() {
        let mut labels = vec![0u32; 36];
        let mut region = RegionMoments::default();
        for y in 1..5 {
            for x in 1..5 {
                labels[y * 6 + x] = 1;
                region.add(x, y);
            }
        }
        let contour = trace_contour(&labels, 6, 6, 1, (1, 1));
        // Square contour: area 9, perimeter 12, convexity exactly 1.
        let circularity = 4.0 * PI * 9.0 / (12.0 * 12.0);
        let params = DetectorParams {
            min_area: 1.0,
            min_circularity: circularity,
            max_circularity: circularity,
            min_convexity: 1.0,
            max_convexity: 1.0,
            min_inertia_ratio: 0.0,
            ..DetectorParams::default()
        };
        let candidate = measure(&region, &contour, &params).expect("on-limit shape kept");
        assert_eq!(candidate.circularity, circularity);
        assert_eq!(candidate.convexity, 1.0);

        let tighter = DetectorParams {
            min_circularity: 0.0,
            max_circularity: circularity - 1e-9,
            ..params
        };
        assert!(measure(&region, &contour, &tighter).is_none());
    }

    #[test]
    fn test_labeling_merges_u_shape() {
        let mut img = GrayImage::from_pixel(7, 5, Luma([255]));
        for y in 1..4 {
            img.put_pixel(1, y, Luma([0]));
            img.put_pixel(5, y, Luma([0]));
        }
        for x in 1..6 {
            img.put_pixel(x, 3, Luma([0]));
        }
        let (_, count) = label_components(&img, 10);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_disc_inertia_near_one() {
        let mut m = RegionMoments::default();
        for y in 0..41usize {
            for x in 0..41usize {
                let (dx, dy) = (x as f64 - 20.0, y as f64 - 20.0);
                if dx * dx + dy * dy <= 400.0 {
                    m.add(x, y);
                }
            }
        }
        assert!(m.inertia_ratio() > 0.95);
    }
}
