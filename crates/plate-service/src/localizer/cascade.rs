//! Boosted Haar cascade evaluation for plate-like textures.
//!
//! Reads OpenCV `traincascade` XML models (BOOST stages over upright HAAR
//! features) and reproduces `detectMultiScale`: an image pyramid with a fixed
//! window, per-window variance normalisation, early stage rejection and
//! neighbour-count grouping of the raw hits.

use super::PlateClassifier;
use crate::error::ModelLoadError;
use common::plates::BoundingBox;
use image::{imageops::FilterType, GrayImage};
use imageproc::integral_image::{integral_image, integral_squared_image};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::path::Path;

/// Scan parameters, matching the `detectMultiScale` arguments
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeParams {
    /// Pyramid step between window sizes
    pub scale_factor: f64,
    /// A grouped region must collect more raw hits than this
    pub min_neighbors: usize,
    /// Smallest reported region (width, height)
    pub min_size: (u32, u32),
    /// Relative tolerance when deciding two raw hits are the same region
    pub group_eps: f64,
}

impl Default for CascadeParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 5,
            min_size: (25, 25),
            group_eps: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WeightedRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f32,
}

#[derive(Debug, Clone, Default)]
struct HaarFeature {
    rects: Vec<WeightedRect>,
}

#[derive(Debug, Clone, Copy)]
struct TreeNode {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f32,
}

#[derive(Debug, Clone, Default)]
struct WeakClassifier {
    nodes: Vec<TreeNode>,
    leaves: Vec<f32>,
}

#[derive(Debug, Clone, Default)]
struct Stage {
    threshold: f32,
    classifiers: Vec<WeakClassifier>,
}

/// Pre-trained Haar cascade, immutable after loading
#[derive(Debug, Clone)]
pub struct HaarCascade {
    window_width: u32,
    window_height: u32,
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
    params: CascadeParams,
}

impl HaarCascade {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ModelLoadError> {
        let path = path.as_ref();
        let xml = std::fs::read_to_string(path).map_err(|source| ModelLoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let cascade = Self::from_xml(&xml)?;

        tracing::info!(
            path = %path.display(),
            window_width = cascade.window_width,
            window_height = cascade.window_height,
            stages = cascade.stages.len(),
            features = cascade.features.len(),
            "loaded plate cascade"
        );

        Ok(cascade)
    }

    pub fn from_xml(xml: &str) -> Result<Self, ModelLoadError> {
        let parsed = parse_cascade_xml(xml)?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn with_params(mut self, params: CascadeParams) -> Self {
        self.params = params;
        self
    }

    pub fn window_size(&self) -> (u32, u32) {
        (self.window_width, self.window_height)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Every window position (in original-image coordinates) accepted by all stages
    fn raw_hits(&self, gray: &GrayImage) -> Vec<BoundingBox> {
        let (img_w, img_h) = gray.dimensions();
        let (win_w, win_h) = (self.window_width, self.window_height);
        let mut hits = Vec::new();
        let mut factor = 1.0f64;

        loop {
            let scaled_w = (img_w as f64 / factor).round() as u32;
            let scaled_h = (img_h as f64 / factor).round() as u32;
            if scaled_w < win_w || scaled_h < win_h {
                break;
            }

            let rect_w = (win_w as f64 * factor).round() as u32;
            let rect_h = (win_h as f64 * factor).round() as u32;
            if rect_w > img_w || rect_h > img_h {
                break;
            }

            if rect_w >= self.params.min_size.0 && rect_h >= self.params.min_size.1 {
                let scaled = if factor == 1.0 {
                    gray.clone()
                } else {
                    image::imageops::resize(gray, scaled_w, scaled_h, FilterType::Triangle)
                };
                let integrals = Integrals::new(&scaled);
                let step = if factor > 2.0 { 1 } else { 2 };

                for y in (0..=scaled_h - win_h).step_by(step) {
                    for x in (0..=scaled_w - win_w).step_by(step) {
                        if self.evaluate_window(&integrals, x, y) {
                            let rx = (x as f64 * factor).round() as u32;
                            let ry = (y as f64 * factor).round() as u32;
                            if let Some(hit) =
                                BoundingBox::new(rx, ry, rect_w, rect_h).clamp_to(img_w, img_h)
                            {
                                hits.push(hit);
                            }
                        }
                    }
                }
            }

            factor *= self.params.scale_factor;
        }

        hits
    }

    fn evaluate_window(&self, integrals: &Integrals, x: u32, y: u32) -> bool {
        // Normalisation uses the window shrunk by one pixel on each side.
        let norm_w = self.window_width.saturating_sub(2).max(1);
        let norm_h = self.window_height.saturating_sub(2).max(1);
        let area = (norm_w * norm_h) as f64;
        let sum = integrals.sum(x + 1, y + 1, norm_w, norm_h) as f64;
        let sq_sum = integrals.sq_sum(x + 1, y + 1, norm_w, norm_h) as f64;

        let variance = area * sq_sum - sum * sum;
        let norm = if variance > 0.0 { variance.sqrt() } else { 1.0 };
        let inv_norm = 1.0 / norm;

        for stage in &self.stages {
            let mut stage_sum = 0.0f32;

            for weak in &stage.classifiers {
                let mut idx: i32 = 0;
                loop {
                    let node = &weak.nodes[idx as usize];
                    let value = self.feature_value(integrals, node.feature, x, y) * inv_norm;
                    idx = if value < node.threshold as f64 {
                        node.left
                    } else {
                        node.right
                    };
                    if idx <= 0 {
                        break;
                    }
                }
                stage_sum += weak.leaves[(-idx) as usize];
            }

            if stage_sum < stage.threshold {
                return false;
            }
        }

        true
    }

    fn feature_value(&self, integrals: &Integrals, feature: usize, x: u32, y: u32) -> f64 {
        self.features[feature]
            .rects
            .iter()
            .map(|r| r.weight as f64 * integrals.sum(x + r.x, y + r.y, r.width, r.height) as f64)
            .sum()
    }

    fn validate(&self) -> Result<(), ModelLoadError> {
        let invalid = |msg: String| Err(ModelLoadError::InvalidCascade(msg));

        if self.window_width == 0 || self.window_height == 0 {
            return invalid("missing window size (only the traincascade format is supported)".into());
        }
        // The variance window is inset by one pixel on each side.
        if self.window_width < 3 || self.window_height < 3 {
            return invalid(format!(
                "detection window {}x{} is smaller than 3x3",
                self.window_width, self.window_height
            ));
        }
        if self.stages.is_empty() {
            return invalid("cascade has no stages".into());
        }

        for (fi, feature) in self.features.iter().enumerate() {
            if feature.rects.is_empty() {
                return invalid(format!("feature {} has no rectangles", fi));
            }
            for r in &feature.rects {
                if r.x + r.width > self.window_width || r.y + r.height > self.window_height {
                    return invalid(format!("feature {} exceeds the detection window", fi));
                }
            }
        }

        for (si, stage) in self.stages.iter().enumerate() {
            if stage.classifiers.is_empty() {
                return invalid(format!("stage {} has no weak classifiers", si));
            }
            for weak in &stage.classifiers {
                if weak.nodes.is_empty() {
                    return invalid(format!("stage {} has a classifier without nodes", si));
                }
                for (ni, node) in weak.nodes.iter().enumerate() {
                    if node.feature >= self.features.len() {
                        return invalid(format!(
                            "stage {} references missing feature {}",
                            si, node.feature
                        ));
                    }
                    // Node links only point forward, so every walk reaches a leaf.
                    for child in [node.left, node.right] {
                        let in_range = if child > 0 {
                            (child as usize) > ni && (child as usize) < weak.nodes.len()
                        } else {
                            ((-child) as usize) < weak.leaves.len()
                        };
                        if !in_range {
                            return invalid(format!("stage {} has a dangling tree link", si));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

impl PlateClassifier for HaarCascade {
    fn detect(&self, gray: &GrayImage) -> Vec<BoundingBox> {
        let hits = self.raw_hits(gray);
        let raw_count = hits.len();
        let grouped = group_rectangles(hits, self.params.min_neighbors, self.params.group_eps);

        tracing::debug!(
            raw_hits = raw_count,
            regions = grouped.len(),
            "cascade scan finished"
        );

        grouped
    }
}

/// Summed-area tables for one pyramid level
struct Integrals {
    stride: usize,
    sum: Vec<u32>,
    sq_sum: Vec<u64>,
}

impl Integrals {
    fn new(gray: &GrayImage) -> Self {
        let sum = integral_image::<_, u32>(gray);
        let sq_sum = integral_squared_image::<_, u64>(gray);

        Self {
            stride: sum.width() as usize,
            sum: sum.into_raw(),
            sq_sum: sq_sum.into_raw(),
        }
    }

    fn corners(&self, x: u32, y: u32, w: u32, h: u32) -> [usize; 4] {
        let (x1, y1) = (x as usize, y as usize);
        let (x2, y2) = ((x + w) as usize, (y + h) as usize);
        [
            y1 * self.stride + x1,
            y1 * self.stride + x2,
            y2 * self.stride + x1,
            y2 * self.stride + x2,
        ]
    }

    fn sum(&self, x: u32, y: u32, w: u32, h: u32) -> i64 {
        let [tl, tr, bl, br] = self.corners(x, y, w, h);
        self.sum[br] as i64 - self.sum[tr] as i64 - self.sum[bl] as i64 + self.sum[tl] as i64
    }

    fn sq_sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        let [tl, tr, bl, br] = self.corners(x, y, w, h);
        (self.sq_sum[br] + self.sq_sum[tl]) - (self.sq_sum[tr] + self.sq_sum[bl])
    }
}

/// Cluster raw hits and keep clusters with more than `min_neighbors` members.
///
/// Each kept region is the member-average rectangle. Small regions nested
/// inside a better supported one are dropped. With `min_neighbors == 0` the
/// hits are returned ungrouped.
pub fn group_rectangles(
    rects: Vec<BoundingBox>,
    min_neighbors: usize,
    eps: f64,
) -> Vec<BoundingBox> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects;
    }

    let labels = partition(&rects, eps);
    let class_count = labels.iter().copied().max().map_or(0, |m| m + 1);

    let mut sums = vec![[0u64; 4]; class_count];
    let mut counts = vec![0usize; class_count];
    for (rect, &label) in rects.iter().zip(&labels) {
        sums[label][0] += rect.x as u64;
        sums[label][1] += rect.y as u64;
        sums[label][2] += rect.width as u64;
        sums[label][3] += rect.height as u64;
        counts[label] += 1;
    }

    let averaged: Vec<BoundingBox> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &n)| {
            let avg = |v: u64| (v as f64 / n as f64).round() as u32;
            BoundingBox::new(avg(s[0]), avg(s[1]), avg(s[2]), avg(s[3]))
        })
        .collect();

    let mut kept = Vec::new();
    for (i, r1) in averaged.iter().enumerate() {
        let n1 = counts[i];
        if n1 <= min_neighbors {
            continue;
        }

        let swallowed = averaged.iter().enumerate().any(|(j, r2)| {
            let n2 = counts[j];
            if j == i || n2 <= min_neighbors {
                return false;
            }
            let dx = (r2.width as f64 * eps).round() as i64;
            let dy = (r2.height as f64 * eps).round() as i64;

            r1.x as i64 >= r2.x as i64 - dx
                && r1.y as i64 >= r2.y as i64 - dy
                && r1.right() as i64 <= r2.right() as i64 + dx
                && r1.bottom() as i64 <= r2.bottom() as i64 + dy
                && (n2 > n1.max(3) || n1 < 3)
        });

        if !swallowed {
            kept.push(*r1);
        }
    }

    kept
}

fn similar(a: &BoundingBox, b: &BoundingBox, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    let close = |p: u32, q: u32| (p as f64 - q as f64).abs() <= delta;

    close(a.x, b.x) && close(a.y, b.y) && close(a.right(), b.right()) && close(a.bottom(), b.bottom())
}

/// Equivalence classes under `similar`, labelled 0..n in first-seen order
fn partition(rects: &[BoundingBox], eps: f64) -> Vec<usize> {
    let mut parent: Vec<usize> = (0..rects.len()).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if similar(&rects[i], &rects[j], eps) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    let mut labels = vec![usize::MAX; rects.len()];
    let mut root_labels = std::collections::HashMap::new();
    for i in 0..rects.len() {
        let root = find(&mut parent, i);
        let next = root_labels.len();
        labels[i] = *root_labels.entry(root).or_insert(next);
    }
    labels
}

fn parse_cascade_xml(xml: &str) -> Result<HaarCascade, ModelLoadError> {
    let bad = |msg: String| ModelLoadError::InvalidCascade(msg);

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut cascade = HaarCascade {
        window_width: 0,
        window_height: 0,
        stages: Vec::new(),
        features: Vec::new(),
        params: CascadeParams::default(),
    };

    loop {
        match reader.read_event().map_err(|e| bad(e.to_string()))? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == "_" {
                    match path.last().map(String::as_str) {
                        Some("stages") => cascade.stages.push(Stage::default()),
                        Some("weakClassifiers") => cascade
                            .stages
                            .last_mut()
                            .ok_or_else(|| bad("classifier outside a stage".into()))?
                            .classifiers
                            .push(WeakClassifier::default()),
                        Some("features") => cascade.features.push(HaarFeature::default()),
                        _ => {}
                    }
                }
                path.push(name);
            }
            Event::End(_) => {
                path.pop();
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(|e| bad(e.to_string()))?;
                apply_text(&mut cascade, &path, text.trim())?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(cascade)
}

fn apply_text(cascade: &mut HaarCascade, path: &[String], text: &str) -> Result<(), ModelLoadError> {
    let bad = |msg: String| ModelLoadError::InvalidCascade(msg);
    let tail: Vec<&str> = path.iter().rev().take(3).map(String::as_str).collect();

    match tail.as_slice() {
        ["width", "cascade", ..] => cascade.window_width = parse_num(text)?,
        ["height", "cascade", ..] => cascade.window_height = parse_num(text)?,
        ["stageType", "cascade", ..] if text != "BOOST" => {
            return Err(bad(format!("unsupported stage type {}", text)))
        }
        ["featureType", "cascade", ..] if text != "HAAR" => {
            return Err(bad(format!("unsupported feature type {}", text)))
        }
        ["stageThreshold", "_", "stages"] => {
            let stage = cascade
                .stages
                .last_mut()
                .ok_or_else(|| bad("threshold outside a stage".into()))?;
            stage.threshold = parse_num(text)?;
        }
        ["internalNodes", "_", "weakClassifiers"] => {
            let weak = last_classifier(cascade)?;
            let values: Vec<f32> = parse_list(text)?;
            if values.is_empty() || values.len() % 4 != 0 {
                return Err(bad(format!("malformed internalNodes '{}'", text)));
            }
            weak.nodes = values
                .chunks(4)
                .map(|c| TreeNode {
                    left: c[0] as i32,
                    right: c[1] as i32,
                    feature: c[2] as usize,
                    threshold: c[3],
                })
                .collect();
        }
        ["leafValues", "_", "weakClassifiers"] => {
            last_classifier(cascade)?.leaves = parse_list(text)?;
        }
        ["_", "rects", "_"] => {
            let values: Vec<f32> = parse_list(text)?;
            if values.len() != 5 || values[..4].iter().any(|v| *v < 0.0) {
                return Err(bad(format!("malformed feature rectangle '{}'", text)));
            }
            let feature = cascade
                .features
                .last_mut()
                .ok_or_else(|| bad("rectangle outside a feature".into()))?;
            feature.rects.push(WeightedRect {
                x: values[0] as u32,
                y: values[1] as u32,
                width: values[2] as u32,
                height: values[3] as u32,
                weight: values[4],
            });
        }
        ["tilted", "_", "features"] if text != "0" => {
            return Err(bad("tilted Haar features are not supported".into()))
        }
        _ => {}
    }

    Ok(())
}

fn last_classifier(cascade: &mut HaarCascade) -> Result<&mut WeakClassifier, ModelLoadError> {
    cascade
        .stages
        .last_mut()
        .and_then(|s| s.classifiers.last_mut())
        .ok_or_else(|| ModelLoadError::InvalidCascade("tree data outside a classifier".into()))
}

fn parse_num<T: std::str::FromStr>(text: &str) -> Result<T, ModelLoadError> {
    text.parse()
        .map_err(|_| ModelLoadError::InvalidCascade(format!("invalid number '{}'", text)))
}

fn parse_list<T: std::str::FromStr>(text: &str) -> Result<Vec<T>, ModelLoadError> {
    text.split_whitespace().map(parse_num).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// One-stage cascade over an 8×4 window that fires where the right half
    /// of the window is brighter than the left half.
    const STEP_CASCADE: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade>
  <stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>4</height>
  <width>8</width>
  <stageParams>
    <boostType>GAB</boostType>
    <maxWeakCount>1</maxWeakCount></stageParams>
  <featureParams>
    <maxCatCount>0</maxCatCount></featureParams>
  <stageNum>1</stageNum>
  <stages>
    <!-- stage 0 -->
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>0.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 1.0000000000000001e-01</internalNodes>
          <leafValues>
            -1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          0 0 8 4 -1.</_>
        <_>
          4 0 4 4 2.</_></rects>
      <tilted>0</tilted></_></features></cascade>
</opencv_storage>
"#;

    fn step_cascade(min_neighbors: usize) -> HaarCascade {
        HaarCascade::from_xml(STEP_CASCADE)
            .unwrap()
            .with_params(CascadeParams {
                scale_factor: 1.1,
                min_neighbors,
                min_size: (8, 4),
                group_eps: 0.2,
            })
    }

    #[test]
    fn test_parse_step_cascade() {
        let cascade = HaarCascade::from_xml(STEP_CASCADE).unwrap();
        assert_eq!(cascade.window_size(), (8, 4));
        assert_eq!(cascade.stage_count(), 1);
        assert_eq!(cascade.features.len(), 1);
        assert_eq!(cascade.features[0].rects.len(), 2);
        assert_eq!(cascade.stages[0].classifiers[0].leaves, vec![-1.0, 1.0]);
        assert_eq!(cascade.params, CascadeParams::default());
    }

    #[test]
    fn test_rejects_old_format() {
        let xml = r#"<opencv_storage><plate type_id="opencv-haar-classifier">
            <size>60 20</size><stages></stages></plate></opencv_storage>"#;
        assert!(matches!(
            HaarCascade::from_xml(xml),
            Err(ModelLoadError::InvalidCascade(_))
        ));
    }

    #[test]
    fn test_rejects_tilted_and_lbp() {
        let tilted = STEP_CASCADE.replace("<tilted>0</tilted>", "<tilted>1</tilted>");
        assert!(HaarCascade::from_xml(&tilted).is_err());

        let lbp = STEP_CASCADE.replace(
            "<featureType>HAAR</featureType>",
            "<featureType>LBP</featureType>",
        );
        assert!(HaarCascade::from_xml(&lbp).is_err());
    }

    #[test]
    fn test_rejects_dangling_feature_reference() {
        let broken = STEP_CASCADE.replace("0 -1 0 1.0000000000000001e-01", "0 -1 3 0.1");
        assert!(HaarCascade::from_xml(&broken).is_err());
    }

    #[test]
    fn test_rejects_tree_cycle() {
        let looping = STEP_CASCADE.replace(
            "0 -1 0 1.0000000000000001e-01",
            "1 -1 0 0.1\n            0 1 0 0.2",
        );
        assert!(matches!(
            HaarCascade::from_xml(&looping),
            Err(ModelLoadError::InvalidCascade(_))
        ));

        let forward = STEP_CASCADE.replace(
            "0 -1 0 1.0000000000000001e-01",
            "1 -1 0 0.1\n            0 -2 0 0.2",
        );
        let forward = forward.replace("-1. 1.</leafValues>", "-1. 1. 0.5</leafValues>");
        assert!(HaarCascade::from_xml(&forward).is_ok());
    }

    #[test]
    fn test_rejects_tiny_window() {
        let tiny = STEP_CASCADE
            .replace("<width>8</width>", "<width>2</width>")
            .replace("0 0 8 4 -1.", "0 0 2 4 -1.")
            .replace("4 0 4 4 2.", "1 0 1 4 2.");
        assert!(matches!(
            HaarCascade::from_xml(&tiny),
            Err(ModelLoadError::InvalidCascade(_))
        ));
    }

    #[test]
    fn test_detect_finds_vertical_step() {
        let image = GrayImage::from_fn(80, 40, |x, _| if x < 40 { Luma([0]) } else { Luma([255]) });
        let hits = step_cascade(0).detect(&image);

        assert!(!hits.is_empty());
        assert!(hits
            .iter()
            .any(|h| h.width == 8 && h.height == 4 && (33..=39).contains(&h.x)));
    }

    #[test]
    fn test_detect_flat_image_is_empty() {
        let image = GrayImage::from_pixel(80, 40, Luma([0]));
        assert!(step_cascade(0).detect(&image).is_empty());
        assert!(step_cascade(5).detect(&image).is_empty());
    }

    #[test]
    fn test_group_rectangles_requires_neighbors() {
        let mut rects: Vec<BoundingBox> = (0..6)
            .map(|i| BoundingBox::new(100 + i % 2, 50, 60, 20))
            .collect();
        rects.push(BoundingBox::new(400, 300, 60, 20));

        let grouped = group_rectangles(rects.clone(), 5, 0.2);
        assert_eq!(grouped, vec![BoundingBox::new(101, 50, 60, 20)]);

        // Five members is not enough with min_neighbors = 5.
        let grouped = group_rectangles(rects[1..].to_vec(), 5, 0.2);
        assert!(grouped.is_empty());
    }

    #[test]
    fn test_group_rectangles_drops_nested_region() {
        let mut rects = Vec::new();
        rects.extend(std::iter::repeat(BoundingBox::new(100, 100, 200, 60)).take(12));
        rects.extend(std::iter::repeat(BoundingBox::new(120, 110, 50, 20)).take(6));

        let grouped = group_rectangles(rects, 5, 0.2);
        assert_eq!(grouped, vec![BoundingBox::new(100, 100, 200, 60)]);
    }
}
