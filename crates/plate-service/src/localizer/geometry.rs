//! Contour heuristic: plates are bright quadrilaterals a few times wider than tall.

use crate::filters::bilateral_filter;
use common::plates::BoundingBox;
use image::RgbImage;
use imageproc::contours::find_contours;
use imageproc::distance_transform::Norm;
use imageproc::geometry::{arc_length, contour_area};
use imageproc::point::Point;

const BILATERAL_DIAMETER: u32 = 11;
const BILATERAL_SIGMA: f32 = 17.0;
const CANNY_LOW: f32 = 30.0;
const CANNY_HIGH: f32 = 200.0;
const MAX_CONTOURS: usize = 10;
const APPROX_EPSILON_RATIO: f64 = 0.02;
const MIN_ASPECT: f64 = 2.0;
const MAX_ASPECT: f64 = 5.0;
const CLOSING_RADIUS: u8 = 1;

/// Plate-shaped quadrilaterals, largest contour first
pub fn detect_by_geometry(image: &RgbImage) -> Vec<BoundingBox> {
    let gray = image::imageops::grayscale(image);
    let smoothed = bilateral_filter(&gray, BILATERAL_DIAMETER, BILATERAL_SIGMA, BILATERAL_SIGMA);
    let edges = imageproc::edges::canny(&smoothed, CANNY_LOW, CANNY_HIGH);
    // Close single-pixel gaps so plate borders trace as one contour.
    let closed = imageproc::morphology::dilate(&edges, Norm::LInf, CLOSING_RADIUS);

    let mut contours: Vec<(f64, Vec<Point<i32>>)> = find_contours::<i32>(&closed)
        .into_iter()
        .map(|c| (contour_area(&c.points), c.points))
        .collect();
    contours.sort_by(|a, b| b.0.total_cmp(&a.0));
    contours.truncate(MAX_CONTOURS);

    let (width, height) = gray.dimensions();
    let mut boxes = Vec::new();

    for (_, points) in &contours {
        let epsilon = APPROX_EPSILON_RATIO * arc_length(points, true);
        let polygon = approximate_closed(points, epsilon);
        if polygon.len() != 4 {
            continue;
        }

        let bounds = undo_closing(bounding_rect(&polygon));
        let aspect = bounds.width as f64 / bounds.height as f64;
        if (MIN_ASPECT..=MAX_ASPECT).contains(&aspect) {
            if let Some(clipped) = bounds.clamp_to(width, height) {
                boxes.push(clipped);
            }
        }
    }

    tracing::debug!(
        contours = contours.len(),
        quadrilaterals = boxes.len(),
        "contour scan finished"
    );

    boxes
}

/// Douglas–Peucker simplification of a closed contour.
///
/// The ring is split at the point farthest from the first point and each half
/// is simplified as an open chain, so the starting corner is always kept.
pub fn approximate_closed(points: &[Point<i32>], epsilon: f64) -> Vec<Point<i32>> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let start = points[0];
    let far = points
        .iter()
        .enumerate()
        .fold((0, 0.0), |best, (i, p)| {
            let d = distance(&start, p);
            if d > best.1 {
                (i, d)
            } else {
                best
            }
        })
        .0;
    if far == 0 {
        return vec![start];
    }

    let mut first = simplify_chain(&points[..=far], epsilon);

    let mut second_chain = points[far..].to_vec();
    second_chain.push(start);
    let second = simplify_chain(&second_chain, epsilon);

    if second.len() > 2 {
        first.extend_from_slice(&second[1..second.len() - 1]);
    }
    first
}

fn simplify_chain(chain: &[Point<i32>], epsilon: f64) -> Vec<Point<i32>> {
    if chain.len() < 3 {
        return chain.to_vec();
    }

    let (a, b) = (chain[0], chain[chain.len() - 1]);
    let (index, max_dist) = chain[1..chain.len() - 1]
        .iter()
        .enumerate()
        .map(|(i, p)| (i + 1, segment_distance(p, &a, &b)))
        .fold((0, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best });

    if max_dist <= epsilon {
        return vec![a, b];
    }

    let mut left = simplify_chain(&chain[..=index], epsilon);
    let right = simplify_chain(&chain[index..], epsilon);
    left.pop();
    left.extend(right);
    left
}

fn distance(a: &Point<i32>, b: &Point<i32>) -> f64 {
    let dx = (a.x - b.x) as f64;
    let dy = (a.y - b.y) as f64;
    (dx * dx + dy * dy).sqrt()
}

/// Distance from `p` to the line through `a` and `b`
fn segment_distance(p: &Point<i32>, a: &Point<i32>, b: &Point<i32>) -> f64 {
    let length = distance(a, b);
    if length == 0.0 {
        return distance(p, a);
    }
    let cross = (b.x - a.x) as f64 * (a.y - p.y) as f64 - (a.x - p.x) as f64 * (b.y - a.y) as f64;
    cross.abs() / length
}

/// Smallest upright rectangle covering every point (inclusive pixel extent)
fn bounding_rect(points: &[Point<i32>]) -> BoundingBox {
    let min_x = points.iter().map(|p| p.x).min().unwrap_or(0).max(0);
    let max_x = points.iter().map(|p| p.x).max().unwrap_or(0).max(0);
    let min_y = points.iter().map(|p| p.y).min().unwrap_or(0).max(0);
    let max_y = points.iter().map(|p| p.y).max().unwrap_or(0).max(0);

    BoundingBox::new(
        min_x as u32,
        min_y as u32,
        (max_x - min_x + 1) as u32,
        (max_y - min_y + 1) as u32,
    )
}

/// Remove the border the edge dilation added around a traced region
fn undo_closing(bounds: BoundingBox) -> BoundingBox {
    let inset = CLOSING_RADIUS as u32;
    if bounds.width <= 2 * inset || bounds.height <= 2 * inset {
        return bounds;
    }
    BoundingBox::new(
        bounds.x + inset,
        bounds.y + inset,
        bounds.width - 2 * inset,
        bounds.height - 2 * inset,
    )
}
