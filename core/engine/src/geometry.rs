//! Box overlap and distance scoring used by the association step.
//!
//! Pure functions over validated boxes; callers reject malformed boxes
//! before invoking these.

use lookout_protocol::BoundingBox;

const EPSILON: f32 = 1e-5;

/// Intersection-over-union of two boxes, in [0, 1]. Zero when disjoint.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let ax2 = a.x + a.w;
    let ay2 = a.y + a.h;
    let bx2 = b.x + b.w;
    let by2 = b.y + b.h;

    let intersection =
        (ax2.min(bx2) - a.x.max(b.x)).max(0.0) * (ay2.min(by2) - a.y.max(b.y)).max(0.0);

    let union = a.w * a.h + b.w * b.h - intersection;
    if union <= EPSILON {
        return 0.0;
    }

    intersection / union
}

/// Euclidean distance between box centers.
pub fn center_distance(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let (acx, acy) = center(a);
    let (bcx, bcy) = center(b);
    let dx = acx - bcx;
    let dy = acy - bcy;
    (dx * dx + dy * dy).sqrt()
}

fn center(bbox: &BoundingBox) -> (f32, f32) {
    (bbox.x + bbox.w / 2.0, bbox.y + bbox.h / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_identical_boxes() {
        let a = BoundingBox::new(10.0, 10.0, 40.0, 40.0);
        assert!((iou(&a, &a) - 1.0).abs() < 0.001, "IoU of identical boxes should be 1.0");
    }

    #[test]
    fn iou_disjoint_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 20.0, 20.0);
        let b = BoundingBox::new(50.0, 50.0, 20.0, 20.0);
        assert!(iou(&a, &b) < 0.001, "IoU of disjoint boxes should be ~0");
    }

    #[test]
    fn iou_partial_overlap() {
        // Intersection 25*25 = 625, union 2500 + 2500 - 625 = 4375.
        let a = BoundingBox::new(0.0, 0.0, 50.0, 50.0);
        let b = BoundingBox::new(25.0, 25.0, 50.0, 50.0);
        let value = iou(&a, &b);
        assert!((value - 625.0 / 4375.0).abs() < 0.001);
    }

    #[test]
    fn iou_is_symmetric() {
        let a = BoundingBox::new(3.0, 7.0, 30.0, 18.0);
        let b = BoundingBox::new(10.0, 12.0, 25.0, 20.0);
        assert!((iou(&a, &b) - iou(&b, &a)).abs() < f32::EPSILON);
    }

    #[test]
    fn center_distance_zero_for_same_center() {
        let a = BoundingBox::new(0.0, 0.0, 20.0, 20.0);
        let b = BoundingBox::new(5.0, 5.0, 10.0, 10.0);
        assert!(center_distance(&a, &b) < f32::EPSILON);
    }

    #[test]
    fn center_distance_matches_pythagoras() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(3.0, 4.0, 10.0, 10.0);
        assert!((center_distance(&a, &b) - 5.0).abs() < 0.001);
    }
}
