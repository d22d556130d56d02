use crate::unit::BBoxPx;

fn intersection(a: &BBoxPx, b: &BBoxPx) -> Option<(u32, u32)> {
    let ix1 = a.x.max(b.x);
    let iy1 = a.y.max(b.y);
    let ix2 = a.right().min(b.right());
    let iy2 = a.bottom().min(b.bottom());
    if ix2 <= ix1 || iy2 <= iy1 {
        return None;
    }
    Some((ix2 - ix1, iy2 - iy1))
}

pub(super) fn iou(a: &BBoxPx, b: &BBoxPx) -> f32 {
    let Some((w, h)) = intersection(a, b) else {
        return 0.0;
    };
    let inter = w as f32 * h as f32;
    inter / (a.area() as f32 + b.area() as f32 - inter).max(1.0)
}

pub(super) fn intersects(a: &BBoxPx, b: &BBoxPx) -> bool {
    intersection(a, b).is_some()
}

pub(super) fn horizontal_overlap_ratio(a: &BBoxPx, b: &BBoxPx) -> f32 {
    let ix1 = a.x.max(b.x);
    let ix2 = a.right().min(b.right());
    if ix2 <= ix1 {
        return 0.0;
    }
    (ix2 - ix1) as f32 / (a.w.min(b.w) as f32).max(1.0)
}

pub(super) fn vertical_overlap_ratio(a: &BBoxPx, b: &BBoxPx) -> f32 {
    let iy1 = a.y.max(b.y);
    let iy2 = a.bottom().min(b.bottom());
    if iy2 <= iy1 {
        return 0.0;
    }
    (iy2 - iy1) as f32 / (a.h.min(b.h) as f32).max(1.0)
}

pub(super) fn union_bbox(a: &BBoxPx, b: &BBoxPx) -> BBoxPx {
    let x1 = a.x.min(b.x);
    let y1 = a.y.min(b.y);
    let x2 = a.right().max(b.right());
    let y2 = a.bottom().max(b.bottom());
    BBoxPx::new(x1, y1, x2 - x1, y2 - y1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = BBoxPx::new(0, 0, 10, 10);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&a, &BBoxPx::new(20, 20, 5, 5)), 0.0);
    }

    #[test]
    fn touching_boxes_do_not_intersect() {
        let a = BBoxPx::new(0, 0, 10, 10);
        assert!(!intersects(&a, &BBoxPx::new(10, 0, 10, 10)));
        assert!(intersects(&a, &BBoxPx::new(9, 9, 10, 10)));
        assert_eq!(union_bbox(&a, &BBoxPx::new(10, 5, 10, 10)), BBoxPx::new(0, 0, 20, 15));
    }
}
