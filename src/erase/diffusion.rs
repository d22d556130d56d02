use super::Patch;

const NEIGHBORS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Fills masked pixels from the outside in, one boundary layer at a time.
/// Each pixel takes the inverse-square weighted mean of the known pixels
/// within `radius`; original background counts double.
pub(super) fn fill(patch: &mut Patch, radius: u32) {
    let original = patch.known.clone();
    let radius = radius.max(1) as i32;
    let (w, h) = (patch.window.w as i32, patch.window.h as i32);

    loop {
        let frontier = (0..h)
            .flat_map(|y| (0..w).map(move |x| (x, y)))
            .filter(|(x, y)| {
                let idx = patch.index(*x as u32, *y as u32);
                !patch.known[idx]
                    && NEIGHBORS.iter().any(|(dx, dy)| {
                        let (nx, ny) = (x + dx, y + dy);
                        nx >= 0 && ny >= 0 && nx < w && ny < h && patch.known[patch.index(nx as u32, ny as u32)]
                    })
            })
            .collect::<Vec<_>>();
        if frontier.is_empty() {
            break;
        }

        let values = frontier
            .iter()
            .map(|(x, y)| sample(patch, &original, *x, *y, radius))
            .collect::<Vec<_>>();
        for ((x, y), value) in frontier.into_iter().zip(values) {
            let idx = patch.index(x as u32, y as u32);
            patch.pixels[idx] = value;
            patch.known[idx] = true;
        }
    }
}

fn sample(patch: &Patch, original: &[bool], x: i32, y: i32, radius: i32) -> [f32; 4] {
    let (w, h) = (patch.window.w as i32, patch.window.h as i32);
    let mut sum = [0f32; 4];
    let mut total = 0f32;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let (nx, ny) = (x + dx, y + dy);
            if (dx == 0 && dy == 0) || nx < 0 || ny < 0 || nx >= w || ny >= h {
                continue;
            }
            let idx = patch.index(nx as u32, ny as u32);
            if !patch.known[idx] {
                continue;
            }
            let mut weight = 1.0 / (dx * dx + dy * dy) as f32;
            if original[idx] {
                weight *= 2.0;
            }
            for (acc, channel) in sum.iter_mut().zip(patch.pixels[idx]) {
                *acc += channel * weight;
            }
            total += weight;
        }
    }
    if total <= 0.0 {
        return patch.pixels[patch.index(x as u32, y as u32)];
    }
    sum.map(|value| value / total)
}
