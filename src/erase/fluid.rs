use super::Patch;

const TOLERANCE: f32 = 0.05;

/// Smooths the filled pixels towards a harmonic field (each value the mean
/// of its 4-neighbours) by Gauss-Seidel sweeps. The boundary stays fixed.
/// Returns the number of sweeps run.
pub(super) fn relax(patch: &mut Patch, iterations: u32) -> u32 {
    let (w, h) = (patch.window.w, patch.window.h);
    let masked = (0..h)
        .flat_map(|y| (0..w).map(move |x| (x, y)))
        .filter(|(x, y)| patch.masked[patch.index(*x, *y)])
        .collect::<Vec<_>>();

    for sweep in 0..iterations {
        let mut max_delta = 0f32;
        for (x, y) in &masked {
            let (x, y) = (*x, *y);
            let mut sum = [0f32; 4];
            let mut count = 0f32;
            let neighbors = [
                (x.checked_sub(1), Some(y)),
                ((x + 1 < w).then_some(x + 1), Some(y)),
                (Some(x), y.checked_sub(1)),
                (Some(x), (y + 1 < h).then_some(y + 1)),
            ];
            for (nx, ny) in neighbors {
                let (Some(nx), Some(ny)) = (nx, ny) else {
                    continue;
                };
                let value = patch.pixels[patch.index(nx, ny)];
                for (acc, channel) in sum.iter_mut().zip(value) {
                    *acc += channel;
                }
                count += 1.0;
            }
            if count == 0.0 {
                continue;
            }
            let idx = patch.index(x, y);
            let next = sum.map(|value| value / count);
            for (old, new) in patch.pixels[idx].iter().zip(next) {
                max_delta = max_delta.max((old - new).abs());
            }
            patch.pixels[idx] = next;
        }
        if max_delta < TOLERANCE {
            return sweep + 1;
        }
    }
    iterations
}
