//! Adaptive batch sizing for the over-fetching scan loop.

/// Smallest selectivity the controller will believe. Keeps the next batch
/// size finite when an entire batch filtered out.
const MIN_RATIO: f64 = 1e-3;

/// Chooses storage batch sizes from the observed selectivity of the previous
/// batch.
///
/// The controller tracks `ratio = matched / returned` of the last batch and
/// sizes the next fetch as `target / ratio`, clamped to `[floor, cap]`. The
/// initial ratio is optimistic (1.0): the first batch fetches exactly the
/// target and later batches widen as low selectivity is observed, so the
/// number of fetches per page stays near-constant once the estimate settles.
#[derive(Debug, Clone)]
pub struct Batcher {
    target: usize,
    floor: usize,
    cap: usize,
    ratio: f64,
}

impl Batcher {
    /// `target` is the number of matches the caller wants (page size plus the
    /// probe row); `floor` and `cap` bound every emitted batch size.
    pub fn new(target: usize, floor: usize, cap: usize) -> Self {
        Self {
            target: target.max(1),
            floor: floor.max(1),
            cap: cap.max(floor.max(1)),
            ratio: 1.0,
        }
    }

    /// Size of the next batch to fetch.
    pub fn next(&self) -> usize {
        let want = (self.target as f64 / self.ratio).ceil() as usize;
        want.clamp(self.floor, self.cap)
    }

    /// Feeds the observed `(matched, returned)` counts of a finished batch
    /// back into the selectivity estimate. A batch that returned nothing
    /// leaves the estimate untouched.
    pub fn update(&mut self, matched: usize, returned: usize) {
        if returned == 0 {
            return;
        }
        self.ratio = (matched as f64 / returned as f64).max(MIN_RATIO);
    }
}
