//! Position index: nearest / insertion search over sorted positions.
//!
//! Tick positions, tempo anchors, beat grids and segment starts are all kept
//! as sorted slices, and every lookup in the pipeline goes through here.

/// Index of the last element `<= item`.
///
/// Runs of equal elements resolve to the last member of the run. An `item`
/// smaller than every element (or an empty slice) yields 0, so callers that
/// need to distinguish "before the start" must compare against `sorted[0]`.
pub fn at_or_before<T: PartialOrd>(sorted: &[T], item: &T) -> usize {
    sorted.partition_point(|x| x <= item).saturating_sub(1)
}

/// Index of the first element `>= item`, or `sorted.len()` if none.
pub fn at_or_after<T: PartialOrd>(sorted: &[T], item: &T) -> usize {
    sorted.partition_point(|x| x < item)
}

/// Insertion point that keeps `sorted` ordered, placing `item` after any
/// equal elements.
pub fn insertion_index<T: PartialOrd>(sorted: &[T], item: &T) -> usize {
    sorted.partition_point(|x| x <= item)
}

/// Linear interpolation of `x` on the line through `(x0, y0)` and `(x1, y1)`.
/// A vertical line returns `y0`.
pub fn interpolate(x: f64, x0: f64, y0: f64, x1: f64, y1: f64) -> f64 {
    if x1 == x0 {
        return y0;
    }
    y0 + (x - x0) / (x1 - x0) * (y1 - y0)
}
