/// Cosine distance under which an incoming record counts as a near duplicate
/// of its nearest neighbour (similarity above 0.95).
pub const DEFAULT_DUPLICATE_DISTANCE: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DuplicatePolicy {
    pub max_distance: f32,
}

impl Default for DuplicatePolicy {
    fn default() -> Self {
        Self {
            max_distance: DEFAULT_DUPLICATE_DISTANCE,
        }
    }
}

impl DuplicatePolicy {
    pub fn new(max_distance: f32) -> Self {
        Self { max_distance }
    }

    /// Strict: a hit exactly at `max_distance` is not a duplicate. NaN never is.
    pub fn is_duplicate_distance(&self, distance: f32) -> bool {
        distance < self.max_distance
    }
}
