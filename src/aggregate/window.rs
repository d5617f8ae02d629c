//! Count-bounded rolling window over a device's readings

use super::types::{DeviceWindow, WINDOW_CAPACITY};

impl DeviceWindow {
    /// Append a reading at the newest end and trim back to capacity
    pub fn push(&mut self, value: f64) {
        self.values.push(value);
        self.evict_to(WINDOW_CAPACITY);
    }

    /// Append several readings in order, then trim once
    pub fn extend<I: IntoIterator<Item = f64>>(&mut self, values: I) {
        self.values.extend(values);
        self.evict_to(WINDOW_CAPACITY);
    }

    /// Drop readings from the front (oldest first) until at most `capacity` remain
    pub fn evict_to(&mut self, capacity: usize) {
        if self.values.len() > capacity {
            let excess = self.values.len() - capacity;
            self.values.drain(..excess);
        }
    }

    /// Sum of every retained reading, recomputed from scratch
    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window_of(values: &[f64]) -> DeviceWindow {
        DeviceWindow::from_values("UNITTEST1", values.to_vec())
    }

    #[test]
    fn test_push_below_capacity() {
        let mut window = DeviceWindow::empty("UNITTEST1");

        window.push(36.5);
        window.push(40.0);

        assert_eq!(window.values, vec![36.5, 40.0]);
        assert_eq!(window.sum(), 76.5);
    }

    #[test]
    fn test_push_evicts_oldest_when_full() {
        let mut window = window_of(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0]);

        window.push(11.0);

        assert_eq!(window.len(), WINDOW_CAPACITY);
        assert_eq!(window.values.first(), Some(&2.0));
        assert_eq!(window.values.last(), Some(&11.0));
        assert_eq!(window.sum(), 65.0);
    }

    #[test]
    fn test_extend_trims_from_front() {
        let mut window = window_of(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);

        window.extend([9.0, 10.0, 11.0, 12.0]);

        assert_eq!(
            window.values,
            vec![3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0]
        );
    }

    #[test]
    fn test_oversized_stored_window_is_trimmed() {
        // A store may hand back more than capacity (e.g. written by an older version)
        let values: Vec<f64> = (1..=15).map(f64::from).collect();
        let mut window = window_of(&values);

        window.push(16.0);

        assert_eq!(window.len(), WINDOW_CAPACITY);
        assert_eq!(window.values.first(), Some(&7.0));
        assert_eq!(window.values.last(), Some(&16.0));
    }

    #[test]
    fn test_empty_window_sum_is_zero() {
        let window = DeviceWindow::empty("UNITTEST1");
        assert!(window.is_empty());
        assert_eq!(window.sum(), 0.0);
    }
}
