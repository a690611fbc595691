/// A dense 2D grid stored row-major. It never wraps: the
/// coarse grid covers a bounded window of an infinite plane.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid<T> {
    pub width: usize,
    pub height: usize,
    data: Vec<T>,
}

impl<T: Clone + Default> Grid<T> {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![T::default(); width * height],
        }
    }
}

impl<T: Clone> Grid<T> {
    pub fn new_with(width: usize, height: usize, value: T) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }
}

impl<T> Grid<T> {
    /// Build a grid from row-major data. Returns `None` on a size mismatch.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Option<Self> {
        if data.len() != width * height {
            return None;
        }
        Some(Self { width, height, data })
    }

    fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    pub fn get(&self, x: usize, y: usize) -> &T {
        &self.data[self.index(x, y)]
    }

    pub fn set(&mut self, x: usize, y: usize, value: T) {
        let idx = self.index(x, y);
        self.data[idx] = value;
    }

    /// Bounds-checked lookup with signed coordinates.
    pub fn try_get(&self, x: i64, y: i64) -> Option<&T> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        Some(self.get(x as usize, y as usize))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Iterate over all cells with their coordinates.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &T)> {
        let width = self.width.max(1);
        self.data.iter().enumerate().map(move |(idx, val)| {
            (idx % width, idx / width, val)
        })
    }
}

impl Grid<bool> {
    /// Number of set cells.
    pub fn count_true(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    pub fn fill(&mut self, value: bool) {
        self.data.fill(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_and_bounds() {
        let mut grid = Grid::new_with(4, 3, 0u8);
        grid.set(3, 2, 7);
        assert_eq!(*grid.get(3, 2), 7);
        assert_eq!(grid.try_get(3, 2), Some(&7));
        assert_eq!(grid.try_get(4, 0), None);
        assert_eq!(grid.try_get(-1, 0), None);
        assert_eq!(grid.len(), 12);
    }

    #[test]
    fn test_from_vec_checks_shape() {
        assert!(Grid::from_vec(2, 2, vec![1, 2, 3]).is_none());
        let grid = Grid::from_vec(2, 2, vec![1, 2, 3, 4]).unwrap();
        let coords: Vec<_> = grid.iter().map(|(x, y, v)| (x, y, *v)).collect();
        assert_eq!(coords[3], (1, 1, 4));
    }

    #[test]
    fn test_count_true() {
        let mask = Grid::from_vec(3, 1, vec![false, true, true]).unwrap();
        assert_eq!(mask.count_true(), 2);
    }
}
