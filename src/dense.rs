use derive_builder::Builder;
use num_traits::{One, Zero};

#[derive(Debug, Clone, PartialEq, Default, Builder)]
#[builder(default, build_fn(name = "pre_build", validate = "Self::validate"))]
pub struct Mat<T: Default> {
    #[builder(setter(custom))]
    rows: usize,
    #[builder(setter(custom))]
    cols: usize,

    // Row-major element values.
    values: Vec<T>,
}

impl<T> MatBuilder<T>
where
    T: Default,
{
    pub fn ones(&mut self) -> &mut Self
    where
        T: Clone + One,
    {
        let n = self.rows.unwrap_or(0) * self.cols.unwrap_or(0);
        self.values = Some(vec![T::one(); n]);
        self
    }

    pub fn build(&self) -> Result<Mat<T>, MatBuilderError>
    where
        T: Clone + Zero,
    {
        let mut mat = self.pre_build()?;
        if self.values.is_none() {
            mat.values = vec![T::zero(); mat.rows * mat.cols];
        }
        Ok(mat)
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(values) = &self.values {
            let (rows, cols) = (self.rows.unwrap_or(0), self.cols.unwrap_or(0));
            if values.len() != rows * cols {
                return Err(format!(
                    "values length ({}) must be rows * cols ({} * {} = {})",
                    values.len(),
                    rows,
                    cols,
                    rows * cols
                ));
            }
        }
        Ok(())
    }
}

impl<T> Mat<T>
where
    T: Default + Copy,
{
    pub fn new(rows: usize, cols: usize) -> MatBuilder<T>
    where
        T: Clone + Zero,
    {
        MatBuilder {
            rows: Some(rows),
            cols: Some(cols),
            ..Default::default()
        }
    }

    pub fn zeros(rows: usize, cols: usize) -> Self
    where
        T: Zero,
    {
        Self {
            rows,
            cols,
            values: vec![T::zero(); rows * cols],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
    pub fn cols(&self) -> usize {
        self.cols
    }
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn values(&self) -> &Vec<T> {
        &self.values
    }

    #[inline]
    fn ix(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> T {
        assert!(row < self.rows && col < self.cols);
        self.values[self.ix(row, col)]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, v: T) {
        assert!(row < self.rows && col < self.cols);
        let i = self.ix(row, col);
        self.values[i] = v
    }

    pub fn map<U, F>(&self, f: F) -> Mat<U>
    where
        U: Default,
        F: Fn(T) -> U,
    {
        Mat {
            rows: self.rows,
            cols: self.cols,
            values: self.values.iter().map(|&v| f(v)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let m: Mat<f64> = Mat::new(2, 3).build().unwrap();
        assert_eq!(m.shape(), (2, 3));
        assert!(m.values().iter().all(|&v| v == 0.0));

        let m: Mat<f64> = Mat::new(2, 2).ones().build().unwrap();
        assert_eq!(m.values(), &vec![1.0; 4]);

        let bad: Result<Mat<f64>, _> = Mat::new(2, 2).values(vec![1.0; 3]).build();
        assert!(bad.is_err());
    }

    #[test]
    fn test_get_set_map() {
        let mut m: Mat<f64> = Mat::zeros(2, 2);
        m.set(1, 0, 3.0);
        assert_eq!(m.get(1, 0), 3.0);
        assert_eq!(m.get(0, 1), 0.0);

        let doubled = m.map(|v| 2.0 * v);
        assert_eq!(doubled.values(), &vec![0.0, 0.0, 6.0, 0.0]);
    }
}
