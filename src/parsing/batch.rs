use super::{Dataset, DatasetError};
use ndarray::{s, Array2, ArrayView2, Axis, CowArray, Ix2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// One step's worth of samples
pub struct Batch<'a> {
    pub inputs: CowArray<'a, f64, Ix2>,
    pub targets: CowArray<'a, f64, Ix2>,
}

impl Batch<'_> {
    pub fn len(&self) -> usize {
        self.inputs.nrows()
    }
}

/// Iterates over a dataset in groups of `batch_size` rows.
///
/// Without an rng the batches are contiguous slices of the dataset. With one,
/// the sample order is permuted once up front and rows are gathered into
/// owned batches. The final batch holds the remainder and may be short.
pub struct BatchIter<'a> {
    dataset: &'a Dataset,
    batch_size: usize,
    order: Option<Vec<usize>>,
    position: usize,
}

impl<'a> BatchIter<'a> {
    pub fn new(dataset: &'a Dataset, batch_size: usize) -> Result<Self, DatasetError> {
        if batch_size == 0 {
            return Err(DatasetError::ZeroBatchSize);
        }

        Ok(BatchIter {
            dataset,
            batch_size,
            order: None,
            position: 0,
        })
    }

    pub fn shuffled(
        dataset: &'a Dataset,
        batch_size: usize,
        rng: &mut StdRng,
    ) -> Result<Self, DatasetError> {
        let mut iter = Self::new(dataset, batch_size)?;
        let mut order: Vec<usize> = (0..dataset.len()).collect();
        order.shuffle(rng);
        iter.order = Some(order);

        Ok(iter)
    }

    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }
}

fn gather(matrix: &Array2<f64>, rows: &[usize]) -> Array2<f64> {
    matrix.select(Axis(0), rows)
}

impl<'a> Iterator for BatchIter<'a> {
    type Item = Batch<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.dataset.len();
        if self.position >= len {
            return None;
        }

        let end = self.position.saturating_add(self.batch_size).min(len);
        let range = self.position..end;
        self.position = end;

        let batch = match &self.order {
            Some(order) => Batch {
                inputs: CowArray::from(gather(&self.dataset.data, &order[range.clone()])),
                targets: CowArray::from(gather(&self.dataset.target, &order[range])),
            },
            None => {
                let dataset: &'a Dataset = self.dataset;
                let inputs: ArrayView2<'a, f64> = dataset.data.slice(s![range.clone(), ..]);
                let targets: ArrayView2<'a, f64> = dataset.target.slice(s![range, ..]);
                Batch {
                    inputs: CowArray::from(inputs),
                    targets: CowArray::from(targets),
                }
            }
        };

        Some(batch)
    }
}
