//! Exact nearest-neighbour index over a dense `[N, D]` candle tensor.

use candle_core::{DType, Device, Tensor};
use std::collections::HashMap;
use std::path::Path;

use ragidx_core::{Error, Metric, Result};

const VECTORS_KEY: &str = "vectors";
const DIM_KEY: &str = "dim";
const METRIC_KEY: &str = "metric";

/// Parallel arrays of the nearest rows, closest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchHits {
    pub distances: Vec<f32>,
    pub indices: Vec<usize>,
}

impl SearchHits {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// `(row, distance)` pairs in rank order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.indices
            .iter()
            .copied()
            .zip(self.distances.iter().copied())
    }
}

/// Append-only flat index. The metric is fixed at construction; switching
/// it means building a new index.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dim: usize,
    metric: Metric,
    vectors: Option<Tensor>,
    len: usize,
}

impl VectorIndex {
    pub fn new(dim: usize, metric: Metric) -> Self {
        Self {
            dim,
            metric,
            vectors: None,
            len: 0,
        }
    }

    pub fn from_rows(dim: usize, metric: Metric, rows: &[Vec<f32>]) -> Result<Self> {
        let mut index = Self::new(dim, metric);
        index.add(rows)?;
        Ok(index)
    }

    /// Reads an index written by [`VectorIndex::save`].
    pub fn open(path: &Path) -> Result<Self> {
        let mut index = Self::new(0, Metric::default());
        index.load(path)?;
        Ok(index)
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn total_vectors(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn add(&mut self, rows: &[Vec<f32>]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut flat = Vec::with_capacity(rows.len() * self.dim);
        for row in rows {
            if row.len() != self.dim {
                return Err(Error::DimensionMismatch {
                    expected: self.dim,
                    actual: row.len(),
                });
            }
            flat.extend_from_slice(row);
        }
        let added = Tensor::from_vec(flat, (rows.len(), self.dim), &Device::Cpu)
            .map_err(Error::index)?;
        let merged = match self.vectors.take() {
            Some(existing) => Tensor::cat(&[&existing, &added], 0).map_err(Error::index)?,
            None => added,
        };
        self.vectors = Some(merged);
        self.len += rows.len();
        Ok(())
    }

    /// Returns the `min(k, total_vectors)` closest rows. Ties keep insertion order.
    ///
    /// Inner-product rows are ranked by the raw dot product, so vectors that
    /// are not unit-length still order correctly; only the reported distance
    /// is clamped at zero.
    pub fn search(&self, query: &[f32], k: usize) -> Result<SearchHits> {
        if query.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        let Some(vectors) = &self.vectors else {
            return Ok(SearchHits::default());
        };
        if k == 0 {
            return Ok(SearchHits::default());
        }

        let keys = self.rank_keys(vectors, query).map_err(Error::index)?;
        let mut order: Vec<usize> = (0..keys.len()).collect();
        order.sort_by(|&a, &b| keys[a].total_cmp(&keys[b]).then(a.cmp(&b)));
        order.truncate(k.min(self.len));

        let distances = order
            .iter()
            .map(|&i| self.distance_from_key(keys[i]))
            .collect();
        Ok(SearchHits {
            distances,
            indices: order,
        })
    }

    /// Per-row sort keys, smaller is closer: the squared L2 distance, or
    /// `1 - <q, v>` left unclamped.
    fn rank_keys(&self, vectors: &Tensor, query: &[f32]) -> candle_core::Result<Vec<f32>> {
        let q = Tensor::from_slice(query, (1, self.dim), vectors.device())?;
        match self.metric {
            Metric::L2 => vectors.broadcast_sub(&q)?.sqr()?.sum(1)?.to_vec1::<f32>(),
            Metric::InnerProduct => {
                let ip = vectors.broadcast_mul(&q)?.sum(1)?.to_vec1::<f32>()?;
                Ok(ip.into_iter().map(|s| 1.0 - s).collect())
            }
        }
    }

    fn distance_from_key(&self, key: f32) -> f32 {
        match self.metric {
            Metric::L2 => key,
            Metric::InnerProduct => key.max(0.0),
        }
    }

    /// Copies all rows back out, in insertion order.
    pub fn rows(&self) -> Result<Vec<Vec<f32>>> {
        match &self.vectors {
            Some(v) => v.to_vec2::<f32>().map_err(Error::index),
            None => Ok(Vec::new()),
        }
    }

    /// Writes the matrix plus `dim`/`metric` header tensors as safetensors.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dim = Tensor::new(&[self.dim as u32], &Device::Cpu)
            .map_err(Error::index)?;
        let metric = Tensor::new(&[metric_code(self.metric)], &Device::Cpu)
            .map_err(Error::index)?;
        let mut tensors: HashMap<String, Tensor> = HashMap::new();
        tensors.insert(DIM_KEY.to_string(), dim);
        tensors.insert(METRIC_KEY.to_string(), metric);
        if let Some(v) = &self.vectors {
            tensors.insert(VECTORS_KEY.to_string(), v.clone());
        }
        candle_core::safetensors::save(&tensors, path)
            .map_err(|e| Error::index(format!("saving {}: {}", path.display(), e)))
    }

    /// Replaces in-memory state with the file's; dimension and metric come
    /// from the file, not from `self`.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(Error::MissingPair(format!(
                "vector index {} not found",
                path.display()
            )));
        }
        let tensors = candle_core::safetensors::load(path, &Device::Cpu)
            .map_err(|e| Error::index(format!("reading {}: {}", path.display(), e)))?;

        let dim = header_value::<u32>(&tensors, DIM_KEY)? as usize;
        let metric = metric_from_code(header_value::<u8>(&tensors, METRIC_KEY)?)?;
        let (vectors, len) = match tensors.get(VECTORS_KEY) {
            Some(v) => {
                let v = v.to_dtype(DType::F32).map_err(Error::index)?;
                let (rows, cols) = v.dims2().map_err(Error::index)?;
                if cols != dim {
                    return Err(Error::DimensionMismatch {
                        expected: dim,
                        actual: cols,
                    });
                }
                (Some(v), rows)
            }
            None => (None, 0),
        };

        self.dim = dim;
        self.metric = metric;
        self.vectors = vectors;
        self.len = len;
        Ok(())
    }
}

fn header_value<T: candle_core::WithDType>(
    tensors: &HashMap<String, Tensor>,
    key: &str,
) -> Result<T> {
    let t = tensors
        .get(key)
        .ok_or_else(|| Error::index(format!("index file has no '{}' entry", key)))?;
    t.to_vec1::<T>()
        .map_err(Error::index)?
        .first()
        .copied()
        .ok_or_else(|| Error::index(format!("index entry '{}' is empty", key)))
}

fn metric_code(metric: Metric) -> u8 {
    match metric {
        Metric::L2 => 0,
        Metric::InnerProduct => 1,
    }
}

fn metric_from_code(code: u8) -> Result<Metric> {
    match code {
        0 => Ok(Metric::L2),
        1 => Ok(Metric::InnerProduct),
        other => Err(Error::index(format!("unknown metric code {}", other))),
    }
}
