use crate::error::{Error, Result};
use crate::types::Document;

/// A text-to-vector backend with a fixed output width.
///
/// Implementors only provide [`Embedder::embed_batch`]; batching, ordering
/// and shape checks live in the provided [`Embedder::encode`].
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    /// Stable identifier of the model, recorded in caches and run metadata.
    fn model_name(&self) -> &str;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embeds `texts` in groups of `batch_size`; row `i` always belongs to text `i`.
    fn encode(&self, texts: &[String], batch_size: usize) -> Result<Vec<Vec<f32>>> {
        let batch_size = batch_size.max(1);
        let dim = self.dimension();
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size) {
            let rows = self.embed_batch(batch)?;
            if rows.len() != batch.len() {
                return Err(Error::Embedding(format!(
                    "{} returned {} vectors for {} texts",
                    self.model_name(),
                    rows.len(),
                    batch.len()
                )));
            }
            for row in &rows {
                if row.len() != dim {
                    return Err(Error::Embedding(format!(
                        "{} returned a {}-wide vector, expected {}",
                        self.model_name(),
                        row.len(),
                        dim
                    )));
                }
            }
            out.extend(rows);
        }
        Ok(out)
    }

    fn encode_one(&self, text: &str) -> Result<Vec<f32>> {
        self.encode(&[text.to_string()], 1)?.pop().ok_or_else(|| {
            Error::Embedding(format!("{} returned no vector", self.model_name()))
        })
    }
}

impl<E: Embedder + ?Sized> Embedder for std::sync::Arc<E> {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed_batch(texts)
    }
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed_batch(texts)
    }
}

/// Supplies the raw corpus to the indexing pipeline.
pub trait DocumentLoader: Send + Sync {
    fn load(&self) -> Result<Vec<Document>>;
}
