use anyhow::{ensure, Result};
use candle_core::{DType, Tensor};

/// Mean of the unmasked token states followed by L2 normalisation.
///
/// `hidden` is `[B, T, H]`, `attention_mask` is `[B, T]` with 1 for real
/// tokens; returns `[B, H]`.
pub fn masked_mean_l2(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let (batch, tokens, hidden_dim) = hidden.dims3()?;
    ensure!(
        attention_mask.dims() == [batch, tokens],
        "attention mask shape {:?} does not match hidden states [{}, {}]",
        attention_mask.dims(),
        batch,
        tokens
    );

    let mask = attention_mask.to_device(hidden.device())?.to_dtype(hidden.dtype())?;
    let weights = mask.unsqueeze(2)?.broadcast_as(hidden.shape())?;
    let summed = (hidden * &weights)?.sum(1)?;
    // an all-padding row would divide by zero; count at least one token
    let counts = mask.sum_keepdim(1)?.maximum(1f64)?;
    let mean = summed.broadcast_div(&counts)?;

    let eps = match hidden.dtype() {
        DType::F16 | DType::BF16 => 1e-6,
        _ => 1e-12,
    };
    let norm = (mean.sqr()?.sum_keepdim(1)?.sqrt()? + eps)?;
    let pooled = mean.broadcast_div(&norm)?;
    ensure!(
        pooled.dims() == [batch, hidden_dim],
        "unexpected pooled shape {:?}",
        pooled.dims()
    );
    Ok(pooled)
}
