use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

use stash_core::error::{Error, Result};

/// XLM-RoBERTa pad token id.
const PAD_ID: u32 = 1;

/// Encode `text`, truncate or pad to `max_len`, and return `[1, max_len]` ids and mask.
pub fn tokenize_on_device(tokenizer: &Tokenizer, text: &str, max_len: usize, device: &Device) -> Result<(Tensor, Tensor)> {
    let enc = tokenizer.encode(text, true).map_err(|e| Error::Backend(format!("Tokenization failed: {e}")))?;
    let mut ids = enc.get_ids().to_vec();
    let mut mask = enc.get_attention_mask().to_vec();
    ids.truncate(max_len);
    mask.truncate(max_len);
    let pad = max_len - ids.len();
    ids.extend(std::iter::repeat(PAD_ID).take(pad));
    mask.extend(std::iter::repeat(0).take(pad));
    let input_ids = Tensor::from_iter(ids, device).and_then(|t| t.reshape((1, max_len))).map_err(Error::backend)?;
    let attention_mask = Tensor::from_iter(mask, device).and_then(|t| t.reshape((1, max_len))).map_err(Error::backend)?;
    Ok((input_ids, attention_mask))
}
