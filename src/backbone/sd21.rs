//! Stable Diffusion 2.1 feature backbone.
//!
//! The pretrained VAE, CLIP text encoder and denoising U-Net are used purely
//! as a frozen feature extractor: images are VAE-encoded to latents,
//! conditioned on a null (empty prompt) text embedding, and run through the
//! U-Net at a constant zero timestep. No multi-step denoising happens; one
//! forward evaluation produces the feature map the detection head consumes.

use crate::core::{FeatureBackbone, SpotterError};
use crate::utils::candle_to_spot_inference;
use candle_core::{DType, Device, Module, Tensor};
use candle_transformers::models::stable_diffusion::{
    self, StableDiffusionConfig, clip::ClipTextTransformer, unet_2d::UNet2DConditionModel,
    vae::AutoEncoderKL,
};
use std::path::Path;
use tokenizers::Tokenizer;
use tracing::debug;

/// Latent scaling factor of the SD 2.1 autoencoder.
const LATENT_SCALE: f64 = 0.18215;

/// Constant timestep for the single U-Net evaluation.
const TIMESTEP: f64 = 0.0;

/// Frozen SD 2.1 backbone: VAE encoder, CLIP text encoder + tokenizer, and
/// conditional U-Net.
pub struct Sd21Backbone {
    vae: AutoEncoderKL,
    unet: UNet2DConditionModel,
    clip: ClipTextTransformer,
    tokenizer: Tokenizer,
    device: Device,
    dtype: DType,
    max_tokens: usize,
    pad_id: u32,
    /// Text embedding of the empty prompt, shape `(1, T, H)`. Computed once
    /// at construction and broadcast per batch.
    null_embedding: Tensor,
}

impl Sd21Backbone {
    /// Loads the backbone components from a model directory.
    ///
    /// Expects `vae.safetensors`, `unet.safetensors`, `clip.safetensors`
    /// and `tokenizer.json` under `model_dir`. A missing or unreadable
    /// artifact is a fatal construction-time error.
    pub fn from_dir(
        model_dir: impl AsRef<Path>,
        resolution: u32,
        device: Device,
    ) -> Result<Self, SpotterError> {
        let model_dir = model_dir.as_ref();
        let vae_path = model_dir.join("vae.safetensors");
        let unet_path = model_dir.join("unet.safetensors");
        let clip_path = model_dir.join("clip.safetensors");
        let tokenizer_path = model_dir.join("tokenizer.json");
        for path in [&vae_path, &unet_path, &clip_path, &tokenizer_path] {
            if !path.exists() {
                return Err(SpotterError::config_error(format!(
                    "SD 2.1 backbone artifact not found: {}",
                    path.display()
                )));
            }
        }

        debug!(dir = %model_dir.display(), resolution, "loading SD 2.1 backbone components");

        let sd_config = StableDiffusionConfig::v2_1(
            None,
            Some(resolution as usize),
            Some(resolution as usize),
        );
        let dtype = device.bf16_default_to_f32();

        let vae = sd_config
            .build_vae(&vae_path, &device, dtype)
            .map_err(|e| candle_to_spot_inference("sd21-vae", "load vae.safetensors", e))?;
        let unet = sd_config
            .build_unet(&unet_path, &device, 4, false, dtype)
            .map_err(|e| candle_to_spot_inference("sd21-unet", "load unet.safetensors", e))?;
        let clip = stable_diffusion::build_clip_transformer(
            &sd_config.clip,
            &clip_path,
            &device,
            dtype,
        )
        .map_err(|e| candle_to_spot_inference("sd21-clip", "load clip.safetensors", e))?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            SpotterError::config_error(format!("failed to load tokenizer.json: {e}"))
        })?;

        let pad_token = sd_config
            .clip
            .pad_with
            .clone()
            .unwrap_or_else(|| "<|endoftext|>".to_string());
        let pad_id = tokenizer
            .get_vocab(true)
            .get(pad_token.as_str())
            .copied()
            .ok_or_else(|| {
                SpotterError::config_error(format!(
                    "tokenizer is missing the pad token '{pad_token}'"
                ))
            })?;

        let mut backbone = Self {
            vae,
            unet,
            clip,
            tokenizer,
            device,
            dtype,
            max_tokens: sd_config.clip.max_position_embeddings,
            pad_id,
            null_embedding: Tensor::zeros((1, 1, 1), dtype, &Device::Cpu)
                .map_err(|e| candle_to_spot_inference("sd21-clip", "placeholder tensor", e))?,
        };
        backbone.null_embedding = backbone.embed_prompt("")?;
        Ok(backbone)
    }

    /// Tokenizes a prompt (padded and truncated to the CLIP context length)
    /// and encodes it with the frozen text encoder.
    ///
    /// Returns a `(1, T, H)` embedding sequence.
    pub fn embed_prompt(&self, prompt: &str) -> Result<Tensor, SpotterError> {
        let mut tokens = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| SpotterError::InvalidInput {
                message: format!("tokenizer encode failed: {e}"),
            })?
            .get_ids()
            .to_vec();
        tokens.truncate(self.max_tokens);
        while tokens.len() < self.max_tokens {
            tokens.push(self.pad_id);
        }

        let tokens = Tensor::new(tokens.as_slice(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(|e| candle_to_spot_inference("sd21-clip", "build token tensor", e))?;
        self.clip
            .forward(&tokens)
            .map_err(|e| candle_to_spot_inference("sd21-clip", "text encoder forward", e))
    }
}

impl FeatureBackbone for Sd21Backbone {
    /// Maps a preprocessed `(B, 3, S, S)` batch to the U-Net feature map.
    fn extract(&self, images: &Tensor) -> Result<Tensor, SpotterError> {
        let (bs, _c, _h, _w) = images
            .dims4()
            .map_err(|e| candle_to_spot_inference("sd21-vae", "image batch must be 4-D", e))?;
        let images = images
            .to_device(&self.device)
            .and_then(|t| t.to_dtype(self.dtype))
            .map_err(|e| candle_to_spot_inference("sd21-vae", "move image batch", e))?;

        // The VAE distribution exposes the reparameterized sample; with the
        // frozen encoder this is the latent representative used throughout.
        let latents = self
            .vae
            .encode(&images)
            .and_then(|dist| dist.sample())
            .map_err(|e| candle_to_spot_inference("sd21-vae", "encode image batch", e))?;
        let latents = (latents * LATENT_SCALE)
            .map_err(|e| candle_to_spot_inference("sd21-vae", "scale latents", e))?;

        let (_, seq, hidden) = self
            .null_embedding
            .dims3()
            .map_err(|e| candle_to_spot_inference("sd21-clip", "null embedding shape", e))?;
        let embeddings = self
            .null_embedding
            .expand((bs, seq, hidden))
            .map_err(|e| candle_to_spot_inference("sd21-clip", "broadcast null embedding", e))?;

        let latent_bs = latents
            .dim(0)
            .map_err(|e| candle_to_spot_inference("sd21-vae", "latent batch dim", e))?;
        if latent_bs != bs {
            return Err(SpotterError::invalid_input(format!(
                "latent batch size {latent_bs} does not match image batch size {bs}"
            )));
        }

        self.unet
            .forward(&latents, TIMESTEP, &embeddings)
            .map_err(|e| candle_to_spot_inference("sd21-unet", "feature forward", e))
    }
}
