//! Remote collaborator boundary.
//!
//! The variational decoder and the caption (text-encoding) model run as
//! separate services reached over the network. This core treats them as
//! opaque request/response endpoints: the worker sends prompts or latents
//! and receives serialized payloads whose numerics are decoded by the
//! execution layer. Protocol bodies are out of scope here.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Addresses of the collaborator services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEndpoints {
    /// Variational-decoder service URL.
    pub vae_url: String,
    /// Caption/text-encoding service URL.
    pub caption_url: String,
}

impl Default for RemoteEndpoints {
    fn default() -> Self {
        Self {
            vae_url: "127.0.0.1".to_string(),
            caption_url: "127.0.0.1".to_string(),
        }
    }
}

/// Errors talking to a collaborator service.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("service returned an unusable response: {0}")]
    Protocol(String),
}

/// Opaque serialized embedding payload returned by the caption service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionEmbedding {
    pub payload: Vec<u8>,
}

/// Opaque serialized frame payload returned by the decoder service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedFrames {
    pub payload: Vec<u8>,
}

/// Text-encoding collaborator.
pub trait CaptionEncoder: Send + Sync {
    /// Encode an ordered set of prompts into model embeddings.
    fn encode_captions(&self, prompts: &[String]) -> Result<CaptionEmbedding, RemoteError>;
}

/// Variational-decoder collaborator.
pub trait VaeDecoder: Send + Sync {
    /// Decode denoised latents into video frames.
    fn decode_latents(&self, latents: &[u8]) -> Result<DecodedFrames, RemoteError>;
}
