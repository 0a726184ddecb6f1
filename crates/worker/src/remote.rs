//! HTTP clients for the remote collaborator services.
//!
//! The caption and VAE services accept JSON requests and return opaque
//! serialized payloads; this module only moves bytes. Requests are
//! synchronous — the worker has no intra-process concurrency and blocks on
//! the collaborator like it blocks on a collective.

use std::time::Duration;

use serde::Serialize;
use stepvideo_core::remote::{
    CaptionEmbedding, CaptionEncoder, DecodedFrames, RemoteError, VaeDecoder,
};

/// Port the collaborator services listen on when the address omits one.
pub const DEFAULT_SERVICE_PORT: u16 = 8080;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Normalize a configured address into a full endpoint URL.
///
/// Accepts a bare host (`127.0.0.1`), host:port, or a full URL; appends
/// the service path.
pub fn service_url(base: &str, path: &str) -> String {
    let with_scheme = if base.contains("://") {
        base.trim_end_matches('/').to_string()
    } else if base.contains(':') {
        format!("http://{base}")
    } else {
        format!("http://{base}:{DEFAULT_SERVICE_PORT}")
    };
    format!("{with_scheme}/{path}")
}

fn build_client() -> Result<reqwest::blocking::Client, RemoteError> {
    reqwest::blocking::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| RemoteError::Transport(e.to_string()))
}

fn post_json<T: Serialize>(
    client: &reqwest::blocking::Client,
    url: &str,
    body: &T,
) -> Result<Vec<u8>, RemoteError> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .map_err(|e| RemoteError::Transport(e.to_string()))?;

    if !response.status().is_success() {
        return Err(RemoteError::Protocol(format!(
            "{url} returned {}",
            response.status()
        )));
    }

    response
        .bytes()
        .map(|b| b.to_vec())
        .map_err(|e| RemoteError::Transport(e.to_string()))
}

#[derive(Serialize)]
struct CaptionRequest<'a> {
    prompts: &'a [String],
}

#[derive(Serialize)]
struct VaeRequest<'a> {
    #[serde(with = "serde_bytes_b64")]
    latents: &'a [u8],
}

// Latents travel base64-encoded inside the JSON envelope.
mod serde_bytes_b64 {
    use serde::Serializer;

    const TABLE: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let mut out = String::with_capacity(bytes.len().div_ceil(3) * 4);
        for chunk in bytes.chunks(3) {
            let b = [
                chunk[0],
                chunk.get(1).copied().unwrap_or(0),
                chunk.get(2).copied().unwrap_or(0),
            ];
            let n = u32::from(b[0]) << 16 | u32::from(b[1]) << 8 | u32::from(b[2]);
            out.push(TABLE[(n >> 18) as usize & 63] as char);
            out.push(TABLE[(n >> 12) as usize & 63] as char);
            out.push(if chunk.len() > 1 {
                TABLE[(n >> 6) as usize & 63] as char
            } else {
                '='
            });
            out.push(if chunk.len() > 2 {
                TABLE[n as usize & 63] as char
            } else {
                '='
            });
        }
        serializer.serialize_str(&out)
    }
}

/// Blocking client for the caption/text-encoding service.
pub struct HttpCaptionEncoder {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpCaptionEncoder {
    pub fn new(base: &str) -> Result<Self, RemoteError> {
        Ok(Self {
            client: build_client()?,
            url: service_url(base, "caption-api"),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl CaptionEncoder for HttpCaptionEncoder {
    fn encode_captions(&self, prompts: &[String]) -> Result<CaptionEmbedding, RemoteError> {
        let payload = post_json(&self.client, &self.url, &CaptionRequest { prompts })?;
        Ok(CaptionEmbedding { payload })
    }
}

/// Blocking client for the variational-decoder service.
pub struct HttpVaeDecoder {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpVaeDecoder {
    pub fn new(base: &str) -> Result<Self, RemoteError> {
        Ok(Self {
            client: build_client()?,
            url: service_url(base, "vae-api"),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl VaeDecoder for HttpVaeDecoder {
    fn decode_latents(&self, latents: &[u8]) -> Result<DecodedFrames, RemoteError> {
        let payload = post_json(&self.client, &self.url, &VaeRequest { latents })?;
        Ok(DecodedFrames { payload })
    }
}
