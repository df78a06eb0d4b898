//! Reversible byte transformations applied around physical I/O.

use rand::rngs::OsRng;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::config::ByteHandling;
use crate::types::{Result, TesseraError};

const NONCE_LEN: usize = 8;

/// One reversible stage of a [`BytePipeline`].
pub trait ByteHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;
    /// Applies the transformation before bytes are stored.
    fn transform(&self, bytes: Vec<u8>) -> Result<Vec<u8>>;
    /// Reverts [`ByteHandler::transform`] after bytes are read.
    fn invert(&self, bytes: Vec<u8>) -> Result<Vec<u8>>;
}

/// Snappy block compression.
#[derive(Clone, Copy, Debug, Default)]
pub struct SnappyCompression;

impl ByteHandler for SnappyCompression {
    fn name(&self) -> &'static str {
        "snappy"
    }

    fn transform(&self, bytes: Vec<u8>) -> Result<Vec<u8>> {
        snap::raw::Encoder::new()
            .compress_vec(&bytes)
            .map_err(|e| TesseraError::corruption(format!("snappy compress: {e}")))
    }

    fn invert(&self, bytes: Vec<u8>) -> Result<Vec<u8>> {
        snap::raw::Decoder::new()
            .decompress_vec(&bytes)
            .map_err(|e| TesseraError::corruption(format!("snappy decompress: {e}")))
    }
}

/// ChaCha20 keystream cipher.
///
/// Every transformed buffer is prefixed with a random 64-bit stream id, so
/// equal pages never share keystream.
#[derive(Clone)]
pub struct StreamEncryption {
    key: [u8; 32],
}

impl StreamEncryption {
    /// Cipher over a 256-bit key.
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    fn apply(&self, stream: u64, bytes: &mut [u8]) {
        let mut rng = ChaCha20Rng::from_seed(self.key);
        rng.set_stream(stream);
        let mut keystream = vec![0u8; bytes.len()];
        rng.fill_bytes(&mut keystream);
        for (byte, mask) in bytes.iter_mut().zip(keystream) {
            *byte ^= mask;
        }
    }
}

impl std::fmt::Debug for StreamEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEncryption").finish_non_exhaustive()
    }
}

impl ByteHandler for StreamEncryption {
    fn name(&self) -> &'static str {
        "chacha20"
    }

    fn transform(&self, mut bytes: Vec<u8>) -> Result<Vec<u8>> {
        let stream = OsRng.next_u64();
        self.apply(stream, &mut bytes);
        let mut out = Vec::with_capacity(NONCE_LEN + bytes.len());
        out.extend_from_slice(&stream.to_be_bytes());
        out.extend_from_slice(&bytes);
        Ok(out)
    }

    fn invert(&self, bytes: Vec<u8>) -> Result<Vec<u8>> {
        if bytes.len() < NONCE_LEN {
            return Err(TesseraError::corruption("encrypted frame shorter than its nonce"));
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[..NONCE_LEN]);
        let mut plain = bytes[NONCE_LEN..].to_vec();
        self.apply(u64::from_be_bytes(nonce), &mut plain);
        Ok(plain)
    }
}

/// Ordered chain of handlers: transforms run front to back, inversions
/// back to front.
#[derive(Default)]
pub struct BytePipeline {
    handlers: Vec<Box<dyn ByteHandler>>,
}

impl std::fmt::Debug for BytePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.handlers.iter().map(|h| h.name()).collect();
        f.debug_struct("BytePipeline").field("handlers", &names).finish()
    }
}

impl BytePipeline {
    /// Pipeline that passes bytes through unchanged.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Builds the pipeline for a configured composition.
    pub fn from_handling(handling: ByteHandling, key: Option<[u8; 32]>) -> Result<Self> {
        let encryption = || {
            key.map(StreamEncryption::new)
                .ok_or_else(|| TesseraError::Config("encryption requires encryption_key".into()))
        };
        let pipeline = match handling {
            ByteHandling::None => Self::identity(),
            ByteHandling::Compress => Self::identity().with(SnappyCompression),
            ByteHandling::Encrypt => Self::identity().with(encryption()?),
            ByteHandling::Both => Self::identity().with(SnappyCompression).with(encryption()?),
        };
        Ok(pipeline)
    }

    /// Appends a stage.
    pub fn with(mut self, handler: impl ByteHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True for the identity pipeline.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs every stage's transform in order.
    pub fn transform(&self, bytes: Vec<u8>) -> Result<Vec<u8>> {
        self.handlers
            .iter()
            .try_fold(bytes, |acc, handler| handler.transform(acc))
    }

    /// Runs every stage's inversion in reverse order.
    pub fn invert(&self, bytes: Vec<u8>) -> Result<Vec<u8>> {
        self.handlers
            .iter()
            .rev()
            .try_fold(bytes, |acc, handler| handler.invert(acc))
    }
}
