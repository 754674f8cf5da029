//! Per-message compression and encoding negotiation.
//!
//! The codecs themselves are small adapters; what matters to the transport is
//! the negotiation contract:
//!
//! - a request names its encoding (`grpc-encoding` for gRPC,
//!   `Content-Encoding` for Twirp). Missing or `identity` means uncompressed;
//!   an unknown name fails with [`Code::Unimplemented`] before any message is
//!   read.
//! - the response reuses a compressed request encoding, or else picks the first
//!   supported name the client accepts (`grpc-accept-encoding` or
//!   `Accept-Encoding`), falling back to identity.

use crate::status::{Code, Error};
use crate::{COMPRESSION_GZIP, COMPRESSION_IDENTITY, errorf};
use core::fmt;
use flate2::Compression;
use flate2::read::{GzDecoder, GzEncoder};
use std::io::{self, Read};
use std::sync::Arc;

/// A named message compressor.
pub trait Compressor: Send + Sync + 'static {
    /// The encoding name used in negotiation headers.
    fn name(&self) -> &str;

    /// Compresses a whole serialized message.
    fn compress(&self, input: &[u8]) -> io::Result<Vec<u8>>;

    /// Inflates a whole message, failing with [`Code::ResourceExhausted`] once
    /// the output grows past `max_bytes` (`0` means unbounded).
    fn decompress(&self, input: &[u8], max_bytes: usize) -> Result<Vec<u8>, Error>;

    fn is_identity(&self) -> bool {
        self.name() == COMPRESSION_IDENTITY
    }
}

/// Passes messages through untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl Compressor for Identity {
    fn name(&self) -> &str {
        COMPRESSION_IDENTITY
    }

    fn compress(&self, input: &[u8]) -> io::Result<Vec<u8>> {
        Ok(input.to_vec())
    }

    fn decompress(&self, input: &[u8], max_bytes: usize) -> Result<Vec<u8>, Error> {
        check_limit(input.len(), max_bytes)?;
        Ok(input.to_vec())
    }
}

/// gzip, the one compressed encoding every gRPC implementation ships.
#[derive(Clone, Copy, Debug)]
pub struct Gzip {
    level: Compression,
}

impl Gzip {
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level),
        }
    }
}

impl Default for Gzip {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl Compressor for Gzip {
    fn name(&self) -> &str {
        COMPRESSION_GZIP
    }

    fn compress(&self, input: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(input.len() / 2);
        GzEncoder::new(input, self.level).read_to_end(&mut out)?;
        Ok(out)
    }

    fn decompress(&self, input: &[u8], max_bytes: usize) -> Result<Vec<u8>, Error> {
        // One byte past the limit is enough to know it was exceeded.
        let limit = if max_bytes == 0 {
            u64::MAX
        } else {
            max_bytes as u64 + 1
        };
        let mut out = Vec::new();
        GzDecoder::new(input)
            .take(limit)
            .read_to_end(&mut out)
            .map_err(|e| errorf!(Code::InvalidArgument, "can't decompress gzip message: {e}"))?;
        check_limit(out.len(), max_bytes)?;
        Ok(out)
    }
}

fn check_limit(len: usize, max_bytes: usize) -> Result<(), Error> {
    if max_bytes > 0 && len > max_bytes {
        return Err(errorf!(
            Code::ResourceExhausted,
            "message size {len} is larger than configured max {max_bytes}"
        ));
    }
    Ok(())
}

/// The compressors a handler understands, in preference order.
///
/// Identity is always supported and never listed.
#[derive(Clone)]
pub struct Compressors {
    available: Vec<Arc<dyn Compressor>>,
}

impl Default for Compressors {
    fn default() -> Self {
        Self {
            available: vec![Arc::new(Gzip::default())],
        }
    }
}

impl fmt::Debug for Compressors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.available.iter().map(|c| c.name()))
            .finish()
    }
}

impl Compressors {
    /// A table supporting identity only.
    pub fn identity_only() -> Self {
        Self {
            available: Vec::new(),
        }
    }

    /// Adds a compressor, replacing any existing one with the same name.
    pub fn insert(&mut self, compressor: Arc<dyn Compressor>) {
        if compressor.is_identity() {
            return;
        }
        match self
            .available
            .iter_mut()
            .find(|c| c.name() == compressor.name())
        {
            Some(existing) => *existing = compressor,
            None => self.available.push(compressor),
        }
    }

    /// Looks up a compressor by encoding name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Compressor>> {
        if name.is_empty() || name == COMPRESSION_IDENTITY {
            return Some(Arc::new(Identity));
        }
        self.available.iter().find(|c| c.name() == name).cloned()
    }

    /// Comma-separated list for `grpc-accept-encoding`.
    pub fn accept_header(&self) -> String {
        let mut names = self.available.iter().map(|c| c.name()).collect::<Vec<_>>();
        names.push(COMPRESSION_IDENTITY);
        names.join(",")
    }

    /// Resolves the request's declared encoding.
    pub fn negotiate_request(&self, encoding: Option<&str>) -> Result<Arc<dyn Compressor>, Error> {
        let name = encoding.map(str::trim).unwrap_or_default();
        self.get(name).ok_or_else(|| {
            errorf!(
                Code::Unimplemented,
                "unknown compression {name:?}: supported encodings are {}",
                self.accept_header()
            )
        })
    }

    /// Chooses the gRPC response encoding: a compressed request encoding is
    /// reused, otherwise the accept list decides.
    pub fn negotiate_response(
        &self,
        request: &Arc<dyn Compressor>,
        accept: Option<&str>,
    ) -> Arc<dyn Compressor> {
        if !request.is_identity() {
            return Arc::clone(request);
        }
        self.negotiate_accept(accept)
    }

    /// Picks the first supported encoding from an accept list such as
    /// `Accept-Encoding: br;q=1.0, gzip;q=0.5`. Quality values are ignored.
    pub fn negotiate_accept(&self, accept: Option<&str>) -> Arc<dyn Compressor> {
        accept
            .into_iter()
            .flat_map(|header| header.split(','))
            .filter_map(|entry| entry.split(';').next())
            .map(str::trim)
            .find_map(|name| self.get(name).filter(|_| !name.is_empty()))
            .unwrap_or_else(|| Arc::new(Identity))
    }
}
