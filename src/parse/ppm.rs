//! Loader for binary `P6` raster images used as displacement maps.
//!
//! Only the fixed layout is understood: the `P6` magic, three whitespace
//! separated integers (width, height, max sample), exactly one separator byte
//! and `width * height * 3` interleaved RGB bytes. Comments and 16-bit samples
//! are rejected.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;

const MAGIC: &str = "P6";
const MAX_TOKEN_LEN: usize = 20;

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("cannot read raster \"{path}\": {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid raster \"{path}\": {reason}")]
    Format { path: PathBuf, reason: String },
}

impl RasterError {
    fn format(path: &Path, reason: impl Into<String>) -> Self {
        Self::Format {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Decoded 8-bit RGB raster.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RasterImage {
    pub width: usize,
    pub height: usize,
    pub max_sample: u16,
    /// Row-major, channel-interleaved R, G, B bytes.
    pub channels: Vec<u8>,
}

impl RasterImage {
    /// The explicit "no image" value: 0x0 with no channel data.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.channels.is_empty()
    }

    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Opens and decodes the raster at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RasterError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| RasterError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let image = decode(&mut BufReader::new(file), path)?;
        log::debug!(
            "loaded raster \"{}\": {}x{} max={}",
            path.display(),
            image.width,
            image.height,
            image.max_sample
        );
        Ok(image)
    }

    /// Decodes a raster from an in-memory or already opened source.
    pub fn from_reader<R: BufRead>(mut reader: R) -> Result<Self, RasterError> {
        decode(&mut reader, Path::new("<memory>"))
    }

    /// Like [`RasterImage::load`], but reports the failure through the log and
    /// hands back [`RasterImage::empty`] so the caller can treat it as "no
    /// displacement image available".
    #[must_use]
    pub fn load_or_empty(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(image) => image,
            Err(err) => {
                log::error!("{err}");
                Self::empty()
            }
        }
    }
}

fn decode<R: BufRead>(reader: &mut R, path: &Path) -> Result<RasterImage, RasterError> {
    let io_err = |source| RasterError::Io {
        path: path.to_path_buf(),
        source,
    };

    let magic = next_token(reader, path)?;
    if magic.as_deref() != Some(MAGIC) {
        return Err(RasterError::format(
            path,
            format!(
                "expected magic \"{MAGIC}\", found \"{}\"",
                magic.unwrap_or_default()
            ),
        ));
    }

    let width = header_integer(reader, path, "width")?;
    let height = header_integer(reader, path, "height")?;
    let max_sample = header_integer(reader, path, "max sample")?;
    if max_sample == 0 || max_sample > 255 {
        return Err(RasterError::format(
            path,
            format!("max sample {max_sample} is not an 8-bit range"),
        ));
    }

    // Exactly one separator byte between the header and the pixel block.
    let mut separator = [0u8; 1];
    reader.read_exact(&mut separator).map_err(|_| {
        RasterError::format(path, "missing separator after header")
    })?;

    let expected = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(3))
        .ok_or_else(|| RasterError::format(path, "image dimensions overflow"))?;

    // Grows with the bytes actually present; the declared size is untrusted.
    let mut channels = Vec::new();
    reader
        .by_ref()
        .take(expected as u64)
        .read_to_end(&mut channels)
        .map_err(io_err)?;
    if channels.len() != expected {
        return Err(RasterError::format(
            path,
            format!(
                "pixel data truncated: expected {expected} bytes, found {}",
                channels.len()
            ),
        ));
    }

    Ok(RasterImage {
        width,
        height,
        max_sample: max_sample as u16,
        channels,
    })
}

fn header_integer<R: BufRead>(
    reader: &mut R,
    path: &Path,
    field: &str,
) -> Result<usize, RasterError> {
    let token = next_token(reader, path)?
        .ok_or_else(|| RasterError::format(path, format!("missing {field}")))?;
    token
        .parse::<usize>()
        .map_err(|_| RasterError::format(path, format!("{field} \"{token}\" is not an integer")))
}

/// Reads the next whitespace-delimited token, leaving the delimiter that ends
/// it unread. Returns `None` at end of input and a format error for tokens
/// longer than [`MAX_TOKEN_LEN`].
fn next_token<R: BufRead>(reader: &mut R, path: &Path) -> Result<Option<String>, RasterError> {
    let io_err = |source| RasterError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut token = Vec::new();
    loop {
        let buf = reader.fill_buf().map_err(io_err)?;
        if buf.is_empty() {
            break;
        }
        let skip = if token.is_empty() {
            buf.iter().take_while(|b| b.is_ascii_whitespace()).count()
        } else {
            0
        };
        let taken = buf[skip..]
            .iter()
            .take_while(|b| !b.is_ascii_whitespace())
            .count();
        token.extend_from_slice(&buf[skip..skip + taken]);
        let done = skip + taken < buf.len();
        reader.consume(skip + taken);

        if token.len() > MAX_TOKEN_LEN {
            return Err(RasterError::format(
                path,
                format!("header token longer than {MAX_TOKEN_LEN} bytes"),
            ));
        }
        if done {
            break;
        }
    }

    if token.is_empty() {
        Ok(None)
    } else {
        Ok(Some(String::from_utf8_lossy(&token).into_owned()))
    }
}
