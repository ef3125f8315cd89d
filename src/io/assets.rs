//! Raster asset access behind a narrow fetch interface.
//!
//! The index engine and diagnostics never talk to the network directly; they
//! go through [`BandFetcher`] so tile I/O can be retried or mocked.

use crate::types::{Band, BandGrid, SceneRecord, WqError, WqResult};
use ndarray::Array2;
use std::io::Cursor;
use std::time::Duration;
use tiff::decoder::{Decoder, DecodingResult};

/// Fetches a raster grid by raw asset href.
///
/// The gridded-store path fetches by href directly; the scene-aware
/// [`BandFetcher`] wraps this with asset resolution.
pub trait HrefFetcher {
    fn fetch_href(&self, href: &str) -> WqResult<BandGrid>;
}

/// Fetches one spectral band of one scene as a 2-D grid.
///
/// Implementations must be deterministic for a given scene/band pair within
/// a single run; a transient failure is reported as
/// [`WqError::AssetRead`] so callers can exclude that scene rather than
/// aborting the series.
pub trait BandFetcher {
    fn fetch(&self, scene: &SceneRecord, band: Band) -> WqResult<BandGrid>;
}

/// HTTP fetcher for GeoTIFF raster assets.
pub struct HttpBandFetcher {
    http: reqwest::blocking::Client,
}

impl HttpBandFetcher {
    pub fn new(timeout: Duration) -> WqResult<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent("estuarine/0.2")
            .build()
            .map_err(|e| WqError::AssetRead(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }
}

impl HrefFetcher for HttpBandFetcher {
    fn fetch_href(&self, href: &str) -> WqResult<BandGrid> {
        log::debug!("fetching raster asset {}", href);

        let response = self
            .http
            .get(href)
            .send()
            .map_err(|e| WqError::AssetRead(format!("{}: {}", href, e)))?;

        if !response.status().is_success() {
            return Err(WqError::AssetRead(format!(
                "{}: HTTP {}",
                href,
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .map_err(|e| WqError::AssetRead(format!("{}: {}", href, e)))?;

        decode_band_tiff(&bytes)
    }
}

impl BandFetcher for HttpBandFetcher {
    fn fetch(&self, scene: &SceneRecord, band: Band) -> WqResult<BandGrid> {
        let asset = scene.asset(band)?;
        self.fetch_href(&asset.href).map_err(|e| {
            WqError::AssetRead(format!("{} band of scene {}: {}", band, scene.id, e))
        })
    }
}

/// Decode the first image of a GeoTIFF into an `f32` grid.
pub fn decode_band_tiff(bytes: &[u8]) -> WqResult<BandGrid> {
    let mut decoder = Decoder::new(Cursor::new(bytes))?;
    let (width, height) = decoder.dimensions()?;
    let shape = (height as usize, width as usize);

    let data: Vec<f32> = match decoder.read_image()? {
        DecodingResult::U8(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U32(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I16(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::F32(buf) => buf,
        DecodingResult::F64(buf) => buf.into_iter().map(|v| v as f32).collect(),
        _ => {
            return Err(WqError::InvalidFormat(
                "unsupported pixel format in band TIFF".to_string(),
            ))
        }
    };

    Array2::from_shape_vec(shape, data)
        .map_err(|e| WqError::InvalidFormat(format!("band shape mismatch: {}", e)))
}

/// Stride-subsample a grid, keeping every `stride`-th pixel in each axis.
///
/// Diagnostics work at reduced resolution; a stride of 1 is the identity.
pub fn downsample(grid: &BandGrid, stride: usize) -> BandGrid {
    if stride <= 1 {
        return grid.clone();
    }
    let (rows, cols) = grid.dim();
    let out_rows = (rows + stride - 1) / stride;
    let out_cols = (cols + stride - 1) / stride;
    Array2::from_shape_fn((out_rows, out_cols), |(r, c)| grid[[r * stride, c * stride]])
}
