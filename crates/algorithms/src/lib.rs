//! # terrashade algorithms
//!
//! Terrain shading on top of the chunked raster engine.
//!
//! ## Available algorithms
//!
//! - **tpi**: Topographic Position Index with distance weighting, exclusion
//!   and centre-of-mass offset
//! - **toposhade**: TPI with the neighborhood pulled toward the light
//! - **hillshade**: directional illumination for any azimuth
//! - **texture shading**: fractional Laplacian of the elevation
//!
//! Every algorithm has an in-memory entry point taking a [`Raster`] and a
//! `*_chunked` variant writing into an engine [`RasterBuffer`].
//!
//! [`Raster`]: terrashade_core::Raster
//! [`RasterBuffer`]: terrashade_engine::RasterBuffer

pub(crate) mod maybe_rayon;
pub mod terrain;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::terrain::{
        hillshade, hillshade_chunked, texture_shading, texture_shading_chunked, toposhade,
        toposhade_chunked, tpi, tpi_chunked, Denoise, Hillshade, HillshadeParams, MassOffset,
        ShadeStrength, TextureParams, TextureShading, Toposhade, ToposhadeParams, Tpi, TpiParams,
        WeightMode,
    };
    pub use terrashade_core::prelude::*;
    pub use terrashade_engine::{EngineSettings, Feedback, OutputSpec, RasterBuffer, Silent};
}
