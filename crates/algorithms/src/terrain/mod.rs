//! Terrain shading algorithms
//!
//! Algorithms for rendering Digital Elevation Models (DEMs):
//! - TPI: elevation relative to the neighborhood mean
//! - Toposhade: TPI with a displaced centre of mass
//! - Hillshade: illumination from an arbitrary azimuth
//! - Texture shading: fractional Laplacian

mod denoise;
mod gradient;
mod hillshade;
mod neighborhood;
mod texture;
mod toposhade;
mod tpi;

pub use denoise::{median_filter, Denoise};
pub use gradient::DirectionalGradientKernel;
pub use hillshade::{hillshade, hillshade_chunked, illumination, Hillshade, HillshadeParams};
pub use neighborhood::{
    mass_split, mirrored_deltas, visits_matrix, Delta, NeighborhoodAccumulator, PairWeight,
    PixelCorrection, RadialWeight, ScanLine, WeightMode,
};
pub use texture::{
    next_smooth, texture_shading, texture_shading_chunked, SeparableFractionalFilter,
    TextureParams, TextureShading,
};
pub use toposhade::{toposhade, toposhade_chunked, ShadeStrength, Toposhade, ToposhadeParams};
pub use tpi::{tpi, tpi_chunked, LineLimits, MassOffset, Tpi, TpiParams};
