//! terrashade CLI - terrain shading for large elevation models

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use terrashade_algorithms::terrain::{
    hillshade_chunked, texture_shading_chunked, toposhade_chunked, tpi_chunked, Denoise,
    HillshadeParams, MassOffset, ShadeStrength, TextureParams, ToposhadeParams, TpiParams,
    WeightMode,
};
use ndarray::Array2;
use terrashade_core::io::{Compression, GeoTiffReader, SampleFormat};
use terrashade_core::{RasterElement, Region, StatisticsAccumulator};
use terrashade_engine::{DemInfo, EngineSettings, Feedback, OutputSpec, RasterBuffer};

/// Target number of pixels per band when scanning a whole DEM
const SCAN_BAND_PIXELS: usize = 4_000_000;

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "terrashade")]
#[command(author, version, about = "Terrain shading for large elevation models", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a DEM
    Info {
        /// Input raster file
        input: PathBuf,
    },
    /// Directional hillshade
    Hillshade {
        /// Input DEM file
        input: PathBuf,
        /// Output file
        output: PathBuf,
        /// Sun azimuth in degrees (0=North, clockwise)
        #[arg(short, long, default_value = "315")]
        azimuth: f64,
        /// Sun altitude in degrees above horizon
        #[arg(short = 'l', long, default_value = "45")]
        altitude: f64,
        /// Exaggeration of slopes across the light
        #[arg(long, default_value = "2.0")]
        lateral: f64,
        /// Exaggeration of slopes along the light
        #[arg(long, default_value = "1.0")]
        longitudinal: f64,
        /// Use the 5x5 kernel
        #[arg(long)]
        smooth: bool,
        /// Add a second light at azimuth + 90
        #[arg(long)]
        bidirectional: bool,
        #[command(flatten)]
        out: OutputArgs,
    },
    /// Topographic Position Index
    Tpi {
        /// Input DEM file
        input: PathBuf,
        /// Output file
        output: PathBuf,
        /// Neighborhood radius in cells
        #[arg(short, long, default_value = "5")]
        radius: usize,
        /// Weighting of the neighbors
        #[arg(short, long, value_enum, default_value = "uniform")]
        mode: WeightArg,
        /// Inner radius left out of the neighborhood
        #[arg(short, long, default_value = "0")]
        exclude: usize,
        /// Centre-of-mass offset in pixels
        #[arg(long)]
        offset: Option<f64>,
        /// Direction of the offset in degrees
        #[arg(long, default_value = "315")]
        offset_azimuth: f64,
        #[arg(short, long, value_enum, default_value = "none")]
        denoise: DenoiseArg,
        #[command(flatten)]
        out: OutputArgs,
    },
    /// TPI shaded toward a light azimuth
    Toposhade {
        /// Input DEM file
        input: PathBuf,
        /// Output file
        output: PathBuf,
        /// Neighborhood radius in cells
        #[arg(short, long, default_value = "3")]
        radius: usize,
        /// Light azimuth in degrees (0=North, clockwise)
        #[arg(short, long, default_value = "315")]
        azimuth: f64,
        #[arg(short, long, value_enum, default_value = "medium")]
        strength: StrengthArg,
        #[arg(short, long, value_enum, default_value = "none")]
        denoise: DenoiseArg,
        #[command(flatten)]
        out: OutputArgs,
    },
    /// Texture shading (fractional Laplacian)
    Texture {
        /// Input DEM file
        input: PathBuf,
        /// Output file
        output: PathBuf,
        /// Laplacian fraction, 0 keeps the elevation
        #[arg(long, default_value = "0.5")]
        alpha: f64,
        #[command(flatten)]
        out: OutputArgs,
    },
}

/// Output and memory options shared by the algorithm commands
#[derive(Args)]
struct OutputArgs {
    /// Target chunk size in megapixels
    #[arg(long, default_value = "5")]
    chunk_mpx: f64,
    /// Outputs above this size (megapixels) are streamed through a scratch file
    #[arg(long, default_value = "100")]
    buffer_mpx: f64,
    /// Directory for the scratch file
    #[arg(long)]
    scratch_dir: Option<PathBuf>,
    /// Sample type of the output
    #[arg(short, long, value_enum, default_value = "float32")]
    format: FormatArg,
    #[arg(short, long, value_enum, default_value = "lzw")]
    compress: CompressArg,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Float32,
    Int16,
    Byte,
}

#[derive(Clone, Copy, ValueEnum)]
enum CompressArg {
    None,
    Lzw,
    Deflate,
}

#[derive(Clone, Copy, ValueEnum)]
enum WeightArg {
    Uniform,
    Distance,
    InverseDistance,
    ElevationDifference,
}

#[derive(Clone, Copy, ValueEnum)]
enum DenoiseArg {
    None,
    Mean,
    Median,
    MeanAndMedian,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrengthArg {
    Weak,
    Medium,
    Strong,
}

impl From<FormatArg> for SampleFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Float32 => SampleFormat::Float32,
            FormatArg::Int16 => SampleFormat::Int16,
            FormatArg::Byte => SampleFormat::Byte,
        }
    }
}

impl From<CompressArg> for Compression {
    fn from(arg: CompressArg) -> Self {
        match arg {
            CompressArg::None => Compression::None,
            CompressArg::Lzw => Compression::Lzw,
            CompressArg::Deflate => Compression::Deflate,
        }
    }
}

impl From<WeightArg> for WeightMode {
    fn from(arg: WeightArg) -> Self {
        match arg {
            WeightArg::Uniform => WeightMode::Uniform,
            WeightArg::Distance => WeightMode::Distance,
            WeightArg::InverseDistance => WeightMode::InverseDistance,
            WeightArg::ElevationDifference => WeightMode::ElevationDifference,
        }
    }
}

impl From<DenoiseArg> for Denoise {
    fn from(arg: DenoiseArg) -> Self {
        match arg {
            DenoiseArg::None => Denoise::None,
            DenoiseArg::Mean => Denoise::Mean,
            DenoiseArg::Median => Denoise::Median,
            DenoiseArg::MeanAndMedian => Denoise::MeanAndMedian,
        }
    }
}

impl From<StrengthArg> for ShadeStrength {
    fn from(arg: StrengthArg) -> Self {
        match arg {
            StrengthArg::Weak => ShadeStrength::Weak,
            StrengthArg::Medium => ShadeStrength::Medium,
            StrengthArg::Strong => ShadeStrength::Strong,
        }
    }
}

impl OutputArgs {
    fn settings(&self) -> Result<EngineSettings> {
        let pixels = |name: &str, mpx: f64| -> Result<usize> {
            anyhow::ensure!(mpx.is_finite() && mpx > 0.0, "--{} must be positive, got {}", name, mpx);
            Ok((mpx * 1e6) as usize)
        };
        Ok(EngineSettings {
            chunk_pixels: pixels("chunk-mpx", self.chunk_mpx)?,
            buffer_pixels: pixels("buffer-mpx", self.buffer_mpx)?,
            scratch_dir: self.scratch_dir.clone(),
            ..Default::default()
        })
    }

    fn spec(&self, path: &Path) -> OutputSpec {
        let mut spec = OutputSpec::geotiff(path, self.format.into());
        spec.options.compression = self.compress.into();
        spec
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")
}

fn spinner(msg: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    Ok(pb)
}

/// Progress bar driven by the algorithm's percent reports
struct BarFeedback(ProgressBar);

impl BarFeedback {
    fn new(msg: &str) -> Result<Self> {
        let pb = ProgressBar::new(100);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}% ({elapsed})")?
                .progress_chars("=> "),
        );
        pb.set_message(msg.to_string());
        Ok(Self(pb))
    }
}

impl Feedback for BarFeedback {
    fn report(&self, percent: f64) {
        self.0.set_position(percent.round() as u64);
    }
}

fn open_dem(path: &Path) -> Result<GeoTiffReader> {
    let reader = GeoTiffReader::open(path, None)
        .with_context(|| format!("Failed to open raster {}", path.display()))?;
    let (rows, cols) = reader.shape();
    info!("Input: {} x {}", cols, rows);
    Ok(reader)
}

/// Open the DEM, run `compute` into a buffer writing `output`, report timing
fn run<F>(name: &str, input: &Path, output: &Path, out: &OutputArgs, compute: F) -> Result<()>
where
    F: FnOnce(&mut RasterBuffer<'_>, &dyn Feedback) -> terrashade_core::Result<()>,
{
    let dem = open_dem(input)?;
    let mut buffer = RasterBuffer::from_source(dem, out.spec(output), out.settings()?)
        .context("Failed to prepare output")?;

    let start = Instant::now();
    let feedback = BarFeedback::new(name)?;
    compute(&mut buffer, &feedback).with_context(|| format!("Failed to calculate {}", name))?;
    feedback.0.finish_and_clear();

    done(name, output, start.elapsed());
    Ok(())
}

fn done(name: &str, path: &Path, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

/// Statistics of the valid cells, read in full-width row bands
fn scan_statistics(dem: &mut GeoTiffReader) -> Result<terrashade_core::RasterStatistics> {
    let (rows, cols) = dem.shape();
    let band_rows = (SCAN_BAND_PIXELS / cols.max(1)).clamp(1, rows.max(1));
    let nodata = dem.nodata();

    let pb = spinner("Scanning raster...")?;
    let mut stats = StatisticsAccumulator::default();
    let mut band = Array2::<f64>::zeros((band_rows, cols));
    for y in (0..rows).step_by(band_rows) {
        let region = Region::new(0, y, cols, band_rows.min(rows - y));
        let mut view = band.slice_mut(ndarray::s![..region.height, ..]);
        dem.read_window(&region, view.view_mut())?;
        for &v in view.iter() {
            if v.is_nodata(nodata) {
                stats.skip();
            } else {
                stats.push(v);
            }
        }
    }
    pb.finish_and_clear();
    Ok(stats.finish())
}

fn print_info(input: &Path) -> Result<()> {
    let mut dem = open_dem(input)?;
    let (info, warnings) = DemInfo::inspect(&dem);
    let (rows, cols) = info.shape();
    let cells = rows * cols;
    let bounds = dem.transform().bounds(cols, rows);
    let stats = scan_statistics(&mut dem)?;

    println!("File: {}", input.display());
    println!("Dimensions: {} x {} ({} cells)", cols, rows, cells);
    println!("Pixel size: {:.4} x {:.4} m", info.pixel_size.0, info.pixel_size.1);
    println!(
        "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
        bounds.0, bounds.1, bounds.2, bounds.3
    );
    if let Some(crs) = dem.crs() {
        println!("CRS: {}", crs);
    }
    if let Some(nodata) = dem.nodata() {
        println!("NoData: {}", nodata);
    }
    println!("\nStatistics:");
    if let Some(min) = stats.min {
        println!("  Min: {:.4}", min);
    }
    if let Some(max) = stats.max {
        println!("  Max: {:.4}", max);
    }
    if let Some(mean) = stats.mean {
        println!("  Mean: {:.4}", mean);
    }
    if let Some(std_dev) = stats.std_dev {
        println!("  Std dev: {:.4}", std_dev);
    }
    println!(
        "  Valid cells: {} ({:.1}%)",
        stats.valid_count,
        100.0 * stats.valid_count as f64 / cells as f64
    );
    for warning in &warnings {
        println!("\nWarning: {}", warning);
    }
    Ok(())
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Info { input } => print_info(&input)?,

        Commands::Hillshade {
            input,
            output,
            azimuth,
            altitude,
            lateral,
            longitudinal,
            smooth,
            bidirectional,
            out,
        } => {
            let params = HillshadeParams {
                azimuth,
                altitude,
                lateral,
                longitudinal,
                smooth,
                bidirectional,
            };
            run("Hillshade", &input, &output, &out, |buffer, feedback| {
                hillshade_chunked(buffer, &params, feedback)
            })?;
        }

        Commands::Tpi {
            input,
            output,
            radius,
            mode,
            exclude,
            offset,
            offset_azimuth,
            denoise,
            out,
        } => {
            let params = TpiParams {
                radius,
                mode: mode.into(),
                exclude,
                offset: offset.map(|distance| MassOffset {
                    distance,
                    azimuth: offset_azimuth,
                }),
                denoise: denoise.into(),
            };
            run("TPI", &input, &output, &out, |buffer, feedback| {
                tpi_chunked(buffer, &params, feedback)
            })?;
        }

        Commands::Toposhade {
            input,
            output,
            radius,
            azimuth,
            strength,
            denoise,
            out,
        } => {
            let params = ToposhadeParams {
                radius,
                azimuth,
                strength: strength.into(),
                denoise: denoise.into(),
            };
            run("Toposhade", &input, &output, &out, |buffer, feedback| {
                toposhade_chunked(buffer, &params, feedback)
            })?;
        }

        Commands::Texture {
            input,
            output,
            alpha,
            out,
        } => {
            let params = TextureParams { alpha };
            run("Texture shading", &input, &output, &out, |buffer, feedback| {
                texture_shading_chunked(buffer, &params, feedback)
            })?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_output_args_to_settings() {
        let cli = Cli::try_parse_from([
            "terrashade",
            "tpi",
            "in.tif",
            "out.tif",
            "--chunk-mpx",
            "0.5",
            "--buffer-mpx",
            "2",
            "--format",
            "int16",
            "--compress",
            "deflate",
            "--offset",
            "2",
        ])
        .unwrap();
        let Commands::Tpi { out, offset, mode, .. } = cli.command else {
            panic!("expected tpi");
        };
        assert_eq!(offset, Some(2.0));
        assert_eq!(WeightMode::from(mode), WeightMode::Uniform);

        let settings = out.settings().unwrap();
        assert_eq!(settings.chunk_pixels, 500_000);
        assert_eq!(settings.buffer_pixels, 2_000_000);

        let spec = out.spec(Path::new("out.tif"));
        assert_eq!(spec.options.sample_format, SampleFormat::Int16);
        assert_eq!(spec.options.compression, Compression::Deflate);
        assert!(spec.options.nodata.is_none());
    }

    #[test]
    fn test_scan_statistics_skips_nodata() {
        use terrashade_core::io::{write_geotiff, GeoTiffOptions};
        use terrashade_core::Raster;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dem.tif");
        let mut dem = Raster::from_array(Array2::from_shape_fn((6, 5), |(r, c)| (r * 5 + c) as f64));
        dem.set(0, 0, -9999.0).unwrap();
        let options = GeoTiffOptions {
            nodata: Some(-9999.0),
            ..Default::default()
        };
        write_geotiff(&dem, &path, &options).unwrap();

        let mut reader = open_dem(&path).unwrap();
        let stats = scan_statistics(&mut reader).unwrap();
        assert_eq!(stats.valid_count, 29);
        assert_eq!(stats.nodata_count, 1);
        assert_eq!(stats.min, Some(1.0));
        assert_eq!(stats.max, Some(29.0));
        assert!((stats.mean.unwrap() - 15.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let cli = Cli::try_parse_from(["terrashade", "texture", "a.tif", "b.tif", "--chunk-mpx", "0"]).unwrap();
        let Commands::Texture { out, .. } = cli.command else {
            panic!("expected texture");
        };
        assert!(out.settings().is_err());
    }
}
