//! Native GeoTIFF reading/writing on top of the `tiff` crate.
//!
//! Single-band only. The reader decodes whole images or, through
//! [`GeoTiffReader`], only the strips and tiles under a window. The writer
//! streams strips from a row callback so that outputs larger than memory
//! can be produced from a scratch store.

use super::{Compression, GeoTiffOptions, SampleFormat};
use crate::crs::{GeoKeys, CRS};
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster, RasterElement, Region};
use ndarray::{aview1, s, ArrayViewMut2};
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::{ColorType, Gray32Float, Gray8, GrayI16};
use tiff::encoder::compression::{Compression as TiffCompression, Deflate, Lzw, Uncompressed};
use tiff::encoder::{TiffEncoder, TiffValue};
use tiff::tags::Tag;
use tiff::ColorType as DecodedColor;

const TAG_PIXEL_SCALE: u16 = 33550;
const TAG_TIEPOINT: u16 = 33922;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GEO_DOUBLE_PARAMS: u16 = 34736;
const TAG_GEO_ASCII_PARAMS: u16 = 34737;
const TAG_GDAL_NODATA: u16 = 42113;

fn tag(code: u16) -> Tag {
    // Known GeoTIFF tags decode to named variants, so lookups must use the same mapping
    Tag::from_u16_exhaustive(code)
}

fn tiff_error(context: &'static str) -> impl Fn(tiff::TiffError) -> Error {
    move |e| Error::Other(format!("{}: {}", context, e))
}

/// Read band `band` (1-based, only band 1 exists) of a single-band GeoTIFF
///
/// The geotransform, the GDAL no-data value and the geokey directory are
/// read when present.
pub fn read_geotiff<T, P>(path: P, band: Option<usize>) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    check_band(band)?;
    let file = File::open(path.as_ref())?;
    decode_geotiff(BufReader::new(file))
}

fn check_band(band: Option<usize>) -> Result<()> {
    match band.filter(|&b| b != 1) {
        Some(b) => Err(Error::InvalidParameter {
            name: "band",
            value: b.to_string(),
            reason: "only single-band rasters are supported".into(),
        }),
        None => Ok(()),
    }
}

fn decode_geotiff<T, R>(reader: R) -> Result<Raster<T>>
where
    T: RasterElement,
    R: Read + Seek,
{
    let (mut decoder, rows, cols) = open_decoder(reader)?;
    let image = decoder
        .read_image()
        .map_err(tiff_error("Cannot read image data"))?;
    let mut raster = Raster::from_vec(decoded_samples(image)?, rows, cols)?;

    let tags = GeoTags::read(&mut decoder);
    if let Some(transform) = tags.transform {
        raster.set_transform(transform);
    }
    raster.set_nodata(tags.nodata.and_then(num_traits::cast::<f64, T>));
    raster.set_crs(tags.crs);
    Ok(raster)
}

/// Decoder positioned on a single-band image, with its (rows, cols)
fn open_decoder<R: Read + Seek>(reader: R) -> Result<(Decoder<R>, usize, usize)> {
    let mut decoder = Decoder::new(reader).map_err(tiff_error("TIFF decode error"))?;

    match decoder.colortype().map_err(tiff_error("Cannot read color type"))? {
        DecodedColor::Gray(_) => {}
        other => {
            return Err(Error::UnsupportedDataType(format!(
                "expected a single-band raster, found {:?}",
                other
            )))
        }
    }

    let (width, height) = decoder
        .dimensions()
        .map_err(tiff_error("Cannot read dimensions"))?;
    Ok((decoder, height as usize, width as usize))
}

fn decoded_samples<T: RasterElement>(result: DecodingResult) -> Result<Vec<T>> {
    fn cast_all<S: Copy + num_traits::NumCast, T: RasterElement>(buf: Vec<S>) -> Vec<T> {
        buf.into_iter()
            .map(|v| num_traits::cast(v).unwrap_or_else(T::default_nodata))
            .collect()
    }

    Ok(match result {
        DecodingResult::F32(buf) => cast_all(buf),
        DecodingResult::F64(buf) => cast_all(buf),
        DecodingResult::U8(buf) => cast_all(buf),
        DecodingResult::U16(buf) => cast_all(buf),
        DecodingResult::U32(buf) => cast_all(buf),
        DecodingResult::I8(buf) => cast_all(buf),
        DecodingResult::I16(buf) => cast_all(buf),
        DecodingResult::I32(buf) => cast_all(buf),
        _ => {
            return Err(Error::UnsupportedDataType(
                "Unsupported TIFF pixel format".to_string(),
            ))
        }
    })
}

/// Georeferencing carried in GeoTIFF tags
#[derive(Debug, Clone, Default)]
struct GeoTags {
    transform: Option<GeoTransform>,
    nodata: Option<f64>,
    crs: Option<CRS>,
}

impl GeoTags {
    fn read<R: Read + Seek>(decoder: &mut Decoder<R>) -> Self {
        let nodata = decoder
            .get_tag_ascii_string(tag(TAG_GDAL_NODATA))
            .ok()
            .and_then(|s| s.trim_matches(|c: char| c == '\0' || c.is_whitespace()).parse::<f64>().ok());

        let crs = decoder
            .get_tag_u16_vec(tag(TAG_GEO_KEY_DIRECTORY))
            .ok()
            .map(|directory| {
                CRS::from_geokeys(GeoKeys {
                    directory,
                    doubles: decoder
                        .get_tag_f64_vec(tag(TAG_GEO_DOUBLE_PARAMS))
                        .unwrap_or_default(),
                    ascii: decoder.get_tag_ascii_string(tag(TAG_GEO_ASCII_PARAMS)).ok(),
                })
            });

        Self {
            transform: read_geotransform(decoder),
            nodata,
            crs,
        }
    }
}

/// ModelPixelScaleTag + ModelTiepointTag into a north-up transform
fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<GeoTransform> {
    let scale = decoder.get_tag_f64_vec(tag(TAG_PIXEL_SCALE)).ok()?;
    let tiepoint = decoder.get_tag_f64_vec(tag(TAG_TIEPOINT)).ok()?;

    if scale.len() < 2 || tiepoint.len() < 6 {
        return None;
    }
    // tiepoint: [I, J, K, X, Y, Z], scale: [ScaleX, ScaleY, ScaleZ]
    let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
    let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
    Some(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]))
}

/// Windowed reader over band 1 of a GeoTIFF.
///
/// Only the strips or tiles that overlap a requested window are decoded.
/// Decoded chunks are kept in a first-in first-out cache bounded by a
/// pixel budget, so neighbouring windows that share a strip decode it
/// once. Column windows over a striped file touch every strip; with a
/// budget smaller than the image, strips are decoded again for each
/// window.
pub struct GeoTiffReader {
    decoder: Decoder<BufReader<File>>,
    rows: usize,
    cols: usize,
    /// (rows, cols) of a full strip or tile
    chunk_shape: (usize, usize),
    chunks_across: usize,
    transform: GeoTransform,
    crs: Option<CRS>,
    nodata: Option<f64>,
    cache: HashMap<u32, Vec<f64>>,
    cache_order: VecDeque<u32>,
    cache_pixels: usize,
    cache_limit: usize,
}

impl GeoTiffReader {
    /// Decoded pixels kept by default, 256 MB of samples
    pub const DEFAULT_CACHE_PIXELS: usize = 32 * 1024 * 1024;

    /// Open band `band` (1-based, only band 1 exists) and read its
    /// georeferencing. No pixel data is decoded yet.
    pub fn open<P: AsRef<Path>>(path: P, band: Option<usize>) -> Result<Self> {
        check_band(band)?;
        let file = File::open(path.as_ref())?;
        let (mut decoder, rows, cols) = open_decoder(BufReader::new(file))?;

        let (chunk_width, chunk_height) = decoder.chunk_dimensions();
        if chunk_width == 0 || chunk_height == 0 {
            return Err(Error::UnsupportedDataType(format!(
                "TIFF chunks of {}x{} pixels",
                chunk_width, chunk_height
            )));
        }
        let chunk_shape = (chunk_height as usize, chunk_width as usize);

        let tags = GeoTags::read(&mut decoder);
        Ok(Self {
            decoder,
            rows,
            cols,
            chunk_shape,
            chunks_across: (cols + chunk_shape.1 - 1) / chunk_shape.1,
            transform: tags.transform.unwrap_or_default(),
            crs: tags.crs,
            nodata: tags.nodata,
            cache: HashMap::new(),
            cache_order: VecDeque::new(),
            cache_pixels: 0,
            cache_limit: Self::DEFAULT_CACHE_PIXELS,
        })
    }

    /// Bound the decoded-chunk cache to about `pixels` samples. At least
    /// one chunk is always kept.
    pub fn with_cache_pixels(mut self, pixels: usize) -> Self {
        self.cache_limit = pixels;
        self
    }

    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// (rows, cols) of one strip or tile
    pub fn chunk_shape(&self) -> (usize, usize) {
        self.chunk_shape
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn crs(&self) -> Option<&CRS> {
        self.crs.as_ref()
    }

    /// Value of the GDAL no-data tag
    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    /// Decode the samples of `region` into `out`
    pub fn read_window(&mut self, region: &Region, mut out: ArrayViewMut2<'_, f64>) -> Result<()> {
        if !region.is_within(self.rows, self.cols) {
            return Err(Error::InvalidParameter {
                name: "region",
                value: format!("{:?}", region),
                reason: format!("outside the {}x{} raster", self.rows, self.cols),
            });
        }
        if out.dim() != region.shape() {
            let (ar, ac) = out.dim();
            return Err(Error::SizeMismatch {
                er: region.height,
                ec: region.width,
                ar,
                ac,
            });
        }
        if region.is_empty() {
            return Ok(());
        }

        let (chunk_rows, chunk_cols) = self.chunk_shape;
        let chunk_ys = region.y / chunk_rows..=(region.y + region.height - 1) / chunk_rows;
        let chunk_xs = region.x / chunk_cols..=(region.x + region.width - 1) / chunk_cols;

        for cy in chunk_ys {
            for cx in chunk_xs.clone() {
                let bounds = self.chunk_bounds(cx, cy);
                let Some(overlap) = region.intersection(&bounds) else {
                    continue;
                };
                let index = cy * self.chunks_across + cx;
                let samples = self.chunk(index, &bounds)?;

                let x0 = overlap.x - region.x;
                for r in overlap.rows() {
                    let start = (r - bounds.y) * bounds.width + (overlap.x - bounds.x);
                    out.row_mut(r - region.y)
                        .slice_mut(s![x0..x0 + overlap.width])
                        .assign(&aview1(&samples[start..start + overlap.width]));
                }
            }
        }
        Ok(())
    }

    /// Grid region covered by chunk (`cx`, `cy`), clipped at the image edge
    fn chunk_bounds(&self, cx: usize, cy: usize) -> Region {
        let (chunk_rows, chunk_cols) = self.chunk_shape;
        let x = cx * chunk_cols;
        let y = cy * chunk_rows;
        Region::new(x, y, chunk_cols.min(self.cols - x), chunk_rows.min(self.rows - y))
    }

    /// Samples of chunk `index`, decoded on a cache miss
    fn chunk(&mut self, index: usize, bounds: &Region) -> Result<&[f64]> {
        let key = u32::try_from(index).map_err(|_| Error::Other(format!("TIFF chunk index {} overflows", index)))?;

        if !self.cache.contains_key(&key) {
            let decoded = self
                .decoder
                .read_chunk(key)
                .map_err(tiff_error("Cannot read TIFF chunk"))?;
            let samples: Vec<f64> = decoded_samples(decoded)?;
            if samples.len() != bounds.len() {
                return Err(Error::SizeMismatch {
                    er: bounds.height,
                    ec: bounds.width,
                    ar: samples.len() / bounds.width.max(1),
                    ac: bounds.width,
                });
            }

            while !self.cache_order.is_empty() && self.cache_pixels + samples.len() > self.cache_limit {
                if let Some(evicted) = self.cache_order.pop_front().and_then(|k| self.cache.remove(&k)) {
                    self.cache_pixels -= evicted.len();
                }
            }
            self.cache_pixels += samples.len();
            self.cache_order.push_back(key);
            self.cache.insert(key, samples);
        }

        self.cache
            .get(&key)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::Other(format!("TIFF chunk {} missing from cache", key)))
    }
}

/// Write a raster to a single-band GeoTIFF
pub fn write_geotiff<T, P>(raster: &Raster<T>, path: P, options: &GeoTiffOptions) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let data = raster.data();
    write_geotiff_rows(
        path,
        raster.rows(),
        raster.cols(),
        raster.transform(),
        raster.crs(),
        options,
        |row, out| {
            for (dst, src) in out.iter_mut().zip(data.row(row)) {
                *dst = src.to_f64().unwrap_or(f64::NAN);
            }
            Ok(())
        },
    )
}

/// Write a GeoTIFF one row at a time.
///
/// `fill_row(row, buf)` is called for every row in order and must fill
/// `buf` (length `cols`) with working-precision values. They are converted
/// to the sample format of `options`: integers are rounded and saturated,
/// NaN becomes 0.
pub fn write_geotiff_rows<P, F>(
    path: P,
    rows: usize,
    cols: usize,
    transform: &GeoTransform,
    crs: Option<&CRS>,
    options: &GeoTiffOptions,
    fill_row: F,
) -> Result<()>
where
    P: AsRef<Path>,
    F: FnMut(usize, &mut [f64]) -> Result<()>,
{
    if rows == 0 || cols == 0 || rows > u32::MAX as usize || cols > u32::MAX as usize {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }

    let file = BufWriter::new(File::create(path.as_ref())?);
    let header = Header {
        rows,
        cols,
        transform,
        crs,
        nodata: options.nodata,
    };

    match options.sample_format {
        SampleFormat::Float32 => with_compression::<_, Gray32Float, _>(file, &header, options.compression, fill_row),
        SampleFormat::Int16 => with_compression::<_, GrayI16, _>(file, &header, options.compression, fill_row),
        SampleFormat::Byte => with_compression::<_, Gray8, _>(file, &header, options.compression, fill_row),
    }
}

struct Header<'a> {
    rows: usize,
    cols: usize,
    transform: &'a GeoTransform,
    crs: Option<&'a CRS>,
    nodata: Option<f64>,
}

fn with_compression<W, C, F>(writer: W, header: &Header<'_>, compression: Compression, fill_row: F) -> Result<()>
where
    W: Write + Seek,
    C: ColorType,
    C::Inner: RasterElement,
    [C::Inner]: TiffValue,
    F: FnMut(usize, &mut [f64]) -> Result<()>,
{
    match compression {
        Compression::None => encode_strips::<_, C, _, _>(writer, header, Uncompressed, fill_row),
        Compression::Lzw => encode_strips::<_, C, _, _>(writer, header, Lzw, fill_row),
        Compression::Deflate => encode_strips::<_, C, _, _>(writer, header, Deflate::default(), fill_row),
    }
}

fn encode_strips<W, C, D, F>(writer: W, header: &Header<'_>, compression: D, mut fill_row: F) -> Result<()>
where
    W: Write + Seek,
    C: ColorType,
    C::Inner: RasterElement,
    [C::Inner]: TiffValue,
    D: TiffCompression,
    F: FnMut(usize, &mut [f64]) -> Result<()>,
{
    let Header {
        rows,
        cols,
        transform,
        crs,
        nodata,
    } = *header;

    let mut encoder = TiffEncoder::new(writer).map_err(tiff_error("TIFF encoder error"))?;
    let mut image = encoder
        .new_image_with_compression::<C, D>(cols as u32, rows as u32, compression)
        .map_err(tiff_error("Cannot create TIFF image"))?;

    let scale = [transform.pixel_width.abs(), transform.pixel_height.abs(), 0.0];
    image
        .encoder()
        .write_tag(tag(TAG_PIXEL_SCALE), &scale[..])
        .map_err(tiff_error("Cannot write scale tag"))?;

    let tiepoint = [0.0, 0.0, 0.0, transform.origin_x, transform.origin_y, 0.0];
    image
        .encoder()
        .write_tag(tag(TAG_TIEPOINT), &tiepoint[..])
        .map_err(tiff_error("Cannot write tiepoint tag"))?;

    // Without a CRS, still mark the file as projected pixel-is-area so GIS
    // software recognises it as a GeoTIFF
    let geokeys = crs
        .map(CRS::to_geokeys)
        .unwrap_or_else(|| GeoKeys::from_entries(&[(1024, 1), (1025, 1)]));
    image
        .encoder()
        .write_tag(tag(TAG_GEO_KEY_DIRECTORY), geokeys.directory.as_slice())
        .map_err(tiff_error("Cannot write geokey tag"))?;
    if !geokeys.doubles.is_empty() {
        image
            .encoder()
            .write_tag(tag(TAG_GEO_DOUBLE_PARAMS), geokeys.doubles.as_slice())
            .map_err(tiff_error("Cannot write geokey doubles"))?;
    }
    if let Some(ascii) = geokeys.ascii.as_deref() {
        image
            .encoder()
            .write_tag(tag(TAG_GEO_ASCII_PARAMS), ascii)
            .map_err(tiff_error("Cannot write geokey ascii"))?;
    }

    if let Some(nd) = nodata {
        let text = if nd.is_nan() { "nan".to_string() } else { nd.to_string() };
        image
            .encoder()
            .write_tag(tag(TAG_GDAL_NODATA), text.as_str())
            .map_err(tiff_error("Cannot write nodata tag"))?;
    }

    let mut row_buf = vec![0.0f64; cols];
    let mut strip: Vec<C::Inner> = Vec::new();
    let mut row = 0;
    loop {
        let samples = image.next_strip_sample_count() as usize;
        if samples == 0 {
            break;
        }
        strip.clear();
        for _ in 0..samples / cols {
            fill_row(row, &mut row_buf)?;
            strip.extend(row_buf.iter().map(|&v| C::Inner::from_f64(v)));
            row += 1;
        }
        image
            .write_strip(&strip)
            .map_err(tiff_error("Cannot write strip"))?;
    }

    image.finish().map_err(tiff_error("Cannot finish TIFF image"))?;
    Ok(())
}
