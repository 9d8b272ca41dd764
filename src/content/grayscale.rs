//! Grayscale conversion of page content, form XObjects and images

use std::collections::{HashMap, HashSet};

use log::{debug, trace, warn};

use crate::document::Document;
use crate::error::{PdfError, PdfResult};
use crate::pdf::{Dictionary, Filter, Object, ObjectId};
use super::operator::{parse_operators, ContentOperator};
use super::transform::{classify_color_space, color_space_map, ColorSpace, ContentTransformer, GraphicsState, OperatorVisitor};

/// Luminance of an RGB colour, components in 0..=1
pub fn rgb_to_gray(r: f64, g: f64, b: f64) -> f64 {
    (0.3 * r + 0.59 * g + 0.11 * b).clamp(0.0, 1.0)
}

/// Gray level of a CMYK colour, components in 0..=1
pub fn cmyk_to_gray(c: f64, m: f64, y: f64, k: f64) -> f64 {
    1.0 - (0.3 * c + 0.59 * m + 0.11 * y + k).clamp(0.0, 1.0)
}

/// Which parts of a page are converted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrayscaleOptions {
    pub stroke: bool,
    pub fill: bool,
    pub images: bool,
}

impl Default for GrayscaleOptions {
    fn default() -> Self {
        Self {
            stroke: true,
            fill: true,
            images: true,
        }
    }
}

impl GrayscaleOptions {
    /// Convert fill colours only
    pub fn fill_only() -> Self {
        Self {
            stroke: false,
            fill: true,
            images: false,
        }
    }

    /// Convert stroke colours only
    pub fn stroke_only() -> Self {
        Self {
            stroke: true,
            fill: false,
            images: false,
        }
    }
}

/// What a conversion changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrayscaleStats {
    /// Colour operators rewritten
    pub operators: usize,
    /// Form XObjects whose content was rewritten
    pub forms: usize,
    /// Images re-encoded as single-channel
    pub images: usize,
    /// Images left in colour because their encoding is not handled
    pub skipped_images: Vec<ObjectId>,
}

/// Visitor replacing RGB and CMYK colour operators with gray ones
pub struct GrayscaleVisitor {
    options: GrayscaleOptions,
    color_spaces: HashMap<String, ColorSpace>,
    converted: usize,
}

impl GrayscaleVisitor {
    pub fn new(options: GrayscaleOptions, color_spaces: HashMap<String, ColorSpace>) -> Self {
        Self {
            options,
            color_spaces,
            converted: 0,
        }
    }

    /// Number of operators rewritten so far
    pub fn converted(&self) -> usize {
        self.converted
    }

    fn named_space(&self, op: &ContentOperator) -> Option<ColorSpace> {
        let name = op.operands.first()?.as_name_str().ok()?;
        ColorSpace::from_name(name).or_else(|| self.color_spaces.get(name).cloned())
    }

    fn gray_of(space: &ColorSpace, values: &[f64]) -> Option<f64> {
        match (space, values) {
            (ColorSpace::DeviceRGB, [r, g, b]) => Some(rgb_to_gray(*r, *g, *b)),
            (ColorSpace::DeviceCMYK, [c, m, y, k]) => Some(cmyk_to_gray(*c, *m, *y, *k)),
            _ => None,
        }
    }

    fn gray_operator(&mut self, operator: &str, gray: f64) -> Vec<ContentOperator> {
        self.converted += 1;
        vec![ContentOperator::new(operator, vec![Object::Real(gray)])]
    }
}

impl OperatorVisitor for GrayscaleVisitor {
    fn visit(&mut self, op: ContentOperator, state: &GraphicsState) -> PdfResult<Vec<ContentOperator>> {
        let (stroking, space) = match op.operator.as_str() {
            "RG" => (true, ColorSpace::DeviceRGB),
            "rg" => (false, ColorSpace::DeviceRGB),
            "K" => (true, ColorSpace::DeviceCMYK),
            "k" => (false, ColorSpace::DeviceCMYK),
            "SC" | "SCN" => (true, state.stroke_space.clone()),
            "sc" | "scn" => (false, state.fill_space.clone()),
            "CS" | "cs" => {
                let stroking = op.operator == "CS";
                let enabled = if stroking { self.options.stroke } else { self.options.fill };
                let convertible = matches!(
                    self.named_space(&op),
                    Some(ColorSpace::DeviceRGB | ColorSpace::DeviceCMYK)
                );
                if enabled && convertible {
                    self.converted += 1;
                    let operator = op.operator;
                    return Ok(vec![ContentOperator::new(operator, vec![Object::name("DeviceGray")])]);
                }
                return Ok(vec![op]);
            }
            _ => return Ok(vec![op]),
        };

        let enabled = if stroking { self.options.stroke } else { self.options.fill };
        if !enabled {
            return Ok(vec![op]);
        }

        let gray = match op.numbers().and_then(|values| Self::gray_of(&space, &values)) {
            Some(gray) => gray,
            None => return Ok(vec![op]),
        };

        let operator = match op.operator.as_str() {
            "RG" | "K" => "G",
            "rg" | "k" => "g",
            // sc/scn keep their name; the space was switched to DeviceGray by cs
            other => other,
        }
        .to_string();
        Ok(self.gray_operator(&operator, gray))
    }
}

/// Colour spaces named in a resource dictionary
fn resource_color_spaces(doc: &Document, resources: &Dictionary) -> HashMap<String, ColorSpace> {
    match resources.get("ColorSpace").map(|cs| doc.resolve_dict(cs)) {
        Some(Ok(dict)) => color_space_map(dict, |object| doc.resolve(object).ok()),
        Some(Err(err)) => {
            warn!("Ignoring unreadable /ColorSpace resources: {}", err);
            HashMap::new()
        }
        None => HashMap::new(),
    }
}

/// Rewrite one content stream body
pub fn convert_content(
    doc: &Document,
    content: &[u8],
    resources: &Dictionary,
    options: &GrayscaleOptions,
) -> PdfResult<(Vec<u8>, usize)> {
    let color_spaces = resource_color_spaces(doc, resources);
    let transformer = ContentTransformer::new().with_color_spaces(color_spaces.clone());
    let mut visitor = GrayscaleVisitor::new(*options, color_spaces);
    let rewritten = transformer.rewrite(parse_operators(content), &mut visitor)?;
    Ok((rewritten, visitor.converted()))
}

/// Convert a page, the forms it draws and, when enabled, its images
pub fn convert_page(doc: &mut Document, page: usize, options: &GrayscaleOptions) -> PdfResult<GrayscaleStats> {
    let resources = doc.page_resources(page)?;
    let content = doc.page_content(page)?;
    let mut stats = GrayscaleStats::default();

    let (rewritten, converted) = convert_content(doc, &content, &resources, options)?;
    stats.operators += converted;
    if converted > 0 {
        let level = doc.config().compression_level;
        match doc.content_stream_ids(page)?.as_slice() {
            [single] => doc
                .get_object_mut(*single)?
                .as_stream_mut()?
                .set_content(rewritten, Some(level))?,
            _ => {
                let stream = doc.new_content_stream(rewritten)?;
                doc.set_page_content(page, stream)?;
            }
        }
    }

    let mut visited = HashSet::new();
    convert_xobjects(doc, &resources, options, &mut stats, &mut visited)?;

    debug!(
        "Page {} grayscale: {} operators, {} forms, {} images",
        page, stats.operators, stats.forms, stats.images
    );
    Ok(stats)
}

impl Document {
    /// Convert every page to grayscale
    pub fn convert_to_grayscale(&mut self, options: &GrayscaleOptions) -> PdfResult<GrayscaleStats> {
        let mut total = GrayscaleStats::default();
        for page in 1..=self.num_pages()? {
            let stats = convert_page(self, page, options)?;
            total.operators += stats.operators;
            total.forms += stats.forms;
            total.images += stats.images;
            total.skipped_images.extend(stats.skipped_images);
        }
        Ok(total)
    }
}

fn convert_xobjects(
    doc: &mut Document,
    resources: &Dictionary,
    options: &GrayscaleOptions,
    stats: &mut GrayscaleStats,
    visited: &mut HashSet<ObjectId>,
) -> PdfResult<()> {
    let xobjects: Vec<ObjectId> = match resources.get("XObject") {
        Some(xobjects) => doc
            .resolve_dict(xobjects)?
            .iter()
            .filter_map(|(_, value)| value.as_reference().ok())
            .collect(),
        None => return Ok(()),
    };

    for id in xobjects {
        if !visited.insert(id) {
            continue;
        }
        let subtype = match doc.get_object(id).and_then(|o| o.as_stream()) {
            Ok(stream) => stream.dict.get_name("Subtype").map(str::to_string),
            Err(err) => {
                warn!("XObject {} is not a stream: {}", id, err);
                continue;
            }
        };

        match subtype.as_deref() {
            Some("Form") => convert_form(doc, id, resources, options, stats, visited)?,
            Some("Image") if options.images => match convert_image(doc, id)? {
                ImageOutcome::Converted => stats.images += 1,
                ImageOutcome::Skipped => stats.skipped_images.push(id),
                ImageOutcome::Unchanged => {}
            },
            _ => trace!("Leaving XObject {} as is", id),
        }
    }
    Ok(())
}

fn convert_form(
    doc: &mut Document,
    id: ObjectId,
    parent_resources: &Dictionary,
    options: &GrayscaleOptions,
    stats: &mut GrayscaleStats,
    visited: &mut HashSet<ObjectId>,
) -> PdfResult<()> {
    let (content, resources) = {
        let stream = doc.get_object(id)?.as_stream()?;
        let resources = match stream.dict.get("Resources") {
            Some(resources) => doc.resolve_dict(resources)?.clone(),
            None => parent_resources.clone(),
        };
        (stream.decoded()?.to_vec(), resources)
    };

    let (rewritten, converted) = convert_content(doc, &content, &resources, options)?;
    if converted > 0 {
        let level = doc.config().compression_level;
        doc.get_object_mut(id)?.as_stream_mut()?.set_content(rewritten, Some(level))?;
        stats.operators += converted;
        stats.forms += 1;
    }

    convert_xobjects(doc, &resources, options, stats, visited)
}

/// Pixel data of an 8-bit image, decoded to raw samples
fn image_samples(stream: &crate::pdf::Stream) -> PdfResult<(Vec<u8>, usize)> {
    let filters = stream.filters()?;
    match filters.as_slice() {
        [Filter::DCTDecode] => decode_jpeg(stream.raw()),
        _ => Ok((stream.decoded()?.to_vec(), 0)),
    }
}

/// Decode a baseline JPEG to RGB samples
#[cfg(feature = "images")]
fn decode_jpeg(data: &[u8]) -> PdfResult<(Vec<u8>, usize)> {
    let image = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
        .map_err(|err| PdfError::Image(err.to_string()))?;
    Ok((image.to_rgb8().into_raw(), 3))
}

#[cfg(not(feature = "images"))]
fn decode_jpeg(_data: &[u8]) -> PdfResult<(Vec<u8>, usize)> {
    Err(PdfError::UnsupportedFilter("DCTDecode".to_string()))
}

enum ImageOutcome {
    Converted,
    /// Not in a colour space that needs converting
    Unchanged,
    /// In colour but stored in a way that cannot be rewritten
    Skipped,
}

/// Re-encode an RGB or CMYK image as DeviceGray
fn convert_image(doc: &mut Document, id: ObjectId) -> PdfResult<ImageOutcome> {
    let (gray, width, height) = {
        let stream = doc.get_object(id)?.as_stream()?;
        let dict = &stream.dict;
        if matches!(dict.get("ImageMask"), Some(Object::Boolean(true))) {
            return Ok(ImageOutcome::Unchanged);
        }

        let space = match dict.get("ColorSpace") {
            Some(space) => classify_color_space(doc.resolve(space)?, &|object| doc.resolve(object).ok()),
            None => return Ok(ImageOutcome::Unchanged),
        };
        let components = match space {
            ColorSpace::DeviceRGB => 3,
            ColorSpace::DeviceCMYK => 4,
            _ => {
                trace!("Image {} in {:?} left as is", id, space);
                return Ok(ImageOutcome::Unchanged);
            }
        };
        if dict.get_integer("BitsPerComponent") != Some(8) {
            debug!("Image {} is not 8 bits per component", id);
            return Ok(ImageOutcome::Skipped);
        }
        let width = dict.get_integer("Width").unwrap_or(0).max(0) as usize;
        let height = dict.get_integer("Height").unwrap_or(0).max(0) as usize;

        let (samples, decoded_components) = match image_samples(stream) {
            Ok(decoded) => decoded,
            Err(err @ (PdfError::UnsupportedFilter(_) | PdfError::Image(_))) => {
                debug!("Image {} kept in colour: {}", id, err);
                return Ok(ImageOutcome::Skipped);
            }
            Err(err) => return Err(err),
        };
        let components = if decoded_components == 0 { components } else { decoded_components };

        let pixels = width.checked_mul(height);
        let expected = pixels.and_then(|pixels| pixels.checked_mul(components));
        let pixels = match (pixels, expected) {
            (Some(pixels), Some(expected)) if samples.len() >= expected => pixels,
            _ => {
                return Err(PdfError::malformed_stream(
                    Some(id),
                    format!(
                        "image holds {} bytes, too few for {}x{} with {} components",
                        samples.len(),
                        width,
                        height,
                        components
                    ),
                ))
            }
        };

        let gray: Vec<u8> = samples
            .chunks_exact(components)
            .take(pixels)
            .map(|px| {
                let level = match px {
                    [r, g, b] => rgb_to_gray(*r as f64 / 255.0, *g as f64 / 255.0, *b as f64 / 255.0),
                    [c, m, y, k] => cmyk_to_gray(
                        *c as f64 / 255.0,
                        *m as f64 / 255.0,
                        *y as f64 / 255.0,
                        *k as f64 / 255.0,
                    ),
                    _ => 0.0,
                };
                (level * 255.0).round() as u8
            })
            .collect();
        (gray, width, height)
    };

    let level = doc.config().compression_level;
    let stream = doc.get_object_mut(id)?.as_stream_mut()?;
    stream.set_content(gray, Some(level))?;
    stream.dict.set("ColorSpace", "DeviceGray");
    stream.dict.remove("Decode");
    debug!("Image {} ({}x{}) converted to gray", id, width, height);
    Ok(ImageOutcome::Converted)
}
