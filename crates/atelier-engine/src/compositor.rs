use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use atelier_contracts::media::ImageRef;
use atelier_contracts::outfit::{pose_labels, POSE_COUNT};
use atelier_contracts::status::CompositeArtifact;
use atelier_contracts::TryOnError;
use image::{imageops, DynamicImage, ImageFormat, Rgba, RgbaImage};

use crate::ingest::Ingestor;

pub const GAP: u32 = 40;
pub const PADDING: u32 = 60;
pub const LABEL_HEIGHT: u32 = 80;
/// White margin drawn around each image.
pub const MAT: u32 = 10;
pub const BORDER: u32 = 2;
pub const TITLE: &str = "Lookbook - 4 Poses";
pub const FOOTER: &str = "Spring / Summer 2025";

const BACKGROUND: Rgba<u8> = Rgba([0xfa, 0xfa, 0xf9, 0xff]);
const MAT_FILL: Rgba<u8> = Rgba([0xff, 0xff, 0xff, 0xff]);
const BORDER_COLOR: Rgba<u8> = Rgba([0xe7, 0xe5, 0xe4, 0xff]);
const TITLE_COLOR: &str = "#1c1917";
const LABEL_COLOR: &str = "#78716c";
const FOOTER_COLOR: &str = "#a8a29e";

/// Canvas geometry for a 2×2 grid of `cell_width` × `cell_height` images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub cell_width: u32,
    pub cell_height: u32,
    pub width: u32,
    pub height: u32,
    /// Top-left corner of each image, in pose order.
    pub positions: [(u32, u32); POSE_COUNT],
}

impl GridLayout {
    pub fn for_cell(cell_width: u32, cell_height: u32) -> Self {
        let (w, h) = (cell_width, cell_height);
        let top = PADDING + LABEL_HEIGHT;
        Self {
            cell_width: w,
            cell_height: h,
            width: 2 * w + GAP + 2 * PADDING,
            height: 2 * h + GAP + 2 * PADDING + 2 * LABEL_HEIGHT,
            positions: [
                (PADDING, top),
                (PADDING + w + GAP, top),
                (PADDING, top + h + GAP),
                (PADDING + w + GAP, top + h + GAP),
            ],
        }
    }

    pub fn label_baseline(&self, position: (u32, u32)) -> u32 {
        position.1 + self.cell_height + 40
    }
}

#[derive(Debug, Clone)]
pub struct Composite {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub labels: [&'static str; POSE_COUNT],
    pub warnings: Vec<String>,
}

impl Composite {
    pub fn write_to(&self, path: &Path) -> Result<CompositeArtifact> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &self.png)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(CompositeArtifact {
            path: path.to_path_buf(),
            width: self.width,
            height: self.height,
        })
    }
}

/// Builds the 2×2 lookbook. Text is drawn from `fontdb`; with no fonts
/// loaded the captions are left out and the geometry is unchanged. A caption
/// that fails to render while fonts are loaded becomes a warning.
pub struct Compositor {
    ingestor: Ingestor,
    fontdb: Arc<usvg::fontdb::Database>,
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compositor {
    /// Uses the system fonts, with the generic families bound to faces that
    /// are actually installed.
    pub fn new() -> Self {
        let mut db = usvg::fontdb::Database::new();
        db.load_system_fonts();
        bind_generic_families(&mut db);
        Self::with_fonts(Arc::new(db))
    }

    pub fn without_fonts() -> Self {
        Self::with_fonts(Arc::new(usvg::fontdb::Database::new()))
    }

    pub fn with_fonts(fontdb: Arc<usvg::fontdb::Database>) -> Self {
        Self {
            ingestor: Ingestor::new(),
            fontdb,
        }
    }

    /// Load all four images, then compose. Any load failure fails the whole
    /// grid.
    pub fn compose_lookbook(&self, images: &[ImageRef]) -> Result<Composite> {
        check_count(images.len())?;
        let mut decoded = Vec::with_capacity(images.len());
        for (idx, reference) in images.iter().enumerate() {
            let image = self
                .ingestor
                .load(reference.as_str())
                .and_then(|payload| {
                    image::load_from_memory(payload.bytes()).context("image decode failed")
                })
                .map_err(|err| {
                    TryOnError::composite(format!(
                        "failed to load pose {} image ({reference}): {err:#}",
                        idx + 1
                    ))
                })?;
            decoded.push(image);
        }
        self.compose_decoded(&decoded)
    }

    pub fn compose_decoded(&self, images: &[DynamicImage]) -> Result<Composite> {
        check_count(images.len())?;
        let (w, h) = (images[0].width(), images[0].height());
        if w == 0 || h == 0 {
            return Err(TryOnError::composite("first pose image has no pixels").into());
        }
        let layout = GridLayout::for_cell(w, h);
        let labels = pose_labels();

        let mut warnings = Vec::new();
        for (idx, image) in images.iter().enumerate().skip(1) {
            if (image.width(), image.height()) != (w, h) {
                warnings.push(format!(
                    "pose {} is {}x{} but the grid uses {w}x{h}; cells may overlap",
                    idx + 1,
                    image.width(),
                    image.height()
                ));
            }
        }

        let mut canvas = RgbaImage::from_pixel(layout.width, layout.height, BACKGROUND);
        for (image, &(x, y)) in images.iter().zip(layout.positions.iter()) {
            let (mx, my) = (x - MAT, y - MAT);
            let (mw, mh) = (w + 2 * MAT, h + 2 * MAT);
            fill_rect(&mut canvas, mx, my, mw, mh, MAT_FILL);
            imageops::overlay(&mut canvas, &image.to_rgba8(), i64::from(x), i64::from(y));
            stroke_rect(&mut canvas, mx, my, mw, mh, BORDER, BORDER_COLOR);
        }

        if self.fontdb.faces().next().is_some() {
            let svg = text_overlay_svg(&layout, &labels);
            let ink = draw_svg_overlay(&mut canvas, &svg, &self.fontdb)?;
            warnings.extend(missing_captions(&layout, &labels, &ink));
        }

        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(canvas)
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|err| TryOnError::composite(format!("PNG encode failed: {err}")))?;
        Ok(Composite {
            png: out.into_inner(),
            width: layout.width,
            height: layout.height,
            labels,
            warnings,
        })
    }
}

/// fontdb defaults `serif` to Times New Roman and `sans-serif` to Arial.
/// Hosts without those faces would drop every caption asking for a generic
/// family, so point each generic at an installed family instead.
fn bind_generic_families(db: &mut usvg::fontdb::Database) {
    use usvg::fontdb::Family;

    if !resolves(db, Family::Serif) {
        if let Some(family) = installed_family(db, "Serif") {
            db.set_serif_family(family);
        }
    }
    if !resolves(db, Family::SansSerif) {
        if let Some(family) = installed_family(db, "Sans") {
            db.set_sans_serif_family(family);
        }
    }
}

fn resolves(db: &usvg::fontdb::Database, family: usvg::fontdb::Family<'_>) -> bool {
    let query = usvg::fontdb::Query {
        families: &[family],
        ..Default::default()
    };
    db.query(&query).is_some()
}

/// First family whose name contains `hint`, else the first family loaded.
fn installed_family(db: &usvg::fontdb::Database, hint: &str) -> Option<String> {
    let names: Vec<&str> = db
        .faces()
        .filter_map(|face| face.families.first().map(|(name, _)| name.as_str()))
        .collect();
    names
        .iter()
        .find(|name| name.contains(hint))
        .or_else(|| names.first())
        .map(|name| name.to_string())
}

fn check_count(count: usize) -> Result<(), TryOnError> {
    if count != POSE_COUNT {
        return Err(TryOnError::validation(format!(
            "a lookbook needs exactly {POSE_COUNT} images, got {count}"
        )));
    }
    Ok(())
}

fn fill_rect(canvas: &mut RgbaImage, x: u32, y: u32, w: u32, h: u32, color: Rgba<u8>) {
    let x_end = (x + w).min(canvas.width());
    let y_end = (y + h).min(canvas.height());
    for py in y..y_end {
        for px in x..x_end {
            canvas.put_pixel(px, py, color);
        }
    }
}

/// Outline centred on the rectangle edge, like a canvas `strokeRect`.
fn stroke_rect(canvas: &mut RgbaImage, x: u32, y: u32, w: u32, h: u32, line: u32, color: Rgba<u8>) {
    let half = line / 2;
    let (ox, oy) = (x.saturating_sub(half), y.saturating_sub(half));
    let (ow, oh) = (w + line, h + line);
    fill_rect(canvas, ox, oy, ow, line, color);
    fill_rect(canvas, ox, oy + oh - line, ow, line, color);
    fill_rect(canvas, ox, oy, line, oh, color);
    fill_rect(canvas, ox + ow - line, oy, line, oh, color);
}

fn text_overlay_svg(layout: &GridLayout, labels: &[&str; POSE_COUNT]) -> String {
    let center = layout.width / 2;
    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = layout.width,
        h = layout.height
    );
    svg.push_str(&text_element(
        center,
        50,
        48,
        "Georgia, serif",
        true,
        TITLE_COLOR,
        TITLE,
    ));
    for (label, &position) in labels.iter().zip(layout.positions.iter()) {
        svg.push_str(&text_element(
            position.0 + layout.cell_width / 2,
            layout.label_baseline(position),
            12,
            "sans-serif",
            false,
            LABEL_COLOR,
            &label.to_uppercase(),
        ));
    }
    svg.push_str(&text_element(
        center,
        layout.height.saturating_sub(30),
        24,
        "Georgia, serif",
        true,
        FOOTER_COLOR,
        FOOTER,
    ));
    svg.push_str("</svg>");
    svg
}

fn text_element(
    x: u32,
    y: u32,
    size: u32,
    family: &str,
    italic: bool,
    fill: &str,
    text: &str,
) -> String {
    let style = if italic { "italic" } else { "normal" };
    format!(
        r#"<text x="{x}" y="{y}" text-anchor="middle" font-family="{family}" font-style="{style}" font-size="{size}" fill="{fill}">{}</text>"#,
        escape_xml(text)
    )
}

fn escape_xml(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Rasterise `svg` at canvas size and blend it over `canvas`. Returns the
/// overlay's alpha channel, row-major at canvas size.
fn draw_svg_overlay(
    canvas: &mut RgbaImage,
    svg: &str,
    fontdb: &Arc<usvg::fontdb::Database>,
) -> Result<Vec<u8>> {
    let opts = usvg::Options {
        fontdb: Arc::clone(fontdb),
        ..Default::default()
    };
    let tree = usvg::Tree::from_data(svg.as_bytes(), &opts)
        .map_err(|err| TryOnError::composite(format!("caption layout failed: {err}")))?;
    let mut pixmap = resvg::tiny_skia::Pixmap::new(canvas.width(), canvas.height())
        .ok_or_else(|| TryOnError::composite("failed to allocate caption pixmap"))?;
    resvg::render(
        &tree,
        resvg::tiny_skia::Transform::default(),
        &mut pixmap.as_mut(),
    );

    for (dst, src) in canvas.pixels_mut().zip(pixmap.data().chunks_exact(4)) {
        let alpha = u16::from(src[3]);
        if alpha == 0 {
            continue;
        }
        // Source is premultiplied: out = src + dst * (1 - a).
        for channel in 0..3 {
            let blended = u16::from(src[channel]) + u16::from(dst.0[channel]) * (255 - alpha) / 255;
            dst.0[channel] = blended.min(255) as u8;
        }
        dst.0[3] = 255;
    }
    Ok(pixmap.data().chunks_exact(4).map(|px| px[3]).collect())
}

/// Bands each caption is drawn into, in drawing order: title, four labels,
/// footer. Rectangles are `(x0, y0, x1, y1)`, end-exclusive.
fn caption_bands(layout: &GridLayout) -> Vec<(u32, u32, u32, u32)> {
    let mut bands = vec![(0, 0, layout.width, layout.positions[0].1 - MAT)];
    for &(x, y) in &layout.positions {
        let top = y + layout.cell_height + MAT + BORDER;
        bands.push((x, top, x + layout.cell_width, layout.label_baseline((x, y)) + 4));
    }
    bands.push((0, layout.height.saturating_sub(PADDING), layout.width, layout.height));
    bands
}

fn missing_captions(
    layout: &GridLayout,
    labels: &[&str; POSE_COUNT],
    alpha: &[u8],
) -> Vec<String> {
    let captions = std::iter::once(TITLE)
        .chain(labels.iter().copied())
        .chain(std::iter::once(FOOTER));
    caption_bands(layout)
        .into_iter()
        .zip(captions)
        .filter(|&((x0, y0, x1, y1), _)| !band_has_ink(alpha, layout.width, x0, y0, x1, y1))
        .map(|(_, caption)| format!("caption '{caption}' was not drawn; no installed font matched"))
        .collect()
}

fn band_has_ink(alpha: &[u8], width: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> bool {
    (y0..y1).any(|y| {
        (x0..x1.min(width)).any(|x| {
            alpha
                .get((y as usize) * (width as usize) + x as usize)
                .is_some_and(|&a| a > 0)
        })
    })
}
