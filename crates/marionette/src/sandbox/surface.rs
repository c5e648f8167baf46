//! # Stand-in Drawing Surface
//!
//! The object graph the bridge drives: a canvas element and its 2D context,
//! modelled on the browser API closely enough that scripts written against a
//! real canvas run unchanged.
//!
//! Pixels are only produced for solid-colour rectangle fills and clears,
//! pixel copies (`putImageData`, `drawImage`) under axis-aligned transforms.
//! Paths, text and gradient fills are validated and recorded in the
//! context's display list but not rasterised.

use std::any::Any;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;

use base64::Engine;

use cordrpc::Clip;

use crate::sandbox::object::ByteArray;
use crate::sandbox::object::Completion;
use crate::sandbox::object::Expandos;
use crate::sandbox::object::HostObject;
use crate::sandbox::object::Method;
use crate::sandbox::object::ObjectRef;
use crate::sandbox::object::PlainArray;
use crate::sandbox::object::Slot;
use crate::sandbox::object::Thrown;
use crate::sandbox::object::arg;
use crate::sandbox::object::lock;
use crate::sandbox::object::num;
use crate::sandbox::object::require_args;
use crate::sandbox::png;

// ============================================================================
//  PIXELS
// ============================================================================

/// Non-premultiplied RGBA8 pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl Bitmap {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, rgba: vec![0; width as usize * height as usize * 4] }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = self.index(x, y);
        Some([self.rgba[i], self.rgba[i + 1], self.rgba[i + 2], self.rgba[i + 3]])
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    fn write(&mut self, x: u32, y: u32, px: [u8; 4]) {
        let i = self.index(x, y);
        self.rgba[i..i + 4].copy_from_slice(&px);
    }

    fn blend(&mut self, x: u32, y: u32, src: [u8; 4], alpha: f64, copy: bool) {
        if copy {
            let a = (f64::from(src[3]) * alpha).round() as u8;
            self.write(x, y, [src[0], src[1], src[2], a]);
            return;
        }
        let i = self.index(x, y);
        let dst = [self.rgba[i], self.rgba[i + 1], self.rgba[i + 2], self.rgba[i + 3]];
        let sa = f64::from(src[3]) / 255.0 * alpha;
        let da = f64::from(dst[3]) / 255.0;
        let oa = sa + da * (1.0 - sa);
        if oa <= 0.0 {
            self.write(x, y, [0, 0, 0, 0]);
            return;
        }
        let mut out = [0u8; 4];
        for c in 0..3 {
            let v = (f64::from(src[c]) * sa + f64::from(dst[c]) * da * (1.0 - sa)) / oa;
            out[c] = v.round().clamp(0.0, 255.0) as u8;
        }
        out[3] = (oa * 255.0).round() as u8;
        self.write(x, y, out);
    }

    /// Pixel columns and rows whose centres fall inside a device-space rectangle.
    fn cover(&self, r: &DeviceRect) -> Option<(std::ops::Range<u32>, std::ops::Range<u32>)> {
        let span = |lo: f64, hi: f64, limit: u32| {
            let first = (lo - 0.5).ceil().max(0.0);
            let end = (hi - 0.5).ceil().min(f64::from(limit));
            (first < end).then(|| first as u32..end as u32)
        };
        Some((span(r.x0, r.x1, self.width)?, span(r.y0, r.y1, self.height)?))
    }

    fn fill(&mut self, r: &DeviceRect, color: [u8; 4], alpha: f64, copy: bool) {
        let Some((xs, ys)) = self.cover(r) else { return };
        for y in ys {
            for x in xs.clone() {
                self.blend(x, y, color, alpha, copy);
            }
        }
    }

    fn clear(&mut self, r: &DeviceRect) {
        let Some((xs, ys)) = self.cover(r) else { return };
        for y in ys {
            for x in xs.clone() {
                self.write(x, y, [0, 0, 0, 0]);
            }
        }
    }

    /// Copies out a rectangle; pixels outside the bitmap read as transparent black.
    fn region(&self, sx: i64, sy: i64, w: u32, h: u32) -> Vec<u8> {
        let mut out = vec![0u8; w as usize * h as usize * 4];
        for row in 0..h {
            for col in 0..w {
                let (x, y) = (sx + i64::from(col), sy + i64::from(row));
                if let (Ok(x), Ok(y)) = (u32::try_from(x), u32::try_from(y))
                    && let Some(px) = self.pixel(x, y)
                {
                    let o = (row as usize * w as usize + col as usize) * 4;
                    out[o..o + 4].copy_from_slice(&px);
                }
            }
        }
        out
    }

    /// Scales `src[sx..sx+sw, sy..sy+sh]` into a device rectangle, nearest neighbour.
    fn blit(&mut self, src: &Bitmap, source: [f64; 4], dest: &DeviceRect, alpha: f64, copy: bool) {
        let [sx, sy, sw, sh] = source;
        let Some((xs, ys)) = self.cover(dest) else { return };
        let (dw, dh) = (dest.x1 - dest.x0, dest.y1 - dest.y0);
        for y in ys {
            let v = sy + (f64::from(y) + 0.5 - dest.y0) / dh * sh;
            for x in xs.clone() {
                let u = sx + (f64::from(x) + 0.5 - dest.x0) / dw * sw;
                if u < sx.max(0.0) || v < sy.max(0.0) || u >= sx + sw || v >= sy + sh {
                    continue;
                }
                if let Some(px) = src.pixel(u.floor() as u32, v.floor() as u32) {
                    self.blend(x, y, px, alpha, copy);
                }
            }
        }
    }

    /// PNG of the whole bitmap, or of `clip` intersected with it.
    pub fn to_png(&self, clip: Option<Clip>) -> Completion<Vec<u8>> {
        let (x, y, w, h) = match clip {
            None => (0, 0, self.width, self.height),
            Some(c) => {
                let x0 = c.x.min(self.width);
                let y0 = c.y.min(self.height);
                let x1 = c.x.saturating_add(c.width).min(self.width);
                let y1 = c.y.saturating_add(c.height).min(self.height);
                (x0, y0, x1 - x0, y1 - y0)
            }
        };
        if w == 0 || h == 0 {
            return Err(Thrown::range_error("Capture area is empty"));
        }
        let pixels = self.region(i64::from(x), i64::from(y), w, h);
        png::encode(w, h, &pixels).map_err(|e| Thrown::new("EncodingError", e.to_string()))
    }
}

impl From<png::Image> for Bitmap {
    fn from(img: png::Image) -> Self {
        Self { width: img.width, height: img.height, rgba: img.rgba }
    }
}

#[derive(Debug, Clone, Copy)]
struct DeviceRect {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
}

/// `[a, b, c, d, e, f]`: `x' = a*x + c*y + e`, `y' = b*x + d*y + f`.
type Transform = [f64; 6];

const IDENTITY: Transform = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

fn multiply(m: &Transform, n: &Transform) -> Transform {
    [
        m[0] * n[0] + m[2] * n[1],
        m[1] * n[0] + m[3] * n[1],
        m[0] * n[2] + m[2] * n[3],
        m[1] * n[2] + m[3] * n[3],
        m[0] * n[4] + m[2] * n[5] + m[4],
        m[1] * n[4] + m[3] * n[5] + m[5],
    ]
}

/// Maps a user-space rectangle to device space, if the transform keeps it a rectangle.
fn device_rect(t: &Transform, x: f64, y: f64, w: f64, h: f64) -> Option<DeviceRect> {
    if t[1] != 0.0 || t[2] != 0.0 {
        return None;
    }
    let (xa, xb) = (t[0] * x + t[4], t[0] * (x + w) + t[4]);
    let (ya, yb) = (t[3] * y + t[5], t[3] * (y + h) + t[5]);
    Some(DeviceRect { x0: xa.min(xb), y0: ya.min(yb), x1: xa.max(xb), y1: ya.max(yb) })
}

// ============================================================================
//  COLOURS AND FONTS
// ============================================================================

const NAMED_COLORS: &[(&str, [u8; 3])] = &[
    ("black", [0, 0, 0]),
    ("white", [255, 255, 255]),
    ("red", [255, 0, 0]),
    ("green", [0, 128, 0]),
    ("lime", [0, 255, 0]),
    ("blue", [0, 0, 255]),
    ("yellow", [255, 255, 0]),
    ("cyan", [0, 255, 255]),
    ("aqua", [0, 255, 255]),
    ("magenta", [255, 0, 255]),
    ("fuchsia", [255, 0, 255]),
    ("gray", [128, 128, 128]),
    ("grey", [128, 128, 128]),
    ("silver", [192, 192, 192]),
    ("maroon", [128, 0, 0]),
    ("olive", [128, 128, 0]),
    ("navy", [0, 0, 128]),
    ("purple", [128, 0, 128]),
    ("teal", [0, 128, 128]),
    ("orange", [255, 165, 0]),
    ("pink", [255, 192, 203]),
    ("brown", [165, 42, 42]),
    ("gold", [255, 215, 0]),
    ("indigo", [75, 0, 130]),
    ("violet", [238, 130, 238]),
    ("crimson", [220, 20, 60]),
    ("coral", [255, 127, 80]),
    ("salmon", [250, 128, 114]),
    ("skyblue", [135, 206, 235]),
    ("steelblue", [70, 130, 180]),
    ("cornflowerblue", [100, 149, 237]),
    ("darkgreen", [0, 100, 0]),
    ("lightgray", [211, 211, 211]),
    ("darkgray", [169, 169, 169]),
];

/// Parses a CSS colour into RGBA8.
pub fn parse_color(css: &str) -> Option<[u8; 4]> {
    let s = css.trim().to_ascii_lowercase();
    if s == "transparent" {
        return Some([0, 0, 0, 0]);
    }
    if let Some(hex) = s.strip_prefix('#') {
        return parse_hex(hex);
    }
    if let Some(body) = s.strip_prefix("rgba(").or_else(|| s.strip_prefix("rgb(")) {
        let body = body.strip_suffix(')')?;
        let parts: Vec<&str> = body.split(',').map(str::trim).collect();
        if parts.len() != 3 && parts.len() != 4 {
            return None;
        }
        let mut out = [0u8; 4];
        for (i, part) in parts[..3].iter().enumerate() {
            let v: f64 = part.parse().ok()?;
            out[i] = v.round().clamp(0.0, 255.0) as u8;
        }
        out[3] = match parts.get(3) {
            Some(a) => {
                let a: f64 = a.parse().ok()?;
                (a.clamp(0.0, 1.0) * 255.0).round() as u8
            }
            None => 255,
        };
        return Some(out);
    }
    NAMED_COLORS
        .iter()
        .find(|(name, _)| *name == s)
        .map(|(_, [r, g, b])| [*r, *g, *b, 255])
}

fn parse_hex(hex: &str) -> Option<[u8; 4]> {
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let digit = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok();
    let pair = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    match hex.len() {
        3 | 4 => {
            let mut out = [255u8; 4];
            for (i, v) in out.iter_mut().enumerate().take(hex.len()) {
                *v = digit(i)? * 17;
            }
            Some(out)
        }
        6 | 8 => {
            let mut out = [255u8; 4];
            for (i, v) in out.iter_mut().enumerate().take(hex.len() / 2) {
                *v = pair(i * 2)?;
            }
            Some(out)
        }
        _ => None,
    }
}

/// Pixel size of a CSS font shorthand such as `"bold 12px serif"`.
pub fn parse_font_size(font: &str) -> Option<f64> {
    let mut tokens = font.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        let size = token.split('/').next().unwrap_or(token);
        let px = if let Some(n) = size.strip_suffix("px") {
            n.parse::<f64>().ok()
        } else if let Some(n) = size.strip_suffix("pt") {
            n.parse::<f64>().ok().map(|pt| pt * 4.0 / 3.0)
        } else {
            None
        };
        if let Some(px) = px {
            // A family must follow the size.
            return (px.is_finite() && px >= 0.0 && tokens.peek().is_some()).then_some(px);
        }
    }
    None
}

// ============================================================================
//  CANVAS
// ============================================================================

const CANVAS_METHODS: &[&str] = &["getContext", "toDataURL"];

/// `HTMLCanvasElement`: the root object of every surface.
pub struct Canvas {
    bitmap: Arc<Mutex<Bitmap>>,
    context: Mutex<Option<Arc<Context2d>>>,
    max_dim: u32,
    expandos: Expandos,
}

impl Canvas {
    pub fn new(width: u32, height: u32, max_dim: u32) -> Self {
        Self {
            bitmap: Arc::new(Mutex::new(Bitmap::new(width, height))),
            context: Mutex::new(None),
            max_dim,
            expandos: Expandos::default(),
        }
    }

    pub fn snapshot(&self) -> Bitmap {
        lock(&self.bitmap).clone()
    }

    pub fn to_png(&self, clip: Option<Clip>) -> Completion<Vec<u8>> {
        lock(&self.bitmap).to_png(clip)
    }

    pub fn to_data_url(&self) -> String {
        match self.to_png(None) {
            Ok(bytes) => format!(
                "data:image/png;base64,{}",
                base64::engine::general_purpose::STANDARD.encode(bytes)
            ),
            Err(_) => "data:,".into(),
        }
    }

    fn resize(&self, width: Option<u32>, height: Option<u32>) {
        {
            let mut bitmap = lock(&self.bitmap);
            let w = width.unwrap_or(bitmap.width);
            let h = height.unwrap_or(bitmap.height);
            *bitmap = Bitmap::new(w, h);
        }
        if let Some(ctx) = lock(&self.context).as_ref() {
            ctx.reset();
        }
    }

    fn dimension(&self, value: &Slot) -> Option<u32> {
        let n = value.to_number();
        (n.is_finite() && n >= 0.0 && n <= f64::from(self.max_dim)).then(|| n.trunc() as u32)
    }
}

#[async_trait::async_trait]
impl HostObject for Canvas {
    fn class(&self) -> &'static str {
        "HTMLCanvasElement"
    }

    fn get(&self, key: &str) -> Completion<Slot> {
        Ok(match key {
            "width" => Slot::from(lock(&self.bitmap).width),
            "height" => Slot::from(lock(&self.bitmap).height),
            "nodeName" | "tagName" => Slot::from("CANVAS"),
            _ if CANVAS_METHODS.contains(&key) => Method::slot(self.class(), key),
            _ => self.expandos.get(key),
        })
    }

    fn set(&self, key: &str, value: Slot) -> Completion<()> {
        match key {
            "width" => {
                if let Some(w) = self.dimension(&value) {
                    self.resize(Some(w), None);
                }
            }
            "height" => {
                if let Some(h) = self.dimension(&value) {
                    self.resize(None, Some(h));
                }
            }
            "nodeName" | "tagName" => {}
            _ => self.expandos.set(key, value),
        }
        Ok(())
    }

    async fn call_method(&self, this: &ObjectRef, name: &str, args: Vec<Slot>) -> Completion<Slot> {
        match name {
            "getContext" => {
                require_args(self.class(), name, &args, 1)?;
                if arg(&args, 0).to_display() != "2d" {
                    return Ok(Slot::Null);
                }
                let mut slot = lock(&self.context);
                let ctx = slot.get_or_insert_with(|| {
                    Arc::new(Context2d::new(Arc::downgrade(this), self.bitmap.clone()))
                });
                Ok(Slot::Object(ctx.clone()))
            }
            "toDataURL" => Ok(Slot::String(self.to_data_url())),
            other => Err(Thrown::type_error(format!("canvas.{} is not a function", other))),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
//  2D CONTEXT
// ============================================================================

const CONTEXT_CLASS: &str = "CanvasRenderingContext2D";

const CONTEXT_METHODS: &[&str] = &[
    "save", "restore",
    "scale", "rotate", "translate", "transform", "setTransform", "resetTransform",
    "beginPath", "closePath", "moveTo", "lineTo", "quadraticCurveTo", "bezierCurveTo",
    "arc", "arcTo", "ellipse", "rect", "fill", "stroke", "clip",
    "fillRect", "strokeRect", "clearRect",
    "fillText", "strokeText", "measureText",
    "createLinearGradient", "createRadialGradient",
    "createImageData", "getImageData", "putImageData", "drawImage",
    "setLineDash", "getLineDash",
];

const COMPOSITE_OPS: &[&str] = &[
    "source-over", "source-in", "source-out", "source-atop",
    "destination-over", "destination-in", "destination-out", "destination-atop",
    "lighter", "copy", "xor", "multiply", "screen", "overlay", "darken", "lighten",
    "color-dodge", "color-burn", "hard-light", "soft-light", "difference", "exclusion",
    "hue", "saturation", "color", "luminosity",
];

#[derive(Clone)]
enum Paint {
    Color { css: String, rgba: [u8; 4] },
    Gradient(ObjectRef),
}

impl Paint {
    fn black() -> Self {
        Self::Color { css: "#000000".into(), rgba: [0, 0, 0, 255] }
    }

    fn to_slot(&self) -> Slot {
        match self {
            Self::Color { css, .. } => Slot::String(css.clone()),
            Self::Gradient(g) => Slot::Object(g.clone()),
        }
    }

    /// Accepts a colour string or a gradient; anything else is ignored.
    fn parse(value: &Slot) -> Option<Self> {
        match value {
            Slot::String(css) => parse_color(css).map(|rgba| Self::Color { css: css.clone(), rgba }),
            Slot::Object(o) if o.as_any().is::<Gradient>() => Some(Self::Gradient(o.clone())),
            _ => None,
        }
    }

    fn solid(&self) -> Option<[u8; 4]> {
        match self {
            Self::Color { rgba, .. } => Some(*rgba),
            Self::Gradient(_) => None,
        }
    }
}

/// Everything `save()` saves.
#[derive(Clone)]
struct Graphics {
    transform: Transform,
    fill_style: Paint,
    stroke_style: Paint,
    line_width: f64,
    line_cap: String,
    line_join: String,
    miter_limit: f64,
    line_dash: Vec<f64>,
    line_dash_offset: f64,
    global_alpha: f64,
    composite: String,
    font: String,
    text_align: String,
    text_baseline: String,
    shadow_blur: f64,
    shadow_color: String,
    shadow_offset_x: f64,
    shadow_offset_y: f64,
    image_smoothing: bool,
}

impl Default for Graphics {
    fn default() -> Self {
        Self {
            transform: IDENTITY,
            fill_style: Paint::black(),
            stroke_style: Paint::black(),
            line_width: 1.0,
            line_cap: "butt".into(),
            line_join: "miter".into(),
            miter_limit: 10.0,
            line_dash: Vec::new(),
            line_dash_offset: 0.0,
            global_alpha: 1.0,
            composite: "source-over".into(),
            font: "10px sans-serif".into(),
            text_align: "start".into(),
            text_baseline: "alphabetic".into(),
            shadow_blur: 0.0,
            shadow_color: "rgba(0, 0, 0, 0)".into(),
            shadow_offset_x: 0.0,
            shadow_offset_y: 0.0,
            image_smoothing: true,
        }
    }
}

#[derive(Default)]
struct DrawState {
    current: Graphics,
    stack: Vec<Graphics>,
    display_list: Vec<String>,
}

/// `CanvasRenderingContext2D`.
pub struct Context2d {
    canvas: Weak<dyn HostObject>,
    bitmap: Arc<Mutex<Bitmap>>,
    state: Mutex<DrawState>,
    expandos: Expandos,
}

fn finite(value: &Slot) -> Option<f64> {
    let n = value.to_number();
    n.is_finite().then_some(n)
}

fn keyword(value: &Slot, allowed: &[&str]) -> Option<String> {
    match value {
        Slot::String(s) if allowed.contains(&s.as_str()) => Some(s.clone()),
        _ => None,
    }
}

fn non_finite(method: &str) -> Thrown {
    Thrown::type_error(format!(
        "Failed to execute '{}' on '{}': The provided double value is non-finite.",
        method, CONTEXT_CLASS
    ))
}

fn index_size(method: &str, message: &str) -> Thrown {
    Thrown::new(
        "IndexSizeError",
        format!("Failed to execute '{}' on '{}': {}", method, CONTEXT_CLASS, message),
    )
}

impl Context2d {
    fn new(canvas: Weak<dyn HostObject>, bitmap: Arc<Mutex<Bitmap>>) -> Self {
        Self { canvas, bitmap, state: Mutex::new(DrawState::default()), expandos: Expandos::default() }
    }

    /// Drawing calls recorded so far, e.g. `"lineTo(150, 60)"`.
    pub fn display_list(&self) -> Vec<String> {
        lock(&self.state).display_list.clone()
    }

    fn reset(&self) {
        *lock(&self.state) = DrawState::default();
    }

    fn record(&self, name: &str, args: &[Slot]) {
        let rendered: Vec<String> = args.iter().map(Slot::to_display).collect();
        lock(&self.state).display_list.push(format!("{}({})", name, rendered.join(", ")));
    }

    fn graphics(&self) -> Graphics {
        lock(&self.state).current.clone()
    }

    fn update(&self, f: impl FnOnce(&mut Graphics)) {
        f(&mut lock(&self.state).current);
    }

    fn transform_by(&self, m: Transform) {
        self.update(|g| g.transform = multiply(&g.transform, &m));
    }

    fn dispatch(&self, name: &str, args: &[Slot]) -> Completion<Slot> {
        let required = match name {
            "fillRect" | "strokeRect" | "clearRect" | "rect" | "quadraticCurveTo"
            | "createLinearGradient" | "getImageData" => 4,
            "moveTo" | "lineTo" | "translate" | "scale" => 2,
            "arc" | "arcTo" => 5,
            "bezierCurveTo" | "transform" | "createRadialGradient" => 6,
            "ellipse" => 7,
            "fillText" | "strokeText" | "putImageData" | "drawImage" => 3,
            "rotate" | "measureText" | "createImageData" | "setLineDash" => 1,
            _ => 0,
        };
        require_args(CONTEXT_CLASS, name, args, required)?;

        match name {
            "save" => {
                let mut state = lock(&self.state);
                let snapshot = state.current.clone();
                state.stack.push(snapshot);
            }
            "restore" => {
                let mut state = lock(&self.state);
                if let Some(g) = state.stack.pop() {
                    state.current = g;
                }
            }
            "translate" => {
                if let (Some(x), Some(y)) = (finite(&args[0]), finite(&args[1])) {
                    self.transform_by([1.0, 0.0, 0.0, 1.0, x, y]);
                }
            }
            "scale" => {
                if let (Some(x), Some(y)) = (finite(&args[0]), finite(&args[1])) {
                    self.transform_by([x, 0.0, 0.0, y, 0.0, 0.0]);
                }
            }
            "rotate" => {
                if let Some(a) = finite(&args[0]) {
                    let (s, c) = a.sin_cos();
                    self.transform_by([c, s, -s, c, 0.0, 0.0]);
                }
            }
            "transform" | "setTransform" if args.len() >= 6 => {
                let m: Vec<f64> = args[..6].iter().filter_map(finite).collect();
                if let [a, b, c, d, e, f] = m[..] {
                    if name == "transform" {
                        self.transform_by([a, b, c, d, e, f]);
                    } else {
                        self.update(|g| g.transform = [a, b, c, d, e, f]);
                    }
                }
            }
            "setTransform" if args.is_empty() => self.update(|g| g.transform = IDENTITY),
            "setTransform" => require_args(CONTEXT_CLASS, name, args, 6)?,
            "resetTransform" => self.update(|g| g.transform = IDENTITY),

            "beginPath" | "closePath" | "moveTo" | "lineTo" | "quadraticCurveTo" | "bezierCurveTo"
            | "rect" | "fill" | "stroke" | "clip" | "fillText" | "strokeText" => self.record(name, args),
            "arc" | "ellipse" => {
                let radii = if name == "arc" { &args[2..3] } else { &args[2..4] };
                if radii.iter().any(|r| r.to_number() < 0.0) {
                    return Err(index_size(name, "The radius provided is negative."));
                }
                self.record(name, args);
            }
            "arcTo" => {
                if args[4].to_number() < 0.0 {
                    return Err(index_size(name, "The radius provided is negative."));
                }
                self.record(name, args);
            }

            "fillRect" | "strokeRect" | "clearRect" => self.rect_op(name, args),
            "measureText" => {
                let text = args[0].to_display();
                let size = parse_font_size(&self.graphics().font).unwrap_or(10.0);
                return Ok(Slot::object(TextMetrics::new(&text, size)));
            }

            "createLinearGradient" => {
                let coords: Vec<f64> = args[..4].iter().filter_map(finite).collect();
                if coords.len() != 4 {
                    return Err(non_finite(name));
                }
                return Ok(Slot::object(Gradient::new("linear", coords)));
            }
            "createRadialGradient" => {
                let coords: Vec<f64> = args[..6].iter().filter_map(finite).collect();
                if coords.len() != 6 {
                    return Err(non_finite(name));
                }
                if coords[2] < 0.0 || coords[5] < 0.0 {
                    return Err(index_size(name, "The radius provided is negative."));
                }
                return Ok(Slot::object(Gradient::new("radial", coords)));
            }

            "createImageData" => return self.create_image_data(args),
            "getImageData" => return self.get_image_data(args),
            "putImageData" => self.put_image_data(args)?,
            "drawImage" => self.draw_image(args)?,

            "setLineDash" => {
                let Some(list) = args[0].downcast::<PlainArray>() else {
                    return Err(Thrown::type_error(format!(
                        "Failed to execute 'setLineDash' on '{}': The provided value cannot be converted to a sequence.",
                        CONTEXT_CLASS
                    )));
                };
                let mut dash: Vec<f64> = list.to_vec().iter().map(Slot::to_number).collect();
                if dash.iter().all(|d| d.is_finite() && *d >= 0.0) {
                    if dash.len() % 2 == 1 {
                        dash.extend_from_within(..);
                    }
                    self.update(|g| g.line_dash = dash);
                }
            }
            "getLineDash" => {
                let dash = self.graphics().line_dash.into_iter().map(Slot::Number).collect();
                return Ok(Slot::object(PlainArray::new(dash)));
            }
            other => {
                return Err(Thrown::type_error(format!("ctx.{} is not a function", other)));
            }
        }
        Ok(Slot::Undefined)
    }

    fn rect_op(&self, name: &str, args: &[Slot]) {
        self.record(name, args);
        let nums: Vec<f64> = args[..4].iter().filter_map(finite).collect();
        let [x, y, w, h] = nums[..] else { return };
        let g = self.graphics();
        let Some(r) = device_rect(&g.transform, x, y, w, h) else { return };
        let copy = g.composite == "copy";
        let mut bitmap = lock(&self.bitmap);

        match name {
            "clearRect" => bitmap.clear(&r),
            "fillRect" => {
                if let Some(color) = g.fill_style.solid() {
                    bitmap.fill(&r, color, g.global_alpha, copy);
                }
            }
            _ => {
                let Some(color) = g.stroke_style.solid() else { return };
                if w == 0.0 || h == 0.0 {
                    return;
                }
                let hw = g.line_width * g.transform[0].abs() / 2.0;
                let hh = g.line_width * g.transform[3].abs() / 2.0;
                let bands = [
                    DeviceRect { x0: r.x0 - hw, y0: r.y0 - hh, x1: r.x1 + hw, y1: r.y0 + hh },
                    DeviceRect { x0: r.x0 - hw, y0: r.y1 - hh, x1: r.x1 + hw, y1: r.y1 + hh },
                    DeviceRect { x0: r.x0 - hw, y0: r.y0 + hh, x1: r.x0 + hw, y1: r.y1 - hh },
                    DeviceRect { x0: r.x1 - hw, y0: r.y0 + hh, x1: r.x1 + hw, y1: r.y1 - hh },
                ];
                for band in &bands {
                    bitmap.fill(band, color, g.global_alpha, copy);
                }
            }
        }
    }

    fn image_data_size(method: &str, w: &Slot, h: &Slot) -> Completion<(u32, u32)> {
        let (Some(w), Some(h)) = (finite(w), finite(h)) else {
            return Err(non_finite(method));
        };
        let (w, h) = (w.abs().trunc(), h.abs().trunc());
        if w == 0.0 {
            return Err(index_size(method, "The source width is 0."));
        }
        if h == 0.0 {
            return Err(index_size(method, "The source height is 0."));
        }
        if w * h * 4.0 > f64::from(u32::MAX) {
            return Err(Thrown::range_error("Out of memory at ImageData creation"));
        }
        Ok((w as u32, h as u32))
    }

    fn create_image_data(&self, args: &[Slot]) -> Completion<Slot> {
        let (w, h) = match args[0].downcast::<ImageData>() {
            Some(other) => (other.width, other.height),
            None => {
                require_args(CONTEXT_CLASS, "createImageData", args, 2)?;
                Self::image_data_size("createImageData", &args[0], &args[1])?
            }
        };
        Ok(Slot::object(ImageData::new(w, h, vec![0; w as usize * h as usize * 4])))
    }

    fn get_image_data(&self, args: &[Slot]) -> Completion<Slot> {
        let (Some(sx), Some(sy)) = (finite(&args[0]), finite(&args[1])) else {
            return Err(non_finite("getImageData"));
        };
        let (w, h) = Self::image_data_size("getImageData", &args[2], &args[3])?;
        let (sw, sh) = (args[2].to_number(), args[3].to_number());
        let x = if sw < 0.0 { sx + sw } else { sx }.trunc() as i64;
        let y = if sh < 0.0 { sy + sh } else { sy }.trunc() as i64;
        let pixels = lock(&self.bitmap).region(x, y, w, h);
        Ok(Slot::object(ImageData::new(w, h, pixels)))
    }

    fn put_image_data(&self, args: &[Slot]) -> Completion<()> {
        let Some(image) = args[0].downcast::<ImageData>() else {
            return Err(Thrown::type_error(format!(
                "Failed to execute 'putImageData' on '{}': parameter 1 is not of type 'ImageData'.",
                CONTEXT_CLASS
            )));
        };
        let (Some(dx), Some(dy)) = (finite(&args[1]), finite(&args[2])) else {
            return Err(non_finite("putImageData"));
        };

        let (iw, ih) = (f64::from(image.width), f64::from(image.height));
        let (mut x0, mut y0, mut x1, mut y1) = (0.0, 0.0, iw, ih);
        if args.len() >= 7 {
            let dirty: Vec<f64> = args[3..7].iter().filter_map(finite).collect();
            let [mut ddx, mut ddy, mut ddw, mut ddh] = dirty[..] else {
                return Err(non_finite("putImageData"));
            };
            if ddw < 0.0 {
                ddx += ddw;
                ddw = -ddw;
            }
            if ddh < 0.0 {
                ddy += ddh;
                ddh = -ddh;
            }
            x0 = ddx.max(0.0);
            y0 = ddy.max(0.0);
            x1 = (ddx + ddw).min(iw);
            y1 = (ddy + ddh).min(ih);
        }

        let data = image.data.to_vec();
        let (dx, dy) = (dx.trunc() as i64, dy.trunc() as i64);
        let mut bitmap = lock(&self.bitmap);
        let (bw, bh) = (i64::from(bitmap.width), i64::from(bitmap.height));
        for sy in (y0 as i64)..(y1.ceil() as i64) {
            for sx in (x0 as i64)..(x1.ceil() as i64) {
                let (tx, ty) = (dx + sx, dy + sy);
                if tx < 0 || ty < 0 || tx >= bw || ty >= bh {
                    continue;
                }
                let o = ((sy * i64::from(image.width) + sx) * 4) as usize;
                if let Some(px) = data.get(o..o + 4) {
                    bitmap.write(tx as u32, ty as u32, [px[0], px[1], px[2], px[3]]);
                }
            }
        }
        Ok(())
    }

    fn draw_image(&self, args: &[Slot]) -> Completion<()> {
        if !matches!(args.len(), 3 | 5 | 9) {
            return Err(Thrown::type_error(format!(
                "Failed to execute 'drawImage' on '{}': Valid arities are: [3, 5, 9], but {} arguments provided.",
                CONTEXT_CLASS,
                args.len()
            )));
        }

        let source = if let Some(image) = args[0].downcast::<Image>() {
            image.bitmap.clone().ok_or_else(|| {
                Thrown::new(
                    "InvalidStateError",
                    format!(
                        "Failed to execute 'drawImage' on '{}': The HTMLImageElement provided is in the 'broken' state.",
                        CONTEXT_CLASS
                    ),
                )
            })?
        } else if let Some(canvas) = args[0].downcast::<Canvas>() {
            let bitmap = canvas.snapshot();
            if bitmap.width == 0 || bitmap.height == 0 {
                return Err(Thrown::new(
                    "InvalidStateError",
                    format!(
                        "Failed to execute 'drawImage' on '{}': The image argument is a canvas element with a width or height of 0.",
                        CONTEXT_CLASS
                    ),
                ));
            }
            bitmap
        } else {
            return Err(Thrown::type_error(format!(
                "Failed to execute 'drawImage' on '{}': The provided value is not of type '(CSSImageValue or HTMLCanvasElement or HTMLImageElement or HTMLVideoElement or ImageBitmap or OffscreenCanvas or SVGImageElement or VideoFrame)'.",
                CONTEXT_CLASS
            )));
        };

        self.record("drawImage", args);
        let (iw, ih) = (f64::from(source.width), f64::from(source.height));
        let nums: Vec<f64> = args[1..].iter().map(Slot::to_number).collect();
        if nums.iter().any(|n| !n.is_finite()) {
            return Ok(());
        }
        let (src, dst) = match nums[..] {
            [dx, dy] => ([0.0, 0.0, iw, ih], [dx, dy, iw, ih]),
            [dx, dy, dw, dh] => ([0.0, 0.0, iw, ih], [dx, dy, dw, dh]),
            [sx, sy, sw, sh, dx, dy, dw, dh] => ([sx, sy, sw, sh], [dx, dy, dw, dh]),
            _ => return Ok(()),
        };
        let [mut sx, mut sy, mut sw, mut sh] = src;
        if sw < 0.0 {
            sx += sw;
            sw = -sw;
        }
        if sh < 0.0 {
            sy += sh;
            sh = -sh;
        }
        if sw == 0.0 || sh == 0.0 {
            return Ok(());
        }

        let g = self.graphics();
        let Some(dest) = device_rect(&g.transform, dst[0], dst[1], dst[2], dst[3]) else {
            return Ok(());
        };
        if dest.x1 - dest.x0 == 0.0 || dest.y1 - dest.y0 == 0.0 {
            return Ok(());
        }
        lock(&self.bitmap).blit(&source, [sx, sy, sw, sh], &dest, g.global_alpha, g.composite == "copy");
        Ok(())
    }

    fn read(&self, key: &str) -> Option<Slot> {
        let g = self.graphics();
        Some(match key {
            "fillStyle" => g.fill_style.to_slot(),
            "strokeStyle" => g.stroke_style.to_slot(),
            "lineWidth" => Slot::Number(g.line_width),
            "lineCap" => Slot::String(g.line_cap),
            "lineJoin" => Slot::String(g.line_join),
            "miterLimit" => Slot::Number(g.miter_limit),
            "lineDashOffset" => Slot::Number(g.line_dash_offset),
            "globalAlpha" => Slot::Number(g.global_alpha),
            "globalCompositeOperation" => Slot::String(g.composite),
            "font" => Slot::String(g.font),
            "textAlign" => Slot::String(g.text_align),
            "textBaseline" => Slot::String(g.text_baseline),
            "shadowBlur" => Slot::Number(g.shadow_blur),
            "shadowColor" => Slot::String(g.shadow_color),
            "shadowOffsetX" => Slot::Number(g.shadow_offset_x),
            "shadowOffsetY" => Slot::Number(g.shadow_offset_y),
            "imageSmoothingEnabled" => Slot::Bool(g.image_smoothing),
            _ => return None,
        })
    }

    /// Applies a state assignment. Returns `false` if `key` is not a state property.
    fn write(&self, key: &str, value: &Slot) -> bool {
        let mut state = lock(&self.state);
        let g = &mut state.current;
        match key {
            "fillStyle" => {
                if let Some(p) = Paint::parse(value) {
                    g.fill_style = p;
                }
            }
            "strokeStyle" => {
                if let Some(p) = Paint::parse(value) {
                    g.stroke_style = p;
                }
            }
            "lineWidth" | "miterLimit" => {
                if let Some(n) = finite(value).filter(|n| *n > 0.0) {
                    if key == "lineWidth" { g.line_width = n } else { g.miter_limit = n }
                }
            }
            "lineDashOffset" | "shadowOffsetX" | "shadowOffsetY" => {
                if let Some(n) = finite(value) {
                    match key {
                        "lineDashOffset" => g.line_dash_offset = n,
                        "shadowOffsetX" => g.shadow_offset_x = n,
                        _ => g.shadow_offset_y = n,
                    }
                }
            }
            "shadowBlur" => {
                if let Some(n) = finite(value).filter(|n| *n >= 0.0) {
                    g.shadow_blur = n;
                }
            }
            "globalAlpha" => {
                if let Some(n) = finite(value).filter(|n| (0.0..=1.0).contains(n)) {
                    g.global_alpha = n;
                }
            }
            "lineCap" => {
                if let Some(k) = keyword(value, &["butt", "round", "square"]) {
                    g.line_cap = k;
                }
            }
            "lineJoin" => {
                if let Some(k) = keyword(value, &["round", "bevel", "miter"]) {
                    g.line_join = k;
                }
            }
            "textAlign" => {
                if let Some(k) = keyword(value, &["start", "end", "left", "right", "center"]) {
                    g.text_align = k;
                }
            }
            "textBaseline" => {
                let allowed = ["top", "hanging", "middle", "alphabetic", "ideographic", "bottom"];
                if let Some(k) = keyword(value, &allowed) {
                    g.text_baseline = k;
                }
            }
            "globalCompositeOperation" => {
                if let Some(k) = keyword(value, COMPOSITE_OPS) {
                    g.composite = k;
                }
            }
            "font" => {
                if let Slot::String(s) = value
                    && parse_font_size(s).is_some()
                {
                    g.font = s.clone();
                }
            }
            "shadowColor" => {
                if let Slot::String(s) = value
                    && parse_color(s).is_some()
                {
                    g.shadow_color = s.clone();
                }
            }
            "imageSmoothingEnabled" => g.image_smoothing = value.truthy(),
            _ => return false,
        }
        true
    }
}

#[async_trait::async_trait]
impl HostObject for Context2d {
    fn class(&self) -> &'static str {
        CONTEXT_CLASS
    }

    fn get(&self, key: &str) -> Completion<Slot> {
        if key == "canvas" {
            return Ok(self.canvas.upgrade().map_or(Slot::Null, Slot::Object));
        }
        if let Some(slot) = self.read(key) {
            return Ok(slot);
        }
        if CONTEXT_METHODS.contains(&key) {
            return Ok(Method::slot(CONTEXT_CLASS, key));
        }
        Ok(self.expandos.get(key))
    }

    fn set(&self, key: &str, value: Slot) -> Completion<()> {
        if key == "canvas" {
            return Ok(());
        }
        if !self.write(key, &value) {
            self.expandos.set(key, value);
        }
        Ok(())
    }

    async fn call_method(&self, _this: &ObjectRef, name: &str, args: Vec<Slot>) -> Completion<Slot> {
        self.dispatch(name, &args)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
//  SUPPORTING OBJECTS
// ============================================================================

/// `CanvasGradient`. Stops are validated and kept; gradients are never rasterised.
pub struct Gradient {
    kind: &'static str,
    coords: Vec<f64>,
    stops: Mutex<Vec<(f64, String)>>,
}

impl Gradient {
    fn new(kind: &'static str, coords: Vec<f64>) -> Self {
        Self { kind, coords, stops: Mutex::new(Vec::new()) }
    }

    pub fn stops(&self) -> Vec<(f64, String)> {
        lock(&self.stops).clone()
    }
}

#[async_trait::async_trait]
impl HostObject for Gradient {
    fn class(&self) -> &'static str {
        "CanvasGradient"
    }

    fn get(&self, key: &str) -> Completion<Slot> {
        Ok(match key {
            "addColorStop" => Method::slot(self.class(), key),
            _ => Slot::Undefined,
        })
    }

    fn set(&self, _key: &str, _value: Slot) -> Completion<()> {
        Ok(())
    }

    async fn call_method(&self, _this: &ObjectRef, name: &str, args: Vec<Slot>) -> Completion<Slot> {
        if name != "addColorStop" {
            return Err(Thrown::type_error(format!("gradient.{} is not a function", name)));
        }
        require_args(self.class(), name, &args, 2)?;
        let offset = num(&args, 0);
        if !offset.is_finite() {
            return Err(Thrown::type_error(
                "Failed to execute 'addColorStop' on 'CanvasGradient': The provided double value is non-finite.",
            ));
        }
        if !(0.0..=1.0).contains(&offset) {
            return Err(Thrown::new(
                "IndexSizeError",
                format!(
                    "Failed to execute 'addColorStop' on 'CanvasGradient': The provided value ({}) is outside the range (0.0, 1.0).",
                    args[0].to_display()
                ),
            ));
        }
        let color = args[1].to_display();
        if parse_color(&color).is_none() {
            return Err(Thrown::new(
                "SyntaxError",
                format!(
                    "Failed to execute 'addColorStop' on 'CanvasGradient': The value provided ('{}') could not be parsed as a color.",
                    color
                ),
            ));
        }
        lock(&self.stops).push((offset, color));
        Ok(Slot::Undefined)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Debug for Gradient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}Gradient{:?}", self.kind, self.coords)
    }
}

/// `ImageData`. Its `data` array is shared, so writes through it land in the image.
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    data: Arc<ByteArray>,
}

impl ImageData {
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Self {
        Self { width, height, data: Arc::new(ByteArray::new(rgba)) }
    }

    pub fn pixels(&self) -> Vec<u8> {
        self.data.to_vec()
    }
}

impl HostObject for ImageData {
    fn class(&self) -> &'static str {
        "ImageData"
    }

    fn get(&self, key: &str) -> Completion<Slot> {
        Ok(match key {
            "width" => Slot::from(self.width),
            "height" => Slot::from(self.height),
            "data" => Slot::Object(self.data.clone()),
            "colorSpace" => Slot::from("srgb"),
            _ => Slot::Undefined,
        })
    }

    fn set(&self, _key: &str, _value: Slot) -> Completion<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `HTMLImageElement`, produced by an image load.
pub struct Image {
    src: String,
    bitmap: Option<Bitmap>,
    expandos: Expandos,
}

impl Image {
    pub fn decoded(src: impl Into<String>, bitmap: Bitmap) -> Self {
        Self { src: src.into(), bitmap: Some(bitmap), expandos: Expandos::default() }
    }

    /// An image whose data could not be used.
    pub fn broken(src: impl Into<String>) -> Self {
        Self { src: src.into(), bitmap: None, expandos: Expandos::default() }
    }
}

impl HostObject for Image {
    fn class(&self) -> &'static str {
        "HTMLImageElement"
    }

    fn get(&self, key: &str) -> Completion<Slot> {
        let (w, h) = self.bitmap.as_ref().map_or((0, 0), |b| (b.width, b.height));
        Ok(match key {
            "width" | "naturalWidth" => Slot::from(w),
            "height" | "naturalHeight" => Slot::from(h),
            "complete" => Slot::Bool(true),
            "src" => Slot::String(self.src.clone()),
            _ => self.expandos.get(key),
        })
    }

    fn set(&self, key: &str, value: Slot) -> Completion<()> {
        if !matches!(key, "width" | "height" | "naturalWidth" | "naturalHeight" | "complete" | "src") {
            self.expandos.set(key, value);
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `FontFace`, produced by a font load.
pub struct FontFace {
    family: String,
    size: usize,
}

impl FontFace {
    pub fn new(family: impl Into<String>, size: usize) -> Self {
        Self { family: family.into(), size }
    }
}

impl HostObject for FontFace {
    fn class(&self) -> &'static str {
        "FontFace"
    }

    fn get(&self, key: &str) -> Completion<Slot> {
        Ok(match key {
            "family" => Slot::String(self.family.clone()),
            "status" => Slot::from("loaded"),
            "style" | "weight" | "stretch" => Slot::from("normal"),
            "display" => Slot::from("auto"),
            "byteLength" => Slot::Number(self.size as f64),
            _ => Slot::Undefined,
        })
    }

    fn set(&self, _key: &str, _value: Slot) -> Completion<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `TextMetrics` with a fixed advance of 0.6em per character.
pub struct TextMetrics {
    width: f64,
    size: f64,
}

impl TextMetrics {
    fn new(text: &str, size: f64) -> Self {
        Self { width: text.chars().count() as f64 * size * 0.6, size }
    }
}

impl HostObject for TextMetrics {
    fn class(&self) -> &'static str {
        "TextMetrics"
    }

    fn get(&self, key: &str) -> Completion<Slot> {
        Ok(match key {
            "width" => Slot::Number(self.width),
            "actualBoundingBoxLeft" => Slot::Number(0.0),
            "actualBoundingBoxRight" => Slot::Number(self.width),
            "actualBoundingBoxAscent" | "fontBoundingBoxAscent" => Slot::Number(self.size * 0.8),
            "actualBoundingBoxDescent" | "fontBoundingBoxDescent" => Slot::Number(self.size * 0.2),
            _ => Slot::Undefined,
        })
    }

    fn set(&self, _key: &str, _value: Slot) -> Completion<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
