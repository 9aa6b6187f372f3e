//! OCD v8 二进制地图文件的读写。
//!
//! 文件由一个固定头部和四套索引结构组成：颜色表、符号索引页、对象索引页、
//! 字符串索引页（底图引用等）。导入方向把字节缓冲还原成 `omap_core` 的
//! 地图模型；导出方向把模型写回同样的页式布局。两个方向共用同一套
//! 单位换算与符号交叉引用逻辑。

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use omap_core::geometry::{Bounds, MapCoord, MapCoordF, mark_closed_subpaths};
use omap_core::map::{
    AreaSymbol, CapStyle, ColorId, CombinedSymbol, ElementSymbol, FillPattern, FramingMode,
    HorizontalAlignment, JoinStyle, LinePattern, LineSymbol, Map, MapColor, MapLayer, MapView,
    Object, PathObject, PointObject, PointPattern, PointSymbol, PointSymbolElement, Symbol,
    SymbolId, SymbolKind, TemplateImage, TextAnchor, TextFraming, TextObject, TextSymbol,
    VerticalAlignment, ZOOM_IN_LIMIT, ZOOM_OUT_LIMIT,
};

#[derive(Debug, Error)]
pub enum OcdError {
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write file {path:?}: {source}")]
    WriteError {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("not an OCD file (bad magic bytes)")]
    NotOcdFile,
    #[error("OCD files of version {0} cannot be loaded")]
    VersionUnsupported(u16),
    #[error("truncated record while reading {context}")]
    Truncated { context: &'static str },
    #[error("the map contains {0} colors, OCD version 8 supports at most 256")]
    TooManyColors(usize),
    #[error("invalid file structure: {0}")]
    InvalidStructure(String),
    #[error("unsupported encoding name: {0}")]
    UnsupportedEncoding(String),
}

/// 导入结果：填充好的地图、视图，以及过程中累积的非致命警告。
#[derive(Debug)]
pub struct ImportedMap {
    pub map: Map,
    pub view: MapView,
    pub warnings: Vec<String>,
}

/// 导出结果：完整的文件字节，以及过程中累积的非致命警告。
#[derive(Debug)]
pub struct ExportedBuffer {
    pub bytes: Vec<u8>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ImportOptions {
    /// 只读符号表，跳过对象、底图与视图。
    pub symbols_only: bool,
    pub narrow: NarrowEncoding,
    pub wide: WideEncoding,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            symbols_only: false,
            narrow: NarrowEncoding::Windows1252,
            wide: WideEncoding::Utf16Le,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExportOptions {
    pub narrow: NarrowEncoding,
    pub wide: WideEncoding,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            narrow: NarrowEncoding::Windows1252,
            wide: WideEncoding::Utf16Le,
        }
    }
}

/// 判断缓冲是否是本格式：前两个字节必须是 AD 0C。
pub fn understands(buffer: &[u8]) -> bool {
    buffer.len() >= 2 && buffer[0] == 0xAD && buffer[1] == 0x0C
}

/// 从字节缓冲导入地图。
pub fn import_ocd(data: &[u8], options: &ImportOptions) -> Result<ImportedMap, OcdError> {
    OcdImporter::new(data, options).import()
}

/// 把地图导出为一段连续的文件字节。
pub fn export_ocd(
    map: &Map,
    view: Option<&MapView>,
    options: &ExportOptions,
) -> Result<ExportedBuffer, OcdError> {
    OcdExporter::new(map, view, options).export()
}

pub trait MapLoader {
    fn load(&self, path: &Path) -> Result<ImportedMap, OcdError>;
}

pub trait MapSaver {
    fn save(&self, map: &Map, view: Option<&MapView>, path: &Path) -> Result<Vec<String>, OcdError>;
}

/// 面向文件路径的门面。编码可按配置覆盖。
pub struct OcdFacade {
    narrow: NarrowEncoding,
    wide: WideEncoding,
    symbols_only: bool,
}

impl OcdFacade {
    pub fn new() -> Self {
        Self {
            narrow: NarrowEncoding::Windows1252,
            wide: WideEncoding::Utf16Le,
            symbols_only: false,
        }
    }

    /// 按名字选择字符串编码，名字不认识时报错。
    pub fn with_encodings(narrow: &str, wide: &str) -> Result<Self, OcdError> {
        Ok(Self {
            narrow: NarrowEncoding::from_name(narrow)?,
            wide: WideEncoding::from_name(wide)?,
            symbols_only: false,
        })
    }

    pub fn symbols_only(mut self, value: bool) -> Self {
        self.symbols_only = value;
        self
    }
}

impl Default for OcdFacade {
    fn default() -> Self {
        Self::new()
    }
}

impl MapLoader for OcdFacade {
    fn load(&self, path: &Path) -> Result<ImportedMap, OcdError> {
        let data = fs::read(path).map_err(|source| OcdError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let options = ImportOptions {
            symbols_only: self.symbols_only,
            narrow: self.narrow,
            wide: self.wide,
        };
        import_ocd(&data, &options)
    }
}

impl MapSaver for OcdFacade {
    fn save(
        &self,
        map: &Map,
        view: Option<&MapView>,
        path: &Path,
    ) -> Result<Vec<String>, OcdError> {
        let options = ExportOptions {
            narrow: self.narrow,
            wide: self.wide,
        };
        let exported = export_ocd(map, view, &options)?;
        fs::write(path, &exported.bytes).map_err(|source| OcdError::WriteError {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(exported.warnings)
    }
}

// ---------------------------------------------------------------------------
// 字符串编码
// ---------------------------------------------------------------------------

/// 单字节字符串编码。默认 Windows-1252，这是旧文件最常见的选择。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrowEncoding {
    Windows1252,
    Latin1,
    Utf8,
}

/// 双字节字符串编码。默认 UTF-16 小端。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WideEncoding {
    Utf16Le,
    Utf16Be,
}

// Windows-1252 在 0x80..0x9F 区间与 Latin-1 的差异。
// 未定义的码位按同值控制字符透传。
const WINDOWS_1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{0081}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{008D}', '\u{017D}', '\u{008F}',
    '\u{0090}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\u{009D}', '\u{017E}', '\u{0178}',
];

impl NarrowEncoding {
    pub fn from_name(name: &str) -> Result<Self, OcdError> {
        match name.to_ascii_lowercase().as_str() {
            "windows-1252" | "cp1252" => Ok(Self::Windows1252),
            "latin-1" | "iso-8859-1" => Ok(Self::Latin1),
            "utf-8" => Ok(Self::Utf8),
            other => Err(OcdError::UnsupportedEncoding(other.to_string())),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Self::Windows1252 => bytes
                .iter()
                .map(|&b| match b {
                    0x80..=0x9F => WINDOWS_1252_HIGH[(b - 0x80) as usize],
                    _ => b as char,
                })
                .collect(),
            Self::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    /// 编码为字节序列，无法表示的字符替换为 '?'。
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Self::Windows1252 => text
                .chars()
                .map(|c| {
                    if (c as u32) < 0x80 || ((c as u32) >= 0xA0 && (c as u32) <= 0xFF) {
                        c as u8
                    } else {
                        WINDOWS_1252_HIGH
                            .iter()
                            .position(|&h| h == c)
                            .map(|i| 0x80 + i as u8)
                            .unwrap_or(b'?')
                    }
                })
                .collect(),
            Self::Latin1 => text
                .chars()
                .map(|c| if (c as u32) <= 0xFF { c as u8 } else { b'?' })
                .collect(),
            Self::Utf8 => text.as_bytes().to_vec(),
        }
    }
}

impl WideEncoding {
    pub fn from_name(name: &str) -> Result<Self, OcdError> {
        match name.to_ascii_lowercase().as_str() {
            "utf-16-le" | "utf-16le" => Ok(Self::Utf16Le),
            "utf-16-be" | "utf-16be" => Ok(Self::Utf16Be),
            other => Err(OcdError::UnsupportedEncoding(other.to_string())),
        }
    }

    fn unit(&self, bytes: [u8; 2]) -> u16 {
        match self {
            Self::Utf16Le => u16::from_le_bytes(bytes),
            Self::Utf16Be => u16::from_be_bytes(bytes),
        }
    }

    fn unit_bytes(&self, unit: u16) -> [u8; 2] {
        match self {
            Self::Utf16Le => unit.to_le_bytes(),
            Self::Utf16Be => unit.to_be_bytes(),
        }
    }

    pub fn decode_units(&self, bytes: &[u8]) -> Vec<u16> {
        bytes
            .chunks_exact(2)
            .map(|pair| self.unit([pair[0], pair[1]]))
            .collect()
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        char::decode_utf16(self.decode_units(bytes))
            .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    }

    pub fn encode(&self, text: &str) -> Vec<u8> {
        text.encode_utf16()
            .flat_map(|unit| self.unit_bytes(unit))
            .collect()
    }
}

/// 长度前缀（Pascal）字符串解码：1 字节长度 + 载荷，上限 255 字节。
fn decode_pascal_string(encoding: NarrowEncoding, buffer: &[u8]) -> String {
    if buffer.is_empty() {
        return String::new();
    }
    let len = (buffer[0] as usize).min(buffer.len() - 1);
    encoding.decode(&buffer[1..1 + len])
}

/// 零终止单字节字符串解码，最多扫描 `buffer` 全长。
/// `ignore_first_newline` 时去掉开头的 CR-LF（旧格式有时会多写一对）。
fn decode_c_string(encoding: NarrowEncoding, buffer: &[u8], ignore_first_newline: bool) -> String {
    let mut end = buffer.len();
    for (i, &b) in buffer.iter().enumerate() {
        if b == 0 {
            end = i;
            break;
        }
    }
    let mut slice = &buffer[..end];
    if ignore_first_newline && slice.len() >= 2 && slice[0] == b'\r' && slice[1] == b'\n' {
        slice = &slice[2..];
    }
    encoding.decode(slice)
}

/// 零终止双字节字符串解码，`buffer` 长度以字节计。
fn decode_wide_c_string(encoding: WideEncoding, buffer: &[u8], ignore_first_newline: bool) -> String {
    let mut units = encoding.decode_units(buffer);
    if let Some(zero) = units.iter().position(|&u| u == 0) {
        units.truncate(zero);
    }
    let mut start = 0;
    if ignore_first_newline && units.len() >= 2 && units[0] == u16::from(b'\r') && units[1] == u16::from(b'\n')
    {
        start = 2;
    }
    char::decode_utf16(units[start..].iter().copied())
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

// ---------------------------------------------------------------------------
// 单位与坐标换算
// ---------------------------------------------------------------------------

// 文件内长度与坐标单位是 1/100 毫米，模型单位是 1/1000 毫米；
// 角度是十分之一度、逆时针，模型用弧度；文件 Y 轴与模型相反。

#[inline]
fn convert_size(file_size: i32) -> i32 {
    file_size * 10
}

#[inline]
fn convert_size_back(model_size: i64) -> i32 {
    (model_size / 10) as i32
}

/// 十分之一度 → 弧度，归一化到 [0, 2π)。
/// 负的影线角度会触发下游渲染死循环，这里一律归一化消除。
fn convert_rotation(file_angle: i32) -> f64 {
    let mut a = (std::f64::consts::PI / 180.0) * (0.1 * file_angle as f64);
    while a < 0.0 {
        a += 2.0 * std::f64::consts::PI;
    }
    while a >= 2.0 * std::f64::consts::PI {
        a -= 2.0 * std::f64::consts::PI;
    }
    a
}

/// 弧度 → 十分之一度，四舍五入。
fn convert_rotation_back(angle: f64) -> i16 {
    (10.0 * angle * 180.0 / std::f64::consts::PI).round() as i16
}

#[inline]
fn convert_point(file_x: i32, file_y: i32) -> MapCoord {
    MapCoord::new(i64::from(file_x) * 10, i64::from(file_y) * -10)
}

// 坐标打包：32 位值的高 24 位是 1/100 毫米坐标（即左移 8 位），
// 低 8 位是标志。x 的低位放曲线控制点标志，y 的低位放角点/洞/虚线标志。
const PX_CTL1: u8 = 0x01;
const PX_CTL2: u8 = 0x02;
const PY_CORNER: u8 = 0x01;
const PY_HOLE: u8 = 0x02;
const PY_DASH: u8 = 0x08;

/// 文件内的打包坐标点，8 字节。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct OcdPoint {
    x: i32,
    y: i32,
}

impl OcdPoint {
    fn pack(coord: &MapCoord, x_flags: u8, y_flags: u8) -> Self {
        Self {
            x: (((coord.x / 10) as i32) << 8) | i32::from(x_flags),
            y: (((coord.y / -10) as i32) << 8) | i32::from(y_flags),
        }
    }

    #[inline]
    fn x_coord(self) -> i32 {
        self.x >> 8
    }

    #[inline]
    fn y_coord(self) -> i32 {
        self.y >> 8
    }

    #[inline]
    fn x_flags(self) -> u8 {
        (self.x & 0xFF) as u8
    }

    #[inline]
    fn y_flags(self) -> u8 {
        (self.y & 0xFF) as u8
    }

    fn to_map_coord(self) -> MapCoord {
        convert_point(self.x_coord(), self.y_coord())
    }
}

/// 版本 8 的具体字节布局在这里集中定义。所有多字节值均为小端。
pub mod layout {
    pub const OCD_MAGIC: [u8; 2] = [0xAD, 0x0C];
    pub const OCD_FILE_TYPE: u16 = 2;
    pub const OCD_VERSION: u16 = 8;

    pub const HEADER_SIZE: usize = 48;
    pub const SETUP_SIZE: usize = 48;
    pub const COLOR_ENTRY_SIZE: usize = 40;
    pub const COLOR_NAME_SIZE: usize = 32;

    pub const SYMBOL_COMMON_SIZE: usize = 340;
    pub const SYMBOL_NAME_SIZE: usize = 32;
    pub const SYMBOL_COLOR_MASK_SIZE: usize = 32;
    pub const ICON_SIZE: usize = 22;
    pub const ICON_BYTES_PER_ROW: usize = 12;
    pub const ICON_BYTES: usize = ICON_SIZE * ICON_BYTES_PER_ROW;

    pub const POINT_FIELDS_SIZE: usize = 4;
    pub const LINE_FIELDS_SIZE: usize = 68;
    pub const AREA_FIELDS_SIZE: usize = 28;
    pub const TEXT_FIELDS_SIZE: usize = 208;
    pub const RECT_FIELDS_SIZE: usize = 48;

    // 文字符号记录内需要就地修改的字段偏移
    pub const SYMBOL_NUMBER_OFFSET: usize = 2;
    pub const TEXT_HALIGN_OFFSET: usize = SYMBOL_COMMON_SIZE + SYMBOL_NAME_SIZE + 14;

    pub const SYMBOL_TYPE_POINT: u8 = 1;
    pub const SYMBOL_TYPE_LINE: u8 = 2;
    pub const SYMBOL_TYPE_AREA: u8 = 3;
    pub const SYMBOL_TYPE_TEXT: u8 = 4;
    pub const SYMBOL_TYPE_RECT: u8 = 5;

    pub const OBJECT_TYPE_POINT: u8 = 1;
    pub const OBJECT_TYPE_LINE: u8 = 2;
    pub const OBJECT_TYPE_AREA: u8 = 3;
    pub const OBJECT_TYPE_TEXT: u8 = 4;
    pub const OBJECT_TYPE_TEXT_BOX: u8 = 5;

    pub const ELEMENT_TYPE_LINE: i16 = 1;
    pub const ELEMENT_TYPE_AREA: i16 = 2;
    pub const ELEMENT_TYPE_CIRCLE: i16 = 3;
    pub const ELEMENT_TYPE_DOT: i16 = 4;
    // 成分头部占两个坐标单元（16 字节），npts 以坐标单元计
    pub const ELEMENT_HEADER_UNITS: usize = 2;
    pub const POINT_UNIT_SIZE: usize = 8;

    pub const OBJECT_HEADER_SIZE: usize = 16;
    pub const OBJECT_ENTRY_SIZE: usize = 24;
    pub const STRING_ENTRY_SIZE: usize = 12;
    pub const TEMPLATE_PREFIX_SIZE: usize = 44;
    pub const STRING_TYPE_TEMPLATE: i32 = 8;

    pub const INDEX_PAGE_SLOTS: usize = 256;
    pub const SYMBOL_PAGE_SIZE: usize = 4 + INDEX_PAGE_SLOTS * 4;
    pub const OBJECT_PAGE_SIZE: usize = 4 + INDEX_PAGE_SLOTS * OBJECT_ENTRY_SIZE;
    pub const STRING_PAGE_SIZE: usize = 4 + INDEX_PAGE_SLOTS * STRING_ENTRY_SIZE;
}

use layout::*;

// ---------------------------------------------------------------------------
// 有界游标
// ---------------------------------------------------------------------------

/// 顺序读取用的切片游标。每次读取前检查剩余字节数，
/// 数据不足时报告截断错误而不是越界。
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn at(data: &'a [u8], offset: usize, context: &'static str) -> Result<Self, OcdError> {
        if offset > data.len() {
            return Err(OcdError::Truncated { context });
        }
        Ok(Self { data, pos: offset })
    }

    #[inline]
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_bytes(&mut self, n: usize, context: &'static str) -> Result<&'a [u8], OcdError> {
        if self.remaining() < n {
            return Err(OcdError::Truncated { context });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn skip(&mut self, n: usize, context: &'static str) -> Result<(), OcdError> {
        self.read_bytes(n, context).map(|_| ())
    }

    fn read_u8(&mut self, context: &'static str) -> Result<u8, OcdError> {
        Ok(self.read_bytes(1, context)?[0])
    }

    fn read_u16(&mut self, context: &'static str) -> Result<u16, OcdError> {
        let b = self.read_bytes(2, context)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_i16(&mut self, context: &'static str) -> Result<i16, OcdError> {
        Ok(self.read_u16(context)? as i16)
    }

    fn read_u32(&mut self, context: &'static str) -> Result<u32, OcdError> {
        let b = self.read_bytes(4, context)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i32(&mut self, context: &'static str) -> Result<i32, OcdError> {
        Ok(self.read_u32(context)? as i32)
    }

    fn read_f64(&mut self, context: &'static str) -> Result<f64, OcdError> {
        let b = self.read_bytes(8, context)?;
        Ok(f64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn read_point(&mut self, context: &'static str) -> Result<OcdPoint, OcdError> {
        let x = self.read_i32(context)?;
        let y = self.read_i32(context)?;
        Ok(OcdPoint { x, y })
    }
}

// ---------------------------------------------------------------------------
// 文件头
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
struct FileHeader {
    ftype: u16,
    major: u16,
    minor: u16,
    osymidx: u32,
    oobjidx: u32,
    osetup: u32,
    ssetup: u32,
    infopos: u32,
    infosize: u32,
    ostringidx: u32,
    ocolors: u32,
    ncolors: u16,
}

impl FileHeader {
    fn read(data: &[u8]) -> Result<Self, OcdError> {
        let mut cur = Cursor::new(data);
        let magic = cur.read_bytes(2, "文件头")?;
        if magic != OCD_MAGIC {
            return Err(OcdError::NotOcdFile);
        }
        let ftype = cur.read_u16("文件头")?;
        let major = cur.read_u16("文件头")?;
        let minor = cur.read_u16("文件头")?;
        let osymidx = cur.read_u32("文件头")?;
        let oobjidx = cur.read_u32("文件头")?;
        let osetup = cur.read_u32("文件头")?;
        let ssetup = cur.read_u32("文件头")?;
        let infopos = cur.read_u32("文件头")?;
        let infosize = cur.read_u32("文件头")?;
        let ostringidx = cur.read_u32("文件头")?;
        let ocolors = cur.read_u32("文件头")?;
        let ncolors = cur.read_u16("文件头")?;
        cur.skip(2, "文件头")?;
        Ok(Self {
            ftype,
            major,
            minor,
            osymidx,
            oobjidx,
            osetup,
            ssetup,
            infopos,
            infosize,
            ostringidx,
            ocolors,
            ncolors,
        })
    }

    fn write(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&OCD_MAGIC);
        out[2..4].copy_from_slice(&self.ftype.to_le_bytes());
        out[4..6].copy_from_slice(&self.major.to_le_bytes());
        out[6..8].copy_from_slice(&self.minor.to_le_bytes());
        out[8..12].copy_from_slice(&self.osymidx.to_le_bytes());
        out[12..16].copy_from_slice(&self.oobjidx.to_le_bytes());
        out[16..20].copy_from_slice(&self.osetup.to_le_bytes());
        out[20..24].copy_from_slice(&self.ssetup.to_le_bytes());
        out[24..28].copy_from_slice(&self.infopos.to_le_bytes());
        out[28..32].copy_from_slice(&self.infosize.to_le_bytes());
        out[32..36].copy_from_slice(&self.ostringidx.to_le_bytes());
        out[36..40].copy_from_slice(&self.ocolors.to_le_bytes());
        out[40..42].copy_from_slice(&self.ncolors.to_le_bytes());
        // 其余字节保留为零
    }
}

// ---------------------------------------------------------------------------
// 图标调色板匹配
// ---------------------------------------------------------------------------

// 经典 16 色调色板，仅用于把符号预览图标量化成 4 位/像素的旧式图标，
// 与文档颜色数据无关。
const ICON_PALETTE: [(u8, u8, u8); 16] = [
    (0, 0, 0),
    (128, 0, 0),
    (0, 128, 0),
    (128, 128, 0),
    (0, 0, 128),
    (128, 0, 128),
    (0, 128, 128),
    (128, 128, 128),
    (192, 192, 192),
    (255, 0, 0),
    (0, 255, 0),
    (255, 255, 0),
    (0, 0, 255),
    (255, 0, 255),
    (0, 255, 255),
    (255, 255, 255),
];

/// RGB → HSV，色相 0..360，饱和度/明度 0..255。
fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let rf = f32::from(r) / 255.0;
    let gf = f32::from(g) / 255.0;
    let bf = f32::from(b) / 255.0;
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;
    let hue = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (((gf - bf) / delta) % 6.0)
    } else if max == gf {
        60.0 * ((bf - rf) / delta + 2.0)
    } else {
        60.0 * ((rf - gf) / delta + 4.0)
    };
    let hue = if hue < 0.0 { hue + 360.0 } else { hue };
    let saturation = if max == 0.0 { 0.0 } else { delta / max };
    (hue, saturation * 255.0, max * 255.0)
}

/// 在 16 色调色板里为任意 RGB 像素找最接近的下标。
/// 距离是 HSV 空间的加权平方距离（色相按 360 度环绕），
/// 并对不太可能出现的颜色（白、红、黄、灰）施加手调的惩罚系数。
fn icon_color_index(r: u8, g: u8, b: u8, alpha: u8) -> u8 {
    // 透明像素记为白色
    if alpha < 128 {
        return 15;
    }
    let (hue, sat, val) = rgb_to_hsv(r, g, b);
    let mut best_index = 0;
    let mut best_distance = f32::MAX;
    for (i, &(pr, pg, pb)) in ICON_PALETTE.iter().enumerate() {
        let (ph, ps, pv) = rgb_to_hsv(pr, pg, pb);
        let mut hue_dist = (hue - ph).abs();
        hue_dist = hue_dist.min(360.0 - hue_dist);
        let mut distance =
            hue_dist * hue_dist + 0.1 * (sat - ps) * (sat - ps) + 0.1 * (val - pv) * (val - pv);
        distance *= match i {
            1 => 1.5,  // 暗红
            3 => 2.0,  // 橄榄
            7 => 2.0,  // 深灰
            8 => 3.0,  // 浅灰
            9 => 3.0,  // 纯红不太可能
            11 => 2.0, // 黄
            15 => 4.0, // 白最不可能
            _ => 1.0,
        };
        if distance < best_distance {
            best_distance = distance;
            best_index = i;
        }
    }
    best_index as u8
}

// ===========================================================================
// 导入器
// ===========================================================================

/// 符号记录的公共头部字段。
struct SymbolCommon {
    number: i16,
    type_tag: u8,
    base_flags: u8,
    status: u8,
    name: String,
}

/// 矩形符号展开记录。只在一次导入期间存活，
/// 在展开矩形对象为边框/网格线/标注对象时被消费。
struct RectangleInfo {
    border_line: SymbolId,
    has_grid: bool,
    inner_line: Option<SymbolId>,
    text: Option<SymbolId>,
    /// 圆角半径，毫米。
    corner_radius: f64,
    number_from_bottom: bool,
    /// 单元格尺寸，毫米。
    cell_width: f64,
    cell_height: f64,
    unnumbered_cells: i32,
    unnumbered_text: String,
}

/// 符号记录导入的中间结果，由调度方完成注册。
enum ImportedSymbol {
    Single(Symbol),
    Text {
        symbol: Symbol,
        halign: HorizontalAlignment,
    },
    Combined {
        combined: Symbol,
        parts: Vec<Symbol>,
    },
    /// 矩形符号在处理函数内部直接展开进地图。
    AlreadyHandled,
}

/// 一次导入操作。所有可变状态（编码选择、交叉引用表、警告）
/// 都属于本实例，生命周期与单次导入一致。
struct OcdImporter<'a> {
    data: &'a [u8],
    narrow: NarrowEncoding,
    wide: WideEncoding,
    symbols_only: bool,
    map: Map,
    view: MapView,
    color_index: HashMap<i16, ColorId>,
    symbol_index: HashMap<i16, SymbolId>,
    text_halign: HashMap<SymbolId, HorizontalAlignment>,
    rectangle_info: HashMap<i16, RectangleInfo>,
    warnings: Vec<String>,
}

impl<'a> OcdImporter<'a> {
    fn new(data: &'a [u8], options: &ImportOptions) -> Self {
        Self {
            data,
            narrow: options.narrow,
            wide: options.wide,
            symbols_only: options.symbols_only,
            map: Map::new(),
            view: MapView::default(),
            color_index: HashMap::new(),
            symbol_index: HashMap::new(),
            text_halign: HashMap::new(),
            rectangle_info: HashMap::new(),
            warnings: Vec::new(),
        }
    }

    fn add_warning(&mut self, message: String) {
        tracing::warn!("{message}");
        self.warnings.push(message);
    }

    fn import(mut self) -> Result<ImportedMap, OcdError> {
        let header = FileHeader::read(self.data)?;
        if header.major <= 5 || header.major >= 9 {
            return Err(OcdError::VersionUnsupported(header.major));
        }
        debug!(
            ftype = header.ftype,
            major = header.major,
            minor = header.minor,
            "开始导入 OCD 文件"
        );

        // 设置块：比例尺、视图中心、缩放
        let mut setup_center = OcdPoint::default();
        let mut setup_zoom = 1.0_f64;
        if header.osetup != 0 && header.ssetup as usize >= SETUP_SIZE {
            let mut cur = Cursor::at(self.data, header.osetup as usize, "设置块")?;
            setup_center = cur.read_point("设置块")?;
            let scale = cur.read_f64("设置块")?;
            setup_zoom = cur.read_f64("设置块")?;
            if scale >= 1.0 {
                self.map.scale_denominator = scale.round() as u32;
            }
        }

        // 地图注记
        if header.infosize > 0 {
            let start = header.infopos as usize;
            let end = start.saturating_add(header.infosize as usize);
            if end <= self.data.len() {
                self.map.notes = decode_c_string(self.narrow, &self.data[start..end], false);
            } else {
                return Err(OcdError::Truncated { context: "地图注记" });
            }
        }

        self.import_colors(&header)?;
        self.import_symbols(&header)?;

        if !self.symbols_only {
            self.import_objects(&header)?;
            self.import_strings(&header)?;

            if setup_zoom >= ZOOM_OUT_LIMIT && setup_zoom <= ZOOM_IN_LIMIT {
                self.view.set_zoom(setup_zoom);
            }
            self.view.center = setup_center.to_map_coord();
        }

        debug!(
            colors = self.map.color_count(),
            symbols = self.map.symbol_count(),
            objects = self.map.object_count(),
            warnings = self.warnings.len(),
            "导入完成"
        );
        Ok(ImportedMap {
            map: self.map,
            view: self.view,
            warnings: self.warnings,
        })
    }

    fn import_colors(&mut self, header: &FileHeader) -> Result<(), OcdError> {
        if header.ncolors == 0 {
            return Ok(());
        }
        let mut cur = Cursor::at(self.data, header.ocolors as usize, "颜色表")?;
        for i in 0..header.ncolors {
            let number = cur.read_i16("颜色表")?;
            cur.skip(2, "颜色表")?;
            let cyan = cur.read_u8("颜色表")?;
            let magenta = cur.read_u8("颜色表")?;
            let yellow = cur.read_u8("颜色表")?;
            let black = cur.read_u8("颜色表")?;
            let name_raw = cur.read_bytes(COLOR_NAME_SIZE, "颜色表")?;

            let mut color = MapColor::new(decode_pascal_string(self.narrow, name_raw));
            // 文件内 CMYK 以 0–200 的整数存储
            color.c = 0.005 * f32::from(cyan);
            color.m = 0.005 * f32::from(magenta);
            color.y = 0.005 * f32::from(yellow);
            color.k = 0.005 * f32::from(black);
            color.opacity = 1.0;
            color.update_from_cmyk();

            let id = self.map.add_color(color);
            debug_assert_eq!(self.map.color(id).priority, i32::from(i as i16));
            self.color_index.insert(number, id);
        }
        Ok(())
    }

    fn convert_color(&mut self, number: i16) -> Option<ColorId> {
        match self.color_index.get(&number) {
            Some(&id) => Some(id),
            None => {
                self.add_warning(format!("颜色编号 {number} 不存在，忽略该颜色"));
                None
            }
        }
    }

    /// 逐页遍历符号索引，对每个非空槽位导入一条符号记录。
    fn import_symbols(&mut self, header: &FileHeader) -> Result<(), OcdError> {
        let max_pages = self.data.len() / SYMBOL_PAGE_SIZE + 1;
        let mut page_offset = header.osymidx;
        let mut pages = 0usize;
        while page_offset != 0 {
            pages += 1;
            if pages > max_pages {
                return Err(OcdError::InvalidStructure("符号索引页链表成环".to_string()));
            }
            let mut cur = Cursor::at(self.data, page_offset as usize, "符号索引页")?;
            let next = cur.read_u32("符号索引页")?;
            for _ in 0..INDEX_PAGE_SLOTS {
                let record = cur.read_u32("符号索引页")?;
                if record != 0 {
                    self.import_symbol(record as usize);
                }
            }
            page_offset = next;
        }
        Ok(())
    }

    /// 单条符号记录失败只产生警告，不中断整个导入。
    fn import_symbol(&mut self, offset: usize) {
        let common = match self.read_symbol_common(offset) {
            Ok(common) => common,
            Err(_) => {
                self.add_warning("符号记录损坏，已跳过".to_string());
                return;
            }
        };
        if common.number == 0 {
            return;
        }

        let mut cur = match Cursor::at(self.data, offset + SYMBOL_COMMON_SIZE, "符号记录") {
            Ok(cur) => cur,
            Err(_) => {
                self.warn_bad_symbol(&common);
                return;
            }
        };
        let imported = match common.type_tag {
            SYMBOL_TYPE_POINT => self.import_point_symbol(&mut cur, &common),
            SYMBOL_TYPE_LINE => self.import_line_symbol(&mut cur, &common),
            SYMBOL_TYPE_AREA => self.import_area_symbol(&mut cur, &common),
            SYMBOL_TYPE_TEXT => self.import_text_symbol(&mut cur, &common),
            SYMBOL_TYPE_RECT => self.import_rect_symbol(&mut cur, &common),
            _ => {
                self.warn_bad_symbol(&common);
                return;
            }
        };
        match imported {
            Ok(ImportedSymbol::Single(symbol)) => {
                let id = self.map.add_symbol(symbol);
                self.symbol_index.insert(common.number, id);
            }
            Ok(ImportedSymbol::Text { symbol, halign }) => {
                let id = self.map.add_symbol(symbol);
                self.symbol_index.insert(common.number, id);
                self.text_halign.insert(id, halign);
            }
            Ok(ImportedSymbol::Combined { combined, parts }) => {
                let combined_id = self.map.add_symbol(combined);
                self.symbol_index.insert(common.number, combined_id);
                let mut part_ids = Vec::with_capacity(parts.len());
                for (i, mut part) in parts.into_iter().enumerate() {
                    part.number[2] = i as i32 + 1;
                    part_ids.push(self.map.add_symbol(part));
                }
                if let SymbolKind::Combined(combined) =
                    &mut self.map.symbol_mut(combined_id).kind
                {
                    combined.parts = part_ids;
                }
            }
            Ok(ImportedSymbol::AlreadyHandled) => {}
            Err(_) => self.warn_bad_symbol(&common),
        }
    }

    fn warn_bad_symbol(&mut self, common: &SymbolCommon) {
        self.add_warning(format!(
            "无法导入符号 \"{}\"（{}.{}）",
            common.name,
            common.number / 10,
            common.number % 10
        ));
    }

    fn read_symbol_common(&self, offset: usize) -> Result<SymbolCommon, OcdError> {
        let mut cur = Cursor::at(self.data, offset, "符号记录")?;
        let _size = cur.read_u16("符号记录")?;
        let number = cur.read_i16("符号记录")?;
        let type_tag = cur.read_u8("符号记录")?;
        let _subtype = cur.read_u8("符号记录")?;
        let base_flags = cur.read_u8("符号记录")?;
        let status = cur.read_u8("符号记录")?;
        let _extent = cur.read_i16("符号记录")?;
        cur.skip(2, "符号记录")?;
        cur.skip(SYMBOL_COLOR_MASK_SIZE, "符号记录")?;
        let name_raw = cur.read_bytes(SYMBOL_NAME_SIZE, "符号记录")?;
        cur.skip(ICON_BYTES, "符号记录")?;
        Ok(SymbolCommon {
            number,
            type_tag,
            base_flags,
            status,
            name: decode_pascal_string(self.narrow, name_raw),
        })
    }

    /// 公共字段：名称、点分编号、保护/隐藏状态。
    fn fill_common(&self, symbol: &mut Symbol, common: &SymbolCommon) {
        symbol.name = common.name.clone();
        symbol.number = [
            i32::from(common.number) / 10,
            i32::from(common.number) % 10,
            -1,
        ];
        symbol.is_helper_symbol = false;
        symbol.is_protected = common.status & 1 != 0;
        symbol.is_hidden = common.status & 2 != 0;
    }

    fn import_point_symbol(
        &mut self,
        cur: &mut Cursor,
        common: &SymbolCommon,
    ) -> Result<ImportedSymbol, OcdError> {
        let ngrp = cur.read_u16("点符号")?;
        cur.skip(2, "点符号")?;
        let mut point = self.import_pattern(ngrp as usize, cur)?;
        point.rotatable = common.base_flags & 1 != 0;
        let mut symbol = Symbol::new(SymbolKind::Point(point));
        self.fill_common(&mut symbol, common);
        Ok(ImportedSymbol::Single(symbol))
    }

    #[allow(clippy::too_many_lines)]
    fn import_line_symbol(
        &mut self,
        cur: &mut Cursor,
        common: &SymbolCommon,
    ) -> Result<ImportedSymbol, OcdError> {
        let color = cur.read_i16("线符号")?;
        let width = cur.read_i16("线符号")?;
        let ends = cur.read_i16("线符号")?;
        let bdist = cur.read_i16("线符号")?;
        let edist = cur.read_i16("线符号")?;
        let len = cur.read_i16("线符号")?;
        let elen = cur.read_i16("线符号")?;
        let gap = cur.read_i16("线符号")?;
        let gap2 = cur.read_i16("线符号")?;
        let egap = cur.read_i16("线符号")?;
        let _smin = cur.read_i16("线符号")?;
        let snum = cur.read_i16("线符号")?;
        let sdist = cur.read_i16("线符号")?;
        let dmode = cur.read_i16("线符号")?;
        let dwidth = cur.read_i16("线符号")?;
        let dflags = cur.read_i16("线符号")?;
        let dcolor = cur.read_i16("线符号")?;
        let lwidth = cur.read_i16("线符号")?;
        let rwidth = cur.read_i16("线符号")?;
        let lcolor = cur.read_i16("线符号")?;
        let rcolor = cur.read_i16("线符号")?;
        let dlen = cur.read_i16("线符号")?;
        let dgap = cur.read_i16("线符号")?;
        let fwidth = cur.read_i16("线符号")?;
        let _fcolor = cur.read_i16("线符号")?;
        let _tmode = cur.read_i16("线符号")?;
        let _tlast = cur.read_i16("线符号")?;
        cur.skip(2, "线符号")?;
        let smnpts = cur.read_i16("线符号")?;
        let ssnpts = cur.read_i16("线符号")?;
        let scnpts = cur.read_i16("线符号")?;
        let sbnpts = cur.read_i16("线符号")?;
        let senpts = cur.read_i16("线符号")?;
        cur.skip(2, "线符号")?;

        let number_label = 0.1 * f64::from(common.number);

        // 主线：无双线模式，或宽度大于零时存在
        let mut main_line = if dmode == 0 || width > 0 {
            let mut line = LineSymbol {
                line_width: convert_size(i32::from(width)),
                color: self.convert_color(color),
                minimum_length: 0,
                cap_style: CapStyle::Flat,
                join_style: JoinStyle::Bevel,
                ..LineSymbol::default()
            };

            // 端点/转角样式的固定映射表
            match ends {
                0 => {}
                1 => {
                    line.cap_style = CapStyle::Round;
                    line.join_style = JoinStyle::Round;
                }
                2 => {
                    line.cap_style = CapStyle::Pointed;
                    line.join_style = JoinStyle::Bevel;
                }
                3 => {
                    line.cap_style = CapStyle::Pointed;
                    line.join_style = JoinStyle::Round;
                }
                4 => {
                    line.cap_style = CapStyle::Flat;
                    line.join_style = JoinStyle::Miter;
                }
                6 => {
                    line.cap_style = CapStyle::Pointed;
                    line.join_style = JoinStyle::Miter;
                }
                _ => {}
            }

            if line.cap_style == CapStyle::Pointed {
                if bdist != edist {
                    self.add_warning(format!(
                        "虚线符号 {number_label} 起止两端的尖端长度不同（{bdist} 与 {edist}），取平均值 {}",
                        (i32::from(bdist) + i32::from(edist)) / 2
                    ));
                }
                // 起止尖端长度不支持分别设置，取平均
                line.pointed_cap_length =
                    convert_size((i32::from(bdist) + i32::from(edist)) / 2);
                // 尖端端点时旧格式总是画圆转角，与存储的设置无关
                line.join_style = JoinStyle::Round;
            }

            if gap > 0 || gap2 > 0 {
                line.dashed = true;
                if gap2 > 0 && gap == 0 {
                    // 特例：只有段内间隔
                    line.dash_length = convert_size(i32::from(len) - i32::from(gap2));
                    line.break_length = convert_size(i32::from(gap2));
                    if !(elen >= len / 2 - 1 && elen <= len / 2 + 1) {
                        self.add_warning(format!(
                            "虚线符号 {number_label} 的端段长度无法准确导入"
                        ));
                    }
                    if egap != 0 {
                        self.add_warning(format!(
                            "虚线符号 {number_label} 的端段间隔无法准确导入"
                        ));
                    }
                } else {
                    if len != elen {
                        if elen >= len / 2 - 1 && elen <= len / 2 + 1 {
                            line.half_outer_dashes = true;
                        } else {
                            self.add_warning(format!(
                                "虚线符号 {number_label} 主段与端段长度不同（{len} 与 {elen}），按 {len} 处理"
                            ));
                        }
                    }
                    line.dash_length = convert_size(i32::from(len));
                    line.break_length = convert_size(i32::from(gap));
                    if gap2 > 0 {
                        line.dashes_in_group = 2;
                        if gap2 != egap {
                            self.add_warning(format!(
                                "虚线符号 {number_label} 的间隔 D 与 E 不同（{gap2} 与 {egap}），按 {gap2} 处理"
                            ));
                        }
                        line.in_group_break_length = convert_size(i32::from(gap2));
                        line.dash_length = (line.dash_length - line.in_group_break_length) / 2;
                    }
                }
            } else {
                line.segment_length = convert_size(i32::from(len));
                line.end_length = convert_size(i32::from(elen));
            }
            Some(line)
        } else {
            None
        };

        // 双线（可带填充与边线）
        let mut double_line = if dmode != 0 {
            let mut line = LineSymbol {
                line_width: convert_size(i32::from(dwidth)),
                color: if dflags & 1 != 0 {
                    self.convert_color(dcolor)
                } else {
                    None
                },
                cap_style: CapStyle::Flat,
                join_style: JoinStyle::Miter,
                segment_length: convert_size(i32::from(len)),
                end_length: convert_size(i32::from(elen)),
                ..LineSymbol::default()
            };

            if lwidth > 0 || rwidth > 0 {
                line.have_border_lines = true;

                // 左右边线暂不支持不同的颜色与宽度，带警告取左侧值
                let border_color = lcolor;
                if border_color != rcolor {
                    self.add_warning(format!(
                        "符号 {number_label} 左右边线颜色不同（{lcolor} 与 {rcolor}），按 {border_color} 处理"
                    ));
                }
                line.border_color = self.convert_color(border_color);

                let border_width = lwidth;
                if border_width != rwidth {
                    self.add_warning(format!(
                        "符号 {number_label} 左右边线宽度不同（{lwidth} 与 {rwidth}），按 {border_width} 处理"
                    ));
                }
                line.border_width = convert_size(i32::from(border_width));
                line.border_shift = line.border_width / 2;

                if dgap > 0 && dmode > 1 {
                    line.dashed_border = true;
                    line.border_dash_length = convert_size(i32::from(dlen));
                    line.border_break_length = convert_size(i32::from(dgap));
                    if dmode == 2 {
                        self.add_warning(format!(
                            "线符号 {number_label} 仅左边线为虚线的设置被忽略"
                        ));
                    }
                }
            }
            Some(line)
        } else {
            None
        };

        // 沿线点状子符号共享同一段图案缓冲，按固定顺序切分：
        // 中点、（保留的第二槽位）、角点/虚线点、起点、终点
        {
            let attach_to = match (&mut main_line, &mut double_line) {
                (Some(line), _) => line,
                (None, Some(line)) => line,
                (None, None) => {
                    return Err(OcdError::InvalidStructure(
                        "线符号既无主线也无双线".to_string(),
                    ));
                }
            };

            let mid = self.import_pattern(smnpts.max(0) as usize, cur)?;
            if !mid.is_empty() {
                attach_to.mid_symbol = Some(Box::new(mid));
            }
            attach_to.mid_symbols_per_spot = i32::from(snum);
            attach_to.mid_symbol_distance = convert_size(i32::from(sdist));

            if ssnpts > 0 {
                // 第二槽位有数据但语义不明，只推进读取位置
                cur.skip(ssnpts as usize * POINT_UNIT_SIZE, "线符号图案")?;
            }
            if scnpts > 0 {
                let dash = self.import_pattern(scnpts as usize, cur)?;
                if !dash.is_empty() {
                    attach_to.dash_symbol = Some(Box::new(dash));
                }
            }
            if sbnpts > 0 {
                let start = self.import_pattern(sbnpts as usize, cur)?;
                if !start.is_empty() {
                    attach_to.start_symbol = Some(Box::new(start));
                }
            }
            if senpts > 0 {
                let end = self.import_pattern(senpts as usize, cur)?;
                if !end.is_empty() {
                    attach_to.end_symbol = Some(Box::new(end));
                }
            }

            attach_to.minimum_mid_symbol_count = 0;
            attach_to.minimum_mid_symbol_count_when_closed = 0;
            attach_to.show_at_least_one_symbol = false;
        }

        if fwidth > 0 {
            self.add_warning(format!("符号 {number_label} 的框线被忽略"));
        }

        match (main_line, double_line) {
            (Some(main), None) => {
                let mut symbol = Symbol::new(SymbolKind::Line(main));
                self.fill_common(&mut symbol, common);
                Ok(ImportedSymbol::Single(symbol))
            }
            (None, Some(double)) => {
                let mut symbol = Symbol::new(SymbolKind::Line(double));
                self.fill_common(&mut symbol, common);
                Ok(ImportedSymbol::Single(symbol))
            }
            (Some(main), Some(double)) => {
                // 填充主线与带边线的双线同时存在：合成组合符号，
                // 部件不继承组合符号的隐藏/保护状态
                let mut combined = Symbol::new(SymbolKind::Combined(CombinedSymbol::default()));
                self.fill_common(&mut combined, common);
                let mut main_symbol = Symbol::new(SymbolKind::Line(main));
                self.fill_common(&mut main_symbol, common);
                main_symbol.is_hidden = false;
                main_symbol.is_protected = false;
                let mut double_symbol = Symbol::new(SymbolKind::Line(double));
                self.fill_common(&mut double_symbol, common);
                double_symbol.is_hidden = false;
                double_symbol.is_protected = false;
                Ok(ImportedSymbol::Combined {
                    combined,
                    parts: vec![main_symbol, double_symbol],
                })
            }
            (None, None) => unreachable!("上方已处理"),
        }
    }

    fn import_area_symbol(
        &mut self,
        cur: &mut Cursor,
        common: &SymbolCommon,
    ) -> Result<ImportedSymbol, OcdError> {
        let color = cur.read_i16("面符号")?;
        let fill = cur.read_i16("面符号")?;
        let hmode = cur.read_i16("面符号")?;
        let hcolor = cur.read_i16("面符号")?;
        let hwidth = cur.read_i16("面符号")?;
        let hdist = cur.read_i16("面符号")?;
        let hangle1 = cur.read_i16("面符号")?;
        let hangle2 = cur.read_i16("面符号")?;
        let pmode = cur.read_i16("面符号")?;
        let pwidth = cur.read_i16("面符号")?;
        let pheight = cur.read_i16("面符号")?;
        let pangle = cur.read_i16("面符号")?;
        let npts = cur.read_u16("面符号")?;
        cur.skip(2, "面符号")?;

        let mut area = AreaSymbol {
            minimum_area: 0,
            color: if fill != 0 {
                self.convert_color(color)
            } else {
                None
            },
            patterns: Vec::new(),
        };

        // 影线
        if hmode > 0 {
            let hatch_color = self.convert_color(hcolor);
            area.patterns.push(FillPattern::Line(LinePattern {
                angle: convert_rotation(i32::from(hangle1)),
                rotatable: true,
                line_spacing: convert_size(i32::from(hdist) + i32::from(hwidth)),
                line_offset: 0,
                color: hatch_color,
                line_width: convert_size(i32::from(hwidth)),
            }));
            if hmode == 2 {
                // 第二道影线只换角度；间距不含线宽，这是格式本身的规则
                area.patterns.push(FillPattern::Line(LinePattern {
                    angle: convert_rotation(i32::from(hangle2)),
                    rotatable: true,
                    line_spacing: convert_size(i32::from(hdist)),
                    line_offset: 0,
                    color: hatch_color,
                    line_width: convert_size(i32::from(hwidth)),
                }));
            }
        }

        if pmode > 0 {
            // 错行点阵：用两个互相错开、行距加倍的图案叠加模拟
            let mut spacing = convert_size(i32::from(pheight));
            if pmode == 2 {
                spacing *= 2;
            }
            let point = self.import_pattern(npts as usize, cur)?;
            let point_distance = convert_size(i32::from(pwidth));
            area.patterns.push(FillPattern::Point(PointPattern {
                angle: convert_rotation(i32::from(pangle)),
                rotatable: true,
                point_distance,
                line_spacing: spacing,
                line_offset: 0,
                offset_along_line: 0,
                point: point.clone(),
            }));
            if pmode == 2 {
                area.patterns.push(FillPattern::Point(PointPattern {
                    angle: convert_rotation(i32::from(pangle)),
                    rotatable: true,
                    point_distance,
                    line_spacing: spacing,
                    line_offset: spacing / 2,
                    offset_along_line: point_distance / 2,
                    point,
                }));
            }
        }

        let mut symbol = Symbol::new(SymbolKind::Area(area));
        self.fill_common(&mut symbol, common);
        Ok(ImportedSymbol::Single(symbol))
    }

    fn import_text_symbol(
        &mut self,
        cur: &mut Cursor,
        common: &SymbolCommon,
    ) -> Result<ImportedSymbol, OcdError> {
        let font_raw = cur.read_bytes(SYMBOL_NAME_SIZE, "文字符号")?;
        let font_family = decode_pascal_string(self.narrow, font_raw);
        let color = cur.read_i16("文字符号")?;
        let dpts = cur.read_i16("文字符号")?;
        let bold = cur.read_i16("文字符号")?;
        let italic = cur.read_i16("文字符号")?;
        let _charset = cur.read_i16("文字符号")?;
        let cspace = cur.read_i16("文字符号")?;
        let wspace = cur.read_i16("文字符号")?;
        let halign = cur.read_i16("文字符号")?;
        let lspace = cur.read_i16("文字符号")?;
        let pspace = cur.read_i16("文字符号")?;
        let indent1 = cur.read_i16("文字符号")?;
        let indent2 = cur.read_i16("文字符号")?;
        let under = cur.read_i16("文字符号")?;
        let ucolor = cur.read_i16("文字符号")?;
        let uwidth = cur.read_i16("文字符号")?;
        let udist = cur.read_i16("文字符号")?;
        let ntabs = cur.read_i16("文字符号")?;
        cur.skip(2, "文字符号")?;
        let mut tabs = [0i32; 32];
        for tab in &mut tabs {
            *tab = cur.read_i32("文字符号")?;
        }
        let fmode = cur.read_i16("文字符号")?;
        let fcolor = cur.read_i16("文字符号")?;
        let fdx = cur.read_i16("文字符号")?;
        let fdy = cur.read_i16("文字符号")?;
        let fdpts = cur.read_i16("文字符号")?;
        cur.skip(2, "文字符号")?;

        let number_label = 0.1 * f64::from(common.number);

        // 字号：十分之一排版点 → 英寸 → 毫米 → 模型单位
        let d_font_size = (0.1 * f64::from(dpts)) / 72.0 * 25.4;
        let mut text = TextSymbol {
            font_family,
            color: self.convert_color(color),
            font_size: (1000.0 * d_font_size).round() as i32,
            bold: bold >= 550,
            italic: italic != 0,
            underline: false,
            paragraph_spacing: convert_size(i32::from(pspace)),
            character_spacing: f64::from(cspace) / 100.0,
            kerning: false,
            line_below: under != 0,
            line_below_color: if under != 0 {
                self.convert_color(ucolor)
            } else {
                None
            },
            line_below_width: convert_size(i32::from(uwidth)),
            line_below_distance: convert_size(i32::from(udist)),
            custom_tabs: tabs
                .iter()
                .take(ntabs.clamp(0, 32) as usize)
                .map(|&tab| convert_size(tab))
                .collect(),
            ..TextSymbol::default()
        };

        let halign = match halign {
            0 => HorizontalAlignment::Left,
            1 => HorizontalAlignment::Center,
            2 => HorizontalAlignment::Right,
            3 => {
                self.add_warning(format!(
                    "文字符号 {number_label}：忽略两端对齐方式"
                ));
                HorizontalAlignment::Center
            }
            _ => HorizontalAlignment::Center,
        };

        if bold != 400 && bold != 700 {
            self.add_warning(format!(
                "文字符号 {number_label}：忽略自定义字重（{bold}）"
            ));
        }
        if cspace != 0 {
            self.add_warning(format!(
                "文字符号 {number_label}：设置了字符间距，其实现与旧格式的行为尚不一致"
            ));
        }
        if wspace != 100 {
            self.add_warning(format!(
                "文字符号 {number_label}：忽略自定义词间距（{wspace}%）"
            ));
        }
        if indent1 != 0 || indent2 != 0 {
            self.add_warning(format!(
                "文字符号 {number_label}：忽略自定义缩进（{indent1}/{indent2}）"
            ));
        }

        if fmode > 0 {
            let framing_color = self.convert_color(fcolor);
            match fmode {
                1 => {
                    text.framing = Some(TextFraming {
                        color: framing_color,
                        mode: FramingMode::Shadow {
                            x_offset: convert_size(i32::from(fdx)),
                            y_offset: -convert_size(i32::from(fdy)),
                        },
                    });
                }
                2 => {
                    text.framing = Some(TextFraming {
                        color: framing_color,
                        mode: FramingMode::Line {
                            half_width: convert_size(i32::from(fdpts)),
                        },
                    });
                }
                _ => {
                    self.add_warning(format!(
                        "文字符号 {number_label}：忽略加框（模式 {fmode}）"
                    ));
                }
            }
        }

        // 行距换算：文件内百分比相对字号，模型相对行高
        let absolute_line_spacing = d_font_size * 0.01 * f64::from(lspace);
        text.line_spacing = 1000.0 * absolute_line_spacing / text.line_height();

        let mut symbol = Symbol::new(SymbolKind::Text(text));
        self.fill_common(&mut symbol, common);
        Ok(ImportedSymbol::Text { symbol, halign })
    }

    /// 矩形符号不产生单一符号：总是展开出边框线符号，
    /// 带网格时再加内部网格线与加粗标注文字符号；
    /// 网格几何保存在副表里，供矩形对象展开时使用。
    fn import_rect_symbol(
        &mut self,
        cur: &mut Cursor,
        common: &SymbolCommon,
    ) -> Result<ImportedSymbol, OcdError> {
        let color = cur.read_i16("矩形符号")?;
        let width = cur.read_i16("矩形符号")?;
        let corner = cur.read_i16("矩形符号")?;
        let flags = cur.read_i16("矩形符号")?;
        let cwidth = cur.read_i16("矩形符号")?;
        let cheight = cur.read_i16("矩形符号")?;
        let gcells = cur.read_i16("矩形符号")?;
        cur.skip(2, "矩形符号")?;
        let gtext_raw = cur.read_bytes(SYMBOL_NAME_SIZE, "矩形符号")?;

        let border_color = self.convert_color(color);
        let mut border = Symbol::new(SymbolKind::Line(LineSymbol {
            line_width: convert_size(i32::from(width)),
            color: border_color,
            cap_style: CapStyle::Flat,
            join_style: JoinStyle::Round,
            ..LineSymbol::default()
        }));
        self.fill_common(&mut border, common);
        let border_id = self.map.add_symbol(border);

        let has_grid = flags & 1 != 0;
        let mut inner_id = None;
        let mut text_id = None;
        if has_grid {
            let mut inner = Symbol::new(SymbolKind::Line(LineSymbol {
                line_width: 150,
                color: border_color,
                ..LineSymbol::default()
            }));
            self.fill_common(&mut inner, common);
            inner.number[2] = 1;
            inner_id = Some(self.map.add_symbol(inner));

            let mut label = Symbol::new(SymbolKind::Text(TextSymbol {
                font_family: "Arial".to_string(),
                font_size: (1000.0_f64 * (15.0 / 72.0 * 25.4)).round() as i32,
                color: border_color,
                bold: true,
                ..TextSymbol::default()
            }));
            self.fill_common(&mut label, common);
            label.number[2] = 2;
            text_id = Some(self.map.add_symbol(label));
        }

        self.rectangle_info.insert(
            common.number,
            RectangleInfo {
                border_line: border_id,
                has_grid,
                inner_line: inner_id,
                text: text_id,
                corner_radius: 0.001 * f64::from(convert_size(i32::from(corner))),
                number_from_bottom: flags & 2 != 0,
                cell_width: 0.001 * f64::from(convert_size(i32::from(cwidth))),
                cell_height: 0.001 * f64::from(convert_size(i32::from(cheight))),
                unnumbered_cells: i32::from(gcells),
                unnumbered_text: decode_pascal_string(self.narrow, gtext_raw),
            },
        );
        Ok(ImportedSymbol::AlreadyHandled)
    }

    /// 图案编解码：平铺的坐标缓冲里顺次存放变长成分记录。
    /// 每条记录头部占两个坐标单元，其后紧跟 npts 个坐标；
    /// 无论成分是否被丢弃，读取位置都按 头部+npts 前进，
    /// 这是整个缓冲遍历正确性的前提。
    fn import_pattern(&mut self, units: usize, cur: &mut Cursor) -> Result<PointSymbol, OcdError> {
        let mut symbol = PointSymbol {
            rotatable: true,
            ..PointSymbol::default()
        };
        if units == 0 {
            return Ok(symbol);
        }
        let raw = cur.read_bytes(units * POINT_UNIT_SIZE, "符号图案")?;
        let mut p = 0usize;
        while p < units {
            let mut ec = Cursor::new(&raw[p * POINT_UNIT_SIZE..]);
            let elt_type = ec.read_i16("符号图案成分")?;
            let _flags = ec.read_i16("符号图案成分")?;
            let color = ec.read_i16("符号图案成分")?;
            let width = ec.read_i16("符号图案成分")?;
            let diameter = ec.read_i16("符号图案成分")?;
            let npts = ec.read_i16("符号图案成分")?.max(0) as usize;
            ec.skip(4, "符号图案成分")?;
            if p + ELEMENT_HEADER_UNITS + npts > units {
                return Err(OcdError::Truncated {
                    context: "符号图案成分",
                });
            }
            let mut points = Vec::with_capacity(npts);
            for i in 0..npts {
                let mut pc =
                    Cursor::new(&raw[(p + ELEMENT_HEADER_UNITS + i) * POINT_UNIT_SIZE..]);
                points.push(pc.read_point("符号图案成分")?);
            }
            // 是否还有其他成分：决定单个圆点/圆环是否折叠到符号自身
            let multiple_elements = p > 0 || p + ELEMENT_HEADER_UNITS + npts < units;

            match elt_type {
                ELEMENT_TYPE_DOT => {
                    let inner_radius = convert_size(i32::from(diameter)) / 2;
                    if inner_radius > 0 {
                        let inner_color = self.convert_color(color);
                        if multiple_elements {
                            let element_symbol = PointSymbol {
                                rotatable: false,
                                inner_radius,
                                inner_color,
                                outer_width: 0,
                                outer_color: None,
                                elements: Vec::new(),
                            };
                            symbol.elements.push(PointSymbolElement {
                                symbol: ElementSymbol::Point(element_symbol),
                                coords: vec![MapCoord::default()],
                            });
                        } else {
                            symbol.inner_color = inner_color;
                            symbol.inner_radius = inner_radius;
                            symbol.outer_color = None;
                            symbol.outer_width = 0;
                        }
                    }
                }
                ELEMENT_TYPE_CIRCLE => {
                    let inner_radius =
                        convert_size(i32::from(diameter)) / 2 - convert_size(i32::from(width));
                    let outer_width = convert_size(i32::from(width));
                    if outer_width > 0 && inner_radius > 0 {
                        let outer_color = self.convert_color(color);
                        if multiple_elements {
                            let element_symbol = PointSymbol {
                                rotatable: false,
                                inner_radius,
                                inner_color: None,
                                outer_width,
                                outer_color,
                                elements: Vec::new(),
                            };
                            symbol.elements.push(PointSymbolElement {
                                symbol: ElementSymbol::Point(element_symbol),
                                coords: vec![MapCoord::default()],
                            });
                        } else {
                            symbol.inner_color = None;
                            symbol.inner_radius = inner_radius;
                            symbol.outer_color = outer_color;
                            symbol.outer_width = outer_width;
                        }
                    }
                }
                ELEMENT_TYPE_LINE => {
                    let element_symbol = LineSymbol {
                        line_width: convert_size(i32::from(width)),
                        color: self.convert_color(color),
                        ..LineSymbol::default()
                    };
                    let mut coords = fill_path_coords(&points, false);
                    mark_closed_subpaths(&mut coords);
                    symbol.elements.push(PointSymbolElement {
                        symbol: ElementSymbol::Line(element_symbol),
                        coords,
                    });
                }
                ELEMENT_TYPE_AREA => {
                    let element_symbol = AreaSymbol {
                        color: self.convert_color(color),
                        ..AreaSymbol::default()
                    };
                    let mut coords = fill_path_coords(&points, true);
                    mark_closed_subpaths(&mut coords);
                    symbol.elements.push(PointSymbolElement {
                        symbol: ElementSymbol::Area(element_symbol),
                        coords,
                    });
                }
                _ => {}
            }
            p += ELEMENT_HEADER_UNITS + npts;
        }
        Ok(symbol)
    }

    fn import_objects(&mut self, header: &FileHeader) -> Result<(), OcdError> {
        let mut layer = MapLayer::new("导入图层");
        let max_pages = self.data.len() / OBJECT_PAGE_SIZE + 1;
        let mut page_offset = header.oobjidx;
        let mut pages = 0usize;
        while page_offset != 0 {
            pages += 1;
            if pages > max_pages {
                return Err(OcdError::InvalidStructure("对象索引页链表成环".to_string()));
            }
            let mut cur = Cursor::at(self.data, page_offset as usize, "对象索引页")?;
            let next = cur.read_u32("对象索引页")?;
            for _ in 0..INDEX_PAGE_SLOTS {
                cur.skip(16, "对象索引页")?; // 包围盒，导入侧不消费
                let pos = cur.read_u32("对象索引页")?;
                let _npts = cur.read_u16("对象索引页")?;
                let _symbol = cur.read_i16("对象索引页")?;
                if pos != 0 {
                    if let Some(object) = self.import_object(pos as usize, &mut layer) {
                        layer.objects.push(object);
                    }
                }
            }
            page_offset = next;
        }
        // 所有导入对象进入一个新建图层，替换默认首图层
        self.map.layers[0] = layer;
        self.map.current_layer = 0;
        Ok(())
    }

    /// 单个对象失败只产生警告。矩形展开对象直接加进图层，返回 None。
    fn import_object(&mut self, offset: usize, layer: &mut MapLayer) -> Option<Object> {
        match self.read_object(offset, layer) {
            Ok(object) => object,
            Err(_) => {
                self.add_warning("无法加载对象".to_string());
                None
            }
        }
    }

    fn read_object(
        &mut self,
        offset: usize,
        layer: &mut MapLayer,
    ) -> Result<Option<Object>, OcdError> {
        let mut cur = Cursor::at(self.data, offset, "对象记录")?;
        let symbol_number = cur.read_i16("对象记录")?;
        let otype = cur.read_u8("对象记录")?;
        let unicode = cur.read_u8("对象记录")?;
        let npts = cur.read_u16("对象记录")? as usize;
        let ntext = cur.read_u16("对象记录")? as usize;
        let angle = cur.read_i16("对象记录")?;
        cur.skip(2, "对象记录")?;
        cur.skip(4, "对象记录")?;

        let mut points = Vec::with_capacity(npts);
        for _ in 0..npts {
            points.push(cur.read_point("对象坐标")?);
        }
        let text_payload = cur.read_bytes(ntext * POINT_UNIT_SIZE, "对象文字")?;

        // 解析符号引用：交叉引用表 → 矩形展开表 → 占位符号
        let symbol_id = match self.symbol_index.get(&symbol_number) {
            Some(&id) => id,
            None => {
                if self.rectangle_info.contains_key(&symbol_number) {
                    if !self.import_rectangle_object(symbol_number, &points, layer) {
                        self.add_warning("无法导入矩形对象".to_string());
                    }
                    return Ok(None);
                }
                match otype {
                    OBJECT_TYPE_POINT => self.map.undefined_point(),
                    OBJECT_TYPE_LINE | OBJECT_TYPE_AREA => self.map.undefined_line(),
                    _ => {
                        self.add_warning("无法加载对象".to_string());
                        return Ok(None);
                    }
                }
            }
        };

        enum Resolved {
            Point { rotatable: bool, symmetrical: bool },
            Text(Box<TextSymbol>),
            Path { is_area: bool },
        }
        let resolved = match &self.map.symbol(symbol_id).kind {
            SymbolKind::Point(point) => Resolved::Point {
                rotatable: point.rotatable,
                symmetrical: point.is_symmetrical(),
            },
            SymbolKind::Text(text) => Resolved::Text(Box::new(text.clone())),
            SymbolKind::Area(_) => Resolved::Path { is_area: true },
            SymbolKind::Line(_) | SymbolKind::Combined(_) => Resolved::Path { is_area: false },
        };

        match resolved {
            Resolved::Point {
                rotatable,
                symmetrical,
            } => {
                let mut rotation = 0.0;
                if rotatable {
                    rotation = convert_rotation(i32::from(angle));
                } else if angle != 0 && !symmetrical {
                    // 非对称图案收到非零角度：放开旋转，保留朝向
                    if let SymbolKind::Point(point) = &mut self.map.symbol_mut(symbol_id).kind {
                        point.rotatable = true;
                    }
                    rotation = convert_rotation(i32::from(angle));
                }
                // 点对象只允许一个坐标，即使记录声称更多
                let coord = points
                    .first()
                    .copied()
                    .ok_or(OcdError::Truncated { context: "点对象" })?
                    .to_map_coord();
                Ok(Some(Object::Point(PointObject {
                    symbol: symbol_id,
                    rotation,
                    coord,
                })))
            }
            Resolved::Text(text_symbol) => {
                let text = if unicode != 0 {
                    decode_wide_c_string(self.wide, text_payload, true)
                } else {
                    decode_c_string(self.narrow, text_payload, true)
                };
                // 载荷内的换行以 CR-LF 存储
                let text = text.replace("\r\n", "\n");
                let rotation = convert_rotation(i32::from(angle));
                let h_align = self
                    .text_halign
                    .get(&symbol_id)
                    .copied()
                    .unwrap_or(HorizontalAlignment::Left);
                if npts != 4 && npts != 5 && npts != 0 {
                    self.add_warning("文字对象的坐标排布无法识别，按单锚点处理".to_string());
                }
                match fill_text_path_coords(&text_symbol, rotation, &points) {
                    Some((anchor, v_align)) => Ok(Some(Object::Text(TextObject {
                        symbol: symbol_id,
                        text,
                        rotation,
                        h_align,
                        v_align,
                        anchor,
                    }))),
                    None => {
                        self.add_warning(format!(
                            "文字对象坐标格式无法识别（npts={npts}）：{text}"
                        ));
                        Ok(None)
                    }
                }
            }
            Resolved::Path { is_area } => {
                let mut coords = fill_path_coords(&points, is_area);
                mark_closed_subpaths(&mut coords);
                Ok(Some(Object::Path(PathObject {
                    symbol: symbol_id,
                    coords,
                })))
            }
        }
    }

    /// 把矩形对象展开成边框路径、网格线与单元格标注。
    fn import_rectangle_object(
        &mut self,
        symbol_number: i16,
        points: &[OcdPoint],
        layer: &mut MapLayer,
    ) -> bool {
        if points.len() != 4 {
            return false;
        }
        let rect = &self.rectangle_info[&symbol_number];
        let border_line = rect.border_line;
        let inner_line = rect.inner_line;
        let text_symbol = rect.text;
        let corner_radius = rect.corner_radius;
        let has_grid = rect.has_grid;
        let cell_width = rect.cell_width;
        let cell_height = rect.cell_height;
        let number_from_bottom = rect.number_from_bottom;
        let unnumbered_cells = rect.unnumbered_cells;
        let unnumbered_text = rect.unnumbered_text.clone();

        let bottom_left = points[0].to_map_coord();
        let bottom_right = points[1].to_map_coord();
        let top_right = points[2].to_map_coord();
        let top_left = points[3].to_map_coord();

        let top_left_f = top_left.to_millis();
        let top_right_f = top_right.to_millis();
        let bottom_left_f = bottom_left.to_millis();
        let bottom_right_f = bottom_right.to_millis();
        let right = top_left_f.vector_to(top_right_f);
        let angle = MapCoordF(right).angle();
        let down = top_left_f.vector_to(bottom_left_f);
        let right = MapCoordF(right).normalize().as_vec2();
        let down = MapCoordF(down).normalize().as_vec2();

        // 边框
        let mut coords: Vec<MapCoord>;
        if corner_radius == 0.0 {
            coords = vec![top_left, top_right, bottom_right, bottom_left];
        } else {
            // 圆角用三次贝塞尔逼近
            const BEZIER_KAPPA: f64 = 0.552_284_749_8;
            let handle_radius = (1.0 - BEZIER_KAPPA) * corner_radius;
            let curve_start = |pos: MapCoordF| {
                let mut coord = MapCoord::from_millis(pos);
                coord.curve_start = true;
                coord
            };
            let plain = MapCoord::from_millis;
            coords = vec![
                curve_start(top_right_f + right * -corner_radius),
                plain(top_right_f + right * -handle_radius),
                plain(top_right_f + down * handle_radius),
                plain(top_right_f + down * corner_radius),
                curve_start(bottom_right_f + down * -corner_radius),
                plain(bottom_right_f + down * -handle_radius),
                plain(bottom_right_f + right * -handle_radius),
                plain(bottom_right_f + right * -corner_radius),
                curve_start(bottom_left_f + right * corner_radius),
                plain(bottom_left_f + right * handle_radius),
                plain(bottom_left_f + down * -handle_radius),
                plain(bottom_left_f + down * -corner_radius),
                curve_start(top_left_f + down * corner_radius),
                plain(top_left_f + down * handle_radius),
                plain(top_left_f + right * handle_radius),
                plain(top_left_f + right * corner_radius),
            ];
        }
        // 闭合边框：末点回到首点并打上闭合标志
        let mut closing = coords[0];
        closing.curve_start = false;
        closing.close_point = true;
        coords.push(closing);
        layer
            .objects
            .push(Object::Path(PathObject::new(border_line, coords)));

        if has_grid && cell_width > 0.0 && cell_height > 0.0 {
            let width = top_left.length_to(&top_right);
            let height = top_left.length_to(&bottom_left);
            let num_cells_x = ((width / cell_width).round() as i64).max(1);
            let num_cells_y = ((height / cell_height).round() as i64).max(1);
            let cell_width = width / num_cells_x as f64;
            let cell_height = height / num_cells_y as f64;

            if let Some(inner_line) = inner_line {
                for x in 1..num_cells_x {
                    let offset = right * (x as f64 * cell_width);
                    layer.objects.push(Object::Path(PathObject::new(
                        inner_line,
                        vec![
                            MapCoord::from_millis(top_left_f + offset),
                            MapCoord::from_millis(bottom_left_f + offset),
                        ],
                    )));
                }
                for y in 1..num_cells_y {
                    let offset = down * (y as f64 * cell_height);
                    layer.objects.push(Object::Path(PathObject::new(
                        inner_line,
                        vec![
                            MapCoord::from_millis(top_left_f + offset),
                            MapCoord::from_millis(top_right_f + offset),
                        ],
                    )));
                }
            }

            // 单元格编号
            if height >= cell_height / 2.0 {
                if let Some(text_id) = text_symbol {
                    let (ascent, font_size) = match &self.map.symbol(text_id).kind {
                        SymbolKind::Text(text) => {
                            (text.ascent() / 1000.0, f64::from(text.font_size) / 1000.0)
                        }
                        _ => (0.0, 0.0),
                    };
                    for y in 0..num_cells_y {
                        for x in 0..num_cells_x {
                            let cell_num = if number_from_bottom {
                                y * num_cells_x + x + 1
                            } else {
                                (num_cells_y - 1 - y) * num_cells_x + x + 1
                            };
                            let cell_text = if cell_num
                                > num_cells_x * num_cells_y - i64::from(unnumbered_cells)
                            {
                                unnumbered_text.clone()
                            } else {
                                cell_num.to_string()
                            };
                            let position_x = (x as f64 + 0.07) * cell_width;
                            let position_y =
                                (y as f64 + 0.04) * cell_height + ascent - font_size;
                            let anchor = top_left_f + right * position_x + down * position_y;
                            layer.objects.push(Object::Text(TextObject {
                                symbol: text_id,
                                text: cell_text,
                                rotation: -angle,
                                h_align: HorizontalAlignment::Left,
                                v_align: VerticalAlignment::Top,
                                anchor: TextAnchor::Single(MapCoord::from_millis(anchor)),
                            }));
                        }
                    }
                }
            }
        }
        true
    }

    fn import_strings(&mut self, header: &FileHeader) -> Result<(), OcdError> {
        self.map.templates.clear();
        let max_pages = self.data.len() / STRING_PAGE_SIZE + 1;
        let mut page_offset = header.ostringidx;
        let mut pages = 0usize;
        while page_offset != 0 {
            pages += 1;
            if pages > max_pages {
                return Err(OcdError::InvalidStructure(
                    "字符串索引页链表成环".to_string(),
                ));
            }
            let mut cur = Cursor::at(self.data, page_offset as usize, "字符串索引页")?;
            let next = cur.read_u32("字符串索引页")?;
            for _ in 0..INDEX_PAGE_SLOTS {
                let pos = cur.read_u32("字符串索引页")?;
                let size = cur.read_u32("字符串索引页")?;
                let entry_type = cur.read_i32("字符串索引页")?;
                if entry_type != 0 && size > 0 {
                    self.import_string(pos as usize, size as usize, entry_type);
                }
            }
            page_offset = next;
        }
        // 压在地图上方的底图不被本格式记录
        self.map.first_front_template = self.map.templates.len();
        Ok(())
    }

    /// 类型 8 是内嵌的栅格底图放置记录，其他类型目前忽略。
    fn import_string(&mut self, pos: usize, size: usize, entry_type: i32) {
        if entry_type != STRING_TYPE_TEMPLATE {
            return;
        }
        match self.read_template(pos, size) {
            Ok(Some(template)) => self.map.templates.push(template),
            Ok(None) => {}
            Err(_) => self.add_warning("无法导入底图记录".to_string()),
        }
    }

    fn read_template(&mut self, pos: usize, size: usize) -> Result<Option<TemplateImage>, OcdError> {
        let mut cur = Cursor::at(self.data, pos, "底图记录")?;
        if size < TEMPLATE_PREFIX_SIZE {
            return Err(OcdError::Truncated { context: "底图记录" });
        }
        let trnx = cur.read_i32("底图记录")?;
        let trny = cur.read_i32("底图记录")?;
        let angle = cur.read_f64("底图记录")?;
        let sclx = cur.read_f64("底图记录")?;
        let scly = cur.read_f64("底图记录")?;
        let _dimming = cur.read_f64("底图记录")?;
        let _transparent = cur.read_i16("底图记录")?;
        cur.skip(2, "底图记录")?;
        let name_raw = cur.read_bytes(size - TEMPLATE_PREFIX_SIZE, "底图记录")?;
        let filename = decode_c_string(self.narrow, name_raw, false);

        if !is_raster_image_file(&filename) {
            self.add_warning(format!(
                "无法导入底图：\"{filename}\" 不是可识别的栅格图像"
            ));
            return Ok(None);
        }

        let position = convert_point(trnx, trny);
        Ok(Some(TemplateImage {
            path: filename,
            x: position.x,
            y: position.y,
            scale_x: convert_template_scale(sclx, self.map.scale_denominator),
            scale_y: convert_template_scale(scly, self.map.scale_denominator),
            // 角度以度存储，可能出现 -359.7 之类的值
            rotation: std::f64::consts::PI / 180.0 * angle,
            visible: true,
        }))
    }
}

/// 底图缩放：存储值 ×1e-5 是图上米每像素，再乘比例尺得实地米每像素。
fn convert_template_scale(stored: f64, scale_denominator: u32) -> f64 {
    stored * 0.00001 * f64::from(scale_denominator)
}

/// 文件名扩展名是否是可解码的栅格图像格式。
fn is_raster_image_file(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((_, extension)) => {
            image::ImageFormat::from_extension(extension.to_ascii_lowercase()).is_some()
        }
        None => false,
    }
}

/// 路径坐标导入：解开打包标志位。曲线起点标志落在控制点对之前的
/// 那个点上（所以要回写到前一个点）；面对象的洞点标记在洞之前的
/// 末点上，线对象则标记在当前点。
fn fill_path_coords(points: &[OcdPoint], is_area: bool) -> Vec<MapCoord> {
    let mut coords: Vec<MapCoord> = Vec::with_capacity(points.len());
    for (i, point) in points.iter().enumerate() {
        let mut coord = point.to_map_coord();
        if point.x_flags() & PX_CTL1 != 0 && i > 0 {
            coords[i - 1].curve_start = true;
        }
        if point.y_flags() & (PY_DASH | PY_CORNER) != 0 {
            coord.dash_point = true;
        }
        if point.y_flags() & PY_HOLE != 0 {
            if is_area && i > 0 {
                coords[i - 1].hole_point = true;
            } else {
                coord.hole_point = true;
            }
        }
        coords.push(coord);
    }
    coords
}

/// 文字对象路径还原：4 点是框排文字（需要抵消旧格式多算的行间留白），
/// 5 点是单锚点文字；其他点数按锚点处理（0 点为失败）。
fn fill_text_path_coords(
    symbol: &TextSymbol,
    rotation: f64,
    points: &[OcdPoint],
) -> Option<(TextAnchor, VerticalAlignment)> {
    if points.is_empty() {
        return None;
    }
    if points.len() == 4 {
        let top_left = points[3].to_map_coord().to_millis();
        let bottom_left = points[0].to_map_coord().to_millis();
        let top_right = points[2].to_map_coord().to_millis();

        // 存储的上边缘比首行基线高出一段多余的行间留白，整体下移抵消
        let top_adjust = symbol.internal_leading() / 1000.0;
        let adjust = glam::DVec2::new(top_adjust * rotation.sin(), top_adjust * rotation.cos());
        let top_left = top_left + adjust;
        let bottom_left = bottom_left + adjust;
        let top_right = top_right + adjust;

        let center = MapCoordF::new(
            (bottom_left.x() + top_right.x()) / 2.0,
            (bottom_left.y() + top_right.y()) / 2.0,
        );
        let width = top_left.vector_to(top_right).length();
        let height = top_left.vector_to(bottom_left).length();
        Some((
            TextAnchor::Box {
                center: MapCoord::from_millis(center),
                width: (width * 1000.0).round() as i64,
                height: (height * 1000.0).round() as i64,
            },
            VerticalAlignment::Top,
        ))
    } else {
        // 单锚点文字总是 5 点（锚点 + 四角）；其他点数按锚点尽力处理
        Some((
            TextAnchor::Single(points[0].to_map_coord()),
            VerticalAlignment::Baseline,
        ))
    }
}

// ===========================================================================
// 导出器
// ===========================================================================

/// 对象索引项的导出形态。
struct ObjectEntry {
    min: OcdPoint,
    max: OcdPoint,
    pos: u32,
    npts: u16,
    symbol: i16,
}

/// 一次导出操作。输出是只追加的字节缓冲，所有记录间引用
/// 都以逻辑偏移表示，索引页在末尾统一写出。
struct OcdExporter<'a> {
    map: &'a Map,
    view: Option<&'a MapView>,
    narrow: NarrowEncoding,
    wide: WideEncoding,
    buffer: Vec<u8>,
    /// 模型符号 → 导出编号集合。组合符号映射到其依赖闭包的全部编号。
    symbol_index: HashMap<SymbolId, BTreeSet<i16>>,
    /// 已占用的符号编号，保证唯一性。
    symbol_numbers: BTreeSet<i16>,
    symbol_record_offsets: Vec<u32>,
    /// 编号 → 记录类型标签，对象导出时决定路径对象的类型字节。
    exported_types: HashMap<i16, u8>,
    /// 文字符号编号 → (记录偏移, 记录大小)，对齐变体克隆时用。
    text_symbol_records: HashMap<i16, (u32, usize)>,
    /// 文字符号 → 已创建的 (对齐, 编号) 变体表。
    text_format: HashMap<SymbolId, Vec<(HorizontalAlignment, i16)>>,
    object_entries: Vec<ObjectEntry>,
    warnings: Vec<String>,
}

impl<'a> OcdExporter<'a> {
    fn new(map: &'a Map, view: Option<&'a MapView>, options: &ExportOptions) -> Self {
        Self {
            map,
            view,
            narrow: options.narrow,
            wide: options.wide,
            buffer: Vec::new(),
            symbol_index: HashMap::new(),
            symbol_numbers: BTreeSet::new(),
            symbol_record_offsets: Vec::new(),
            exported_types: HashMap::new(),
            text_symbol_records: HashMap::new(),
            text_format: HashMap::new(),
            object_entries: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn add_warning(&mut self, message: String) {
        tracing::warn!("{message}");
        self.warnings.push(message);
    }

    fn export(mut self) -> Result<ExportedBuffer, OcdError> {
        if self.map.color_count() > 256 {
            return Err(OcdError::TooManyColors(self.map.color_count()));
        }

        let mut header = FileHeader {
            ftype: OCD_FILE_TYPE,
            major: OCD_VERSION,
            minor: 0,
            ..FileHeader::default()
        };
        self.buffer.resize(HEADER_SIZE, 0);

        // 地图注记，零终止
        if !self.map.notes.is_empty() {
            let notes = self.map.notes.clone();
            let mut bytes = self.narrow.encode(&notes);
            bytes.push(0);
            header.infopos = self.buffer.len() as u32;
            header.infosize = bytes.len() as u32;
            self.buffer.extend_from_slice(&bytes);
        }

        // 颜色表
        header.ocolors = self.buffer.len() as u32;
        header.ncolors = self.map.color_count() as u16;
        for (i, color) in self.map.colors().iter().enumerate() {
            let name = color.name.clone();
            let c = color.c;
            let m = color.m;
            let y = color.y;
            let k = color.k;
            self.push_i16(i as i16);
            self.push_i16(0);
            // CMYK 回到 0–200 的整数刻度
            self.push_u8(((c / 0.005).round() as i32).clamp(0, 200) as u8);
            self.push_u8(((m / 0.005).round() as i32).clamp(0, 200) as u8);
            self.push_u8(((y / 0.005).round() as i32).clamp(0, 200) as u8);
            self.push_u8(((k / 0.005).round() as i32).clamp(0, 200) as u8);
            let name_bytes = self.encode_pascal(&name, COLOR_NAME_SIZE);
            self.buffer.extend_from_slice(&name_bytes);
        }

        // 设置块：视图中心、比例尺、缩放
        header.osetup = self.buffer.len() as u32;
        header.ssetup = SETUP_SIZE as u32;
        let center = self
            .view
            .map(|view| view.center)
            .unwrap_or_default();
        let packed = OcdPoint::pack(&center, 0, 0);
        self.push_i32(packed.x);
        self.push_i32(packed.y);
        self.push_f64(f64::from(self.map.scale_denominator));
        self.push_f64(self.view.map(|view| view.zoom()).unwrap_or(1.0));
        self.buffer.extend_from_slice(&[0u8; 24]);

        // 符号：第一遍导出所有基本符号
        for id in self.map.symbol_ids() {
            let symbol = self.map.symbol(id);
            if symbol.is_helper_symbol {
                continue;
            }
            let number = match &symbol.kind {
                SymbolKind::Point(point) => Some(self.export_point_symbol(id, point)),
                SymbolKind::Line(line) => Some(self.export_line_symbol(id, line)),
                SymbolKind::Area(area) => Some(self.export_area_symbol(id, area)),
                SymbolKind::Text(text) => Some(self.export_text_symbol(id, text)),
                // 组合符号放到第二遍，确保全部依赖已有编号
                SymbolKind::Combined(_) => None,
            };
            if let Some(number) = number {
                self.symbol_index.insert(id, BTreeSet::from([number]));
            }
        }

        // 第二遍：组合符号取依赖闭包的编号并集
        for id in self.map.symbol_ids() {
            if matches!(self.map.symbol(id).kind, SymbolKind::Combined(_)) {
                let numbers = self.export_combined_symbol(id);
                self.symbol_index.insert(id, numbers);
            }
        }

        // 对象
        for layer in &self.map.layers {
            for object in &layer.objects {
                self.export_object(object);
            }
        }

        header.osymidx = self.write_symbol_index();
        header.oobjidx = self.write_object_index();
        header.ostringidx = 0; // 底图不写出

        header.write(&mut self.buffer[0..HEADER_SIZE]);
        debug!(
            bytes = self.buffer.len(),
            symbols = self.symbol_record_offsets.len(),
            objects = self.object_entries.len(),
            warnings = self.warnings.len(),
            "导出完成"
        );
        Ok(ExportedBuffer {
            bytes: self.buffer,
            warnings: self.warnings,
        })
    }

    // -- 低层追加与修补 --------------------------------------------------

    fn push_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    fn push_i16(&mut self, value: i16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    fn push_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    fn push_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    fn push_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    fn push_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    fn patch_u32(&mut self, offset: usize, value: u32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn patch_i16(&mut self, offset: usize, value: i16) {
        self.buffer[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    // -- 字符串编码 ------------------------------------------------------

    /// Pascal 字符串编码到固定大小的缓冲；超长时截断并告警。
    fn encode_pascal(&mut self, text: &str, buffer_size: usize) -> Vec<u8> {
        let max_size = buffer_size - 1;
        let encoded = self.narrow.encode(text);
        if encoded.len() > max_size {
            self.add_string_truncation_warning(text, max_size);
        }
        let len = encoded.len().min(max_size);
        let mut out = vec![0u8; buffer_size];
        out[0] = len as u8;
        out[1..1 + len].copy_from_slice(&encoded[..len]);
        out
    }

    fn add_string_truncation_warning(&mut self, text: &str, truncation_pos: usize) {
        let mut marked: String = text.chars().take(truncation_pos).collect();
        marked.push_str("|||");
        marked.extend(text.chars().skip(truncation_pos));
        self.add_warning(format!(
            "字符串被截断（截断处以三个 '|' 标记）：{marked}"
        ));
    }

    /// 对象文字载荷：开头换行翻倍、\n 转 \r\n、UTF-16 编码加双零终止，
    /// 再按 8 字节坐标单元对齐补零。
    fn encode_wide_text(&self, text: &str) -> Vec<u8> {
        let exported = if text.starts_with('\n') {
            format!("\n{text}")
        } else {
            text.to_string()
        };
        let exported = exported.replace('\n', "\r\n");
        let mut bytes = self.wide.encode(&exported);
        bytes.extend_from_slice(&[0, 0]);
        while bytes.len() % POINT_UNIT_SIZE != 0 {
            bytes.push(0);
        }
        bytes
    }

    // -- 符号导出 --------------------------------------------------------

    /// 折叠编号并保证全局唯一：被占用时递增直到空闲。
    fn allocate_number(&mut self, desired: i16) -> i16 {
        let mut number = desired;
        while self.symbol_numbers.contains(&number) {
            number += 1;
        }
        self.symbol_numbers.insert(number);
        number
    }

    fn desired_number(symbol: &Symbol) -> i16 {
        let mut number = symbol.number[0].max(0) * 10;
        if symbol.number[1] >= 0 {
            number += symbol.number[1] % 10;
        }
        number.clamp(0, i32::from(i16::MAX)) as i16
    }

    fn convert_color_out(&self, color: Option<ColorId>) -> i16 {
        match color {
            Some(id) => id.index() as i16,
            None => 0,
        }
    }

    /// 写出符号记录的公共头部，返回分配的编号。
    fn write_common_fields(
        &mut self,
        record: &mut Vec<u8>,
        id: SymbolId,
        type_tag: u8,
        subtype: u8,
        base_flags: u8,
        extent: i16,
    ) -> i16 {
        let symbol = self.map.symbol(id);
        let number = self.allocate_number(Self::desired_number(symbol));
        let mut status = 0u8;
        if symbol.is_protected {
            status |= 1;
        }
        if symbol.is_hidden {
            status |= 2;
        }

        record.extend_from_slice(&0u16.to_le_bytes()); // size，最后回填
        record.extend_from_slice(&number.to_le_bytes());
        record.push(type_tag);
        record.push(subtype);
        record.push(base_flags);
        record.push(status);
        record.extend_from_slice(&extent.to_le_bytes());
        record.extend_from_slice(&0i16.to_le_bytes());

        // 颜色使用位图：第 i 位对应优先级 i 的颜色
        let mut mask = [0u8; SYMBOL_COLOR_MASK_SIZE];
        for c in 0..self.map.color_count() {
            if self.map.symbol_uses_color(id, ColorId::new(c)) {
                mask[c / 8] |= 1 << (c % 8);
            }
        }
        record.extend_from_slice(&mask);

        let name = symbol.name.clone();
        let name_bytes = self.encode_pascal(&name, SYMBOL_NAME_SIZE);
        record.extend_from_slice(&name_bytes);

        record.extend_from_slice(&self.icon_bytes(id));
        debug_assert_eq!(record.len(), SYMBOL_COMMON_SIZE);
        number
    }

    /// 22×22、4 位/像素的符号图标。没有渲染器可用时，
    /// 以符号主色经调色板量化后的色块填充。
    fn icon_bytes(&self, id: SymbolId) -> [u8; ICON_BYTES] {
        let mut dominant = 15u8; // 白
        for c in 0..self.map.color_count() {
            if self.map.symbol_uses_color(id, ColorId::new(c)) {
                let color = self.map.color(ColorId::new(c));
                dominant = icon_color_index(
                    (color.r * 255.0).round() as u8,
                    (color.g * 255.0).round() as u8,
                    (color.b * 255.0).round() as u8,
                    255,
                );
                break;
            }
        }
        let mut icon = [0u8; ICON_BYTES];
        for row in icon.chunks_mut(ICON_BYTES_PER_ROW) {
            for byte in row.iter_mut().take(ICON_SIZE / 2) {
                *byte = (dominant << 4) | dominant;
            }
        }
        icon
    }

    fn finish_symbol_record(&mut self, mut record: Vec<u8>) -> u32 {
        let size = record.len() as u16;
        record[0..2].copy_from_slice(&size.to_le_bytes());
        let offset = self.buffer.len() as u32;
        self.buffer.extend_from_slice(&record);
        self.symbol_record_offsets.push(offset);
        offset
    }

    fn export_point_symbol(&mut self, id: SymbolId, point: &PointSymbol) -> i16 {
        let mut extent = self.point_symbol_extent(Some(point));
        if extent <= 0 {
            extent = 100;
        }
        let base_flags = if point.rotatable { 1 } else { 0 };
        let mut record = Vec::new();
        let number =
            self.write_common_fields(&mut record, id, SYMBOL_TYPE_POINT, 0, base_flags, extent);

        let mut pattern = Vec::new();
        let units = self.export_pattern(Some(point), &mut pattern);
        record.extend_from_slice(&units.to_le_bytes());
        record.extend_from_slice(&0u16.to_le_bytes());
        record.extend_from_slice(&pattern);

        self.finish_symbol_record(record);
        self.exported_types.insert(number, SYMBOL_TYPE_POINT);
        number
    }

    /// 点状符号的显示范围，文件单位（1/100 毫米）。
    fn point_symbol_extent(&self, point: Option<&PointSymbol>) -> i16 {
        let Some(point) = point else {
            return 0;
        };
        let mut bounds = Bounds::empty();
        for element in &point.elements {
            for coord in &element.coords {
                bounds.include_point(coord.to_millis());
            }
        }
        let mut extent_mm = if bounds.is_empty() {
            0.0
        } else {
            0.5 * bounds.width().max(bounds.height())
        };
        if point.inner_color.is_some() {
            extent_mm = extent_mm.max(0.001 * f64::from(point.inner_radius));
        }
        if point.outer_color.is_some() {
            extent_mm =
                extent_mm.max(0.001 * f64::from(point.inner_radius + point.outer_width));
        }
        convert_size_back((1000.0 * extent_mm).round() as i64)
            .clamp(0, i32::from(i16::MAX)) as i16
    }

    #[allow(clippy::too_many_lines)]
    fn export_line_symbol(&mut self, id: SymbolId, line: &LineSymbol) -> i16 {
        let name = self.map.symbol(id).name.clone();

        let mut extent = convert_size_back(i64::from(line.line_width) / 2);
        if line.has_border() {
            extent = extent.max(convert_size_back(
                i64::from(line.line_width) / 2
                    + i64::from(line.border_shift)
                    + i64::from(line.border_width) / 2,
            ));
        }
        for sub in [
            line.start_symbol.as_deref(),
            line.end_symbol.as_deref(),
            line.mid_symbol.as_deref(),
            line.dash_symbol.as_deref(),
        ]
        .into_iter()
        .flatten()
        {
            extent = extent.max(i32::from(self.point_symbol_extent(Some(sub))));
        }
        let extent = extent.clamp(0, i32::from(i16::MAX)) as i16;

        let mut record = Vec::new();
        let number = self.write_common_fields(&mut record, id, SYMBOL_TYPE_LINE, 0, 0, extent);

        // 端点/转角组合的固定映射；映射不到的组合按端点样式近似
        let ends: i16 = match (line.cap_style, line.join_style) {
            (CapStyle::Flat, JoinStyle::Bevel) => 0,
            (CapStyle::Round, JoinStyle::Round) => 1,
            (CapStyle::Pointed, JoinStyle::Bevel) => 2,
            (CapStyle::Pointed, JoinStyle::Round) => 3,
            (CapStyle::Flat, JoinStyle::Miter) => 4,
            (CapStyle::Pointed, JoinStyle::Miter) => 6,
            _ => {
                self.add_warning(format!(
                    "线符号 \"{name}\" 的端点/转角组合无法表示"
                ));
                match line.cap_style {
                    CapStyle::Flat | CapStyle::Square => 0,
                    CapStyle::Round => 1,
                    CapStyle::Pointed => 3,
                }
            }
        };

        let (bdist, edist) = if line.cap_style == CapStyle::Pointed {
            let d = convert_size_back(i64::from(line.pointed_cap_length)) as i16;
            (d, d)
        } else {
            (0, 0)
        };

        // 虚线参数
        let len: i16;
        let elen: i16;
        let mut gap = 0i16;
        let mut gap2 = 0i16;
        let mut egap = 0i16;
        if line.dashed {
            let has_mid = line.mid_symbol.as_ref().is_some_and(|mid| !mid.is_empty());
            if has_mid {
                if line.dashes_in_group > 1 {
                    self.add_warning(format!(
                        "线符号 \"{name}\"：忽略虚线分组设置"
                    ));
                }
                len = convert_size_back(i64::from(line.dash_length) + i64::from(line.break_length))
                    as i16;
                elen = len / 2;
                gap2 = convert_size_back(i64::from(line.break_length)) as i16;
            } else if line.dashes_in_group > 1 {
                if line.dashes_in_group > 2 {
                    self.add_warning(format!(
                        "线符号 \"{name}\"：每组虚线数量已减至 2"
                    ));
                }
                len = convert_size_back(
                    2 * i64::from(line.dash_length) + i64::from(line.in_group_break_length),
                ) as i16;
                elen = len;
                gap = convert_size_back(i64::from(line.break_length)) as i16;
                gap2 = convert_size_back(i64::from(line.in_group_break_length)) as i16;
                egap = gap2;
            } else {
                len = convert_size_back(i64::from(line.dash_length)) as i16;
                elen = if line.half_outer_dashes { len / 2 } else { len };
                gap = convert_size_back(i64::from(line.break_length)) as i16;
            }
        } else {
            len = convert_size_back(i64::from(line.segment_length)) as i16;
            elen = convert_size_back(i64::from(line.end_length)) as i16;
        }

        let smin: i16 = if line.show_at_least_one_symbol { 0 } else { -1 };

        // 边线导出为双线模式
        let mut dmode = 0i16;
        let mut dwidth = 0i16;
        let mut lwidth = 0i16;
        let mut lcolor = 0i16;
        let mut dlen = 0i16;
        let mut dgap = 0i16;
        if line.has_border() && line.border_color.is_some() {
            dwidth = convert_size_back(
                i64::from(line.line_width) - i64::from(line.border_width)
                    + 2 * i64::from(line.border_shift),
            ) as i16;
            dmode = if line.dashed_border { 3 } else { 1 };
            lwidth = convert_size_back(i64::from(line.border_width)) as i16;
            lcolor = self.convert_color_out(line.border_color);
            if line.dashed_border {
                dlen = convert_size_back(i64::from(line.border_dash_length)) as i16;
                dgap = convert_size_back(i64::from(line.border_break_length)) as i16;
            }
        }

        let color = self.convert_color_out(line.color);
        let width = if line.color.is_some() {
            convert_size_back(i64::from(line.line_width)) as i16
        } else {
            0
        };

        // 图案缓冲与各槽位长度
        let mut pattern = Vec::new();
        let smnpts = self.export_pattern(line.mid_symbol.as_deref(), &mut pattern);
        let ssnpts = 0u16; // 第二槽位不使用
        let scnpts = self.export_pattern(line.dash_symbol.as_deref(), &mut pattern);
        let sbnpts = self.export_pattern(line.start_symbol.as_deref(), &mut pattern);
        let senpts = self.export_pattern(line.end_symbol.as_deref(), &mut pattern);

        record.extend_from_slice(&color.to_le_bytes());
        record.extend_from_slice(&width.to_le_bytes());
        record.extend_from_slice(&ends.to_le_bytes());
        record.extend_from_slice(&bdist.to_le_bytes());
        record.extend_from_slice(&edist.to_le_bytes());
        record.extend_from_slice(&len.to_le_bytes());
        record.extend_from_slice(&elen.to_le_bytes());
        record.extend_from_slice(&gap.to_le_bytes());
        record.extend_from_slice(&gap2.to_le_bytes());
        record.extend_from_slice(&egap.to_le_bytes());
        record.extend_from_slice(&smin.to_le_bytes());
        record.extend_from_slice(&(line.mid_symbols_per_spot as i16).to_le_bytes());
        record.extend_from_slice(
            &(convert_size_back(i64::from(line.mid_symbol_distance)) as i16).to_le_bytes(),
        );
        record.extend_from_slice(&dmode.to_le_bytes());
        record.extend_from_slice(&dwidth.to_le_bytes());
        record.extend_from_slice(&0i16.to_le_bytes()); // dflags
        record.extend_from_slice(&0i16.to_le_bytes()); // dcolor
        record.extend_from_slice(&lwidth.to_le_bytes());
        record.extend_from_slice(&lwidth.to_le_bytes()); // rwidth 与左侧一致
        record.extend_from_slice(&lcolor.to_le_bytes());
        record.extend_from_slice(&lcolor.to_le_bytes()); // rcolor 与左侧一致
        record.extend_from_slice(&dlen.to_le_bytes());
        record.extend_from_slice(&dgap.to_le_bytes());
        record.extend_from_slice(&0i16.to_le_bytes()); // fwidth
        record.extend_from_slice(&0i16.to_le_bytes()); // fcolor
        record.extend_from_slice(&0i16.to_le_bytes()); // tmode
        record.extend_from_slice(&0i16.to_le_bytes()); // tlast
        record.extend_from_slice(&0i16.to_le_bytes());
        record.extend_from_slice(&smnpts.to_le_bytes());
        record.extend_from_slice(&ssnpts.to_le_bytes());
        record.extend_from_slice(&scnpts.to_le_bytes());
        record.extend_from_slice(&sbnpts.to_le_bytes());
        record.extend_from_slice(&senpts.to_le_bytes());
        record.extend_from_slice(&0i16.to_le_bytes());
        record.extend_from_slice(&pattern);

        self.finish_symbol_record(record);
        self.exported_types.insert(number, SYMBOL_TYPE_LINE);
        number
    }

    fn export_area_symbol(&mut self, id: SymbolId, area: &AreaSymbol) -> i16 {
        let name = self.map.symbol(id).name.clone();
        let mut record = Vec::new();

        let mut base_flags = 0u8;
        for pattern in &area.patterns {
            let rotatable = match pattern {
                FillPattern::Line(line) => line.rotatable,
                FillPattern::Point(point) => point.rotatable,
            };
            if rotatable {
                base_flags |= 1;
            }
        }
        let number = self.write_common_fields(&mut record, id, SYMBOL_TYPE_AREA, 0, base_flags, 0);

        let fill: i16 = if area.color.is_some() { 1 } else { 0 };
        let color = self.convert_color_out(area.color);

        // 影线：最多两道角度，宽度与间距在两道之间取平均
        let mut hmode = 0i16;
        let mut hcolor = 0i16;
        let mut hwidth = 0i16;
        let mut hdist = 0i16;
        let mut hangle1 = 0i16;
        let mut hangle2 = 0i16;
        for pattern in &area.patterns {
            let FillPattern::Line(line) = pattern else {
                continue;
            };
            let line_color = self.convert_color_out(line.color);
            if hmode == 1 && hcolor != line_color {
                self.add_warning(format!(
                    "面符号 \"{name}\"：跳过一个填充图案"
                ));
                continue;
            }
            hmode += 1;
            if hmode == 1 {
                hcolor = line_color;
                hwidth = convert_size_back(i64::from(line.line_width)) as i16;
                hdist = convert_size_back(
                    i64::from(line.line_spacing) - i64::from(line.line_width),
                ) as i16;
                hangle1 = convert_rotation_back(line.angle);
            } else if hmode == 2 {
                hwidth =
                    (hwidth + convert_size_back(i64::from(line.line_width)) as i16) / 2;
                hdist = (hdist
                    + convert_size_back(
                        i64::from(line.line_spacing) - i64::from(line.line_width),
                    ) as i16)
                    / 2;
                hangle2 = convert_rotation_back(line.angle);
                // 两道以上的影线本格式无法表示
                break;
            }
        }

        // 点阵：第二个图案触发"错行"启发式还原
        let mut pmode = 0i16;
        let mut pwidth = 0i16;
        let mut pheight = 0i16;
        let mut pangle = 0i16;
        let mut point_pattern: Option<&PointSymbol> = None;
        for pattern in &area.patterns {
            let FillPattern::Point(point) = pattern else {
                continue;
            };
            pmode += 1;
            if pmode == 1 {
                pwidth = convert_size_back(i64::from(point.point_distance)) as i16;
                pheight = convert_size_back(i64::from(point.line_spacing)) as i16;
                pangle = convert_rotation_back(point.angle);
                point_pattern = Some(&point.point);
            } else if pmode == 2 {
                // 这只是对常见符号库有效的启发式，不是精确换算
                self.add_warning(format!(
                    "面符号 \"{name}\"：按\"错行\"点阵导出，结果可能正确也可能不正确"
                ));
                if point.line_offset != 0 {
                    pheight /= 2;
                } else {
                    pwidth /= 2;
                }
                break;
            }
        }

        let mut pattern_buffer = Vec::new();
        let npts = self.export_pattern(point_pattern, &mut pattern_buffer);

        record.extend_from_slice(&color.to_le_bytes());
        record.extend_from_slice(&fill.to_le_bytes());
        record.extend_from_slice(&hmode.to_le_bytes());
        record.extend_from_slice(&hcolor.to_le_bytes());
        record.extend_from_slice(&hwidth.to_le_bytes());
        record.extend_from_slice(&hdist.to_le_bytes());
        record.extend_from_slice(&hangle1.to_le_bytes());
        record.extend_from_slice(&hangle2.to_le_bytes());
        record.extend_from_slice(&pmode.to_le_bytes());
        record.extend_from_slice(&pwidth.to_le_bytes());
        record.extend_from_slice(&pheight.to_le_bytes());
        record.extend_from_slice(&pangle.to_le_bytes());
        record.extend_from_slice(&npts.to_le_bytes());
        record.extend_from_slice(&0i16.to_le_bytes());
        record.extend_from_slice(&pattern_buffer);

        self.finish_symbol_record(record);
        self.exported_types.insert(number, SYMBOL_TYPE_AREA);
        number
    }

    fn export_text_symbol(&mut self, id: SymbolId, text: &TextSymbol) -> i16 {
        let name = self.map.symbol(id).name.clone();
        let mut record = Vec::new();
        let number = self.write_common_fields(&mut record, id, SYMBOL_TYPE_TEXT, 1, 0, 0);

        let font_size_mm = f64::from(text.font_size) / 1000.0;
        let dpts = (10.0 * font_size_mm / 25.4 * 72.0).round() as i16;
        let cspace = convert_size_back((1000.0 * text.character_spacing) as i64) as i16;
        if cspace != 0 {
            self.add_warning(format!(
                "文字符号 {name}：设置了字符间距，其实现与旧格式的行为尚不一致"
            ));
        }
        if text.underline {
            self.add_warning(format!("文字符号 {name}：忽略下划线"));
        }
        if text.kerning {
            self.add_warning(format!("文字符号 {name}：忽略字距调整"));
        }

        // 行距回到相对字号的百分比
        let absolute_line_spacing = text.line_spacing * text.line_height() / 1000.0;
        let lspace = (absolute_line_spacing / (font_size_mm * 0.01)).round() as i16;

        let font_bytes = self.encode_pascal(&text.font_family, SYMBOL_NAME_SIZE);
        record.extend_from_slice(&font_bytes);
        record.extend_from_slice(&self.convert_color_out(text.color).to_le_bytes());
        record.extend_from_slice(&dpts.to_le_bytes());
        record.extend_from_slice(&(if text.bold { 700i16 } else { 400i16 }).to_le_bytes());
        record.extend_from_slice(&(if text.italic { 1i16 } else { 0i16 }).to_le_bytes());
        record.extend_from_slice(&0i16.to_le_bytes()); // charset
        record.extend_from_slice(&cspace.to_le_bytes());
        record.extend_from_slice(&100i16.to_le_bytes()); // wspace
        // 默认左对齐；第一个引用对象会把实际对齐改写进来
        record.extend_from_slice(&0i16.to_le_bytes());
        record.extend_from_slice(&lspace.to_le_bytes());
        record.extend_from_slice(
            &(convert_size_back(i64::from(text.paragraph_spacing)) as i16).to_le_bytes(),
        );
        record.extend_from_slice(&0i16.to_le_bytes()); // indent1
        record.extend_from_slice(&0i16.to_le_bytes()); // indent2
        record.extend_from_slice(&(if text.line_below { 1i16 } else { 0i16 }).to_le_bytes());
        record.extend_from_slice(
            &self
                .convert_color_out(text.line_below_color)
                .to_le_bytes(),
        );
        record.extend_from_slice(
            &(convert_size_back(i64::from(text.line_below_width)) as i16).to_le_bytes(),
        );
        record.extend_from_slice(
            &(convert_size_back(i64::from(text.line_below_distance)) as i16).to_le_bytes(),
        );
        let ntabs = text.custom_tabs.len().min(32) as i16;
        record.extend_from_slice(&ntabs.to_le_bytes());
        record.extend_from_slice(&0i16.to_le_bytes());
        for i in 0..32usize {
            let tab = text
                .custom_tabs
                .get(i)
                .map(|&t| convert_size_back(i64::from(t)))
                .unwrap_or(0);
            record.extend_from_slice(&tab.to_le_bytes());
        }
        let (fmode, fcolor, fdx, fdy, fdpts) = match &text.framing {
            Some(framing) if framing.color.is_some() => match framing.mode {
                FramingMode::Shadow { x_offset, y_offset } => (
                    1i16,
                    self.convert_color_out(framing.color),
                    convert_size_back(i64::from(x_offset)) as i16,
                    -convert_size_back(i64::from(y_offset)) as i16,
                    0i16,
                ),
                FramingMode::Line { half_width } => (
                    2i16,
                    self.convert_color_out(framing.color),
                    0,
                    0,
                    convert_size_back(i64::from(half_width)) as i16,
                ),
            },
            _ => (0, 0, 0, 0, 0),
        };
        record.extend_from_slice(&fmode.to_le_bytes());
        record.extend_from_slice(&fcolor.to_le_bytes());
        record.extend_from_slice(&fdx.to_le_bytes());
        record.extend_from_slice(&fdy.to_le_bytes());
        record.extend_from_slice(&fdpts.to_le_bytes());
        record.extend_from_slice(&0i16.to_le_bytes());

        let size = record.len();
        debug_assert_eq!(size, SYMBOL_COMMON_SIZE + TEXT_FIELDS_SIZE);
        let offset = self.finish_symbol_record(record);
        self.text_symbol_records.insert(number, (offset, size));
        self.exported_types.insert(number, SYMBOL_TYPE_TEXT);
        number
    }

    /// 组合符号导出为其（传递）依赖闭包中全部符号的编号并集。
    fn export_combined_symbol(&mut self, id: SymbolId) -> BTreeSet<i16> {
        let mut seed = vec![false; self.map.symbol_count()];
        seed[id.index()] = true;
        let closure = self.map.symbol_use_closure(&seed);

        let mut result = BTreeSet::new();
        for (index, marked) in closure.iter().enumerate() {
            if *marked {
                if let Some(numbers) = self.symbol_index.get(&SymbolId::new(index)) {
                    result.extend(numbers.iter().copied());
                }
            }
        }
        result
    }

    // -- 图案导出 --------------------------------------------------------

    fn write_element_header(
        out: &mut Vec<u8>,
        elt_type: i16,
        flags: i16,
        color: i16,
        width: i16,
        diameter: i16,
        npts: i16,
    ) {
        out.extend_from_slice(&elt_type.to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&color.to_le_bytes());
        out.extend_from_slice(&width.to_le_bytes());
        out.extend_from_slice(&diameter.to_le_bytes());
        out.extend_from_slice(&npts.to_le_bytes());
        out.extend_from_slice(&[0u8; 4]);
    }

    /// 把点状符号编码为平铺成分缓冲，返回写出的坐标单元数。
    /// 各图形成分在前，符号自身的圆点/圆环成分在最后（坐标为原点）。
    fn export_pattern(&mut self, point: Option<&PointSymbol>, out: &mut Vec<u8>) -> u16 {
        let Some(point) = point else {
            return 0;
        };
        let mut units = 0u16;
        for element in &point.elements {
            units += self.export_sub_pattern(&element.coords, &element.symbol, out);
        }
        let origin = [MapCoord::default()];
        units += self.export_dot_ring(&origin, point, out);
        units
    }

    fn export_sub_pattern(
        &mut self,
        coords: &[MapCoord],
        symbol: &ElementSymbol,
        out: &mut Vec<u8>,
    ) -> u16 {
        match symbol {
            ElementSymbol::Point(point) => self.export_dot_ring(coords, point, out),
            ElementSymbol::Line(line) => {
                let mut flags = 0i16;
                if line.cap_style == CapStyle::Round {
                    flags |= 1;
                } else if line.join_style == JoinStyle::Miter {
                    flags |= 4;
                }
                Self::write_element_header(
                    out,
                    ELEMENT_TYPE_LINE,
                    flags,
                    self.convert_color_out(line.color),
                    convert_size_back(i64::from(line.line_width)) as i16,
                    0,
                    coords.len() as i16,
                );
                let npts = Self::export_coordinates(coords, Some(line), out);
                ELEMENT_HEADER_UNITS as u16 + npts
            }
            ElementSymbol::Area(area) => {
                Self::write_element_header(
                    out,
                    ELEMENT_TYPE_AREA,
                    0,
                    self.convert_color_out(area.color),
                    0,
                    0,
                    coords.len() as i16,
                );
                let npts = Self::export_coordinates(coords, None, out);
                ELEMENT_HEADER_UNITS as u16 + npts
            }
        }
    }

    /// 圆点与圆环各占一条成分记录，零尺寸的成分不写出。
    fn export_dot_ring(&mut self, coords: &[MapCoord], point: &PointSymbol, out: &mut Vec<u8>) -> u16 {
        let mut units = 0u16;
        if point.inner_radius > 0 && point.inner_color.is_some() {
            Self::write_element_header(
                out,
                ELEMENT_TYPE_DOT,
                0,
                self.convert_color_out(point.inner_color),
                0,
                convert_size_back(2 * i64::from(point.inner_radius)) as i16,
                coords.len() as i16,
            );
            let npts = Self::export_coordinates(coords, None, out);
            units += ELEMENT_HEADER_UNITS as u16 + npts;
        }
        if point.outer_width > 0 && point.outer_color.is_some() {
            Self::write_element_header(
                out,
                ELEMENT_TYPE_CIRCLE,
                0,
                self.convert_color_out(point.outer_color),
                convert_size_back(i64::from(point.outer_width)) as i16,
                convert_size_back(
                    2 * i64::from(point.inner_radius) + 2 * i64::from(point.outer_width),
                ) as i16,
                coords.len() as i16,
            );
            let npts = Self::export_coordinates(coords, None, out);
            units += ELEMENT_HEADER_UNITS as u16 + npts;
        }
        units
    }

    /// 路径坐标导出：镜像导入方向的位布局。曲线起点状态向前看两个点，
    /// 分别写控制点一/二标志；洞点状态写在下一个点上。虚线点在所属
    /// 线符号本身带虚线且没有专用角点图案时写虚线位，否则写角点位，
    /// 这样缺少对应图案的格式仍会把该点读成刻意的断点。
    fn export_coordinates(
        coords: &[MapCoord],
        line_context: Option<&LineSymbol>,
        out: &mut Vec<u8>,
    ) -> u16 {
        let mut num_points = 0u16;
        let mut curve_start = false;
        let mut curve_continue = false;
        let mut hole_point = false;
        for coord in coords {
            let mut x_flags = 0u8;
            let mut y_flags = 0u8;
            if coord.dash_point {
                match line_context {
                    Some(line)
                        if line.dash_symbol.as_ref().is_none_or(|d| d.is_empty())
                            && line.dashed =>
                    {
                        y_flags |= PY_DASH;
                    }
                    _ => y_flags |= PY_CORNER,
                }
            }
            if curve_start {
                x_flags |= PX_CTL1;
            }
            if hole_point {
                y_flags |= PY_HOLE;
            }
            if curve_continue {
                x_flags |= PX_CTL2;
            }
            curve_continue = curve_start;
            curve_start = coord.curve_start;
            hole_point = coord.hole_point;

            let packed = OcdPoint::pack(coord, x_flags, y_flags);
            out.extend_from_slice(&packed.x.to_le_bytes());
            out.extend_from_slice(&packed.y.to_le_bytes());
            num_points += 1;
        }
        num_points
    }

    // -- 对象导出 --------------------------------------------------------

    fn export_object(&mut self, object: &Object) {
        // 坐标与文字载荷
        let mut coords_out = Vec::new();
        let mut text_payload: Vec<u8> = Vec::new();
        let mut angle = 0i16;
        let mut unicode = 0u8;
        let npts: u16;
        match object {
            Object::Point(point) => {
                angle = convert_rotation_back(point.rotation);
                npts = Self::export_coordinates(
                    std::slice::from_ref(&point.coord),
                    None,
                    &mut coords_out,
                );
            }
            Object::Path(path) => {
                let line_context = self.map.symbol(path.symbol).as_line();
                npts = Self::export_coordinates(&path.coords, line_context, &mut coords_out);
            }
            Object::Text(text) => {
                angle = convert_rotation_back(text.rotation);
                unicode = 1;
                let symbol = self.map.symbol(text.symbol);
                let points = match symbol.as_text() {
                    Some(text_symbol) => export_text_coordinates(text, text_symbol),
                    None => Vec::new(),
                };
                npts = points.len() as u16;
                for point in points {
                    coords_out.extend_from_slice(&point.x.to_le_bytes());
                    coords_out.extend_from_slice(&point.y.to_le_bytes());
                }
                text_payload = self.encode_wide_text(&text.text);
            }
        }
        let ntext = (text_payload.len() / POINT_UNIT_SIZE) as u16;

        // 索引项的包围盒
        let bounds = object.bounds();
        let (entry_min, entry_max) = if bounds.is_empty() {
            (OcdPoint::default(), OcdPoint::default())
        } else {
            let a = OcdPoint::pack(&MapCoord::from_millis(bounds.min()), 0, 0);
            let b = OcdPoint::pack(&MapCoord::from_millis(bounds.max()), 0, 0);
            (
                OcdPoint {
                    x: a.x.min(b.x),
                    y: a.y.min(b.y),
                },
                OcdPoint {
                    x: a.x.max(b.x),
                    y: a.y.max(b.y),
                },
            )
        };

        // 符号映射到多个编号（组合符号）时，对象按每个编号各写一条记录
        let index_set = match self.symbol_index.get(&object.symbol()) {
            Some(numbers) => numbers.clone(),
            None => BTreeSet::from([-1i16]),
        };

        for &number in &index_set {
            let mut number_to_use = number;

            // 文字对象按实际使用的水平对齐选择或克隆符号变体
            if let Object::Text(text) = object {
                if number >= 0 {
                    number_to_use = self.resolve_text_symbol_variant(text, number);
                }
            }

            let otype = match object {
                Object::Point(_) => OBJECT_TYPE_POINT,
                Object::Path(_) => match self.exported_types.get(&number_to_use) {
                    Some(&SYMBOL_TYPE_AREA) => OBJECT_TYPE_AREA,
                    // 未知编号的路径按线处理
                    _ => OBJECT_TYPE_LINE,
                },
                Object::Text(text) => {
                    if text.has_single_anchor() {
                        OBJECT_TYPE_TEXT
                    } else {
                        OBJECT_TYPE_TEXT_BOX
                    }
                }
            };

            let pos = self.buffer.len() as u32;
            self.push_i16(number_to_use);
            self.push_u8(otype);
            self.push_u8(unicode);
            self.push_u16(npts);
            self.push_u16(ntext);
            self.push_i16(angle);
            self.push_i16(0);
            self.push_u32(0);
            self.buffer.extend_from_slice(&coords_out);
            self.buffer.extend_from_slice(&text_payload);

            self.object_entries.push(ObjectEntry {
                min: entry_min,
                max: entry_max,
                pos,
                npts: npts + ntext,
                symbol: number_to_use,
            });
        }
    }

    /// 本格式把水平对齐存在符号上：第一个引用对象确定符号里的对齐；
    /// 后续对象若对齐不同，先在已创建的变体里找，找不到就克隆一条
    /// 符号记录（换新编号），并记入变体表。
    fn resolve_text_symbol_variant(&mut self, text: &TextObject, number: i16) -> i16 {
        let symbol_id = text.symbol;
        let halign_value: i16 = match text.h_align {
            HorizontalAlignment::Left => 0,
            HorizontalAlignment::Center => 1,
            HorizontalAlignment::Right => 2,
        };

        if !self.text_format.contains_key(&symbol_id) {
            if let Some(&(offset, _)) = self.text_symbol_records.get(&number) {
                self.patch_i16(offset as usize + TEXT_HALIGN_OFFSET, halign_value);
            }
            self.text_format
                .insert(symbol_id, vec![(text.h_align, number)]);
            return number;
        }

        let variants = &self.text_format[&symbol_id];
        if let Some(&(_, existing)) = variants.iter().find(|(align, _)| *align == text.h_align) {
            return existing;
        }

        // 克隆原始记录，换编号与对齐
        let Some(&(offset, size)) = self.text_symbol_records.get(&number) else {
            return number;
        };
        let mut cloned = self.buffer[offset as usize..offset as usize + size].to_vec();
        let new_number = self.allocate_number(number);
        cloned[SYMBOL_NUMBER_OFFSET..SYMBOL_NUMBER_OFFSET + 2]
            .copy_from_slice(&new_number.to_le_bytes());
        cloned[TEXT_HALIGN_OFFSET..TEXT_HALIGN_OFFSET + 2]
            .copy_from_slice(&halign_value.to_le_bytes());
        let new_offset = self.buffer.len() as u32;
        self.buffer.extend_from_slice(&cloned);
        self.symbol_record_offsets.push(new_offset);
        self.text_symbol_records.insert(new_number, (new_offset, size));
        self.exported_types.insert(new_number, SYMBOL_TYPE_TEXT);
        if let Some(variants) = self.text_format.get_mut(&symbol_id) {
            variants.push((text.h_align, new_number));
        }
        new_number
    }

    // -- 索引页 ----------------------------------------------------------

    fn write_symbol_index(&mut self) -> u32 {
        let offsets = std::mem::take(&mut self.symbol_record_offsets);
        if offsets.is_empty() {
            return 0;
        }
        let mut first_page = 0u32;
        let mut prev_page: Option<usize> = None;
        for chunk in offsets.chunks(INDEX_PAGE_SLOTS) {
            let page_offset = self.buffer.len();
            if first_page == 0 {
                first_page = page_offset as u32;
            }
            if let Some(prev) = prev_page {
                self.patch_u32(prev, page_offset as u32);
            }
            self.push_u32(0); // 下一页指针，链上后回填
            for &record in chunk {
                self.push_u32(record);
            }
            for _ in chunk.len()..INDEX_PAGE_SLOTS {
                self.push_u32(0);
            }
            prev_page = Some(page_offset);
        }
        self.symbol_record_offsets = offsets;
        first_page
    }

    fn write_object_index(&mut self) -> u32 {
        let entries = std::mem::take(&mut self.object_entries);
        if entries.is_empty() {
            return 0;
        }
        let mut first_page = 0u32;
        let mut prev_page: Option<usize> = None;
        for chunk in entries.chunks(INDEX_PAGE_SLOTS) {
            let page_offset = self.buffer.len();
            if first_page == 0 {
                first_page = page_offset as u32;
            }
            if let Some(prev) = prev_page {
                self.patch_u32(prev, page_offset as u32);
            }
            self.push_u32(0);
            for entry in chunk {
                self.push_i32(entry.min.x);
                self.push_i32(entry.min.y);
                self.push_i32(entry.max.x);
                self.push_i32(entry.max.y);
                self.push_u32(entry.pos);
                self.push_u16(entry.npts);
                self.push_i16(entry.symbol);
            }
            for _ in chunk.len()..INDEX_PAGE_SLOTS {
                self.buffer.extend_from_slice(&[0u8; OBJECT_ENTRY_SIZE]);
            }
            prev_page = Some(page_offset);
        }
        self.object_entries = entries;
        first_page
    }
}

/// 把坐标绕原点旋转 `angle`（模型 y 轴向下，角度逆时针）。
fn rotate_vec(x: f64, y: f64, angle: f64) -> glam::DVec2 {
    glam::DVec2::new(
        x * angle.cos() + y * angle.sin(),
        -x * angle.sin() + y * angle.cos(),
    )
}

/// 文字对象的坐标导出。
///
/// 单锚点文字写 5 个点：锚点，然后从左下角顺时针的四个包围盒角点，
/// 包围盒按名义字体度量估算（每字符 0.5 em 行宽）。框排文字写 4 个点，
/// 因为本格式的框排只支持顶端对齐，上边缘上移一段行间留白，
/// 让顶端对齐的渲染器把首行基线放到期望的位置。
fn export_text_coordinates(object: &TextObject, symbol: &TextSymbol) -> Vec<OcdPoint> {
    if object.line_count() == 0 {
        return Vec::new();
    }
    let em = f64::from(symbol.font_size) / 1000.0;
    let ascent = symbol.ascent() / 1000.0;
    let descent = symbol.descent() / 1000.0;
    let leading = symbol.internal_leading() / 1000.0;
    let line_advance = symbol.line_height() / 1000.0 * symbol.line_spacing;

    match &object.anchor {
        TextAnchor::Single(anchor) => {
            let anchor_f = anchor.to_millis();
            // 名义排版下的包围盒，文字局部坐标，基线过原点
            let mut bounds = Bounds::empty();
            for (i, line) in object.text.lines().enumerate() {
                let line_width = line.chars().count() as f64 * 0.5 * em;
                let line_y = i as f64 * line_advance;
                let line_x = match object.h_align {
                    HorizontalAlignment::Left => 0.0,
                    HorizontalAlignment::Center => -line_width / 2.0,
                    HorizontalAlignment::Right => -line_width,
                };
                bounds.include_point(MapCoordF::new(line_x, line_y - ascent));
                bounds.include_point(MapCoordF::new(line_x + line_width, line_y + descent));
            }

            let corner = |x: f64, y: f64| {
                let rotated = rotate_vec(x, y, object.rotation);
                OcdPoint::pack(&MapCoord::from_millis(anchor_f + rotated), 0, 0)
            };
            vec![
                OcdPoint::pack(anchor, 0, 0),
                corner(bounds.min().x(), bounds.max().y()),
                corner(bounds.max().x(), bounds.max().y()),
                corner(bounds.max().x(), bounds.min().y()),
                corner(bounds.min().x(), bounds.min().y()),
            ]
        }
        TextAnchor::Box {
            center,
            width,
            height,
        } => {
            let center_f = center.to_millis();
            let half_w = *width as f64 / 2000.0;
            let half_h = *height as f64 / 2000.0;
            // 上边缘上移一段行间留白（见导入方向的逆操作）
            let new_top = -half_h - leading;
            let corner = |x: f64, y: f64| {
                let rotated = rotate_vec(x, y, object.rotation);
                OcdPoint::pack(&MapCoord::from_millis(center_f + rotated), 0, 0)
            };
            vec![
                corner(-half_w, half_h),
                corner(half_w, half_h),
                corner(half_w, new_top),
                corner(-half_w, new_top),
            ]
        }
    }
}
