pub mod geometry {
    use glam::DVec2;
    use serde::{Deserialize, Serialize};

    /// 地图坐标，整数定点表示，单位 1/1000 毫米。
    /// 整数坐标保证读写往返不引入浮点误差。
    ///
    /// 每个坐标点还携带路径标志：`curve_start` 表示本点开始一段三次贝塞尔曲线
    /// （其后两个点是控制点）；`dash_point` 表示强制虚线断点或角点；
    /// `hole_point` 表示子路径边界；`close_point` 为派生标志，
    /// 当子路径末点与首点位置重合时置位。
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct MapCoord {
        pub x: i64,
        pub y: i64,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        pub curve_start: bool,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        pub dash_point: bool,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        pub hole_point: bool,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        pub close_point: bool,
    }

    impl MapCoord {
        #[inline]
        pub fn new(x: i64, y: i64) -> Self {
            Self {
                x,
                y,
                ..Self::default()
            }
        }

        /// 从毫米浮点坐标构造，四舍五入到 1/1000 毫米。
        #[inline]
        pub fn from_millis(pos: MapCoordF) -> Self {
            Self::new(
                (pos.x() * 1000.0).round() as i64,
                (pos.y() * 1000.0).round() as i64,
            )
        }

        /// 仅比较位置，忽略所有标志位。
        #[inline]
        pub fn is_position_equal_to(&self, other: &MapCoord) -> bool {
            self.x == other.x && self.y == other.y
        }

        /// 转换为毫米浮点坐标。
        #[inline]
        pub fn to_millis(self) -> MapCoordF {
            MapCoordF::new(self.x as f64 / 1000.0, self.y as f64 / 1000.0)
        }

        /// 到另一点的距离，单位毫米。
        #[inline]
        pub fn length_to(&self, other: &MapCoord) -> f64 {
            self.to_millis().vector_to(other.to_millis()).length()
        }
    }

    /// 毫米单位的浮点坐标，内部以 `glam::DVec2` 表示。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct MapCoordF(pub DVec2);

    impl MapCoordF {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn vector_to(self, other: MapCoordF) -> DVec2 {
            other.0 - self.0
        }

        #[inline]
        pub fn length(self) -> f64 {
            self.0.length()
        }

        /// 向量相对 x 轴的角度，弧度。
        #[inline]
        pub fn angle(self) -> f64 {
            self.0.y.atan2(self.0.x)
        }

        #[inline]
        pub fn normalize(self) -> Self {
            Self(self.0.normalize_or_zero())
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }
    }

    impl From<DVec2> for MapCoordF {
        fn from(value: DVec2) -> Self {
            Self(value)
        }
    }

    impl std::ops::Add<DVec2> for MapCoordF {
        type Output = MapCoordF;

        #[inline]
        fn add(self, rhs: DVec2) -> MapCoordF {
            MapCoordF(self.0 + rhs)
        }
    }

    /// 毫米单位的轴对齐包围盒。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds {
        min: MapCoordF,
        max: MapCoordF,
    }

    impl Bounds {
        pub fn empty() -> Self {
            Self {
                min: MapCoordF::new(f64::INFINITY, f64::INFINITY),
                max: MapCoordF::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            }
        }

        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y()
        }

        #[inline]
        pub fn min(&self) -> MapCoordF {
            self.min
        }

        #[inline]
        pub fn max(&self) -> MapCoordF {
            self.max
        }

        pub fn include_point(&mut self, point: MapCoordF) {
            self.min = MapCoordF::new(self.min.x().min(point.x()), self.min.y().min(point.y()));
            self.max = MapCoordF::new(self.max.x().max(point.x()), self.max.y().max(point.y()));
        }

        pub fn width(&self) -> f64 {
            (self.max.x() - self.min.x()).max(0.0)
        }

        pub fn height(&self) -> f64 {
            (self.max.y() - self.min.y()).max(0.0)
        }
    }

    /// 标记闭合子路径。
    ///
    /// 子路径边界是洞点（`hole_point`）或坐标序列末点；当边界点位置与该子路径
    /// 首点位置完全一致时，在边界点上置 `close_point`。
    pub fn mark_closed_subpaths(coords: &mut [MapCoord]) {
        let len = coords.len();
        let mut start = 0;
        for i in 0..len {
            if !coords[i].hole_point && i < len - 1 {
                continue;
            }
            if coords[i].is_position_equal_to(&coords[start]) {
                coords[i].close_point = true;
            }
            start = i + 1;
        }
    }
}

pub mod map {
    use std::collections::HashMap;

    use serde::{Deserialize, Serialize};

    use crate::geometry::{Bounds, MapCoord, MapCoordF, mark_closed_subpaths};

    /// 颜色在地图颜色表中的下标。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub struct ColorId(usize);

    impl ColorId {
        #[inline]
        pub fn new(index: usize) -> Self {
            Self(index)
        }

        #[inline]
        pub fn index(self) -> usize {
            self.0
        }
    }

    /// 符号在地图符号表中的下标。符号由地图独占持有，对象只通过 id 引用。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub struct SymbolId(usize);

    impl SymbolId {
        #[inline]
        pub fn new(index: usize) -> Self {
            Self(index)
        }

        #[inline]
        pub fn index(self) -> usize {
            self.0
        }
    }

    /// 印刷色。CMYK 分量以 0.0–1.0 的小数存储，`priority` 是导入顺序，
    /// 同时充当颜色表中的稠密下标。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct MapColor {
        pub priority: i32,
        pub name: String,
        pub c: f32,
        pub m: f32,
        pub y: f32,
        pub k: f32,
        pub opacity: f32,
        pub r: f32,
        pub g: f32,
        pub b: f32,
    }

    impl MapColor {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                priority: -1,
                name: name.into(),
                c: 0.0,
                m: 0.0,
                y: 0.0,
                k: 0.0,
                opacity: 1.0,
                r: 0.0,
                g: 0.0,
                b: 0.0,
            }
        }

        /// 由 CMYK 推导工作用 RGB 值。
        pub fn update_from_cmyk(&mut self) {
            self.r = (1.0 - self.c) * (1.0 - self.k);
            self.g = (1.0 - self.m) * (1.0 - self.k);
            self.b = (1.0 - self.y) * (1.0 - self.k);
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum CapStyle {
        Flat,
        Round,
        Pointed,
        Square,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum JoinStyle {
        Bevel,
        Round,
        Miter,
    }

    /// 点状符号。`inner_radius`/`inner_color` 描述实心圆点，
    /// `outer_width`/`outer_color` 描述圆环，二者可以同时存在；
    /// 更复杂的图案放在 `elements` 里。长度单位均为 1/1000 毫米。
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct PointSymbol {
        pub rotatable: bool,
        pub inner_radius: i32,
        pub inner_color: Option<ColorId>,
        pub outer_width: i32,
        pub outer_color: Option<ColorId>,
        pub elements: Vec<PointSymbolElement>,
    }

    impl PointSymbol {
        /// 没有任何可见成分时为空。
        pub fn is_empty(&self) -> bool {
            self.elements.is_empty()
                && (self.inner_radius <= 0 || self.inner_color.is_none())
                && (self.outer_width <= 0 || self.outer_color.is_none())
        }

        /// 图案是否关于符号原点对称（只有圆点/圆环成分）。
        pub fn is_symmetrical(&self) -> bool {
            self.elements.is_empty()
        }
    }

    /// 点状符号的图形成分：子符号加一串坐标。
    /// 点子符号恰好一个坐标，线/面子符号为折线或闭合多边形。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct PointSymbolElement {
        pub symbol: ElementSymbol,
        pub coords: Vec<MapCoord>,
    }

    /// 图形成分允许的子符号种类。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum ElementSymbol {
        Point(PointSymbol),
        Line(LineSymbol),
        Area(AreaSymbol),
    }

    /// 线状符号。虚线、端点样式、边线以及沿线布置的点状子符号
    /// （中点重复、角点/虚线点、起点、终点）都在这里描述。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct LineSymbol {
        pub line_width: i32,
        pub color: Option<ColorId>,
        pub minimum_length: i32,
        pub cap_style: CapStyle,
        pub join_style: JoinStyle,
        pub pointed_cap_length: i32,
        pub dashed: bool,
        pub segment_length: i32,
        pub end_length: i32,
        pub dash_length: i32,
        pub break_length: i32,
        pub dashes_in_group: i32,
        pub in_group_break_length: i32,
        pub half_outer_dashes: bool,
        pub mid_symbol: Option<Box<PointSymbol>>,
        pub dash_symbol: Option<Box<PointSymbol>>,
        pub start_symbol: Option<Box<PointSymbol>>,
        pub end_symbol: Option<Box<PointSymbol>>,
        pub mid_symbols_per_spot: i32,
        pub mid_symbol_distance: i32,
        pub show_at_least_one_symbol: bool,
        pub minimum_mid_symbol_count: i32,
        pub minimum_mid_symbol_count_when_closed: i32,
        pub have_border_lines: bool,
        pub border_color: Option<ColorId>,
        pub border_width: i32,
        pub border_shift: i32,
        pub dashed_border: bool,
        pub border_dash_length: i32,
        pub border_break_length: i32,
    }

    impl Default for LineSymbol {
        fn default() -> Self {
            Self {
                line_width: 0,
                color: None,
                minimum_length: 0,
                cap_style: CapStyle::Flat,
                join_style: JoinStyle::Miter,
                pointed_cap_length: 1000,
                dashed: false,
                segment_length: 4000,
                end_length: 0,
                dash_length: 4000,
                break_length: 1000,
                dashes_in_group: 1,
                in_group_break_length: 500,
                half_outer_dashes: false,
                mid_symbol: None,
                dash_symbol: None,
                start_symbol: None,
                end_symbol: None,
                mid_symbols_per_spot: 1,
                mid_symbol_distance: 0,
                show_at_least_one_symbol: false,
                minimum_mid_symbol_count: 0,
                minimum_mid_symbol_count_when_closed: 0,
                have_border_lines: false,
                border_color: None,
                border_width: 0,
                border_shift: 0,
                dashed_border: false,
                border_dash_length: 2000,
                border_break_length: 1000,
            }
        }
    }

    impl LineSymbol {
        pub fn has_border(&self) -> bool {
            self.have_border_lines
        }
    }

    /// 面状符号的一种填充图案。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum FillPattern {
        Line(LinePattern),
        Point(PointPattern),
    }

    /// 平行线填充（影线）。`angle` 单位弧度。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct LinePattern {
        pub angle: f64,
        pub rotatable: bool,
        pub line_spacing: i32,
        pub line_offset: i32,
        pub color: Option<ColorId>,
        pub line_width: i32,
    }

    /// 按网格撒布点状符号的填充。错行排布由两个互相错开的图案叠加模拟。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct PointPattern {
        pub angle: f64,
        pub rotatable: bool,
        pub point_distance: i32,
        pub line_spacing: i32,
        pub line_offset: i32,
        pub offset_along_line: i32,
        pub point: PointSymbol,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct AreaSymbol {
        pub color: Option<ColorId>,
        pub minimum_area: i32,
        pub patterns: Vec<FillPattern>,
    }

    /// 文字加框样式。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum FramingMode {
        /// 阴影偏移，单位 1/1000 毫米。
        Shadow { x_offset: i32, y_offset: i32 },
        /// 描边，half_width 为描边线半宽。
        Line { half_width: i32 },
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct TextFraming {
        pub color: Option<ColorId>,
        pub mode: FramingMode,
    }

    /// 文字符号。`font_size` 是字号（em 高），单位 1/1000 毫米；
    /// `line_spacing` 是相对行高的倍数；`character_spacing` 相对字宽。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct TextSymbol {
        pub font_family: String,
        pub font_size: i32,
        pub bold: bool,
        pub italic: bool,
        pub underline: bool,
        pub color: Option<ColorId>,
        pub line_spacing: f64,
        pub paragraph_spacing: i32,
        pub character_spacing: f64,
        pub kerning: bool,
        pub line_below: bool,
        pub line_below_color: Option<ColorId>,
        pub line_below_width: i32,
        pub line_below_distance: i32,
        pub custom_tabs: Vec<i32>,
        pub framing: Option<TextFraming>,
    }

    impl Default for TextSymbol {
        fn default() -> Self {
            Self {
                font_family: "Arial".to_string(),
                font_size: 4000,
                bold: false,
                italic: false,
                underline: false,
                color: None,
                line_spacing: 1.0,
                paragraph_spacing: 0,
                character_spacing: 0.0,
                kerning: false,
                line_below: false,
                line_below_color: None,
                line_below_width: 0,
                line_below_distance: 0,
                custom_tabs: Vec::new(),
                framing: None,
            }
        }
    }

    // 名义字体度量。没有字体栅格化器，排版相关的换算统一使用这组固定比例，
    // 导入导出两侧一致即可保证往返。
    const FONT_ASCENT_FACTOR: f64 = 0.80;
    const FONT_DESCENT_FACTOR: f64 = 0.20;
    const FONT_LEADING_FACTOR: f64 = 0.15;

    impl TextSymbol {
        /// 名义上升高度，单位 1/1000 毫米。
        #[inline]
        pub fn ascent(&self) -> f64 {
            FONT_ASCENT_FACTOR * self.font_size as f64
        }

        #[inline]
        pub fn descent(&self) -> f64 {
            FONT_DESCENT_FACTOR * self.font_size as f64
        }

        #[inline]
        pub fn internal_leading(&self) -> f64 {
            FONT_LEADING_FACTOR * self.font_size as f64
        }

        /// 单行行高（上升 + 下降 + 行间留白），单位 1/1000 毫米。
        #[inline]
        pub fn line_height(&self) -> f64 {
            self.ascent() + self.descent() + self.internal_leading()
        }
    }

    /// 组合符号：按序引用地图符号表中的若干部件，整体作为一个符号绘制。
    /// 部件不继承组合符号自身的隐藏/保护状态。
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct CombinedSymbol {
        pub parts: Vec<SymbolId>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum SymbolKind {
        Point(PointSymbol),
        Line(LineSymbol),
        Area(AreaSymbol),
        Text(TextSymbol),
        Combined(CombinedSymbol),
    }

    /// 地图符号。`number` 是人读的点分编号 [主, 次, 辅]，未用的分量为 -1。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Symbol {
        pub name: String,
        pub number: [i32; 3],
        pub is_helper_symbol: bool,
        pub is_hidden: bool,
        pub is_protected: bool,
        pub kind: SymbolKind,
    }

    impl Symbol {
        pub fn new(kind: SymbolKind) -> Self {
            Self {
                name: String::new(),
                number: [-1, -1, -1],
                is_helper_symbol: false,
                is_hidden: false,
                is_protected: false,
                kind,
            }
        }

        /// "101.2" 形式的编号文本，用于警告信息。
        pub fn number_as_string(&self) -> String {
            let mut out = String::new();
            for component in self.number {
                if component < 0 {
                    break;
                }
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(&component.to_string());
            }
            out
        }

        pub fn as_line(&self) -> Option<&LineSymbol> {
            match &self.kind {
                SymbolKind::Line(line) => Some(line),
                _ => None,
            }
        }

        pub fn as_point(&self) -> Option<&PointSymbol> {
            match &self.kind {
                SymbolKind::Point(point) => Some(point),
                _ => None,
            }
        }

        pub fn as_text(&self) -> Option<&TextSymbol> {
            match &self.kind {
                SymbolKind::Text(text) => Some(text),
                _ => None,
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum HorizontalAlignment {
        Left,
        Center,
        Right,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum VerticalAlignment {
        Baseline,
        Top,
        Center,
        Bottom,
    }

    /// 文字对象的定位方式：单锚点，或居中矩形框（宽高单位 1/1000 毫米）。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum TextAnchor {
        Single(MapCoord),
        Box {
            center: MapCoord,
            width: i64,
            height: i64,
        },
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct PointObject {
        pub symbol: SymbolId,
        pub rotation: f64,
        pub coord: MapCoord,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct PathObject {
        pub symbol: SymbolId,
        pub coords: Vec<MapCoord>,
    }

    impl PathObject {
        pub fn new(symbol: SymbolId, coords: Vec<MapCoord>) -> Self {
            Self { symbol, coords }
        }

        /// 重新计算子路径闭合标志。
        pub fn recalculate_parts(&mut self) {
            mark_closed_subpaths(&mut self.coords);
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct TextObject {
        pub symbol: SymbolId,
        pub text: String,
        pub rotation: f64,
        pub h_align: HorizontalAlignment,
        pub v_align: VerticalAlignment,
        pub anchor: TextAnchor,
    }

    impl TextObject {
        pub fn new(symbol: SymbolId) -> Self {
            Self {
                symbol,
                text: String::new(),
                rotation: 0.0,
                h_align: HorizontalAlignment::Left,
                v_align: VerticalAlignment::Baseline,
                anchor: TextAnchor::Single(MapCoord::default()),
            }
        }

        pub fn has_single_anchor(&self) -> bool {
            matches!(self.anchor, TextAnchor::Single(_))
        }

        pub fn line_count(&self) -> usize {
            if self.text.is_empty() {
                0
            } else {
                self.text.lines().count()
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum Object {
        Point(PointObject),
        Path(PathObject),
        Text(TextObject),
    }

    impl Object {
        pub fn symbol(&self) -> SymbolId {
            match self {
                Object::Point(point) => point.symbol,
                Object::Path(path) => path.symbol,
                Object::Text(text) => text.symbol,
            }
        }

        /// 对象坐标的包围盒，单位毫米。文字框对象取四角。
        pub fn bounds(&self) -> Bounds {
            let mut bounds = Bounds::empty();
            match self {
                Object::Point(point) => bounds.include_point(point.coord.to_millis()),
                Object::Path(path) => {
                    for coord in &path.coords {
                        bounds.include_point(coord.to_millis());
                    }
                }
                Object::Text(text) => match &text.anchor {
                    TextAnchor::Single(coord) => bounds.include_point(coord.to_millis()),
                    TextAnchor::Box {
                        center,
                        width,
                        height,
                    } => {
                        let center = center.to_millis();
                        let half_w = *width as f64 / 2000.0;
                        let half_h = *height as f64 / 2000.0;
                        bounds.include_point(MapCoordF::new(
                            center.x() - half_w,
                            center.y() - half_h,
                        ));
                        bounds.include_point(MapCoordF::new(
                            center.x() + half_w,
                            center.y() + half_h,
                        ));
                    }
                },
            }
            bounds
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct MapLayer {
        pub name: String,
        pub objects: Vec<Object>,
    }

    impl MapLayer {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                objects: Vec::new(),
            }
        }
    }

    /// 栅格底图的放置记录。`x`/`y` 单位 1/1000 毫米，`rotation` 弧度，
    /// 缩放是实地米每像素。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct TemplateImage {
        pub path: String,
        pub x: i64,
        pub y: i64,
        pub scale_x: f64,
        pub scale_y: f64,
        pub rotation: f64,
        pub visible: bool,
    }

    /// 缩放的上下限。超出范围的存档值一律不采用。
    pub const ZOOM_OUT_LIMIT: f64 = 1.0 / 16.0;
    pub const ZOOM_IN_LIMIT: f64 = 512.0;

    /// 地图视图状态：缩放与屏幕中心。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct MapView {
        zoom: f64,
        pub center: MapCoord,
    }

    impl Default for MapView {
        fn default() -> Self {
            Self {
                zoom: 1.0,
                center: MapCoord::default(),
            }
        }
    }

    impl MapView {
        #[inline]
        pub fn zoom(&self) -> f64 {
            self.zoom
        }

        pub fn set_zoom(&mut self, zoom: f64) {
            self.zoom = zoom.clamp(ZOOM_OUT_LIMIT, ZOOM_IN_LIMIT);
        }
    }

    /// 矢量地图文档：颜色表、符号表、图层、底图与注记。
    /// 所有符号与对象都由地图独占持有。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Map {
        pub scale_denominator: u32,
        pub notes: String,
        colors: Vec<MapColor>,
        symbols: Vec<Symbol>,
        pub layers: Vec<MapLayer>,
        pub current_layer: usize,
        pub templates: Vec<TemplateImage>,
        pub first_front_template: usize,
        undefined_point: Option<SymbolId>,
        undefined_line: Option<SymbolId>,
    }

    impl Default for Map {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Map {
        pub fn new() -> Self {
            Self {
                scale_denominator: 15_000,
                notes: String::new(),
                colors: Vec::new(),
                symbols: Vec::new(),
                layers: vec![MapLayer::new("默认图层")],
                current_layer: 0,
                templates: Vec::new(),
                first_front_template: 0,
                undefined_point: None,
                undefined_line: None,
            }
        }

        pub fn add_color(&mut self, mut color: MapColor) -> ColorId {
            let id = ColorId(self.colors.len());
            color.priority = id.0 as i32;
            self.colors.push(color);
            id
        }

        #[inline]
        pub fn color(&self, id: ColorId) -> &MapColor {
            &self.colors[id.0]
        }

        #[inline]
        pub fn colors(&self) -> &[MapColor] {
            &self.colors
        }

        #[inline]
        pub fn color_count(&self) -> usize {
            self.colors.len()
        }

        pub fn add_symbol(&mut self, symbol: Symbol) -> SymbolId {
            let id = SymbolId(self.symbols.len());
            self.symbols.push(symbol);
            id
        }

        #[inline]
        pub fn symbol(&self, id: SymbolId) -> &Symbol {
            &self.symbols[id.0]
        }

        #[inline]
        pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
            &mut self.symbols[id.0]
        }

        #[inline]
        pub fn symbols(&self) -> &[Symbol] {
            &self.symbols
        }

        pub fn symbol_ids(&self) -> impl Iterator<Item = SymbolId> + use<> {
            (0..self.symbols.len()).map(SymbolId)
        }

        #[inline]
        pub fn symbol_count(&self) -> usize {
            self.symbols.len()
        }

        pub fn object_count(&self) -> usize {
            self.layers.iter().map(|layer| layer.objects.len()).sum()
        }

        /// 未定义点符号：对象的符号引用解析失败时的占位。懒创建，
        /// 标记为辅助符号，导出时不占编号。
        pub fn undefined_point(&mut self) -> SymbolId {
            if let Some(id) = self.undefined_point {
                return id;
            }
            let mut symbol = Symbol::new(SymbolKind::Point(PointSymbol {
                rotatable: false,
                inner_radius: 500,
                inner_color: None,
                outer_width: 0,
                outer_color: None,
                elements: Vec::new(),
            }));
            symbol.name = "未定义点符号".to_string();
            symbol.is_helper_symbol = true;
            let id = self.add_symbol(symbol);
            self.undefined_point = Some(id);
            id
        }

        /// 未定义线符号，同上。
        pub fn undefined_line(&mut self) -> SymbolId {
            if let Some(id) = self.undefined_line {
                return id;
            }
            let mut symbol = Symbol::new(SymbolKind::Line(LineSymbol {
                line_width: 100,
                ..LineSymbol::default()
            }));
            symbol.name = "未定义线符号".to_string();
            symbol.is_helper_symbol = true;
            let id = self.add_symbol(symbol);
            self.undefined_line = Some(id);
            id
        }

        /// 符号使用闭包：从种子集出发，沿组合符号的部件引用传递闭包。
        /// 返回与符号表等长的标记向量。
        pub fn symbol_use_closure(&self, seed: &[bool]) -> Vec<bool> {
            let mut closure = seed.to_vec();
            closure.resize(self.symbols.len(), false);
            loop {
                let mut changed = false;
                for (index, symbol) in self.symbols.iter().enumerate() {
                    if !closure[index] {
                        continue;
                    }
                    if let SymbolKind::Combined(combined) = &symbol.kind {
                        for part in &combined.parts {
                            if !closure[part.0] {
                                closure[part.0] = true;
                                changed = true;
                            }
                        }
                    }
                }
                if !changed {
                    break;
                }
            }
            closure
        }

        /// 符号是否（直接或经子符号/部件）使用某颜色。
        pub fn symbol_uses_color(&self, id: SymbolId, color: ColorId) -> bool {
            self.kind_uses_color(&self.symbols[id.0].kind, color)
        }

        fn kind_uses_color(&self, kind: &SymbolKind, color: ColorId) -> bool {
            match kind {
                SymbolKind::Point(point) => self.point_symbol_uses_color(point, color),
                SymbolKind::Line(line) => {
                    line.color == Some(color)
                        || (line.have_border_lines && line.border_color == Some(color))
                        || [
                            &line.mid_symbol,
                            &line.dash_symbol,
                            &line.start_symbol,
                            &line.end_symbol,
                        ]
                        .into_iter()
                        .flatten()
                        .any(|sub| self.point_symbol_uses_color(sub, color))
                }
                SymbolKind::Area(area) => {
                    area.color == Some(color)
                        || area.patterns.iter().any(|pattern| match pattern {
                            FillPattern::Line(line) => line.color == Some(color),
                            FillPattern::Point(point) => {
                                self.point_symbol_uses_color(&point.point, color)
                            }
                        })
                }
                SymbolKind::Text(text) => {
                    text.color == Some(color)
                        || (text.line_below && text.line_below_color == Some(color))
                        || text
                            .framing
                            .as_ref()
                            .is_some_and(|framing| framing.color == Some(color))
                }
                SymbolKind::Combined(combined) => combined
                    .parts
                    .iter()
                    .any(|part| self.symbol_uses_color(*part, color)),
            }
        }

        fn point_symbol_uses_color(&self, point: &PointSymbol, color: ColorId) -> bool {
            (point.inner_radius > 0 && point.inner_color == Some(color))
                || (point.outer_width > 0 && point.outer_color == Some(color))
                || point.elements.iter().any(|element| match &element.symbol {
                    ElementSymbol::Point(sub) => self.point_symbol_uses_color(sub, color),
                    ElementSymbol::Line(sub) => sub.color == Some(color),
                    ElementSymbol::Area(sub) => sub.color == Some(color),
                })
        }

        /// 统计每个符号被多少对象引用，调试输出用。
        pub fn symbol_usage_counts(&self) -> HashMap<SymbolId, usize> {
            let mut counts = HashMap::new();
            for layer in &self.layers {
                for object in &layer.objects {
                    *counts.entry(object.symbol()).or_insert(0) += 1;
                }
            }
            counts
        }
    }
}
