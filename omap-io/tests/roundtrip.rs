//! 模型 → 导出 → 再导入的往返测试。
//! 覆盖颜色、各类符号、对象、交叉引用与格式限制的替代方案。

use omap_core::geometry::MapCoord;
use omap_core::map::{
    AreaSymbol, CapStyle, ColorId, CombinedSymbol, ElementSymbol, FillPattern,
    HorizontalAlignment, JoinStyle, LinePattern, LineSymbol, Map, MapColor, MapView, Object,
    PathObject, PointPattern, PointSymbol, PointSymbolElement, Symbol, SymbolKind, TextAnchor,
    TextObject, TextSymbol, VerticalAlignment,
};
use omap_io::{ExportOptions, ImportOptions, OcdError, export_ocd, import_ocd, understands};

fn roundtrip(map: &Map, view: Option<&MapView>) -> omap_io::ImportedMap {
    let exported = export_ocd(map, view, &ExportOptions::default()).expect("导出应成功");
    assert!(understands(&exported.bytes), "导出的缓冲应能被识别");
    import_ocd(&exported.bytes, &ImportOptions::default()).expect("再导入应成功")
}

fn color(name: &str, c: f32, m: f32, y: f32, k: f32) -> MapColor {
    let mut color = MapColor::new(name);
    color.c = c;
    color.m = m;
    color.y = y;
    color.k = k;
    color.update_from_cmyk();
    color
}

fn numbered(mut symbol: Symbol, major: i32, minor: i32) -> Symbol {
    symbol.number = [major, minor, -1];
    symbol
}

#[test]
fn colors_scale_notes_and_view_roundtrip() {
    let mut map = Map::new();
    map.scale_denominator = 10_000;
    map.notes = "survey notes 2024".to_string();
    map.add_color(color("black", 0.0, 0.0, 0.0, 1.0));
    map.add_color(color("brown", 0.0, 0.28, 0.56, 0.09));

    let mut view = MapView::default();
    view.set_zoom(3.0);
    view.center = MapCoord::new(12_340, -5_670);

    let imported = roundtrip(&map, Some(&view));
    assert_eq!(imported.map.scale_denominator, 10_000);
    assert_eq!(imported.map.notes, "survey notes 2024");
    assert_eq!(imported.map.color_count(), 2);
    let black = imported.map.color(ColorId::new(0));
    assert_eq!(black.name, "black");
    assert!((black.k - 1.0).abs() < 1e-6);
    let brown = imported.map.color(ColorId::new(1));
    assert!((brown.m - 0.28).abs() < 0.0025, "0.005 量化步长内还原");
    assert!((imported.view.zoom() - 3.0).abs() < 1e-9);
    assert_eq!(imported.view.center, MapCoord::new(12_340, -5_670));
}

#[test]
fn more_than_256_colors_is_fatal() {
    let mut map = Map::new();
    for i in 0..257 {
        map.add_color(color(&format!("c{i}"), 0.0, 0.0, 0.0, 0.5));
    }
    let result = export_ocd(&map, None, &ExportOptions::default());
    assert!(matches!(result, Err(OcdError::TooManyColors(257))));
}

#[test]
fn long_color_name_is_truncated_with_warning() {
    let mut map = Map::new();
    map.add_color(color(&"x".repeat(40), 0.0, 0.0, 0.0, 1.0));
    let exported = export_ocd(&map, None, &ExportOptions::default()).expect("导出应成功");
    assert!(exported.warnings.iter().any(|w| w.contains("|||")));
}

#[test]
fn dashed_pointed_line_symbol_roundtrip() {
    let mut map = Map::new();
    let ink = map.add_color(color("black", 0.0, 0.0, 0.0, 1.0));
    let line = LineSymbol {
        line_width: 350,
        color: Some(ink),
        cap_style: CapStyle::Pointed,
        join_style: JoinStyle::Round,
        pointed_cap_length: 900,
        dashed: true,
        dash_length: 4000,
        break_length: 1000,
        ..LineSymbol::default()
    };
    map.add_symbol(numbered(Symbol::new(SymbolKind::Line(line)), 50, 3));

    let imported = roundtrip(&map, None);
    assert_eq!(imported.map.symbol_count(), 1);
    let symbol = &imported.map.symbols()[0];
    assert_eq!(symbol.number[0], 50);
    assert_eq!(symbol.number[1], 3);
    let line = symbol.as_line().expect("应当是线符号");
    assert_eq!(line.line_width, 3500);
    assert_eq!(line.cap_style, CapStyle::Pointed);
    assert_eq!(line.join_style, JoinStyle::Round);
    assert_eq!(line.pointed_cap_length, 900);
    assert!(line.dashed);
    assert_eq!(line.dash_length, 4000);
    assert_eq!(line.break_length, 1000);
    assert!(!line.half_outer_dashes);
}

#[test]
fn bordered_line_reimports_as_combined_symbol() {
    // 带填充主线与边线的线符号在文件里只有一条记录；
    // 再导入时拆成主线加双线的组合符号
    let mut map = Map::new();
    let ink = map.add_color(color("black", 0.0, 0.0, 0.0, 1.0));
    let green = map.add_color(color("green", 0.76, 0.0, 0.91, 0.0));
    let line = LineSymbol {
        line_width: 500,
        color: Some(green),
        have_border_lines: true,
        border_color: Some(ink),
        border_width: 100,
        border_shift: 50,
        ..LineSymbol::default()
    };
    map.add_symbol(numbered(Symbol::new(SymbolKind::Line(line)), 70, 1));

    let imported = roundtrip(&map, None);
    let combined = imported
        .map
        .symbols()
        .iter()
        .find_map(|symbol| match &symbol.kind {
            SymbolKind::Combined(combined) => Some(combined),
            _ => None,
        })
        .expect("应当拆成组合符号");
    assert_eq!(combined.parts.len(), 2);
    let double = imported.map.symbol(combined.parts[1]);
    let double_line = double.as_line().expect("第二部件应当是双线");
    assert!(double_line.have_border_lines);
    assert_eq!(double_line.border_width, 100);
    assert_eq!(double_line.border_color, Some(ink));
    assert!(!double.is_hidden, "部件不继承组合符号的状态");
}

#[test]
fn single_dot_point_symbol_stays_collapsed() {
    let mut map = Map::new();
    let ink = map.add_color(color("black", 0.0, 0.0, 0.0, 1.0));
    let point = PointSymbol {
        rotatable: false,
        inner_radius: 250,
        inner_color: Some(ink),
        outer_width: 0,
        outer_color: None,
        elements: Vec::new(),
    };
    map.add_symbol(numbered(Symbol::new(SymbolKind::Point(point)), 30, 0));

    let imported = roundtrip(&map, None);
    let point = imported.map.symbols()[0].as_point().expect("应当是点符号");
    assert!(point.elements.is_empty(), "唯一的圆点应折叠在符号自身上");
    assert_eq!(point.inner_radius, 250);
    assert_eq!(point.inner_color, Some(ink));
}

#[test]
fn point_symbol_with_elements_roundtrip() {
    let mut map = Map::new();
    let ink = map.add_color(color("black", 0.0, 0.0, 0.0, 1.0));
    let point = PointSymbol {
        rotatable: true,
        inner_radius: 200,
        inner_color: Some(ink),
        outer_width: 120,
        outer_color: Some(ink),
        elements: vec![PointSymbolElement {
            symbol: ElementSymbol::Line(LineSymbol {
                line_width: 100,
                color: Some(ink),
                ..LineSymbol::default()
            }),
            coords: vec![MapCoord::new(-500, 0), MapCoord::new(500, 0)],
        }],
    };
    map.add_symbol(numbered(Symbol::new(SymbolKind::Point(point)), 31, 0));

    let imported = roundtrip(&map, None);
    let point = imported.map.symbols()[0].as_point().expect("应当是点符号");
    // 多个成分并存时圆点/圆环作为子成分出现
    assert_eq!(point.elements.len(), 3);
    let line_element = point
        .elements
        .iter()
        .find_map(|element| match &element.symbol {
            ElementSymbol::Line(line) => Some((line, &element.coords)),
            _ => None,
        })
        .expect("折线成分应保留");
    assert_eq!(line_element.0.line_width, 1000);
    assert_eq!(line_element.1.len(), 2);
    assert_eq!(line_element.1[0], MapCoord::new(-500, 0));
    let dot = point
        .elements
        .iter()
        .find_map(|element| match &element.symbol {
            ElementSymbol::Point(p) if p.inner_radius > 0 => Some(p),
            _ => None,
        })
        .expect("圆点成分应保留");
    assert_eq!(dot.inner_radius, 200);
}

#[test]
fn area_symbol_hatch_and_grid_roundtrip() {
    let mut map = Map::new();
    let ink = map.add_color(color("black", 0.0, 0.0, 0.0, 1.0));
    let yellow = map.add_color(color("yellow", 0.0, 0.27, 0.79, 0.0));
    let stamp = PointSymbol {
        rotatable: false,
        inner_radius: 150,
        inner_color: Some(ink),
        outer_width: 0,
        outer_color: None,
        elements: Vec::new(),
    };
    let area = AreaSymbol {
        color: Some(yellow),
        minimum_area: 0,
        patterns: vec![
            FillPattern::Line(LinePattern {
                angle: 0.5,
                rotatable: true,
                line_spacing: 2000,
                line_offset: 0,
                color: Some(ink),
                line_width: 200,
            }),
            FillPattern::Line(LinePattern {
                angle: 2.0,
                rotatable: true,
                line_spacing: 1800,
                line_offset: 0,
                color: Some(ink),
                line_width: 200,
            }),
            FillPattern::Point(PointPattern {
                angle: 0.0,
                rotatable: true,
                point_distance: 5000,
                line_spacing: 5000,
                line_offset: 0,
                offset_along_line: 0,
                point: stamp,
            }),
        ],
    };
    map.add_symbol(numbered(Symbol::new(SymbolKind::Area(area)), 40, 2));

    let imported = roundtrip(&map, None);
    let area = match &imported.map.symbols()[0].kind {
        SymbolKind::Area(area) => area,
        other => panic!("期望面符号，得到 {other:?}"),
    };
    assert_eq!(area.color, Some(yellow));
    let hatches: Vec<_> = area
        .patterns
        .iter()
        .filter_map(|pattern| match pattern {
            FillPattern::Line(line) => Some(line),
            _ => None,
        })
        .collect();
    assert_eq!(hatches.len(), 2, "两道影线都应保留");
    assert!((hatches[0].angle - 0.5).abs() < 0.01);
    assert!((hatches[1].angle - 2.0).abs() < 0.01);
    let grids: Vec<_> = area
        .patterns
        .iter()
        .filter_map(|pattern| match pattern {
            FillPattern::Point(point) => Some(point),
            _ => None,
        })
        .collect();
    assert_eq!(grids.len(), 1);
    assert_eq!(grids[0].point_distance, 5000);
    assert_eq!(grids[0].point.inner_radius, 150);
}

#[test]
fn staggered_point_pattern_uses_heuristic_with_warning() {
    let mut map = Map::new();
    let ink = map.add_color(color("black", 0.0, 0.0, 0.0, 1.0));
    let stamp = PointSymbol {
        rotatable: false,
        inner_radius: 150,
        inner_color: Some(ink),
        outer_width: 0,
        outer_color: None,
        elements: Vec::new(),
    };
    let mut second = PointPattern {
        angle: 0.0,
        rotatable: true,
        point_distance: 4000,
        line_spacing: 6000,
        line_offset: 0,
        offset_along_line: 0,
        point: stamp.clone(),
    };
    second.line_offset = 3000;
    second.offset_along_line = 2000;
    let first = PointPattern {
        line_offset: 0,
        offset_along_line: 0,
        ..second.clone()
    };
    let area = AreaSymbol {
        color: None,
        minimum_area: 0,
        patterns: vec![FillPattern::Point(first), FillPattern::Point(second)],
    };
    map.add_symbol(numbered(Symbol::new(SymbolKind::Area(area)), 41, 0));

    let exported = export_ocd(&map, None, &ExportOptions::default()).expect("导出应成功");
    assert!(
        exported.warnings.iter().any(|w| w.contains("错行")),
        "错行启发式必须告警"
    );
    let imported = import_ocd(&exported.bytes, &ImportOptions::default()).expect("再导入应成功");
    let area = match &imported.map.symbols()[0].kind {
        SymbolKind::Area(area) => area,
        other => panic!("期望面符号，得到 {other:?}"),
    };
    // 错行编码往返后仍是两个互相错开的图案
    let grids: Vec<_> = area
        .patterns
        .iter()
        .filter_map(|pattern| match pattern {
            FillPattern::Point(point) => Some(point),
            _ => None,
        })
        .collect();
    assert_eq!(grids.len(), 2);
    assert_eq!(grids[0].line_spacing, 6000);
    assert_eq!(grids[1].line_offset, 3000);
}

#[test]
fn text_alignment_variants_duplicate_the_symbol() {
    let mut map = Map::new();
    let ink = map.add_color(color("black", 0.0, 0.0, 0.0, 1.0));
    let text = TextSymbol {
        color: Some(ink),
        font_size: 4000,
        ..TextSymbol::default()
    };
    let text_id = map.add_symbol(numbered(Symbol::new(SymbolKind::Text(text)), 90, 0));

    let mut left = TextObject::new(text_id);
    left.text = "Left label".to_string();
    left.h_align = HorizontalAlignment::Left;
    left.anchor = TextAnchor::Single(MapCoord::new(0, 0));
    let mut right = TextObject::new(text_id);
    right.text = "Right label".to_string();
    right.h_align = HorizontalAlignment::Right;
    right.anchor = TextAnchor::Single(MapCoord::new(10_000, 0));
    let mut left_again = TextObject::new(text_id);
    left_again.text = "Left again".to_string();
    left_again.h_align = HorizontalAlignment::Left;
    left_again.anchor = TextAnchor::Single(MapCoord::new(20_000, 0));
    map.layers[0].objects.push(Object::Text(left));
    map.layers[0].objects.push(Object::Text(right));
    map.layers[0].objects.push(Object::Text(left_again));

    let imported = roundtrip(&map, None);
    // 对齐方式存放在符号上：两种对齐 → 两个符号；相同对齐复用
    assert_eq!(imported.map.symbol_count(), 2);
    let mut aligns: Vec<HorizontalAlignment> = imported
        .map
        .layers[0]
        .objects
        .iter()
        .filter_map(|object| match object {
            Object::Text(text) => Some(text.h_align),
            _ => None,
        })
        .collect();
    aligns.sort_by_key(|align| *align as u8);
    assert_eq!(
        aligns,
        vec![
            HorizontalAlignment::Left,
            HorizontalAlignment::Left,
            HorizontalAlignment::Right
        ]
    );
    // 再导入后两个左对齐对象应引用同一个符号
    let left_symbols: Vec<_> = imported
        .map
        .layers[0]
        .objects
        .iter()
        .filter_map(|object| match object {
            Object::Text(text) if text.h_align == HorizontalAlignment::Left => Some(text.symbol),
            _ => None,
        })
        .collect();
    assert_eq!(left_symbols[0], left_symbols[1]);
}

#[test]
fn anchored_text_object_roundtrip() {
    let mut map = Map::new();
    let ink = map.add_color(color("black", 0.0, 0.0, 0.0, 1.0));
    let text_id = map.add_symbol(numbered(
        Symbol::new(SymbolKind::Text(TextSymbol {
            color: Some(ink),
            ..TextSymbol::default()
        })),
        91,
        0,
    ));
    let mut object = TextObject::new(text_id);
    object.text = "\nControl 31\nWater stop".to_string();
    object.rotation = 0.3;
    object.anchor = TextAnchor::Single(MapCoord::new(4_560, -7_890));
    map.layers[0].objects.push(Object::Text(object));

    let imported = roundtrip(&map, None);
    match &imported.map.layers[0].objects[0] {
        Object::Text(text) => {
            assert_eq!(text.text, "\nControl 31\nWater stop");
            assert_eq!(text.anchor, TextAnchor::Single(MapCoord::new(4_560, -7_890)));
            assert_eq!(text.v_align, VerticalAlignment::Baseline);
            assert!((text.rotation - 0.3).abs() < 0.01);
        }
        other => panic!("期望文字对象，得到 {other:?}"),
    }
}

#[test]
fn box_text_object_roundtrip_within_leading() {
    let mut map = Map::new();
    let ink = map.add_color(color("black", 0.0, 0.0, 0.0, 1.0));
    let font_size = 4000;
    let text_id = map.add_symbol(numbered(
        Symbol::new(SymbolKind::Text(TextSymbol {
            color: Some(ink),
            font_size,
            ..TextSymbol::default()
        })),
        92,
        0,
    ));
    let mut object = TextObject::new(text_id);
    object.text = "Legend".to_string();
    object.v_align = VerticalAlignment::Top;
    object.anchor = TextAnchor::Box {
        center: MapCoord::new(10_000, 20_000),
        width: 40_000,
        height: 10_000,
    };
    map.layers[0].objects.push(Object::Text(object));

    let imported = roundtrip(&map, None);
    let leading = (0.15 * f64::from(font_size)).round() as i64;
    match &imported.map.layers[0].objects[0] {
        Object::Text(text) => {
            assert_eq!(text.v_align, VerticalAlignment::Top);
            match &text.anchor {
                TextAnchor::Box {
                    center,
                    width,
                    height,
                } => {
                    assert_eq!(*width, 40_000, "宽度应精确还原");
                    assert_eq!(center.x, 10_000);
                    // 本格式的框排只支持顶端对齐：往返在高度方向上
                    // 引入不超过一段行间留白的偏移
                    assert!((*height - 10_000).abs() <= leading);
                    assert!((center.y - 20_000).abs() <= leading);
                }
                other => panic!("期望文字框，得到 {other:?}"),
            }
        }
        other => panic!("期望文字对象，得到 {other:?}"),
    }
}

#[test]
fn combined_symbol_object_fans_out_per_number() {
    let mut map = Map::new();
    let ink = map.add_color(color("black", 0.0, 0.0, 0.0, 1.0));
    let part_a = map.add_symbol(numbered(
        Symbol::new(SymbolKind::Line(LineSymbol {
            line_width: 200,
            color: Some(ink),
            ..LineSymbol::default()
        })),
        60,
        1,
    ));
    let part_b = map.add_symbol(numbered(
        Symbol::new(SymbolKind::Line(LineSymbol {
            line_width: 400,
            color: Some(ink),
            ..LineSymbol::default()
        })),
        60,
        2,
    ));
    let combined = map.add_symbol(numbered(
        Symbol::new(SymbolKind::Combined(CombinedSymbol {
            parts: vec![part_a, part_b],
        })),
        60,
        0,
    ));
    map.layers[0].objects.push(Object::Path(PathObject::new(
        combined,
        vec![MapCoord::new(0, 0), MapCoord::new(10_000, 0)],
    )));

    let imported = roundtrip(&map, None);
    // 组合符号映射到编号集合，对象按每个编号各写一条记录
    assert_eq!(imported.map.object_count(), 2);
    let widths: Vec<i32> = imported.map.layers[0]
        .objects
        .iter()
        .filter_map(|object| match object {
            Object::Path(path) => imported
                .map
                .symbol(path.symbol)
                .as_line()
                .map(|line| line.line_width),
            _ => None,
        })
        .collect();
    assert!(widths.contains(&2000));
    assert!(widths.contains(&4000));
}

#[test]
fn colliding_symbol_numbers_get_distinct_output_numbers() {
    let mut map = Map::new();
    let ink = map.add_color(color("black", 0.0, 0.0, 0.0, 1.0));
    // [101, 0] 与 [101, -1] 折叠后同为 1010
    map.add_symbol(numbered(
        Symbol::new(SymbolKind::Line(LineSymbol {
            line_width: 100,
            color: Some(ink),
            ..LineSymbol::default()
        })),
        101,
        0,
    ));
    let mut second = numbered(
        Symbol::new(SymbolKind::Line(LineSymbol {
            line_width: 200,
            color: Some(ink),
            ..LineSymbol::default()
        })),
        101,
        -1,
    );
    second.number[1] = -1;
    map.add_symbol(second);

    let imported = roundtrip(&map, None);
    assert_eq!(imported.map.symbol_count(), 2);
    let numbers: Vec<[i32; 3]> = imported
        .map
        .symbols()
        .iter()
        .map(|symbol| symbol.number)
        .collect();
    assert_ne!(
        numbers[0], numbers[1],
        "折叠冲突的编号必须按递增规则区分：{numbers:?}"
    );
}

#[test]
fn subpath_closing_survives_roundtrip() {
    // 面对象：洞点标记在子路径末点上，文件里的洞位写在下一个点，
    // 再导入时回到末点，闭合标志按位置重合重新推导
    let mut map = Map::new();
    let ink = map.add_color(color("black", 0.0, 0.0, 0.0, 1.0));
    let area_id = map.add_symbol(numbered(
        Symbol::new(SymbolKind::Area(AreaSymbol {
            color: Some(ink),
            ..AreaSymbol::default()
        })),
        51,
        0,
    ));
    let mut coords = vec![
        MapCoord::new(0, 0),
        MapCoord::new(5_000, 0),
        MapCoord::new(0, 0),
        MapCoord::new(20_000, 20_000),
        MapCoord::new(30_000, 20_000),
    ];
    coords[2].hole_point = true;
    let mut path = PathObject::new(area_id, coords);
    path.recalculate_parts();
    assert!(path.coords[2].close_point);
    map.layers[0].objects.push(Object::Path(path));

    let imported = roundtrip(&map, None);
    match &imported.map.layers[0].objects[0] {
        Object::Path(path) => {
            assert_eq!(path.coords.len(), 5);
            assert!(path.coords[2].hole_point, "面对象的洞点位置应精确往返");
            assert!(path.coords[2].close_point, "闭合子路径的标志应重新推导");
            assert!(!path.coords[4].close_point, "开放子路径不应闭合");
        }
        other => panic!("期望路径对象，得到 {other:?}"),
    }
}

#[test]
fn helper_symbol_objects_export_as_undefined() {
    let mut map = Map::new();
    map.add_color(color("black", 0.0, 0.0, 0.0, 1.0));
    let undefined = map.undefined_line();
    map.layers[0].objects.push(Object::Path(PathObject::new(
        undefined,
        vec![MapCoord::new(0, 0), MapCoord::new(1_000, 0)],
    )));

    let imported = roundtrip(&map, None);
    // 辅助符号不写出编号；对象以占位符号保留
    assert_eq!(imported.map.object_count(), 1);
    let symbol_id = imported.map.layers[0].objects[0].symbol();
    assert!(imported.map.symbol(symbol_id).is_helper_symbol);
}

#[test]
fn imported_map_serializes_losslessly() {
    // 模型整体可序列化：导入结果经 JSON 往返后仍与自身相等
    let mut map = Map::new();
    let ink = map.add_color(color("black", 0.0, 0.0, 0.0, 1.0));
    let line_id = map.add_symbol(numbered(
        Symbol::new(SymbolKind::Line(LineSymbol {
            line_width: 250,
            color: Some(ink),
            ..LineSymbol::default()
        })),
        52,
        0,
    ));
    map.layers[0].objects.push(Object::Path(PathObject::new(
        line_id,
        vec![MapCoord::new(0, 0), MapCoord::new(1_000, 2_000)],
    )));

    let imported = roundtrip(&map, None);
    let json = serde_json::to_string(&imported.map).expect("序列化应成功");
    let back: Map = serde_json::from_str(&json).expect("反序列化应成功");
    assert_eq!(back, imported.map);
}

#[test]
fn point_object_rotation_roundtrip() {
    let mut map = Map::new();
    let ink = map.add_color(color("black", 0.0, 0.0, 0.0, 1.0));
    let point_id = map.add_symbol(numbered(
        Symbol::new(SymbolKind::Point(PointSymbol {
            rotatable: true,
            inner_radius: 300,
            inner_color: Some(ink),
            outer_width: 0,
            outer_color: None,
            elements: Vec::new(),
        })),
        32,
        0,
    ));
    map.layers[0].objects.push(Object::Point(
        omap_core::map::PointObject {
            symbol: point_id,
            rotation: 1.5,
            coord: MapCoord::new(7_000, -3_000),
        },
    ));

    let imported = roundtrip(&map, None);
    match &imported.map.layers[0].objects[0] {
        Object::Point(point) => {
            assert_eq!(point.coord, MapCoord::new(7_000, -3_000));
            assert!((point.rotation - 1.5).abs() < 0.01);
        }
        other => panic!("期望点对象，得到 {other:?}"),
    }
}
