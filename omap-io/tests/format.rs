//! 针对字节布局的导入测试：用手工拼装的缓冲验证文件头校验、
//! 版本范围、符号/对象记录解码与容错路径。

use omap_core::map::{CapStyle, JoinStyle, Object, SymbolKind};
use omap_io::layout::*;
use omap_io::{ImportOptions, OcdError, import_ocd, understands};

fn push_i16(buf: &mut Vec<u8>, value: i16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn push_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn push_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn push_i32(buf: &mut Vec<u8>, value: i32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn push_f64(buf: &mut Vec<u8>, value: f64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// 打包一个文件坐标（1/100 毫米）与标志位。
fn packed_point(x: i32, y: i32, x_flags: u8, y_flags: u8) -> (i32, i32) {
    ((x << 8) | i32::from(x_flags), (y << 8) | i32::from(y_flags))
}

#[derive(Default)]
struct FileBuilder {
    major: u16,
    zoom: f64,
    colors: Vec<[u8; 4]>,
    symbols: Vec<Vec<u8>>,
    objects: Vec<Vec<u8>>,
    strings: Vec<(i32, Vec<u8>)>,
}

impl FileBuilder {
    fn new() -> Self {
        Self {
            major: OCD_VERSION,
            zoom: 1.0,
            ..Self::default()
        }
    }

    fn build(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_SIZE];

        let ocolors = buf.len() as u32;
        for (i, cmyk) in self.colors.iter().enumerate() {
            push_i16(&mut buf, i as i16);
            push_i16(&mut buf, 0);
            buf.extend_from_slice(cmyk);
            buf.extend_from_slice(&[0u8; COLOR_NAME_SIZE]);
        }

        let osetup = buf.len() as u32;
        push_i32(&mut buf, 0);
        push_i32(&mut buf, 0);
        push_f64(&mut buf, 10_000.0);
        push_f64(&mut buf, self.zoom);
        buf.extend_from_slice(&[0u8; 24]);

        let mut symbol_offsets = Vec::new();
        for record in &self.symbols {
            symbol_offsets.push(buf.len() as u32);
            buf.extend_from_slice(record);
        }
        let osymidx = if symbol_offsets.is_empty() {
            0
        } else {
            let page = buf.len() as u32;
            push_u32(&mut buf, 0);
            for slot in 0..INDEX_PAGE_SLOTS {
                push_u32(&mut buf, symbol_offsets.get(slot).copied().unwrap_or(0));
            }
            page
        };

        let mut object_entries = Vec::new();
        for record in &self.objects {
            object_entries.push(buf.len() as u32);
            buf.extend_from_slice(record);
        }
        let oobjidx = if object_entries.is_empty() {
            0
        } else {
            let page = buf.len() as u32;
            push_u32(&mut buf, 0);
            for slot in 0..INDEX_PAGE_SLOTS {
                match object_entries.get(slot) {
                    Some(&pos) => {
                        buf.extend_from_slice(&[0u8; 16]);
                        push_u32(&mut buf, pos);
                        push_u16(&mut buf, 0);
                        push_i16(&mut buf, 0);
                    }
                    None => buf.extend_from_slice(&[0u8; OBJECT_ENTRY_SIZE]),
                }
            }
            page
        };

        let mut string_entries = Vec::new();
        for (entry_type, payload) in &self.strings {
            string_entries.push((buf.len() as u32, payload.len() as u32, *entry_type));
            buf.extend_from_slice(payload);
        }
        let ostringidx = if string_entries.is_empty() {
            0
        } else {
            let page = buf.len() as u32;
            push_u32(&mut buf, 0);
            for slot in 0..INDEX_PAGE_SLOTS {
                match string_entries.get(slot) {
                    Some(&(pos, size, entry_type)) => {
                        push_u32(&mut buf, pos);
                        push_u32(&mut buf, size);
                        push_i32(&mut buf, entry_type);
                    }
                    None => buf.extend_from_slice(&[0u8; STRING_ENTRY_SIZE]),
                }
            }
            page
        };

        // 文件头
        buf[0..2].copy_from_slice(&OCD_MAGIC);
        buf[2..4].copy_from_slice(&OCD_FILE_TYPE.to_le_bytes());
        buf[4..6].copy_from_slice(&self.major.to_le_bytes());
        buf[6..8].copy_from_slice(&0u16.to_le_bytes());
        buf[8..12].copy_from_slice(&osymidx.to_le_bytes());
        buf[12..16].copy_from_slice(&oobjidx.to_le_bytes());
        buf[16..20].copy_from_slice(&osetup.to_le_bytes());
        buf[20..24].copy_from_slice(&(SETUP_SIZE as u32).to_le_bytes());
        buf[32..36].copy_from_slice(&ostringidx.to_le_bytes());
        buf[36..40].copy_from_slice(&ocolors.to_le_bytes());
        buf[40..42].copy_from_slice(&(self.colors.len() as u16).to_le_bytes());
        buf
    }
}

/// 符号记录公共头部，图案区之前的部分。
fn symbol_common(number: i16, type_tag: u8) -> Vec<u8> {
    let mut record = Vec::new();
    push_u16(&mut record, 0); // size，结尾回填
    push_i16(&mut record, number);
    record.push(type_tag);
    record.push(0); // subtype
    record.push(0); // base_flags
    record.push(0); // status
    push_i16(&mut record, 0); // extent
    push_i16(&mut record, 0);
    record.extend_from_slice(&[0u8; SYMBOL_COLOR_MASK_SIZE]);
    record.extend_from_slice(&[0u8; SYMBOL_NAME_SIZE]);
    record.extend_from_slice(&[0u8; ICON_BYTES]);
    record
}

fn finish_record(mut record: Vec<u8>) -> Vec<u8> {
    let size = record.len() as u16;
    record[0..2].copy_from_slice(&size.to_le_bytes());
    record
}

/// 线符号记录。未列出的字段全部为零，不带图案。
struct LineFields {
    color: i16,
    width: i16,
    ends: i16,
    len: i16,
    elen: i16,
    gap: i16,
    gap2: i16,
    egap: i16,
}

impl Default for LineFields {
    fn default() -> Self {
        Self {
            color: 0,
            width: 0,
            ends: 0,
            len: 0,
            elen: 0,
            gap: 0,
            gap2: 0,
            egap: 0,
        }
    }
}

fn line_symbol_record(number: i16, fields: &LineFields) -> Vec<u8> {
    let mut record = symbol_common(number, SYMBOL_TYPE_LINE);
    push_i16(&mut record, fields.color);
    push_i16(&mut record, fields.width);
    push_i16(&mut record, fields.ends);
    push_i16(&mut record, 0); // bdist
    push_i16(&mut record, 0); // edist
    push_i16(&mut record, fields.len);
    push_i16(&mut record, fields.elen);
    push_i16(&mut record, fields.gap);
    push_i16(&mut record, fields.gap2);
    push_i16(&mut record, fields.egap);
    for _ in 0..24 {
        push_i16(&mut record, 0); // smin..senpts 以及保留位
    }
    finish_record(record)
}

/// 线/面路径对象记录。
fn path_object_record(symbol: i16, otype: u8, points: &[(i32, i32)]) -> Vec<u8> {
    let mut record = Vec::new();
    push_i16(&mut record, symbol);
    record.push(otype);
    record.push(0); // unicode
    push_u16(&mut record, points.len() as u16);
    push_u16(&mut record, 0); // ntext
    push_i16(&mut record, 0); // angle
    push_i16(&mut record, 0);
    push_u32(&mut record, 0);
    for &(x, y) in points {
        push_i32(&mut record, x);
        push_i32(&mut record, y);
    }
    record
}

#[test]
fn magic_bytes_are_required() {
    assert!(understands(&[0xAD, 0x0C, 0, 0]));
    assert!(!understands(&[0xAD]));

    let mut data = FileBuilder::new().build();
    data[0] = 0x4D;
    assert!(matches!(
        import_ocd(&data, &ImportOptions::default()),
        Err(OcdError::NotOcdFile)
    ));
}

#[test]
fn version_band_is_exclusive_of_boundaries() {
    for major in [0u16, 5, 9, 12] {
        let mut builder = FileBuilder::new();
        builder.major = major;
        let result = import_ocd(&builder.build(), &ImportOptions::default());
        assert!(
            matches!(result, Err(OcdError::VersionUnsupported(m)) if m == major),
            "版本 {major} 应当被拒绝"
        );
    }
    for major in [6u16, 7, 8] {
        let builder = {
            let mut b = FileBuilder::new();
            b.major = major;
            b
        };
        assert!(
            import_ocd(&builder.build(), &ImportOptions::default()).is_ok(),
            "版本 {major} 应当可以导入"
        );
    }
}

#[test]
fn end_to_end_minimal_scenario() {
    // 1 个颜色（0/0/0/200 → 黑）、1 个线符号（宽 100、端点 0、无虚线）、
    // 1 个两点路径对象
    let mut builder = FileBuilder::new();
    builder.colors.push([0, 0, 0, 200]);
    builder.symbols.push(line_symbol_record(
        101,
        &LineFields {
            width: 100,
            ..LineFields::default()
        },
    ));
    builder.objects.push(path_object_record(
        101,
        OBJECT_TYPE_LINE,
        &[packed_point(0, 0, 0, 0), packed_point(500, 300, 0, 0)],
    ));

    let imported = import_ocd(&builder.build(), &ImportOptions::default()).expect("导入应成功");
    let map = &imported.map;

    assert_eq!(map.color_count(), 1);
    let black = map.color(omap_core::map::ColorId::new(0));
    assert!((black.k - 1.0).abs() < 1e-6);
    assert!((black.c).abs() < 1e-6);

    assert_eq!(map.symbol_count(), 1);
    let symbol = &map.symbols()[0];
    assert_eq!(symbol.number[0], 10);
    assert_eq!(symbol.number[1], 1);
    let line = symbol.as_line().expect("应当是线符号");
    assert_eq!(line.line_width, 1000);
    assert_eq!(line.cap_style, CapStyle::Flat);
    assert_eq!(line.join_style, JoinStyle::Bevel);
    assert!(!line.dashed);

    assert_eq!(map.layers.len(), 1);
    assert_eq!(map.layers[0].objects.len(), 1);
    match &map.layers[0].objects[0] {
        Object::Path(path) => {
            assert_eq!(path.coords.len(), 2);
            assert_eq!(path.coords[0].x, 0);
            assert_eq!(path.coords[1].x, 5000);
            assert_eq!(path.coords[1].y, -3000);
            assert_eq!(path.symbol.index(), 0);
        }
        other => panic!("期望路径对象，得到 {other:?}"),
    }
    assert!(imported.warnings.is_empty(), "警告：{:?}", imported.warnings);
}

#[test]
fn dash_with_secondary_gap_only() {
    // gap=0、gap2=G、len=L：按 dash=L−G、break=G 导入；
    // elen 落在 [L/2−1, L/2+1] 内不告警
    let mut builder = FileBuilder::new();
    builder.symbols.push(line_symbol_record(
        101,
        &LineFields {
            width: 35,
            len: 200,
            elen: 100,
            gap: 0,
            gap2: 50,
            ..LineFields::default()
        },
    ));
    let imported = import_ocd(&builder.build(), &ImportOptions::default()).expect("导入应成功");
    let line = imported.map.symbols()[0].as_line().expect("应当是线符号");
    assert!(line.dashed);
    assert_eq!(line.dash_length, 1500);
    assert_eq!(line.break_length, 500);
    assert!(
        !imported.warnings.iter().any(|w| w.contains("端段长度")),
        "端段长度在允许区间内，不应告警"
    );

    // elen 偏出区间：同样的参数导入，但必须带警告
    let mut builder = FileBuilder::new();
    builder.symbols.push(line_symbol_record(
        101,
        &LineFields {
            width: 35,
            len: 200,
            elen: 80,
            gap: 0,
            gap2: 50,
            ..LineFields::default()
        },
    ));
    let imported = import_ocd(&builder.build(), &ImportOptions::default()).expect("导入应成功");
    let line = imported.map.symbols()[0].as_line().expect("应当是线符号");
    assert_eq!(line.dash_length, 1500);
    assert!(
        imported.warnings.iter().any(|w| w.contains("端段长度")),
        "端段长度不可精确表示时必须告警"
    );
}

#[test]
fn unknown_symbol_type_is_skipped_with_warning() {
    let mut builder = FileBuilder::new();
    builder.symbols.push(finish_record(symbol_common(101, 9)));
    builder.symbols.push(line_symbol_record(
        102,
        &LineFields {
            width: 10,
            ..LineFields::default()
        },
    ));
    let imported = import_ocd(&builder.build(), &ImportOptions::default()).expect("导入应成功");
    assert_eq!(imported.map.symbol_count(), 1, "无法识别的符号应被跳过");
    assert!(imported.warnings.iter().any(|w| w.contains("无法导入符号")));
}

#[test]
fn unresolved_symbol_reference_falls_back_to_placeholder() {
    let mut builder = FileBuilder::new();
    builder.objects.push(path_object_record(
        777,
        OBJECT_TYPE_LINE,
        &[packed_point(0, 0, 0, 0), packed_point(100, 0, 0, 0)],
    ));
    let imported = import_ocd(&builder.build(), &ImportOptions::default()).expect("导入应成功");
    assert_eq!(imported.map.layers[0].objects.len(), 1, "对象不应被悄悄丢弃");
    let symbol_id = imported.map.layers[0].objects[0].symbol();
    assert!(imported.map.symbol(symbol_id).is_helper_symbol);
    assert!(matches!(
        imported.map.symbol(symbol_id).kind,
        SymbolKind::Line(_)
    ));
}

#[test]
fn out_of_range_zoom_is_not_applied() {
    let mut builder = FileBuilder::new();
    builder.zoom = 4096.0;
    let imported = import_ocd(&builder.build(), &ImportOptions::default()).expect("导入应成功");
    assert!((imported.view.zoom() - 1.0).abs() < 1e-12);
}

#[test]
fn template_record_import() {
    let mut template = Vec::new();
    push_i32(&mut template, 1200); // trnx，1/100 毫米
    push_i32(&mut template, -3400);
    push_f64(&mut template, 90.0); // 角度，度
    push_f64(&mut template, 100.0); // sclx
    push_f64(&mut template, 100.0);
    push_f64(&mut template, 0.0); // dimming，暂不消费
    push_i16(&mut template, 0); // transparent，暂不消费
    push_i16(&mut template, 0);
    template.extend_from_slice(b"karte.png\0");

    let mut builder = FileBuilder::new();
    builder.strings.push((STRING_TYPE_TEMPLATE, template));
    let imported = import_ocd(&builder.build(), &ImportOptions::default()).expect("导入应成功");
    assert_eq!(imported.map.templates.len(), 1);
    let template = &imported.map.templates[0];
    assert_eq!(template.path, "karte.png");
    assert!(template.visible);
    assert_eq!(template.x, 12_000);
    assert_eq!(template.y, 34_000);
    assert!((template.rotation - std::f64::consts::FRAC_PI_2).abs() < 1e-9);
    // 比例尺 10000：100 × 1e-5 × 10000 = 10 实地米每像素
    assert!((template.scale_x - 10.0).abs() < 1e-9);
    assert_eq!(imported.map.first_front_template, 1);
}

#[test]
fn non_raster_template_is_skipped_with_warning() {
    let mut template = Vec::new();
    push_i32(&mut template, 0);
    push_i32(&mut template, 0);
    push_f64(&mut template, 0.0);
    push_f64(&mut template, 100.0);
    push_f64(&mut template, 100.0);
    push_f64(&mut template, 0.0);
    push_i16(&mut template, 0);
    push_i16(&mut template, 0);
    template.extend_from_slice(b"daten.ocd\0");

    let mut builder = FileBuilder::new();
    builder.strings.push((STRING_TYPE_TEMPLATE, template));
    let imported = import_ocd(&builder.build(), &ImportOptions::default()).expect("导入应成功");
    assert!(imported.map.templates.is_empty());
    assert!(imported.warnings.iter().any(|w| w.contains("无法导入底图")));
}

#[test]
fn symbols_only_mode_skips_objects_and_templates() {
    let mut builder = FileBuilder::new();
    builder.symbols.push(line_symbol_record(
        101,
        &LineFields {
            width: 10,
            ..LineFields::default()
        },
    ));
    builder.objects.push(path_object_record(
        101,
        OBJECT_TYPE_LINE,
        &[packed_point(0, 0, 0, 0), packed_point(100, 0, 0, 0)],
    ));
    let options = ImportOptions {
        symbols_only: true,
        ..ImportOptions::default()
    };
    let imported = import_ocd(&builder.build(), &options).expect("导入应成功");
    assert_eq!(imported.map.symbol_count(), 1);
    assert_eq!(imported.map.object_count(), 0);
}

/// 矩形符号记录：色号、线宽、圆角、标志、格宽、格高、未编号格数 + 替换文本。
fn rect_symbol_record(
    number: i16,
    flags: i16,
    cwidth: i16,
    cheight: i16,
    gcells: i16,
    gtext: &str,
) -> Vec<u8> {
    let mut record = symbol_common(number, SYMBOL_TYPE_RECT);
    push_i16(&mut record, 0); // color
    push_i16(&mut record, 20); // width
    push_i16(&mut record, 0); // corner
    push_i16(&mut record, flags);
    push_i16(&mut record, cwidth);
    push_i16(&mut record, cheight);
    push_i16(&mut record, gcells);
    push_i16(&mut record, 0);
    let mut gtext_buf = vec![0u8; SYMBOL_NAME_SIZE];
    gtext_buf[0] = gtext.len() as u8;
    gtext_buf[1..1 + gtext.len()].copy_from_slice(gtext.as_bytes());
    record.extend_from_slice(&gtext_buf);
    finish_record(record)
}

#[test]
fn rectangle_symbol_expands_into_border_grid_and_labels() {
    let mut builder = FileBuilder::new();
    builder.colors.push([0, 0, 0, 200]);
    // 网格矩形：2 毫米 × 1.5 毫米的单元格，1 个未编号格，替换文本 "X"
    builder
        .symbols
        .push(rect_symbol_record(120, 1, 200, 150, 1, "X"));
    // 文件坐标系的 4 毫米 × 3 毫米矩形（左下、右下、右上、左上）
    builder.objects.push(path_object_record(
        120,
        OBJECT_TYPE_AREA,
        &[
            packed_point(0, 0, 0, 0),
            packed_point(400, 0, 0, 0),
            packed_point(400, 300, 0, 0),
            packed_point(0, 300, 0, 0),
        ],
    ));

    let imported = import_ocd(&builder.build(), &ImportOptions::default()).expect("导入应成功");
    let map = &imported.map;
    // 矩形符号展开成边框线、内部网格线与标注文字三个符号
    assert_eq!(map.symbol_count(), 3);
    assert!(matches!(map.symbols()[0].kind, SymbolKind::Line(_)));
    assert!(matches!(map.symbols()[1].kind, SymbolKind::Line(_)));
    assert!(matches!(map.symbols()[2].kind, SymbolKind::Text(_)));
    assert_eq!(map.symbols()[1].number[2], 1);
    assert_eq!(map.symbols()[2].number[2], 2);

    // 1 条边框 + 2 条网格线 + 4 个标注
    let objects = &map.layers[0].objects;
    assert_eq!(objects.len(), 7);
    match &objects[0] {
        Object::Path(border) => {
            assert_eq!(border.coords.len(), 5, "边框闭合回到首点");
            assert!(border.coords[4].close_point);
        }
        other => panic!("期望边框路径，得到 {other:?}"),
    }
    let labels: Vec<String> = objects
        .iter()
        .filter_map(|object| match object {
            Object::Text(text) => Some(text.text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(labels.len(), 4);
    for expected in ["1", "2", "3", "X"] {
        assert!(labels.iter().any(|label| label == expected), "缺少标注 {expected}");
    }
    assert!(!labels.iter().any(|label| label == "4"), "最后一格应使用替换文本");
}

#[test]
fn truncated_object_record_warns_and_continues() {
    let mut builder = FileBuilder::new();
    builder.symbols.push(line_symbol_record(
        101,
        &LineFields {
            width: 10,
            ..LineFields::default()
        },
    ));
    // 记录声称的坐标数远超文件长度；损坏的对象跳过，文件整体可用
    let mut bad = Vec::new();
    push_i16(&mut bad, 101);
    bad.push(OBJECT_TYPE_LINE);
    bad.push(0);
    push_u16(&mut bad, 60_000);
    push_u16(&mut bad, 0);
    push_i16(&mut bad, 0);
    push_i16(&mut bad, 0);
    push_u32(&mut bad, 0);
    push_i32(&mut bad, 0);
    push_i32(&mut bad, 0);
    builder.objects.push(bad);

    let data = builder.build();
    let imported = import_ocd(&data, &ImportOptions::default()).expect("整体导入仍应成功");
    assert!(imported.warnings.iter().any(|w| w.contains("无法加载对象")));
}
