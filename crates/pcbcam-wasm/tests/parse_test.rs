//! End-to-end Gerber parsing tests over fixture files and literal streams.

use pcbcam_wasm::error::CamError;
use pcbcam_wasm::gerber;
use pcbcam_wasm::model::{
    Aperture, AttributeScope, CamFile, ContourSegment, FileFormat, NoteKind, Primitive, Unit,
};

const EPSILON: f64 = 1e-9;

fn parse_ok(data: &[u8]) -> CamFile {
    let parsed = gerber::parse(data);
    assert!(parsed.is_ok(), "expected Ok, got {:?}", parsed.err());
    parsed.unwrap_or_else(|_| CamFile::new(FileFormat::Gerber))
}

#[test]
fn it_gbr_001_rectangle_fixture_decodes_fully() {
    let file = parse_ok(include_bytes!("fixtures/minimal/rectangle.gbr"));

    assert_eq!(file.stats.units, Some(Unit::Millimeters));
    assert_eq!(file.primitives.len(), 4, "two lines, one flash, one region");
    assert!(file.stats.notes.is_empty(), "fixture is clean: {:?}", file.stats.notes);
    assert_eq!(file.apertures.len(), 2);

    // Region spans x 30..35, flash pad half-width 0.85 around (15, -15),
    // tracks stroked 0.25 wide from (10, -10).
    assert!((file.stats.bounds.min_x - 9.875).abs() < EPSILON);
    assert!((file.stats.bounds.max_x - 35.0).abs() < EPSILON);
    assert!((file.stats.bounds.max_y + 9.875).abs() < EPSILON);
    assert!((file.stats.bounds.min_y + 20.125).abs() < EPSILON);

    let file_attrs = file
        .attributes
        .iter()
        .filter(|attr| attr.scope == AttributeScope::File)
        .count();
    assert_eq!(file_attrs, 2);
}

#[test]
fn it_gbr_002_inch_line_decodes_with_two_three_format() {
    let file = parse_ok(b"%FSLAX23Y23*%%MOIN*%%ADD11C,0.010*%D11*X0Y0D02*X1000Y0D01*M02*");
    assert_eq!(file.stats.units, Some(Unit::Inches));
    assert_eq!(file.primitives.len(), 1);
    if let Some(Primitive::Line(line)) = file.primitives.first() {
        assert!((line.start.x - 0.0).abs() < EPSILON);
        assert!((line.end.x - 1.0).abs() < EPSILON);
        assert!((line.end.y - 0.0).abs() < EPSILON);
    }
}

#[test]
fn it_gbr_003_macro_aperture_flash_carries_resolved_primitives() {
    let file = parse_ok(
        b"%FSLAX24Y24*%%MOMM*%%AMDONUT*1,1,$1,0,0*1,0,$2,0,0*%%ADD15DONUT,1.0X0.4*%D15*X0Y0D03*M02*",
    );
    assert_eq!(file.primitives.len(), 1);
    let aperture = file.apertures.get(&15);
    assert!(
        matches!(aperture, Some(Aperture::Macro { primitives, .. }) if primitives.len() == 2),
        "macro should expand to two primitives, got {aperture:?}"
    );
    // Outer circle is 1.0 in diameter, so the flash bounds are +/- 0.5.
    assert!((file.stats.bounds.max_x - 0.5).abs() < EPSILON);
    assert!((file.stats.bounds.min_x + 0.5).abs() < EPSILON);
}

#[test]
fn it_gbr_004_region_with_arc_segment_closes() {
    let file = parse_ok(
        b"%FSLAX24Y24*%%MOMM*%G36*G75*X0Y0D02*X20000Y0D01*G03*X0Y0I-10000J0D01*G37*M02*",
    );
    assert_eq!(file.primitives.len(), 1);
    if let Some(Primitive::Region(region)) = file.primitives.first() {
        assert_eq!(region.segments.len(), 2);
        assert!(matches!(
            region.segments.get(1),
            Some(ContourSegment::Arc { .. })
        ));
        let first = region.segments.first().map(ContourSegment::start);
        let last = region.segments.last().map(ContourSegment::end);
        assert_eq!(first, last, "contour closes through the arc");
    }
    // The counter-clockwise half circle bulges to y = 1.0.
    assert!((file.stats.bounds.max_y - 1.0).abs() < EPSILON);
}

#[test]
fn it_gbr_005_malformed_fixture_parses_partially_with_notes() {
    let file = parse_ok(include_bytes!("fixtures/minimal/malformed.gbr"));
    assert_eq!(file.primitives.len(), 1, "only the valid flash survives");
    assert!(file
        .stats
        .notes
        .iter()
        .any(|note| note.kind == NoteKind::UnknownCommand));
    assert!(file
        .stats
        .notes
        .iter()
        .any(|note| note.kind == NoteKind::UndefinedAperture));
}

#[test]
fn it_gbr_006_parsing_is_deterministic() {
    let data = include_bytes!("fixtures/minimal/rectangle.gbr");
    let first = parse_ok(data);
    let second = parse_ok(data);
    assert_eq!(first, second);
}

#[test]
fn it_gbr_007_current_point_is_continuous_across_draws() {
    let file = parse_ok(
        b"%FSLAX24Y24*%%MOMM*%%ADD10C,0.1*%D10*X0Y0D02*X10000Y0D01*X10000Y10000D01*X0Y10000D01*M02*",
    );
    let lines: Vec<_> = file
        .primitives
        .iter()
        .filter_map(|primitive| match primitive {
            Primitive::Line(line) => Some(line),
            _ => None,
        })
        .collect();
    assert_eq!(lines.len(), 3);
    for pair in lines.windows(2) {
        if let [previous, next] = pair {
            assert_eq!(previous.end, next.start, "draw chain must be continuous");
        }
    }
}

#[test]
fn it_gbr_008_adjacent_step_repeat_windows_commute() {
    // Two disjoint 1x2 windows over the same flash, in both orders.
    let forward = parse_ok(
        b"%FSLAX24Y24*%%MOMM*%%ADD10C,0.5*%D10*%SRX1Y2I0J3.0*%X0Y0D03*%SRX1Y2I0J3.0*%X100000Y0D03*%SR*%M02*",
    );
    let reverse = parse_ok(
        b"%FSLAX24Y24*%%MOMM*%%ADD10C,0.5*%D10*%SRX1Y2I0J3.0*%X100000Y0D03*%SRX1Y2I0J3.0*%X0Y0D03*%SR*%M02*",
    );

    let positions = |file: &CamFile| {
        let mut list: Vec<(i64, i64)> = file
            .primitives
            .iter()
            .filter_map(|primitive| match primitive {
                #[allow(clippy::cast_possible_truncation)]
                Primitive::Flash(flash) => Some((
                    (flash.position.x * 1000.0).round() as i64,
                    (flash.position.y * 1000.0).round() as i64,
                )),
                _ => None,
            })
            .collect();
        list.sort_unstable();
        list
    };
    assert_eq!(positions(&forward), positions(&reverse));
    assert_eq!(forward.primitives.len(), 4);
}

#[test]
fn it_gbr_009_lex_error_reports_line() {
    let result = gerber::parse(b"%FSLAX24Y24*%\n%MOMM*%\n\x02*M02*");
    assert!(matches!(result, Err(CamError::Lex { line: 3, .. })));
}

#[test]
fn it_gbr_010_comments_pass_through() {
    let file = parse_ok(include_bytes!("fixtures/minimal/rectangle.gbr"));
    assert!(file
        .comments
        .iter()
        .any(|comment| comment.contains("APERTURE LIST")));
}
