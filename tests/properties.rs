use genchart::aes::generate_aes;
use genchart::classify::{classify, get_chart_type, is_date_type, is_numeric_type, MeasureKind};
use genchart::data::{Cell, FieldMeta, MeasureStore, Row};
use genchart::ir::{
    AggregateFn, Channel, Measure, Measures, RenderType, SavedScales, ScaleOverride, Trans,
};
use genchart::scale::generate_scales;
use genchart::transform::aggregate;
use genchart::validate::validate_axis_measure;
use proptest::prelude::*;

fn render_type() -> impl Strategy<Value = RenderType> {
    prop_oneof![
        Just(RenderType::AutoPlot),
        Just(RenderType::BarChart),
        Just(RenderType::BoxPlot),
        Just(RenderType::PieChart),
        Just(RenderType::ScatterPlot),
        Just(RenderType::LinePlot),
    ]
}

fn type_name() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("int".to_string()),
        Just("float".to_string()),
        Just("double".to_string()),
        Just("date".to_string()),
        Just("string".to_string()),
        Just("boolean".to_string()),
        "[A-Za-z]{0,8}",
    ]
}

fn make_rows(xs: &[Option<String>], ys: &[Option<f64>]) -> Vec<Row> {
    xs.iter()
        .zip(ys)
        .map(|(x, y)| {
            let mut row = Row::new();
            row.insert("x".to_string(), x.clone().map(Cell::text).unwrap_or_else(Cell::null));
            row.insert("y".to_string(), y.map(Cell::number).unwrap_or_else(Cell::null));
            row
        })
        .collect()
}

proptest! {
    #[test]
    fn prop_classifier_partitions_types(name in type_name()) {
        let kind = classify(&name);
        let numeric = is_numeric_type(Some(&name));
        let date = is_date_type(Some(&name));
        prop_assert!(!(numeric && date));
        prop_assert_eq!(numeric, kind == MeasureKind::Numeric);
        prop_assert_eq!(date, kind == MeasureKind::Date);
    }

    #[test]
    fn prop_chart_type_is_idempotent(requested in render_type(), x_type in proptest::option::of(type_name())) {
        let once = get_chart_type(requested, x_type.as_deref());
        prop_assert_eq!(get_chart_type(once, x_type.as_deref()), once);
        prop_assert_ne!(once, RenderType::AutoPlot);
    }

    #[test]
    fn prop_count_round_trip(
        xs in proptest::collection::vec(proptest::option::of("[a-c]"), 0..40),
    ) {
        let ys = vec![Some(1.0); xs.len()];
        let rows = make_rows(&xs, &ys);
        let counts = aggregate(&rows, "x", None, None, AggregateFn::Count, "[Blank]", false);
        let total: f64 = counts.iter().map(|r| r.value).sum();
        prop_assert_eq!(total as usize, rows.len());
        if xs.iter().any(Option::is_none) {
            prop_assert!(counts.iter().any(|r| r.label == "[Blank]"));
        }
    }

    #[test]
    fn prop_log_scale_guard(
        rest in proptest::collection::vec(proptest::option::of(-100.0f64..100.0), 0..20),
        negative in -100.0f64..-0.001,
        at in 0usize..20,
    ) {
        let mut ys = rest;
        let at = at.min(ys.len());
        ys.insert(at, Some(negative));
        let xs = vec![Some("A".to_string()); ys.len()];
        let rows = make_rows(&xs, &ys);

        let measures = Measures {
            x: Some(Measure::new("x", "X", "string")),
            y: vec![Measure::new("y", "Y", "float")],
            ..Default::default()
        };
        let store = MeasureStore::new(vec![FieldMeta::new("x", "string"), FieldMeta::new("y", "float")], rows.clone());
        let saved = SavedScales {
            y: Some(ScaleOverride { trans: Some(Trans::Log), ..Default::default() }),
            ..Default::default()
        };
        let mut aes = generate_aes(RenderType::BoxPlot, &measures, "q");
        let mut scales = generate_scales(RenderType::BoxPlot, &measures, &saved, &aes, &store, None);
        let v = validate_axis_measure(RenderType::BoxPlot, &measures.y[0], Channel::Y, &mut aes, &mut scales, &rows, false);

        prop_assert!(v.success);
        prop_assert!(v.message.is_some());
        prop_assert_eq!(scales.get(Channel::Y).map(|s| s.trans), Some(Trans::Linear));
    }

    #[test]
    fn prop_continuous_domains_are_ordered(
        points in proptest::collection::vec((-1e6f64..1e6, proptest::option::of(-1e6f64..1e6)), 0..30),
    ) {
        let rows: Vec<Row> = points
            .iter()
            .map(|(x, y)| {
                let mut row = Row::new();
                row.insert("x".to_string(), Cell::number(*x));
                row.insert("y".to_string(), y.map(Cell::number).unwrap_or_else(Cell::null));
                row
            })
            .collect();
        let measures = Measures {
            x: Some(Measure::new("x", "X", "float")),
            y: vec![Measure::new("y", "Y", "float")],
            ..Default::default()
        };
        let store = MeasureStore::new(vec![FieldMeta::new("x", "float"), FieldMeta::new("y", "float")], rows);
        let aes = generate_aes(RenderType::ScatterPlot, &measures, "q");
        let scales = generate_scales(RenderType::ScatterPlot, &measures, &SavedScales::default(), &aes, &store, None);

        for channel in [Channel::X, Channel::Y] {
            let scale = scales.get(channel).unwrap();
            if let Some(domain) = scale.domain {
                if let (Some(min), Some(max)) = (domain.min, domain.max) {
                    prop_assert!(max >= min);
                }
            }
            if points.is_empty() {
                prop_assert_eq!(scale.domain, Some(genchart::ir::Domain::unit()));
            }
        }
    }
}
