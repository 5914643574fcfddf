use genchart::callback::CallbackRegistry;
use genchart::data::{AesValue, Cell, FieldMeta, MeasureStore, Row};
use genchart::ir::{
    AggregateFn, AxisSide, Channel, ChartConfig, ChartLayout, Domain, Measure, Measures, PlotData, RenderType,
    SavedScales, ScaleOverride, Trans,
};
use genchart::timechart::{TimeChartConfig, TimeChartResponse};
use genchart::transform::aggregate;
use genchart::{render_generic_chart, render_time_chart, ChartError, RenderOptions};
use serde_json::json;

fn make_store(rows: &[(&str, Option<f64>)]) -> MeasureStore {
    let rows = rows
        .iter()
        .map(|(x, y)| {
            let mut row = Row::new();
            row.insert("x".to_string(), Cell::text(*x));
            row.insert("y".to_string(), y.map(Cell::number).unwrap_or_else(Cell::null));
            row
        })
        .collect();
    MeasureStore::new(vec![FieldMeta::new("x", "string"), FieldMeta::new("y", "float")], rows)
}

fn make_config(render_type: RenderType, y_trans: Option<Trans>) -> ChartConfig {
    ChartConfig {
        render_type,
        measures: Measures {
            x: Some(Measure::new("x", "X", "string")),
            y: vec![Measure::new("y", "Y", "float")],
            ..Default::default()
        },
        scales: SavedScales {
            y: y_trans.map(|trans| ScaleOverride { trans: Some(trans), ..Default::default() }),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn render(config: &ChartConfig, store: MeasureStore) -> anyhow::Result<genchart::RenderOutcome> {
    render_generic_chart(config, "Results", store, &RenderOptions::default(), &CallbackRegistry::new())
}

#[test]
fn scenario_a_bar_chart_sums_by_first_seen_category() {
    let store = make_store(&[("A", Some(1.0)), ("B", Some(2.0)), ("A", Some(3.0))]);

    let direct = aggregate(&store.rows, "x", None, Some("y"), AggregateFn::Sum, "[Blank]", false);
    let pairs: Vec<(&str, f64)> = direct.iter().map(|r| (r.label.as_str(), r.value)).collect();
    assert_eq!(pairs, vec![("A", 4.0), ("B", 2.0)]);

    let outcome = render(&make_config(RenderType::BarChart, None), store).unwrap();
    match &outcome.plots[0].data {
        PlotData::Aggregated(rows) => {
            assert_eq!(rows.len(), 2);
            assert_eq!((rows[0].label.as_str(), rows[0].value), ("A", 4.0));
            assert_eq!((rows[1].label.as_str(), rows[1].value), ("B", 2.0));
        }
        other => panic!("expected aggregated data, got {:?}", other),
    }
}

#[test]
fn scenario_b_log_scale_with_negative_reverts_to_linear() {
    let store = make_store(&[("A", Some(-1.0)), ("B", Some(5.0)), ("C", None)]);
    let outcome = render(&make_config(RenderType::BoxPlot, Some(Trans::Log)), store).unwrap();

    let y = outcome.plots[0].scales.get(Channel::Y).unwrap();
    assert_eq!(y.trans, Trans::Linear);
    assert!(outcome.warnings.iter().any(|w| w.contains("Reverting to linear scale")));
}

#[test]
fn scenario_c_log_scale_with_zero_shifts_values() {
    let store = make_store(&[("A", Some(0.0)), ("B", Some(5.0)), ("C", Some(10.0))]);
    let rows = store.rows.clone();
    let outcome = render(&make_config(RenderType::BoxPlot, Some(Trans::Log)), store).unwrap();

    let plot = &outcome.plots[0];
    assert_eq!(plot.scales.get(Channel::Y).unwrap().trans, Trans::Log);
    let values: Vec<AesValue> = rows.iter().map(|row| plot.aes.eval(Channel::Y, row)).collect();
    assert_eq!(values, vec![AesValue::Number(1.0), AesValue::Number(6.0), AesValue::Number(11.0)]);
    assert!(outcome.warnings.iter().any(|w| w.contains("value+1")));
}

#[test]
fn scenario_d_missing_measure_is_fatal() {
    let mut config = make_config(RenderType::BoxPlot, None);
    config.measures.y = vec![Measure::new("Foo", "Foo", "float")];
    let err = render(&config, make_store(&[("A", Some(1.0))])).unwrap_err();

    let chart_err = err.downcast_ref::<ChartError>().unwrap();
    assert!(matches!(chart_err, ChartError::MissingMeasure(_)));
    let message = chart_err.to_string();
    assert!(message.contains("Foo"));
    assert!(message.contains("renamed or removed"));
}

#[test]
fn scenario_e_per_subject_layout_capped_at_thirty() {
    let subjects: Vec<String> = (1..=35).map(|i| format!("PT-{:03}", i)).collect();
    let config: TimeChartConfig = serde_json::from_value(json!({
        "title": "Weight",
        "chartLayout": "per_subject",
        "measures": [{"measure": {"name": "Weight", "label": "Weight"}}],
        "axis": [{"name": "x-axis", "label": "Days"}, {"name": "y-axis", "side": "left", "label": "kg"}],
        "subject": {"values": subjects}
    }))
    .unwrap();
    let rows: Vec<_> = subjects
        .iter()
        .flat_map(|s| {
            vec![
                json!({"ParticipantId": s, "Days": 0, "Weight": 70}),
                json!({"ParticipantId": s, "Days": 30, "Weight": 72}),
            ]
        })
        .collect();
    let individual = TimeChartResponse::from_json(&json!({"rows": rows})).unwrap();

    let mut options = RenderOptions::default();
    options.defaults.max_charts = 30;
    let outcome = render_time_chart(&config, Some(individual), None, &options, &CallbackRegistry::new()).unwrap();

    assert_eq!(outcome.plots.len(), 30);
    assert!(outcome.warnings.contains(&"Only showing the first 30 charts.".to_string()));
    assert_eq!(outcome.plots[0].labels.main.as_deref(), Some("Weight: PT-001"));
    assert_eq!(outcome.plots[29].render_to, "chart-29");
}

fn make_wide_store(rows: &[(&str, f64, f64, f64)]) -> MeasureStore {
    let rows = rows
        .iter()
        .map(|(x, a, b, c)| {
            let mut row = Row::new();
            row.insert("x".to_string(), Cell::text(*x));
            row.insert("a".to_string(), Cell::number(*a));
            row.insert("b".to_string(), Cell::number(*b));
            row.insert("c".to_string(), Cell::number(*c));
            row
        })
        .collect();
    MeasureStore::new(
        vec![
            FieldMeta::new("x", "string"),
            FieldMeta::new("a", "float"),
            FieldMeta::new("b", "float"),
            FieldMeta::new("c", "float"),
        ],
        rows,
    )
}

#[test]
fn per_measure_charts_share_the_union_domain_per_side() {
    let mut right = Measure::new("c", "C", "float");
    right.y_axis = Some(AxisSide::Right);
    let mut config = make_config(RenderType::ScatterPlot, None);
    config.measures.y = vec![Measure::new("a", "A", "float"), Measure::new("b", "B", "float"), right];
    config.geom_options.chart_layout = ChartLayout::PerMeasure;
    let store = make_wide_store(&[("p", 1.0, -2.0, 100.0), ("q", 4.0, 10.0, 250.0)]);

    let outcome = render(&config, store).unwrap();
    assert_eq!(outcome.plots.len(), 3);
    for plot in &outcome.plots {
        assert_eq!(plot.scales.get(Channel::Y).unwrap().domain, Some(Domain::new(-2.0, 10.0)));
        assert_eq!(plot.scales.get(Channel::YRight).unwrap().domain, Some(Domain::new(100.0, 250.0)));
    }
}

#[test]
fn bar_chart_on_log_scale_keeps_raw_aggregates_without_shift_warning() {
    let store = make_store(&[("A", Some(0.0)), ("B", Some(5.0))]);
    let outcome = render(&make_config(RenderType::BarChart, Some(Trans::Log)), store).unwrap();

    assert!(outcome.warnings.is_empty(), "unexpected warnings: {:?}", outcome.warnings);
    match &outcome.plots[0].data {
        PlotData::Aggregated(rows) => assert_eq!(rows[0].value, 0.0),
        other => panic!("expected aggregated data, got {:?}", other),
    }
}
