use crate::aes::{generate_aes, Accessor};
use crate::callback::CallbackRegistry;
use crate::classify::{get_chart_type, x_axis_type};
use crate::compiler::{assemble, chart_type_based_width, generate_labels, AssembleContext, YLayer};
use crate::convert::{conversion_happened, do_value_conversion};
use crate::data::MeasureStore;
use crate::ir::{y_channel, Channel, ChartConfig, PlotConfig, RenderType};
use crate::scale::generate_scales;
use crate::transform::cap_charts;
use crate::validate::{
    validate_axis_measure, validate_measures_exist, validate_response_has_data, validate_y_layers,
    validate_y_measure_count, Validation,
};
use crate::{ChartError, RenderOptions};
use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Plot configs ready for the renderer plus the warnings to show beside them
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOutcome {
    pub chart_type: RenderType,
    pub plots: Vec<PlotConfig>,
    pub warnings: Vec<String>,
}

fn check(validation: Validation, warnings: &mut Vec<String>) -> Result<()> {
    if let Some(err) = ChartError::from_validation(&validation) {
        return Err(err.into());
    }
    warnings.extend(validation.message);
    Ok(())
}

/// Run the generic chart pipeline: classify, convert, build aesthetics and scales,
/// validate, then assemble.
///
/// Fatal conditions come back as a [`ChartError`] inside the `anyhow::Error`.
pub fn render_generic_chart(
    config: &ChartConfig,
    query_name: &str,
    mut store: MeasureStore,
    options: &RenderOptions,
    callbacks: &CallbackRegistry,
) -> Result<RenderOutcome> {
    let chart_type = get_chart_type(config.render_type, x_axis_type(config.measures.x.as_ref()));
    debug!(requested = %config.render_type, resolved = %chart_type, rows = store.len(), "rendering generic chart");

    let mut warnings = Vec::new();

    let has_data = validate_response_has_data(&store, options.include_filter_msg);
    if !has_data.success {
        let message = has_data.message.unwrap_or_default();
        if !options.include_filter_msg {
            return Err(ChartError::NoData(message).into());
        }
        warnings.push(message);
    }

    check(validate_y_measure_count(chart_type, &config.measures), &mut warnings)?;

    let measure_check = validate_measures_exist(&config.measures, &store, chart_type.required_channels());
    if let Some(message) = measure_check.fatal {
        return Err(ChartError::MissingMeasure(message).into());
    }
    warnings.extend(measure_check.warnings);

    let mut config = config.clone();
    config.render_type = chart_type;
    warnings.extend(do_value_conversion(&mut config, chart_type, &mut store.rows));
    let converted = conversion_happened(&config);

    let mut aes = generate_aes(chart_type, &config.measures, query_name);
    let mut scales = generate_scales(
        chart_type,
        &config.measures,
        &config.scales,
        &aes,
        &store,
        options.default_number_format.as_deref(),
    );

    if let Some(x) = &config.measures.x {
        check(
            validate_axis_measure(chart_type, x, Channel::X, &mut aes, &mut scales, &store.rows, converted),
            &mut warnings,
        )?;
    }

    let mut y_layers = Vec::new();
    if let [y] = config.measures.y.as_slice() {
        let channel = y_channel(y.side());
        check(
            validate_axis_measure(chart_type, y, channel, &mut aes, &mut scales, &store.rows, converted),
            &mut warnings,
        )?;
    } else {
        let mut accessors: Vec<Accessor> =
            config.measures.y.iter().map(|y| Accessor::continuous(y.column())).collect();
        for validation in
            validate_y_layers(chart_type, &config.measures.y, &mut accessors, &mut scales, &store.rows, converted)
        {
            check(validation, &mut warnings)?;
        }
        y_layers = config
            .measures
            .y
            .iter()
            .zip(accessors)
            .map(|(y, accessor)| YLayer { label: y.display_label().to_string(), side: y.side(), accessor })
            .collect();
    }

    if let Some(name) = &config.point_click_handler {
        if !callbacks.contains(name) {
            warn!(handler = %name, "point click handler is not registered");
            warnings.push(format!("The point click handler {} is not registered and will be ignored.", name));
            config.point_click_handler = None;
        }
    }

    let width = config
        .width
        .unwrap_or_else(|| chart_type_based_width(chart_type, &config, &store.rows, options.defaults.width));
    let height = config.height.unwrap_or(options.defaults.height);

    let ctx = AssembleContext {
        render_to: &options.render_to,
        chart_type,
        config: &config,
        labels: generate_labels(&config, chart_type),
        aes,
        scales,
        y_layers,
        rows: &store.rows,
        width,
        height,
        defaults: &options.defaults,
    };
    let plots = assemble(ctx, &mut warnings)?;
    let (plots, truncated) = cap_charts(plots, options.defaults.max_charts);
    warnings.extend(truncated);

    info!(plots = plots.len(), warnings = warnings.len(), "generic chart ready");
    Ok(RenderOutcome { chart_type, plots, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{AesValue, Cell, FieldMeta, Row};
    use crate::ir::{ChartLayout, Measure, Measures, PlotData, ScaleOverride, Trans};

    fn make_store(rows: &[(&str, Option<f64>, Option<f64>)]) -> MeasureStore {
        let rows = rows
            .iter()
            .map(|(x, a, b)| {
                let mut row = Row::new();
                row.insert("x".to_string(), Cell::text(*x));
                row.insert("a".to_string(), a.map(Cell::number).unwrap_or_else(Cell::null));
                row.insert("b".to_string(), b.map(Cell::number).unwrap_or_else(Cell::null));
                row
            })
            .collect();
        MeasureStore::new(
            vec![FieldMeta::new("x", "string"), FieldMeta::new("a", "float"), FieldMeta::new("b", "float")],
            rows,
        )
    }

    fn make_config(render_type: RenderType, y: Vec<Measure>) -> ChartConfig {
        ChartConfig {
            render_type,
            measures: Measures { x: Some(Measure::new("x", "X", "string")), y, ..Default::default() },
            ..Default::default()
        }
    }

    #[test]
    fn test_auto_plot_becomes_box_plot() {
        let config = make_config(RenderType::AutoPlot, vec![Measure::new("a", "A", "float")]);
        let store = make_store(&[("p", Some(1.0), None), ("q", Some(2.0), None)]);
        let outcome =
            render_generic_chart(&config, "q", store, &RenderOptions::default(), &CallbackRegistry::new()).unwrap();
        assert_eq!(outcome.chart_type, RenderType::BoxPlot);
        assert_eq!(outcome.plots.len(), 1);
        assert_eq!(outcome.plots[0].box_summaries.len(), 2);
    }

    #[test]
    fn test_zero_rows_without_filter_escape_is_fatal() {
        let config = make_config(RenderType::BoxPlot, vec![Measure::new("a", "A", "float")]);
        let err = render_generic_chart(&config, "q", make_store(&[]), &RenderOptions::default(), &CallbackRegistry::new())
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<ChartError>(), Some(ChartError::NoData(_))));

        let options = RenderOptions { include_filter_msg: true, ..Default::default() };
        let outcome = render_generic_chart(&config, "q", make_store(&[]), &options, &CallbackRegistry::new()).unwrap();
        assert!(outcome.warnings[0].starts_with("The response returned 0 rows of data."));
    }

    #[test]
    fn test_multi_y_per_measure_layout() {
        let mut right = Measure::new("b", "B", "float");
        right.y_axis = Some(crate::ir::AxisSide::Right);
        let mut config = make_config(RenderType::ScatterPlot, vec![Measure::new("a", "A", "float"), right]);
        config.measures.x = Some(Measure::new("a", "A", "float"));
        config.geom_options.chart_layout = ChartLayout::PerMeasure;
        let store = make_store(&[("p", Some(1.0), Some(10.0)), ("q", Some(2.0), Some(20.0))]);
        let outcome =
            render_generic_chart(&config, "q", store, &RenderOptions::default(), &CallbackRegistry::new()).unwrap();
        assert_eq!(outcome.plots.len(), 2);
        assert_eq!(outcome.plots[1].labels.y_right.as_deref(), Some("B"));
        assert!(matches!(outcome.plots[0].data, PlotData::Rows(ref r) if r.len() == 2));
    }

    #[test]
    fn test_unregistered_click_handler_warns() {
        let mut config = make_config(RenderType::BoxPlot, vec![Measure::new("a", "A", "float")]);
        config.point_click_handler = Some("openDetails".to_string());
        let store = make_store(&[("p", Some(1.0), None)]);
        let outcome =
            render_generic_chart(&config, "q", store, &RenderOptions::default(), &CallbackRegistry::new()).unwrap();
        assert!(outcome.warnings.iter().any(|w| w.contains("openDetails")));
        assert_eq!(outcome.plots[0].point_click_handler, None);
    }

    #[test]
    fn test_multi_y_log_negative_leaves_every_layer_unshifted() {
        let mut config = make_config(
            RenderType::ScatterPlot,
            vec![Measure::new("a", "A", "float"), Measure::new("b", "B", "float")],
        );
        config.scales.y = Some(ScaleOverride { trans: Some(Trans::Log), ..Default::default() });
        let store = make_store(&[("p", Some(0.0), Some(-1.0)), ("q", Some(5.0), Some(2.0))]);
        let outcome =
            render_generic_chart(&config, "q", store, &RenderOptions::default(), &CallbackRegistry::new()).unwrap();

        let plot = &outcome.plots[0];
        assert_eq!(plot.scales.get(Channel::Y).unwrap().trans, Trans::Linear);
        let rows = match &plot.data {
            PlotData::Rows(rows) => rows,
            other => panic!("expected rows, got {:?}", other),
        };
        assert_eq!(plot.layers[0].aes.eval(Channel::Y, &rows[0]), AesValue::Number(0.0));
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].starts_with("Unable to use a log scale on the y-axis."));
    }

    #[test]
    fn test_multi_y_log_zero_shifts_every_layer_on_side() {
        let mut config = make_config(
            RenderType::ScatterPlot,
            vec![Measure::new("a", "A", "float"), Measure::new("b", "B", "float")],
        );
        config.scales.y = Some(ScaleOverride { trans: Some(Trans::Log), ..Default::default() });
        let store = make_store(&[("p", Some(0.0), Some(3.0)), ("q", Some(5.0), Some(2.0))]);
        let outcome =
            render_generic_chart(&config, "q", store, &RenderOptions::default(), &CallbackRegistry::new()).unwrap();

        let plot = &outcome.plots[0];
        assert_eq!(plot.scales.get(Channel::Y).unwrap().trans, Trans::Log);
        let PlotData::Rows(rows) = &plot.data else { panic!("expected rows") };
        assert_eq!(plot.layers[0].aes.eval(Channel::Y, &rows[0]), AesValue::Number(1.0));
        assert_eq!(plot.layers[1].aes.eval(Channel::Y, &rows[0]), AesValue::Number(4.0));
        assert_eq!(outcome.warnings, vec!["Some y-axis values are 0. Plotting all y-axis values as value+1."]);
    }

    #[test]
    fn test_box_plot_with_several_y_measures_is_rejected() {
        let config = make_config(
            RenderType::BoxPlot,
            vec![Measure::new("a", "A", "float"), Measure::new("b", "B", "float")],
        );
        let store = make_store(&[("p", Some(1.0), Some(2.0))]);
        let err = render_generic_chart(&config, "q", store, &RenderOptions::default(), &CallbackRegistry::new())
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<ChartError>(), Some(ChartError::InvalidConfig(_))));
    }

    #[test]
    fn test_date_x_scatter_is_discrete_in_accessor_and_scale() {
        let mut config = make_config(RenderType::ScatterPlot, vec![Measure::new("a", "A", "float")]);
        config.measures.x = Some(Measure::new("x", "Visit Date", "date"));
        let store = make_store(&[("2024-01-02", Some(1.0), None), ("2024-01-09", Some(2.0), None)]);
        let outcome =
            render_generic_chart(&config, "q", store, &RenderOptions::default(), &CallbackRegistry::new()).unwrap();

        let plot = &outcome.plots[0];
        assert!(!plot.scales.get(Channel::X).unwrap().is_continuous());
        assert_eq!(plot.aes.get(Channel::X), Some(&crate::aes::Accessor::discrete("x", "Visit Date")));
    }
}
