use crate::aes::{Accessor, Aes};
use crate::classify::{classify_measure, MeasureKind};
use crate::data::{Row, ValueVariant};
use crate::ir::{
    AggregateFn, AggregateRow, AxisSide, BarOptions, Channel, ChartConfig, ChartLayout, ChartOptions,
    Domain, Geom, LayerConfig, Margins, PieOptions, PlotConfig, PlotData, PlotLabels, PointType, RangeType,
    RenderType, Scales,
};
use crate::scale::Extent;
use crate::transform::{aggregate, compute_box_summaries, BLANK_LABEL};
use crate::{ChartDefaults, ChartError};
use anyhow::Result;
use indexmap::IndexSet;
use tracing::debug;

const MIN_BOTTOM_MARGIN: f64 = 50.0;
const MAX_BOTTOM_MARGIN: f64 = 275.0;

/// A y measure drawn as its own layer when several are selected
#[derive(Debug, Clone, PartialEq)]
pub struct YLayer {
    pub label: String,
    pub side: AxisSide,
    pub accessor: Accessor,
}

/// Inputs to the plot-config assembler
pub struct AssembleContext<'a> {
    pub render_to: &'a str,
    pub chart_type: RenderType,
    pub config: &'a ChartConfig,
    pub labels: PlotLabels,
    pub aes: Aes,
    pub scales: Scales,
    /// Per-measure y accessors, only set when more than one y measure is selected
    pub y_layers: Vec<YLayer>,
    pub rows: &'a [Row],
    pub width: u32,
    pub height: u32,
    pub defaults: &'a ChartDefaults,
}

// =============================================================================
// Labels, margins and width
// =============================================================================

/// Aggregate a bar or pie chart uses: explicit choice, else SUM with a y measure, else COUNT
pub fn aggregate_fn_for(config: &ChartConfig) -> Result<AggregateFn> {
    match config.measures.first_y() {
        None => Ok(AggregateFn::Count),
        Some(y) => match &y.aggregate {
            Some(spec) => spec.resolve(),
            None => Ok(AggregateFn::Sum),
        },
    }
}

fn aggregate_label(func: AggregateFn) -> &'static str {
    match func {
        AggregateFn::Count => "Count",
        AggregateFn::Sum => "Sum",
        AggregateFn::Mean => "Mean",
        AggregateFn::Min => "Min",
        AggregateFn::Max => "Max",
    }
}

/// Resolve axis labels: saved labels win, then measure labels.
pub fn generate_labels(config: &ChartConfig, chart_type: RenderType) -> PlotLabels {
    let saved = &config.labels;
    let measures = &config.measures;
    let y_label = |side: AxisSide| {
        let names: Vec<&str> = measures
            .y
            .iter()
            .filter(|m| m.side() == side)
            .map(|m| m.display_label())
            .collect();
        if names.is_empty() { None } else { Some(names.join(", ")) }
    };

    let mut y_left = saved.y.clone().or_else(|| y_label(AxisSide::Left));
    if chart_type.is_aggregated() && saved.y.is_none() {
        let func = aggregate_fn_for(config).unwrap_or(AggregateFn::Sum);
        y_left = Some(match measures.first_y() {
            Some(y) if func != AggregateFn::Count => format!("{} of {}", aggregate_label(func), y.display_label()),
            _ => "Count".to_string(),
        });
    }

    PlotLabels {
        main: saved.main.clone(),
        subtitle: saved.subtitle.clone(),
        footer: saved.footer.clone(),
        x: saved.x.clone().or_else(|| measures.x.as_ref().map(|m| m.display_label().to_string())),
        y_left,
        y_right: saved.y_right.clone().or_else(|| y_label(AxisSide::Right)),
    }
}

/// Margins for the chart.
///
/// Long discrete x labels that would be rotated push the bottom margin out, clamped to
/// [50, 275]. Explicit layout margins override per side.
pub fn generate_margins(config: &ChartConfig, x_labels: &[String], width: u32) -> Margins {
    let mut margins = Margins::default();

    if !x_labels.is_empty() {
        let total: usize = x_labels.iter().map(|l| l.chars().count()).sum();
        let longest = x_labels.iter().map(|l| l.chars().count()).max().unwrap_or(0);
        if (total * 8) as f64 > width as f64 {
            let bottom = (longest as f64 * 6.0).clamp(MIN_BOTTOM_MARGIN, MAX_BOTTOM_MARGIN);
            margins.bottom = Some(bottom);
        }
    }

    let geom = &config.geom_options;
    if geom.margin_top.is_some() { margins.top = geom.margin_top; }
    if geom.margin_right.is_some() { margins.right = geom.margin_right; }
    if geom.margin_bottom.is_some() { margins.bottom = geom.margin_bottom; }
    if geom.margin_left.is_some() { margins.left = geom.margin_left; }
    margins
}

fn distinct_labels(rows: &[Row], column: &str) -> IndexSet<String> {
    rows.iter()
        .map(|row| crate::data::get_cell_value(row, column, ValueVariant::DisplayValue).to_string())
        .collect()
}

/// Widen bar and box plots so each category gets room.
pub fn chart_type_based_width(chart_type: RenderType, config: &ChartConfig, rows: &[Row], default_width: u32) -> u32 {
    let Some(x) = &config.measures.x else { return default_width };
    if classify_measure(x) == MeasureKind::Numeric && chart_type == RenderType::BoxPlot {
        return default_width;
    }
    let categories = distinct_labels(rows, x.column()).len() as u32;
    let needed = match chart_type {
        RenderType::BarChart => {
            let subs = config
                .measures
                .x_sub
                .as_ref()
                .map(|s| distinct_labels(rows, s.column()).len().max(1) as u32)
                .unwrap_or(1);
            categories * 40 * subs
        }
        RenderType::BoxPlot => categories * 50,
        _ => 0,
    };
    default_width.max(needed)
}

// =============================================================================
// Layers
// =============================================================================

fn color(hex: &str) -> String {
    if hex.starts_with('#') { hex.to_string() } else { format!("#{}", hex) }
}

fn point_geom(config: &ChartConfig, jitter: bool) -> Geom {
    let geom = &config.geom_options;
    Geom::Point {
        size: geom.point_size,
        opacity: geom.opacity,
        color: Some(color(&geom.point_fill_color)),
        jitter,
    }
}

fn path_geom(config: &ChartConfig) -> Geom {
    let geom = &config.geom_options;
    Geom::Path {
        size: geom.line_width,
        opacity: geom.opacity,
        color: Some(color(&geom.point_fill_color)),
    }
}

fn layer(geom: Geom, aes: Aes) -> LayerConfig {
    LayerConfig { name: None, geom, aes, data: None, point_click: None }
}

/// Build the drawing layers for box, scatter and line plots.
pub fn generate_layers(
    chart_type: RenderType,
    config: &ChartConfig,
    y_layers: &[YLayer],
    row_count: usize,
    defaults: &ChartDefaults,
    warnings: &mut Vec<String>,
) -> Vec<LayerConfig> {
    let geom_options = &config.geom_options;
    let mut layers = Vec::new();

    let mut data_geom = match chart_type {
        RenderType::BoxPlot => {
            if geom_options.point_type == PointType::All {
                let mut point_aes = Aes::new();
                point_aes.insert(Channel::HoverText, crate::aes::point_hover(&config.measures));
                layers.push(layer(point_geom(config, true), point_aes));
            }
            Geom::Boxplot {
                fill_color: color(&geom_options.box_fill_color),
                line_color: color(&geom_options.line_color),
                line_width: geom_options.line_width,
                opacity: geom_options.opacity,
                show_outliers: geom_options.point_type == PointType::Outliers,
            }
        }
        _ => point_geom(config, false),
    };

    let threshold = geom_options.bin_threshold.min(defaults.bin_threshold);
    if chart_type == RenderType::ScatterPlot && (geom_options.binned || row_count > threshold) {
        if row_count > threshold {
            warnings.push(format!(
                "The number of individual points exceeds {}. The data is now grouped by density, which overrides some layout options.",
                threshold
            ));
        }
        data_geom = Geom::Bin { threshold, color: color(&geom_options.point_fill_color) };
    }

    let mut show_points = true;
    if chart_type == RenderType::LinePlot {
        if row_count > defaults.line_point_limit {
            warnings.push(format!(
                "The number of individual points exceeds {}. Data points will not be shown on this line plot.",
                defaults.line_point_limit
            ));
            show_points = false;
        }
        if geom_options.hide_data_points {
            show_points = false;
        }
    }

    let has_grouping = config.measures.series.is_some() || config.measures.color.is_some();
    if y_layers.len() > 1 {
        for y in y_layers {
            let mut layer_aes = Aes::new();
            layer_aes.insert(crate::ir::y_channel(y.side), y.accessor.clone());
            if !has_grouping {
                layer_aes.insert(Channel::Color, Accessor::Constant(String::new()));
                layer_aes.insert(Channel::Shape, Accessor::Constant(String::new()));
            }
            if chart_type == RenderType::LinePlot {
                layers.push(LayerConfig { name: Some(y.label.clone()), ..layer(path_geom(config), layer_aes.clone()) });
            }
            if chart_type != RenderType::LinePlot || show_points {
                layers.push(LayerConfig { name: Some(y.label.clone()), ..layer(data_geom.clone(), layer_aes) });
            }
        }
    } else {
        if chart_type == RenderType::LinePlot {
            layers.push(layer(path_geom(config), Aes::new()));
        }
        if chart_type != RenderType::LinePlot || show_points {
            layers.push(layer(data_geom, Aes::new()));
        }
    }

    layers
}

// =============================================================================
// Specialized builders
// =============================================================================

/// Aggregate rows for a bar or pie chart
pub fn aggregate_for_chart(config: &ChartConfig, rows: &[Row]) -> Result<Vec<AggregateRow>> {
    let x = config
        .measures
        .x
        .as_ref()
        .ok_or_else(|| ChartError::InvalidConfig("Bar and pie charts require an x measure.".to_string()))?;
    let func = aggregate_fn_for(config)?;
    let numeric_pivot = classify_measure(x) == MeasureKind::Numeric;
    Ok(aggregate(
        rows,
        x.column(),
        config.measures.x_sub.as_ref().map(|m| m.column()),
        config.measures.first_y().map(|m| m.column()),
        func,
        BLANK_LABEL,
        numeric_pivot,
    ))
}

fn aggregated_aes(has_sub: bool) -> Aes {
    let mut aes = Aes::new();
    aes.insert(Channel::X, Accessor::Raw { column: "label".to_string(), variant: ValueVariant::Value });
    aes.insert(Channel::Y, Accessor::Raw { column: "value".to_string(), variant: ValueVariant::Value });
    if has_sub {
        aes.insert(Channel::XSub, Accessor::Raw { column: "subLabel".to_string(), variant: ValueVariant::Value });
    }
    aes
}

/// Pie chart config. Negative slices are dropped with a warning and the height shrinks to 95%.
pub fn build_pie_config(ctx: &AssembleContext, data: Vec<AggregateRow>, warnings: &mut Vec<String>) -> PlotConfig {
    let (negative, data): (Vec<AggregateRow>, Vec<AggregateRow>) = data.into_iter().partition(|r| r.value < 0.0);
    let mut height = ctx.height;
    if !negative.is_empty() {
        let omitted: Vec<&str> = negative.iter().map(|r| r.label.as_str()).collect();
        warnings.push(format!(
            "There are negative values in the data that the Pie Chart cannot display. Omitted: {}",
            omitted.join(", ")
        ));
        height = (height as f64 * 0.95).floor() as u32;
    }

    let geom = &ctx.config.geom_options;
    PlotConfig {
        render_to: ctx.render_to.to_string(),
        render_type: RenderType::PieChart,
        width: ctx.width,
        height,
        labels: ctx.labels.clone(),
        layers: Vec::new(),
        aes: aggregated_aes(false),
        scales: Scales::default(),
        data: PlotData::Aggregated(data),
        margins: generate_margins(ctx.config, &[], ctx.width),
        options: Some(ChartOptions::Pie(PieOptions {
            show_labels: geom.show_pie_labels,
            show_percentages: geom.show_pie_percentages,
            inner_radius: geom.pie_inner_radius,
            outer_radius: geom.pie_outer_radius,
            hide_when_less_than_percentage: geom.pie_hide_when_less_than_percentage,
            gradient_percentage: geom.gradient_percentage,
            gradient_color: geom.gradient_color.clone(),
            color_palette: geom.color_palette_scale.clone(),
        })),
        box_summaries: Vec::new(),
        clip_rect: false,
        point_click_handler: ctx.config.point_click_handler.clone(),
    }
}

/// Bar chart config. The value domain always includes zero.
pub fn build_bar_config(ctx: &AssembleContext, data: Vec<AggregateRow>) -> PlotConfig {
    let mut extent = Extent::default();
    for row in &data {
        extent.include(row.value);
    }
    let (min, max) = if extent.is_empty() { (0.0, 0.0) } else { (extent.min, extent.max) };
    let value_domain = Domain::new(min.min(0.0), max.max(0.0));

    let x_labels: Vec<String> = data.iter().map(|r| r.label.clone()).collect::<IndexSet<_>>().into_iter().collect();
    let has_sub = ctx.config.measures.x_sub.is_some();
    let geom = &ctx.config.geom_options;

    let mut scales = ctx.scales.clone();
    if let Some(y) = scales.get_mut(Channel::Y) {
        if y.domain.is_none() {
            y.domain = Some(value_domain);
        }
    }

    PlotConfig {
        render_to: ctx.render_to.to_string(),
        render_type: RenderType::BarChart,
        width: ctx.width,
        height: ctx.height,
        labels: ctx.labels.clone(),
        layers: vec![layer(
            Geom::Bar {
                fill_color: color(&geom.box_fill_color),
                line_color: color(&geom.line_color),
                line_width: geom.line_width,
                opacity: geom.opacity,
            },
            Aes::new(),
        )],
        aes: aggregated_aes(has_sub),
        scales,
        data: PlotData::Aggregated(data),
        margins: generate_margins(ctx.config, &x_labels, ctx.width),
        options: Some(ChartOptions::Bar(BarOptions {
            value_domain,
            grouped: has_sub,
            show_cumulative_totals: false,
        })),
        box_summaries: Vec::new(),
        clip_rect: false,
        point_click_handler: ctx.config.point_click_handler.clone(),
    }
}

// =============================================================================
// Assembly
// =============================================================================

/// Shared domains per side for "one chart per measure" layouts
fn across_chart_domains(ctx: &AssembleContext, scales: &mut Scales) {
    for side in [AxisSide::Left, AxisSide::Right] {
        let channel = crate::ir::y_channel(side);
        let saved = ctx.config.scales.get(channel);
        if saved.is_some_and(|s| s.range_type != RangeType::Automatic || s.has_manual_domain()) {
            continue;
        }
        let mut extent = Extent::default();
        for y in ctx.y_layers.iter().filter(|y| y.side == side) {
            for row in ctx.rows {
                if let Some(v) = y.accessor.eval(row).to_f64_lenient() {
                    extent.include(v);
                }
            }
        }
        if let (Some(domain), Some(scale)) = (extent.to_domain(), scales.get_mut(channel)) {
            scale.domain = Some(domain);
        }
    }
}

fn discrete_x_labels(ctx: &AssembleContext) -> Vec<String> {
    let Some(x) = ctx.aes.get(Channel::X) else { return Vec::new() };
    if ctx.scales.get(Channel::X).is_some_and(|s| s.is_continuous()) {
        return Vec::new();
    }
    ctx.rows
        .iter()
        .map(|row| x.eval(row).to_string())
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect()
}

/// Combine accessors, scales and data into one or more plot configs.
pub fn assemble(ctx: AssembleContext, warnings: &mut Vec<String>) -> Result<Vec<PlotConfig>> {
    match ctx.chart_type {
        RenderType::PieChart => {
            let data = aggregate_for_chart(ctx.config, ctx.rows)?;
            return Ok(vec![build_pie_config(&ctx, data, warnings)]);
        }
        RenderType::BarChart => {
            let data = aggregate_for_chart(ctx.config, ctx.rows)?;
            return Ok(vec![build_bar_config(&ctx, data)]);
        }
        RenderType::TimeChart => {
            return Err(ChartError::InvalidConfig(
                "Time charts are assembled from a time chart configuration.".to_string(),
            )
            .into());
        }
        _ => {}
    }

    let margins = generate_margins(ctx.config, &discrete_x_labels(&ctx), ctx.width);
    let box_summaries = match (ctx.chart_type, ctx.aes.get(Channel::X), ctx.aes.get(Channel::Y)) {
        (RenderType::BoxPlot, Some(x), Some(y)) => compute_box_summaries(ctx.rows, x, y),
        _ => Vec::new(),
    };

    let per_measure = ctx.config.geom_options.chart_layout == ChartLayout::PerMeasure && ctx.y_layers.len() > 1;
    if !per_measure {
        let layers = generate_layers(ctx.chart_type, ctx.config, &ctx.y_layers, ctx.rows.len(), ctx.defaults, warnings);
        return Ok(vec![PlotConfig {
            render_to: ctx.render_to.to_string(),
            render_type: ctx.chart_type,
            width: ctx.width,
            height: ctx.height,
            labels: ctx.labels.clone(),
            layers,
            aes: ctx.aes.clone(),
            scales: ctx.scales.clone(),
            data: PlotData::Rows(ctx.rows.to_vec()),
            margins,
            options: None,
            box_summaries,
            clip_rect: false,
            point_click_handler: ctx.config.point_click_handler.clone(),
        }]);
    }

    let mut scales = ctx.scales.clone();
    across_chart_domains(&ctx, &mut scales);

    let mut plots = Vec::with_capacity(ctx.y_layers.len());
    for (idx, y) in ctx.y_layers.iter().enumerate() {
        let single = [y.clone()];
        let layers = generate_layers(ctx.chart_type, ctx.config, &single, ctx.rows.len(), ctx.defaults, warnings);
        let mut aes = ctx.aes.clone();
        aes.insert(crate::ir::y_channel(y.side), y.accessor.clone());
        let mut labels = ctx.labels.clone();
        labels.main = Some(match &ctx.labels.main {
            Some(main) => format!("{}: {}", main, y.label),
            None => y.label.clone(),
        });
        match y.side {
            AxisSide::Left => labels.y_left = Some(y.label.clone()),
            AxisSide::Right => labels.y_right = Some(y.label.clone()),
        }
        plots.push(PlotConfig {
            render_to: format!("{}-{}", ctx.render_to, idx),
            render_type: ctx.chart_type,
            width: ctx.width,
            height: ctx.height,
            labels,
            layers,
            aes,
            scales: scales.clone(),
            data: PlotData::Rows(ctx.rows.to_vec()),
            margins: margins.clone(),
            options: None,
            box_summaries: Vec::new(),
            clip_rect: false,
            point_click_handler: ctx.config.point_click_handler.clone(),
        });
    }

    debug!(plots = plots.len(), "assembled per-measure charts");
    Ok(plots)
}
