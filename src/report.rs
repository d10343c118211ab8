use std::path::Path;

use plotters::prelude::*;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::graph::Graph;
use crate::{Error, Result};

/// One row of the execution-schedule report: the working set and costs of
/// a single operator step under the current order.
#[derive(Debug, Clone)]
pub struct ScheduleRow {
    /// Execution step (operator id under the current order)
    pub step: usize,
    /// Name of the operator's output tensor
    pub output_name: String,
    /// Ids of the live tensors with a non-zero activation footprint
    pub live_tensors: Vec<usize>,
    /// Activation bytes resident during this step
    pub memory_bytes: u64,
    /// Weighted multiply-accumulate count
    pub macs: u64,
    /// Stored bytes of the operator's constant inputs
    pub weight_bytes: u64,
    /// Share of `memory_bytes` held by the operator's inputs
    pub input_bytes: u64,
    /// Share of `memory_bytes` held by the operator's output
    pub output_bytes: u64,
    /// Share of `memory_bytes` held by other live tensors
    pub other_bytes: u64,
}

#[derive(Tabled)]
struct TensorTableRow {
    #[tabled(rename = "Id")]
    id: usize,
    #[tabled(rename = "Tensor")]
    name: String,
    #[tabled(rename = "Shape")]
    shape: String,
    #[tabled(rename = "Size in RAM (B)")]
    size: String,
}

#[derive(Tabled)]
struct ScheduleTableRow {
    #[tabled(rename = "Operator (output name)")]
    operator: String,
    #[tabled(rename = "Tensors in memory (IDs)")]
    working_set: String,
    #[tabled(rename = "Memory use (B)")]
    memory: String,
    #[tabled(rename = "MACs")]
    macs: String,
    #[tabled(rename = "Size")]
    size: String,
}

const MAX_NAME_CHARACTERS: usize = 80;

/// Render the tensor table; weights are excluded because their activation
/// footprint is zero.
pub(crate) fn render_tensor_table(graph: &Graph) -> String {
    let rows: Vec<TensorTableRow> = graph
        .tensors
        .iter()
        .filter(|t| t.size() != 0)
        .map(|t| TensorTableRow {
            id: t.id,
            name: shorten_name(&t.name, MAX_NAME_CHARACTERS),
            shape: format!("{:?}", t.shape),
            size: group_digits(t.size()),
        })
        .collect();
    Table::new(rows).with(Style::sharp()).to_string()
}

/// Render the execution-schedule table
pub(crate) fn render_schedule_table(rows: &[ScheduleRow]) -> String {
    let rows: Vec<ScheduleTableRow> = rows
        .iter()
        .map(|row| ScheduleTableRow {
            operator: shorten_name(&row.output_name, MAX_NAME_CHARACTERS),
            working_set: format!(
                "[{}]",
                row.live_tensors
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            memory: group_digits(row.memory_bytes),
            macs: group_digits(row.macs),
            size: group_digits(row.weight_bytes),
        })
        .collect();
    Table::new(rows).with(Style::sharp()).to_string()
}

/// Write the tensor table as CSV
pub(crate) fn write_tensor_csv(graph: &Graph, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["Id", "Name", "Shape", "Size"])?;
    for tensor in graph.tensors.iter().filter(|t| t.size() != 0) {
        writer.write_record([
            tensor.id.to_string(),
            tensor.name.clone(),
            tensor
                .shape
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(" "),
            tensor.size().to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the execution schedule as CSV
pub(crate) fn write_schedule_csv(rows: &[ScheduleRow], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["Operator", "Working set", "Memory use", "MACs", "Size"])?;
    for row in rows {
        writer.write_record([
            row.output_name.clone(),
            row.live_tensors
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(" "),
            row.memory_bytes.to_string(),
            row.macs.to_string(),
            row.weight_bytes.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Plot per-step memory usage as stacked bars partitioned into operator
/// inputs, operator outputs and other live tensors.
pub(crate) fn plot_memory_usage(rows: &[ScheduleRow], path: &Path) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }

    let to_kb = |bytes: u64| bytes as f64 / 1024.0;
    let peak_kb = rows.iter().map(|r| r.memory_bytes).max().unwrap_or(0) as f64 / 1024.0;
    let steps = rows.len();

    let width = ((steps as u32) * 28).clamp(640, 2048);
    let root = SVGBackend::new(path, (width, 640)).into_drawing_area();
    root.fill(&WHITE).map_err(render_error)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(12)
        .x_label_area_size(40)
        .y_label_area_size(64)
        .build_cartesian_2d(-0.5f64..steps as f64 - 0.5, 0f64..peak_kb + 10.0)
        .map_err(render_error)?;
    chart
        .configure_mesh()
        .x_desc("Operators")
        .y_desc("Memory usage (KB)")
        .x_labels(steps.min(20))
        .x_label_formatter(&|x| format!("{}", x.round() as i64))
        .draw()
        .map_err(render_error)?;

    let input_color = RGBColor(0xd9, 0x53, 0x19);
    let output_color = RGBColor(0xed, 0xb1, 0x20);
    let other_color = RGBColor(0x00, 0x72, 0xbd);

    let bar = |step: usize, bottom_kb: f64, top_kb: f64, color: RGBColor| {
        Rectangle::new(
            [(step as f64 - 0.4, bottom_kb), (step as f64 + 0.4, top_kb)],
            color.filled(),
        )
    };

    chart
        .draw_series(
            rows.iter()
                .map(|r| bar(r.step, 0.0, to_kb(r.input_bytes), input_color)),
        )
        .map_err(render_error)?
        .label("Operator inputs")
        .legend(move |(x, y)| Rectangle::new([(x, y - 4), (x + 10, y + 4)], input_color.filled()));
    chart
        .draw_series(rows.iter().map(|r| {
            bar(
                r.step,
                to_kb(r.input_bytes),
                to_kb(r.input_bytes + r.output_bytes),
                output_color,
            )
        }))
        .map_err(render_error)?
        .label("Operator outputs")
        .legend(move |(x, y)| Rectangle::new([(x, y - 4), (x + 10, y + 4)], output_color.filled()));
    chart
        .draw_series(rows.iter().map(|r| {
            bar(
                r.step,
                to_kb(r.input_bytes + r.output_bytes),
                to_kb(r.memory_bytes),
                other_color,
            )
        }))
        .map_err(render_error)?
        .label("Other tensors")
        .legend(move |(x, y)| Rectangle::new([(x, y - 4), (x + 10, y + 4)], other_color.filled()));

    chart
        .configure_series_labels()
        .border_style(&BLACK)
        .background_style(&WHITE.mix(0.8))
        .draw()
        .map_err(render_error)?;
    root.present().map_err(render_error)?;
    Ok(())
}

fn render_error(error: impl std::fmt::Display) -> Error {
    Error::Render(error.to_string())
}

/// Midpoint-ellipsis shortening for long tensor names
pub(crate) fn shorten_name(name: &str, max_characters: usize) -> String {
    debug_assert!(max_characters >= 4);
    let characters: Vec<char> = name.chars().collect();
    if characters.len() <= max_characters {
        return name.to_string();
    }
    let keep = max_characters - 3;
    let left = keep / 2;
    let right = keep - left;
    let head: String = characters[..left].iter().collect();
    let tail: String = characters[characters.len() - right..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Thousands separators for table display
pub(crate) fn group_digits(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, character) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(character);
    }
    grouped
}
