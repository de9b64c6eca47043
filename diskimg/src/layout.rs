// SPDX-License-Identifier: GPL-3.0-only

//! Layout planning: ordered partition specs to absolute byte ranges.
//!
//! The first partition starts at 1 MiB and is bootable. Every later partition
//! starts where the previous one ends. Short-form end positions are absolute
//! offsets; long-form ends come from the `mkpart` end token.

use diskimg_contracts::LayoutConflict;
use diskimg_types::{
    ALIGNMENT_BYTES, ByteSize, EndPosition, LayoutPlan, PartitionSpec, ResolvedPartition,
    SECTOR_SIZE, SpecForm, TableType, unit_multiplier,
};
use tracing::debug;

use crate::spec::mkpart_arguments;

/// Bare numbers in parted arguments are megabytes until a `unit` command says otherwise.
const PARTED_DEFAULT_UNIT: u64 = 1000 * 1000;
/// Percentages are kept in 1/10000 of a percent
const PERCENT_SCALE: u64 = 10_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanOptions {
    /// Total image size requested by the caller (`--size`)
    pub image_size: Option<ByteSize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BareUnit {
    Bytes(u64),
    Sectors,
    Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndBound {
    /// Exclusive byte offset
    Bytes(u64),
    /// Fraction of the image in [`PERCENT_SCALE`] units
    Percent(u64),
    /// `100%`
    Fill,
}

pub fn plan(specs: &[PartitionSpec], options: PlanOptions) -> Result<LayoutPlan, LayoutConflict> {
    let Some(first) = specs.first() else {
        return Err(LayoutConflict::new("no partitions to lay out"));
    };

    let table_type = resolve_table_type(specs)?;
    if specs.len() > table_type.max_partitions() {
        return Err(LayoutConflict::new(format!(
            "{} partitions requested, a {table_type} table holds at most {}",
            specs.len(),
            table_type.max_partitions()
        )));
    }
    if let Some(spec) = specs.iter().skip(1).find(|spec| spec.dd_size.is_some()) {
        return Err(LayoutConflict::at(
            &spec.token,
            "dd is only accepted on the first partition",
        ));
    }

    let ends = specs
        .iter()
        .enumerate()
        .map(|(position, spec)| end_bound(specs, position, spec))
        .collect::<Result<Vec<_>, _>>()?;
    let total = resolve_total_size(first, specs, &ends, options)?;

    if let Some(max) = table_type.max_image_bytes()
        && total > max
    {
        return Err(LayoutConflict::new(format!(
            "image of {} exceeds the {} limit of a {table_type} table",
            ByteSize::from_bytes(total),
            ByteSize::from_bytes(max)
        )));
    }

    let usable_end = total.saturating_sub(table_type.trailing_reserved_bytes());
    let mut partitions = Vec::with_capacity(specs.len());
    let mut start = ALIGNMENT_BYTES.max(table_type.leading_reserved_bytes());

    for (position, (spec, bound)) in specs.iter().zip(ends).enumerate() {
        let last = position + 1 == specs.len();
        let end = match bound {
            EndBound::Fill if !last => {
                return Err(LayoutConflict::at(
                    &spec.token,
                    "only the last partition may end at 100%",
                ));
            }
            EndBound::Fill => total,
            EndBound::Percent(fraction) => {
                let bytes = u128::from(total) * u128::from(fraction) / u128::from(100 * PERCENT_SCALE);
                let bytes = u64::try_from(bytes).unwrap_or(u64::MAX);
                bytes - bytes % SECTOR_SIZE
            }
            EndBound::Bytes(bytes) => bytes,
        };

        if !ByteSize::from_bytes(end).is_sector_aligned() {
            return Err(LayoutConflict::at(
                &spec.token,
                format!("end {end} is not a multiple of the {SECTOR_SIZE}-byte sector"),
            ));
        }
        if end <= start {
            return Err(LayoutConflict::at(
                &spec.token,
                format!(
                    "ends at {} which is not after its start {}",
                    ByteSize::from_bytes(end),
                    ByteSize::from_bytes(start)
                ),
            ));
        }

        let extends_to_end = last && end == total;
        if extends_to_end {
            if start >= usable_end {
                return Err(LayoutConflict::at(
                    &spec.token,
                    format!(
                        "starts at {}, no room left before the {table_type} reserved area",
                        ByteSize::from_bytes(start)
                    ),
                ));
            }
        } else if end > usable_end {
            return Err(LayoutConflict::at(
                &spec.token,
                format!(
                    "ends at {} beyond the usable end {} of a {} image",
                    ByteSize::from_bytes(end),
                    ByteSize::from_bytes(usable_end),
                    ByteSize::from_bytes(total)
                ),
            ));
        }

        partitions.push(ResolvedPartition {
            index: position as u32,
            declared_index: spec.index,
            start_byte: start,
            end_byte: end,
            filesystem: spec.filesystem.clone(),
            bootable: position == 0,
            content: spec.content.clone(),
            parted_args: spec.parted_args.clone(),
            extends_to_end,
        });
        start = end;
    }

    let plan = LayoutPlan {
        table_type,
        total_size: total,
        partitions,
    };
    debug!(table = %plan.table_type, total = plan.total_size, count = plan.partitions.len(), "layout planned");
    Ok(plan)
}

fn resolve_table_type(specs: &[PartitionSpec]) -> Result<TableType, LayoutConflict> {
    let table_type = specs[0].table_type.unwrap_or_default();
    for spec in &specs[1..] {
        if let Some(declared) = spec.table_type
            && declared != table_type
        {
            return Err(LayoutConflict::at(
                &spec.token,
                format!("declares a {declared} table, the first partition set {table_type}"),
            ));
        }
    }
    Ok(table_type)
}

fn resolve_total_size(
    first: &PartitionSpec,
    specs: &[PartitionSpec],
    ends: &[EndBound],
    options: PlanOptions,
) -> Result<u64, LayoutConflict> {
    let declared = match (first.dd_size, options.image_size) {
        (Some(dd), Some(requested)) if dd != requested => {
            return Err(LayoutConflict::at(
                &first.token,
                format!("dd size {dd} differs from the requested image size {requested}"),
            ));
        }
        (dd, requested) => dd.or(requested),
    };
    if let Some(size) = declared {
        return Ok(size.bytes());
    }

    match ends.last() {
        Some(EndBound::Bytes(bytes)) => Ok(*bytes),
        _ => Err(LayoutConflict::at(
            specs.last().map(|spec| spec.token.as_str()).unwrap_or_default(),
            "image size cannot be determined: the last partition has no absolute end, \
             give 'dd <FULLSIZE>' on the first partition or an explicit size",
        )),
    }
}

fn end_bound(specs: &[PartitionSpec], position: usize, spec: &PartitionSpec) -> Result<EndBound, LayoutConflict> {
    match spec.form() {
        SpecForm::Short => match spec.end_position {
            Some(EndPosition::Absolute(size)) => Ok(EndBound::Bytes(size.bytes())),
            Some(EndPosition::Fill) => Ok(EndBound::Fill),
            None => Err(LayoutConflict::at(&spec.token, "missing end position")),
        },
        SpecForm::Long => {
            let token = mkpart_arguments(&spec.parted_args)
                .and_then(|args| args.last())
                .ok_or_else(|| LayoutConflict::at(&spec.token, "no mkpart end position"))?;
            let unit = bare_unit_at(specs, position)?;
            parse_end_token(token, unit).map_err(|reason| LayoutConflict::at(&spec.token, reason))
        }
    }
}

/// Meaning of a bare number at the `mkpart` of `specs[position]`, following
/// every `unit` command the combined parted script runs before it
fn bare_unit_at(specs: &[PartitionSpec], position: usize) -> Result<BareUnit, LayoutConflict> {
    let mut unit = BareUnit::Bytes(PARTED_DEFAULT_UNIT);
    for (current, spec) in specs.iter().enumerate().take(position + 1) {
        let args = &spec.parted_args;
        let limit = if current == position {
            args.iter().position(|arg| arg == "mkpart").unwrap_or(args.len())
        } else {
            args.len()
        };
        for window in args[..limit].windows(2) {
            if window[0] != "unit" {
                continue;
            }
            unit = match window[1].to_ascii_lowercase().as_str() {
                "%" => BareUnit::Percent,
                "s" => BareUnit::Sectors,
                "compact" => BareUnit::Bytes(PARTED_DEFAULT_UNIT),
                other => match unit_multiplier(other) {
                    Some(multiplier) => BareUnit::Bytes(multiplier),
                    None => {
                        return Err(LayoutConflict::at(
                            &spec.token,
                            format!("parted unit '{other}' is not supported"),
                        ));
                    }
                },
            };
        }
    }
    Ok(unit)
}

/// parted treats sector ends as inclusive; every other unit names the
/// exclusive end offset.
fn parse_end_token(token: &str, unit: BareUnit) -> Result<EndBound, String> {
    if token.starts_with('-') {
        return Err(format!("end '{token}' counts from the end of the disk, which is not supported"));
    }
    if token == "100%" {
        return Ok(EndBound::Fill);
    }

    let number_end = token
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(token.len());
    let (number, suffix) = token.split_at(number_end);
    let percent = suffix == "%" || (suffix.is_empty() && unit == BareUnit::Percent);
    if percent {
        let fraction = ByteSize::parse_parted_in(number, PERCENT_SCALE)
            .map_err(|error| error.to_string())?
            .bytes();
        return match fraction {
            f if f > 100 * PERCENT_SCALE => Err(format!("end '{token}' is beyond 100%")),
            f if f == 100 * PERCENT_SCALE => Ok(EndBound::Fill),
            f => Ok(EndBound::Percent(f)),
        };
    }

    let sectors = suffix.eq_ignore_ascii_case("s") || (suffix.is_empty() && unit == BareUnit::Sectors);
    let bare = match unit {
        BareUnit::Bytes(multiplier) => multiplier,
        BareUnit::Sectors | BareUnit::Percent => SECTOR_SIZE,
    };
    let bytes = ByteSize::parse_parted_in(token, bare)
        .map_err(|error| error.to_string())?
        .bytes();
    if sectors {
        bytes
            .checked_add(SECTOR_SIZE)
            .map(EndBound::Bytes)
            .ok_or_else(|| format!("end '{token}' is too large"))
    } else {
        Ok(EndBound::Bytes(bytes))
    }
}
