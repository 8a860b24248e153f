//! Current time and timezone conversion tools
//!
//! Timezones are IANA names resolved through `chrono-tz`. Nothing is stored;
//! the only input besides the arguments is the wall clock.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, Offset, SecondsFormat, TimeZone, Utc};
use chrono_tz::{OffsetComponents, Tz};
use rust_mcp_sdk::{
    macros,
    schema::{CallToolResult, Tool},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{
    finish_tool_call, json_result, parse_arguments, CallerId, ToolError, ToolKind, ToolTable,
    Toolbox,
};
use crate::errors::AppError;

#[macros::mcp_tool(
    name = "get_current_time",
    description = "Get the current time in an IANA timezone, or in the server's local timezone"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct GetCurrentTimeTool {
    /// IANA timezone name, e.g. Europe/Warsaw
    pub timezone: Option<String>,
}

#[macros::mcp_tool(
    name = "convert_time",
    description = "Convert a wall-clock time between two IANA timezones"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct ConvertTimeTool {
    pub source_timezone: String,
    /// 24-hour HH:MM
    pub time: String,
    pub target_timezone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZonedTime {
    pub timezone: String,
    pub datetime: String,
    pub is_dst: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeConversion {
    pub source: ZonedTime,
    pub target: ZonedTime,
    pub time_difference: String,
}

pub fn parse_timezone(name: &str) -> Result<Tz, AppError> {
    name.trim().parse::<Tz>().map_err(|_| {
        AppError::invalid_params(
            "invalid_timezone",
            format!("unknown IANA timezone: {name}"),
        )
    })
}

fn zoned(at: DateTime<Tz>) -> ZonedTime {
    ZonedTime {
        timezone: at.timezone().name().to_string(),
        datetime: at.to_rfc3339_opts(SecondsFormat::Secs, false),
        is_dst: at.offset().dst_offset() != Duration::zero(),
    }
}

pub fn current_time(timezone: Tz, now: DateTime<Utc>) -> ZonedTime {
    zoned(now.with_timezone(&timezone))
}

/// Hours between two UTC offsets, e.g. `+5.0h`, `-3.5h`, `+5.75h`.
pub fn format_offset_difference(seconds: i32) -> String {
    let hours = f64::from(seconds) / 3600.0;
    if seconds % 3600 == 0 {
        return format!("{hours:+.1}h");
    }
    let formatted = format!("{hours:+.2}");
    format!("{}h", formatted.trim_end_matches('0').trim_end_matches('.'))
}

/// Interprets `time` on today's date in `source` and converts it to `target`.
pub fn convert_time(
    source: Tz,
    time: &str,
    target: Tz,
    now: DateTime<Utc>,
) -> Result<TimeConversion, ToolError> {
    let wall_clock = NaiveTime::parse_from_str(time.trim(), "%H:%M").map_err(|_| {
        AppError::invalid_params("invalid_time", "time must use 24-hour HH:MM format")
    })?;
    let date = now.with_timezone(&source).date_naive();

    let Some(source_time) = source
        .from_local_datetime(&date.and_time(wall_clock))
        .earliest()
    else {
        return Err(ToolError::soft(format!(
            "{time} does not exist in {} on {date}",
            source.name()
        )));
    };
    let target_time = source_time.with_timezone(&target);

    let difference = target_time.offset().fix().local_minus_utc()
        - source_time.offset().fix().local_minus_utc();

    Ok(TimeConversion {
        source: zoned(source_time),
        target: zoned(target_time),
        time_difference: format_offset_difference(difference),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeTool {
    GetCurrentTime,
    ConvertTime,
}

impl ToolKind for TimeTool {
    const ALL: &'static [Self] = &[Self::GetCurrentTime, Self::ConvertTime];

    fn descriptor(self) -> Tool {
        match self {
            Self::GetCurrentTime => GetCurrentTimeTool::tool(),
            Self::ConvertTime => ConvertTimeTool::tool(),
        }
    }
}

pub struct TimeToolbox {
    table: ToolTable<TimeTool>,
    local_timezone: Tz,
}

impl TimeToolbox {
    pub fn new(local_timezone: Tz) -> Result<Self, AppError> {
        Ok(Self {
            table: ToolTable::build()?,
            local_timezone,
        })
    }

    fn run(
        &self,
        tool: TimeTool,
        arguments: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<CallToolResult, ToolError> {
        match tool {
            TimeTool::GetCurrentTime => {
                let args: GetCurrentTimeTool = parse_arguments(arguments)?;
                let timezone = match args.timezone.as_deref() {
                    Some(name) if !name.trim().is_empty() => parse_timezone(name)?,
                    _ => self.local_timezone,
                };
                json_result(&current_time(timezone, now))
            }
            TimeTool::ConvertTime => {
                let args: ConvertTimeTool = parse_arguments(arguments)?;
                let source = parse_timezone(&args.source_timezone)?;
                let target = parse_timezone(&args.target_timezone)?;
                json_result(&convert_time(source, &args.time, target, now)?)
            }
        }
    }
}

#[async_trait]
impl Toolbox for TimeToolbox {
    fn tools(&self) -> &[Tool] {
        self.table.descriptors()
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        _caller: &CallerId,
    ) -> Result<CallToolResult, AppError> {
        let tool = self.table.resolve(name)?;
        finish_tool_call(self.run(tool, arguments, Utc::now()))
    }
}
