//! Date/time tools: current date lookup and simple date math, resolved
//! locally without touching the network.

use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate, Utc};
use serde_json::{json, Value};

use super::Tool;

pub struct GetDateTool;

#[async_trait]
impl Tool for GetDateTool {
    fn name(&self) -> &str {
        "get_date"
    }

    fn description(&self) -> &str {
        "Get the current date, time (UTC), and day of the week"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "get_date",
            "description": "Get the current date, time (UTC), and day of the week",
            "parameters": {
                "type": "object",
                "properties": {},
                "required": []
            }
        })
    }

    async fn call(&self, _arguments: &Value) -> anyhow::Result<String> {
        let now = Utc::now();
        Ok(format!(
            "Current date: {} ({}). Current time: {} UTC.",
            now.format("%Y-%m-%d"),
            now.weekday(),
            now.format("%H:%M:%S")
        ))
    }
}

pub struct DateMathTool;

#[async_trait]
impl Tool for DateMathTool {
    fn name(&self) -> &str {
        "date_math"
    }

    fn description(&self) -> &str {
        "Add days to a date, or compute the number of days between two dates"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "date_math",
            "description": "Add days to a date, or compute the number of days between two dates. \
                            Dates use YYYY-MM-DD.",
            "parameters": {
                "type": "object",
                "properties": {
                    "date": {"type": "string", "description": "Base date, YYYY-MM-DD"},
                    "add_days": {"type": "integer", "description": "Days to add (may be negative)"},
                    "until": {"type": "string", "description": "End date for a difference, YYYY-MM-DD"}
                },
                "required": ["date"]
            }
        })
    }

    async fn call(&self, arguments: &Value) -> anyhow::Result<String> {
        let Some(date_str) = arguments.get("date").and_then(|d| d.as_str()) else {
            return Ok("Missing required parameter 'date' (YYYY-MM-DD).".to_string());
        };
        let date = match NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
            Ok(d) => d,
            Err(_) => {
                return Ok(format!(
                    "Could not parse date '{}'. Use the YYYY-MM-DD format.",
                    date_str
                ))
            }
        };

        if let Some(until_str) = arguments.get("until").and_then(|u| u.as_str()) {
            let until = match NaiveDate::parse_from_str(until_str, "%Y-%m-%d") {
                Ok(d) => d,
                Err(_) => {
                    return Ok(format!(
                        "Could not parse date '{}'. Use the YYYY-MM-DD format.",
                        until_str
                    ))
                }
            };
            let days = (until - date).num_days();
            return Ok(format!("There are {} days between {} and {}.", days, date, until));
        }

        if let Some(add) = arguments.get("add_days").and_then(|a| a.as_i64()) {
            let result = date + Duration::days(add);
            return Ok(format!(
                "{} plus {} days is {} ({}).",
                date,
                add,
                result,
                result.weekday()
            ));
        }

        Ok(format!("{} is a {}.", date, date.weekday()))
    }
}
