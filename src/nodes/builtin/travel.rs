//! Request payloads for the travel-planning workers.

use chrono::Utc;
use serde_json::{Value, json};

use crate::engine::router::worker;
use crate::engine::types::TaskState;

pub const DEFAULT_CITY: &str = "台北";
pub const DEFAULT_ARRIVAL_TIME: &str = "17:00:00";
pub const DEFAULT_TRANSPORT_RESULTS: u64 = 3;

/// Builds a worker's request body from the task state.
pub type PayloadBuilder = fn(&TaskState) -> Value;

/// Payload builder for a travel worker, if it is one.
pub fn builder_for(worker_name: &str) -> Option<PayloadBuilder> {
    match worker_name {
        worker::WEATHER => Some(weather_request),
        worker::TRANSPORT => Some(transport_request),
        worker::SUMMARY => Some(summary_request),
        _ => None,
    }
}

/// `{city, date, time_range}` for the weather agent.
pub fn weather_request(state: &TaskState) -> Value {
    let req = &state.request_payload;
    let city = text(req, "destination")
        .or_else(|| text(req, "origin"))
        .unwrap_or(DEFAULT_CITY);
    json!({
        "city": city,
        "date": travel_date(req),
        "time_range": time_range(req),
    })
}

/// `{destination, arrival_time, date, results}` for the transport agent.
pub fn transport_request(state: &TaskState) -> Value {
    let req = &state.request_payload;
    let results = req
        .get("transport_results")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_TRANSPORT_RESULTS);
    json!({
        "destination": text(req, "destination").unwrap_or(DEFAULT_CITY),
        "arrival_time": normalize_arrival_time(text(req, "desired_arrival_time")),
        "date": travel_date(req),
        "results": results,
    })
}

/// `{task_id, user_requirement, weather_report, transport}` for the summary agent.
pub fn summary_request(state: &TaskState) -> Value {
    let req = &state.request_payload;
    let weather = state.results.get(worker::WEATHER).cloned().unwrap_or(Value::Null);
    let transport = state
        .results
        .get(worker::TRANSPORT)
        .cloned()
        .unwrap_or(Value::Null);

    let destination = text(req, "destination")
        .or_else(|| weather.get("city").and_then(Value::as_str))
        .unwrap_or(DEFAULT_CITY)
        .to_string();

    json!({
        "task_id": state.task_id,
        "user_requirement": {
            "origin": text(req, "origin").unwrap_or(DEFAULT_CITY),
            "destination": destination,
            "travel_date": travel_date(req),
            "desired_arrival_time": normalize_arrival_time(text(req, "desired_arrival_time")),
            "transport_note": req.get("transport_note").cloned().unwrap_or(Value::Null),
        },
        "weather_report": weather,
        "transport": transport,
    })
}

fn text<'a>(req: &'a Value, key: &str) -> Option<&'a str> {
    req.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// `travel_date`, else `date`, else today (UTC).
fn travel_date(req: &Value) -> String {
    text(req, "travel_date")
        .or_else(|| text(req, "date"))
        .map(str::to_string)
        .unwrap_or_else(|| Utc::now().date_naive().to_string())
}

fn time_range(req: &Value) -> String {
    if let Some(explicit) = text(req, "time_range") {
        return explicit.to_string();
    }

    let hour = text(req, "desired_arrival_time")
        .and_then(|t| t.split(':').next())
        .and_then(|h| h.trim().parse::<u32>().ok());
    let range = match hour {
        Some(h) if h < 12 => "上午",
        Some(h) if h < 18 => "下午",
        Some(_) => "晚上",
        None => "全天",
    };
    range.to_string()
}

fn normalize_arrival_time(value: Option<&str>) -> String {
    match value {
        None => DEFAULT_ARRIVAL_TIME.to_string(),
        Some(t) if t.split(':').count() == 2 => format!("{}:00", t),
        Some(t) => t.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::status;

    fn state(payload: Value) -> TaskState {
        TaskState::new("t1", "case-1", status::NEW, payload)
    }

    #[test]
    fn weather_uses_destination_and_date() {
        let body = weather_request(&state(json!({"destination": "Taipei", "date": "2024-07-01"})));
        assert_eq!(body["city"], "Taipei");
        assert_eq!(body["date"], "2024-07-01");
        assert_eq!(body["time_range"], "全天");
    }

    #[test]
    fn time_range_from_arrival_hour() {
        let at = |t: &str| time_range(&json!({"desired_arrival_time": t}));
        assert_eq!(at("09:30"), "上午");
        assert_eq!(at("12:00"), "下午");
        assert_eq!(at("17:59"), "下午");
        assert_eq!(at("18:00"), "晚上");
        assert_eq!(at("soon"), "全天");
    }

    #[test]
    fn travel_date_prefers_travel_date() {
        let req = json!({"travel_date": "2024-08-01", "date": "2024-07-01"});
        assert_eq!(travel_date(&req), "2024-08-01");
    }

    #[test]
    fn transport_defaults() {
        let body = transport_request(&state(json!({})));
        assert_eq!(body["destination"], DEFAULT_CITY);
        assert_eq!(body["arrival_time"], "17:00:00");
        assert_eq!(body["results"], 3);

        let body = transport_request(&state(json!({"desired_arrival_time": "08:15", "transport_results": 5})));
        assert_eq!(body["arrival_time"], "08:15:00");
        assert_eq!(body["results"], 5);
    }

    #[test]
    fn summary_collects_worker_results() {
        let mut s = state(json!({"destination": "Taipei"}));
        s.results.insert(worker::WEATHER.into(), json!({"city": "Taipei", "condition": "sunny"}));
        s.results.insert(worker::TRANSPORT.into(), json!({"plans": []}));

        let body = summary_request(&s);
        assert_eq!(body["task_id"], "t1");
        assert_eq!(body["user_requirement"]["destination"], "Taipei");
        assert_eq!(body["weather_report"]["condition"], "sunny");
        assert_eq!(body["transport"]["plans"], json!([]));
    }

    #[test]
    fn unknown_worker_has_no_builder() {
        assert!(builder_for("agent_z").is_none());
        assert!(builder_for(worker::SUMMARY).is_some());
    }
}
