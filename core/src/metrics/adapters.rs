//! Per-tool result adapters
//!
//! The only place that knows how each tool spells its metrics.

use std::collections::HashSet;

use serde_json::{Map, Value};

use super::{ResultError, ResultRecord};

type Object = Map<String, Value>;

/// RESTifAI: every field as a plain number, `time_duration` always present
pub(super) fn restifai(obj: &Object) -> Result<ResultRecord, ResultError> {
    let record = ResultRecord {
        successful_operations: count(obj, "successful_operations")?,
        server_errors: count(obj, "server_errors")?,
        total_tokens: count(obj, "total_tokens")?,
        total_cost: amount(obj, "total_cost")?,
        total_tests: count(obj, "total_tests")?,
        failed_tests: count(obj, "failed_tests")?,
        passed_tests: count(obj, "passed_tests")?,
        execution_time_secs: duration(obj)?,
    };
    if record.execution_time_secs.is_none() {
        tracing::warn!("RESTifAI result has no measured duration");
    }
    Ok(record)
}

/// AutoRestTest: writes `null` test counts; server errors may be a collection
pub(super) fn autoresttest(obj: &Object) -> Result<ResultRecord, ResultError> {
    Ok(ResultRecord {
        successful_operations: count(obj, "successful_operations")?,
        server_errors: distinct(obj, "server_errors")?,
        total_tokens: count(obj, "total_tokens")?,
        total_cost: amount(obj, "total_cost")?,
        total_tests: count(obj, "total_tests")?,
        failed_tests: count(obj, "failed_tests")?,
        passed_tests: None,
        execution_time_secs: duration(obj)?,
    })
}

/// LogiAgent: no duration field; `server_errors` accumulates endpoint lists
pub(super) fn logiagent(obj: &Object) -> Result<ResultRecord, ResultError> {
    Ok(ResultRecord {
        successful_operations: count(obj, "successful_operations")?,
        server_errors: distinct(obj, "server_errors")?,
        total_tokens: count(obj, "total_tokens")?,
        total_cost: amount(obj, "total_cost")?,
        total_tests: count(obj, "total_tests")?,
        failed_tests: count(obj, "failed_tests")?,
        passed_tests: count(obj, "passed_tests")?,
        execution_time_secs: seconds(obj, "execution_time")?,
    })
}

/// `time_duration`, else `execution_time`
pub(super) fn duration(obj: &Object) -> Result<Option<f64>, ResultError> {
    match seconds(obj, "time_duration")? {
        Some(secs) => Ok(Some(secs)),
        None => seconds(obj, "execution_time"),
    }
}

fn present<'a>(obj: &'a Object, field: &str) -> Option<&'a Value> {
    obj.get(field).filter(|value| !value.is_null())
}

fn count(obj: &Object, field: &'static str) -> Result<Option<u64>, ResultError> {
    let Some(value) = present(obj, field) else {
        return Ok(None);
    };
    let parsed = match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.map(Some).ok_or_else(|| ResultError::Field {
        field,
        reason: format!("expected a non-negative count, found {value}"),
    })
}

fn amount(obj: &Object, field: &'static str) -> Result<Option<f64>, ResultError> {
    let Some(value) = present(obj, field) else {
        return Ok(None);
    };
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_start_matches('$').parse().ok(),
        _ => None,
    };
    parsed
        .filter(|f| f.is_finite() && *f >= 0.0)
        .map(Some)
        .ok_or_else(|| ResultError::Field {
            field,
            reason: format!("expected a non-negative amount, found {value}"),
        })
}

fn seconds(obj: &Object, field: &'static str) -> Result<Option<f64>, ResultError> {
    amount(obj, field)
}

/// A count, or the number of distinct entries of a list or map
fn distinct(obj: &Object, field: &'static str) -> Result<Option<u64>, ResultError> {
    match present(obj, field) {
        Some(Value::Array(items)) => {
            let unique: HashSet<String> = items.iter().map(Value::to_string).collect();
            Ok(Some(unique.len() as u64))
        }
        Some(Value::Object(map)) => Ok(Some(map.len() as u64)),
        _ => count(obj, field),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Object {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_restifai_artifact() {
        let record = restifai(&object(json!({
            "successful_operations": 14,
            "server_errors": 2,
            "total_tokens": 182345,
            "total_cost": 0.42,
            "total_tests": 120,
            "failed_tests": 9,
            "time_duration": 1069
        })))
        .unwrap();
        assert_eq!(record.successful_operations, Some(14));
        assert_eq!(record.total_cost, Some(0.42));
        assert_eq!(record.execution_time_secs, Some(1069.0));
        assert_eq!(record.passed(), Some(111));
    }

    #[test]
    fn test_autoresttest_null_counts_stay_missing() {
        let record = autoresttest(&object(json!({
            "successful_operations": 7,
            "server_errors": 3,
            "total_tokens": 1000,
            "total_cost": 0.01,
            "total_tests": null,
            "failed_tests": null,
            "time_duration": 521
        })))
        .unwrap();
        assert_eq!(record.total_tests, None);
        assert_eq!(record.failed_tests, None);
        assert_eq!(record.error_rate(), None);
        assert_eq!(record.server_errors, Some(3));
    }

    #[test]
    fn test_logiagent_server_error_list_counted_once() {
        let record = logiagent(&object(json!({
            "successful_operations": 5,
            "server_errors": ["GET /a", "POST /b", "GET /a"],
            "total_tokens": 50,
            "total_cost": 0.0,
            "total_tests": 10,
            "failed_tests": 4,
            "time_duration": 99
        })))
        .unwrap();
        assert_eq!(record.server_errors, Some(2));
        assert_eq!(record.total_cost, Some(0.0));
        // LogiAgent never reports a duration of its own.
        assert_eq!(record.execution_time_secs, None);
    }

    #[test]
    fn test_absent_fields_are_none_not_zero() {
        let record = restifai(&object(json!({ "successful_operations": 1 }))).unwrap();
        assert_eq!(record.total_cost, None);
        assert_eq!(record.total_tokens, None);
        assert_eq!(record.server_errors, None);
    }

    #[test]
    fn test_numeric_strings_and_integral_floats_accepted() {
        let record = restifai(&object(json!({
            "successful_operations": "12",
            "total_tokens": 300.0,
            "total_cost": "$1.25"
        })))
        .unwrap();
        assert_eq!(record.successful_operations, Some(12));
        assert_eq!(record.total_tokens, Some(300));
        assert_eq!(record.total_cost, Some(1.25));
    }

    #[test]
    fn test_bad_field_is_an_error() {
        let err = restifai(&object(json!({ "total_tests": -3 }))).unwrap_err();
        assert!(matches!(err, ResultError::Field { field: "total_tests", .. }));

        let err = autoresttest(&object(json!({ "total_cost": true }))).unwrap_err();
        assert!(matches!(err, ResultError::Field { field: "total_cost", .. }));
    }
}
