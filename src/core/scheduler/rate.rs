//! Rate and cron expression handling for schedule workers.

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RateError {
    #[error("invalid rate '{0}': expected '<count> <minutes|hours|days>'")]
    Malformed(String),
    #[error("invalid rate '{rate}': '{count}' is not a positive whole number")]
    InvalidCount { rate: String, count: String },
    #[error("invalid rate '{rate}': unsupported unit '{unit}', use minutes, hours or days")]
    UnsupportedUnit { rate: String, unit: String },
    #[error("invalid cron expression '{0}': expected 5 or 6 fields")]
    InvalidCron(String),
}

/// Translate a rate such as `"5 minutes"` into a five-field cron expression.
pub fn rate_to_cron(rate: &str) -> Result<String, RateError> {
    let parts: Vec<&str> = rate.split_whitespace().collect();
    let [count, unit] = parts.as_slice() else {
        return Err(RateError::Malformed(rate.to_string()));
    };

    let n: u32 = match count.parse() {
        Ok(n) if n > 0 => n,
        _ => {
            return Err(RateError::InvalidCount {
                rate: rate.to_string(),
                count: count.to_string(),
            });
        }
    };

    match unit.to_lowercase().as_str() {
        "minute" | "minutes" => Ok(format!("*/{} * * * *", n)),
        "hour" | "hours" => Ok(format!("0 */{} * * *", n)),
        "day" | "days" => Ok(format!("0 0 */{} * *", n)),
        _ => Err(RateError::UnsupportedUnit {
            rate: rate.to_string(),
            unit: unit.to_string(),
        }),
    }
}

/// Collapse whitespace and check the field count of a user cron expression.
pub fn normalize_cron(expr: &str) -> Result<String, RateError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.len() {
        5 | 6 => Ok(fields.join(" ")),
        _ => Err(RateError::InvalidCron(expr.to_string())),
    }
}

/// The cron engine wants a leading seconds field.
pub fn to_engine_expression(cron: &str) -> String {
    if cron.split_whitespace().count() == 5 {
        format!("0 {}", cron)
    } else {
        cron.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_translate_to_cron() {
        assert_eq!(rate_to_cron("45 minutes").unwrap(), "*/45 * * * *");
        assert_eq!(rate_to_cron("6 hours").unwrap(), "0 */6 * * *");
        assert_eq!(rate_to_cron("3 days").unwrap(), "0 0 */3 * *");
        assert_eq!(rate_to_cron("1 minute").unwrap(), "*/1 * * * *");
        assert_eq!(rate_to_cron("  2   Hours ").unwrap(), "0 */2 * * *");
    }

    #[test]
    fn bad_rates_are_rejected() {
        assert!(matches!(rate_to_cron("x"), Err(RateError::Malformed(_))));
        assert!(matches!(
            rate_to_cron("45 fortnights"),
            Err(RateError::UnsupportedUnit { .. })
        ));
        assert!(matches!(
            rate_to_cron("five minutes"),
            Err(RateError::InvalidCount { .. })
        ));
        assert!(matches!(
            rate_to_cron("0 minutes"),
            Err(RateError::InvalidCount { .. })
        ));
        assert!(rate_to_cron("").is_err());
    }

    #[test]
    fn error_messages_name_the_input() {
        let err = rate_to_cron("45 fortnights").unwrap_err();
        assert!(err.to_string().contains("fortnights"));
    }

    #[test]
    fn cron_field_count_is_checked() {
        assert_eq!(normalize_cron("0  1 * * *").unwrap(), "0 1 * * *");
        assert!(normalize_cron("* * *").is_err());
        assert_eq!(to_engine_expression("0 1 * * *"), "0 0 1 * * *");
        assert_eq!(to_engine_expression("30 0 1 * * *"), "30 0 1 * * *");
    }
}
