use serde::Serialize;
use serde_json::Value;

/// Field names the upstream has been seen using for each piece of contact
/// data, first match wins.
pub const FIELD_ALIASES: &[(&str, &[&str])] = &[
    ("name", &["name", "contact_name", "caller_name", "display_name", "full_name"]),
    ("carrier", &["carrier", "operator", "network", "provider", "carrier_name"]),
    ("location", &["country", "region", "city", "location", "address"]),
    ("phone_type", &["type", "phone_type", "number_type", "category"]),
    ("is_spam", &["spam", "is_spam", "spam_score", "reported_as_spam"]),
    ("country_code", &["country_code", "country_id", "cc"]),
];

/// Containers the upstream sometimes wraps the contact object in.
const NESTED_FIELDS: &[&str] = &["contact", "caller", "number_info", "phone_data"];

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ContactInfo {
    pub name: Option<String>,
    pub carrier: Option<String>,
    pub location: Option<String>,
    pub phone_type: Option<String>,
    pub is_spam: bool,
    pub country_code: Option<String>,
}

impl ContactInfo {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.carrier.is_none()
            && self.location.is_none()
            && self.phone_type.is_none()
            && !self.is_spam
            && self.country_code.is_none()
    }
}

/// The upstream signals success in several body shapes. Any of the
/// observed patterns counts, but only on an HTTP 200.
pub fn determine_success(http_status: u16, body: &Value) -> bool {
    if http_status != 200 {
        return false;
    }

    let status = body.get("status");
    let code = body.get("code").and_then(Value::as_i64);

    let status_true = status.and_then(Value::as_bool) == Some(true);
    let status_success = status.and_then(Value::as_str) == Some("success");
    let code_with_data = code == Some(200) && body.get("data").is_some();
    let msg_success = body
        .get("msg")
        .and_then(Value::as_str)
        .is_some_and(|m| m.to_lowercase().contains("success"));

    status_true || status_success || code_with_data || msg_success
}

fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "0" && s.to_lowercase() != "false",
        _ => false,
    }
}

fn alias_lookup<'a>(obj: &'a serde_json::Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .find_map(|alias| obj.get(*alias).filter(|v| !v.is_null()))
}

fn extract_flat(obj: &serde_json::Map<String, Value>) -> ContactInfo {
    let mut info = ContactInfo::default();
    for (target, aliases) in FIELD_ALIASES {
        let Some(value) = alias_lookup(obj, aliases) else {
            continue;
        };
        match *target {
            "name" => info.name = stringify(value),
            "carrier" => info.carrier = stringify(value),
            "location" => info.location = stringify(value),
            "phone_type" => info.phone_type = stringify(value),
            "is_spam" => info.is_spam = truthy(value),
            "country_code" => info.country_code = stringify(value),
            _ => {}
        }
    }
    info
}

fn merge(base: &mut ContactInfo, other: ContactInfo) {
    if base.name.is_none() {
        base.name = other.name;
    }
    if base.carrier.is_none() {
        base.carrier = other.carrier;
    }
    if base.location.is_none() {
        base.location = other.location;
    }
    if base.phone_type.is_none() {
        base.phone_type = other.phone_type;
    }
    if !base.is_spam {
        base.is_spam = other.is_spam;
    }
    if base.country_code.is_none() {
        base.country_code = other.country_code;
    }
}

/// Walk the `data` payload for contact fields. Lists contribute their first
/// element; known wrapper objects are descended one level.
pub fn extract_contact(data: &Value) -> Option<ContactInfo> {
    match data {
        Value::Array(items) => items.first().and_then(extract_contact),
        Value::Object(obj) => {
            let mut info = extract_flat(obj);
            for nested in NESTED_FIELDS {
                if let Some(Value::Object(inner)) = obj.get(*nested) {
                    merge(&mut info, extract_flat(inner));
                }
            }
            (!info.is_empty()).then_some(info)
        }
        _ => None,
    }
}

/// Best-effort error text: known message fields first, then canned HTTP
/// status descriptions.
pub fn extract_error_message(body: &Value, http_status: u16) -> String {
    for field in ["msg", "message", "error", "error_message", "detail"] {
        if let Some(text) = body.get(field).and_then(Value::as_str) {
            if !text.is_empty() {
                return text.to_string();
            }
        }
    }

    match http_status {
        400 => "Bad Request".into(),
        401 => "Unauthorized".into(),
        403 => "Forbidden".into(),
        404 => "Not Found".into(),
        429 => "Rate Limited".into(),
        500 => "Server Error".into(),
        502 => "Bad Gateway".into(),
        503 => "Service Unavailable".into(),
        other => format!("HTTP {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_requires_http_200() {
        let body = json!({"status": true, "code": 200});
        assert!(determine_success(200, &body));
        assert!(!determine_success(403, &body));
    }

    #[test]
    fn success_pattern_matrix() {
        assert!(determine_success(200, &json!({"status": true})));
        assert!(determine_success(200, &json!({"status": "success"})));
        assert!(determine_success(200, &json!({"code": 200, "data": {}})));
        assert!(determine_success(200, &json!({"msg": "Operation Successful"})));
        assert!(!determine_success(200, &json!({"status": false, "msg": "not found"})));
        assert!(!determine_success(200, &json!({"code": 200})));
    }

    #[test]
    fn extracts_aliased_fields() {
        let data = json!({
            "caller_name": "Ahmed",
            "operator": "Zain",
            "cc": "964",
            "spam": 1
        });
        let info = extract_contact(&data).unwrap();
        assert_eq!(info.name.as_deref(), Some("Ahmed"));
        assert_eq!(info.carrier.as_deref(), Some("Zain"));
        assert_eq!(info.country_code.as_deref(), Some("964"));
        assert!(info.is_spam);
    }

    #[test]
    fn list_takes_first_element() {
        let data = json!([{"name": "First"}, {"name": "Second"}]);
        let info = extract_contact(&data).unwrap();
        assert_eq!(info.name.as_deref(), Some("First"));
    }

    #[test]
    fn descends_into_known_wrappers() {
        let data = json!({"contact": {"display_name": "Nested", "carrier": "Asiacell"}});
        let info = extract_contact(&data).unwrap();
        assert_eq!(info.name.as_deref(), Some("Nested"));
        assert_eq!(info.carrier.as_deref(), Some("Asiacell"));
    }

    #[test]
    fn top_level_fields_win_over_nested() {
        let data = json!({
            "name": "Outer",
            "caller": {"name": "Inner", "carrier": "Korek"}
        });
        let info = extract_contact(&data).unwrap();
        assert_eq!(info.name.as_deref(), Some("Outer"));
        assert_eq!(info.carrier.as_deref(), Some("Korek"));
    }

    #[test]
    fn empty_objects_yield_nothing() {
        assert_eq!(extract_contact(&json!({})), None);
        assert_eq!(extract_contact(&json!({"unrelated": "x"})), None);
        assert_eq!(extract_contact(&json!("plain string")), None);
    }

    #[test]
    fn error_message_fallbacks() {
        assert_eq!(
            extract_error_message(&json!({"msg": "bad token"}), 401),
            "bad token"
        );
        assert_eq!(extract_error_message(&json!({}), 429), "Rate Limited");
        assert_eq!(extract_error_message(&json!({}), 418), "HTTP 418");
    }
}
