//! Localization of notification text to the recipient's locale.

use beacon_core::{Principal, ProcessError, SystemEvent, SystemEventType};
use serde_json::Value;

use super::EventProcessor;

/// Fields of a notification payload that may carry translations.
const LOCALIZED_FIELDS: [&str; 2] = ["title", "message"];

/// Key holding the fallback text in a translation map.
const DEFAULT_KEY: &str = "default";

/// Rewrites `data.title` and `data.message` for the recipient.
///
/// A field may be plain text (left alone) or a translation map:
///
/// ```json
/// { "default": "Site saved", "es": "Sitio guardado", "es_MX": "Sitio guardado" }
/// ```
///
/// Lookup order is the full locale tag, then its language subtag, then
/// `default`. Tags compare case-insensitively with `-` and `_` treated alike.
/// A map with no usable entry is an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotificationProcessor;

impl EventProcessor for NotificationProcessor {
    fn process(
        &self,
        event: &SystemEvent,
        principal: Option<&Principal>,
    ) -> Result<SystemEvent, ProcessError> {
        let Some(payload) = &event.payload else {
            return Ok(event.clone());
        };
        let locale = principal.and_then(|p| p.locale.as_deref());

        let mut payload = payload.clone();
        if let Value::Object(data) = &mut payload.data {
            for field in LOCALIZED_FIELDS {
                let Some(Value::Object(translations)) = data.get(field) else {
                    continue;
                };
                let text = pick_translation(translations, locale).ok_or_else(|| {
                    ProcessError::new(
                        SystemEventType::Notification,
                        format!("no translation of `{field}` for {}", locale.unwrap_or(DEFAULT_KEY)),
                    )
                })?;
                let _ = data.insert(field.to_string(), Value::String(text));
            }
        }
        Ok(event.with_payload(payload))
    }
}

fn normalize(tag: &str) -> String {
    tag.trim().replace('-', "_").to_ascii_lowercase()
}

fn pick_translation(
    translations: &serde_json::Map<String, Value>,
    locale: Option<&str>,
) -> Option<String> {
    let lookup = |wanted: &str| {
        translations
            .iter()
            .find(|(key, _)| normalize(key) == wanted)
            .and_then(|(_, value)| value.as_str())
    };

    let mut candidates = Vec::with_capacity(3);
    if let Some(locale) = locale.map(normalize).filter(|l| !l.is_empty()) {
        if let Some((language, _)) = locale.split_once('_') {
            let language = language.to_string();
            candidates.push(locale);
            candidates.push(language);
        } else {
            candidates.push(locale);
        }
    }
    candidates.push(DEFAULT_KEY.to_string());

    candidates
        .iter()
        .find_map(|candidate| lookup(candidate.as_str()))
        .map(str::to_string)
}
