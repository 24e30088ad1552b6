//! Request/response transformation (spec §4.7's "Request Transformation"/"Response
//! Transformation" pipeline steps), grounded on
//! `original_source/.../gateway/transformation.py`'s `HeaderTransformer`/
//! `QueryParamTransformer`/`BodyTransformer`/`PathTransformer`/
//! `ContentTypeTransformer`/`TransformationEngine`.

use crate::route::{RequestContext, ResponseContext};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Which part of a request/response a [`Rule`] applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformType {
    /// A single header.
    Header,
    /// A single query parameter (request-only).
    QueryParam,
    /// The parsed body (JSON dot-path, or flat form-encoded keys).
    Body,
    /// The request path (request-only).
    Path,
    /// Conversion between body content types (JSON/XML/form).
    ContentType,
}

/// Which direction(s) of the pipeline a rule runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Request-direction only.
    Request,
    /// Response-direction only.
    Response,
    /// Both directions.
    Both,
}

impl Direction {
    fn applies_to(self, wanted: Direction) -> bool {
        self == wanted || self == Direction::Both
    }
}

/// What a rule does to the matched field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Overwrite (or create) `target` with `value`.
    Set,
    /// Append to an existing header value (header rules only), comma-joined.
    Add,
    /// Delete `target`.
    Remove,
    /// Move `source`'s value to `target`, dropping `source` unless
    /// `preserve_original` is set.
    Rename,
    /// Regex-replace `source`'s value, writing the result to `target` (or back to
    /// `source` if `target` is unset).
    Map,
}

/// A body format a [`TransformType::ContentType`] rule can convert between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    /// `application/json`.
    Json,
    /// `application/xml` / `text/xml`.
    Xml,
    /// `application/x-www-form-urlencoded`.
    FormData,
    /// Anything else; passed through unchanged.
    Text,
}

fn detect_format(content_type: &str) -> BodyFormat {
    let lower = content_type.to_lowercase();
    if lower.contains("json") {
        BodyFormat::Json
    } else if lower.contains("xml") {
        BodyFormat::Xml
    } else if lower.contains("form") {
        BodyFormat::FormData
    } else {
        BodyFormat::Text
    }
}

/// A single ordered transformation rule (spec §4.7 `TransformationRule`).
#[derive(Debug, Clone)]
pub struct Rule {
    /// Human-readable name, for logging.
    pub name: String,
    /// Which field this rule targets.
    pub transform_type: TransformType,
    /// Which pipeline direction(s) this rule runs in.
    pub direction: Direction,
    /// What to do to the field.
    pub action: Action,
    /// Source field name/dot-path, for `Rename`/`Map`.
    pub source: Option<String>,
    /// Target field name/dot-path, for `Set`/`Add`/`Remove`/`Rename`. For
    /// `ContentType` rules, `source`/`target` instead hold content-type strings.
    pub target: Option<String>,
    /// Literal value to write, for `Set`/`Add`.
    pub value: Option<Value>,
    /// For `Rename`: keep `source` alongside the new `target` instead of moving it.
    pub preserve_original: bool,
    /// For `Map`: whether `regex_pattern` is matched case-sensitively.
    pub case_sensitive: bool,
    /// Regex pattern, for `Map`.
    pub regex_pattern: Option<String>,
    /// Replacement text (regex capture references allowed), for `Map`.
    pub replacement: Option<String>,
    /// Higher runs first among rules of the same [`TransformType`].
    pub priority: i32,
}

impl Rule {
    /// A rule with every optional field unset; priority 0, case-sensitive.
    #[must_use]
    pub fn new(name: impl Into<String>, transform_type: TransformType, direction: Direction, action: Action) -> Self {
        Self {
            name: name.into(),
            transform_type,
            direction,
            action,
            source: None,
            target: None,
            value: None,
            preserve_original: false,
            case_sensitive: true,
            regex_pattern: None,
            replacement: None,
            priority: 0,
        }
    }
}

/// Errors raised while applying a [`Rule`].
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// Body wasn't valid JSON where JSON was expected.
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
    /// Body wasn't well-formed XML where XML was expected.
    #[error("invalid XML body: {0}")]
    Xml(String),
    /// A rule's `regex_pattern` failed to compile.
    #[error("invalid regex pattern: {0}")]
    Regex(#[from] regex::Error),
    /// Body wasn't valid `application/x-www-form-urlencoded` data.
    #[error("invalid urlencoded body: {0}")]
    UrlEncoding(String),
    /// No converter exists between the two formats (e.g. XML to form data).
    #[error("cannot convert body from {from:?} to {to:?}")]
    UnsupportedConversion {
        /// Source format.
        from: BodyFormat,
        /// Target format.
        to: BodyFormat,
    },
}

/// Tuning knobs for the [`TransformEngine`] as a whole.
#[derive(Debug, Clone)]
pub struct TransformConfig {
    /// Master on/off switch; when `false`, both `transform_*` methods are no-ops.
    pub enabled: bool,
    /// When a rule errors, propagate instead of logging and continuing with
    /// whatever was already applied.
    pub fail_on_error: bool,
    /// Emit a `tracing::info!` summarizing rule counts after each transform.
    pub log_transformations: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self { enabled: true, fail_on_error: false, log_transformations: false }
    }
}

/// Applies an ordered set of [`Rule`]s to requests and responses (spec §4.7).
pub struct TransformEngine {
    config: TransformConfig,
    rules: Vec<Rule>,
}

impl TransformEngine {
    /// Builds an engine with no rules yet.
    #[must_use]
    pub fn new(config: TransformConfig) -> Self {
        Self { config, rules: Vec::new() }
    }

    /// Adds a rule, keeping `rules` sorted by descending priority (ties keep
    /// insertion order, since `sort_by` is stable).
    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Adds several rules at once.
    pub fn add_rules(&mut self, rules: impl IntoIterator<Item = Rule>) {
        self.rules.extend(rules);
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    fn rules_for(&self, transform_type: TransformType, direction: Direction) -> impl Iterator<Item = &Rule> {
        self.rules
            .iter()
            .filter(move |r| r.transform_type == transform_type && r.direction.applies_to(direction))
    }

    /// Applies every request-direction rule, in the order header → query param →
    /// path → content-type → body.
    ///
    /// # Errors
    /// Returns an error only when a rule fails and `fail_on_error` is set;
    /// otherwise failures are logged and the request is left as far-transformed as
    /// it got.
    pub fn transform_request(&self, request: &mut RequestContext) -> Result<(), TransformError> {
        if !self.config.enabled {
            return Ok(());
        }
        match self.apply_request(request) {
            Ok(()) => {
                if self.config.log_transformations {
                    tracing::info!(rules = self.rules.len(), "transformed request");
                }
                Ok(())
            }
            Err(e) if self.config.fail_on_error => Err(e),
            Err(e) => {
                tracing::error!(error = %e, "error transforming request");
                Ok(())
            }
        }
    }

    fn apply_request(&self, request: &mut RequestContext) -> Result<(), TransformError> {
        for rule in self.rules_for(TransformType::Header, Direction::Request) {
            apply_header_rule(rule, &mut request.headers)?;
        }
        for rule in self.rules_for(TransformType::QueryParam, Direction::Request) {
            apply_query_rule(rule, &mut request.query_params);
        }
        for rule in self.rules_for(TransformType::Path, Direction::Request) {
            apply_path_rule(rule, &mut request.path)?;
        }
        let content_type_rules: Vec<&Rule> = self.rules_for(TransformType::ContentType, Direction::Request).collect();
        for rule in content_type_rules {
            apply_content_type_rule(rule, &mut request.body, &mut request.headers)?;
        }
        let body_rules: Vec<&Rule> = self.rules_for(TransformType::Body, Direction::Request).collect();
        apply_body_rules(&body_rules, &mut request.body, &request.headers)?;
        Ok(())
    }

    /// Applies every response-direction rule, in the order content-type → body →
    /// header.
    ///
    /// # Errors
    /// Returns an error only when a rule fails and `fail_on_error` is set.
    pub fn transform_response(&self, response: &mut ResponseContext) -> Result<(), TransformError> {
        if !self.config.enabled {
            return Ok(());
        }
        match self.apply_response(response) {
            Ok(()) => {
                if self.config.log_transformations {
                    tracing::info!(rules = self.rules.len(), "transformed response");
                }
                Ok(())
            }
            Err(e) if self.config.fail_on_error => Err(e),
            Err(e) => {
                tracing::error!(error = %e, "error transforming response");
                Ok(())
            }
        }
    }

    fn apply_response(&self, response: &mut ResponseContext) -> Result<(), TransformError> {
        let content_type_rules: Vec<&Rule> = self.rules_for(TransformType::ContentType, Direction::Response).collect();
        for rule in content_type_rules {
            apply_content_type_rule(rule, &mut response.body, &mut response.headers)?;
        }
        let body_rules: Vec<&Rule> = self.rules_for(TransformType::Body, Direction::Response).collect();
        apply_body_rules(&body_rules, &mut response.body, &response.headers)?;
        for rule in self.rules_for(TransformType::Header, Direction::Response) {
            apply_header_rule(rule, &mut response.headers)?;
        }
        Ok(())
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compiled_regex(pattern: &str, case_sensitive: bool) -> Result<Regex, TransformError> {
    let pattern = if case_sensitive { pattern.to_string() } else { format!("(?i){pattern}") };
    Ok(Regex::new(&pattern)?)
}

fn apply_header_rule(rule: &Rule, headers: &mut HashMap<String, String>) -> Result<(), TransformError> {
    match rule.action {
        Action::Set => {
            if let (Some(target), Some(value)) = (&rule.target, &rule.value) {
                headers.insert(target.clone(), value_to_string(value));
            }
        }
        Action::Add => {
            if let (Some(target), Some(value)) = (&rule.target, &rule.value) {
                let addition = value_to_string(value);
                headers
                    .entry(target.clone())
                    .and_modify(|existing| *existing = format!("{existing}, {addition}"))
                    .or_insert(addition);
            }
        }
        Action::Remove => {
            if let Some(target) = &rule.target {
                headers.remove(target);
            }
        }
        Action::Rename => {
            if let (Some(source), Some(target)) = (&rule.source, &rule.target) {
                let existing = if rule.preserve_original { headers.get(source).cloned() } else { headers.remove(source) };
                if let Some(value) = existing {
                    headers.insert(target.clone(), value);
                }
            }
        }
        Action::Map => {
            if let Some(source) = &rule.source {
                if let Some(original) = headers.get(source).cloned() {
                    if let (Some(pattern), Some(replacement)) = (&rule.regex_pattern, &rule.replacement) {
                        let re = compiled_regex(pattern, rule.case_sensitive)?;
                        let new_value = re.replace_all(&original, replacement.as_str()).into_owned();
                        let target = rule.target.clone().unwrap_or_else(|| source.clone());
                        headers.insert(target, new_value);
                    }
                }
            }
        }
    }
    Ok(())
}

fn apply_query_rule(rule: &Rule, params: &mut HashMap<String, String>) {
    match rule.action {
        Action::Set => {
            if let (Some(target), Some(value)) = (&rule.target, &rule.value) {
                params.insert(target.clone(), value_to_string(value));
            }
        }
        Action::Remove => {
            if let Some(target) = &rule.target {
                params.remove(target);
            }
        }
        Action::Rename => {
            if let (Some(source), Some(target)) = (&rule.source, &rule.target) {
                let existing = if rule.preserve_original { params.get(source).cloned() } else { params.remove(source) };
                if let Some(value) = existing {
                    params.insert(target.clone(), value);
                }
            }
        }
        Action::Add | Action::Map => {}
    }
}

fn apply_path_rule(rule: &Rule, path: &mut String) -> Result<(), TransformError> {
    match rule.action {
        Action::Set => {
            if let Some(value) = &rule.value {
                *path = value_to_string(value);
            }
        }
        Action::Map => {
            if let (Some(pattern), Some(replacement)) = (&rule.regex_pattern, &rule.replacement) {
                let re = compiled_regex(pattern, rule.case_sensitive)?;
                *path = re.replace_all(path, replacement.as_str()).into_owned();
            }
        }
        Action::Add | Action::Remove | Action::Rename => {}
    }
    Ok(())
}

fn apply_content_type_rule(
    rule: &Rule,
    body: &mut Option<String>,
    headers: &mut HashMap<String, String>,
) -> Result<(), TransformError> {
    let (Some(source_ct), Some(target_ct)) = (&rule.source, &rule.target) else { return Ok(()) };
    let Some(raw) = body.as_ref() else { return Ok(()) };

    let source_format = detect_format(source_ct);
    let target_format = detect_format(target_ct);
    if source_format == target_format {
        return Ok(());
    }

    let converted = convert_body_format(raw, source_format, target_format)?;
    *body = Some(converted);
    headers.insert("Content-Type".to_string(), target_ct.clone());
    Ok(())
}

fn convert_body_format(raw: &str, from: BodyFormat, to: BodyFormat) -> Result<String, TransformError> {
    match (from, to) {
        (BodyFormat::Json, BodyFormat::Xml) => {
            let value: Value = serde_json::from_str(raw)?;
            value_to_xml(&value)
        }
        (BodyFormat::Xml, BodyFormat::Json) => {
            let value = xml_to_value(raw)?;
            Ok(serde_json::to_string(&value)?)
        }
        (BodyFormat::Json, BodyFormat::FormData) => {
            let value: Value = serde_json::from_str(raw)?;
            let Value::Object(map) = value else {
                return Err(TransformError::UnsupportedConversion { from, to });
            };
            let pairs: Vec<(String, String)> = map.into_iter().map(|(k, v)| (k, value_to_string(&v))).collect();
            serde_urlencoded::to_string(pairs).map_err(|e| TransformError::UrlEncoding(e.to_string()))
        }
        (BodyFormat::FormData, BodyFormat::Json) => {
            let pairs: Vec<(String, String)> =
                serde_urlencoded::from_str(raw).map_err(|e| TransformError::UrlEncoding(e.to_string()))?;
            let map: Map<String, Value> = pairs.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
            Ok(serde_json::to_string(&Value::Object(map))?)
        }
        _ => Err(TransformError::UnsupportedConversion { from, to }),
    }
}

enum BodyValue {
    Json(Value),
    Form(HashMap<String, String>),
    /// XML or unrecognized content; dot-path body rules are a no-op against it,
    /// matching the `isinstance(data, dict)` guards in the source this is
    /// grounded on.
    Opaque(String),
}

fn parse_body(raw: &str, content_type: &str) -> Result<BodyValue, TransformError> {
    match detect_format(content_type) {
        BodyFormat::Json => Ok(BodyValue::Json(serde_json::from_str(raw)?)),
        BodyFormat::FormData => {
            let pairs: Vec<(String, String)> =
                serde_urlencoded::from_str(raw).map_err(|e| TransformError::UrlEncoding(e.to_string()))?;
            Ok(BodyValue::Form(pairs.into_iter().collect()))
        }
        BodyFormat::Xml | BodyFormat::Text => Ok(BodyValue::Opaque(raw.to_string())),
    }
}

fn serialize_body(value: &BodyValue) -> Result<String, TransformError> {
    match value {
        BodyValue::Json(v) => Ok(serde_json::to_string(v)?),
        BodyValue::Form(m) => {
            serde_urlencoded::to_string(m).map_err(|e| TransformError::UrlEncoding(e.to_string()))
        }
        BodyValue::Opaque(s) => Ok(s.clone()),
    }
}

fn apply_body_rules(rules: &[&Rule], body: &mut Option<String>, headers: &HashMap<String, String>) -> Result<(), TransformError> {
    if rules.is_empty() {
        return Ok(());
    }
    let Some(raw) = body.as_ref() else { return Ok(()) };

    let content_type = headers.get("Content-Type").map(String::as_str).unwrap_or("");
    let mut parsed = parse_body(raw, content_type)?;
    for rule in rules {
        match &mut parsed {
            BodyValue::Json(v) => apply_body_rule_json(rule, v)?,
            BodyValue::Form(m) => apply_body_rule_form(rule, m),
            BodyValue::Opaque(_) => {}
        }
    }
    *body = Some(serialize_body(&parsed)?);
    Ok(())
}

fn apply_body_rule_json(rule: &Rule, value: &mut Value) -> Result<(), TransformError> {
    match rule.action {
        Action::Set => {
            if let (Some(target), Some(new_value)) = (&rule.target, rule.value.clone()) {
                set_nested(value, target, new_value);
            }
        }
        Action::Remove => {
            if let Some(target) = &rule.target {
                remove_nested(value, target);
            }
        }
        Action::Rename => {
            if let (Some(source), Some(target)) = (&rule.source, &rule.target) {
                if let Some(found) = get_nested(value, source).cloned() {
                    if !rule.preserve_original {
                        remove_nested(value, source);
                    }
                    set_nested(value, target, found);
                }
            }
        }
        Action::Map => {
            if let Some(source) = &rule.source {
                if let Some(found) = get_nested(value, source).cloned() {
                    if let (Some(pattern), Some(replacement)) = (&rule.regex_pattern, &rule.replacement) {
                        let re = compiled_regex(pattern, rule.case_sensitive)?;
                        let original = value_to_string(&found);
                        let new_value = re.replace_all(&original, replacement.as_str()).into_owned();
                        let target = rule.target.clone().unwrap_or_else(|| source.clone());
                        set_nested(value, &target, Value::String(new_value));
                    }
                }
            }
        }
        Action::Add => {}
    }
    Ok(())
}

fn apply_body_rule_form(rule: &Rule, map: &mut HashMap<String, String>) {
    match rule.action {
        Action::Set => {
            if let (Some(target), Some(value)) = (&rule.target, &rule.value) {
                map.insert(target.clone(), value_to_string(value));
            }
        }
        Action::Remove => {
            if let Some(target) = &rule.target {
                map.remove(target);
            }
        }
        Action::Rename => {
            if let (Some(source), Some(target)) = (&rule.source, &rule.target) {
                let existing = if rule.preserve_original { map.get(source).cloned() } else { map.remove(source) };
                if let Some(value) = existing {
                    map.insert(target.clone(), value);
                }
            }
        }
        Action::Add | Action::Map => {}
    }
}

fn get_nested<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, key| current.get(key))
}

fn set_nested(value: &mut Value, path: &str, new_value: Value) {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    let mut keys = path.split('.').peekable();
    let mut current = value;
    while let Some(key) = keys.next() {
        if keys.peek().is_none() {
            if let Value::Object(map) = current {
                map.insert(key.to_string(), new_value);
            }
            return;
        }
        let Value::Object(map) = current else { return };
        current = map.entry(key.to_string()).or_insert_with(|| Value::Object(Map::new()));
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
    }
}

fn remove_nested(value: &mut Value, path: &str) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(last) = parts.pop() else { return };
    let mut current = value;
    for key in parts {
        let Some(next) = current.get_mut(key) else { return };
        current = next;
    }
    if let Value::Object(map) = current {
        map.remove(last);
    }
}

fn xml_err(e: quick_xml::Error) -> TransformError {
    TransformError::Xml(e.to_string())
}

/// Parses an XML document into a [`Value`], mirroring
/// `ContentTypeTransformer._xml_to_dict`: attributes become object keys, repeated
/// child tags become arrays, and a leaf element's text becomes a plain string (or
/// the `"_text"` key, if the element also has attributes/children).
fn xml_to_value(xml: &str) -> Result<Value, TransformError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) => {
                let attrs = parse_attrs(&e)?;
                return parse_element(&mut reader, &mut buf, attrs);
            }
            Event::Empty(e) => {
                let attrs = parse_attrs(&e)?;
                return Ok(if attrs.is_empty() { Value::String(String::new()) } else { Value::Object(attrs) });
            }
            Event::Eof => return Err(TransformError::Xml("empty document".to_string())),
            _ => {}
        }
    }
}

fn parse_attrs(start: &BytesStart) -> Result<Map<String, Value>, TransformError> {
    let mut attrs = Map::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| TransformError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(xml_err)?.into_owned();
        attrs.insert(key, Value::String(value));
    }
    Ok(attrs)
}

fn insert_tag(object: &mut Map<String, Value>, name: String, value: Value) {
    match object.get_mut(&name) {
        Some(existing) => {
            if let Value::Array(arr) = existing {
                arr.push(value);
            } else {
                let previous = std::mem::take(existing);
                *existing = Value::Array(vec![previous, value]);
            }
        }
        None => {
            object.insert(name, value);
        }
    }
}

fn parse_element(reader: &mut Reader<&[u8]>, buf: &mut Vec<u8>, mut object: Map<String, Value>) -> Result<Value, TransformError> {
    let mut text = String::new();
    loop {
        buf.clear();
        match reader.read_event_into(buf).map_err(xml_err)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let attrs = parse_attrs(&e)?;
                let child = parse_element(reader, buf, attrs)?;
                insert_tag(&mut object, name, child);
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let attrs = parse_attrs(&e)?;
                let value = if attrs.is_empty() { Value::String(String::new()) } else { Value::Object(attrs) };
                insert_tag(&mut object, name, value);
            }
            Event::Text(e) => {
                text.push_str(e.unescape().map_err(xml_err)?.as_ref());
            }
            Event::CData(e) => {
                text.push_str(&String::from_utf8_lossy(e.into_inner().as_ref()));
            }
            Event::End(_) | Event::Eof => break,
            _ => {}
        }
    }

    let trimmed = text.trim();
    if object.is_empty() {
        Ok(Value::String(trimmed.to_string()))
    } else {
        if !trimmed.is_empty() {
            object.insert("_text".to_string(), Value::String(trimmed.to_string()));
        }
        Ok(Value::Object(object))
    }
}

/// Serializes a [`Value`] back to XML under a synthetic `<root>` element, mirroring
/// `ContentTypeTransformer._dict_to_xml`.
fn value_to_xml(value: &Value) -> Result<String, TransformError> {
    let mut writer = Writer::new(Vec::new());
    write_element(&mut writer, "root", value)?;
    String::from_utf8(writer.into_inner()).map_err(|e| TransformError::Xml(e.to_string()))
}

fn write_element(writer: &mut Writer<Vec<u8>>, tag: &str, value: &Value) -> Result<(), TransformError> {
    match value {
        Value::Object(map) => {
            writer.write_event(Event::Start(BytesStart::new(tag))).map_err(xml_err)?;
            for (key, v) in map {
                write_element(writer, key, v)?;
            }
            writer.write_event(Event::End(BytesEnd::new(tag))).map_err(xml_err)
        }
        Value::Array(items) => {
            writer.write_event(Event::Start(BytesStart::new(tag))).map_err(xml_err)?;
            for item in items {
                write_element(writer, "item", item)?;
            }
            writer.write_event(Event::End(BytesEnd::new(tag))).map_err(xml_err)
        }
        Value::Null => {
            writer.write_event(Event::Empty(BytesStart::new(tag))).map_err(xml_err)
        }
        other => {
            writer.write_event(Event::Start(BytesStart::new(tag))).map_err(xml_err)?;
            let text = value_to_string(other);
            if !text.is_empty() {
                writer.write_event(Event::Text(BytesText::new(&text))).map_err(xml_err)?;
            }
            writer.write_event(Event::End(BytesEnd::new(tag))).map_err(xml_err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn request(body: Option<&str>, content_type: Option<&str>) -> RequestContext {
        let mut headers = HashMap::new();
        if let Some(ct) = content_type {
            headers.insert("Content-Type".to_string(), ct.to_string());
        }
        RequestContext {
            method: "POST".to_string(),
            path: "/v1/orders".to_string(),
            host: None,
            headers,
            query_params: HashMap::new(),
            body: body.map(str::to_string),
        }
    }

    #[test]
    fn header_set_and_remove() {
        let mut engine = TransformEngine::new(TransformConfig::default());
        let mut set_rule = Rule::new("add-trace", TransformType::Header, Direction::Request, Action::Set);
        set_rule.target = Some("X-Trace".to_string());
        set_rule.value = Some(Value::String("abc".to_string()));
        let mut remove_rule = Rule::new("drop-cookie", TransformType::Header, Direction::Request, Action::Remove);
        remove_rule.target = Some("Cookie".to_string());
        engine.add_rules([set_rule, remove_rule]);

        let mut request = request(None, None);
        request.headers.insert("Cookie".to_string(), "session=1".to_string());
        engine.transform_request(&mut request).unwrap();

        assert_eq!(request.headers.get("X-Trace").map(String::as_str), Some("abc"));
        assert!(!request.headers.contains_key("Cookie"));
    }

    #[test]
    fn path_rewrite_via_regex() {
        let mut engine = TransformEngine::new(TransformConfig::default());
        let mut rule = Rule::new("strip-api-prefix", TransformType::Path, Direction::Request, Action::Map);
        rule.regex_pattern = Some("^/api".to_string());
        rule.replacement = Some(String::new());
        engine.add_rule(rule);

        let mut request = request(None, None);
        request.path = "/api/v1/orders".to_string();
        engine.transform_request(&mut request).unwrap();

        assert_eq!(request.path, "/v1/orders");
    }

    #[test]
    fn body_set_nested_json_field() {
        let mut engine = TransformEngine::new(TransformConfig::default());
        let mut rule = Rule::new("inject-tenant", TransformType::Body, Direction::Request, Action::Set);
        rule.target = Some("meta.tenant".to_string());
        rule.value = Some(Value::String("acme".to_string()));
        engine.add_rule(rule);

        let mut request = request(Some(r#"{"id":1}"#), Some("application/json"));
        engine.transform_request(&mut request).unwrap();

        let body: Value = serde_json::from_str(request.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["meta"]["tenant"], "acme");
        assert_eq!(body["id"], 1);
    }

    #[test]
    fn body_rename_preserving_original() {
        let mut engine = TransformEngine::new(TransformConfig::default());
        let mut rule = Rule::new("alias-id", TransformType::Body, Direction::Request, Action::Rename);
        rule.source = Some("id".to_string());
        rule.target = Some("order_id".to_string());
        rule.preserve_original = true;
        engine.add_rule(rule);

        let mut request = request(Some(r#"{"id":42}"#), Some("application/json"));
        engine.transform_request(&mut request).unwrap();

        let body: Value = serde_json::from_str(request.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["order_id"], 42);
        assert_eq!(body["id"], 42);
    }

    #[test]
    fn content_type_json_to_form() {
        let mut engine = TransformEngine::new(TransformConfig::default());
        let mut rule = Rule::new("json-to-form", TransformType::ContentType, Direction::Request, Action::Set);
        rule.source = Some("application/json".to_string());
        rule.target = Some("application/x-www-form-urlencoded".to_string());
        engine.add_rule(rule);

        let mut request = request(Some(r#"{"name":"alice"}"#), Some("application/json"));
        engine.transform_request(&mut request).unwrap();

        assert_eq!(request.body.as_deref(), Some("name=alice"));
        assert_eq!(request.headers.get("Content-Type").map(String::as_str), Some("application/x-www-form-urlencoded"));
    }

    #[test]
    fn xml_round_trips_through_json() {
        let xml = "<root><name>Alice</name><tags><item>a</item><item>b</item></tags></root>";
        let value = xml_to_value(xml).unwrap();
        assert_eq!(value["name"], "Alice");
        assert_eq!(value["tags"]["item"], Value::Array(vec![Value::String("a".to_string()), Value::String("b".to_string())]));

        let back = value_to_xml(&value).unwrap();
        let reparsed = xml_to_value(&back).unwrap();
        assert_eq!(reparsed["name"], "Alice");
    }

    #[test]
    fn xml_attributes_become_object_keys() {
        let xml = r#"<root><user id="7">bob</user></root>"#;
        let value = xml_to_value(xml).unwrap();
        assert_eq!(value["user"]["id"], "7");
        assert_eq!(value["user"]["_text"], "bob");
    }
}
