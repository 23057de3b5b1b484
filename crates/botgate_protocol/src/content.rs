#![forbid(unsafe_code)]

use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;

const CQ_OPEN: &str = "[CQ:";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
	#[error("message must be a string or a segment array")]
	InvalidShape,

	#[error("segment #{index} is not an object with a type")]
	MalformedSegment { index: usize },

	#[error("{segment} segment without {field}")]
	MissingField { segment: String, field: &'static str },

	#[error("{segment} segment has unsupported source {value:?}")]
	UnsupportedSource { segment: String, value: String },

	#[error("unsupported segment type {0:?}")]
	UnsupportedSegment(String),
}

/// One rich-media item of an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaItem {
	LocalImage(PathBuf),
	UrlImage(String),
	Base64Image(String),
	LocalRecord(PathBuf),
	UrlRecord(String),
	Base64Record(String),
	Markdown(String),
	QqMusic(String),
}

impl MediaItem {
	pub fn kind(&self) -> &'static str {
		match self {
			Self::LocalImage(_) => "local_image",
			Self::UrlImage(_) => "url_image",
			Self::Base64Image(_) => "base64_image",
			Self::LocalRecord(_) => "local_record",
			Self::UrlRecord(_) => "url_record",
			Self::Base64Record(_) => "base64_record",
			Self::Markdown(_) => "markdown",
			Self::QqMusic(_) => "qqmusic",
		}
	}

	pub fn is_image(&self) -> bool {
		matches!(self, Self::LocalImage(_) | Self::UrlImage(_) | Self::Base64Image(_))
	}
}

/// Outbound content split into text and media items.
///
/// Items that could not be understood are collected in `skipped`; the rest of
/// the message is still usable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedContent {
	pub text: String,
	pub items: Vec<MediaItem>,
	pub skipped: Vec<ContentError>,
}

impl ParsedContent {
	pub fn is_empty(&self) -> bool {
		self.text.trim().is_empty() && self.items.is_empty()
	}

	/// Whether this is exactly one image plus some text.
	pub fn is_single_image_with_text(&self) -> bool {
		!self.text.trim().is_empty() && self.items.iter().filter(|i| i.is_image()).count() == 1
	}
}

/// Parse a `message` value: a CQ-code string or a segment array.
pub fn parse_content(message: &Value) -> Result<ParsedContent, ContentError> {
	match message {
		Value::String(s) => Ok(parse_cq_string(s)),
		Value::Array(segments) => Ok(parse_segments(segments)),
		Value::Object(_) => Ok(parse_segments(std::slice::from_ref(message))),
		_ => Err(ContentError::InvalidShape),
	}
}

fn parse_segments(segments: &[Value]) -> ParsedContent {
	let mut out = ParsedContent::default();

	for (index, seg) in segments.iter().enumerate() {
		let Some(kind) = seg.get("type").and_then(Value::as_str) else {
			out.skipped.push(ContentError::MalformedSegment { index });
			continue;
		};
		let data = seg.get("data").unwrap_or(&Value::Null);
		let field = |name: &str| data.get(name).and_then(value_as_string);
		apply_segment(&mut out, kind, field);
	}

	out
}

fn value_as_string(v: &Value) -> Option<String> {
	match v {
		Value::String(s) => Some(s.clone()),
		Value::Number(n) => Some(n.to_string()),
		_ => None,
	}
}

fn apply_segment<F>(out: &mut ParsedContent, kind: &str, field: F)
where
	F: Fn(&str) -> Option<String>,
{
	let result = match kind {
		"text" => {
			if let Some(text) = field("text") {
				out.text.push_str(&text);
			}
			return;
		}
		"image" => media_source(kind, field("file").or_else(|| field("url"))).map(|src| match src {
			Source::Local(p) => MediaItem::LocalImage(p),
			Source::Url(u) => MediaItem::UrlImage(u),
			Source::Base64(b) => MediaItem::Base64Image(b),
		}),
		"record" => media_source(kind, field("file").or_else(|| field("url"))).map(|src| match src {
			Source::Local(p) => MediaItem::LocalRecord(p),
			Source::Url(u) => MediaItem::UrlRecord(u),
			Source::Base64(b) => MediaItem::Base64Record(b),
		}),
		"markdown" => field("content")
			.or_else(|| field("data"))
			.filter(|s| !s.is_empty())
			.map(MediaItem::Markdown)
			.ok_or(ContentError::MissingField {
				segment: kind.to_string(),
				field: "content",
			}),
		"music" => music(field("type"), field("id")),
		other => Err(ContentError::UnsupportedSegment(other.to_string())),
	};

	match result {
		Ok(item) => out.items.push(item),
		Err(err) => out.skipped.push(err),
	}
}

fn music(kind: Option<String>, id: Option<String>) -> Result<MediaItem, ContentError> {
	let kind = kind.unwrap_or_default();
	if !kind.eq_ignore_ascii_case("qq") {
		return Err(ContentError::UnsupportedSource {
			segment: "music".to_string(),
			value: kind,
		});
	}
	id.filter(|s| !s.is_empty())
		.map(MediaItem::QqMusic)
		.ok_or(ContentError::MissingField {
			segment: "music".to_string(),
			field: "id",
		})
}

enum Source {
	Local(PathBuf),
	Url(String),
	Base64(String),
}

fn media_source(segment: &str, file: Option<String>) -> Result<Source, ContentError> {
	let file = file.map(|f| f.trim().to_string()).unwrap_or_default();
	if file.is_empty() {
		return Err(ContentError::MissingField {
			segment: segment.to_string(),
			field: "file",
		});
	}

	if let Some(data) = file.strip_prefix("base64://") {
		return Ok(Source::Base64(data.to_string()));
	}
	if file.starts_with("http://") || file.starts_with("https://") {
		return Ok(Source::Url(file));
	}
	if let Some(path) = file.strip_prefix("file://") {
		return Ok(Source::Local(PathBuf::from(path)));
	}
	if file.contains("://") {
		return Err(ContentError::UnsupportedSource {
			segment: segment.to_string(),
			value: file,
		});
	}
	Ok(Source::Local(PathBuf::from(file)))
}

fn cq_unescape(s: &str) -> String {
	s.replace("&#91;", "[")
		.replace("&#93;", "]")
		.replace("&#44;", ",")
		.replace("&amp;", "&")
}

fn parse_cq_string(input: &str) -> ParsedContent {
	let mut out = ParsedContent::default();
	let mut rest = input;

	while let Some(start) = rest.find(CQ_OPEN) {
		let Some(len) = rest[start..].find(']') else {
			break;
		};
		out.text.push_str(&cq_unescape(&rest[..start]));

		let body = &rest[start + CQ_OPEN.len()..start + len];
		let mut parts = body.split(',');
		let kind = parts.next().unwrap_or_default().trim();
		let params: Vec<(&str, String)> = parts
			.filter_map(|kv| kv.split_once('='))
			.map(|(k, v)| (k.trim(), cq_unescape(v)))
			.collect();
		let field = |name: &str| params.iter().find(|(k, _)| *k == name).map(|(_, v)| v.clone());
		apply_segment(&mut out, kind, field);

		rest = &rest[start + len + 1..];
	}

	out.text.push_str(&cq_unescape(rest));
	out
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn plain_string_is_text() {
		let c = parse_content(&json!("hello &amp; bye")).unwrap();
		assert_eq!(c.text, "hello & bye");
		assert!(c.items.is_empty());
		assert!(c.skipped.is_empty());
	}

	#[test]
	fn cq_codes_become_items() {
		let c = parse_content(&json!(
			"look [CQ:image,file=https://x.test/a.png] and [CQ:record,file=base64://AAAA][CQ:music,type=qq,id=123]"
		))
		.unwrap();
		assert_eq!(c.text, "look  and ");
		assert_eq!(
			c.items,
			vec![
				MediaItem::UrlImage("https://x.test/a.png".into()),
				MediaItem::Base64Record("AAAA".into()),
				MediaItem::QqMusic("123".into()),
			]
		);
		assert!(c.is_single_image_with_text());
	}

	#[test]
	fn segment_array_is_parsed_and_bad_items_are_skipped() {
		let c = parse_content(&json!([
			{ "type": "text", "data": { "text": "hi " } },
			{ "type": "image", "data": { "file": "file:///tmp/a.png" } },
			{ "type": "image", "data": {} },
			{ "type": "markdown", "data": { "content": "# title" } },
			{ "type": "face", "data": { "id": 1 } },
			"garbage",
			{ "type": "text", "data": { "text": "there" } }
		]))
		.unwrap();

		assert_eq!(c.text, "hi there");
		assert_eq!(
			c.items,
			vec![
				MediaItem::LocalImage(PathBuf::from("/tmp/a.png")),
				MediaItem::Markdown("# title".into()),
			]
		);
		assert_eq!(
			c.skipped,
			vec![
				ContentError::MissingField {
					segment: "image".into(),
					field: "file"
				},
				ContentError::UnsupportedSegment("face".into()),
				ContentError::MalformedSegment { index: 5 },
			]
		);
	}

	#[test]
	fn unterminated_cq_code_is_kept_as_text() {
		let c = parse_content(&json!("before [CQ:image,file=x")).unwrap();
		assert_eq!(c.text, "before [CQ:image,file=x");
		assert!(c.items.is_empty());
	}

	#[test]
	fn non_qq_music_is_rejected() {
		let c = parse_content(&json!("[CQ:music,type=163,id=1]")).unwrap();
		assert!(c.items.is_empty());
		assert!(matches!(c.skipped[0], ContentError::UnsupportedSource { .. }));
	}

	#[test]
	fn numbers_are_not_messages() {
		assert_eq!(parse_content(&json!(5)), Err(ContentError::InvalidShape));
		assert_eq!(parse_content(&Value::Null), Err(ContentError::InvalidShape));
	}
}
