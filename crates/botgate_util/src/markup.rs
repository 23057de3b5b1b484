#![forbid(unsafe_code)]

use std::borrow::Cow;

/// Opening of an at-user reference inside platform markdown.
pub const AT_USER_PREFIX: &str = "<qqbot-at-user id=\"";

/// Maps a union id back to the raw id the platform expects in markup.
pub trait ReferenceResolver {
	fn raw_id(&self, union_id: &str) -> Option<String>;
}

impl<F> ReferenceResolver for F
where
	F: Fn(&str) -> Option<String>,
{
	fn raw_id(&self, union_id: &str) -> Option<String> {
		self(union_id)
	}
}

/// Rewrite `<qqbot-at-user id="UNION" />` references to their raw ids.
///
/// Single left-to-right pass. Everything outside the id value is copied
/// verbatim; ids the resolver does not know are left as they are. A tag with
/// no closing quote ends the scan and the rest of the input is kept as-is.
/// Input without any reference is returned borrowed.
pub fn rewrite_at_user_ids<'a, R>(markup: &'a str, resolver: &R) -> Cow<'a, str>
where
	R: ReferenceResolver + ?Sized,
{
	let Some(first) = markup.find(AT_USER_PREFIX) else {
		return Cow::Borrowed(markup);
	};

	let mut out = String::with_capacity(markup.len());
	let mut pos = 0;
	let mut next = Some(first);

	while let Some(rel) = next {
		let tag_start = pos + rel;
		let id_start = tag_start + AT_USER_PREFIX.len();

		out.push_str(&markup[pos..id_start]);

		let Some(id_len) = markup[id_start..].find('"') else {
			out.push_str(&markup[id_start..]);
			return Cow::Owned(out);
		};
		let id_end = id_start + id_len;
		let union_id = &markup[id_start..id_end];

		match resolver.raw_id(union_id).filter(|raw| !raw.is_empty()) {
			Some(raw) => out.push_str(&raw),
			None => out.push_str(union_id),
		}
		out.push('"');

		pos = id_end + 1;
		next = markup[pos..].find(AT_USER_PREFIX);
	}

	out.push_str(&markup[pos..]);
	Cow::Owned(out)
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use super::*;

	fn table() -> HashMap<String, String> {
		let mut m = HashMap::new();
		m.insert("U1".to_string(), "R1".to_string());
		m.insert("U3".to_string(), "R3".to_string());
		m.insert("EMPTY".to_string(), String::new());
		m
	}

	fn rewrite(s: &str) -> String {
		let t = table();
		rewrite_at_user_ids(s, &|id: &str| t.get(id).cloned()).into_owned()
	}

	#[test]
	fn input_without_prefix_is_borrowed_and_unchanged() {
		let t = table();
		for s in ["", "plain text", "<qqbot-at-everyone />", "id=\"U1\""] {
			let out = rewrite_at_user_ids(s, &|id: &str| t.get(id).cloned());
			assert!(matches!(out, Cow::Borrowed(_)), "expected borrowed for {s:?}");
			assert_eq!(out, s);
		}
	}

	#[test]
	fn rewrites_known_union_id() {
		assert_eq!(rewrite(r#"<qqbot-at-user id="U1" />"#), r#"<qqbot-at-user id="R1" />"#);
	}

	#[test]
	fn unknown_union_id_is_left_unchanged() {
		assert_eq!(rewrite(r#"<qqbot-at-user id="U2" />"#), r#"<qqbot-at-user id="U2" />"#);
	}

	#[test]
	fn empty_raw_id_counts_as_miss() {
		assert_eq!(
			rewrite(r#"<qqbot-at-user id="EMPTY" />"#),
			r#"<qqbot-at-user id="EMPTY" />"#
		);
	}

	#[test]
	fn rewrites_multiple_tags_and_keeps_surrounding_text() {
		let input = r#"hi <qqbot-at-user id="U1" /> and <qqbot-at-user id="U2" />, also <qqbot-at-user id="U3" />!"#;
		let expected = r#"hi <qqbot-at-user id="R1" /> and <qqbot-at-user id="U2" />, also <qqbot-at-user id="R3" />!"#;
		assert_eq!(rewrite(input), expected);
	}

	#[test]
	fn unterminated_tag_is_passed_through() {
		let input = r#"before <qqbot-at-user id="U1"#;
		assert_eq!(rewrite(input), input);

		let input = r#"<qqbot-at-user id="U1" /> then <qqbot-at-user id="U3 tail text"#;
		assert_eq!(
			rewrite(input),
			r#"<qqbot-at-user id="R1" /> then <qqbot-at-user id="U3 tail text"#
		);
	}

	#[test]
	fn handles_multibyte_text() {
		let input = "你好 <qqbot-at-user id=\"U1\" /> 世界";
		assert_eq!(rewrite(input), "你好 <qqbot-at-user id=\"R1\" /> 世界");
	}
}
