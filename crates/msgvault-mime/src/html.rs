//! HTML to plain text extraction for body previews and search indexing.

/// Converts HTML to plain text.
///
/// Script, style, and head elements are removed along with their content.
/// Block elements (`p`, `div`, headings) become paragraph breaks and `br`
/// becomes a line break; all other tags are stripped. Named and numeric
/// entities are decoded, internal whitespace is collapsed, and runs of
/// blank lines shrink to one. Whitespace inside `pre`/`code` is not
/// preserved; this is a preview-oriented extraction, not a renderer.
#[must_use]
pub fn strip_html(input: &str) -> String {
    let mut text = input.to_string();
    for element in ["script", "style", "head"] {
        text = remove_element(&text, element);
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();

    while let Some(lt) = rest.find('<') {
        let (before, tag_start) = rest.split_at(lt);
        push_decoded(&mut out, before);

        match tag_start.find('>') {
            Some(gt) => {
                match tag_name(&tag_start[1..gt]) {
                    name if name == "br" => out.push('\n'),
                    name if is_block(&name) => out.push_str("\n\n"),
                    _ => {}
                }
                rest = &tag_start[gt + 1..];
            }
            None => {
                // Dangling '<' with no close; keep the rest as text.
                push_decoded(&mut out, tag_start);
                rest = "";
            }
        }
    }
    push_decoded(&mut out, rest);

    normalize_whitespace(&out)
}

/// Removes `<name ...>...</name>` including content, case-insensitively.
/// An unclosed element swallows everything to the end of input.
fn remove_element(input: &str, name: &str) -> String {
    let lower = input.to_lowercase();
    let open = format!("<{name}");
    let close = format!("</{name}>");

    let mut out = String::with_capacity(input.len());
    let mut pos = 0;

    while let Some(start) = lower[pos..].find(&open) {
        let start = pos + start;
        out.push_str(&input[pos..start]);
        match lower[start..].find(&close) {
            Some(end) => pos = start + end + close.len(),
            None => return out,
        }
    }

    out.push_str(&input[pos..]);
    out
}

/// Extracts the lowercased element name from tag contents.
fn tag_name(tag: &str) -> String {
    tag.trim_start_matches('/')
        .chars()
        .take_while(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_lowercase()
}

fn is_block(name: &str) -> bool {
    matches!(name, "p" | "div" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6")
}

/// Appends text with HTML entities decoded.
fn push_decoded(out: &mut String, text: &str) {
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        let (before, entity_start) = rest.split_at(amp);
        out.push_str(before);

        // Entities are short; cap the scan so a bare '&' doesn't eat the text.
        match entity_start[1..].char_indices().take(10).find(|(_, c)| *c == ';') {
            Some((idx, _)) => {
                let entity = &entity_start[1..=idx];
                match decode_entity(entity) {
                    Some(decoded) => out.push_str(&decoded),
                    None => out.push_str(&entity_start[..idx + 2]),
                }
                rest = &entity_start[idx + 2..];
            }
            None => {
                out.push('&');
                rest = &entity_start[1..];
            }
        }
    }
    out.push_str(rest);
}

/// Decodes a single entity body (without `&` and `;`).
fn decode_entity(entity: &str) -> Option<String> {
    match entity {
        "amp" => return Some("&".to_string()),
        "lt" => return Some("<".to_string()),
        "gt" => return Some(">".to_string()),
        "quot" => return Some("\"".to_string()),
        "apos" | "#39" => return Some("'".to_string()),
        "nbsp" => return Some(" ".to_string()),
        _ => {}
    }

    let code = entity.strip_prefix('#')?;
    let value = match code.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => code.parse::<u32>().ok()?,
    };
    char::from_u32(value).map(String::from)
}

/// Collapses horizontal whitespace, trims spaces around line breaks, and
/// shrinks runs of blank lines to a single blank line.
fn normalize_whitespace(input: &str) -> String {
    let unified = input.replace("\r\n", "\n").replace('\r', "\n");

    let mut collapsed = String::with_capacity(unified.len());
    let mut last_space = false;
    for ch in unified.chars() {
        if ch == ' ' || ch == '\t' {
            if !last_space {
                collapsed.push(' ');
            }
            last_space = true;
        } else {
            collapsed.push(ch);
            last_space = false;
        }
    }

    // Drop spaces adjacent to newlines, then cap newline runs at two.
    let mut out = String::with_capacity(collapsed.len());
    let mut newline_run = 0;
    for line in collapsed.split('\n') {
        let line = line.trim();
        if line.is_empty() {
            newline_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if newline_run > 0 {
                out.push('\n');
            }
        }
        out.push_str(line);
        newline_run = 0;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_tag_stripping() {
        assert_eq!(strip_html("<p>Hello</p>"), "Hello");
        assert_eq!(strip_html("<div><span>Nested</span></div>"), "Nested");
        assert_eq!(strip_html("No tags"), "No tags");
        assert_eq!(strip_html("<b>Bold</b> and <i>italic</i>"), "Bold and italic");
        assert_eq!(strip_html(""), "");
    }

    #[test]
    fn test_script_style_head_removed() {
        assert_eq!(strip_html("<script>alert('xss')</script>Text"), "Text");
        assert_eq!(strip_html("<style>.class{color:red}</style>Content"), "Content");
        assert_eq!(strip_html("<head><title>Title</title></head>Body"), "Body");
    }

    #[test]
    fn test_newline_normalization() {
        assert_eq!(strip_html("Line1\r\nLine2\r\nLine3"), "Line1\nLine2\nLine3");
        assert_eq!(strip_html("Multiple\n\n\n\nNewlines"), "Multiple\n\nNewlines");
    }

    #[test]
    fn test_entities() {
        assert_eq!(strip_html("Hello&nbsp;World"), "Hello World");
        assert_eq!(strip_html("Tom &amp; Jerry"), "Tom & Jerry");
        assert_eq!(strip_html("5 &lt; 10 &gt; 3"), "5 < 10 > 3");
        assert_eq!(strip_html("&quot;quoted&quot;"), "\"quoted\"");
        assert_eq!(strip_html("&#169; 2024"), "© 2024");
        assert_eq!(strip_html("&#x2022; bullet"), "• bullet");
    }

    #[test]
    fn test_block_elements_break_lines() {
        assert_eq!(strip_html("Line1<br>Line2"), "Line1\nLine2");
        assert_eq!(strip_html("Line1<br/>Line2"), "Line1\nLine2");
        assert_eq!(strip_html("<p>Para1</p><p>Para2</p>"), "Para1\n\nPara2");
        assert_eq!(strip_html("<div>Block1</div><div>Block2</div>"), "Block1\n\nBlock2");
        assert_eq!(strip_html("<h1>Title</h1><p>Content</p>"), "Title\n\nContent");
    }

    #[test]
    fn test_complex_html_email() {
        let input = "<html><head><style>.x{}</style></head><body>\n\
                     \t\t\t<p>Hello,</p>\n\
                     \t\t\t<p>This is a <b>test</b> email with &amp; special chars.</p>\n\
                     \t\t\t<br>\n\
                     \t\t\t<p>Thanks!</p>\n\
                     \t\t\t</body></html>";
        assert_eq!(
            strip_html(input),
            "Hello,\n\nThis is a test email with & special chars.\n\nThanks!"
        );
    }

    #[test]
    fn test_whitespace_collapse() {
        assert_eq!(strip_html("Hello    World"), "Hello World");
        assert_eq!(strip_html("Hello&nbsp;&nbsp;&nbsp;World"), "Hello World");
    }

    #[test]
    fn test_pre_whitespace_collapsed() {
        // Preformatted whitespace is not preserved; preview extraction only.
        assert_eq!(strip_html("<pre>  code  here  </pre>"), "code here");
    }

    #[test]
    fn test_bare_ampersand_kept() {
        assert_eq!(strip_html("R&D department"), "R&D department");
    }
}
